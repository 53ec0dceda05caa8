/*
 *  Copyright 2025-2026 Colliery Software
 *
 *  Licensed under the Apache License, Version 2.0 (the "License");
 *  you may not use this file except in compliance with the License.
 *  You may obtain a copy of the License at
 *
 *      http://www.apache.org/licenses/LICENSE-2.0
 *
 *  Unless required by applicable law or agreed to in writing, software
 *  distributed under the License is distributed on an "AS IS" BASIS,
 *  WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 *  See the License for the specific language governing permissions and
 *  limitations under the License.
 */

//! Error types for the tabsync execution engine.
//!
//! Each pipeline stage has its own error enum; the run boundary maps every
//! stage error into a [`FailureKind`] classification tag that is persisted on
//! the terminal run record. Stage errors never propagate past the run
//! boundary: one task's failure must not crash the scheduler or affect
//! other tasks.

use std::fmt;
use thiserror::Error;

/// Classification tag persisted on a failed run record.
///
/// This is the closed failure taxonomy. `AlertDelivery` failures are
/// deliberately absent: alerting is best-effort and never changes a run's
/// own classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Malformed task definition (missing index column, bad cron, unknown
    /// mode). The run never reaches the subprocess stage.
    Configuration,
    /// Source unreachable, bad query, or zero-column result.
    Extraction,
    /// Credential assembly or descriptor emission failure.
    Descriptor,
    /// The external engine exceeded the configured wall-clock limit and was
    /// forcibly terminated.
    Timeout,
    /// The external engine reported failure via exit code or output markers.
    Engine(EngineFailureKind),
}

/// Detail for engine-reported failures, derived from exit status and the
/// pinned output markers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineFailureKind {
    /// Authentication marker (token fetch failed, invalid app secret).
    Auth,
    /// Permission marker (app/bot lacks access to the target table).
    Permission,
    /// Rate-limit marker.
    RateLimit,
    /// A generic hard-failure marker with exit code zero.
    ErrorMarker,
    /// Non-zero exit code without a more specific marker.
    NonZeroExit,
}

impl FailureKind {
    /// Stable string form stored in the `failure_kind` column.
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::Configuration => "configuration",
            FailureKind::Extraction => "extraction",
            FailureKind::Descriptor => "descriptor",
            FailureKind::Timeout => "timeout",
            FailureKind::Engine(EngineFailureKind::Auth) => "engine_auth",
            FailureKind::Engine(EngineFailureKind::Permission) => "engine_permission",
            FailureKind::Engine(EngineFailureKind::RateLimit) => "engine_rate_limit",
            FailureKind::Engine(EngineFailureKind::ErrorMarker) => "engine_error_marker",
            FailureKind::Engine(EngineFailureKind::NonZeroExit) => "engine_nonzero_exit",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors raised while validating a task definition before execution.
#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("Index column must not be empty")]
    EmptyIndexColumn,

    #[error("Index column '{column}' is not present in the query result (columns: {available:?})")]
    IndexColumnMissing {
        column: String,
        available: Vec<String>,
    },

    #[error("Unknown sync mode: {0}")]
    UnknownSyncMode(String),

    #[error("Unknown field type strategy: {0}")]
    UnknownFieldTypeStrategy(String),

    #[error("Invalid cron expression '{expression}': {source}")]
    InvalidCronExpression {
        expression: String,
        #[source]
        source: croner::errors::CronError,
    },

    #[error("Target link is not a recognizable bitable reference: {0}")]
    UnparsableTargetLink(String),

    #[error("Query returned zero rows and the task treats empty extractions as errors")]
    EmptyExtraction,
}

/// Errors raised by the extraction stage.
#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("Failed to connect to source database: {0}")]
    Connection(#[source] sqlx::Error),

    #[error("Query failed: {0}")]
    Query(#[source] sqlx::Error),

    #[error("Query produced a zero-column result")]
    ZeroColumns,

    #[error("Failed to write transfer file: {0}")]
    TransferWrite(#[from] TransferError),
}

/// Errors raised while writing or reading a transfer file.
#[derive(Debug, Error)]
pub enum TransferError {
    #[error("I/O error on transfer file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed transfer file: {0}")]
    Format(#[from] csv::Error),
}

/// Errors raised while assembling or emitting the invocation descriptor.
#[derive(Debug, Error)]
pub enum DescriptorError {
    #[error("Missing Feishu credentials: {0}")]
    MissingCredentials(&'static str),

    #[error("Failed to serialize descriptor: {0}")]
    Serialize(#[from] serde_yaml::Error),

    #[error("Failed to write descriptor file: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised while supervising the external engine process.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Engine command is empty")]
    EmptyCommand,

    #[error("Failed to spawn engine process '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to wait on engine process: {0}")]
    Wait(#[source] std::io::Error),

    #[error("Engine process exceeded the {0:?} timeout and was terminated")]
    Timeout(std::time::Duration),
}

/// Errors raised by the alert sink. Logged, never escalated.
#[derive(Debug, Error)]
pub enum AlertError {
    #[error("Webhook URL is not configured")]
    NotConfigured,

    #[error("Webhook request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Webhook rejected the message: code={code}, msg={msg}")]
    Rejected { code: i64, msg: String },
}

/// Errors raised by the task/run store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database connection pool error: {0}")]
    ConnectionPool(String),

    #[error("Database error: {0}")]
    Database(#[from] diesel::result::Error),

    #[error("Task {0} not found")]
    TaskNotFound(i32),

    #[error("Run {0} is already finalized")]
    AlreadyFinalized(i32),

    #[error("Failed to run migrations: {0}")]
    Migration(String),
}

/// Errors raised by the scheduler or runner lifecycle.
#[derive(Debug, Error)]
pub enum RunnerError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Runner setup failed: {0}")]
    Setup(String),

    #[error("Runner is shutting down")]
    ShuttingDown,
}
