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

//! Task definition semantics: sync modes, field typing strategies, target
//! link parsing, and pre-flight validation.
//!
//! A [`SyncTask`] row is free-form text until [`TaskPlan::validate`] turns it
//! into a typed plan. Validation runs at the start of every run so that a
//! task edited into a bad state fails with a `configuration` classification
//! instead of reaching the subprocess stage.

use std::str::FromStr;

use croner::Cron;
use regex::Regex;
use std::sync::OnceLock;

use crate::error::ConfigurationError;
use crate::models::SyncTask;

/// How the engine reconciles extracted rows with the target table.
///
/// Index-column uniqueness in the source result set is the caller's
/// responsibility; duplicate index values get last-write-wins treatment in
/// the external engine, not deduplication here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncMode {
    /// Upsert: index match updates the remote row, no match inserts.
    Full,
    /// Insert-only: index match is skipped, no match inserts.
    Incremental,
    /// Delete remote rows whose index values appear in the batch, then insert.
    Overwrite,
    /// Delete every remote row in the target table, then insert the batch.
    Clone,
}

impl SyncMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncMode::Full => "full",
            SyncMode::Incremental => "incremental",
            SyncMode::Overwrite => "overwrite",
            SyncMode::Clone => "clone",
        }
    }
}

impl FromStr for SyncMode {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "full" => Ok(SyncMode::Full),
            "incremental" => Ok(SyncMode::Incremental),
            "overwrite" => Ok(SyncMode::Overwrite),
            "clone" => Ok(SyncMode::Clone),
            other => Err(ConfigurationError::UnknownSyncMode(other.to_string())),
        }
    }
}

/// How the engine decides target field types for newly created columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldTypeStrategy {
    /// Everything becomes text.
    Raw,
    /// Map source column types to a small set of target types.
    Base,
    /// Infer types from sampled values.
    Auto,
    /// Infer types plus formatting hints.
    Intelligence,
}

impl FieldTypeStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            FieldTypeStrategy::Raw => "raw",
            FieldTypeStrategy::Base => "base",
            FieldTypeStrategy::Auto => "auto",
            FieldTypeStrategy::Intelligence => "intelligence",
        }
    }
}

impl FromStr for FieldTypeStrategy {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "raw" => Ok(FieldTypeStrategy::Raw),
            "base" => Ok(FieldTypeStrategy::Base),
            "auto" => Ok(FieldTypeStrategy::Auto),
            "intelligence" => Ok(FieldTypeStrategy::Intelligence),
            other => Err(ConfigurationError::UnknownFieldTypeStrategy(
                other.to_string(),
            )),
        }
    }
}

fn app_token_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"/base/([A-Za-z0-9]+)").unwrap())
}

fn table_id_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[?&]table=(tbl[0-9A-Za-z]+)").unwrap())
}

/// Target coordinates extracted from a bitable share link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BitableTarget {
    /// Base (app) token from the `/base/<token>` path segment.
    pub app_token: String,
    /// Table id from the `table=tbl...` query parameter, when present.
    /// Absent means the engine targets the base's default table.
    pub table_id: Option<String>,
}

impl BitableTarget {
    /// Parses a share link of the form
    /// `https://<host>/base/<app_token>?table=<table_id>&view=...`.
    pub fn parse(link: &str) -> Result<Self, ConfigurationError> {
        let link = link.trim();
        let app_token = app_token_re()
            .captures(link)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_string())
            .ok_or_else(|| ConfigurationError::UnparsableTargetLink(link.to_string()))?;

        let table_id = table_id_re()
            .captures(link)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_string());

        Ok(BitableTarget {
            app_token,
            table_id,
        })
    }
}

/// A task definition that has passed pre-flight validation.
#[derive(Debug, Clone)]
pub struct TaskPlan {
    pub task_id: i32,
    pub name: String,
    pub source_sql: String,
    pub target: BitableTarget,
    pub mode: SyncMode,
    /// Column the engine keys upserts on. Presence in the extraction is
    /// checked later, once column names are known.
    pub index_column: String,
    pub strategy: FieldTypeStrategy,
    pub create_missing_fields: bool,
}

impl TaskPlan {
    /// Validates a stored task definition into a typed plan.
    ///
    /// Checks everything that can be checked without touching the source
    /// database: mode, strategy, cron expression, target link, and a
    /// non-empty index column.
    pub fn validate(task: &SyncTask) -> Result<Self, ConfigurationError> {
        let mode = task.sync_mode.parse::<SyncMode>()?;
        let strategy = task.field_type_strategy.parse::<FieldTypeStrategy>()?;
        let target = BitableTarget::parse(&task.target_link)?;
        parse_cron(&task.cron_expr)?;

        let index_column = task.index_column.trim();
        if index_column.is_empty() {
            return Err(ConfigurationError::EmptyIndexColumn);
        }

        Ok(TaskPlan {
            task_id: task.id,
            name: task.name.clone(),
            source_sql: task.source_sql.clone(),
            target,
            mode,
            index_column: index_column.to_string(),
            strategy,
            create_missing_fields: task.create_missing_fields != 0,
        })
    }
}

/// Parses a five-field cron expression.
pub fn parse_cron(expression: &str) -> Result<Cron, ConfigurationError> {
    Cron::new(expression)
        .parse()
        .map_err(|source| ConfigurationError::InvalidCronExpression {
            expression: expression.to_string(),
            source,
        })
}
