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

//! # Tabsync
//!
//! Tabsync is a task execution engine for scheduled data synchronization:
//! it extracts rows from a MySQL source, writes them to a transfer file,
//! and supervises an external capability engine (XTF) that pushes the data
//! into a Feishu Bitable. Task definitions and run history live in an
//! embedded SQLite store.
//!
//! ## Core Components
//!
//! - [`SyncRunner`]: lifecycle owner — wiring, scheduler, shutdown
//! - [`RunExecutor`]: the full pipeline for one task trigger
//! - [`Scheduler`](scheduler::Scheduler): cron evaluation in one fixed
//!   civil timezone
//! - [`Dal`]: task and run store over SQLite
//! - [`classify`](classify::classify): exit code + output markers → outcome
//! - [`WebhookAlerter`]: best-effort failure notifications
//!
//! ## Key Guarantees
//!
//! - Runs of the same task never overlap; concurrent triggers are skipped
//! - Every execution attempt finalizes exactly one run record, write-once
//! - One task's failure never crashes the scheduler or affects other tasks
//! - Source credentials never reach the descriptor handed to the engine
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use tabsync::{Settings, SyncRunner, SyncRunnerConfig};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let settings = Settings::from_env()?;
//! let runner = SyncRunner::with_settings(settings, SyncRunnerConfig::default()).await?;
//!
//! // Tasks fire on their cron expressions; manual triggers share the
//! // same entry point and no-overlap guarantee.
//! let outcome = runner.execute_now(1).await?;
//! println!("run finished: {outcome:?}");
//!
//! runner.shutdown().await?;
//! # Ok(())
//! # }
//! ```

pub mod alert;
pub mod classify;
pub mod config;
pub mod dal;
pub mod database;
pub mod descriptor;
pub mod engine;
pub mod error;
pub mod executor;
pub mod extract;
pub mod models;
pub mod runner;
pub mod scheduler;
pub mod task;
pub mod transfer;

pub use alert::{AlertSink, FailureAlert, WebhookAlerter};
pub use classify::Outcome;
pub use config::{Settings, SettingsError};
pub use dal::{Dal, TaskSpec};
pub use database::{CivilTimestamp, Database};
pub use descriptor::{FeishuCredentials, InvocationDescriptor};
pub use engine::{CapabilityEngine, EngineReport, SubprocessEngine};
pub use error::{
    AlertError, ConfigurationError, DescriptorError, EngineError, EngineFailureKind,
    ExtractionError, FailureKind, RunnerError, StoreError, TransferError,
};
pub use executor::{ExecutorOptions, RunExecutor, RunOutcome};
pub use extract::{Extraction, Extractor, MySqlExtractor};
pub use models::{SyncRun, SyncTask};
pub use runner::{SyncRunner, SyncRunnerConfig};
pub use task::{BitableTarget, FieldTypeStrategy, SyncMode, TaskPlan};
