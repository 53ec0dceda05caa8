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

//! Sync Run Model
//!
//! One row per execution attempt. Runs are created in the `running` state
//! and finalized exactly once with a terminal `success` or `failure` status;
//! finalized rows are never mutated. The run executor exclusively owns
//! creation and finalization.

use diesel::prelude::*;
use serde::{Deserialize, Serialize};

/// Transient status of a run that has not finalized yet.
pub const STATUS_RUNNING: &str = "running";
/// Terminal status of a run whose engine invocation (or empty-extraction
/// short circuit) succeeded.
pub const STATUS_SUCCESS: &str = "success";
/// Terminal status of a run that failed at any stage.
pub const STATUS_FAILURE: &str = "failure";

/// A run record in the `sync_runs` table.
#[derive(Debug, Clone, Queryable, Selectable, Serialize, Deserialize)]
#[diesel(table_name = crate::database::schema::sync_runs)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct SyncRun {
    /// Unique identifier for the run
    pub id: i32,
    /// Task this run belongs to
    pub task_id: i32,
    /// Task name at trigger time (denormalized for log display)
    pub task_name: Option<String>,
    /// Civil-time start timestamp
    pub started_at: String,
    /// Civil-time finalization timestamp
    pub finished_at: Option<String>,
    /// `running`, `success`, or `failure`
    pub status: String,
    /// Number of rows extracted from the source
    pub rows_extracted: Option<i32>,
    /// Failure classification tag (see [`crate::error::FailureKind`])
    pub failure_kind: Option<String>,
    /// Bounded, credential-free excerpt describing the outcome
    pub message: Option<String>,
}

impl SyncRun {
    /// Whether this run has reached a terminal status.
    pub fn is_finalized(&self) -> bool {
        self.status != STATUS_RUNNING
    }
}

/// A new run record, inserted at trigger time in the `running` state.
#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = crate::database::schema::sync_runs)]
pub struct NewSyncRun {
    /// Task this run belongs to
    pub task_id: i32,
    /// Task name at trigger time
    pub task_name: Option<String>,
    /// Civil-time start timestamp
    pub started_at: String,
    /// Initial status, always `running`
    pub status: String,
}
