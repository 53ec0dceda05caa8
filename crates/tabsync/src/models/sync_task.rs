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

//! Sync Task Model
//!
//! Declarative definition of one synchronization task. Execution state lives
//! in [`crate::models::sync_run`]; this row only carries what the next run
//! needs to know.

use diesel::prelude::*;
use serde::{Deserialize, Serialize};

/// A sync task row in the `sync_tasks` table.
#[derive(Debug, Clone, Queryable, Selectable, Serialize, Deserialize)]
#[diesel(table_name = crate::database::schema::sync_tasks)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct SyncTask {
    /// Unique identifier for the task
    pub id: i32,
    /// Human-readable task name, used in logs and alerts
    pub name: String,
    /// SQL text executed against the source database
    pub source_sql: String,
    /// Feishu bitable link the rows are written to
    pub target_link: String,
    /// Sync mode: `full`, `incremental`, `overwrite`, or `clone`
    pub sync_mode: String,
    /// Column used to match source rows against existing remote rows
    pub index_column: String,
    /// Field-type strategy handed to the engine: `raw`, `base`, `auto`, or
    /// `intelligence`
    pub field_type_strategy: String,
    /// Whether the engine may create missing remote fields (0/1)
    pub create_missing_fields: i32,
    /// Five-field cron expression, evaluated in the process-wide timezone
    pub cron_expr: String,
    /// Whether the scheduler considers this task (0/1)
    pub enabled: i32,
    /// Status of the most recent finalized run, if any
    pub last_run_status: Option<String>,
    /// Civil-time creation timestamp
    pub created_at: String,
    /// Civil-time timestamp of the last definition or status change
    pub updated_at: String,
}

impl SyncTask {
    /// Whether the scheduler should trigger this task.
    pub fn is_enabled(&self) -> bool {
        self.enabled != 0
    }
}

/// A new sync task to be inserted into the database.
#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = crate::database::schema::sync_tasks)]
pub struct NewSyncTask {
    /// Human-readable task name
    pub name: String,
    /// SQL text executed against the source database
    pub source_sql: String,
    /// Feishu bitable link the rows are written to
    pub target_link: String,
    /// Sync mode string
    pub sync_mode: String,
    /// Index column name
    pub index_column: String,
    /// Field-type strategy string
    pub field_type_strategy: String,
    /// Whether the engine may create missing remote fields (0/1)
    pub create_missing_fields: i32,
    /// Five-field cron expression
    pub cron_expr: String,
    /// Whether the task starts enabled (0/1)
    pub enabled: i32,
    /// Civil-time creation timestamp
    pub created_at: String,
    /// Civil-time update timestamp
    pub updated_at: String,
}
