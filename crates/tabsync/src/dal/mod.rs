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

//! Data Access Layer for the task store and run log.
//!
//! The DAL owns all persistence for sync tasks and run records. Reads may
//! happen concurrently from any component; writes are append-only for runs
//! (create then a single guarded finalize) and last-write-wins for task
//! definitions. Civil timestamps are filled in here so the storage format
//! stays in one place.
//!
//! # Example
//!
//! ```rust,ignore
//! use tabsync::dal::Dal;
//! use tabsync::database::Database;
//!
//! let db = Database::new("tabsync.db");
//! let dal = Dal::new(db, chrono_tz::Asia::Shanghai);
//! let tasks = dal.sync_task().list_enabled().await?;
//! ```

use chrono_tz::Tz;

use crate::database::Database;

pub mod sync_run;
pub mod sync_task;

pub use sync_run::SyncRunDal;
pub use sync_task::{SyncTaskDal, TaskSpec};

/// DAL facade providing access to per-entity DALs.
#[derive(Clone, Debug)]
pub struct Dal {
    pub(crate) database: Database,
    pub(crate) timezone: Tz,
}

impl Dal {
    /// Creates a new DAL over the given database, stamping timestamps in the
    /// given civil timezone.
    pub fn new(database: Database, timezone: Tz) -> Self {
        Self { database, timezone }
    }

    /// The civil timezone used for stored timestamps.
    pub fn timezone(&self) -> Tz {
        self.timezone
    }

    /// Access to sync task operations.
    pub fn sync_task(&self) -> SyncTaskDal<'_> {
        SyncTaskDal::new(self)
    }

    /// Access to run log operations.
    pub fn sync_run(&self) -> SyncRunDal<'_> {
        SyncRunDal::new(self)
    }
}
