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

//! Run log DAL: append-only operations over the `sync_runs` table.
//!
//! Finalization is guarded by `status = 'running'` in the UPDATE predicate,
//! which makes it write-once: a second finalize attempt matches zero rows
//! and surfaces [`StoreError::AlreadyFinalized`].

use diesel::prelude::*;

use super::Dal;
use crate::database::schema::sync_runs;
use crate::database::CivilTimestamp;
use crate::error::{FailureKind, StoreError};
use crate::models::sync_run::{STATUS_FAILURE, STATUS_RUNNING, STATUS_SUCCESS};
use crate::models::{NewSyncRun, SyncRun};

/// Data access layer for run log operations.
#[derive(Clone)]
pub struct SyncRunDal<'a> {
    dal: &'a Dal,
}

impl<'a> SyncRunDal<'a> {
    pub(super) fn new(dal: &'a Dal) -> Self {
        Self { dal }
    }

    async fn conn(
        &self,
    ) -> Result<deadpool::managed::Object<deadpool_diesel::sqlite::Manager>, StoreError> {
        self.dal
            .database
            .pool()
            .get()
            .await
            .map_err(|e| StoreError::ConnectionPool(e.to_string()))
    }

    /// Creates a run record in the `running` state at trigger time.
    pub async fn create_running(
        &self,
        task_id: i32,
        task_name: &str,
    ) -> Result<SyncRun, StoreError> {
        let conn = self.conn().await?;
        let new_run = NewSyncRun {
            task_id,
            task_name: Some(task_name.to_string()),
            started_at: CivilTimestamp::now_in(self.dal.timezone).to_storage_string(),
            status: STATUS_RUNNING.to_string(),
        };

        let run = conn
            .interact(move |conn| {
                diesel::insert_into(sync_runs::table)
                    .values(&new_run)
                    .get_result(conn)
            })
            .await
            .map_err(|e| StoreError::ConnectionPool(e.to_string()))??;

        Ok(run)
    }

    /// Finalizes a run as `success`. Write-once.
    pub async fn finalize_success(
        &self,
        run_id: i32,
        rows_extracted: i32,
        message: &str,
    ) -> Result<(), StoreError> {
        self.finalize(run_id, STATUS_SUCCESS, Some(rows_extracted), None, message)
            .await
    }

    /// Finalizes a run as `failure` with its classification tag. Write-once.
    pub async fn finalize_failure(
        &self,
        run_id: i32,
        kind: FailureKind,
        rows_extracted: Option<i32>,
        message: &str,
    ) -> Result<(), StoreError> {
        self.finalize(
            run_id,
            STATUS_FAILURE,
            rows_extracted,
            Some(kind.as_str()),
            message,
        )
        .await
    }

    async fn finalize(
        &self,
        run_id: i32,
        status: &'static str,
        rows_extracted: Option<i32>,
        failure_kind: Option<&'static str>,
        message: &str,
    ) -> Result<(), StoreError> {
        let conn = self.conn().await?;
        let finished = CivilTimestamp::now_in(self.dal.timezone).to_storage_string();
        let message = message.to_string();

        let updated: usize = conn
            .interact(move |conn| {
                diesel::update(
                    sync_runs::table
                        .find(run_id)
                        .filter(sync_runs::status.eq(STATUS_RUNNING)),
                )
                .set((
                    sync_runs::status.eq(status),
                    sync_runs::finished_at.eq(Some(finished)),
                    sync_runs::rows_extracted.eq(rows_extracted),
                    sync_runs::failure_kind.eq(failure_kind.map(String::from)),
                    sync_runs::message.eq(Some(message)),
                ))
                .execute(conn)
            })
            .await
            .map_err(|e| StoreError::ConnectionPool(e.to_string()))??;

        if updated == 0 {
            return Err(StoreError::AlreadyFinalized(run_id));
        }
        Ok(())
    }

    /// Retrieves a run by id.
    pub async fn get(&self, run_id: i32) -> Result<Option<SyncRun>, StoreError> {
        let conn = self.conn().await?;
        let run = conn
            .interact(move |conn| sync_runs::table.find(run_id).first(conn).optional())
            .await
            .map_err(|e| StoreError::ConnectionPool(e.to_string()))??;

        Ok(run)
    }

    /// Lists the most recent runs across all tasks.
    pub async fn recent(&self, limit: i64) -> Result<Vec<SyncRun>, StoreError> {
        let conn = self.conn().await?;
        let runs = conn
            .interact(move |conn| {
                sync_runs::table
                    .order(sync_runs::id.desc())
                    .limit(limit)
                    .load(conn)
            })
            .await
            .map_err(|e| StoreError::ConnectionPool(e.to_string()))??;

        Ok(runs)
    }

    /// Lists the most recent runs for one task.
    pub async fn for_task(&self, task_id: i32, limit: i64) -> Result<Vec<SyncRun>, StoreError> {
        let conn = self.conn().await?;
        let runs = conn
            .interact(move |conn| {
                sync_runs::table
                    .filter(sync_runs::task_id.eq(task_id))
                    .order(sync_runs::id.desc())
                    .limit(limit)
                    .load(conn)
            })
            .await
            .map_err(|e| StoreError::ConnectionPool(e.to_string()))??;

        Ok(runs)
    }
}
