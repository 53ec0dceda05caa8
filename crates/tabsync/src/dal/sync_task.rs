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

//! Sync task DAL: CRUD over the `sync_tasks` table.
//!
//! These operations back whatever CRUD surface embeds the runner. The
//! scheduler only uses [`SyncTaskDal::list_enabled`] and the executor only
//! uses [`SyncTaskDal::get`] and [`SyncTaskDal::set_last_run_status`].

use diesel::prelude::*;

use super::Dal;
use crate::database::schema::sync_tasks;
use crate::database::CivilTimestamp;
use crate::error::StoreError;
use crate::models::{NewSyncTask, SyncTask};

/// Definition fields for creating or replacing a task.
#[derive(Debug, Clone)]
pub struct TaskSpec {
    pub name: String,
    pub source_sql: String,
    pub target_link: String,
    pub sync_mode: String,
    pub index_column: String,
    pub field_type_strategy: String,
    pub create_missing_fields: bool,
    pub cron_expr: String,
    pub enabled: bool,
}

/// Data access layer for sync task operations.
#[derive(Clone)]
pub struct SyncTaskDal<'a> {
    dal: &'a Dal,
}

impl<'a> SyncTaskDal<'a> {
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

    /// Creates a new task and returns the stored row.
    pub async fn create(&self, spec: TaskSpec) -> Result<SyncTask, StoreError> {
        let conn = self.conn().await?;
        let now = CivilTimestamp::now_in(self.dal.timezone).to_storage_string();

        let new_task = NewSyncTask {
            name: spec.name,
            source_sql: spec.source_sql,
            target_link: spec.target_link,
            sync_mode: spec.sync_mode,
            index_column: spec.index_column,
            field_type_strategy: spec.field_type_strategy,
            create_missing_fields: spec.create_missing_fields as i32,
            cron_expr: spec.cron_expr,
            enabled: spec.enabled as i32,
            created_at: now.clone(),
            updated_at: now,
        };

        let task = conn
            .interact(move |conn| {
                diesel::insert_into(sync_tasks::table)
                    .values(&new_task)
                    .get_result(conn)
            })
            .await
            .map_err(|e| StoreError::ConnectionPool(e.to_string()))??;

        Ok(task)
    }

    /// Retrieves a task by id.
    pub async fn get(&self, id: i32) -> Result<SyncTask, StoreError> {
        let conn = self.conn().await?;
        let task: Option<SyncTask> = conn
            .interact(move |conn| sync_tasks::table.find(id).first(conn).optional())
            .await
            .map_err(|e| StoreError::ConnectionPool(e.to_string()))??;

        task.ok_or(StoreError::TaskNotFound(id))
    }

    /// Lists all tasks, newest first.
    pub async fn list(&self) -> Result<Vec<SyncTask>, StoreError> {
        let conn = self.conn().await?;
        let tasks = conn
            .interact(|conn| {
                sync_tasks::table
                    .order(sync_tasks::id.desc())
                    .load(conn)
            })
            .await
            .map_err(|e| StoreError::ConnectionPool(e.to_string()))??;

        Ok(tasks)
    }

    /// Lists enabled tasks only, in id order. This is the scheduler's view.
    pub async fn list_enabled(&self) -> Result<Vec<SyncTask>, StoreError> {
        let conn = self.conn().await?;
        let tasks = conn
            .interact(|conn| {
                sync_tasks::table
                    .filter(sync_tasks::enabled.eq(1))
                    .order(sync_tasks::id.asc())
                    .load(conn)
            })
            .await
            .map_err(|e| StoreError::ConnectionPool(e.to_string()))??;

        Ok(tasks)
    }

    /// Replaces a task's definition fields.
    pub async fn update(&self, id: i32, spec: TaskSpec) -> Result<SyncTask, StoreError> {
        let conn = self.conn().await?;
        let now = CivilTimestamp::now_in(self.dal.timezone).to_storage_string();

        let task = conn
            .interact(move |conn| {
                diesel::update(sync_tasks::table.find(id))
                    .set((
                        sync_tasks::name.eq(spec.name),
                        sync_tasks::source_sql.eq(spec.source_sql),
                        sync_tasks::target_link.eq(spec.target_link),
                        sync_tasks::sync_mode.eq(spec.sync_mode),
                        sync_tasks::index_column.eq(spec.index_column),
                        sync_tasks::field_type_strategy.eq(spec.field_type_strategy),
                        sync_tasks::create_missing_fields.eq(spec.create_missing_fields as i32),
                        sync_tasks::cron_expr.eq(spec.cron_expr),
                        sync_tasks::enabled.eq(spec.enabled as i32),
                        sync_tasks::updated_at.eq(now),
                    ))
                    .get_result(conn)
                    .optional()
            })
            .await
            .map_err(|e| StoreError::ConnectionPool(e.to_string()))??;

        task.ok_or(StoreError::TaskNotFound(id))
    }

    /// Enables or disables a task.
    pub async fn set_enabled(&self, id: i32, enabled: bool) -> Result<(), StoreError> {
        let conn = self.conn().await?;
        let now = CivilTimestamp::now_in(self.dal.timezone).to_storage_string();

        let updated: usize = conn
            .interact(move |conn| {
                diesel::update(sync_tasks::table.find(id))
                    .set((
                        sync_tasks::enabled.eq(enabled as i32),
                        sync_tasks::updated_at.eq(now),
                    ))
                    .execute(conn)
            })
            .await
            .map_err(|e| StoreError::ConnectionPool(e.to_string()))??;

        if updated == 0 {
            return Err(StoreError::TaskNotFound(id));
        }
        Ok(())
    }

    /// Records the status of the most recent finalized run on the task row.
    pub async fn set_last_run_status(&self, id: i32, status: &str) -> Result<(), StoreError> {
        let conn = self.conn().await?;
        let now = CivilTimestamp::now_in(self.dal.timezone).to_storage_string();
        let status = status.to_string();

        conn.interact(move |conn| {
            diesel::update(sync_tasks::table.find(id))
                .set((
                    sync_tasks::last_run_status.eq(Some(status)),
                    sync_tasks::updated_at.eq(now),
                ))
                .execute(conn)
        })
        .await
        .map_err(|e| StoreError::ConnectionPool(e.to_string()))??;

        Ok(())
    }

    /// Deletes a task. Its run history is retained.
    pub async fn delete(&self, id: i32) -> Result<(), StoreError> {
        let conn = self.conn().await?;
        let deleted: usize = conn
            .interact(move |conn| diesel::delete(sync_tasks::table.find(id)).execute(conn))
            .await
            .map_err(|e| StoreError::ConnectionPool(e.to_string()))??;

        if deleted == 0 {
            return Err(StoreError::TaskNotFound(id));
        }
        Ok(())
    }
}
