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

//! Diesel schema for the task store and run log.
//!
//! Timestamps are TEXT in civil-time storage format; booleans are INTEGER
//! (0/1) per SQLite convention.

diesel::table! {
    sync_tasks (id) {
        id -> Integer,
        name -> Text,
        source_sql -> Text,
        target_link -> Text,
        sync_mode -> Text,
        index_column -> Text,
        field_type_strategy -> Text,
        create_missing_fields -> Integer,
        cron_expr -> Text,
        enabled -> Integer,
        last_run_status -> Nullable<Text>,
        created_at -> Text,
        updated_at -> Text,
    }
}

diesel::table! {
    sync_runs (id) {
        id -> Integer,
        task_id -> Integer,
        task_name -> Nullable<Text>,
        started_at -> Text,
        finished_at -> Nullable<Text>,
        status -> Text,
        rows_extracted -> Nullable<Integer>,
        failure_kind -> Nullable<Text>,
        message -> Nullable<Text>,
    }
}

diesel::allow_tables_to_appear_in_same_query!(sync_tasks, sync_runs);
