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

//! SQLite connection management for the task store and run log.
//!
//! This module provides an async connection pool implementation using
//! `deadpool-diesel`. The pool is capped at a single connection: SQLite has
//! limited concurrent write support even with WAL mode, and one connection
//! avoids "database is locked" errors while WAL still allows concurrent
//! readers.

use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};
use tracing::info;

use deadpool_diesel::sqlite::{Manager, Pool, Runtime};

use crate::error::StoreError;

pub mod civil_time;
pub mod schema;

pub use civil_time::CivilTimestamp;

/// Migrations embedded at compile time from the crate's `migrations/` tree.
pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

/// A pool of SQLite connections for the task store and run log.
///
/// `Database` is `Clone`; each clone references the same underlying pool and
/// can be shared freely between the scheduler, executor, and any embedding
/// application.
#[derive(Clone)]
pub struct Database {
    pool: Pool,
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Database(sqlite)")
    }
}

impl Database {
    /// Creates a new connection pool for the given SQLite path.
    ///
    /// Accepts a plain file path, `:memory:`, or a `sqlite://`-prefixed URL.
    ///
    /// # Panics
    ///
    /// Panics if the connection pool cannot be created.
    pub fn new(connection_string: &str) -> Self {
        let connection_url = Self::build_sqlite_url(connection_string);
        let manager = Manager::new(connection_url, Runtime::Tokio1);
        let pool = Pool::builder(manager)
            .max_size(1)
            .build()
            .expect("Failed to create SQLite connection pool");

        info!("SQLite connection pool initialized (size: 1)");

        Self { pool }
    }

    /// Returns a clone of the connection pool.
    pub fn pool(&self) -> Pool {
        self.pool.clone()
    }

    /// Strips a `sqlite://` prefix if present.
    fn build_sqlite_url(connection_string: &str) -> String {
        if let Some(path) = connection_string.strip_prefix("sqlite://") {
            path.to_string()
        } else {
            connection_string.to_string()
        }
    }

    /// Runs pending migrations and sets the WAL/busy_timeout pragmas.
    pub async fn run_migrations(&self) -> Result<(), StoreError> {
        let conn = self
            .pool
            .get()
            .await
            .map_err(|e| StoreError::ConnectionPool(e.to_string()))?;

        conn.interact(|conn| {
            use diesel::prelude::*;

            // WAL mode allows concurrent reads during writes.
            diesel::sql_query("PRAGMA journal_mode=WAL;")
                .execute(conn)
                .map_err(|e| StoreError::Migration(e.to_string()))?;
            // busy_timeout makes SQLite wait instead of immediately failing
            // on locks.
            diesel::sql_query("PRAGMA busy_timeout=30000;")
                .execute(conn)
                .map_err(|e| StoreError::Migration(e.to_string()))?;

            conn.run_pending_migrations(MIGRATIONS)
                .map_err(|e| StoreError::Migration(e.to_string()))?;
            Ok::<_, StoreError>(())
        })
        .await
        .map_err(|e| StoreError::ConnectionPool(e.to_string()))??;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sqlite_connection_strings() {
        assert_eq!(
            Database::build_sqlite_url("/path/to/database.db"),
            "/path/to/database.db"
        );
        assert_eq!(Database::build_sqlite_url(":memory:"), ":memory:");
        assert_eq!(
            Database::build_sqlite_url("sqlite:///path/to/db.sqlite"),
            "/path/to/db.sqlite"
        );
    }

    #[tokio::test]
    async fn migrations_run_on_fresh_database() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tabsync.db");
        let db = Database::new(path.to_str().unwrap());
        db.run_migrations().await.unwrap();
        // Idempotent on a second call.
        db.run_migrations().await.unwrap();
    }
}
