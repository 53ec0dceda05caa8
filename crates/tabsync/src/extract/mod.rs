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

//! Extraction: run the task's query against the source database and stream
//! the result into a transfer file.
//!
//! The query is arbitrary SQL authored by the task owner, so column names
//! and types are only known at runtime: the statement is described first to
//! get the header (this also makes a zero-row result yield a header-only
//! file), then rows are streamed and each cell rendered to text. NULL
//! renders as the empty string.

use std::path::Path;

use async_trait::async_trait;
use futures::TryStreamExt;
use regex::Regex;
use sqlx::mysql::{MySqlPool, MySqlRow};
use sqlx::{Column, Executor, Row, TypeInfo};
use std::sync::OnceLock;
use tracing::debug;

use crate::error::ExtractionError;
use crate::transfer::TransferWriter;

/// What an extraction produced: the column names in result order and the
/// number of data rows written to the transfer file.
#[derive(Debug, Clone)]
pub struct Extraction {
    pub columns: Vec<String>,
    pub rows: u64,
}

/// Source of extracted rows. The production implementation talks to MySQL;
/// tests substitute a fixture.
#[async_trait]
pub trait Extractor: Send + Sync {
    /// Runs `sql` and writes header plus rows to `transfer_path`.
    async fn extract(
        &self,
        sql: &str,
        transfer_path: &Path,
    ) -> Result<Extraction, ExtractionError>;
}

/// Extracts from a MySQL source over a shared connection pool.
pub struct MySqlExtractor {
    pool: MySqlPool,
}

impl MySqlExtractor {
    /// Connects lazily: the pool is created immediately, connections are
    /// established on first use so a down source fails the run, not startup.
    pub fn new(database_url: &str) -> Result<Self, ExtractionError> {
        let pool = sqlx::mysql::MySqlPoolOptions::new()
            .max_connections(4)
            .connect_lazy(database_url)
            .map_err(ExtractionError::Connection)?;
        Ok(Self { pool })
    }
}

fn whitespace_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\s+").unwrap())
}

// A continuation backslash may carry trailing whitespace before the newline.
fn continuation_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\\\s*\n").unwrap())
}

/// Normalizes task-authored SQL into a single-line statement: CRs dropped,
/// backslash line continuations joined, whitespace runs collapsed, trailing
/// semicolon stripped.
pub fn normalize_sql(sql: &str) -> String {
    let stripped = sql.replace('\r', "");
    let joined = continuation_re().replace_all(&stripped, " ");
    let collapsed = whitespace_re().replace_all(&joined, " ");
    collapsed.trim().trim_end_matches(';').trim_end().to_string()
}

/// Renders one cell to its transfer-file text form.
fn render_cell(row: &MySqlRow, idx: usize) -> Result<String, sqlx::Error> {
    let type_name = row.column(idx).type_info().name();
    let rendered = match type_name {
        "TINYINT" | "SMALLINT" | "MEDIUMINT" | "INT" | "BIGINT" | "YEAR" => row
            .try_get::<Option<i64>, _>(idx)?
            .map(|v| v.to_string()),
        "TINYINT UNSIGNED" | "SMALLINT UNSIGNED" | "MEDIUMINT UNSIGNED" | "INT UNSIGNED"
        | "BIGINT UNSIGNED" => row.try_get::<Option<u64>, _>(idx)?.map(|v| v.to_string()),
        "BOOLEAN" => row.try_get::<Option<bool>, _>(idx)?.map(|v| v.to_string()),
        "FLOAT" => row.try_get::<Option<f32>, _>(idx)?.map(|v| v.to_string()),
        "DOUBLE" => row.try_get::<Option<f64>, _>(idx)?.map(|v| v.to_string()),
        "DECIMAL" => row
            .try_get::<Option<rust_decimal::Decimal>, _>(idx)?
            .map(|v| v.to_string()),
        "DATE" => row
            .try_get::<Option<chrono::NaiveDate>, _>(idx)?
            .map(|v| v.format("%Y-%m-%d").to_string()),
        "TIME" => row
            .try_get::<Option<chrono::NaiveTime>, _>(idx)?
            .map(|v| v.format("%H:%M:%S").to_string()),
        "DATETIME" => row
            .try_get::<Option<chrono::NaiveDateTime>, _>(idx)?
            .map(|v| v.format("%Y-%m-%d %H:%M:%S").to_string()),
        "TIMESTAMP" => row
            .try_get::<Option<chrono::DateTime<chrono::Utc>>, _>(idx)?
            .map(|v| v.format("%Y-%m-%d %H:%M:%S").to_string()),
        "JSON" => row
            .try_get::<Option<serde_json::Value>, _>(idx)?
            .map(|v| v.to_string()),
        "TINYBLOB" | "BLOB" | "MEDIUMBLOB" | "LONGBLOB" | "BINARY" | "VARBINARY" => row
            .try_get::<Option<Vec<u8>>, _>(idx)?
            .map(|v| String::from_utf8_lossy(&v).into_owned()),
        _ => row.try_get::<Option<String>, _>(idx)?,
    };
    Ok(rendered.unwrap_or_default())
}

#[async_trait]
impl Extractor for MySqlExtractor {
    async fn extract(
        &self,
        sql: &str,
        transfer_path: &Path,
    ) -> Result<Extraction, ExtractionError> {
        let sql = normalize_sql(sql);

        // Describe first: the header is known even when the query matches
        // zero rows.
        let described = self
            .pool
            .describe(&sql)
            .await
            .map_err(ExtractionError::Query)?;
        let columns: Vec<String> = described
            .columns()
            .iter()
            .map(|c| c.name().to_string())
            .collect();
        if columns.is_empty() {
            return Err(ExtractionError::ZeroColumns);
        }

        let mut writer = TransferWriter::create(transfer_path, &columns)?;
        let mut stream = sqlx::query(&sql).fetch(&self.pool);
        let mut cells = Vec::with_capacity(columns.len());
        while let Some(row) = stream.try_next().await.map_err(ExtractionError::Query)? {
            cells.clear();
            for idx in 0..columns.len() {
                cells.push(render_cell(&row, idx).map_err(ExtractionError::Query)?);
            }
            writer.write_row(&cells)?;
        }
        let rows = writer.finish()?;

        debug!(columns = columns.len(), rows, "Extraction complete");
        Ok(Extraction { columns, rows })
    }
}
