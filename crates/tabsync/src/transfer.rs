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

//! Transfer file writer: the tabular hand-off between extraction and the
//! external engine.
//!
//! The format is plain CSV with a header row and `\n` record terminators.
//! Writing the same header and rows must always produce identical bytes, so
//! the writer takes cells as already-rendered strings and never reorders or
//! reformats them.

use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

use crate::error::TransferError;

/// Streams rows into a transfer file at `path`.
///
/// The header is written up front; a zero-row extraction still yields a
/// valid file containing only the header.
pub struct TransferWriter {
    writer: csv::Writer<BufWriter<File>>,
    columns: usize,
    rows: u64,
}

impl TransferWriter {
    /// Creates the file and writes the header row.
    pub fn create(path: &Path, header: &[String]) -> Result<Self, TransferError> {
        let file = File::create(path)?;
        let mut writer = csv::WriterBuilder::new()
            .terminator(csv::Terminator::Any(b'\n'))
            .from_writer(BufWriter::new(file));
        writer.write_record(header)?;
        Ok(Self {
            writer,
            columns: header.len(),
            rows: 0,
        })
    }

    /// Appends one data row. Cells are written verbatim.
    pub fn write_row(&mut self, cells: &[String]) -> Result<(), TransferError> {
        debug_assert_eq!(cells.len(), self.columns);
        self.writer.write_record(cells)?;
        self.rows += 1;
        Ok(())
    }

    /// Flushes and closes the file, returning the final row count.
    pub fn finish(mut self) -> Result<u64, TransferError> {
        self.writer.flush()?;
        Ok(self.rows)
    }
}

/// Reads back the header row of a transfer file.
///
/// Used by tests and by diagnostics; the engine consumes the file itself.
pub fn read_header(path: &Path) -> Result<Vec<String>, TransferError> {
    let mut reader = csv::Reader::from_path(path)?;
    let header = reader.headers()?.iter().map(String::from).collect();
    Ok(header)
}

/// Reads back the data rows of a transfer file, in file order, header
/// excluded.
pub fn read_rows(path: &Path) -> Result<Vec<Vec<String>>, TransferError> {
    let mut reader = csv::Reader::from_path(path)?;
    let mut rows = Vec::new();
    for record in reader.records() {
        rows.push(record?.iter().map(String::from).collect());
    }
    Ok(rows)
}
