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

//! Subprocess supervisor: spawns the external engine, drains its output into
//! a bounded buffer, and enforces a wall-clock timeout.

use std::path::Path;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tracing::{debug, warn};

use super::{CapabilityEngine, EngineReport};
use crate::error::EngineError;

/// Line buffer with a byte cap. When the cap is exceeded the oldest lines
/// are evicted, so a looping engine keeps its most recent output visible to
/// the classifier without unbounded memory growth.
#[derive(Debug)]
pub(crate) struct RingBuffer {
    lines: std::collections::VecDeque<String>,
    bytes: usize,
    cap: usize,
}

impl RingBuffer {
    pub(crate) fn new(cap: usize) -> Self {
        Self {
            lines: std::collections::VecDeque::new(),
            bytes: 0,
            cap,
        }
    }

    pub(crate) fn push(&mut self, line: String) {
        // +1 accounts for the newline restored on join.
        self.bytes += line.len() + 1;
        self.lines.push_back(line);
        // A single oversized line survives; eviction never empties the buffer.
        while self.bytes > self.cap && self.lines.len() > 1 {
            if let Some(evicted) = self.lines.pop_front() {
                self.bytes -= evicted.len() + 1;
            }
        }
    }

    pub(crate) fn contents(&self) -> String {
        let mut out = String::with_capacity(self.bytes);
        for line in &self.lines {
            out.push_str(line);
            out.push('\n');
        }
        out
    }
}

/// Runs the engine as a child process: `<command...> --target-type bitable
/// --config <descriptor>`.
pub struct SubprocessEngine {
    command: Vec<String>,
    timeout: Duration,
    output_cap_bytes: usize,
}

impl SubprocessEngine {
    pub fn new(command: Vec<String>, timeout: Duration, output_cap_bytes: usize) -> Self {
        Self {
            command,
            timeout,
            output_cap_bytes,
        }
    }
}

fn drain_into(
    stream: impl AsyncRead + Unpin + Send + 'static,
    buffer: Arc<Mutex<RingBuffer>>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut lines = BufReader::new(stream).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if let Ok(mut buf) = buffer.lock() {
                buf.push(line);
            }
        }
    })
}

#[async_trait]
impl CapabilityEngine for SubprocessEngine {
    async fn invoke(&self, descriptor_path: &Path) -> Result<EngineReport, EngineError> {
        let (program, args) = self
            .command
            .split_first()
            .ok_or(EngineError::EmptyCommand)?;

        debug!(
            program = %program,
            descriptor = %descriptor_path.display(),
            "Spawning capability engine"
        );

        let mut child = Command::new(program)
            .args(args)
            .arg("--target-type")
            .arg("bitable")
            .arg("--config")
            .arg(descriptor_path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| EngineError::Spawn {
                program: program.clone(),
                source,
            })?;

        let buffer = Arc::new(Mutex::new(RingBuffer::new(self.output_cap_bytes)));
        let mut drains = Vec::new();
        if let Some(stdout) = child.stdout.take() {
            drains.push(drain_into(stdout, buffer.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            drains.push(drain_into(stderr, buffer.clone()));
        }

        let status = match tokio::time::timeout(self.timeout, child.wait()).await {
            Ok(status) => status.map_err(EngineError::Wait)?,
            Err(_) => {
                warn!(
                    program = %program,
                    timeout = ?self.timeout,
                    "Engine exceeded timeout, killing process"
                );
                let _ = child.start_kill();
                let _ = child.wait().await;
                return Err(EngineError::Timeout(self.timeout));
            }
        };

        for drain in drains {
            let _ = drain.await;
        }

        let output = buffer
            .lock()
            .map(|buf| buf.contents())
            .unwrap_or_default();

        debug!(exit_code = ?status.code(), captured_bytes = output.len(), "Engine finished");
        Ok(EngineReport {
            exit_code: status.code(),
            output,
        })
    }
}
