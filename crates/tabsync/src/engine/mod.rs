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

//! Capability engine abstraction.
//!
//! The external sync engine is reached through the [`CapabilityEngine`]
//! trait so the executor can be tested without spawning processes. The
//! production implementation is [`SubprocessEngine`].

mod subprocess;

use std::path::Path;

use async_trait::async_trait;

use crate::error::EngineError;

pub use subprocess::SubprocessEngine;

/// What one engine invocation produced: an exit status and the captured
/// combined stdout/stderr text (possibly truncated from the front).
#[derive(Debug, Clone)]
pub struct EngineReport {
    /// `None` when the process was killed by a signal.
    pub exit_code: Option<i32>,
    pub output: String,
}

/// A supervised external engine invocation.
#[async_trait]
pub trait CapabilityEngine: Send + Sync {
    /// Runs the engine against a written descriptor file and reports the
    /// outcome. A timeout surfaces as [`EngineError::Timeout`]; everything
    /// else the process says comes back in the report for classification.
    async fn invoke(&self, descriptor_path: &Path) -> Result<EngineReport, EngineError>;
}
