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

//! Invocation descriptor: the YAML document handed to the external engine.
//!
//! The descriptor is built from the validated task plan plus the Feishu
//! credentials, and by construction carries no source-database keys at all —
//! the source query and its credentials are consumed during extraction and
//! must never leak into the file given to the engine.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::error::DescriptorError;
use crate::task::TaskPlan;

/// Feishu open-platform app credentials.
#[derive(Clone)]
pub struct FeishuCredentials {
    pub app_id: String,
    pub app_secret: String,
}

impl FeishuCredentials {
    /// Validates that both halves of the credential pair are present.
    pub fn require(app_id: &str, app_secret: &str) -> Result<Self, DescriptorError> {
        if app_id.trim().is_empty() {
            return Err(DescriptorError::MissingCredentials("app_id"));
        }
        if app_secret.trim().is_empty() {
            return Err(DescriptorError::MissingCredentials("app_secret"));
        }
        Ok(Self {
            app_id: app_id.trim().to_string(),
            app_secret: app_secret.trim().to_string(),
        })
    }
}

impl fmt::Debug for FeishuCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FeishuCredentials")
            .field("app_id", &self.app_id)
            .field("app_secret", &"<redacted>")
            .finish()
    }
}

/// The key/value document written for one engine invocation.
///
/// Key names and defaults follow the engine's configuration contract; the
/// engine tolerates unknown keys but not missing required ones.
#[derive(Serialize)]
pub struct InvocationDescriptor {
    pub file_path: PathBuf,
    pub app_id: String,
    pub app_secret: String,
    pub target_type: &'static str,
    pub app_token: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub table_id: Option<String>,
    pub sync_mode: &'static str,
    pub index_column: String,
    pub field_type_strategy: &'static str,
    pub create_missing_fields: bool,
    pub batch_size: u32,
    pub rate_limit_delay: f64,
    pub max_retries: u32,
    pub log_level: &'static str,
}

impl InvocationDescriptor {
    /// Assembles the descriptor. Pure: no I/O happens until [`write_to`].
    ///
    /// [`write_to`]: InvocationDescriptor::write_to
    pub fn build(
        plan: &TaskPlan,
        transfer_path: &Path,
        credentials: &FeishuCredentials,
    ) -> Self {
        Self {
            file_path: transfer_path.to_path_buf(),
            app_id: credentials.app_id.clone(),
            app_secret: credentials.app_secret.clone(),
            target_type: "bitable",
            app_token: plan.target.app_token.clone(),
            table_id: plan.target.table_id.clone(),
            sync_mode: plan.mode.as_str(),
            index_column: plan.index_column.clone(),
            field_type_strategy: plan.strategy.as_str(),
            create_missing_fields: plan.create_missing_fields,
            batch_size: 1000,
            rate_limit_delay: 0.5,
            max_retries: 3,
            log_level: "INFO",
        }
    }

    /// Serializes the descriptor as YAML and writes it to `path`.
    pub fn write_to(&self, path: &Path) -> Result<(), DescriptorError> {
        let yaml = serde_yaml::to_string(self)?;
        std::fs::write(path, yaml)?;
        Ok(())
    }
}

impl fmt::Debug for InvocationDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InvocationDescriptor")
            .field("file_path", &self.file_path)
            .field("app_id", &self.app_id)
            .field("app_secret", &"<redacted>")
            .field("target_type", &self.target_type)
            .field("app_token", &self.app_token)
            .field("table_id", &self.table_id)
            .field("sync_mode", &self.sync_mode)
            .field("index_column", &self.index_column)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::{BitableTarget, FieldTypeStrategy, SyncMode};

    fn plan() -> TaskPlan {
        TaskPlan {
            task_id: 3,
            name: "users-sync".to_string(),
            source_sql: "SELECT id, name FROM users".to_string(),
            target: BitableTarget {
                app_token: "AbCd1234".to_string(),
                table_id: Some("tblXyz9".to_string()),
            },
            mode: SyncMode::Full,
            index_column: "id".to_string(),
            strategy: FieldTypeStrategy::Base,
            create_missing_fields: true,
        }
    }

    fn creds() -> FeishuCredentials {
        FeishuCredentials::require("cli_a1b2", "s3cr3t").unwrap()
    }

    #[test]
    fn descriptor_contains_required_keys_and_no_source_keys() {
        let descriptor =
            InvocationDescriptor::build(&plan(), Path::new("/tmp/run/transfer.csv"), &creds());
        let yaml = serde_yaml::to_string(&descriptor).unwrap();

        for key in [
            "file_path:",
            "app_id:",
            "app_secret:",
            "target_type: bitable",
            "app_token: AbCd1234",
            "table_id: tblXyz9",
            "sync_mode: full",
            "index_column: id",
            "field_type_strategy: base",
            "create_missing_fields: true",
            "batch_size: 1000",
            "rate_limit_delay: 0.5",
            "max_retries: 3",
            "log_level: INFO",
        ] {
            assert!(yaml.contains(key), "missing key in descriptor: {key}");
        }
        // The source query and its credentials never appear.
        assert!(!yaml.contains("source"));
        assert!(!yaml.contains("SELECT"));
    }

    #[test]
    fn table_id_is_omitted_when_absent() {
        let mut plan = plan();
        plan.target.table_id = None;
        let descriptor =
            InvocationDescriptor::build(&plan, Path::new("/tmp/run/transfer.csv"), &creds());
        let yaml = serde_yaml::to_string(&descriptor).unwrap();
        assert!(!yaml.contains("table_id"));
    }

    #[test]
    fn missing_credentials_are_rejected() {
        let err = FeishuCredentials::require("cli_a1b2", "  ").unwrap_err();
        assert!(matches!(
            err,
            DescriptorError::MissingCredentials("app_secret")
        ));
    }

    #[test]
    fn debug_redacts_app_secret() {
        let descriptor =
            InvocationDescriptor::build(&plan(), Path::new("/tmp/run/transfer.csv"), &creds());
        let debug = format!("{:?} {:?}", descriptor, creds());
        assert!(!debug.contains("s3cr3t"));
        assert!(debug.contains("<redacted>"));
    }

    #[test]
    fn write_emits_readable_yaml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("descriptor.yaml");
        let descriptor =
            InvocationDescriptor::build(&plan(), Path::new("/tmp/run/transfer.csv"), &creds());
        descriptor.write_to(&path).unwrap();

        let parsed: serde_yaml::Value =
            serde_yaml::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(parsed["target_type"], "bitable");
        assert_eq!(parsed["batch_size"], 1000);
    }
}
