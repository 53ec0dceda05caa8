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

//! Deployment settings sourced from the environment (with `.env` support).
//!
//! These are the per-deployment facts; per-runner tuning knobs live in
//! [`crate::runner::SyncRunnerConfig`].

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use chrono_tz::Tz;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("Required environment variable {0} is not set")]
    MissingVar(&'static str),

    #[error("Unrecognized timezone: {0}")]
    InvalidTimezone(String),

    #[error("{0} must not be empty")]
    EmptyVar(&'static str),
}

/// Everything the runner needs from the deployment environment.
#[derive(Clone)]
pub struct Settings {
    /// MySQL DSN for the source database.
    pub source_database_url: String,
    /// Path of the SQLite task/run store.
    pub store_path: PathBuf,
    /// Feishu open-platform credentials for the descriptor.
    pub feishu_app_id: String,
    pub feishu_app_secret: String,
    /// Group-bot webhook; `None` disables failure alerts.
    pub webhook_url: Option<String>,
    pub webhook_secret: Option<String>,
    /// Directory run-scoped working directories are created under.
    pub runtime_dir: PathBuf,
    /// Engine command line, whitespace-split (program plus leading args).
    pub engine_command: Vec<String>,
    /// Civil timezone for cron evaluation and stored timestamps.
    pub timezone: Tz,
}

fn required(name: &'static str) -> Result<String, SettingsError> {
    let value = std::env::var(name).map_err(|_| SettingsError::MissingVar(name))?;
    if value.trim().is_empty() {
        return Err(SettingsError::EmptyVar(name));
    }
    Ok(value)
}

fn optional(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

impl Settings {
    /// Loads settings from the process environment, reading `.env` first if
    /// one is present.
    pub fn from_env() -> Result<Self, SettingsError> {
        dotenvy::dotenv().ok();

        let timezone = match optional("TABSYNC_TIMEZONE") {
            Some(name) => {
                Tz::from_str(&name).map_err(|_| SettingsError::InvalidTimezone(name))?
            }
            None => chrono_tz::Asia::Shanghai,
        };

        let engine_command: Vec<String> = required("TABSYNC_ENGINE_COMMAND")?
            .split_whitespace()
            .map(String::from)
            .collect();

        Ok(Self {
            source_database_url: required("TABSYNC_SOURCE_DATABASE_URL")?,
            store_path: PathBuf::from(
                optional("TABSYNC_DB_PATH").unwrap_or_else(|| "tabsync.db".to_string()),
            ),
            feishu_app_id: required("TABSYNC_FEISHU_APP_ID")?,
            feishu_app_secret: required("TABSYNC_FEISHU_APP_SECRET")?,
            webhook_url: optional("TABSYNC_WEBHOOK_URL"),
            webhook_secret: optional("TABSYNC_WEBHOOK_SECRET"),
            runtime_dir: PathBuf::from(
                optional("TABSYNC_RUNTIME_DIR").unwrap_or_else(|| "runtime".to_string()),
            ),
            engine_command,
            timezone,
        })
    }
}

impl fmt::Debug for Settings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Settings")
            .field("source_database_url", &"<redacted>")
            .field("store_path", &self.store_path)
            .field("feishu_app_id", &self.feishu_app_id)
            .field("feishu_app_secret", &"<redacted>")
            .field("webhook_url", &self.webhook_url)
            .field("webhook_secret", &self.webhook_secret.as_ref().map(|_| "<redacted>"))
            .field("runtime_dir", &self.runtime_dir)
            .field("engine_command", &self.engine_command)
            .field("timezone", &self.timezone)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn clear_env() {
        for name in [
            "TABSYNC_SOURCE_DATABASE_URL",
            "TABSYNC_DB_PATH",
            "TABSYNC_FEISHU_APP_ID",
            "TABSYNC_FEISHU_APP_SECRET",
            "TABSYNC_WEBHOOK_URL",
            "TABSYNC_WEBHOOK_SECRET",
            "TABSYNC_RUNTIME_DIR",
            "TABSYNC_ENGINE_COMMAND",
            "TABSYNC_TIMEZONE",
        ] {
            std::env::remove_var(name);
        }
    }

    fn set_minimum() {
        std::env::set_var("TABSYNC_SOURCE_DATABASE_URL", "mysql://u:p@localhost/db");
        std::env::set_var("TABSYNC_FEISHU_APP_ID", "cli_a1b2");
        std::env::set_var("TABSYNC_FEISHU_APP_SECRET", "s3cr3t");
        std::env::set_var("TABSYNC_ENGINE_COMMAND", "python -m xtf");
    }

    #[test]
    #[serial]
    fn loads_with_defaults() {
        clear_env();
        set_minimum();
        let settings = Settings::from_env().unwrap();
        assert_eq!(settings.timezone, chrono_tz::Asia::Shanghai);
        assert_eq!(settings.store_path, PathBuf::from("tabsync.db"));
        assert_eq!(
            settings.engine_command,
            vec!["python".to_string(), "-m".to_string(), "xtf".to_string()]
        );
        assert!(settings.webhook_url.is_none());
    }

    #[test]
    #[serial]
    fn missing_credentials_are_an_error() {
        clear_env();
        set_minimum();
        std::env::remove_var("TABSYNC_FEISHU_APP_SECRET");
        let err = Settings::from_env().unwrap_err();
        assert!(matches!(
            err,
            SettingsError::MissingVar("TABSYNC_FEISHU_APP_SECRET")
        ));
    }

    #[test]
    #[serial]
    fn rejects_unknown_timezone() {
        clear_env();
        set_minimum();
        std::env::set_var("TABSYNC_TIMEZONE", "Mars/Olympus");
        let err = Settings::from_env().unwrap_err();
        assert!(matches!(err, SettingsError::InvalidTimezone(_)));
    }

    #[test]
    #[serial]
    fn debug_redacts_secrets() {
        clear_env();
        set_minimum();
        std::env::set_var("TABSYNC_WEBHOOK_SECRET", "hook-secret");
        std::env::set_var("TABSYNC_WEBHOOK_URL", "https://open.feishu.cn/hook/x");
        let settings = Settings::from_env().unwrap();
        let debug = format!("{settings:?}");
        assert!(!debug.contains("s3cr3t"));
        assert!(!debug.contains("hook-secret"));
    }
}
