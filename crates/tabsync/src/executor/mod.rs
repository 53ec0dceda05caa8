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

//! Run execution: the full pipeline for one task trigger.
//!
//! One call to [`RunExecutor::execute`] is one execution attempt: validate
//! the task, extract into a run-scoped working directory, hand the transfer
//! file to the capability engine, classify its outcome, and finalize exactly
//! one run record. Every fatal stage error is caught here, at the run
//! boundary, and becomes a terminal failure record — nothing from a run
//! propagates to the scheduler.
//!
//! Runs of the same task never overlap: a per-task lock is tried, not
//! awaited, so a trigger that lands while the previous run is still in
//! flight is skipped outright (no run record).

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use tokio::sync::Mutex as AsyncMutex;
use tracing::{info, warn};
use uuid::Uuid;

use crate::alert::{excerpt, AlertSink, FailureAlert};
use crate::classify::{classify, Outcome};
use crate::dal::Dal;
use crate::database::CivilTimestamp;
use crate::descriptor::{FeishuCredentials, InvocationDescriptor};
use crate::engine::CapabilityEngine;
use crate::error::{ConfigurationError, EngineError, EngineFailureKind, FailureKind, RunnerError};
use crate::extract::Extractor;
use crate::models::sync_run::{STATUS_FAILURE, STATUS_SUCCESS};
use crate::models::SyncTask;
use crate::task::TaskPlan;

/// Stored run messages are capped at this many characters.
const MESSAGE_LIMIT: usize = 2000;

/// Per-executor behavior knobs.
#[derive(Debug, Clone)]
pub struct ExecutorOptions {
    /// Treat a zero-row extraction as a configuration failure instead of a
    /// trivially successful run.
    pub fail_on_empty_extraction: bool,
    /// Keep the run directory (transfer file + descriptor) when a run
    /// fails, for post-mortem inspection.
    pub retain_failed_run_dirs: bool,
}

impl Default for ExecutorOptions {
    fn default() -> Self {
        Self {
            fail_on_empty_extraction: false,
            retain_failed_run_dirs: true,
        }
    }
}

/// What one trigger resolved to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// The previous run of this task had not finalized; no run record was
    /// created.
    Skipped,
    Success { run_id: i32, rows: i32 },
    Failure { run_id: i32, kind: FailureKind },
}

pub struct RunExecutor {
    dal: Dal,
    extractor: Arc<dyn Extractor>,
    engine: Arc<dyn CapabilityEngine>,
    alerter: Arc<dyn AlertSink>,
    credentials: FeishuCredentials,
    runtime_dir: PathBuf,
    options: ExecutorOptions,
    // Lock per task id; entries are created on first trigger and kept for
    // the executor's lifetime.
    run_locks: StdMutex<HashMap<i32, Arc<AsyncMutex<()>>>>,
    active: AtomicUsize,
}

/// Decrements the active-run counter on every exit path of `execute`.
struct ActiveGuard<'a>(&'a AtomicUsize);

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

fn truncate_message(message: &str) -> String {
    if message.chars().count() <= MESSAGE_LIMIT {
        return message.to_string();
    }
    message.chars().take(MESSAGE_LIMIT).collect()
}

impl RunExecutor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        dal: Dal,
        extractor: Arc<dyn Extractor>,
        engine: Arc<dyn CapabilityEngine>,
        alerter: Arc<dyn AlertSink>,
        credentials: FeishuCredentials,
        runtime_dir: PathBuf,
        options: ExecutorOptions,
    ) -> Self {
        Self {
            dal,
            extractor,
            engine,
            alerter,
            credentials,
            runtime_dir,
            options,
            run_locks: StdMutex::new(HashMap::new()),
            active: AtomicUsize::new(0),
        }
    }

    /// Number of runs currently between lock acquisition and finalization.
    /// Used by the runner to drain in-flight work during shutdown.
    pub fn active_runs(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    fn run_lock(&self, task_id: i32) -> Arc<AsyncMutex<()>> {
        let mut locks = self
            .run_locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        locks.entry(task_id).or_default().clone()
    }

    /// Executes one run of `task_id`. Both cron triggers and manual
    /// triggers land here.
    ///
    /// Errors surface only for store problems before a run record exists
    /// (unknown task, unreachable store); everything after that point is
    /// absorbed into the run's own terminal record.
    pub async fn execute(&self, task_id: i32) -> Result<RunOutcome, RunnerError> {
        let lock = self.run_lock(task_id);
        let _guard = match lock.try_lock() {
            Ok(guard) => guard,
            Err(_) => {
                warn!(task_id, "Previous run still in flight, skipping trigger");
                return Ok(RunOutcome::Skipped);
            }
        };
        self.active.fetch_add(1, Ordering::SeqCst);
        let _active = ActiveGuard(&self.active);

        let task = self.dal.sync_task().get(task_id).await?;
        let run = self.dal.sync_run().create_running(task.id, &task.name).await?;
        info!(task_id, run_id = run.id, task = %task.name, "Run started");

        let run_dir = self
            .runtime_dir
            .join(format!("task_{}", task.id))
            .join(format!("run_{}", Uuid::new_v4()));

        match self.run_pipeline(&task, &run_dir).await {
            Ok((rows, message)) => {
                self.dal
                    .sync_run()
                    .finalize_success(run.id, rows, &truncate_message(&message))
                    .await?;
                self.dal
                    .sync_task()
                    .set_last_run_status(task.id, STATUS_SUCCESS)
                    .await?;
                self.cleanup_run_dir(&run_dir).await;
                info!(task_id, run_id = run.id, rows, "Run succeeded");
                Ok(RunOutcome::Success {
                    run_id: run.id,
                    rows,
                })
            }
            Err((kind, message)) => {
                let message = truncate_message(&message);
                self.dal
                    .sync_run()
                    .finalize_failure(run.id, kind, None, &message)
                    .await?;
                self.dal
                    .sync_task()
                    .set_last_run_status(task.id, STATUS_FAILURE)
                    .await?;
                warn!(task_id, run_id = run.id, kind = %kind, "Run failed");

                // Best effort, exactly one attempt per failed run.
                if self.alerter.is_configured() {
                    let alert = FailureAlert {
                        task_name: task.name.clone(),
                        kind,
                        excerpt: excerpt(&message),
                        occurred_at: CivilTimestamp::now_in(self.dal.timezone()),
                    };
                    if let Err(e) = self.alerter.send(&alert).await {
                        warn!(task_id, error = %e, "Failed to deliver failure alert");
                    }
                }

                if !self.options.retain_failed_run_dirs {
                    self.cleanup_run_dir(&run_dir).await;
                }
                Ok(RunOutcome::Failure {
                    run_id: run.id,
                    kind,
                })
            }
        }
    }

    /// Everything between run-record creation and finalization. Returns the
    /// row count and a human-readable summary, or the failure classification
    /// and message.
    async fn run_pipeline(
        &self,
        task: &SyncTask,
        run_dir: &Path,
    ) -> Result<(i32, String), (FailureKind, String)> {
        let plan = TaskPlan::validate(task)
            .map_err(|e| (FailureKind::Configuration, e.to_string()))?;

        tokio::fs::create_dir_all(run_dir)
            .await
            .map_err(|e| (FailureKind::Configuration, format!("Failed to create run directory: {e}")))?;

        let transfer_path = run_dir.join("transfer.csv");
        let extraction = self
            .extractor
            .extract(&plan.source_sql, &transfer_path)
            .await
            .map_err(|e| (FailureKind::Extraction, e.to_string()))?;

        if !extraction.columns.iter().any(|c| c == &plan.index_column) {
            let e = ConfigurationError::IndexColumnMissing {
                column: plan.index_column.clone(),
                available: extraction.columns.clone(),
            };
            return Err((FailureKind::Configuration, e.to_string()));
        }

        if extraction.rows == 0 {
            if self.options.fail_on_empty_extraction {
                return Err((
                    FailureKind::Configuration,
                    ConfigurationError::EmptyExtraction.to_string(),
                ));
            }
            return Ok((0, "Extraction returned 0 rows, engine skipped".to_string()));
        }

        let descriptor_path = run_dir.join("descriptor.yaml");
        InvocationDescriptor::build(&plan, &transfer_path, &self.credentials)
            .write_to(&descriptor_path)
            .map_err(|e| (FailureKind::Descriptor, e.to_string()))?;

        let report = self
            .engine
            .invoke(&descriptor_path)
            .await
            .map_err(|e| match e {
                EngineError::Timeout(_) => (FailureKind::Timeout, e.to_string()),
                other => (
                    FailureKind::Engine(EngineFailureKind::NonZeroExit),
                    other.to_string(),
                ),
            })?;

        match classify(report.exit_code, &report.output) {
            Outcome::Success => {
                let rows = extraction.rows as i32;
                Ok((rows, format!("Synced {rows} rows")))
            }
            Outcome::Failure { kind, marker } => {
                let headline = match marker {
                    Some(m) => format!("Engine output matched failure marker '{m}'"),
                    None => format!("Engine exited with code {:?}", report.exit_code),
                };
                Err((kind, format!("{headline}\n{}", report.output)))
            }
        }
    }

    async fn cleanup_run_dir(&self, run_dir: &Path) {
        if let Err(e) = tokio::fs::remove_dir_all(run_dir).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(dir = %run_dir.display(), error = %e, "Failed to remove run directory");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::Database;
    use crate::engine::EngineReport;
    use crate::error::{EngineError, ExtractionError, StoreError};
    use crate::extract::Extraction;
    use crate::transfer::TransferWriter;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct FixtureExtractor {
        rows: Vec<Vec<String>>,
        columns: Vec<String>,
    }

    #[async_trait]
    impl Extractor for FixtureExtractor {
        async fn extract(
            &self,
            _sql: &str,
            transfer_path: &Path,
        ) -> Result<Extraction, ExtractionError> {
            let mut writer = TransferWriter::create(transfer_path, &self.columns)?;
            for row in &self.rows {
                writer.write_row(row)?;
            }
            let rows = writer.finish()?;
            Ok(Extraction {
                columns: self.columns.clone(),
                rows,
            })
        }
    }

    struct FakeEngine {
        exit_code: Option<i32>,
        output: String,
        delay: Duration,
        invocations: AtomicUsize,
    }

    impl FakeEngine {
        fn exiting(exit_code: i32, output: &str) -> Self {
            Self {
                exit_code: Some(exit_code),
                output: output.to_string(),
                delay: Duration::ZERO,
                invocations: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl CapabilityEngine for FakeEngine {
        async fn invoke(&self, descriptor_path: &Path) -> Result<EngineReport, EngineError> {
            assert!(descriptor_path.exists());
            self.invocations.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            Ok(EngineReport {
                exit_code: self.exit_code,
                output: self.output.clone(),
            })
        }
    }

    struct RecordingSink {
        sent: AtomicUsize,
    }

    #[async_trait]
    impl AlertSink for RecordingSink {
        fn is_configured(&self) -> bool {
            true
        }

        async fn send(&self, _alert: &FailureAlert) -> Result<(), crate::error::AlertError> {
            self.sent.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    async fn seeded_dal(dir: &tempfile::TempDir) -> (Dal, i32) {
        let db = Database::new(dir.path().join("store.db").to_str().unwrap());
        db.run_migrations().await.unwrap();
        let dal = Dal::new(db, chrono_tz::Asia::Shanghai);
        let task = dal
            .sync_task()
            .create(crate::dal::TaskSpec {
                name: "users-sync".to_string(),
                source_sql: "SELECT id, name FROM users".to_string(),
                target_link: "https://example.feishu.cn/base/AbCd1234?table=tblXyz9".to_string(),
                sync_mode: "full".to_string(),
                index_column: "id".to_string(),
                field_type_strategy: "base".to_string(),
                create_missing_fields: true,
                cron_expr: "0 3 * * *".to_string(),
                enabled: true,
            })
            .await
            .unwrap();
        (dal, task.id)
    }

    fn executor(
        dal: Dal,
        dir: &tempfile::TempDir,
        extractor: Arc<dyn Extractor>,
        engine: Arc<dyn CapabilityEngine>,
        alerter: Arc<dyn AlertSink>,
        options: ExecutorOptions,
    ) -> RunExecutor {
        RunExecutor::new(
            dal,
            extractor,
            engine,
            alerter,
            FeishuCredentials::require("cli_a1b2", "s3cr3t").unwrap(),
            dir.path().join("runtime"),
            options,
        )
    }

    fn two_row_extractor() -> Arc<FixtureExtractor> {
        Arc::new(FixtureExtractor {
            columns: vec!["id".to_string(), "name".to_string()],
            rows: vec![
                vec!["1".to_string(), "alice".to_string()],
                vec!["2".to_string(), "bob".to_string()],
            ],
        })
    }

    #[tokio::test]
    async fn successful_run_is_finalized_and_cleaned_up() {
        let dir = tempfile::tempdir().unwrap();
        let (dal, task_id) = seeded_dal(&dir).await;
        let sink = Arc::new(RecordingSink {
            sent: AtomicUsize::new(0),
        });
        let exec = executor(
            dal.clone(),
            &dir,
            two_row_extractor(),
            Arc::new(FakeEngine::exiting(0, "synced 2 rows")),
            sink.clone(),
            ExecutorOptions::default(),
        );

        let outcome = exec.execute(task_id).await.unwrap();
        let RunOutcome::Success { run_id, rows } = outcome else {
            panic!("expected success, got {outcome:?}");
        };
        assert_eq!(rows, 2);

        let run = dal.sync_run().get(run_id).await.unwrap().unwrap();
        assert_eq!(run.status, crate::models::sync_run::STATUS_SUCCESS);
        assert_eq!(run.rows_extracted, Some(2));

        let task = dal.sync_task().get(task_id).await.unwrap();
        assert_eq!(task.last_run_status.as_deref(), Some("success"));

        // No alert on success, run dir removed.
        assert_eq!(sink.sent.load(Ordering::SeqCst), 0);
        let task_dir = dir.path().join("runtime").join(format!("task_{task_id}"));
        let leftovers = std::fs::read_dir(&task_dir)
            .map(|entries| entries.count())
            .unwrap_or(0);
        assert_eq!(leftovers, 0);
    }

    #[tokio::test]
    async fn engine_marker_failure_alerts_exactly_once() {
        let dir = tempfile::tempdir().unwrap();
        let (dal, task_id) = seeded_dal(&dir).await;
        let sink = Arc::new(RecordingSink {
            sent: AtomicUsize::new(0),
        });
        let exec = executor(
            dal.clone(),
            &dir,
            two_row_extractor(),
            Arc::new(FakeEngine::exiting(0, "2026-01-12 同步出错: field mismatch")),
            sink.clone(),
            ExecutorOptions::default(),
        );

        let outcome = exec.execute(task_id).await.unwrap();
        let RunOutcome::Failure { run_id, kind } = outcome else {
            panic!("expected failure, got {outcome:?}");
        };
        assert_eq!(kind, FailureKind::Engine(EngineFailureKind::ErrorMarker));

        let run = dal.sync_run().get(run_id).await.unwrap().unwrap();
        assert_eq!(run.status, crate::models::sync_run::STATUS_FAILURE);
        assert_eq!(run.failure_kind.as_deref(), Some("engine_error_marker"));
        assert_eq!(sink.sent.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn zero_row_extraction_skips_engine() {
        let dir = tempfile::tempdir().unwrap();
        let (dal, task_id) = seeded_dal(&dir).await;
        let engine = Arc::new(FakeEngine::exiting(0, ""));
        let exec = executor(
            dal.clone(),
            &dir,
            Arc::new(FixtureExtractor {
                columns: vec!["id".to_string(), "name".to_string()],
                rows: Vec::new(),
            }),
            engine.clone(),
            Arc::new(RecordingSink {
                sent: AtomicUsize::new(0),
            }),
            ExecutorOptions::default(),
        );

        let outcome = exec.execute(task_id).await.unwrap();
        assert!(matches!(outcome, RunOutcome::Success { rows: 0, .. }));
        assert_eq!(engine.invocations.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn zero_rows_can_be_configured_as_failure() {
        let dir = tempfile::tempdir().unwrap();
        let (dal, task_id) = seeded_dal(&dir).await;
        let exec = executor(
            dal.clone(),
            &dir,
            Arc::new(FixtureExtractor {
                columns: vec!["id".to_string()],
                rows: Vec::new(),
            }),
            Arc::new(FakeEngine::exiting(0, "")),
            Arc::new(RecordingSink {
                sent: AtomicUsize::new(0),
            }),
            ExecutorOptions {
                fail_on_empty_extraction: true,
                ..ExecutorOptions::default()
            },
        );

        let outcome = exec.execute(task_id).await.unwrap();
        assert!(matches!(
            outcome,
            RunOutcome::Failure {
                kind: FailureKind::Configuration,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn missing_index_column_never_reaches_engine() {
        let dir = tempfile::tempdir().unwrap();
        let (dal, task_id) = seeded_dal(&dir).await;
        let engine = Arc::new(FakeEngine::exiting(0, ""));
        let exec = executor(
            dal.clone(),
            &dir,
            Arc::new(FixtureExtractor {
                columns: vec!["uid".to_string(), "name".to_string()],
                rows: vec![vec!["1".to_string(), "alice".to_string()]],
            }),
            engine.clone(),
            Arc::new(RecordingSink {
                sent: AtomicUsize::new(0),
            }),
            ExecutorOptions::default(),
        );

        let outcome = exec.execute(task_id).await.unwrap();
        assert!(matches!(
            outcome,
            RunOutcome::Failure {
                kind: FailureKind::Configuration,
                ..
            }
        ));
        assert_eq!(engine.invocations.load(Ordering::SeqCst), 0);
    }

    #[tracing_test::traced_test]
    #[tokio::test]
    async fn concurrent_triggers_of_same_task_do_not_overlap() {
        let dir = tempfile::tempdir().unwrap();
        let (dal, task_id) = seeded_dal(&dir).await;
        let engine = Arc::new(FakeEngine {
            exit_code: Some(0),
            output: "ok".to_string(),
            delay: Duration::from_millis(300),
            invocations: AtomicUsize::new(0),
        });
        let exec = Arc::new(executor(
            dal.clone(),
            &dir,
            two_row_extractor(),
            engine.clone(),
            Arc::new(RecordingSink {
                sent: AtomicUsize::new(0),
            }),
            ExecutorOptions::default(),
        ));

        let first = {
            let exec = exec.clone();
            tokio::spawn(async move { exec.execute(task_id).await.unwrap() })
        };
        // Give the first trigger time to take the run lock.
        tokio::time::sleep(Duration::from_millis(50)).await;
        let second = exec.execute(task_id).await.unwrap();
        let first = first.await.unwrap();

        assert_eq!(second, RunOutcome::Skipped);
        assert!(matches!(first, RunOutcome::Success { .. }));
        assert_eq!(engine.invocations.load(Ordering::SeqCst), 1);
        // A skipped trigger leaves no run record behind, only a warning.
        assert_eq!(dal.sync_run().for_task(task_id, 10).await.unwrap().len(), 1);
        assert!(logs_contain("Previous run still in flight"));
    }

    struct TimeoutEngine;

    #[async_trait]
    impl CapabilityEngine for TimeoutEngine {
        async fn invoke(&self, _descriptor_path: &Path) -> Result<EngineReport, EngineError> {
            Err(EngineError::Timeout(Duration::from_secs(1)))
        }
    }

    #[tokio::test]
    async fn engine_timeout_finalizes_as_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let (dal, task_id) = seeded_dal(&dir).await;
        let exec = executor(
            dal.clone(),
            &dir,
            two_row_extractor(),
            Arc::new(TimeoutEngine),
            Arc::new(RecordingSink {
                sent: AtomicUsize::new(0),
            }),
            ExecutorOptions::default(),
        );

        let outcome = exec.execute(task_id).await.unwrap();
        assert!(matches!(
            outcome,
            RunOutcome::Failure {
                kind: FailureKind::Timeout,
                ..
            }
        ));
        let runs = dal.sync_run().for_task(task_id, 5).await.unwrap();
        assert_eq!(runs[0].failure_kind.as_deref(), Some("timeout"));
    }

    #[tokio::test]
    async fn runs_of_different_tasks_proceed_concurrently() {
        let dir = tempfile::tempdir().unwrap();
        let (dal, first_id) = seeded_dal(&dir).await;
        let second = dal
            .sync_task()
            .create(crate::dal::TaskSpec {
                name: "orders-sync".to_string(),
                source_sql: "SELECT id FROM orders".to_string(),
                target_link: "https://example.feishu.cn/base/ZzYy9876".to_string(),
                sync_mode: "full".to_string(),
                index_column: "id".to_string(),
                field_type_strategy: "base".to_string(),
                create_missing_fields: true,
                cron_expr: "0 4 * * *".to_string(),
                enabled: true,
            })
            .await
            .unwrap();

        let engine = Arc::new(FakeEngine {
            exit_code: Some(0),
            output: "ok".to_string(),
            delay: Duration::from_millis(200),
            invocations: AtomicUsize::new(0),
        });
        let exec = Arc::new(executor(
            dal.clone(),
            &dir,
            two_row_extractor(),
            engine.clone(),
            Arc::new(RecordingSink {
                sent: AtomicUsize::new(0),
            }),
            ExecutorOptions::default(),
        ));

        let a = {
            let exec = exec.clone();
            tokio::spawn(async move { exec.execute(first_id).await.unwrap() })
        };
        let b = {
            let exec = exec.clone();
            let id = second.id;
            tokio::spawn(async move { exec.execute(id).await.unwrap() })
        };
        let (a, b) = (a.await.unwrap(), b.await.unwrap());

        assert!(matches!(a, RunOutcome::Success { .. }));
        assert!(matches!(b, RunOutcome::Success { .. }));
        assert_eq!(engine.invocations.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn unknown_task_surfaces_store_error() {
        let dir = tempfile::tempdir().unwrap();
        let (dal, _task_id) = seeded_dal(&dir).await;
        let exec = executor(
            dal,
            &dir,
            two_row_extractor(),
            Arc::new(FakeEngine::exiting(0, "")),
            Arc::new(RecordingSink {
                sent: AtomicUsize::new(0),
            }),
            ExecutorOptions::default(),
        );

        let err = exec.execute(9999).await.unwrap_err();
        assert!(matches!(
            err,
            RunnerError::Store(StoreError::TaskNotFound(9999))
        ));
    }
}
