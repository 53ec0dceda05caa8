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

//! Cron scheduling over the task store.
//!
//! A single poll loop re-reads the enabled tasks every tick, so task edits
//! take effect without a restart. All cron expressions are evaluated in one
//! fixed civil timezone, process-wide. Fire times are kept in memory only;
//! occurrences missed while the process was down or while a tick was late
//! coalesce into at most one dispatch, because the next fire time is always
//! computed from the current clock rather than from the missed slot.
//!
//! Dispatch is non-blocking: each due task is handed to a spawned worker,
//! and the executor's own per-task lock guarantees that a dispatch landing
//! on a still-running task is skipped rather than overlapped.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::DateTime;
use chrono_tz::Tz;
use croner::Cron;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::dal::Dal;
use crate::error::RunnerError;
use crate::executor::RunExecutor;
use crate::task::parse_cron;

/// Per-task scheduling state, rebuilt whenever the stored cron changes.
struct Armed {
    cron_expr: String,
    next_fire: DateTime<Tz>,
}

pub struct Scheduler {
    dal: Dal,
    executor: Arc<RunExecutor>,
    timezone: Tz,
    poll_interval: Duration,
    armed: HashMap<i32, Armed>,
}

/// Next occurrence of `cron` strictly after `now`.
fn next_after(cron: &Cron, now: DateTime<Tz>) -> Option<DateTime<Tz>> {
    cron.find_next_occurrence(&now, false).ok()
}

impl Scheduler {
    pub fn new(
        dal: Dal,
        executor: Arc<RunExecutor>,
        timezone: Tz,
        poll_interval: Duration,
    ) -> Self {
        Self {
            dal,
            executor,
            timezone,
            poll_interval,
            armed: HashMap::new(),
        }
    }

    /// Runs the poll loop until the shutdown channel flips to `true`.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!(
            timezone = %self.timezone,
            poll_interval = ?self.poll_interval,
            "Scheduler started"
        );
        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.poll().await {
                        error!(error = %e, "Scheduler poll failed");
                    }
                }
                result = shutdown.changed() => {
                    if result.is_err() || *shutdown.borrow() {
                        info!("Scheduler shutting down");
                        break;
                    }
                }
            }
        }
    }

    /// One tick: reload enabled tasks, fire what is due, re-arm.
    async fn poll(&mut self) -> Result<(), RunnerError> {
        let now = chrono::Utc::now().with_timezone(&self.timezone);
        let tasks = self.dal.sync_task().list_enabled().await?;

        // Disabled or deleted tasks are disarmed.
        let live: std::collections::HashSet<i32> = tasks.iter().map(|t| t.id).collect();
        self.armed.retain(|id, _| live.contains(id));

        for task in tasks {
            let cron = match parse_cron(&task.cron_expr) {
                Ok(cron) => cron,
                Err(e) => {
                    warn!(task_id = task.id, error = %e, "Skipping task with invalid cron");
                    self.armed.remove(&task.id);
                    continue;
                }
            };

            match self.armed.get(&task.id) {
                // First sight (or edited cron): arm for the next occurrence
                // without firing, so startup never triggers a burst.
                None => {
                    if let Some(next_fire) = next_after(&cron, now) {
                        debug!(task_id = task.id, next = %next_fire, "Task armed");
                        self.armed.insert(
                            task.id,
                            Armed {
                                cron_expr: task.cron_expr.clone(),
                                next_fire,
                            },
                        );
                    }
                }
                Some(armed) if armed.cron_expr != task.cron_expr => {
                    if let Some(next_fire) = next_after(&cron, now) {
                        debug!(task_id = task.id, next = %next_fire, "Task re-armed after cron change");
                        self.armed.insert(
                            task.id,
                            Armed {
                                cron_expr: task.cron_expr.clone(),
                                next_fire,
                            },
                        );
                    }
                }
                Some(armed) if armed.next_fire <= now => {
                    self.dispatch(task.id);
                    if let Some(next_fire) = next_after(&cron, now) {
                        self.armed.insert(
                            task.id,
                            Armed {
                                cron_expr: task.cron_expr.clone(),
                                next_fire,
                            },
                        );
                    } else {
                        self.armed.remove(&task.id);
                    }
                }
                Some(_) => {}
            }
        }
        Ok(())
    }

    fn dispatch(&self, task_id: i32) {
        let executor = self.executor.clone();
        info!(task_id, "Cron trigger fired");
        tokio::spawn(async move {
            if let Err(e) = executor.execute(task_id).await {
                error!(task_id, error = %e, "Scheduled run failed to start");
            }
        });
    }
}
