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

//! Result classification: exit code + captured output → run outcome.
//!
//! The external engine's exit code and text output are its only return
//! channel, and it is known to exit 0 on partial failure, so the output is
//! scanned for a pinned set of markers. The marker table is closed: entries
//! come from the engine's documented output strings, and unrecognized output
//! with exit code 0 is treated as success. Classification is pure — the same
//! (exit code, output) pair always yields the same outcome.

use crate::error::{EngineFailureKind, FailureKind};

/// Terminal outcome of one engine invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Failure {
        kind: FailureKind,
        /// The marker that matched, for the run record's message.
        marker: Option<&'static str>,
    },
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success)
    }
}

/// Markers that indicate an authentication failure.
const AUTH_MARKERS: &[&str] = &["获取访问令牌失败", "app secret invalid"];

/// Markers that indicate the app or bot lacks access to the target table.
const PERMISSION_MARKERS: &[&str] = &[
    "91403",
    "1254302",
    "forbidden",
    "the role has no permissions",
    "no permissions",
];

/// Markers that indicate the target API rate limit was hit.
const RATE_LIMIT_MARKERS: &[&str] = &["99991400", "too many requests"];

/// Generic hard-failure markers, matched after the specific categories.
const ERROR_MARKERS: &[&str] = &["同步出错", "程序异常", "traceback", " - error - "];

fn find_marker(haystack: &str, markers: &[&'static str]) -> Option<&'static str> {
    markers.iter().copied().find(|m| haystack.contains(m))
}

/// Classifies one engine invocation.
///
/// Non-zero exit is always a failure; markers only refine its kind. Zero
/// exit with a recognized marker is a failure too. Matching is
/// case-insensitive, specific categories (auth, permission, rate limit)
/// before generic error markers.
pub fn classify(exit_code: Option<i32>, output: &str) -> Outcome {
    let lowered = output.to_lowercase();

    let marker_kind = find_marker(&lowered, AUTH_MARKERS)
        .map(|m| (EngineFailureKind::Auth, m))
        .or_else(|| {
            find_marker(&lowered, PERMISSION_MARKERS).map(|m| (EngineFailureKind::Permission, m))
        })
        .or_else(|| {
            find_marker(&lowered, RATE_LIMIT_MARKERS).map(|m| (EngineFailureKind::RateLimit, m))
        })
        .or_else(|| {
            find_marker(&lowered, ERROR_MARKERS).map(|m| (EngineFailureKind::ErrorMarker, m))
        });

    match (exit_code, marker_kind) {
        (Some(0), None) => Outcome::Success,
        (Some(0), Some((kind, marker))) => Outcome::Failure {
            kind: FailureKind::Engine(kind),
            marker: Some(marker),
        },
        // Killed by signal or non-zero exit: failure, marker refines the kind.
        (_, Some((kind, marker))) => Outcome::Failure {
            kind: FailureKind::Engine(kind),
            marker: Some(marker),
        },
        (_, None) => Outcome::Failure {
            kind: FailureKind::Engine(EngineFailureKind::NonZeroExit),
            marker: None,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_exit_clean_output_is_success() {
        assert!(classify(Some(0), "synced 120 rows in 3.1s").is_success());
    }

    #[test]
    fn zero_exit_with_error_marker_is_failure() {
        let outcome = classify(Some(0), "2026-01-12 03:00:05 同步出错: table missing");
        assert_eq!(
            outcome,
            Outcome::Failure {
                kind: FailureKind::Engine(EngineFailureKind::ErrorMarker),
                marker: Some("同步出错"),
            }
        );
    }

    #[test]
    fn nonzero_exit_is_always_failure() {
        let outcome = classify(Some(1), "all good, nothing to report");
        assert_eq!(
            outcome,
            Outcome::Failure {
                kind: FailureKind::Engine(EngineFailureKind::NonZeroExit),
                marker: None,
            }
        );
    }

    #[test]
    fn signal_death_is_failure() {
        let outcome = classify(None, "");
        assert!(!outcome.is_success());
    }

    #[test]
    fn auth_marker_wins_over_generic_error() {
        let outcome = classify(Some(0), "ERROR - 获取访问令牌失败, app secret invalid");
        assert_eq!(
            outcome,
            Outcome::Failure {
                kind: FailureKind::Engine(EngineFailureKind::Auth),
                marker: Some("获取访问令牌失败"),
            }
        );
    }

    #[test]
    fn permission_code_in_output_is_permission_failure() {
        let outcome = classify(Some(1), "api returned code 91403: Forbidden");
        assert_eq!(
            outcome,
            Outcome::Failure {
                kind: FailureKind::Engine(EngineFailureKind::Permission),
                marker: Some("91403"),
            }
        );
    }

    #[test]
    fn rate_limit_marker_is_case_insensitive() {
        let outcome = classify(Some(0), "HTTP 429 Too Many Requests, backing off");
        assert_eq!(
            outcome,
            Outcome::Failure {
                kind: FailureKind::Engine(EngineFailureKind::RateLimit),
                marker: Some("too many requests"),
            }
        );
    }

    #[test]
    fn python_traceback_is_error_marker() {
        let output = "Traceback (most recent call last):\n  File \"engine.py\", line 10";
        let outcome = classify(Some(0), output);
        assert_eq!(
            outcome,
            Outcome::Failure {
                kind: FailureKind::Engine(EngineFailureKind::ErrorMarker),
                marker: Some("traceback"),
            }
        );
    }

    #[test]
    fn classification_is_deterministic() {
        let pairs = [
            (Some(0), "ok"),
            (Some(0), "同步出错"),
            (Some(2), "获取访问令牌失败"),
            (None, "99991400"),
        ];
        for (code, output) in pairs {
            assert_eq!(classify(code, output), classify(code, output));
        }
    }
}
