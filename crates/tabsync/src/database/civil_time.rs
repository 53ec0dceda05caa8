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

//! Civil-time wrapper for timestamps stored in the run log.
//!
//! All timestamps in the store are naive local times in one fixed civil
//! timezone, configured process-wide (default `Asia/Shanghai`). Storing the
//! already-converted local time keeps the database free of UTC ambiguity:
//! what is stored is exactly what is displayed.

use chrono::{DateTime, NaiveDateTime, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Storage format for civil timestamps: `YYYY-MM-DD HH:MM:SS`.
pub const CIVIL_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// A naive local timestamp in the process-wide civil timezone.
///
/// This is a domain type; the DAL stores it as TEXT in the storage format
/// and the alert sink renders it verbatim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CivilTimestamp(pub NaiveDateTime);

impl CivilTimestamp {
    /// Current time in the given civil timezone.
    pub fn now_in(tz: Tz) -> Self {
        Self(Utc::now().with_timezone(&tz).naive_local())
    }

    /// Converts an absolute instant into this civil representation.
    pub fn from_utc(instant: DateTime<Utc>, tz: Tz) -> Self {
        Self(instant.with_timezone(&tz).naive_local())
    }

    /// Storage/display string, `YYYY-MM-DD HH:MM:SS`.
    pub fn to_storage_string(&self) -> String {
        self.0.format(CIVIL_FORMAT).to_string()
    }

    /// Parses the storage format back into a timestamp.
    pub fn from_storage_string(s: &str) -> Result<Self, chrono::ParseError> {
        NaiveDateTime::parse_from_str(s, CIVIL_FORMAT).map(CivilTimestamp)
    }
}

impl fmt::Display for CivilTimestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_storage_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_round_trip() {
        let ts = CivilTimestamp::now_in(chrono_tz::Asia::Shanghai);
        let s = ts.to_storage_string();
        let back = CivilTimestamp::from_storage_string(&s).unwrap();
        // Sub-second precision is intentionally dropped by the format.
        assert_eq!(ts.0.and_utc().timestamp(), back.0.and_utc().timestamp());
    }

    #[test]
    fn from_utc_applies_offset() {
        use chrono::TimeZone;
        // 2026-01-01 16:00 UTC is 2026-01-02 00:00 in Shanghai (+08:00).
        let instant = Utc.with_ymd_and_hms(2026, 1, 1, 16, 0, 0).unwrap();
        let civil = CivilTimestamp::from_utc(instant, chrono_tz::Asia::Shanghai);
        assert_eq!(civil.to_storage_string(), "2026-01-02 00:00:00");
    }
}
