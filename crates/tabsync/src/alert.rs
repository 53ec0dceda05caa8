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

//! Failure alerting over a Feishu group-bot webhook.
//!
//! Alerting is best-effort: delivery failures are logged and swallowed by
//! the caller, and never change the run's own classification. When a shared
//! secret is configured, requests carry the bot's timestamp signature:
//! HMAC-SHA256 keyed on `"{timestamp}\n{secret}"` over an empty message,
//! base64-encoded.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use hmac::{Hmac, Mac};
use serde::Serialize;
use sha2::Sha256;
use tracing::debug;

use crate::database::CivilTimestamp;
use crate::error::{AlertError, FailureKind};

/// How much of the run's message is quoted in the alert text.
const EXCERPT_LIMIT: usize = 500;

/// A failure notification ready for formatting.
#[derive(Debug, Clone)]
pub struct FailureAlert {
    pub task_name: String,
    pub kind: FailureKind,
    pub excerpt: String,
    pub occurred_at: CivilTimestamp,
}

#[derive(Serialize)]
struct TextPayload<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    timestamp: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    sign: Option<String>,
    msg_type: &'static str,
    content: TextContent<'a>,
}

#[derive(Serialize)]
struct TextContent<'a> {
    text: &'a str,
}

#[derive(serde::Deserialize)]
struct WebhookResponse {
    #[serde(default, alias = "StatusCode")]
    code: i64,
    #[serde(default, alias = "StatusMessage")]
    msg: String,
}

/// Computes the group-bot request signature for `timestamp` and `secret`.
///
/// The bot's scheme keys the HMAC on `"{timestamp}\n{secret}"` and signs an
/// empty message.
pub fn sign_request(timestamp: i64, secret: &str) -> String {
    let key = format!("{timestamp}\n{secret}");
    let mac = Hmac::<Sha256>::new_from_slice(key.as_bytes())
        .expect("HMAC can take key of any size");
    BASE64.encode(mac.finalize().into_bytes())
}

/// Truncates `message` to the alert excerpt limit on a char boundary.
pub fn excerpt(message: &str) -> String {
    if message.chars().count() <= EXCERPT_LIMIT {
        return message.to_string();
    }
    let cut: String = message.chars().take(EXCERPT_LIMIT).collect();
    format!("{cut}…")
}

/// Destination for failure notifications. The production implementation is
/// [`WebhookAlerter`]; tests substitute a recording sink.
#[async_trait]
pub trait AlertSink: Send + Sync {
    /// Whether a destination is configured at all. Unconfigured sinks are
    /// skipped silently instead of producing an error per run.
    fn is_configured(&self) -> bool;

    async fn send(&self, alert: &FailureAlert) -> Result<(), AlertError>;
}

/// Sends failure notifications to a Feishu group-bot webhook.
pub struct WebhookAlerter {
    client: reqwest::Client,
    webhook_url: Option<String>,
    secret: Option<String>,
}

impl WebhookAlerter {
    /// `webhook_url = None` disables alerting; `secret = None` sends
    /// unsigned requests.
    pub fn new(webhook_url: Option<String>, secret: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            webhook_url,
            secret,
        }
    }

    fn format_text(alert: &FailureAlert) -> String {
        format!(
            "[tabsync] sync failed\ntask: {}\nkind: {}\ntime: {}\n{}",
            alert.task_name,
            alert.kind,
            alert.occurred_at,
            alert.excerpt,
        )
    }

    /// Interprets the webhook's 2xx response body. The bot answers with a
    /// JSON status object; a body that does not parse as one still counts as
    /// delivered, only an explicit non-zero code is a rejection.
    fn check_delivery(body: &str) -> Result<(), AlertError> {
        match serde_json::from_str::<WebhookResponse>(body) {
            Ok(status) if status.code != 0 => Err(AlertError::Rejected {
                code: status.code,
                msg: status.msg,
            }),
            Ok(_) => Ok(()),
            Err(_) => {
                debug!("Webhook returned a non-JSON body, treating as delivered");
                Ok(())
            }
        }
    }
}

#[async_trait]
impl AlertSink for WebhookAlerter {
    fn is_configured(&self) -> bool {
        self.webhook_url.is_some()
    }

    /// Delivers one alert. The caller logs errors and moves on.
    async fn send(&self, alert: &FailureAlert) -> Result<(), AlertError> {
        let url = self.webhook_url.as_deref().ok_or(AlertError::NotConfigured)?;

        let (timestamp, sign) = match self.secret.as_deref() {
            Some(secret) => {
                let now = chrono::Utc::now().timestamp();
                (Some(now.to_string()), Some(sign_request(now, secret)))
            }
            None => (None, None),
        };

        let text = Self::format_text(alert);
        let payload = TextPayload {
            timestamp,
            sign,
            msg_type: "text",
            content: TextContent { text: &text },
        };

        let response = self.client.post(url).json(&payload).send().await?;
        let response = response.error_for_status()?;
        let body = response.text().await?;
        Self::check_delivery(&body)?;

        debug!(task = %alert.task_name, kind = %alert.kind, "Failure alert delivered");
        Ok(())
    }
}
