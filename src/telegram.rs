// Copyright (c) Babylon Liveness Monitor Contributors
// SPDX-License-Identifier: Apache-2.0

//! Telegram notification sink
//!
//! Formats alerts as HTML messages and posts them to the Bot API. Delivery
//! retries with an escalating backoff and defers to the API's own
//! `retry_after` hint when it rate-limits the bot. When unconfigured the
//! sink degrades to logging what it would have sent, which keeps the daemon
//! fully operational in development.

use crate::alert::{Alert, AlertSink, Severity};
use anyhow::Result;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

/// Delivery attempts per alert before it is dropped
const DELIVERY_ATTEMPTS: u32 = 4;
/// Backoff before the second attempt; doubles after each failure
const INITIAL_RETRY_DELAY: Duration = Duration::from_millis(750);

#[derive(Debug, Clone, Default)]
pub struct TelegramConfig {
    pub bot_token: String,
    pub chat_id: String,
}

impl TelegramConfig {
    pub fn is_configured(&self) -> bool {
        !self.bot_token.is_empty() && !self.chat_id.is_empty()
    }
}

/// `sendMessage` request body as the Bot API defines it
#[derive(Debug, Serialize)]
struct SendMessageRequest<'a> {
    chat_id: &'a str,
    text: &'a str,
    parse_mode: &'static str,
    disable_web_page_preview: bool,
}

/// The slice of the Bot API response envelope the sink acts on
#[derive(Debug, Default, Deserialize)]
struct ApiEnvelope {
    #[serde(default)]
    ok: bool,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    parameters: Option<ResponseParameters>,
}

#[derive(Debug, Default, Deserialize)]
struct ResponseParameters {
    #[serde(default)]
    retry_after: Option<u64>,
}

pub struct TelegramSink {
    config: TelegramConfig,
    client: Client,
    api_base: String,
}

impl std::fmt::Debug for TelegramSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelegramSink")
            .field("configured", &self.is_configured())
            .field("api_base", &"<redacted>")
            .finish()
    }
}

impl TelegramSink {
    pub fn new(config: TelegramConfig) -> Result<Self> {
        let api_base = format!("https://api.telegram.org/bot{}", config.bot_token);
        let client = Client::builder()
            .timeout(Duration::from_secs(15))
            .build()?;
        Ok(Self {
            config,
            client,
            api_base,
        })
    }

    pub fn is_configured(&self) -> bool {
        self.config.is_configured()
    }

    fn format_message(alert: &Alert) -> String {
        let mut message = format!(
            "{} <b>[{}]</b> {}\n<b>{}</b>\n\n{}",
            alert.severity.badge(),
            alert.network.name(),
            alert.severity.label(),
            escape_html(&alert.title),
            escape_html(&alert.message),
        );
        if !alert.metadata.is_empty() {
            message.push('\n');
            for (key, value) in &alert.metadata {
                message.push_str(&format!(
                    "\n<b>{}:</b> <code>{}</code>",
                    escape_html(key),
                    escape_html(value)
                ));
            }
        }
        message
    }

    async fn post_message(&self, text: &str) -> Result<()> {
        if !self.is_configured() {
            debug!(
                "[Telegram] sink unconfigured, alert logged only: {}",
                crate::error::truncate_payload(text, 200)
            );
            return Ok(());
        }

        let request = SendMessageRequest {
            chat_id: &self.config.chat_id,
            text,
            parse_mode: "HTML",
            disable_web_page_preview: true,
        };

        let mut delay = INITIAL_RETRY_DELAY;
        for attempt in 1..=DELIVERY_ATTEMPTS {
            match self
                .client
                .post(format!("{}/sendMessage", self.api_base))
                .json(&request)
                .send()
                .await
            {
                Ok(response) => {
                    let status = response.status();
                    let envelope: ApiEnvelope = response.json().await.unwrap_or_default();
                    if status.is_success() && envelope.ok {
                        return Ok(());
                    }
                    warn!(
                        "[Telegram] attempt {attempt}/{DELIVERY_ATTEMPTS} rejected ({status}): {}",
                        envelope.description.as_deref().unwrap_or("no description")
                    );
                    // A rate-limited bot is told how long to hold off
                    if let Some(server_wait) = envelope
                        .parameters
                        .and_then(|p| p.retry_after)
                        .map(Duration::from_secs)
                    {
                        delay = delay.max(server_wait);
                    }
                }
                Err(e) => {
                    warn!("[Telegram] attempt {attempt}/{DELIVERY_ATTEMPTS} transport error: {e}");
                }
            }
            if attempt < DELIVERY_ATTEMPTS {
                tokio::time::sleep(delay).await;
                delay *= 2;
            }
        }

        anyhow::bail!("telegram delivery gave up after {DELIVERY_ATTEMPTS} attempts")
    }
}

#[async_trait]
impl AlertSink for TelegramSink {
    async fn send_alert(&self, alert: &Alert) -> Result<()> {
        self.post_message(&Self::format_message(alert)).await
    }
}

fn escape_html(raw: &str) -> String {
    raw.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::Network;

    #[test]
    fn test_unconfigured_detection() {
        assert!(!TelegramConfig::default().is_configured());
        let full = TelegramConfig {
            bot_token: "123:abc".to_string(),
            chat_id: "-100".to_string(),
        };
        assert!(full.is_configured());
        let partial = TelegramConfig {
            bot_token: "123:abc".to_string(),
            chat_id: String::new(),
        };
        assert!(!partial.is_configured());
    }

    #[test]
    fn test_format_contains_severity_and_metadata() {
        let alert = Alert::new(
            Network::Mainnet,
            Severity::Critical,
            "Validator Jailed",
            "my-validator has been jailed",
        )
        .with_meta("subject", "bbnvaloper1x");

        let text = TelegramSink::format_message(&alert);
        assert!(text.contains("CRITICAL"));
        assert!(text.contains("Babylon Mainnet"));
        assert!(text.contains("Validator Jailed"));
        assert!(text.contains("<code>bbnvaloper1x</code>"));
    }

    #[test]
    fn test_format_escapes_html() {
        let alert = Alert::new(
            Network::Testnet,
            Severity::Info,
            "a <b> title",
            "one & two",
        );
        let text = TelegramSink::format_message(&alert);
        assert!(text.contains("a &lt;b&gt; title"));
        assert!(text.contains("one &amp; two"));
    }

    #[test]
    fn test_request_body_shape() {
        let request = SendMessageRequest {
            chat_id: "-100200",
            text: "hello",
            parse_mode: "HTML",
            disable_web_page_preview: true,
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["chat_id"], "-100200");
        assert_eq!(json["text"], "hello");
        assert_eq!(json["parse_mode"], "HTML");
        assert_eq!(json["disable_web_page_preview"], true);
    }

    #[test]
    fn test_api_envelope_decodes_rate_limit_hint() {
        let envelope: ApiEnvelope = serde_json::from_str(
            r#"{"ok": false, "description": "Too Many Requests: retry after 7", "parameters": {"retry_after": 7}}"#,
        )
        .unwrap();
        assert!(!envelope.ok);
        assert_eq!(envelope.parameters.unwrap().retry_after, Some(7));

        // Success envelopes carry no parameters
        let success: ApiEnvelope = serde_json::from_str(r#"{"ok": true, "result": {}}"#).unwrap();
        assert!(success.ok);
        assert!(success.parameters.is_none());
    }

    #[tokio::test]
    async fn test_unconfigured_send_is_noop_ok() {
        let sink = TelegramSink::new(TelegramConfig::default()).unwrap();
        let alert = Alert::new(Network::Mainnet, Severity::Info, "t", "m");
        assert!(sink.send_alert(&alert).await.is_ok());
    }
}
