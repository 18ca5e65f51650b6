// Copyright (c) Babylon Liveness Monitor Contributors
// SPDX-License-Identifier: Apache-2.0

//! Error taxonomy for the monitoring daemon
//!
//! The variants map one-to-one onto the failure policies the daemon applies:
//! transient transport errors rotate endpoints, parse errors drop a single
//! event, store errors abandon a single write, configuration errors are
//! fatal at bootstrap.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum MonitorError {
    /// All REST endpoints failed for one logical request
    #[error("all {count} REST endpoints failed, last error: {last}")]
    AllEndpointsFailed { count: usize, last: String },

    /// Single-request transport failure (retried internally before surfacing)
    #[error("transport error against {url}: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// Server answered with a non-2xx status
    #[error("HTTP {status} from {url}")]
    HttpStatus {
        url: String,
        status: reqwest::StatusCode,
    },

    /// Malformed event or response payload
    #[error("parse error: {context}: {detail}")]
    Parse { context: &'static str, detail: String },

    /// Event stream failed permanently (after rotation through all endpoints)
    #[error("event stream terminated: {0}")]
    StreamTerminated(String),

    /// Repository write or read failed
    #[error("store error: {0}")]
    Store(String),

    /// Notification sink failed to deliver an alert
    #[error("alert sink error: {0}")]
    Sink(String),

    /// Invalid configuration detected at bootstrap
    #[error("configuration error: {0}")]
    Config(String),

    /// Consensus key could not be decoded into an address
    #[error("key encoding error: {0}")]
    Encoding(String),
}

impl MonitorError {
    /// Stable snake_case label for metrics; must never change once shipped
    pub fn error_type(&self) -> &'static str {
        match self {
            MonitorError::AllEndpointsFailed { .. } => "all_endpoints_failed",
            MonitorError::Transport { .. } => "transport_error",
            MonitorError::HttpStatus { .. } => "http_status",
            MonitorError::Parse { .. } => "parse_error",
            MonitorError::StreamTerminated(_) => "stream_terminated",
            MonitorError::Store(_) => "store_error",
            MonitorError::Sink(_) => "sink_error",
            MonitorError::Config(_) => "config_error",
            MonitorError::Encoding(_) => "encoding_error",
        }
    }

    /// Parse failure helper that truncates untrusted payloads before logging
    pub fn parse(context: &'static str, payload: &str) -> Self {
        MonitorError::Parse {
            context,
            detail: truncate_payload(payload, 256),
        }
    }
}

pub type MonitorResult<T> = Result<T, MonitorError>;

/// Truncate a payload for inclusion in logs and error messages
pub fn truncate_payload(payload: &str, max: usize) -> String {
    if payload.len() <= max {
        payload.to_string()
    } else {
        let cut = payload
            .char_indices()
            .take_while(|(i, _)| *i < max)
            .last()
            .map(|(i, c)| i + c.len_utf8())
            .unwrap_or(0);
        format!("{}... ({} bytes total)", &payload[..cut], payload.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_type_labels_are_prometheus_safe() {
        let errors = vec![
            MonitorError::AllEndpointsFailed {
                count: 3,
                last: "timeout".to_string(),
            },
            MonitorError::Parse {
                context: "block",
                detail: "x".to_string(),
            },
            MonitorError::StreamTerminated("gone".to_string()),
            MonitorError::Store("write failed".to_string()),
            MonitorError::Sink("telegram down".to_string()),
            MonitorError::Config("no urls".to_string()),
            MonitorError::Encoding("bad base64".to_string()),
        ];
        for err in errors {
            let label = err.error_type();
            assert!(!label.is_empty());
            assert!(label
                .chars()
                .all(|c| c.is_ascii_lowercase() || c == '_'));
            assert!(!label.starts_with('_'));
            assert!(!label.ends_with('_'));
        }
    }

    #[test]
    fn test_truncate_payload_short_unchanged() {
        assert_eq!(truncate_payload("hello", 256), "hello");
    }

    #[test]
    fn test_truncate_payload_long() {
        let long = "a".repeat(1000);
        let truncated = truncate_payload(&long, 256);
        assert!(truncated.len() < 300);
        assert!(truncated.contains("1000 bytes total"));
    }

    #[test]
    fn test_parse_helper_truncates() {
        let err = MonitorError::parse("event", &"b".repeat(5000));
        match err {
            MonitorError::Parse { context, detail } => {
                assert_eq!(context, "event");
                assert!(detail.len() < 300);
            }
            _ => panic!("wrong variant"),
        }
    }
}
