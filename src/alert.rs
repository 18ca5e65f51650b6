// Copyright (c) Babylon Liveness Monitor Contributors
// SPDX-License-Identifier: Apache-2.0

//! Structured alerts and the outbound notification seam
//!
//! The governor produces [`Alert`] records and hands them to an
//! [`AlertSink`]. Delivery is at-most-once: a sink failure is logged and the
//! alert is dropped; governor state has already advanced.

use crate::network::Network;
use crate::types::now_ms;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

impl Severity {
    pub fn label(&self) -> &'static str {
        match self {
            Severity::Info => "INFO",
            Severity::Warning => "WARNING",
            Severity::Critical => "CRITICAL",
        }
    }

    pub fn badge(&self) -> &'static str {
        match self {
            Severity::Info => "ℹ️",
            Severity::Warning => "⚠️",
            Severity::Critical => "🚨",
        }
    }
}

/// A single outbound notification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub title: String,
    pub message: String,
    pub severity: Severity,
    pub network: Network,
    pub timestamp_ms: u64,
    /// Free-form key/value context (subject keys, rates, heights)
    pub metadata: BTreeMap<String, String>,
}

impl Alert {
    pub fn new(network: Network, severity: Severity, title: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            message: message.into(),
            severity,
            network,
            timestamp_ms: now_ms(),
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_meta(mut self, key: &str, value: impl ToString) -> Self {
        self.metadata.insert(key.to_string(), value.to_string());
        self
    }
}

/// Outbound notification transport
///
/// Implementations own their retry policy. The governor never retries a
/// failed delivery.
#[async_trait]
pub trait AlertSink: Send + Sync {
    async fn send_alert(&self, alert: &Alert) -> anyhow::Result<()>;
}

/// Sink that only writes alerts to the log; used when no transport is
/// configured and as a test double
#[derive(Debug, Default)]
pub struct LogSink;

#[async_trait]
impl AlertSink for LogSink {
    async fn send_alert(&self, alert: &Alert) -> anyhow::Result<()> {
        tracing::info!(
            "[Alert] {} {} [{}] {}: {}",
            alert.severity.badge(),
            alert.severity.label(),
            alert.network.name(),
            alert.title,
            alert.message
        );
        Ok(())
    }
}

#[cfg(test)]
pub mod testing {
    use super::*;
    use tokio::sync::Mutex;

    /// Records every alert it receives; shared by governor and directory tests
    #[derive(Default)]
    pub struct RecordingSink {
        pub alerts: Mutex<Vec<Alert>>,
    }

    impl RecordingSink {
        pub async fn count(&self) -> usize {
            self.alerts.lock().await.len()
        }

        pub async fn titles(&self) -> Vec<String> {
            self.alerts.lock().await.iter().map(|a| a.title.clone()).collect()
        }

        pub async fn severities(&self) -> Vec<Severity> {
            self.alerts.lock().await.iter().map(|a| a.severity).collect()
        }
    }

    #[async_trait]
    impl AlertSink for RecordingSink {
        async fn send_alert(&self, alert: &Alert) -> anyhow::Result<()> {
            self.alerts.lock().await.push(alert.clone());
            Ok(())
        }
    }
}
