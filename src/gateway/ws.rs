// Copyright (c) Babylon Liveness Monitor Contributors
// SPDX-License-Identifier: Apache-2.0

//! Long-lived event subscription over WebSocket JSON-RPC
//!
//! One connection carries both subscriptions (new blocks and sealed
//! checkpoints). On disconnect the stream reconnects with exponential
//! backoff; once the attempt budget for an endpoint is spent it rotates to
//! the next endpoint and resets the counter. Frames are fanned out through a
//! bounded broadcast channel: a slow consumer loses the oldest frames, and
//! gap catch-up recovers the missed heights later.

use crate::error::{MonitorError, MonitorResult};
use crate::metrics::MonitorMetrics;
use crate::network::Network;
use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Bounded fan-out capacity; oldest frames are dropped on overflow
pub const EVENT_CHANNEL_CAPACITY: usize = 1024;

#[derive(Debug, Clone)]
pub struct StreamConfig {
    /// Base reconnect delay; actual delay is `base * min(2^(attempt-1), 10)`
    pub base_delay: Duration,
    /// Failed attempts per endpoint before rotating to the next one
    pub max_attempts: u32,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(1),
            max_attempts: 10,
        }
    }
}

pub struct EventStream {
    network: Network,
    urls: Vec<String>,
    config: StreamConfig,
    metrics: Arc<MonitorMetrics>,
    events: broadcast::Sender<serde_json::Value>,
}

impl EventStream {
    pub fn new(
        network: Network,
        urls: Vec<String>,
        config: StreamConfig,
        metrics: Arc<MonitorMetrics>,
    ) -> MonitorResult<Self> {
        if urls.is_empty() {
            return Err(MonitorError::Config(format!(
                "no event stream endpoints configured for {network}"
            )));
        }
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Ok(Self {
            network,
            urls,
            config,
            metrics,
            events,
        })
    }

    /// New consumer handle; frames published before the call are not replayed
    pub fn subscribe(&self) -> broadcast::Receiver<serde_json::Value> {
        self.events.subscribe()
    }

    /// The two standing subscriptions, in the order they are registered
    fn subscription_frames() -> Vec<serde_json::Value> {
        vec![
            json!({
                "jsonrpc": "2.0",
                "method": "subscribe",
                "id": "newBlock",
                "params": ["tm.event='NewBlock'"],
            }),
            json!({
                "jsonrpc": "2.0",
                "method": "subscribe",
                "id": "checkpoint_for_bls",
                "params": ["tm.event='Tx' AND babylon.checkpointing.v1.EventCheckpointSealed.checkpoint CONTAINS 'epoch_num'"],
            }),
        ]
    }

    /// Reconnect delay for the given 1-based attempt number
    fn backoff_delay(&self, attempt: u32) -> Duration {
        let exp = 2u32.saturating_pow(attempt.saturating_sub(1)).min(10);
        self.config.base_delay * exp
    }

    /// Drive the subscription until cancelled
    pub async fn run(&self, cancel: CancellationToken) {
        let mut endpoint_idx = 0usize;
        let mut attempt = 0u32;

        loop {
            if cancel.is_cancelled() {
                break;
            }
            let url = &self.urls[endpoint_idx % self.urls.len()];

            match self.connect_and_pump(url, &cancel).await {
                Ok(()) => {
                    info!("[EventStream] {} subscription closed on shutdown", self.network);
                    break;
                }
                Err(reason) => {
                    attempt += 1;
                    self.metrics
                        .ws_reconnects
                        .with_label_values(&[self.network.tag()])
                        .inc();
                    warn!(
                        "[EventStream] {} lost {} (attempt {}/{}): {}",
                        self.network, url, attempt, self.config.max_attempts, reason
                    );

                    if attempt >= self.config.max_attempts {
                        endpoint_idx += 1;
                        attempt = 0;
                        warn!(
                            "[EventStream] {} rotating to endpoint {}",
                            self.network,
                            self.urls[endpoint_idx % self.urls.len()]
                        );
                        continue;
                    }

                    let delay = self.backoff_delay(attempt);
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    }

    /// One connection lifetime: subscribe, then pump frames until failure.
    /// Returns Ok only on cancellation.
    async fn connect_and_pump(&self, url: &str, cancel: &CancellationToken) -> Result<(), String> {
        let (ws, _) = tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            conn = connect_async(url) => conn.map_err(|e| format!("connect failed: {e}"))?,
        };
        info!("[EventStream] {} connected to {}", self.network, url);
        let (mut write, mut read) = ws.split();

        for frame in Self::subscription_frames() {
            write
                .send(Message::Text(frame.to_string()))
                .await
                .map_err(|e| format!("subscribe failed: {e}"))?;
        }

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    let _ = write.send(Message::Close(None)).await;
                    return Ok(());
                }
                msg = read.next() => {
                    match msg {
                        None => return Err("connection closed".to_string()),
                        Some(Err(e)) => return Err(format!("read error: {e}")),
                        Some(Ok(Message::Text(text))) => self.publish(&text),
                        Some(Ok(Message::Ping(payload))) => {
                            write
                                .send(Message::Pong(payload))
                                .await
                                .map_err(|e| format!("pong failed: {e}"))?;
                        }
                        Some(Ok(Message::Close(frame))) => {
                            return Err(format!("server closed: {frame:?}"));
                        }
                        Some(Ok(_)) => {}
                    }
                }
            }
        }
    }

    /// Parse one text frame and fan it out; a bad frame drops only itself
    fn publish(&self, text: &str) {
        match serde_json::from_str::<serde_json::Value>(text) {
            Ok(value) => {
                self.metrics
                    .events_received
                    .with_label_values(&[self.network.tag()])
                    .inc();
                // send only fails with no subscribers, which is fine at startup
                let _ = self.events.send(value);
            }
            Err(e) => {
                self.metrics
                    .events_dropped
                    .with_label_values(&[self.network.tag(), "parse_error"])
                    .inc();
                debug!(
                    "[EventStream] {} dropping unparseable frame: {} ({e})",
                    self.network,
                    crate::error::truncate_payload(text, 200)
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stream(urls: Vec<&str>, config: StreamConfig) -> EventStream {
        EventStream::new(
            Network::Mainnet,
            urls.into_iter().map(String::from).collect(),
            config,
            Arc::new(MonitorMetrics::new_for_test()),
        )
        .unwrap()
    }

    #[test]
    fn test_empty_urls_rejected() {
        let result = EventStream::new(
            Network::Mainnet,
            vec![],
            StreamConfig::default(),
            Arc::new(MonitorMetrics::new_for_test()),
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_backoff_doubles_then_caps() {
        let s = stream(
            vec!["ws://a"],
            StreamConfig {
                base_delay: Duration::from_secs(1),
                max_attempts: 10,
            },
        );
        assert_eq!(s.backoff_delay(1), Duration::from_secs(1));
        assert_eq!(s.backoff_delay(2), Duration::from_secs(2));
        assert_eq!(s.backoff_delay(3), Duration::from_secs(4));
        assert_eq!(s.backoff_delay(4), Duration::from_secs(8));
        // Exponent caps at 10x the base
        assert_eq!(s.backoff_delay(5), Duration::from_secs(10));
        assert_eq!(s.backoff_delay(30), Duration::from_secs(10));
    }

    #[test]
    fn test_subscription_frames_shape() {
        let frames = EventStream::subscription_frames();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0]["id"], "newBlock");
        assert_eq!(frames[0]["params"][0], "tm.event='NewBlock'");
        assert_eq!(frames[1]["id"], "checkpoint_for_bls");
        assert!(frames[1]["params"][0]
            .as_str()
            .unwrap()
            .contains("EventCheckpointSealed"));
    }

    #[test]
    fn test_publish_fans_out_and_drops_garbage() {
        let s = stream(vec!["ws://a"], StreamConfig::default());
        let mut rx = s.subscribe();

        s.publish(r#"{"jsonrpc": "2.0", "result": {}}"#);
        s.publish("not json at all");

        let frame = rx.try_recv().unwrap();
        assert_eq!(frame["jsonrpc"], "2.0");
        // The garbage frame was dropped, not forwarded
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_run_stops_on_cancel() {
        let s = stream(
            vec!["ws://127.0.0.1:1"],
            StreamConfig {
                base_delay: Duration::from_millis(10),
                max_attempts: 2,
            },
        );
        let cancel = CancellationToken::new();
        cancel.cancel();
        // Already-cancelled token returns without connecting
        tokio::time::timeout(Duration::from_secs(1), s.run(cancel))
            .await
            .expect("run should return promptly when cancelled");
    }
}
