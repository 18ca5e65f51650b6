// Copyright (c) Babylon Liveness Monitor Contributors
// SPDX-License-Identifier: Apache-2.0

//! Event router: demultiplexes raw stream frames by shape
//!
//! The router is stateless; each frame is classified on its own. Block
//! events and checkpoint-sealed events go to their pipelines, subscription
//! acknowledgements and unknown shapes are discarded at debug level.

use crate::gateway::types::{JsonRpcFrame, RawBlock};
use crate::metrics::MonitorMetrics;
use crate::network::Network;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Classification of a single stream frame
#[derive(Debug)]
pub enum RoutedEvent {
    Block(Box<RawBlock>),
    CheckpointSealed { epoch: u64 },
    Ack,
    Unknown,
}

/// Classify one frame by shape alone
pub fn classify(frame: &serde_json::Value) -> RoutedEvent {
    let parsed: JsonRpcFrame = match serde_json::from_value(frame.clone()) {
        Ok(p) => p,
        Err(_) => return RoutedEvent::Unknown,
    };
    if parsed.is_ack() {
        return RoutedEvent::Ack;
    }
    let result = match parsed.result {
        Some(r) => r,
        None => return RoutedEvent::Unknown,
    };

    // Block events embed the block under result.data.value
    if let Some(block_value) = result.pointer("/data/value/block") {
        if block_value.pointer("/header/height").is_some() {
            if let Ok(block) = serde_json::from_value::<RawBlock>(block_value.clone()) {
                return RoutedEvent::Block(Box::new(block));
            }
            return RoutedEvent::Unknown;
        }
    }

    // Checkpoint-sealed events surface as tx events keyed by the sealed
    // checkpoint attribute, value carrying an epoch_num marker
    if let Some(events) = result.get("events").and_then(|e| e.as_object()) {
        for (key, values) in events {
            if !key.contains("EventCheckpointSealed") {
                continue;
            }
            let candidates = match values.as_array() {
                Some(arr) => arr.iter().filter_map(|v| v.as_str()).collect::<Vec<_>>(),
                None => values.as_str().map(|s| vec![s]).unwrap_or_default(),
            };
            for value in candidates {
                if let Some(epoch) = parse_epoch_num(value) {
                    return RoutedEvent::CheckpointSealed { epoch };
                }
            }
        }
    }

    RoutedEvent::Unknown
}

/// Extract the digits following an `epoch_num` marker
pub fn parse_epoch_num(value: &str) -> Option<u64> {
    let idx = value.find("epoch_num")?;
    let rest = &value[idx + "epoch_num".len()..];
    let digits: String = rest
        .chars()
        .skip_while(|c| !c.is_ascii_digit())
        .take_while(|c| c.is_ascii_digit())
        .collect();
    if digits.is_empty() {
        return None;
    }
    digits.parse().ok()
}

/// Consume the stream fan-out and dispatch to the pipeline channels until
/// cancelled or the stream sender goes away
pub async fn run_router(
    network: Network,
    mut events: broadcast::Receiver<serde_json::Value>,
    block_tx: mpsc::Sender<RawBlock>,
    checkpoint_tx: mpsc::Sender<u64>,
    metrics: Arc<MonitorMetrics>,
    cancel: CancellationToken,
) {
    info!("[Router] {} started", network);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                info!("[Router] {} cancelled", network);
                break;
            }
            frame = events.recv() => {
                match frame {
                    Ok(value) => dispatch(network, &value, &block_tx, &checkpoint_tx).await,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        metrics
                            .events_dropped
                            .with_label_values(&[network.tag(), "overflow"])
                            .inc_by(skipped);
                        warn!(
                            "[Router] {} dropped {} oldest events on overflow; gap catch-up will recover",
                            network, skipped
                        );
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        info!("[Router] {} event channel closed", network);
                        break;
                    }
                }
            }
        }
    }
}

async fn dispatch(
    network: Network,
    frame: &serde_json::Value,
    block_tx: &mpsc::Sender<RawBlock>,
    checkpoint_tx: &mpsc::Sender<u64>,
) {
    match classify(frame) {
        RoutedEvent::Block(block) => {
            let height = block.header.height;
            if block_tx.send(*block).await.is_err() {
                warn!("[Router] {} block pipeline gone, dropping height {}", network, height);
            }
        }
        RoutedEvent::CheckpointSealed { epoch } => {
            info!("[Router] {} checkpoint sealed for epoch {}", network, epoch);
            if checkpoint_tx.send(epoch).await.is_err() {
                warn!("[Router] {} checkpoint pipeline gone, dropping epoch {}", network, epoch);
            }
        }
        RoutedEvent::Ack => debug!("[Router] {} subscription acknowledged", network),
        RoutedEvent::Unknown => debug!("[Router] {} discarding unknown frame shape", network),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_epoch_num_forms() {
        assert_eq!(parse_epoch_num("epoch_num=42"), Some(42));
        assert_eq!(parse_epoch_num(r#"{"epoch_num": "7"}"#), Some(7));
        assert_eq!(parse_epoch_num("prefix epoch_num: 123 suffix"), Some(123));
        assert_eq!(parse_epoch_num("epoch_num="), None);
        assert_eq!(parse_epoch_num("no marker here"), None);
    }

    #[test]
    fn test_classify_ack() {
        let frame = json!({"jsonrpc": "2.0", "id": "newBlock", "result": {}});
        assert!(matches!(classify(&frame), RoutedEvent::Ack));
    }

    #[test]
    fn test_classify_block_event() {
        let frame = json!({
            "jsonrpc": "2.0",
            "id": "newBlock",
            "result": {
                "data": {
                    "type": "tendermint/event/NewBlock",
                    "value": {
                        "block": {
                            "header": {"height": "500", "time": "2025-06-01T00:00:00Z"},
                            "last_commit": {"round": 0, "signatures": []}
                        }
                    }
                }
            }
        });
        match classify(&frame) {
            RoutedEvent::Block(block) => assert_eq!(block.header.height, 500),
            other => panic!("expected block, got {other:?}"),
        }
    }

    #[test]
    fn test_classify_checkpoint_sealed() {
        let frame = json!({
            "jsonrpc": "2.0",
            "id": "checkpoint_for_bls",
            "result": {
                "events": {
                    "babylon.checkpointing.v1.EventCheckpointSealed.checkpoint":
                        ["{\"ckpt\":{\"epoch_num\":\"31\"}}"]
                }
            }
        });
        match classify(&frame) {
            RoutedEvent::CheckpointSealed { epoch } => assert_eq!(epoch, 31),
            other => panic!("expected checkpoint, got {other:?}"),
        }
    }

    #[test]
    fn test_classify_unknown_shapes() {
        assert!(matches!(classify(&json!({"hello": 1})), RoutedEvent::Unknown));
        assert!(matches!(
            classify(&json!({"jsonrpc": "2.0", "result": {"events": {"other.event": ["x"]}}})),
            RoutedEvent::Unknown
        ));
        // A checkpoint key with no parseable epoch is not routed
        assert!(matches!(
            classify(&json!({
                "jsonrpc": "2.0",
                "result": {"events": {"babylon.checkpointing.v1.EventCheckpointSealed.checkpoint": ["garbage"]}}
            })),
            RoutedEvent::Unknown
        ));
    }

    #[tokio::test]
    async fn test_router_dispatches_both_kinds() {
        let (event_tx, event_rx) = broadcast::channel(16);
        let (block_tx, mut block_rx) = mpsc::channel(16);
        let (ckpt_tx, mut ckpt_rx) = mpsc::channel(16);
        let cancel = CancellationToken::new();

        let handle = tokio::spawn(run_router(
            Network::Mainnet,
            event_rx,
            block_tx,
            ckpt_tx,
            Arc::new(MonitorMetrics::new_for_test()),
            cancel.clone(),
        ));

        event_tx
            .send(json!({
                "result": {"data": {"value": {"block": {"header": {"height": "9"}}}}}
            }))
            .unwrap();
        event_tx
            .send(json!({
                "result": {"events": {"a.EventCheckpointSealed.checkpoint": ["epoch_num=3"]}}
            }))
            .unwrap();

        let block = block_rx.recv().await.unwrap();
        assert_eq!(block.header.height, 9);
        assert_eq!(ckpt_rx.recv().await.unwrap(), 3);

        cancel.cancel();
        handle.await.unwrap();
    }
}
