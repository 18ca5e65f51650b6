// Copyright (c) Babylon Liveness Monitor Contributors
// SPDX-License-Identifier: Apache-2.0

//! Checkpoint pipeline: per-epoch BLS vote extraction
//!
//! A sealed-checkpoint event names an epoch; the injected checkpoint
//! transaction lands within a few blocks of the epoch's first height. The
//! pipeline scans those offsets, extracts the extended commit votes and
//! emits one observation per epoch, at most once per process lifetime. An
//! epoch whose checkpoint cannot be found is left unmarked and will only be
//! retried if a fresh event arrives.

use crate::directory::Directory;
use crate::gateway::types::{BlockTxsResponse, InjectedCheckpoint, INJECTED_CHECKPOINT_TYPE_URL};
use crate::gateway::RestClient;
use crate::metrics::MonitorMetrics;
use crate::network::Network;
use crate::pipeline::EpochTracker;
use crate::stats::BlsCheckpointAggregator;
use crate::types::{CheckpointObservation, CheckpointVote};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Block offsets from the epoch's first height scanned for the checkpoint tx
pub const CHECKPOINT_SCAN_OFFSETS: u64 = 5;

/// Label for vote entries the directory cannot resolve
pub const UNKNOWN_VALIDATOR: &str = "Unknown";

pub struct CheckpointPipeline {
    network: Network,
    rest: Arc<RestClient>,
    directory: Arc<Directory>,
    aggregator: Arc<BlsCheckpointAggregator>,
    epoch_tracker: Arc<EpochTracker>,
    metrics: Arc<MonitorMetrics>,
    processed_epochs: Mutex<HashSet<u64>>,
}

impl CheckpointPipeline {
    pub fn new(
        network: Network,
        rest: Arc<RestClient>,
        directory: Arc<Directory>,
        aggregator: Arc<BlsCheckpointAggregator>,
        epoch_tracker: Arc<EpochTracker>,
        metrics: Arc<MonitorMetrics>,
    ) -> Self {
        Self {
            network,
            rest,
            directory,
            aggregator,
            epoch_tracker,
            metrics,
            processed_epochs: Mutex::new(HashSet::new()),
        }
    }

    /// Consume sealed-epoch events until cancelled
    pub async fn run(&self, mut epoch_rx: mpsc::Receiver<u64>, cancel: CancellationToken) {
        info!("[CheckpointPipeline] {} started", self.network);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("[CheckpointPipeline] {} cancelled", self.network);
                    break;
                }
                event = epoch_rx.recv() => {
                    match event {
                        Some(epoch) => self.handle_sealed(epoch).await,
                        None => {
                            info!("[CheckpointPipeline] {} event channel closed", self.network);
                            break;
                        }
                    }
                }
            }
        }
    }

    /// Resolve one sealed epoch into a checkpoint observation
    pub async fn handle_sealed(&self, epoch: u64) {
        if !self.aggregator.is_enabled() {
            return;
        }
        if self.processed_epochs.lock().await.contains(&epoch) {
            debug!("[CheckpointPipeline] {} epoch {} already processed", self.network, epoch);
            return;
        }

        let first_height = self.epoch_tracker.first_height_of(epoch);
        for offset in 0..CHECKPOINT_SCAN_OFFSETS {
            let height = first_height + offset;
            let txs = match self.rest.txs_at_block(height).await {
                Ok(txs) => txs,
                Err(e) => {
                    warn!(
                        "[CheckpointPipeline] {} tx fetch failed at {}: {e}",
                        self.network, height
                    );
                    continue;
                }
            };
            let checkpoint = match find_injected_checkpoint(&txs) {
                Some(ckpt) => ckpt,
                None => {
                    debug!(
                        "[CheckpointPipeline] {} no checkpoint at {} (offset {})",
                        self.network, height, offset
                    );
                    continue;
                }
            };

            let observation = self.build_observation(epoch, checkpoint).await;
            info!(
                "[CheckpointPipeline] {} epoch {} checkpoint found at height {} with {} votes",
                self.network,
                observation.epoch,
                height,
                observation.votes.len()
            );
            self.aggregator.process_checkpoint(&observation).await;
            self.processed_epochs.lock().await.insert(epoch);
            self.metrics
                .checkpoints_processed
                .with_label_values(&[self.network.tag()])
                .inc();
            return;
        }

        warn!(
            "[CheckpointPipeline] {} no checkpoint for epoch {} within {} blocks of {}",
            self.network, epoch, CHECKPOINT_SCAN_OFFSETS, first_height
        );
    }

    /// The embedded epoch number is authoritative over the event's
    async fn build_observation(
        &self,
        event_epoch: u64,
        checkpoint: InjectedCheckpoint,
    ) -> CheckpointObservation {
        let epoch = checkpoint
            .ckpt
            .as_ref()
            .and_then(|meta| meta.ckpt.as_ref())
            .map(|raw| raw.epoch_num)
            .filter(|e| *e > 0)
            .unwrap_or(event_epoch);

        let mut votes = Vec::with_capacity(checkpoint.extended_commit_info.votes.len());
        for vote in checkpoint.extended_commit_info.votes {
            let signed = vote.is_signed();
            let validator = match vote.validator {
                Some(v) if !v.address.is_empty() => v,
                _ => continue,
            };
            // The vote address is used verbatim as the lookup key; entries
            // the directory cannot resolve keep their power but are labeled
            // unknown
            let moniker = match self.directory.lookup_validator(&validator.address).await {
                Some(record) => record.moniker.clone(),
                None => UNKNOWN_VALIDATOR.to_string(),
            };
            votes.push(CheckpointVote {
                address: validator.address,
                moniker,
                power: validator.power,
                signed,
            });
        }
        CheckpointObservation { epoch, votes }
    }

    #[cfg(test)]
    async fn is_processed(&self, epoch: u64) -> bool {
        self.processed_epochs.lock().await.contains(&epoch)
    }
}

/// First message across the block's transactions with the injected
/// checkpoint type URI and a present vote vector
pub fn find_injected_checkpoint(txs: &BlockTxsResponse) -> Option<InjectedCheckpoint> {
    for tx in &txs.txs {
        for message in &tx.body.messages {
            let type_url = message.get("@type").and_then(|t| t.as_str()).unwrap_or("");
            if type_url != INJECTED_CHECKPOINT_TYPE_URL {
                continue;
            }
            let has_votes = message
                .pointer("/extended_commit_info/votes")
                .or_else(|| message.pointer("/extendedCommitInfo/votes"))
                .is_some();
            if !has_votes {
                continue;
            }
            match serde_json::from_value::<InjectedCheckpoint>(message.clone()) {
                Ok(ckpt) => return Some(ckpt),
                Err(e) => {
                    debug!("[CheckpointPipeline] checkpoint message failed to decode: {e}");
                    continue;
                }
            }
        }
    }
    None
}
