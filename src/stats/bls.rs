// Copyright (c) Babylon Liveness Monitor Contributors
// SPDX-License-Identifier: Apache-2.0

//! BLS checkpoint aggregator
//!
//! Checkpoint observations arrive already aggregated per epoch; this
//! component derives the stats record, persists it and notifies the
//! governor. There is no online accumulation across epochs.

use crate::governor::AlertGovernor;
use crate::network::Network;
use crate::store::Store;
use crate::types::{now_ms, BlsCheckpointStats, CheckpointObservation};
use std::sync::Arc;
use tracing::{info, warn};

pub struct BlsCheckpointAggregator {
    network: Network,
    enabled: bool,
    store: Arc<dyn Store>,
    governor: Arc<AlertGovernor>,
}

impl BlsCheckpointAggregator {
    pub fn new(
        network: Network,
        enabled: bool,
        store: Arc<dyn Store>,
        governor: Arc<AlertGovernor>,
    ) -> Self {
        Self {
            network,
            enabled,
            store,
            governor,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub async fn process_checkpoint(&self, obs: &CheckpointObservation) {
        if !self.enabled {
            return;
        }
        let stats = BlsCheckpointStats::from_observation(obs, self.network, now_ms());
        info!(
            "[BlsStats] {} epoch {}: {} validators, {} by power, {} by count",
            self.network,
            stats.epoch,
            stats.total_validators,
            stats.rate_by_power_display(),
            stats.rate_by_count_display()
        );

        if let Err(e) = self.store.upsert_checkpoint_stats(&stats).await {
            warn!(
                "[BlsStats] {} persist failed for epoch {}: {e:#}",
                self.network, stats.epoch
            );
        }
        self.governor.on_checkpoint(obs, &stats).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alert::testing::RecordingSink;
    use crate::governor::GovernorConfig;
    use crate::metrics::MonitorMetrics;
    use crate::store::MemoryStore;
    use crate::types::CheckpointVote;

    fn harness(enabled: bool) -> (BlsCheckpointAggregator, Arc<RecordingSink>, Arc<MemoryStore>) {
        let sink = Arc::new(RecordingSink::default());
        let store = Arc::new(MemoryStore::default());
        let governor = Arc::new(AlertGovernor::new(
            Network::Mainnet,
            GovernorConfig::default(),
            sink.clone(),
            Arc::new(MonitorMetrics::new_for_test()),
        ));
        let agg = BlsCheckpointAggregator::new(Network::Mainnet, enabled, store.clone(), governor);
        (agg, sink, store)
    }

    fn observation() -> CheckpointObservation {
        CheckpointObservation {
            epoch: 11,
            votes: vec![
                CheckpointVote {
                    address: "a".into(),
                    moniker: "a".into(),
                    power: 60,
                    signed: true,
                },
                CheckpointVote {
                    address: "b".into(),
                    moniker: "b".into(),
                    power: 40,
                    signed: false,
                },
            ],
        }
    }

    #[tokio::test]
    async fn test_checkpoint_persisted_and_alerted() {
        let (agg, sink, store) = harness(true);
        agg.process_checkpoint(&observation()).await;

        let stats = store
            .checkpoint_stats(Network::Mainnet, 11)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stats.total_power, 100);
        assert_eq!(stats.signed_power, 60);
        assert_eq!(stats.unsigned_power, 40);
        // 60% by power is below 90: governor produced the aggregate warning
        // plus the per-validator critical for b
        assert!(sink.count().await >= 2);
    }

    #[tokio::test]
    async fn test_disabled_does_nothing() {
        let (agg, sink, store) = harness(false);
        agg.process_checkpoint(&observation()).await;
        assert!(store.checkpoint_stats(Network::Mainnet, 11).await.unwrap().is_none());
        assert_eq!(sink.count().await, 0);
    }
}
