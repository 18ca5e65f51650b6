// Copyright (c) Babylon Liveness Monitor Contributors
// SPDX-License-Identifier: Apache-2.0

//! Per-validator block-signature aggregator

use crate::governor::AlertGovernor;
use crate::network::Network;
use crate::store::Store;
use crate::types::{now_ms, BlockObservation, RecentBlock, ValidatorInfo, ValidatorSignatureStats};
use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::warn;

/// Sliding-window size W
pub const PERFORMANCE_WINDOW: u64 = 10_000;
/// Recent-block sequence bound R
pub const RECENT_BLOCKS_LIMIT: usize = 100;
/// Stats records kept hot in memory
const CACHE_SIZE: usize = 512;

pub struct ValidatorSignatureAggregator {
    network: Network,
    enabled: bool,
    window: u64,
    recent_limit: usize,
    store: Arc<dyn Store>,
    governor: Arc<AlertGovernor>,
    cache: Mutex<LruCache<String, ValidatorSignatureStats>>,
}

impl ValidatorSignatureAggregator {
    pub fn new(
        network: Network,
        enabled: bool,
        store: Arc<dyn Store>,
        governor: Arc<AlertGovernor>,
    ) -> Self {
        Self {
            network,
            enabled,
            window: PERFORMANCE_WINDOW,
            recent_limit: RECENT_BLOCKS_LIMIT,
            store,
            governor,
            cache: Mutex::new(LruCache::new(NonZeroUsize::new(CACHE_SIZE).unwrap())),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Fold one block observation into every known validator's record
    pub async fn process_block(&self, obs: &BlockObservation, validators: &[Arc<ValidatorInfo>]) {
        if !self.enabled {
            return;
        }
        for validator in validators {
            let signed = obs.signers.contains(&validator.consensus_hex);
            self.apply(validator, obs, signed).await;
        }
    }

    async fn apply(&self, validator: &ValidatorInfo, obs: &BlockObservation, signed: bool) {
        let mut stats = self.load(&validator.operator_address).await;
        update_stats(
            &mut stats,
            obs.height,
            obs.timestamp_ms,
            obs.round,
            signed,
            self.window,
            self.recent_limit,
            now_ms(),
        );

        if let Err(e) = self.store.upsert_validator_stats(&stats).await {
            // Memory stays authoritative until the next write succeeds
            warn!(
                "[ValidatorStats] {} persist failed for {}: {e:#}",
                self.network, stats.subject_key
            );
        }
        self.cache
            .lock()
            .await
            .put(stats.subject_key.clone(), stats.clone());

        self.governor
            .on_validator_stats(&stats, &validator.moniker)
            .await;
    }

    async fn load(&self, subject_key: &str) -> ValidatorSignatureStats {
        if let Some(stats) = self.cache.lock().await.get(subject_key) {
            return stats.clone();
        }
        match self.store.validator_stats(self.network, subject_key).await {
            Ok(Some(stats)) => stats,
            Ok(None) => ValidatorSignatureStats::new(subject_key.to_string(), self.network),
            Err(e) => {
                warn!(
                    "[ValidatorStats] {} load failed for {subject_key}: {e:#}",
                    self.network
                );
                ValidatorSignatureStats::new(subject_key.to_string(), self.network)
            }
        }
    }
}

/// Fold a single `(height, signed)` observation into a stats record.
///
/// The window only fills, it never slides: once `total_blocks_in_window`
/// reaches `window` both counters freeze and only the rate recomputation,
/// the consecutive counters and the recent sequence keep moving.
pub fn update_stats(
    stats: &mut ValidatorSignatureStats,
    height: u64,
    timestamp_ms: u64,
    round: u32,
    signed: bool,
    window: u64,
    recent_limit: usize,
    now: u64,
) {
    stats.recent_blocks.insert(
        0,
        RecentBlock {
            height,
            signed,
            round,
            timestamp_ms,
        },
    );
    stats.recent_blocks.truncate(recent_limit);

    if signed {
        stats.consecutive_signed += 1;
        stats.consecutive_missed = 0;
    } else {
        stats.consecutive_missed += 1;
        stats.consecutive_signed = 0;
    }

    stats.total_blocks_in_window = (stats.total_blocks_in_window + 1).min(window);
    if signed && stats.total_blocks_in_window < window {
        stats.total_signed_blocks += 1;
    }

    stats.signature_rate = if stats.total_blocks_in_window > 0 {
        100.0 * stats.total_signed_blocks as f64 / stats.total_blocks_in_window as f64
    } else {
        0.0
    };
    stats.last_updated_ms = now.max(stats.last_updated_ms);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alert::testing::RecordingSink;
    use crate::alert::Severity;
    use crate::governor::GovernorConfig;
    use crate::metrics::MonitorMetrics;
    use crate::store::MemoryStore;

    fn observation(height: u64, signers: &[&str]) -> BlockObservation {
        BlockObservation {
            height,
            timestamp_ms: height * 1000,
            round: 0,
            signers: signers.iter().map(|s| s.to_string()).collect(),
        }
    }

    fn validator(op: &str, hexaddr: &str) -> Arc<ValidatorInfo> {
        Arc::new(ValidatorInfo {
            operator_address: op.to_string(),
            consensus_address: format!("bbnvalcons{op}"),
            consensus_hex: hexaddr.to_string(),
            moniker: format!("moniker-{op}"),
            jailed: false,
        })
    }

    fn harness() -> (ValidatorSignatureAggregator, Arc<RecordingSink>, Arc<MemoryStore>) {
        let sink = Arc::new(RecordingSink::default());
        let store = Arc::new(MemoryStore::default());
        let governor = Arc::new(AlertGovernor::new(
            Network::Mainnet,
            GovernorConfig::default(),
            sink.clone(),
            Arc::new(MonitorMetrics::new_for_test()),
        ));
        let agg = ValidatorSignatureAggregator::new(
            Network::Mainnet,
            true,
            store.clone(),
            governor,
        );
        (agg, sink, store)
    }

    #[tokio::test]
    async fn test_all_signed_run() {
        let (agg, _sink, store) = harness();
        let v1 = validator("1v", "AA11");

        for height in 100..200 {
            agg.process_block(&observation(height, &["AA11"]), &[v1.clone()]).await;
        }

        let stats = store
            .validator_stats(Network::Mainnet, "1v")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stats.total_blocks_in_window, 100);
        assert_eq!(stats.total_signed_blocks, 100);
        assert_eq!(stats.signature_rate, 100.0);
        assert_eq!(stats.consecutive_signed, 100);
        assert_eq!(stats.consecutive_missed, 0);
        assert_eq!(stats.recent_blocks.len(), 100);
    }

    #[tokio::test]
    async fn test_drop_to_low_emits_one_low_and_one_critical() {
        let (agg, sink, store) = harness();
        let v2 = validator("2v", "BB22");

        for height in 0..200 {
            agg.process_block(&observation(height, &["BB22"]), &[v2.clone()]).await;
        }
        for height in 200..250 {
            agg.process_block(&observation(height, &[]), &[v2.clone()]).await;
        }

        let stats = store
            .validator_stats(Network::Mainnet, "2v")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stats.total_blocks_in_window, 250);
        assert_eq!(stats.total_signed_blocks, 200);
        assert!((stats.signature_rate - 80.0).abs() < f64::EPSILON);
        assert_eq!(stats.consecutive_missed, 50);
        assert_eq!(stats.consecutive_signed, 0);

        let severities = sink.severities().await;
        assert_eq!(
            severities.iter().filter(|s| **s == Severity::Warning).count(),
            1,
            "exactly one LOW alert"
        );
        assert_eq!(
            severities.iter().filter(|s| **s == Severity::Critical).count(),
            1,
            "exactly one consecutive-miss CRITICAL"
        );
    }

    #[tokio::test]
    async fn test_recovery_scenario() {
        let (agg, sink, store) = harness();
        let v = validator("3v", "CC33");

        // 200 signed, 50 missed (as in the drop scenario)
        for height in 0..200 {
            agg.process_block(&observation(height, &["CC33"]), &[v.clone()]).await;
        }
        for height in 200..250 {
            agg.process_block(&observation(height, &[]), &[v.clone()]).await;
        }

        // 50 signed: rate ~83.3, still below threshold, critical flag cleared
        for height in 250..300 {
            agg.process_block(&observation(height, &["CC33"]), &[v.clone()]).await;
        }
        let stats = store.validator_stats(Network::Mainnet, "3v").await.unwrap().unwrap();
        assert!((stats.signature_rate - 100.0 * 250.0 / 300.0).abs() < 0.01);
        assert_eq!(stats.consecutive_signed, 50);
        assert_eq!(stats.consecutive_missed, 0);
        let infos_before = sink
            .severities()
            .await
            .iter()
            .filter(|s| **s == Severity::Info)
            .count();
        assert_eq!(infos_before, 0, "no recovery while below threshold");

        // 50 more signed: ~86.7, still below
        for height in 300..350 {
            agg.process_block(&observation(height, &["CC33"]), &[v.clone()]).await;
        }
        let infos = sink
            .severities()
            .await
            .iter()
            .filter(|s| **s == Severity::Info)
            .count();
        assert_eq!(infos, 0);

        // 150 more signed: ~91.3 crosses the threshold, one recovery
        for height in 350..500 {
            agg.process_block(&observation(height, &["CC33"]), &[v.clone()]).await;
        }
        let stats = store.validator_stats(Network::Mainnet, "3v").await.unwrap().unwrap();
        assert!((stats.signature_rate - 100.0 * 450.0 / 500.0).abs() < 0.01);
        let infos = sink
            .severities()
            .await
            .iter()
            .filter(|s| **s == Severity::Info)
            .count();
        assert_eq!(infos, 1, "recovery fired exactly once");
    }

    #[tokio::test]
    async fn test_disabled_aggregator_ignores_observations() {
        let sink = Arc::new(RecordingSink::default());
        let store = Arc::new(MemoryStore::default());
        let governor = Arc::new(AlertGovernor::new(
            Network::Mainnet,
            GovernorConfig::default(),
            sink.clone(),
            Arc::new(MonitorMetrics::new_for_test()),
        ));
        let agg =
            ValidatorSignatureAggregator::new(Network::Mainnet, false, store.clone(), governor);
        assert!(!agg.is_enabled());

        agg.process_block(&observation(1, &["AA"]), &[validator("1v", "AA")]).await;
        assert!(store.validator_stats(Network::Mainnet, "1v").await.unwrap().is_none());
    }

    #[test]
    fn test_window_saturation_freezes_signed_counter() {
        let mut stats = ValidatorSignatureStats::new("v".into(), Network::Mainnet);
        let window = 10;

        for height in 0..20 {
            update_stats(&mut stats, height, 0, 0, true, window, 5, height);
        }
        assert_eq!(stats.total_blocks_in_window, 10);
        // Counting stops as the window saturates; documented drift
        assert_eq!(stats.total_signed_blocks, 9);
        assert_eq!(stats.recent_blocks.len(), 5);
        assert_eq!(stats.consecutive_signed, 20);
    }

    #[test]
    fn test_exactly_one_consecutive_counter_is_zero() {
        let mut stats = ValidatorSignatureStats::new("v".into(), Network::Mainnet);
        let pattern = [true, true, false, false, true, false, true];
        for (i, signed) in pattern.iter().enumerate() {
            update_stats(&mut stats, i as u64, 0, 0, *signed, 100, 10, i as u64);
            assert!(
                (stats.consecutive_signed == 0) ^ (stats.consecutive_missed == 0),
                "exactly one counter must be zero after update {i}"
            );
        }
    }

    #[test]
    fn test_recent_blocks_newest_first() {
        let mut stats = ValidatorSignatureStats::new("v".into(), Network::Mainnet);
        for height in [5, 6, 7, 8] {
            update_stats(&mut stats, height, 0, 0, true, 100, 3, height);
        }
        let heights: Vec<u64> = stats.recent_blocks.iter().map(|b| b.height).collect();
        assert_eq!(heights, vec![8, 7, 6]);
    }

    #[test]
    fn test_replay_is_deterministic() {
        let run = || {
            let mut stats = ValidatorSignatureStats::new("v".into(), Network::Mainnet);
            for height in 0..50 {
                update_stats(&mut stats, height, height * 10, 0, height % 3 != 0, 100, 20, height);
            }
            stats
        };
        assert_eq!(run(), run());
    }

    #[test]
    fn test_last_updated_is_monotonic() {
        let mut stats = ValidatorSignatureStats::new("v".into(), Network::Mainnet);
        update_stats(&mut stats, 1, 0, 0, true, 100, 10, 1000);
        assert_eq!(stats.last_updated_ms, 1000);
        // An earlier clock reading never rewinds the stamp
        update_stats(&mut stats, 2, 0, 0, true, 100, 10, 900);
        assert_eq!(stats.last_updated_ms, 1000);
        update_stats(&mut stats, 3, 0, 0, true, 100, 10, 1100);
        assert_eq!(stats.last_updated_ms, 1100);
    }
}
