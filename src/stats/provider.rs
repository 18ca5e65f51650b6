// Copyright (c) Babylon Liveness Monitor Contributors
// SPDX-License-Identifier: Apache-2.0

//! Per-finality-provider vote aggregator

use crate::governor::AlertGovernor;
use crate::network::Network;
use crate::store::Store;
use crate::types::{now_ms, FinalityProviderInfo, FinalityProviderStats, FinalityVoteObservation};
use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::warn;

/// Bound on the stored missed-height sequence; oldest evicted first
pub const MISSED_HEIGHTS_LIMIT: usize = 100;
const CACHE_SIZE: usize = 512;

pub struct FinalityProviderAggregator {
    network: Network,
    enabled: bool,
    store: Arc<dyn Store>,
    governor: Arc<AlertGovernor>,
    cache: Mutex<LruCache<String, FinalityProviderStats>>,
}

impl FinalityProviderAggregator {
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
            cache: Mutex::new(LruCache::new(NonZeroUsize::new(CACHE_SIZE).unwrap())),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Fold one height's votes into every active provider's record
    pub async fn process_votes(
        &self,
        obs: &FinalityVoteObservation,
        active: &[FinalityProviderInfo],
    ) {
        if !self.enabled {
            return;
        }
        for provider in active {
            let signed = obs.voters.contains(&provider.btc_pk_hex);
            self.apply(provider, obs.height, signed).await;
        }
    }

    async fn apply(&self, provider: &FinalityProviderInfo, height: u64, signed: bool) {
        let mut stats = self.load(provider, height).await;
        update_provider_stats(&mut stats, height, signed, MISSED_HEIGHTS_LIMIT, now_ms());
        stats.jailed = provider.jailed;
        stats.is_active = provider.is_active;

        if let Err(e) = self.store.upsert_provider_stats(&stats).await {
            warn!(
                "[ProviderStats] {} persist failed for {}: {e:#}",
                self.network, stats.btc_pk_hex
            );
        }
        self.cache
            .lock()
            .await
            .put(stats.btc_pk_hex.clone(), stats.clone());

        self.governor
            .on_provider_stats(&stats, &provider.moniker)
            .await;
    }

    async fn load(&self, provider: &FinalityProviderInfo, height: u64) -> FinalityProviderStats {
        if let Some(stats) = self.cache.lock().await.get(&provider.btc_pk_hex) {
            return stats.clone();
        }
        match self
            .store
            .provider_stats(self.network, &provider.btc_pk_hex)
            .await
        {
            Ok(Some(stats)) => stats,
            Ok(None) => {
                FinalityProviderStats::new(provider.btc_pk_hex.clone(), self.network, height)
            }
            Err(e) => {
                warn!(
                    "[ProviderStats] {} load failed for {}: {e:#}",
                    self.network, provider.btc_pk_hex
                );
                FinalityProviderStats::new(provider.btc_pk_hex.clone(), self.network, height)
            }
        }
    }
}

/// Fold a single `(height, signed)` vote observation into a record
pub fn update_provider_stats(
    stats: &mut FinalityProviderStats,
    height: u64,
    signed: bool,
    missed_cap: usize,
    now: u64,
) {
    stats.total_blocks += 1;
    if signed {
        stats.signed_blocks += 1;
    } else {
        stats.missed_blocks += 1;
        stats.missed_block_heights.push(height);
        if stats.missed_block_heights.len() > missed_cap {
            let excess = stats.missed_block_heights.len() - missed_cap;
            stats.missed_block_heights.drain(0..excess);
        }
    }
    stats.end_height = stats.end_height.max(height);
    stats.signature_rate = if stats.total_blocks > 0 {
        100.0 * stats.signed_blocks as f64 / stats.total_blocks as f64
    } else {
        0.0
    };
    stats.last_updated_ms = now.max(stats.last_updated_ms);
}
