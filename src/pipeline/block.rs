// Copyright (c) Babylon Liveness Monitor Contributors
// SPDX-License-Identifier: Apache-2.0

//! Block pipeline: ordered per-height processing with finality lag
//!
//! Heights arrive from the stream in whatever order reconnections produce
//! them; the pipeline holds them in a priority queue and only processes a
//! height once it sits at least the finality lag behind the highest height
//! seen, in strictly ascending order, exactly once per process lifetime.
//! Startup runs a bounded catch-up from the stored watermark over REST.

use crate::directory::Directory;
use crate::encoding::normalize_signer_address;
use crate::error::MonitorResult;
use crate::gateway::types::{parse_rfc3339_ms, CommitSignature, RawBlock};
use crate::gateway::RestClient;
use crate::metrics::MonitorMetrics;
use crate::network::Network;
use crate::pipeline::EpochTracker;
use crate::stats::{FinalityProviderAggregator, ValidatorSignatureAggregator};
use crate::store::Store;
use crate::types::{BlockObservation, FinalityVoteObservation};
use lru::LruCache;
use std::cmp::Reverse;
use std::collections::{BTreeSet, BinaryHeap, HashMap, HashSet};
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Maximum heights replayed per catch-up invocation
pub const MAX_SYNC_BLOCKS: u64 = 100;
/// Processed blocks between current-epoch refreshes
pub const EPOCH_REFRESH_INTERVAL: u64 = 50;
/// Bound on the processed-height cache; oldest half evicted when exceeded
const PROCESSED_CACHE_CAP: usize = 10_000;
/// Heights of cached finality-provider vote sets
const FP_VOTE_CACHE_SIZE: usize = 256;

/// Bounded set of already-processed heights
#[derive(Debug, Default)]
struct ProcessedHeights {
    set: BTreeSet<u64>,
    cap: usize,
}

impl ProcessedHeights {
    fn with_cap(cap: usize) -> Self {
        Self {
            set: BTreeSet::new(),
            cap,
        }
    }

    fn contains(&self, height: u64) -> bool {
        self.set.contains(&height)
    }

    fn insert(&mut self, height: u64) {
        self.set.insert(height);
        if self.set.len() > self.cap {
            // Evict the oldest half in one split
            let keep_from = self
                .set
                .iter()
                .nth(self.cap / 2)
                .copied()
                .unwrap_or(height);
            self.set = self.set.split_off(&keep_from);
        }
    }

    fn len(&self) -> usize {
        self.set.len()
    }
}

/// Parsed block payload waiting for its finality lag
#[derive(Debug, Clone)]
struct PendingBlock {
    height: u64,
    timestamp_ms: u64,
    round: u32,
    signatures: Vec<CommitSignature>,
}

impl PendingBlock {
    fn from_raw(block: RawBlock) -> Self {
        let timestamp_ms = block
            .header
            .time
            .as_deref()
            .and_then(parse_rfc3339_ms)
            .unwrap_or(0);
        let (round, signatures) = match block.last_commit {
            Some(commit) => (commit.round, commit.signatures),
            None => (0, Vec::new()),
        };
        Self {
            height: block.header.height,
            timestamp_ms,
            round,
            signatures,
        }
    }
}

#[derive(Default)]
struct PipelineState {
    pending: BinaryHeap<Reverse<u64>>,
    queued: HashSet<u64>,
    payloads: HashMap<u64, PendingBlock>,
    watermark: u64,
    max_seen: u64,
    processed: ProcessedHeights,
    blocks_since_epoch_refresh: u64,
}

pub struct BlockPipeline {
    network: Network,
    finality_lag: u64,
    rest: Arc<RestClient>,
    directory: Arc<Directory>,
    store: Arc<dyn Store>,
    metrics: Arc<MonitorMetrics>,
    validator_agg: Arc<ValidatorSignatureAggregator>,
    provider_agg: Arc<FinalityProviderAggregator>,
    epoch_tracker: Arc<EpochTracker>,
    state: Mutex<PipelineState>,
    draining: AtomicBool,
    fp_vote_cache: Mutex<LruCache<u64, HashSet<String>>>,
}

impl BlockPipeline {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        network: Network,
        finality_lag: u64,
        rest: Arc<RestClient>,
        directory: Arc<Directory>,
        store: Arc<dyn Store>,
        metrics: Arc<MonitorMetrics>,
        validator_agg: Arc<ValidatorSignatureAggregator>,
        provider_agg: Arc<FinalityProviderAggregator>,
        epoch_tracker: Arc<EpochTracker>,
    ) -> Self {
        let mut state = PipelineState::default();
        state.processed = ProcessedHeights::with_cap(PROCESSED_CACHE_CAP);
        Self {
            network,
            finality_lag,
            rest,
            directory,
            store,
            metrics,
            validator_agg,
            provider_agg,
            epoch_tracker,
            state: Mutex::new(state),
            draining: AtomicBool::new(false),
            fp_vote_cache: Mutex::new(LruCache::new(
                NonZeroUsize::new(FP_VOTE_CACHE_SIZE).unwrap(),
            )),
        }
    }

    /// Consume block events until cancelled; runs the catch-up first
    pub async fn run(&self, mut block_rx: mpsc::Receiver<RawBlock>, cancel: CancellationToken) {
        if let Err(e) = self.initial_sync().await {
            warn!("[BlockPipeline] {} initial sync failed: {e}", self.network);
        }
        info!("[BlockPipeline] {} started", self.network);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("[BlockPipeline] {} cancelled", self.network);
                    break;
                }
                event = block_rx.recv() => {
                    match event {
                        Some(block) => self.handle_event(block).await,
                        None => {
                            info!("[BlockPipeline] {} event channel closed", self.network);
                            break;
                        }
                    }
                }
            }
        }
    }

    /// Enqueue one stream event and drain whatever became eligible
    pub async fn handle_event(&self, block: RawBlock) {
        self.enqueue(PendingBlock::from_raw(block)).await;
        self.drain().await;
    }

    async fn enqueue(&self, block: PendingBlock) {
        let mut state = self.state.lock().await;
        let height = block.height;
        state.max_seen = state.max_seen.max(height);

        if height <= state.watermark && state.watermark > 0 {
            debug!(
                "[BlockPipeline] {} dropping {} at or below watermark {}",
                self.network, height, state.watermark
            );
            return;
        }
        if state.processed.contains(height) || state.queued.contains(&height) {
            debug!("[BlockPipeline] {} dropping duplicate height {}", self.network, height);
            return;
        }
        state.queued.insert(height);
        state.pending.push(Reverse(height));
        state.payloads.insert(height, block);
    }

    /// Process every eligible pending height in ascending order. Re-entrant
    /// calls return immediately; one worker drains at a time.
    pub async fn drain(&self) {
        if self.draining.swap(true, Ordering::SeqCst) {
            return;
        }
        loop {
            let next = {
                let mut state = self.state.lock().await;
                let eligible = match state.pending.peek() {
                    Some(Reverse(height)) if *height + self.finality_lag <= state.max_seen => {
                        Some(*height)
                    }
                    _ => None,
                };
                match eligible {
                    Some(height) => {
                        state.pending.pop();
                        state.queued.remove(&height);
                        state.payloads.remove(&height)
                    }
                    None => None,
                }
            };
            match next {
                Some(block) => self.process_block(block).await,
                None => break,
            }
        }
        self.draining.store(false, Ordering::SeqCst);
    }

    /// One height through extraction, aggregation and watermark advance
    async fn process_block(&self, block: PendingBlock) {
        let height = block.height;
        let signers: HashSet<String> = block
            .signatures
            .iter()
            .filter(|sig| sig.is_signed())
            .filter_map(|sig| normalize_signer_address(&sig.validator_address))
            .collect();

        let observation = BlockObservation {
            height,
            timestamp_ms: block.timestamp_ms,
            round: block.round,
            signers,
        };

        let validators = self.directory.validators_snapshot().await;
        if !validators.is_empty() {
            self.validator_agg
                .process_block(&observation, &validators)
                .await;
        }

        if self.provider_agg.is_enabled() {
            self.process_finality_votes(height).await;
        }

        let refresh_due = {
            let mut state = self.state.lock().await;
            state.watermark = state.watermark.max(height);
            state.processed.insert(height);
            state.blocks_since_epoch_refresh += 1;
            if state.blocks_since_epoch_refresh >= EPOCH_REFRESH_INTERVAL {
                state.blocks_since_epoch_refresh = 0;
                true
            } else {
                false
            }
        };
        if refresh_due {
            self.refresh_epoch().await;
        }

        if let Err(e) = self
            .store
            .set_latest_processed_height(self.network, height)
            .await
        {
            warn!("[BlockPipeline] {} watermark persist failed: {e:#}", self.network);
        }
        self.metrics
            .blocks_processed
            .with_label_values(&[self.network.tag()])
            .inc();
        self.metrics
            .last_processed_height
            .with_label_values(&[self.network.tag()])
            .set(height as i64);
        debug!("[BlockPipeline] {} processed height {}", self.network, height);
    }

    /// Separate extraction path for finality-provider votes; failures skip
    /// the height for providers only
    async fn process_finality_votes(&self, height: u64) {
        let voters = match self.fp_votes(height).await {
            Ok(voters) => voters,
            Err(e) => {
                warn!(
                    "[BlockPipeline] {} vote fetch failed at {}: {e}",
                    self.network, height
                );
                return;
            }
        };
        let active = match self.directory.active_finality_providers(height).await {
            Ok(active) => active,
            Err(e) => {
                warn!(
                    "[BlockPipeline] {} active provider fetch failed at {}: {e}",
                    self.network, height
                );
                return;
            }
        };
        let observation = FinalityVoteObservation { height, voters };
        self.provider_agg.process_votes(&observation, &active).await;
    }

    async fn fp_votes(&self, height: u64) -> MonitorResult<HashSet<String>> {
        if let Some(cached) = self.fp_vote_cache.lock().await.get(&height) {
            return Ok(cached.clone());
        }
        let response = self.rest.finality_votes(height).await?;
        let voters: HashSet<String> = response
            .btc_pks
            .into_iter()
            .map(|pk| pk.to_ascii_lowercase())
            .collect();
        self.fp_vote_cache.lock().await.put(height, voters.clone());
        Ok(voters)
    }

    async fn refresh_epoch(&self) {
        match self.rest.current_epoch().await {
            Ok(response) => {
                debug!(
                    "[BlockPipeline] {} current epoch {} (boundary {})",
                    self.network, response.current_epoch, response.epoch_boundary
                );
                self.epoch_tracker.update(&response);
            }
            Err(e) => warn!("[BlockPipeline] {} epoch refresh failed: {e}", self.network),
        }
    }

    /// Replay the gap between the stored watermark and the finalized tip,
    /// bounded per invocation; the live stream closes any remainder
    pub async fn initial_sync(&self) -> MonitorResult<()> {
        let tip = self.rest.current_height().await?;
        let last_stored = self.store.latest_processed_height(self.network).await.ok().flatten();

        let range = sync_range(last_stored, tip, self.finality_lag, MAX_SYNC_BLOCKS);
        {
            let mut state = self.state.lock().await;
            state.max_seen = state.max_seen.max(tip);
            if let Some(last) = last_stored {
                state.watermark = state.watermark.max(last);
            }
        }
        self.refresh_epoch().await;

        let (start, end) = match range {
            Some(range) => range,
            None => {
                info!("[BlockPipeline] {} no catch-up needed at tip {}", self.network, tip);
                return Ok(());
            }
        };
        info!(
            "[BlockPipeline] {} catching up heights {}..={} (tip {})",
            self.network, start, end, tip
        );

        for height in start..=end {
            {
                let state = self.state.lock().await;
                if state.processed.contains(height) {
                    continue;
                }
            }
            match self.rest.block_at(height).await {
                Ok(envelope) => {
                    self.process_block(PendingBlock::from_raw(envelope.block)).await;
                }
                Err(e) => {
                    warn!(
                        "[BlockPipeline] {} catch-up fetch failed at {}: {e}",
                        self.network, height
                    );
                }
            }
        }
        Ok(())
    }

    /// Current watermark; heights at or below it are settled
    pub async fn watermark(&self) -> u64 {
        self.state.lock().await.watermark
    }

    #[cfg(test)]
    async fn pending_len(&self) -> usize {
        self.state.lock().await.pending.len()
    }

    #[cfg(test)]
    async fn processed_len(&self) -> usize {
        self.state.lock().await.processed.len()
    }
}

/// Catch-up bounds: `[max(last+1, tip - lag - max_sync), tip - lag]`,
/// or None when there is nothing to replay
pub fn sync_range(
    last_stored: Option<u64>,
    tip: u64,
    finality_lag: u64,
    max_sync: u64,
) -> Option<(u64, u64)> {
    let end = tip.checked_sub(finality_lag)?;
    let floor = tip.saturating_sub(finality_lag + max_sync);
    let start = match last_stored {
        Some(last) => (last + 1).max(floor),
        None => floor.max(1),
    };
    if start > end {
        return None;
    }
    Some((start, end))
}
