// Copyright (c) Babylon Liveness Monitor Contributors
// SPDX-License-Identifier: Apache-2.0

//! Record families shared across pipelines, aggregators and the store
//!
//! Observations are produced by the pipelines, statistics are maintained by
//! the aggregators and persisted through the repository abstraction. All
//! persisted records round-trip through serde.

use crate::network::Network;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::{SystemTime, UNIX_EPOCH};

/// Current wall-clock time in milliseconds since the Unix epoch
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

// ============================================================================
// Identity records
// ============================================================================

/// A consensus validator, addressable by any of its three key forms
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidatorInfo {
    /// Operator address (bech32, `bbnvaloper...`)
    pub operator_address: String,
    /// Consensus address (bech32, `bbnvalcons...`), derived from the key
    pub consensus_address: String,
    /// Consensus address as uppercase hex (the form commit signatures carry)
    pub consensus_hex: String,
    pub moniker: String,
    pub jailed: bool,
}

impl ValidatorInfo {
    /// All key forms that resolve to this record
    pub fn keys(&self) -> [&str; 3] {
        [
            &self.operator_address,
            &self.consensus_address,
            &self.consensus_hex,
        ]
    }
}

/// A BTC-staking finality provider, keyed by its BTC public key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinalityProviderInfo {
    /// BTC public key, lowercase hex
    pub btc_pk_hex: String,
    pub owner_address: String,
    pub moniker: String,
    pub jailed: bool,
    pub is_active: bool,
}

/// A jailed/active flag change observed during a directory refresh
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JailedTransition {
    pub subject_key: String,
    pub moniker: String,
    pub jailed: bool,
    /// True when the subject is a finality provider, false for a validator
    pub is_finality_provider: bool,
}

// ============================================================================
// Observations
// ============================================================================

/// Per-height observation of the validator commit, produced by the block
/// pipeline in strictly ascending height order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockObservation {
    pub height: u64,
    pub timestamp_ms: u64,
    pub round: u32,
    /// Consensus hex addresses that signed with the commit flag
    pub signers: HashSet<String>,
}

/// Per-height observation of finality-provider votes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinalityVoteObservation {
    pub height: u64,
    /// BTC public keys (lowercase hex) that voted at this height
    pub voters: HashSet<String>,
}

/// One validator's vote inside an injected BLS checkpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointVote {
    /// Address exactly as carried by the vote (see directory lookup notes)
    pub address: String,
    pub moniker: String,
    pub power: u64,
    pub signed: bool,
}

/// Per-epoch observation of the injected BLS checkpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointObservation {
    pub epoch: u64,
    pub votes: Vec<CheckpointVote>,
}

impl CheckpointObservation {
    pub fn total_power(&self) -> u64 {
        self.votes.iter().map(|v| v.power).sum()
    }

    pub fn signed_power(&self) -> u64 {
        self.votes.iter().filter(|v| v.signed).map(|v| v.power).sum()
    }
}

// ============================================================================
// Statistics records
// ============================================================================

/// One entry of the bounded newest-first recent-block sequence
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecentBlock {
    pub height: u64,
    pub signed: bool,
    pub round: u32,
    pub timestamp_ms: u64,
}

/// Sliding-window signature statistics for one validator
///
/// Once `total_blocks_in_window` saturates at the window size,
/// `total_signed_blocks` is held constant rather than re-derived from an
/// evicted window, so the rate drifts from a true sliding average past that
/// point. This matches the documented accounting and must not be "fixed"
/// without a recorded decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidatorSignatureStats {
    /// Operator address; the stable subject key for this record family
    pub subject_key: String,
    pub network: Network,
    pub total_signed_blocks: u64,
    pub total_blocks_in_window: u64,
    /// Percentage in [0, 100]
    pub signature_rate: f64,
    pub consecutive_signed: u64,
    pub consecutive_missed: u64,
    /// Newest-first, bounded by the recent limit
    pub recent_blocks: Vec<RecentBlock>,
    pub last_updated_ms: u64,
}

impl ValidatorSignatureStats {
    pub fn new(subject_key: String, network: Network) -> Self {
        Self {
            subject_key,
            network,
            total_signed_blocks: 0,
            total_blocks_in_window: 0,
            signature_rate: 0.0,
            consecutive_signed: 0,
            consecutive_missed: 0,
            recent_blocks: Vec::new(),
            last_updated_ms: 0,
        }
    }
}

/// Vote statistics for one finality provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinalityProviderStats {
    pub btc_pk_hex: String,
    pub network: Network,
    pub start_height: u64,
    pub end_height: u64,
    pub total_blocks: u64,
    pub signed_blocks: u64,
    pub missed_blocks: u64,
    /// Percentage in [0, 100]
    pub signature_rate: f64,
    /// Ascending, bounded; newest heights retained on overflow
    pub missed_block_heights: Vec<u64>,
    pub jailed: bool,
    pub is_active: bool,
    pub last_updated_ms: u64,
}

impl FinalityProviderStats {
    pub fn new(btc_pk_hex: String, network: Network, height: u64) -> Self {
        Self {
            btc_pk_hex,
            network,
            start_height: height,
            end_height: height,
            total_blocks: 0,
            signed_blocks: 0,
            missed_blocks: 0,
            signature_rate: 0.0,
            missed_block_heights: Vec::new(),
            jailed: false,
            is_active: true,
            last_updated_ms: 0,
        }
    }

    /// Count of misses among the last `n` observed heights
    pub fn misses_in_last(&self, n: u64) -> usize {
        let cutoff = self.end_height.saturating_sub(n.saturating_sub(1));
        self.missed_block_heights
            .iter()
            .filter(|h| **h >= cutoff)
            .count()
    }
}

/// Aggregate BLS participation for one sealed epoch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlsCheckpointStats {
    pub epoch: u64,
    pub network: Network,
    pub total_validators: u64,
    pub total_power: u64,
    pub signed_power: u64,
    pub unsigned_power: u64,
    /// Percentage in [0, 100]
    pub participation_rate_by_count: f64,
    /// Percentage in [0, 100]
    pub participation_rate_by_power: f64,
    pub timestamp_ms: u64,
}

impl BlsCheckpointStats {
    pub fn from_observation(obs: &CheckpointObservation, network: Network, now: u64) -> Self {
        let total_power = obs.total_power();
        let signed_power = obs.signed_power();
        let total_validators = obs.votes.len() as u64;
        let signed_count = obs.votes.iter().filter(|v| v.signed).count() as u64;

        let by_count = if total_validators > 0 {
            100.0 * signed_count as f64 / total_validators as f64
        } else {
            0.0
        };
        let by_power = if total_power > 0 {
            100.0 * signed_power as f64 / total_power as f64
        } else {
            0.0
        };

        Self {
            epoch: obs.epoch,
            network,
            total_validators,
            total_power,
            signed_power,
            unsigned_power: total_power - signed_power,
            participation_rate_by_count: by_count,
            participation_rate_by_power: by_power,
            timestamp_ms: now,
        }
    }

    pub fn rate_by_power_display(&self) -> String {
        format!("{:.2}%", self.participation_rate_by_power)
    }

    pub fn rate_by_count_display(&self) -> String {
        format!("{:.2}%", self.participation_rate_by_count)
    }
}

// ============================================================================
// Alert state
// ============================================================================

/// Per-subject, per-family alert state; process-local and lost on restart
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AlertState {
    /// Rate at which the last LOW alert fired, 0 when none is outstanding
    pub last_alerted_rate: f64,
    pub is_recovering: bool,
    pub sent_critical: bool,
    pub last_critical_ms: Option<u64>,
    pub last_rate_alert_ms: Option<u64>,
    pub last_recovery_ms: Option<u64>,
    pub last_missed_epoch: Option<u64>,
}
