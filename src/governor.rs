// Copyright (c) Babylon Liveness Monitor Contributors
// SPDX-License-Identifier: Apache-2.0

//! Alert governor: per-subject state machines with hysteresis and cooldowns
//!
//! Every observation lands here after aggregation. The governor decides
//! whether it warrants an outbound notification, applying rate hysteresis,
//! step-change thresholds, cooldown intervals and recovery detection per
//! subject. State transitions for a subject are serialized under the state
//! lock; dispatch happens after the lock is released and is at-most-once:
//! a sink failure drops the alert, never rewinds the state.

use crate::alert::{Alert, AlertSink, Severity};
use crate::metrics::MonitorMetrics;
use crate::network::Network;
use crate::types::{
    now_ms, AlertState, BlsCheckpointStats, CheckpointObservation, FinalityProviderStats,
    JailedTransition, ValidatorSignatureStats,
};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Observations below this window size never trigger rate alerts
const MIN_WINDOW_FOR_RATE_ALERTS: u64 = 100;
/// Consecutive missed blocks before a validator CRITICAL fires
const CONSECUTIVE_MISS_THRESHOLD: u64 = 5;
/// Recent-observation window for the finality-provider miss rule
const FP_RECENT_WINDOW: u64 = 5;
/// Misses within the recent window before a provider CRITICAL fires
const FP_RECENT_MISS_THRESHOLD: usize = 3;
/// Cooldown between repeated provider recent-miss criticals
const FP_CRITICAL_COOLDOWN_MS: u64 = 3_600_000;
/// Bucket width for the provider rate step comparison
const FP_RATE_BUCKET: f64 = 5.0;

/// One state machine family per monitored record family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AlertFamily {
    ValidatorBlocks,
    ProviderVotes,
    BlsSignatures,
}

#[derive(Debug, Clone)]
pub struct GovernorConfig {
    pub validator_threshold: f64,
    pub provider_threshold: f64,
    pub bls_threshold: f64,
    pub min_alert_interval_ms: u64,
    pub rate_min_drop: f64,
    pub tracked_validators: HashSet<String>,
    pub tracked_providers: HashSet<String>,
}

impl Default for GovernorConfig {
    fn default() -> Self {
        Self {
            validator_threshold: 90.0,
            provider_threshold: 90.0,
            bls_threshold: 90.0,
            min_alert_interval_ms: 21_600_000,
            rate_min_drop: 10.0,
            tracked_validators: HashSet::new(),
            tracked_providers: HashSet::new(),
        }
    }
}

pub struct AlertGovernor {
    network: Network,
    config: GovernorConfig,
    sink: Arc<dyn AlertSink>,
    metrics: Arc<MonitorMetrics>,
    states: Mutex<HashMap<(AlertFamily, String), AlertState>>,
}

impl AlertGovernor {
    pub fn new(
        network: Network,
        config: GovernorConfig,
        sink: Arc<dyn AlertSink>,
        metrics: Arc<MonitorMetrics>,
    ) -> Self {
        Self {
            network,
            config,
            sink,
            metrics,
            states: Mutex::new(HashMap::new()),
        }
    }

    fn is_tracked(tracked: &HashSet<String>, keys: &[&str]) -> bool {
        tracked.is_empty() || keys.iter().any(|k| tracked.contains(*k))
    }

    /// Clear the state machine for one subject
    pub async fn reset(&self, family: AlertFamily, subject: &str) {
        self.states.lock().await.remove(&(family, subject.to_string()));
    }

    async fn dispatch(&self, alerts: Vec<Alert>) {
        for alert in alerts {
            self.metrics
                .alerts_sent
                .with_label_values(&[self.network.tag(), alert.severity.label()])
                .inc();
            debug!(
                "[Governor] {} dispatching {} '{}'",
                self.network,
                alert.severity.label(),
                alert.title
            );
            if let Err(e) = self.sink.send_alert(&alert).await {
                warn!(
                    "[Governor] {} alert '{}' dropped: {e:#}",
                    self.network, alert.title
                );
            }
        }
    }

    // ========================================================================
    // Validator block signatures
    // ========================================================================

    pub async fn on_validator_stats(&self, stats: &ValidatorSignatureStats, moniker: &str) {
        self.on_validator_stats_at(stats, moniker, now_ms()).await;
    }

    pub async fn on_validator_stats_at(
        &self,
        stats: &ValidatorSignatureStats,
        moniker: &str,
        now: u64,
    ) {
        if !Self::is_tracked(
            &self.config.tracked_validators,
            &[&stats.subject_key, moniker],
        ) {
            return;
        }

        let mut alerts = Vec::new();
        {
            let mut states = self.states.lock().await;
            let state = states
                .entry((AlertFamily::ValidatorBlocks, stats.subject_key.clone()))
                .or_default();

            // Consecutive-miss rule: exactly once per run of misses
            if stats.consecutive_missed >= CONSECUTIVE_MISS_THRESHOLD && !state.sent_critical {
                state.sent_critical = true;
                state.last_critical_ms = Some(now);
                alerts.push(
                    Alert::new(
                        self.network,
                        Severity::Critical,
                        "Validator Missing Consecutive Blocks",
                        format!(
                            "{} ({}) has missed {} consecutive blocks",
                            moniker, stats.subject_key, stats.consecutive_missed
                        ),
                    )
                    .with_meta("subject", &stats.subject_key)
                    .with_meta("consecutive_missed", stats.consecutive_missed),
                );
            }
            if stats.consecutive_missed == 0 && state.sent_critical {
                state.sent_critical = false;
            }

            if stats.total_blocks_in_window >= MIN_WINDOW_FOR_RATE_ALERTS {
                let rate = stats.signature_rate;
                if rate < self.config.validator_threshold {
                    let due_first = state.last_alerted_rate == 0.0;
                    let due_step = state.last_alerted_rate > 0.0
                        && rate <= state.last_alerted_rate - self.config.rate_min_drop;
                    let due_time = state
                        .last_rate_alert_ms
                        .map(|t| now.saturating_sub(t) >= self.config.min_alert_interval_ms)
                        .unwrap_or(false);
                    if due_first || due_step || due_time {
                        state.last_alerted_rate = rate;
                        state.last_rate_alert_ms = Some(now);
                        state.is_recovering = false;
                        alerts.push(
                            Alert::new(
                                self.network,
                                Severity::Warning,
                                "Validator Signature Rate Low",
                                format!(
                                    "{} ({}) signature rate {:.2}% over {} blocks, below {:.0}%",
                                    moniker,
                                    stats.subject_key,
                                    rate,
                                    stats.total_blocks_in_window,
                                    self.config.validator_threshold
                                ),
                            )
                            .with_meta("subject", &stats.subject_key)
                            .with_meta("rate", format!("{rate:.2}")),
                        );
                    }
                } else if state.last_alerted_rate > 0.0 {
                    let due = !state.is_recovering
                        || state
                            .last_recovery_ms
                            .map(|t| now.saturating_sub(t) >= self.config.min_alert_interval_ms)
                            .unwrap_or(true);
                    if due {
                        state.is_recovering = true;
                        state.last_recovery_ms = Some(now);
                        state.last_alerted_rate = 0.0;
                        alerts.push(
                            Alert::new(
                                self.network,
                                Severity::Info,
                                "Validator Signature Rate Recovered",
                                format!(
                                    "{} ({}) signature rate back to {:.2}%",
                                    moniker, stats.subject_key, rate
                                ),
                            )
                            .with_meta("subject", &stats.subject_key)
                            .with_meta("rate", format!("{rate:.2}")),
                        );
                    }
                }
            }
        }
        self.dispatch(alerts).await;
    }

    // ========================================================================
    // Finality provider votes
    // ========================================================================

    pub async fn on_provider_stats(&self, stats: &FinalityProviderStats, moniker: &str) {
        self.on_provider_stats_at(stats, moniker, now_ms()).await;
    }

    pub async fn on_provider_stats_at(
        &self,
        stats: &FinalityProviderStats,
        moniker: &str,
        now: u64,
    ) {
        if !Self::is_tracked(
            &self.config.tracked_providers,
            &[&stats.btc_pk_hex, moniker],
        ) {
            return;
        }

        let mut alerts = Vec::new();
        {
            let mut states = self.states.lock().await;
            let state = states
                .entry((AlertFamily::ProviderVotes, stats.btc_pk_hex.clone()))
                .or_default();

            // Recent-miss rule over the stored missed heights
            let recent_misses = stats.misses_in_last(FP_RECENT_WINDOW);
            if recent_misses >= FP_RECENT_MISS_THRESHOLD {
                let due = !state.sent_critical
                    || state
                        .last_critical_ms
                        .map(|t| now.saturating_sub(t) > FP_CRITICAL_COOLDOWN_MS)
                        .unwrap_or(true);
                if due {
                    state.sent_critical = true;
                    state.last_critical_ms = Some(now);
                    alerts.push(
                        Alert::new(
                            self.network,
                            Severity::Critical,
                            "Finality Provider Missing Recent Blocks",
                            format!(
                                "{} ({}) missed {} of the last {} blocks",
                                moniker, stats.btc_pk_hex, recent_misses, FP_RECENT_WINDOW
                            ),
                        )
                        .with_meta("subject", &stats.btc_pk_hex)
                        .with_meta("recent_misses", recent_misses),
                    );
                }
            } else if recent_misses == 0 && state.sent_critical {
                state.sent_critical = false;
                alerts.push(
                    Alert::new(
                        self.network,
                        Severity::Info,
                        "Finality Provider Voting Again",
                        format!(
                            "{} ({}) has no misses in the last {} blocks",
                            moniker, stats.btc_pk_hex, FP_RECENT_WINDOW
                        ),
                    )
                    .with_meta("subject", &stats.btc_pk_hex),
                );
            }

            // Rate hysteresis with 5-point bucket comparison
            if stats.total_blocks >= MIN_WINDOW_FOR_RATE_ALERTS {
                let rate = stats.signature_rate;
                if rate < self.config.provider_threshold {
                    let due_first = state.last_alerted_rate == 0.0;
                    let due_step = state.last_alerted_rate > 0.0
                        && (rate / FP_RATE_BUCKET).floor()
                            < (state.last_alerted_rate / FP_RATE_BUCKET).floor();
                    let due_time = state
                        .last_rate_alert_ms
                        .map(|t| now.saturating_sub(t) >= self.config.min_alert_interval_ms)
                        .unwrap_or(false);
                    if due_first || due_step || due_time {
                        state.last_alerted_rate = rate;
                        state.last_rate_alert_ms = Some(now);
                        state.is_recovering = false;
                        alerts.push(
                            Alert::new(
                                self.network,
                                Severity::Warning,
                                "Finality Provider Signature Rate Low",
                                format!(
                                    "{} ({}) vote rate {:.2}% over {} blocks, below {:.0}%",
                                    moniker,
                                    stats.btc_pk_hex,
                                    rate,
                                    stats.total_blocks,
                                    self.config.provider_threshold
                                ),
                            )
                            .with_meta("subject", &stats.btc_pk_hex)
                            .with_meta("rate", format!("{rate:.2}")),
                        );
                    }
                } else if state.last_alerted_rate > 0.0 {
                    let due = !state.is_recovering
                        || state
                            .last_recovery_ms
                            .map(|t| now.saturating_sub(t) >= self.config.min_alert_interval_ms)
                            .unwrap_or(true);
                    if due {
                        state.is_recovering = true;
                        state.last_recovery_ms = Some(now);
                        state.last_alerted_rate = 0.0;
                        alerts.push(
                            Alert::new(
                                self.network,
                                Severity::Info,
                                "Finality Provider Signature Rate Recovered",
                                format!(
                                    "{} ({}) vote rate back to {:.2}%",
                                    moniker, stats.btc_pk_hex, rate
                                ),
                            )
                            .with_meta("subject", &stats.btc_pk_hex),
                        );
                    }
                }
            }
        }
        self.dispatch(alerts).await;
    }

    // ========================================================================
    // BLS checkpoints
    // ========================================================================

    pub async fn on_checkpoint(&self, obs: &CheckpointObservation, stats: &BlsCheckpointStats) {
        self.on_checkpoint_at(obs, stats, now_ms()).await;
    }

    pub async fn on_checkpoint_at(
        &self,
        obs: &CheckpointObservation,
        stats: &BlsCheckpointStats,
        _now: u64,
    ) {
        let mut alerts = Vec::new();
        {
            let mut states = self.states.lock().await;
            for vote in &obs.votes {
                if !Self::is_tracked(
                    &self.config.tracked_validators,
                    &[&vote.address, &vote.moniker],
                ) {
                    continue;
                }
                let state = states
                    .entry((AlertFamily::BlsSignatures, vote.address.clone()))
                    .or_default();
                if !vote.signed {
                    state.last_missed_epoch = Some(obs.epoch);
                    alerts.push(
                        Alert::new(
                            self.network,
                            Severity::Critical,
                            "Validator Missed BLS Checkpoint",
                            format!(
                                "{} ({}) did not sign the BLS checkpoint for epoch {}",
                                vote.moniker, vote.address, obs.epoch
                            ),
                        )
                        .with_meta("subject", &vote.address)
                        .with_meta("epoch", obs.epoch),
                    );
                } else if state.last_missed_epoch.is_some() {
                    state.last_missed_epoch = None;
                    alerts.push(
                        Alert::new(
                            self.network,
                            Severity::Info,
                            "Validator BLS Signing Recovered",
                            format!(
                                "{} ({}) signed the BLS checkpoint for epoch {}",
                                vote.moniker, vote.address, obs.epoch
                            ),
                        )
                        .with_meta("subject", &vote.address)
                        .with_meta("epoch", obs.epoch),
                    );
                }
            }
        }

        // Aggregate participation; no hysteresis beyond per-epoch cadence
        if stats.total_power > 0 && stats.participation_rate_by_power < self.config.bls_threshold {
            alerts.push(
                Alert::new(
                    self.network,
                    Severity::Warning,
                    "Low BLS Checkpoint Participation",
                    format!(
                        "Epoch {}: {} of power signed ({} by count), below {:.0}%",
                        stats.epoch,
                        stats.rate_by_power_display(),
                        stats.rate_by_count_display(),
                        self.config.bls_threshold
                    ),
                )
                .with_meta("epoch", stats.epoch)
                .with_meta("rate_by_power", stats.rate_by_power_display()),
            );
        }
        self.dispatch(alerts).await;
    }

    // ========================================================================
    // Jailed transitions
    // ========================================================================

    /// Always sent on transition; no cooldown
    pub async fn on_jailed_transition(&self, transition: &JailedTransition) {
        let tracked = if transition.is_finality_provider {
            &self.config.tracked_providers
        } else {
            &self.config.tracked_validators
        };
        if !Self::is_tracked(tracked, &[&transition.subject_key, &transition.moniker]) {
            return;
        }

        let kind = if transition.is_finality_provider {
            "Finality Provider"
        } else {
            "Validator"
        };
        let alert = if transition.jailed {
            Alert::new(
                self.network,
                Severity::Critical,
                format!("{kind} Jailed"),
                format!(
                    "{} ({}) has been jailed",
                    transition.moniker, transition.subject_key
                ),
            )
        } else {
            Alert::new(
                self.network,
                Severity::Info,
                format!("{kind} Unjailed"),
                format!(
                    "{} ({}) is active again",
                    transition.moniker, transition.subject_key
                ),
            )
        }
        .with_meta("subject", &transition.subject_key);

        self.dispatch(vec![alert]).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alert::testing::RecordingSink;
    use crate::types::FinalityProviderStats;

    const HOUR_MS: u64 = 3_600_000;

    fn governor(config: GovernorConfig) -> (AlertGovernor, Arc<RecordingSink>) {
        let sink = Arc::new(RecordingSink::default());
        let gov = AlertGovernor::new(
            Network::Mainnet,
            config,
            sink.clone(),
            Arc::new(MonitorMetrics::new_for_test()),
        );
        (gov, sink)
    }

    fn validator_stats(rate: f64, window: u64, missed: u64) -> ValidatorSignatureStats {
        let mut stats = ValidatorSignatureStats::new("bbnvaloper1v".into(), Network::Mainnet);
        stats.signature_rate = rate;
        stats.total_blocks_in_window = window;
        stats.consecutive_missed = missed;
        stats.consecutive_signed = if missed == 0 { 1 } else { 0 };
        stats
    }

    #[tokio::test]
    async fn test_low_alert_fires_once_below_threshold() {
        let (gov, sink) = governor(GovernorConfig::default());
        let t0 = 1_000_000;

        gov.on_validator_stats_at(&validator_stats(85.0, 150, 0), "val", t0).await;
        assert_eq!(sink.count().await, 1);

        // Small worsening within the step: no re-alert
        gov.on_validator_stats_at(&validator_stats(80.0, 160, 0), "val", t0 + 1000).await;
        assert_eq!(sink.count().await, 1);

        // Drop of at least DROP_STEP from the alerted rate: re-alert
        gov.on_validator_stats_at(&validator_stats(74.0, 170, 0), "val", t0 + 2000).await;
        assert_eq!(sink.count().await, 2);
    }

    #[tokio::test]
    async fn test_low_alert_re_fires_after_interval() {
        let (gov, sink) = governor(GovernorConfig::default());
        let t0 = 1_000_000;

        gov.on_validator_stats_at(&validator_stats(85.0, 150, 0), "val", t0).await;
        assert_eq!(sink.count().await, 1);

        // Same rate, six hours later
        gov.on_validator_stats_at(&validator_stats(85.0, 200, 0), "val", t0 + 6 * HOUR_MS).await;
        assert_eq!(sink.count().await, 2);
    }

    #[tokio::test]
    async fn test_no_rate_alert_below_min_window() {
        let (gov, sink) = governor(GovernorConfig::default());
        gov.on_validator_stats_at(&validator_stats(10.0, 99, 0), "val", 1_000_000).await;
        assert_eq!(sink.count().await, 0);
    }

    #[tokio::test]
    async fn test_recovery_resets_cycle() {
        let (gov, sink) = governor(GovernorConfig::default());
        let t0 = 1_000_000;

        gov.on_validator_stats_at(&validator_stats(85.0, 150, 0), "val", t0).await;
        gov.on_validator_stats_at(&validator_stats(92.0, 200, 0), "val", t0 + 1000).await;
        let sevs = sink.severities().await;
        assert_eq!(sevs, vec![Severity::Warning, Severity::Info]);

        // Recovery is not repeated while recovering
        gov.on_validator_stats_at(&validator_stats(93.0, 210, 0), "val", t0 + 2000).await;
        assert_eq!(sink.count().await, 2);

        // A fresh drop below threshold re-enables the LOW path immediately
        gov.on_validator_stats_at(&validator_stats(88.0, 220, 0), "val", t0 + 3000).await;
        assert_eq!(sink.count().await, 3);
    }

    #[tokio::test]
    async fn test_consecutive_miss_critical_once_per_run() {
        let (gov, sink) = governor(GovernorConfig::default());
        let t0 = 1_000_000;

        // Below the threshold: nothing
        gov.on_validator_stats_at(&validator_stats(99.0, 10, 4), "val", t0).await;
        assert_eq!(sink.count().await, 0);

        // Fifth miss: exactly one critical
        gov.on_validator_stats_at(&validator_stats(99.0, 10, 5), "val", t0 + 1).await;
        gov.on_validator_stats_at(&validator_stats(99.0, 10, 6), "val", t0 + 2).await;
        gov.on_validator_stats_at(&validator_stats(99.0, 10, 7), "val", t0 + 3).await;
        assert_eq!(sink.count().await, 1);

        // Signed block clears the flag; a new run fires again
        gov.on_validator_stats_at(&validator_stats(99.0, 10, 0), "val", t0 + 4).await;
        gov.on_validator_stats_at(&validator_stats(99.0, 10, 5), "val", t0 + 5).await;
        assert_eq!(sink.count().await, 2);
    }

    fn provider_stats(rate: f64, total: u64, end: u64, missed: Vec<u64>) -> FinalityProviderStats {
        let mut stats = FinalityProviderStats::new("aabb".into(), Network::Mainnet, 1);
        stats.signature_rate = rate;
        stats.total_blocks = total;
        stats.end_height = end;
        stats.missed_block_heights = missed;
        stats
    }

    #[tokio::test]
    async fn test_provider_recent_miss_critical_and_recovery() {
        let (gov, sink) = governor(GovernorConfig::default());
        let t0 = 1_000_000;

        // 3 of the last 5 heights missed -> critical
        gov.on_provider_stats_at(&provider_stats(99.0, 50, 110, vec![107, 109, 110]), "fp", t0)
            .await;
        assert_eq!(sink.severities().await, vec![Severity::Critical]);

        // Still missing within cooldown: no repeat
        gov.on_provider_stats_at(&provider_stats(99.0, 51, 111, vec![107, 109, 110]), "fp", t0 + 1000)
            .await;
        assert_eq!(sink.count().await, 1);

        // After the 1 hour cooldown the reminder fires
        gov.on_provider_stats_at(
            &provider_stats(99.0, 52, 112, vec![109, 110, 112]),
            "fp",
            t0 + HOUR_MS + 1,
        )
        .await;
        assert_eq!(sink.count().await, 2);

        // No miss in the last 5 heights -> recovery, flag cleared
        gov.on_provider_stats_at(&provider_stats(99.0, 60, 130, vec![109, 110, 112]), "fp", t0 + HOUR_MS + 2)
            .await;
        let sevs = sink.severities().await;
        assert_eq!(sevs.last().copied(), Some(Severity::Info));
        assert_eq!(sink.count().await, 3);
    }

    #[tokio::test]
    async fn test_provider_rate_uses_bucket_step() {
        let (gov, sink) = governor(GovernorConfig::default());
        let t0 = 1_000_000;

        gov.on_provider_stats_at(&provider_stats(87.0, 200, 500, vec![]), "fp", t0).await;
        assert_eq!(sink.count().await, 1);

        // 86 is in the same 5-point bucket as 87: no re-alert
        gov.on_provider_stats_at(&provider_stats(86.0, 210, 510, vec![]), "fp", t0 + 1).await;
        assert_eq!(sink.count().await, 1);

        // 84 falls into the next bucket down: re-alert
        gov.on_provider_stats_at(&provider_stats(84.0, 220, 520, vec![]), "fp", t0 + 2).await;
        assert_eq!(sink.count().await, 2);
    }

    #[tokio::test]
    async fn test_bls_miss_and_recovery_episode() {
        let (gov, sink) = governor(GovernorConfig::default());
        let vote = |signed: bool| CheckpointObservation {
            epoch: 9,
            votes: vec![crate::types::CheckpointVote {
                address: "consaddr".into(),
                moniker: "val".into(),
                power: 100,
                signed,
            }],
        };
        let stats_for = |obs: &CheckpointObservation| {
            BlsCheckpointStats::from_observation(obs, Network::Mainnet, 0)
        };

        // Missed epoch -> critical (plus aggregate warning at 0% power)
        let missed = vote(false);
        gov.on_checkpoint_at(&missed, &stats_for(&missed), 1).await;
        let sevs = sink.severities().await;
        assert!(sevs.contains(&Severity::Critical));
        assert!(sevs.contains(&Severity::Warning));

        // Signed epoch after a miss -> exactly one recovery
        let signed = vote(true);
        gov.on_checkpoint_at(&signed, &stats_for(&signed), 2).await;
        let sevs = sink.severities().await;
        assert_eq!(sevs.iter().filter(|s| **s == Severity::Info).count(), 1);

        // Another signed epoch: no second recovery
        gov.on_checkpoint_at(&signed, &stats_for(&signed), 3).await;
        let sevs = sink.severities().await;
        assert_eq!(sevs.iter().filter(|s| **s == Severity::Info).count(), 1);
    }

    #[tokio::test]
    async fn test_bls_aggregate_warning_threshold() {
        let (gov, sink) = governor(GovernorConfig::default());
        let obs = CheckpointObservation {
            epoch: 4,
            votes: vec![
                crate::types::CheckpointVote {
                    address: "a".into(),
                    moniker: "a".into(),
                    power: 95,
                    signed: true,
                },
                crate::types::CheckpointVote {
                    address: "b".into(),
                    moniker: "b".into(),
                    power: 5,
                    signed: false,
                },
            ],
        };
        let stats = BlsCheckpointStats::from_observation(&obs, Network::Mainnet, 0);
        gov.on_checkpoint_at(&obs, &stats, 1).await;
        // 95% power signed is above the 90% threshold: only the per-validator
        // critical for b fires, no aggregate warning
        let sevs = sink.severities().await;
        assert!(!sevs.contains(&Severity::Warning));
        assert!(sevs.contains(&Severity::Critical));
    }

    #[tokio::test]
    async fn test_jailed_transition_always_sent() {
        let (gov, sink) = governor(GovernorConfig::default());
        let t = JailedTransition {
            subject_key: "pk1".into(),
            moniker: "fp".into(),
            jailed: true,
            is_finality_provider: true,
        };
        gov.on_jailed_transition(&t).await;
        gov.on_jailed_transition(&t).await;
        assert_eq!(sink.count().await, 2);
        assert_eq!(sink.severities().await, vec![Severity::Critical, Severity::Critical]);

        let back = JailedTransition { jailed: false, ..t };
        gov.on_jailed_transition(&back).await;
        assert_eq!(sink.severities().await.last().copied(), Some(Severity::Info));
    }

    #[tokio::test]
    async fn test_tracking_filter_suppresses_untracked() {
        let config = GovernorConfig {
            tracked_validators: ["tracked-moniker".to_string()].into_iter().collect(),
            ..GovernorConfig::default()
        };
        let (gov, sink) = governor(config);

        gov.on_validator_stats_at(&validator_stats(50.0, 150, 10), "other", 1_000_000).await;
        assert_eq!(sink.count().await, 0);

        gov.on_validator_stats_at(&validator_stats(50.0, 150, 10), "tracked-moniker", 1_000_001)
            .await;
        assert!(sink.count().await > 0);
    }

    #[tokio::test]
    async fn test_reset_clears_state() {
        let (gov, sink) = governor(GovernorConfig::default());
        gov.on_validator_stats_at(&validator_stats(85.0, 150, 0), "val", 1_000_000).await;
        assert_eq!(sink.count().await, 1);

        gov.reset(AlertFamily::ValidatorBlocks, "bbnvaloper1v").await;
        // Same low rate after reset behaves like a first observation
        gov.on_validator_stats_at(&validator_stats(85.0, 150, 0), "val", 1_000_001).await;
        assert_eq!(sink.count().await, 2);
    }
}
