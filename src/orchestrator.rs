// Copyright (c) Babylon Liveness Monitor Contributors
// SPDX-License-Identifier: Apache-2.0

//! Per-network orchestrator
//!
//! Wires the gateway, directory, pipelines, aggregators and governor for one
//! network and owns their lifecycles. Two orchestrators run concurrently,
//! one per configured network, sharing no mutable state. On stop, the
//! cancellation token fans out to every task and stragglers are abandoned
//! after a bounded grace period.

use crate::alert::{Alert, AlertSink, Severity};
use crate::config::NetworkConfig;
use crate::directory::Directory;
use crate::gateway::{EventStream, RestClient, StreamConfig, EVENT_CHANNEL_CAPACITY};
use crate::governor::{AlertGovernor, GovernorConfig};
use crate::metrics::MonitorMetrics;
use crate::network::Network;
use crate::pipeline::{BlockPipeline, CheckpointPipeline, EpochTracker};
use crate::router::run_router;
use crate::stats::{BlsCheckpointAggregator, FinalityProviderAggregator, ValidatorSignatureAggregator};
use crate::store::Store;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// How long shutdown waits for tasks before abandoning them
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

const CHECKPOINT_CHANNEL_CAPACITY: usize = 64;

pub struct Orchestrator {
    network: Network,
    config: NetworkConfig,
    store: Arc<dyn Store>,
    sink: Arc<dyn AlertSink>,
    metrics: Arc<MonitorMetrics>,
}

impl Orchestrator {
    pub fn new(
        config: NetworkConfig,
        store: Arc<dyn Store>,
        sink: Arc<dyn AlertSink>,
        metrics: Arc<MonitorMetrics>,
    ) -> Self {
        Self {
            network: config.network,
            config,
            store,
            sink,
            metrics,
        }
    }

    fn governor_config(&self) -> GovernorConfig {
        GovernorConfig {
            validator_threshold: self.config.validator_threshold,
            provider_threshold: self.config.provider_threshold,
            bls_threshold: self.config.bls_threshold,
            min_alert_interval_ms: self.config.min_alert_interval_ms,
            rate_min_drop: self.config.rate_min_drop,
            tracked_validators: self.config.tracked_validators.clone(),
            tracked_providers: self.config.tracked_providers.clone(),
        }
    }

    /// Build every subsystem, spawn the task set and supervise it until
    /// cancellation
    pub async fn run(self, cancel: CancellationToken) -> anyhow::Result<()> {
        let network = self.network;
        info!(
            "[Orchestrator] {} starting ({} REST endpoints, {} stream endpoints)",
            network,
            self.config.rest_urls.len(),
            self.config.ws_urls.len()
        );

        let rest = Arc::new(RestClient::new(
            network,
            self.config.rest_urls.clone(),
            self.metrics.clone(),
        )?);
        if let Err(e) = rest.probe().await {
            warn!("[Orchestrator] {} status probe failed: {e}", network);
        }

        let stream = Arc::new(EventStream::new(
            network,
            self.config.ws_urls.clone(),
            StreamConfig::default(),
            self.metrics.clone(),
        )?);

        let directory = Arc::new(Directory::new(
            network,
            rest.clone(),
            self.store.clone(),
            self.metrics.clone(),
        ));
        // First refresh establishes the jailed baseline; transitions are
        // impossible by construction here
        if let Err(e) = directory.refresh().await {
            warn!("[Orchestrator] {} initial directory refresh failed: {e}", network);
        }

        let governor = Arc::new(AlertGovernor::new(
            network,
            self.governor_config(),
            self.sink.clone(),
            self.metrics.clone(),
        ));

        let validator_agg = Arc::new(ValidatorSignatureAggregator::new(
            network,
            self.config.validator_monitoring,
            self.store.clone(),
            governor.clone(),
        ));
        let provider_agg = Arc::new(FinalityProviderAggregator::new(
            network,
            self.config.finality_provider_monitoring,
            self.store.clone(),
            governor.clone(),
        ));
        let bls_agg = Arc::new(BlsCheckpointAggregator::new(
            network,
            self.config.bls_monitoring,
            self.store.clone(),
            governor.clone(),
        ));

        let epoch_tracker = Arc::new(EpochTracker::default());
        let block_pipeline = Arc::new(BlockPipeline::new(
            network,
            self.config.finality_lag,
            rest.clone(),
            directory.clone(),
            self.store.clone(),
            self.metrics.clone(),
            validator_agg,
            provider_agg,
            epoch_tracker.clone(),
        ));
        let checkpoint_pipeline = Arc::new(CheckpointPipeline::new(
            network,
            rest.clone(),
            directory.clone(),
            bls_agg,
            epoch_tracker,
            self.metrics.clone(),
        ));

        let (block_tx, block_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let (checkpoint_tx, checkpoint_rx) = mpsc::channel(CHECKPOINT_CHANNEL_CAPACITY);
        let router_rx = stream.subscribe();

        let startup = Alert::new(
            network,
            Severity::Info,
            "Liveness Monitor Started",
            format!(
                "Monitoring {} via {} REST and {} stream endpoints",
                network.name(),
                self.config.rest_urls.len(),
                self.config.ws_urls.len()
            ),
        );
        if let Err(e) = self.sink.send_alert(&startup).await {
            warn!("[Orchestrator] {} startup notification failed: {e:#}", network);
        }

        let mut handles: Vec<JoinHandle<()>> = Vec::new();
        handles.push(tokio::spawn({
            let stream = stream.clone();
            let cancel = cancel.clone();
            async move { stream.run(cancel).await }
        }));
        handles.push(tokio::spawn(run_router(
            network,
            router_rx,
            block_tx,
            checkpoint_tx,
            self.metrics.clone(),
            cancel.clone(),
        )));
        handles.push(tokio::spawn({
            let pipeline = block_pipeline.clone();
            let cancel = cancel.clone();
            async move { pipeline.run(block_rx, cancel).await }
        }));
        handles.push(tokio::spawn({
            let pipeline = checkpoint_pipeline.clone();
            let cancel = cancel.clone();
            async move { pipeline.run(checkpoint_rx, cancel).await }
        }));
        handles.push(tokio::spawn(run_directory_refresh(
            directory,
            governor,
            self.config.directory_refresh,
            cancel.clone(),
        )));

        info!("[Orchestrator] {} running {} tasks", network, handles.len());
        cancel.cancelled().await;

        let aborts: Vec<_> = handles.iter().map(|h| h.abort_handle()).collect();
        match tokio::time::timeout(SHUTDOWN_GRACE, futures::future::join_all(handles)).await {
            Ok(_) => info!("[Orchestrator] {} stopped cleanly", network),
            Err(_) => {
                warn!(
                    "[Orchestrator] {} tasks did not stop within {:?}, abandoning",
                    network, SHUTDOWN_GRACE
                );
                for abort in aborts {
                    abort.abort();
                }
            }
        }
        Ok(())
    }
}

/// Periodic directory refresh; jailed transitions feed the governor
async fn run_directory_refresh(
    directory: Arc<Directory>,
    governor: Arc<AlertGovernor>,
    period: Duration,
    cancel: CancellationToken,
) {
    let mut timer = tokio::time::interval(period);
    timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    // The orchestrator already refreshed once at startup
    timer.tick().await;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                info!("[DirectoryRefresh] cancelled");
                break;
            }
            _ = timer.tick() => {
                match directory.refresh().await {
                    Ok(transitions) => {
                        for transition in &transitions {
                            governor.on_jailed_transition(transition).await;
                        }
                    }
                    Err(e) => warn!("[DirectoryRefresh] refresh failed: {e}"),
                }
            }
        }
    }
}
