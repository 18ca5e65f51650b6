// Copyright (c) Babylon Liveness Monitor Contributors
// SPDX-License-Identifier: Apache-2.0

use axum::extract::State;
use axum::routing::get;
use axum::Router;
use prometheus::{
    register_int_counter_vec_with_registry, register_int_gauge_vec_with_registry, IntCounterVec,
    IntGaugeVec, Registry, TextEncoder,
};
use std::net::SocketAddr;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Process-wide monitoring metrics, labeled by network
#[derive(Clone, Debug)]
pub struct MonitorMetrics {
    pub events_received: IntCounterVec,
    pub events_dropped: IntCounterVec,
    pub blocks_processed: IntCounterVec,
    pub checkpoints_processed: IntCounterVec,
    pub alerts_sent: IntCounterVec,
    pub rest_failovers: IntCounterVec,
    pub rest_errors: IntCounterVec,
    pub ws_reconnects: IntCounterVec,
    pub last_processed_height: IntGaugeVec,
    pub directory_validators: IntGaugeVec,
    pub directory_providers: IntGaugeVec,
}

impl MonitorMetrics {
    pub fn new(registry: &Registry) -> Self {
        Self {
            events_received: register_int_counter_vec_with_registry!(
                "monitor_events_received",
                "Raw events received from the chain event stream",
                &["network"],
                registry,
            )
            .unwrap(),
            events_dropped: register_int_counter_vec_with_registry!(
                "monitor_events_dropped",
                "Events dropped on channel overflow or parse failure",
                &["network", "reason"],
                registry,
            )
            .unwrap(),
            blocks_processed: register_int_counter_vec_with_registry!(
                "monitor_blocks_processed",
                "Block heights processed by the block pipeline",
                &["network"],
                registry,
            )
            .unwrap(),
            checkpoints_processed: register_int_counter_vec_with_registry!(
                "monitor_checkpoints_processed",
                "Sealed epochs processed by the checkpoint pipeline",
                &["network"],
                registry,
            )
            .unwrap(),
            alerts_sent: register_int_counter_vec_with_registry!(
                "monitor_alerts_sent",
                "Alerts handed to the notification sink",
                &["network", "severity"],
                registry,
            )
            .unwrap(),
            rest_failovers: register_int_counter_vec_with_registry!(
                "monitor_rest_failovers",
                "REST endpoint rotations after request failures",
                &["network"],
                registry,
            )
            .unwrap(),
            rest_errors: register_int_counter_vec_with_registry!(
                "monitor_rest_errors",
                "REST request failures by error type",
                &["network", "error_type"],
                registry,
            )
            .unwrap(),
            ws_reconnects: register_int_counter_vec_with_registry!(
                "monitor_ws_reconnects",
                "Event stream reconnection attempts",
                &["network"],
                registry,
            )
            .unwrap(),
            last_processed_height: register_int_gauge_vec_with_registry!(
                "monitor_last_processed_height",
                "Watermark of the block pipeline",
                &["network"],
                registry,
            )
            .unwrap(),
            directory_validators: register_int_gauge_vec_with_registry!(
                "monitor_directory_validators",
                "Validators in the directory catalog",
                &["network"],
                registry,
            )
            .unwrap(),
            directory_providers: register_int_gauge_vec_with_registry!(
                "monitor_directory_providers",
                "Finality providers in the directory catalog",
                &["network"],
                registry,
            )
            .unwrap(),
        }
    }

    /// Metrics bound to a fresh registry; for tests and disabled exposition
    pub fn new_for_test() -> Self {
        Self::new(&Registry::new())
    }
}

async fn metrics_handler(State(registry): State<Registry>) -> String {
    TextEncoder::new()
        .encode_to_string(&registry.gather())
        .unwrap_or_default()
}

/// Serve the Prometheus exposition endpoint until cancelled
pub async fn serve_metrics(
    addr: SocketAddr,
    registry: Registry,
    cancel: CancellationToken,
) -> anyhow::Result<JoinHandle<()>> {
    let app = Router::new()
        .route("/metrics", get(metrics_handler))
        .with_state(registry);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("[Metrics] listening on {}", addr);

    Ok(tokio::spawn(async move {
        let shutdown = async move { cancel.cancelled().await };
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await
        {
            error!("[Metrics] server error: {e}");
        }
    }))
}
