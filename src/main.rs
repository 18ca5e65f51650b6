// Copyright (c) Babylon Liveness Monitor Contributors
// SPDX-License-Identifier: Apache-2.0

//! Process bootstrap
//!
//! Parses the environment surface, wires the shared store, sink and metrics,
//! and runs one orchestrator per configured network until a shutdown signal
//! arrives. Exit code 0 means a normal shutdown; initialization failures
//! exit 1.

use anyhow::Context;
use babylon_liveness_monitor::alert::{AlertSink, LogSink};
use babylon_liveness_monitor::config::Args;
use babylon_liveness_monitor::metrics::{serve_metrics, MonitorMetrics};
use babylon_liveness_monitor::orchestrator::Orchestrator;
use babylon_liveness_monitor::store;
use babylon_liveness_monitor::telegram::{TelegramConfig, TelegramSink};
use clap::Parser;
use prometheus::Registry;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let configs = args
        .network_configs()
        .context("invalid monitoring configuration")?;
    if configs.is_empty() {
        info!("[Main] monitoring disabled, nothing to do");
        return Ok(());
    }

    let store = store::open(if args.mongodb_uri.is_empty() {
        None
    } else {
        Some(&args.mongodb_uri)
    });

    let sink: Arc<dyn AlertSink> = {
        let telegram_config = TelegramConfig {
            bot_token: args.telegram_bot_token.clone(),
            chat_id: args.telegram_chat_id.clone(),
        };
        if telegram_config.is_configured() {
            info!("[Main] Telegram notifications enabled");
            Arc::new(TelegramSink::new(telegram_config).context("failed to build Telegram sink")?)
        } else {
            info!("[Main] no notification transport configured, alerts go to the log");
            Arc::new(LogSink)
        }
    };

    let registry = Registry::new_custom(Some("babylon".into()), None)
        .context("failed to create Prometheus registry")?;
    let metrics = Arc::new(MonitorMetrics::new(&registry));

    let cancel = CancellationToken::new();
    let mut handles = Vec::new();

    if !args.metrics_address.is_empty() {
        let addr = args
            .metrics_address
            .parse()
            .context("invalid METRICS_ADDRESS")?;
        handles.push(serve_metrics(addr, registry.clone(), cancel.child_token()).await?);
    }

    for config in configs {
        let network = config.network;
        let orchestrator =
            Orchestrator::new(config, store.clone(), sink.clone(), metrics.clone());
        let child = cancel.child_token();
        handles.push(tokio::spawn(async move {
            if let Err(e) = orchestrator.run(child).await {
                error!("[Main] {} orchestrator failed: {e:#}", network);
            }
        }));
    }

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    info!("[Main] shutdown signal received");
    cancel.cancel();

    let _ = futures::future::join_all(handles).await;
    info!("[Main] all services stopped");
    Ok(())
}
