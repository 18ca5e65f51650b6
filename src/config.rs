// Copyright (c) Babylon Liveness Monitor Contributors
// SPDX-License-Identifier: Apache-2.0

//! Environment-driven configuration
//!
//! Every knob the daemon reads is an environment variable (also accepted as
//! a CLI flag); there is no config file. `Args` is the raw surface, split at
//! bootstrap into one [`NetworkConfig`] per enabled network.

use crate::error::{MonitorError, MonitorResult};
use crate::network::Network;
use clap::Parser;
use std::collections::HashSet;
use std::time::Duration;

#[derive(Parser, Debug, Clone)]
#[clap(rename_all = "kebab-case", author, version)]
pub struct Args {
    /// Store connection string; empty runs the in-memory store
    #[clap(env = "MONGODB_URI", long, default_value = "")]
    pub mongodb_uri: String,

    #[clap(env = "MAINNET_RPC_URLS", long, default_value = "")]
    pub mainnet_rpc_urls: String,
    #[clap(env = "MAINNET_WS_URLS", long, default_value = "")]
    pub mainnet_ws_urls: String,
    #[clap(env = "TESTNET_RPC_URLS", long, default_value = "")]
    pub testnet_rpc_urls: String,
    #[clap(env = "TESTNET_WS_URLS", long, default_value = "")]
    pub testnet_ws_urls: String,

    /// Master switch for all monitoring
    #[clap(env = "MONITORING_ENABLED", long, default_value_t = true, action = clap::ArgAction::Set)]
    pub monitoring_enabled: bool,
    #[clap(env = "VALIDATOR_SIGNATURE_MONITORING_ENABLED", long, default_value_t = true, action = clap::ArgAction::Set)]
    pub validator_signature_monitoring_enabled: bool,
    #[clap(env = "FINALITY_PROVIDER_MONITORING_ENABLED", long, default_value_t = true, action = clap::ArgAction::Set)]
    pub finality_provider_monitoring_enabled: bool,
    #[clap(env = "BLS_SIGNATURE_MONITORING_ENABLED", long, default_value_t = true, action = clap::ArgAction::Set)]
    pub bls_signature_monitoring_enabled: bool,

    /// Base timer interval in milliseconds (directory refresh derives from it)
    #[clap(env = "MONITORING_INTERVAL_MS", long, default_value_t = 60_000)]
    pub monitoring_interval_ms: u64,

    /// Finality lag: blocks to wait behind the tip before processing
    #[clap(env = "FINALIZED_BLOCKS_WAIT", long, default_value_t = 3)]
    pub finalized_blocks_wait: u64,

    /// Comma-separated tracking filters; empty tracks all subjects
    #[clap(env = "TRACKED_VALIDATORS", long, default_value = "")]
    pub tracked_validators: String,
    #[clap(env = "TRACKED_FINALITY_PROVIDERS", long, default_value = "")]
    pub tracked_finality_providers: String,

    #[clap(env = "VALIDATOR_SIGNATURE_THRESHOLD", long, default_value_t = 90.0)]
    pub validator_signature_threshold: f64,
    #[clap(env = "FINALITY_PROVIDER_SIGNATURE_THRESHOLD", long, default_value_t = 90.0)]
    pub finality_provider_signature_threshold: f64,
    #[clap(env = "BLS_SIGNATURE_THRESHOLD", long, default_value_t = 90.0)]
    pub bls_signature_threshold: f64,

    /// Minimum interval between repeated rate alerts for one subject
    #[clap(env = "ALERT_MIN_INTERVAL", long, default_value_t = 21_600_000)]
    pub alert_min_interval_ms: u64,

    /// Minimum rate worsening (percentage points) required to re-alert
    #[clap(env = "SIGNATURE_RATE_MIN_DROP", long, default_value_t = 10.0)]
    pub signature_rate_min_drop: f64,

    #[clap(env = "TELEGRAM_BOT_TOKEN", long, default_value = "")]
    pub telegram_bot_token: String,
    #[clap(env = "TELEGRAM_CHAT_ID", long, default_value = "")]
    pub telegram_chat_id: String,

    /// Prometheus exposition address; empty disables the metrics listener
    #[clap(env = "METRICS_ADDRESS", long, default_value = "")]
    pub metrics_address: String,
}

/// Resolved configuration for one network's orchestrator
#[derive(Debug, Clone)]
pub struct NetworkConfig {
    pub network: Network,
    pub rest_urls: Vec<String>,
    pub ws_urls: Vec<String>,
    pub validator_monitoring: bool,
    pub finality_provider_monitoring: bool,
    pub bls_monitoring: bool,
    pub finality_lag: u64,
    pub directory_refresh: Duration,
    pub tracked_validators: HashSet<String>,
    pub tracked_providers: HashSet<String>,
    pub validator_threshold: f64,
    pub provider_threshold: f64,
    pub bls_threshold: f64,
    pub min_alert_interval_ms: u64,
    pub rate_min_drop: f64,
}

impl Args {
    /// Build per-network configs for every network with at least one REST URL
    pub fn network_configs(&self) -> MonitorResult<Vec<NetworkConfig>> {
        if !self.monitoring_enabled {
            return Ok(vec![]);
        }

        let mut configs = Vec::new();
        for network in [Network::Mainnet, Network::Testnet] {
            let (rest_raw, ws_raw) = match network {
                Network::Mainnet => (&self.mainnet_rpc_urls, &self.mainnet_ws_urls),
                Network::Testnet => (&self.testnet_rpc_urls, &self.testnet_ws_urls),
            };
            let rest_urls = split_urls(rest_raw);
            if rest_urls.is_empty() {
                continue;
            }

            let ws_urls = {
                let explicit = split_urls(ws_raw);
                if explicit.is_empty() {
                    rest_urls
                        .iter()
                        .map(|u| derive_ws_url(u))
                        .collect::<MonitorResult<Vec<_>>>()?
                } else {
                    explicit
                }
            };

            configs.push(NetworkConfig {
                network,
                rest_urls,
                ws_urls,
                validator_monitoring: self.validator_signature_monitoring_enabled,
                finality_provider_monitoring: self.finality_provider_monitoring_enabled,
                bls_monitoring: self.bls_signature_monitoring_enabled,
                finality_lag: self.finalized_blocks_wait,
                directory_refresh: Duration::from_millis(self.monitoring_interval_ms.max(1_000) * 60),
                tracked_validators: split_csv(&self.tracked_validators),
                tracked_providers: split_csv(&self.tracked_finality_providers),
                validator_threshold: self.validator_signature_threshold,
                provider_threshold: self.finality_provider_signature_threshold,
                bls_threshold: self.bls_signature_threshold,
                min_alert_interval_ms: self.alert_min_interval_ms,
                rate_min_drop: self.signature_rate_min_drop,
            });
        }

        if configs.is_empty() {
            return Err(MonitorError::Config(
                "no network has RPC URLs configured (set MAINNET_RPC_URLS and/or TESTNET_RPC_URLS)"
                    .to_string(),
            ));
        }
        Ok(configs)
    }
}

fn split_urls(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().trim_end_matches('/').to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

fn split_csv(raw: &str) -> HashSet<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Derive a WebSocket endpoint from a REST URL by protocol swap
fn derive_ws_url(rest_url: &str) -> MonitorResult<String> {
    let mut url = url::Url::parse(rest_url)
        .map_err(|e| MonitorError::Config(format!("invalid RPC URL {rest_url}: {e}")))?;
    let scheme = match url.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => {
            return Err(MonitorError::Config(format!(
                "unsupported scheme {other} in {rest_url}"
            )))
        }
    };
    url.set_scheme(scheme)
        .map_err(|_| MonitorError::Config(format!("cannot derive WS scheme for {rest_url}")))?;
    let joined = format!("{}/websocket", url.as_str().trim_end_matches('/'));
    Ok(joined)
}
