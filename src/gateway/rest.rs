// Copyright (c) Babylon Liveness Monitor Contributors
// SPDX-License-Identifier: Apache-2.0

//! Pooled REST client with endpoint rotation
//!
//! Requests go to the current endpoint; any transport failure or non-2xx
//! response advances to the next endpoint round-robin and retries. After one
//! full rotation without success the request fails with a terminal error.
//! Endpoint selection is session-local; there is no persistent health state.

use crate::error::{MonitorError, MonitorResult};
use crate::gateway::types::{
    ActiveProvidersResponse, BlockEnvelope, BlockTxsResponse, CurrentEpochResponse,
    FinalityVotesResponse, ProviderCatalogResponse, ValidatorsResponse,
};
use crate::metrics::MonitorMetrics;
use crate::network::Network;
use serde::de::DeserializeOwned;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

pub struct RestClient {
    network: Network,
    client: reqwest::Client,
    urls: Vec<String>,
    current: AtomicUsize,
    metrics: Arc<MonitorMetrics>,
}

impl RestClient {
    pub fn new(network: Network, urls: Vec<String>, metrics: Arc<MonitorMetrics>) -> MonitorResult<Self> {
        if urls.is_empty() {
            return Err(MonitorError::Config(format!(
                "no REST endpoints configured for {network}"
            )));
        }
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| MonitorError::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            network,
            client,
            urls,
            current: AtomicUsize::new(0),
            metrics,
        })
    }

    fn current_url(&self) -> &str {
        let idx = self.current.load(Ordering::SeqCst);
        &self.urls[idx % self.urls.len()]
    }

    fn rotate(&self) {
        let idx = self.current.fetch_add(1, Ordering::SeqCst);
        self.metrics
            .rest_failovers
            .with_label_values(&[self.network.tag()])
            .inc();
        warn!(
            "[Gateway] {} REST failover {} -> {}",
            self.network,
            self.urls[idx % self.urls.len()],
            self.urls[(idx + 1) % self.urls.len()]
        );
    }

    /// GET `path` with `query`, rotating endpoints until one full rotation fails
    pub async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> MonitorResult<T> {
        let mut last_error = String::new();

        for _ in 0..self.urls.len() {
            let base = self.current_url();
            let url = format!("{base}{path}");
            debug!("[Gateway] {} GET {}", self.network, url);

            match self.client.get(&url).query(query).send().await {
                Ok(resp) if resp.status().is_success() => {
                    let body = resp.text().await.map_err(|e| MonitorError::Transport {
                        url: url.clone(),
                        source: e,
                    })?;
                    return serde_json::from_str::<T>(&body)
                        .map_err(|e| MonitorError::parse("rest response", &format!("{url}: {e}")));
                }
                Ok(resp) => {
                    let err = MonitorError::HttpStatus {
                        url: url.clone(),
                        status: resp.status(),
                    };
                    self.metrics
                        .rest_errors
                        .with_label_values(&[self.network.tag(), err.error_type()])
                        .inc();
                    last_error = err.to_string();
                }
                Err(e) => {
                    let err = MonitorError::Transport { url, source: e };
                    self.metrics
                        .rest_errors
                        .with_label_values(&[self.network.tag(), err.error_type()])
                        .inc();
                    last_error = err.to_string();
                }
            }
            self.rotate();
        }

        Err(MonitorError::AllEndpointsFailed {
            count: self.urls.len(),
            last: last_error,
        })
    }

    /// Probe `/status` on the current endpoint set; rotates like any request
    pub async fn probe(&self) -> MonitorResult<()> {
        let _: serde_json::Value = self.get_json("/status", &[]).await?;
        Ok(())
    }

    /// Height of the latest block
    pub async fn current_height(&self) -> MonitorResult<u64> {
        let envelope: BlockEnvelope = self
            .get_json("/cosmos/base/tendermint/v1beta1/blocks/latest", &[])
            .await?;
        Ok(envelope.block.header.height)
    }

    /// Historical block, used during gap catch-up
    pub async fn block_at(&self, height: u64) -> MonitorResult<BlockEnvelope> {
        self.get_json(&format!("/cosmos/base/tendermint/v1beta1/blocks/{height}"), &[])
            .await
    }

    /// One page of the staking validator list
    pub async fn validators_page(
        &self,
        limit: u32,
        page_key: Option<&str>,
    ) -> MonitorResult<ValidatorsResponse> {
        let mut query: Vec<(&str, String)> = vec![("pagination.limit", limit.to_string())];
        if let Some(key) = page_key {
            query.push(("pagination.key", key.to_string()));
        }
        self.get_json("/cosmos/staking/v1beta1/validators", &query).await
    }

    /// Transactions included at a height, used for checkpoint lookup
    pub async fn txs_at_block(&self, height: u64) -> MonitorResult<BlockTxsResponse> {
        self.get_json(&format!("/cosmos/tx/v1beta1/txs/block/{height}"), &[])
            .await
    }

    pub async fn current_epoch(&self) -> MonitorResult<CurrentEpochResponse> {
        self.get_json("/babylon/epoching/v1/current_epoch", &[]).await
    }

    /// Finality-provider votes cast at a height
    pub async fn finality_votes(&self, height: u64) -> MonitorResult<FinalityVotesResponse> {
        self.get_json(&format!("/babylon/finality/v1/votes/{height}"), &[])
            .await
    }

    /// Finality providers active at a height
    pub async fn active_finality_providers(
        &self,
        height: u64,
    ) -> MonitorResult<ActiveProvidersResponse> {
        self.get_json(&format!("/babylon/finality/v1/finality_providers/{height}"), &[])
            .await
    }

    /// Full finality-provider catalog
    pub async fn finality_provider_catalog(&self) -> MonitorResult<ProviderCatalogResponse> {
        self.get_json(
            "/babylon/btcstaking/v1/finality_providers",
            &[("pagination.limit", "1000".to_string())],
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(urls: Vec<&str>) -> RestClient {
        RestClient::new(
            Network::Mainnet,
            urls.into_iter().map(String::from).collect(),
            Arc::new(MonitorMetrics::new_for_test()),
        )
        .unwrap()
    }

    #[test]
    fn test_empty_url_list_rejected() {
        let result = RestClient::new(
            Network::Mainnet,
            vec![],
            Arc::new(MonitorMetrics::new_for_test()),
        );
        assert!(matches!(result, Err(MonitorError::Config(_))));
    }

    #[test]
    fn test_rotation_is_round_robin() {
        let c = client(vec!["http://a", "http://b", "http://c"]);
        assert_eq!(c.current_url(), "http://a");
        c.rotate();
        assert_eq!(c.current_url(), "http://b");
        c.rotate();
        assert_eq!(c.current_url(), "http://c");
        c.rotate();
        assert_eq!(c.current_url(), "http://a");
    }

    #[tokio::test]
    async fn test_all_endpoints_failing_is_terminal() {
        // Unroutable address: every attempt fails, one per endpoint
        let c = client(vec!["http://127.0.0.1:1", "http://127.0.0.1:2"]);
        let err = c.current_height().await.unwrap_err();
        assert_eq!(err.error_type(), "all_endpoints_failed");
        match err {
            MonitorError::AllEndpointsFailed { count, .. } => assert_eq!(count, 2),
            other => panic!("unexpected error {other:?}"),
        }
    }
}
