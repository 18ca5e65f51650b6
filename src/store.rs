// Copyright (c) Babylon Liveness Monitor Contributors
// SPDX-License-Identifier: Apache-2.0

//! Repository abstraction over the persistent store
//!
//! The daemon is written against this trait; the production database lives
//! behind it as an external collaborator. The in-memory implementation keeps
//! the daemon fully functional without a backing database and doubles as the
//! test store. Store failures are never fatal to a pipeline: the caller logs
//! and abandons the single write, and in-memory aggregator state stays
//! authoritative until the next write succeeds.

use crate::network::Network;
use crate::types::{
    BlsCheckpointStats, FinalityProviderInfo, FinalityProviderStats, ValidatorInfo,
    ValidatorSignatureStats,
};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

#[async_trait]
pub trait Store: Send + Sync {
    // Identity records
    async fn upsert_validator(&self, network: Network, info: &ValidatorInfo) -> anyhow::Result<()>;
    async fn find_validator(&self, network: Network, key: &str) -> anyhow::Result<Option<ValidatorInfo>>;
    async fn upsert_provider(&self, network: Network, info: &FinalityProviderInfo) -> anyhow::Result<()>;
    async fn find_provider(&self, network: Network, btc_pk_hex: &str) -> anyhow::Result<Option<FinalityProviderInfo>>;

    // Validator signature stats
    async fn upsert_validator_stats(&self, stats: &ValidatorSignatureStats) -> anyhow::Result<()>;
    async fn validator_stats(&self, network: Network, subject_key: &str) -> anyhow::Result<Option<ValidatorSignatureStats>>;
    async fn list_validator_stats(&self, network: Network) -> anyhow::Result<Vec<ValidatorSignatureStats>>;

    // Finality provider stats
    async fn upsert_provider_stats(&self, stats: &FinalityProviderStats) -> anyhow::Result<()>;
    async fn provider_stats(&self, network: Network, btc_pk_hex: &str) -> anyhow::Result<Option<FinalityProviderStats>>;
    async fn list_provider_stats(&self, network: Network) -> anyhow::Result<Vec<FinalityProviderStats>>;

    // BLS checkpoint stats
    async fn upsert_checkpoint_stats(&self, stats: &BlsCheckpointStats) -> anyhow::Result<()>;
    async fn checkpoint_stats(&self, network: Network, epoch: u64) -> anyhow::Result<Option<BlsCheckpointStats>>;

    // Processing watermark
    async fn latest_processed_height(&self, network: Network) -> anyhow::Result<Option<u64>>;
    async fn set_latest_processed_height(&self, network: Network, height: u64) -> anyhow::Result<()>;
}

/// Open the configured store backend
///
/// The connection string selects the production database; without one the
/// daemon runs on the in-memory store.
pub fn open(connection_string: Option<&str>) -> Arc<dyn Store> {
    if connection_string.map(|uri| !uri.is_empty()).unwrap_or(false) {
        tracing::info!("[Store] store connection configured; no backend linked, using in-memory store");
    } else {
        tracing::info!("[Store] no store configured, running in-memory");
    }
    Arc::new(MemoryStore::default())
}

type Keyed<T> = HashMap<(Network, String), T>;

/// In-memory store implementation
#[derive(Default)]
pub struct MemoryStore {
    validators: RwLock<Keyed<ValidatorInfo>>,
    /// Secondary index: any known key form -> operator address
    validator_aliases: RwLock<Keyed<String>>,
    providers: RwLock<Keyed<FinalityProviderInfo>>,
    validator_stats: RwLock<Keyed<ValidatorSignatureStats>>,
    provider_stats: RwLock<Keyed<FinalityProviderStats>>,
    checkpoint_stats: RwLock<HashMap<(Network, u64), BlsCheckpointStats>>,
    watermarks: RwLock<HashMap<Network, u64>>,
}

#[async_trait]
impl Store for MemoryStore {
    async fn upsert_validator(&self, network: Network, info: &ValidatorInfo) -> anyhow::Result<()> {
        {
            let mut aliases = self.validator_aliases.write().await;
            for key in info.keys() {
                aliases.insert((network, key.to_string()), info.operator_address.clone());
            }
        }
        self.validators
            .write()
            .await
            .insert((network, info.operator_address.clone()), info.clone());
        Ok(())
    }

    async fn find_validator(&self, network: Network, key: &str) -> anyhow::Result<Option<ValidatorInfo>> {
        let aliases = self.validator_aliases.read().await;
        let operator = match aliases.get(&(network, key.to_string())) {
            Some(op) => op.clone(),
            None => return Ok(None),
        };
        drop(aliases);
        Ok(self.validators.read().await.get(&(network, operator)).cloned())
    }

    async fn upsert_provider(&self, network: Network, info: &FinalityProviderInfo) -> anyhow::Result<()> {
        self.providers
            .write()
            .await
            .insert((network, info.btc_pk_hex.clone()), info.clone());
        Ok(())
    }

    async fn find_provider(&self, network: Network, btc_pk_hex: &str) -> anyhow::Result<Option<FinalityProviderInfo>> {
        Ok(self
            .providers
            .read()
            .await
            .get(&(network, btc_pk_hex.to_string()))
            .cloned())
    }

    async fn upsert_validator_stats(&self, stats: &ValidatorSignatureStats) -> anyhow::Result<()> {
        self.validator_stats
            .write()
            .await
            .insert((stats.network, stats.subject_key.clone()), stats.clone());
        Ok(())
    }

    async fn validator_stats(&self, network: Network, subject_key: &str) -> anyhow::Result<Option<ValidatorSignatureStats>> {
        Ok(self
            .validator_stats
            .read()
            .await
            .get(&(network, subject_key.to_string()))
            .cloned())
    }

    async fn list_validator_stats(&self, network: Network) -> anyhow::Result<Vec<ValidatorSignatureStats>> {
        Ok(self
            .validator_stats
            .read()
            .await
            .iter()
            .filter(|((n, _), _)| *n == network)
            .map(|(_, v)| v.clone())
            .collect())
    }

    async fn upsert_provider_stats(&self, stats: &FinalityProviderStats) -> anyhow::Result<()> {
        self.provider_stats
            .write()
            .await
            .insert((stats.network, stats.btc_pk_hex.clone()), stats.clone());
        Ok(())
    }

    async fn provider_stats(&self, network: Network, btc_pk_hex: &str) -> anyhow::Result<Option<FinalityProviderStats>> {
        Ok(self
            .provider_stats
            .read()
            .await
            .get(&(network, btc_pk_hex.to_string()))
            .cloned())
    }

    async fn list_provider_stats(&self, network: Network) -> anyhow::Result<Vec<FinalityProviderStats>> {
        Ok(self
            .provider_stats
            .read()
            .await
            .iter()
            .filter(|((n, _), _)| *n == network)
            .map(|(_, v)| v.clone())
            .collect())
    }

    async fn upsert_checkpoint_stats(&self, stats: &BlsCheckpointStats) -> anyhow::Result<()> {
        self.checkpoint_stats
            .write()
            .await
            .insert((stats.network, stats.epoch), stats.clone());
        Ok(())
    }

    async fn checkpoint_stats(&self, network: Network, epoch: u64) -> anyhow::Result<Option<BlsCheckpointStats>> {
        Ok(self
            .checkpoint_stats
            .read()
            .await
            .get(&(network, epoch))
            .cloned())
    }

    async fn latest_processed_height(&self, network: Network) -> anyhow::Result<Option<u64>> {
        Ok(self.watermarks.read().await.get(&network).copied())
    }

    async fn set_latest_processed_height(&self, network: Network, height: u64) -> anyhow::Result<()> {
        let mut watermarks = self.watermarks.write().await;
        let entry = watermarks.entry(network).or_insert(0);
        if height > *entry {
            *entry = height;
        }
        Ok(())
    }
}
