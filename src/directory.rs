// Copyright (c) Babylon Liveness Monitor Contributors
// SPDX-License-Identifier: Apache-2.0

//! Directory: validator and finality-provider identity catalog
//!
//! The catalog is refreshed periodically from the chain and swapped
//! atomically under a write lock; lookups run against the in-memory catalog
//! first and fall through to the store, warming the catalog with every alias
//! of a hit. Jailed-flag changes are detected during refresh and returned to
//! the caller; the first sighting of a subject establishes its baseline
//! without a transition.

use crate::encoding::consensus_address;
use crate::error::MonitorResult;
use crate::gateway::RestClient;
use crate::metrics::MonitorMetrics;
use crate::network::Network;
use crate::store::Store;
use crate::types::{FinalityProviderInfo, JailedTransition, ValidatorInfo};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

const VALIDATOR_PAGE_LIMIT: u32 = 200;

#[derive(Default)]
struct Catalog {
    /// Every known key form maps to the same record
    validators_by_key: HashMap<String, Arc<ValidatorInfo>>,
    /// Unique records, one per operator address
    validators: Vec<Arc<ValidatorInfo>>,
    /// Keyed by lowercase BTC public key hex
    providers: HashMap<String, FinalityProviderInfo>,
}

pub struct Directory {
    network: Network,
    rest: Arc<RestClient>,
    store: Arc<dyn Store>,
    metrics: Arc<MonitorMetrics>,
    catalog: RwLock<Catalog>,
}

impl Directory {
    pub fn new(
        network: Network,
        rest: Arc<RestClient>,
        store: Arc<dyn Store>,
        metrics: Arc<MonitorMetrics>,
    ) -> Self {
        Self {
            network,
            rest,
            store,
            metrics,
            catalog: RwLock::new(Catalog::default()),
        }
    }

    /// Fetch both catalogs, swap them in atomically and persist every record.
    /// Returns the jailed/active transitions observed against the previous
    /// catalog.
    pub async fn refresh(&self) -> MonitorResult<Vec<JailedTransition>> {
        let validators = self.fetch_validators().await?;
        let providers = self.fetch_providers().await?;
        Ok(self.apply_refresh(validators, providers).await)
    }

    /// Diff against the previous catalog, persist and swap. Split from the
    /// fetch half so the transition logic is exercised without a node.
    async fn apply_refresh(
        &self,
        validators: Vec<ValidatorInfo>,
        providers: HashMap<String, FinalityProviderInfo>,
    ) -> Vec<JailedTransition> {
        let mut transitions = Vec::new();
        {
            let old = self.catalog.read().await;
            for v in &validators {
                if let Some(prev) = old.validators_by_key.get(&v.operator_address) {
                    if prev.jailed != v.jailed {
                        transitions.push(JailedTransition {
                            subject_key: v.operator_address.clone(),
                            moniker: v.moniker.clone(),
                            jailed: v.jailed,
                            is_finality_provider: false,
                        });
                    }
                }
            }
            for p in providers.values() {
                if let Some(prev) = old.providers.get(&p.btc_pk_hex) {
                    if prev.jailed != p.jailed {
                        transitions.push(JailedTransition {
                            subject_key: p.btc_pk_hex.clone(),
                            moniker: p.moniker.clone(),
                            jailed: p.jailed,
                            is_finality_provider: true,
                        });
                    }
                }
            }
        }

        let mut by_key = HashMap::new();
        let mut unique = Vec::with_capacity(validators.len());
        for v in validators {
            let record = Arc::new(v);
            for key in record.keys() {
                by_key.insert(key.to_string(), record.clone());
            }
            unique.push(record);
        }

        self.metrics
            .directory_validators
            .with_label_values(&[self.network.tag()])
            .set(unique.len() as i64);
        self.metrics
            .directory_providers
            .with_label_values(&[self.network.tag()])
            .set(providers.len() as i64);

        // Persist before the swap so a store failure never leaves the memory
        // catalog ahead of an error return; individual failures only log
        for record in &unique {
            if let Err(e) = self.store.upsert_validator(self.network, record).await {
                warn!("[Directory] {} validator persist failed: {e:#}", self.network);
            }
        }
        for record in providers.values() {
            if let Err(e) = self.store.upsert_provider(self.network, record).await {
                warn!("[Directory] {} provider persist failed: {e:#}", self.network);
            }
        }

        let mut catalog = self.catalog.write().await;
        catalog.validators_by_key = by_key;
        catalog.validators = unique;
        catalog.providers = providers;
        info!(
            "[Directory] {} refreshed: {} validators, {} providers, {} transitions",
            self.network,
            catalog.validators.len(),
            catalog.providers.len(),
            transitions.len()
        );
        transitions
    }

    async fn fetch_validators(&self) -> MonitorResult<Vec<ValidatorInfo>> {
        let mut all = Vec::new();
        let mut page_key: Option<String> = None;

        loop {
            let page = self
                .rest
                .validators_page(VALIDATOR_PAGE_LIMIT, page_key.as_deref())
                .await?;
            for v in page.validators {
                let pubkey = match &v.consensus_pubkey {
                    Some(pk) if !pk.key.is_empty() => pk.key.clone(),
                    _ => {
                        debug!(
                            "[Directory] {} validator {} has no consensus key, skipping",
                            self.network, v.operator_address
                        );
                        continue;
                    }
                };
                let derived = match consensus_address(&pubkey, self.network.valcons_prefix()) {
                    Ok(d) => d,
                    Err(e) => {
                        warn!(
                            "[Directory] {} cannot derive address for {}: {e}",
                            self.network, v.operator_address
                        );
                        continue;
                    }
                };
                all.push(ValidatorInfo {
                    operator_address: v.operator_address,
                    consensus_address: derived.bech32,
                    consensus_hex: derived.hex,
                    moniker: v.description.moniker,
                    jailed: v.jailed,
                });
            }
            page_key = page.pagination.and_then(|p| p.next_key).filter(|k| !k.is_empty());
            if page_key.is_none() {
                break;
            }
        }
        Ok(all)
    }

    async fn fetch_providers(&self) -> MonitorResult<HashMap<String, FinalityProviderInfo>> {
        let catalog = self.rest.finality_provider_catalog().await?;
        let previous_active: HashMap<String, bool> = {
            let cat = self.catalog.read().await;
            cat.providers
                .iter()
                .map(|(k, p)| (k.clone(), p.is_active))
                .collect()
        };

        let mut providers = HashMap::new();
        for p in catalog.finality_providers {
            if p.btc_pk.is_empty() {
                continue;
            }
            let pk = p.btc_pk.to_ascii_lowercase();
            // Active flags come from the per-height endpoint; carry the last
            // known value across refreshes
            let is_active = previous_active.get(&pk).copied().unwrap_or(false);
            providers.insert(
                pk.clone(),
                FinalityProviderInfo {
                    btc_pk_hex: pk,
                    owner_address: p.addr,
                    moniker: p.description.moniker,
                    jailed: p.jailed,
                    is_active,
                },
            );
        }
        Ok(providers)
    }

    /// Resolve a validator by any of its key forms; store misses warm the
    /// memory catalog with every alias of the hit
    pub async fn lookup_validator(&self, key: &str) -> Option<Arc<ValidatorInfo>> {
        let normalized = normalize_key(key);
        {
            let catalog = self.catalog.read().await;
            if let Some(record) = catalog.validators_by_key.get(&normalized) {
                return Some(record.clone());
            }
        }

        match self.store.find_validator(self.network, &normalized).await {
            Ok(Some(info)) => {
                let record = Arc::new(info);
                let mut catalog = self.catalog.write().await;
                for alias in record.keys() {
                    catalog.validators_by_key.insert(alias.to_string(), record.clone());
                }
                Some(record)
            }
            Ok(None) => None,
            Err(e) => {
                warn!("[Directory] {} store lookup failed for {key}: {e:#}", self.network);
                None
            }
        }
    }

    /// Resolve a finality provider by BTC public key
    pub async fn lookup_provider(&self, btc_pk_hex: &str) -> Option<FinalityProviderInfo> {
        let pk = btc_pk_hex.to_ascii_lowercase();
        {
            let catalog = self.catalog.read().await;
            if let Some(record) = catalog.providers.get(&pk) {
                return Some(record.clone());
            }
        }
        match self.store.find_provider(self.network, &pk).await {
            Ok(Some(info)) => {
                let mut catalog = self.catalog.write().await;
                catalog.providers.insert(pk, info.clone());
                Some(info)
            }
            Ok(None) => None,
            Err(e) => {
                warn!("[Directory] {} store lookup failed for {pk}: {e:#}", self.network);
                None
            }
        }
    }

    /// All validators in the current catalog
    pub async fn validators_snapshot(&self) -> Vec<Arc<ValidatorInfo>> {
        self.catalog.read().await.validators.clone()
    }

    /// Providers active at `height`, refreshed from the chain; updates the
    /// catalog's `is_active` flags as a side effect
    pub async fn active_finality_providers(
        &self,
        height: u64,
    ) -> MonitorResult<Vec<FinalityProviderInfo>> {
        let response = self.rest.active_finality_providers(height).await?;
        let active_pks: HashSet<String> = response
            .finality_providers
            .iter()
            .map(|p| p.btc_pk_hex.to_ascii_lowercase())
            .filter(|pk| !pk.is_empty())
            .collect();

        let mut catalog = self.catalog.write().await;
        for (pk, provider) in catalog.providers.iter_mut() {
            provider.is_active = active_pks.contains(pk);
        }

        let mut active: Vec<FinalityProviderInfo> = active_pks
            .iter()
            .map(|pk| {
                catalog.providers.get(pk).cloned().unwrap_or_else(|| FinalityProviderInfo {
                    btc_pk_hex: pk.clone(),
                    owner_address: String::new(),
                    moniker: String::new(),
                    jailed: false,
                    is_active: true,
                })
            })
            .collect();
        active.sort_by(|a, b| a.btc_pk_hex.cmp(&b.btc_pk_hex));
        Ok(active)
    }

    /// Seed the catalog directly; test hook for pipeline and aggregator tests
    #[cfg(test)]
    pub async fn seed(
        &self,
        validators: Vec<ValidatorInfo>,
        providers: Vec<FinalityProviderInfo>,
    ) {
        let mut catalog = self.catalog.write().await;
        catalog.validators_by_key.clear();
        catalog.validators.clear();
        for v in validators {
            let record = Arc::new(v);
            for key in record.keys() {
                catalog.validators_by_key.insert(key.to_string(), record.clone());
            }
            catalog.validators.push(record);
        }
        catalog.providers = providers.into_iter().map(|p| (p.btc_pk_hex.clone(), p)).collect();
    }
}

/// Commit signatures carry hex addresses in mixed case; bech32 keys pass
/// through untouched
fn normalize_key(key: &str) -> String {
    let trimmed = key.trim();
    if trimmed.len() == 40 && trimmed.chars().all(|c| c.is_ascii_hexdigit()) {
        trimmed.to_ascii_uppercase()
    } else {
        trimmed.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn directory() -> Directory {
        let metrics = Arc::new(MonitorMetrics::new_for_test());
        let rest = Arc::new(
            RestClient::new(Network::Mainnet, vec!["http://127.0.0.1:1".to_string()], metrics.clone())
                .unwrap(),
        );
        Directory::new(Network::Mainnet, rest, Arc::new(MemoryStore::default()), metrics)
    }

    fn validator(op: &str, hexaddr: &str, jailed: bool) -> ValidatorInfo {
        ValidatorInfo {
            operator_address: op.to_string(),
            consensus_address: format!("bbnvalcons{op}"),
            consensus_hex: hexaddr.to_string(),
            moniker: format!("moniker-{op}"),
            jailed,
        }
    }

    #[tokio::test]
    async fn test_lookup_by_any_key_returns_same_record() {
        let dir = directory();
        dir.seed(vec![validator("1abc", "AABBCCDDEEFF00112233445566778899AABBCCDD", false)], vec![])
            .await;

        let by_op = dir.lookup_validator("1abc").await.unwrap();
        let by_cons = dir.lookup_validator("bbnvalcons1abc").await.unwrap();
        let by_hex = dir
            .lookup_validator("aabbccddeeff00112233445566778899aabbccdd")
            .await
            .unwrap();
        assert_eq!(by_op.operator_address, by_cons.operator_address);
        assert_eq!(by_cons.operator_address, by_hex.operator_address);
    }

    #[tokio::test]
    async fn test_unknown_key_is_none_not_error() {
        let dir = directory();
        assert!(dir.lookup_validator("does-not-exist").await.is_none());
        assert!(dir.lookup_provider("ffff").await.is_none());
    }

    #[tokio::test]
    async fn test_store_hit_warms_catalog() {
        let metrics = Arc::new(MonitorMetrics::new_for_test());
        let rest = Arc::new(
            RestClient::new(Network::Mainnet, vec!["http://127.0.0.1:1".to_string()], metrics.clone())
                .unwrap(),
        );
        let store = Arc::new(MemoryStore::default());
        let info = validator("1warm", "AA00000000000000000000000000000000000000", false);
        store.upsert_validator(Network::Mainnet, &info).await.unwrap();

        let dir = Directory::new(Network::Mainnet, rest, store, metrics);
        // Miss in memory, hit in store
        let found = dir.lookup_validator("1warm").await.unwrap();
        assert_eq!(found.moniker, "moniker-1warm");

        // Aliases are now warm: hex lookup resolves without another store hit
        let by_hex = dir
            .lookup_validator("aa00000000000000000000000000000000000000")
            .await
            .unwrap();
        assert_eq!(by_hex.operator_address, "1warm");
    }

    #[tokio::test]
    async fn test_provider_lookup_case_insensitive() {
        let dir = directory();
        dir.seed(
            vec![],
            vec![FinalityProviderInfo {
                btc_pk_hex: "aabb01".to_string(),
                owner_address: "bbn1x".to_string(),
                moniker: "fp-one".to_string(),
                jailed: false,
                is_active: true,
            }],
        )
        .await;
        assert!(dir.lookup_provider("AABB01").await.is_some());
        assert!(dir.lookup_provider("aabb01").await.is_some());
    }

    fn provider(pk: &str, jailed: bool) -> FinalityProviderInfo {
        FinalityProviderInfo {
            btc_pk_hex: pk.to_string(),
            owner_address: "bbn1owner".to_string(),
            moniker: format!("fp-{pk}"),
            jailed,
            is_active: true,
        }
    }

    #[tokio::test]
    async fn test_first_refresh_sets_baseline_without_transitions() {
        let dir = directory();
        let providers: HashMap<_, _> = [("pk1".to_string(), provider("pk1", true))].into();
        let transitions = dir
            .apply_refresh(vec![validator("1a", "AA00", false)], providers)
            .await;
        assert!(transitions.is_empty());
    }

    #[tokio::test]
    async fn test_jailed_transition_detected_once() {
        let dir = directory();

        // Refresh 1: provider not jailed
        let transitions = dir
            .apply_refresh(
                vec![],
                [("pk1".to_string(), provider("pk1", false))].into(),
            )
            .await;
        assert!(transitions.is_empty());

        // Refresh 2: provider jailed -> exactly one transition
        let transitions = dir
            .apply_refresh(
                vec![],
                [("pk1".to_string(), provider("pk1", true))].into(),
            )
            .await;
        assert_eq!(transitions.len(), 1);
        assert!(transitions[0].jailed);
        assert!(transitions[0].is_finality_provider);
        assert_eq!(transitions[0].subject_key, "pk1");

        // Refresh 3: flag unchanged -> no transition
        let transitions = dir
            .apply_refresh(
                vec![],
                [("pk1".to_string(), provider("pk1", true))].into(),
            )
            .await;
        assert!(transitions.is_empty());
    }

    #[tokio::test]
    async fn test_validator_unjail_transition() {
        let dir = directory();
        dir.apply_refresh(vec![validator("1a", "AA00", true)], HashMap::new())
            .await;
        let transitions = dir
            .apply_refresh(vec![validator("1a", "AA00", false)], HashMap::new())
            .await;
        assert_eq!(transitions.len(), 1);
        assert!(!transitions[0].jailed);
        assert!(!transitions[0].is_finality_provider);
    }

    #[test]
    fn test_normalize_key_only_touches_hex() {
        assert_eq!(
            normalize_key("aabbccddeeff00112233445566778899aabbccdd"),
            "AABBCCDDEEFF00112233445566778899AABBCCDD"
        );
        assert_eq!(normalize_key("bbnvaloper1abc"), "bbnvaloper1abc");
        assert_eq!(normalize_key("  bbnvaloper1abc "), "bbnvaloper1abc");
    }
}
