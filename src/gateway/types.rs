// Copyright (c) Babylon Liveness Monitor Contributors
// SPDX-License-Identifier: Apache-2.0

//! Wire types for REST responses and stream frames
//!
//! Chain payloads mix naming conventions (snake_case and camelCase co-exist)
//! and encode 64-bit integers as strings. Decoders here accept both forms and
//! tolerate missing optional fields; a payload that still fails to decode
//! fails that one event, never the stream.

use serde::de::{self, Deserializer};
use serde::Deserialize;

// ============================================================================
// Flexible scalar decoding
// ============================================================================

/// Accept a u64 encoded as a JSON number or a decimal string
pub fn flex_u64<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    struct FlexU64;

    impl<'de> de::Visitor<'de> for FlexU64 {
        type Value = u64;

        fn expecting(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.write_str("a u64 as number or string")
        }

        fn visit_u64<E: de::Error>(self, v: u64) -> Result<u64, E> {
            Ok(v)
        }

        fn visit_i64<E: de::Error>(self, v: i64) -> Result<u64, E> {
            u64::try_from(v).map_err(|_| E::custom(format!("negative value {v}")))
        }

        fn visit_str<E: de::Error>(self, v: &str) -> Result<u64, E> {
            v.trim().parse::<u64>().map_err(E::custom)
        }
    }

    deserializer.deserialize_any(FlexU64)
}

/// Accept a u32 encoded as a JSON number or a decimal string
pub fn flex_u32<'de, D>(deserializer: D) -> Result<u32, D::Error>
where
    D: Deserializer<'de>,
{
    let wide = flex_u64(deserializer)?;
    u32::try_from(wide).map_err(de::Error::custom)
}

/// Parse an RFC 3339 block timestamp into milliseconds since the Unix epoch
pub fn parse_rfc3339_ms(raw: &str) -> Option<u64> {
    chrono::DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|dt| dt.timestamp_millis().max(0) as u64)
}

// ============================================================================
// JSON-RPC stream frames
// ============================================================================

/// Outer JSON-RPC frame from the event stream
#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcFrame {
    #[serde(default)]
    pub id: Option<serde_json::Value>,
    #[serde(default)]
    pub result: Option<serde_json::Value>,
    #[serde(default)]
    pub error: Option<serde_json::Value>,
}

impl JsonRpcFrame {
    /// True for subscription acknowledgements: a result with no payload
    pub fn is_ack(&self) -> bool {
        match &self.result {
            Some(serde_json::Value::Object(map)) => map.is_empty(),
            Some(serde_json::Value::Bool(true)) => true,
            _ => false,
        }
    }
}

// ============================================================================
// Blocks and commits
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct BlockEnvelope {
    pub block: RawBlock,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawBlock {
    pub header: BlockHeader,
    #[serde(default, alias = "lastCommit")]
    pub last_commit: Option<Commit>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BlockHeader {
    #[serde(deserialize_with = "flex_u64")]
    pub height: u64,
    #[serde(default)]
    pub time: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Commit {
    #[serde(default, deserialize_with = "flex_u32")]
    pub round: u32,
    #[serde(default)]
    pub signatures: Vec<CommitSignature>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CommitSignature {
    #[serde(default, alias = "blockIdFlag")]
    pub block_id_flag: BlockIdFlag,
    #[serde(default, alias = "validatorAddress")]
    pub validator_address: String,
    #[serde(default)]
    pub signature: Option<String>,
}

/// Commit flag, numeric on the stream and symbolic over REST
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum BlockIdFlag {
    Num(i64),
    Name(String),
}

impl Default for BlockIdFlag {
    fn default() -> Self {
        BlockIdFlag::Num(0)
    }
}

impl BlockIdFlag {
    pub fn is_commit(&self) -> bool {
        match self {
            BlockIdFlag::Num(n) => *n == 2,
            BlockIdFlag::Name(s) => s == "BLOCK_ID_FLAG_COMMIT",
        }
    }
}

impl CommitSignature {
    /// Signed means the commit flag plus non-empty signature bytes
    pub fn is_signed(&self) -> bool {
        self.block_id_flag.is_commit()
            && self.signature.as_deref().map(|s| !s.is_empty()).unwrap_or(false)
    }
}

// ============================================================================
// Validator catalog
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct ValidatorsResponse {
    #[serde(default)]
    pub validators: Vec<RestValidator>,
    #[serde(default)]
    pub pagination: Option<Pagination>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Pagination {
    #[serde(default, alias = "nextKey")]
    pub next_key: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RestValidator {
    #[serde(alias = "operatorAddress")]
    pub operator_address: String,
    #[serde(default, alias = "consensusPubkey")]
    pub consensus_pubkey: Option<ConsensusPubkey>,
    #[serde(default)]
    pub jailed: bool,
    #[serde(default)]
    pub description: Description,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConsensusPubkey {
    #[serde(default, rename = "@type")]
    pub type_url: String,
    #[serde(default)]
    pub key: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Description {
    #[serde(default)]
    pub moniker: String,
}

// ============================================================================
// Epochs
// ============================================================================

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CurrentEpochResponse {
    #[serde(default, alias = "currentEpoch", deserialize_with = "flex_u64")]
    pub current_epoch: u64,
    #[serde(default, alias = "epochBoundary", deserialize_with = "flex_u64")]
    pub epoch_boundary: u64,
}

// ============================================================================
// Transactions (checkpoint lookup)
// ============================================================================

#[derive(Debug, Clone, Default, Deserialize)]
pub struct BlockTxsResponse {
    #[serde(default)]
    pub txs: Vec<Tx>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Tx {
    #[serde(default)]
    pub body: TxBody,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TxBody {
    #[serde(default)]
    pub messages: Vec<serde_json::Value>,
}

/// Message type URI of the injected epoch checkpoint
pub const INJECTED_CHECKPOINT_TYPE_URL: &str = "/babylon.checkpointing.v1.MsgInjectedCheckpoint";

#[derive(Debug, Clone, Deserialize)]
pub struct InjectedCheckpoint {
    #[serde(default, alias = "extendedCommitInfo")]
    pub extended_commit_info: ExtendedCommitInfo,
    #[serde(default)]
    pub ckpt: Option<CheckpointMeta>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ExtendedCommitInfo {
    #[serde(default)]
    pub votes: Vec<ExtendedVote>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExtendedVote {
    #[serde(default)]
    pub validator: Option<VoteValidator>,
    #[serde(default, alias = "blockIdFlag")]
    pub block_id_flag: BlockIdFlag,
    #[serde(default, alias = "extensionSignature")]
    pub extension_signature: Option<String>,
}

impl ExtendedVote {
    pub fn is_signed(&self) -> bool {
        self.block_id_flag.is_commit()
            && self
                .extension_signature
                .as_deref()
                .map(|s| !s.is_empty())
                .unwrap_or(false)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct VoteValidator {
    #[serde(default)]
    pub address: String,
    #[serde(default, deserialize_with = "flex_u64")]
    pub power: u64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CheckpointMeta {
    #[serde(default)]
    pub ckpt: Option<RawCheckpoint>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawCheckpoint {
    #[serde(default, alias = "epochNum", deserialize_with = "flex_u64")]
    pub epoch_num: u64,
}

// ============================================================================
// Finality providers
// ============================================================================

#[derive(Debug, Clone, Default, Deserialize)]
pub struct FinalityVotesResponse {
    #[serde(default, alias = "btcPks")]
    pub btc_pks: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ActiveProvidersResponse {
    #[serde(default, alias = "finalityProviders")]
    pub finality_providers: Vec<ActiveProvider>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ActiveProvider {
    #[serde(default, alias = "btcPkHex", alias = "btc_pk")]
    pub btc_pk_hex: String,
    #[serde(default, alias = "votingPower", deserialize_with = "flex_u64")]
    pub voting_power: u64,
    #[serde(default)]
    pub jailed: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProviderCatalogResponse {
    #[serde(default, alias = "finalityProviders")]
    pub finality_providers: Vec<CatalogProvider>,
    #[serde(default)]
    pub pagination: Option<Pagination>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CatalogProvider {
    #[serde(default, alias = "btcPk", alias = "btc_pk_hex", alias = "btcPkHex")]
    pub btc_pk: String,
    #[serde(default, alias = "address")]
    pub addr: String,
    #[serde(default)]
    pub jailed: bool,
    #[serde(default)]
    pub description: Description,
}
