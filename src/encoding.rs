// Copyright (c) Babylon Liveness Monitor Contributors
// SPDX-License-Identifier: Apache-2.0

//! Consensus-key address derivation
//!
//! A validator's consensus address is the first 20 bytes of the SHA-256 of
//! its consensus public key, rendered either as uppercase hex (the form block
//! commits carry) or bech32 with the network's `valcons` prefix.

use crate::error::{MonitorError, MonitorResult};
use base64ct::{Base64, Encoding};
use bech32::{ToBase32, Variant};
use sha2::{Digest, Sha256};

/// Derived address forms for one consensus public key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsensusAddress {
    pub bech32: String,
    pub hex: String,
}

/// Derive both consensus address forms from a base64-encoded consensus key
pub fn consensus_address(pubkey_base64: &str, valcons_prefix: &str) -> MonitorResult<ConsensusAddress> {
    let key_bytes = Base64::decode_vec(pubkey_base64.trim())
        .map_err(|e| MonitorError::Encoding(format!("invalid base64 consensus key: {e}")))?;
    let digest = Sha256::digest(&key_bytes);
    let addr_bytes = &digest[..20];

    let bech = bech32::encode(valcons_prefix, addr_bytes.to_base32(), Variant::Bech32)
        .map_err(|e| MonitorError::Encoding(format!("bech32 encode failed: {e}")))?;

    Ok(ConsensusAddress {
        bech32: bech,
        hex: hex::encode_upper(addr_bytes),
    })
}

/// Normalize a commit-signature validator address to uppercase hex
///
/// REST block payloads carry the address base64-encoded while stream payloads
/// carry it as hex; both collapse to the same 20-byte value.
pub fn normalize_signer_address(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    if trimmed.len() == 40 && trimmed.chars().all(|c| c.is_ascii_hexdigit()) {
        return Some(trimmed.to_ascii_uppercase());
    }
    if let Ok(bytes) = Base64::decode_vec(trimmed) {
        if bytes.len() == 20 {
            return Some(hex::encode_upper(&bytes));
        }
    }
    None
}
