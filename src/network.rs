// Copyright (c) Babylon Liveness Monitor Contributors
// SPDX-License-Identifier: Apache-2.0

//! Network identity for monitored Babylon chains
//!
//! Two networks run concurrently, each with its own orchestrator and its own
//! endpoint set. Records written to the store are tagged with the network so
//! the two instances never collide.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    Mainnet,
    Testnet,
}

impl Network {
    /// Human-readable name used in alert titles and log lines
    pub fn name(&self) -> &'static str {
        match self {
            Network::Mainnet => "Babylon Mainnet",
            Network::Testnet => "Babylon Testnet",
        }
    }

    /// Short tag used as a store key component and metrics label
    pub fn tag(&self) -> &'static str {
        match self {
            Network::Mainnet => "mainnet",
            Network::Testnet => "testnet",
        }
    }

    /// Bech32 prefix for consensus addresses derived from validator keys
    pub fn valcons_prefix(&self) -> &'static str {
        // Babylon uses the same account prefix on both networks
        match self {
            Network::Mainnet | Network::Testnet => "bbnvalcons",
        }
    }
}

impl std::fmt::Display for Network {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.tag())
    }
}
