// Copyright (c) Babylon Liveness Monitor Contributors
// SPDX-License-Identifier: Apache-2.0

//! Liveness-monitoring daemon for Babylon networks
//!
//! Watches the live block stream of a Cosmos-style chain and derives
//! per-signer participation statistics for three consensus roles: block
//! validators, BLS checkpointing validators and BTC-staking finality
//! providers. Degrading participation and status changes produce
//! deduplicated, rate-limited alerts.
//!
//! ## Architecture
//!
//! ```text
//!  EventStream (WS) ──► Router ──► BlockPipeline ────► ValidatorAggregator ─┐
//!                          │            │       └────► ProviderAggregator ──┤
//!                          │            ▼                                   ├─► AlertGovernor ─► AlertSink
//!                          └───► CheckpointPipeline ─► BlsAggregator ───────┘
//!                                       │
//!  RestClient (failover) ◄──────────────┴── Directory (identity catalog)
//! ```
//!
//! One orchestrator per network owns the task set; the repository traits in
//! [`store`] and the [`alert::AlertSink`] trait are the external seams.

pub mod alert;
pub mod config;
pub mod directory;
pub mod encoding;
pub mod error;
pub mod gateway;
pub mod governor;
pub mod metrics;
pub mod network;
pub mod orchestrator;
pub mod pipeline;
pub mod router;
pub mod stats;
pub mod store;
pub mod telegram;
pub mod types;
