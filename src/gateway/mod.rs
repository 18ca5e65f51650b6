// Copyright (c) Babylon Liveness Monitor Contributors
// SPDX-License-Identifier: Apache-2.0

//! Chain gateway: REST request/response and the event subscription
//!
//! Both halves hide endpoint failover from their callers. Reconnections may
//! skip heights; closing those gaps is the block pipeline's job, not the
//! gateway's.

pub mod rest;
pub mod types;
pub mod ws;

pub use rest::RestClient;
pub use ws::{EventStream, StreamConfig, EVENT_CHANNEL_CAPACITY};
