// Copyright (c) Babylon Liveness Monitor Contributors
// SPDX-License-Identifier: Apache-2.0

//! Block and checkpoint processing pipelines
//!
//! The block pipeline consumes block events in strictly ascending height
//! order with a finality lag; the checkpoint pipeline resolves sealed epochs
//! into BLS participation observations. They share the epoch tracker, which
//! the block pipeline refreshes from the chain every few blocks.

pub mod block;
pub mod checkpoint;

pub use block::BlockPipeline;
pub use checkpoint::CheckpointPipeline;

use crate::gateway::types::CurrentEpochResponse;
use std::sync::atomic::{AtomicU64, Ordering};

/// Blocks per epoch; the upstream boundary is preferred when present
pub const EPOCH_BLOCKS: u64 = 360;

/// Last-known current epoch and its boundary height
#[derive(Debug, Default)]
pub struct EpochTracker {
    current_epoch: AtomicU64,
    epoch_boundary: AtomicU64,
}

impl EpochTracker {
    pub fn update(&self, response: &CurrentEpochResponse) {
        self.current_epoch.store(response.current_epoch, Ordering::Release);
        self.epoch_boundary.store(response.epoch_boundary, Ordering::Release);
    }

    pub fn current_epoch(&self) -> u64 {
        self.current_epoch.load(Ordering::Acquire)
    }

    pub fn epoch_boundary(&self) -> u64 {
        self.epoch_boundary.load(Ordering::Acquire)
    }

    /// First height of `epoch`. Derived from the upstream boundary when it
    /// covers this epoch, otherwise from the fixed epoch length.
    pub fn first_height_of(&self, epoch: u64) -> u64 {
        let boundary = self.epoch_boundary();
        if boundary > 0 && self.current_epoch() == epoch {
            return boundary.saturating_sub(EPOCH_BLOCKS - 1);
        }
        epoch * EPOCH_BLOCKS + 1
    }
}
