// Copyright (C) 2025 Category Labs, Inc.
// SPDX-License-Identifier: GPL-3.0-or-later

//! Shared status-message interval, adjustable at runtime via /interval_msg.

use std::sync::atomic::{AtomicU64, Ordering};
use tracing::info;

/// Seconds between periodic status messages, shared by every monitor.
/// Zero disables status chatter; monitors keep polling at their floor
/// cadence either way.
#[derive(Debug)]
pub struct MessageInterval(AtomicU64);

impl MessageInterval {
    pub fn new(secs: u64) -> Self {
        Self(AtomicU64::new(secs))
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }

    pub fn set(&self, secs: u64) {
        self.0.store(secs, Ordering::Relaxed);
        if secs == 0 {
            info!("📴 Status messages disabled");
        } else {
            info!("⏱️ Status message interval set to {}s", secs);
        }
    }
}
