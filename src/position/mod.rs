// Copyright (C) 2025 Category Labs, Inc.
// SPDX-License-Identifier: GPL-3.0-or-later

//! Position management module.

pub mod monitor;
pub mod registry;

pub use monitor::{spawn_monitor, ExitReason, MonitorConfig, PositionMonitor};
pub use registry::{Position, PositionHandle, PositionRegistry, PositionStatus};
