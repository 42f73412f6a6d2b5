// Copyright (C) 2025 Category Labs, Inc.
// SPDX-License-Identifier: GPL-3.0-or-later

//! Error types shared across the bot.

use thiserror::Error;

use crate::exchange::OrderSide;

/// Failures from the exchange connectivity layer.
#[derive(Debug, Error)]
pub enum ExchangeError {
    /// Transient: the caller skips the current tick and retries later.
    #[error("price unavailable for {symbol}")]
    PriceUnavailable {
        symbol: String,
        #[source]
        source: anyhow::Error,
    },

    /// Terminal for the operation that issued the order.
    #[error("{side} order failed for {symbol}")]
    OrderFailed {
        symbol: String,
        side: OrderSide,
        #[source]
        source: anyhow::Error,
    },
}

/// Rejections raised before a position is ever created.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("symbol {0} is not listed on the exchange")]
    UnknownSymbol(String),

    #[error("trade amount must be positive, got {0}")]
    NonPositiveAmount(f64),

    #[error("{name} percent must be between 0 and 100 (exclusive), got {value}")]
    PercentOutOfRange { name: &'static str, value: f64 },
}

/// Failures from registry lookups.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("no operation with number {index}; {len} active")]
    NotFound { index: usize, len: usize },
}
