// Copyright (C) 2025 Category Labs, Inc.
// SPDX-License-Identifier: GPL-3.0-or-later

//! Exchange connectivity module.

pub mod binance;

pub use binance::BinanceClient;

use async_trait::async_trait;

use crate::error::ExchangeError;

/// Order direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    /// Wire value expected by the exchange.
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderSide::Buy => "BUY",
            OrderSide::Sell => "SELL",
        }
    }
}

impl std::fmt::Display for OrderSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of an accepted order.
#[derive(Debug, Clone)]
pub struct Fill {
    pub symbol: String,
    pub order_id: i64,
    pub amount: f64,
    /// Volume-weighted fill price; `None` when the exchange reported no fills.
    pub average_price: Option<f64>,
    pub status: String,
}

/// Last-trade price feed for a symbol.
#[async_trait]
pub trait PriceSource: Send + Sync {
    async fn last_price(&self, symbol: &str) -> Result<f64, ExchangeError>;
}

/// Order placement.
#[async_trait]
pub trait OrderGateway: Send + Sync {
    async fn market_order(
        &self,
        symbol: &str,
        side: OrderSide,
        amount: f64,
    ) -> Result<Fill, ExchangeError>;

    async fn limit_order(
        &self,
        symbol: &str,
        side: OrderSide,
        amount: f64,
        price: f64,
    ) -> Result<Fill, ExchangeError>;
}
