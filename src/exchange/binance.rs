// Copyright (C) 2025 Category Labs, Inc.
// SPDX-License-Identifier: GPL-3.0-or-later

//! Binance spot testnet REST client with HMAC-SHA256 request signing.
//!
//! The secret key is never logged or serialized. Signed requests carry the
//! API key as the X-MBX-APIKEY header and a recvWindow tolerating minor
//! clock drift between the bot and the exchange.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use hmac::{Hmac, Mac};
use parking_lot::RwLock;
use serde::Deserialize;
use sha2::Sha256;
use std::collections::HashSet;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, info};

use super::{Fill, OrderGateway, OrderSide, PriceSource};
use crate::error::ExchangeError;

type HmacSha256 = Hmac<Sha256>;

/// Recv-window sent with every signed request (milliseconds).
const RECV_WINDOW: u64 = 5000;

/// REST client for the Binance spot testnet.
pub struct BinanceClient {
    secret: String,
    base_url: String,
    http: reqwest::Client,
    symbols: RwLock<HashSet<String>>,
}

#[derive(Debug, Deserialize)]
struct TickerPrice {
    price: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OrderAck {
    symbol: String,
    order_id: i64,
    status: String,
    executed_qty: String,
    #[serde(default)]
    fills: Vec<FillLeg>,
}

#[derive(Debug, Deserialize)]
struct FillLeg {
    price: String,
    qty: String,
}

#[derive(Debug, Deserialize)]
struct ExchangeInfo {
    symbols: Vec<SymbolInfo>,
}

#[derive(Debug, Deserialize)]
struct SymbolInfo {
    symbol: String,
    status: String,
}

impl BinanceClient {
    /// Create a new `BinanceClient`.
    ///
    /// # Arguments
    /// * `api_key` - sent as a header, never in query params.
    /// * `secret`  - used exclusively for HMAC signing.
    /// * `base_url` - REST endpoint, e.g. `https://testnet.binance.vision`.
    pub fn new(
        api_key: impl Into<String>,
        secret: impl Into<String>,
        base_url: impl Into<String>,
    ) -> Self {
        let api_key = api_key.into();
        let base_url = base_url.into();

        let mut default_headers = reqwest::header::HeaderMap::new();
        if let Ok(val) = reqwest::header::HeaderValue::from_str(&api_key) {
            default_headers.insert("X-MBX-APIKEY", val);
        }

        let http = reqwest::Client::builder()
            .default_headers(default_headers)
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .expect("failed to build reqwest client");

        debug!("BinanceClient initialised (base_url={})", base_url);

        Self {
            secret: secret.into(),
            base_url,
            http,
            symbols: RwLock::new(HashSet::new()),
        }
    }

    /// Produce an HMAC-SHA256 hex signature of `query`.
    fn sign(&self, query: &str) -> String {
        let mut mac =
            HmacSha256::new_from_slice(self.secret.as_bytes()).expect("HMAC accepts any key size");
        mac.update(query.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    /// Current UNIX timestamp in milliseconds.
    fn timestamp_ms() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system clock before UNIX epoch")
            .as_millis() as u64
    }

    /// Build the full query string for a signed request (appends timestamp,
    /// recvWindow, and signature).
    fn signed_query(&self, params: &str) -> String {
        let ts = Self::timestamp_ms();
        let base = if params.is_empty() {
            format!("timestamp={ts}&recvWindow={RECV_WINDOW}")
        } else {
            format!("{params}&timestamp={ts}&recvWindow={RECV_WINDOW}")
        };
        let sig = self.sign(&base);
        format!("{base}&signature={sig}")
    }

    /// GET /api/v3/exchangeInfo and cache the tradable instrument set.
    ///
    /// Returns the number of tradable symbols loaded.
    pub async fn load_markets(&self) -> Result<usize> {
        let url = format!("{}/api/v3/exchangeInfo", self.base_url);

        let resp = self
            .http
            .get(&url)
            .send()
            .await
            .context("GET /api/v3/exchangeInfo request failed")?;

        let status = resp.status();
        if !status.is_success() {
            let body: serde_json::Value = resp.json().await.unwrap_or_default();
            bail!("exchange returned {status} for exchangeInfo: {body}");
        }

        let info: ExchangeInfo = resp
            .json()
            .await
            .context("failed to parse exchangeInfo response")?;

        let tradable: HashSet<String> = info
            .symbols
            .into_iter()
            .filter(|s| s.status == "TRADING")
            .map(|s| s.symbol)
            .collect();

        let count = tradable.len();
        *self.symbols.write() = tradable;

        info!("Loaded {} tradable symbols", count);
        Ok(count)
    }

    /// Whether `symbol` is in the loaded instrument set.
    pub fn has_symbol(&self, symbol: &str) -> bool {
        self.symbols.read().contains(symbol)
    }

    async fn fetch_ticker(&self, symbol: &str) -> Result<f64> {
        let url = format!("{}/api/v3/ticker/price?symbol={}", self.base_url, symbol);

        let resp = self
            .http
            .get(&url)
            .send()
            .await
            .context("GET /api/v3/ticker/price request failed")?;

        let status = resp.status();
        if !status.is_success() {
            let body: serde_json::Value = resp.json().await.unwrap_or_default();
            bail!("exchange returned {status} for ticker: {body}");
        }

        let ticker: TickerPrice = resp
            .json()
            .await
            .context("failed to parse ticker response")?;

        ticker
            .price
            .parse()
            .with_context(|| format!("unparseable ticker price {:?}", ticker.price))
    }

    /// POST /api/v3/order (signed) and map the acknowledgment to a [`Fill`].
    async fn place_order(&self, params: &str, requested_amount: f64) -> Result<Fill> {
        let qs = self.signed_query(params);
        let url = format!("{}/api/v3/order?{}", self.base_url, qs);

        let resp = self
            .http
            .post(&url)
            .send()
            .await
            .context("POST /api/v3/order request failed")?;

        let status = resp.status();
        if !status.is_success() {
            let body: serde_json::Value = resp.json().await.unwrap_or_default();
            bail!("exchange returned {status} for order: {body}");
        }

        let ack: OrderAck = resp
            .json()
            .await
            .context("failed to parse order response")?;

        // Volume-weighted average over the reported fill legs.
        let mut notional = 0.0;
        let mut quantity = 0.0;
        for leg in &ack.fills {
            let price: f64 = leg
                .price
                .parse()
                .with_context(|| format!("unparseable fill price {:?}", leg.price))?;
            let qty: f64 = leg
                .qty
                .parse()
                .with_context(|| format!("unparseable fill qty {:?}", leg.qty))?;
            notional += price * qty;
            quantity += qty;
        }
        let average_price = if quantity > 0.0 {
            Some(notional / quantity)
        } else {
            None
        };

        let amount = ack.executed_qty.parse().unwrap_or(requested_amount);

        debug!(
            "Order {} for {}: status={}, avg={:?}",
            ack.order_id, ack.symbol, ack.status, average_price
        );

        Ok(Fill {
            symbol: ack.symbol,
            order_id: ack.order_id,
            amount,
            average_price,
            status: ack.status,
        })
    }
}

#[async_trait]
impl PriceSource for BinanceClient {
    async fn last_price(&self, symbol: &str) -> Result<f64, ExchangeError> {
        self.fetch_ticker(symbol)
            .await
            .map_err(|source| ExchangeError::PriceUnavailable {
                symbol: symbol.to_string(),
                source,
            })
    }
}

#[async_trait]
impl OrderGateway for BinanceClient {
    async fn market_order(
        &self,
        symbol: &str,
        side: OrderSide,
        amount: f64,
    ) -> Result<Fill, ExchangeError> {
        let params = format!(
            "symbol={}&side={}&type=MARKET&quantity={}",
            symbol,
            side.as_str(),
            amount
        );
        self.place_order(&params, amount)
            .await
            .map_err(|source| ExchangeError::OrderFailed {
                symbol: symbol.to_string(),
                side,
                source,
            })
    }

    async fn limit_order(
        &self,
        symbol: &str,
        side: OrderSide,
        amount: f64,
        price: f64,
    ) -> Result<Fill, ExchangeError> {
        let params = format!(
            "symbol={}&side={}&type=LIMIT&timeInForce=GTC&quantity={}&price={}",
            symbol,
            side.as_str(),
            amount,
            price
        );
        self.place_order(&params, amount)
            .await
            .map_err(|source| ExchangeError::OrderFailed {
                symbol: symbol.to_string(),
                side,
                source,
            })
    }
}
