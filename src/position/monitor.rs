// Copyright (C) 2025 Category Labs, Inc.
// SPDX-License-Identifier: GPL-3.0-or-later

//! Per-position exit state machine: entry order, trailing-stop ratchet,
//! interval-gated status messages, and the exit sell.

use std::sync::Arc;
use std::time::Duration;
use teloxide::types::ChatId;
use tokio::time::{interval, Instant};
use tracing::{error, info, warn};

use crate::config::Config;
use crate::exchange::{Fill, OrderGateway, OrderSide, PriceSource};
use crate::position::registry::{PositionHandle, PositionRegistry};
use crate::settings::MessageInterval;
use crate::telegram::NotificationSink;

/// Why a position is being exited. Stop loss wins when both levels are
/// breached by the same sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    StopLoss,
    TrailingStop,
}

/// Monitoring cadence and failure tolerance.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Seconds between price polls, independent of the status-message cadence.
    pub poll_floor_secs: u64,
    /// Consecutive failed polls tolerated before the position is abandoned.
    pub price_retry_budget: u32,
}

impl MonitorConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            poll_floor_secs: config.poll_floor_secs,
            price_retry_budget: config.price_retry_budget,
        }
    }
}

/// Drives one position from entry to exit. One instance per position,
/// running concurrently with all others; the registry entry addressed by
/// `handle` is the only shared state it mutates.
pub struct PositionMonitor<E, N> {
    exchange: Arc<E>,
    notifier: Arc<N>,
    registry: Arc<PositionRegistry>,
    interval: Arc<MessageInterval>,
    config: MonitorConfig,
    chat: ChatId,
    handle: PositionHandle,
}

impl<E, N> PositionMonitor<E, N>
where
    E: PriceSource + OrderGateway + Send + Sync + 'static,
    N: NotificationSink + Send + Sync + 'static,
{
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        exchange: Arc<E>,
        notifier: Arc<N>,
        registry: Arc<PositionRegistry>,
        interval: Arc<MessageInterval>,
        config: MonitorConfig,
        chat: ChatId,
        handle: PositionHandle,
    ) -> Self {
        Self {
            exchange,
            notifier,
            registry,
            interval,
            config,
            chat,
            handle,
        }
    }

    async fn run(self) {
        let Some(pending) = self.registry.get(self.handle) else {
            return;
        };
        let symbol = pending.symbol.clone();

        // ── Entry ──
        let buy = match self
            .exchange
            .market_order(&symbol, OrderSide::Buy, pending.trade_amount)
            .await
        {
            Ok(fill) => fill,
            Err(e) => {
                error!("❌ Buy order failed for {}: {}", symbol, e);
                self.notifier
                    .send(self.chat, &format!("❌ Buy order failed for {}: {}", symbol, e))
                    .await;
                self.registry.remove_by_handle(self.handle);
                return;
            }
        };

        self.notifier
            .send(self.chat, &fill_report("🟢 Buy order executed", &buy))
            .await;

        let entry_price = match buy.average_price {
            Some(price) => price,
            // No average on the fill: take one fresh sample instead.
            None => match self.exchange.last_price(&symbol).await {
                Ok(price) => price,
                Err(e) => {
                    error!("❌ Could not determine entry price for {}: {}", symbol, e);
                    self.notifier
                        .send(
                            self.chat,
                            &format!("❌ Could not determine an entry price for {}.", symbol),
                        )
                        .await;
                    self.registry.remove_by_handle(self.handle);
                    return;
                }
            },
        };

        let stop_loss_price = entry_price * (1.0 - pending.stop_loss_percent / 100.0);
        if self
            .registry
            .activate(self.handle, entry_price, stop_loss_price)
            .is_none()
        {
            info!("Operation for {} removed before activation, monitor stopping", symbol);
            return;
        }

        info!(
            "📈 Position opened: {} entry={} stop_loss={} trailing={}",
            symbol, entry_price, stop_loss_price, entry_price
        );
        self.notifier
            .send(
                self.chat,
                &format!(
                    "📈 Position opened for {}\nEntry price: {}\nStop loss: {} ({}%)\nTrailing stop: {} ({}%)",
                    symbol,
                    entry_price,
                    stop_loss_price,
                    pending.stop_loss_percent,
                    entry_price,
                    pending.trailing_stop_percent
                ),
            )
            .await;

        // ── Active ──
        let mut ticker = interval(Duration::from_secs(self.config.poll_floor_secs.max(1)));
        let mut last_status = Instant::now();
        let mut failed_polls: u32 = 0;

        let (reason, exit_price) = loop {
            ticker.tick().await;

            // Deleting the operation cancels the monitor before it acts.
            if !self.registry.contains(self.handle) {
                info!("Operation for {} removed, monitor stopping", symbol);
                return;
            }

            let current_price = match self.exchange.last_price(&symbol).await {
                Ok(price) => {
                    failed_polls = 0;
                    price
                }
                Err(e) => {
                    failed_polls += 1;
                    warn!(
                        "Price poll {}/{} failed for {}: {}",
                        failed_polls, self.config.price_retry_budget, symbol, e
                    );
                    if failed_polls >= self.config.price_retry_budget {
                        error!(
                            "❌ Price feed lost for {}, abandoning automated management",
                            symbol
                        );
                        self.notifier
                            .send(
                                self.chat,
                                &format!(
                                    "⚠️ No price for {} after {} consecutive polls. Monitoring stopped; the position needs manual attention.",
                                    symbol, failed_polls
                                ),
                            )
                            .await;
                        self.registry.mark_abandoned(self.handle);
                        return;
                    }
                    continue;
                }
            };

            let candidate = current_price * (1.0 - pending.trailing_stop_percent / 100.0);
            let Some(trailing_stop_price) = self.registry.ratchet_trailing(self.handle, candidate)
            else {
                info!("Operation for {} removed, monitor stopping", symbol);
                return;
            };

            let status_every = self.interval.get();
            if status_every > 0 && last_status.elapsed() >= Duration::from_secs(status_every) {
                self.notifier
                    .send(
                        self.chat,
                        &format!(
                            "Current price: {}\nTrailing stop: {} ({}%)\nStop loss: {} ({}%)\nEntry: {}",
                            current_price,
                            trailing_stop_price,
                            pending.trailing_stop_percent,
                            stop_loss_price,
                            pending.stop_loss_percent,
                            entry_price
                        ),
                    )
                    .await;
                last_status = Instant::now();
            }

            // Stop loss first: the more severe condition takes priority when
            // both levels are breached by the same sample.
            if current_price < stop_loss_price {
                break (ExitReason::StopLoss, current_price);
            }
            if current_price < trailing_stop_price {
                break (ExitReason::TrailingStop, current_price);
            }
        };

        // ── Exit ──
        if !self.registry.begin_exit(self.handle) {
            info!("Operation for {} removed before exit, monitor stopping", symbol);
            return;
        }

        let (emoji, trigger) = match reason {
            ExitReason::StopLoss => ("🛑", "Stop loss"),
            ExitReason::TrailingStop => ("📉", "Trailing stop"),
        };
        info!("{} {} hit for {} at {}. Selling...", emoji, trigger, symbol, exit_price);
        self.notifier
            .send(
                self.chat,
                &format!("{} {} hit for {} at {}. Selling...", emoji, trigger, symbol, exit_price),
            )
            .await;

        match self
            .exchange
            .market_order(&symbol, OrderSide::Sell, pending.trade_amount)
            .await
        {
            Ok(fill) => {
                info!("✅ SELL executed for {}: order {}", symbol, fill.order_id);
                self.notifier
                    .send(self.chat, &fill_report("✅ Sell order executed", &fill))
                    .await;
                self.registry.remove_by_handle(self.handle);
            }
            Err(e) => {
                error!("❌ Sell order failed for {}: {}", symbol, e);
                self.notifier
                    .send(
                        self.chat,
                        &format!(
                            "❌ Sell order failed for {}: {}\nThe position is no longer managed automatically and needs manual attention.",
                            symbol, e
                        ),
                    )
                    .await;
                self.registry.mark_abandoned(self.handle);
            }
        }
    }
}

fn fill_report(heading: &str, fill: &Fill) -> String {
    format!(
        "{} for {}\n - Order ID: {}\n - Amount: {}\n - Price: {}\n - Status: {}",
        heading,
        fill.symbol,
        fill.order_id,
        fill.amount,
        fill.average_price
            .map(|p| p.to_string())
            .unwrap_or_else(|| "N/A".to_string()),
        fill.status
    )
}

/// Spawn the monitor as a background task bound 1:1 to the registry entry
/// addressed by `handle`.
#[allow(clippy::too_many_arguments)]
pub fn spawn_monitor<E, N>(
    exchange: Arc<E>,
    notifier: Arc<N>,
    registry: Arc<PositionRegistry>,
    interval: Arc<MessageInterval>,
    config: MonitorConfig,
    chat: ChatId,
    handle: PositionHandle,
) -> tokio::task::JoinHandle<()>
where
    E: PriceSource + OrderGateway + Send + Sync + 'static,
    N: NotificationSink + Send + Sync + 'static,
{
    let monitor = PositionMonitor::new(exchange, notifier, registry, interval, config, chat, handle);
    tokio::spawn(monitor.run())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ExchangeError;
    use crate::position::registry::{Position, PositionStatus};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};

    const CHAT: ChatId = ChatId(7);

    /// Scripted exchange: pops one entry per poll, repeats the last price
    /// once the script runs dry. `None` entries simulate a feed outage.
    struct ScriptedExchange {
        fill_price: Option<f64>,
        fail_buy: bool,
        fail_sell: bool,
        prices: Mutex<VecDeque<Option<f64>>>,
        last: Mutex<f64>,
        polls: AtomicU32,
        buys: AtomicU32,
        sells: AtomicU32,
    }

    impl ScriptedExchange {
        fn new(fill_price: Option<f64>, prices: &[Option<f64>]) -> Self {
            Self {
                fill_price,
                fail_buy: false,
                fail_sell: false,
                prices: Mutex::new(prices.iter().copied().collect()),
                last: Mutex::new(fill_price.unwrap_or(0.0)),
                polls: AtomicU32::new(0),
                buys: AtomicU32::new(0),
                sells: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl PriceSource for ScriptedExchange {
        async fn last_price(&self, symbol: &str) -> Result<f64, ExchangeError> {
            self.polls.fetch_add(1, Ordering::SeqCst);
            match self.prices.lock().pop_front() {
                Some(Some(price)) => {
                    *self.last.lock() = price;
                    Ok(price)
                }
                Some(None) => Err(ExchangeError::PriceUnavailable {
                    symbol: symbol.to_string(),
                    source: anyhow::anyhow!("scripted outage"),
                }),
                None => Ok(*self.last.lock()),
            }
        }
    }

    #[async_trait]
    impl OrderGateway for ScriptedExchange {
        async fn market_order(
            &self,
            symbol: &str,
            side: OrderSide,
            amount: f64,
        ) -> Result<Fill, ExchangeError> {
            match side {
                OrderSide::Buy => {
                    self.buys.fetch_add(1, Ordering::SeqCst);
                    if self.fail_buy {
                        return Err(ExchangeError::OrderFailed {
                            symbol: symbol.to_string(),
                            side,
                            source: anyhow::anyhow!("scripted rejection"),
                        });
                    }
                    Ok(Fill {
                        symbol: symbol.to_string(),
                        order_id: 1,
                        amount,
                        average_price: self.fill_price,
                        status: "FILLED".to_string(),
                    })
                }
                OrderSide::Sell => {
                    self.sells.fetch_add(1, Ordering::SeqCst);
                    if self.fail_sell {
                        return Err(ExchangeError::OrderFailed {
                            symbol: symbol.to_string(),
                            side,
                            source: anyhow::anyhow!("scripted rejection"),
                        });
                    }
                    Ok(Fill {
                        symbol: symbol.to_string(),
                        order_id: 2,
                        amount,
                        average_price: Some(*self.last.lock()),
                        status: "FILLED".to_string(),
                    })
                }
            }
        }

        async fn limit_order(
            &self,
            symbol: &str,
            _side: OrderSide,
            amount: f64,
            price: f64,
        ) -> Result<Fill, ExchangeError> {
            Ok(Fill {
                symbol: symbol.to_string(),
                order_id: 3,
                amount,
                average_price: Some(price),
                status: "NEW".to_string(),
            })
        }
    }

    #[derive(Default)]
    struct RecordingSink {
        messages: Mutex<Vec<String>>,
    }

    impl RecordingSink {
        fn any_contains(&self, needle: &str) -> bool {
            self.messages.lock().iter().any(|m| m.contains(needle))
        }
    }

    #[async_trait]
    impl NotificationSink for RecordingSink {
        async fn send(&self, _chat: ChatId, text: &str) {
            self.messages.lock().push(text.to_string());
        }
    }

    struct Harness {
        exchange: Arc<ScriptedExchange>,
        sink: Arc<RecordingSink>,
        registry: Arc<PositionRegistry>,
        interval: Arc<MessageInterval>,
        handle: PositionHandle,
    }

    // Entry at 100 with trailing 5% and stop loss 10% unless a test says
    // otherwise: stop loss lands at 90, the trailing stop starts at 100.
    fn harness(exchange: ScriptedExchange, status_interval_secs: u64) -> Harness {
        let registry = Arc::new(PositionRegistry::new());
        let handle = registry.add(Position::new("BTCUSDT", 0.5, 5.0, 10.0).unwrap());
        Harness {
            exchange: Arc::new(exchange),
            sink: Arc::new(RecordingSink::default()),
            registry,
            interval: Arc::new(MessageInterval::new(status_interval_secs)),
            handle,
        }
    }

    fn config() -> MonitorConfig {
        MonitorConfig {
            poll_floor_secs: 1,
            price_retry_budget: 5,
        }
    }

    fn spawn(h: &Harness) -> tokio::task::JoinHandle<()> {
        spawn_monitor(
            Arc::clone(&h.exchange),
            Arc::clone(&h.sink),
            Arc::clone(&h.registry),
            Arc::clone(&h.interval),
            config(),
            CHAT,
            h.handle,
        )
    }

    #[tokio::test(start_paused = true)]
    async fn trailing_stop_fires_after_new_high() {
        // Rise to 120 ratchets the trailing stop to 114; the fall to 113
        // exits on the trailing stop, not the stop loss (113 > 90).
        let h = harness(
            ScriptedExchange::new(Some(100.0), &[Some(120.0), Some(113.0)]),
            0,
        );
        spawn(&h).await.unwrap();

        assert_eq!(h.exchange.sells.load(Ordering::SeqCst), 1);
        assert!(h.registry.is_empty());
        assert!(h.sink.any_contains("Trailing stop hit"));
        assert!(!h.sink.any_contains("Stop loss hit"));
    }

    #[tokio::test(start_paused = true)]
    async fn straight_drop_hits_stop_loss_first() {
        // Price never exceeds entry, so the trailing stop stays at 100; the
        // drop to 85 breaches both levels and the stop loss takes priority.
        let h = harness(ScriptedExchange::new(Some(100.0), &[Some(85.0)]), 0);
        spawn(&h).await.unwrap();

        assert_eq!(h.exchange.sells.load(Ordering::SeqCst), 1);
        assert!(h.registry.is_empty());
        assert!(h.sink.any_contains("Stop loss hit"));
        assert!(!h.sink.any_contains("Trailing stop hit"));
    }

    #[tokio::test(start_paused = true)]
    async fn exactly_one_sell_per_exit() {
        let h = harness(
            ScriptedExchange::new(Some(100.0), &[Some(120.0), Some(113.0), Some(50.0), Some(40.0)]),
            0,
        );
        spawn(&h).await.unwrap();

        assert_eq!(h.exchange.sells.load(Ordering::SeqCst), 1);
        assert_eq!(h.exchange.buys.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn outage_polls_change_nothing() {
        // Two unavailable samples are skipped without exiting or ordering;
        // the third sample triggers the stop loss as usual.
        let h = harness(
            ScriptedExchange::new(Some(100.0), &[None, None, Some(85.0)]),
            0,
        );
        spawn(&h).await.unwrap();

        assert_eq!(h.exchange.polls.load(Ordering::SeqCst), 3);
        assert_eq!(h.exchange.sells.load(Ordering::SeqCst), 1);
        assert!(h.sink.any_contains("Stop loss hit"));
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_price_budget_abandons_position() {
        let h = harness(
            ScriptedExchange::new(Some(100.0), &[None, None, None, None, None]),
            0,
        );
        spawn(&h).await.unwrap();

        assert_eq!(h.exchange.sells.load(Ordering::SeqCst), 0);
        let position = h.registry.get(h.handle).unwrap();
        assert_eq!(position.status, PositionStatus::Abandoned);
        assert!(h.sink.any_contains("needs manual attention"));
    }

    #[tokio::test(start_paused = true)]
    async fn failed_entry_never_activates() {
        let mut exchange = ScriptedExchange::new(Some(100.0), &[]);
        exchange.fail_buy = true;
        let h = harness(exchange, 0);
        spawn(&h).await.unwrap();

        assert_eq!(h.exchange.polls.load(Ordering::SeqCst), 0);
        assert_eq!(h.exchange.sells.load(Ordering::SeqCst), 0);
        assert!(h.registry.is_empty());
        assert!(h.sink.any_contains("Buy order failed"));
    }

    #[tokio::test(start_paused = true)]
    async fn entry_price_falls_back_to_price_sample() {
        // No average on the buy fill: the first sample (100) becomes the
        // entry price, so the drop to 85 still lands below the stop at 90.
        let h = harness(
            ScriptedExchange::new(None, &[Some(100.0), Some(85.0)]),
            0,
        );
        spawn(&h).await.unwrap();

        assert!(h.sink.any_contains("Entry price: 100"));
        assert!(h.sink.any_contains("Stop loss hit"));
        assert_eq!(h.exchange.sells.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_exit_flags_manual_attention() {
        let mut exchange = ScriptedExchange::new(Some(100.0), &[Some(85.0)]);
        exchange.fail_sell = true;
        let h = harness(exchange, 0);
        spawn(&h).await.unwrap();

        assert_eq!(h.exchange.sells.load(Ordering::SeqCst), 1);
        let position = h.registry.get(h.handle).unwrap();
        assert_eq!(position.status, PositionStatus::Abandoned);
        assert!(h.sink.any_contains("Sell order failed"));
        assert!(h.sink.any_contains("needs manual attention"));
    }

    #[tokio::test(start_paused = true)]
    async fn interval_zero_suppresses_status_chatter() {
        let h = harness(
            ScriptedExchange::new(Some(100.0), &[Some(120.0), Some(113.0)]),
            0,
        );
        spawn(&h).await.unwrap();

        assert!(!h.sink.any_contains("Current price:"));
        assert!(h.sink.any_contains("Trailing stop hit"));
    }

    #[tokio::test(start_paused = true)]
    async fn status_messages_follow_interval() {
        // With a 1s interval and 1s polls, holds at 100 emit status lines
        // before the drop to 85 exits.
        let h = harness(
            ScriptedExchange::new(
                Some(100.0),
                &[Some(100.0), Some(100.0), Some(100.0), Some(85.0)],
            ),
            1,
        );
        spawn(&h).await.unwrap();

        assert!(h.sink.any_contains("Current price: 100"));
        assert!(h.sink.any_contains("Stop loss hit"));
    }

    #[tokio::test(start_paused = true)]
    async fn deleting_the_operation_cancels_the_monitor() {
        // Steady price, no exit condition; removing the entry stops the
        // loop without a sell.
        let h = harness(ScriptedExchange::new(Some(100.0), &[]), 0);
        let monitor = spawn(&h);

        while h.exchange.polls.load(Ordering::SeqCst) < 3 {
            tokio::time::sleep(Duration::from_millis(200)).await;
        }
        let removed = h.registry.remove_by_display_index(1).unwrap();
        assert_eq!(removed.symbol, "BTCUSDT");

        monitor.await.unwrap();
        assert_eq!(h.exchange.sells.load(Ordering::SeqCst), 0);
        assert!(h.registry.is_empty());
    }
}
