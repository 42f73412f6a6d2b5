// Copyright (C) 2025 Category Labs, Inc.
// SPDX-License-Identifier: GPL-3.0-or-later

//! Trailing-stop trading bot for the Binance spot testnet, driven over Telegram.

mod commands;
mod config;
mod error;
mod exchange;
mod position;
mod settings;
mod telegram;

use commands::AppContext;
use config::Config;
use exchange::BinanceClient;
use position::{MonitorConfig, PositionRegistry};
use settings::MessageInterval;
use telegram::TelegramNotifier;

use std::sync::Arc;
use teloxide::Bot;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    info!("🚀 Trailing-stop bot starting...");

    let config = Config::from_env().map_err(|e| {
        error!("Failed to load config: {}", e);
        e
    })?;

    info!("📡 Exchange: {}", config.rest_url);
    info!(
        "⏱️ Poll floor: {}s, status interval: {}s",
        config.poll_floor_secs, config.status_interval_secs
    );

    let exchange = Arc::new(BinanceClient::new(
        config.api_key.clone(),
        config.api_secret.clone(),
        config.rest_url.clone(),
    ));

    let listed = exchange.load_markets().await.map_err(|e| {
        error!("❌ Failed to load markets: {}", e);
        e
    })?;
    info!("✅ Markets loaded: {} tradable symbols", listed);

    let registry = Arc::new(PositionRegistry::new());
    let interval = Arc::new(MessageInterval::new(config.status_interval_secs));

    let bot = Bot::new(config.telegram_token.clone());
    let notifier = Arc::new(TelegramNotifier::new(bot.clone()));

    let ctx = Arc::new(AppContext {
        exchange,
        registry,
        notifier,
        interval,
        monitor_config: MonitorConfig::from_config(&config),
    });

    info!("✅ Bot ready! Waiting for commands...");
    commands::run_dispatcher(bot, ctx).await;

    info!("🛑 Bot shut down");
    Ok(())
}
