// Copyright (C) 2025 Category Labs, Inc.
// SPDX-License-Identifier: GPL-3.0-or-later

//! Configuration module - loads settings from environment variables.

/// Main configuration for the trailing-stop bot.
#[derive(Debug, Clone)]
pub struct Config {
    // Exchange
    pub api_key: String,
    pub api_secret: String,
    pub rest_url: String,

    // Telegram
    pub telegram_token: String,

    // Monitoring
    pub poll_floor_secs: u64,
    pub status_interval_secs: u64,
    pub price_retry_budget: u32,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, String> {
        dotenvy::dotenv().ok();

        Ok(Self {
            // Exchange
            api_key: env_var("BINANCE_API_KEY")?,
            api_secret: env_var("BINANCE_API_SECRET")?,
            rest_url: env_var_or("BINANCE_REST_URL", "https://testnet.binance.vision"),

            // Telegram
            telegram_token: env_var("TELEGRAM_BOT_TOKEN")?,

            // Monitoring
            poll_floor_secs: env_var_or("POLL_FLOOR_SECS", "1").parse().unwrap_or(1),
            status_interval_secs: env_var_or("STATUS_INTERVAL_SECS", "20")
                .parse()
                .unwrap_or(20),
            price_retry_budget: env_var_or("PRICE_RETRY_BUDGET", "30")
                .parse()
                .unwrap_or(30),
        })
    }
}

fn env_var(name: &str) -> Result<String, String> {
    std::env::var(name).map_err(|_| format!("{} not set", name))
}

fn env_var_or(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}
