// Copyright (C) 2025 Category Labs, Inc.
// SPDX-License-Identifier: GPL-3.0-or-later

//! Telegram notifier module.

use async_trait::async_trait;
use teloxide::prelude::*;
use tracing::{debug, error};

/// Best-effort delivery of human-readable alerts to a chat. Delivery
/// failures are logged and never surfaced to the caller.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn send(&self, chat: ChatId, text: &str);
}

#[derive(Clone)]
pub struct TelegramNotifier {
    bot: Bot,
}

impl TelegramNotifier {
    pub fn new(bot: Bot) -> Self {
        Self { bot }
    }
}

#[async_trait]
impl NotificationSink for TelegramNotifier {
    async fn send(&self, chat: ChatId, text: &str) {
        match self.bot.send_message(chat, text).await {
            Ok(_) => debug!("📤 Sent Telegram message"),
            Err(e) => error!("Failed to send Telegram message: {}", e),
        }
    }
}
