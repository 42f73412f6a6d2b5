// Copyright (C) 2025 Category Labs, Inc.
// SPDX-License-Identifier: GPL-3.0-or-later

//! Telegram command front - translates chat commands into registry and
//! monitor operations.

use std::sync::Arc;
use teloxide::dptree;
use teloxide::prelude::*;
use teloxide::utils::command::BotCommands;
use tracing::{info, warn};

use crate::error::ValidationError;
use crate::exchange::{BinanceClient, OrderGateway, OrderSide};
use crate::position::{spawn_monitor, MonitorConfig, Position, PositionRegistry};
use crate::settings::MessageInterval;
use crate::telegram::TelegramNotifier;

/// Everything a command handler needs, shared across chats.
pub struct AppContext {
    pub exchange: Arc<BinanceClient>,
    pub registry: Arc<PositionRegistry>,
    pub notifier: Arc<TelegramNotifier>,
    pub interval: Arc<MessageInterval>,
    pub monitor_config: MonitorConfig,
}

#[derive(BotCommands, Clone)]
#[command(rename_rule = "snake_case", description = "Supported commands:")]
pub enum Command {
    #[command(description = "start the bot")]
    Start,
    #[command(description = "list available commands")]
    Help,
    #[command(
        description = "open a position at the current price: /add_operation <symbol> <amount> <trailing_stop%> <stop_loss%>",
        parse_with = "split"
    )]
    AddOperation {
        symbol: String,
        amount: f64,
        trailing_stop: f64,
        stop_loss: f64,
    },
    #[command(
        description = "place a limit buy: /add_limit_operation <symbol> <amount> <price> <trailing_stop%> <stop_loss%>",
        parse_with = "split"
    )]
    AddLimitOperation {
        symbol: String,
        amount: f64,
        price: f64,
        trailing_stop: f64,
        stop_loss: f64,
    },
    #[command(description = "show active operations")]
    ViewOperations,
    #[command(
        description = "remove an operation by its number: /del_operation <number>",
        parse_with = "split"
    )]
    DelOperation { number: usize },
    #[command(
        description = "set the status message interval in seconds, 0 disables: /interval_msg <seconds>",
        parse_with = "split"
    )]
    IntervalMsg { seconds: u64 },
}

/// Run the command dispatcher until shutdown.
pub async fn run_dispatcher(bot: Bot, ctx: Arc<AppContext>) {
    info!("🤖 Command dispatcher started");

    let handler = Update::filter_message()
        .filter_command::<Command>()
        .endpoint(answer);

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![ctx])
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;
}

async fn answer(bot: Bot, msg: Message, cmd: Command, ctx: Arc<AppContext>) -> ResponseResult<()> {
    let chat = msg.chat.id;

    match cmd {
        Command::Start => {
            bot.send_message(
                chat,
                "Welcome to the trailing-stop bot. Use /help to see the available commands.",
            )
            .await?;
        }
        Command::Help => {
            bot.send_message(chat, Command::descriptions().to_string())
                .await?;
        }
        Command::AddOperation {
            symbol,
            amount,
            trailing_stop,
            stop_loss,
        } => {
            let symbol = symbol.to_uppercase();
            match validate_operation(&ctx, &symbol, amount, trailing_stop, stop_loss) {
                Ok(position) => {
                    let handle = ctx.registry.add(position);
                    spawn_monitor(
                        Arc::clone(&ctx.exchange),
                        Arc::clone(&ctx.notifier),
                        Arc::clone(&ctx.registry),
                        Arc::clone(&ctx.interval),
                        ctx.monitor_config.clone(),
                        chat,
                        handle,
                    );
                    bot.send_message(
                        chat,
                        format!(
                            "Operation added: {} - {} - trailing stop {}%, stop loss {}%",
                            symbol, amount, trailing_stop, stop_loss
                        ),
                    )
                    .await?;
                }
                Err(e) => {
                    warn!("Rejected operation for {}: {}", symbol, e);
                    bot.send_message(chat, format!("Error adding operation: {}", e))
                        .await?;
                }
            }
        }
        Command::AddLimitOperation {
            symbol,
            amount,
            price,
            trailing_stop,
            stop_loss,
        } => {
            let symbol = symbol.to_uppercase();
            // Same field validation, even though no monitored position is
            // created for a limit entry.
            if let Err(e) = validate_operation(&ctx, &symbol, amount, trailing_stop, stop_loss) {
                warn!("Rejected limit operation for {}: {}", symbol, e);
                bot.send_message(chat, format!("Error adding limit operation: {}", e))
                    .await?;
                return Ok(());
            }
            match ctx
                .exchange
                .limit_order(&symbol, OrderSide::Buy, amount, price)
                .await
            {
                Ok(fill) => {
                    info!("Limit buy placed for {} at {} (order {})", symbol, price, fill.order_id);
                    bot.send_message(
                        chat,
                        format!(
                            "Limit buy placed for {} at {} (order {}). Filled limit orders are not managed automatically.",
                            symbol, price, fill.order_id
                        ),
                    )
                    .await?;
                }
                Err(e) => {
                    warn!("Limit order failed for {}: {}", symbol, e);
                    bot.send_message(
                        chat,
                        format!("Could not place the limit order for {}: {}", symbol, e),
                    )
                    .await?;
                }
            }
        }
        Command::ViewOperations => {
            bot.send_message(chat, render_operations(&ctx.registry))
                .await?;
        }
        Command::DelOperation { number } => {
            match ctx.registry.remove_by_display_index(number) {
                Ok(position) => {
                    bot.send_message(
                        chat,
                        format!(
                            "Operation removed: {} - {}",
                            position.symbol, position.trade_amount
                        ),
                    )
                    .await?;
                }
                Err(e) => {
                    bot.send_message(chat, format!("Error removing operation: {}", e))
                        .await?;
                }
            }
        }
        Command::IntervalMsg { seconds } => {
            ctx.interval.set(seconds);
            let reply = if seconds == 0 {
                "Status messages disabled.".to_string()
            } else {
                format!("Status message interval set to {} seconds.", seconds)
            };
            bot.send_message(chat, reply).await?;
        }
    }

    Ok(())
}

fn validate_operation(
    ctx: &AppContext,
    symbol: &str,
    amount: f64,
    trailing_stop: f64,
    stop_loss: f64,
) -> Result<Position, ValidationError> {
    if !ctx.exchange.has_symbol(symbol) {
        return Err(ValidationError::UnknownSymbol(symbol.to_string()));
    }
    Position::new(symbol, amount, trailing_stop, stop_loss)
}

fn render_operations(registry: &PositionRegistry) -> String {
    let operations = registry.list();
    if operations.is_empty() {
        return "No active operations.".to_string();
    }
    operations
        .iter()
        .map(|(index, position)| {
            let entry = position
                .entry_price
                .map(|p| p.to_string())
                .unwrap_or_else(|| "current price".to_string());
            format!(
                "{}. {} - {} - Entry: {} - Trailing stop: {}% - Stop loss: {}% [{}]",
                index,
                position.symbol,
                position.trade_amount,
                entry,
                position.trailing_stop_percent,
                position.stop_loss_percent,
                position.status.label()
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}
