// Copyright (C) 2025 Category Labs, Inc.
// SPDX-License-Identifier: GPL-3.0-or-later

//! Position data model and the shared registry of open operations.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info};

use crate::error::{RegistryError, ValidationError};

/// Stable identity of a registry entry, independent of display order.
pub type PositionHandle = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PositionStatus {
    /// Entry order not yet confirmed.
    Pending,
    /// Monitored against the price feed.
    Active,
    /// Exit claimed; a sell is in flight.
    Exiting,
    /// Automated management lost; the position needs manual attention.
    Abandoned,
}

impl PositionStatus {
    pub fn label(&self) -> &'static str {
        match self {
            PositionStatus::Pending => "pending",
            PositionStatus::Active => "active",
            PositionStatus::Exiting => "exiting",
            PositionStatus::Abandoned => "NEEDS MANUAL ACTION",
        }
    }
}

/// A monitored trade.
///
/// `entry_price`, `stop_loss_price`, and the initial `trailing_stop_price`
/// are set exactly once, at activation. The trailing stop only ever moves
/// up from there (see [`PositionRegistry::ratchet_trailing`]).
#[derive(Debug, Clone)]
pub struct Position {
    pub symbol: String,
    pub trade_amount: f64,
    pub trailing_stop_percent: f64,
    pub stop_loss_percent: f64,
    pub entry_price: Option<f64>,
    pub stop_loss_price: Option<f64>,
    pub trailing_stop_price: Option<f64>,
    pub status: PositionStatus,
}

impl Position {
    /// Validate the numeric fields and build a new pending position.
    pub fn new(
        symbol: impl Into<String>,
        trade_amount: f64,
        trailing_stop_percent: f64,
        stop_loss_percent: f64,
    ) -> Result<Self, ValidationError> {
        if !(trade_amount > 0.0) {
            return Err(ValidationError::NonPositiveAmount(trade_amount));
        }
        check_percent("trailing stop", trailing_stop_percent)?;
        check_percent("stop loss", stop_loss_percent)?;

        Ok(Self {
            symbol: symbol.into(),
            trade_amount,
            trailing_stop_percent,
            stop_loss_percent,
            entry_price: None,
            stop_loss_price: None,
            trailing_stop_price: None,
            status: PositionStatus::Pending,
        })
    }
}

fn check_percent(name: &'static str, value: f64) -> Result<(), ValidationError> {
    if value > 0.0 && value < 100.0 {
        Ok(())
    } else {
        Err(ValidationError::PercentOutOfRange { name, value })
    }
}

#[derive(Debug)]
struct Entry {
    handle: PositionHandle,
    position: Position,
}

/// All live operations, guarded by a single lock.
///
/// Listings use 1-based display indices; monitors address their own entry
/// through the stable handle returned by [`PositionRegistry::add`], so
/// concurrent removals never shift the target.
#[derive(Debug, Default)]
pub struct PositionRegistry {
    entries: Mutex<Vec<Entry>>,
    next_handle: AtomicU64,
}

impl PositionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a position and return its stable handle.
    pub fn add(&self, position: Position) -> PositionHandle {
        let handle = self.next_handle.fetch_add(1, Ordering::Relaxed) + 1;
        info!(
            "Adding operation: {} - {} - trailing stop {}%, stop loss {}%",
            position.symbol,
            position.trade_amount,
            position.trailing_stop_percent,
            position.stop_loss_percent
        );
        self.entries.lock().push(Entry { handle, position });
        handle
    }

    /// Snapshot for display; indices are 1-based.
    pub fn list(&self) -> Vec<(usize, Position)> {
        self.entries
            .lock()
            .iter()
            .enumerate()
            .map(|(i, e)| (i + 1, e.position.clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Remove by the 1-based number shown in listings.
    pub fn remove_by_display_index(&self, index: usize) -> Result<Position, RegistryError> {
        let mut entries = self.entries.lock();
        if index == 0 || index > entries.len() {
            return Err(RegistryError::NotFound {
                index,
                len: entries.len(),
            });
        }
        let entry = entries.remove(index - 1);
        info!("Removed operation {} ({})", index, entry.position.symbol);
        Ok(entry.position)
    }

    /// Monitor-side removal on a clean exit. Idempotent: removing an entry
    /// that is already gone is a no-op returning `false`.
    pub fn remove_by_handle(&self, handle: PositionHandle) -> bool {
        let mut entries = self.entries.lock();
        match entries.iter().position(|e| e.handle == handle) {
            Some(i) => {
                let entry = entries.remove(i);
                debug!("Operation for {} removed by its monitor", entry.position.symbol);
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, handle: PositionHandle) -> bool {
        self.entries.lock().iter().any(|e| e.handle == handle)
    }

    pub fn get(&self, handle: PositionHandle) -> Option<Position> {
        self.entries
            .lock()
            .iter()
            .find(|e| e.handle == handle)
            .map(|e| e.position.clone())
    }

    /// Pending → Active, setting the entry-derived prices. The trailing
    /// stop starts at the entry price. Returns `None` if the entry was
    /// removed or already activated.
    pub fn activate(
        &self,
        handle: PositionHandle,
        entry_price: f64,
        stop_loss_price: f64,
    ) -> Option<Position> {
        let mut entries = self.entries.lock();
        let entry = entries.iter_mut().find(|e| e.handle == handle)?;
        if entry.position.status != PositionStatus::Pending {
            return None;
        }
        entry.position.entry_price = Some(entry_price);
        entry.position.stop_loss_price = Some(stop_loss_price);
        entry.position.trailing_stop_price = Some(entry_price);
        entry.position.status = PositionStatus::Active;
        Some(entry.position.clone())
    }

    /// One-directional ratchet: the trailing stop rises to `candidate` when
    /// that is higher and never moves down. Returns the effective level, or
    /// `None` if the position is gone or no longer Active.
    pub fn ratchet_trailing(&self, handle: PositionHandle, candidate: f64) -> Option<f64> {
        let mut entries = self.entries.lock();
        let entry = entries.iter_mut().find(|e| e.handle == handle)?;
        if entry.position.status != PositionStatus::Active {
            return None;
        }
        let current = entry.position.trailing_stop_price?;
        if candidate > current {
            entry.position.trailing_stop_price = Some(candidate);
            debug!(
                "Trailing stop for {} raised to {}",
                entry.position.symbol, candidate
            );
            Some(candidate)
        } else {
            Some(current)
        }
    }

    /// Claim the exit: Active → Exiting. At most one caller ever sees
    /// `true` per position, and never after the entry was removed.
    pub fn begin_exit(&self, handle: PositionHandle) -> bool {
        let mut entries = self.entries.lock();
        match entries.iter_mut().find(|e| e.handle == handle) {
            Some(entry) if entry.position.status == PositionStatus::Active => {
                entry.position.status = PositionStatus::Exiting;
                true
            }
            _ => false,
        }
    }

    /// Flag a position whose automated management stopped without a clean
    /// exit. The entry stays listed until removed manually.
    pub fn mark_abandoned(&self, handle: PositionHandle) -> bool {
        let mut entries = self.entries.lock();
        match entries.iter_mut().find(|e| e.handle == handle) {
            Some(entry) => {
                entry.position.status = PositionStatus::Abandoned;
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RegistryError;

    fn position(symbol: &str) -> Position {
        Position::new(symbol, 0.5, 5.0, 10.0).unwrap()
    }

    #[test]
    fn validation_rejects_bad_fields() {
        assert!(Position::new("BTCUSDT", 0.0, 5.0, 10.0).is_err());
        assert!(Position::new("BTCUSDT", -1.0, 5.0, 10.0).is_err());
        assert!(Position::new("BTCUSDT", 0.5, 0.0, 10.0).is_err());
        assert!(Position::new("BTCUSDT", 0.5, 100.0, 10.0).is_err());
        assert!(Position::new("BTCUSDT", 0.5, 5.0, 150.0).is_err());
        assert!(Position::new("BTCUSDT", 0.5, 5.0, 10.0).is_ok());
    }

    #[test]
    fn listing_uses_one_based_indices() {
        let registry = PositionRegistry::new();
        registry.add(position("BTCUSDT"));
        registry.add(position("ETHUSDT"));

        let listed = registry.list();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].0, 1);
        assert_eq!(listed[0].1.symbol, "BTCUSDT");
        assert_eq!(listed[1].0, 2);
        assert_eq!(listed[1].1.symbol, "ETHUSDT");
    }

    #[test]
    fn out_of_range_removal_leaves_registry_unmodified() {
        let registry = PositionRegistry::new();
        registry.add(position("BTCUSDT"));
        registry.add(position("ETHUSDT"));

        assert_eq!(
            registry.remove_by_display_index(0).unwrap_err(),
            RegistryError::NotFound { index: 0, len: 2 }
        );
        assert_eq!(
            registry.remove_by_display_index(3).unwrap_err(),
            RegistryError::NotFound { index: 3, len: 2 }
        );
        assert_eq!(registry.len(), 2);

        let removed = registry.remove_by_display_index(1).unwrap();
        assert_eq!(removed.symbol, "BTCUSDT");
        assert_eq!(registry.list()[0].1.symbol, "ETHUSDT");
    }

    #[test]
    fn handle_removal_is_idempotent() {
        let registry = PositionRegistry::new();
        let handle = registry.add(position("BTCUSDT"));

        assert!(registry.remove_by_handle(handle));
        assert!(!registry.remove_by_handle(handle));
        assert!(registry.is_empty());
    }

    #[test]
    fn handles_survive_removal_of_earlier_entries() {
        let registry = PositionRegistry::new();
        registry.add(position("BTCUSDT"));
        let eth = registry.add(position("ETHUSDT"));

        registry.remove_by_display_index(1).unwrap();
        assert!(registry.contains(eth));
        assert_eq!(registry.get(eth).unwrap().symbol, "ETHUSDT");
    }

    #[test]
    fn activation_sets_prices_once() {
        let registry = PositionRegistry::new();
        let handle = registry.add(position("BTCUSDT"));

        let active = registry.activate(handle, 100.0, 90.0).unwrap();
        assert_eq!(active.status, PositionStatus::Active);
        assert_eq!(active.entry_price, Some(100.0));
        assert_eq!(active.stop_loss_price, Some(90.0));
        assert_eq!(active.trailing_stop_price, Some(100.0));
        assert!(active.stop_loss_price.unwrap() < active.entry_price.unwrap());

        // A second activation is refused and changes nothing.
        assert!(registry.activate(handle, 50.0, 45.0).is_none());
        assert_eq!(registry.get(handle).unwrap().stop_loss_price, Some(90.0));
    }

    #[test]
    fn trailing_stop_never_decreases() {
        let registry = PositionRegistry::new();
        let handle = registry.add(position("BTCUSDT"));
        registry.activate(handle, 100.0, 90.0);

        let mut previous = 100.0;
        for candidate in [95.0, 114.0, 107.35, 120.0, 60.0] {
            let level = registry.ratchet_trailing(handle, candidate).unwrap();
            assert!(level >= previous, "trailing fell from {previous} to {level}");
            previous = level;
        }
        assert_eq!(registry.get(handle).unwrap().trailing_stop_price, Some(120.0));
    }

    #[test]
    fn exit_claim_succeeds_exactly_once() {
        let registry = PositionRegistry::new();
        let handle = registry.add(position("BTCUSDT"));

        // Not claimable before activation.
        assert!(!registry.begin_exit(handle));

        registry.activate(handle, 100.0, 90.0);
        assert!(registry.begin_exit(handle));
        assert!(!registry.begin_exit(handle));

        // Nor after removal.
        registry.remove_by_handle(handle);
        assert!(!registry.begin_exit(handle));
    }

    #[test]
    fn abandoned_positions_stay_listed_and_flagged() {
        let registry = PositionRegistry::new();
        let handle = registry.add(position("BTCUSDT"));
        registry.activate(handle, 100.0, 90.0);

        assert!(registry.mark_abandoned(handle));
        let listed = registry.list();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].1.status, PositionStatus::Abandoned);

        // No further ratchet or exit once abandoned.
        assert!(registry.ratchet_trailing(handle, 200.0).is_none());
        assert!(!registry.begin_exit(handle));

        // Manual deletion still works.
        assert!(registry.remove_by_display_index(1).is_ok());
    }
}
