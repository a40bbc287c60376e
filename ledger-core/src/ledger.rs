//! Main ledger orchestration layer
//!
//! This module ties together storage and actor components into a
//! high-level API for wallet and escrow operations.
//!
//! # Example
//!
//! ```no_run
//! use ledger_core::{Config, Ledger, UserId};
//! use rust_decimal::Decimal;
//!
//! #[tokio::main]
//! async fn main() -> ledger_core::Result<()> {
//!     let config = Config::default();
//!     let ledger = Ledger::open(config).await?;
//!
//!     ledger.deposit(UserId::new("buyer-1"), Decimal::new(50000, 2)).await?;
//!     let available = ledger.available_balance(UserId::new("buyer-1")).await?;
//!     assert_eq!(available, Decimal::new(50000, 2));
//!
//!     Ok(())
//! }
//! ```

use crate::{
    actor::{spawn_ledger_actor, LedgerHandle},
    metrics::Metrics,
    types::{EscrowHold, LedgerEntry, UserId},
    Config, Error, Result, Storage,
};
use rust_decimal::Decimal;
use std::sync::Arc;
use uuid::Uuid;

/// Main ledger interface
pub struct Ledger {
    /// Actor handle for serialized operations
    handle: LedgerHandle,

    /// Metrics collector
    metrics: Metrics,

    /// Configuration
    config: Config,
}

impl Ledger {
    /// Open ledger with configuration
    pub async fn open(config: Config) -> Result<Self> {
        let storage = Arc::new(Storage::open(&config)?);
        let handle = spawn_ledger_actor(storage, config.mailbox_capacity);

        let metrics = Metrics::new()
            .map_err(|e| Error::Config(format!("Failed to create metrics: {}", e)))?;

        Ok(Self {
            handle,
            metrics,
            config,
        })
    }

    /// Credit a wallet, funded by the treasury
    pub async fn deposit(&self, user_id: UserId, amount: Decimal) -> Result<Uuid> {
        Self::validate_amount(amount)?;
        let entry_id = self.handle.deposit(user_id, amount).await?;
        self.metrics.record_entries_appended(2);
        Ok(entry_id)
    }

    /// Debit a wallet, returning funds to the treasury
    ///
    /// Fails with [`Error::InsufficientFunds`] if the available balance is
    /// below the requested amount.
    pub async fn withdraw(&self, user_id: UserId, amount: Decimal) -> Result<Uuid> {
        Self::validate_amount(amount)?;
        let entry_id = self.handle.withdraw(user_id, amount).await?;
        self.metrics.record_entries_appended(2);
        Ok(entry_id)
    }

    /// Place an escrow hold over a payer's funds
    ///
    /// No entry is written; the hold reduces the available balance
    /// logically until it is released or refunded. Fails with
    /// [`Error::InsufficientFunds`] if `available_balance < amount`.
    pub async fn hold(
        &self,
        user_id: UserId,
        amount: Decimal,
        related_order_id: Uuid,
    ) -> Result<EscrowHold> {
        Self::validate_amount(amount)?;
        let hold = self.handle.hold(user_id, amount, related_order_id).await?;
        self.metrics.record_hold_placed();
        Ok(hold)
    }

    /// Release a hold: debit the payer, credit the payee
    ///
    /// Fails with [`Error::HoldAlreadySettled`] if the hold already left
    /// the `Held` state; a hold settles exactly once.
    pub async fn release(&self, hold_id: Uuid, payee: UserId) -> Result<EscrowHold> {
        let hold = self.handle.release(hold_id, payee).await?;
        self.metrics.record_entries_appended(2);
        self.metrics.record_hold_settled();
        Ok(hold)
    }

    /// Refund a hold back to the payer
    ///
    /// No entries are written (the funds were never debited).
    pub async fn refund(&self, hold_id: Uuid) -> Result<EscrowHold> {
        let hold = self.handle.refund(hold_id).await?;
        self.metrics.record_hold_settled();
        Ok(hold)
    }

    /// Settled balance: sum of the user's entries
    pub async fn balance(&self, user_id: UserId) -> Result<Decimal> {
        self.handle.balance(user_id).await
    }

    /// Spendable balance: settled balance minus active holds
    pub async fn available_balance(&self, user_id: UserId) -> Result<Decimal> {
        self.handle.available_balance(user_id).await
    }

    /// Full entry history for a user, oldest first
    pub async fn entries_for_user(&self, user_id: UserId) -> Result<Vec<LedgerEntry>> {
        self.handle.entries_for_user(user_id).await
    }

    /// Active (unsettled) holds for a user
    pub async fn active_holds(&self, user_id: UserId) -> Result<Vec<EscrowHold>> {
        self.handle.active_holds(user_id).await
    }

    /// Get hold by ID
    pub async fn get_hold(&self, hold_id: Uuid) -> Result<EscrowHold> {
        self.handle.get_hold(hold_id).await
    }

    /// Check the conservation invariant
    ///
    /// Every debit has a matching credit, so the sum of all entries
    /// system-wide must be zero at all times.
    pub async fn check_conservation(&self) -> Result<bool> {
        self.handle.check_conservation().await
    }

    /// Metrics registry for scraping
    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Configured data directory
    pub fn data_dir(&self) -> &std::path::Path {
        &self.config.data_dir
    }

    /// Shutdown ledger
    pub async fn shutdown(self) -> Result<()> {
        self.handle.shutdown().await
    }

    fn validate_amount(amount: Decimal) -> Result<()> {
        if amount <= Decimal::ZERO {
            return Err(Error::InvalidAmount(format!(
                "Amount must be positive, got {}",
                amount
            )));
        }
        Ok(())
    }
}
