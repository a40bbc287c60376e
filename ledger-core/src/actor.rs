//! Actor-based concurrency for the ledger
//!
//! This module implements the single-writer pattern using Tokio actors:
//! - One logical writer task eliminates race conditions
//! - The balance check and the hold creation happen inside the same
//!   message, so two concurrent holds can never both pass the check
//! - Async message passing with backpressure
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │            Order machine / API layer                  │
//! │              Multiple callers                         │
//! └─────────────────────┬────────────────────────────────┘
//!                       │
//!                       │ LedgerHandle (Clone)
//!                       ▼
//! ┌──────────────────────────────────────────────────────┐
//! │              mpsc::channel (bounded)                  │
//! └─────────────────────┬────────────────────────────────┘
//!                       │
//!                       ▼
//! ┌──────────────────────────────────────────────────────┐
//! │             LedgerActor (Single Task)                 │
//! │   check available → create hold → commit (atomic)     │
//! └─────────────────────┬────────────────────────────────┘
//!                       │
//!                       ▼
//!              Storage (RocksDB WriteBatch)
//! ```

use crate::types::{EntryReason, EscrowHold, HoldStatus, LedgerEntry, UserId};
use crate::{Error, Result, Storage};
use chrono::Utc;
use rust_decimal::Decimal;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

/// Message sent to the ledger actor
pub enum LedgerMessage {
    /// Credit a wallet (funded by the treasury)
    Deposit {
        user_id: UserId,
        amount: Decimal,
        response: oneshot::Sender<Result<Uuid>>,
    },

    /// Debit a wallet (funds returned to the treasury)
    Withdraw {
        user_id: UserId,
        amount: Decimal,
        response: oneshot::Sender<Result<Uuid>>,
    },

    /// Place an escrow hold
    Hold {
        user_id: UserId,
        amount: Decimal,
        related_order_id: Uuid,
        response: oneshot::Sender<Result<EscrowHold>>,
    },

    /// Release a hold to the payee
    Release {
        hold_id: Uuid,
        payee: UserId,
        response: oneshot::Sender<Result<EscrowHold>>,
    },

    /// Refund a hold to the payer
    Refund {
        hold_id: Uuid,
        response: oneshot::Sender<Result<EscrowHold>>,
    },

    /// Get settled balance
    Balance {
        user_id: UserId,
        response: oneshot::Sender<Result<Decimal>>,
    },

    /// Get balance minus active holds
    AvailableBalance {
        user_id: UserId,
        response: oneshot::Sender<Result<Decimal>>,
    },

    /// Get all entries for a user
    EntriesForUser {
        user_id: UserId,
        response: oneshot::Sender<Result<Vec<LedgerEntry>>>,
    },

    /// Get active holds for a user
    ActiveHolds {
        user_id: UserId,
        response: oneshot::Sender<Result<Vec<EscrowHold>>>,
    },

    /// Get hold by ID
    GetHold {
        hold_id: Uuid,
        response: oneshot::Sender<Result<EscrowHold>>,
    },

    /// Verify Σ(delta) == 0 over the whole log
    CheckConservation {
        response: oneshot::Sender<Result<bool>>,
    },

    /// Shutdown actor
    Shutdown,
}

/// Actor that processes ledger messages
pub struct LedgerActor {
    /// Storage backend
    storage: Arc<Storage>,

    /// Mailbox for incoming messages
    mailbox: mpsc::Receiver<LedgerMessage>,
}

impl LedgerActor {
    /// Create new actor
    pub fn new(storage: Arc<Storage>, mailbox: mpsc::Receiver<LedgerMessage>) -> Self {
        Self { storage, mailbox }
    }

    /// Run the actor event loop
    pub async fn run(mut self) {
        while let Some(msg) = self.mailbox.recv().await {
            match msg {
                LedgerMessage::Shutdown => break,
                _ => self.handle_message(msg),
            }
        }
    }

    /// Handle a single message
    fn handle_message(&mut self, msg: LedgerMessage) {
        match msg {
            LedgerMessage::Deposit { user_id, amount, response } => {
                let _ = response.send(self.deposit(user_id, amount));
            }

            LedgerMessage::Withdraw { user_id, amount, response } => {
                let _ = response.send(self.withdraw(user_id, amount));
            }

            LedgerMessage::Hold { user_id, amount, related_order_id, response } => {
                let _ = response.send(self.hold(user_id, amount, related_order_id));
            }

            LedgerMessage::Release { hold_id, payee, response } => {
                let _ = response.send(self.release(hold_id, payee));
            }

            LedgerMessage::Refund { hold_id, response } => {
                let _ = response.send(self.refund(hold_id));
            }

            LedgerMessage::Balance { user_id, response } => {
                let _ = response.send(self.balance(&user_id));
            }

            LedgerMessage::AvailableBalance { user_id, response } => {
                let _ = response.send(self.available_balance(&user_id));
            }

            LedgerMessage::EntriesForUser { user_id, response } => {
                let _ = response.send(self.storage.entries_for_user(&user_id));
            }

            LedgerMessage::ActiveHolds { user_id, response } => {
                let _ = response.send(self.active_holds(&user_id));
            }

            LedgerMessage::GetHold { hold_id, response } => {
                let _ = response.send(self.storage.get_hold(hold_id));
            }

            LedgerMessage::CheckConservation { response } => {
                let _ = response.send(self.check_conservation());
            }

            LedgerMessage::Shutdown => {
                // Handled in main loop
            }
        }
    }

    // Operations (all run on the single writer task)

    fn deposit(&self, user_id: UserId, amount: Decimal) -> Result<Uuid> {
        let credit = LedgerEntry::new(user_id.clone(), amount, EntryReason::Deposit, None);
        let funding = LedgerEntry::new(
            UserId::treasury(),
            -amount,
            EntryReason::DepositFunding,
            None,
        );

        let entry_id = credit.entry_id;
        self.storage.append_entries(&[credit, funding])?;

        tracing::info!(user_id = %user_id, amount = %amount, "Deposit recorded");
        Ok(entry_id)
    }

    fn withdraw(&self, user_id: UserId, amount: Decimal) -> Result<Uuid> {
        let available = self.available_balance(&user_id)?;
        if available < amount {
            return Err(Error::InsufficientFunds {
                user_id: user_id.to_string(),
                requested: amount,
                available,
            });
        }

        let debit = LedgerEntry::new(user_id.clone(), -amount, EntryReason::Withdrawal, None);
        let funding = LedgerEntry::new(
            UserId::treasury(),
            amount,
            EntryReason::WithdrawalFunding,
            None,
        );

        let entry_id = debit.entry_id;
        self.storage.append_entries(&[debit, funding])?;

        tracing::info!(user_id = %user_id, amount = %amount, "Withdrawal recorded");
        Ok(entry_id)
    }

    fn hold(&self, user_id: UserId, amount: Decimal, related_order_id: Uuid) -> Result<EscrowHold> {
        let available = self.available_balance(&user_id)?;
        if available < amount {
            return Err(Error::InsufficientFunds {
                user_id: user_id.to_string(),
                requested: amount,
                available,
            });
        }

        // No entry is written: the hold reduces available balance logically
        let hold = EscrowHold::new(user_id.clone(), amount, related_order_id);
        self.storage.put_hold(&hold)?;

        tracing::info!(
            hold_id = %hold.hold_id,
            user_id = %user_id,
            amount = %amount,
            order_id = %related_order_id,
            "Escrow hold placed"
        );

        Ok(hold)
    }

    fn release(&self, hold_id: Uuid, payee: UserId) -> Result<EscrowHold> {
        let mut hold = self.storage.get_hold(hold_id)?;

        if hold.status != HoldStatus::Held {
            return Err(Error::HoldAlreadySettled(hold_id.to_string()));
        }

        hold.status = HoldStatus::Released;
        hold.settled_at = Some(Utc::now());

        let debit = LedgerEntry::new(
            hold.user_id.clone(),
            -hold.amount,
            EntryReason::EscrowDebit,
            Some(hold.related_order_id),
        );
        let credit = LedgerEntry::new(
            payee.clone(),
            hold.amount,
            EntryReason::EscrowCredit,
            Some(hold.related_order_id),
        );

        self.storage.settle_hold(&hold, &[debit, credit])?;

        tracing::info!(
            hold_id = %hold_id,
            payer = %hold.user_id,
            payee = %payee,
            amount = %hold.amount,
            "Escrow hold released"
        );

        Ok(hold)
    }

    fn refund(&self, hold_id: Uuid) -> Result<EscrowHold> {
        let mut hold = self.storage.get_hold(hold_id)?;

        if hold.status != HoldStatus::Held {
            return Err(Error::HoldAlreadySettled(hold_id.to_string()));
        }

        hold.status = HoldStatus::Refunded;
        hold.settled_at = Some(Utc::now());

        // Funds were never debited, so no entries are needed
        self.storage.settle_hold(&hold, &[])?;

        tracing::info!(
            hold_id = %hold_id,
            payer = %hold.user_id,
            amount = %hold.amount,
            "Escrow hold refunded"
        );

        Ok(hold)
    }

    fn balance(&self, user_id: &UserId) -> Result<Decimal> {
        let entries = self.storage.entries_for_user(user_id)?;
        Ok(entries.iter().map(|e| e.delta).sum())
    }

    fn active_holds(&self, user_id: &UserId) -> Result<Vec<EscrowHold>> {
        let holds = self.storage.holds_for_user(user_id)?;
        Ok(holds.into_iter().filter(|h| h.is_active()).collect())
    }

    fn available_balance(&self, user_id: &UserId) -> Result<Decimal> {
        let balance = self.balance(user_id)?;
        let held: Decimal = self.active_holds(user_id)?.iter().map(|h| h.amount).sum();
        Ok(balance - held)
    }

    fn check_conservation(&self) -> Result<bool> {
        let total: Decimal = self.storage.all_entries()?.iter().map(|e| e.delta).sum();
        Ok(total == Decimal::ZERO)
    }
}

/// Handle for sending messages to the actor
#[derive(Clone)]
pub struct LedgerHandle {
    sender: mpsc::Sender<LedgerMessage>,
}

impl LedgerHandle {
    /// Create new handle
    pub fn new(sender: mpsc::Sender<LedgerMessage>) -> Self {
        Self { sender }
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<Result<T>>) -> LedgerMessage,
    ) -> Result<T> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(make(tx))
            .await
            .map_err(|_| Error::Concurrency("Actor mailbox closed".to_string()))?;

        rx.await
            .map_err(|_| Error::Concurrency("Response channel closed".to_string()))?
    }

    /// Credit a wallet
    pub async fn deposit(&self, user_id: UserId, amount: Decimal) -> Result<Uuid> {
        self.request(|response| LedgerMessage::Deposit { user_id, amount, response })
            .await
    }

    /// Debit a wallet
    pub async fn withdraw(&self, user_id: UserId, amount: Decimal) -> Result<Uuid> {
        self.request(|response| LedgerMessage::Withdraw { user_id, amount, response })
            .await
    }

    /// Place an escrow hold
    pub async fn hold(
        &self,
        user_id: UserId,
        amount: Decimal,
        related_order_id: Uuid,
    ) -> Result<EscrowHold> {
        self.request(|response| LedgerMessage::Hold {
            user_id,
            amount,
            related_order_id,
            response,
        })
        .await
    }

    /// Release a hold to the payee
    pub async fn release(&self, hold_id: Uuid, payee: UserId) -> Result<EscrowHold> {
        self.request(|response| LedgerMessage::Release { hold_id, payee, response })
            .await
    }

    /// Refund a hold to the payer
    pub async fn refund(&self, hold_id: Uuid) -> Result<EscrowHold> {
        self.request(|response| LedgerMessage::Refund { hold_id, response })
            .await
    }

    /// Get settled balance
    pub async fn balance(&self, user_id: UserId) -> Result<Decimal> {
        self.request(|response| LedgerMessage::Balance { user_id, response })
            .await
    }

    /// Get balance minus active holds
    pub async fn available_balance(&self, user_id: UserId) -> Result<Decimal> {
        self.request(|response| LedgerMessage::AvailableBalance { user_id, response })
            .await
    }

    /// Get all entries for a user
    pub async fn entries_for_user(&self, user_id: UserId) -> Result<Vec<LedgerEntry>> {
        self.request(|response| LedgerMessage::EntriesForUser { user_id, response })
            .await
    }

    /// Get active holds for a user
    pub async fn active_holds(&self, user_id: UserId) -> Result<Vec<EscrowHold>> {
        self.request(|response| LedgerMessage::ActiveHolds { user_id, response })
            .await
    }

    /// Get hold by ID
    pub async fn get_hold(&self, hold_id: Uuid) -> Result<EscrowHold> {
        self.request(|response| LedgerMessage::GetHold { hold_id, response })
            .await
    }

    /// Verify the conservation invariant
    pub async fn check_conservation(&self) -> Result<bool> {
        self.request(|response| LedgerMessage::CheckConservation { response })
            .await
    }

    /// Shutdown actor
    pub async fn shutdown(&self) -> Result<()> {
        self.sender
            .send(LedgerMessage::Shutdown)
            .await
            .map_err(|_| Error::Concurrency("Actor mailbox closed".to_string()))?;
        Ok(())
    }
}

/// Spawn the ledger actor
pub fn spawn_ledger_actor(storage: Arc<Storage>, mailbox_capacity: usize) -> LedgerHandle {
    let (tx, rx) = mpsc::channel(mailbox_capacity);
    let actor = LedgerActor::new(storage, rx);

    tokio::spawn(async move {
        actor.run().await;
    });

    LedgerHandle::new(tx)
}
