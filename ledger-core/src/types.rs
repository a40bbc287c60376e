//! Core types for the wallet ledger
//!
//! All types are designed for:
//! - Deterministic serialization (bincode)
//! - Memory safety (no unsafe code)
//! - Exact arithmetic (Decimal for money)

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Account name of the platform treasury.
///
/// Deposits and withdrawals are funded against this account so that the
/// global conservation invariant (Σ delta == 0) holds at every point.
pub const TREASURY: &str = "treasury";

/// User identifier (buyer, seller, or the platform treasury)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserId(String);

impl UserId {
    /// Create new user ID
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The platform treasury account
    pub fn treasury() -> Self {
        Self(TREASURY.to_string())
    }

    /// Get as string
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether this is the treasury account
    pub fn is_treasury(&self) -> bool {
        self.0 == TREASURY
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Why an entry was appended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum EntryReason {
    /// Wallet top-up (credit side)
    Deposit = 1,
    /// Treasury funding leg of a deposit (debit side)
    DepositFunding = 2,
    /// Wallet withdrawal (debit side)
    Withdrawal = 3,
    /// Treasury funding leg of a withdrawal (credit side)
    WithdrawalFunding = 4,
    /// Buyer debit when an escrow hold releases
    EscrowDebit = 5,
    /// Seller credit when an escrow hold releases
    EscrowCredit = 6,
}

/// Immutable ledger entry
///
/// Reversals are new entries with the opposite sign; entries are never
/// mutated or deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerEntry {
    /// Unique entry ID (UUIDv7 for time-ordering)
    pub entry_id: Uuid,

    /// Account this entry belongs to
    pub user_id: UserId,

    /// Signed balance change (exact decimal)
    pub delta: Decimal,

    /// Why the entry exists
    pub reason: EntryReason,

    /// Order that caused this entry, if any
    pub related_order_id: Option<Uuid>,

    /// Entry timestamp
    pub timestamp: DateTime<Utc>,
}

impl LedgerEntry {
    /// Create a new entry stamped with the current time
    pub fn new(
        user_id: UserId,
        delta: Decimal,
        reason: EntryReason,
        related_order_id: Option<Uuid>,
    ) -> Self {
        Self {
            entry_id: Uuid::now_v7(),
            user_id,
            delta,
            reason,
            related_order_id,
            timestamp: Utc::now(),
        }
    }
}

/// Escrow hold status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum HoldStatus {
    /// Funds earmarked, not yet moved
    Held = 1,
    /// Released to the payee (terminal)
    Released = 2,
    /// Returned to the payer (terminal)
    Refunded = 3,
}

impl HoldStatus {
    /// Check if the hold reached a terminal state
    pub fn is_settled(&self) -> bool {
        matches!(self, HoldStatus::Released | HoldStatus::Refunded)
    }
}

/// Escrow hold over a payer's funds
///
/// While `Held`, the amount counts against the payer's available balance
/// without any entry being written. Entries appear only on release.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EscrowHold {
    /// Unique hold ID
    pub hold_id: Uuid,

    /// Payer whose funds are earmarked
    pub user_id: UserId,

    /// Held amount
    pub amount: Decimal,

    /// Order that owns this hold
    pub related_order_id: Uuid,

    /// Current status
    pub status: HoldStatus,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// When the hold left `Held` (null while active)
    pub settled_at: Option<DateTime<Utc>>,
}

impl EscrowHold {
    /// Create a new active hold
    pub fn new(user_id: UserId, amount: Decimal, related_order_id: Uuid) -> Self {
        Self {
            hold_id: Uuid::new_v4(),
            user_id,
            amount,
            related_order_id,
            status: HoldStatus::Held,
            created_at: Utc::now(),
            settled_at: None,
        }
    }

    /// Whether the hold still counts against the payer's available balance
    pub fn is_active(&self) -> bool {
        self.status == HoldStatus::Held
    }
}
