//! Mercato Wallet Ledger
//!
//! Append-only ledger of wallet balance changes plus escrow holds.
//!
//! # Architecture
//!
//! - **Derived balances**: A user's balance is the sum of their entries;
//!   there is no mutable "current balance" cell to race on
//! - **Single Writer**: One logical writer task serializes every mutation,
//!   so check-balance-then-hold cannot interleave with another hold
//! - **Escrow holds**: Funds are earmarked, not moved; entries are only
//!   written when a hold releases
//!
//! # Invariants
//!
//! - Conservation: Σ(delta) over all entries == 0 for all time
//! - Append-only: Entries never modified or deleted
//! - Exactly-once: A hold leaves `Held` exactly once

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

pub mod types;
pub mod storage;
pub mod ledger;
pub mod error;
pub mod actor;
pub mod config;
pub mod metrics;

// Re-exports
pub use error::{Error, Result};
pub use types::{EntryReason, EscrowHold, HoldStatus, LedgerEntry, UserId};
pub use ledger::Ledger;
pub use storage::Storage;
pub use config::Config;
