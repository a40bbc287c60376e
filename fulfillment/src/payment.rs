//! Payment provider seam
//!
//! The core never talks to card networks directly; wallet orders settle
//! through the internal ledger, and this trait covers the rest (cash
//! collection records and seller payouts).

use crate::{Error, Result};
use async_trait::async_trait;
use ledger_core::UserId;
use rust_decimal::Decimal;
use uuid::Uuid;

/// Payment provider (external collaborator)
#[async_trait]
pub trait PaymentProvider: Send + Sync {
    /// Charge a user; returns a receipt ID or fails with
    /// [`Error::PaymentDeclined`]
    async fn charge(&self, user_id: &UserId, amount: Decimal) -> Result<String>;

    /// Refund a prior charge; returns a receipt ID
    async fn refund(&self, user_id: &UserId, amount: Decimal) -> Result<String>;

    /// Pay out to a user's external account; returns a receipt ID
    async fn payout(&self, user_id: &UserId, amount: Decimal) -> Result<String>;
}

/// Provider that approves everything and logs; used in tests and local dev
pub struct LoggingPaymentProvider;

#[async_trait]
impl PaymentProvider for LoggingPaymentProvider {
    async fn charge(&self, user_id: &UserId, amount: Decimal) -> Result<String> {
        let receipt = Uuid::new_v4().to_string();
        tracing::info!(user_id = %user_id, %amount, receipt, "Charge recorded");
        Ok(receipt)
    }

    async fn refund(&self, user_id: &UserId, amount: Decimal) -> Result<String> {
        let receipt = Uuid::new_v4().to_string();
        tracing::info!(user_id = %user_id, %amount, receipt, "Refund recorded");
        Ok(receipt)
    }

    async fn payout(&self, user_id: &UserId, amount: Decimal) -> Result<String> {
        let receipt = Uuid::new_v4().to_string();
        tracing::info!(user_id = %user_id, %amount, receipt, "Payout recorded");
        Ok(receipt)
    }
}

/// Provider that declines every charge; used to test decline paths
pub struct DecliningPaymentProvider;

#[async_trait]
impl PaymentProvider for DecliningPaymentProvider {
    async fn charge(&self, user_id: &UserId, _amount: Decimal) -> Result<String> {
        Err(Error::PaymentDeclined(format!("charge declined for {}", user_id)))
    }

    async fn refund(&self, user_id: &UserId, _amount: Decimal) -> Result<String> {
        Err(Error::PaymentDeclined(format!("refund declined for {}", user_id)))
    }

    async fn payout(&self, user_id: &UserId, _amount: Decimal) -> Result<String> {
        Err(Error::PaymentDeclined(format!("payout declined for {}", user_id)))
    }
}
