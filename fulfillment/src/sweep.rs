//! Auto-release sweep
//!
//! Dispute-window expiry is driven by a periodic scan over delivered
//! orders rather than per-order timers, so it survives process restarts.
//! Each pass is idempotent per order, and one order's failure never
//! aborts the rest of the sweep.

use crate::{machine::OrderMachine, storage::Storage, types::OrderStatus, Result};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Auto-release sweep
pub struct DisputeSweep {
    storage: Arc<Storage>,
    machine: Arc<OrderMachine>,
    interval: Duration,
}

impl DisputeSweep {
    /// Create a new sweep
    pub fn new(storage: Arc<Storage>, machine: Arc<OrderMachine>, interval: Duration) -> Self {
        Self {
            storage,
            machine,
            interval,
        }
    }

    /// One pass: release every delivered order whose window lapsed
    ///
    /// Returns the IDs of orders released this pass.
    pub async fn run_once(&self, now: DateTime<Utc>) -> Result<Vec<Uuid>> {
        let delivered = self.storage.orders_by_status(OrderStatus::Delivered)?;

        let mut released = Vec::new();
        for order in delivered {
            let due = order.dispute_deadline.map(|d| d <= now).unwrap_or(false);
            if !due {
                continue;
            }

            match self.machine.auto_release_at(order.order_id, now).await {
                Ok(after) if after.status == OrderStatus::Released => {
                    released.push(order.order_id);
                }
                Ok(_) => {
                    // Lost the race to a dispute or another sweep; fine
                }
                Err(e) => {
                    // Isolate the failure, keep sweeping
                    tracing::error!(
                        order_id = %order.order_id,
                        error = %e,
                        "Auto-release failed, continuing sweep"
                    );
                }
            }
        }

        if !released.is_empty() {
            tracing::info!(count = released.len(), "Sweep released escrows");
        }

        Ok(released)
    }

    /// Run the sweep loop until the task is aborted
    pub async fn start(self: Arc<Self>) {
        tracing::info!(interval = ?self.interval, "Starting auto-release sweep");

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;

            if let Err(e) = self.run_once(Utc::now()).await {
                tracing::error!(error = %e, "Sweep pass failed");
            }
        }
    }
}
