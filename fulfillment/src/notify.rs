//! Dispatch notification seam
//!
//! The notifier is an external collaborator (push, SMS, webhook). Calls
//! are fire-and-forget: failures are logged and never block a state
//! transition.

use crate::types::{BatchStatus, OrderStatus};
use async_trait::async_trait;
use std::sync::Arc;
use uuid::Uuid;

/// Events pushed out to buyers, sellers, and drivers
#[derive(Debug, Clone)]
pub enum Notification {
    /// An order moved to a new status
    OrderStatusChanged {
        /// Order that transitioned
        order_id: Uuid,
        /// New status
        status: OrderStatus,
    },

    /// A batch finished planning or was handed to drivers
    BatchStatusChanged {
        /// Batch that transitioned
        batch_id: Uuid,
        /// New status
        status: BatchStatus,
        /// Routes in the batch
        route_count: usize,
    },

    /// A route was assigned to a driver
    RouteAssigned {
        /// Route being driven
        route_id: Uuid,
        /// Assigned driver
        driver_id: String,
    },
}

/// Delivery dispatch notifier (external collaborator)
#[async_trait]
pub trait DispatchNotifier: Send + Sync {
    /// Deliver a notification; errors are the implementation's to report
    async fn notify(&self, notification: Notification) -> anyhow::Result<()>;
}

/// Notifier that only writes to the log; used in tests and local dev
pub struct LoggingNotifier;

#[async_trait]
impl DispatchNotifier for LoggingNotifier {
    async fn notify(&self, notification: Notification) -> anyhow::Result<()> {
        tracing::info!(?notification, "Dispatch notification");
        Ok(())
    }
}

/// Send without waiting; log and drop failures
pub fn notify_fire_and_forget(notifier: &Arc<dyn DispatchNotifier>, notification: Notification) {
    let notifier = notifier.clone();
    tokio::spawn(async move {
        if let Err(e) = notifier.notify(notification.clone()).await {
            tracing::warn!(?notification, error = %e, "Dispatch notification failed");
        }
    });
}
