//! Order state machine
//!
//! Owns the lifecycle of a single order:
//!
//! ```text
//! Pending → Confirmed → OutForDelivery → Delivered ─┬→ Released
//!    │                                              └→ Disputed ─┬→ Refunded
//!    └→ Cancelled                                                └→ Released
//! ```
//!
//! Every transition for one order runs under that order's mutex, so a
//! racing dispute and auto-release can never both observe `Delivered`;
//! whichever commits first wins and the loser sees the new status.
//! Time-dependent operations have `_at(now)` variants; the public API
//! calls them with the wall clock.

use crate::{
    notify::{notify_fire_and_forget, DispatchNotifier, Notification},
    payment::PaymentProvider,
    reservation::ReservationCoordinator,
    storage::Storage,
    types::{BatchStatus, DisputeOutcome, Order, OrderStatus, PaymentMethod},
    Error, Result,
};
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use ledger_core::{Ledger, UserId};
use routing_engine::Location;
use rust_decimal::Decimal;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

/// Per-order serialization points, shared by every order writer
pub struct OrderLocks {
    locks: DashMap<Uuid, Arc<Mutex<()>>>,
}

impl OrderLocks {
    /// Create an empty lock map
    pub fn new() -> Self {
        Self {
            locks: DashMap::new(),
        }
    }

    /// Lock guarding one order's transitions
    pub fn lock_for(&self, order_id: Uuid) -> Arc<Mutex<()>> {
        self.locks
            .entry(order_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}

impl Default for OrderLocks {
    fn default() -> Self {
        Self::new()
    }
}

/// Checkout request
#[derive(Debug, Clone)]
pub struct CreateOrderRequest {
    /// Buyer placing the order
    pub buyer_id: UserId,
    /// Seller of the listing
    pub seller_id: UserId,
    /// Listing being purchased
    pub product_id: Uuid,
    /// Price in minor units
    pub amount: Decimal,
    /// Wallet escrow or cash on delivery
    pub payment_method: PaymentMethod,
    /// Seller location for the pickup stop
    pub pickup_location: Location,
    /// Buyer location for the delivery stop
    pub dropoff_location: Location,
}

/// Order state machine
pub struct OrderMachine {
    storage: Arc<Storage>,
    ledger: Arc<Ledger>,
    reservations: Arc<ReservationCoordinator>,
    notifier: Arc<dyn DispatchNotifier>,
    payments: Arc<dyn PaymentProvider>,
    locks: Arc<OrderLocks>,
    dispute_window: Duration,
    reservation_ttl: Duration,
}

impl OrderMachine {
    /// Create a new machine
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        storage: Arc<Storage>,
        ledger: Arc<Ledger>,
        reservations: Arc<ReservationCoordinator>,
        notifier: Arc<dyn DispatchNotifier>,
        payments: Arc<dyn PaymentProvider>,
        locks: Arc<OrderLocks>,
        dispute_window: Duration,
        reservation_ttl: Duration,
    ) -> Self {
        Self {
            storage,
            ledger,
            reservations,
            notifier,
            payments,
            locks,
            dispute_window,
            reservation_ttl,
        }
    }

    /// Checkout: reserve the listing, escrow wallet funds, emit `Pending`
    ///
    /// The reservation happens first; if the escrow hold then fails the
    /// reservation is rolled back before the error is returned, so a
    /// failed checkout never leaves a listing locked.
    pub async fn create_order(&self, request: CreateOrderRequest) -> Result<Order> {
        let order_id = Uuid::new_v4();

        self.reservations
            .reserve(request.product_id, order_id, self.reservation_ttl)
            .await?;

        let hold_id = match request.payment_method {
            PaymentMethod::Wallet => {
                match self
                    .ledger
                    .hold(request.buyer_id.clone(), request.amount, order_id)
                    .await
                {
                    Ok(hold) => Some(hold.hold_id),
                    Err(e) => {
                        // Compensate: give the listing back before failing
                        if let Err(release_err) =
                            self.reservations.release(request.product_id).await
                        {
                            tracing::error!(
                                product_id = %request.product_id,
                                error = %release_err,
                                "Failed to roll back reservation after hold failure"
                            );
                        }
                        return Err(e.into());
                    }
                }
            }
            PaymentMethod::Cash => None,
        };

        let order = Order {
            order_id,
            buyer_id: request.buyer_id,
            seller_id: request.seller_id,
            product_id: request.product_id,
            amount: request.amount,
            payment_method: request.payment_method,
            status: OrderStatus::Pending,
            created_at: Utc::now(),
            confirmed_at: None,
            delivered_at: None,
            dispute_deadline: None,
            dispute_reason: None,
            dispute_outcome: None,
            route_id: None,
            hold_id,
            pickup_location: request.pickup_location,
            dropoff_location: request.dropoff_location,
        };

        self.storage.put_order(&order, None)?;
        self.announce(&order, None);

        Ok(order)
    }

    /// Seller acceptance: `Pending` → `Confirmed`
    pub async fn confirm_order(&self, order_id: Uuid) -> Result<Order> {
        self.confirm_order_at(order_id, Utc::now()).await
    }

    /// Clock-injected variant of [`confirm_order`](Self::confirm_order)
    pub async fn confirm_order_at(&self, order_id: Uuid, now: DateTime<Utc>) -> Result<Order> {
        let lock = self.locks.lock_for(order_id);
        let _guard = lock.lock().await;

        let mut order = self.storage.get_order(order_id)?;
        if order.status != OrderStatus::Pending {
            return Err(Error::InvalidTransition {
                from: order.status,
                operation: "confirm_order",
            });
        }

        // The listing stops expiring once the seller commits; fails if
        // the checkout lapsed and another buyer took the listing
        self.reservations.pin(order.product_id, order_id).await?;

        let prev = order.status;
        order.status = OrderStatus::Confirmed;
        order.confirmed_at = Some(now);

        self.storage.put_order(&order, Some(prev))?;
        self.announce(&order, Some(prev));

        Ok(order)
    }

    /// Driver pickup: `Confirmed` → `OutForDelivery`
    ///
    /// The order must sit on a route of a dispatched batch; otherwise the
    /// call fails with [`Error::NotRouted`].
    pub async fn mark_out_for_delivery(&self, order_id: Uuid, route_id: Uuid) -> Result<Order> {
        let lock = self.locks.lock_for(order_id);
        let _guard = lock.lock().await;

        let mut order = self.storage.get_order(order_id)?;
        if order.status != OrderStatus::Confirmed {
            return Err(Error::InvalidTransition {
                from: order.status,
                operation: "mark_out_for_delivery",
            });
        }

        let route = self.storage.get_route(route_id)?;
        let batch = self
            .storage
            .batch_for_route(route.route_id)?
            .filter(|b| b.status == BatchStatus::Dispatched && b.order_ids.contains(&order_id))
            .ok_or(Error::NotRouted(order_id))?;

        let prev = order.status;
        order.status = OrderStatus::OutForDelivery;
        order.route_id = Some(route_id);

        self.storage.put_order(&order, Some(prev))?;
        self.announce(&order, Some(prev));

        tracing::info!(
            order_id = %order_id,
            route_id = %route_id,
            batch_id = %batch.batch_id,
            "Order out for delivery"
        );

        Ok(order)
    }

    /// Buyer receipt: `OutForDelivery` → `Delivered`; opens the dispute
    /// window and marks the listing sold
    pub async fn confirm_delivery(&self, order_id: Uuid, actor_id: &UserId) -> Result<Order> {
        self.confirm_delivery_at(order_id, actor_id, Utc::now()).await
    }

    /// Clock-injected variant of [`confirm_delivery`](Self::confirm_delivery)
    pub async fn confirm_delivery_at(
        &self,
        order_id: Uuid,
        actor_id: &UserId,
        now: DateTime<Utc>,
    ) -> Result<Order> {
        let lock = self.locks.lock_for(order_id);
        let _guard = lock.lock().await;

        let mut order = self.storage.get_order(order_id)?;
        if actor_id != &order.buyer_id {
            return Err(Error::Unauthorized(format!(
                "only the buyer may confirm delivery of order {}",
                order_id
            )));
        }
        if order.status != OrderStatus::OutForDelivery {
            return Err(Error::InvalidTransition {
                from: order.status,
                operation: "confirm_delivery",
            });
        }

        let prev = order.status;
        order.status = OrderStatus::Delivered;
        order.delivered_at = Some(now);
        order.dispute_deadline = Some(now + self.dispute_window);

        self.reservations.mark_sold(order.product_id).await?;

        self.storage.put_order(&order, Some(prev))?;
        self.announce(&order, Some(prev));

        tracing::info!(
            order_id = %order_id,
            dispute_deadline = ?order.dispute_deadline,
            "Delivery confirmed, dispute window open"
        );

        Ok(order)
    }

    /// Buyer dispute: `Delivered` → `Disputed`, only inside the window
    ///
    /// The deadline is checked against the supplied clock, not against
    /// whether the auto-release sweep happened to run yet.
    pub async fn raise_dispute(
        &self,
        order_id: Uuid,
        actor_id: &UserId,
        reason: impl Into<String>,
    ) -> Result<Order> {
        self.raise_dispute_at(order_id, actor_id, reason, Utc::now()).await
    }

    /// Clock-injected variant of [`raise_dispute`](Self::raise_dispute)
    pub async fn raise_dispute_at(
        &self,
        order_id: Uuid,
        actor_id: &UserId,
        reason: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Result<Order> {
        let lock = self.locks.lock_for(order_id);
        let _guard = lock.lock().await;

        let mut order = self.storage.get_order(order_id)?;
        if actor_id != &order.buyer_id {
            return Err(Error::Unauthorized(format!(
                "only the buyer may dispute order {}",
                order_id
            )));
        }
        if order.status != OrderStatus::Delivered {
            return Err(Error::InvalidTransition {
                from: order.status,
                operation: "raise_dispute",
            });
        }

        let deadline = order
            .dispute_deadline
            .ok_or_else(|| Error::Other(format!("delivered order {} has no deadline", order_id)))?;
        if now >= deadline {
            return Err(Error::DisputeWindowExpired(deadline));
        }

        let prev = order.status;
        order.status = OrderStatus::Disputed;
        order.dispute_reason = Some(reason.into());

        // The escrow hold stays Held; freezing is a no-op on an
        // already-held hold
        self.storage.put_order(&order, Some(prev))?;
        self.announce(&order, Some(prev));

        tracing::info!(order_id = %order_id, "Dispute raised");

        Ok(order)
    }

    /// Timer-driven release: `Delivered` → `Released` once the window
    /// lapses
    ///
    /// Idempotent: terminal and disputed orders are a no-op, as is a call
    /// before the deadline, so the sweep may safely retry.
    pub async fn auto_release(&self, order_id: Uuid) -> Result<Order> {
        self.auto_release_at(order_id, Utc::now()).await
    }

    /// Clock-injected variant of [`auto_release`](Self::auto_release)
    pub async fn auto_release_at(&self, order_id: Uuid, now: DateTime<Utc>) -> Result<Order> {
        let lock = self.locks.lock_for(order_id);
        let _guard = lock.lock().await;

        let mut order = self.storage.get_order(order_id)?;

        // A committed dispute always wins the race; release backs off
        if order.is_terminal() || order.status == OrderStatus::Disputed {
            return Ok(order);
        }
        if order.status != OrderStatus::Delivered {
            return Ok(order);
        }

        let due = order.dispute_deadline.map(|d| now >= d).unwrap_or(false);
        if !due {
            return Ok(order);
        }

        self.pay_seller(&order).await?;

        let prev = order.status;
        order.status = OrderStatus::Released;

        self.storage.put_order(&order, Some(prev))?;
        self.announce(&order, Some(prev));

        tracing::info!(order_id = %order_id, "Escrow auto-released");

        Ok(order)
    }

    /// Buyer or seller cancellation, permitted only from `Pending`
    ///
    /// Releases the listing and refunds any escrow hold.
    pub async fn cancel_order(&self, order_id: Uuid, actor_id: &UserId) -> Result<Order> {
        let lock = self.locks.lock_for(order_id);
        let _guard = lock.lock().await;

        let mut order = self.storage.get_order(order_id)?;
        if actor_id != &order.buyer_id && actor_id != &order.seller_id {
            return Err(Error::Unauthorized(format!(
                "only the buyer or seller may cancel order {}",
                order_id
            )));
        }
        if order.status != OrderStatus::Pending {
            return Err(Error::InvalidTransition {
                from: order.status,
                operation: "cancel_order",
            });
        }

        if let Some(hold_id) = order.hold_id {
            self.ledger.refund(hold_id).await?;
        }
        self.release_listing_if_owned(&order).await?;

        let prev = order.status;
        order.status = OrderStatus::Cancelled;

        self.storage.put_order(&order, Some(prev))?;
        self.announce(&order, Some(prev));

        tracing::info!(order_id = %order_id, "Order cancelled");

        Ok(order)
    }

    /// Operator resolution of a disputed order, exactly once
    ///
    /// Retried calls with the recorded outcome are a no-op; a different
    /// outcome after resolution fails with [`Error::AlreadyResolved`].
    pub(crate) async fn apply_resolution(
        &self,
        order_id: Uuid,
        outcome: DisputeOutcome,
    ) -> Result<Order> {
        let lock = self.locks.lock_for(order_id);
        let _guard = lock.lock().await;

        let mut order = self.storage.get_order(order_id)?;

        if let Some(recorded) = order.dispute_outcome {
            if recorded == outcome {
                return Ok(order);
            }
            return Err(Error::AlreadyResolved(order_id));
        }
        if order.status != OrderStatus::Disputed {
            return Err(Error::NotDisputed(order_id));
        }

        let prev = order.status;
        match outcome {
            DisputeOutcome::Refund => {
                if let Some(hold_id) = order.hold_id {
                    self.ledger.refund(hold_id).await?;
                }
                // Re-offer the listing
                self.release_listing_if_owned(&order).await?;
                order.status = OrderStatus::Refunded;
            }
            DisputeOutcome::Release => {
                self.pay_seller(&order).await?;
                order.status = OrderStatus::Released;
            }
        }
        order.dispute_outcome = Some(outcome);

        self.storage.put_order(&order, Some(prev))?;
        self.announce(&order, Some(prev));

        Ok(order)
    }

    /// Get order by ID
    pub fn get_order(&self, order_id: Uuid) -> Result<Order> {
        self.storage.get_order(order_id)
    }

    /// Release the listing only while this order still owns it
    ///
    /// An expired checkout may have been reclaimed by another buyer;
    /// releasing then would free someone else's reservation.
    async fn release_listing_if_owned(&self, order: &Order) -> Result<()> {
        let reservation = self.reservations.get(order.product_id)?;
        if reservation.reserved_for_order == Some(order.order_id) {
            self.reservations.release(order.product_id).await?;
        } else {
            tracing::warn!(
                order_id = %order.order_id,
                product_id = %order.product_id,
                "Listing no longer owned by this order, skipping release"
            );
        }
        Ok(())
    }

    /// Move the escrowed (or cash) amount to the seller
    async fn pay_seller(&self, order: &Order) -> Result<()> {
        match (order.payment_method, order.hold_id) {
            (PaymentMethod::Wallet, Some(hold_id)) => {
                self.ledger.release(hold_id, order.seller_id.clone()).await?;
            }
            (PaymentMethod::Wallet, None) => {
                return Err(Error::Other(format!(
                    "wallet order {} has no escrow hold",
                    order.order_id
                )));
            }
            (PaymentMethod::Cash, _) => {
                // Driver collected cash; record the seller payout with
                // the provider
                let receipt = self
                    .payments
                    .payout(&order.seller_id, order.amount)
                    .await?;
                tracing::info!(
                    order_id = %order.order_id,
                    seller_id = %order.seller_id,
                    receipt,
                    "Cash order paid out"
                );
            }
        }
        Ok(())
    }

    fn announce(&self, order: &Order, prev: Option<OrderStatus>) {
        tracing::info!(
            order_id = %order.order_id,
            from = ?prev,
            to = ?order.status,
            "Order transition"
        );

        notify_fire_and_forget(
            &self.notifier,
            Notification::OrderStatusChanged {
                order_id: order.order_id,
                status: order.status,
            },
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RetryConfig;
    use crate::notify::LoggingNotifier;
    use crate::payment::LoggingPaymentProvider;
    use crate::types::{RouteBatch, TimeSlot};
    use routing_engine::Route;

    struct Fixture {
        machine: OrderMachine,
        ledger: Arc<Ledger>,
        reservations: Arc<ReservationCoordinator>,
        storage: Arc<Storage>,
        _temp: tempfile::TempDir,
    }

    async fn fixture() -> Fixture {
        let temp = tempfile::tempdir().unwrap();

        let mut ledger_config = ledger_core::Config::default();
        ledger_config.data_dir = temp.path().join("ledger");
        let ledger = Arc::new(Ledger::open(ledger_config).await.unwrap());

        let storage = Arc::new(Storage::open(temp.path().join("fulfillment")).unwrap());
        let reservations = Arc::new(ReservationCoordinator::new(
            storage.clone(),
            RetryConfig::default(),
        ));

        let machine = OrderMachine::new(
            storage.clone(),
            ledger.clone(),
            reservations.clone(),
            Arc::new(LoggingNotifier),
            Arc::new(LoggingPaymentProvider),
            Arc::new(OrderLocks::new()),
            Duration::hours(12),
            Duration::minutes(30),
        );

        Fixture {
            machine,
            ledger,
            reservations,
            storage,
            _temp: temp,
        }
    }

    fn request(product_id: Uuid) -> CreateOrderRequest {
        CreateOrderRequest {
            buyer_id: UserId::new("buyer-1"),
            seller_id: UserId::new("seller-9"),
            product_id,
            amount: Decimal::new(50000, 2),
            payment_method: PaymentMethod::Wallet,
            pickup_location: Location::new(38.72, -9.14),
            dropoff_location: Location::new(38.74, -9.15),
        }
    }

    async fn funded_order(fx: &Fixture) -> Order {
        let product_id = Uuid::new_v4();
        fx.reservations.create(product_id).await.unwrap();
        fx.ledger
            .deposit(UserId::new("buyer-1"), Decimal::new(50000, 2))
            .await
            .unwrap();
        fx.machine.create_order(request(product_id)).await.unwrap()
    }

    /// Put the order on a dispatched single-route batch
    fn dispatch_order(fx: &Fixture, order: &Order) -> Uuid {
        let route = Route {
            route_id: Uuid::new_v4(),
            driver_id: Some("driver-7".to_string()),
            stops: vec![],
            total_distance_km: 3.0,
            total_duration_secs: 900,
            infeasible: false,
        };
        fx.storage.put_route(&route).unwrap();

        let mut batch = RouteBatch::new(
            Utc::now().date_naive(),
            TimeSlot::Afternoon,
            vec![order.order_id],
        );
        batch.route_ids.push(route.route_id);
        batch.status = BatchStatus::Dispatched;
        fx.storage.put_batch(&batch).unwrap();

        route.route_id
    }

    async fn delivered_order(fx: &Fixture, now: DateTime<Utc>) -> Order {
        let order = funded_order(fx).await;
        fx.machine.confirm_order(order.order_id).await.unwrap();
        let route_id = dispatch_order(fx, &order);
        fx.machine
            .mark_out_for_delivery(order.order_id, route_id)
            .await
            .unwrap();
        fx.machine
            .confirm_delivery_at(order.order_id, &order.buyer_id, now)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_create_order_reserves_and_holds() {
        let fx = fixture().await;
        let order = funded_order(&fx).await;

        assert_eq!(order.status, OrderStatus::Pending);
        assert!(order.hold_id.is_some());

        // Listing locked to this order
        let reservation = fx.reservations.get(order.product_id).unwrap();
        assert_eq!(reservation.reserved_for_order, Some(order.order_id));

        // Funds earmarked
        assert_eq!(
            fx.ledger
                .available_balance(order.buyer_id.clone())
                .await
                .unwrap(),
            Decimal::ZERO
        );
    }

    #[tokio::test]
    async fn test_create_order_insufficient_funds_rolls_back_reservation() {
        let fx = fixture().await;
        let product_id = Uuid::new_v4();
        fx.reservations.create(product_id).await.unwrap();

        // No deposit: the hold must fail
        let result = fx.machine.create_order(request(product_id)).await;
        assert!(matches!(result, Err(Error::InsufficientFunds { .. })));

        // Listing is available again
        let reservation = fx.reservations.get(product_id).unwrap();
        assert_eq!(
            reservation.status,
            crate::types::ReservationStatus::Available
        );
    }

    #[tokio::test]
    async fn test_create_order_unavailable_product() {
        let fx = fixture().await;
        let order = funded_order(&fx).await;

        // Same product again while the first order is live
        fx.ledger
            .deposit(UserId::new("buyer-1"), Decimal::new(50000, 2))
            .await
            .unwrap();
        let result = fx.machine.create_order(request(order.product_id)).await;
        assert!(matches!(result, Err(Error::ProductUnavailable(_))));
    }

    #[tokio::test]
    async fn test_confirm_only_from_pending() {
        let fx = fixture().await;
        let order = funded_order(&fx).await;

        let confirmed = fx.machine.confirm_order(order.order_id).await.unwrap();
        assert_eq!(confirmed.status, OrderStatus::Confirmed);
        assert!(confirmed.confirmed_at.is_some());

        let again = fx.machine.confirm_order(order.order_id).await;
        assert!(matches!(again, Err(Error::InvalidTransition { .. })));
    }

    #[tokio::test]
    async fn test_out_for_delivery_requires_dispatched_batch() {
        let fx = fixture().await;
        let order = funded_order(&fx).await;
        fx.machine.confirm_order(order.order_id).await.unwrap();

        // Route exists but its batch is only Ready
        let route = Route {
            route_id: Uuid::new_v4(),
            driver_id: None,
            stops: vec![],
            total_distance_km: 3.0,
            total_duration_secs: 900,
            infeasible: false,
        };
        fx.storage.put_route(&route).unwrap();
        let mut batch = RouteBatch::new(
            Utc::now().date_naive(),
            TimeSlot::Morning,
            vec![order.order_id],
        );
        batch.route_ids.push(route.route_id);
        batch.status = BatchStatus::Ready;
        fx.storage.put_batch(&batch).unwrap();

        let result = fx
            .machine
            .mark_out_for_delivery(order.order_id, route.route_id)
            .await;
        assert!(matches!(result, Err(Error::NotRouted(_))));

        batch.status = BatchStatus::Dispatched;
        fx.storage.put_batch(&batch).unwrap();
        let moved = fx
            .machine
            .mark_out_for_delivery(order.order_id, route.route_id)
            .await
            .unwrap();
        assert_eq!(moved.status, OrderStatus::OutForDelivery);
        assert_eq!(moved.route_id, Some(route.route_id));
    }

    #[tokio::test]
    async fn test_confirm_delivery_buyer_only_sets_deadline() {
        let fx = fixture().await;
        let order = funded_order(&fx).await;
        fx.machine.confirm_order(order.order_id).await.unwrap();
        let route_id = dispatch_order(&fx, &order);
        fx.machine
            .mark_out_for_delivery(order.order_id, route_id)
            .await
            .unwrap();

        // Seller can't confirm receipt
        let result = fx
            .machine
            .confirm_delivery(order.order_id, &UserId::new("seller-9"))
            .await;
        assert!(matches!(result, Err(Error::Unauthorized(_))));

        let delivered_at = Utc::now();
        let delivered = fx
            .machine
            .confirm_delivery_at(order.order_id, &order.buyer_id, delivered_at)
            .await
            .unwrap();

        assert_eq!(delivered.status, OrderStatus::Delivered);
        assert_eq!(
            delivered.dispute_deadline,
            Some(delivered_at + Duration::hours(12))
        );

        // Listing is sold now
        let reservation = fx.reservations.get(order.product_id).unwrap();
        assert_eq!(reservation.status, crate::types::ReservationStatus::Sold);
    }

    #[tokio::test]
    async fn test_dispute_window_boundary() {
        let fx = fixture().await;
        let delivered_at = Utc::now();
        let order = delivered_order(&fx, delivered_at).await;
        let deadline = order.dispute_deadline.unwrap();

        // One second before the deadline: accepted
        let disputed = fx
            .machine
            .raise_dispute_at(
                order.order_id,
                &order.buyer_id,
                "item damaged",
                deadline - Duration::seconds(1),
            )
            .await
            .unwrap();
        assert_eq!(disputed.status, OrderStatus::Disputed);
        assert_eq!(disputed.dispute_reason.as_deref(), Some("item damaged"));
    }

    #[tokio::test]
    async fn test_dispute_after_deadline_expired() {
        let fx = fixture().await;
        let delivered_at = Utc::now();
        let order = delivered_order(&fx, delivered_at).await;
        let deadline = order.dispute_deadline.unwrap();

        // Deadline passed but the sweep has not run yet: still expired
        let result = fx
            .machine
            .raise_dispute_at(order.order_id, &order.buyer_id, "too late", deadline)
            .await;
        assert!(matches!(result, Err(Error::DisputeWindowExpired(_))));
    }

    #[tokio::test]
    async fn test_auto_release_boundary_and_idempotence() {
        let fx = fixture().await;
        let delivered_at = Utc::now();
        let order = delivered_order(&fx, delivered_at).await;
        let deadline = order.dispute_deadline.unwrap();
        let seller = UserId::new("seller-9");

        // One second early: must not release
        let early = fx
            .machine
            .auto_release_at(order.order_id, deadline - Duration::seconds(1))
            .await
            .unwrap();
        assert_eq!(early.status, OrderStatus::Delivered);
        assert_eq!(fx.ledger.balance(seller.clone()).await.unwrap(), Decimal::ZERO);

        // One second late: releases, exactly once across two sweeps
        let released = fx
            .machine
            .auto_release_at(order.order_id, deadline + Duration::seconds(1))
            .await
            .unwrap();
        assert_eq!(released.status, OrderStatus::Released);

        let again = fx
            .machine
            .auto_release_at(order.order_id, deadline + Duration::seconds(2))
            .await
            .unwrap();
        assert_eq!(again.status, OrderStatus::Released);

        assert_eq!(
            fx.ledger.balance(seller).await.unwrap(),
            Decimal::new(50000, 2)
        );
        assert!(fx.ledger.check_conservation().await.unwrap());
    }

    #[tokio::test]
    async fn test_auto_release_noop_on_disputed() {
        let fx = fixture().await;
        let delivered_at = Utc::now();
        let order = delivered_order(&fx, delivered_at).await;
        let deadline = order.dispute_deadline.unwrap();

        fx.machine
            .raise_dispute_at(
                order.order_id,
                &order.buyer_id,
                "wrong item",
                deadline - Duration::minutes(1),
            )
            .await
            .unwrap();

        // Sweep after the deadline: dispute already won
        let after = fx
            .machine
            .auto_release_at(order.order_id, deadline + Duration::minutes(1))
            .await
            .unwrap();
        assert_eq!(after.status, OrderStatus::Disputed);
        assert_eq!(
            fx.ledger.balance(UserId::new("seller-9")).await.unwrap(),
            Decimal::ZERO
        );
    }

    #[tokio::test]
    async fn test_cancel_refunds_and_releases() {
        let fx = fixture().await;
        let order = funded_order(&fx).await;

        let cancelled = fx
            .machine
            .cancel_order(order.order_id, &order.buyer_id)
            .await
            .unwrap();
        assert_eq!(cancelled.status, OrderStatus::Cancelled);

        // Available balance restored, listing re-offered
        assert_eq!(
            fx.ledger
                .available_balance(order.buyer_id.clone())
                .await
                .unwrap(),
            Decimal::new(50000, 2)
        );
        let reservation = fx.reservations.get(order.product_id).unwrap();
        assert_eq!(
            reservation.status,
            crate::types::ReservationStatus::Available
        );
    }

    #[tokio::test]
    async fn test_cancel_blocked_after_confirmation() {
        let fx = fixture().await;
        let order = funded_order(&fx).await;
        fx.machine.confirm_order(order.order_id).await.unwrap();

        let result = fx.machine.cancel_order(order.order_id, &order.buyer_id).await;
        assert!(matches!(result, Err(Error::InvalidTransition { .. })));
    }

    #[tokio::test]
    async fn test_cancel_by_stranger_unauthorized() {
        let fx = fixture().await;
        let order = funded_order(&fx).await;

        let result = fx
            .machine
            .cancel_order(order.order_id, &UserId::new("someone-else"))
            .await;
        assert!(matches!(result, Err(Error::Unauthorized(_))));
    }
}
