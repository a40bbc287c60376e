//! Dispute resolver
//!
//! Operator-mediated outcomes for orders in `Disputed`. Resolution is
//! terminal and idempotent per order: retrying with the recorded outcome
//! is a no-op, a different outcome fails with `AlreadyResolved`.

use crate::{
    machine::OrderMachine,
    types::{DisputeOutcome, Order},
    Result,
};
use std::sync::Arc;
use uuid::Uuid;

/// Dispute resolver
pub struct DisputeResolver {
    machine: Arc<OrderMachine>,
}

impl DisputeResolver {
    /// Create a new resolver over the order machine
    pub fn new(machine: Arc<OrderMachine>) -> Self {
        Self { machine }
    }

    /// Resolve a disputed order
    ///
    /// On `Refund` the escrow goes back to the buyer and the listing is
    /// re-offered; on `Release` the seller is paid and the sale stands.
    /// Fails with [`crate::Error::NotDisputed`] unless the order is
    /// disputed (or already resolved with the same outcome).
    pub async fn resolve_dispute(
        &self,
        order_id: Uuid,
        outcome: DisputeOutcome,
        operator_id: &str,
    ) -> Result<Order> {
        let order = self.machine.apply_resolution(order_id, outcome).await?;

        tracing::info!(
            order_id = %order_id,
            ?outcome,
            operator_id,
            "Dispute resolved"
        );

        Ok(order)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RetryConfig;
    use crate::machine::{CreateOrderRequest, OrderLocks};
    use crate::notify::LoggingNotifier;
    use crate::payment::LoggingPaymentProvider;
    use crate::reservation::ReservationCoordinator;
    use crate::storage::Storage;
    use crate::types::{BatchStatus, OrderStatus, PaymentMethod, ReservationStatus, RouteBatch, TimeSlot};
    use crate::Error;
    use chrono::{Duration, Utc};
    use ledger_core::{Ledger, UserId};
    use routing_engine::{Location, Route};
    use rust_decimal::Decimal;

    struct Fixture {
        machine: Arc<OrderMachine>,
        resolver: DisputeResolver,
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

        let machine = Arc::new(OrderMachine::new(
            storage.clone(),
            ledger.clone(),
            reservations.clone(),
            Arc::new(LoggingNotifier),
            Arc::new(LoggingPaymentProvider),
            Arc::new(OrderLocks::new()),
            Duration::hours(12),
            Duration::minutes(30),
        ));

        Fixture {
            resolver: DisputeResolver::new(machine.clone()),
            machine,
            ledger,
            reservations,
            storage,
            _temp: temp,
        }
    }

    /// Walk an order all the way to `Disputed`
    async fn disputed_order(fx: &Fixture) -> crate::types::Order {
        let product_id = Uuid::new_v4();
        fx.reservations.create(product_id).await.unwrap();
        let buyer = UserId::new("buyer-1");
        fx.ledger.deposit(buyer.clone(), Decimal::new(50000, 2)).await.unwrap();

        let order = fx
            .machine
            .create_order(CreateOrderRequest {
                buyer_id: buyer.clone(),
                seller_id: UserId::new("seller-9"),
                product_id,
                amount: Decimal::new(50000, 2),
                payment_method: PaymentMethod::Wallet,
                pickup_location: Location::new(38.72, -9.14),
                dropoff_location: Location::new(38.74, -9.15),
            })
            .await
            .unwrap();
        fx.machine.confirm_order(order.order_id).await.unwrap();

        let route = Route {
            route_id: Uuid::new_v4(),
            driver_id: Some("driver-7".to_string()),
            stops: vec![],
            total_distance_km: 3.0,
            total_duration_secs: 900,
            infeasible: false,
        };
        fx.storage.put_route(&route).unwrap();
        let mut batch = RouteBatch::new(Utc::now().date_naive(), TimeSlot::Morning, vec![order.order_id]);
        batch.route_ids.push(route.route_id);
        batch.status = BatchStatus::Dispatched;
        fx.storage.put_batch(&batch).unwrap();

        fx.machine
            .mark_out_for_delivery(order.order_id, route.route_id)
            .await
            .unwrap();
        let delivered = fx
            .machine
            .confirm_delivery(order.order_id, &buyer)
            .await
            .unwrap();
        fx.machine
            .raise_dispute_at(
                order.order_id,
                &buyer,
                "not as described",
                delivered.dispute_deadline.unwrap() - Duration::minutes(5),
            )
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_refund_returns_funds_and_relists() {
        let fx = fixture().await;
        let order = disputed_order(&fx).await;

        let resolved = fx
            .resolver
            .resolve_dispute(order.order_id, DisputeOutcome::Refund, "op-1")
            .await
            .unwrap();
        assert_eq!(resolved.status, OrderStatus::Refunded);

        // Buyer whole again, listing back on offer, books balanced
        assert_eq!(
            fx.ledger.available_balance(order.buyer_id.clone()).await.unwrap(),
            Decimal::new(50000, 2)
        );
        let reservation = fx.reservations.get(order.product_id).unwrap();
        assert_eq!(reservation.status, ReservationStatus::Available);
        assert!(fx.ledger.check_conservation().await.unwrap());
    }

    #[tokio::test]
    async fn test_release_pays_seller_keeps_sale() {
        let fx = fixture().await;
        let order = disputed_order(&fx).await;

        let resolved = fx
            .resolver
            .resolve_dispute(order.order_id, DisputeOutcome::Release, "op-1")
            .await
            .unwrap();
        assert_eq!(resolved.status, OrderStatus::Released);

        assert_eq!(
            fx.ledger.balance(UserId::new("seller-9")).await.unwrap(),
            Decimal::new(50000, 2)
        );
        let reservation = fx.reservations.get(order.product_id).unwrap();
        assert_eq!(reservation.status, ReservationStatus::Sold);
    }

    #[tokio::test]
    async fn test_resolution_idempotent_same_outcome() {
        let fx = fixture().await;
        let order = disputed_order(&fx).await;

        let first = fx
            .resolver
            .resolve_dispute(order.order_id, DisputeOutcome::Refund, "op-1")
            .await
            .unwrap();
        let second = fx
            .resolver
            .resolve_dispute(order.order_id, DisputeOutcome::Refund, "op-1")
            .await
            .unwrap();

        assert_eq!(first.status, second.status);

        // No double refund: buyer got the money back exactly once
        assert_eq!(
            fx.ledger.available_balance(order.buyer_id.clone()).await.unwrap(),
            Decimal::new(50000, 2)
        );
        assert!(fx.ledger.check_conservation().await.unwrap());
    }

    #[tokio::test]
    async fn test_conflicting_outcome_rejected() {
        let fx = fixture().await;
        let order = disputed_order(&fx).await;

        fx.resolver
            .resolve_dispute(order.order_id, DisputeOutcome::Refund, "op-1")
            .await
            .unwrap();

        let result = fx
            .resolver
            .resolve_dispute(order.order_id, DisputeOutcome::Release, "op-2")
            .await;
        assert!(matches!(result, Err(Error::AlreadyResolved(_))));
    }

    #[tokio::test]
    async fn test_resolution_requires_dispute() {
        let fx = fixture().await;

        let product_id = Uuid::new_v4();
        fx.reservations.create(product_id).await.unwrap();
        let buyer = UserId::new("buyer-1");
        fx.ledger.deposit(buyer.clone(), Decimal::new(50000, 2)).await.unwrap();
        let order = fx
            .machine
            .create_order(CreateOrderRequest {
                buyer_id: buyer,
                seller_id: UserId::new("seller-9"),
                product_id,
                amount: Decimal::new(50000, 2),
                payment_method: PaymentMethod::Wallet,
                pickup_location: Location::new(38.72, -9.14),
                dropoff_location: Location::new(38.74, -9.15),
            })
            .await
            .unwrap();

        let result = fx
            .resolver
            .resolve_dispute(order.order_id, DisputeOutcome::Refund, "op-1")
            .await;
        assert!(matches!(result, Err(Error::NotDisputed(_))));
    }
}
