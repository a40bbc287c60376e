//! Route batch lifecycle
//!
//! A checkpoint turns the window's confirmed orders into one
//! `RouteBatch`: `Pending` → `Optimizing` → `Ready` → `Dispatched`.
//! Batches are keyed by (date, slot), which makes checkpoint re-runs
//! idempotent.

use crate::{
    notify::{notify_fire_and_forget, DispatchNotifier, Notification},
    storage::Storage,
    types::{BatchStatus, Order, RouteBatch, TimeSlot},
    Error, Result,
};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use routing_engine::{RouteOptimizer, Stop, TimeWindow};
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

/// Builds, optimizes, and dispatches route batches
pub struct BatchRunner {
    storage: Arc<Storage>,
    optimizer: RouteOptimizer,
    notifier: Arc<dyn DispatchNotifier>,

    /// Delivery window length after the checkpoint
    delivery_promise: Duration,
}

impl BatchRunner {
    /// Create a new runner
    pub fn new(
        storage: Arc<Storage>,
        optimizer: RouteOptimizer,
        notifier: Arc<dyn DispatchNotifier>,
        delivery_promise: Duration,
    ) -> Self {
        Self {
            storage,
            optimizer,
            notifier,
            delivery_promise,
        }
    }

    /// Run one checkpoint over its confirmation window
    ///
    /// `window` is the half-open interval `(start, end]` of confirmation
    /// times that feed this slot; `end` is the checkpoint instant and the
    /// planning departure time. Returns `None` when no orders are
    /// eligible (explicit no-op), and the existing batch unchanged when
    /// the checkpoint already ran.
    pub async fn run_checkpoint(
        &self,
        date: NaiveDate,
        slot: TimeSlot,
        window: (DateTime<Utc>, DateTime<Utc>),
    ) -> Result<Option<RouteBatch>> {
        if let Some(existing) = self.storage.batch_for_slot(date, slot)? {
            tracing::info!(
                batch_id = %existing.batch_id,
                %date,
                slot = slot.label(),
                "Checkpoint already ran, keeping existing batch"
            );
            return Ok(Some(existing));
        }

        let (start, end) = window;
        let eligible = self.eligible_orders(start, end)?;

        if eligible.is_empty() {
            tracing::info!(%date, slot = slot.label(), "No eligible orders, skipping batch");
            return Ok(None);
        }

        let order_ids: Vec<Uuid> = eligible.iter().map(|o| o.order_id).collect();
        let mut batch = RouteBatch::new(date, slot, order_ids);
        self.storage.put_batch(&batch)?;

        tracing::info!(
            batch_id = %batch.batch_id,
            %date,
            slot = slot.label(),
            orders = batch.order_ids.len(),
            "Batch created"
        );

        batch.status = BatchStatus::Optimizing;
        self.storage.put_batch(&batch)?;

        let stops = self.build_stops(&eligible, end);
        let routes = self.optimizer.plan(stops, end)?;

        for route in &routes {
            self.storage.put_route(route)?;
            batch.route_ids.push(route.route_id);
        }

        batch.status = BatchStatus::Ready;
        self.storage.put_batch(&batch)?;

        tracing::info!(
            batch_id = %batch.batch_id,
            routes = batch.route_ids.len(),
            "Batch optimized and ready"
        );

        notify_fire_and_forget(
            &self.notifier,
            Notification::BatchStatusChanged {
                batch_id: batch.batch_id,
                status: batch.status,
                route_count: batch.route_ids.len(),
            },
        );

        Ok(Some(batch))
    }

    /// Assign drivers and hand the batch over: `Ready` → `Dispatched`
    pub async fn dispatch_batch(
        &self,
        batch_id: Uuid,
        assignments: &HashMap<Uuid, String>,
    ) -> Result<RouteBatch> {
        let mut batch = self.storage.get_batch(batch_id)?;

        if batch.status != BatchStatus::Ready {
            return Err(Error::Batch(format!(
                "batch {} is {:?}, only Ready batches can be dispatched",
                batch_id, batch.status
            )));
        }

        for route_id in &batch.route_ids {
            let driver_id = assignments.get(route_id).ok_or_else(|| {
                Error::Batch(format!("no driver assigned for route {}", route_id))
            })?;

            let mut route = self.storage.get_route(*route_id)?;
            route.driver_id = Some(driver_id.clone());
            self.storage.put_route(&route)?;

            notify_fire_and_forget(
                &self.notifier,
                Notification::RouteAssigned {
                    route_id: *route_id,
                    driver_id: driver_id.clone(),
                },
            );
        }

        batch.status = BatchStatus::Dispatched;
        self.storage.put_batch(&batch)?;

        tracing::info!(
            batch_id = %batch_id,
            routes = batch.route_ids.len(),
            "Batch dispatched"
        );

        notify_fire_and_forget(
            &self.notifier,
            Notification::BatchStatusChanged {
                batch_id: batch.batch_id,
                status: batch.status,
                route_count: batch.route_ids.len(),
            },
        );

        Ok(batch)
    }

    /// Confirmed orders whose confirmation falls in `(start, end]`
    fn eligible_orders(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Vec<Order>> {
        let confirmed = self
            .storage
            .orders_by_status(crate::types::OrderStatus::Confirmed)?;

        Ok(confirmed
            .into_iter()
            .filter(|o| {
                o.confirmed_at
                    .map(|t| t > start && t <= end)
                    .unwrap_or(false)
            })
            .collect())
    }

    /// Paired pickup/delivery stops for the optimizer; deliveries carry
    /// the slot's promise window
    fn build_stops(&self, orders: &[Order], checkpoint: DateTime<Utc>) -> Vec<Stop> {
        let promise = TimeWindow::new(checkpoint, checkpoint + self.delivery_promise);

        let mut stops = Vec::with_capacity(orders.len() * 2);
        for order in orders {
            stops.push(Stop::pickup(order.order_id, order.pickup_location, None));
            stops.push(Stop::delivery(
                order.order_id,
                order.dropoff_location,
                Some(promise),
            ));
        }
        stops
    }
}
