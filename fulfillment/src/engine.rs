//! Main fulfillment engine
//!
//! Wires the ledger, order machine, reservation coordinator, dispute
//! resolver, auto-release sweep, and route batching scheduler into the
//! surface the API layer consumes.

use crate::{
    batch::BatchRunner,
    config::Config,
    dispute::DisputeResolver,
    machine::{CreateOrderRequest, OrderLocks, OrderMachine},
    notify::DispatchNotifier,
    payment::PaymentProvider,
    reservation::ReservationCoordinator,
    scheduler::RouteScheduler,
    storage::Storage,
    sweep::DisputeSweep,
    types::{DisputeOutcome, Order, Reservation, RouteBatch},
    Result,
};
use chrono::{DateTime, Utc};
use ledger_core::{Ledger, UserId};
use routing_engine::{Route, RouteOptimizer};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

/// Fulfillment engine
pub struct FulfillmentEngine {
    ledger: Arc<Ledger>,
    storage: Arc<Storage>,
    reservations: Arc<ReservationCoordinator>,
    machine: Arc<OrderMachine>,
    resolver: DisputeResolver,
    runner: Arc<BatchRunner>,
    scheduler: Arc<RouteScheduler>,
    sweep: Arc<DisputeSweep>,

    /// Background loop handles, aborted on shutdown
    tasks: parking_lot::Mutex<Vec<tokio::task::JoinHandle<()>>>,
}

impl FulfillmentEngine {
    /// Create a new engine
    pub async fn new(
        config: Config,
        payments: Arc<dyn PaymentProvider>,
        notifier: Arc<dyn DispatchNotifier>,
    ) -> Result<Self> {
        let ledger_config = ledger_core::Config {
            data_dir: config.ledger_data_dir.clone(),
            ..Default::default()
        };
        let ledger = Arc::new(Ledger::open(ledger_config).await?);

        let storage = Arc::new(Storage::open(&config.data_dir)?);
        let reservations = Arc::new(ReservationCoordinator::new(
            storage.clone(),
            config.retry.clone(),
        ));

        let machine = Arc::new(OrderMachine::new(
            storage.clone(),
            ledger.clone(),
            reservations.clone(),
            notifier.clone(),
            payments,
            Arc::new(OrderLocks::new()),
            config.dispute_window(),
            config.reservation_ttl(),
        ));

        let runner = Arc::new(BatchRunner::new(
            storage.clone(),
            RouteOptimizer::new(config.optimizer.clone())?,
            notifier,
            chrono::Duration::hours(config.checkpoints.delivery_promise_hours),
        ));
        let scheduler = Arc::new(RouteScheduler::new(runner.clone(), &config.checkpoints)?);

        let sweep = Arc::new(DisputeSweep::new(
            storage.clone(),
            machine.clone(),
            std::time::Duration::from_secs(config.sweep_interval_secs),
        ));

        Ok(Self {
            ledger,
            storage,
            reservations,
            resolver: DisputeResolver::new(machine.clone()),
            machine,
            runner,
            scheduler,
            sweep,
            tasks: parking_lot::Mutex::new(Vec::new()),
        })
    }

    /// Spawn the sweep and scheduler loops
    pub fn start(&self) {
        let mut tasks = self.tasks.lock();

        let sweep = self.sweep.clone();
        tasks.push(tokio::spawn(sweep.start()));

        let scheduler = self.scheduler.clone();
        tasks.push(tokio::spawn(scheduler.start()));

        tracing::info!("Fulfillment engine started");
    }

    // Listings and wallets

    /// List a product (idempotent)
    pub async fn list_product(&self, product_id: Uuid) -> Result<Reservation> {
        self.reservations.create(product_id).await
    }

    /// Top up a wallet
    pub async fn deposit(&self, user_id: UserId, amount: Decimal) -> Result<Uuid> {
        Ok(self.ledger.deposit(user_id, amount).await?)
    }

    // Order operations (spec surface)

    /// Checkout
    pub async fn create_order(&self, request: CreateOrderRequest) -> Result<Order> {
        self.machine.create_order(request).await
    }

    /// Seller acceptance
    pub async fn confirm_order(&self, order_id: Uuid) -> Result<Order> {
        self.machine.confirm_order(order_id).await
    }

    /// Driver pickup against a dispatched route
    pub async fn mark_out_for_delivery(&self, order_id: Uuid, route_id: Uuid) -> Result<Order> {
        self.machine.mark_out_for_delivery(order_id, route_id).await
    }

    /// Buyer receipt confirmation
    pub async fn confirm_delivery(&self, order_id: Uuid, actor_id: &UserId) -> Result<Order> {
        self.machine.confirm_delivery(order_id, actor_id).await
    }

    /// Buyer dispute inside the window
    pub async fn raise_dispute(
        &self,
        order_id: Uuid,
        actor_id: &UserId,
        reason: impl Into<String>,
    ) -> Result<Order> {
        self.machine.raise_dispute(order_id, actor_id, reason).await
    }

    /// Operator resolution of a dispute
    pub async fn resolve_dispute(
        &self,
        order_id: Uuid,
        outcome: DisputeOutcome,
        operator_id: &str,
    ) -> Result<Order> {
        self.resolver.resolve_dispute(order_id, outcome, operator_id).await
    }

    /// Cancellation, only from `Pending`
    pub async fn cancel_order(&self, order_id: Uuid, actor_id: &UserId) -> Result<Order> {
        self.machine.cancel_order(order_id, actor_id).await
    }

    /// Get order by ID
    pub fn get_order(&self, order_id: Uuid) -> Result<Order> {
        self.machine.get_order(order_id)
    }

    // Batch and route operations

    /// All batches, oldest first
    pub fn list_batches(&self) -> Result<Vec<RouteBatch>> {
        self.storage.list_batches()
    }

    /// Get route by ID
    pub fn get_route(&self, route_id: Uuid) -> Result<Route> {
        self.storage.get_route(route_id)
    }

    /// Assign drivers and dispatch a ready batch
    pub async fn dispatch_batch(
        &self,
        batch_id: Uuid,
        assignments: &HashMap<Uuid, String>,
    ) -> Result<RouteBatch> {
        self.runner.dispatch_batch(batch_id, assignments).await
    }

    // Operational entry points (also used by tests)

    /// Run one scheduler clock check
    pub async fn tick_scheduler(&self, now: DateTime<Utc>) -> Result<Option<RouteBatch>> {
        self.scheduler.tick_once(now).await
    }

    /// Catch up the most recent completed checkpoint window
    pub async fn reconcile(&self, now: DateTime<Utc>) -> Result<Option<RouteBatch>> {
        self.scheduler.reconcile(now).await
    }

    /// Run one auto-release sweep pass
    pub async fn sweep_once(&self, now: DateTime<Utc>) -> Result<Vec<Uuid>> {
        self.sweep.run_once(now).await
    }

    // Component access for callers that need more than the facade

    /// Wallet ledger
    pub fn ledger(&self) -> &Arc<Ledger> {
        &self.ledger
    }

    /// Order state machine
    pub fn machine(&self) -> &Arc<OrderMachine> {
        &self.machine
    }

    /// Reservation coordinator
    pub fn reservations(&self) -> &Arc<ReservationCoordinator> {
        &self.reservations
    }

    /// Stop background loops
    pub async fn shutdown(self) -> Result<()> {
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }

        tracing::info!("Fulfillment engine shut down");
        Ok(())
    }
}
