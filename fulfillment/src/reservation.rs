//! Reservation coordinator
//!
//! Maps a product listing to at most one active order. Writers go through
//! a versioned compare-and-set under a per-product lock stripe; CAS
//! conflicts are retried a bounded number of times with jittered backoff
//! before surfacing [`Error::Conflict`].

use crate::{
    config::RetryConfig,
    storage::Storage,
    types::{Reservation, ReservationStatus},
    Error, Result,
};
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use rand::Rng;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

/// Reservation coordinator
pub struct ReservationCoordinator {
    storage: Arc<Storage>,
    retry: RetryConfig,

    /// Per-product serialization points
    locks: DashMap<Uuid, Arc<Mutex<()>>>,
}

impl ReservationCoordinator {
    /// Create a new coordinator
    pub fn new(storage: Arc<Storage>, retry: RetryConfig) -> Self {
        Self {
            storage,
            retry,
            locks: DashMap::new(),
        }
    }

    fn lock_for(&self, product_id: Uuid) -> Arc<Mutex<()>> {
        self.locks
            .entry(product_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// List a product: create its reservation record as `Available`
    ///
    /// Idempotent: re-listing an existing product returns the current
    /// record unchanged.
    pub async fn create(&self, product_id: Uuid) -> Result<Reservation> {
        let lock = self.lock_for(product_id);
        let _guard = lock.lock().await;

        match self.storage.get_reservation(product_id) {
            Ok(existing) => Ok(existing),
            Err(Error::ReservationNotFound(_)) => {
                let reservation = Reservation::available(product_id);
                self.storage.compare_and_set_reservation(None, &reservation)?;

                tracing::info!(product_id = %product_id, "Product listed");
                Ok(reservation)
            }
            Err(e) => Err(e),
        }
    }

    /// Get the current reservation record
    pub fn get(&self, product_id: Uuid) -> Result<Reservation> {
        self.storage.get_reservation(product_id)
    }

    /// Reserve a listing for an order
    ///
    /// Succeeds from `Available`, or from an expired `Reserved` (the
    /// previous checkout lapsed). Fails with
    /// [`Error::ProductUnavailable`] otherwise.
    pub async fn reserve(&self, product_id: Uuid, order_id: Uuid, ttl: Duration) -> Result<Reservation> {
        self.reserve_at(product_id, order_id, ttl, Utc::now()).await
    }

    /// Clock-injected variant of [`reserve`](Self::reserve)
    pub async fn reserve_at(
        &self,
        product_id: Uuid,
        order_id: Uuid,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> Result<Reservation> {
        self.with_retry(product_id, |mut reservation| {
            if reservation.status != ReservationStatus::Available && !reservation.is_expired(now) {
                return Err(Error::ProductUnavailable(product_id));
            }

            reservation.status = ReservationStatus::Reserved;
            reservation.reserved_for_order = Some(order_id);
            reservation.reserved_until = Some(now + ttl);
            Ok(reservation)
        })
        .await
        .map(|reservation| {
            tracing::info!(
                product_id = %product_id,
                order_id = %order_id,
                until = ?reservation.reserved_until,
                "Product reserved"
            );
            reservation
        })
    }

    /// Pin a reservation to its order once the seller confirms
    ///
    /// Clears the checkout TTL so a confirmed order's listing can never
    /// lapse back to the market. Fails with
    /// [`Error::ProductUnavailable`] if the reservation no longer belongs
    /// to the order (the checkout expired and another buyer took it).
    pub async fn pin(&self, product_id: Uuid, order_id: Uuid) -> Result<Reservation> {
        let pinned = self
            .with_retry(product_id, |mut reservation| {
                if reservation.status != ReservationStatus::Reserved
                    || reservation.reserved_for_order != Some(order_id)
                {
                    return Err(Error::ProductUnavailable(product_id));
                }

                reservation.reserved_until = None;
                Ok(reservation)
            })
            .await?;

        tracing::debug!(product_id = %product_id, order_id = %order_id, "Reservation pinned");
        Ok(pinned)
    }

    /// Release a listing back to `Available`
    ///
    /// Used on cancellation (from `Reserved`) and on dispute refunds
    /// (from `Sold`, re-offering the listing).
    pub async fn release(&self, product_id: Uuid) -> Result<Reservation> {
        let released = self
            .with_retry(product_id, |mut reservation| {
                reservation.status = ReservationStatus::Available;
                reservation.reserved_for_order = None;
                reservation.reserved_until = None;
                Ok(reservation)
            })
            .await?;

        tracing::info!(product_id = %product_id, "Product released");
        Ok(released)
    }

    /// Mark a reserved listing as sold
    pub async fn mark_sold(&self, product_id: Uuid) -> Result<Reservation> {
        let sold = self
            .with_retry(product_id, |mut reservation| {
                if reservation.status != ReservationStatus::Reserved {
                    return Err(Error::ProductUnavailable(product_id));
                }

                reservation.status = ReservationStatus::Sold;
                reservation.reserved_until = None;
                Ok(reservation)
            })
            .await?;

        tracing::info!(product_id = %product_id, "Product sold");
        Ok(sold)
    }

    /// Read-modify-write under the product lock, retrying CAS conflicts
    /// with exponential backoff and jitter
    async fn with_retry(
        &self,
        product_id: Uuid,
        mutate: impl Fn(Reservation) -> Result<Reservation>,
    ) -> Result<Reservation> {
        let lock = self.lock_for(product_id);
        let _guard = lock.lock().await;

        let mut attempt = 0;
        loop {
            let current = self.storage.get_reservation(product_id)?;
            let expected_version = current.version;

            let mut updated = mutate(current)?;
            updated.version = expected_version + 1;

            match self
                .storage
                .compare_and_set_reservation(Some(expected_version), &updated)
            {
                Ok(()) => return Ok(updated),
                Err(Error::Conflict(msg)) => {
                    attempt += 1;
                    if attempt >= self.retry.max_attempts {
                        return Err(Error::Conflict(msg));
                    }

                    let backoff = self.retry.base_delay_ms * (1 << attempt.min(8));
                    let jitter = rand::thread_rng().gen_range(0..=self.retry.base_delay_ms);
                    tracing::debug!(
                        product_id = %product_id,
                        attempt,
                        backoff_ms = backoff + jitter,
                        "Reservation CAS conflict, retrying"
                    );
                    tokio::time::sleep(std::time::Duration::from_millis(backoff + jitter)).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn test_coordinator() -> (ReservationCoordinator, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let storage = Arc::new(Storage::open(temp_dir.path()).unwrap());
        (
            ReservationCoordinator::new(storage, RetryConfig::default()),
            temp_dir,
        )
    }

    #[tokio::test]
    async fn test_create_is_idempotent() {
        let (coordinator, _temp) = test_coordinator();
        let product_id = Uuid::new_v4();

        let first = coordinator.create(product_id).await.unwrap();
        let second = coordinator.create(product_id).await.unwrap();

        assert_eq!(first.version, second.version);
        assert_eq!(second.status, ReservationStatus::Available);
    }

    #[tokio::test]
    async fn test_reserve_then_conflict() {
        let (coordinator, _temp) = test_coordinator();
        let product_id = Uuid::new_v4();
        coordinator.create(product_id).await.unwrap();

        let first_order = Uuid::new_v4();
        coordinator
            .reserve(product_id, first_order, Duration::minutes(30))
            .await
            .unwrap();

        // Second order can't take a live reservation
        let result = coordinator
            .reserve(product_id, Uuid::new_v4(), Duration::minutes(30))
            .await;
        assert!(matches!(result, Err(Error::ProductUnavailable(_))));
    }

    #[tokio::test]
    async fn test_expired_reservation_reclaimable() {
        let (coordinator, _temp) = test_coordinator();
        let product_id = Uuid::new_v4();
        coordinator.create(product_id).await.unwrap();

        let now = Utc::now();
        coordinator
            .reserve_at(product_id, Uuid::new_v4(), Duration::minutes(30), now)
            .await
            .unwrap();

        // 31 minutes later the hold has lapsed and a new checkout wins
        let later = now + Duration::minutes(31);
        let second_order = Uuid::new_v4();
        let reservation = coordinator
            .reserve_at(product_id, second_order, Duration::minutes(30), later)
            .await
            .unwrap();

        assert_eq!(reservation.reserved_for_order, Some(second_order));
    }

    #[tokio::test]
    async fn test_pin_stops_expiry() {
        let (coordinator, _temp) = test_coordinator();
        let product_id = Uuid::new_v4();
        coordinator.create(product_id).await.unwrap();

        let now = Utc::now();
        let order_id = Uuid::new_v4();
        coordinator
            .reserve_at(product_id, order_id, Duration::minutes(30), now)
            .await
            .unwrap();

        let pinned = coordinator.pin(product_id, order_id).await.unwrap();
        assert!(pinned.reserved_until.is_none());

        // Hours later the listing still belongs to the confirmed order
        let later = now + Duration::hours(6);
        let result = coordinator
            .reserve_at(product_id, Uuid::new_v4(), Duration::minutes(30), later)
            .await;
        assert!(matches!(result, Err(Error::ProductUnavailable(_))));
    }

    #[tokio::test]
    async fn test_pin_rejects_foreign_order() {
        let (coordinator, _temp) = test_coordinator();
        let product_id = Uuid::new_v4();
        coordinator.create(product_id).await.unwrap();

        coordinator
            .reserve(product_id, Uuid::new_v4(), Duration::minutes(30))
            .await
            .unwrap();

        // A different order can't pin someone else's reservation
        let result = coordinator.pin(product_id, Uuid::new_v4()).await;
        assert!(matches!(result, Err(Error::ProductUnavailable(_))));
    }

    #[tokio::test]
    async fn test_sold_requires_reserved() {
        let (coordinator, _temp) = test_coordinator();
        let product_id = Uuid::new_v4();
        coordinator.create(product_id).await.unwrap();

        // Available → Sold is not a legal jump
        let result = coordinator.mark_sold(product_id).await;
        assert!(matches!(result, Err(Error::ProductUnavailable(_))));

        coordinator
            .reserve(product_id, Uuid::new_v4(), Duration::minutes(30))
            .await
            .unwrap();
        let sold = coordinator.mark_sold(product_id).await.unwrap();
        assert_eq!(sold.status, ReservationStatus::Sold);
    }

    #[tokio::test]
    async fn test_release_reoffers_sold_listing() {
        let (coordinator, _temp) = test_coordinator();
        let product_id = Uuid::new_v4();
        coordinator.create(product_id).await.unwrap();

        coordinator
            .reserve(product_id, Uuid::new_v4(), Duration::minutes(30))
            .await
            .unwrap();
        coordinator.mark_sold(product_id).await.unwrap();

        let released = coordinator.release(product_id).await.unwrap();
        assert_eq!(released.status, ReservationStatus::Available);
        assert!(released.reserved_for_order.is_none());
    }

    #[tokio::test]
    async fn test_concurrent_reserves_single_winner() {
        let (coordinator, _temp) = test_coordinator();
        let coordinator = Arc::new(coordinator);
        let product_id = Uuid::new_v4();
        coordinator.create(product_id).await.unwrap();

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let coordinator = coordinator.clone();
            tasks.push(tokio::spawn(async move {
                coordinator
                    .reserve(product_id, Uuid::new_v4(), Duration::minutes(30))
                    .await
            }));
        }

        let mut winners = 0;
        for task in tasks {
            if task.await.unwrap().is_ok() {
                winners += 1;
            }
        }

        assert_eq!(winners, 1);
    }
}
