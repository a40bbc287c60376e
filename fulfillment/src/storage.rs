//! Storage layer using RocksDB
//!
//! # Column Families
//!
//! - `orders` - Orders (key: order_id)
//! - `reservations` - Listing reservations (key: product_id)
//! - `batches` - Route batches (key: batch_id)
//! - `routes` - Planned routes (key: route_id)
//! - `indices` - Secondary indices (status lookups, slot idempotence)

use crate::{
    error::{Error, Result},
    types::{Order, OrderStatus, Reservation, RouteBatch, TimeSlot},
};
use chrono::NaiveDate;
use rocksdb::{ColumnFamily, ColumnFamilyDescriptor, IteratorMode, Options, WriteBatch, DB};
use routing_engine::Route;
use std::path::Path;
use std::sync::Arc;
use uuid::Uuid;

/// Column family names
const CF_ORDERS: &str = "orders";
const CF_RESERVATIONS: &str = "reservations";
const CF_BATCHES: &str = "batches";
const CF_ROUTES: &str = "routes";
const CF_INDICES: &str = "indices";

/// Index tags (first byte of composite index keys)
const IDX_ORDER_STATUS: u8 = b's';
const IDX_BATCH_SLOT: u8 = b'd';

/// Storage wrapper for RocksDB
pub struct Storage {
    db: Arc<DB>,
}

impl Storage {
    /// Open or create database
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        std::fs::create_dir_all(path)?;

        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);

        let cf_descriptors = vec![
            ColumnFamilyDescriptor::new(CF_ORDERS, Self::cf_options()),
            ColumnFamilyDescriptor::new(CF_RESERVATIONS, Self::cf_options()),
            ColumnFamilyDescriptor::new(CF_BATCHES, Self::cf_options()),
            ColumnFamilyDescriptor::new(CF_ROUTES, Self::cf_options()),
            ColumnFamilyDescriptor::new(CF_INDICES, Self::cf_options_indices()),
        ];

        let db = DB::open_cf_descriptors(&db_opts, path, cf_descriptors)?;

        tracing::info!("Opened fulfillment RocksDB at {:?}", path);

        Ok(Self { db: Arc::new(db) })
    }

    fn cf_options() -> Options {
        let mut opts = Options::default();
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
        opts
    }

    fn cf_options_indices() -> Options {
        let mut opts = Options::default();
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
        let mut block_opts = rocksdb::BlockBasedOptions::default();
        block_opts.set_bloom_filter(10.0, false);
        opts.set_block_based_table_factory(&block_opts);
        opts
    }

    fn cf_handle(&self, name: &str) -> Result<&ColumnFamily> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| Error::Storage(format!("Column family {} not found", name)))
    }

    // Order operations

    /// Write an order and keep its status index current
    ///
    /// `prev_status` must be the status the order was read with so the
    /// stale index entry can be removed in the same batch.
    pub fn put_order(&self, order: &Order, prev_status: Option<OrderStatus>) -> Result<()> {
        let cf_orders = self.cf_handle(CF_ORDERS)?;
        let cf_indices = self.cf_handle(CF_INDICES)?;

        let mut batch = WriteBatch::default();
        batch.put_cf(cf_orders, order.order_id.as_bytes(), &bincode::serialize(order)?);

        if let Some(prev) = prev_status {
            if prev != order.status {
                batch.delete_cf(cf_indices, Self::status_index_key(prev, order.order_id));
            }
        }
        batch.put_cf(
            cf_indices,
            Self::status_index_key(order.status, order.order_id),
            [],
        );

        self.db.write(batch)?;
        Ok(())
    }

    /// Get order by ID
    pub fn get_order(&self, order_id: Uuid) -> Result<Order> {
        let cf = self.cf_handle(CF_ORDERS)?;

        let value = self
            .db
            .get_cf(cf, order_id.as_bytes())?
            .ok_or(Error::OrderNotFound(order_id))?;

        let order: Order = bincode::deserialize(&value)?;
        Ok(order)
    }

    /// All orders currently in a status (via index)
    pub fn orders_by_status(&self, status: OrderStatus) -> Result<Vec<Order>> {
        let cf_indices = self.cf_handle(CF_INDICES)?;

        let prefix = [IDX_ORDER_STATUS, status as u8];
        let iter = self.db.prefix_iterator_cf(cf_indices, prefix);

        let mut orders = Vec::new();
        for item in iter {
            let (key, _) = item?;
            if !key.starts_with(&prefix) {
                break;
            }

            let order_id = Self::uuid_suffix(&key)?;
            orders.push(self.get_order(order_id)?);
        }

        Ok(orders)
    }

    // Reservation operations

    /// Get reservation by product ID
    pub fn get_reservation(&self, product_id: Uuid) -> Result<Reservation> {
        let cf = self.cf_handle(CF_RESERVATIONS)?;

        let value = self
            .db
            .get_cf(cf, product_id.as_bytes())?
            .ok_or(Error::ReservationNotFound(product_id))?;

        let reservation: Reservation = bincode::deserialize(&value)?;
        Ok(reservation)
    }

    /// Compare-and-set a reservation record
    ///
    /// `expected_version` of `None` means the record must not exist yet.
    /// Fails with [`Error::Conflict`] when another writer got there first;
    /// the caller retries or surfaces `ProductUnavailable`.
    pub fn compare_and_set_reservation(
        &self,
        expected_version: Option<u64>,
        reservation: &Reservation,
    ) -> Result<()> {
        let cf = self.cf_handle(CF_RESERVATIONS)?;

        let current = self
            .db
            .get_cf(cf, reservation.product_id.as_bytes())?
            .map(|value| bincode::deserialize::<Reservation>(&value))
            .transpose()?;

        match (expected_version, current) {
            (None, None) => {}
            (Some(expected), Some(current)) if current.version == expected => {}
            (expected, current) => {
                return Err(Error::Conflict(format!(
                    "Reservation for {} changed concurrently (expected version {:?}, found {:?})",
                    reservation.product_id,
                    expected,
                    current.map(|c| c.version),
                )));
            }
        }

        self.db
            .put_cf(cf, reservation.product_id.as_bytes(), bincode::serialize(reservation)?)?;
        Ok(())
    }

    // Batch operations

    /// Write a batch and its (date, slot) idempotence index
    pub fn put_batch(&self, batch: &RouteBatch) -> Result<()> {
        let cf_batches = self.cf_handle(CF_BATCHES)?;
        let cf_indices = self.cf_handle(CF_INDICES)?;

        let mut wb = WriteBatch::default();
        wb.put_cf(cf_batches, batch.batch_id.as_bytes(), &bincode::serialize(batch)?);
        wb.put_cf(
            cf_indices,
            Self::slot_index_key(batch.date, batch.slot),
            batch.batch_id.as_bytes(),
        );

        self.db.write(wb)?;
        Ok(())
    }

    /// Get batch by ID
    pub fn get_batch(&self, batch_id: Uuid) -> Result<RouteBatch> {
        let cf = self.cf_handle(CF_BATCHES)?;

        let value = self
            .db
            .get_cf(cf, batch_id.as_bytes())?
            .ok_or(Error::BatchNotFound(batch_id))?;

        let batch: RouteBatch = bincode::deserialize(&value)?;
        Ok(batch)
    }

    /// Batch already created for a checkpoint, if any
    pub fn batch_for_slot(&self, date: NaiveDate, slot: TimeSlot) -> Result<Option<RouteBatch>> {
        let cf_indices = self.cf_handle(CF_INDICES)?;

        let value = self.db.get_cf(cf_indices, Self::slot_index_key(date, slot))?;
        match value {
            Some(bytes) => {
                let batch_id = Self::uuid_suffix(&bytes)?;
                Ok(Some(self.get_batch(batch_id)?))
            }
            None => Ok(None),
        }
    }

    /// All batches, oldest first
    pub fn list_batches(&self) -> Result<Vec<RouteBatch>> {
        let cf = self.cf_handle(CF_BATCHES)?;

        let mut batches = Vec::new();
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (_, value) = item?;
            batches.push(bincode::deserialize::<RouteBatch>(&value)?);
        }

        batches.sort_by_key(|b| b.created_at);
        Ok(batches)
    }

    /// Batch that owns a route, if any
    pub fn batch_for_route(&self, route_id: Uuid) -> Result<Option<RouteBatch>> {
        Ok(self
            .list_batches()?
            .into_iter()
            .find(|b| b.route_ids.contains(&route_id)))
    }

    // Route operations

    /// Write a route
    pub fn put_route(&self, route: &Route) -> Result<()> {
        let cf = self.cf_handle(CF_ROUTES)?;
        self.db
            .put_cf(cf, route.route_id.as_bytes(), bincode::serialize(route)?)?;
        Ok(())
    }

    /// Get route by ID
    pub fn get_route(&self, route_id: Uuid) -> Result<Route> {
        let cf = self.cf_handle(CF_ROUTES)?;

        let value = self
            .db
            .get_cf(cf, route_id.as_bytes())?
            .ok_or(Error::RouteNotFound(route_id))?;

        let route: Route = bincode::deserialize(&value)?;
        Ok(route)
    }

    // Index key helpers

    fn status_index_key(status: OrderStatus, order_id: Uuid) -> Vec<u8> {
        let mut key = vec![IDX_ORDER_STATUS, status as u8];
        key.extend_from_slice(order_id.as_bytes());
        key
    }

    fn slot_index_key(date: NaiveDate, slot: TimeSlot) -> Vec<u8> {
        let mut key = vec![IDX_BATCH_SLOT];
        key.extend_from_slice(date.to_string().as_bytes());
        key.push(b'|');
        key.push(slot as u8);
        key
    }

    fn uuid_suffix(key: &[u8]) -> Result<Uuid> {
        if key.len() < 16 {
            return Err(Error::Storage("Index key too short".to_string()));
        }
        let bytes: [u8; 16] = key[key.len() - 16..]
            .try_into()
            .map_err(|_| Error::Storage("Malformed index key".to_string()))?;
        Ok(Uuid::from_bytes(bytes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{PaymentMethod, ReservationStatus};
    use chrono::Utc;
    use ledger_core::UserId;
    use routing_engine::Location;
    use rust_decimal::Decimal;
    use tempfile::TempDir;

    fn test_storage() -> (Storage, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        (Storage::open(temp_dir.path()).unwrap(), temp_dir)
    }

    fn test_order() -> Order {
        Order {
            order_id: Uuid::new_v4(),
            buyer_id: UserId::new("buyer-1"),
            seller_id: UserId::new("seller-9"),
            product_id: Uuid::new_v4(),
            amount: Decimal::new(50000, 2),
            payment_method: PaymentMethod::Wallet,
            status: OrderStatus::Pending,
            created_at: Utc::now(),
            confirmed_at: None,
            delivered_at: None,
            dispute_deadline: None,
            dispute_reason: None,
            dispute_outcome: None,
            route_id: None,
            hold_id: None,
            pickup_location: Location::new(38.72, -9.14),
            dropoff_location: Location::new(38.74, -9.15),
        }
    }

    #[test]
    fn test_order_roundtrip() {
        let (storage, _temp) = test_storage();

        let order = test_order();
        storage.put_order(&order, None).unwrap();

        let retrieved = storage.get_order(order.order_id).unwrap();
        assert_eq!(retrieved.order_id, order.order_id);
        assert_eq!(retrieved.status, OrderStatus::Pending);
    }

    #[test]
    fn test_status_index_follows_transitions() {
        let (storage, _temp) = test_storage();

        let mut order = test_order();
        storage.put_order(&order, None).unwrap();

        assert_eq!(storage.orders_by_status(OrderStatus::Pending).unwrap().len(), 1);

        order.status = OrderStatus::Confirmed;
        storage.put_order(&order, Some(OrderStatus::Pending)).unwrap();

        assert!(storage.orders_by_status(OrderStatus::Pending).unwrap().is_empty());
        assert_eq!(storage.orders_by_status(OrderStatus::Confirmed).unwrap().len(), 1);
    }

    #[test]
    fn test_reservation_cas_detects_conflict() {
        let (storage, _temp) = test_storage();
        let product_id = Uuid::new_v4();

        let mut reservation = Reservation::available(product_id);
        storage.compare_and_set_reservation(None, &reservation).unwrap();

        // Creating again must conflict
        let result = storage.compare_and_set_reservation(None, &reservation);
        assert!(matches!(result, Err(Error::Conflict(_))));

        // Write with the right expected version succeeds
        let prev_version = reservation.version;
        reservation.status = ReservationStatus::Reserved;
        reservation.version += 1;
        storage
            .compare_and_set_reservation(Some(prev_version), &reservation)
            .unwrap();

        // Stale version is rejected
        let result = storage.compare_and_set_reservation(Some(prev_version), &reservation);
        assert!(matches!(result, Err(Error::Conflict(_))));
    }

    #[test]
    fn test_batch_slot_index() {
        let (storage, _temp) = test_storage();

        let date = NaiveDate::from_ymd_opt(2024, 6, 3).unwrap();
        let batch = RouteBatch::new(date, TimeSlot::Afternoon, vec![Uuid::new_v4()]);
        storage.put_batch(&batch).unwrap();

        let found = storage.batch_for_slot(date, TimeSlot::Afternoon).unwrap();
        assert_eq!(found.unwrap().batch_id, batch.batch_id);

        assert!(storage.batch_for_slot(date, TimeSlot::Morning).unwrap().is_none());
    }

    #[test]
    fn test_route_roundtrip_and_owner_lookup() {
        let (storage, _temp) = test_storage();

        let route = Route {
            route_id: Uuid::new_v4(),
            driver_id: Some("driver-7".to_string()),
            stops: vec![],
            total_distance_km: 12.5,
            total_duration_secs: 3600,
            infeasible: false,
        };
        storage.put_route(&route).unwrap();

        let date = NaiveDate::from_ymd_opt(2024, 6, 3).unwrap();
        let mut batch = RouteBatch::new(date, TimeSlot::Morning, vec![]);
        batch.route_ids.push(route.route_id);
        storage.put_batch(&batch).unwrap();

        let retrieved = storage.get_route(route.route_id).unwrap();
        assert_eq!(retrieved.driver_id.as_deref(), Some("driver-7"));

        let owner = storage.batch_for_route(route.route_id).unwrap();
        assert_eq!(owner.unwrap().batch_id, batch.batch_id);
    }
}
