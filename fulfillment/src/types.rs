//! Core types for order fulfillment

use chrono::{DateTime, NaiveDate, Utc};
use ledger_core::UserId;
use routing_engine::Location;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// How the buyer pays
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum PaymentMethod {
    /// Wallet balance, escrowed at checkout
    Wallet = 1,
    /// Cash on delivery, settled through the payment provider
    Cash = 2,
}

/// Order status
///
/// `Delivered` doubles as the dispute-hold period: the order carries a
/// `dispute_deadline` and either a dispute or the auto-release sweep
/// moves it on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum OrderStatus {
    /// Created at checkout, waiting for seller acceptance
    Pending = 1,
    /// Accepted by the seller, eligible for routing
    Confirmed = 2,
    /// On a dispatched route
    OutForDelivery = 3,
    /// Receipt confirmed by the buyer; dispute window open
    Delivered = 4,
    /// Buyer raised a dispute inside the window
    Disputed = 5,
    /// Escrow released to the seller (terminal)
    Released = 6,
    /// Escrow refunded to the buyer (terminal)
    Refunded = 7,
    /// Cancelled before confirmation (terminal)
    Cancelled = 8,
}

impl OrderStatus {
    /// Check if the order reached a terminal state
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::Released | OrderStatus::Refunded | OrderStatus::Cancelled
        )
    }
}

/// Operator decision on a disputed order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum DisputeOutcome {
    /// Escrow back to the buyer, listing re-offered
    Refund = 1,
    /// Escrow to the seller, sale stands
    Release = 2,
}

/// A marketplace order
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    /// Unique order ID
    pub order_id: Uuid,

    /// Buyer
    pub buyer_id: UserId,

    /// Seller
    pub seller_id: UserId,

    /// Listing being purchased
    pub product_id: Uuid,

    /// Price in minor units (exact decimal)
    pub amount: Decimal,

    /// How the buyer pays
    pub payment_method: PaymentMethod,

    /// Current status
    pub status: OrderStatus,

    /// Checkout timestamp
    pub created_at: DateTime<Utc>,

    /// Seller acceptance timestamp
    pub confirmed_at: Option<DateTime<Utc>>,

    /// Buyer receipt confirmation timestamp
    pub delivered_at: Option<DateTime<Utc>>,

    /// End of the dispute window (set on delivery)
    pub dispute_deadline: Option<DateTime<Utc>>,

    /// Reason given when a dispute was raised
    pub dispute_reason: Option<String>,

    /// Recorded operator decision, for idempotent resolution retries
    pub dispute_outcome: Option<DisputeOutcome>,

    /// Route carrying this order (set when marked out for delivery)
    pub route_id: Option<Uuid>,

    /// Escrow hold backing a wallet order
    pub hold_id: Option<Uuid>,

    /// Seller location for the pickup stop
    pub pickup_location: Location,

    /// Buyer location for the delivery stop
    pub dropoff_location: Location,
}

impl Order {
    /// Check if the order reached a terminal state
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

/// Listing reservation status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum ReservationStatus {
    /// Listed and purchasable
    Available = 1,
    /// Locked to one in-flight order
    Reserved = 2,
    /// Sale completed (reverts only on dispute refund)
    Sold = 3,
}

/// Listing reservation, the product side of the single-active-order lock
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reservation {
    /// Listing this reservation guards
    pub product_id: Uuid,

    /// Current status
    pub status: ReservationStatus,

    /// Order holding the reservation
    pub reserved_for_order: Option<Uuid>,

    /// Reservation expiry; an expired reservation is reclaimable
    pub reserved_until: Option<DateTime<Utc>>,

    /// Bumped on every write, checked by compare-and-set
    pub version: u64,
}

impl Reservation {
    /// A freshly listed, available product
    pub fn available(product_id: Uuid) -> Self {
        Self {
            product_id,
            status: ReservationStatus::Available,
            reserved_for_order: None,
            reserved_until: None,
            version: 0,
        }
    }

    /// Whether a reserved listing's hold has lapsed
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.status == ReservationStatus::Reserved
            && self.reserved_until.map(|t| now >= t).unwrap_or(false)
    }
}

/// Delivery time slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum TimeSlot {
    /// Covers orders confirmed since the previous day's afternoon cutoff
    Morning = 1,
    /// Covers orders confirmed since today's morning cutoff
    Afternoon = 2,
}

impl TimeSlot {
    /// Human-readable label
    pub fn label(&self) -> &'static str {
        match self {
            TimeSlot::Morning => "morning",
            TimeSlot::Afternoon => "afternoon",
        }
    }
}

/// Route batch status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum BatchStatus {
    /// Created, stops not yet planned
    Pending = 1,
    /// Route computation in progress
    Optimizing = 2,
    /// Routes planned, awaiting driver assignment
    Ready = 3,
    /// Handed to drivers
    Dispatched = 4,
}

/// Batch of same-slot orders and their planned routes
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteBatch {
    /// Unique batch ID
    pub batch_id: Uuid,

    /// Delivery date
    pub date: NaiveDate,

    /// Morning or afternoon slot
    pub slot: TimeSlot,

    /// Current status
    pub status: BatchStatus,

    /// Orders in this batch
    pub order_ids: Vec<Uuid>,

    /// Planned routes (filled when optimization completes)
    pub route_ids: Vec<Uuid>,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,
}

impl RouteBatch {
    /// A new batch awaiting optimization
    pub fn new(date: NaiveDate, slot: TimeSlot, order_ids: Vec<Uuid>) -> Self {
        Self {
            batch_id: Uuid::new_v4(),
            date,
            slot,
            status: BatchStatus::Pending,
            order_ids,
            route_ids: Vec::new(),
            created_at: Utc::now(),
        }
    }
}
