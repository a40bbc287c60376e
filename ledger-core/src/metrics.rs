//! Metrics collection for observability
//!
//! This module provides Prometheus metrics for monitoring the ledger.
//!
//! # Metrics
//!
//! - `ledger_entries_total` - Total number of entries appended
//! - `ledger_holds_placed_total` - Total escrow holds placed
//! - `ledger_holds_settled_total` - Total holds released or refunded
//! - `ledger_holds_active` - Currently active holds

use prometheus::{IntCounter, IntGauge, Opts, Registry};
use std::sync::Arc;

/// Metrics collector
#[derive(Clone)]
pub struct Metrics {
    /// Total entries appended
    pub entries_total: IntCounter,

    /// Total holds placed
    pub holds_placed_total: IntCounter,

    /// Total holds settled (released or refunded)
    pub holds_settled_total: IntCounter,

    /// Currently active holds
    pub holds_active: IntGauge,

    /// Prometheus registry
    pub registry: Arc<Registry>,
}

impl Metrics {
    /// Create new metrics collector
    pub fn new() -> prometheus::Result<Self> {
        let registry = Arc::new(Registry::new());

        let entries_total = IntCounter::with_opts(Opts::new(
            "ledger_entries_total",
            "Total number of entries appended",
        ))?;
        registry.register(Box::new(entries_total.clone()))?;

        let holds_placed_total = IntCounter::with_opts(Opts::new(
            "ledger_holds_placed_total",
            "Total escrow holds placed",
        ))?;
        registry.register(Box::new(holds_placed_total.clone()))?;

        let holds_settled_total = IntCounter::with_opts(Opts::new(
            "ledger_holds_settled_total",
            "Total holds released or refunded",
        ))?;
        registry.register(Box::new(holds_settled_total.clone()))?;

        let holds_active = IntGauge::with_opts(Opts::new(
            "ledger_holds_active",
            "Currently active holds",
        ))?;
        registry.register(Box::new(holds_active.clone()))?;

        Ok(Self {
            entries_total,
            holds_placed_total,
            holds_settled_total,
            holds_active,
            registry,
        })
    }

    /// Record appended entries
    pub fn record_entries_appended(&self, count: u64) {
        self.entries_total.inc_by(count);
    }

    /// Record a placed hold
    pub fn record_hold_placed(&self) {
        self.holds_placed_total.inc();
        self.holds_active.inc();
    }

    /// Record a settled hold
    pub fn record_hold_settled(&self) {
        self.holds_settled_total.inc();
        self.holds_active.dec();
    }

    /// Get metrics registry
    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}
