//! Route batching scheduler
//!
//! Fires at two fixed daily checkpoints (default 13:00 and 19:00 UTC):
//! the morning checkpoint collects orders confirmed since the previous
//! day's afternoon cutoff, the afternoon checkpoint those confirmed
//! since the morning cutoff. The loop polls the wall clock; a process
//! that was down at checkpoint time catches up through a startup
//! reconciliation pass over the most recent completed window.

use crate::{
    batch::BatchRunner,
    config::CheckpointConfig,
    types::{RouteBatch, TimeSlot},
    Error, Result,
};
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Seconds of wall-clock tolerance around a checkpoint instant
const TRIGGER_TOLERANCE_SECS: i64 = 60;

/// Parsed checkpoint schedule
#[derive(Debug, Clone, Copy)]
pub struct Schedule {
    morning: NaiveTime,
    afternoon: NaiveTime,
}

impl Schedule {
    /// Parse a checkpoint config ("%H:%M" times)
    pub fn parse(config: &CheckpointConfig) -> Result<Self> {
        let parse = |label: &str, value: &str| {
            NaiveTime::parse_from_str(value, "%H:%M").map_err(|e| {
                Error::Config(format!("Invalid {} time '{}': {}", label, value, e))
            })
        };

        let morning = parse("morning", &config.morning_time)?;
        let afternoon = parse("afternoon", &config.afternoon_time)?;

        if morning >= afternoon {
            return Err(Error::Config(format!(
                "morning checkpoint {} must precede afternoon checkpoint {}",
                morning, afternoon
            )));
        }

        Ok(Self { morning, afternoon })
    }

    /// The checkpoint instant for a (date, slot)
    pub fn checkpoint_time(&self, date: NaiveDate, slot: TimeSlot) -> DateTime<Utc> {
        let time = match slot {
            TimeSlot::Morning => self.morning,
            TimeSlot::Afternoon => self.afternoon,
        };
        date.and_time(time).and_utc()
    }

    /// The slot firing now, if the clock is within tolerance of a
    /// checkpoint instant
    pub fn checkpoint_slot(&self, now: DateTime<Utc>) -> Option<(NaiveDate, TimeSlot)> {
        let date = now.date_naive();
        for slot in [TimeSlot::Morning, TimeSlot::Afternoon] {
            let at = self.checkpoint_time(date, slot);
            if (now - at).num_seconds().abs() < TRIGGER_TOLERANCE_SECS {
                return Some((date, slot));
            }
        }
        None
    }

    /// Confirmation window `(start, end]` feeding a checkpoint
    ///
    /// Morning covers the previous day's afternoon cutoff to today's
    /// morning cutoff; afternoon covers today's morning to afternoon.
    pub fn window_bounds(
        &self,
        date: NaiveDate,
        slot: TimeSlot,
    ) -> Result<(DateTime<Utc>, DateTime<Utc>)> {
        match slot {
            TimeSlot::Morning => {
                let prev = date
                    .pred_opt()
                    .ok_or_else(|| Error::Config(format!("no previous day for {}", date)))?;
                Ok((
                    self.checkpoint_time(prev, TimeSlot::Afternoon),
                    self.checkpoint_time(date, TimeSlot::Morning),
                ))
            }
            TimeSlot::Afternoon => Ok((
                self.checkpoint_time(date, TimeSlot::Morning),
                self.checkpoint_time(date, TimeSlot::Afternoon),
            )),
        }
    }

    /// The most recent checkpoint at or before `now`
    pub fn latest_completed(&self, now: DateTime<Utc>) -> Result<(NaiveDate, TimeSlot)> {
        let date = now.date_naive();
        if now.time() >= self.afternoon {
            Ok((date, TimeSlot::Afternoon))
        } else if now.time() >= self.morning {
            Ok((date, TimeSlot::Morning))
        } else {
            let prev = date
                .pred_opt()
                .ok_or_else(|| Error::Config(format!("no previous day for {}", date)))?;
            Ok((prev, TimeSlot::Afternoon))
        }
    }
}

/// Route batching scheduler
pub struct RouteScheduler {
    runner: Arc<BatchRunner>,
    schedule: Schedule,
    tick: std::time::Duration,

    /// Re-trigger guard: the last checkpoint this process ran
    last_run: RwLock<Option<(NaiveDate, TimeSlot)>>,
}

impl RouteScheduler {
    /// Create a new scheduler
    pub fn new(runner: Arc<BatchRunner>, config: &CheckpointConfig) -> Result<Self> {
        Ok(Self {
            runner,
            schedule: Schedule::parse(config)?,
            tick: std::time::Duration::from_secs(config.tick_secs),
            last_run: RwLock::new(None),
        })
    }

    /// Parsed schedule
    pub fn schedule(&self) -> &Schedule {
        &self.schedule
    }

    /// Catch up on the most recent completed window
    ///
    /// Safe at every startup: `run_checkpoint` is idempotent per
    /// (date, slot), so an already-created batch is left untouched.
    pub async fn reconcile(&self, now: DateTime<Utc>) -> Result<Option<RouteBatch>> {
        let (date, slot) = self.schedule.latest_completed(now)?;
        let window = self.schedule.window_bounds(date, slot)?;

        tracing::info!(%date, slot = slot.label(), "Reconciling missed checkpoint");
        self.runner.run_checkpoint(date, slot, window).await
    }

    /// One clock check; runs the checkpoint when its instant arrives
    pub async fn tick_once(&self, now: DateTime<Utc>) -> Result<Option<RouteBatch>> {
        let Some((date, slot)) = self.schedule.checkpoint_slot(now) else {
            return Ok(None);
        };

        // Avoid re-firing within the tolerance window
        if *self.last_run.read().await == Some((date, slot)) {
            return Ok(None);
        }

        let window = self.schedule.window_bounds(date, slot)?;
        let batch = self.runner.run_checkpoint(date, slot, window).await?;

        *self.last_run.write().await = Some((date, slot));
        Ok(batch)
    }

    /// Run the scheduler loop until the task is aborted
    pub async fn start(self: Arc<Self>) {
        tracing::info!("Starting route batching scheduler");

        if let Err(e) = self.reconcile(Utc::now()).await {
            tracing::error!(error = %e, "Startup reconciliation failed");
        }

        let mut ticker = tokio::time::interval(self.tick);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;

            if let Err(e) = self.tick_once(Utc::now()).await {
                tracing::error!(error = %e, "Checkpoint run failed");
            }
        }
    }
}
