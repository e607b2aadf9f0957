//! Progress events emitted while reconciling and executing.

use serde::Serialize;
use tidemark_common::Timestamp;
use tracing::{info, warn};

use crate::unit::Direction;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Event {
    Reconciled {
        inserted: usize,
        removed: usize,
        orphaned: usize,
    },
    PlanReady {
        direction: Direction,
        entries: usize,
    },
    Applying {
        id: i64,
        timestamp: Timestamp,
        direction: Direction,
    },
    Applied {
        id: i64,
        timestamp: Timestamp,
        direction: Direction,
    },
    WouldApply {
        id: i64,
        timestamp: Timestamp,
        direction: Direction,
    },
    SkippedMissing {
        id: i64,
        timestamp: Timestamp,
    },
    Failed {
        id: i64,
        timestamp: Timestamp,
        direction: Direction,
        error: String,
    },
    Halted {
        remaining: usize,
    },
    CurrentSet {
        id: Option<i64>,
    },
}

/// Receives events as they happen.
pub trait Reporter {
    fn report(&mut self, event: &Event);
}

/// Forwards every event to `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingReporter;

impl Reporter for TracingReporter {
    fn report(&mut self, event: &Event) {
        match event {
            Event::Reconciled {
                inserted,
                removed,
                orphaned,
            } => info!(inserted, removed, orphaned, "ledger reconciled"),
            Event::PlanReady { direction, entries } => {
                info!(%direction, entries, "plan ready")
            }
            Event::Applying {
                id,
                timestamp,
                direction,
            } => info!(id, %timestamp, %direction, "applying migration"),
            Event::Applied {
                id,
                timestamp,
                direction,
            } => info!(id, %timestamp, %direction, "migration applied"),
            Event::WouldApply {
                id,
                timestamp,
                direction,
            } => info!(id, %timestamp, %direction, "dry run: would apply migration"),
            Event::SkippedMissing { id, timestamp } => {
                warn!(id, %timestamp, "migration unit missing from storage, skipped")
            }
            Event::Failed {
                id,
                timestamp,
                direction,
                error,
            } => warn!(id, %timestamp, %direction, error = %error, "migration failed"),
            Event::Halted { remaining } => warn!(remaining, "run halted after failure"),
            Event::CurrentSet { id: Some(id) } => info!(id, "current migration moved"),
            Event::CurrentSet { id: None } => info!("current migration cleared"),
        }
    }
}

/// Keeps every event in memory.
#[derive(Debug, Default, Clone)]
pub struct CollectingReporter {
    pub events: Vec<Event>,
}

impl CollectingReporter {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Reporter for CollectingReporter {
    fn report(&mut self, event: &Event) {
        self.events.push(event.clone());
    }
}

impl<R: Reporter + ?Sized> Reporter for &mut R {
    fn report(&mut self, event: &Event) {
        (**self).report(event);
    }
}
