use serde::Serialize;
use tidemark_common::{Result, Timestamp};
use tidemark_db::{Handle, Ledger, LedgerEntry};

use crate::unit::Direction;

/// Where a run should leave the schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Target {
    /// Before every migration.
    Base,
    Entry { id: i64, timestamp: Timestamp },
}

impl Target {
    pub fn id(&self) -> Option<i64> {
        match self {
            Target::Base => None,
            Target::Entry { id, .. } => Some(*id),
        }
    }

    pub fn timestamp(&self) -> Option<Timestamp> {
        match self {
            Target::Base => None,
            Target::Entry { timestamp, .. } => Some(*timestamp),
        }
    }
}

impl From<&LedgerEntry> for Target {
    fn from(entry: &LedgerEntry) -> Self {
        Target::Entry {
            id: entry.id,
            timestamp: entry.timestamp,
        }
    }
}

/// An ordered list of entries to run in one direction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Plan {
    pub direction: Direction,
    /// `None` for single-entry runs, which never move the current pointer.
    pub target: Option<Target>,
    pub entries: Vec<LedgerEntry>,
}

impl Plan {
    pub fn single(entry: LedgerEntry, direction: Direction) -> Self {
        Self {
            direction,
            target: None,
            entries: vec![entry],
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

pub struct Planner<'a> {
    ledger: &'a Ledger,
}

impl<'a> Planner<'a> {
    pub fn new(ledger: &'a Ledger) -> Self {
        Self { ledger }
    }

    pub fn plan<H: Handle + ?Sized>(
        &self,
        h: &mut H,
        target: Target,
        direction: Direction,
    ) -> Result<Plan> {
        let entries = self.ledger.list_all(h)?;
        Ok(plan_entries(entries, target, direction))
    }
}

/// Select and order the entries a run needs from a full ledger listing.
///
/// Forward runs take every inactive entry at or before the target, oldest
/// first. Backward runs take every active entry after the target, newest
/// first. Going forward to `Base` selects nothing.
pub fn plan_entries(entries: Vec<LedgerEntry>, target: Target, direction: Direction) -> Plan {
    let mut selected: Vec<LedgerEntry> = entries
        .into_iter()
        .filter(|e| match (direction, target.timestamp()) {
            (Direction::Forward, None) => false,
            (Direction::Forward, Some(limit)) => !e.active && e.timestamp <= limit,
            (Direction::Backward, None) => e.active,
            (Direction::Backward, Some(limit)) => e.active && e.timestamp > limit,
        })
        .collect();

    selected.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
    if direction == Direction::Backward {
        selected.reverse();
    }

    Plan {
        direction,
        target: Some(target),
        entries: selected,
    }
}
