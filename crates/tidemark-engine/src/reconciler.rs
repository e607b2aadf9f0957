use std::collections::BTreeSet;

use serde::Serialize;
use tidemark_common::{Error, Result, Timestamp};
use tidemark_db::{Connection, Handle, Ledger};
use tracing::{debug, warn};

use crate::unit::MigrationUnit;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileSummary {
    /// New units recorded as inactive entries.
    pub inserted: usize,
    /// Inactive entries whose unit disappeared from storage.
    pub removed: usize,
    /// Active entries whose unit disappeared. These are kept.
    pub orphaned: usize,
}

/// Brings the ledger in line with the units present in storage.
pub struct Reconciler<'a> {
    ledger: &'a Ledger,
}

impl<'a> Reconciler<'a> {
    pub fn new(ledger: &'a Ledger) -> Self {
        Self { ledger }
    }

    /// Reconcile inside a transaction of its own. Any failure rolls the
    /// whole merge back and is reported as a reconciliation error.
    pub fn reconcile<C: Connection + ?Sized>(
        &self,
        conn: &mut C,
        units: &[MigrationUnit],
    ) -> Result<ReconcileSummary> {
        conn.begin()
            .map_err(|e| Error::Reconciliation(e.to_string()))?;

        match self.merge(conn, units) {
            Ok(summary) => {
                conn.commit()
                    .map_err(|e| Error::Reconciliation(e.to_string()))?;
                Ok(summary)
            }
            Err(e) => {
                if let Err(rb) = conn.rollback() {
                    warn!("rollback after failed reconciliation also failed: {rb}");
                }
                Err(match e {
                    Error::Reconciliation(_) => e,
                    other => Error::Reconciliation(other.to_string()),
                })
            }
        }
    }

    /// The merge itself, without transaction handling. Callers that already
    /// hold a transaction (dry runs) use this directly.
    pub fn merge<H: Handle + ?Sized>(
        &self,
        h: &mut H,
        units: &[MigrationUnit],
    ) -> Result<ReconcileSummary> {
        let mut summary = ReconcileSummary::default();

        for unit in units {
            if self.ledger.insert_if_absent(h, &unit.timestamp)? {
                summary.inserted += 1;
            }
        }

        let present: BTreeSet<Timestamp> = units.iter().map(|u| u.timestamp).collect();
        for entry in self.ledger.list_all(h)? {
            if present.contains(&entry.timestamp) {
                continue;
            }
            if entry.active {
                warn!(
                    id = entry.id,
                    timestamp = %entry.timestamp,
                    "applied migration is missing from storage"
                );
                summary.orphaned += 1;
            } else {
                self.ledger.delete_by_id(h, entry.id)?;
                summary.removed += 1;
            }
        }

        debug!(
            inserted = summary.inserted,
            removed = summary.removed,
            orphaned = summary.orphaned,
            "merge complete"
        );
        Ok(summary)
    }
}
