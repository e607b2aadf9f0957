//! Runs a plan entry by entry, one transaction per entry.

use serde::Serialize;
use tidemark_common::{Error, Result, Timestamp};
use tidemark_db::{Connection, Ledger, LedgerEntry};
use tracing::{debug, warn};

use crate::planner::{Plan, Target};
use crate::report::{Event, Reporter};
use crate::source::UnitSource;
use crate::tracker::CurrentPointer;
use crate::unit::{Direction, MigrationBody};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ExecuteOptions {
    /// Keep going after a failed entry instead of halting.
    pub forced: bool,
    /// Report what would run without touching schema or ledger.
    pub dry_run: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    Completed,
    HaltedOnError,
    /// Dry run: nothing was executed.
    Skipped,
}

/// A ledger entry as seen in a run report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct EntryRef {
    pub id: i64,
    pub timestamp: Timestamp,
}

impl From<&LedgerEntry> for EntryRef {
    fn from(entry: &LedgerEntry) -> Self {
        Self {
            id: entry.id,
            timestamp: entry.timestamp,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntryFailure {
    pub id: i64,
    pub timestamp: Timestamp,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunReport {
    pub outcome: RunOutcome,
    pub direction: Direction,
    pub target: Option<Target>,
    /// Entries committed in this run, in plan order.
    pub applied: Vec<EntryRef>,
    /// Entries whose unit is missing from storage.
    pub skipped: Vec<EntryRef>,
    /// Entries a dry run would have executed.
    pub would_apply: Vec<EntryRef>,
    pub failures: Vec<EntryFailure>,
    /// Whether the current pointer was moved at the end of the run.
    pub current_moved: bool,
}

impl RunReport {
    fn new(plan: &Plan) -> Self {
        Self {
            outcome: RunOutcome::Completed,
            direction: plan.direction,
            target: plan.target,
            applied: Vec::new(),
            skipped: Vec::new(),
            would_apply: Vec::new(),
            failures: Vec::new(),
            current_moved: false,
        }
    }

    pub fn halted(&self) -> bool {
        self.outcome == RunOutcome::HaltedOnError
    }
}

pub struct Executor<'a> {
    ledger: &'a Ledger,
    source: &'a dyn UnitSource,
}

impl<'a> Executor<'a> {
    pub fn new(ledger: &'a Ledger, source: &'a dyn UnitSource) -> Self {
        Self { ledger, source }
    }

    /// Execute `plan` in order.
    ///
    /// Per-entry failures are rolled back and recorded in the report; they
    /// halt the run unless `options.forced` is set. Entries committed before
    /// a failure stay committed. The current pointer only moves when the run
    /// was not halted and committed at least one entry. Errors returned from
    /// this method are fatal (storage or ledger unreachable, pointer update
    /// failed).
    pub fn execute<C: Connection + ?Sized>(
        &self,
        conn: &mut C,
        plan: &Plan,
        options: ExecuteOptions,
        reporter: &mut dyn Reporter,
    ) -> Result<RunReport> {
        let mut report = RunReport::new(plan);
        let direction = plan.direction;
        reporter.report(&Event::PlanReady {
            direction,
            entries: plan.len(),
        });

        for (idx, entry) in plan.entries.iter().enumerate() {
            let body = match self.source.resolve(&entry.timestamp) {
                Ok(Some(body)) => Ok(body),
                Ok(None) => {
                    let missing = Error::MissingUnitBody(entry.timestamp.format());
                    warn!(id = entry.id, "{missing}");
                    reporter.report(&Event::SkippedMissing {
                        id: entry.id,
                        timestamp: entry.timestamp,
                    });
                    report.skipped.push(EntryRef::from(entry));
                    continue;
                }
                Err(e @ Error::MigrationBody(_)) => Err(e),
                Err(e) => return Err(e),
            };

            let outcome = body.and_then(|body| {
                if options.dry_run {
                    reporter.report(&Event::WouldApply {
                        id: entry.id,
                        timestamp: entry.timestamp,
                        direction,
                    });
                    report.would_apply.push(EntryRef::from(entry));
                    return Ok(());
                }

                reporter.report(&Event::Applying {
                    id: entry.id,
                    timestamp: entry.timestamp,
                    direction,
                });
                self.apply(conn, body.as_ref(), entry, direction)?;
                debug!(id = entry.id, "entry committed");
                reporter.report(&Event::Applied {
                    id: entry.id,
                    timestamp: entry.timestamp,
                    direction,
                });
                report.applied.push(EntryRef::from(entry));
                Ok(())
            });

            let Err(error) = outcome else {
                continue;
            };
            let message = error.to_string();
            reporter.report(&Event::Failed {
                id: entry.id,
                timestamp: entry.timestamp,
                direction,
                error: message.clone(),
            });
            report.failures.push(EntryFailure {
                id: entry.id,
                timestamp: entry.timestamp,
                error: message,
            });

            if !options.forced {
                let remaining = plan.len() - idx - 1;
                reporter.report(&Event::Halted { remaining });
                report.outcome = RunOutcome::HaltedOnError;
                break;
            }
        }

        if options.dry_run {
            report.outcome = RunOutcome::Skipped;
            return Ok(report);
        }

        // A halted run never reached its target, so the pointer stays put.
        if !report.applied.is_empty() && !report.halted() {
            if let Some(target) = plan.target {
                CurrentPointer::new(self.ledger).set_current(conn, target)?;
                reporter.report(&Event::CurrentSet { id: target.id() });
                report.current_moved = true;
            }
        }

        Ok(report)
    }

    /// Run one body and flip its `active` flag inside a single transaction.
    fn apply<C: Connection + ?Sized>(
        &self,
        conn: &mut C,
        body: &dyn MigrationBody,
        entry: &LedgerEntry,
        direction: Direction,
    ) -> Result<()> {
        conn.begin()?;
        let result = body
            .run(direction, conn.as_handle())
            .map_err(|e| {
                Error::MigrationBody(format!("{} {direction}: {e}", entry.timestamp.format()))
            })
            .and_then(|()| self.ledger.set_active(conn, entry.id, direction.activates()))
            .and_then(|()| conn.commit());

        if result.is_err() && conn.in_transaction() {
            if let Err(rb) = conn.rollback() {
                warn!(id = entry.id, "rollback failed: {rb}");
            }
        }
        result
    }
}
