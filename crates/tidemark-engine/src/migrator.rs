//! One entry point per command: reconcile, plan, execute.

use serde::Serialize;
use tidemark_common::{Error, Result};
use tidemark_config::{AppConfig, Driver};
use tidemark_db::{Connection, DryRunConnection, Ledger, LedgerEntry, SqliteConnection};
use tracing::{debug, info, warn};

use crate::executor::{ExecuteOptions, Executor, RunReport};
use crate::planner::{Plan, Planner, Target, plan_entries};
use crate::reconciler::{ReconcileSummary, Reconciler};
use crate::report::{Event, Reporter};
use crate::scanner::Order;
use crate::source::{DirectorySource, UnitSource};
use crate::tracker::CurrentPointer;
use crate::unit::{Direction, MigrationUnit};

pub const DEFAULT_PAGE: usize = 1;
pub const DEFAULT_PER_PAGE: usize = 30;

/// One page of the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Listing {
    pub entries: Vec<LedgerEntry>,
    pub page: usize,
    pub per_page: usize,
    pub total: usize,
    pub total_pages: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Status {
    pub current: Option<LedgerEntry>,
    /// Entries a `latest` run would apply, in order.
    pub pending: Vec<LedgerEntry>,
    pub total: usize,
}

/// What a run is asked to reach.
#[derive(Debug, Clone, Copy)]
enum Goal {
    Up(i64),
    Down(i64),
    Latest,
    Single(Direction, i64),
}

pub struct Migrator<C: Connection> {
    conn: C,
    ledger: Ledger,
    source: Box<dyn UnitSource>,
}

impl Migrator<SqliteConnection> {
    /// Open the configured database and unit directory.
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        config.validate()?;
        let conn = match config.database.driver {
            Driver::Sqlite => SqliteConnection::open(&config.database.path)?,
        };
        let source = DirectorySource::new(&config.migrations.directory);
        info!(
            driver = %config.database.driver,
            units = %source.describe(),
            table = %config.migrations.table,
            "migrator ready"
        );
        Self::new(conn, Ledger::new(&config.migrations.table), Box::new(source))
    }
}

impl<C: Connection> Migrator<C> {
    /// Wrap an open connection, creating the ledger table if needed.
    pub fn new(mut conn: C, ledger: Ledger, source: Box<dyn UnitSource>) -> Result<Self> {
        let existed = ledger.table_exists(&mut conn)?;
        ledger.ensure_table(&mut conn)?;
        if !existed {
            info!(table = %ledger.table(), "created ledger table");
        }
        Ok(Self {
            conn,
            ledger,
            source,
        })
    }

    pub fn connection(&mut self) -> &mut C {
        &mut self.conn
    }

    pub fn into_connection(self) -> C {
        self.conn
    }

    /// Every ledger entry, ordered by timestamp. Does not reconcile.
    pub fn entries(&mut self) -> Result<Vec<LedgerEntry>> {
        self.ledger.list_all(&mut self.conn)
    }

    /// Merge storage into the ledger.
    pub fn sync(&mut self, reporter: &mut dyn Reporter) -> Result<ReconcileSummary> {
        let units = self.source.units(Order::Ascending)?;
        let summary = Reconciler::new(&self.ledger).reconcile(&mut self.conn, &units)?;
        report_reconciled(reporter, summary);
        Ok(summary)
    }

    /// Apply every pending entry up to and including ledger id `to_id`.
    pub fn up(
        &mut self,
        to_id: i64,
        options: ExecuteOptions,
        reporter: &mut dyn Reporter,
    ) -> Result<RunReport> {
        self.run_goal(Goal::Up(to_id), options, reporter)
    }

    /// Revert every applied entry after ledger id `to_id`. Zero or a
    /// negative id unwinds everything and clears the current pointer.
    pub fn down(
        &mut self,
        to_id: i64,
        options: ExecuteOptions,
        reporter: &mut dyn Reporter,
    ) -> Result<RunReport> {
        self.run_goal(Goal::Down(to_id), options, reporter)
    }

    /// Apply everything up to the newest known entry.
    pub fn latest(
        &mut self,
        options: ExecuteOptions,
        reporter: &mut dyn Reporter,
    ) -> Result<RunReport> {
        self.run_goal(Goal::Latest, options, reporter)
    }

    /// Run exactly one entry in one direction. The current pointer stays put.
    pub fn run_one(
        &mut self,
        direction: Direction,
        id: i64,
        options: ExecuteOptions,
        reporter: &mut dyn Reporter,
    ) -> Result<RunReport> {
        self.run_goal(Goal::Single(direction, id), options, reporter)
    }

    /// A page of the ledger. Zero for either argument falls back to the
    /// defaults.
    pub fn list(&mut self, page: usize, per_page: usize) -> Result<Listing> {
        self.sync_quietly()?;

        let page = if page == 0 { DEFAULT_PAGE } else { page };
        let per_page = if per_page == 0 { DEFAULT_PER_PAGE } else { per_page };
        let offset = (page - 1)
            .checked_mul(per_page)
            .ok_or_else(|| Error::Other(format!("page {page} is out of range")))?;
        let total = self.ledger.count_all(&mut self.conn)?;
        let entries = self.ledger.page(&mut self.conn, offset, per_page)?;

        Ok(Listing {
            entries,
            page,
            per_page,
            total,
            total_pages: total.div_ceil(per_page),
        })
    }

    pub fn status(&mut self) -> Result<Status> {
        self.sync_quietly()?;

        let current = CurrentPointer::new(&self.ledger).get(&mut self.conn)?;
        let all = self.ledger.list_all(&mut self.conn)?;
        let total = all.len();
        let pending = match all.last() {
            Some(newest) => {
                let target = Target::from(newest);
                plan_entries(all, target, Direction::Forward).entries
            }
            None => Vec::new(),
        };

        Ok(Status {
            current,
            pending,
            total,
        })
    }

    /// The statements entry `id` would issue in `direction`, captured with
    /// the dry-run adapter. Neither the schema nor the ledger is touched.
    pub fn preview(&mut self, direction: Direction, id: i64) -> Result<Vec<String>> {
        let entry = self.find_entry(id)?;
        let body = self
            .source
            .resolve(&entry.timestamp)?
            .ok_or_else(|| Error::MissingUnitBody(entry.timestamp.format()))?;

        let mut recorder = DryRunConnection::new();
        body.run(direction, &mut recorder)?;
        Ok(recorder.take_statements())
    }

    fn run_goal(
        &mut self,
        goal: Goal,
        options: ExecuteOptions,
        reporter: &mut dyn Reporter,
    ) -> Result<RunReport> {
        let units = self.source.units(Order::Ascending)?;

        if !options.dry_run {
            let summary = Reconciler::new(&self.ledger).reconcile(&mut self.conn, &units)?;
            report_reconciled(reporter, summary);
            let plan = self.plan_for(goal)?;
            debug!(?goal, entries = plan.len(), "plan built");
            return Executor::new(&self.ledger, self.source.as_ref()).execute(
                &mut self.conn,
                &plan,
                options,
                reporter,
            );
        }

        // Dry run: merge and plan inside a transaction that is always
        // rolled back, so new units are visible but nothing persists.
        self.conn.begin()?;
        let result = self.dry_run_goal(goal, &units, options, reporter);
        if let Err(e) = self.conn.rollback() {
            warn!("rollback after dry run failed: {e}");
            if result.is_ok() {
                return Err(e);
            }
        }
        result
    }

    fn dry_run_goal(
        &mut self,
        goal: Goal,
        units: &[MigrationUnit],
        options: ExecuteOptions,
        reporter: &mut dyn Reporter,
    ) -> Result<RunReport> {
        let summary = Reconciler::new(&self.ledger)
            .merge(&mut self.conn, units)
            .map_err(|e| Error::Reconciliation(e.to_string()))?;
        report_reconciled(reporter, summary);
        let plan = self.plan_for(goal)?;
        Executor::new(&self.ledger, self.source.as_ref()).execute(
            &mut self.conn,
            &plan,
            options,
            reporter,
        )
    }

    fn plan_for(&mut self, goal: Goal) -> Result<Plan> {
        let (target, direction) = match goal {
            Goal::Single(direction, id) => return Ok(Plan::single(self.find_entry(id)?, direction)),
            Goal::Up(id) => (Target::from(&self.find_entry(id)?), Direction::Forward),
            Goal::Down(id) if id <= 0 => (Target::Base, Direction::Backward),
            Goal::Down(id) => (Target::from(&self.find_entry(id)?), Direction::Backward),
            Goal::Latest => match self.ledger.latest(&mut self.conn)? {
                Some(newest) => (Target::from(&newest), Direction::Forward),
                None => {
                    info!("no migrations exist");
                    (Target::Base, Direction::Forward)
                }
            },
        };
        Planner::new(&self.ledger).plan(&mut self.conn, target, direction)
    }

    fn find_entry(&mut self, id: i64) -> Result<LedgerEntry> {
        self.ledger
            .find_by_id(&mut self.conn, id)?
            .ok_or_else(|| Error::NotFound(format!("no migration with id {id}")))
    }

    fn sync_quietly(&mut self) -> Result<ReconcileSummary> {
        let units = self.source.units(Order::Ascending)?;
        Reconciler::new(&self.ledger).reconcile(&mut self.conn, &units)
    }
}

fn report_reconciled(reporter: &mut dyn Reporter, summary: ReconcileSummary) {
    reporter.report(&Event::Reconciled {
        inserted: summary.inserted,
        removed: summary.removed,
        orphaned: summary.orphaned,
    });
}
