//! Migration reconciliation and execution engine.
//!
//! Units are discovered by a [`UnitSource`], merged into the ledger by the
//! [`Reconciler`], turned into an ordered [`Plan`] by the [`Planner`] and
//! run by the [`Executor`], which finally moves the [`CurrentPointer`].
//! [`Migrator`] wires these together for one command at a time.

pub mod executor;
pub mod migrator;
pub mod planner;
pub mod reconciler;
pub mod report;
pub mod scanner;
pub mod source;
pub mod tracker;
pub mod unit;

pub use executor::{EntryFailure, EntryRef, ExecuteOptions, Executor, RunOutcome, RunReport};
pub use migrator::{Listing, Migrator, Status};
pub use planner::{Plan, Planner, Target};
pub use reconciler::{ReconcileSummary, Reconciler};
pub use report::{CollectingReporter, Event, Reporter, TracingReporter};
pub use scanner::{Order, Scanner};
pub use source::{CodeSource, DirectorySource, UnitSource};
pub use tracker::CurrentPointer;
pub use unit::{Direction, FnBody, MigrationBody, MigrationUnit, SqlBody};
