pub mod adapter;
pub mod dry_run;
pub mod ledger;
pub mod sqlite;

pub use adapter::{Connection, Handle, Row, Value};
pub use dry_run::DryRunConnection;
pub use ledger::{Ledger, LedgerEntry};
pub use sqlite::SqliteConnection;
