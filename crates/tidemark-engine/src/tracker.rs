use tidemark_common::Result;
use tidemark_db::{Connection, Handle, Ledger, LedgerEntry};
use tracing::warn;

use crate::planner::Target;

/// Maintains the single "current" flag in the ledger.
pub struct CurrentPointer<'a> {
    ledger: &'a Ledger,
}

impl<'a> CurrentPointer<'a> {
    pub fn new(ledger: &'a Ledger) -> Self {
        Self { ledger }
    }

    /// Move the pointer to `target`, or clear it for `Target::Base`, in a
    /// transaction of its own.
    pub fn set_current<C: Connection + ?Sized>(&self, conn: &mut C, target: Target) -> Result<()> {
        conn.begin()?;
        match self.ledger.clear_current_then_set(conn, target.id()) {
            Ok(()) => conn.commit(),
            Err(e) => {
                if let Err(rb) = conn.rollback() {
                    warn!("rollback after failed pointer update also failed: {rb}");
                }
                Err(e)
            }
        }
    }

    pub fn get<H: Handle + ?Sized>(&self, h: &mut H) -> Result<Option<LedgerEntry>> {
        self.ledger.current(h)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tidemark_common::{Error, Timestamp};
    use tidemark_db::SqliteConnection;

    #[test]
    fn moves_and_clears_the_pointer() {
        let mut conn = SqliteConnection::in_memory().unwrap();
        let ledger = Ledger::new("schema_migrations");
        ledger.ensure_table(&mut conn).unwrap();
        let entry = ledger
            .insert(&mut conn, &Timestamp::parse("2021_01_01_00_00_00").unwrap())
            .unwrap();

        let pointer = CurrentPointer::new(&ledger);
        pointer.set_current(&mut conn, Target::from(&entry)).unwrap();
        assert_eq!(pointer.get(&mut conn).unwrap().unwrap().id, entry.id);

        pointer.set_current(&mut conn, Target::Base).unwrap();
        assert!(pointer.get(&mut conn).unwrap().is_none());
    }

    #[test]
    fn unknown_target_leaves_pointer_untouched() {
        let mut conn = SqliteConnection::in_memory().unwrap();
        let ledger = Ledger::new("schema_migrations");
        ledger.ensure_table(&mut conn).unwrap();
        let entry = ledger
            .insert(&mut conn, &Timestamp::parse("2021_01_01_00_00_00").unwrap())
            .unwrap();
        let pointer = CurrentPointer::new(&ledger);
        pointer.set_current(&mut conn, Target::from(&entry)).unwrap();

        let bogus = Target::Entry {
            id: 42,
            timestamp: entry.timestamp,
        };
        let err = pointer.set_current(&mut conn, bogus).unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
        assert!(!conn.in_transaction());
        assert_eq!(pointer.get(&mut conn).unwrap().unwrap().id, entry.id);
    }
}
