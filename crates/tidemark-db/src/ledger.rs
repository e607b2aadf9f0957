//! The migration ledger: one row per known migration unit.
//!
//! The store never opens transactions itself. Every mutating call is
//! expected to run inside a transaction owned by the caller.

use serde::Serialize;
use tidemark_common::{Error, Result, Timestamp};
use tracing::{debug, info};

use crate::adapter::{Handle, Row, Value};

const COLUMNS: &str = "id, timestamp, active, is_current";

/// A persisted ledger row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LedgerEntry {
    pub id: i64,
    pub timestamp: Timestamp,
    pub active: bool,
    pub is_current: bool,
}

impl LedgerEntry {
    fn from_row(row: &Row) -> Result<Self> {
        Ok(Self {
            id: row.i64("id")?,
            timestamp: Timestamp::from_ledger_str(row.text("timestamp")?)?,
            active: row.bool("active")?,
            is_current: row.bool("is_current")?,
        })
    }
}

/// Table-scoped ledger operations.
#[derive(Debug, Clone)]
pub struct Ledger {
    table: String,
    quoted: String,
}

impl Ledger {
    pub fn new(table: impl Into<String>) -> Self {
        let table = table.into();
        let quoted = quote_ident(&table);
        Self { table, quoted }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// Create the ledger table and its unique timestamp index if missing.
    pub fn ensure_table<H: Handle + ?Sized>(&self, h: &mut H) -> Result<()> {
        let index = quote_ident(&format!("{}_timestamp_idx", self.table));
        let ddl = format!(
            "CREATE TABLE IF NOT EXISTS {t} (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp TEXT NOT NULL,
                active INTEGER NOT NULL DEFAULT 0,
                is_current INTEGER NOT NULL DEFAULT 0
            );
            CREATE UNIQUE INDEX IF NOT EXISTS {index} ON {t} (timestamp);",
            t = self.quoted
        );
        h.execute_batch(&ddl).map_err(|e| {
            Error::LedgerUnreachable(format!("failed to create ledger table {}: {e}", self.table))
        })?;
        debug!(table = %self.table, "ledger table ready");
        Ok(())
    }

    pub fn table_exists<H: Handle + ?Sized>(&self, h: &mut H) -> Result<bool> {
        let row = h
            .query_row(
                "SELECT COUNT(*) AS n FROM sqlite_master WHERE type = 'table' AND name = ?1",
                &[Value::from(self.table.as_str())],
            )
            .map_err(|e| Error::LedgerUnreachable(e.to_string()))?;
        Ok(match row {
            Some(row) => row.i64("n")? > 0,
            None => false,
        })
    }

    /// All entries ordered by timestamp.
    pub fn list_all<H: Handle + ?Sized>(&self, h: &mut H) -> Result<Vec<LedgerEntry>> {
        let sql = format!("SELECT {COLUMNS} FROM {} ORDER BY timestamp ASC", self.quoted);
        self.select(h, &sql, &[])
    }

    /// One page of entries ordered by timestamp.
    pub fn page<H: Handle + ?Sized>(
        &self,
        h: &mut H,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<LedgerEntry>> {
        let sql = format!(
            "SELECT {COLUMNS} FROM {} ORDER BY timestamp ASC LIMIT ?1 OFFSET ?2",
            self.quoted
        );
        let bind = |n: usize, what: &str| {
            i64::try_from(n)
                .map(Value::Integer)
                .map_err(|_| Error::Other(format!("page {what} {n} is out of range")))
        };
        self.select(h, &sql, &[bind(limit, "limit")?, bind(offset, "offset")?])
    }

    pub fn count_all<H: Handle + ?Sized>(&self, h: &mut H) -> Result<usize> {
        let sql = format!("SELECT COUNT(*) AS n FROM {}", self.quoted);
        let row = h
            .query_row(&sql, &[])?
            .ok_or_else(|| Error::Database("count query returned no rows".into()))?;
        Ok(row.i64("n")? as usize)
    }

    pub fn find_by_id<H: Handle + ?Sized>(&self, h: &mut H, id: i64) -> Result<Option<LedgerEntry>> {
        let sql = format!("SELECT {COLUMNS} FROM {} WHERE id = ?1", self.quoted);
        Ok(self.select(h, &sql, &[Value::Integer(id)])?.into_iter().next())
    }

    pub fn find_by_timestamp<H: Handle + ?Sized>(
        &self,
        h: &mut H,
        ts: &Timestamp,
    ) -> Result<Option<LedgerEntry>> {
        let sql = format!("SELECT {COLUMNS} FROM {} WHERE timestamp = ?1", self.quoted);
        Ok(self
            .select(h, &sql, &[Value::Text(ts.to_ledger_string())])?
            .into_iter()
            .next())
    }

    /// The entry flagged as current, if any.
    pub fn current<H: Handle + ?Sized>(&self, h: &mut H) -> Result<Option<LedgerEntry>> {
        let sql = format!(
            "SELECT {COLUMNS} FROM {} WHERE is_current <> 0 ORDER BY timestamp DESC",
            self.quoted
        );
        let mut current = self.select(h, &sql, &[])?;
        if current.len() > 1 {
            return Err(Error::InvariantViolation(format!(
                "{} ledger entries are flagged current",
                current.len()
            )));
        }
        Ok(current.pop())
    }

    /// The entry with the greatest timestamp, if any.
    pub fn latest<H: Handle + ?Sized>(&self, h: &mut H) -> Result<Option<LedgerEntry>> {
        let sql = format!(
            "SELECT {COLUMNS} FROM {} ORDER BY timestamp DESC LIMIT 1",
            self.quoted
        );
        Ok(self.select(h, &sql, &[])?.into_iter().next())
    }

    /// Insert a new inactive entry unless the timestamp is already known.
    /// Returns whether a row was inserted.
    pub fn insert_if_absent<H: Handle + ?Sized>(&self, h: &mut H, ts: &Timestamp) -> Result<bool> {
        let sql = format!(
            "INSERT INTO {t} (timestamp, active, is_current)
             SELECT ?1, 0, 0
             WHERE NOT EXISTS (SELECT 1 FROM {t} WHERE timestamp = ?1)",
            t = self.quoted
        );
        let inserted = h.execute(&sql, &[Value::Text(ts.to_ledger_string())])? > 0;
        if inserted {
            debug!(timestamp = %ts, "ledger entry added");
        }
        Ok(inserted)
    }

    /// Insert a new inactive entry, failing if the timestamp is already known.
    pub fn insert<H: Handle + ?Sized>(&self, h: &mut H, ts: &Timestamp) -> Result<LedgerEntry> {
        if let Some(existing) = self.find_by_timestamp(h, ts)? {
            return Err(Error::InvariantViolation(format!(
                "timestamp {ts} is already recorded as ledger entry {}",
                existing.id
            )));
        }
        let sql = format!(
            "INSERT INTO {} (timestamp, active, is_current) VALUES (?1, 0, 0)",
            self.quoted
        );
        h.execute(&sql, &[Value::Text(ts.to_ledger_string())])?;
        self.find_by_timestamp(h, ts)?
            .ok_or_else(|| Error::Database(format!("inserted entry {ts} could not be read back")))
    }

    pub fn delete_by_id<H: Handle + ?Sized>(&self, h: &mut H, id: i64) -> Result<()> {
        let sql = format!("DELETE FROM {} WHERE id = ?1", self.quoted);
        h.execute(&sql, &[Value::Integer(id)])?;
        debug!(id, "ledger entry removed");
        Ok(())
    }

    pub fn set_active<H: Handle + ?Sized>(&self, h: &mut H, id: i64, active: bool) -> Result<()> {
        let sql = format!("UPDATE {} SET active = ?1 WHERE id = ?2", self.quoted);
        let affected = h.execute(&sql, &[Value::from(active), Value::Integer(id)])?;
        if affected == 0 {
            return Err(Error::NotFound(format!("ledger entry {id}")));
        }
        Ok(())
    }

    /// Unset any existing current flag, then set it on `id`. `None` leaves
    /// no entry current.
    pub fn clear_current_then_set<H: Handle + ?Sized>(
        &self,
        h: &mut H,
        id: Option<i64>,
    ) -> Result<()> {
        let clear = format!("UPDATE {} SET is_current = 0 WHERE is_current <> 0", self.quoted);
        h.execute(&clear, &[])?;

        if let Some(id) = id {
            let set = format!("UPDATE {} SET is_current = 1 WHERE id = ?1", self.quoted);
            if h.execute(&set, &[Value::Integer(id)])? == 0 {
                return Err(Error::NotFound(format!("ledger entry {id}")));
            }
            info!(id, "current migration set");
        } else {
            info!("current migration cleared");
        }
        Ok(())
    }

    fn select<H: Handle + ?Sized>(
        &self,
        h: &mut H,
        sql: &str,
        params: &[Value],
    ) -> Result<Vec<LedgerEntry>> {
        h.query(sql, params)?
            .iter()
            .map(LedgerEntry::from_row)
            .collect()
    }
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SqliteConnection;

    fn ts(s: &str) -> Timestamp {
        Timestamp::parse(s).unwrap()
    }

    fn setup() -> (SqliteConnection, Ledger) {
        let mut conn = SqliteConnection::in_memory().unwrap();
        let ledger = Ledger::new("schema_migrations");
        ledger.ensure_table(&mut conn).unwrap();
        (conn, ledger)
    }

    #[test]
    fn ensure_table_is_idempotent() {
        let (mut conn, ledger) = setup();
        ledger.ensure_table(&mut conn).unwrap();
        assert!(ledger.table_exists(&mut conn).unwrap());
        assert!(!Ledger::new("other").table_exists(&mut conn).unwrap());
    }

    #[test]
    fn page_rejects_bounds_sqlite_cannot_bind() {
        let (mut conn, ledger) = setup();
        ledger.insert(&mut conn, &ts("2021_01_01_00_00_00")).unwrap();

        let err = ledger.page(&mut conn, usize::MAX, 10).unwrap_err();
        assert!(err.to_string().contains("offset"));
        let err = ledger.page(&mut conn, 0, usize::MAX).unwrap_err();
        assert!(err.to_string().contains("limit"));
        assert_eq!(ledger.page(&mut conn, 0, 10).unwrap().len(), 1);
    }

    #[test]
    fn insert_if_absent_ignores_known_timestamps() {
        let (mut conn, ledger) = setup();
        assert!(ledger.insert_if_absent(&mut conn, &ts("2021_01_01_00_00_00")).unwrap());
        assert!(!ledger.insert_if_absent(&mut conn, &ts("2021_01_01_00_00_00")).unwrap());
        assert_eq!(ledger.count_all(&mut conn).unwrap(), 1);

        let entry = ledger
            .find_by_timestamp(&mut conn, &ts("2021_01_01_00_00_00"))
            .unwrap()
            .unwrap();
        assert!(!entry.active);
        assert!(!entry.is_current);
    }

    #[test]
    fn strict_insert_rejects_duplicate_timestamp() {
        let (mut conn, ledger) = setup();
        let first = ledger.insert(&mut conn, &ts("2021_01_01_00_00_00")).unwrap();
        assert_eq!(first.id, 1);

        let err = ledger.insert(&mut conn, &ts("2021_01_01_00_00_00")).unwrap_err();
        assert!(matches!(err, Error::InvariantViolation(_)));
    }

    #[test]
    fn ids_increase_and_are_not_reused() {
        let (mut conn, ledger) = setup();
        let a = ledger.insert(&mut conn, &ts("2021_01_01_00_00_00")).unwrap();
        let b = ledger.insert(&mut conn, &ts("2021_02_01_00_00_00")).unwrap();
        ledger.delete_by_id(&mut conn, b.id).unwrap();
        let c = ledger.insert(&mut conn, &ts("2021_03_01_00_00_00")).unwrap();
        assert!(a.id < b.id && b.id < c.id);
    }

    #[test]
    fn list_and_page_are_ordered_by_timestamp() {
        let (mut conn, ledger) = setup();
        for s in ["2021_03_01_00_00_00", "2021_01_01_00_00_00", "2021_02_01_00_00_00"] {
            ledger.insert(&mut conn, &ts(s)).unwrap();
        }

        let all = ledger.list_all(&mut conn).unwrap();
        let stamps: Vec<String> = all.iter().map(|e| e.timestamp.format()).collect();
        assert_eq!(
            stamps,
            ["2021_01_01_00_00_00", "2021_02_01_00_00_00", "2021_03_01_00_00_00"]
        );
        // Ids follow insertion, not timestamp order.
        assert_eq!(all[0].id, 2);

        let page = ledger.page(&mut conn, 1, 1).unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].timestamp, ts("2021_02_01_00_00_00"));

        let latest = ledger.latest(&mut conn).unwrap().unwrap();
        assert_eq!(latest.timestamp, ts("2021_03_01_00_00_00"));
    }

    #[test]
    fn set_active_flips_flag_and_rejects_unknown_id() {
        let (mut conn, ledger) = setup();
        let entry = ledger.insert(&mut conn, &ts("2021_01_01_00_00_00")).unwrap();

        ledger.set_active(&mut conn, entry.id, true).unwrap();
        assert!(ledger.find_by_id(&mut conn, entry.id).unwrap().unwrap().active);

        ledger.set_active(&mut conn, entry.id, false).unwrap();
        assert!(!ledger.find_by_id(&mut conn, entry.id).unwrap().unwrap().active);

        assert!(matches!(
            ledger.set_active(&mut conn, 99, true),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn current_pointer_moves_and_clears() {
        let (mut conn, ledger) = setup();
        let a = ledger.insert(&mut conn, &ts("2021_01_01_00_00_00")).unwrap();
        let b = ledger.insert(&mut conn, &ts("2021_02_01_00_00_00")).unwrap();
        assert!(ledger.current(&mut conn).unwrap().is_none());

        ledger.clear_current_then_set(&mut conn, Some(a.id)).unwrap();
        assert_eq!(ledger.current(&mut conn).unwrap().unwrap().id, a.id);

        ledger.clear_current_then_set(&mut conn, Some(b.id)).unwrap();
        let flagged: Vec<i64> = ledger
            .list_all(&mut conn)
            .unwrap()
            .into_iter()
            .filter(|e| e.is_current)
            .map(|e| e.id)
            .collect();
        assert_eq!(flagged, vec![b.id]);

        ledger.clear_current_then_set(&mut conn, None).unwrap();
        assert!(ledger.current(&mut conn).unwrap().is_none());
    }

    #[test]
    fn current_reports_multiple_flags_as_invariant_violation() {
        let (mut conn, ledger) = setup();
        ledger.insert(&mut conn, &ts("2021_01_01_00_00_00")).unwrap();
        ledger.insert(&mut conn, &ts("2021_02_01_00_00_00")).unwrap();
        conn.execute_batch("UPDATE schema_migrations SET is_current = 1").unwrap();

        assert!(matches!(
            ledger.current(&mut conn),
            Err(Error::InvariantViolation(_))
        ));
    }

    #[test]
    fn quotes_table_names() {
        assert_eq!(quote_ident("ledger"), "\"ledger\"");
        assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
    }
}
