use std::path::Path;

use rusqlite::types::{ToSql, ToSqlOutput, ValueRef};
use rusqlite::params_from_iter;
use tidemark_common::{Error, Result};
use tracing::{debug, info};

use crate::adapter::{Connection, Handle, Row, Value};

/// SQLite adapter over `rusqlite`.
///
/// Transactions are driven with explicit `BEGIN`/`COMMIT`/`ROLLBACK` so that
/// the same connection can be lent to migration bodies mid-transaction.
pub struct SqliteConnection {
    conn: rusqlite::Connection,
}

impl SqliteConnection {
    pub fn open(db_path: &Path) -> Result<Self> {
        if db_path == Path::new(":memory:") {
            return Self::in_memory();
        }
        info!("opening sqlite database at {}", db_path.display());
        let conn = rusqlite::Connection::open(db_path).map_err(|e| {
            Error::ConnectionFailure(format!(
                "failed to open database {}: {e}",
                db_path.display()
            ))
        })?;
        Self::configure(conn)
    }

    pub fn in_memory() -> Result<Self> {
        let conn = rusqlite::Connection::open_in_memory().map_err(|e| {
            Error::ConnectionFailure(format!("failed to open in-memory database: {e}"))
        })?;
        Self::configure(conn)
    }

    fn configure(conn: rusqlite::Connection) -> Result<Self> {
        conn.execute_batch("PRAGMA foreign_keys=ON;")
            .map_err(|e| Error::ConnectionFailure(format!("failed to set pragmas: {e}")))?;
        Ok(Self { conn })
    }
}

impl ToSql for Value {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            Value::Null => ToSqlOutput::Borrowed(ValueRef::Null),
            Value::Integer(i) => ToSqlOutput::Borrowed(ValueRef::Integer(*i)),
            Value::Real(f) => ToSqlOutput::Borrowed(ValueRef::Real(*f)),
            Value::Text(s) => ToSqlOutput::Borrowed(ValueRef::Text(s.as_bytes())),
            Value::Blob(b) => ToSqlOutput::Borrowed(ValueRef::Blob(b)),
        })
    }
}

fn value_from_ref(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::Integer(i),
        ValueRef::Real(f) => Value::Real(f),
        ValueRef::Text(t) => Value::Text(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => Value::Blob(b.to_vec()),
    }
}

impl Handle for SqliteConnection {
    fn execute(&mut self, sql: &str, params: &[Value]) -> Result<usize> {
        debug!(sql, "execute");
        self.conn
            .execute(sql, params_from_iter(params.iter()))
            .map_err(|e| Error::Database(format!("statement failed: {e}")))
    }

    fn execute_batch(&mut self, sql: &str) -> Result<()> {
        debug!(sql, "execute batch");
        self.conn
            .execute_batch(sql)
            .map_err(|e| Error::Database(format!("batch failed: {e}")))
    }

    fn query(&mut self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        debug!(sql, "query");
        let mut stmt = self
            .conn
            .prepare(sql)
            .map_err(|e| Error::Database(format!("failed to prepare query: {e}")))?;

        let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
        let width = columns.len();

        let rows = stmt
            .query_map(params_from_iter(params.iter()), |row| {
                (0..width)
                    .map(|idx| row.get_ref(idx).map(value_from_ref))
                    .collect::<rusqlite::Result<Vec<_>>>()
            })
            .map_err(|e| Error::Database(format!("failed to run query: {e}")))?;

        let mut out = Vec::new();
        for row in rows {
            let values = row.map_err(|e| Error::Database(format!("failed to read row: {e}")))?;
            out.push(Row::new(columns.clone(), values));
        }
        Ok(out)
    }
}

impl Connection for SqliteConnection {
    fn begin(&mut self) -> Result<()> {
        self.conn
            .execute_batch("BEGIN")
            .map_err(|e| Error::Database(format!("failed to begin transaction: {e}")))
    }

    fn commit(&mut self) -> Result<()> {
        self.conn
            .execute_batch("COMMIT")
            .map_err(|e| Error::Database(format!("failed to commit transaction: {e}")))
    }

    fn rollback(&mut self) -> Result<()> {
        self.conn
            .execute_batch("ROLLBACK")
            .map_err(|e| Error::Database(format!("failed to roll back transaction: {e}")))
    }

    fn in_transaction(&self) -> bool {
        !self.conn.is_autocommit()
    }

    fn as_handle(&mut self) -> &mut dyn Handle {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conn() -> SqliteConnection {
        let mut conn = SqliteConnection::in_memory().unwrap();
        conn.execute_batch("CREATE TABLE items (id INTEGER PRIMARY KEY, name TEXT, score REAL);")
            .unwrap();
        conn
    }

    #[test]
    fn execute_and_query_round_trip_values() {
        let mut conn = conn();
        let affected = conn
            .execute(
                "INSERT INTO items (name, score) VALUES (?1, ?2)",
                &[Value::from("widget"), Value::Real(1.5)],
            )
            .unwrap();
        assert_eq!(affected, 1);

        let rows = conn
            .query("SELECT id, name, score FROM items WHERE name = ?1", &[Value::from("widget")])
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].i64("id").unwrap(), 1);
        assert_eq!(rows[0].text("name").unwrap(), "widget");
        assert_eq!(rows[0].get("score"), Some(&Value::Real(1.5)));
    }

    #[test]
    fn rollback_discards_changes() {
        let mut conn = conn();
        conn.begin().unwrap();
        assert!(conn.in_transaction());
        conn.execute("INSERT INTO items (name) VALUES ('gone')", &[]).unwrap();
        conn.rollback().unwrap();
        assert!(!conn.in_transaction());

        let rows = conn.query("SELECT COUNT(*) AS n FROM items", &[]).unwrap();
        assert_eq!(rows[0].i64("n").unwrap(), 0);
    }

    #[test]
    fn commit_persists_changes() {
        let mut conn = conn();
        conn.begin().unwrap();
        conn.execute("INSERT INTO items (name) VALUES ('kept')", &[]).unwrap();
        conn.commit().unwrap();

        let row = conn.query_row("SELECT name FROM items", &[]).unwrap().unwrap();
        assert_eq!(row.text("name").unwrap(), "kept");
    }

    #[test]
    fn nested_begin_is_an_error() {
        let mut conn = conn();
        conn.begin().unwrap();
        assert!(conn.begin().is_err());
        conn.rollback().unwrap();
    }

    #[test]
    fn statement_errors_surface_as_database_errors() {
        let mut conn = conn();
        let err = conn.execute("INSERT INTO missing VALUES (1)", &[]).unwrap_err();
        assert!(matches!(err, Error::Database(_)));
    }

    #[test]
    fn opens_file_backed_database() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.db");
        {
            let mut conn = SqliteConnection::open(&path).unwrap();
            conn.execute_batch("CREATE TABLE t (x INTEGER); INSERT INTO t VALUES (3);")
                .unwrap();
        }
        let mut conn = SqliteConnection::open(&path).unwrap();
        let row = conn.query_row("SELECT x FROM t", &[]).unwrap().unwrap();
        assert_eq!(row.i64("x").unwrap(), 3);
    }

    #[test]
    fn unreachable_path_is_a_connection_failure() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing-dir").join("ledger.db");
        let err = SqliteConnection::open(&path).err().unwrap();
        assert!(matches!(err, Error::ConnectionFailure(_)));
    }
}
