use tidemark_common::Result;
use tracing::debug;

use crate::adapter::{Connection, Handle, Row, Value};

/// Adapter that accepts every call as a successful no-op and records the
/// statements it was given.
///
/// Queries return no rows, so bodies that branch on query results only see
/// their "empty database" path.
#[derive(Debug, Default)]
pub struct DryRunConnection {
    statements: Vec<String>,
    in_transaction: bool,
}

impl DryRunConnection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Statements received so far, in order.
    pub fn statements(&self) -> &[String] {
        &self.statements
    }

    pub fn take_statements(&mut self) -> Vec<String> {
        std::mem::take(&mut self.statements)
    }

    fn record(&mut self, sql: &str, params: &[Value]) {
        let sql = sql.trim();
        if sql.is_empty() {
            return;
        }
        debug!(sql, "dry run");
        if params.is_empty() {
            self.statements.push(sql.to_string());
        } else {
            self.statements.push(format!("{sql} -- params: {params:?}"));
        }
    }
}

impl Handle for DryRunConnection {
    fn execute(&mut self, sql: &str, params: &[Value]) -> Result<usize> {
        self.record(sql, params);
        Ok(0)
    }

    fn execute_batch(&mut self, sql: &str) -> Result<()> {
        self.record(sql, &[]);
        Ok(())
    }

    fn query(&mut self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        self.record(sql, params);
        Ok(Vec::new())
    }

    fn is_dry_run(&self) -> bool {
        true
    }
}

impl Connection for DryRunConnection {
    fn begin(&mut self) -> Result<()> {
        self.in_transaction = true;
        Ok(())
    }

    fn commit(&mut self) -> Result<()> {
        self.in_transaction = false;
        Ok(())
    }

    fn rollback(&mut self) -> Result<()> {
        self.in_transaction = false;
        Ok(())
    }

    fn in_transaction(&self) -> bool {
        self.in_transaction
    }

    fn as_handle(&mut self) -> &mut dyn Handle {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_statements_and_succeeds() {
        let mut conn = DryRunConnection::new();
        assert!(conn.is_dry_run());

        conn.begin().unwrap();
        assert_eq!(conn.execute("DROP TABLE everything", &[]).unwrap(), 0);
        conn.execute_batch("  CREATE TABLE t (x INTEGER);  ").unwrap();
        assert!(conn.query("SELECT * FROM t", &[]).unwrap().is_empty());
        conn.commit().unwrap();
        assert!(!conn.in_transaction());

        assert_eq!(
            conn.statements(),
            &[
                "DROP TABLE everything".to_string(),
                "CREATE TABLE t (x INTEGER);".to_string(),
                "SELECT * FROM t".to_string(),
            ]
        );
    }

    #[test]
    fn records_params_and_skips_blank_statements() {
        let mut conn = DryRunConnection::new();
        conn.execute("   ", &[]).unwrap();
        conn.execute("DELETE FROM t WHERE id = ?1", &[Value::Integer(4)])
            .unwrap();

        let statements = conn.take_statements();
        assert_eq!(statements.len(), 1);
        assert!(statements[0].contains("params: [Integer(4)]"));
        assert!(conn.statements().is_empty());
    }
}
