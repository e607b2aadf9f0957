//! Where migration units and their bodies come from.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tidemark_common::{Error, Result, Timestamp};

use crate::scanner::{Order, Scanner, UNIT_EXTENSION};
use crate::unit::{MigrationBody, MigrationUnit, SqlBody};

/// A provider of migration units and the bodies behind them.
pub trait UnitSource {
    /// Every unit currently present, sorted by timestamp.
    fn units(&self, order: Order) -> Result<Vec<MigrationUnit>>;

    /// Load the body for `timestamp`. `Ok(None)` means no unit exists for it.
    fn resolve(&self, timestamp: &Timestamp) -> Result<Option<Arc<dyn MigrationBody>>>;

    /// Human-readable location, used in log lines.
    fn describe(&self) -> String;
}

/// Units stored as `.sql` files below a directory.
#[derive(Debug, Clone)]
pub struct DirectorySource {
    scanner: Scanner,
}

impl DirectorySource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            scanner: Scanner::new(root),
        }
    }

    pub fn root(&self) -> &Path {
        self.scanner.root()
    }
}

impl UnitSource for DirectorySource {
    fn units(&self, order: Order) -> Result<Vec<MigrationUnit>> {
        self.scanner.scan(order)
    }

    fn resolve(&self, timestamp: &Timestamp) -> Result<Option<Arc<dyn MigrationBody>>> {
        let flat = self
            .root()
            .join(format!("{}.{UNIT_EXTENSION}", timestamp.format()));
        let path = if flat.is_file() {
            Some(flat)
        } else {
            // Units may live in nested directories.
            self.scanner
                .scan(Order::Ascending)?
                .into_iter()
                .find(|u| u.timestamp == *timestamp)
                .and_then(|u| u.path)
        };

        match path {
            Some(path) => Ok(Some(Arc::new(SqlBody::from_file(&path)?))),
            None => Ok(None),
        }
    }

    fn describe(&self) -> String {
        self.root().display().to_string()
    }
}

/// Units registered in code, keyed by their timestamp.
#[derive(Default, Clone)]
pub struct CodeSource {
    units: BTreeMap<Timestamp, (String, Arc<dyn MigrationBody>)>,
}

impl CodeSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a body under `identifier`, which must be a valid timestamp
    /// identifier not already registered.
    pub fn register(
        &mut self,
        identifier: &str,
        body: impl MigrationBody + 'static,
    ) -> Result<&mut Self> {
        let timestamp = Timestamp::parse(identifier)?;
        if self.units.contains_key(&timestamp) {
            return Err(Error::InvariantViolation(format!(
                "a unit with timestamp {timestamp} is already registered"
            )));
        }
        self.units
            .insert(timestamp, (identifier.to_string(), Arc::new(body)));
        Ok(self)
    }

    /// Remove a unit, as if its file had been deleted from storage.
    pub fn unregister(&mut self, identifier: &str) -> Result<bool> {
        let timestamp = Timestamp::parse(identifier)?;
        Ok(self.units.remove(&timestamp).is_some())
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }
}

impl UnitSource for CodeSource {
    fn units(&self, order: Order) -> Result<Vec<MigrationUnit>> {
        let mut units: Vec<MigrationUnit> = self
            .units
            .iter()
            .map(|(timestamp, (identifier, _))| MigrationUnit {
                timestamp: *timestamp,
                identifier: identifier.clone(),
                path: None,
            })
            .collect();
        if order == Order::Descending {
            units.reverse();
        }
        Ok(units)
    }

    fn resolve(&self, timestamp: &Timestamp) -> Result<Option<Arc<dyn MigrationBody>>> {
        Ok(self.units.get(timestamp).map(|(_, body)| Arc::clone(body)))
    }

    fn describe(&self) -> String {
        format!("{} registered unit(s)", self.units.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::unit::FnBody;
    use tidemark_db::DryRunConnection;

    fn ts(s: &str) -> Timestamp {
        Timestamp::parse(s).unwrap()
    }

    #[test]
    fn directory_source_resolves_flat_and_nested_units() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("2021_01_01_00_00_00.sql"),
            "-- migrate:up\nCREATE TABLE a (x INTEGER);\n-- migrate:down\nDROP TABLE a;\n",
        )
        .unwrap();
        std::fs::create_dir(dir.path().join("2021")).unwrap();
        std::fs::write(
            dir.path().join("2021/2021_02_01_00_00_00.sql"),
            "-- migrate:up\nCREATE TABLE b (x INTEGER);\n",
        )
        .unwrap();

        let source = DirectorySource::new(dir.path());
        assert_eq!(source.units(Order::Ascending).unwrap().len(), 2);

        let mut conn = DryRunConnection::new();
        let flat = source.resolve(&ts("2021_01_01_00_00_00")).unwrap().unwrap();
        flat.forward(&mut conn).unwrap();
        let nested = source.resolve(&ts("2021_02_01_00_00_00")).unwrap().unwrap();
        nested.forward(&mut conn).unwrap();
        assert_eq!(
            conn.statements(),
            &[
                "CREATE TABLE a (x INTEGER);".to_string(),
                "CREATE TABLE b (x INTEGER);".to_string(),
            ]
        );

        assert!(source.resolve(&ts("2022_01_01_00_00_00")).unwrap().is_none());
    }

    #[test]
    fn directory_source_reports_unparseable_bodies() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("2021_01_01_00_00_00.sql"), "DROP TABLE a;\n").unwrap();

        let source = DirectorySource::new(dir.path());
        let err = source.resolve(&ts("2021_01_01_00_00_00")).err().unwrap();
        assert!(matches!(err, Error::MigrationBody(_)));
    }

    #[test]
    fn code_source_registers_in_timestamp_order() {
        let mut source = CodeSource::new();
        source
            .register("2021_03_01_00_00_00", FnBody::sql("SELECT 3;", ""))
            .unwrap()
            .register("2021_01_01_00_00_00", FnBody::sql("SELECT 1;", ""))
            .unwrap();

        let units = source.units(Order::Ascending).unwrap();
        assert_eq!(units[0].identifier, "2021_01_01_00_00_00");
        assert_eq!(units[1].identifier, "2021_03_01_00_00_00");
        assert_eq!(
            source.units(Order::Descending).unwrap()[0].identifier,
            "2021_03_01_00_00_00"
        );
    }

    #[test]
    fn code_source_rejects_bad_and_duplicate_identifiers() {
        let mut source = CodeSource::new();
        assert!(matches!(
            source.register("schema", FnBody::sql("", "")).err().unwrap(),
            Error::MalformedIdentifier(_)
        ));

        source
            .register("2021_01_01_00_00_00", FnBody::sql("", ""))
            .unwrap();
        assert!(matches!(
            source
                .register("2021_01_01_00_00_00", FnBody::sql("", ""))
                .err()
                .unwrap(),
            Error::InvariantViolation(_)
        ));

        assert!(source.unregister("2021_01_01_00_00_00").unwrap());
        assert!(source.is_empty());
        assert!(source.resolve(&ts("2021_01_01_00_00_00")).unwrap().is_none());
    }
}
