use std::path::{Path, PathBuf};

use tidemark_common::{Error, Result, Timestamp};
use tracing::debug;

use crate::unit::MigrationUnit;

/// Extension of file-backed migration units.
pub const UNIT_EXTENSION: &str = "sql";

/// Stems that live next to migrations but are never migration units:
/// the initial-schema bootstrap, test data and the new-unit template.
pub const RESERVED_NAMES: &[&str] = &["schema", "test_data", "template"];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Order {
    #[default]
    Ascending,
    Descending,
}

/// Enumerates migration units below a storage root.
#[derive(Debug, Clone)]
pub struct Scanner {
    root: PathBuf,
}

impl Scanner {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Walk the root recursively and return every unit sorted by timestamp.
    ///
    /// Files that are not units (wrong extension, reserved or malformed
    /// names, hidden entries) are skipped. Two files that decode to the same
    /// timestamp are rejected.
    pub fn scan(&self, order: Order) -> Result<Vec<MigrationUnit>> {
        let mut units = Vec::new();
        self.walk(&self.root, &mut units)?;

        units.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
        if let Some(pair) = units.windows(2).find(|w| w[0].timestamp == w[1].timestamp) {
            return Err(Error::InvariantViolation(format!(
                "units {} and {} share timestamp {}",
                display_path(&pair[0]),
                display_path(&pair[1]),
                pair[0].timestamp
            )));
        }

        if order == Order::Descending {
            units.reverse();
        }
        debug!(root = %self.root.display(), count = units.len(), "scanned migration units");
        Ok(units)
    }

    fn walk(&self, dir: &Path, out: &mut Vec<MigrationUnit>) -> Result<()> {
        let entries = std::fs::read_dir(dir).map_err(|e| {
            Error::StorageUnavailable(format!("cannot read {}: {e}", dir.display()))
        })?;

        for entry in entries {
            let entry = entry.map_err(|e| {
                Error::StorageUnavailable(format!("cannot read {}: {e}", dir.display()))
            })?;
            let path = entry.path();
            let hidden = entry.file_name().to_string_lossy().starts_with('.');
            if hidden {
                continue;
            }

            let file_type = entry.file_type().map_err(|e| {
                Error::StorageUnavailable(format!("cannot stat {}: {e}", path.display()))
            })?;
            if file_type.is_dir() {
                self.walk(&path, out)?;
            } else if let Some(unit) = classify(&path) {
                out.push(unit);
            }
        }
        Ok(())
    }
}

/// Turn a path into a unit, or `None` if it is not one.
pub fn classify(path: &Path) -> Option<MigrationUnit> {
    let is_unit_file = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case(UNIT_EXTENSION));
    if !is_unit_file {
        return None;
    }

    let stem = path.file_stem()?.to_str()?;
    if RESERVED_NAMES.contains(&stem) {
        return None;
    }

    match Timestamp::parse(stem) {
        Ok(timestamp) => Some(MigrationUnit {
            timestamp,
            identifier: stem.to_string(),
            path: Some(path.to_path_buf()),
        }),
        Err(e) => {
            debug!("skipping {}: {e}", path.display());
            None
        }
    }
}

fn display_path(unit: &MigrationUnit) -> String {
    unit.path
        .as_deref()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| unit.identifier.clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn touch(root: &Path, rel: &str) {
        let path = root.join(rel);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(path, "-- migrate:up\n").unwrap();
    }

    fn identifiers(units: &[MigrationUnit]) -> Vec<&str> {
        units.iter().map(|u| u.identifier.as_str()).collect()
    }

    #[test]
    fn scans_recursively_in_both_orders() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "2021_02_01_00_00_00.sql");
        touch(dir.path(), "2020/2020_06_15_12_00_00.sql");
        touch(dir.path(), "2021_01_01_00_00_00.sql");

        let scanner = Scanner::new(dir.path());
        let asc = scanner.scan(Order::Ascending).unwrap();
        assert_eq!(
            identifiers(&asc),
            ["2020_06_15_12_00_00", "2021_01_01_00_00_00", "2021_02_01_00_00_00"]
        );

        let desc = scanner.scan(Order::Descending).unwrap();
        assert_eq!(
            identifiers(&desc),
            ["2021_02_01_00_00_00", "2021_01_01_00_00_00", "2020_06_15_12_00_00"]
        );
        assert_eq!(
            asc[0].path.as_deref(),
            Some(dir.path().join("2020/2020_06_15_12_00_00.sql").as_path())
        );
    }

    #[test]
    fn excludes_reserved_malformed_and_foreign_files() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "schema.sql");
        touch(dir.path(), "test_data.sql");
        touch(dir.path(), "template.sql");
        touch(dir.path(), "2021_02_30_00_00_00.sql");
        touch(dir.path(), "2021_01_01_00_00.sql");
        touch(dir.path(), "2021_01_01_00_00_00.txt");
        touch(dir.path(), ".2021_03_01_00_00_00.sql");
        touch(dir.path(), "2021_04_01_00_00_00.SQL");

        let units = Scanner::new(dir.path()).scan(Order::Ascending).unwrap();
        assert_eq!(identifiers(&units), ["2021_04_01_00_00_00"]);
    }

    #[test]
    fn empty_root_yields_no_units() {
        let dir = tempfile::tempdir().unwrap();
        assert!(Scanner::new(dir.path()).scan(Order::Ascending).unwrap().is_empty());
    }

    #[test]
    fn missing_root_is_storage_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let err = Scanner::new(dir.path().join("nope"))
            .scan(Order::Ascending)
            .unwrap_err();
        assert!(matches!(err, Error::StorageUnavailable(_)));
    }

    #[test]
    fn duplicate_timestamps_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "2021_01_01_00_00_00.sql");
        touch(dir.path(), "nested/2021_01_01_00_00_00.sql");

        let err = Scanner::new(dir.path()).scan(Order::Ascending).unwrap_err();
        assert!(matches!(err, Error::InvariantViolation(_)));
    }
}
