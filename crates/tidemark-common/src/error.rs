use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("malformed migration identifier: {0}")]
    MalformedIdentifier(String),

    #[error("migration storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("ledger unreachable: {0}")]
    LedgerUnreachable(String),

    #[error("connection failure: {0}")]
    ConnectionFailure(String),

    #[error("database error: {0}")]
    Database(String),

    #[error("reconciliation failed: {0}")]
    Reconciliation(String),

    #[error("missing migration unit: {0}")]
    MissingUnitBody(String),

    #[error("migration failed: {0}")]
    MigrationBody(String),

    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Whether this error must abort the current run.
    ///
    /// Malformed identifiers only exclude a unit from a scan and a missing
    /// unit body only skips a single entry; everything else is fatal.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::MalformedIdentifier(_) | Self::MissingUnitBody(_))
    }
}

#[cfg(test)]
mod tests {
    use super::Error;

    #[test]
    fn error_display_includes_context() {
        let e = Error::Config("bad toml".into());
        assert_eq!(e.to_string(), "configuration error: bad toml");

        let e = Error::MigrationBody("no such table: widgets".into());
        assert_eq!(e.to_string(), "migration failed: no such table: widgets");

        let e = Error::InvariantViolation("duplicate timestamp".into());
        assert_eq!(e.to_string(), "invariant violation: duplicate timestamp");

        let e = Error::Other("misc".into());
        assert_eq!(e.to_string(), "misc");
    }

    #[test]
    fn only_scan_and_skip_errors_are_non_fatal() {
        assert!(!Error::MalformedIdentifier("x".into()).is_fatal());
        assert!(!Error::MissingUnitBody("x".into()).is_fatal());

        assert!(Error::StorageUnavailable("x".into()).is_fatal());
        assert!(Error::LedgerUnreachable("x".into()).is_fatal());
        assert!(Error::Reconciliation("x".into()).is_fatal());
        assert!(Error::MigrationBody("x".into()).is_fatal());
        assert!(Error::InvariantViolation("x".into()).is_fatal());
    }
}
