use std::fmt;
use std::str::FromStr;

use chrono::{NaiveDate, NaiveDateTime, Timelike};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::{Error, Result};

/// Width of each zero-padded field of an identifier: year, month, day,
/// hour, minute, second.
const FIELD_WIDTHS: [usize; 6] = [4, 2, 2, 2, 2, 2];
const SEPARATOR: char = '_';

const IDENTIFIER_FORMAT: &str = "%Y_%m_%d_%H_%M_%S";
/// Ledger text format. Lexical order equals chronological order.
const LEDGER_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// The canonical, second-granular moment that identifies a migration unit.
///
/// Parsed from identifiers such as `2021_01_01_00_00_00` and stored in the
/// ledger as `2021-01-01 00:00:00`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp(NaiveDateTime);

impl Timestamp {
    /// Decode an identifier into a timestamp.
    ///
    /// The identifier must split into exactly six zero-padded numeric fields
    /// that together form a valid civil date and time.
    pub fn parse(identifier: &str) -> Result<Self> {
        let malformed = || Error::MalformedIdentifier(identifier.to_string());

        let parts: Vec<&str> = identifier.split(SEPARATOR).collect();
        if parts.len() != FIELD_WIDTHS.len() {
            return Err(malformed());
        }

        let mut fields = [0u32; 6];
        for (slot, (part, width)) in fields.iter_mut().zip(parts.iter().zip(FIELD_WIDTHS)) {
            if part.len() != width || !part.bytes().all(|b| b.is_ascii_digit()) {
                return Err(malformed());
            }
            *slot = part.parse().map_err(|_| malformed())?;
        }

        let [year, month, day, hour, minute, second] = fields;
        NaiveDate::from_ymd_opt(year as i32, month, day)
            .and_then(|date| date.and_hms_opt(hour, minute, second))
            .map(Self)
            .ok_or_else(malformed)
    }

    /// Encode back into identifier form. Inverse of [`Timestamp::parse`].
    pub fn format(&self) -> String {
        self.0.format(IDENTIFIER_FORMAT).to_string()
    }

    /// The text stored in the ledger's `timestamp` column.
    pub fn to_ledger_string(&self) -> String {
        self.0.format(LEDGER_FORMAT).to_string()
    }

    /// Read a value back from the ledger's `timestamp` column.
    pub fn from_ledger_str(s: &str) -> Result<Self> {
        NaiveDateTime::parse_from_str(s, LEDGER_FORMAT)
            .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S"))
            .map(Self)
            .map_err(|e| Error::Database(format!("invalid ledger timestamp {s:?}: {e}")))
    }
}

impl From<NaiveDateTime> for Timestamp {
    fn from(value: NaiveDateTime) -> Self {
        // Identifiers are second-granular.
        Self(value.with_nanosecond(0).unwrap_or(value))
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_ledger_string())
    }
}

impl FromStr for Timestamp {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl Serialize for Timestamp {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_ledger_string())
    }
}

impl<'de> Deserialize<'de> for Timestamp {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw)
            .or_else(|_| Self::from_ledger_str(&raw))
            .map_err(serde::de::Error::custom)
    }
}
