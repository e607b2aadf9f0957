use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::Serialize;
use tidemark_common::{Error, Result, Timestamp};
use tidemark_db::Handle;

const UP_MARKER: &str = "migrate:up";
const DOWN_MARKER: &str = "migrate:down";

/// Which way a migration moves the schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Direction {
    #[serde(rename = "up")]
    Forward,
    #[serde(rename = "down")]
    Backward,
}

impl Direction {
    /// The `active` flag an entry carries after a successful run.
    pub fn activates(self) -> bool {
        matches!(self, Direction::Forward)
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Forward => f.pad("up"),
            Direction::Backward => f.pad("down"),
        }
    }
}

impl FromStr for Direction {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "up" | "forward" => Ok(Direction::Forward),
            "down" | "backward" => Ok(Direction::Backward),
            other => Err(Error::Other(format!(
                "direction must be either up or down, got {other:?}"
            ))),
        }
    }
}

/// A migration unit found in storage. Produced fresh on every scan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MigrationUnit {
    pub timestamp: Timestamp,
    pub identifier: String,
    /// Location of the body, for file-backed units.
    pub path: Option<PathBuf>,
}

impl MigrationUnit {
    pub fn new(identifier: impl Into<String>) -> Result<Self> {
        let identifier = identifier.into();
        let timestamp = Timestamp::parse(&identifier)?;
        Ok(Self {
            timestamp,
            identifier,
            path: None,
        })
    }
}

/// The forward and reverse operations of a single migration.
pub trait MigrationBody {
    fn forward(&self, handle: &mut dyn Handle) -> Result<()>;

    fn reverse(&self, handle: &mut dyn Handle) -> Result<()>;

    fn run(&self, direction: Direction, handle: &mut dyn Handle) -> Result<()> {
        match direction {
            Direction::Forward => self.forward(handle),
            Direction::Backward => self.reverse(handle),
        }
    }
}

/// A body read from a `.sql` unit file split by `-- migrate:up` and
/// `-- migrate:down` marker lines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqlBody {
    up: String,
    down: String,
}

#[derive(Clone, Copy, PartialEq)]
enum Section {
    Preamble,
    Up,
    Down,
}

impl SqlBody {
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            Error::StorageUnavailable(format!("failed to read {}: {e}", path.display()))
        })?;
        Self::parse(&text, &path.display().to_string())
    }

    /// Split unit text into its two sections. `origin` names the unit in
    /// error messages.
    pub fn parse(text: &str, origin: &str) -> Result<Self> {
        let mut up = String::new();
        let mut down = String::new();
        let mut section = Section::Preamble;
        let mut seen_up = false;
        let mut seen_down = false;

        for (lineno, line) in text.lines().enumerate() {
            match marker(line) {
                Some(Section::Up) => {
                    if seen_up {
                        return Err(Error::MigrationBody(format!(
                            "{origin}:{}: duplicate up marker",
                            lineno + 1
                        )));
                    }
                    seen_up = true;
                    section = Section::Up;
                }
                Some(Section::Down) => {
                    if seen_down {
                        return Err(Error::MigrationBody(format!(
                            "{origin}:{}: duplicate down marker",
                            lineno + 1
                        )));
                    }
                    seen_down = true;
                    section = Section::Down;
                }
                _ => match section {
                    Section::Preamble => {
                        let trimmed = line.trim();
                        if !trimmed.is_empty() && !trimmed.starts_with("--") {
                            return Err(Error::MigrationBody(format!(
                                "{origin}:{}: statement before the up marker",
                                lineno + 1
                            )));
                        }
                    }
                    Section::Up => {
                        up.push_str(line);
                        up.push('\n');
                    }
                    Section::Down => {
                        down.push_str(line);
                        down.push('\n');
                    }
                },
            }
        }

        if !seen_up {
            return Err(Error::MigrationBody(format!(
                "{origin}: missing `-- {UP_MARKER}` section"
            )));
        }

        Ok(Self {
            up: up.trim().to_string(),
            down: down.trim().to_string(),
        })
    }

    pub fn up_sql(&self) -> &str {
        &self.up
    }

    pub fn down_sql(&self) -> &str {
        &self.down
    }
}

fn marker(line: &str) -> Option<Section> {
    let rest = line.trim().strip_prefix("--")?.trim().to_ascii_lowercase();
    match rest.as_str() {
        UP_MARKER => Some(Section::Up),
        DOWN_MARKER => Some(Section::Down),
        _ => None,
    }
}

fn run_sql(handle: &mut dyn Handle, sql: &str) -> Result<()> {
    if sql.is_empty() {
        return Ok(());
    }
    handle.execute_batch(sql)
}

impl MigrationBody for SqlBody {
    fn forward(&self, handle: &mut dyn Handle) -> Result<()> {
        run_sql(handle, &self.up)
    }

    fn reverse(&self, handle: &mut dyn Handle) -> Result<()> {
        run_sql(handle, &self.down)
    }
}

type BodyFn = Box<dyn Fn(&mut dyn Handle) -> Result<()>>;

/// A body built from two closures, for migrations written in Rust.
pub struct FnBody {
    forward: BodyFn,
    reverse: BodyFn,
}

impl FnBody {
    pub fn new<F, R>(forward: F, reverse: R) -> Self
    where
        F: Fn(&mut dyn Handle) -> Result<()> + 'static,
        R: Fn(&mut dyn Handle) -> Result<()> + 'static,
    {
        Self {
            forward: Box::new(forward),
            reverse: Box::new(reverse),
        }
    }

    /// A body that runs one SQL batch each way.
    pub fn sql(up: &'static str, down: &'static str) -> Self {
        Self::new(
            move |h: &mut dyn Handle| h.execute_batch(up),
            move |h: &mut dyn Handle| h.execute_batch(down),
        )
    }
}

impl MigrationBody for FnBody {
    fn forward(&self, handle: &mut dyn Handle) -> Result<()> {
        (self.forward)(handle)
    }

    fn reverse(&self, handle: &mut dyn Handle) -> Result<()> {
        (self.reverse)(handle)
    }
}
