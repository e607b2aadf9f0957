use anyhow::{Context, Result};
use serde::Serialize;
use tidemark_db::LedgerEntry;
use tidemark_engine::{Event, Listing, Reporter, RunOutcome, RunReport, Status, Target};

/// Prints progress lines to stdout as events arrive.
#[derive(Debug, Default)]
pub struct ConsoleReporter;

impl ConsoleReporter {
    pub fn new() -> Self {
        Self
    }
}

impl Reporter for ConsoleReporter {
    fn report(&mut self, event: &Event) {
        match event {
            Event::Reconciled {
                inserted,
                removed,
                orphaned,
            } => {
                if *inserted > 0 || *removed > 0 {
                    println!("ledger: {inserted} added, {removed} removed");
                }
                if *orphaned > 0 {
                    println!("warning: {orphaned} applied migration(s) missing from storage");
                }
            }
            Event::PlanReady { .. } => {}
            Event::Applying {
                id,
                timestamp,
                direction,
            } => println!("{direction:>4} #{id} {}", timestamp.format()),
            Event::Applied { .. } => {}
            Event::WouldApply {
                id,
                timestamp,
                direction,
            } => println!("{direction:>4} #{id} {} (dry run)", timestamp.format()),
            Event::SkippedMissing { id, timestamp } => {
                println!("skip #{id} {}: unit missing from storage", timestamp.format())
            }
            Event::Failed {
                id,
                timestamp,
                error,
                ..
            } => println!("FAIL #{id} {}: {error}", timestamp.format()),
            Event::Halted { remaining } => {
                println!("halted, {remaining} migration(s) not attempted")
            }
            Event::CurrentSet { id: Some(id) } => println!("current migration is now #{id}"),
            Event::CurrentSet { id: None } => println!("no current migration"),
        }
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let text = serde_json::to_string_pretty(value).context("failed to encode output")?;
    println!("{text}");
    Ok(())
}

pub fn print_report(report: &RunReport, json: bool) -> Result<()> {
    if json {
        return print_json(report);
    }

    let nothing_to_do = report.applied.is_empty()
        && report.would_apply.is_empty()
        && report.failures.is_empty()
        && report.skipped.is_empty();
    if nothing_to_do {
        match report.target {
            Some(Target::Base) if report.direction.activates() => {
                println!("no migrations exist")
            }
            _ => println!("nothing to do"),
        }
        return Ok(());
    }

    let summary = match report.outcome {
        RunOutcome::Completed => format!("{} migration(s) {}", report.applied.len(), verb(report)),
        RunOutcome::HaltedOnError => format!(
            "stopped after {} migration(s) {}",
            report.applied.len(),
            verb(report)
        ),
        RunOutcome::Skipped => format!("dry run: {} migration(s) would run", report.would_apply.len()),
    };
    println!("{summary}");

    if !report.failures.is_empty() {
        println!("{} failure(s)", report.failures.len());
    }
    Ok(())
}

fn verb(report: &RunReport) -> &'static str {
    if report.direction.activates() {
        "applied"
    } else {
        "reverted"
    }
}

pub fn print_listing(listing: &Listing, json: bool) -> Result<()> {
    if json {
        return print_json(listing);
    }

    if listing.total == 0 {
        println!("no migrations found");
        return Ok(());
    }

    println!("{:>6}  {:<19}  {:<7}  current", "id", "timestamp", "state");
    for entry in &listing.entries {
        println!("{}", row(entry));
    }
    println!(
        "page {}/{} ({} total)",
        listing.page,
        listing.total_pages.max(1),
        listing.total
    );
    Ok(())
}

pub fn print_status(status: &Status, json: bool) -> Result<()> {
    if json {
        return print_json(status);
    }

    match &status.current {
        Some(entry) => println!("current: #{} {}", entry.id, entry.timestamp.format()),
        None => println!("no migrations performed"),
    }

    if status.pending.is_empty() {
        println!("up to date ({} known)", status.total);
    } else {
        println!("{} pending of {} known:", status.pending.len(), status.total);
        for entry in &status.pending {
            println!("{}", row(entry));
        }
    }
    Ok(())
}

pub fn print_statements(statements: &[String], json: bool) -> Result<()> {
    if json {
        return print_json(&statements);
    }
    if statements.is_empty() {
        println!("-- no statements");
    }
    for statement in statements {
        println!("{statement}");
    }
    Ok(())
}

fn row(entry: &LedgerEntry) -> String {
    let state = if entry.active { "applied" } else { "pending" };
    let current = if entry.is_current { "*" } else { "" };
    format!(
        "{:>6}  {:<19}  {:<7}  {current}",
        entry.id,
        entry.timestamp.format(),
        state
    )
}
