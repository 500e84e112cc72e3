//! Rendering for the replog CLI.
//!
//! Rows render as a table, JSON or YAML. Single records (a snapshot header,
//! a replicator bookmark) render as a labelled block in table mode.

use anyhow::Result;
use clap::ValueEnum;
use colored::*;
use serde::Serialize;
use tabled::{
    settings::{object::Columns, Alignment, Modify, Style},
    Table, Tabled,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Default)]
pub enum OutputFormat {
    /// Rounded table, one row per record
    #[default]
    Table,
    Json,
    Yaml,
}

pub fn print_error(msg: &str) {
    eprintln!("{} {}", "[ERROR]".red().bold(), msg);
}

/// Trailing hint under a table, such as the next cursor or a truncation note.
pub fn print_note(msg: &str) {
    println!("{} {}", "[INFO]".blue().bold(), msg);
}

pub fn render_rows<T: Tabled + Serialize>(rows: &[T], format: OutputFormat) -> Result<String> {
    Ok(match format {
        OutputFormat::Table if rows.is_empty() => format!("{}\n", "No results found.".dimmed()),
        OutputFormat::Table => {
            let mut table = Table::new(rows);
            table
                .with(Style::rounded())
                .with(Modify::new(Columns::first()).with(Alignment::left()));
            format!("{}\n", table)
        }
        OutputFormat::Json => format!("{}\n", serde_json::to_string_pretty(rows)?),
        OutputFormat::Yaml => serde_yaml::to_string(rows)?,
    })
}

/// Records without a table shape fall back to JSON in table mode.
pub fn render_record<T: Serialize>(record: &T, format: OutputFormat) -> Result<String> {
    Ok(match format {
        OutputFormat::Table | OutputFormat::Json => format!("{}\n", serde_json::to_string_pretty(record)?),
        OutputFormat::Yaml => serde_yaml::to_string(record)?,
    })
}

pub fn render_details(title: &str, fields: &[(&str, String)]) -> String {
    let width = fields.iter().map(|(label, _)| label.len()).max().unwrap_or(0);
    let mut out = format!("\n{}\n\n", title.bold().underline());
    for (label, value) in fields {
        let label = format!("{:<width$}", format!("{}:", label), width = width + 1);
        out.push_str(&format!("  {}  {}\n", label.cyan(), value));
    }
    out
}

pub fn print_rows<T: Tabled + Serialize>(rows: &[T], format: OutputFormat) -> Result<()> {
    print!("{}", render_rows(rows, format)?);
    Ok(())
}

pub fn print_record<T: Serialize>(record: &T, format: OutputFormat) -> Result<()> {
    print!("{}", render_record(record, format)?);
    Ok(())
}

pub fn print_details(title: &str, fields: &[(&str, String)]) {
    print!("{}", render_details(title, fields));
}
