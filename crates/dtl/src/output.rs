//! Console output
//!
//! Status messages go to stderr through [`Printer`] so that stdout only ever
//! carries results: JSON (default) or a table.

use std::collections::BTreeSet;
use std::io::Write;

use anyhow::Result;
use colored::Colorize;
use comfy_table::Table;
use comfy_table::presets::UTF8_FULL_CONDENSED;
use serde::Serialize;
use serde_json::{Map, Value};

/// Output format for listings
#[derive(Debug, Clone, Copy, Default, clap::ValueEnum)]
pub enum OutputFormat {
    /// Pretty-printed JSON array (default)
    #[default]
    Json,
    /// Columnar table
    Table,
}

/// Writes status messages, honouring `--quiet` and `--verbose`.
#[derive(Debug, Clone, Copy)]
pub struct Printer {
    quiet: bool,
    verbose: bool,
}

impl Printer {
    pub fn new(quiet: bool, verbose: bool) -> Self {
        Self { quiet, verbose }
    }

    pub fn info(&self, msg: &str) {
        if !self.quiet {
            eprintln!("{msg}");
        }
    }

    /// Only shown with `-v`.
    pub fn verbose(&self, msg: &str) {
        if self.verbose && !self.quiet {
            eprintln!("{}", msg.dimmed());
        }
    }

    pub fn success(&self, msg: &str) {
        if !self.quiet {
            eprintln!("{}", msg.green());
        }
    }

    pub fn warning(&self, msg: &str) {
        if !self.quiet {
            eprintln!("{} {msg}", "warning:".yellow().bold());
        }
    }

    /// Errors are printed even in quiet mode.
    pub fn error(&self, msg: &str) {
        eprintln!("{} {msg}", "error:".red().bold());
    }

    /// Print a value to stdout as pretty JSON.
    pub fn dumps<T: Serialize + ?Sized>(&self, value: &T) -> Result<()> {
        println!("{}", serde_json::to_string_pretty(value)?);
        Ok(())
    }

    /// Print deployment outputs as `name = value` lines.
    pub fn dumpp(&self, outputs: &Map<String, Value>) {
        for line in format_outputs(outputs) {
            println!("{line}");
        }
    }
}

/// Format and write results to the given writer.
pub fn write_results(writer: &mut dyn Write, documents: &[Value], format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => write_json(writer, documents),
        OutputFormat::Table => write_table(writer, documents),
    }
}

fn write_json(writer: &mut dyn Write, documents: &[Value]) -> Result<()> {
    let json = serde_json::to_string_pretty(documents)?;
    writeln!(writer, "{json}")?;
    Ok(())
}

fn write_table(writer: &mut dyn Write, documents: &[Value]) -> Result<()> {
    if documents.is_empty() {
        writeln!(writer, "(no results)")?;
        return Ok(());
    }

    let columns = collect_columns(documents);

    let mut table = Table::new();
    table.load_preset(UTF8_FULL_CONDENSED);
    table.set_header(columns.iter().collect::<Vec<_>>());

    for doc in documents {
        let row: Vec<String> = columns
            .iter()
            .map(|col| format_cell(doc.get(col.as_str())))
            .collect();
        table.add_row(row);
    }

    writeln!(writer, "{table}")?;
    Ok(())
}

/// Column names across all documents, in first-seen order.
fn collect_columns(documents: &[Value]) -> Vec<String> {
    let mut seen = BTreeSet::new();
    let mut columns = Vec::new();

    for doc in documents {
        if let Value::Object(map) = doc {
            for key in map.keys() {
                if seen.insert(key.clone()) {
                    columns.push(key.clone());
                }
            }
        }
    }

    columns
}

fn format_cell(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(Value::Bool(b)) => b.to_string(),
        Some(Value::Number(n)) => n.to_string(),
        Some(v @ Value::Array(arr)) => {
            if arr.len() <= 3 {
                serde_json::to_string(v).unwrap_or_default()
            } else {
                format!("[{} items]", arr.len())
            }
        }
        Some(v @ Value::Object(obj)) => {
            if obj.len() <= 3 {
                serde_json::to_string(v).unwrap_or_default()
            } else {
                format!("{{{} fields}}", obj.len())
            }
        }
    }
}

/// ARM outputs look like `{"vmId": {"type": "string", "value": "..."}}`.
fn format_outputs(outputs: &Map<String, Value>) -> Vec<String> {
    outputs
        .iter()
        .map(|(name, output)| {
            let value = output.get("value").unwrap_or(output);
            format!("{name} = {}", format_cell(Some(value)))
        })
        .collect()
}
