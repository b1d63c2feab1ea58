//! Output formatting for ls-cli (table, json, csv)

use clap::ValueEnum;
use colored::Colorize;
use ls_client::ItemUpdate;
use serde_json::{json, Map, Value};

/// Width of the first (name) column in table output
const NAME_WIDTH: usize = 19;
/// Width of every other column in table output
const VALUE_WIDTH: usize = 10;

/// Output format options
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum OutputFormat {
    /// Fixed-width rows (default)
    #[default]
    Table,
    /// One JSON object per update
    Json,
    /// CSV format
    Csv,
}

/// Context for output rendering
pub struct OutputContext {
    pub format: OutputFormat,
    pub quiet: bool,
}

impl OutputContext {
    pub fn new(format: OutputFormat, no_color: bool, quiet: bool) -> Self {
        if no_color {
            colored::control::set_override(false);
        }
        Self { format, quiet }
    }

    /// Print a success message (unless in quiet mode)
    pub fn success(&self, msg: &str) {
        if !self.quiet {
            eprintln!("{}", msg.green());
        }
    }

    /// Print an info message (unless in quiet mode)
    pub fn info(&self, msg: &str) {
        if !self.quiet {
            eprintln!("{}", msg);
        }
    }

    /// Print a warning message
    pub fn warn(&self, msg: &str) {
        eprintln!("{}", msg.yellow());
    }

    /// Print an error message
    pub fn error(&self, msg: &str) {
        eprintln!("{}", msg.red());
    }

    /// Print the column header, if the format has one
    pub fn print_header(&self, fields: &[String]) {
        match self.format {
            OutputFormat::Table if !self.quiet => {
                println!("{}", render_table_header(fields).as_str().bold());
            }
            OutputFormat::Csv => println!("{}", render_csv_header(fields)),
            _ => {}
        }
    }

    /// Print one item update in the configured format
    pub fn print_update(&self, update: &ItemUpdate, fields: &[String]) {
        let line = match self.format {
            OutputFormat::Table => render_table_row(update, fields),
            OutputFormat::Json => render_json_row(update).to_string(),
            OutputFormat::Csv => render_csv_row(update, fields),
        };
        println!("{}", line);
    }
}

fn pad(index: usize, value: &str) -> String {
    if index == 0 {
        format!("{:<width$}", value, width = NAME_WIDTH)
    } else {
        format!("{:>width$}", value, width = VALUE_WIDTH)
    }
}

pub fn render_table_header(fields: &[String]) -> String {
    fields
        .iter()
        .enumerate()
        .map(|(index, field)| pad(index, field))
        .collect::<Vec<_>>()
        .join(" | ")
}

/// Fixed-width line; null or not yet received values print as `-`
pub fn render_table_row(update: &ItemUpdate, fields: &[String]) -> String {
    fields
        .iter()
        .enumerate()
        .map(|(index, field)| pad(index, update.value(field).unwrap_or("-")))
        .collect::<Vec<_>>()
        .join(" | ")
}

pub fn render_json_row(update: &ItemUpdate) -> Value {
    let values: Map<String, Value> = update
        .fields
        .iter()
        .map(|(name, value)| (name.clone(), json!(value)))
        .collect();

    json!({
        "item": update.item_name,
        "pos": update.item_pos,
        "values": values,
        "changed": update.changed_fields,
    })
}

pub fn render_csv_header(fields: &[String]) -> String {
    std::iter::once("item")
        .chain(fields.iter().map(String::as_str))
        .map(escape_csv)
        .collect::<Vec<_>>()
        .join(",")
}

pub fn render_csv_row(update: &ItemUpdate, fields: &[String]) -> String {
    std::iter::once(update.item_name.as_str())
        .chain(fields.iter().map(|field| update.value(field).unwrap_or_default()))
        .map(escape_csv)
        .collect::<Vec<_>>()
        .join(",")
}

/// Escape a value for CSV output
fn escape_csv(value: &str) -> String {
    if value.contains(',') || value.contains('"') || value.contains('\n') {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}
