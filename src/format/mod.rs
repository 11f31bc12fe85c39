//! Output formatters for decoded record listings

mod json;
mod csv;

pub use self::json::*;
pub use self::csv::*;

use crate::{Address, DisasmResult, DisassemblyError, RelType};
use std::fmt;
use std::str::FromStr;
use clap::ValueEnum;

/// Supported output formats for disassembly results
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum OutputFormat {
    /// Plain text output (default)
    #[default]
    Text,
    /// JSON format (one document)
    Json,
    /// JSON Lines format (one JSON object per line)
    JsonLines,
    /// CSV format (comma-separated values)
    Csv,
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputFormat::Text => write!(f, "text"),
            OutputFormat::Json => write!(f, "json"),
            OutputFormat::JsonLines => write!(f, "jsonl"),
            OutputFormat::Csv => write!(f, "csv"),
        }
    }
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" => Ok(OutputFormat::Text),
            "json" => Ok(OutputFormat::Json),
            "jsonl" | "jsonlines" => Ok(OutputFormat::JsonLines),
            "csv" => Ok(OutputFormat::Csv),
            _ => Err(format!("Unknown output format: {}", s)),
        }
    }
}

impl OutputFormat {
    /// Get all available output formats
    pub fn available_formats() -> &'static [Self] {
        &[OutputFormat::Text, OutputFormat::Json, OutputFormat::JsonLines, OutputFormat::Csv]
    }

    /// Get a formatter for this output format
    pub fn get_formatter(&self) -> Box<dyn DisassemblyFormatter> {
        match self {
            OutputFormat::Text => Box::new(TextFormatter),
            OutputFormat::Json => Box::new(JsonFormatter),
            OutputFormat::JsonLines => Box::new(JsonLinesFormatter),
            OutputFormat::Csv => Box::new(CsvFormatter),
        }
    }
}

/// Records decoded from one byte window, with the window itself so each
/// record's bytes can be shown.
#[derive(Debug, Clone, Copy)]
pub struct Listing<'a> {
    pub base_address: Address,
    pub data: &'a [u8],
    pub records: &'a [DisasmResult],
}

impl<'a> Listing<'a> {
    pub fn new(base_address: Address, data: &'a [u8], records: &'a [DisasmResult]) -> Self {
        Self { base_address, data, records }
    }

    /// The bytes covered by `record`, empty if it lies outside the window.
    pub fn bytes_of(&self, record: &DisasmResult) -> &'a [u8] {
        let Some(start) = record.address.checked_sub(self.base_address) else {
            return &[];
        };
        let Ok(start) = usize::try_from(start) else {
            return &[];
        };
        let end = start.saturating_add(record.size).min(self.data.len());
        self.data.get(start..end).unwrap_or(&[])
    }

    /// Space separated hex of the bytes covered by `record`.
    pub fn hex_of(&self, record: &DisasmResult) -> String {
        self.bytes_of(record).iter().map(|b| format!("{:02x}", b)).collect::<Vec<_>>().join(" ")
    }
}

/// Formatter trait for disassembly output
pub trait DisassemblyFormatter {
    /// Format a decoded listing
    fn format(&self, listing: &Listing<'_>) -> Result<String, DisassemblyError>;
}

/// Format disassembly in plain text
pub struct TextFormatter;

/// Format disassembly in JSON
pub struct JsonFormatter;

/// Format disassembly in JSON Lines
pub struct JsonLinesFormatter;

/// Format disassembly in CSV
pub struct CsvFormatter;

/// Short text for the cross-references of a record, empty when it has none.
fn xref_comment(record: &DisasmResult) -> String {
    let mut notes = Vec::new();
    if record.rel_type != RelType::None {
        notes.push(format!("{:?} -> 0x{:x}", record.rel_type, record.xref_to_relative));
    }
    if record.xref_to_memory != 0 {
        notes.push(format!("{:?} [0x{:x}]", record.mem_type, record.xref_to_memory));
    }
    notes.join(", ")
}

impl DisassemblyFormatter for TextFormatter {
    fn format(&self, listing: &Listing<'_>) -> Result<String, DisassemblyError> {
        let mut output = String::new();
        output.push_str(&format!("Disassembly at 0x{:x}:\n\n", listing.base_address));

        for record in listing.records {
            let bytes = listing.hex_of(record);
            let mut line = format!("0x{:08x}: {:<10} {:<30} ; {}", record.address, record.mnemonic, record.operands, bytes);
            let xrefs = xref_comment(record);
            if !xrefs.is_empty() {
                line.push_str(&format!(" ; {}", xrefs));
            }
            if record.is_mem_error {
                line.push_str(" ; decoder out of memory");
            }
            output.push_str(line.trim_end());
            output.push('\n');
        }

        Ok(output)
    }
}
