//! JSON and JSON Lines output formatters

use serde::Serialize;

use crate::{DisasmResult, DisassemblyError};
use super::{DisassemblyFormatter, Listing};

/// One record plus its bytes
#[derive(Serialize)]
struct RecordJson<'a> {
    #[serde(flatten)]
    record: &'a DisasmResult,
    /// Bytes of the record as hex string
    bytes: String,
}

/// Serializable listing for JSON output
#[derive(Serialize)]
struct ListingJson<'a> {
    /// Address of the first byte of the window
    base_address: String,
    records: Vec<RecordJson<'a>>,
}

fn record_to_json<'a>(listing: &Listing<'a>, record: &'a DisasmResult) -> RecordJson<'a> {
    RecordJson { record, bytes: listing.hex_of(record).replace(' ', "") }
}

fn json_error(e: serde_json::Error) -> DisassemblyError {
    DisassemblyError::Generic(format!("JSON serialization error: {}", e))
}

impl DisassemblyFormatter for super::JsonFormatter {
    fn format(&self, listing: &Listing<'_>) -> Result<String, DisassemblyError> {
        let result = ListingJson {
            base_address: format!("0x{:x}", listing.base_address),
            records: listing.records.iter().map(|record| record_to_json(listing, record)).collect(),
        };

        serde_json::to_string_pretty(&result).map_err(json_error)
    }
}

impl DisassemblyFormatter for super::JsonLinesFormatter {
    fn format(&self, listing: &Listing<'_>) -> Result<String, DisassemblyError> {
        let mut output = String::new();

        for record in listing.records {
            output.push_str(&serde_json::to_string(&record_to_json(listing, record)).map_err(json_error)?);
            output.push('\n');
        }

        Ok(output)
    }
}
