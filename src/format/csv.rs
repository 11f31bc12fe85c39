//! CSV output formatter

use crate::{DisasmResult, DisassemblyError, RelType};
use super::{DisassemblyFormatter, Listing};

const HEADER: [&str; 9] = [
    "base_address",
    "address",
    "size",
    "mnemonic",
    "operands",
    "bytes",
    "valid",
    "rel_type",
    "xref",
];

fn csv_error(e: impl std::fmt::Display) -> DisassemblyError {
    DisassemblyError::Generic(format!("CSV serialization error: {}", e))
}

fn xref_field(record: &DisasmResult) -> String {
    if record.rel_type != RelType::None {
        format!("0x{:x}", record.xref_to_relative)
    } else if record.xref_to_memory != 0 {
        format!("0x{:x}", record.xref_to_memory)
    } else {
        String::new()
    }
}

impl DisassemblyFormatter for super::CsvFormatter {
    fn format(&self, listing: &Listing<'_>) -> Result<String, DisassemblyError> {
        let mut writer = ::csv::Writer::from_writer(Vec::new());
        writer.write_record(HEADER).map_err(csv_error)?;

        let base_address = format!("0x{:x}", listing.base_address);
        for record in listing.records {
            writer
                .write_record([
                    base_address.clone(),
                    format!("0x{:x}", record.address),
                    record.size.to_string(),
                    record.mnemonic.clone(),
                    record.operands.clone(),
                    listing.hex_of(record),
                    record.is_valid.to_string(),
                    format!("{:?}", record.rel_type),
                    xref_field(record),
                ])
                .map_err(csv_error)?;
        }

        let bytes = writer.into_inner().map_err(csv_error)?;
        String::from_utf8(bytes).map_err(csv_error)
    }
}
