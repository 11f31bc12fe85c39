//! Python bindings for the uniasm disassembly layer

use clap::ValueEnum;
use pyo3::exceptions::{PyIOError, PyValueError};
use pyo3::prelude::*;
use pyo3::types::PyDict;

use crate::dispatch::DisasmCore;
use crate::format::{Listing, OutputFormat};
use crate::memory::{FileType, MemoryMap, MemoryRecord};
use crate::parser::GoblinLoader;
use crate::{Address, DisasmMode, DisasmOptions, SignatureType, Syntax};

fn parse_mode(mode: &str) -> PyResult<DisasmMode> {
    <DisasmMode as ValueEnum>::from_str(mode, true)
        .map_err(|_| PyValueError::new_err(format!("Unknown mode: {}", mode)))
}

fn build_core(mode: DisasmMode, syntax: Option<&str>) -> PyResult<DisasmCore> {
    let mut core = DisasmCore::with_mode(mode)
        .map_err(|e| PyValueError::new_err(format!("Failed to create decoder: {}", e)))?;
    if let Some(syntax) = syntax {
        let syntax: Syntax = syntax.parse().map_err(PyValueError::new_err)?;
        core.set_syntax(syntax)
            .map_err(|e| PyValueError::new_err(format!("Failed to set syntax: {}", e)))?;
    }
    Ok(core)
}

fn format_records(core: &DisasmCore, data: &[u8], address: Address, output_format: &str, limit: i32) -> PyResult<String> {
    let output_format: OutputFormat = output_format.parse().map_err(PyValueError::new_err)?;
    let records = core.disasm_list(data, address, &DisasmOptions::default(), limit, None);
    output_format
        .get_formatter()
        .format(&Listing::new(address, data, &records))
        .map_err(|e| PyValueError::new_err(format!("Failed to format output: {}", e)))
}

/// Decode raw bytes in the given mode
#[pyfunction]
#[pyo3(signature = (data, mode, address=0, output_format="text", syntax=None, limit=-1))]
fn disassemble(
    data: Vec<u8>,
    mode: &str,
    address: Address,
    output_format: &str,
    syntax: Option<&str>,
    limit: i32,
) -> PyResult<String> {
    let core = build_core(parse_mode(mode)?, syntax)?;
    format_records(&core, &data, address, output_format, limit)
}

/// Load a file, detect its mode, and decode from the entry point
#[pyfunction]
#[pyo3(signature = (file_path, mode=None, output_format="text", limit=-1))]
fn disassemble_file(file_path: &str, mode: Option<&str>, output_format: &str, limit: i32) -> PyResult<String> {
    let (data, image) = GoblinLoader::new()
        .load_file(std::path::Path::new(file_path))
        .map_err(|e| PyIOError::new_err(format!("Failed to load file {}: {}", file_path, e)))?;

    let mode = match mode {
        Some(mode) => parse_mode(mode)?,
        None => image.mode,
    };
    let core = build_core(mode, None)?;

    let offset = image
        .entry_point
        .and_then(|entry| image.memory_map.address_to_offset(entry))
        .unwrap_or(0);
    let address = image.memory_map.offset_to_address(offset).unwrap_or(offset);
    let window = usize::try_from(offset).ok().and_then(|start| data.get(start..)).unwrap_or(&[]);

    format_records(&core, window, address, output_format, limit)
}

/// Byte signature of `count` instructions of raw bytes loaded at `address`
#[pyfunction]
#[pyo3(signature = (data, mode, address=0, signature_type="full", count=10))]
fn signature(data: Vec<u8>, mode: &str, address: Address, signature_type: &str, count: usize) -> PyResult<String> {
    let signature_type = <SignatureType as ValueEnum>::from_str(signature_type, true)
        .map_err(|_| PyValueError::new_err(format!("Unknown signature type: {}", signature_type)))?;
    let core = build_core(parse_mode(mode)?, None)?;
    let map = MemoryMap::new(
        FileType::Binary,
        vec![MemoryRecord::new("raw", address, Some(0), data.len() as u64)],
    );
    Ok(core.get_signature(&data, &map, address, signature_type, count))
}

/// Python module initialization
#[pymodule]
fn uniasm(m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add_function(wrap_pyfunction!(disassemble, m)?)?;
    m.add_function(wrap_pyfunction!(disassemble_file, m)?)?;
    m.add_function(wrap_pyfunction!(signature, m)?)?;

    let py = m.py();
    let output_format = PyDict::new(py);
    output_format.set_item("TEXT", "text")?;
    output_format.set_item("JSON", "json")?;
    output_format.set_item("JSONL", "jsonl")?;
    output_format.set_item("CSV", "csv")?;
    m.setattr("OutputFormat", output_format)?;

    let modes = PyDict::new(py);
    for mode in DisasmMode::value_variants() {
        if let Some(value) = mode.to_possible_value() {
            modes.set_item(value.get_name().to_uppercase().replace('-', "_"), value.get_name())?;
        }
    }
    m.setattr("Mode", modes)?;

    let signature_types = PyDict::new(py);
    signature_types.set_item("FULL", "full")?;
    signature_types.set_item("MASK", "mask")?;
    signature_types.set_item("REL", "rel")?;
    m.setattr("SignatureType", signature_types)?;

    Ok(())
}
