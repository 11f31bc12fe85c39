//! uniasm - decode instructions and binary metadata streams into one record format
//!
//! Usage:
//!   uniasm <file>                           Disassemble from the entry point
//!   uniasm <file> -a 0x401000 -n 20         Disassemble 20 records at an address
//!   uniasm <file> --mode 7zip-properties    Walk a 7-Zip header
//!   uniasm <file> --mode mach-bind          Walk the Mach-O bind opcodes
//!   uniasm <file> --signature rel           Print a relative-branch signature

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use uniasm::dispatch::DisasmCore;
use uniasm::format::{Listing, OutputFormat};
use uniasm::options::Options;
use uniasm::parser::{FileRange, GoblinLoader, LoadedImage};
use uniasm::{Address, DisasmMode, DisasmOptions, SignatureType, Syntax};

#[derive(Parser, Debug)]
#[command(name = "uniasm")]
#[command(about = "Normalized disassembly of machine code and binary metadata streams", long_about = None)]
struct Cli {
    /// Path to the input file
    file: PathBuf,

    /// Decoding mode (detected from the file header when omitted)
    #[arg(short, long, value_enum)]
    mode: Option<DisasmMode>,

    /// x86 assembly syntax
    #[arg(short, long, value_enum)]
    syntax: Option<Syntax>,

    /// Start at this virtual address
    #[arg(short, long, value_parser = parse_hex, conflicts_with = "offset")]
    address: Option<u64>,

    /// Start at this file offset
    #[arg(short, long, value_parser = parse_hex)]
    offset: Option<u64>,

    /// Maximum number of records (negative is unlimited, 0 stops at the first invalid one)
    #[arg(short = 'n', long, default_value_t = -1, allow_negative_numbers = true)]
    count: i32,

    /// Maximum number of bytes to decode
    #[arg(short, long, default_value_t = 4096)]
    bytes: u64,

    /// Output format
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
    format: OutputFormat,

    /// Print a byte signature of this type instead of a listing
    #[arg(long, value_enum)]
    signature: Option<SignatureType>,

    /// Number of instructions in a signature
    #[arg(long, default_value_t = 10)]
    signature_count: usize,

    /// Print the signature walk as JSON records
    #[arg(long, requires = "signature")]
    records: bool,

    /// Decode the lazy-bind stream in `mach-bind` mode
    #[arg(long)]
    lazy: bool,

    /// JSON file with option keys (syntax and colors)
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Print colored text spans of every record as JSON lines
    #[arg(long)]
    spans: bool,

    /// Upper-case mnemonics and operands
    #[arg(long)]
    uppercase: bool,

    /// Drop operand text
    #[arg(long)]
    no_operands: bool,
}

fn parse_hex(s: &str) -> Result<u64, String> {
    let s = s.strip_prefix("0x").unwrap_or(s);
    u64::from_str_radix(s, 16).map_err(|e| e.to_string())
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    run(cli)
}

fn run(cli: Cli) -> Result<()> {
    let loader = GoblinLoader::new();
    let (data, image) = loader
        .load_file(&cli.file)
        .with_context(|| format!("Failed to load {}", cli.file.display()))?;

    let mode = cli.mode.unwrap_or(image.mode);
    if mode == DisasmMode::Unknown {
        bail!("Could not detect the decoding mode of {}, pass --mode", cli.file.display());
    }

    let mut core = DisasmCore::with_mode(mode).with_context(|| format!("Failed to set mode {}", mode))?;
    if let Some(path) = &cli.config {
        let options = Options::load(path).with_context(|| format!("Failed to read options {}", path.display()))?;
        core.set_options(&options)?;
    }
    if let Some(syntax) = cli.syntax {
        core.set_syntax(syntax).with_context(|| format!("Failed to set syntax {}", syntax))?;
    }
    log::info!("decoding {} as {} ({})", cli.file.display(), core.mode(), core.syntax());

    let range = start_range(&cli, &image, mode, data.len() as u64)?;

    if let Some(signature_type) = cli.signature {
        return print_signature(&cli, &core, &data, &image, range.offset, signature_type);
    }

    let start = usize::try_from(range.offset).context("Offset does not fit in memory")?;
    let end = usize::try_from(range.offset.saturating_add(range.size.min(cli.bytes)))
        .unwrap_or(usize::MAX)
        .min(data.len());
    let Some(window) = data.get(start..end) else {
        bail!("Offset 0x{:x} is outside the file", range.offset);
    };

    // metadata streams are addressed by file offset
    let address: Address = if mode.is_capstone() {
        image.memory_map.offset_to_address(range.offset).unwrap_or(range.offset)
    } else {
        range.offset
    };

    let options = DisasmOptions { uppercase: cli.uppercase, no_operands: cli.no_operands };
    let records = core.disasm_list(window, address, &options, cli.count, None);

    if cli.spans {
        for record in &records {
            println!("{}", serde_json::to_string(&core.text_spans(record))?);
        }
        return Ok(());
    }

    let listing = Listing::new(address, window, &records);
    let output = cli.format.get_formatter().format(&listing)?;
    print!("{}", output);
    Ok(())
}

/// File range to decode, from the command line or the loaded image.
fn start_range(cli: &Cli, image: &LoadedImage, mode: DisasmMode, file_size: u64) -> Result<FileRange> {
    if mode.is_mach_command() {
        let Some(streams) = &image.macho_streams else {
            bail!("{} has no dyld info load command", cli.file.display());
        };
        let stream = if cli.lazy && mode == DisasmMode::CustomMachBind {
            streams.lazy_bind
        } else {
            streams.range_for(mode)
        };
        let Some(stream) = stream else {
            bail!("{} has an empty {} stream", cli.file.display(), mode);
        };
        return Ok(stream);
    }

    let offset = match (cli.offset, cli.address) {
        (Some(offset), _) => offset,
        (None, Some(address)) => image
            .memory_map
            .address_to_offset(address)
            .with_context(|| format!("Address 0x{:x} is not backed by the file", address))?,
        (None, None) => image
            .entry_point
            .filter(|_| mode.is_capstone())
            .and_then(|entry| image.memory_map.address_to_offset(entry))
            .unwrap_or(0),
    };

    if offset > file_size {
        bail!("Offset 0x{:x} is outside the file", offset);
    }
    Ok(FileRange { offset, size: file_size - offset })
}

fn print_signature(
    cli: &Cli,
    core: &DisasmCore,
    data: &[u8],
    image: &LoadedImage,
    offset: u64,
    signature_type: SignatureType,
) -> Result<()> {
    let map = &image.memory_map;
    if cli.records {
        let records = core.get_signature_records(data, map, offset, cli.signature_count, signature_type);
        println!("{}", serde_json::to_string_pretty(&records)?);
        return Ok(());
    }

    let address = map
        .offset_to_address(offset)
        .with_context(|| format!("Offset 0x{:x} is not mapped", offset))?;
    println!("{}", core.get_signature(data, map, address, signature_type, cli.signature_count));
    Ok(())
}
