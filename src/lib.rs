//! Core records, traits, and dispatch for the uniasm disassembly layer.
//!
//! This library normalizes the output of several instruction decoders
//! (x86, ARM, ARM64, MIPS, RISC-V and PowerPC through capstone) and of two
//! binary-format pseudo-disassemblers (7-Zip header properties and Mach-O
//! dyld opcode streams) into one record type, [`DisasmResult`]. Byte
//! signatures, signature records and colorized text spans are derived from
//! that record stream.
//!
//! # Basic Usage
//!
//! ```rust,no_run
//! use uniasm::{dispatch::DisasmCore, DisasmMode, DisasmOptions};
//!
//! let mut core = DisasmCore::new();
//! core.set_mode(DisasmMode::X86_64).unwrap();
//!
//! let code = [0x55, 0x48, 0x89, 0xe5, 0xc3];
//! let records = core.disasm_list(&code, 0x1000, &DisasmOptions::default(), -1, None);
//! for record in &records {
//!     println!("{:#x}: {} {}", record.address, record.mnemonic, record.operands);
//! }
//! ```

pub mod packed;
pub mod classify;
pub mod encoding;
pub mod decoder;
pub mod backend;
pub mod dispatch;
pub mod memory;
pub mod parser;
pub mod options;
pub mod render;
pub mod format;
mod large_tests;
#[cfg(feature = "extension-module")]
pub mod python;

/// Represents an address in memory
pub type Address = u64;

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

/// Number of bytes read for one instruction when decoding from a byte source.
pub const MAX_OPCODE_SIZE: usize = 15;

/// Instruction-set family. Classification tables are keyed by family, not mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
pub enum DisasmFamily {
    #[default]
    Unknown,
    X86,
    Arm,
    Arm64,
    Mips,
    RiscV,
    Ppc,
    /// Pseudo-disassemblers over binary metadata.
    Custom,
}

/// Decoding mode: a concrete ISA variant or one of the custom metadata grammars.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, ValueEnum)]
#[non_exhaustive]
pub enum DisasmMode {
    /// No decoder selected
    Unknown,
    /// 16-bit x86 (real mode, COM images)
    #[value(name = "x86-16")]
    X86_16,
    /// 32-bit x86
    #[value(name = "x86-32")]
    X86_32,
    /// 64-bit x86
    #[value(name = "x86-64")]
    X86_64,
    /// ARM (32-bit)
    Arm,
    /// ARM Thumb mode
    Thumb,
    /// AArch64 (ARM 64-bit)
    Arm64,
    /// MIPS 32-bit
    Mips32,
    /// RISC-V 32-bit
    #[value(name = "riscv32")]
    RiscV32,
    /// RISC-V 64-bit
    #[value(name = "riscv64")]
    RiscV64,
    /// PowerPC 32-bit (big endian)
    Ppc32,
    /// 7-Zip header property stream
    #[value(name = "7zip-properties")]
    Custom7ZipProperties,
    /// Mach-O dyld rebase opcodes
    #[value(name = "mach-rebase")]
    CustomMachRebase,
    /// Mach-O dyld bind opcodes
    #[value(name = "mach-bind")]
    CustomMachBind,
    /// Mach-O dyld weak-bind opcodes
    #[value(name = "mach-weak-bind")]
    CustomMachWeakBind,
    /// Mach-O export trie
    #[value(name = "mach-export")]
    CustomMachExport,
}

impl DisasmMode {
    /// The family whose classification tables apply to this mode.
    pub fn family(self) -> DisasmFamily {
        match self {
            DisasmMode::X86_16 | DisasmMode::X86_32 | DisasmMode::X86_64 => DisasmFamily::X86,
            DisasmMode::Arm | DisasmMode::Thumb => DisasmFamily::Arm,
            DisasmMode::Arm64 => DisasmFamily::Arm64,
            DisasmMode::Mips32 => DisasmFamily::Mips,
            DisasmMode::RiscV32 | DisasmMode::RiscV64 => DisasmFamily::RiscV,
            DisasmMode::Ppc32 => DisasmFamily::Ppc,
            DisasmMode::Custom7ZipProperties
            | DisasmMode::CustomMachRebase
            | DisasmMode::CustomMachBind
            | DisasmMode::CustomMachWeakBind
            | DisasmMode::CustomMachExport => DisasmFamily::Custom,
            DisasmMode::Unknown => DisasmFamily::Unknown,
        }
    }

    /// Whether the capstone engine can decode this mode.
    pub fn is_capstone(self) -> bool {
        !matches!(self.family(), DisasmFamily::Custom | DisasmFamily::Unknown)
    }

    /// Whether this mode walks a Mach-O dyld info stream.
    pub fn is_mach_command(self) -> bool {
        matches!(
            self,
            DisasmMode::CustomMachRebase
                | DisasmMode::CustomMachBind
                | DisasmMode::CustomMachWeakBind
                | DisasmMode::CustomMachExport
        )
    }

    /// Default operand width in bits for x86 modes, `None` elsewhere.
    pub fn x86_bitness(self) -> Option<u8> {
        match self {
            DisasmMode::X86_16 => Some(16),
            DisasmMode::X86_32 => Some(32),
            DisasmMode::X86_64 => Some(64),
            _ => None,
        }
    }
}

impl fmt::Display for DisasmMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DisasmMode::Unknown => write!(f, "Unknown"),
            DisasmMode::X86_16 => write!(f, "x86-16"),
            DisasmMode::X86_32 => write!(f, "x86-32"),
            DisasmMode::X86_64 => write!(f, "x86-64"),
            DisasmMode::Arm => write!(f, "ARM"),
            DisasmMode::Thumb => write!(f, "Thumb"),
            DisasmMode::Arm64 => write!(f, "ARM64"),
            DisasmMode::Mips32 => write!(f, "MIPS32"),
            DisasmMode::RiscV32 => write!(f, "RISC-V 32"),
            DisasmMode::RiscV64 => write!(f, "RISC-V 64"),
            DisasmMode::Ppc32 => write!(f, "PowerPC 32"),
            DisasmMode::Custom7ZipProperties => write!(f, "7-Zip properties"),
            DisasmMode::CustomMachRebase => write!(f, "Mach-O rebase"),
            DisasmMode::CustomMachBind => write!(f, "Mach-O bind"),
            DisasmMode::CustomMachWeakBind => write!(f, "Mach-O weak bind"),
            DisasmMode::CustomMachExport => write!(f, "Mach-O export"),
        }
    }
}

/// Assembly text syntax. Only meaningful for x86.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, ValueEnum)]
pub enum Syntax {
    #[default]
    Default,
    Intel,
    Att,
    Masm,
}

impl fmt::Display for Syntax {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Syntax::Default => write!(f, "DEFAULT"),
            Syntax::Intel => write!(f, "INTEL"),
            Syntax::Att => write!(f, "ATT"),
            Syntax::Masm => write!(f, "MASM"),
        }
    }
}

impl FromStr for Syntax {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "" | "DEFAULT" => Ok(Syntax::Default),
            "INTEL" => Ok(Syntax::Intel),
            "ATT" | "AT&T" => Ok(Syntax::Att),
            "MASM" => Ok(Syntax::Masm),
            _ => Err(format!("Unknown syntax: {}", s)),
        }
    }
}

/// Kind of a statically resolved relative branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
pub enum RelType {
    #[default]
    None,
    /// Branch whose kind could not be narrowed further
    Jmp,
    JmpUncond,
    JmpCond,
    Call,
}

/// Kind of a statically resolved memory reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
pub enum MemType {
    #[default]
    None,
    Read,
    Write,
    Access,
}

/// One decoded unit: a real instruction or a pseudo-record of a metadata grammar.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct DisasmResult {
    pub is_valid: bool,
    /// The native decoder ran out of memory; the record does not advance.
    pub is_mem_error: bool,
    pub address: Address,
    pub size: usize,
    /// Backend-specific opcode id, 0 for pseudo-records.
    pub opcode: u32,
    pub mnemonic: String,
    pub operands: String,
    pub is_ret: bool,
    pub is_call: bool,
    pub is_jmp: bool,
    pub is_cond_jmp: bool,
    pub rel_type: RelType,
    pub xref_to_relative: Address,
    pub mem_type: MemType,
    pub xref_to_memory: Address,
    pub memory_size: u32,
    /// `address + size` unless a relative branch target was resolved.
    pub next_address: Address,
    pub is_const: bool,
    pub disp_offset: u32,
    pub disp_size: u32,
    pub imm_offset: u32,
    pub imm_size: u32,
}

impl DisasmResult {
    /// A valid record of `size` bytes at `address`.
    pub fn new(address: Address, size: usize, mnemonic: impl Into<String>, operands: impl Into<String>) -> Self {
        Self {
            is_valid: true,
            address,
            size,
            mnemonic: mnemonic.into(),
            operands: operands.into(),
            next_address: address + size as Address,
            ..Default::default()
        }
    }

    /// An invalid record with nothing decoded, stamped with `address`.
    pub fn invalid(address: Address) -> Self {
        Self {
            address,
            next_address: address,
            ..Default::default()
        }
    }
}

impl fmt::Display for DisasmResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.operands.is_empty() {
            write!(f, "{}", self.mnemonic)
        } else {
            write!(f, "{} {}", self.mnemonic, self.operands)
        }
    }
}

/// Per-call text options.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DisasmOptions {
    /// Fold mnemonic and operand text to upper case
    pub uppercase: bool,
    /// Drop operand text from every record
    pub no_operands: bool,
}

/// Byte signature flavor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, ValueEnum)]
pub enum SignatureType {
    /// Raw instruction bytes
    Full,
    /// Displacement and immediate bytes replaced by `..`
    Mask,
    /// Follows relative branches, branch immediates replaced by `$$`
    Rel,
}

/// One instruction of a signature walk.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct SignatureRecord {
    pub address: Address,
    /// Full instruction text
    pub opcode: String,
    pub bytes: Vec<u8>,
    pub disp_offset: u32,
    pub disp_size: u32,
    pub imm_offset: u32,
    pub imm_size: u32,
    pub is_const: bool,
}

/// Shared cancellation flag polled by every decode loop.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request that running loops stop at their next iteration.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }
}

/// Backend trait: turns a byte window into normalized records.
pub trait DisasmBackend {
    /// Decode `data`, whose first byte lives at `address`.
    ///
    /// # Arguments
    /// * `limit` - 0 stops at the first invalid unit, negative is unlimited,
    ///   positive caps the number of records
    /// * `token` - polled once per iteration; partial results are returned
    ///   when it is cancelled
    fn disasm(
        &self,
        data: &[u8],
        address: Address,
        options: &DisasmOptions,
        limit: i32,
        token: &CancellationToken,
    ) -> Vec<DisasmResult>;

    /// The mode this backend was built for.
    fn mode(&self) -> DisasmMode;
}

/// Error type for disassembly operations
#[derive(Debug, thiserror::Error)]
pub enum DisassemblyError {
    /// Failed to parse binary format
    #[error("Failed to parse binary format: {0}")]
    ParsingError(String),

    /// Decoder error
    #[error("Decoder error: {0}")]
    DecoderError(String),

    /// Unsupported mode
    #[error("Unsupported mode: {0}")]
    UnsupportedMode(DisasmMode),

    /// I/O error
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Generic error
    #[error("{0}")]
    Generic(String),
}

impl From<decoder::DecoderError> for DisassemblyError {
    fn from(err: decoder::DecoderError) -> Self {
        DisassemblyError::DecoderError(err.to_string())
    }
}
