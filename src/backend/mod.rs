//! Backend plumbing shared by every decoder: the decode loop state, the
//! admission rule that turns one decoded unit into an output record, and
//! number rendering.

pub mod capstone_bridge;
pub mod sevenzip;
pub mod macho;

use log::{debug, trace};

use crate::{
    Address, CancellationToken, DisasmBackend, DisasmFamily, DisasmMode, DisasmOptions, DisasmResult,
    DisassemblyError, Syntax,
};
use self::capstone_bridge::CapstoneBridge;
use self::macho::MachCommands;
use self::sevenzip::SevenZipProperties;

/// Mutable state of one decode loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodeState {
    /// Bytes consumed from the start of the window
    pub cursor: usize,
    /// Address of the first byte of the window
    pub address: Address,
    /// Records appended so far
    pub count: usize,
    pub limit: i32,
    /// Window length
    pub max_size: usize,
    pub stop: bool,
}

impl DecodeState {
    pub fn new(address: Address, max_size: usize, limit: i32) -> Self {
        Self {
            cursor: 0,
            address,
            count: 0,
            limit,
            max_size,
            stop: max_size == 0,
        }
    }

    /// Address of the byte under the cursor.
    pub fn current_address(&self) -> Address {
        self.address + self.cursor as Address
    }

    /// The not yet consumed tail of `data`.
    pub fn remaining<'a>(&self, data: &'a [u8]) -> &'a [u8] {
        data.get(self.cursor..self.max_size.min(data.len())).unwrap_or(&[])
    }

    /// Apply the admission rule to `record`.
    ///
    /// With `limit == 0` an invalid record stops the loop and is discarded.
    /// Otherwise the record is appended unless the loop already stopped, and
    /// the loop stops once the limit is reached or the window is exhausted.
    pub fn admit(&mut self, results: &mut Vec<DisasmResult>, mut record: DisasmResult, options: &DisasmOptions) {
        if self.limit == 0 && !record.is_valid {
            self.stop = true;
            return;
        }

        if !self.stop {
            apply_options(&mut record, options);
            trace!("admit {:#x} size {} `{}`", record.address, record.size, record);
            self.cursor += record.size;
            self.count += 1;
            results.push(record);
        }

        let limit_reached = self.limit > 0 && self.count >= self.limit as usize;
        if limit_reached || self.cursor >= self.max_size {
            self.stop = true;
        }
    }

    /// Append a terminal, non-advancing record (decoder memory fault) and stop.
    pub fn admit_fault(&mut self, results: &mut Vec<DisasmResult>, record: DisasmResult) {
        if !self.stop {
            results.push(record);
        }
        self.stop = true;
    }
}

/// Decode state plus output list, threaded through the metadata grammars.
///
/// Every reader returns `None` once the walk has stopped (mismatch, overrun,
/// limit, exhausted window or cancellation), so grammar code can use `?`.
pub struct Cursor<'a> {
    data: &'a [u8],
    state: DecodeState,
    results: Vec<DisasmResult>,
    options: &'a DisasmOptions,
    token: &'a CancellationToken,
}

impl<'a> Cursor<'a> {
    pub fn new(
        data: &'a [u8],
        address: Address,
        options: &'a DisasmOptions,
        limit: i32,
        token: &'a CancellationToken,
    ) -> Self {
        Self {
            data,
            state: DecodeState::new(address, data.len(), limit),
            results: Vec::new(),
            options,
            token,
        }
    }

    pub fn halted(&self) -> bool {
        self.state.stop || self.token.is_cancelled()
    }

    /// Unconsumed bytes, empty once halted.
    pub fn window(&self) -> &'a [u8] {
        if self.halted() {
            &[]
        } else {
            self.state.remaining(self.data)
        }
    }

    /// Stop the walk without emitting anything.
    pub fn fail<T>(&mut self) -> Option<T> {
        self.state.stop = true;
        None
    }

    /// Emit a valid pseudo-record covering the next `size` bytes.
    pub fn emit(&mut self, size: usize, mnemonic: impl Into<String>, operands: impl Into<String>) {
        let record = DisasmResult::new(self.state.current_address(), size, mnemonic, operands);
        self.state.admit(&mut self.results, record, self.options);
    }

    pub fn finish(self) -> Vec<DisasmResult> {
        self.results
    }
}

fn apply_options(record: &mut DisasmResult, options: &DisasmOptions) {
    if options.no_operands {
        record.operands.clear();
    }
    if options.uppercase {
        record.mnemonic = record.mnemonic.to_uppercase();
        record.operands = record.operands.to_uppercase();
    }
}

/// Render `value` the way the decoder for `mode` prints numbers in `syntax`.
///
/// x86: negative values are `"- "` plus the magnitude, magnitudes below 10
/// are decimal, everything else is `0x…` (or `…h` for MASM, with a leading
/// `0` when the first digit is a letter). Other families always use `0x…`.
pub fn number_string(value: i64, mode: DisasmMode, syntax: Syntax) -> String {
    if mode.family() != DisasmFamily::X86 {
        return if value < 0 {
            format!("-0x{:x}", value.unsigned_abs())
        } else {
            format!("0x{:x}", value)
        };
    }

    let sign = if value < 0 { "- " } else { "" };
    let magnitude = value.unsigned_abs();
    if magnitude < 10 {
        return format!("{}{}", sign, magnitude);
    }
    match syntax {
        Syntax::Masm => {
            let hex = format!("{:x}", magnitude);
            let lead = if hex.starts_with(|c: char| c.is_ascii_alphabetic()) { "0" } else { "" };
            format!("{}{}{}h", sign, lead, hex)
        }
        _ => format!("{}0x{:x}", sign, magnitude),
    }
}

/// Mnemonic followed by the operands, if any.
pub fn opcode_full_string(record: &DisasmResult) -> String {
    record.to_string()
}

/// Build the backend serving `mode`, or `None` when no backend handles it.
pub fn create_backend(mode: DisasmMode, syntax: Syntax) -> Result<Option<Box<dyn DisasmBackend>>, DisassemblyError> {
    let backend: Box<dyn DisasmBackend> = if mode.is_capstone() {
        Box::new(CapstoneBridge::for_mode(mode, syntax)?)
    } else if mode == DisasmMode::Custom7ZipProperties {
        Box::new(SevenZipProperties::new())
    } else if mode.is_mach_command() {
        Box::new(MachCommands::new(mode))
    } else {
        debug!("no backend for mode {}", mode);
        return Ok(None);
    };

    debug!("created backend for mode {} (syntax {})", mode, syntax);
    Ok(Some(backend))
}
