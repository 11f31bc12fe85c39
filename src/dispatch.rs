//! The dispatch core: owns the active backend and derives signatures and
//! colored text from its records.

use log::{debug, warn};

use crate::backend::{self, create_backend};
use crate::classify;
use crate::memory::{ByteSource, FileType, MemoryMap};
use crate::options::{ColorRecord, OptionStore, SYNTAX_KEY};
use crate::render::{ColorScheme, OperandGroup, TextSpan};
use crate::{
    Address, CancellationToken, DisasmBackend, DisasmFamily, DisasmMode, DisasmOptions, DisasmResult,
    DisassemblyError, RelType, SignatureRecord, SignatureType, Syntax, MAX_OPCODE_SIZE,
};

/// Replace `size` bytes starting at byte `offset` of a hex string with
/// `wild`, two characters per byte. Out of range parts are ignored.
pub fn replace_wild_char(hex: &str, offset: usize, size: usize, wild: char) -> String {
    let start = offset.saturating_mul(2);
    let end = start.saturating_add(size.saturating_mul(2));
    hex.chars()
        .enumerate()
        .map(|(i, c)| if (start..end).contains(&i) { wild } else { c })
        .collect()
}

fn hex_string(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

fn mask_operands(hex: String, record: &DisasmResult) -> String {
    let mut hex = hex;
    if record.disp_size > 0 {
        hex = replace_wild_char(&hex, record.disp_offset as usize, record.disp_size as usize, '.');
    }
    if record.imm_size > 0 {
        hex = replace_wild_char(&hex, record.imm_offset as usize, record.imm_size as usize, '.');
    }
    hex
}

/// Address of the instruction after `record` for a signature walk.
///
/// DOS `.com` images wrap to 16 bits once a 2-byte immediate carried the
/// address past 0xFFFF.
fn next_signature_address(map: &MemoryMap, record: &DisasmResult, signature_type: SignatureType) -> Address {
    let next = match signature_type {
        SignatureType::Full | SignatureType::Mask => record.address.wrapping_add(record.size as Address),
        SignatureType::Rel => record.next_address,
    };
    if map.file_type() == FileType::Com && record.imm_size == 2 && next > 0xFFFF {
        next & 0xFFFF
    } else {
        next
    }
}

/// Front door of the library: one active decode mode at a time.
pub struct DisasmCore {
    mode: DisasmMode,
    syntax: Syntax,
    backend: Option<Box<dyn DisasmBackend>>,
    colors: ColorScheme,
}

impl Default for DisasmCore {
    fn default() -> Self {
        Self::new()
    }
}

impl DisasmCore {
    /// A core with no mode selected; every decode returns invalid records.
    pub fn new() -> Self {
        Self {
            mode: DisasmMode::Unknown,
            syntax: Syntax::Default,
            backend: None,
            colors: ColorScheme::default(),
        }
    }

    pub fn with_mode(mode: DisasmMode) -> Result<Self, DisassemblyError> {
        let mut core = Self::new();
        core.set_mode(mode)?;
        Ok(core)
    }

    pub fn mode(&self) -> DisasmMode {
        self.mode
    }

    pub fn family(&self) -> DisasmFamily {
        self.mode.family()
    }

    pub fn syntax(&self) -> Syntax {
        self.syntax
    }

    /// Switch to `mode`. The previous backend is dropped before the new one
    /// is built; if building fails the core is left without a mode.
    pub fn set_mode(&mut self, mode: DisasmMode) -> Result<(), DisassemblyError> {
        if mode == self.mode && (self.backend.is_some() || mode == DisasmMode::Unknown) {
            return Ok(());
        }
        self.rebuild(mode)
    }

    /// Change the text syntax, rebuilding the backend for the current mode.
    pub fn set_syntax(&mut self, syntax: Syntax) -> Result<(), DisassemblyError> {
        if syntax == self.syntax {
            return Ok(());
        }
        self.syntax = syntax;
        self.rebuild(self.mode)
    }

    fn rebuild(&mut self, mode: DisasmMode) -> Result<(), DisassemblyError> {
        self.backend = None;
        self.mode = DisasmMode::Unknown;
        self.colors = self.colors.with_family(DisasmFamily::Unknown, self.syntax);

        let backend = create_backend(mode, self.syntax).inspect_err(|e| {
            warn!("cannot build a backend for {}: {}", mode, e);
        })?;
        self.backend = backend;
        self.mode = mode;
        self.colors = self.colors.with_family(mode.family(), self.syntax);
        debug!("mode set to {} ({} syntax)", mode, self.syntax);
        Ok(())
    }

    /// Apply `Disasm/Syntax` and reload every color option from `store`.
    pub fn set_options(&mut self, store: &dyn OptionStore) -> Result<(), DisassemblyError> {
        let syntax = match store.get_value(SYNTAX_KEY) {
            Some(value) => value.parse().unwrap_or_else(|e| {
                warn!("{}, using the default syntax", e);
                Syntax::Default
            }),
            None => Syntax::Default,
        };
        self.set_syntax(syntax)?;
        self.colors = ColorScheme::from_options(store, self.family(), self.syntax);
        Ok(())
    }

    /// Decode one unit at `address`. An invalid record stamped with `address`
    /// is returned when nothing could be decoded.
    pub fn disasm(&self, data: &[u8], address: Address, options: &DisasmOptions) -> DisasmResult {
        self.disasm_list(data, address, options, 1, None)
            .into_iter()
            .next()
            .unwrap_or_else(|| DisasmResult::invalid(address))
    }

    /// Decode `data` with the active backend.
    ///
    /// `limit`: 0 stops at the first invalid unit, negative is unlimited,
    /// positive caps the number of records.
    pub fn disasm_list(
        &self,
        data: &[u8],
        address: Address,
        options: &DisasmOptions,
        limit: i32,
        token: Option<&CancellationToken>,
    ) -> Vec<DisasmResult> {
        let Some(backend) = self.backend.as_ref() else {
            return Vec::new();
        };
        match token {
            Some(token) => backend.disasm(data, address, options, limit, token),
            None => backend.disasm(data, address, options, limit, &CancellationToken::new()),
        }
    }

    /// Read up to [`MAX_OPCODE_SIZE`] bytes at `offset` and decode one unit.
    pub fn disasm_at<S: ByteSource + ?Sized>(
        &self,
        device: &S,
        offset: u64,
        address: Address,
        options: &DisasmOptions,
    ) -> DisasmResult {
        let data = device.read_at(offset, MAX_OPCODE_SIZE);
        self.disasm(&data, address, options)
    }

    /// Decode one instruction for a signature walk, with its bytes.
    fn signature_step<S: ByteSource + ?Sized>(
        &self,
        device: &S,
        offset: u64,
        address: Address,
    ) -> Option<(DisasmResult, Vec<u8>)> {
        let mut data = device.read_at(offset, MAX_OPCODE_SIZE);
        let record = self.disasm(&data, address, &DisasmOptions::default());
        if !record.is_valid || record.size == 0 || record.size > data.len() {
            return None;
        }
        data.truncate(record.size);
        Some((record, data))
    }

    /// Whether a REL signature keeps `record`'s immediate as `$$`.
    fn is_relative_branch(&self, record: &DisasmResult) -> bool {
        record.rel_type != RelType::None && classify::is_branch_opcode(self.family(), record.opcode)
    }

    /// Hex signature of up to `count` instructions starting at `address`.
    ///
    /// The walk stops early at an unmapped address or an invalid instruction.
    pub fn get_signature<S: ByteSource + ?Sized>(
        &self,
        device: &S,
        map: &MemoryMap,
        address: Address,
        signature_type: SignatureType,
        count: usize,
    ) -> String {
        let mut signature = String::new();
        let mut address = address;

        for _ in 0..count {
            let Some(offset) = map.address_to_offset(address) else {
                break;
            };
            let Some((record, bytes)) = self.signature_step(device, offset, address) else {
                break;
            };

            let hex = hex_string(&bytes);
            let hex = match signature_type {
                SignatureType::Full => hex,
                SignatureType::Mask => mask_operands(hex, &record),
                SignatureType::Rel if self.is_relative_branch(&record) => {
                    replace_wild_char(&hex, record.imm_offset as usize, record.imm_size as usize, '$')
                }
                SignatureType::Rel => mask_operands(hex, &record),
            };
            signature.push_str(&hex);
            address = next_signature_address(map, &record, signature_type);
        }

        signature
    }

    /// The signature walk as structured records, starting at file `offset`.
    ///
    /// Stops without emitting when an instruction's last byte falls outside
    /// the mapped file range.
    pub fn get_signature_records<S: ByteSource + ?Sized>(
        &self,
        device: &S,
        map: &MemoryMap,
        offset: u64,
        count: usize,
        signature_type: SignatureType,
    ) -> Vec<SignatureRecord> {
        let mut records = Vec::new();
        let mut offset = Some(offset);

        for _ in 0..count {
            let Some(current) = offset else { break };
            let Some(address) = map.offset_to_address(current) else {
                break;
            };
            let Some((record, bytes)) = self.signature_step(device, current, address) else {
                break;
            };
            if !map.is_offset_valid(current + record.size as u64 - 1) {
                break;
            }

            let next = next_signature_address(map, &record, signature_type);
            records.push(SignatureRecord {
                address,
                opcode: record.to_string(),
                bytes,
                disp_offset: record.disp_offset,
                disp_size: record.disp_size,
                imm_offset: record.imm_offset,
                imm_size: record.imm_size,
                is_const: signature_type == SignatureType::Rel && record.is_const,
            });
            offset = map.address_to_offset(next);
        }

        records
    }

    /// See [`replace_wild_char`].
    pub fn replace_wild_char(&self, hex: &str, offset: usize, size: usize, wild: char) -> String {
        replace_wild_char(hex, offset, size, wild)
    }

    /// Render `value` the way the active decoder prints numbers.
    pub fn number_string(&self, value: i64) -> String {
        backend::number_string(value, self.mode, self.syntax)
    }

    pub fn color_scheme(&self) -> &ColorScheme {
        &self.colors
    }

    pub fn color_record(&self, group: OperandGroup) -> ColorRecord {
        self.colors.color_record(group)
    }

    pub fn opcode_color(&self, opcode: u32) -> ColorRecord {
        self.colors.opcode_color(opcode)
    }

    pub fn operand_color(&self, text: &str) -> ColorRecord {
        self.colors.operand_color(text)
    }

    pub fn text_spans(&self, result: &DisasmResult) -> Vec<TextSpan> {
        self.colors.text_spans(result)
    }
}
