//! Mach-O dynamic linker info (`LC_DYLD_INFO`) as pseudo-instructions.
//!
//! Rebase, bind and weak-bind streams are byte-coded state machines: the high
//! nibble of each byte selects the opcode, the low nibble is an immediate and
//! some opcodes are followed by a string and/or ULEB128 operands. The export
//! table is a prefix trie of nodes, decoded field by field.

use log::debug;

use super::Cursor;
use crate::packed::{read_ansi_string, read_sleb128, read_uleb128};
use crate::{Address, CancellationToken, DisasmBackend, DisasmMode, DisasmOptions, DisasmResult};

/// Longest export trie edge label.
const MAX_LABEL_LEN: usize = 256;

const EXPORT_SYMBOL_FLAGS_REEXPORT: u64 = 0x08;
const EXPORT_SYMBOL_FLAGS_STUB_AND_RESOLVER: u64 = 0x10;

const OPCODE_MASK: u8 = 0xF0;
const IMMEDIATE_MASK: u8 = 0x0F;

/// Layout of one stream opcode: which fields follow the control byte.
#[derive(Debug, Clone, Copy)]
struct OpcodeSpec {
    opcode: u8,
    name: &'static str,
    immediate: bool,
    string: bool,
    ulebs: u8,
    signed: bool,
}

const fn op(opcode: u8, name: &'static str, immediate: bool, string: bool, ulebs: u8) -> OpcodeSpec {
    OpcodeSpec { opcode, name, immediate, string, ulebs, signed: false }
}

const fn op_sleb(opcode: u8, name: &'static str) -> OpcodeSpec {
    OpcodeSpec { opcode, name, immediate: false, string: false, ulebs: 0, signed: true }
}

/// BIND_OPCODE_THREADED: sub-opcode 0 carries the ordinal table size.
const BIND_THREADED: u8 = 0xD0;

static REBASE_OPCODES: [OpcodeSpec; 9] = [
    op(0x00, "DONE", false, false, 0),
    op(0x10, "SET_TYPE_IMM", true, false, 0),
    op(0x20, "SET_SEGMENT_AND_OFFSET_ULEB", true, false, 1),
    op(0x30, "ADD_ADDR_ULEB", false, false, 1),
    op(0x40, "ADD_ADDR_IMM_SCALED", true, false, 0),
    op(0x50, "DO_REBASE_IMM_TIMES", true, false, 0),
    op(0x60, "DO_REBASE_ULEB_TIMES", false, false, 1),
    op(0x70, "DO_REBASE_ADD_ADDR_ULEB", false, false, 1),
    op(0x80, "DO_REBASE_ULEB_TIMES_SKIPPING_ULEB", false, false, 2),
];

static BIND_OPCODES: [OpcodeSpec; 14] = [
    op(0x00, "DONE", false, false, 0),
    op(0x10, "SET_DYLIB_ORDINAL_IMM", true, false, 0),
    op(0x20, "SET_DYLIB_ORDINAL_ULEB", false, false, 1),
    op(0x30, "SET_DYLIB_SPECIAL_IMM", true, false, 0),
    op(0x40, "SET_SYMBOL_TRAILING_FLAGS_IMM", true, true, 0),
    op(0x50, "SET_TYPE_IMM", true, false, 0),
    op_sleb(0x60, "SET_ADDEND_SLEB"),
    op(0x70, "SET_SEGMENT_AND_OFFSET_ULEB", true, false, 1),
    op(0x80, "ADD_ADDR_ULEB", false, false, 1),
    op(0x90, "DO_BIND", false, false, 0),
    op(0xA0, "DO_BIND_ADD_ADDR_ULEB", false, false, 1),
    op(0xB0, "DO_BIND_ADD_ADDR_IMM_SCALED", true, false, 0),
    op(0xC0, "DO_BIND_ULEB_TIMES_SKIPPING_ULEB", false, false, 2),
    op(BIND_THREADED, "THREADED", true, false, 0),
];

/// Backend for the `CustomMach*` modes.
#[derive(Debug, Clone, Copy)]
pub struct MachCommands {
    mode: DisasmMode,
}

impl MachCommands {
    pub fn new(mode: DisasmMode) -> Self {
        Self { mode }
    }

    fn opcode_table(&self) -> Option<&'static [OpcodeSpec]> {
        match self.mode {
            DisasmMode::CustomMachRebase => Some(&REBASE_OPCODES),
            DisasmMode::CustomMachBind | DisasmMode::CustomMachWeakBind => Some(&BIND_OPCODES),
            _ => None,
        }
    }
}

impl DisasmBackend for MachCommands {
    fn disasm(
        &self,
        data: &[u8],
        address: Address,
        options: &DisasmOptions,
        limit: i32,
        token: &CancellationToken,
    ) -> Vec<DisasmResult> {
        let mut cursor = Cursor::new(data, address, options, limit, token);
        if let Some(table) = self.opcode_table() {
            opcode_stream(&mut cursor, table);
        } else if self.mode == DisasmMode::CustomMachExport {
            export_trie(&mut cursor);
        } else if !data.is_empty() && !cursor.halted() {
            cursor.emit(data.len(), "ARRAY", "");
        }

        let results = cursor.finish();
        debug!("{}: {} records at {:#x}", self.mode, results.len(), address);
        results
    }

    fn mode(&self) -> DisasmMode {
        self.mode
    }
}

fn opcode_stream(cursor: &mut Cursor<'_>, table: &[OpcodeSpec]) {
    while !cursor.halted() {
        let window = cursor.window();
        let Some(&control) = window.first() else { break };
        let Some((name, size, fields)) = decode_opcode(window, table) else {
            debug!("stream stopped at opcode byte {:#04x}", control);
            cursor.fail::<()>();
            break;
        };
        cursor.emit(size, name, fields.join(", "));
        if control == 0 {
            break;
        }
    }
}

/// Decode the opcode at the start of `window`: mnemonic, byte size and
/// rendered fields. `None` for an unknown opcode or a field that does not fit.
fn decode_opcode(window: &[u8], table: &[OpcodeSpec]) -> Option<(&'static str, usize, Vec<String>)> {
    let control = *window.first()?;
    let immediate = control & IMMEDIATE_MASK;
    let spec = table.iter().find(|spec| spec.opcode == control & OPCODE_MASK)?;
    // DONE is only the whole zero byte
    if spec.opcode == 0 && control != 0 {
        return None;
    }

    let mut size = 1;
    let mut fields = Vec::new();
    if spec.immediate {
        fields.push(format!("0x{:x}", immediate));
    }
    if spec.string {
        // symbol names are bounded only by the stream
        let rest = window.get(size..)?;
        let (text, len) = read_ansi_string(rest, rest.len())?;
        fields.push(text);
        size += len;
    }
    if spec.signed {
        let value = read_sleb128(window.get(size..)?);
        if !value.is_valid {
            return None;
        }
        fields.push(signed_hex(value.value));
        size += value.byte_size;
    }
    let ulebs = if spec.opcode == BIND_THREADED && immediate == 0 { 1 } else { spec.ulebs };
    for _ in 0..ulebs {
        let value = read_uleb128(window.get(size..)?);
        if !value.is_valid {
            return None;
        }
        fields.push(format!("0x{:x}", value.value));
        size += value.byte_size;
    }
    Some((spec.name, size, fields))
}

fn signed_hex(value: i64) -> String {
    if value < 0 {
        format!("-0x{:x}", value.unsigned_abs())
    } else {
        format!("0x{:x}", value)
    }
}

fn uleb_field(cursor: &mut Cursor<'_>, name: &str) -> Option<u64> {
    let value = read_uleb128(cursor.window());
    if !value.is_valid {
        return cursor.fail();
    }
    cursor.emit(value.byte_size, name, format!("0x{:x}", value.value));
    Some(value.value)
}

fn string_field(cursor: &mut Cursor<'_>, name: &str, allow_empty: bool) -> Option<()> {
    let Some((text, len)) = read_ansi_string(cursor.window(), MAX_LABEL_LEN) else {
        return cursor.fail();
    };
    if text.is_empty() && !allow_empty {
        return cursor.fail();
    }
    cursor.emit(len, name, text);
    Some(())
}

fn export_trie(cursor: &mut Cursor<'_>) {
    while !cursor.halted() {
        if export_node(cursor).is_none() {
            break;
        }
    }
}

/// One trie node. `None` ends the walk.
fn export_node(cursor: &mut Cursor<'_>) -> Option<()> {
    let terminal_size = uleb_field(cursor, "TERMINAL_SIZE")?;
    if terminal_size != 0 {
        let flags = uleb_field(cursor, "FLAGS")?;
        if flags & EXPORT_SYMBOL_FLAGS_REEXPORT != 0 {
            uleb_field(cursor, "ORDINAL")?;
            // empty means same name as the exported symbol
            string_field(cursor, "IMPORT_NAME", true)?;
        } else {
            uleb_field(cursor, "SYMBOL_OFFSET")?;
            if flags & EXPORT_SYMBOL_FLAGS_STUB_AND_RESOLVER != 0 {
                uleb_field(cursor, "RESOLVER_OFFSET")?;
            }
        }
    }

    let children = uleb_field(cursor, "CHILD_COUNT")?;
    for _ in 0..children {
        string_field(cursor, "NODE_LABEL", false)?;
        uleb_field(cursor, "NODE_OFFSET")?;
    }
    if terminal_size == 0 && children == 0 {
        return None;
    }
    Some(())
}
