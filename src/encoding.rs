//! x86 instruction layout: where the displacement and immediate bytes sit
//! inside an already decoded instruction.
//!
//! Capstone reports operand values but not their byte positions, so the
//! layout is recovered from the encoding itself: legacy prefixes, REX,
//! VEX/EVEX/XOP, the opcode map, ModRM, SIB and displacement. Whatever is
//! left after the displacement is the immediate, except for the few opcodes
//! whose trailing bytes the decoder reports differently (`enter` and far
//! pointers).

/// Byte offsets of the displacement and immediate fields, 0 when absent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EncodingLayout {
    pub disp_offset: u32,
    pub disp_size: u32,
    pub imm_offset: u32,
    pub imm_size: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OpcodeMap {
    OneByte,
    TwoByte,
    ThreeByte38,
    ThreeByte3A,
    /// 0F 0F: ModRM operands followed by an opcode suffix byte
    Amd3DNow,
}

/// Compute the layout of `insn`, the exact bytes of one instruction decoded
/// with a default operand width of `bitness` (16, 32 or 64).
pub fn x86_layout(insn: &[u8], bitness: u8) -> EncodingLayout {
    layout_inner(insn, bitness).unwrap_or_default()
}

fn layout_inner(code: &[u8], bitness: u8) -> Option<EncodingLayout> {
    let len = code.len();
    let mut pos = 0usize;
    let mut address_override = false;
    let mut operand_override = false;

    while pos < len {
        match code[pos] {
            0xF0 | 0xF2 | 0xF3 | 0x2E | 0x36 | 0x3E | 0x26 | 0x64 | 0x65 => pos += 1,
            0x66 => {
                operand_override = true;
                pos += 1;
            }
            0x67 => {
                address_override = true;
                pos += 1;
            }
            // fwait folded into the following x87 instruction
            0x9B if pos + 1 < len => pos += 1,
            _ => break,
        }
    }

    if bitness == 64 && (0x40..=0x4F).contains(code.get(pos)?) {
        pos += 1;
    }

    let address_size: u32 = match (bitness, address_override) {
        (16, false) | (32, true) => 2,
        (64, false) => 8,
        _ => 4,
    };

    let lead = *code.get(pos)?;
    let next = code.get(pos + 1).copied();
    let vex_allowed = bitness == 64 || next.is_some_and(|b| b >= 0xC0);

    let (map, opcode) = match lead {
        0xC5 if vex_allowed => {
            pos += 2;
            (OpcodeMap::TwoByte, *code.get(pos)?)
        }
        0xC4 if vex_allowed => {
            let map = vex_map(next? & 0x1F)?;
            pos += 3;
            (map, *code.get(pos)?)
        }
        0x62 if vex_allowed => {
            let map = vex_map(next? & 0x07)?;
            pos += 4;
            (map, *code.get(pos)?)
        }
        0x8F if next.is_some_and(|b| b & 0x1F >= 8) => {
            // XOP, always followed by ModRM
            pos += 3;
            (OpcodeMap::ThreeByte3A, *code.get(pos)?)
        }
        0x0F => match next? {
            0x38 => {
                pos += 2;
                (OpcodeMap::ThreeByte38, *code.get(pos)?)
            }
            0x3A => {
                pos += 2;
                (OpcodeMap::ThreeByte3A, *code.get(pos)?)
            }
            0x0F => {
                pos += 1;
                (OpcodeMap::Amd3DNow, 0x0F)
            }
            op => {
                pos += 1;
                (OpcodeMap::TwoByte, op)
            }
        },
        op => (OpcodeMap::OneByte, op),
    };
    pos += 1;

    let mut layout = EncodingLayout::default();

    if map == OpcodeMap::OneByte {
        match opcode {
            // enter imm16, imm8: only the nesting level is reported
            0xC8 if pos + 3 == len => {
                layout.imm_offset = (pos + 2) as u32;
                layout.imm_size = 1;
                return Some(layout);
            }
            // call far / jmp far ptr16:16 or ptr16:32: the selector position, no size
            0x9A | 0xEA if bitness != 64 => {
                let offset_size = match (bitness, operand_override) {
                    (16, false) | (32, true) => 2,
                    _ => 4,
                };
                if pos + offset_size + 2 != len {
                    return None;
                }
                layout.imm_offset = (pos + offset_size) as u32;
                return Some(layout);
            }
            _ => {}
        }
    }

    if map == OpcodeMap::OneByte && (0xA0..=0xA3).contains(&opcode) {
        layout.disp_offset = pos as u32;
        layout.disp_size = address_size;
        pos += address_size as usize;
    } else if has_modrm(map, opcode, bitness) {
        let modrm = *code.get(pos)?;
        pos += 1;
        let md = modrm >> 6;
        let rm = modrm & 0x07;
        // mov to/from control and debug registers ignores the mod field
        let register_only = map == OpcodeMap::TwoByte && (0x20..=0x23).contains(&opcode);

        if md != 3 && !register_only {
            let disp = if address_size == 2 {
                match (md, rm) {
                    (0, 6) => 2,
                    (1, _) => 1,
                    (2, _) => 2,
                    _ => 0,
                }
            } else {
                let mut sib_disp = 0;
                if rm == 4 {
                    let sib = *code.get(pos)?;
                    pos += 1;
                    if md == 0 && sib & 0x07 == 5 {
                        sib_disp = 4;
                    }
                }
                match md {
                    0 if rm == 5 => 4,
                    0 => sib_disp,
                    1 => 1,
                    _ => 4,
                }
            };
            if disp > 0 {
                layout.disp_offset = pos as u32;
                layout.disp_size = disp;
                pos += disp as usize;
            }
        }
    }

    if pos > len {
        return None;
    }
    if map != OpcodeMap::Amd3DNow && pos < len {
        layout.imm_offset = pos as u32;
        layout.imm_size = (len - pos) as u32;
    }

    Some(layout)
}

fn vex_map(select: u8) -> Option<OpcodeMap> {
    match select {
        1 => Some(OpcodeMap::TwoByte),
        2 => Some(OpcodeMap::ThreeByte38),
        3 => Some(OpcodeMap::ThreeByte3A),
        _ => None,
    }
}

fn has_modrm(map: OpcodeMap, opcode: u8, bitness: u8) -> bool {
    match map {
        OpcodeMap::OneByte => match opcode {
            0x00..=0x3F => opcode & 0x07 < 4,
            0x62 => bitness != 64,
            0x63 | 0x69 | 0x6B => true,
            0x80..=0x8F => true,
            0xC0 | 0xC1 | 0xC4..=0xC7 => true,
            0xD0..=0xD3 | 0xD8..=0xDF => true,
            0xF6 | 0xF7 | 0xFE | 0xFF => true,
            _ => false,
        },
        OpcodeMap::TwoByte => !matches!(
            opcode,
            0x05..=0x09 | 0x0B | 0x0E | 0x30..=0x37 | 0x77 | 0x80..=0x8F | 0xA0..=0xA2 | 0xA8..=0xAA | 0xC8..=0xCF
        ),
        OpcodeMap::ThreeByte38 | OpcodeMap::ThreeByte3A | OpcodeMap::Amd3DNow => true,
    }
}
