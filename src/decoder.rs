//! Capstone-based native instruction decoder.
//!
//! [`NativeDecoder`] is the single-instruction primitive the general backend
//! is written against; [`CapstoneDecoder`] implements it with detail mode on
//! and reduces capstone's per-architecture operand details to the few facts
//! the backend needs.

use std::fmt;

use capstone::arch::arm::ArmOperandType;
use capstone::arch::arm::ArchMode as ArmMode;
use capstone::arch::arm64::Arm64OperandType;
use capstone::arch::arm64::ArchMode as Arm64Mode;
use capstone::arch::mips::ArchMode as MipsMode;
use capstone::arch::mips::MipsOperand;
use capstone::arch::ppc::ArchMode as PpcMode;
use capstone::arch::ppc::PpcOperand;
use capstone::arch::riscv::ArchMode as RiscVMode;
use capstone::arch::x86::ArchMode as X86Mode;
use capstone::arch::x86::{X86OperandType, X86Reg};
use capstone::arch::ArchDetail;
use capstone::prelude::*;
use capstone::{Capstone, Endian, InsnGroupType};
use log::debug;

use crate::encoding::{x86_layout, EncodingLayout};
use crate::{Address, DisasmMode, Syntax};

/// Errors that can occur while building a decoder
#[derive(Debug, thiserror::Error)]
pub enum DecoderError {
    /// Capstone error
    #[error("Capstone error: {0}")]
    CapstoneError(#[from] capstone::Error),

    /// Mode without a capstone backend
    #[error("Unsupported mode: {0}")]
    UnsupportedMode(DisasmMode),
}

/// Why a single decode attempt produced no instruction.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NativeDecodeError {
    /// The bytes do not form an instruction
    #[error("invalid opcode")]
    InvalidOpcode,

    /// The engine could not allocate memory
    #[error("decoder out of memory")]
    OutOfMemory,

    /// Any other engine failure
    #[error("decoder failure: {0}")]
    Engine(String),
}

/// Base register of a memory operand, as far as address resolution cares.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemBase {
    None,
    InstructionPointer,
    Register,
}

/// Architecture-neutral view of one operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NativeOperand {
    Imm(i64),
    Mem {
        base: MemBase,
        has_index: bool,
        disp: i64,
        /// Access width in bytes
        size: u8,
    },
    Reg,
    Other,
}

/// One decoded instruction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NativeInsn {
    /// Engine opcode id
    pub id: u32,
    pub mnemonic: String,
    pub op_str: String,
    pub size: usize,
    /// Member of the engine's relative-branch group
    pub is_branch_relative: bool,
    pub operands: Vec<NativeOperand>,
    pub layout: EncodingLayout,
}

/// Single-instruction decode primitive.
pub trait NativeDecoder {
    /// Decode the instruction at the start of `bytes`, located at `address`.
    fn decode_one(&self, bytes: &[u8], address: Address) -> Result<NativeInsn, NativeDecodeError>;

    fn mode(&self) -> DisasmMode;
}

/// A detail-mode capstone handle for one mode.
pub struct CapstoneDecoder {
    mode: DisasmMode,
    cs: Capstone,
}

impl fmt::Debug for CapstoneDecoder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CapstoneDecoder").field("mode", &self.mode).finish()
    }
}

impl CapstoneDecoder {
    /// Create a decoder for a specific mode; `syntax` only affects x86.
    pub fn for_mode(mode: DisasmMode, syntax: Syntax) -> Result<Self, DecoderError> {
        let mut cs = match mode {
            DisasmMode::X86_16 => Self::build_x86(X86Mode::Mode16)?,
            DisasmMode::X86_32 => Self::build_x86(X86Mode::Mode32)?,
            DisasmMode::X86_64 => Self::build_x86(X86Mode::Mode64)?,
            DisasmMode::Arm => Self::build_arm(ArmMode::Arm)?,
            DisasmMode::Thumb => Self::build_arm(ArmMode::Thumb)?,
            DisasmMode::Arm64 => Self::build_aarch64()?,
            DisasmMode::Mips32 => Self::build_mips32()?,
            DisasmMode::RiscV32 => Self::build_riscv(RiscVMode::RiscV32)?,
            DisasmMode::RiscV64 => Self::build_riscv(RiscVMode::RiscV64)?,
            DisasmMode::Ppc32 => Self::build_ppc32()?,
            other => return Err(DecoderError::UnsupportedMode(other)),
        };

        if mode.x86_bitness().is_some() {
            let cs_syntax = match syntax {
                Syntax::Default | Syntax::Intel => capstone::Syntax::Intel,
                Syntax::Att => capstone::Syntax::Att,
                Syntax::Masm => capstone::Syntax::Masm,
            };
            cs.set_syntax(cs_syntax)?;
        }

        debug!("opened capstone handle for {} ({})", mode, syntax);
        Ok(Self { mode, cs })
    }

    /// Build an x86 decoder
    pub fn build_x86(mode: X86Mode) -> Result<Capstone, DecoderError> {
        Ok(Capstone::new()
            .x86()
            .mode(mode)
            .detail(true)
            .build()?)
    }

    /// Build an ARM decoder (ARM or Thumb mode)
    pub fn build_arm(mode: ArmMode) -> Result<Capstone, DecoderError> {
        Ok(Capstone::new()
            .arm()
            .mode(mode)
            .detail(true)
            .build()?)
    }

    /// Build an AArch64 decoder
    pub fn build_aarch64() -> Result<Capstone, DecoderError> {
        Ok(Capstone::new()
            .arm64()
            .mode(Arm64Mode::Arm)
            .detail(true)
            .build()?)
    }

    /// Build a MIPS32 little-endian decoder
    pub fn build_mips32() -> Result<Capstone, DecoderError> {
        Ok(Capstone::new()
            .mips()
            .mode(MipsMode::Mips32)
            .detail(true)
            .build()?)
    }

    /// Build a RISC-V decoder
    pub fn build_riscv(mode: RiscVMode) -> Result<Capstone, DecoderError> {
        Ok(Capstone::new()
            .riscv()
            .mode(mode)
            .detail(true)
            .build()?)
    }

    /// Build a big-endian PPC32 decoder
    pub fn build_ppc32() -> Result<Capstone, DecoderError> {
        Ok(Capstone::new()
            .ppc()
            .mode(PpcMode::Mode32)
            .endian(Endian::Big)
            .detail(true)
            .build()?)
    }
}

fn operands_of(arch_detail: &ArchDetail<'_>) -> Vec<NativeOperand> {
    match arch_detail {
        ArchDetail::X86Detail(x86) => x86
            .operands()
            .map(|op| match op.op_type {
                X86OperandType::Imm(value) => NativeOperand::Imm(value),
                X86OperandType::Mem(mem) => {
                    let base = match mem.base().0 {
                        0 => MemBase::None,
                        reg if reg == X86Reg::X86_REG_RIP as u16 => MemBase::InstructionPointer,
                        _ => MemBase::Register,
                    };
                    NativeOperand::Mem {
                        base,
                        has_index: mem.index().0 != 0,
                        disp: mem.disp(),
                        size: op.size,
                    }
                }
                X86OperandType::Reg(_) => NativeOperand::Reg,
                _ => NativeOperand::Other,
            })
            .collect(),
        ArchDetail::ArmDetail(arm) => arm
            .operands()
            .map(|op| match op.op_type {
                ArmOperandType::Imm(value) => NativeOperand::Imm(i64::from(value)),
                ArmOperandType::Reg(_) => NativeOperand::Reg,
                _ => NativeOperand::Other,
            })
            .collect(),
        ArchDetail::Arm64Detail(arm64) => arm64
            .operands()
            .map(|op| match op.op_type {
                Arm64OperandType::Imm(value) => NativeOperand::Imm(value),
                Arm64OperandType::Reg(_) => NativeOperand::Reg,
                _ => NativeOperand::Other,
            })
            .collect(),
        ArchDetail::MipsDetail(mips) => mips
            .operands()
            .map(|op| match op {
                MipsOperand::Imm(value) => NativeOperand::Imm(i64::from(value)),
                MipsOperand::Reg(_) => NativeOperand::Reg,
                _ => NativeOperand::Other,
            })
            .collect(),
        ArchDetail::PpcDetail(ppc) => ppc
            .operands()
            .map(|op| match op {
                PpcOperand::Imm(value) => NativeOperand::Imm(i64::from(value)),
                PpcOperand::Reg(_) => NativeOperand::Reg,
                _ => NativeOperand::Other,
            })
            .collect(),
        _ => Vec::new(),
    }
}

impl NativeDecoder for CapstoneDecoder {
    fn decode_one(&self, bytes: &[u8], address: Address) -> Result<NativeInsn, NativeDecodeError> {
        let insns = self.cs.disasm_count(bytes, address, 1).map_err(|err| match err {
            capstone::Error::OutOfMemory => NativeDecodeError::OutOfMemory,
            other => NativeDecodeError::Engine(other.to_string()),
        })?;
        let insn = insns.iter().next().ok_or(NativeDecodeError::InvalidOpcode)?;

        let detail = self
            .cs
            .insn_detail(&insn)
            .map_err(|err| NativeDecodeError::Engine(err.to_string()))?;
        let relative_group = InsnGroupType::CS_GRP_BRANCH_RELATIVE as u8;
        let is_branch_relative = detail.groups().iter().any(|group| group.0 == relative_group);

        let layout = match self.mode.x86_bitness() {
            Some(bitness) => x86_layout(insn.bytes(), bitness),
            None => EncodingLayout::default(),
        };

        Ok(NativeInsn {
            id: insn.id().0,
            mnemonic: insn.mnemonic().unwrap_or("").to_string(),
            op_str: insn.op_str().unwrap_or("").to_string(),
            size: insn.bytes().len(),
            is_branch_relative,
            operands: operands_of(&detail.arch_detail()),
            layout,
        })
    }

    fn mode(&self) -> DisasmMode {
        self.mode
    }
}

impl fmt::Display for CapstoneDecoder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CapstoneDecoder::{}", self.mode)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use capstone::arch::x86::X86Insn;

    #[test]
    fn test_mode_mapping() {
        let decoder = CapstoneDecoder::for_mode(DisasmMode::X86_64, Syntax::Default).unwrap();
        assert_eq!(decoder.mode(), DisasmMode::X86_64);
        assert!(matches!(
            CapstoneDecoder::for_mode(DisasmMode::CustomMachBind, Syntax::Default),
            Err(DecoderError::UnsupportedMode(DisasmMode::CustomMachBind))
        ));
    }

    #[test]
    fn test_x86_decode() {
        // mov eax, 1
        let bytes = [0xb8, 0x01, 0x00, 0x00, 0x00];
        let decoder = CapstoneDecoder::for_mode(DisasmMode::X86_32, Syntax::Intel).unwrap();

        let insn = decoder.decode_one(&bytes, 0).unwrap();
        assert_eq!(insn.mnemonic, "mov");
        assert_eq!(insn.size, 5);
        assert_eq!(insn.id, X86Insn::X86_INS_MOV as u32);
        assert_eq!(insn.layout.imm_offset, 1);
        assert_eq!(insn.layout.imm_size, 4);
        assert!(insn.operands.contains(&NativeOperand::Imm(1)));
    }

    #[test]
    fn test_relative_branch_detail() {
        // jmp +5 at 0x1000
        let decoder = CapstoneDecoder::for_mode(DisasmMode::X86_64, Syntax::Default).unwrap();
        let insn = decoder.decode_one(&[0xeb, 0x05], 0x1000).unwrap();
        assert!(insn.is_branch_relative);
        assert_eq!(insn.operands, vec![NativeOperand::Imm(0x1007)]);
    }

    #[test]
    fn test_rip_relative_operand() {
        // lea rax, [rip + 0x10]
        let decoder = CapstoneDecoder::for_mode(DisasmMode::X86_64, Syntax::Default).unwrap();
        let insn = decoder
            .decode_one(&[0x48, 0x8d, 0x05, 0x10, 0x00, 0x00, 0x00], 0x1000)
            .unwrap();
        assert!(insn.operands.iter().any(|op| matches!(
            op,
            NativeOperand::Mem { base: MemBase::InstructionPointer, has_index: false, disp: 0x10, .. }
        )));
        assert_eq!(insn.layout.disp_offset, 3);
        assert_eq!(insn.layout.disp_size, 4);
    }

    #[test]
    fn test_mips_and_ppc_operands() {
        // jr $ra
        let decoder = CapstoneDecoder::for_mode(DisasmMode::Mips32, Syntax::Default).unwrap();
        let insn = decoder.decode_one(&[0x08, 0x00, 0xe0, 0x03], 0x1000).unwrap();
        assert_eq!(insn.mnemonic, "jr");
        assert_eq!(insn.operands, vec![NativeOperand::Reg]);

        // li r3, 5
        let decoder = CapstoneDecoder::for_mode(DisasmMode::Ppc32, Syntax::Default).unwrap();
        let insn = decoder.decode_one(&[0x38, 0x60, 0x00, 0x05], 0x1000).unwrap();
        assert_eq!(insn.size, 4);
        assert!(insn.operands.contains(&NativeOperand::Imm(5)));
    }

    #[test]
    fn test_invalid_bytes() {
        // push es does not exist in 64-bit mode
        let decoder = CapstoneDecoder::for_mode(DisasmMode::X86_64, Syntax::Default).unwrap();
        assert_eq!(decoder.decode_one(&[0x06], 0), Err(NativeDecodeError::InvalidOpcode));
    }
}
