//! General decoder backend on top of a [`NativeDecoder`].
//!
//! Each decoded instruction becomes one [`DisasmResult`] with its branch
//! classification, relative-branch target, resolved memory reference and
//! displacement/immediate byte offsets.

use capstone::arch::x86::X86Insn;
use log::{debug, trace};

use super::{number_string, DecodeState};
use crate::classify;
use crate::decoder::{CapstoneDecoder, DecoderError, MemBase, NativeDecodeError, NativeDecoder, NativeInsn, NativeOperand};
use crate::{
    Address, CancellationToken, DisasmBackend, DisasmFamily, DisasmMode, DisasmOptions, DisasmResult, MemType, RelType,
    Syntax,
};

/// Backend driving a native decoder one instruction at a time.
#[derive(Debug)]
pub struct CapstoneBridge<D: NativeDecoder = CapstoneDecoder> {
    decoder: D,
    family: DisasmFamily,
    syntax: Syntax,
}

impl CapstoneBridge<CapstoneDecoder> {
    /// Open a capstone handle for `mode`.
    pub fn for_mode(mode: DisasmMode, syntax: Syntax) -> Result<Self, DecoderError> {
        Ok(Self::with_decoder(CapstoneDecoder::for_mode(mode, syntax)?, syntax))
    }
}

impl<D: NativeDecoder> CapstoneBridge<D> {
    pub fn with_decoder(decoder: D, syntax: Syntax) -> Self {
        let family = decoder.mode().family();
        Self { decoder, family, syntax }
    }

    fn number(&self, value: i64) -> String {
        number_string(value, self.decoder.mode(), self.syntax)
    }

    /// Truncate an absolute address to the address width of 16/32-bit x86.
    fn wrap_address(&self, value: u64) -> u64 {
        match self.decoder.mode().x86_bitness() {
            Some(16) => value & 0xffff,
            Some(32) => value & 0xffff_ffff,
            _ => value,
        }
    }

    /// Replace `rip + disp` (or `disp(%rip)`) with the resolved address.
    /// Operand text without the expected pattern is returned unchanged.
    fn rewrite_rip_operand(&self, op_str: &str, disp: i64, target: Address) -> String {
        let pattern = match self.syntax {
            Syntax::Att => {
                let magnitude = self.number(disp.unsigned_abs() as i64);
                let sign = if disp < 0 { "-" } else { "" };
                format!("{}{}(%rip)", sign, magnitude)
            }
            _ if disp < 0 => format!("rip {}", self.number(disp)),
            _ => format!("rip + {}", self.number(disp)),
        };
        op_str.replacen(&pattern, &self.number(target as i64), 1)
    }

    fn record_for(&self, insn: NativeInsn, address: Address) -> DisasmResult {
        let family = self.family;
        let mut record = DisasmResult::new(address, insn.size, insn.mnemonic, insn.op_str);
        record.opcode = insn.id;
        record.is_ret = classify::is_ret_opcode(family, insn.id);
        record.is_call = classify::is_call_opcode(family, insn.id);
        record.is_jmp = classify::is_jump_opcode(family, insn.id);
        record.is_cond_jmp = classify::is_cond_jump_opcode(family, insn.id);

        if insn.is_branch_relative {
            let target = insn.operands.iter().find_map(|op| match op {
                NativeOperand::Imm(value) => Some(*value as u64),
                _ => None,
            });
            if let Some(target) = target {
                record.rel_type = if record.is_call {
                    RelType::Call
                } else if record.is_jmp {
                    RelType::JmpUncond
                } else if record.is_cond_jmp {
                    RelType::JmpCond
                } else {
                    RelType::Jmp
                };
                record.xref_to_relative = target;
                record.next_address = target;
                record.is_const = true;
            }
        }

        if family == DisasmFamily::X86 {
            let is_lea = insn.id == X86Insn::X86_INS_LEA as u32;
            for op in &insn.operands {
                let NativeOperand::Mem { base, has_index: false, disp, size } = *op else {
                    continue;
                };
                let memory_size = if is_lea { 0 } else { u32::from(size) };
                match base {
                    MemBase::None => {
                        record.mem_type = MemType::Read;
                        record.xref_to_memory = self.wrap_address(disp as u64);
                        record.memory_size = memory_size;
                        break;
                    }
                    MemBase::InstructionPointer => {
                        let target = address.wrapping_add(insn.size as u64).wrapping_add(disp as u64);
                        record.mem_type = MemType::Read;
                        record.xref_to_memory = target;
                        record.memory_size = memory_size;
                        record.operands = self.rewrite_rip_operand(&record.operands, disp, target);
                        break;
                    }
                    MemBase::Register => {}
                }
            }
        }

        record.disp_offset = insn.layout.disp_offset;
        record.disp_size = insn.layout.disp_size;
        record.imm_offset = insn.layout.imm_offset;
        record.imm_size = insn.layout.imm_size;
        record
    }

    /// Minimum-advance placeholder for bytes the decoder rejected.
    fn invalid_record(&self, window: &[u8], address: Address) -> DisasmResult {
        let mut record = match self.family {
            DisasmFamily::X86 => {
                let byte = window.first().copied().unwrap_or(0);
                DisasmResult::new(address, 1, "db", self.number(i64::from(byte)))
            }
            DisasmFamily::Arm => DisasmResult::new(address, 2, "Invalid opcode", ""),
            _ => DisasmResult::new(address, 4, "Invalid opcode", ""),
        };
        record.is_valid = false;
        record
    }
}

impl<D: NativeDecoder> DisasmBackend for CapstoneBridge<D> {
    fn disasm(
        &self,
        data: &[u8],
        address: Address,
        options: &DisasmOptions,
        limit: i32,
        token: &CancellationToken,
    ) -> Vec<DisasmResult> {
        let mut state = DecodeState::new(address, data.len(), limit);
        let mut results = Vec::new();

        while !state.stop && !token.is_cancelled() {
            let window = state.remaining(data);
            let current = state.current_address();

            match self.decoder.decode_one(window, current) {
                Ok(insn) if insn.size > 0 => {
                    let record = self.record_for(insn, current);
                    state.admit(&mut results, record, options);
                }
                Ok(_) => state.stop = true,
                Err(NativeDecodeError::OutOfMemory) => {
                    let mut fault = DisasmResult::invalid(current);
                    fault.is_mem_error = true;
                    state.admit_fault(&mut results, fault);
                }
                Err(err) => {
                    trace!("{} at {:#x}", err, current);
                    let record = self.invalid_record(window, current);
                    state.admit(&mut results, record, options);
                }
            }
        }

        debug!(
            "{}: {} records from {} bytes at {:#x}",
            self.decoder.mode(),
            results.len(),
            data.len(),
            address
        );
        results
    }

    fn mode(&self) -> DisasmMode {
        self.decoder.mode()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoding::EncodingLayout;
    use std::cell::Cell;

    /// Replays a fixed instruction for every call.
    struct FixedDecoder {
        mode: DisasmMode,
        result: Result<NativeInsn, NativeDecodeError>,
        calls: Cell<usize>,
    }

    impl NativeDecoder for FixedDecoder {
        fn decode_one(&self, _bytes: &[u8], _address: Address) -> Result<NativeInsn, NativeDecodeError> {
            self.calls.set(self.calls.get() + 1);
            self.result.clone()
        }

        fn mode(&self) -> DisasmMode {
            self.mode
        }
    }

    fn fixed(mode: DisasmMode, result: Result<NativeInsn, NativeDecodeError>) -> FixedDecoder {
        FixedDecoder { mode, result, calls: Cell::new(0) }
    }

    fn rip_load(op_str: &str, disp: i64) -> NativeInsn {
        NativeInsn {
            id: X86Insn::X86_INS_MOV as u32,
            mnemonic: "mov".to_string(),
            op_str: op_str.to_string(),
            size: 7,
            is_branch_relative: false,
            operands: vec![
                NativeOperand::Reg,
                NativeOperand::Mem { base: MemBase::InstructionPointer, has_index: false, disp, size: 8 },
            ],
            layout: EncodingLayout { disp_offset: 3, disp_size: 4, imm_offset: 0, imm_size: 0 },
        }
    }

    fn decode_first<D: NativeDecoder>(bridge: &CapstoneBridge<D>, data: &[u8], address: Address) -> DisasmResult {
        bridge
            .disasm(data, address, &DisasmOptions::default(), 1, &CancellationToken::new())
            .remove(0)
    }

    #[test]
    fn test_rip_relative_rewrite_intel() {
        let bridge = CapstoneBridge::with_decoder(
            fixed(DisasmMode::X86_64, Ok(rip_load("rax, qword ptr [rip + 0x10]", 0x10))),
            Syntax::Intel,
        );
        let record = decode_first(&bridge, &[0; 7], 0x1000);
        assert_eq!(record.mem_type, MemType::Read);
        assert_eq!(record.xref_to_memory, 0x1017);
        assert_eq!(record.memory_size, 8);
        assert_eq!(record.operands, "rax, qword ptr [0x1017]");
        assert_eq!(record.disp_offset, 3);
        assert_eq!(record.disp_size, 4);
    }

    #[test]
    fn test_rip_relative_rewrite_negative_and_att() {
        let bridge = CapstoneBridge::with_decoder(
            fixed(DisasmMode::X86_64, Ok(rip_load("rax, qword ptr [rip - 0x20]", -0x20))),
            Syntax::Default,
        );
        let record = decode_first(&bridge, &[0; 7], 0x1000);
        assert_eq!(record.xref_to_memory, 0xfe7);
        assert_eq!(record.operands, "rax, qword ptr [0xfe7]");

        let bridge = CapstoneBridge::with_decoder(
            fixed(DisasmMode::X86_64, Ok(rip_load("0x10(%rip), %rax", 0x10))),
            Syntax::Att,
        );
        let record = decode_first(&bridge, &[0; 7], 0x1000);
        assert_eq!(record.xref_to_memory, 0x1017);
        assert_eq!(record.operands, "0x1017, %rax");
    }

    #[test]
    fn test_rip_rewrite_without_pattern_keeps_text() {
        let bridge = CapstoneBridge::with_decoder(
            fixed(DisasmMode::X86_64, Ok(rip_load("rax, qword ptr [rip]", 0))),
            Syntax::Intel,
        );
        let record = decode_first(&bridge, &[0; 7], 0x1000);
        assert_eq!(record.xref_to_memory, 0x1007);
        assert_eq!(record.operands, "rax, qword ptr [rip]");
    }

    #[test]
    fn test_lea_has_no_memory_size() {
        let mut insn = rip_load("rax, [rip + 0x10]", 0x10);
        insn.id = X86Insn::X86_INS_LEA as u32;
        let bridge = CapstoneBridge::with_decoder(fixed(DisasmMode::X86_64, Ok(insn)), Syntax::Intel);
        let record = decode_first(&bridge, &[0; 7], 0x1000);
        assert_eq!(record.memory_size, 0);
        assert_eq!(record.operands, "rax, [0x1017]");
    }

    #[test]
    fn test_relative_call_priority() {
        let insn = NativeInsn {
            id: X86Insn::X86_INS_CALL as u32,
            mnemonic: "call".to_string(),
            op_str: "0x2000".to_string(),
            size: 5,
            is_branch_relative: true,
            operands: vec![NativeOperand::Imm(0x2000)],
            layout: EncodingLayout { disp_offset: 0, disp_size: 0, imm_offset: 1, imm_size: 4 },
        };
        let bridge = CapstoneBridge::with_decoder(fixed(DisasmMode::X86_32, Ok(insn)), Syntax::Default);
        let record = decode_first(&bridge, &[0; 5], 0x1000);
        assert!(record.is_call);
        assert_eq!(record.rel_type, RelType::Call);
        assert_eq!(record.xref_to_relative, 0x2000);
        assert_eq!(record.next_address, 0x2000);
        assert!(record.is_const);
    }

    #[test]
    fn test_first_memory_operand_wins() {
        // movsb-like form with two absolute memory operands
        let insn = NativeInsn {
            id: X86Insn::X86_INS_MOV as u32,
            mnemonic: "mov".to_string(),
            op_str: "byte ptr [0x10], byte ptr [0x20]".to_string(),
            size: 6,
            is_branch_relative: false,
            operands: vec![
                NativeOperand::Mem { base: MemBase::Register, has_index: false, disp: 0x30, size: 1 },
                NativeOperand::Mem { base: MemBase::None, has_index: false, disp: 0x10, size: 1 },
                NativeOperand::Mem { base: MemBase::None, has_index: false, disp: 0x20, size: 2 },
            ],
            layout: EncodingLayout::default(),
        };
        let bridge = CapstoneBridge::with_decoder(fixed(DisasmMode::X86_32, Ok(insn)), Syntax::Intel);
        let record = decode_first(&bridge, &[0; 6], 0x1000);
        assert_eq!(record.xref_to_memory, 0x10);
        assert_eq!(record.memory_size, 1);
    }

    #[test]
    fn test_capstone_mips_and_ppc_classification() {
        let bridge = CapstoneBridge::for_mode(DisasmMode::Mips32, Syntax::Default).unwrap();
        let record = decode_first(&bridge, &[0x08, 0x00, 0xe0, 0x03], 0x1000);
        assert_eq!(record.to_string(), "jr $ra");
        assert!(record.is_ret);
        assert!(!record.is_jmp);

        // bl 0x1010
        let bridge = CapstoneBridge::for_mode(DisasmMode::Ppc32, Syntax::Default).unwrap();
        let record = decode_first(&bridge, &[0x48, 0x00, 0x00, 0x11], 0x1000);
        assert_eq!(record.mnemonic, "bl");
        assert!(record.is_call);
        assert!(!record.is_ret);

        // blr
        let record = decode_first(&bridge, &[0x4e, 0x80, 0x00, 0x20], 0x1000);
        assert!(record.is_ret);
    }

    #[test]
    fn test_memory_fault_is_terminal() {
        let decoder = fixed(DisasmMode::X86_64, Err(NativeDecodeError::OutOfMemory));
        let bridge = CapstoneBridge::with_decoder(decoder, Syntax::Default);
        let results = bridge.disasm(&[0x90; 8], 0x1000, &DisasmOptions::default(), -1, &CancellationToken::new());
        assert_eq!(results.len(), 1);
        assert!(results[0].is_mem_error);
        assert_eq!(results[0].size, 0);
        assert_eq!(bridge.decoder.calls.get(), 1);
    }

    #[test]
    fn test_invalid_placeholders() {
        let bridge = CapstoneBridge::with_decoder(fixed(DisasmMode::Arm, Err(NativeDecodeError::InvalidOpcode)), Syntax::Default);
        let results = bridge.disasm(&[0xff; 4], 0, &DisasmOptions::default(), -1, &CancellationToken::new());
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|r| !r.is_valid && r.size == 2 && r.mnemonic == "Invalid opcode"));

        let bridge = CapstoneBridge::with_decoder(fixed(DisasmMode::Arm64, Err(NativeDecodeError::InvalidOpcode)), Syntax::Default);
        let results = bridge.disasm(&[0xff; 4], 0, &DisasmOptions::default(), -1, &CancellationToken::new());
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].size, 4);
    }

    #[test]
    fn test_cancelled_token_returns_nothing() {
        let token = CancellationToken::new();
        token.cancel();
        let bridge = CapstoneBridge::with_decoder(fixed(DisasmMode::X86_64, Err(NativeDecodeError::InvalidOpcode)), Syntax::Default);
        assert!(bridge.disasm(&[0x90; 4], 0, &DisasmOptions::default(), -1, &token).is_empty());
        assert_eq!(bridge.decoder.calls.get(), 0);
    }

    #[test]
    fn test_capstone_nop() {
        let bridge = CapstoneBridge::for_mode(DisasmMode::X86_64, Syntax::Default).unwrap();
        let results = bridge.disasm(&[0x90], 0x1000, &DisasmOptions::default(), -1, &CancellationToken::new());
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].mnemonic, "nop");
        assert_eq!(results[0].size, 1);
        assert_eq!(results[0].next_address, 0x1001);
        assert!(results[0].is_valid);
    }

    #[test]
    fn test_capstone_jump_target() {
        let bridge = CapstoneBridge::for_mode(DisasmMode::X86_64, Syntax::Default).unwrap();
        let record = decode_first(&bridge, &[0xeb, 0x05], 0x1000);
        assert!(record.is_jmp);
        assert_eq!(record.rel_type, RelType::JmpUncond);
        assert_eq!(record.next_address, 0x1007);
        assert_eq!(record.imm_offset, 1);
        assert_eq!(record.imm_size, 1);
    }

    #[test]
    fn test_capstone_rip_relative_independent_of_syntax() {
        let code = [0x48, 0x8b, 0x05, 0x10, 0x00, 0x00, 0x00];
        for syntax in [Syntax::Default, Syntax::Intel, Syntax::Att] {
            let bridge = CapstoneBridge::for_mode(DisasmMode::X86_64, syntax).unwrap();
            let record = decode_first(&bridge, &code, 0x1000);
            assert_eq!(record.xref_to_memory, 0x1017, "syntax {}", syntax);
            assert_eq!(record.mem_type, MemType::Read);
        }
    }

    #[test]
    fn test_capstone_invalid_byte() {
        let bridge = CapstoneBridge::for_mode(DisasmMode::X86_64, Syntax::Default).unwrap();
        let results = bridge.disasm(&[0x06, 0x90], 0, &DisasmOptions::default(), -1, &CancellationToken::new());
        assert_eq!(results.len(), 2);
        assert!(!results[0].is_valid);
        assert_eq!(results[0].mnemonic, "db");
        assert_eq!(results[0].operands, "6");
        assert_eq!(results[1].mnemonic, "nop");

        let results = bridge.disasm(&[0x06, 0x90], 0, &DisasmOptions::default(), 0, &CancellationToken::new());
        assert!(results.is_empty());
    }
}
