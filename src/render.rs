//! Color classification of disassembly text.
//!
//! A [`ColorScheme`] is built from an option store for one architecture
//! family. It answers which color a mnemonic or an operand token gets and can
//! split a record into colored [`TextSpan`]s for a front end to draw.

use std::collections::HashMap;

use serde::Serialize;

use crate::classify;
use crate::options::{ColorRecord, OptionStore};
use crate::{DisasmFamily, DisasmResult, Syntax};

/// Semantic text category with its own color option.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum OperandGroup {
    Arrows,
    ArrowsSelected,
    /// Fallback for every register group
    Regs,
    Numbers,
    /// Fallback for every opcode group
    Opcode,
    Refs,
    RegsGeneral,
    RegsStack,
    RegsSegment,
    RegsDebug,
    RegsIp,
    RegsFlags,
    RegsFpu,
    RegsSimd,
    OpcodeCall,
    OpcodeCondJmp,
    OpcodeRet,
    OpcodePush,
    OpcodePop,
    OpcodeNop,
    OpcodeJmp,
    OpcodeInt3,
    OpcodeSyscall,
}

const COMMON_KEYS: &[(OperandGroup, &str)] = &[
    (OperandGroup::Arrows, "Disasm/Color/Arrows"),
    (OperandGroup::ArrowsSelected, "Disasm/Color/ArrowsSelected"),
    (OperandGroup::Regs, "Disasm/Color/Regs"),
    (OperandGroup::Numbers, "Disasm/Color/Numbers"),
    (OperandGroup::Opcode, "Disasm/Color/Opcode"),
    (OperandGroup::Refs, "Disasm/Color/Refs"),
];

const X86_KEYS: &[(OperandGroup, &str)] = &[
    (OperandGroup::RegsGeneral, "Disasm/Color/X86/Regs/General"),
    (OperandGroup::RegsStack, "Disasm/Color/X86/Regs/Stack"),
    (OperandGroup::RegsSegment, "Disasm/Color/X86/Regs/Segment"),
    (OperandGroup::RegsDebug, "Disasm/Color/X86/Regs/Debug"),
    (OperandGroup::RegsIp, "Disasm/Color/X86/Regs/IP"),
    (OperandGroup::RegsFlags, "Disasm/Color/X86/Regs/Flags"),
    (OperandGroup::RegsFpu, "Disasm/Color/X86/Regs/FPU"),
    (OperandGroup::RegsSimd, "Disasm/Color/X86/Regs/XMM"),
    (OperandGroup::OpcodeCall, "Disasm/Color/X86/Opcode/Call"),
    (OperandGroup::OpcodeCondJmp, "Disasm/Color/X86/Opcode/CondJmp"),
    (OperandGroup::OpcodeRet, "Disasm/Color/X86/Opcode/Ret"),
    (OperandGroup::OpcodePush, "Disasm/Color/X86/Opcode/Push"),
    (OperandGroup::OpcodePop, "Disasm/Color/X86/Opcode/Pop"),
    (OperandGroup::OpcodeNop, "Disasm/Color/X86/Opcode/Nop"),
    (OperandGroup::OpcodeJmp, "Disasm/Color/X86/Opcode/Jmp"),
    (OperandGroup::OpcodeInt3, "Disasm/Color/X86/Opcode/Int3"),
    (OperandGroup::OpcodeSyscall, "Disasm/Color/X86/Opcode/Syscall"),
];

const ARM_KEYS: &[(OperandGroup, &str)] = &[
    (OperandGroup::RegsGeneral, "Disasm/Color/Arm/Regs/General"),
    (OperandGroup::OpcodeJmp, "Disasm/Color/Arm/Opcode/B"),
    (OperandGroup::OpcodeCall, "Disasm/Color/Arm/Opcode/BL"),
    (OperandGroup::OpcodeRet, "Disasm/Color/Arm/Opcode/Ret"),
    (OperandGroup::OpcodePush, "Disasm/Color/Arm/Opcode/Push"),
    (OperandGroup::OpcodePop, "Disasm/Color/Arm/Opcode/Pop"),
    (OperandGroup::OpcodeNop, "Disasm/Color/Arm/Opcode/Nop"),
];

/// Characters that separate operand tokens.
const DELIMITERS: &[char] = &[',', '[', ']', '+', '-', '*', '(', ')', ':', ' '];

/// A run of text with its category and color.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TextSpan {
    pub text: String,
    pub group: Option<OperandGroup>,
    pub color: ColorRecord,
}

/// Colors read from an option store, viewed through one family and syntax.
///
/// All family tables are kept so a mode switch only changes the view.
#[derive(Debug, Clone, Default)]
pub struct ColorScheme {
    family: DisasmFamily,
    syntax: Syntax,
    common: HashMap<OperandGroup, ColorRecord>,
    x86: HashMap<OperandGroup, ColorRecord>,
    arm: HashMap<OperandGroup, ColorRecord>,
}

fn read_colors(store: &dyn OptionStore, keys: &[(OperandGroup, &str)]) -> HashMap<OperandGroup, ColorRecord> {
    keys.iter()
        .map(|&(group, key)| (group, ColorRecord::from_store(store, key)))
        .filter(|(_, record)| !record.is_empty())
        .collect()
}

impl ColorScheme {
    /// Read every color option from `store`.
    pub fn from_options(store: &dyn OptionStore, family: DisasmFamily, syntax: Syntax) -> Self {
        Self {
            family,
            syntax,
            common: read_colors(store, COMMON_KEYS),
            x86: read_colors(store, X86_KEYS),
            arm: read_colors(store, ARM_KEYS),
        }
    }

    /// The same colors classified for another family or syntax.
    pub fn with_family(&self, family: DisasmFamily, syntax: Syntax) -> Self {
        Self { family, syntax, ..self.clone() }
    }

    pub fn family(&self) -> DisasmFamily {
        self.family
    }

    /// The configured color of `group`, empty when unset.
    pub fn color_record(&self, group: OperandGroup) -> ColorRecord {
        let family_colors = match self.family {
            DisasmFamily::X86 => Some(&self.x86),
            DisasmFamily::Arm | DisasmFamily::Arm64 => Some(&self.arm),
            _ => None,
        };
        family_colors
            .and_then(|colors| colors.get(&group))
            .or_else(|| self.common.get(&group))
            .copied()
            .unwrap_or_default()
    }

    /// First-match category of an opcode id.
    pub fn opcode_group(&self, opcode: u32) -> Option<OperandGroup> {
        let family = self.family;
        let checks: [(fn(DisasmFamily, u32) -> bool, OperandGroup); 9] = [
            (classify::is_call_opcode, OperandGroup::OpcodeCall),
            (classify::is_cond_jump_opcode, OperandGroup::OpcodeCondJmp),
            (classify::is_ret_opcode, OperandGroup::OpcodeRet),
            (classify::is_push_opcode, OperandGroup::OpcodePush),
            (classify::is_pop_opcode, OperandGroup::OpcodePop),
            (classify::is_nop_opcode, OperandGroup::OpcodeNop),
            (classify::is_jump_opcode, OperandGroup::OpcodeJmp),
            (classify::is_int3_opcode, OperandGroup::OpcodeInt3),
            (classify::is_syscall_opcode, OperandGroup::OpcodeSyscall),
        ];
        checks.iter().find(|(check, _)| check(family, opcode)).map(|&(_, group)| group)
    }

    /// Color of a mnemonic, falling back to the generic opcode color.
    pub fn opcode_color(&self, opcode: u32) -> ColorRecord {
        let record = self.opcode_group(opcode).map(|group| self.color_record(group)).unwrap_or_default();
        if record.is_empty() {
            self.color_record(OperandGroup::Opcode)
        } else {
            record
        }
    }

    /// Category of one operand token.
    ///
    /// Stack registers are tested before general ones because the general
    /// tables also list `sp`/`bp`.
    pub fn operand_group(&self, text: &str) -> Option<OperandGroup> {
        let (family, syntax) = (self.family, self.syntax);
        if classify::is_ref(text) {
            return Some(OperandGroup::Refs);
        }
        let registers: [(fn(DisasmFamily, Syntax, &str) -> bool, OperandGroup); 8] = [
            (classify::is_stack_register, OperandGroup::RegsStack),
            (classify::is_general_register, OperandGroup::RegsGeneral),
            (classify::is_segment_register, OperandGroup::RegsSegment),
            (classify::is_debug_register, OperandGroup::RegsDebug),
            (classify::is_instruction_pointer_register, OperandGroup::RegsIp),
            (classify::is_flags_register, OperandGroup::RegsFlags),
            (classify::is_fpu_register, OperandGroup::RegsFpu),
            (classify::is_simd_register, OperandGroup::RegsSimd),
        ];
        if let Some(&(_, group)) = registers.iter().find(|(check, _)| check(family, syntax, text)) {
            return Some(group);
        }
        classify::is_number(family, syntax, text).then_some(OperandGroup::Numbers)
    }

    /// Color of an operand token; register groups fall back to the generic
    /// register color.
    pub fn operand_color(&self, text: &str) -> ColorRecord {
        match self.operand_group(text) {
            None => ColorRecord::default(),
            Some(group @ (OperandGroup::Refs | OperandGroup::Numbers)) => self.color_record(group),
            Some(group) => {
                let record = self.color_record(group);
                if record.is_empty() {
                    self.color_record(OperandGroup::Regs)
                } else {
                    record
                }
            }
        }
    }

    /// Split `result` into mnemonic, separator and operand token spans.
    ///
    /// Operands of a nop are drawn as one span in the mnemonic's color.
    pub fn text_spans(&self, result: &DisasmResult) -> Vec<TextSpan> {
        let mut spans = Vec::new();
        let opcode_group = self.opcode_group(result.opcode);
        let opcode_color = self.opcode_color(result.opcode);
        if !result.mnemonic.is_empty() {
            spans.push(TextSpan { text: result.mnemonic.clone(), group: opcode_group, color: opcode_color });
        }
        if result.operands.is_empty() {
            return spans;
        }
        if !result.mnemonic.is_empty() {
            spans.push(plain(" "));
        }

        if classify::is_nop_opcode(self.family, result.opcode) {
            spans.push(TextSpan { text: result.operands.clone(), group: opcode_group, color: opcode_color });
            return spans;
        }

        let mut rest = result.operands.as_str();
        while !rest.is_empty() {
            let split = rest.find(DELIMITERS).unwrap_or(rest.len());
            if split == 0 {
                let run = rest.find(|c: char| !DELIMITERS.contains(&c)).unwrap_or(rest.len());
                spans.push(plain(&rest[..run]));
                rest = &rest[run..];
            } else {
                let token = &rest[..split];
                spans.push(TextSpan {
                    text: token.to_string(),
                    group: self.operand_group(token),
                    color: self.operand_color(token),
                });
                rest = &rest[split..];
            }
        }
        spans
    }
}

fn plain(text: &str) -> TextSpan {
    TextSpan { text: text.to_string(), group: None, color: ColorRecord::default() }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::{Color, Options};
    use capstone::arch::x86::X86Insn;
    use rstest::rstest;

    fn x86_scheme() -> ColorScheme {
        let options = Options::new()
            .with("Disasm/Color/Regs", "gray|")
            .with("Disasm/Color/Numbers", "green")
            .with("Disasm/Color/Opcode", "white")
            .with("Disasm/Color/X86/Regs/Stack", "red")
            .with("Disasm/Color/X86/Opcode/Call", "blue|yellow")
            .with("Disasm/Color/Arm/Opcode/BL", "orange");
        ColorScheme::from_options(&options, DisasmFamily::X86, Syntax::Intel)
    }

    #[rstest]
    #[case("rsp", Some(OperandGroup::RegsStack))]
    #[case("eax", Some(OperandGroup::RegsGeneral))]
    #[case("fs", Some(OperandGroup::RegsSegment))]
    #[case("rip", Some(OperandGroup::RegsIp))]
    #[case("xmm3", Some(OperandGroup::RegsSimd))]
    #[case("st0", Some(OperandGroup::RegsFpu))]
    #[case("0x10", Some(OperandGroup::Numbers))]
    #[case("<main>", Some(OperandGroup::Refs))]
    #[case("qword", None)]
    fn test_operand_group(#[case] text: &str, #[case] expected: Option<OperandGroup>) {
        assert_eq!(x86_scheme().operand_group(text), expected);
    }

    #[test]
    fn test_register_fallback() {
        let scheme = x86_scheme();
        assert_eq!(scheme.operand_color("rsp").main, Some(Color::rgb(0xff, 0, 0)));
        assert_eq!(scheme.operand_color("eax").main, Some(Color::rgb(0x80, 0x80, 0x80)));
        assert!(scheme.operand_color("ptr").is_empty());
    }

    #[test]
    fn test_opcode_color_fallback() {
        let scheme = x86_scheme();
        let call = scheme.opcode_color(X86Insn::X86_INS_CALL as u32);
        assert_eq!(call.background, Some(Color::rgb(0xff, 0xff, 0)));
        let mov = scheme.opcode_color(X86Insn::X86_INS_MOV as u32);
        assert_eq!(mov.main, Some(Color::rgb(0xff, 0xff, 0xff)));
    }

    #[test]
    fn test_family_specific_keys() {
        let scheme = x86_scheme();
        // the ARM `BL` key is not read for x86
        assert_eq!(scheme.color_record(OperandGroup::OpcodeCall).main, Some(Color::rgb(0, 0, 0xff)));
        let options = Options::new().with("Disasm/Color/X86/Regs/Stack", "red");
        let arm = ColorScheme::from_options(&options, DisasmFamily::Arm, Syntax::Default);
        assert!(arm.color_record(OperandGroup::RegsStack).is_empty());
        let x86 = arm.with_family(DisasmFamily::X86, Syntax::Att);
        assert_eq!(x86.color_record(OperandGroup::RegsStack).main, Some(Color::rgb(0xff, 0, 0)));
        assert_eq!(x86.operand_group("%rsp"), Some(OperandGroup::RegsStack));
    }

    #[test]
    fn test_text_spans() {
        let scheme = x86_scheme();
        let mut result = DisasmResult::new(0x1000, 4, "mov", "rax, qword ptr [rsp + 8]");
        result.opcode = X86Insn::X86_INS_MOV as u32;
        let spans = scheme.text_spans(&result);
        let texts: Vec<&str> = spans.iter().map(|s| s.text.as_str()).collect();
        assert_eq!(texts, vec!["mov", " ", "rax", ", ", "qword", " ", "ptr", " [", "rsp", " + ", "8", "]"]);
        assert_eq!(spans[2].group, Some(OperandGroup::RegsGeneral));
        assert_eq!(spans[8].group, Some(OperandGroup::RegsStack));
        assert_eq!(spans[10].group, Some(OperandGroup::Numbers));
        let joined: String = spans.iter().map(|s| s.text.as_str()).collect();
        assert_eq!(joined, result.to_string());
    }

    #[test]
    fn test_nop_operands_single_span() {
        let scheme = x86_scheme();
        let mut result = DisasmResult::new(0, 7, "nop", "dword ptr [rax + rax]");
        result.opcode = X86Insn::X86_INS_NOP as u32;
        let spans = scheme.text_spans(&result);
        assert_eq!(spans.len(), 3);
        assert_eq!(spans[2].group, Some(OperandGroup::OpcodeNop));
    }
}
