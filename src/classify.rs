//! Opcode and operand-text classification.
//!
//! Opcode predicates are table lookups keyed by [`DisasmFamily`]; a family
//! without a table answers `false` for every question. Operand predicates
//! look at a single operand token as printed by the decoder.

use capstone::arch::arm::ArmInsn;
use capstone::arch::arm64::Arm64Insn;
use capstone::arch::mips::MipsInsn;
use capstone::arch::ppc::PpcInsn;
use capstone::arch::x86::X86Insn;

use crate::{DisasmFamily, Syntax};

/// Opcode ids of one family, grouped by category.
struct OpcodeTable {
    jump: &'static [u32],
    cond_jump: &'static [u32],
    call: &'static [u32],
    ret: &'static [u32],
    push: &'static [u32],
    pop: &'static [u32],
    nop: &'static [u32],
    int3: &'static [u32],
    syscall: &'static [u32],
}

static X86_TABLE: OpcodeTable = OpcodeTable {
    jump: &[X86Insn::X86_INS_JMP as u32, X86Insn::X86_INS_LJMP as u32],
    cond_jump: &[
        X86Insn::X86_INS_JA as u32,
        X86Insn::X86_INS_JAE as u32,
        X86Insn::X86_INS_JB as u32,
        X86Insn::X86_INS_JBE as u32,
        X86Insn::X86_INS_JCXZ as u32,
        X86Insn::X86_INS_JE as u32,
        X86Insn::X86_INS_JECXZ as u32,
        X86Insn::X86_INS_JG as u32,
        X86Insn::X86_INS_JGE as u32,
        X86Insn::X86_INS_JL as u32,
        X86Insn::X86_INS_JLE as u32,
        X86Insn::X86_INS_JNE as u32,
        X86Insn::X86_INS_JNO as u32,
        X86Insn::X86_INS_JNP as u32,
        X86Insn::X86_INS_JNS as u32,
        X86Insn::X86_INS_JO as u32,
        X86Insn::X86_INS_JP as u32,
        X86Insn::X86_INS_JRCXZ as u32,
        X86Insn::X86_INS_JS as u32,
        X86Insn::X86_INS_LOOP as u32,
        X86Insn::X86_INS_LOOPE as u32,
        X86Insn::X86_INS_LOOPNE as u32,
    ],
    call: &[X86Insn::X86_INS_CALL as u32, X86Insn::X86_INS_LCALL as u32],
    ret: &[
        X86Insn::X86_INS_RET as u32,
        X86Insn::X86_INS_RETF as u32,
        X86Insn::X86_INS_RETFQ as u32,
        X86Insn::X86_INS_IRET as u32,
        X86Insn::X86_INS_IRETD as u32,
        X86Insn::X86_INS_IRETQ as u32,
    ],
    push: &[
        X86Insn::X86_INS_PUSH as u32,
        X86Insn::X86_INS_PUSHAW as u32,
        X86Insn::X86_INS_PUSHAL as u32,
        X86Insn::X86_INS_PUSHF as u32,
        X86Insn::X86_INS_PUSHFD as u32,
        X86Insn::X86_INS_PUSHFQ as u32,
    ],
    pop: &[
        X86Insn::X86_INS_POP as u32,
        X86Insn::X86_INS_POPAW as u32,
        X86Insn::X86_INS_POPAL as u32,
        X86Insn::X86_INS_POPF as u32,
        X86Insn::X86_INS_POPFD as u32,
        X86Insn::X86_INS_POPFQ as u32,
    ],
    nop: &[X86Insn::X86_INS_NOP as u32],
    int3: &[X86Insn::X86_INS_INT3 as u32],
    syscall: &[X86Insn::X86_INS_SYSCALL as u32, X86Insn::X86_INS_SYSENTER as u32],
};

static ARM_TABLE: OpcodeTable = OpcodeTable {
    jump: &[ArmInsn::ARM_INS_B as u32, ArmInsn::ARM_INS_BX as u32],
    cond_jump: &[ArmInsn::ARM_INS_CBZ as u32, ArmInsn::ARM_INS_CBNZ as u32],
    call: &[ArmInsn::ARM_INS_BL as u32, ArmInsn::ARM_INS_BLX as u32],
    ret: &[],
    push: &[ArmInsn::ARM_INS_PUSH as u32],
    pop: &[ArmInsn::ARM_INS_POP as u32],
    nop: &[ArmInsn::ARM_INS_NOP as u32],
    int3: &[ArmInsn::ARM_INS_BKPT as u32],
    syscall: &[ArmInsn::ARM_INS_SVC as u32],
};

static ARM64_TABLE: OpcodeTable = OpcodeTable {
    jump: &[Arm64Insn::ARM64_INS_B as u32, Arm64Insn::ARM64_INS_BR as u32],
    cond_jump: &[
        Arm64Insn::ARM64_INS_CBZ as u32,
        Arm64Insn::ARM64_INS_CBNZ as u32,
        Arm64Insn::ARM64_INS_TBZ as u32,
        Arm64Insn::ARM64_INS_TBNZ as u32,
    ],
    call: &[Arm64Insn::ARM64_INS_BL as u32, Arm64Insn::ARM64_INS_BLR as u32],
    ret: &[
        Arm64Insn::ARM64_INS_RET as u32,
        Arm64Insn::ARM64_INS_RETAA as u32,
        Arm64Insn::ARM64_INS_RETAB as u32,
    ],
    push: &[],
    pop: &[],
    nop: &[Arm64Insn::ARM64_INS_NOP as u32],
    int3: &[Arm64Insn::ARM64_INS_BRK as u32],
    syscall: &[Arm64Insn::ARM64_INS_SVC as u32],
};

static MIPS_TABLE: OpcodeTable = OpcodeTable {
    jump: &[MipsInsn::MIPS_INS_J as u32, MipsInsn::MIPS_INS_B as u32],
    cond_jump: &[
        MipsInsn::MIPS_INS_BEQ as u32,
        MipsInsn::MIPS_INS_BEQZ as u32,
        MipsInsn::MIPS_INS_BNE as u32,
        MipsInsn::MIPS_INS_BNEZ as u32,
        MipsInsn::MIPS_INS_BGEZ as u32,
        MipsInsn::MIPS_INS_BGTZ as u32,
        MipsInsn::MIPS_INS_BLEZ as u32,
        MipsInsn::MIPS_INS_BLTZ as u32,
    ],
    call: &[
        MipsInsn::MIPS_INS_JAL as u32,
        MipsInsn::MIPS_INS_JALR as u32,
        MipsInsn::MIPS_INS_BAL as u32,
    ],
    // jr is almost always `jr $ra`
    ret: &[MipsInsn::MIPS_INS_JR as u32, MipsInsn::MIPS_INS_ERET as u32],
    push: &[],
    pop: &[],
    nop: &[MipsInsn::MIPS_INS_NOP as u32],
    int3: &[MipsInsn::MIPS_INS_BREAK as u32],
    syscall: &[MipsInsn::MIPS_INS_SYSCALL as u32],
};

static PPC_TABLE: OpcodeTable = OpcodeTable {
    jump: &[PpcInsn::PPC_INS_B as u32, PpcInsn::PPC_INS_BA as u32],
    cond_jump: &[],
    call: &[PpcInsn::PPC_INS_BL as u32, PpcInsn::PPC_INS_BLA as u32],
    ret: &[PpcInsn::PPC_INS_BLR as u32],
    push: &[],
    pop: &[],
    nop: &[],
    int3: &[],
    syscall: &[PpcInsn::PPC_INS_SC as u32],
};

fn table(family: DisasmFamily) -> Option<&'static OpcodeTable> {
    match family {
        DisasmFamily::X86 => Some(&X86_TABLE),
        DisasmFamily::Arm => Some(&ARM_TABLE),
        DisasmFamily::Arm64 => Some(&ARM64_TABLE),
        DisasmFamily::Mips => Some(&MIPS_TABLE),
        DisasmFamily::Ppc => Some(&PPC_TABLE),
        _ => None,
    }
}

fn lookup(family: DisasmFamily, opcode: u32, pick: fn(&OpcodeTable) -> &'static [u32]) -> bool {
    table(family).is_some_and(|t| pick(t).contains(&opcode))
}

pub fn is_jump_opcode(family: DisasmFamily, opcode: u32) -> bool {
    lookup(family, opcode, |t| t.jump)
}

pub fn is_cond_jump_opcode(family: DisasmFamily, opcode: u32) -> bool {
    lookup(family, opcode, |t| t.cond_jump)
}

pub fn is_call_opcode(family: DisasmFamily, opcode: u32) -> bool {
    lookup(family, opcode, |t| t.call)
}

pub fn is_ret_opcode(family: DisasmFamily, opcode: u32) -> bool {
    lookup(family, opcode, |t| t.ret)
}

pub fn is_push_opcode(family: DisasmFamily, opcode: u32) -> bool {
    lookup(family, opcode, |t| t.push)
}

pub fn is_pop_opcode(family: DisasmFamily, opcode: u32) -> bool {
    lookup(family, opcode, |t| t.pop)
}

pub fn is_nop_opcode(family: DisasmFamily, opcode: u32) -> bool {
    lookup(family, opcode, |t| t.nop)
}

pub fn is_int3_opcode(family: DisasmFamily, opcode: u32) -> bool {
    lookup(family, opcode, |t| t.int3)
}

pub fn is_syscall_opcode(family: DisasmFamily, opcode: u32) -> bool {
    lookup(family, opcode, |t| t.syscall)
}

/// Jumps of either kind and calls.
pub fn is_branch_opcode(family: DisasmFamily, opcode: u32) -> bool {
    is_jump_opcode(family, opcode) || is_cond_jump_opcode(family, opcode) || is_call_opcode(family, opcode)
}

/// Strip the AT&T `%` sigil; other syntaxes are returned unchanged.
pub fn remove_register_prefix(family: DisasmFamily, syntax: Syntax, operand: &str) -> &str {
    if family == DisasmFamily::X86 && syntax == Syntax::Att {
        operand.strip_prefix('%').unwrap_or(operand)
    } else {
        operand
    }
}

/// `prefix` followed by a decimal number in `range`.
fn numbered(reg: &str, prefix: &str, range: std::ops::RangeInclusive<u32>) -> bool {
    reg.strip_prefix(prefix)
        .filter(|rest| !rest.is_empty() && rest.bytes().all(|b| b.is_ascii_digit()))
        .and_then(|rest| rest.parse::<u32>().ok())
        .is_some_and(|n| range.contains(&n))
}

fn is_x86_general(reg: &str) -> bool {
    const NAMED: &[&str] = &[
        "al", "ah", "bl", "bh", "cl", "ch", "dl", "dh", "sil", "dil", "spl", "bpl",
        "ax", "bx", "cx", "dx", "si", "di", "sp", "bp",
        "eax", "ebx", "ecx", "edx", "esi", "edi", "esp", "ebp",
        "rax", "rbx", "rcx", "rdx", "rsi", "rdi", "rsp", "rbp",
    ];
    if NAMED.contains(&reg) {
        return true;
    }
    // r8..r15 with an optional d/w/b width suffix
    let base = reg.strip_suffix(['d', 'w', 'b']).unwrap_or(reg);
    numbered(base, "r", 8..=15)
}

pub fn is_general_register(family: DisasmFamily, syntax: Syntax, operand: &str) -> bool {
    let reg = remove_register_prefix(family, syntax, operand);
    match family {
        DisasmFamily::X86 => is_x86_general(reg),
        DisasmFamily::Arm => numbered(reg, "r", 0..=15) || matches!(reg, "lr" | "ip" | "fp" | "sb" | "sl"),
        DisasmFamily::Arm64 => {
            numbered(reg, "x", 0..=30) || numbered(reg, "w", 0..=30) || matches!(reg, "xzr" | "wzr" | "lr" | "fp")
        }
        _ => false,
    }
}

pub fn is_stack_register(family: DisasmFamily, syntax: Syntax, operand: &str) -> bool {
    let reg = remove_register_prefix(family, syntax, operand);
    match family {
        DisasmFamily::X86 => matches!(reg, "sp" | "bp" | "esp" | "ebp" | "rsp" | "rbp"),
        DisasmFamily::Arm => reg == "sp",
        DisasmFamily::Arm64 => matches!(reg, "sp" | "wsp"),
        _ => false,
    }
}

pub fn is_segment_register(family: DisasmFamily, syntax: Syntax, operand: &str) -> bool {
    let reg = remove_register_prefix(family, syntax, operand);
    family == DisasmFamily::X86 && matches!(reg, "es" | "gs" | "ss" | "ds" | "cs" | "fs")
}

pub fn is_debug_register(family: DisasmFamily, syntax: Syntax, operand: &str) -> bool {
    let reg = remove_register_prefix(family, syntax, operand);
    family == DisasmFamily::X86 && matches!(reg, "dr0" | "dr1" | "dr2" | "dr3" | "dr6" | "dr7")
}

pub fn is_instruction_pointer_register(family: DisasmFamily, syntax: Syntax, operand: &str) -> bool {
    let reg = remove_register_prefix(family, syntax, operand);
    match family {
        DisasmFamily::X86 => matches!(reg, "ip" | "eip" | "rip"),
        DisasmFamily::Arm | DisasmFamily::Arm64 => reg == "pc",
        _ => false,
    }
}

pub fn is_flags_register(family: DisasmFamily, syntax: Syntax, operand: &str) -> bool {
    let reg = remove_register_prefix(family, syntax, operand);
    match family {
        DisasmFamily::X86 => matches!(reg, "flags" | "eflags" | "rflags"),
        DisasmFamily::Arm => matches!(reg, "apsr" | "cpsr" | "spsr"),
        DisasmFamily::Arm64 => reg == "nzcv",
        _ => false,
    }
}

pub fn is_fpu_register(family: DisasmFamily, syntax: Syntax, operand: &str) -> bool {
    let reg = remove_register_prefix(family, syntax, operand);
    family == DisasmFamily::X86 && (reg == "st" || numbered(reg, "st", 0..=7))
}

pub fn is_simd_register(family: DisasmFamily, syntax: Syntax, operand: &str) -> bool {
    let reg = remove_register_prefix(family, syntax, operand);
    match family {
        DisasmFamily::X86 => {
            numbered(reg, "xmm", 0..=31)
                || numbered(reg, "ymm", 0..=31)
                || numbered(reg, "zmm", 0..=31)
                || numbered(reg, "mm", 0..=7)
        }
        DisasmFamily::Arm => numbered(reg, "q", 0..=15) || numbered(reg, "d", 0..=31) || numbered(reg, "s", 0..=31),
        DisasmFamily::Arm64 => ["v", "q", "d", "s", "h", "b"].iter().any(|p| numbered(reg, p, 0..=31)),
        _ => false,
    }
}

pub fn is_register(family: DisasmFamily, syntax: Syntax, operand: &str) -> bool {
    is_general_register(family, syntax, operand)
        || is_stack_register(family, syntax, operand)
        || is_segment_register(family, syntax, operand)
        || is_debug_register(family, syntax, operand)
        || is_instruction_pointer_register(family, syntax, operand)
        || is_flags_register(family, syntax, operand)
        || is_fpu_register(family, syntax, operand)
        || is_simd_register(family, syntax, operand)
}

/// Symbolic reference such as `<main+0x10>`.
pub fn is_ref(operand: &str) -> bool {
    operand.contains('<')
}

fn is_decimal(text: &str) -> bool {
    !text.is_empty() && text.bytes().all(|b| b.is_ascii_digit())
}

fn is_c_hex(text: &str) -> bool {
    text.strip_prefix("0x")
        .is_some_and(|digits| !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_hexdigit()))
}

/// Numeric literal in the notation the decoder uses for `family` and `syntax`.
pub fn is_number(family: DisasmFamily, syntax: Syntax, operand: &str) -> bool {
    let text = operand.strip_prefix('-').unwrap_or(operand);
    match family {
        DisasmFamily::X86 => match syntax {
            Syntax::Default | Syntax::Intel => is_decimal(text) || is_c_hex(text),
            // MASM hex literals start with a decimal digit, which keeps `ah`/`bh` registers out.
            Syntax::Masm => {
                is_decimal(text)
                    || text.strip_suffix(['h', 'H']).is_some_and(|digits| {
                        digits.bytes().next().is_some_and(|b| b.is_ascii_digit())
                            && digits.bytes().all(|b| b.is_ascii_hexdigit())
                    })
            }
            Syntax::Att => {
                let value = text.strip_prefix('$').unwrap_or(text);
                let value = value.strip_prefix('-').unwrap_or(value);
                is_decimal(value) || is_c_hex(value)
            }
        },
        DisasmFamily::Arm | DisasmFamily::Arm64 => {
            let value = text.strip_prefix('#').unwrap_or(text);
            let value = value.strip_prefix('-').unwrap_or(value);
            is_decimal(value) || is_c_hex(value)
        }
        DisasmFamily::Unknown => false,
        _ => is_decimal(text) || is_c_hex(text),
    }
}
