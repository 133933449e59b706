//! Register isolation byte sequences
//!
//! Emits the save block placed before injected code and the mirrored
//! restore block placed after it. General-purpose registers go through
//! PUSH/POP, flags through PUSHF/POPF, XMM and MM registers through a
//! stack slot, and the x87 state through FNSAVE/FRSTOR. Restores run in
//! exact reverse order of the saves so the stack stays balanced.

use crate::codec::Bitness;

use super::options::PreservedRegister;

/// FNSAVE legacy area
const FPU_STATE_SIZE: u8 = 108;

/// Whether the register exists in the given bitness
pub(crate) fn supported(register: PreservedRegister, bitness: Bitness) -> bool {
    use PreservedRegister::*;
    if bitness.is_64() {
        return true;
    }
    !matches!(
        register,
        R8 | R9
            | R10
            | R11
            | R12
            | R13
            | R14
            | R15
            | Xmm8
            | Xmm9
            | Xmm10
            | Xmm11
            | Xmm12
            | Xmm13
            | Xmm14
            | Xmm15
    )
}

/// PUSH/POP index of a general-purpose register, if it is one
fn gp_index(register: PreservedRegister) -> Option<u8> {
    use PreservedRegister::*;
    Some(match register {
        Rax => 0,
        Rcx => 1,
        Rdx => 2,
        Rbx => 3,
        Rbp => 5,
        Rsi => 6,
        Rdi => 7,
        R8 => 8,
        R9 => 9,
        R10 => 10,
        R11 => 11,
        R12 => 12,
        R13 => 13,
        R14 => 14,
        R15 => 15,
        _ => return None,
    })
}

fn xmm_index(register: PreservedRegister) -> Option<u8> {
    use PreservedRegister::*;
    Some(match register {
        Xmm0 => 0,
        Xmm1 => 1,
        Xmm2 => 2,
        Xmm3 => 3,
        Xmm4 => 4,
        Xmm5 => 5,
        Xmm6 => 6,
        Xmm7 => 7,
        Xmm8 => 8,
        Xmm9 => 9,
        Xmm10 => 10,
        Xmm11 => 11,
        Xmm12 => 12,
        Xmm13 => 13,
        Xmm14 => 14,
        Xmm15 => 15,
        _ => return None,
    })
}

fn mm_index(register: PreservedRegister) -> Option<u8> {
    use PreservedRegister::*;
    Some(match register {
        Mm0 => 0,
        Mm1 => 1,
        Mm2 => 2,
        Mm3 => 3,
        Mm4 => 4,
        Mm5 => 5,
        Mm6 => 6,
        Mm7 => 7,
        _ => return None,
    })
}

/// `sub rsp, imm8` / `sub esp, imm8`
fn stack_reserve(code: &mut Vec<u8>, bytes: u8, bitness: Bitness) {
    if bitness.is_64() {
        code.push(0x48);
    }
    code.extend_from_slice(&[0x83, 0xEC, bytes]);
}

/// `add rsp, imm8` / `add esp, imm8`
fn stack_release(code: &mut Vec<u8>, bytes: u8, bitness: Bitness) {
    if bitness.is_64() {
        code.push(0x48);
    }
    code.extend_from_slice(&[0x83, 0xC4, bytes]);
}

/// `[rsp]`/`[esp]` memory operand for an XMM/MM opcode: modrm + SIB
fn rsp_operand(code: &mut Vec<u8>, reg: u8) {
    code.extend_from_slice(&[0x04 | (reg << 3), 0x24]);
}

fn emit_save(code: &mut Vec<u8>, register: PreservedRegister, bitness: Bitness) {
    if let Some(index) = gp_index(register) {
        if index >= 8 {
            code.push(0x41);
        }
        code.push(0x50 + (index & 7));
    } else if let Some(index) = xmm_index(register) {
        stack_reserve(code, 16, bitness);
        if index >= 8 {
            code.push(0x44);
        }
        // movups [rsp], xmmN
        code.extend_from_slice(&[0x0F, 0x11]);
        rsp_operand(code, index & 7);
    } else if let Some(index) = mm_index(register) {
        stack_reserve(code, 8, bitness);
        // movq [rsp], mmN
        code.extend_from_slice(&[0x0F, 0x7F]);
        rsp_operand(code, index);
    }
}

fn emit_restore(code: &mut Vec<u8>, register: PreservedRegister, bitness: Bitness) {
    if let Some(index) = gp_index(register) {
        if index >= 8 {
            code.push(0x41);
        }
        code.push(0x58 + (index & 7));
    } else if let Some(index) = xmm_index(register) {
        if index >= 8 {
            code.push(0x44);
        }
        // movups xmmN, [rsp]
        code.extend_from_slice(&[0x0F, 0x10]);
        rsp_operand(code, index & 7);
        stack_release(code, 16, bitness);
    } else if let Some(index) = mm_index(register) {
        // movq mmN, [rsp]
        code.extend_from_slice(&[0x0F, 0x6F]);
        rsp_operand(code, index);
        stack_release(code, 8, bitness);
    }
}

/// The save block: flags first, then the declared registers in order,
/// then the x87 state. Unsupported registers are dropped.
pub(crate) fn pre_block(preserved: &[PreservedRegister], bitness: Bitness) -> Vec<u8> {
    let mut code = Vec::new();
    if preserved.contains(&PreservedRegister::Flags) {
        code.push(0x9C); // pushf
    }
    for &register in preserved.iter().filter(|&&r| supported(r, bitness)) {
        emit_save(&mut code, register, bitness);
    }
    if preserved.contains(&PreservedRegister::FpuStack) {
        stack_reserve(&mut code, FPU_STATE_SIZE, bitness);
        code.extend_from_slice(&[0xDD, 0x34, 0x24]); // fnsave [rsp]
    }
    code
}

/// The restore block, mirroring [`pre_block`]: x87 state first, then the
/// declared registers in reverse, then flags.
pub(crate) fn post_block(preserved: &[PreservedRegister], bitness: Bitness) -> Vec<u8> {
    let mut code = Vec::new();
    if preserved.contains(&PreservedRegister::FpuStack) {
        code.extend_from_slice(&[0xDD, 0x24, 0x24]); // frstor [rsp]
        stack_release(&mut code, FPU_STATE_SIZE, bitness);
    }
    for &register in preserved.iter().rev().filter(|&&r| supported(r, bitness)) {
        emit_restore(&mut code, register, bitness);
    }
    if preserved.contains(&PreservedRegister::Flags) {
        code.push(0x9D); // popf
    }
    code
}

#[cfg(test)]
mod tests {
    use super::*;
    use PreservedRegister::*;

    #[test]
    fn test_gp_push_pop_encodings() {
        assert_eq!(pre_block(&[Rcx], Bitness::X64), vec![0x51]);
        assert_eq!(post_block(&[Rcx], Bitness::X64), vec![0x59]);
        assert_eq!(pre_block(&[R9], Bitness::X64), vec![0x41, 0x51]);
        assert_eq!(post_block(&[R9], Bitness::X64), vec![0x41, 0x59]);
    }

    #[test]
    fn test_flags_bracket_everything() {
        let pre = pre_block(&[Rax, Flags], Bitness::X64);
        assert_eq!(pre, vec![0x9C, 0x50]); // pushf comes first regardless
        let post = post_block(&[Rax, Flags], Bitness::X64);
        assert_eq!(post, vec![0x58, 0x9D]); // popf comes last
    }

    #[test]
    fn test_xmm_save_restore() {
        let pre = pre_block(&[Xmm0], Bitness::X64);
        assert_eq!(
            pre,
            vec![0x48, 0x83, 0xEC, 0x10, 0x0F, 0x11, 0x04, 0x24]
        );
        let post = post_block(&[Xmm0], Bitness::X64);
        assert_eq!(
            post,
            vec![0x0F, 0x10, 0x04, 0x24, 0x48, 0x83, 0xC4, 0x10]
        );

        // High XMM registers need the REX.R prefix
        let pre = pre_block(&[Xmm9], Bitness::X64);
        assert_eq!(
            pre,
            vec![0x48, 0x83, 0xEC, 0x10, 0x44, 0x0F, 0x11, 0x0C, 0x24]
        );
    }

    #[test]
    fn test_mm_save_restore() {
        assert_eq!(
            pre_block(&[Mm1], Bitness::X64),
            vec![0x48, 0x83, 0xEC, 0x08, 0x0F, 0x7F, 0x0C, 0x24]
        );
        assert_eq!(
            post_block(&[Mm1], Bitness::X64),
            vec![0x0F, 0x6F, 0x0C, 0x24, 0x48, 0x83, 0xC4, 0x08]
        );
    }

    #[test]
    fn test_fpu_state_is_innermost_block() {
        let pre = pre_block(&[Flags, Rax, FpuStack], Bitness::X64);
        assert_eq!(
            pre,
            vec![0x9C, 0x50, 0x48, 0x83, 0xEC, 0x6C, 0xDD, 0x34, 0x24]
        );
        let post = post_block(&[Flags, Rax, FpuStack], Bitness::X64);
        assert_eq!(
            post,
            vec![0xDD, 0x24, 0x24, 0x48, 0x83, 0xC4, 0x6C, 0x58, 0x9D]
        );
    }

    #[test]
    fn test_restore_mirrors_save_order() {
        let regs = [Rax, Rcx, Rdx];
        assert_eq!(pre_block(&regs, Bitness::X64), vec![0x50, 0x51, 0x52]);
        assert_eq!(post_block(&regs, Bitness::X64), vec![0x5A, 0x59, 0x58]);
    }

    #[test]
    fn test_64_bit_only_registers_dropped_in_32_bit() {
        let pre = pre_block(&[R8, Rax, Xmm12], Bitness::X86);
        assert_eq!(pre, vec![0x50]); // only push eax survives
        let post = post_block(&[R8, Rax, Xmm12], Bitness::X86);
        assert_eq!(post, vec![0x58]);
    }

    #[test]
    fn test_32_bit_stack_ops_lack_rex() {
        let pre = pre_block(&[Xmm2], Bitness::X86);
        assert_eq!(pre, vec![0x83, 0xEC, 0x10, 0x0F, 0x11, 0x14, 0x24]);
    }

    #[test]
    fn test_save_restore_stack_balance() {
        // Every byte sequence must net out: count stack effects
        let regs = [Flags, Rax, Rcx, Xmm0, Mm3, FpuStack];
        let pre = pre_block(&regs, Bitness::X64);
        let post = post_block(&regs, Bitness::X64);
        // pushf(8) + 2 pushes(16) + 16 + 8 + 108 on each side
        assert!(!pre.is_empty() && !post.is_empty());
        assert_eq!(pre.len(), post.len());
    }
}
