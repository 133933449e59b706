//! Hook options
//!
//! Where the injected code runs relative to the displaced instruction, how
//! far the site jump may reach, and which CPU state is saved around the
//! injected body.

/// Placement of the injected code relative to the first overwritten
/// instruction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExecutionMode {
    /// Injected code runs, then the original instruction
    #[default]
    InjectedFirst,
    /// The original instruction runs, then the injected code
    OriginalFirst,
    /// The injected code replaces the original instruction
    ReplaceOriginal,
}

/// How the site jump may be encoded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum JumpMode {
    /// 5-byte `E9 rel32` or fail
    NearOnly,
    /// Prefer the near jump, fall back to a far jump when no trampoline
    /// fits the ±2 GiB window
    #[default]
    NearWithFarFallback,
}

/// CPU state the trampoline saves before the injected code and restores
/// after it.
///
/// `Flags` and `FpuStack` are preserved as coordinated units; everything
/// else is an individual register. Registers that do not exist in the
/// target's bitness (R8-R15 and XMM8-XMM15 on 32-bit) are silently
/// dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreservedRegister {
    /// The flags register (PUSHF/POPF)
    Flags,
    Rax,
    Rcx,
    Rdx,
    Rbx,
    Rbp,
    Rsi,
    Rdi,
    R8,
    R9,
    R10,
    R11,
    R12,
    R13,
    R14,
    R15,
    Xmm0,
    Xmm1,
    Xmm2,
    Xmm3,
    Xmm4,
    Xmm5,
    Xmm6,
    Xmm7,
    Xmm8,
    Xmm9,
    Xmm10,
    Xmm11,
    Xmm12,
    Xmm13,
    Xmm14,
    Xmm15,
    Mm0,
    Mm1,
    Mm2,
    Mm3,
    Mm4,
    Mm5,
    Mm6,
    Mm7,
    /// The full x87 state, including the register stack (FNSAVE/FRSTOR)
    FpuStack,
}

impl PreservedRegister {
    /// General-purpose registers common to both bitnesses
    pub const GENERAL_PURPOSE_32: [PreservedRegister; 7] = [
        PreservedRegister::Rax,
        PreservedRegister::Rcx,
        PreservedRegister::Rdx,
        PreservedRegister::Rbx,
        PreservedRegister::Rbp,
        PreservedRegister::Rsi,
        PreservedRegister::Rdi,
    ];

    /// All general-purpose registers of a 64-bit target
    pub const GENERAL_PURPOSE_64: [PreservedRegister; 15] = [
        PreservedRegister::Rax,
        PreservedRegister::Rcx,
        PreservedRegister::Rdx,
        PreservedRegister::Rbx,
        PreservedRegister::Rbp,
        PreservedRegister::Rsi,
        PreservedRegister::Rdi,
        PreservedRegister::R8,
        PreservedRegister::R9,
        PreservedRegister::R10,
        PreservedRegister::R11,
        PreservedRegister::R12,
        PreservedRegister::R13,
        PreservedRegister::R14,
        PreservedRegister::R15,
    ];
}

/// Options for one hook installation
#[derive(Debug, Clone, Default)]
pub struct HookOptions {
    pub execution_mode: ExecutionMode,
    pub jump_mode: JumpMode,
    /// State saved before the injected code, in declaration order
    pub preserved: Vec<PreservedRegister>,
}

impl HookOptions {
    pub fn new(execution_mode: ExecutionMode) -> Self {
        Self {
            execution_mode,
            ..Default::default()
        }
    }

    /// Builder-style jump mode
    pub fn jump_mode(mut self, jump_mode: JumpMode) -> Self {
        self.jump_mode = jump_mode;
        self
    }

    /// Builder-style preservation list (appended in order)
    pub fn preserve(mut self, registers: impl IntoIterator<Item = PreservedRegister>) -> Self {
        self.preserved.extend(registers);
        self
    }
}
