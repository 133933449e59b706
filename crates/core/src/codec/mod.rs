//! Instruction codec
//!
//! The hook composer needs exactly four things from an x86/x64 codec:
//! decode one instruction at an address, re-encode a sequence at a new
//! address with relative operands fixed up, and emit near and far
//! unconditional jumps. [`InstructionCodec`] captures that contract;
//! [`IcedCodec`] implements it on top of iced-x86.

mod iced;

pub use iced::IcedCodec;

/// Pointer width of a target process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bitness {
    /// 32-bit address space
    X86,
    /// 64-bit address space
    X64,
}

impl Bitness {
    /// Decoder/encoder bitness value
    pub fn bits(self) -> u32 {
        match self {
            Bitness::X86 => 32,
            Bitness::X64 => 64,
        }
    }

    /// Size of a pointer in the target
    pub fn pointer_size(self) -> usize {
        match self {
            Bitness::X86 => 4,
            Bitness::X64 => 8,
        }
    }

    pub fn is_64(self) -> bool {
        matches!(self, Bitness::X64)
    }

    /// Whether `address` is representable in this address space
    pub fn fits(self, address: u64) -> bool {
        self.is_64() || address <= u64::from(u32::MAX)
    }
}

/// Longest legal x86/x64 instruction
pub const MAX_INSTRUCTION_LEN: usize = 15;

/// `E9 rel32`
pub const NEAR_JUMP_LEN: usize = 5;

/// Upper bound for the far-jump sequence (the emitted form is 14 bytes,
/// see [`InstructionCodec::emit_far_jump`])
pub const FAR_JUMP_MAX_LEN: usize = 15;

/// Single-byte NOP used for padding
pub const NOP: u8 = 0x90;

/// Error type for codec operations
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// The byte stream does not decode to a valid instruction
    #[error("decode failed: {0}")]
    Decode(String),

    /// Re-encoding at the new address failed
    #[error("encode failed: {0}")]
    Encode(String),
}

/// One decoded instruction, with the bytes it was decoded from
#[derive(Debug, Clone)]
pub struct DecodedInstruction {
    pub(crate) inner: iced_x86::Instruction,
    bytes: Vec<u8>,
}

impl DecodedInstruction {
    pub(crate) fn new(inner: iced_x86::Instruction, bytes: Vec<u8>) -> Self {
        debug_assert_eq!(inner.len(), bytes.len());
        Self { inner, bytes }
    }

    /// Wrap an instruction that was built rather than decoded (no source
    /// bytes; it only exists to be re-encoded)
    pub(crate) fn from_instruction(inner: iced_x86::Instruction) -> Self {
        Self {
            inner,
            bytes: Vec::new(),
        }
    }

    /// Address the instruction was decoded at
    pub fn address(&self) -> u64 {
        self.inner.ip()
    }

    /// Encoded length in bytes
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// The original encoding
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }
}

/// The codec contract used by the hook composer
pub trait InstructionCodec {
    /// Decode a single instruction from `bytes`, as if located at `address`
    fn decode_one(
        &self,
        bytes: &[u8],
        address: u64,
        bitness: Bitness,
    ) -> Result<DecodedInstruction, CodecError>;

    /// Re-encode `instructions` at `new_base`, fixing up PC-relative
    /// operands so they keep their original targets
    fn relocate(
        &self,
        instructions: &[DecodedInstruction],
        new_base: u64,
        bitness: Bitness,
    ) -> Result<Vec<u8>, CodecError>;

    /// Encode `E9 rel32` from `from` to `to`.
    ///
    /// Returns `None` when the displacement does not fit 32 bits (only
    /// possible in a 64-bit address space; 32-bit displacements wrap).
    fn emit_near_jump(&self, from: u64, to: u64, bitness: Bitness) -> Option<[u8; NEAR_JUMP_LEN]>;

    /// Encode a jump that reaches `to` from anywhere.
    ///
    /// On 64-bit this is `FF 25 00 00 00 00` followed by the 8-byte
    /// absolute target (14 bytes): an indirect jump through the inline
    /// literal. On 32-bit a near jump already reaches everywhere.
    fn emit_far_jump(&self, from: u64, to: u64, bitness: Bitness) -> Result<Vec<u8>, CodecError>;
}
