//! iced-x86 backed codec

use iced_x86::{BlockEncoder, BlockEncoderOptions, Decoder, DecoderOptions, InstructionBlock};

use super::{Bitness, CodecError, DecodedInstruction, InstructionCodec, NEAR_JUMP_LEN};

/// Codec implementation on top of iced-x86
#[derive(Debug, Default, Clone, Copy)]
pub struct IcedCodec;

impl InstructionCodec for IcedCodec {
    fn decode_one(
        &self,
        bytes: &[u8],
        address: u64,
        bitness: Bitness,
    ) -> Result<DecodedInstruction, CodecError> {
        let mut decoder = Decoder::with_ip(bitness.bits(), bytes, address, DecoderOptions::NONE);
        let instruction = decoder.decode();
        if instruction.is_invalid() {
            return Err(CodecError::Decode(format!(
                "{:?} at {address:#x}",
                decoder.last_error()
            )));
        }
        let len = instruction.len();
        Ok(DecodedInstruction::new(instruction, bytes[..len].to_vec()))
    }

    fn relocate(
        &self,
        instructions: &[DecodedInstruction],
        new_base: u64,
        bitness: Bitness,
    ) -> Result<Vec<u8>, CodecError> {
        if instructions.is_empty() {
            return Ok(Vec::new());
        }
        let inner: Vec<iced_x86::Instruction> =
            instructions.iter().map(|i| i.inner).collect();
        let block = InstructionBlock::new(&inner, new_base);
        let result = BlockEncoder::encode(bitness.bits(), block, BlockEncoderOptions::NONE)
            .map_err(|e| CodecError::Encode(e.to_string()))?;
        Ok(result.code_buffer)
    }

    fn emit_near_jump(&self, from: u64, to: u64, bitness: Bitness) -> Option<[u8; NEAR_JUMP_LEN]> {
        let next = from.wrapping_add(NEAR_JUMP_LEN as u64);
        let displacement: i32 = match bitness {
            // 32-bit displacements are modular over the 4 GiB space
            Bitness::X86 => (to as u32).wrapping_sub(next as u32) as i32,
            Bitness::X64 => i32::try_from((to as i64).wrapping_sub(next as i64)).ok()?,
        };
        let mut jump = [0xE9, 0, 0, 0, 0];
        jump[1..].copy_from_slice(&displacement.to_le_bytes());
        Some(jump)
    }

    fn emit_far_jump(&self, from: u64, to: u64, bitness: Bitness) -> Result<Vec<u8>, CodecError> {
        match bitness {
            Bitness::X86 => self
                .emit_near_jump(from, to, bitness)
                .map(|j| j.to_vec())
                .ok_or_else(|| CodecError::Encode("unreachable near jump".into())),
            Bitness::X64 => {
                // jmp qword ptr [rip+0] with the target inline after it
                let mut jump = Vec::with_capacity(14);
                jump.extend_from_slice(&[0xFF, 0x25, 0x00, 0x00, 0x00, 0x00]);
                jump.extend_from_slice(&to.to_le_bytes());
                Ok(jump)
            }
        }
    }
}
