//! The hook composer
//!
//! Turns "run this code at that address" into a committed detour:
//!
//! 1. decide whether a 5-byte near jump can be used and reserve trampoline
//!    memory accordingly (near jumps need the trampoline within the
//!    signed-32 displacement window of the site),
//! 2. decode whole instructions at the site until the jump fits,
//! 3. assemble the trampoline: displaced original instruction (depending
//!    on execution mode), register saves, the injected body, mirrored
//!    restores, the remaining displaced instructions, and a jump back,
//! 4. write the trampoline first, then patch the site with the jump plus
//!    NOP padding.
//!
//! Any failure after the reservation releases it; the site is only ever
//! written as the final step, so a failed hook leaves the target exactly
//! as it was.

use std::sync::Arc;

use crate::alloc::{ReserveRequest, SubReservation};
use crate::codec::{
    Bitness, DecodedInstruction, InstructionCodec, FAR_JUMP_MAX_LEN, MAX_INSTRUCTION_LEN,
    NEAR_JUMP_LEN, NOP,
};
use crate::error::{CodePart, MemoryError, MemoryResult};
use crate::patch::CodeChange;
use crate::process::{ProcessInner, ProtectionStrategy};
use crate::range::MemoryRange;

use super::options::{ExecutionMode, HookOptions, JumpMode, PreservedRegister};
use super::{isolation, CodeEdit, CodeHook, InjectedCode};

/// Inner preference window for trampoline placement (±1 GiB), tried
/// before the full signed-32 displacement window
const NEAR_WINDOW_RADIUS: u64 = 0x4000_0000;

/// The jump that will be written at the site
enum SiteJump {
    Near([u8; NEAR_JUMP_LEN]),
    Far(Vec<u8>),
}

impl SiteJump {
    fn len(&self) -> usize {
        match self {
            SiteJump::Near(bytes) => bytes.len(),
            SiteJump::Far(bytes) => bytes.len(),
        }
    }

    fn bytes(&self) -> &[u8] {
        match self {
            SiteJump::Near(bytes) => bytes,
            SiteJump::Far(bytes) => bytes,
        }
    }
}

/// Install a hook at `site`, displacing at least one instruction
pub(crate) fn install_hook(
    inner: &Arc<ProcessInner>,
    codec: &dyn InstructionCodec,
    site: u64,
    code: &InjectedCode,
    options: &HookOptions,
) -> MemoryResult<CodeHook> {
    install_hook_replacing(inner, codec, site, code, options, 1)
}

/// Install a hook that displaces at least `replace_count` instructions.
///
/// `replace_count` beyond 1 is only meaningful with
/// [`ExecutionMode::ReplaceOriginal`], where the first `replace_count`
/// displaced instructions are not re-emitted.
pub(crate) fn install_hook_replacing(
    inner: &Arc<ProcessInner>,
    codec: &dyn InstructionCodec,
    site: u64,
    code: &InjectedCode,
    options: &HookOptions,
    replace_count: usize,
) -> MemoryResult<CodeHook> {
    validate(inner, site, code)?;
    let bitness = inner.bitness;

    let pre = isolation::pre_block(&options.preserved, bitness);
    let post = isolation::post_block(&options.preserved, bitness);

    // Upper bound on the trampoline size; the overestimate is shrunk back
    // into the pool after assembly. The displaced span is at most the far
    // jump plus one maximal instruction (or `replace_count` instructions),
    // and relocation can grow each displaced instruction.
    let span_bound =
        FAR_JUMP_MAX_LEN.max(replace_count * MAX_INSTRUCTION_LEN) + MAX_INSTRUCTION_LEN;
    let reserve_size =
        pre.len() + post.len() + code.max_len() + 2 * span_bound + FAR_JUMP_MAX_LEN;

    let (mut reservation, near) = reserve_trampoline(inner, site, reserve_size, options, bitness)?;

    let result = compose_and_commit(
        inner,
        codec,
        site,
        code,
        options,
        replace_count,
        &pre,
        &post,
        &mut reservation,
        near,
    );

    match result {
        Ok(original) => {
            tracing::info!(
                "Hooked {:#x}: {} bytes displaced, trampoline at {:#x}",
                site,
                original.len(),
                reservation.address()
            );
            let change = CodeChange::new(Arc::downgrade(inner), site, original);
            Ok(CodeHook::new(change, reservation))
        }
        Err(error) => {
            // All-or-nothing: nothing was written at the site, and the
            // reservation goes back to the pool.
            if let Err(release_error) = reservation.dispose() {
                tracing::warn!("Failed to release reservation after hook error: {release_error}");
            }
            Err(error)
        }
    }
}

/// Reject inputs before any allocation happens
fn validate(inner: &ProcessInner, site: u64, code: &InjectedCode) -> MemoryResult<()> {
    inner.ensure_attached()?;
    if site == 0 {
        return Err(MemoryError::ZeroPointer);
    }
    if !inner.bitness.fits(site) {
        return Err(MemoryError::IncompatibleBitnessPointer(site));
    }
    if code.is_empty() {
        return Err(MemoryError::InvalidArgument("empty injected code".into()));
    }
    Ok(())
}

/// Reserve trampoline memory, preferring near-jump reach.
///
/// Returns the reservation and whether a near jump can target it.
fn reserve_trampoline(
    inner: &Arc<ProcessInner>,
    site: u64,
    size: usize,
    options: &HookOptions,
    bitness: Bitness,
) -> MemoryResult<(SubReservation, bool)> {
    let request = |range| ReserveRequest {
        size,
        executable: true,
        range,
        near: Some(site),
    };

    if !bitness.is_64() {
        // A relative-32 displacement reaches the whole 32-bit space
        let reservation = inner.reserve(request(None))?;
        return Ok((reservation, true));
    }

    // The displacement is relative to the instruction after the jump
    let next = site.wrapping_add(NEAR_JUMP_LEN as u64);
    let full_window = MemoryRange {
        start: next.saturating_sub(1 << 31),
        end: next.saturating_add((1 << 31) - 1),
    };
    let narrow_window = MemoryRange::around(site, NEAR_WINDOW_RADIUS)
        .intersect(&full_window)
        .unwrap_or(full_window);

    let mut last_failure = None;
    for window in [narrow_window, full_window] {
        match inner.reserve(request(Some(window))) {
            Ok(reservation) => return Ok((reservation, true)),
            Err(error) => last_failure = Some(error),
        }
    }

    if options.jump_mode == JumpMode::NearOnly {
        tracing::debug!("No trampoline memory within near-jump reach of {site:#x}");
        return Err(last_failure
            .unwrap_or_else(|| MemoryError::InvalidArgument("near reservation failed".into())));
    }

    tracing::warn!("Falling back to a far jump for hook at {site:#x}");
    let reservation = inner.reserve(request(None))?;
    Ok((reservation, false))
}

/// Decode whole instructions from `buf` until at least `min_bytes` bytes
/// and `min_count` instructions are covered
pub(crate) fn decode_instructions(
    codec: &dyn InstructionCodec,
    buf: &[u8],
    address: u64,
    bitness: Bitness,
    min_bytes: usize,
    min_count: usize,
) -> MemoryResult<(Vec<DecodedInstruction>, usize)> {
    let mut instructions = Vec::new();
    let mut covered = 0usize;
    while covered < min_bytes || instructions.len() < min_count {
        let decoded = codec
            .decode_one(&buf[covered..], address + covered as u64, bitness)
            .map_err(|e| MemoryError::CodeDecoding(e.to_string()))?;
        covered += decoded.len();
        instructions.push(decoded);
    }
    Ok((instructions, covered))
}

/// Everything between reservation and success; errors here make the
/// caller release the reservation.
#[allow(clippy::too_many_arguments)]
fn compose_and_commit(
    inner: &Arc<ProcessInner>,
    codec: &dyn InstructionCodec,
    site: u64,
    code: &InjectedCode,
    options: &HookOptions,
    replace_count: usize,
    pre: &[u8],
    post: &[u8],
    reservation: &mut SubReservation,
    near: bool,
) -> MemoryResult<Vec<u8>> {
    let bitness = inner.bitness;
    let trampoline = reservation.address();

    // The site jump is chosen up front: its length decides how many
    // instructions must be displaced.
    let site_jump = if near {
        codec
            .emit_near_jump(site, trampoline, bitness)
            .map(SiteJump::Near)
            .ok_or_else(|| {
                MemoryError::assembly(
                    CodePart::JumpToInjectedCode,
                    format!("trampoline {trampoline:#x} out of near-jump reach of {site:#x}"),
                )
            })?
    } else {
        SiteJump::Far(
            codec
                .emit_far_jump(site, trampoline, bitness)
                .map_err(|e| MemoryError::assembly(CodePart::JumpToInjectedCode, e.to_string()))?,
        )
    };

    // Read enough for the jump, the requested instruction count, and one
    // maximal instruction straddling the threshold
    let read_len =
        site_jump.len().max(replace_count * MAX_INSTRUCTION_LEN) + MAX_INSTRUCTION_LEN - 1;
    let mut buf = vec![0u8; read_len];
    inner
        .os
        .read_memory(site, &mut buf)
        .map_err(MemoryError::ReadFailure)?;

    let (instructions, displaced) = decode_instructions(
        codec,
        &buf,
        site,
        bitness,
        site_jump.len(),
        replace_count,
    )?;
    let original = buf[..displaced].to_vec();

    // Assemble the trampoline in layout order, relocating each
    // instruction group at its final address
    let mut tram: Vec<u8> = Vec::with_capacity(reservation.size() as usize);

    if options.execution_mode == ExecutionMode::OriginalFirst {
        let bytes = codec
            .relocate(&instructions[..1], trampoline + tram.len() as u64, bitness)
            .map_err(|e| MemoryError::assembly(CodePart::PrependedCode, e.to_string()))?;
        tram.extend_from_slice(&bytes);
    }

    tram.extend_from_slice(pre);

    match code {
        InjectedCode::Bytes(bytes) => tram.extend_from_slice(bytes),
        InjectedCode::Instructions(program) => {
            let wrapped: Vec<DecodedInstruction> = program
                .iter()
                .map(|&i| DecodedInstruction::from_instruction(i))
                .collect();
            let bytes = codec
                .relocate(&wrapped, trampoline + tram.len() as u64, bitness)
                .map_err(|e| MemoryError::assembly(CodePart::InjectedCode, e.to_string()))?;
            tram.extend_from_slice(&bytes);
        }
    }

    tram.extend_from_slice(post);

    let tail_start = match options.execution_mode {
        ExecutionMode::InjectedFirst => 0,
        ExecutionMode::OriginalFirst => 1,
        ExecutionMode::ReplaceOriginal => replace_count.min(instructions.len()),
    };
    if tail_start < instructions.len() {
        let bytes = codec
            .relocate(
                &instructions[tail_start..],
                trampoline + tram.len() as u64,
                bitness,
            )
            .map_err(|e| MemoryError::assembly(CodePart::AppendedCode, e.to_string()))?;
        tram.extend_from_slice(&bytes);
    }

    // Jump back to the first byte after the displaced region
    let resume = site + displaced as u64;
    let jump_from = trampoline + tram.len() as u64;
    match codec.emit_near_jump(jump_from, resume, bitness) {
        Some(jump) => tram.extend_from_slice(&jump),
        None => {
            let jump = codec
                .emit_far_jump(jump_from, resume, bitness)
                .map_err(|e| MemoryError::assembly(CodePart::Unknown, e.to_string()))?;
            tram.extend_from_slice(&jump);
        }
    }

    if tram.len() as u64 > reservation.size() {
        return Err(MemoryError::assembly(
            CodePart::Unknown,
            format!(
                "trampoline of {} bytes exceeds the {} reserved",
                tram.len(),
                reservation.size()
            ),
        ));
    }
    if (tram.len() as u64) < reservation.size() {
        reservation.shrink(tram.len())?;
    }

    // Commit: trampoline first, so a failure here leaves the site intact
    inner
        .os
        .write_memory(trampoline, &tram)
        .map_err(MemoryError::WriteFailure)?;

    let mut patch = site_jump.bytes().to_vec();
    patch.resize(displaced, NOP);
    inner.write_protected(site, &patch, ProtectionStrategy::RemoveAndRestore)?;

    Ok(original)
}

/// Replace the next `instruction_count` instructions at `site` with
/// `code`.
///
/// When the assembled replacement fits inside the bytes those
/// instructions occupy, they are overwritten directly (NOP-padded) and a
/// plain [`CodeChange`] is returned. Otherwise the replacement goes
/// through a full `ReplaceOriginal` hook.
pub(crate) fn replace_code_at(
    inner: &Arc<ProcessInner>,
    codec: &dyn InstructionCodec,
    site: u64,
    instruction_count: usize,
    code: &InjectedCode,
    preserved: &[PreservedRegister],
) -> MemoryResult<CodeEdit> {
    validate(inner, site, code)?;
    if instruction_count < 1 {
        return Err(MemoryError::InvalidArgument(
            "instruction count must be at least 1".into(),
        ));
    }
    let bitness = inner.bitness;

    let mut buf = vec![0u8; instruction_count * MAX_INSTRUCTION_LEN];
    inner
        .os
        .read_memory(site, &mut buf)
        .map_err(MemoryError::ReadFailure)?;
    let (_, span) = decode_instructions(codec, &buf, site, bitness, 0, instruction_count)?;

    // Length-conservative fit decision: assemble once, at the site
    let assembled = match code {
        InjectedCode::Bytes(bytes) => bytes.clone(),
        InjectedCode::Instructions(program) => {
            let wrapped: Vec<DecodedInstruction> = program
                .iter()
                .map(|&i| DecodedInstruction::from_instruction(i))
                .collect();
            codec
                .relocate(&wrapped, site, bitness)
                .map_err(|e| MemoryError::assembly(CodePart::InjectedCode, e.to_string()))?
        }
    };

    if assembled.len() <= span {
        let original = buf[..span].to_vec();
        let mut patch = assembled;
        patch.resize(span, NOP);
        inner.write_protected(site, &patch, ProtectionStrategy::RemoveAndRestore)?;
        tracing::info!("Replaced {span} bytes in place at {site:#x}");
        return Ok(CodeEdit::Patched(CodeChange::new(
            Arc::downgrade(inner),
            site,
            original,
        )));
    }

    let options = HookOptions::new(ExecutionMode::ReplaceOriginal)
        .preserve(preserved.iter().copied());
    let hook = install_hook_replacing(inner, codec, site, code, &options, instruction_count)?;
    Ok(CodeEdit::Hooked(hook))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hook::{CodeEdit, HookState, InjectedCode};
    use crate::process::ProcessMemory;
    use mesmer_sys::mock::MockProcess;
    use mesmer_sys::Protection;

    /// Region base of the fake code segment
    const CODE_BASE: u64 = 0x0040_1000;
    /// Hook site: a `mov dword ptr [rcx+38h], 0F1113h` inside the region
    const SITE: u64 = 0x0040_1010;
    const MOV_RCX38: [u8; 7] = [0xC7, 0x41, 0x38, 0x13, 0x11, 0x0F, 0x00];

    fn code_region() -> Vec<u8> {
        let mut bytes = vec![0x90u8; 64];
        bytes[16..23].copy_from_slice(&MOV_RCX38);
        bytes[23] = 0xC3; // ret, marks the byte after the site instruction
        bytes
    }

    fn setup_64() -> (ProcessMemory, MockProcess) {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .try_init();
        let mock = MockProcess::new(64);
        mock.map_region(CODE_BASE, code_region(), Protection::READ_EXECUTE);
        let process = ProcessMemory::attach(Box::new(mock.clone())).unwrap();
        (process, mock)
    }

    fn near_jump_target(site: u64, bytes: &[u8]) -> u64 {
        assert_eq!(bytes[0], 0xE9);
        let disp = i32::from_le_bytes(bytes[1..5].try_into().unwrap());
        site.wrapping_add(5).wrapping_add(disp as i64 as u64)
    }

    #[test]
    fn test_replace_original_hook() {
        let (process, mock) = setup_64();
        let mut asm = iced_x86::code_asm::CodeAssembler::new(64).unwrap();
        asm.mov(
            iced_x86::code_asm::dword_ptr(iced_x86::code_asm::rcx + 0x38),
            123456u32,
        )
        .unwrap();
        let code = InjectedCode::Instructions(asm.take_instructions());

        let hook = process
            .hook(SITE, code, &HookOptions::new(ExecutionMode::ReplaceOriginal))
            .unwrap();
        assert_eq!(hook.state(), HookState::Hooked);
        let trampoline = hook.trampoline_address().unwrap();

        // Site: a near jump to the trampoline, NOP-padded to the 7-byte
        // instruction boundary
        let site_bytes = mock.snapshot(SITE, 7).unwrap();
        assert_eq!(near_jump_target(SITE, &site_bytes), trampoline);
        assert_eq!(&site_bytes[5..], &[0x90, 0x90]);
        // The ret after the displaced instruction is untouched
        assert_eq!(mock.snapshot(SITE + 7, 1).unwrap(), vec![0xC3]);

        // Trampoline: the replacement mov (123456 = 0x1E240), then the
        // jump back to the first byte after the displaced region
        let tram_bytes = mock.snapshot(trampoline, 12).unwrap();
        assert_eq!(&tram_bytes[..7], &[0xC7, 0x41, 0x38, 0x40, 0xE2, 0x01, 0x00]);
        assert_eq!(near_jump_target(trampoline + 7, &tram_bytes[7..]), SITE + 7);
    }

    #[test]
    fn test_injected_first_preserves_register() {
        let (process, mock) = setup_64();
        // mov rcx, 0 - would corrupt RCX for the displaced mov without
        // the push/pop bracket
        let body = InjectedCode::from_hex("48 C7 C1 00 00 00 00").unwrap();
        let hook = process
            .insert_code_at(SITE, body, [PreservedRegister::Rcx])
            .unwrap();
        let trampoline = hook.trampoline_address().unwrap();

        let mut expected = vec![0x51]; // push rcx
        expected.extend_from_slice(&[0x48, 0xC7, 0xC1, 0x00, 0x00, 0x00, 0x00]);
        expected.push(0x59); // pop rcx
        expected.extend_from_slice(&MOV_RCX38); // displaced original
        let tram_bytes = mock.snapshot(trampoline, expected.len() + 5).unwrap();
        assert_eq!(&tram_bytes[..expected.len()], &expected[..]);
        assert_eq!(
            near_jump_target(trampoline + expected.len() as u64, &tram_bytes[expected.len()..]),
            SITE + 7
        );
    }

    #[test]
    fn test_original_first_with_flags() {
        let (process, mock) = setup_64();
        let hook = process
            .hook(
                SITE,
                InjectedCode::Bytes(vec![0x90]),
                &HookOptions::new(ExecutionMode::OriginalFirst)
                    .preserve([PreservedRegister::Flags]),
            )
            .unwrap();
        let trampoline = hook.trampoline_address().unwrap();

        // Original instruction first, then pushf / body / popf
        let mut expected = MOV_RCX38.to_vec();
        expected.extend_from_slice(&[0x9C, 0x90, 0x9D]);
        let tram_bytes = mock.snapshot(trampoline, expected.len() + 5).unwrap();
        assert_eq!(&tram_bytes[..expected.len()], &expected[..]);
        assert_eq!(tram_bytes[expected.len()], 0xE9);
    }

    #[test]
    fn test_revert_restores_site_byte_for_byte() {
        let (process, mock) = setup_64();
        let baseline = mock.snapshot(CODE_BASE, 64).unwrap();
        let mut hook = process
            .insert_code_at(SITE, InjectedCode::Bytes(vec![0x90]), [])
            .unwrap();
        assert_ne!(mock.snapshot(CODE_BASE, 64).unwrap(), baseline);
        assert_eq!(hook.original_bytes(), &MOV_RCX38);

        hook.revert().unwrap();
        assert_eq!(hook.state(), HookState::Reverted);
        assert_eq!(mock.snapshot(CODE_BASE, 64).unwrap(), baseline);

        // Idempotent, and the trampoline can then be released
        hook.revert().unwrap();
        hook.release_trampoline().unwrap();
        hook.release_trampoline().unwrap();
        assert_eq!(hook.trampoline_address(), None);
    }

    #[test]
    fn test_no_instruction_is_split() {
        let (process, mock) = setup_64();
        // A stream of 2-byte NOPs: 5 jump bytes land mid-instruction, so
        // the composer must displace 6 bytes
        let mut bytes = Vec::new();
        for _ in 0..32 {
            bytes.extend_from_slice(&[0x66, 0x90]);
        }
        mock.map_region(0x0050_0000, bytes, Protection::READ_EXECUTE);

        let hook = process
            .hook(
                0x0050_0000u64,
                InjectedCode::Bytes(vec![0x90]),
                &HookOptions::new(ExecutionMode::ReplaceOriginal),
            )
            .unwrap();
        assert_eq!(hook.original_bytes().len(), 6);

        let site_bytes = mock.snapshot(0x0050_0000, 8).unwrap();
        assert_eq!(site_bytes[0], 0xE9);
        assert_eq!(site_bytes[5], 0x90); // one pad NOP: 5 + 1 = 6
        assert_eq!(&site_bytes[6..8], &[0x66, 0x90]); // next instruction intact
    }

    #[test]
    fn test_replace_code_in_place() {
        let (process, mock) = setup_64();
        let mut edit = process
            .replace_code_at(SITE, 1, InjectedCode::Bytes(vec![0x90]), [])
            .unwrap();
        assert!(matches!(edit, CodeEdit::Patched(_)));
        // The whole 7-byte instruction became NOPs, neighbors untouched
        assert_eq!(mock.snapshot(SITE, 7).unwrap(), vec![0x90; 7]);
        assert_eq!(mock.snapshot(SITE + 7, 1).unwrap(), vec![0xC3]);
        // No trampoline memory was taken
        assert!(mock.live_allocations().is_empty());

        edit.revert().unwrap();
        assert_eq!(mock.snapshot(SITE, 7).unwrap(), MOV_RCX38.to_vec());
    }

    #[test]
    fn test_replace_code_falls_back_to_hook() {
        let (process, mock) = setup_64();
        // Nine bytes cannot fit the 7-byte instruction in place
        let edit = process
            .replace_code_at(SITE, 1, InjectedCode::Bytes(vec![0xCC; 9]), [])
            .unwrap();
        let CodeEdit::Hooked(hook) = edit else {
            panic!("expected a hook fallback");
        };
        let trampoline = hook.trampoline_address().unwrap();
        assert_eq!(mock.snapshot(SITE, 1).unwrap(), vec![0xE9]);
        // The trampoline body is the replacement; the displaced mov is
        // dropped, not re-emitted
        let tram_bytes = mock.snapshot(trampoline, 10).unwrap();
        assert_eq!(&tram_bytes[..9], &[0xCC; 9]);
        assert_eq!(tram_bytes[9], 0xE9);
    }

    #[test]
    fn test_near_only_fails_cleanly_when_out_of_reach() {
        let (_, mock) = setup_64();
        // Trampoline memory only exists >2 GiB from the site
        mock.set_arena(0x3_0000_0000, 0x3_0100_0000);
        let process = ProcessMemory::attach(Box::new(mock.clone())).unwrap();
        let baseline = mock.snapshot(CODE_BASE, 64).unwrap();

        let err = process
            .hook(
                SITE,
                InjectedCode::Bytes(vec![0x90]),
                &HookOptions::default().jump_mode(JumpMode::NearOnly),
            )
            .unwrap_err();
        assert!(matches!(err, MemoryError::AllocationFailure(_)));
        // Nothing was modified anywhere, nothing stayed allocated
        assert_eq!(mock.snapshot(CODE_BASE, 64).unwrap(), baseline);
        assert!(mock.live_allocations().is_empty());
    }

    #[test]
    fn test_far_jump_fallback() {
        let (_, mock) = setup_64();
        mock.set_arena(0x3_0000_0000, 0x3_0100_0000);
        let process = ProcessMemory::attach(Box::new(mock.clone())).unwrap();

        let hook = process
            .hook(
                SITE,
                InjectedCode::Bytes(vec![0x90]),
                &HookOptions::new(ExecutionMode::ReplaceOriginal),
            )
            .unwrap();
        let trampoline = hook.trampoline_address().unwrap();
        assert!(trampoline >= 0x3_0000_0000);

        // Site: FF 25 00000000 + inline absolute target, 14 bytes displaced
        let site_bytes = mock.snapshot(SITE, 14).unwrap();
        assert_eq!(&site_bytes[..6], &[0xFF, 0x25, 0x00, 0x00, 0x00, 0x00]);
        assert_eq!(
            u64::from_le_bytes(site_bytes[6..14].try_into().unwrap()),
            trampoline
        );
        assert_eq!(hook.original_bytes().len(), 14);

        // The jump back must also be far (same distance the other way):
        // body NOP, re-emitted displaced tail (ret + 6 NOPs), far jump
        let tram_bytes = mock.snapshot(trampoline, 22).unwrap();
        assert_eq!(tram_bytes[0], 0x90);
        assert_eq!(tram_bytes[1], 0xC3);
        assert_eq!(&tram_bytes[8..14], &[0xFF, 0x25, 0x00, 0x00, 0x00, 0x00]);
        assert_eq!(
            u64::from_le_bytes(tram_bytes[14..22].try_into().unwrap()),
            SITE + 14
        );
    }

    #[test]
    fn test_input_validation() {
        let (process, mock) = setup_64();

        let err = process
            .hook(SITE, InjectedCode::Bytes(Vec::new()), &HookOptions::default())
            .unwrap_err();
        assert!(matches!(err, MemoryError::InvalidArgument(_)));
        assert!(mock.live_allocations().is_empty());

        let err = process
            .hook(0u64, InjectedCode::Bytes(vec![0x90]), &HookOptions::default())
            .unwrap_err();
        assert!(matches!(err, MemoryError::ZeroPointer));

        let err = process
            .replace_code_at(SITE, 0, InjectedCode::Bytes(vec![0x90]), [])
            .unwrap_err();
        assert!(matches!(err, MemoryError::InvalidArgument(_)));

        process.detach();
        let err = process
            .hook(SITE, InjectedCode::Bytes(vec![0x90]), &HookOptions::default())
            .unwrap_err();
        assert!(matches!(err, MemoryError::DetachedProcess));
    }

    #[test]
    fn test_wide_site_rejected_on_32_bit() {
        let mock = MockProcess::new(32);
        let process = ProcessMemory::attach(Box::new(mock)).unwrap();
        let err = process
            .hook(
                0x1_0000_0000u64,
                InjectedCode::Bytes(vec![0x90]),
                &HookOptions::default(),
            )
            .unwrap_err();
        assert!(matches!(err, MemoryError::IncompatibleBitnessPointer(_)));
    }

    #[test]
    fn test_decode_failure_releases_reservation() {
        let (process, mock) = setup_64();
        // 0x66 prefixes never terminate: decoding cannot cover the jump
        mock.map_region(0x0060_0000, vec![0x66; 64], Protection::READ_EXECUTE);
        let err = process
            .hook(
                0x0060_0000u64,
                InjectedCode::Bytes(vec![0x90]),
                &HookOptions::default(),
            )
            .unwrap_err();
        assert!(matches!(err, MemoryError::CodeDecoding(_)));
        // The reservation was released; the parent block may remain
        // pooled but holds no live reservation
        process.release_unused_memory().unwrap();
        assert!(mock.live_allocations().is_empty());
    }
}
