//! Process attachment
//!
//! [`ProcessMemory`] is the public face of the library: it owns the OS
//! facade handle, the allocation pool and the codec, and every derived
//! handle (reservations, code changes, hooks) points back at it weakly.
//! Dropping the attachment frees the pool and closes the process; the
//! weak handles then fail with [`MemoryError::DetachedProcess`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use mesmer_sys::{ModuleInfo, ProcessOs, Protection, WaitOutcome};
use parking_lot::{Mutex, RwLock};

use crate::alloc::{PoolState, ReserveRequest, SubReservation};
use crate::codec::{Bitness, IcedCodec};
use crate::error::{MemoryError, MemoryResult, PathError};
use crate::hook::{
    self, CodeEdit, CodeHook, ExecutionMode, HookOptions, InjectedCode, PreservedRegister,
};
use crate::path::PointerPath;
use crate::range::MemoryRange;
use crate::strings::{self, StringSettings};

/// How writes deal with write-protected pages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProtectionStrategy {
    /// Write without touching protection (fails on protected pages)
    Ignore,
    /// Make the page writable first and leave it that way
    Remove,
    /// Make the page writable, write, then restore the old protection
    #[default]
    RemoveAndRestore,
}

/// Something that designates an address: either directly, or through a
/// pointer path evaluated at call time
#[derive(Debug, Clone)]
pub enum PointerTarget {
    Address(u64),
    Path(PointerPath),
}

impl From<u64> for PointerTarget {
    fn from(address: u64) -> Self {
        PointerTarget::Address(address)
    }
}

impl From<PointerPath> for PointerTarget {
    fn from(path: PointerPath) -> Self {
        PointerTarget::Path(path)
    }
}

impl From<&PointerPath> for PointerTarget {
    fn from(path: &PointerPath) -> Self {
        PointerTarget::Path(path.clone())
    }
}

impl std::str::FromStr for PointerTarget {
    type Err = crate::path::PathParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(PointerTarget::Path(s.parse()?))
    }
}

/// Shared state behind every attachment and its weak handles
pub(crate) struct ProcessInner {
    pub(crate) os: Box<dyn ProcessOs>,
    pub(crate) pid: u32,
    pub(crate) bitness: Bitness,
    pub(crate) modules: RwLock<Vec<ModuleInfo>>,
    pub(crate) pool: Mutex<PoolState>,
    pub(crate) attached: AtomicBool,
}

impl ProcessInner {
    pub(crate) fn ensure_attached(&self) -> MemoryResult<()> {
        if self.attached.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(MemoryError::DetachedProcess)
        }
    }

    /// Write bytes, handling page protection per the strategy.
    ///
    /// A backend that cannot change protection (Linux cross-process) gets
    /// a plain write; the kernel interface there ignores page protection
    /// anyway.
    pub(crate) fn write_protected(
        &self,
        address: u64,
        bytes: &[u8],
        strategy: ProtectionStrategy,
    ) -> MemoryResult<()> {
        self.ensure_attached()?;
        if bytes.is_empty() {
            return Ok(());
        }

        let previous = match strategy {
            ProtectionStrategy::Ignore => None,
            ProtectionStrategy::Remove | ProtectionStrategy::RemoveAndRestore => {
                match self
                    .os
                    .set_protection(address, bytes.len(), Protection::READ_WRITE_EXECUTE)
                {
                    Ok(old) => Some(old),
                    Err(mesmer_sys::OsError::Unsupported(op)) => {
                        tracing::debug!("Protection change unavailable ({op}), writing directly");
                        None
                    }
                    Err(error) => return Err(MemoryError::WriteFailure(error)),
                }
            }
        };

        let result = self
            .os
            .write_memory(address, bytes)
            .map_err(MemoryError::WriteFailure);

        if strategy == ProtectionStrategy::RemoveAndRestore {
            if let Some(previous) = previous {
                if let Err(error) = self.os.set_protection(address, bytes.len(), previous) {
                    tracing::warn!("Failed to restore protection at {address:#x}: {error}");
                }
            }
        }

        result
    }

    /// Reserve memory from the pool, handing out a weak-backed handle
    pub(crate) fn reserve(
        self: &Arc<Self>,
        request: ReserveRequest,
    ) -> MemoryResult<SubReservation> {
        self.ensure_attached()?;
        let slot = self.pool.lock().reserve(self.os.as_ref(), &request)?;
        Ok(SubReservation {
            process: Arc::downgrade(self),
            parent: slot.parent,
            key: slot.key,
            address: slot.range.start,
            size: slot.range.size(),
        })
    }
}

impl Drop for ProcessInner {
    fn drop(&mut self) {
        self.pool.get_mut().release_all(self.os.as_ref());
        tracing::debug!("Detached from process {}", self.pid);
    }
}

/// An attachment to a running process.
///
/// All operations are synchronous and run on the caller's thread. The
/// internal pool lock makes concurrent calls memory-safe, but writes to
/// the same instructions from two attachments race against the target's
/// instruction fetch; callers needing atomicity must serialize externally
/// (and pause the target's threads, which is out of scope here).
pub struct ProcessMemory {
    inner: Arc<ProcessInner>,
    codec: IcedCodec,
}

impl ProcessMemory {
    /// Attach through an already-opened facade handle.
    ///
    /// This is also the door tests walk through with a
    /// [`MockProcess`](mesmer_sys::mock::MockProcess).
    pub fn attach(os: Box<dyn ProcessOs>) -> MemoryResult<Self> {
        let pid = os.pid();
        let bitness = if os.is_64_bit().map_err(MemoryError::AttachFailure)? {
            Bitness::X64
        } else {
            Bitness::X86
        };
        let modules = os.modules().map_err(MemoryError::AttachFailure)?;
        tracing::info!(
            "Attached to process {pid} ({} modules, {}-bit)",
            modules.len(),
            bitness.bits()
        );
        Ok(Self {
            inner: Arc::new(ProcessInner {
                os,
                pid,
                bitness,
                modules: RwLock::new(modules),
                pool: Mutex::new(PoolState::default()),
                attached: AtomicBool::new(true),
            }),
            codec: IcedCodec,
        })
    }

    /// Attach to a process by pid
    pub fn attach_by_pid(pid: u32) -> MemoryResult<Self> {
        let os = mesmer_sys::open_by_pid(pid).map_err(MemoryError::AttachFailure)?;
        Self::attach(os)
    }

    /// Attach to the first process with the given executable name
    pub fn attach_by_name(name: &str) -> MemoryResult<Self> {
        let os = mesmer_sys::open_by_name(name).map_err(MemoryError::AttachFailure)?;
        Self::attach(os)
    }

    pub fn pid(&self) -> u32 {
        self.inner.pid
    }

    pub fn bitness(&self) -> Bitness {
        self.inner.bitness
    }

    pub fn is_attached(&self) -> bool {
        self.inner.attached.load(Ordering::Acquire)
    }

    /// Invalidate the attachment. Every later operation, including through
    /// outstanding hooks and reservations, fails with
    /// [`MemoryError::DetachedProcess`].
    pub fn detach(&self) {
        self.inner.attached.store(false, Ordering::Release);
    }

    /// The module list captured at attach (or last refresh)
    pub fn modules(&self) -> Vec<ModuleInfo> {
        self.inner.modules.read().clone()
    }

    /// Re-query the target's module list
    pub fn refresh_modules(&self) -> MemoryResult<()> {
        self.inner.ensure_attached()?;
        let modules = self
            .inner
            .os
            .modules()
            .map_err(MemoryError::AttachFailure)?;
        *self.inner.modules.write() = modules;
        Ok(())
    }

    // ---- pointer paths ----------------------------------------------

    /// Resolve a target to a concrete address
    pub fn evaluate(&self, target: impl Into<PointerTarget>) -> MemoryResult<u64> {
        match target.into() {
            PointerTarget::Address(address) => {
                self.inner.ensure_attached()?;
                Ok(address)
            }
            PointerTarget::Path(path) => self.resolve_path(&path),
        }
    }

    /// Walk a pointer path against the live process
    fn resolve_path(&self, path: &PointerPath) -> MemoryResult<u64> {
        self.inner.ensure_attached()?;
        let bitness = self.inner.bitness;

        let (mut address, rest) = match path.module() {
            Some((name, offset)) => {
                let base = {
                    let modules = self.inner.modules.read();
                    modules
                        .iter()
                        .find(|m| m.name.eq_ignore_ascii_case(name))
                        .map(|m| m.base)
                }
                .ok_or_else(|| PathError::ModuleNotFound(name.to_string()))?;
                let address = offset
                    .offset_address(base)
                    .ok_or(PathError::OffsetOverflow { step: 0 })?;
                (address, path.offsets())
            }
            None => {
                let (first, rest) = path
                    .offsets()
                    .split_first()
                    .ok_or_else(|| MemoryError::InvalidArgument("empty pointer path".into()))?;
                (first.magnitude(), rest)
            }
        };
        if !bitness.fits(address) {
            return Err(MemoryError::IncompatibleBitnessPointer(address));
        }

        for (step, offset) in rest.iter().enumerate() {
            let pointer = self.read_pointer_at(address)?;
            if pointer == 0 {
                return Err(PathError::NullPointer { step }.into());
            }
            address = offset
                .offset_address(pointer)
                .ok_or(PathError::OffsetOverflow { step })?;
            if !bitness.fits(address) {
                return Err(MemoryError::IncompatibleBitnessPointer(address));
            }
        }
        Ok(address)
    }

    fn read_pointer_at(&self, address: u64) -> MemoryResult<u64> {
        let mut buf = [0u8; 8];
        let size = self.inner.bitness.pointer_size();
        self.inner
            .os
            .read_memory(address, &mut buf[..size])
            .map_err(MemoryError::ReadFailure)?;
        Ok(u64::from_le_bytes(buf))
    }

    // ---- raw and typed access ---------------------------------------

    /// Read `len` bytes at the target
    pub fn read_bytes(
        &self,
        target: impl Into<PointerTarget>,
        len: usize,
    ) -> MemoryResult<Vec<u8>> {
        let address = self.evaluate(target)?;
        let mut buf = vec![0u8; len];
        self.inner
            .os
            .read_memory(address, &mut buf)
            .map_err(MemoryError::ReadFailure)?;
        Ok(buf)
    }

    fn read_into(&self, target: PointerTarget, buf: &mut [u8]) -> MemoryResult<()> {
        let address = self.evaluate(target)?;
        self.inner
            .os
            .read_memory(address, buf)
            .map_err(MemoryError::ReadFailure)
    }

    /// Write bytes at the target with the default
    /// [`ProtectionStrategy::RemoveAndRestore`]
    pub fn write_bytes(
        &self,
        target: impl Into<PointerTarget>,
        bytes: &[u8],
    ) -> MemoryResult<()> {
        self.write_bytes_with(target, bytes, ProtectionStrategy::default())
    }

    /// Write bytes with an explicit protection strategy
    pub fn write_bytes_with(
        &self,
        target: impl Into<PointerTarget>,
        bytes: &[u8],
        strategy: ProtectionStrategy,
    ) -> MemoryResult<()> {
        let address = self.evaluate(target)?;
        self.inner.write_protected(address, bytes, strategy)
    }

    /// Read a `bool` (any non-zero byte is true)
    pub fn read_bool(&self, target: impl Into<PointerTarget>) -> MemoryResult<bool> {
        Ok(self.read_u8(target)? != 0)
    }

    pub fn write_bool(&self, target: impl Into<PointerTarget>, value: bool) -> MemoryResult<()> {
        self.write_u8(target, u8::from(value))
    }

    /// Read a pointer-sized value (4 or 8 bytes per the target's bitness)
    pub fn read_pointer(&self, target: impl Into<PointerTarget>) -> MemoryResult<u64> {
        let address = self.evaluate(target)?;
        self.read_pointer_at(address)
    }

    /// Write a pointer-sized value, rejecting values that do not fit the
    /// target's bitness
    pub fn write_pointer(
        &self,
        target: impl Into<PointerTarget>,
        value: u64,
    ) -> MemoryResult<()> {
        if !self.inner.bitness.fits(value) {
            return Err(MemoryError::IncompatibleBitnessPointer(value));
        }
        let size = self.inner.bitness.pointer_size();
        self.write_bytes(target, &value.to_le_bytes()[..size])
    }

    /// Read a string laid out per `settings`
    pub fn read_string(
        &self,
        target: impl Into<PointerTarget>,
        settings: &StringSettings,
    ) -> MemoryResult<String> {
        let mut address = self.evaluate(target)?;
        let unit = settings.encoding.unit_size();

        let content_len = match settings.length_prefix {
            Some(prefix) => {
                let mut buf = [0u8; 8];
                let size = usize::from(prefix.size_bytes).min(8);
                self.inner
                    .os
                    .read_memory(address, &mut buf[..size])
                    .map_err(MemoryError::ReadFailure)?;
                address += size as u64;
                let units_stored = u64::from_le_bytes(buf) as usize;
                (units_stored * usize::from(prefix.unit_bytes)).min(settings.max_units * unit)
            }
            None => settings.max_units * unit,
        };

        // Read in chunks so a terminator near the start does not require
        // the whole cap to be mapped; shrink the chunk when a read fails
        // at the edge of mapped memory
        let mut data = Vec::with_capacity(content_len.min(256));
        let mut chunk = [0u8; 64];
        'read: while data.len() < content_len {
            let mut step = chunk.len().min(content_len - data.len());
            loop {
                match self
                    .inner
                    .os
                    .read_memory(address + data.len() as u64, &mut chunk[..step])
                {
                    Ok(()) => {
                        data.extend_from_slice(&chunk[..step]);
                        break;
                    }
                    Err(_) if step > unit => step = (step / 2).max(unit),
                    Err(error) => {
                        // A short string against unmapped memory is fine
                        // as long as the terminator was already seen
                        if settings.null_terminated && contains_terminator(&data, unit) {
                            break 'read;
                        }
                        return Err(MemoryError::ReadFailure(error));
                    }
                }
            }
            if settings.null_terminated && contains_terminator(&data, unit) {
                break;
            }
        }
        Ok(strings::decode_content(settings, &data))
    }

    /// Write a string laid out per `settings`
    pub fn write_string(
        &self,
        target: impl Into<PointerTarget>,
        text: &str,
        settings: &StringSettings,
    ) -> MemoryResult<()> {
        let bytes = strings::encode(settings, text)?;
        self.write_bytes(target, &bytes)
    }

    // ---- allocation -------------------------------------------------

    /// Reserve memory in the target, optionally constrained to a range
    /// and/or placed near an address
    pub fn reserve(
        &self,
        size: usize,
        executable: bool,
        range: Option<MemoryRange>,
        near: Option<u64>,
    ) -> MemoryResult<SubReservation> {
        self.inner.reserve(ReserveRequest {
            size,
            executable,
            range,
            near,
        })
    }

    /// Free pool blocks that no longer hold any reservation
    pub fn release_unused_memory(&self) -> MemoryResult<()> {
        self.inner.ensure_attached()?;
        self.inner
            .pool
            .lock()
            .release_unused_parents(self.inner.os.as_ref());
        Ok(())
    }

    // ---- hooking ----------------------------------------------------

    /// Divert execution at the target into `code`, per `options`
    pub fn hook(
        &self,
        target: impl Into<PointerTarget>,
        code: impl Into<InjectedCode>,
        options: &HookOptions,
    ) -> MemoryResult<CodeHook> {
        let site = self.evaluate(target)?;
        hook::install_hook(&self.inner, &self.codec, site, &code.into(), options)
    }

    /// Run `code` before the instruction at the target, preserving the
    /// given registers around it
    pub fn insert_code_at(
        &self,
        target: impl Into<PointerTarget>,
        code: impl Into<InjectedCode>,
        preserved: impl IntoIterator<Item = PreservedRegister>,
    ) -> MemoryResult<CodeHook> {
        let options = HookOptions::new(ExecutionMode::InjectedFirst).preserve(preserved);
        self.hook(target, code, &options)
    }

    /// Replace the next `instruction_count` instructions at the target
    /// with `code`: in place when it fits, through a hook when it does not
    pub fn replace_code_at(
        &self,
        target: impl Into<PointerTarget>,
        instruction_count: usize,
        code: impl Into<InjectedCode>,
        preserved: impl IntoIterator<Item = PreservedRegister>,
    ) -> MemoryResult<CodeEdit> {
        let site = self.evaluate(target)?;
        let preserved: Vec<PreservedRegister> = preserved.into_iter().collect();
        hook::replace_code_at(
            &self.inner,
            &self.codec,
            site,
            instruction_count,
            &code.into(),
            &preserved,
        )
    }

    // ---- remote threads ---------------------------------------------

    /// Start a thread in the target at the given entry point and wait for
    /// it, up to `timeout`. This is the loader-invocation path.
    pub fn run_remote(
        &self,
        entry: impl Into<PointerTarget>,
        parameter: u64,
        timeout: Duration,
    ) -> MemoryResult<WaitOutcome> {
        let entry = self.evaluate(entry)?;
        if entry == 0 {
            return Err(MemoryError::ZeroPointer);
        }
        let token = self
            .inner
            .os
            .spawn_thread(entry, parameter)
            .map_err(MemoryError::ThreadFailure)?;
        self.inner
            .os
            .join_thread(token, timeout)
            .map_err(MemoryError::ThreadFailure)
    }
}

fn contains_terminator(data: &[u8], unit: usize) -> bool {
    data.chunks_exact(unit).any(|c| c.iter().all(|&b| b == 0))
}

macro_rules! scalar_accessors {
    ($(($name:ident, $ty:ty, $len:expr)),* $(,)?) => {
        paste::paste! {
            impl ProcessMemory {
                $(
                    #[doc = concat!("Read a `", stringify!($ty), "` at the target")]
                    pub fn [<read_ $name>](
                        &self,
                        target: impl Into<PointerTarget>,
                    ) -> MemoryResult<$ty> {
                        let mut buf = [0u8; $len];
                        self.read_into(target.into(), &mut buf)?;
                        Ok(<$ty>::from_le_bytes(buf))
                    }

                    #[doc = concat!("Write a `", stringify!($ty), "` at the target")]
                    pub fn [<write_ $name>](
                        &self,
                        target: impl Into<PointerTarget>,
                        value: $ty,
                    ) -> MemoryResult<()> {
                        self.write_bytes(target, &value.to_le_bytes())
                    }
                )*
            }
        }
    };
}

scalar_accessors!(
    (u8, u8, 1),
    (i8, i8, 1),
    (u16, u16, 2),
    (i16, i16, 2),
    (u32, u32, 4),
    (i32, i32, 4),
    (u64, u64, 8),
    (i64, i64, 8),
    (f32, f32, 4),
    (f64, f64, 8),
);

#[cfg(test)]
mod tests {
    use super::*;
    use mesmer_sys::mock::MockProcess;

    fn attach(mock: &MockProcess) -> ProcessMemory {
        ProcessMemory::attach(Box::new(mock.clone())).unwrap()
    }

    fn mock_with_data() -> MockProcess {
        let mock = MockProcess::new(64);
        mock.add_module("game.dll", 0x0040_0000, 0x0020_0000);
        mock
    }

    #[test]
    fn test_typed_roundtrip() {
        let mock = mock_with_data();
        mock.map_region(0x1000, vec![0u8; 256], Protection::READ_WRITE);
        let process = attach(&mock);

        process.write_u32(0x1010u64, 0xDEAD_BEEF).unwrap();
        assert_eq!(process.read_u32(0x1010u64).unwrap(), 0xDEAD_BEEF);

        process.write_i64(0x1020u64, -42).unwrap();
        assert_eq!(process.read_i64(0x1020u64).unwrap(), -42);

        process.write_f32(0x1030u64, 1.5).unwrap();
        assert_eq!(process.read_f32(0x1030u64).unwrap(), 1.5);

        process.write_bool(0x1040u64, true).unwrap();
        assert!(process.read_bool(0x1040u64).unwrap());
    }

    #[test]
    fn test_pointer_width_follows_bitness() {
        let mock32 = MockProcess::new(32);
        mock32.map_region(0x1000, vec![0u8; 64], Protection::READ_WRITE);
        let process = attach(&mock32);
        assert_eq!(process.bitness(), Bitness::X86);

        process.write_pointer(0x1000u64, 0x1234_5678).unwrap();
        // Only 4 bytes were written
        assert_eq!(mock32.snapshot(0x1000, 8).unwrap()[4..], [0u8; 4]);
        assert_eq!(process.read_pointer(0x1000u64).unwrap(), 0x1234_5678);

        assert!(matches!(
            process.write_pointer(0x1000u64, 0x1_0000_0000),
            Err(MemoryError::IncompatibleBitnessPointer(_))
        ));
    }

    #[test]
    fn test_evaluate_module_chain() {
        let mock = mock_with_data();
        // game.dll+1F4680 holds a pointer to 0x50_0000; *p + 1C holds a
        // pointer to 0x60_0000; final address is 0x60_0000 + C
        mock.map_region(0x005F_4000, vec![0u8; 0x1000], Protection::READ_WRITE);
        mock.map_region(0x0050_0000, vec![0u8; 0x100], Protection::READ_WRITE);
        let process = attach(&mock);

        process.write_u64(0x005F_4680u64, 0x0050_0000).unwrap();
        process.write_u64(0x0050_001Cu64, 0x0060_0000).unwrap();

        let path: PointerPath = "\"game.dll\"+1F4684-4,18+4,C".parse().unwrap();
        assert_eq!(process.evaluate(&path).unwrap(), 0x0060_000C);

        // The re-emitted expression resolves identically
        let reparsed: PointerPath = path.to_string().parse().unwrap();
        assert_eq!(process.evaluate(&reparsed).unwrap(), 0x0060_000C);
    }

    #[test]
    fn test_evaluate_null_pointer_fails() {
        let mock = mock_with_data();
        mock.map_region(0x005F_4000, vec![0u8; 0x1000], Protection::READ_WRITE);
        let process = attach(&mock);

        let path: PointerPath = "\"game.dll\"+1F4680,10".parse().unwrap();
        assert!(matches!(
            process.evaluate(&path),
            Err(MemoryError::PathEvaluation(PathError::NullPointer { step: 0 }))
        ));
    }

    #[test]
    fn test_evaluate_unknown_module() {
        let process = attach(&mock_with_data());
        let path: PointerPath = "\"missing.dll\"+10".parse().unwrap();
        assert!(matches!(
            process.evaluate(&path),
            Err(MemoryError::PathEvaluation(PathError::ModuleNotFound(_)))
        ));
    }

    #[test]
    fn test_32_bit_rejects_wide_address() {
        let mock = MockProcess::new(32);
        let process = attach(&mock);
        let path: PointerPath = "182F3593120".parse().unwrap();
        assert!(matches!(
            process.evaluate(&path),
            Err(MemoryError::IncompatibleBitnessPointer(0x182F_3593_120))
        ));
    }

    #[test]
    fn test_write_strategies_against_protected_page() {
        let mock = mock_with_data();
        mock.map_region(0x2000, vec![0u8; 64], Protection::READ_EXECUTE);
        let process = attach(&mock);

        // Ignore: the protected page rejects the write
        assert!(matches!(
            process.write_bytes_with(0x2000u64, &[1], ProtectionStrategy::Ignore),
            Err(MemoryError::WriteFailure(_))
        ));

        // RemoveAndRestore: succeeds, and the page is protected again
        process
            .write_bytes_with(0x2000u64, &[2], ProtectionStrategy::RemoveAndRestore)
            .unwrap();
        assert_eq!(mock.snapshot(0x2000, 1).unwrap(), vec![2]);
        assert!(matches!(
            process.write_bytes_with(0x2000u64, &[3], ProtectionStrategy::Ignore),
            Err(MemoryError::WriteFailure(_))
        ));

        // Remove: succeeds and leaves the page writable
        process
            .write_bytes_with(0x2000u64, &[4], ProtectionStrategy::Remove)
            .unwrap();
        process
            .write_bytes_with(0x2000u64, &[5], ProtectionStrategy::Ignore)
            .unwrap();
    }

    #[test]
    fn test_read_write_string() {
        let mock = mock_with_data();
        mock.map_region(0x3000, vec![0xFFu8; 256], Protection::READ_WRITE);
        let process = attach(&mock);

        let settings = StringSettings::default();
        process.write_string(0x3000u64, "hello", &settings).unwrap();
        assert_eq!(process.read_string(0x3000u64, &settings).unwrap(), "hello");

        let utf16 = StringSettings::utf16();
        process.write_string(0x3040u64, "héllo", &utf16).unwrap();
        assert_eq!(process.read_string(0x3040u64, &utf16).unwrap(), "héllo");
    }

    #[test]
    fn test_string_near_region_end() {
        let mock = mock_with_data();
        mock.map_region(0x4000, vec![0u8; 16], Protection::READ_WRITE);
        let process = attach(&mock);

        let settings = StringSettings::default();
        process.write_string(0x4000u64, "short", &settings).unwrap();
        // The 1024-unit cap reaches past the region; the terminator saves it
        assert_eq!(process.read_string(0x4000u64, &settings).unwrap(), "short");
    }

    #[test]
    fn test_detach_invalidates_operations() {
        let mock = mock_with_data();
        mock.map_region(0x1000, vec![0u8; 64], Protection::READ_WRITE);
        let process = attach(&mock);

        process.detach();
        assert!(!process.is_attached());
        assert!(matches!(
            process.read_u32(0x1000u64),
            Err(MemoryError::DetachedProcess)
        ));
        assert!(matches!(
            process.reserve(64, true, None, None),
            Err(MemoryError::DetachedProcess)
        ));
    }

    #[test]
    fn test_drop_frees_pool_blocks() {
        let mock = mock_with_data();
        let process = attach(&mock);
        let _reservation = process.reserve(64, true, None, Some(0x2000_0000)).unwrap();
        assert_eq!(mock.live_allocations().len(), 1);
        drop(process);
        assert!(mock.live_allocations().is_empty());
    }

    #[test]
    fn test_run_remote() {
        let mock = mock_with_data();
        let process = attach(&mock);
        let outcome = process
            .run_remote(0x0040_1000u64, 7, Duration::from_secs(1))
            .unwrap();
        assert_eq!(outcome, WaitOutcome::Signaled);
        assert_eq!(mock.spawned_threads(), vec![(0x0040_1000, 7)]);
    }
}
