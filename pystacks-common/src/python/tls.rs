//! Locating the interpreter's thread state through pthread thread-specific data.
//!
//! CPython 3.7+ keeps the current `PyThreadState *` under a pthread key. Given the
//! sampled thread's TLS base (the thread pointer: `fs_base` on x86_64, `tpidr_el0`
//! on aarch64) the slot holding that value is found with plain arithmetic on the
//! libc's `struct pthread` layout. glibc embeds the first block of key data in
//! `struct pthread`. musl stores a pointer to a separate `tsd` array, so it takes
//! one extra read.

use crate::mem::{Addr, ReadMemory};

use super::error::TlsError;
use super::offsets::LibcOffsets;
use super::state::{InterpreterInfo, LibcImplementation};
use super::OffsetTables;

#[cfg_attr(feature = "user", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "user", serde(rename_all = "lowercase"))]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TargetArch {
    X86_64,
    Aarch64,
    Unsupported,
}

impl TargetArch {
    /// The architecture this crate was compiled for.
    pub const fn host() -> Self {
        if cfg!(target_arch = "x86_64") {
            TargetArch::X86_64
        } else if cfg!(target_arch = "aarch64") {
            TargetArch::Aarch64
        } else {
            TargetArch::Unsupported
        }
    }
}

impl Default for TargetArch {
    fn default() -> Self {
        Self::host()
    }
}

/// Where `struct pthread` starts relative to the thread pointer. On aarch64 the
/// thread pointer sits right past the end of it.
fn pthread_base(arch: TargetArch, libc: &LibcOffsets) -> Result<i64, TlsError> {
    match arch {
        TargetArch::X86_64 => Ok(0),
        TargetArch::Aarch64 => libc.pthread_size.checked_neg().ok_or(TlsError::AddressOverflow),
        TargetArch::Unsupported => Err(TlsError::UnsupportedArch),
    }
}

fn key_offset(libc: &LibcOffsets, key: u32) -> Result<i64, TlsError> {
    (key as i64)
        .checked_mul(libc.pthread_key_data_size)
        .ok_or(TlsError::AddressOverflow)
}

/// Computes the address of the TLS slot for `key`.
///
/// glibc needs no memory access. musl reads the `tsd` pointer out of `struct pthread`
/// first, which may fail with [`TlsError::PthreadBlockRead`].
pub fn tls_slot_address<M: ReadMemory>(
    mem: &M,
    arch: TargetArch,
    implementation: LibcImplementation,
    libc: &LibcOffsets,
    key: u32,
    tls_base: Addr,
) -> Result<Addr, TlsError> {
    let base = pthread_base(arch, libc)?;
    let key_offset = key_offset(libc, key)?;

    match implementation {
        LibcImplementation::Glibc => {
            let delta = base
                .checked_add(libc.pthread_block)
                .and_then(|d| d.checked_add(key_offset))
                .and_then(|d| d.checked_add(libc.pthread_key_data))
                .ok_or(TlsError::AddressOverflow)?;
            tls_base.offset(delta).ok_or(TlsError::AddressOverflow)
        }
        LibcImplementation::Musl => {
            let tsd_ptr = base
                .checked_add(libc.pthread_block)
                .and_then(|d| tls_base.offset(d))
                .ok_or(TlsError::AddressOverflow)?;
            let tsd = mem
                .read_addr(tsd_ptr)
                .map_err(|_| TlsError::PthreadBlockRead)?;
            tsd.offset(key_offset).ok_or(TlsError::AddressOverflow)
        }
        LibcImplementation::Unknown => Err(TlsError::UnknownLibc),
    }
}

/// Reads the value stored under the interpreter's TLS key for the thread whose
/// thread pointer is `tls_base`. The value may be null.
pub fn tls_read<M: ReadMemory>(
    mem: &M,
    arch: TargetArch,
    tables: &OffsetTables,
    info: &InterpreterInfo,
    tls_base: Addr,
) -> Result<Addr, TlsError> {
    let libc = match info.libc_implementation {
        LibcImplementation::Unknown => {
            log!("[error] unknown libc implementation");
            return Err(TlsError::UnknownLibc);
        }
        implementation => tables
            .libc(implementation, info.libc_offset_index)
            .ok_or(TlsError::LibcOffsetsMissing)?,
    };

    let slot = tls_slot_address(
        mem,
        arch,
        info.libc_implementation,
        libc,
        info.tls_key,
        tls_base,
    )?;
    log!("tls_read key {} from address {}", info.tls_key, slot);

    mem.read_addr(slot).map_err(|_| TlsError::SlotRead)
}
