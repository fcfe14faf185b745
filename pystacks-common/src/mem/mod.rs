//! Reading the address space of a traced process.
//!
//! Nothing in the unwinder ever dereferences a foreign pointer directly. Every
//! address is an [`Addr`] and every access goes through [`ReadMemory`], which
//! may fail at any point: the target can unmap, free or rewrite memory while
//! we are looking at it.

use core::fmt;

#[cfg(any(test, feature = "user"))]
pub mod snapshot;

/// Chunk size used when reading NUL terminated strings.
const CSTR_CHUNK: usize = 16;

/// An address in a foreign address space.
#[cfg_attr(feature = "user", derive(serde::Serialize, serde::Deserialize))]
#[repr(transparent)]
#[derive(Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Addr(pub u64);

impl Addr {
    pub const NULL: Addr = Addr(0);

    #[inline(always)]
    pub const fn get(self) -> u64 {
        self.0
    }

    #[inline(always)]
    pub const fn is_null(self) -> bool {
        self.0 == 0
    }

    /// Address of a struct field. Offset tables encode fields that don't
    /// exist in a given layout as negative offsets, which yield `None`.
    #[inline(always)]
    pub fn field(self, offset: i64) -> Option<Addr> {
        if offset < 0 {
            return None;
        }
        self.0.checked_add(offset as u64).map(Addr)
    }

    /// Signed displacement, used for layouts where data lives below a base.
    #[inline(always)]
    pub fn offset(self, delta: i64) -> Option<Addr> {
        self.0.checked_add_signed(delta).map(Addr)
    }
}

impl From<u64> for Addr {
    fn from(value: u64) -> Self {
        Addr(value)
    }
}

impl fmt::Debug for Addr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Addr({:#x})", self.0)
    }
}

impl fmt::Display for Addr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

impl fmt::LowerHex for Addr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::LowerHex::fmt(&self.0, f)
    }
}

/// A failed read of `len` bytes at `addr`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReadError {
    pub addr: Addr,
    pub len: usize,
}

impl ReadError {
    pub const fn new(addr: Addr, len: usize) -> Self {
        Self { addr, len }
    }
}

impl fmt::Display for ReadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "could not read {} bytes at {:#x}", self.len, self.addr.0)
    }
}

/// The single capability the unwinder needs from its host: copy bytes out of
/// the target's memory.
pub trait ReadMemory {
    /// Fills `buf` with the bytes at `addr`. Either the whole buffer is
    /// filled or an error is returned.
    fn read_bytes(&self, addr: Addr, buf: &mut [u8]) -> Result<(), ReadError>;

    fn read_u8(&self, addr: Addr) -> Result<u8, ReadError> {
        let mut buf = [0u8; 1];
        self.read_bytes(addr, &mut buf)?;
        Ok(buf[0])
    }

    fn read_u32(&self, addr: Addr) -> Result<u32, ReadError> {
        let mut buf = [0u8; 4];
        self.read_bytes(addr, &mut buf)?;
        Ok(u32::from_ne_bytes(buf))
    }

    fn read_u64(&self, addr: Addr) -> Result<u64, ReadError> {
        let mut buf = [0u8; 8];
        self.read_bytes(addr, &mut buf)?;
        Ok(u64::from_ne_bytes(buf))
    }

    fn read_i64(&self, addr: Addr) -> Result<i64, ReadError> {
        self.read_u64(addr).map(|v| v as i64)
    }

    /// Reads a pointer-sized value. Targets are assumed to be 64-bit.
    fn read_addr(&self, addr: Addr) -> Result<Addr, ReadError> {
        self.read_u64(addr).map(Addr)
    }

    /// Reads the pointer stored in the field at `offset` of the struct at `base`.
    fn read_addr_at(&self, base: Addr, offset: i64) -> Result<Addr, ReadError> {
        let at = base.field(offset).ok_or(ReadError::new(base, 8))?;
        self.read_addr(at)
    }

    fn read_u64_at(&self, base: Addr, offset: i64) -> Result<u64, ReadError> {
        let at = base.field(offset).ok_or(ReadError::new(base, 8))?;
        self.read_u64(at)
    }

    fn read_u32_at(&self, base: Addr, offset: i64) -> Result<u32, ReadError> {
        let at = base.field(offset).ok_or(ReadError::new(base, 4))?;
        self.read_u32(at)
    }

    /// Reads a NUL terminated string into `buf`, the way `bpf_probe_read_user_str` does:
    /// at most `buf.len() - 1` bytes are copied and the rest of `buf` is zeroed.
    /// Returns the string length. Fails only if not even the first chunk is readable.
    fn read_cstr(&self, addr: Addr, buf: &mut [u8]) -> Result<usize, ReadError> {
        let Some(cap) = buf.len().checked_sub(1) else {
            return Ok(0);
        };

        let mut filled = 0;
        let mut bytewise = false;
        while filled < cap {
            let chunk = if bytewise { 1 } else { (cap - filled).min(CSTR_CHUNK) };
            let at = addr
                .offset(filled as i64)
                .ok_or(ReadError::new(addr, chunk))?;
            match self.read_bytes(at, &mut buf[filled..filled + chunk]) {
                Ok(()) => {}
                // the chunk may run past the end of the mapping, retry byte by byte
                Err(_) if !bytewise => {
                    bytewise = true;
                    continue;
                }
                Err(e) if filled == 0 => {
                    buf.fill(0);
                    return Err(e);
                }
                Err(_) => break,
            }
            if let Some(nul) = buf[filled..filled + chunk].iter().position(|b| *b == 0) {
                filled += nul;
                break;
            }
            filled += chunk;
        }

        buf[filled..].fill(0);
        Ok(filled)
    }
}

impl<T: ReadMemory + ?Sized> ReadMemory for &T {
    fn read_bytes(&self, addr: Addr, buf: &mut [u8]) -> Result<(), ReadError> {
        (**self).read_bytes(addr, buf)
    }
}
