use self::offsets::*;
use self::state::LibcImplementation;

pub mod error;
pub mod hash;
pub mod offsets;
pub mod state;
pub mod symbol;
pub mod tls;
pub mod unwinder;

/// Capacity of each offset table.
pub const MAX_OFFSET_ENTRIES: usize = 12;

#[cfg_attr(feature = "user", derive(serde::Serialize, serde::Deserialize))]
#[repr(C)]
#[derive(Debug, Eq, PartialEq, Clone, Copy)]
pub struct PythonVersion {
    pub major: u8,
    pub minor: u8,
    pub patch: u8,
}

impl PythonVersion {
    pub const fn new(major: u8, minor: u8, patch: u8) -> Self {
        Self { major, minor, patch }
    }

    /// Index of this version's layout in [`PYTHON_CATALOG`].
    pub fn catalog_index(&self) -> Option<u32> {
        match &self {
            PythonVersion { major: 2, minor: 7, patch: _ } => Some(0),
            PythonVersion { major: 3, minor: 6, patch: _ } => Some(1),
            PythonVersion { major: 3, minor: 7, patch: _ } => Some(2),
            PythonVersion { major: 3, minor: 8, patch: _ } => Some(3),
            PythonVersion { major: 3, minor: 9, patch: _ } => Some(4),
            PythonVersion { major: 3, minor: 10, patch: _ } => Some(5),
            PythonVersion { major: 3, minor: 11, patch: _ } => Some(6),
            PythonVersion { major: 3, minor: 12, patch: _ } => Some(7),
            _ => None,
        }
    }

    /// Builds that keep the current thread state in a global instead of TLS.
    pub fn has_thread_state_global(&self) -> bool {
        self.major == 2 || (self.major == 3 && self.minor <= 6)
    }
}

impl core::fmt::Display for PythonVersion {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// The table is full.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TableFull;

/// A fixed-capacity table indexed by small integers.
#[derive(Clone, Copy, Debug)]
pub struct OffsetTable<T> {
    entries: [T; MAX_OFFSET_ENTRIES],
    len: usize,
}

impl<T: Copy + Default> OffsetTable<T> {
    pub fn new() -> Self {
        Self {
            entries: [T::default(); MAX_OFFSET_ENTRIES],
            len: 0,
        }
    }

    /// Appends an entry and returns its index.
    pub fn push(&mut self, entry: T) -> Result<u32, TableFull> {
        if self.len >= MAX_OFFSET_ENTRIES {
            return Err(TableFull);
        }
        self.entries[self.len] = entry;
        self.len += 1;
        Ok((self.len - 1) as u32)
    }

    #[inline(always)]
    pub fn get(&self, index: u32) -> Option<&T> {
        self.entries[..self.len].get(index as usize)
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.entries[..self.len].iter()
    }
}

/// Every layout table the unwinder consults. Immutable once sampling starts.
#[derive(Clone, Copy, Debug)]
pub struct OffsetTables {
    pub python: OffsetTable<PythonVersionOffsets>,
    pub glibc: OffsetTable<LibcOffsets>,
    pub musl: OffsetTable<LibcOffsets>,
}

impl OffsetTables {
    pub fn empty() -> Self {
        Self {
            python: OffsetTable::new(),
            glibc: OffsetTable::new(),
            musl: OffsetTable::new(),
        }
    }

    /// Tables preloaded with the builtin catalogs.
    pub fn builtin() -> Self {
        let mut tables = Self::empty();
        // catalogs are smaller than the tables, pushes can't fail
        for (_, offsets) in PYTHON_CATALOG {
            let _ = tables.python.push(offsets);
        }
        for (_, offsets) in GLIBC_CATALOG {
            let _ = tables.glibc.push(offsets);
        }
        for (_, offsets) in MUSL_CATALOG {
            let _ = tables.musl.push(offsets);
        }
        tables
    }

    #[inline(always)]
    pub fn python(&self, index: u32) -> Option<&PythonVersionOffsets> {
        self.python.get(index)
    }

    /// The libc table entry for `index`, or `None` for unknown indices and libcs.
    #[inline(always)]
    pub fn libc(&self, implementation: LibcImplementation, index: u32) -> Option<&LibcOffsets> {
        match implementation {
            LibcImplementation::Glibc => self.glibc.get(index),
            LibcImplementation::Musl => self.musl.get(index),
            LibcImplementation::Unknown => None,
        }
    }
}
