use core::fmt::Debug;

use crate::mem::Addr;
use crate::pidtgid::PidTgid;

use super::error::UnwindError;

/// Frames walked per invocation of the stack walker.
pub const PYTHON_STACK_FRAMES_PER_PROG: usize = 25;
/// Invocations of the stack walker per sample.
pub const PYTHON_STACK_PROG_CNT: usize = 3;
pub const MAX_FRAMES_PER_PROG: usize = 32;
pub const MAX_PROG_CNT: usize = 8;
pub const MAX_STACK_DEPTH: usize = 127;
pub const CLASS_NAME_LEN: usize = 32;
pub const FUNCTION_NAME_LEN: usize = 64;
pub const FILE_NAME_LEN: usize = 128;
/// `_PyInterpreterFrame.owner` value of shim frames pushed by C code.
pub const FRAME_OWNED_BY_CSTACK: u8 = 3;

#[cfg_attr(feature = "user", derive(serde::Serialize, serde::Deserialize))]
#[repr(u32)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub enum StackStatus {
    /// Read all the Python stack frames for the running thread, from first to last.
    #[default]
    Complete = 0,
    /// Bootstrap failed, no frames were collected.
    Error = 1,
    /// Walked the maximum number of frames and there were more frames
    /// we didn't read. Try raising the invocation budget.
    Truncated = 2,
}

/// Identifies the POSIX threads implementation used by a Python process.
#[cfg_attr(feature = "user", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "user", serde(rename_all = "lowercase"))]
#[repr(u32)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum LibcImplementation {
    Glibc = 0,
    Musl = 1,
    #[default]
    Unknown = 2,
}

/// Facts about one interpreter process, gathered by discovery before it is sampled.
#[cfg_attr(feature = "user", derive(serde::Serialize, serde::Deserialize))]
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct InterpreterInfo {
    pub pid: u32,
    /// Index into the python offset table.
    pub py_version_index: u32,
    pub libc_implementation: LibcImplementation,
    /// Index into the glibc or musl offset table, depending on `libc_implementation`.
    pub libc_offset_index: u32,
    /// pthread key under which the interpreter keeps its thread state.
    pub tls_key: u32,
    pub use_tls: bool,
    /// Address of a global holding the current thread state, or null.
    pub thread_state_addr: Addr,
}

/// Interprets `buf` as a NUL terminated string. Invalid UTF-8 is cut at the
/// first bad byte.
pub fn c_str(buf: &[u8]) -> &str {
    let len = buf.iter().position(|b| *b == 0).unwrap_or(buf.len());
    let bytes = &buf[..len];
    match core::str::from_utf8(bytes) {
        Ok(s) => s,
        Err(e) => core::str::from_utf8(&bytes[..e.valid_up_to()]).unwrap_or_default(),
    }
}

fn copy_truncated(dst: &mut [u8], src: &str) {
    let n = src.len().min(dst.len() - 1);
    dst[..n].copy_from_slice(&src.as_bytes()[..n]);
    dst[n..].fill(0);
}

/// The identity of one Python frame.
/// Storing `class_name` and `path` here means these are duplicated for symbols in the same class or
/// file. It is fine, symbols are only stored once per symbol id.
#[repr(C)]
#[derive(Copy, Clone, PartialEq, Eq)]
pub struct Symbol {
    pub class_name: [u8; CLASS_NAME_LEN],
    pub method_name: [u8; FUNCTION_NAME_LEN],
    pub path: [u8; FILE_NAME_LEN],
}

impl Default for Symbol {
    fn default() -> Self {
        Self {
            class_name: [0; CLASS_NAME_LEN],
            method_name: [0; FUNCTION_NAME_LEN],
            path: [0; FILE_NAME_LEN],
        }
    }
}

impl Symbol {
    /// Builds a symbol from strings, truncating each to its buffer.
    pub fn new(path: &str, class_name: &str, method_name: &str) -> Self {
        let mut sym = Self::default();
        copy_truncated(&mut sym.path, path);
        copy_truncated(&mut sym.class_name, class_name);
        copy_truncated(&mut sym.method_name, method_name);
        sym
    }

    pub fn reset(&mut self) {
        self.class_name.fill(0);
        self.method_name.fill(0);
        self.path.fill(0);
    }

    pub fn path(&self) -> &str {
        c_str(&self.path)
    }

    pub fn class_name(&self) -> &str {
        c_str(&self.class_name)
    }

    pub fn method_name(&self) -> &str {
        c_str(&self.method_name)
    }
}

impl Debug for Symbol {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Symbol")
            .field("path", &self.path())
            .field("class_name", &self.class_name())
            .field("method_name", &self.method_name())
            .finish()
    }
}

/// Ordered `(line << 32) | symbol_id` entries, innermost frame first.
#[repr(C)]
#[derive(Copy, Clone)]
pub struct StackRecord {
    pub len: usize,
    pub entries: [u64; MAX_STACK_DEPTH],
}

impl Default for StackRecord {
    fn default() -> Self {
        Self {
            len: 0,
            entries: [0; MAX_STACK_DEPTH],
        }
    }
}

impl StackRecord {
    /// Appends an entry. Returns false, leaving the record untouched, once it is full.
    #[inline(always)]
    pub fn push(&mut self, entry: u64) -> bool {
        if self.len >= MAX_STACK_DEPTH {
            return false;
        }
        self.entries[self.len] = entry;
        self.len += 1;
        true
    }

    pub fn as_slice(&self) -> &[u64] {
        &self.entries[..self.len.min(MAX_STACK_DEPTH)]
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn clear(&mut self) {
        self.len = 0;
        self.entries.fill(0);
    }

    pub const fn entry(line: u32, symbol_id: u32) -> u64 {
        (line as u64) << 32 | symbol_id as u64
    }

    /// Splits an entry into `(line, symbol_id)`.
    pub const fn split(entry: u64) -> (u32, u32) {
        ((entry >> 32) as u32, entry as u32)
    }
}

impl PartialEq for StackRecord {
    fn eq(&self, other: &Self) -> bool {
        self.as_slice() == other.as_slice()
    }
}

impl Eq for StackRecord {}

impl Debug for StackRecord {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("StackRecord")
            .field("len", &self.len)
            .field("entries", &self.as_slice())
            .finish()
    }
}

/// The outcome of unwinding one sampled thread.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Sample {
    pub pid_tgid: PidTgid,
    pub status: StackStatus,
    pub stack: StackRecord,
    pub error: Option<UnwindError>,
    /// Content hash of `stack`, zero when nothing was hashed.
    pub interpreter_stack_id: u64,
}

impl Sample {
    pub fn reset(&mut self) {
        self.pid_tgid = PidTgid::default();
        self.status = StackStatus::Complete;
        self.stack.clear();
        self.error = None;
        self.interpreter_stack_id = 0;
    }
}

/// Scratch for one in-flight unwind, carried across walker invocations.
#[derive(Copy, Clone, Debug, Default)]
pub struct WorkingState {
    pub interpreter_info: InterpreterInfo,
    pub thread_state: Addr,
    pub frame_ptr: Addr,
    pub current_pthread: u64,
    pub stack_walker_prog_call_count: u32,
    pub sample: Sample,
}

impl WorkingState {
    pub fn reset(&mut self) {
        self.interpreter_info = InterpreterInfo::default();
        self.thread_state = Addr::NULL;
        self.frame_ptr = Addr::NULL;
        self.current_pthread = 0;
        self.stack_walker_prog_call_count = 0;
        self.sample.reset();
    }
}

/// How much walking one sample may do: `frames_per_invocation` frames for each
/// of at most `max_invocations` walker invocations.
#[cfg_attr(feature = "user", derive(serde::Serialize, serde::Deserialize))]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct UnwindBudget {
    pub frames_per_invocation: usize,
    pub max_invocations: usize,
}

impl Default for UnwindBudget {
    fn default() -> Self {
        Self {
            frames_per_invocation: PYTHON_STACK_FRAMES_PER_PROG,
            max_invocations: PYTHON_STACK_PROG_CNT,
        }
    }
}

impl UnwindBudget {
    /// Returns `None` unless `1..=MAX_FRAMES_PER_PROG` and `1..=MAX_PROG_CNT` hold.
    pub const fn new(frames_per_invocation: usize, max_invocations: usize) -> Option<Self> {
        if frames_per_invocation == 0
            || frames_per_invocation > MAX_FRAMES_PER_PROG
            || max_invocations == 0
            || max_invocations > MAX_PROG_CNT
        {
            return None;
        }
        Some(Self {
            frames_per_invocation,
            max_invocations,
        })
    }

    pub const fn frame_ceiling(&self) -> usize {
        self.frames_per_invocation * self.max_invocations
    }
}
