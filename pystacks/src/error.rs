use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::proc_mem::ProcMemMapError;

/// Reasons discovery can't describe a process to the unwinder.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("process {pid} has no python interpreter mapped")]
    NotPython { pid: u32 },
    #[error("python {version} is not supported")]
    UnsupportedVersion { version: String },
    #[error("could not find symbol {symbol} in {path:?}")]
    SymbolNotFound { symbol: &'static str, path: PathBuf },
    #[error("no valid thread state key at {runtime:#x}+{offset} in {pid}, set [discovery] tls_key")]
    TlsKey { pid: u32, runtime: u64, offset: i64 },
    #[error("failed to read {path:?}")]
    ReadObject {
        path: PathBuf,
        source: io::Error,
    },
    #[error("failed to parse {path:?}: {source}")]
    ParseObject {
        path: PathBuf,
        source: object::Error,
    },
    #[error(transparent)]
    Maps(#[from] ProcMemMapError),
}

/// Failures sampling a live process.
#[derive(Debug, Error)]
pub enum SamplerError {
    #[error("process {pid} is not known to the interpreter cache")]
    UnknownProcess { pid: u32 },
    #[error("failed to list threads of {pid}")]
    Threads {
        pid: u32,
        source: procfs::ProcError,
    },
    #[error("thread {tid} exited while being stopped")]
    ThreadExited { tid: u32 },
    #[error("reading the thread pointer is not supported on {arch}")]
    UnsupportedArch { arch: &'static str },
    #[error("ptrace {op} failed for thread {tid}")]
    Ptrace {
        op: &'static str,
        tid: u32,
        source: nix::Error,
    },
}
