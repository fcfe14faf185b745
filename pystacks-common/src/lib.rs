#![allow(non_camel_case_types, clippy::new_without_default)]
#![cfg_attr(not(any(feature = "user", test)), no_std)]

#[macro_use]
mod macros;

pub mod mem;
pub mod metrics;
pub mod pidtgid;
pub mod python;

pub use mem::{Addr, ReadError, ReadMemory};
pub use pidtgid::PidTgid;
pub use python::error::{ErrorKind, TlsError, UnwindError};
pub use python::state::{
    InterpreterInfo, LibcImplementation, Sample, StackRecord, StackStatus, Symbol, UnwindBudget,
    WorkingState,
};
pub use python::tls::TargetArch;
pub use python::unwinder::{InterpreterInfoSource, SampleEvent, SampleSink, Step, Unwinder};
pub use python::{OffsetTables, PythonVersion};
