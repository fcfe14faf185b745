use crate::python::error::{ErrorKind, UnwindError};
use crate::python::state::StackStatus;

macro_rules! count {
    () => (0usize);
    ( $x:tt $($xs:tt)* ) => (1usize + count!($($xs)*));
}

/// https://stackoverflow.com/a/64678145/10854888
macro_rules! iterable_enum {
    ($(#[$derives:meta])* $(vis $visibility:vis)? enum $name:ident { $($(#[$nested_meta:meta])* $member:ident),* }) => {
        const COUNT_MEMBERS: usize = count!($($member)*);
        $(#[$derives])*
        $($visibility)? enum $name {
            $($(#[$nested_meta])* $member),*
        }
        impl $name {
            pub const fn iter() -> [$name; COUNT_MEMBERS] {
                [$($name::$member,)*]
            }
        }
    };
}

iterable_enum! {
    #[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
    #[repr(u32)]
    vis pub enum Metrics {
        /// Samples handed to the sink, whatever their status.
        SamplesSubmitted,
        StacksComplete,
        StacksTruncated,

        /// No interpreter info for the sampled pid: not a Python process, or not discovered yet.
        ErrPy_InterpreterInfoMissing,
        /// The global holding the current thread state could not be read.
        ErrPy_ThreadStateAddrRead,
        /// Resolving the thread state through TLS failed. This can happen when a new
        /// thread is created but pthreads has not initialized in that thread yet.
        ErrPy_TlsRead,
        /// The thread state is NULL. For global thread states this means the GIL is
        /// released and this thread isn't running Python code.
        ErrPy_ThreadStateNull,
        /// The interpreter version index has no offsets.
        ErrPy_VersionOffsetsMissing,
        ErrPy_ThreadIdRead,
        ErrPy_FrameRead,
        ErrPy_CFrameRead,
        ErrPy_CFrameNull,
        /// The thread state has no current frame, the Python stack is empty.
        ErrPy_FrameNull,

        /// Error samples by broad cause, each also counted under its ErrPy_ metric.
        ErrKind_LookupMiss,
        ErrKind_ReadFailure,
        ErrKind_NullPointer,

        /// Enum Max
        Max
    }
}

impl Metrics {
    pub const fn name(&self) -> &'static str {
        match self {
            Metrics::SamplesSubmitted => "samples_submitted",
            Metrics::StacksComplete => "stacks_complete",
            Metrics::StacksTruncated => "stacks_truncated",
            Metrics::ErrPy_InterpreterInfoMissing => "err_interpreter_info_missing",
            Metrics::ErrPy_ThreadStateAddrRead => "err_thread_state_addr_read",
            Metrics::ErrPy_TlsRead => "err_tls_read",
            Metrics::ErrPy_ThreadStateNull => "err_thread_state_null",
            Metrics::ErrPy_VersionOffsetsMissing => "err_version_offsets_missing",
            Metrics::ErrPy_ThreadIdRead => "err_thread_id_read",
            Metrics::ErrPy_FrameRead => "err_frame_read",
            Metrics::ErrPy_CFrameRead => "err_cframe_read",
            Metrics::ErrPy_CFrameNull => "err_cframe_null",
            Metrics::ErrPy_FrameNull => "err_frame_null",
            Metrics::ErrKind_LookupMiss => "err_kind_lookup_miss",
            Metrics::ErrKind_ReadFailure => "err_kind_read_failure",
            Metrics::ErrKind_NullPointer => "err_kind_null_pointer",
            Metrics::Max => "max",
        }
    }
}

impl From<UnwindError> for Metrics {
    fn from(value: UnwindError) -> Self {
        match value {
            UnwindError::InterpreterInfoMissing => Self::ErrPy_InterpreterInfoMissing,
            UnwindError::ThreadStateAddrRead => Self::ErrPy_ThreadStateAddrRead,
            UnwindError::Tls(_) => Self::ErrPy_TlsRead,
            UnwindError::ThreadStateNull => Self::ErrPy_ThreadStateNull,
            UnwindError::VersionOffsetsMissing => Self::ErrPy_VersionOffsetsMissing,
            UnwindError::ThreadIdRead => Self::ErrPy_ThreadIdRead,
            UnwindError::FrameRead => Self::ErrPy_FrameRead,
            UnwindError::CFrameRead => Self::ErrPy_CFrameRead,
            UnwindError::CFrameNull => Self::ErrPy_CFrameNull,
            UnwindError::FrameNull => Self::ErrPy_FrameNull,
        }
    }
}

impl From<ErrorKind> for Metrics {
    fn from(value: ErrorKind) -> Self {
        match value {
            ErrorKind::LookupMiss => Self::ErrKind_LookupMiss,
            ErrorKind::ReadFailure => Self::ErrKind_ReadFailure,
            ErrorKind::NullPointer => Self::ErrKind_NullPointer,
        }
    }
}

impl Metrics {
    /// The outcome counter for a finished walk, `None` for error samples.
    pub const fn for_status(status: StackStatus) -> Option<Self> {
        match status {
            StackStatus::Complete => Some(Self::StacksComplete),
            StackStatus::Truncated => Some(Self::StacksTruncated),
            StackStatus::Error => None,
        }
    }
}
