use core::fmt;

/// Broad classes of unwind failure.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Unknown process, interpreter version or libc build.
    LookupMiss,
    /// Foreign memory could not be read.
    ReadFailure,
    /// A pointer that must be set during bootstrap was null.
    NullPointer,
}

/// Failures resolving the thread state through thread-local storage.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TlsError {
    UnknownLibc,
    LibcOffsetsMissing,
    UnsupportedArch,
    AddressOverflow,
    PthreadBlockRead,
    SlotRead,
}

impl TlsError {
    pub const fn message(&self) -> &'static str {
        match self {
            TlsError::UnknownLibc => "unknown libc implementation",
            TlsError::LibcOffsetsMissing => "libc offsets not found",
            TlsError::UnsupportedArch => "unsupported architecture",
            TlsError::AddressOverflow => "TLS address overflow",
            TlsError::PthreadBlockRead => "failed read of pthread block",
            TlsError::SlotRead => "failed read of TLS",
        }
    }

    pub const fn kind(&self) -> ErrorKind {
        match self {
            TlsError::UnknownLibc | TlsError::LibcOffsetsMissing | TlsError::UnsupportedArch => {
                ErrorKind::LookupMiss
            }
            TlsError::AddressOverflow | TlsError::PthreadBlockRead | TlsError::SlotRead => {
                ErrorKind::ReadFailure
            }
        }
    }
}

impl fmt::Display for TlsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.message())
    }
}

/// Why a sample was submitted without a Python stack.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum UnwindError {
    InterpreterInfoMissing,
    ThreadStateAddrRead,
    Tls(TlsError),
    ThreadStateNull,
    VersionOffsetsMissing,
    ThreadIdRead,
    FrameRead,
    CFrameRead,
    CFrameNull,
    FrameNull,
}

impl UnwindError {
    pub const fn message(&self) -> &'static str {
        match self {
            UnwindError::InterpreterInfoMissing => "interpreter_info was NULL",
            UnwindError::ThreadStateAddrRead => "failed read of thread_state_addr",
            UnwindError::Tls(_) => "failed read of TLS",
            UnwindError::ThreadStateNull => "thread_state was NULL",
            UnwindError::VersionOffsetsMissing => "version offsets not found",
            UnwindError::ThreadIdRead => "failed read of thread_state->thread_id",
            UnwindError::FrameRead => "failed read of thread_state->frame",
            UnwindError::CFrameRead => "failed read of thread_state->cframe",
            UnwindError::CFrameNull => "cframe was NULL",
            UnwindError::FrameNull => "frame_ptr was NULL",
        }
    }

    pub const fn kind(&self) -> ErrorKind {
        match self {
            UnwindError::InterpreterInfoMissing | UnwindError::VersionOffsetsMissing => {
                ErrorKind::LookupMiss
            }
            UnwindError::Tls(e) => e.kind(),
            UnwindError::ThreadStateAddrRead
            | UnwindError::ThreadIdRead
            | UnwindError::FrameRead
            | UnwindError::CFrameRead => ErrorKind::ReadFailure,
            UnwindError::ThreadStateNull | UnwindError::CFrameNull | UnwindError::FrameNull => {
                ErrorKind::NullPointer
            }
        }
    }
}

impl fmt::Display for UnwindError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnwindError::Tls(e) => write!(f, "{}: {}", self.message(), e),
            _ => f.write_str(self.message()),
        }
    }
}

impl From<TlsError> for UnwindError {
    fn from(e: TlsError) -> Self {
        UnwindError::Tls(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages() {
        assert_eq!(UnwindError::InterpreterInfoMissing.to_string(), "interpreter_info was NULL");
        assert_eq!(UnwindError::CFrameNull.message(), "cframe was NULL");
        assert_eq!(
            UnwindError::Tls(TlsError::PthreadBlockRead).to_string(),
            "failed read of TLS: failed read of pthread block"
        );
    }

    #[test]
    fn kinds() {
        assert_eq!(UnwindError::VersionOffsetsMissing.kind(), ErrorKind::LookupMiss);
        assert_eq!(UnwindError::Tls(TlsError::LibcOffsetsMissing).kind(), ErrorKind::LookupMiss);
        assert_eq!(UnwindError::Tls(TlsError::SlotRead).kind(), ErrorKind::ReadFailure);
        assert_eq!(UnwindError::FrameNull.kind(), ErrorKind::NullPointer);
        assert_eq!(UnwindError::ThreadIdRead.kind(), ErrorKind::ReadFailure);
    }
}
