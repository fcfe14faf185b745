/// Verbose unwinder logging, compiled out unless the `user` feature is on.
#[cfg(feature = "user")]
macro_rules! log {
    ($($arg:tt)*) => {
        tracing::trace!($($arg)*)
    };
}

#[cfg(not(feature = "user"))]
macro_rules! log {
    ($($arg:tt)*) => {
        ()
    };
}
