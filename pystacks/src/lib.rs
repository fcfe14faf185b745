pub mod aggregator;
pub mod args;
pub mod cache;
pub mod config;
pub mod error;
pub mod proc_mem;
pub mod process_memory;
pub mod procinfo;
pub mod pystacks;
pub mod sampler;
pub mod slots;
pub mod stacktrace;

pub use crate::pystacks::Pystacks;
