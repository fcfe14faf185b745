use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[clap(name = "pystacks", about = "Sample Python interpreter stacks of running processes")]
pub struct Opt {
    /// config file, defaults to Pystacks.toml in the current directory
    #[clap(short, long, global = true)]
    pub config: Option<PathBuf>,
    #[clap(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Print the builtin offset tables
    Offsets {},
    /// Print what discovery finds out about a process, or about every python
    /// process if no pid is given
    Detect {
        #[clap(short, long)]
        pid: Option<u32>,
    },
    /// Sample every thread of a process once and print the stacks
    Dump {
        #[clap(short, long)]
        pid: u32,
    },
    /// Sample a process periodically until the duration ends or Ctrl-C
    Record {
        #[clap(short, long)]
        pid: u32,
        /// seconds to record for
        #[clap(short, long)]
        duration: Option<u64>,
        /// write the aggregated profile as JSON
        #[clap(short, long)]
        output: Option<PathBuf>,
        /// number of stacks to print
        #[clap(long, default_value_t = 10)]
        top: usize,
    },
}
