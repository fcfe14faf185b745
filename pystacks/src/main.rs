use std::path::Path;
use std::process::exit;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use libc::getuid;
use pystacks::aggregator::Aggregator;
use pystacks::args::{Commands, Opt};
use pystacks::config::PystacksConfig;
use pystacks::Pystacks;
use pystacks_common::python::offsets::{GLIBC_CATALOG, MUSL_CATALOG, PYTHON_CATALOG};
use tokio::signal;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// make sure we are running with root privileges
fn ensure_root() {
    let uid = unsafe { getuid() };
    if uid != 0 {
        error!("pystacks must be run with root privileges!");
        exit(-1);
    }
}

fn init_logger() {
    let filter = EnvFilter::try_from_env("LOG_LEVEL").unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn print_offsets() {
    for (name, offsets) in PYTHON_CATALOG.iter() {
        println!("{name}: {offsets:#?}");
    }
    for (name, offsets) in GLIBC_CATALOG.iter().chain(MUSL_CATALOG.iter()) {
        println!("{name}: {offsets:#?}");
    }
}

fn print_stacks(aggregator: &Aggregator, top: usize) {
    for (pid, stack_id, count) in aggregator.top_stacks(top) {
        if let Some(trace) = aggregator.symbolize(stack_id) {
            println!("{count} samples in {pid} (stack {stack_id:#018x}):");
            print!("{trace}");
            println!();
        }
    }
    for (metric, value) in aggregator.metrics() {
        info!("{}: {value}", metric.name());
    }
}

fn process_exists(pid: u32) -> bool {
    Path::new(&format!("/proc/{pid}")).exists()
}

async fn record(ctx: Arc<Pystacks>, pid: u32, duration: Option<u64>) -> Result<()> {
    let period = ctx.config.sampler_period()?;
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let deadline = async {
        match duration {
            Some(secs) => tokio::time::sleep(Duration::from_secs(secs)).await,
            None => std::future::pending().await,
        }
    };
    tokio::pin!(deadline);

    let mut rounds = 0usize;
    loop {
        tokio::select! {
            _ = signal::ctrl_c() => {
                info!("exiting");
                break;
            }
            _ = &mut deadline => break,
            _ = interval.tick() => {
                let round = Arc::clone(&ctx);
                match tokio::task::spawn_blocking(move || round.sample(pid)).await? {
                    Ok(summary) => {
                        rounds += 1;
                        tracing::debug!("round {rounds}: {summary:?}");
                    }
                    Err(e) if !process_exists(pid) => {
                        info!("process {pid} exited: {e:#}");
                        ctx.forget(pid);
                        break;
                    }
                    Err(e) => warn!("sampling {pid} failed: {e:#}"),
                }
            }
        }
    }

    info!("recorded {rounds} rounds");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logger();

    let opt = Opt::parse();
    let config = PystacksConfig::load(opt.config.as_deref())?;

    match opt.command {
        Commands::Offsets {} => {
            print_offsets();
        }
        Commands::Detect { pid } => {
            ensure_root();
            let ctx = Pystacks::new(config)?;
            match pid {
                Some(pid) => println!("{:#?}", ctx.discover(pid)?),
                None => {
                    let found = ctx.discover_all()?;
                    info!("found {found} python processes");
                    for pid in ctx.cache.pids() {
                        if let Some(info) = ctx.cache.get(pid) {
                            println!("{info:#?}");
                        }
                    }
                }
            }
        }
        Commands::Dump { pid } => {
            ensure_root();
            let ctx = Pystacks::new(config)?;
            ctx.discover(pid)?;
            let summary = ctx.sample(pid)?;
            info!("{summary:?}");
            print_stacks(&ctx.aggregator, usize::MAX);
        }
        Commands::Record {
            pid,
            duration,
            output,
            top,
        } => {
            ensure_root();
            let ctx = Arc::new(Pystacks::new(config)?);
            let info = ctx.discover(pid)?;
            info!("recording {:?} in {}", info.rt, pid);

            record(Arc::clone(&ctx), pid, duration).await?;

            print_stacks(&ctx.aggregator, top);
            if let Some(output) = output {
                ctx.aggregator.write_json(&output)?;
                info!("profile written to {output:?}");
            }
        }
    }

    Ok(())
}
