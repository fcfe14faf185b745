use std::env::args;

use anyhow::{bail, Context, Result};
use pystacks::aggregator::Aggregator;
use pystacks::cache::InterpreterInfoCache;
use pystacks::slots::SlotPool;
use pystacks_common::{OffsetTables, SampleEvent, TargetArch, Unwinder};
use tests::{request_stack, FrameSpec, ImageBuilder, PythonImage, PY311, PY312, PY38};

const PID: u32 = 4242;

/// Unwinds `image` `rounds` times as thread `PID + 1` and prints what the
/// aggregator ends up with.
fn unwind(image: PythonImage, rounds: usize) {
    let tables = OffsetTables::builtin();
    let cache = InterpreterInfoCache::new(16);
    let slots = SlotPool::new(1);
    let aggregator = Aggregator::new();
    cache.insert(image.info);

    let unwinder = Unwinder::new(&tables).with_arch(TargetArch::X86_64);
    let event = SampleEvent::new(PID, PID + 1, image.tls_base);
    for _ in 0..rounds {
        let mut slot = slots.acquire(0);
        unwinder.run(&image.mem, &cache, &aggregator, &mut slot, &event);
    }

    for (pid, stack_id, count) in aggregator.top_stacks(usize::MAX) {
        if let Some(trace) = aggregator.symbolize(stack_id) {
            println!("{count} samples in {pid}:");
            print!("{trace}");
        }
    }
    for (metric, value) in aggregator.metrics() {
        eprintln!("{}: {value}", metric.name());
    }
}

fn main() -> Result<()> {
    let test = args().nth(1).context("no input")?;
    match test.as_str() {
        "py38" => unwind(ImageBuilder::new(PID, PY38).frames(&request_stack()).build(), 3),
        "py311" => unwind(
            ImageBuilder::new(PID, PY311).frames(&request_stack()).tls(1).build(),
            2,
        ),
        "py312" => {
            let mut frames = request_stack();
            frames.insert(2, FrameSpec::shim());
            unwind(ImageBuilder::new(PID, PY312).frames(&frames).tls(1).build(), 1)
        }
        "deep" => unwind(
            ImageBuilder::new(PID, PY38)
                .repeat(FrameSpec::function("/srv/app/recurse.py", "fib", 0), 200)
                .build(),
            1,
        ),
        other => bail!("unknown scenario {other}"),
    }

    Ok(())
}
