use std::fs::File;
use std::io::BufWriter;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::{Context, Result};
use fnv::FnvHashMap;
use parking_lot::Mutex;
use pystacks_common::metrics::Metrics;
use pystacks_common::{Sample, SampleSink, StackRecord, StackStatus, Symbol};
use serde::Serialize;

use crate::stacktrace::{PythonFrame, PythonStackTrace};

struct StoredStack {
    record: StackRecord,
    hits: u64,
}

/// In-process store for everything the unwinder produces: symbols by id,
/// stacks by content hash, and sample counts per `(pid, stack)`.
pub struct Aggregator {
    symbols: Mutex<FnvHashMap<u32, Symbol>>,
    stacks: Mutex<FnvHashMap<u64, StoredStack>>,
    counts: Mutex<FnvHashMap<(u32, u64), u64>>,
    metrics: [AtomicU64; Metrics::Max as usize],
}

impl Default for Aggregator {
    fn default() -> Self {
        Self::new()
    }
}

/// One aggregated stack in an exported profile.
#[derive(Debug, Serialize)]
pub struct ProfileStack {
    pub pid: u32,
    pub stack_id: u64,
    pub count: u64,
    pub frames: Vec<PythonFrame>,
}

#[derive(Debug, Serialize)]
pub struct Profile {
    pub stacks: Vec<ProfileStack>,
    pub metrics: FnvHashMap<&'static str, u64>,
}

impl Aggregator {
    pub fn new() -> Self {
        Self {
            symbols: Default::default(),
            stacks: Default::default(),
            counts: Default::default(),
            metrics: std::array::from_fn(|_| AtomicU64::new(0)),
        }
    }

    fn incr(&self, metric: Metrics) {
        if let Some(m) = self.metrics.get(metric as usize) {
            m.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn metric(&self, metric: Metrics) -> u64 {
        self.metrics
            .get(metric as usize)
            .map(|m| m.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    /// Non-zero counters, in declaration order.
    pub fn metrics(&self) -> Vec<(Metrics, u64)> {
        Metrics::iter()
            .into_iter()
            .filter(|m| *m != Metrics::Max)
            .map(|m| (m, self.metric(m)))
            .filter(|(_, v)| *v > 0)
            .collect()
    }

    pub fn symbol(&self, id: u32) -> Option<Symbol> {
        self.symbols.lock().get(&id).copied()
    }

    pub fn symbol_count(&self) -> usize {
        self.symbols.lock().len()
    }

    pub fn stack_count(&self) -> usize {
        self.stacks.lock().len()
    }

    /// How often `stack_id` was stored.
    pub fn stack_hits(&self, stack_id: u64) -> u64 {
        self.stacks.lock().get(&stack_id).map(|s| s.hits).unwrap_or(0)
    }

    /// Resolves a stored stack into frames. Unknown symbol ids become empty frames.
    pub fn symbolize(&self, stack_id: u64) -> Option<PythonStackTrace> {
        let record = self.stacks.lock().get(&stack_id)?.record;
        let symbols = self.symbols.lock();
        let frames = record
            .as_slice()
            .iter()
            .map(|entry| {
                let (line, id) = StackRecord::split(*entry);
                match symbols.get(&id) {
                    Some(symbol) => PythonFrame::new(symbol, line),
                    None => PythonFrame::new(&Symbol::default(), line),
                }
            })
            .collect();
        Some(PythonStackTrace { frames })
    }

    /// The `n` most sampled stacks, most frequent first.
    pub fn top_stacks(&self, n: usize) -> Vec<(u32, u64, u64)> {
        let mut counts: Vec<_> = self
            .counts
            .lock()
            .iter()
            .map(|((pid, stack_id), count)| (*pid, *stack_id, *count))
            .collect();
        counts.sort_by(|a, b| b.2.cmp(&a.2).then(a.1.cmp(&b.1)));
        counts.truncate(n);
        counts
    }

    pub fn export(&self) -> Profile {
        let stacks = self
            .top_stacks(usize::MAX)
            .into_iter()
            .map(|(pid, stack_id, count)| ProfileStack {
                pid,
                stack_id,
                count,
                frames: self.symbolize(stack_id).map(|t| t.frames).unwrap_or_default(),
            })
            .collect();
        let metrics = self
            .metrics()
            .into_iter()
            .map(|(m, v)| (m.name(), v))
            .collect();
        Profile { stacks, metrics }
    }

    pub fn write_json(&self, path: &Path) -> Result<()> {
        let file = File::create(path).with_context(|| format!("unable to create {path:?}"))?;
        serde_json::to_writer_pretty(BufWriter::new(file), &self.export())
            .with_context(|| format!("unable to write profile to {path:?}"))?;
        Ok(())
    }
}

impl SampleSink for Aggregator {
    fn intern_symbol(&self, id: u32, symbol: &Symbol) {
        self.symbols.lock().entry(id).or_insert(*symbol);
    }

    fn store_stack(&self, hash: u64, stack: &StackRecord) {
        self.stacks
            .lock()
            .entry(hash)
            .or_insert(StoredStack {
                record: *stack,
                hits: 0,
            })
            .hits += 1;
    }

    fn submit(&self, sample: &Sample) {
        self.incr(Metrics::SamplesSubmitted);
        if let Some(error) = sample.error {
            tracing::debug!("{}: {}", sample.pid_tgid, error);
            self.incr(Metrics::from(error));
            self.incr(Metrics::from(error.kind()));
            return;
        }
        if let Some(metric) = Metrics::for_status(sample.status) {
            self.incr(metric);
        }
        if sample.status != StackStatus::Error {
            *self
                .counts
                .lock()
                .entry((sample.pid_tgid.pid(), sample.interpreter_stack_id))
                .or_default() += 1;
        }
    }
}
