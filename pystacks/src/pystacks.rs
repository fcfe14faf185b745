use std::sync::Arc;

use anyhow::Result;
use parking_lot::Mutex;
use pystacks_common::{OffsetTables, UnwindBudget, Unwinder};

use crate::aggregator::Aggregator;
use crate::cache::InterpreterInfoCache;
use crate::config::PystacksConfig;
use crate::procinfo::processes::Processes;
use crate::procinfo::ProcInfo;
use crate::sampler::{RoundSummary, Sampler};
use crate::slots::SlotPool;

/// Everything a profiling session shares: the offset tables, the interpreter
/// cache filled by discovery, the worker slots and the aggregator.
pub struct Pystacks {
    pub config: PystacksConfig,
    pub tables: OffsetTables,
    pub budget: UnwindBudget,
    pub cache: InterpreterInfoCache,
    pub slots: SlotPool,
    pub aggregator: Arc<Aggregator>,
    processes: Mutex<Processes>,
}

impl Pystacks {
    pub fn new(config: PystacksConfig) -> Result<Self> {
        let tables = config.offset_tables()?;
        let budget = config.budget()?;
        config.sampler_period()?;
        Ok(Self {
            cache: InterpreterInfoCache::new(config.cache.max_processes),
            slots: SlotPool::new(config.sampler.workers),
            aggregator: Arc::new(Aggregator::new()),
            processes: Default::default(),
            tables,
            budget,
            config,
        })
    }

    pub fn unwinder(&self) -> Unwinder<'_> {
        Unwinder::new(&self.tables)
            .with_arch(self.config.unwinder.arch)
            .with_budget(self.budget)
    }

    /// Detects `pid` and publishes it to the cache.
    pub fn discover(&self, pid: u32) -> Result<ProcInfo> {
        let mut processes = self.processes.lock();
        Ok(processes.entry(pid, &self.config, &self.cache)?.clone())
    }

    /// Discovers every Python process on the system.
    pub fn discover_all(&self) -> Result<usize> {
        self.processes.lock().populate(&self.config, &self.cache)
    }

    /// Drops a process that is gone.
    pub fn forget(&self, pid: u32) {
        self.processes.lock().remove(pid, &self.cache);
    }

    /// One sample of every thread of `pid`.
    pub fn sample(&self, pid: u32) -> Result<RoundSummary> {
        let sampler = Sampler::new(self.unwinder(), &self.cache, &self.slots, &*self.aggregator);
        Ok(sampler.sample_process(pid)?)
    }
}
