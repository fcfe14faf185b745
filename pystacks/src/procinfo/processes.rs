use std::collections::HashMap;

use anyhow::Result;

use super::ProcInfo;
use crate::cache::InterpreterInfoCache;
use crate::config::PystacksConfig;

/// Discovered interpreters, by pid. Every successful detection is also
/// published to the shared [`InterpreterInfoCache`].
#[derive(Debug, Default)]
pub struct Processes {
    processes: HashMap<u32, ProcInfo>,
}

impl Processes {
    pub fn new() -> Self {
        Default::default()
    }

    /// Scans every process on the system. Processes that are not Python, or that
    /// exit while being inspected, are skipped.
    pub fn populate(&mut self, config: &PystacksConfig, cache: &InterpreterInfoCache) -> Result<usize> {
        let mut found = 0;
        for prc in procfs::process::all_processes()?.flatten() {
            let Ok(stat) = prc.stat() else { continue };
            let pid = stat.pid as u32;
            match ProcInfo::detect(pid, config) {
                Ok(info) => {
                    tracing::info!("found python {:?} in {} ({})", info.rt, pid, stat.comm);
                    cache.insert(info.info);
                    self.processes.insert(pid, info);
                    found += 1;
                }
                Err(e) => tracing::trace!("skipping {pid}: {e}"),
            }
        }

        Ok(found)
    }

    /// Detects `pid` unless it is already known.
    pub fn entry(&mut self, pid: u32, config: &PystacksConfig, cache: &InterpreterInfoCache) -> Result<&ProcInfo> {
        if !self.processes.contains_key(&pid) {
            let info = ProcInfo::detect(pid, config)?;
            cache.insert(info.info);
            self.processes.insert(pid, info);
        }

        Ok(&self.processes[&pid])
    }

    /// Forgets a process that exited.
    pub fn remove(&mut self, pid: u32, cache: &InterpreterInfoCache) -> Option<ProcInfo> {
        cache.remove(pid);
        self.processes.remove(&pid)
    }

    pub fn len(&self) -> usize {
        self.processes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.processes.is_empty()
    }
}
