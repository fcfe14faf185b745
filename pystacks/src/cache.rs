use std::num::NonZeroUsize;

use lru::LruCache;
use parking_lot::RwLock;
use pystacks_common::{InterpreterInfo, InterpreterInfoSource};

/// Interpreter facts per pid, shared between discovery (writer) and sampling
/// workers (readers).
///
/// Readers use `peek`, which doesn't touch the recency order, so lookups only
/// need the read lock. Recency is refreshed when discovery re-inserts a process.
pub struct InterpreterInfoCache {
    cache: RwLock<LruCache<u32, InterpreterInfo>>,
}

impl InterpreterInfoCache {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            cache: RwLock::new(LruCache::new(capacity)),
        }
    }

    /// Inserts or refreshes a process. Returns the pid evicted to make room, if any.
    pub fn insert(&self, info: InterpreterInfo) -> Option<u32> {
        let mut cache = self.cache.write();
        match cache.push(info.pid, info) {
            Some((pid, _)) if pid != info.pid => {
                tracing::debug!("evicted pid {pid} from interpreter cache");
                Some(pid)
            }
            _ => None,
        }
    }

    pub fn remove(&self, pid: u32) -> Option<InterpreterInfo> {
        self.cache.write().pop(&pid)
    }

    pub fn get(&self, pid: u32) -> Option<InterpreterInfo> {
        self.cache.read().peek(&pid).copied()
    }

    pub fn contains(&self, pid: u32) -> bool {
        self.cache.read().contains(&pid)
    }

    pub fn pids(&self) -> Vec<u32> {
        self.cache.read().iter().map(|(pid, _)| *pid).collect()
    }

    pub fn len(&self) -> usize {
        self.cache.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl InterpreterInfoSource for InterpreterInfoCache {
    fn interpreter_info(&self, pid: u32) -> Option<InterpreterInfo> {
        self.get(pid)
    }
}
