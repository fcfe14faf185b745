use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use super::{Addr, ReadError, ReadMemory};

/// An in-memory address space made of disjoint byte regions.
///
/// Used to replay captured process images and to build synthetic interpreter
/// layouts in tests. Counts every `read_bytes` call, successful or not.
#[derive(Default)]
pub struct SnapshotMemory {
    regions: BTreeMap<u64, Vec<u8>>,
    reads: AtomicUsize,
}

impl SnapshotMemory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copies `bytes` to `addr`, overwriting whatever was mapped there.
    /// Writes that straddle existing regions merge them.
    pub fn write(&mut self, addr: Addr, bytes: &[u8]) {
        let start = addr.0;
        let end = start + bytes.len() as u64;

        // collect every region touching [start, end)
        let overlapping: Vec<u64> = self
            .regions
            .range(..=end)
            .filter(|(base, data)| **base + data.len() as u64 >= start)
            .map(|(base, _)| *base)
            .collect();

        let mut new_start = start;
        let mut new_end = end;
        for base in &overlapping {
            let len = self.regions[base].len() as u64;
            new_start = new_start.min(*base);
            new_end = new_end.max(base + len);
        }

        let mut merged = vec![0u8; (new_end - new_start) as usize];
        for base in overlapping {
            if let Some(data) = self.regions.remove(&base) {
                let at = (base - new_start) as usize;
                merged[at..at + data.len()].copy_from_slice(&data);
            }
        }
        let at = (start - new_start) as usize;
        merged[at..at + bytes.len()].copy_from_slice(bytes);
        self.regions.insert(new_start, merged);
    }

    /// Maps `len` zeroed bytes at `addr`.
    pub fn alloc(&mut self, addr: Addr, len: usize) {
        self.write(addr, &vec![0u8; len]);
    }

    pub fn write_u64(&mut self, addr: Addr, value: u64) {
        self.write(addr, &value.to_ne_bytes());
    }

    pub fn write_u32(&mut self, addr: Addr, value: u32) {
        self.write(addr, &value.to_ne_bytes());
    }

    pub fn write_u8(&mut self, addr: Addr, value: u8) {
        self.write(addr, &[value]);
    }

    pub fn write_addr(&mut self, addr: Addr, value: Addr) {
        self.write_u64(addr, value.0);
    }

    /// Writes `s` followed by a NUL byte.
    pub fn write_cstr(&mut self, addr: Addr, s: &str) {
        let mut bytes = Vec::with_capacity(s.len() + 1);
        bytes.extend_from_slice(s.as_bytes());
        bytes.push(0);
        self.write(addr, &bytes);
    }

    /// Number of `read_bytes` calls made so far.
    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::Relaxed)
    }

    pub fn reset_reads(&self) {
        self.reads.store(0, Ordering::Relaxed);
    }
}

impl ReadMemory for SnapshotMemory {
    fn read_bytes(&self, addr: Addr, buf: &mut [u8]) -> Result<(), ReadError> {
        self.reads.fetch_add(1, Ordering::Relaxed);
        let err = ReadError::new(addr, buf.len());

        let end = addr.0.checked_add(buf.len() as u64).ok_or(err)?;
        let (base, data) = self.regions.range(..=addr.0).next_back().ok_or(err)?;
        if end > base + data.len() as u64 {
            return Err(err);
        }
        let at = (addr.0 - base) as usize;
        buf.copy_from_slice(&data[at..at + buf.len()]);
        Ok(())
    }
}
