use std::io;
use std::path::Path;
use std::{
    fs::File,
    io::{BufRead, BufReader},
};
use thiserror::Error;

/// Parsed line for /proc/[pid]/maps
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcMemMapEntry {
    /// avma address
    pub address_range: (u64, u64),
    /// permission string, e.g. `r-xp`
    pub perms: String,
    /// offset into the file
    pub offset: u64,
    /// path of the object file
    pub object_path: String,
}

impl ProcMemMapEntry {
    /// File name of the mapped object, if the mapping is file backed.
    pub fn file_name(&self) -> Option<&str> {
        if !self.object_path.starts_with('/') {
            return None;
        }
        Path::new(&self.object_path).file_name()?.to_str()
    }
}

/// Holds the memory map of a process, which can be obtained by reading `/proc/[pid]/map`.
///
/// Discovery uses it to find the interpreter binary, the libc, and the load
/// address of each.
///
/// Example of a `/proc/[pid]/maps` entry:
/// 55d4c6a3b000-55d4c6a8e000 r--p 00000000 08:20 1053442                    /usr/bin/python3.11
/// 55d4c6a8e000-55d4c6d6e000 r-xp 00053000 08:20 1053442                    /usr/bin/python3.11
/// 7f3892fbc000-7f3892fe2000 r--p 00000000 08:20 42625                      /usr/lib/x86_64-linux-gnu/libc.so.6
/// 7f3892fe2000-7f3893137000 r-xp 00026000 08:20 42625                      /usr/lib/x86_64-linux-gnu/libc.so.6
/// 7f38911ff000-7f38913ff000 rw-p 00000000 00:00 0
#[derive(Debug, Default, Clone)]
pub struct ProcMemMap {
    pub entries: Vec<ProcMemMapEntry>,
}

impl ProcMemMap {
    /// Loads the memory map for a given process from procfs
    pub fn from_process_id(pid: u32) -> Result<Self, ProcMemMapError> {
        let reader = BufReader::new(File::open(format!("/proc/{}/maps", pid)).map_err(|e| {
            ProcMemMapError::OpenError {
                process_id: pid,
                source: e,
            }
        })?);
        parse_maps(reader)
    }

    /// First mapping whose file name satisfies `pred`.
    pub fn find_by_file_name(&self, pred: impl Fn(&str) -> bool) -> Option<&ProcMemMapEntry> {
        self.entries
            .iter()
            .find(|e| e.file_name().map(&pred).unwrap_or(false))
    }

    /// Address at which `object_path` is loaded, i.e. where its file offset 0 is mapped.
    pub fn load_address(&self, object_path: &str) -> Option<u64> {
        self.entries
            .iter()
            .filter(|e| e.object_path == object_path)
            .map(|e| e.address_range.0.saturating_sub(e.offset))
            .min()
    }
}

/// Error type for interaction with process memory maps
#[derive(Debug, Error)]
pub enum ProcMemMapError {
    /// Failed to read the context of the executable or library
    #[error("Failed to open memory map for process {process_id}")]
    OpenError {
        /// Process ID
        process_id: u32,
        /// The underlying io::Error
        source: io::Error,
    },
    /// Failed to read a full line in the process memory map
    #[error("Can not parse line")]
    ReadLineError {
        /// The underlying io::Error
        source: std::io::Error,
    },
    /// Failed to parse address information in the process memory map
    #[error("Can not parse address: Line: {line}")]
    InvalidAddress {
        /// The line which could not be parsed
        line: String,
    },
    /// Failed to parse permissions in the process memory map
    #[error("Can not parse permissions: Line: {line}")]
    InvalidPermissions {
        /// The line which could not be parsed
        line: String,
    },
    /// Failed to parse an offset in the process memory map
    #[error("Can not parse offset: Line: {line}")]
    InvalidOffset {
        /// The line which could not be parsed
        line: String,
    },
    /// Failed to parse device data in the process memory map
    #[error("Can not parse device: Line: {line}")]
    InvalidDevice {
        /// The line which could not be parsed
        line: String,
    },
    /// Failed to parse inode data in the process memory map
    #[error("Can not parse inode: Line: {line}")]
    InvalidInode {
        /// The line which could not be parsed
        line: String,
    },
}

pub(crate) fn parse_maps(reader: impl BufRead) -> Result<ProcMemMap, ProcMemMapError> {
    // See https://man7.org/linux/man-pages/man5/proc.5.html for details
    let mut entries = Vec::new();

    for line in reader.lines() {
        let line = line.map_err(|e| ProcMemMapError::ReadLineError { source: e })?;
        if line.trim().is_empty() {
            continue;
        }
        let mut parts = line.splitn(6, ' ');
        let address = parts
            .next()
            .ok_or_else(|| ProcMemMapError::InvalidAddress { line: line.clone() })?;
        let mut address_parts = address.split('-');
        let start_address = address_parts
            .next()
            .and_then(|o| u64::from_str_radix(o, 16).ok())
            .ok_or_else(|| ProcMemMapError::InvalidAddress { line: line.clone() })?;
        let end_address = address_parts
            .next()
            .and_then(|o| u64::from_str_radix(o, 16).ok())
            .ok_or_else(|| ProcMemMapError::InvalidAddress { line: line.clone() })?;
        let perms = parts
            .next()
            .filter(|p| p.len() == 4)
            .ok_or_else(|| ProcMemMapError::InvalidPermissions { line: line.clone() })?;
        let offset = parts
            .next()
            .and_then(|o| u64::from_str_radix(o, 16).ok())
            .ok_or_else(|| ProcMemMapError::InvalidOffset { line: line.clone() })?;
        let _dev = parts
            .next()
            .ok_or_else(|| ProcMemMapError::InvalidDevice { line: line.clone() })?;
        let _inode = parts
            .next()
            .ok_or_else(|| ProcMemMapError::InvalidInode { line: line.clone() })?;
        // Newlines in the path are escaped via an octal escape sequence and are not unescaped here.
        let object_path = parts.next().unwrap_or("").trim().to_string();

        entries.push(ProcMemMapEntry {
            address_range: (start_address, end_address),
            perms: perms.to_string(),
            offset,
            object_path,
        });
    }

    Ok(ProcMemMap { entries })
}
