use std::io::IoSliceMut;

use nix::sys::uio::{process_vm_readv, RemoteIoVec};
use nix::unistd::Pid;
use pystacks_common::{Addr, ReadError, ReadMemory};

/// Reads another process's memory with `process_vm_readv`.
///
/// Needs the same permissions as ptrace: root, or CAP_SYS_PTRACE, or a traced child.
#[derive(Debug, Clone, Copy)]
pub struct ProcessMemory {
    pid: Pid,
}

impl ProcessMemory {
    pub fn new(pid: u32) -> Self {
        Self {
            pid: Pid::from_raw(pid as i32),
        }
    }
}

impl ReadMemory for ProcessMemory {
    fn read_bytes(&self, addr: Addr, buf: &mut [u8]) -> Result<(), ReadError> {
        let err = ReadError::new(addr, buf.len());
        if buf.is_empty() {
            return Ok(());
        }
        let base = usize::try_from(addr.get()).map_err(|_| err)?;
        let len = buf.len();
        let remote = [RemoteIoVec { base, len }];
        let mut local = [IoSliceMut::new(buf)];
        match process_vm_readv(self.pid, &mut local, &remote) {
            // a short read means part of the range is unmapped
            Ok(n) if n == len => Ok(()),
            _ => Err(err),
        }
    }
}
