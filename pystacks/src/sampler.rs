use nix::sys::ptrace;
use nix::sys::signal::Signal;
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::Pid;
use procfs::process::Process;
use pystacks_common::{Addr, SampleEvent, SampleSink, StackStatus, Unwinder};

use crate::cache::InterpreterInfoCache;
use crate::error::SamplerError;
use crate::process_memory::ProcessMemory;
use crate::slots::SlotPool;

/// Stops each thread of a process in turn and unwinds its Python stack.
///
/// Threads are split between the workers of the slot pool; each worker owns one
/// slot for the whole round. Results go to the sink, the returned statuses only
/// summarize the round.
pub struct Sampler<'a, S> {
    unwinder: Unwinder<'a>,
    cache: &'a InterpreterInfoCache,
    slots: &'a SlotPool,
    sink: &'a S,
}

/// Outcome of one round over a process.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RoundSummary {
    pub complete: usize,
    pub truncated: usize,
    pub errors: usize,
    /// threads that could not be stopped, typically because they exited
    pub skipped: usize,
}

impl RoundSummary {
    fn add(&mut self, status: Result<StackStatus, SamplerError>) {
        match status {
            Ok(StackStatus::Complete) => self.complete += 1,
            Ok(StackStatus::Truncated) => self.truncated += 1,
            Ok(StackStatus::Error) => self.errors += 1,
            Err(e) => {
                tracing::debug!("{e}");
                self.skipped += 1
            }
        }
    }

    fn merge(&mut self, other: RoundSummary) {
        self.complete += other.complete;
        self.truncated += other.truncated;
        self.errors += other.errors;
        self.skipped += other.skipped;
    }
}

impl<'a, S: SampleSink + Sync> Sampler<'a, S> {
    pub fn new(
        unwinder: Unwinder<'a>,
        cache: &'a InterpreterInfoCache,
        slots: &'a SlotPool,
        sink: &'a S,
    ) -> Self {
        if !cfg!(any(target_arch = "x86_64", target_arch = "aarch64")) {
            tracing::warn!("thread pointer can't be read on this architecture, threads will be skipped");
        }
        Self {
            unwinder,
            cache,
            slots,
            sink,
        }
    }

    /// Thread ids of `pid`.
    pub fn threads(pid: u32) -> Result<Vec<u32>, SamplerError> {
        let err = |source| SamplerError::Threads { pid, source };
        let process = Process::new(pid as i32).map_err(err)?;
        Ok(process
            .tasks()
            .map_err(err)?
            .flatten()
            .map(|task| task.tid as u32)
            .collect())
    }

    /// One sample of every thread of `pid`.
    pub fn sample_process(&self, pid: u32) -> Result<RoundSummary, SamplerError> {
        if !self.cache.contains(pid) {
            return Err(SamplerError::UnknownProcess { pid });
        }
        let tids = Self::threads(pid)?;
        let workers = self.slots.len().min(tids.len()).max(1);
        let chunk = tids.len().div_ceil(workers).max(1);

        let summary = std::thread::scope(|scope| {
            let handles: Vec<_> = tids
                .chunks(chunk)
                .enumerate()
                .map(|(worker, tids)| {
                    scope.spawn(move || {
                        let mut summary = RoundSummary::default();
                        for tid in tids {
                            summary.add(self.sample_thread(worker, pid, *tid));
                        }
                        summary
                    })
                })
                .collect();

            let mut summary = RoundSummary::default();
            for handle in handles {
                match handle.join() {
                    Ok(s) => summary.merge(s),
                    Err(_) => tracing::error!("sampling worker panicked"),
                }
            }
            summary
        });

        tracing::trace!("pid {pid}: {summary:?}");
        Ok(summary)
    }

    /// Stops `tid`, unwinds it in `worker`'s slot and lets it run again.
    pub fn sample_thread(&self, worker: usize, pid: u32, tid: u32) -> Result<StackStatus, SamplerError> {
        let thread = Pid::from_raw(tid as i32);
        ptrace::attach(thread).map_err(ptrace_err("attach", tid))?;

        let mut pending = None;
        let result = match wait_for_attach(thread, tid, &mut pending) {
            Err(e @ SamplerError::ThreadExited { .. }) => return Err(e),
            stopped => stopped.and_then(|()| tls_base(thread, tid)).map(|tls_base| {
                let event = SampleEvent::new(pid, tid, tls_base);
                let mut slot = self.slots.acquire(worker);
                self.unwinder
                    .run(&ProcessMemory::new(pid), self.cache, self.sink, &mut slot, &event)
            }),
        };

        // hand back a signal that arrived before the attach stop
        if let Err(e) = ptrace::detach(thread, pending) {
            tracing::warn!("failed to detach from {tid}: {e}");
        }
        result
    }
}

/// Stops a signal storm from keeping a thread from ever reaching the attach stop.
const MAX_ATTACH_STOPS: usize = 16;

/// What a wait status means for a thread that was just attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AttachStop {
    /// the SIGSTOP sent by attach, the thread can be read
    Ready,
    /// some other signal got there first
    Signal(Signal),
    /// not a signal stop, resume and wait again
    Resume,
    Gone,
}

impl From<WaitStatus> for AttachStop {
    fn from(status: WaitStatus) -> Self {
        match status {
            WaitStatus::Stopped(_, Signal::SIGSTOP) => AttachStop::Ready,
            WaitStatus::Stopped(_, sig) => AttachStop::Signal(sig),
            WaitStatus::Exited(..) | WaitStatus::Signaled(..) => AttachStop::Gone,
            _ => AttachStop::Resume,
        }
    }
}

/// Waits until the attach SIGSTOP is reported. The first other signal seen on
/// the way is stored in `pending` for detach, later ones are delivered at once.
fn wait_for_attach(thread: Pid, tid: u32, pending: &mut Option<Signal>) -> Result<(), SamplerError> {
    for _ in 0..MAX_ATTACH_STOPS {
        let status = waitpid(thread, Some(WaitPidFlag::__WALL)).map_err(ptrace_err("waitpid", tid))?;
        let deliver = match AttachStop::from(status) {
            AttachStop::Ready => return Ok(()),
            AttachStop::Gone => return Err(SamplerError::ThreadExited { tid }),
            AttachStop::Resume => None,
            AttachStop::Signal(sig) if pending.is_none() => {
                *pending = Some(sig);
                None
            }
            AttachStop::Signal(sig) => Some(sig),
        };
        ptrace::cont(thread, deliver).map_err(ptrace_err("cont", tid))?;
    }
    Err(SamplerError::Ptrace {
        op: "waitpid",
        tid,
        source: nix::Error::EAGAIN,
    })
}

fn ptrace_err(op: &'static str, tid: u32) -> impl Fn(nix::Error) -> SamplerError {
    move |source| SamplerError::Ptrace { op, tid, source }
}

#[cfg(target_arch = "x86_64")]
fn tls_base(thread: Pid, tid: u32) -> Result<Addr, SamplerError> {
    ptrace::getregs(thread)
        .map(|regs| Addr(regs.fs_base))
        .map_err(ptrace_err("getregs", tid))
}

/// `tpidr_el0` through the `NT_ARM_TLS` register set.
#[cfg(target_arch = "aarch64")]
fn tls_base(thread: Pid, tid: u32) -> Result<Addr, SamplerError> {
    const NT_ARM_TLS: usize = 0x401;
    let mut tpidr: u64 = 0;
    let mut iov = libc::iovec {
        iov_base: &mut tpidr as *mut u64 as *mut libc::c_void,
        iov_len: std::mem::size_of::<u64>(),
    };
    let ret = unsafe {
        libc::ptrace(
            libc::PTRACE_GETREGSET,
            thread.as_raw(),
            NT_ARM_TLS as *mut libc::c_void,
            &mut iov as *mut libc::iovec as *mut libc::c_void,
        )
    };
    nix::errno::Errno::result(ret)
        .map(|_| Addr(tpidr))
        .map_err(ptrace_err("getregset", tid))
}

#[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
fn tls_base(_thread: Pid, _tid: u32) -> Result<Addr, SamplerError> {
    Err(SamplerError::UnsupportedArch {
        arch: std::env::consts::ARCH,
    })
}
