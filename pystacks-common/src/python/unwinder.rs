//! The two-stage Python stack unwinder.
//!
//! [`Unwinder::unwind_python_stack`] resolves the sampled thread's `PyThreadState`
//! and its innermost frame. [`Unwinder::walk_python_stack`] then follows the
//! frame list for at most `frames_per_invocation` frames per call, asking to be
//! called again with [`Step::TailCall`] until the stack ends or the invocation
//! budget is spent. Every read goes through [`ReadMemory`] and may fail, every
//! failure ends in exactly one submitted [`Sample`].

use crate::mem::{Addr, ReadMemory};
use crate::pidtgid::PidTgid;

use super::error::UnwindError;
use super::hash::{stack_hash, symbol_id};
use super::offsets::PythonVersionOffsets;
use super::state::{
    InterpreterInfo, Sample, StackRecord, StackStatus, Symbol, UnwindBudget, WorkingState,
    FRAME_OWNED_BY_CSTACK,
};
use super::symbol::read_symbol;
use super::tls::{tls_read, TargetArch};
use super::OffsetTables;

/// Per-process interpreter facts, keyed by pid.
pub trait InterpreterInfoSource {
    fn interpreter_info(&self, pid: u32) -> Option<InterpreterInfo>;
}

impl<F> InterpreterInfoSource for F
where
    F: Fn(u32) -> Option<InterpreterInfo>,
{
    fn interpreter_info(&self, pid: u32) -> Option<InterpreterInfo> {
        self(pid)
    }
}

/// Receives everything an unwind produces.
pub trait SampleSink {
    /// Called for every symbolized frame, duplicates included.
    fn intern_symbol(&self, id: u32, symbol: &Symbol);
    /// Called once per finished walk with the stack's content hash.
    fn store_stack(&self, hash: u64, stack: &StackRecord);
    /// Called exactly once per sample event.
    fn submit(&self, sample: &Sample);
}

/// A thread caught running, as delivered by the event source.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SampleEvent {
    pub pid_tgid: PidTgid,
    /// The thread pointer of the sampled thread.
    pub tls_base: Addr,
}

impl SampleEvent {
    pub const fn new(pid: u32, tid: u32, tls_base: Addr) -> Self {
        Self {
            pid_tgid: PidTgid::new(pid, tid),
            tls_base,
        }
    }
}

/// What the caller should do after one stage ran.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Step {
    /// Invoke [`Unwinder::walk_python_stack`] with the same state.
    TailCall,
    /// The sample has been submitted.
    Done(StackStatus),
}

#[derive(Clone, Copy, Debug)]
pub struct Unwinder<'a> {
    tables: &'a OffsetTables,
    arch: TargetArch,
    budget: UnwindBudget,
}

impl<'a> Unwinder<'a> {
    pub fn new(tables: &'a OffsetTables) -> Self {
        Self {
            tables,
            arch: TargetArch::host(),
            budget: UnwindBudget::default(),
        }
    }

    pub fn with_arch(mut self, arch: TargetArch) -> Self {
        self.arch = arch;
        self
    }

    pub fn with_budget(mut self, budget: UnwindBudget) -> Self {
        self.budget = budget;
        self
    }

    pub fn budget(&self) -> UnwindBudget {
        self.budget
    }

    pub fn arch(&self) -> TargetArch {
        self.arch
    }

    /// Bootstrap stage. Resets `state`, finds the first frame, and either asks
    /// for the walker or submits an error sample.
    pub fn unwind_python_stack<M, I, S>(
        &self,
        mem: &M,
        infos: &I,
        sink: &S,
        state: &mut WorkingState,
        event: &SampleEvent,
    ) -> Step
    where
        M: ReadMemory,
        I: InterpreterInfoSource + ?Sized,
        S: SampleSink + ?Sized,
    {
        state.reset();
        state.sample.pid_tgid = event.pid_tgid;
        log!("[event] pid={} tid={}", event.pid_tgid.pid(), event.pid_tgid.tid());

        match self.bootstrap(mem, infos, state, event) {
            Ok(()) => {
                log!("frame_ptr {}", state.frame_ptr);
                Step::TailCall
            }
            Err(e) => self.submit_without_unwinding(sink, state, e),
        }
    }

    fn bootstrap<M, I>(
        &self,
        mem: &M,
        infos: &I,
        state: &mut WorkingState,
        event: &SampleEvent,
    ) -> Result<(), UnwindError>
    where
        M: ReadMemory,
        I: InterpreterInfoSource + ?Sized,
    {
        let info = infos
            .interpreter_info(event.pid_tgid.pid())
            .ok_or(UnwindError::InterpreterInfoMissing)?;
        state.interpreter_info = info;

        // the layout is fixed before touching the target
        let offsets = self
            .tables
            .python(info.py_version_index)
            .ok_or(UnwindError::VersionOffsetsMissing)?;

        if !info.thread_state_addr.is_null() {
            state.thread_state = mem
                .read_addr(info.thread_state_addr)
                .map_err(|_| UnwindError::ThreadStateAddrRead)?;
            log!("thread_state {} via {}", state.thread_state, info.thread_state_addr);
        }

        if info.use_tls {
            log!("tls_base {}", event.tls_base);
            state.thread_state = tls_read(mem, self.arch, self.tables, &info, event.tls_base)?;
        }

        if state.thread_state.is_null() {
            return Err(UnwindError::ThreadStateNull);
        }

        state.current_pthread = mem
            .read_u64_at(state.thread_state, offsets.py_thread_state.thread_id)
            .map_err(|_| UnwindError::ThreadIdRead)?;
        log!("pthread_id {}", state.current_pthread);

        state.frame_ptr = if offsets.py_thread_state.frame >= 0 {
            mem.read_addr_at(state.thread_state, offsets.py_thread_state.frame)
                .map_err(|_| UnwindError::FrameRead)?
        } else {
            let cframe = mem
                .read_addr_at(state.thread_state, offsets.py_thread_state.cframe)
                .map_err(|_| UnwindError::CFrameRead)?;
            if cframe.is_null() {
                return Err(UnwindError::CFrameNull);
            }
            mem.read_addr_at(cframe, offsets.py_cframe.current_frame)
                .unwrap_or(Addr::NULL)
        };

        if state.frame_ptr.is_null() {
            return Err(UnwindError::FrameNull);
        }
        Ok(())
    }

    /// Walking stage. Symbolizes up to `frames_per_invocation` frames starting at
    /// `state.frame_ptr`.
    pub fn walk_python_stack<M, S>(&self, mem: &M, sink: &S, state: &mut WorkingState) -> Step
    where
        M: ReadMemory,
        S: SampleSink + ?Sized,
    {
        let Some(offsets) = self.tables.python(state.interpreter_info.py_version_index) else {
            return self.submit_without_unwinding(sink, state, UnwindError::VersionOffsetsMissing);
        };

        state.stack_walker_prog_call_count += 1;
        log!("[start] walk_python_stack #{}", state.stack_walker_prog_call_count);

        let mut symbol = Symbol::default();
        for _ in 0..self.budget.frames_per_invocation {
            if self.walk_frame(mem, sink, offsets, state, &mut symbol).is_none() {
                log!("[complete] walk_python_stack, stack_len={}", state.sample.stack.len);
                return self.finish(sink, state, StackStatus::Complete);
            }
        }

        if (state.stack_walker_prog_call_count as usize) < self.budget.max_invocations {
            log!("[continue] walk_python_stack");
            return Step::TailCall;
        }

        log!("[truncated] walk_python_stack, stack_len={}", state.sample.stack.len);
        self.finish(sink, state, StackStatus::Truncated)
    }

    /// Records the frame at `state.frame_ptr` and advances to its caller.
    /// `None` means the stack ended.
    fn walk_frame<M, S>(
        &self,
        mem: &M,
        sink: &S,
        offsets: &PythonVersionOffsets,
        state: &mut WorkingState,
        symbol: &mut Symbol,
    ) -> Option<()>
    where
        M: ReadMemory,
        S: SampleSink + ?Sized,
    {
        let mut frame = non_null(state.frame_ptr)?;

        // shim frames owned by the C stack carry no Python code
        if let Some(owner) = frame.field(offsets.py_interpreter_frame.owner) {
            if mem.read_u8(owner) == Ok(FRAME_OWNED_BY_CSTACK) {
                frame = non_null(mem.read_addr_at(frame, offsets.py_frame_object.f_back).ok()?)?;
            }
        }

        let code = non_null(mem.read_addr_at(frame, offsets.py_frame_object.f_code).ok()?)?;

        let line = read_symbol(mem, offsets, frame, code, symbol);
        let id = symbol_id(symbol);
        log!("\t{:?} line {} id {:#x}", symbol, line, id);

        sink.intern_symbol(id, symbol);
        state.sample.stack.push(StackRecord::entry(line, id));

        state.frame_ptr = mem
            .read_addr_at(frame, offsets.py_frame_object.f_back)
            .unwrap_or(Addr::NULL);
        non_null(state.frame_ptr).map(|_| ())
    }

    fn finish<S: SampleSink + ?Sized>(&self, sink: &S, state: &mut WorkingState, status: StackStatus) -> Step {
        state.sample.status = status;
        let hash = stack_hash(&state.sample.stack);
        sink.store_stack(hash, &state.sample.stack);
        state.sample.interpreter_stack_id = hash;
        sink.submit(&state.sample);
        Step::Done(status)
    }

    fn submit_without_unwinding<S: SampleSink + ?Sized>(
        &self,
        sink: &S,
        state: &mut WorkingState,
        error: UnwindError,
    ) -> Step {
        log!("[error] {}", error);
        state.sample.status = StackStatus::Error;
        state.sample.error = Some(error);
        sink.submit(&state.sample);
        Step::Done(StackStatus::Error)
    }

    /// Runs both stages to completion for one event and returns the final status.
    /// The walker runs at most `max_invocations` times.
    pub fn run<M, I, S>(
        &self,
        mem: &M,
        infos: &I,
        sink: &S,
        state: &mut WorkingState,
        event: &SampleEvent,
    ) -> StackStatus
    where
        M: ReadMemory,
        I: InterpreterInfoSource + ?Sized,
        S: SampleSink + ?Sized,
    {
        let mut step = self.unwind_python_stack(mem, infos, sink, state, event);
        for _ in 0..self.budget.max_invocations {
            match step {
                Step::Done(status) => return status,
                Step::TailCall => step = self.walk_python_stack(mem, sink, state),
            }
        }
        match step {
            Step::Done(status) => status,
            // the walker truncates on its last invocation, so this only happens
            // if a caller already ran it on this state
            Step::TailCall => {
                self.finish(sink, state, StackStatus::Truncated);
                StackStatus::Truncated
            }
        }
    }
}

#[inline(always)]
fn non_null(addr: Addr) -> Option<Addr> {
    (!addr.is_null()).then_some(addr)
}
