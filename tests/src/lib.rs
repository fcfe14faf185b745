//! Synthetic CPython process images for exercising the unwinder end to end.
//!
//! An image is the memory of one interpreter thread laid out with the builtin
//! offsets of a given version: the thread state, its frame list, code objects,
//! strings, and for methods the `self`/`cls` first argument and its type.

use pystacks_common::mem::snapshot::SnapshotMemory;
use pystacks_common::python::offsets::{PythonVersionOffsets, GLIBC_CATALOG, PYTHON_CATALOG};
use pystacks_common::python::state::FRAME_OWNED_BY_CSTACK;
use pystacks_common::python::tls::tls_slot_address;
use pystacks_common::{Addr, InterpreterInfo, LibcImplementation, PythonVersion, TargetArch};

pub const PY38: PythonVersion = PythonVersion::new(3, 8, 10);
pub const PY311: PythonVersion = PythonVersion::new(3, 11, 4);
pub const PY312: PythonVersion = PythonVersion::new(3, 12, 0);

/// Thread pointer handed to the unwinder for TLS images.
pub const TLS_BASE: Addr = Addr(0x7f00_0000_0000);
const THREAD_STATE_GLOBAL: Addr = Addr(0x1000);
const HEAP: u64 = 0x10_0000;

/// How the first argument of a frame's code object is named.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Receiver {
    None,
    /// `self`, an instance of the class
    Instance(&'static str),
    /// `cls`, the class itself
    Class(&'static str),
}

#[derive(Debug, Clone, Copy)]
pub struct FrameSpec {
    pub path: &'static str,
    pub method: &'static str,
    pub receiver: Receiver,
    pub line: u32,
    /// 3.12 shim frame owned by the C stack
    pub cstack_owned: bool,
}

impl FrameSpec {
    pub const fn function(path: &'static str, method: &'static str, line: u32) -> Self {
        Self {
            path,
            method,
            receiver: Receiver::None,
            line,
            cstack_owned: false,
        }
    }

    pub const fn method(path: &'static str, class: &'static str, method: &'static str, line: u32) -> Self {
        Self {
            path,
            method,
            receiver: Receiver::Instance(class),
            line,
            cstack_owned: false,
        }
    }

    pub const fn class_method(path: &'static str, class: &'static str, method: &'static str, line: u32) -> Self {
        Self {
            path,
            method,
            receiver: Receiver::Class(class),
            line,
            cstack_owned: false,
        }
    }

    pub const fn shim() -> Self {
        Self {
            path: "",
            method: "",
            receiver: Receiver::None,
            line: 0,
            cstack_owned: true,
        }
    }
}

/// One interpreter thread, ready to be unwound.
pub struct PythonImage {
    pub mem: SnapshotMemory,
    pub info: InterpreterInfo,
    pub tls_base: Addr,
    /// `_PyRuntime`, with the thread state key filled in for TLS images
    pub runtime: Addr,
}

pub struct ImageBuilder {
    pid: u32,
    version: PythonVersion,
    frames: Vec<FrameSpec>,
    tls_key: Option<u32>,
}

impl ImageBuilder {
    pub fn new(pid: u32, version: PythonVersion) -> Self {
        Self {
            pid,
            version,
            frames: Vec::new(),
            tls_key: None,
        }
    }

    /// Frames innermost first.
    pub fn frames(mut self, frames: &[FrameSpec]) -> Self {
        self.frames.extend_from_slice(frames);
        self
    }

    /// `depth` copies of `frame` with lines `1..=depth`.
    pub fn repeat(mut self, frame: FrameSpec, depth: usize) -> Self {
        self.frames
            .extend((0..depth).map(|i| FrameSpec { line: i as u32 + 1, ..frame }));
        self
    }

    /// Resolve the thread state through glibc TLS with `key` instead of a global.
    pub fn tls(mut self, key: u32) -> Self {
        self.tls_key = Some(key);
        self
    }

    pub fn build(self) -> PythonImage {
        let index = self
            .version
            .catalog_index()
            .unwrap_or_else(|| panic!("no offsets for {}", self.version));
        let o = PYTHON_CATALOG[index as usize].1;
        let mut heap = Heap::new();
        let mut mem = SnapshotMemory::new();

        let thread_state = heap.alloc(&mut mem, 0x200);
        mem.write_u64(at(thread_state, o.py_thread_state.thread_id), 0x7f00_dead_beef);

        let frames: Vec<Addr> = self.frames.iter().map(|_| heap.alloc(&mut mem, 0x200)).collect();
        let first = frames.first().copied().unwrap_or(Addr::NULL);
        if o.py_thread_state.frame >= 0 {
            mem.write_addr(at(thread_state, o.py_thread_state.frame), first);
        } else {
            let cframe = heap.alloc(&mut mem, 0x40);
            mem.write_addr(at(thread_state, o.py_thread_state.cframe), cframe);
            mem.write_addr(at(cframe, o.py_cframe.current_frame), first);
        }

        for (i, spec) in self.frames.iter().enumerate() {
            let frame = frames[i];
            let back = frames.get(i + 1).copied().unwrap_or(Addr::NULL);
            mem.write_addr(at(frame, o.py_frame_object.f_back), back);
            if spec.cstack_owned {
                mem.write_u8(at(frame, o.py_interpreter_frame.owner), FRAME_OWNED_BY_CSTACK);
                continue;
            }
            let code = write_code(&mut mem, &mut heap, &o, spec);
            mem.write_addr(at(frame, o.py_frame_object.f_code), code);
            write_receiver(&mut mem, &mut heap, &o, frame, spec.receiver);
        }

        let runtime = heap.alloc(&mut mem, 0x1000);
        let mut info = InterpreterInfo {
            pid: self.pid,
            py_version_index: index,
            libc_implementation: LibcImplementation::Glibc,
            ..Default::default()
        };
        match self.tls_key {
            Some(key) => {
                let slot = tls_slot_address(
                    &mem,
                    TargetArch::X86_64,
                    LibcImplementation::Glibc,
                    &GLIBC_CATALOG[0].1,
                    key,
                    TLS_BASE,
                )
                .unwrap_or_else(|e| panic!("{e}"));
                mem.write_addr(slot, thread_state);
                let tss = at(runtime, o.py_runtime_state.autotss_key);
                mem.write_u32(tss, 1);
                mem.write_u32(at(tss, 4), key);
                info.use_tls = true;
                info.tls_key = key;
            }
            None => {
                mem.write_addr(THREAD_STATE_GLOBAL, thread_state);
                info.thread_state_addr = THREAD_STATE_GLOBAL;
            }
        }

        PythonImage {
            mem,
            info,
            tls_base: TLS_BASE,
            runtime,
        }
    }
}

fn at(base: Addr, offset: i64) -> Addr {
    base.field(offset)
        .unwrap_or_else(|| panic!("field {offset} missing at {base}"))
}

struct Heap {
    next: u64,
}

impl Heap {
    fn new() -> Self {
        Self { next: HEAP }
    }

    fn alloc(&mut self, mem: &mut SnapshotMemory, len: usize) -> Addr {
        let addr = Addr(self.next);
        mem.alloc(addr, len);
        // leave gaps so stray reads between objects fail
        self.next += (len as u64 + 0xfff) & !0xfff;
        self.next += 0x1000;
        addr
    }
}

fn write_str(mem: &mut SnapshotMemory, heap: &mut Heap, o: &PythonVersionOffsets, s: &str) -> Addr {
    let obj = heap.alloc(mem, o.py_string.data as usize + s.len() + 1);
    mem.write_cstr(at(obj, o.py_string.data), s);
    obj
}

fn write_code(mem: &mut SnapshotMemory, heap: &mut Heap, o: &PythonVersionOffsets, spec: &FrameSpec) -> Addr {
    let code = heap.alloc(mem, 0x100);
    let filename = write_str(mem, heap, o, spec.path);
    let name = write_str(mem, heap, o, spec.method);
    mem.write_addr(at(code, o.py_code_object.co_filename), filename);
    mem.write_addr(at(code, o.py_code_object.co_name), name);
    mem.write_u32(at(code, o.py_code_object.co_firstlineno), spec.line);

    let varnames = heap.alloc(mem, 0x40);
    let first = match spec.receiver {
        Receiver::None => None,
        Receiver::Instance(_) => Some("self"),
        Receiver::Class(_) => Some("cls"),
    };
    match first {
        Some(arg) => {
            let arg = write_str(mem, heap, o, arg);
            mem.write_u64(at(varnames, o.py_tuple_object.ob_size), 1);
            mem.write_addr(at(varnames, o.py_tuple_object.ob_item), arg);
        }
        None => mem.write_u64(at(varnames, o.py_tuple_object.ob_size), 0),
    }
    mem.write_addr(at(code, o.py_code_object.co_varnames), varnames);
    code
}

fn write_receiver(mem: &mut SnapshotMemory, heap: &mut Heap, o: &PythonVersionOffsets, frame: Addr, receiver: Receiver) {
    let class = match receiver {
        Receiver::None => return,
        Receiver::Instance(class) | Receiver::Class(class) => class,
    };
    let type_obj = heap.alloc(mem, 0x100);
    let tp_name = heap.alloc(mem, class.len() + 1);
    mem.write_cstr(tp_name, class);
    mem.write_addr(at(type_obj, o.py_type_object.tp_name), tp_name);

    let local = match receiver {
        Receiver::Instance(_) => {
            let instance = heap.alloc(mem, 0x40);
            mem.write_addr(at(instance, o.py_object.ob_type), type_obj);
            instance
        }
        _ => type_obj,
    };
    mem.write_addr(at(frame, o.py_frame_object.f_localsplus), local);
}

/// A small web request handled by a method, called from a plain function.
pub fn request_stack() -> Vec<FrameSpec> {
    vec![
        FrameSpec::method("/srv/app/views.py", "OrderView", "get", 42),
        FrameSpec::class_method("/srv/app/models.py", "Order", "load", 17),
        FrameSpec::function("/srv/app/main.py", "handle", 8),
        FrameSpec::function("/srv/app/main.py", "<module>", 1),
    ]
}
