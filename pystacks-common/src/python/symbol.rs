use crate::mem::{Addr, ReadMemory};

use super::offsets::PythonVersionOffsets;
use super::state::Symbol;

const SELF: [u8; 4] = *b"self";
const CLS: [u8; 4] = *b"cls\0";

/// First four bytes of the name of the code object's first local, if any.
/// GDB: ((PyTupleObject*)$code->co_varnames)->ob_item[0]
fn first_arg_name<M: ReadMemory>(mem: &M, offsets: &PythonVersionOffsets, code: Addr) -> Option<[u8; 4]> {
    let varnames = mem.read_addr_at(code, offsets.py_code_object.co_varnames).ok()?;
    if varnames.is_null() {
        return None;
    }
    let size = mem.read_i64(varnames.field(offsets.py_tuple_object.ob_size)?).ok()?;
    if size <= 0 {
        return None;
    }
    let first = mem.read_addr_at(varnames, offsets.py_tuple_object.ob_item).ok()?;
    let mut name = [0u8; 4];
    mem.read_bytes(first.field(offsets.py_string.data)?, &mut name).ok()?;
    Some(name)
}

/// GDB: $frame->f_localsplus[0]->ob_type->tp_name, skipping `ob_type` when the
/// first local is already a type.
fn class_name_ptr<M: ReadMemory>(
    mem: &M,
    offsets: &PythonVersionOffsets,
    frame: Addr,
    is_instance: bool,
) -> Option<Addr> {
    let mut ptr = mem.read_addr_at(frame, offsets.py_frame_object.f_localsplus).ok()?;
    if is_instance {
        ptr = mem.read_addr_at(ptr, offsets.py_object.ob_type).ok()?;
    }
    mem.read_addr_at(ptr, offsets.py_type_object.tp_name).ok()
}

fn read_py_string<M: ReadMemory>(
    mem: &M,
    offsets: &PythonVersionOffsets,
    obj: Addr,
    field: i64,
    buf: &mut [u8],
) {
    let Ok(string) = mem.read_addr_at(obj, field) else {
        return;
    };
    if let Some(data) = string.field(offsets.py_string.data) {
        let _ = mem.read_cstr(data, buf);
    }
}

/// Fills `symbol` with whatever can be read about the frame and returns the
/// code object's first line number.
///
/// Best effort: any field that can't be read is left empty, or zero for the line.
/// Methods get a class name when their first argument is `self` (the instance's
/// type name) or `cls` (the type's own name).
pub fn read_symbol<M: ReadMemory>(
    mem: &M,
    offsets: &PythonVersionOffsets,
    frame: Addr,
    code: Addr,
    symbol: &mut Symbol,
) -> u32 {
    symbol.reset();

    let first_arg = first_arg_name(mem, offsets, code);
    let is_self = first_arg == Some(SELF);
    if is_self || first_arg == Some(CLS) {
        if let Some(name) = class_name_ptr(mem, offsets, frame, is_self) {
            let _ = mem.read_cstr(name, &mut symbol.class_name);
        }
    }

    // GDB: $frame->f_code->co_filename
    read_py_string(mem, offsets, code, offsets.py_code_object.co_filename, &mut symbol.path);
    // GDB: $frame->f_code->co_name
    read_py_string(mem, offsets, code, offsets.py_code_object.co_name, &mut symbol.method_name);

    // GDB: $frame->f_code->co_firstlineno
    mem.read_u32_at(code, offsets.py_code_object.co_firstlineno)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mem::snapshot::SnapshotMemory;
    use crate::python::offsets::PYTHON_CATALOG;

    const FRAME: Addr = Addr(0x1000);
    const CODE: Addr = Addr(0x2000);
    const VARNAMES: Addr = Addr(0x3000);
    const ARG0: Addr = Addr(0x3800);
    const INSTANCE: Addr = Addr(0x4000);
    const TYPE: Addr = Addr(0x4800);
    const TYPE_NAME: Addr = Addr(0x5000);
    const FILENAME: Addr = Addr(0x6000);
    const NAME: Addr = Addr(0x6800);

    fn py38() -> PythonVersionOffsets {
        PYTHON_CATALOG[3].1
    }

    fn write_str(mem: &mut SnapshotMemory, o: &PythonVersionOffsets, obj: Addr, s: &str) {
        mem.alloc(obj, 64);
        mem.write_cstr(Addr(obj.0 + o.py_string.data as u64), s);
    }

    /// A code object for `render(<first_arg>, ...)` in `/srv/widgets.py`.
    fn image(first_arg: &str, nargs: u64) -> SnapshotMemory {
        let o = py38();
        let mut mem = SnapshotMemory::new();
        mem.alloc(FRAME, 0x200);
        mem.alloc(CODE, 0x100);
        mem.write_addr(Addr(CODE.0 + o.py_code_object.co_filename as u64), FILENAME);
        mem.write_addr(Addr(CODE.0 + o.py_code_object.co_name as u64), NAME);
        mem.write_addr(Addr(CODE.0 + o.py_code_object.co_varnames as u64), VARNAMES);
        mem.write_u32(Addr(CODE.0 + o.py_code_object.co_firstlineno as u64), 17);
        write_str(&mut mem, &o, FILENAME, "/srv/widgets.py");
        write_str(&mut mem, &o, NAME, "render");

        mem.alloc(VARNAMES, 0x40);
        mem.write_u64(Addr(VARNAMES.0 + o.py_tuple_object.ob_size as u64), nargs);
        mem.write_addr(Addr(VARNAMES.0 + o.py_tuple_object.ob_item as u64), ARG0);
        write_str(&mut mem, &o, ARG0, first_arg);

        // f_localsplus[0] is an instance of Widget
        mem.write_addr(Addr(FRAME.0 + o.py_frame_object.f_localsplus as u64), INSTANCE);
        mem.alloc(INSTANCE, 0x20);
        mem.write_addr(Addr(INSTANCE.0 + o.py_object.ob_type as u64), TYPE);
        mem.alloc(TYPE, 0x40);
        mem.write_addr(Addr(TYPE.0 + o.py_type_object.tp_name as u64), TYPE_NAME);
        mem.write_cstr(TYPE_NAME, "Widget");
        mem
    }

    #[test]
    fn self_resolves_instance_type() {
        let mem = image("self", 2);
        let mut sym = Symbol::default();
        let line = read_symbol(&mem, &py38(), FRAME, CODE, &mut sym);
        assert_eq!(line, 17);
        assert_eq!(sym.path(), "/srv/widgets.py");
        assert_eq!(sym.method_name(), "render");
        assert_eq!(sym.class_name(), "Widget");
    }

    #[test]
    fn cls_reads_type_directly() {
        let o = py38();
        let mut mem = image("cls", 1);
        // f_localsplus[0] is the type itself
        mem.write_addr(Addr(FRAME.0 + o.py_frame_object.f_localsplus as u64), TYPE);
        let mut sym = Symbol::default();
        read_symbol(&mem, &o, FRAME, CODE, &mut sym);
        assert_eq!(sym.class_name(), "Widget");
    }

    #[test]
    fn other_first_arg_has_no_class() {
        let mem = image("request", 1);
        let mut sym = Symbol::default();
        read_symbol(&mem, &py38(), FRAME, CODE, &mut sym);
        assert_eq!(sym.class_name(), "");
        assert_eq!(sym.method_name(), "render");
    }

    #[test]
    fn clsx_is_not_cls() {
        let mem = image("clsx", 1);
        let mut sym = Symbol::default();
        read_symbol(&mem, &py38(), FRAME, CODE, &mut sym);
        assert_eq!(sym.class_name(), "");
    }

    #[test]
    fn empty_varnames_skip_class() {
        let mem = image("self", 0);
        let mut sym = Symbol::default();
        read_symbol(&mem, &py38(), FRAME, CODE, &mut sym);
        assert_eq!(sym.class_name(), "");
    }

    #[test]
    fn unreadable_name_leaves_method_empty() {
        let o = py38();
        let mut mem = image("self", 1);
        mem.write_addr(Addr(CODE.0 + o.py_code_object.co_name as u64), Addr(0xdead_0000));
        let mut sym = Symbol::new("stale", "stale", "stale");
        read_symbol(&mem, &o, FRAME, CODE, &mut sym);
        assert_eq!(sym.method_name(), "");
        assert_eq!(sym.class_name(), "Widget");
        assert_eq!(sym.path(), "/srv/widgets.py");
    }

    #[test]
    fn unreadable_code_object() {
        let mem = SnapshotMemory::new();
        let mut sym = Symbol::default();
        assert_eq!(read_symbol(&mem, &py38(), FRAME, CODE, &mut sym), 0);
        assert_eq!(sym, Symbol::default());
    }
}
