structstruck::strike! {
    #[strikethrough[repr(C)]]
    #[strikethrough[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]]
    #[strikethrough[cfg_attr(feature = "user", derive(serde::Serialize))]]
    pub struct PythonVersionOffsets {
        pub py_object: pub struct PyObjectOffsets {
            pub ob_type: i64,
        },
        pub py_string: pub struct PyStringOffsets {
            pub data: i64,
            pub size: i64,
        },
        pub py_type_object: pub struct PyTypeObjectOffsets {
            pub tp_name: i64,
        },
        pub py_thread_state: pub struct PyThreadStateOffsets {
            pub frame: i64,
            pub thread_id: i64,
            pub cframe: i64,
        },
        pub py_cframe: pub struct PyCFrameOffsets {
            pub current_frame: i64,
        },
        pub py_frame_object: pub struct PyFrameObjectOffsets {
            pub f_back: i64,
            pub f_code: i64,
            pub f_localsplus: i64,
        },
        pub py_interpreter_frame: pub struct PyInterpreterFrameOffsets {
            pub owner: i64,
        },
        pub py_code_object: pub struct PyCodeObjectOffsets {
            pub co_filename: i64,
            pub co_name: i64,
            pub co_varnames: i64,
            pub co_firstlineno: i64,
        },
        pub py_tuple_object: pub struct PyTupleObjectOffsets {
            pub ob_size: i64,
            pub ob_item: i64,
        },
        pub py_runtime_state: pub struct PyRuntimeStateOffsets {
            pub autotss_key: i64,
        },
    }
}

/// Byte offsets into a libc's `struct pthread` and its TLS key storage.
#[repr(C)]
#[cfg_attr(feature = "user", derive(serde::Serialize, serde::Deserialize))]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LibcOffsets {
    pub pthread_size: i64,
    pub pthread_block: i64,
    pub pthread_key_data: i64,
    pub pthread_key_data_size: i64,
}

/*
Struct offsets per Python version, for 64-bit builds.
Fields are named after the CPython struct members they locate, with a few exceptions:
1 py_string - `data` is the offset of the first character of a string object and `size`
   the offset of `ob_size` in a PyVarObject. The string representation differs between
   2.x (PyStringObject) and 3.x (PyASCIIObject), only the data offset changes.
2 py_frame_object - on 3.11+ this describes `_PyInterpreterFrame`, which replaced the
   frame object on the hot path. `f_back` is `previous`, `f_localsplus` is `localsplus`.
3 py_code_object.co_varnames - on 3.11+ this is `co_localsplusnames`.
4 py_thread_state.frame - 3.11+ reach the current frame through `cframe` instead.
5 py_runtime_state.autotss_key - offset of the `Py_tss_t` holding the thread state key,
   `gilstate.autoTSSkey` up to 3.11 and `autoTSSkey` on 3.12. Absent before 3.7, where
   the thread state is a global.
A field that does not exist in a given build is -1.
*/

const PY27_OFFSETS: PythonVersionOffsets = PythonVersionOffsets {
    py_object: PyObjectOffsets { ob_type: 8 },
    py_string: PyStringOffsets {
        data: 36, // offsetof(PyStringObject, ob_sval)
        size: 16, // offsetof(PyVarObject, ob_size)
    },
    py_type_object: PyTypeObjectOffsets { tp_name: 24 },
    py_thread_state: PyThreadStateOffsets {
        frame: 16,
        thread_id: 144,
        cframe: -1,
    },
    py_cframe: PyCFrameOffsets { current_frame: -1 },
    py_frame_object: PyFrameObjectOffsets {
        f_back: 24,
        f_code: 32,
        f_localsplus: 376,
    },
    py_interpreter_frame: PyInterpreterFrameOffsets { owner: -1 },
    py_code_object: PyCodeObjectOffsets {
        co_filename: 80,
        co_name: 88,
        co_varnames: 56,
        co_firstlineno: 96,
    },
    py_tuple_object: PyTupleObjectOffsets {
        ob_size: 16,
        ob_item: 24,
    },
    py_runtime_state: PyRuntimeStateOffsets { autotss_key: -1 },
};

const PY36_OFFSETS: PythonVersionOffsets = PythonVersionOffsets {
    py_object: PyObjectOffsets { ob_type: 8 },
    py_string: PyStringOffsets {
        data: 48, // sizeof(PyASCIIObject)
        size: 16,
    },
    py_type_object: PyTypeObjectOffsets { tp_name: 24 },
    py_thread_state: PyThreadStateOffsets {
        frame: 24,
        thread_id: 152,
        cframe: -1,
    },
    py_cframe: PyCFrameOffsets { current_frame: -1 },
    py_frame_object: PyFrameObjectOffsets {
        f_back: 24,
        f_code: 32,
        f_localsplus: 376,
    },
    py_interpreter_frame: PyInterpreterFrameOffsets { owner: -1 },
    py_code_object: PyCodeObjectOffsets {
        co_filename: 96,
        co_name: 104,
        co_varnames: 64,
        co_firstlineno: 36,
    },
    py_tuple_object: PyTupleObjectOffsets {
        ob_size: 16,
        ob_item: 24,
    },
    py_runtime_state: PyRuntimeStateOffsets { autotss_key: -1 },
};

const PY37_OFFSETS: PythonVersionOffsets = PythonVersionOffsets {
    py_thread_state: PyThreadStateOffsets {
        frame: 24,
        thread_id: 176,
        cframe: -1,
    },
    py_frame_object: PyFrameObjectOffsets {
        f_back: 24,
        f_code: 32,
        f_localsplus: 360,
    },
    py_runtime_state: PyRuntimeStateOffsets { autotss_key: 1376 },
    ..PY36_OFFSETS
};

const PY38_OFFSETS: PythonVersionOffsets = PythonVersionOffsets {
    py_code_object: PyCodeObjectOffsets {
        co_filename: 104,
        co_name: 112,
        co_varnames: 72,
        co_firstlineno: 40,
    },
    py_runtime_state: PyRuntimeStateOffsets { autotss_key: 1384 },
    ..PY37_OFFSETS
};

// 3.9 moved the gc state and most of the ceval state out of _PyRuntime
const PY39_OFFSETS: PythonVersionOffsets = PythonVersionOffsets {
    py_runtime_state: PyRuntimeStateOffsets { autotss_key: 576 },
    ..PY38_OFFSETS
};

const PY310_OFFSETS: PythonVersionOffsets = PythonVersionOffsets {
    py_frame_object: PyFrameObjectOffsets {
        f_back: 24,
        f_code: 32,
        f_localsplus: 352,
    },
    ..PY39_OFFSETS
};

const PY311_OFFSETS: PythonVersionOffsets = PythonVersionOffsets {
    py_object: PyObjectOffsets { ob_type: 8 },
    py_string: PyStringOffsets { data: 48, size: 16 },
    py_type_object: PyTypeObjectOffsets { tp_name: 24 },
    py_thread_state: PyThreadStateOffsets {
        frame: -1,
        thread_id: 152,
        cframe: 56,
    },
    py_cframe: PyCFrameOffsets { current_frame: 8 },
    py_frame_object: PyFrameObjectOffsets {
        f_back: 48,
        f_code: 32,
        f_localsplus: 72,
    },
    py_interpreter_frame: PyInterpreterFrameOffsets { owner: -1 },
    py_code_object: PyCodeObjectOffsets {
        co_filename: 112,
        co_name: 120,
        co_varnames: 96,
        co_firstlineno: 72,
    },
    py_tuple_object: PyTupleObjectOffsets {
        ob_size: 16,
        ob_item: 24,
    },
    py_runtime_state: PyRuntimeStateOffsets { autotss_key: 584 },
};

const PY312_OFFSETS: PythonVersionOffsets = PythonVersionOffsets {
    py_object: PyObjectOffsets { ob_type: 8 },
    py_string: PyStringOffsets { data: 40, size: 16 },
    py_type_object: PyTypeObjectOffsets { tp_name: 24 },
    py_thread_state: PyThreadStateOffsets {
        frame: -1,
        thread_id: 136,
        cframe: 56,
    },
    py_cframe: PyCFrameOffsets { current_frame: 0 },
    py_frame_object: PyFrameObjectOffsets {
        f_back: 8,
        f_code: 0,
        f_localsplus: 72,
    },
    py_interpreter_frame: PyInterpreterFrameOffsets { owner: 70 },
    py_code_object: PyCodeObjectOffsets {
        co_filename: 112,
        co_name: 120,
        co_varnames: 96,
        co_firstlineno: 68,
    },
    py_tuple_object: PyTupleObjectOffsets {
        ob_size: 16,
        ob_item: 24,
    },
    py_runtime_state: PyRuntimeStateOffsets { autotss_key: 1552 },
};

/// Builtin interpreter layouts, in catalog index order.
pub const PYTHON_CATALOG: [(&str, PythonVersionOffsets); 8] = [
    ("2.7", PY27_OFFSETS),
    ("3.6", PY36_OFFSETS),
    ("3.7", PY37_OFFSETS),
    ("3.8", PY38_OFFSETS),
    ("3.9", PY39_OFFSETS),
    ("3.10", PY310_OFFSETS),
    ("3.11", PY311_OFFSETS),
    ("3.12", PY312_OFFSETS),
];

/// glibc 2.x on x86_64: `sizeof(struct pthread)`, `offsetof(struct pthread, specific_1stblock)`,
/// `offsetof(struct pthread_key_data, data)` and `sizeof(struct pthread_key_data)`.
const GLIBC_X86_64: LibcOffsets = LibcOffsets {
    pthread_size: 2304,
    pthread_block: 0x310,
    pthread_key_data: 8,
    pthread_key_data_size: 16,
};

/// musl on x86_64, where the thread pointer is `struct pthread` itself and `tsd`
/// points at an array of `void *`. Best known values, override from config when
/// targets differ.
const MUSL_X86_64: LibcOffsets = LibcOffsets {
    pthread_size: 0,
    pthread_block: 128,
    pthread_key_data: 0,
    pthread_key_data_size: 8,
};

pub const GLIBC_CATALOG: [(&str, LibcOffsets); 1] = [("glibc-x86_64", GLIBC_X86_64)];

pub const MUSL_CATALOG: [(&str, LibcOffsets); 1] = [("musl-x86_64", MUSL_X86_64)];
