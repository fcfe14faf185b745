use std::fs::File;
use std::path::{Path, PathBuf};

use object::{Object, ObjectKind, ObjectSymbol};
use pystacks_common::python::offsets::PYTHON_CATALOG;
use pystacks_common::{Addr, InterpreterInfo, LibcImplementation, PythonVersion, ReadMemory};

use crate::config::PystacksConfig;
use crate::error::DiscoveryError;
use crate::proc_mem::ProcMemMap;
use crate::process_memory::ProcessMemory;

use self::runtime_type::{libc_from_file_name, RuntimeType};

pub mod processes;
pub mod runtime_type;

/// Global holding the running thread state on 2.7 and 3.6.
pub const THREAD_STATE_CURRENT: &str = "_PyThreadState_Current";
/// Runtime singleton, present from 3.7 on.
pub const PY_RUNTIME: &str = "_PyRuntime";
/// `PTHREAD_KEYS_MAX` on glibc and musl.
const PTHREAD_KEYS_MAX: u32 = 1024;

/// What discovery learned about one process.
#[derive(Clone)]
pub struct ProcInfo {
    pub pid: u32,
    /// the runtime type of the process, with the patch version filled in
    pub rt: RuntimeType,
    /// the binary or libpython carrying the interpreter
    pub python_path: String,
    pub libc_implementation: LibcImplementation,
    /// facts handed to the unwinder
    pub info: InterpreterInfo,
}

impl std::fmt::Debug for ProcInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcInfo")
            .field("pid", &self.pid)
            .field("rt", &self.rt)
            .field("python_path", &self.python_path)
            .field("info", &self.info)
            .finish()
    }
}

impl ProcInfo {
    pub fn detect(pid: u32, config: &PystacksConfig) -> Result<Self, DiscoveryError> {
        let maps = ProcMemMap::from_process_id(pid)?;
        let (python_path, rt) = find_python(&maps).ok_or(DiscoveryError::NotPython { pid })?;
        let RuntimeType::Python { is_lib, version } = rt else {
            return Err(DiscoveryError::NotPython { pid });
        };

        let object_path = resolve_in_root(pid, &python_path);
        let data = map_object(&object_path)?;

        let version = PythonVersion {
            patch: scan_patch_version(&data, version).unwrap_or(0),
            ..version
        };
        let py_version_index = version
            .catalog_index()
            .ok_or_else(|| DiscoveryError::UnsupportedVersion {
                version: version.to_string(),
            })?;

        let libc_implementation = detect_libc(&maps);

        let file = object::File::parse(&*data).map_err(|source| DiscoveryError::ParseObject {
            path: object_path.clone(),
            source,
        })?;
        let load_address = maps.load_address(&python_path).unwrap_or(0);

        let mut info = InterpreterInfo {
            pid,
            py_version_index,
            libc_implementation,
            libc_offset_index: config.discovery.libc_offset_index.unwrap_or(0),
            ..Default::default()
        };

        if version.has_thread_state_global() {
            let addr = symbol_address(&file, THREAD_STATE_CURRENT, load_address).ok_or_else(|| {
                DiscoveryError::SymbolNotFound {
                    symbol: THREAD_STATE_CURRENT,
                    path: object_path.clone(),
                }
            })?;
            info.thread_state_addr = Addr(addr);
        } else {
            let runtime = symbol_address(&file, PY_RUNTIME, load_address).ok_or_else(|| {
                DiscoveryError::SymbolNotFound {
                    symbol: PY_RUNTIME,
                    path: object_path.clone(),
                }
            })?;
            info.use_tls = true;
            info.tls_key = match config.discovery.tls_key {
                Some(key) => {
                    tracing::debug!("pid {pid}: tls key {key} from config");
                    key
                }
                None => {
                    let offset = PYTHON_CATALOG[py_version_index as usize].1.py_runtime_state.autotss_key;
                    read_tss_key(&ProcessMemory::new(pid), Addr(runtime), offset).ok_or(
                        DiscoveryError::TlsKey {
                            pid,
                            runtime,
                            offset,
                        },
                    )?
                }
            };
        }

        tracing::debug!("pid {pid}: python {version} in {python_path}, {libc_implementation:?}");

        Ok(Self {
            pid,
            rt: RuntimeType::Python { is_lib, version },
            python_path,
            libc_implementation,
            info,
        })
    }
}

/// The thread state key of the interpreter, read from the `Py_tss_t` at `offset`
/// in `_PyRuntime`. A key that was never created, or is out of range, means the
/// layout does not match this build.
pub fn read_tss_key<M: ReadMemory>(mem: &M, runtime: Addr, offset: i64) -> Option<u32> {
    let tss = runtime.field(offset)?;
    let initialized = mem.read_u32(tss).ok()?;
    let key = mem.read_u32(tss.offset(4)?).ok()?;
    (initialized == 1 && key < PTHREAD_KEYS_MAX).then_some(key)
}

fn detect_libc(maps: &ProcMemMap) -> LibcImplementation {
    maps.find_by_file_name(|name| libc_from_file_name(name) != LibcImplementation::Unknown)
        .and_then(|e| e.file_name())
        .map(libc_from_file_name)
        .unwrap_or_default()
}

/// Picks the mapping carrying the interpreter. A mapped libpython wins over the
/// executable since the symbols live there.
fn find_python(maps: &ProcMemMap) -> Option<(String, RuntimeType)> {
    let mut found: Option<(String, RuntimeType)> = None;
    for entry in &maps.entries {
        if entry.file_name().is_none() {
            continue;
        }
        let (rt, is_lib) = match RuntimeType::from(Path::new(&entry.object_path)) {
            Ok(rt @ RuntimeType::Python { is_lib, .. }) => (rt, is_lib),
            _ => continue,
        };
        let replace = match &found {
            None => true,
            Some((_, RuntimeType::Python { is_lib: false, .. })) => is_lib,
            Some(_) => false,
        };
        if replace {
            found = Some((entry.object_path.clone(), rt));
        }
    }
    found
}

/// Paths in maps are relative to the target's mount namespace.
fn resolve_in_root(pid: u32, path: &str) -> PathBuf {
    let rooted = PathBuf::from(format!("/proc/{pid}/root{path}"));
    if rooted.exists() {
        rooted
    } else {
        PathBuf::from(path)
    }
}

fn map_object(path: &Path) -> Result<memmap2::Mmap, DiscoveryError> {
    let read_err = |source| DiscoveryError::ReadObject {
        path: path.to_owned(),
        source,
    };
    let file = File::open(path).map_err(read_err)?;
    unsafe { memmap2::MmapOptions::new().map(&file) }.map_err(read_err)
}

/// Runtime address of `name`. Symbols of non-PIE executables are absolute,
/// everything else is relative to where the object is loaded.
pub fn symbol_address<'data>(file: &object::File<'data>, name: &str, load_address: u64) -> Option<u64> {
    let sym = file
        .symbols()
        .chain(file.dynamic_symbols())
        .find(|s| s.name().map_or(false, |n| n == name) && s.address() != 0)?;
    match file.kind() {
        ObjectKind::Executable => Some(sym.address()),
        _ => Some(load_address + sym.address()),
    }
}

/// Finds the full version string, e.g. `3.11.4 (main, ...`, in the interpreter
/// image and returns its patch number.
pub fn scan_patch_version(data: &[u8], version: PythonVersion) -> Option<u8> {
    let needle = format!("{}.{}.", version.major, version.minor);
    let needle = needle.as_bytes();
    let mut start = 0;
    while let Some(pos) = find(&data[start..], needle) {
        let at = start + pos;
        start = at + 1;

        let preceded_ok = at == 0 || !(data[at - 1].is_ascii_digit() || data[at - 1] == b'.');
        if !preceded_ok {
            continue;
        }
        let digits = &data[at + needle.len()..];
        let len = digits.iter().take_while(|b| b.is_ascii_digit()).count();
        if len == 0 || len > 3 {
            continue;
        }
        match digits.get(len) {
            Some(b' ' | b'+' | b'a' | b'b' | b'r' | b'c' | 0) => {}
            _ => continue,
        }
        if let Some(patch) = std::str::from_utf8(&digits[..len]).ok().and_then(|s| s.parse().ok()) {
            return Some(patch);
        }
    }
    None
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}
