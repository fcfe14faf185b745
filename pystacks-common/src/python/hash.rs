use core::hash::Hasher;

use fnv::FnvHasher;

use super::state::{StackRecord, Symbol};

fn c_bytes(buf: &[u8]) -> &[u8] {
    let len = buf.iter().position(|b| *b == 0).unwrap_or(buf.len());
    &buf[..len]
}

/// Stable 32-bit id of a symbol, FNV-1a over its NUL separated fields folded in half.
/// Only the bytes before each field's terminator contribute.
pub fn symbol_id(symbol: &Symbol) -> u32 {
    let mut hasher = FnvHasher::default();
    hasher.write(c_bytes(&symbol.path));
    hasher.write(&[0]);
    hasher.write(c_bytes(&symbol.class_name));
    hasher.write(&[0]);
    hasher.write(c_bytes(&symbol.method_name));
    let h = hasher.finish();
    (h ^ (h >> 32)) as u32
}

/// Content hash of a stack: its length followed by its entries.
pub fn stack_hash(stack: &StackRecord) -> u64 {
    let mut hasher = FnvHasher::default();
    let entries = stack.as_slice();
    hasher.write(&(entries.len() as u64).to_le_bytes());
    for entry in entries {
        hasher.write(&entry.to_le_bytes());
    }
    hasher.finish()
}
