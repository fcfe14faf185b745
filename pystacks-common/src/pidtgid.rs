use core::hash::{Hash, Hasher};

/// Process id in the high half, thread id in the low half.
#[cfg_attr(feature = "user", derive(serde::Serialize, serde::Deserialize))]
#[derive(Clone, Copy, Default, Eq)]
pub struct PidTgid(u64);

impl PartialEq for PidTgid {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}

impl Hash for PidTgid {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.hash(state);
    }
}

impl PidTgid {
    pub const fn new(pid: u32, tid: u32) -> Self {
        Self((pid as u64) << 32 | tid as u64)
    }

    #[inline(always)]
    pub const fn pid(&self) -> u32 {
        (self.0 >> 32) as _
    }

    #[inline(always)]
    pub const fn tid(&self) -> u32 {
        (self.0 & 0xffffffff) as _
    }

    pub const fn raw(&self) -> u64 {
        self.0
    }
}

impl core::fmt::Debug for PidTgid {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_tuple("PidTgid")
            .field(&self.pid())
            .field(&self.tid())
            .finish()
    }
}

impl core::fmt::Display for PidTgid {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}:{}", self.pid(), self.tid())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_halves() {
        let p = PidTgid::new(1234, 1240);
        assert_eq!(p.pid(), 1234);
        assert_eq!(p.tid(), 1240);
        assert_eq!(p.to_string(), "1234:1240");
        assert_ne!(p, PidTgid::new(1234, 1234));
    }
}
