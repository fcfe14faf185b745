use anyhow::{anyhow, bail, Context, Result};
use std::path::Path;
use std::time::Duration;
use std::{fs::File, io::Read};

use pystacks_common::python::offsets::LibcOffsets;
use pystacks_common::{OffsetTables, TargetArch, UnwindBudget};
use serde::Deserialize;

pub const DEFAULT_CONFIG_PATH: &str = "Pystacks.toml";

#[derive(Deserialize, Debug, Default, Clone, PartialEq)]
#[serde(default)]
pub struct PystacksConfig {
    pub unwinder: Unwinder,
    pub sampler: Sampler,
    pub cache: Cache,
    pub discovery: Discovery,
    /// extra glibc layouts, appended after the builtin ones
    pub glibc: Vec<LibcOffsets>,
    /// extra musl layouts, appended after the builtin ones
    pub musl: Vec<LibcOffsets>,
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct Unwinder {
    pub frames_per_invocation: usize,
    pub max_invocations: usize,
    pub arch: TargetArch,
}

impl Default for Unwinder {
    fn default() -> Self {
        let budget = UnwindBudget::default();
        Self {
            frames_per_invocation: budget.frames_per_invocation,
            max_invocations: budget.max_invocations,
            arch: TargetArch::host(),
        }
    }
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct Sampler {
    pub frequency_hz: u64,
    pub workers: usize,
}

impl Default for Sampler {
    fn default() -> Self {
        Self {
            frequency_hz: 19,
            workers: 4,
        }
    }
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct Cache {
    pub max_processes: usize,
}

impl Default for Cache {
    fn default() -> Self {
        Self {
            max_processes: 16384,
        }
    }
}

#[derive(Deserialize, Debug, Default, Clone, PartialEq)]
#[serde(default)]
pub struct Discovery {
    /// pthread key holding the thread state on python 3.7+
    pub tls_key: Option<u32>,
    /// index into the glibc/musl tables, defaults to the first builtin entry
    pub libc_offset_index: Option<u32>,
}

impl PystacksConfig {
    /// Reads `path`, or `Pystacks.toml` in the current directory. A missing default
    /// file yields the default config, a missing explicit file is an error.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::from_path(path),
            None if Path::new(DEFAULT_CONFIG_PATH).exists() => Self::from_path(Path::new(DEFAULT_CONFIG_PATH)),
            None => Ok(Self::default()),
        }
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let current_dir = std::env::current_dir().context("unable to get current dir")?;
        let mut config_file = File::open(path)
            .with_context(move || format!("{path:?} not found in {current_dir:?}"))?;
        let mut contents = String::new();
        config_file
            .read_to_string(&mut contents)
            .with_context(|| format!("something went wrong reading {path:?}"))?;
        Self::from_toml(&contents)
    }

    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: PystacksConfig = toml::from_str(contents).context("invalid config")?;
        Ok(config)
    }

    pub fn budget(&self) -> Result<UnwindBudget> {
        UnwindBudget::new(self.unwinder.frames_per_invocation, self.unwinder.max_invocations).ok_or_else(|| {
            anyhow!(
                "unwinder budget {}x{} out of range",
                self.unwinder.frames_per_invocation,
                self.unwinder.max_invocations
            )
        })
    }

    /// Time between sampling rounds.
    pub fn sampler_period(&self) -> Result<Duration> {
        let hz = self.sampler.frequency_hz;
        if hz == 0 || hz > 1_000_000 {
            bail!("sampler frequency {hz}Hz out of range, expected 1 to 1000000");
        }
        Ok(Duration::from_micros(1_000_000 / hz))
    }

    /// Builtin offset tables plus the configured libc layouts.
    pub fn offset_tables(&self) -> Result<OffsetTables> {
        let mut tables = OffsetTables::builtin();
        for offsets in &self.glibc {
            tables
                .glibc
                .push(*offsets)
                .map_err(|_| anyhow!("too many [[glibc]] entries"))?;
        }
        for offsets in &self.musl {
            tables
                .musl
                .push(*offsets)
                .map_err(|_| anyhow!("too many [[musl]] entries"))?;
        }
        Ok(tables)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pystacks_common::python::MAX_OFFSET_ENTRIES;

    #[test]
    fn empty_config_is_default() {
        let config = PystacksConfig::from_toml("").unwrap();
        assert_eq!(config, PystacksConfig::default());
        assert_eq!(config.budget().unwrap(), UnwindBudget::default());
        assert_eq!(config.sampler.frequency_hz, 19);
        assert_eq!(config.cache.max_processes, 16384);
    }

    #[test]
    fn full_config() {
        let config = PystacksConfig::from_toml(
            r#"
            [unwinder]
            frames_per_invocation = 32
            max_invocations = 4
            arch = "aarch64"

            [sampler]
            workers = 2

            [discovery]
            tls_key = 1

            [[glibc]]
            pthread_size = 1792
            pthread_block = 272
            pthread_key_data = 8
            pthread_key_data_size = 16
            "#,
        )
        .unwrap();

        assert_eq!(config.unwinder.arch, TargetArch::Aarch64);
        assert_eq!(config.budget().unwrap().frame_ceiling(), 128);
        assert_eq!(config.sampler.workers, 2);
        assert_eq!(config.sampler.frequency_hz, 19);
        assert_eq!(config.discovery.tls_key, Some(1));

        let tables = config.offset_tables().unwrap();
        assert_eq!(tables.glibc.len(), 2);
        assert_eq!(tables.glibc.get(1).map(|o| o.pthread_size), Some(1792));
    }

    #[test]
    fn rejects_bad_budget() {
        let config = PystacksConfig::from_toml("[unwinder]\nmax_invocations = 9\n").unwrap();
        assert!(config.budget().is_err());
    }

    #[test]
    fn sampler_period() {
        let config = PystacksConfig::default();
        assert_eq!(config.sampler_period().unwrap(), Duration::from_micros(52631));

        let config = PystacksConfig::from_toml("[sampler]\nfrequency_hz = 1000000\n").unwrap();
        assert_eq!(config.sampler_period().unwrap(), Duration::from_micros(1));

        for hz in [0, 2_000_000] {
            let config = PystacksConfig::from_toml(&format!("[sampler]\nfrequency_hz = {hz}\n")).unwrap();
            assert!(config.sampler_period().is_err(), "{hz}");
        }
    }

    #[test]
    fn rejects_too_many_libcs() {
        let config = PystacksConfig {
            musl: vec![LibcOffsets::default(); MAX_OFFSET_ENTRIES],
            ..Default::default()
        };
        assert!(config.offset_tables().is_err());
    }
}
