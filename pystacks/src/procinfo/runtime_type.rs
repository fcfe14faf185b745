use std::path::Path;

use anyhow::{Context, Result};
use pystacks_common::{LibcImplementation, PythonVersion};

#[derive(Debug, Default, Eq, PartialEq, Clone, Copy)]
pub enum RuntimeType {
    #[default]
    Unknown,
    Python {
        is_lib: bool,
        /// major and minor from the file name, patch is filled in by discovery
        version: PythonVersion,
    },
}

impl RuntimeType {
    /// Recognizes `python3.11`, `python2.7` and `libpython3.11.so.1.0` style names.
    pub fn from(path: &Path) -> Result<Self> {
        let base_name = path
            .file_name()
            .context("Unable to get entry file name")?
            .to_str()
            .context("unable to convert OsStr to str")?;

        let (is_lib, rest) = if let Some(rest) = base_name.strip_prefix("libpython") {
            (true, rest)
        } else if let Some(rest) = base_name.strip_prefix("python") {
            (false, rest)
        } else {
            return Ok(Self::Unknown);
        };

        // strip `.so...` for libraries and abi flags such as `3.8d`
        let rest = rest.split(".so").next().unwrap_or(rest);
        let mut parts = rest.splitn(2, '.');
        let major = parts.next().and_then(leading_number);
        let minor = parts.next().and_then(leading_number);
        match (major, minor) {
            (Some(major), Some(minor)) => Ok(Self::Python {
                is_lib,
                version: PythonVersion::new(major, minor, 0),
            }),
            _ => Ok(Self::Unknown),
        }
    }

    pub fn is_unknown(&self) -> bool {
        &Self::Unknown == self
    }

    pub fn is_python(&self) -> bool {
        matches!(self, Self::Python { .. })
    }
}

fn leading_number(s: &str) -> Option<u8> {
    let end = s.find(|c: char| !c.is_ascii_digit()).unwrap_or(s.len());
    s[..end].parse().ok()
}

/// Which pthreads implementation a mapped file name belongs to.
pub fn libc_from_file_name(name: &str) -> LibcImplementation {
    if name.starts_with("ld-musl") || name.starts_with("libc.musl") {
        LibcImplementation::Musl
    } else if name == "libc.so.6" || name.starts_with("libc-2.") {
        LibcImplementation::Glibc
    } else {
        LibcImplementation::Unknown
    }
}
