use std::fmt::Display;

use pystacks_common::Symbol;
use serde::Serialize;

#[derive(Hash, Eq, PartialEq, Debug, Clone, Serialize)]
pub struct PythonFrame {
    pub path: String,
    pub class_name: String,
    pub method_name: String,
    pub line: u32,
}

impl PythonFrame {
    pub fn new(symbol: &Symbol, line: u32) -> Self {
        Self {
            path: symbol.path().to_owned(),
            class_name: symbol.class_name().to_owned(),
            method_name: symbol.method_name().to_owned(),
            line,
        }
    }

    /// `Class.method`, or just `method` for plain functions.
    pub fn qualified_name(&self) -> String {
        if self.class_name.is_empty() {
            self.method_name.clone()
        } else {
            format!("{}.{}", self.class_name, self.method_name)
        }
    }
}

/// A resolved Python stack, innermost frame first.
#[derive(Hash, Eq, PartialEq, Debug, Clone, Default, Serialize)]
pub struct PythonStackTrace {
    pub frames: Vec<PythonFrame>,
}

impl Display for PythonStackTrace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for frame in &self.frames {
            writeln!(f, "<{}> {}:{}", frame.qualified_name(), frame.path, frame.line)?;
        }

        Ok(())
    }
}
