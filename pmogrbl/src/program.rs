//! G-code program as streamed to the controller.
//!
//! A program is an immutable, ordered list of command lines. Lines are
//! trimmed and blank lines dropped at load time; comments are kept as-is.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use tracing::debug;

use crate::errors::{GrblError, Result};

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Program {
    lines: Arc<[String]>,
}

impl Program {
    pub fn from_lines<I, S>(lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let lines: Vec<String> = lines
            .into_iter()
            .map(|line| line.as_ref().trim().to_string())
            .filter(|line| !line.is_empty())
            .collect();
        Self {
            lines: lines.into(),
        }
    }

    pub fn from_source(source: &str) -> Self {
        Self::from_lines(source.lines())
    }

    /// Reads a program file. On failure nothing is loaded anywhere.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let source = fs::read_to_string(path).map_err(|source| GrblError::Load {
            path: path.to_path_buf(),
            source,
        })?;
        let program = Self::from_source(&source);
        debug!(path = %path.display(), lines = program.len(), "Program file read");
        Ok(program)
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn line(&self, index: usize) -> Option<&str> {
        self.lines.get(index).map(String::as_str)
    }

    pub fn lines(&self) -> impl Iterator<Item = &str> {
        self.lines.iter().map(String::as_str)
    }
}
