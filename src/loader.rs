//! Parses a textual program source into a byte image ready to be loaded
//! into memory.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use pest::Parser as PestParser;
use thiserror::Error;
use tracing::debug;

use crate::memory::MEM_SIZE;

#[derive(pest_derive::Parser)]
#[grammar = "program.pest"]
struct ProgramParser;

/// A fatal load error. Nothing is written to memory if loading fails.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("cannot read program {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("invalid program source: {0}")]
    Syntax(#[from] Box<pest::error::Error<Rule>>),
    #[error("line {line}: `{text}` does not fit in a byte")]
    ValueTooLarge { line: usize, text: String },
    #[error("program is {len} bytes, but memory holds only 256")]
    TooLong { len: usize },
}

/// Parses a program source into its byte image, one byte per non-empty,
/// non-comment line, in file order.
pub fn load_str(source: &str) -> Result<Vec<u8>, LoadError> {
    let pairs =
        ProgramParser::parse(Rule::program, source).map_err(|e| LoadError::Syntax(Box::new(e)))?;

    let mut image = Vec::new();
    for pair in pairs.flatten() {
        if pair.as_rule() != Rule::byte {
            continue;
        }
        let text = pair.as_str();
        let value = u8::from_str_radix(text, 2).map_err(|_| LoadError::ValueTooLarge {
            line: pair.line_col().0,
            text: text.to_owned(),
        })?;
        image.push(value);
    }

    if image.len() > MEM_SIZE {
        return Err(LoadError::TooLong { len: image.len() });
    }
    debug!(bytes = image.len(), "program parsed");
    Ok(image)
}

/// Reads and parses a program source file.
pub fn load_file(path: impl AsRef<Path>) -> Result<Vec<u8>, LoadError> {
    let path = path.as_ref();
    let source = fs::read_to_string(path).map_err(|source| LoadError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    load_str(&source)
}
