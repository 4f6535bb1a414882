use thiserror::Error;

/// The terminal failure of a parse. Individual bad lines never end up here.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("no valid metrics found in input")]
    EmptyInput,
}

/// A single input line that could not be decoded into a sample.
/// These are recovered from: the line is skipped and decoding carries on.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("failed to parse line {line}: {reason}")]
pub struct MalformedLine {
    /// 1-based line number in the input
    pub line: usize,
    pub reason: String,
}
