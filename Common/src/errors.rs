use thiserror::Error;

use crate::location::CodeLoc;

/// Raised by the tokenizer when no prefix of the remaining source forms a
/// valid token.
#[derive(Debug, Clone, Error)]
#[error("{filename}:{loc}: syntax error: {msg}")]
pub struct SyntaxError {
    pub filename: String,
    pub loc: CodeLoc,
    pub msg: String,
}

impl SyntaxError {
    pub fn new(filename: &str, loc: CodeLoc, msg: impl Into<String>) -> SyntaxError {
        SyntaxError { filename: filename.to_string(), loc, msg: msg.into() }
    }
}

/// Raised while parsing or assembling an expression.
#[derive(Debug, Clone, Error)]
#[error("{filename}:{loc}: compilation error: {msg}")]
pub struct CompilationError {
    pub filename: String,
    pub loc: CodeLoc,
    pub msg: String,
}

impl CompilationError {
    pub fn new(filename: &str, loc: CodeLoc, msg: impl Into<String>) -> CompilationError {
        CompilationError { filename: filename.to_string(), loc, msg: msg.into() }
    }
}
