//! Error taxonomy for the shell engine.
//!
//! Three families, per the execution model:
//!
//! - `LexError` / `ParseError`: fatal to the whole parse. Nothing executes.
//! - `ControlFlow`: signals raised while walking the tree (`exit`, `return`,
//!   `break`, `continue`, errexit, execution limits). They carry the output
//!   accumulated before the signal so nothing already produced is lost.
//! - Ordinary command failures are *data* (a non-zero exit code in a
//!   `CmdResult`), never errors.

use thiserror::Error;

use crate::lexer::Token;

/// Error produced by the lexer on malformed input (unterminated quotes,
/// oversized input).
#[derive(Debug, Clone, Error)]
#[error("line {line}: {message}")]
pub struct LexError {
    pub message: String,
    pub line: usize,
    pub column: usize,
}

impl LexError {
    pub fn new(message: impl Into<String>, line: usize, column: usize) -> Self {
        Self {
            message: message.into(),
            line,
            column,
        }
    }
}

/// Fatal parse failure. Carries the source position and, when available,
/// the offending token.
#[derive(Debug, Clone, Error)]
#[error("parse error at {line}:{column}: {message}")]
pub struct ParseError {
    pub message: String,
    pub line: usize,
    pub column: usize,
    pub token: Option<Token>,
}

impl ParseError {
    pub fn new(message: impl Into<String>, line: usize, column: usize) -> Self {
        Self {
            message: message.into(),
            line,
            column,
            token: None,
        }
    }

    pub fn at_token(message: impl Into<String>, token: &Token) -> Self {
        Self {
            message: message.into(),
            line: token.line,
            column: token.column,
            token: Some(token.clone()),
        }
    }
}

impl From<LexError> for ParseError {
    fn from(e: LexError) -> Self {
        ParseError::new(e.message, e.line, e.column)
    }
}

/// Which execution ceiling was exceeded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimitKind {
    Commands,
    LoopIterations,
    RecursionDepth,
}

impl std::fmt::Display for LimitKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Commands => write!(f, "command count"),
            Self::LoopIterations => write!(f, "loop iterations"),
            Self::RecursionDepth => write!(f, "recursion depth"),
        }
    }
}

/// Raised when an execution ceiling is exceeded. Always fatal to the
/// current `exec()`; mapped to a fixed exit code and never swallowed.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct ExecutionLimitError {
    pub kind: LimitKind,
    pub message: String,
    pub stdout: String,
    pub stderr: String,
}

impl ExecutionLimitError {
    pub fn new(kind: LimitKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            stdout: String::new(),
            stderr: String::new(),
        }
    }
}

/// Control-flow signals propagated through the executor as errors.
///
/// Each variant carries the stdout/stderr produced before the signal was
/// raised; callers prepend their own accumulated output while unwinding so
/// the final result interleaves exactly at the point of the event.
#[derive(Debug, Clone, Error)]
pub enum ControlFlow {
    #[error("exit {code}")]
    Exit {
        code: i32,
        stdout: String,
        stderr: String,
    },

    #[error("return {code}")]
    Return {
        code: i32,
        stdout: String,
        stderr: String,
    },

    #[error("break {levels}")]
    Break {
        levels: u32,
        stdout: String,
        stderr: String,
    },

    #[error("continue {levels}")]
    Continue {
        levels: u32,
        stdout: String,
        stderr: String,
    },

    /// `set -e` fired: the statement's status escalates to script
    /// termination.
    #[error("errexit {code}")]
    Errexit {
        code: i32,
        stdout: String,
        stderr: String,
    },

    /// An execution ceiling was exceeded.
    #[error(transparent)]
    Limit(ExecutionLimitError),

    /// `set -u` fired on an unset variable.
    #[error("{name}: unbound variable")]
    Unbound {
        name: String,
        stdout: String,
        stderr: String,
    },
}

impl ControlFlow {
    pub fn exit(code: i32) -> Self {
        Self::Exit {
            code,
            stdout: String::new(),
            stderr: String::new(),
        }
    }

    pub fn limit(kind: LimitKind, message: impl Into<String>) -> Self {
        Self::Limit(ExecutionLimitError::new(kind, message))
    }

    /// Prepend output produced before this signal was raised.
    pub fn prepend_output(&mut self, out: &str, err: &str) {
        let (stdout, stderr) = match self {
            Self::Exit { stdout, stderr, .. }
            | Self::Return { stdout, stderr, .. }
            | Self::Break { stdout, stderr, .. }
            | Self::Continue { stdout, stderr, .. }
            | Self::Errexit { stdout, stderr, .. }
            | Self::Unbound { stdout, stderr, .. } => (stdout, stderr),
            Self::Limit(e) => (&mut e.stdout, &mut e.stderr),
        };
        if !out.is_empty() {
            stdout.insert_str(0, out);
        }
        if !err.is_empty() {
            stderr.insert_str(0, err);
        }
    }

    /// Accumulated stdout/stderr carried by this signal.
    pub fn output(&self) -> (&str, &str) {
        match self {
            Self::Exit { stdout, stderr, .. }
            | Self::Return { stdout, stderr, .. }
            | Self::Break { stdout, stderr, .. }
            | Self::Continue { stdout, stderr, .. }
            | Self::Errexit { stdout, stderr, .. }
            | Self::Unbound { stdout, stderr, .. } => (stdout, stderr),
            Self::Limit(e) => (&e.stdout, &e.stderr),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prepend_output_preserves_order() {
        let mut cf = ControlFlow::Exit {
            code: 3,
            stdout: "late\n".to_string(),
            stderr: String::new(),
        };
        cf.prepend_output("early\n", "warn\n");
        let (out, err) = cf.output();
        assert_eq!(out, "early\nlate\n");
        assert_eq!(err, "warn\n");
    }

    #[test]
    fn parse_error_from_lex_error() {
        let le = LexError::new("unexpected EOF while looking for matching `''", 3, 7);
        let pe: ParseError = le.into();
        assert_eq!(pe.line, 3);
        assert_eq!(pe.column, 7);
    }
}
