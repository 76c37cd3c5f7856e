use std::fmt::{self, Display};

use strum::{Display as StrumDisplay, IntoStaticStr};

use crate::value::Value;

/// Result type alias for operations that can produce a Falcon error.
pub type RunResult<T> = Result<T, FalconError>;

/// 1-based source position attached to errors where available.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CodeLoc {
    pub line: u32,
    pub col: u32,
}

impl CodeLoc {
    #[must_use]
    pub fn new(line: u32, col: u32) -> Self {
        Self { line, col }
    }
}

impl Display for CodeLoc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.col)
    }
}

/// Error taxonomy of the Falcon core.
///
/// Each kind corresponds to the pipeline stage that produced it. `Thrown`
/// carries a user value raised with `throw`; `Internal` marks VM invariant
/// violations (compiler bugs) and maps to exit code 4; `Exit` carries the
/// code requested by the `exit()` builtin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, StrumDisplay, IntoStaticStr)]
pub enum ErrorKind {
    #[strum(serialize = "lex")]
    Lexical,
    #[strum(serialize = "parse")]
    Parse,
    #[strum(serialize = "compile")]
    Compile,
    #[strum(serialize = "type")]
    Type,
    #[strum(serialize = "runtime")]
    Runtime,
    #[strum(serialize = "throw")]
    Thrown,
    #[strum(serialize = "internal")]
    Internal,
    #[strum(serialize = "exit")]
    Exit,
}

/// Error raised anywhere in the Falcon pipeline.
///
/// Carries the taxonomy kind, a human-readable message, the source position
/// when the producer had one, and for `Thrown` the raised value so that
/// `try/catch` can bind it.
#[derive(Debug, Clone)]
pub struct FalconError {
    kind: ErrorKind,
    message: String,
    loc: Option<CodeLoc>,
    thrown: Option<Value>,
    exit_code: i32,
}

impl FalconError {
    #[must_use]
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            loc: None,
            thrown: None,
            exit_code: 0,
        }
    }

    /// Attaches a source position, keeping an existing one if already set.
    #[must_use]
    pub fn at(mut self, loc: CodeLoc) -> Self {
        if self.loc.is_none() {
            self.loc = Some(loc);
        }
        self
    }

    #[must_use]
    pub fn lexical(message: impl Into<String>, loc: CodeLoc) -> Self {
        Self::new(ErrorKind::Lexical, message).at(loc)
    }

    #[must_use]
    pub fn parse(message: impl Into<String>, loc: CodeLoc) -> Self {
        Self::new(ErrorKind::Parse, message).at(loc)
    }

    #[must_use]
    pub fn compile(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Compile, message)
    }

    #[must_use]
    pub fn type_error(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Type, message)
    }

    #[must_use]
    pub fn runtime(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Runtime, message)
    }

    /// Internal invariant violation: stack underflow, bad jump target and
    /// friends. Signals a compiler bug rather than a user error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }

    /// A value raised by the `throw` statement, catchable via `try/catch`.
    #[must_use]
    pub fn thrown(value: Value) -> Self {
        Self {
            kind: ErrorKind::Thrown,
            message: format!("uncaught throw: {}", value.to_display_string()),
            loc: None,
            thrown: Some(value),
            exit_code: 0,
        }
    }

    /// Process-exit request from the `exit()` builtin.
    #[must_use]
    pub fn exit(code: i32) -> Self {
        Self {
            kind: ErrorKind::Exit,
            message: format!("exit({code})"),
            loc: None,
            thrown: None,
            exit_code: code,
        }
    }

    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    #[must_use]
    pub fn loc(&self) -> Option<CodeLoc> {
        self.loc
    }

    /// The value carried by a `Thrown` error, if any.
    #[must_use]
    pub fn thrown_value(&self) -> Option<&Value> {
        self.thrown.as_ref()
    }

    /// Consumes the error and returns the thrown value, if any.
    #[must_use]
    pub fn into_thrown_value(self) -> Option<Value> {
        self.thrown
    }

    #[must_use]
    pub fn exit_code(&self) -> i32 {
        self.exit_code
    }
}

impl Display for FalconError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            ErrorKind::Thrown => write!(f, "{}", self.message)?,
            kind => write!(f, "{kind} error: {}", self.message)?,
        }
        if let Some(loc) = self.loc {
            write!(f, " at {loc}")?;
        }
        Ok(())
    }
}

impl std::error::Error for FalconError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_with_location() {
        let err = FalconError::parse("expect ')' after arguments", CodeLoc::new(3, 7));
        assert_eq!(err.to_string(), "parse error: expect ')' after arguments at 3:7");
    }

    #[test]
    fn test_at_keeps_first_location() {
        let err = FalconError::runtime("division by zero")
            .at(CodeLoc::new(1, 1))
            .at(CodeLoc::new(9, 9));
        assert_eq!(err.loc(), Some(CodeLoc::new(1, 1)));
    }

    #[test]
    fn test_thrown_carries_value() {
        let err = FalconError::thrown(Value::Int(42));
        assert_eq!(err.kind(), ErrorKind::Thrown);
        assert_eq!(err.to_string(), "uncaught throw: 42");
        assert!(matches!(err.thrown_value(), Some(Value::Int(42))));
    }

    #[test]
    fn test_exit_code() {
        assert_eq!(FalconError::exit(3).exit_code(), 3);
        assert_eq!(FalconError::exit(3).kind(), ErrorKind::Exit);
    }
}
