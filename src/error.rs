//! Error types for the V8 binding layer.

use thiserror::Error;

/// Classification of an engine-side exception.
///
/// These mirror the exception tags the native library embeds in value
/// handles. `Parse` and `Execute` cover ordinary JavaScript failures;
/// `OutOfMemory`, `Timeout` and `Terminated` are produced when the engine
/// aborts a script (memory limit, engine-side watchdog, explicit
/// termination); `Value` and `Key` cover conversion failures and missing
/// object properties.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvalErrorKind {
    Parse,
    Execute,
    OutOfMemory,
    Timeout,
    Terminated,
    Value,
    Key,
}

impl std::fmt::Display for EvalErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            EvalErrorKind::Parse => "SyntaxError",
            EvalErrorKind::Execute => "EvalError",
            EvalErrorKind::OutOfMemory => "OutOfMemoryError",
            EvalErrorKind::Timeout => "TimeoutError",
            EvalErrorKind::Terminated => "TerminatedError",
            EvalErrorKind::Value => "ValueError",
            EvalErrorKind::Key => "KeyError",
        };
        f.write_str(name)
    }
}

/// A JavaScript exception reported by the engine as the outcome of an
/// operation.
///
/// `message` carries the exception text; when the engine captured a stack
/// trace it is included in the same string (the native side prefers the
/// backtrace, which begins with the exception message).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{kind}: {message}")]
pub struct EvalError {
    pub kind: EvalErrorKind,
    pub message: String,
}

impl EvalError {
    pub(crate) fn new(kind: EvalErrorKind, message: impl Into<String>) -> Self {
        EvalError {
            kind,
            message: message.into(),
        }
    }
}

/// Main error type of the crate.
#[derive(Debug, Error)]
pub enum Error {
    /// The engine reported a JavaScript exception.
    #[error(transparent)]
    Eval(#[from] EvalError),

    /// The caller's await deadline elapsed before the engine delivered a
    /// result. The underlying task is cancelled and drained; the engine is
    /// left in a usable state, so callers may retry.
    #[error("JavaScript execution timed out")]
    Timeout,

    /// Operation attempted on a closed context.
    #[error("operation on closed context")]
    ContextClosed,

    /// The shared library could not be loaded or is missing a symbol.
    #[error("failed to load the engine library: {0}")]
    Library(#[from] libloading::Error),

    /// The engine refused to set up a context or allocate a value, which
    /// happens only when the process-global engine was never initialized.
    #[error("engine setup failed: {0}")]
    Setup(String),

    /// A JSON round-trip produced output the host could not parse.
    #[error("malformed JSON from engine: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// True if this error is an engine-side exception (as opposed to a
    /// binding-layer condition such as a timeout or a closed context).
    pub fn is_eval(&self) -> bool {
        matches!(self, Error::Eval(_))
    }
}
