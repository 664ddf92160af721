//! Error taxonomy for a session.
//!
//! Errors split into two families:
//! - [`SessionError`]: fatal. The orchestrator unwinds, terminates the node,
//!   and the run exits non-zero.
//! - [`ExecError`]: a one-shot client call failed. Reported, never fatal on
//!   its own.

use crate::output::CapturedOutput;
use crate::token::TokenKind;
use std::io;
use std::time::Duration;

/// A one-shot control-client invocation failed.
#[derive(Debug, thiserror::Error)]
pub enum ExecError {
    #[error("failed to launch `{program}`: {source}")]
    Launch {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("`{program}` timed out after {}s", .timeout.as_secs())]
    TimedOut { program: String, timeout: Duration },

    #[error("`{program}` exited with status {}", display_code(.code))]
    Status {
        program: String,
        code: Option<i32>,
        output: CapturedOutput,
    },

    #[error("I/O error while running `{program}`: {source}")]
    Io {
        program: String,
        #[source]
        source: io::Error,
    },
}

impl ExecError {
    /// Output captured before the failure, if any.
    pub fn output(&self) -> Option<&CapturedOutput> {
        match self {
            ExecError::Status { output, .. } => Some(output),
            _ => None,
        }
    }
}

fn display_code(code: &Option<i32>) -> String {
    code.map_or_else(|| "unknown".to_string(), |c| c.to_string())
}

/// Retry budget exhausted without producing a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("no value after {attempts} attempts")]
pub struct NotFoundError {
    pub attempts: u32,
}

/// Fatal session errors.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("failed to spawn `{program}`: {reason}")]
    Spawn { program: String, reason: String },

    #[error("node initialization failed: {0}")]
    Init(#[source] ExecError),

    #[error("readiness marker `{marker}` not seen within {}s", .timeout.as_secs())]
    Timeout { marker: String, timeout: Duration },

    #[error("node exited before becoming ready (exit code {})", display_code(.code))]
    NodeExited { code: Option<i32> },

    #[error("{kind} not found after {attempts} attempts")]
    NotFound { kind: TokenKind, attempts: u32 },

    #[error("interrupted")]
    Interrupted,

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl SessionError {
    /// Process exit code for a run that aborted with this error.
    ///
    /// - 1: spawn, init, or I/O failure
    /// - 2: node never became ready
    /// - 3: discovery budget exhausted
    /// - 130: interrupted (128 + SIGINT)
    pub fn exit_code(&self) -> i32 {
        match self {
            SessionError::Spawn { .. } | SessionError::Init(_) | SessionError::Io(_) => 1,
            SessionError::Timeout { .. } | SessionError::NodeExited { .. } => 2,
            SessionError::NotFound { .. } => 3,
            SessionError::Interrupted => 130,
        }
    }

    /// Builds a `NotFound` for the given token from a retry failure.
    pub fn not_found(kind: TokenKind, err: NotFoundError) -> Self {
        SessionError::NotFound {
            kind,
            attempts: err.attempts,
        }
    }
}
