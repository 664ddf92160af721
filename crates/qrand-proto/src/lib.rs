//! # qrand-proto
//!
//! Shared types, error definitions, and traits for qrand.
//!
//! This crate provides the foundational abstractions used across all qrand crates,
//! including:
//! - The fatal/non-fatal error taxonomy of a session
//! - Process invocations and captured output
//! - Extracted identifier tokens (context and identity)
//! - Collaborator traits for the node process, the control client,
//!   the OS process table, and random bit generation

mod error;
mod invocation;
mod output;
mod process;
mod seed;
mod token;

pub use error::{ExecError, NotFoundError, SessionError};
pub use invocation::Invocation;
pub use output::CapturedOutput;
pub use process::{CommandRunner, NodeLauncher, NodeProcess, NodeState, ProcessTable};
pub use seed::{RandomBits, SeedPayload};
pub use token::{ContextId, ExtractedToken, IdentityId, TokenKind};
