//! # qrand-adapters
//!
//! OS-backed implementations of the qrand collaborator traits.
//!
//! - [`PtyLauncher`] / [`PtyNode`]: the long-running node attached to a
//!   pseudo-terminal, read by a background thread
//! - [`ClientExecutor`]: one-shot control-client calls with a timeout
//! - [`SystemProcessTable`]: `pgrep -f` lookup and SIGTERM delivery
//! - [`OsRandomBits`]: random bits from the thread-local RNG
//!
//! ## PTY Mode
//!
//! The node writes its log through a terminal, so it is spawned via
//! `portable-pty` rather than with piped stdio. Output lines are stripped of
//! ANSI escapes before they reach the session.

mod client_executor;
mod line_buffer;
mod process_table;
mod pty_node;
mod random_bits;

pub use client_executor::ClientExecutor;
pub use process_table::SystemProcessTable;
pub use pty_node::{PtyConfig, PtyLauncher, PtyNode};
pub use random_bits::OsRandomBits;
