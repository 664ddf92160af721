//! Collaborator traits for the external processes a session drives.
//!
//! The long-running node and the short-lived control client are different
//! process kinds: the node is spawned once and supervised ([`NodeLauncher`],
//! [`NodeProcess`]), while each client call runs to completion and is captured
//! ([`CommandRunner`]). [`ProcessTable`] is the narrow view of the OS process
//! table that stale-instance cleanup needs.

use crate::error::{ExecError, SessionError};
use crate::invocation::Invocation;
use crate::output::CapturedOutput;
use async_trait::async_trait;
use std::io;
use std::time::Duration;

/// Liveness of a supervised node process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    /// Spawned, readiness marker not yet seen.
    Starting,
    /// Readiness marker seen.
    Ready,
    /// Interacted with after becoming ready.
    Running,
    /// Termination signal sent, exit not yet confirmed.
    Terminating,
    /// Exit confirmed and reaped.
    Exited,
}

/// Spawns the long-running node process.
pub trait NodeLauncher: Send + Sync {
    /// Launches the invocation attached to a pseudo-terminal.
    fn spawn(&self, invocation: &Invocation) -> Result<Box<dyn NodeProcess>, SessionError>;
}

/// A spawned node process owned by the session.
#[async_trait]
pub trait NodeProcess: Send {
    /// OS process id, if the process is still known to the OS.
    fn pid(&self) -> Option<u32>;

    fn state(&self) -> NodeState;

    /// Blocks until `marker` appears in the node's output or `timeout` elapses.
    async fn await_ready(&mut self, marker: &str, timeout: Duration) -> Result<(), SessionError>;

    /// Writes one line (newline appended) to the node's terminal.
    async fn send_line(&mut self, line: &str) -> io::Result<()>;

    /// Collects whatever the node prints during `window`.
    async fn read_for(&mut self, window: Duration) -> io::Result<CapturedOutput>;

    /// Signals termination and waits until the process is reaped.
    ///
    /// Idempotent: calling it on an exited process returns the cached exit code.
    async fn terminate(&mut self) -> io::Result<Option<i32>>;
}

/// Runs short-lived control-client commands to completion.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Runs the invocation, capturing combined stdout and stderr.
    async fn run_one_shot(
        &self,
        invocation: &Invocation,
        timeout: Duration,
    ) -> Result<CapturedOutput, ExecError>;
}

/// Lookup and signaling over the OS process table.
pub trait ProcessTable: Send + Sync {
    /// Process ids whose full command line matches `pattern`, an extended
    /// regex as accepted by `pgrep -f`.
    fn find(&self, pattern: &str) -> io::Result<Vec<u32>>;

    /// Sends the standard termination signal to `pid`.
    fn terminate(&self, pid: u32) -> io::Result<()>;
}
