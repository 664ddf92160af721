//! Stale-instance cleanup before a node is started.
//!
//! A node left over from an earlier run keeps its server and swarm ports bound,
//! and the new node would fail to start. The reaper signals any process whose
//! command line matches the node invocation and then waits for the ports to be
//! released. It never fails the run: lookup or signal errors are logged and
//! treated as "nothing to reap".

use qrand_proto::ProcessTable;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// What a reap pass did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReapOutcome {
    /// Pids that were sent the termination signal.
    pub signaled: Vec<u32>,
}

impl ReapOutcome {
    pub fn found_any(&self) -> bool {
        !self.signaled.is_empty()
    }
}

/// Finds and terminates leftover instances through an injected process table.
#[derive(Clone)]
pub struct Reaper {
    table: Arc<dyn ProcessTable>,
    grace: Duration,
}

impl Reaper {
    pub fn new(table: Arc<dyn ProcessTable>, grace: Duration) -> Self {
        Self { table, grace }
    }

    /// Signals every process matching `pattern`, then waits the grace period.
    ///
    /// Returns immediately when nothing matches.
    pub async fn reap(&self, pattern: &str) -> ReapOutcome {
        let own_pid = std::process::id();
        let pids = match self.table.find(pattern) {
            Ok(pids) => pids,
            Err(e) => {
                warn!(pattern, error = %e, "Process lookup failed, skipping stale-instance cleanup");
                return ReapOutcome::default();
            }
        };

        let mut outcome = ReapOutcome::default();
        for pid in pids.into_iter().filter(|&pid| pid != own_pid) {
            match self.table.terminate(pid) {
                Ok(()) => {
                    info!(pid, "Killed previous node process");
                    outcome.signaled.push(pid);
                }
                Err(e) => {
                    debug!(pid, error = %e, "Could not signal stale process");
                }
            }
        }

        if outcome.found_any() {
            debug!(grace_ms = self.grace.as_millis() as u64, "Waiting for ports to be released");
            tokio::time::sleep(self.grace).await;
        } else {
            debug!(pattern, "No stale node instance found");
        }

        outcome
    }
}

impl std::fmt::Debug for Reaper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reaper").field("grace", &self.grace).finish_non_exhaustive()
    }
}
