//! OS process table backed by `pgrep` and `kill(2)`.

use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;
use qrand_proto::ProcessTable;
use std::io;
use std::process::Command;
use tracing::debug;

/// Finds processes by full command line and signals them.
#[derive(Debug, Clone)]
pub struct SystemProcessTable {
    pgrep: String,
}

impl SystemProcessTable {
    pub fn new() -> Self {
        Self {
            pgrep: "pgrep".to_string(),
        }
    }
}

impl Default for SystemProcessTable {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessTable for SystemProcessTable {
    /// Runs `pgrep -f <pattern>`. The pattern is an extended regex matched
    /// against the whole command line.
    fn find(&self, pattern: &str) -> io::Result<Vec<u32>> {
        let output = Command::new(&self.pgrep).arg("-f").arg(pattern).output()?;

        // pgrep exits 1 when nothing matched
        match output.status.code() {
            Some(0) => {}
            Some(1) => return Ok(Vec::new()),
            code => {
                return Err(io::Error::other(format!(
                    "pgrep exited with status {code:?}: {}",
                    String::from_utf8_lossy(&output.stderr).trim()
                )));
            }
        }

        let pids: Vec<u32> = String::from_utf8_lossy(&output.stdout)
            .lines()
            .filter_map(|line| line.trim().parse().ok())
            .collect();
        debug!(pattern, ?pids, "Process lookup");
        Ok(pids)
    }

    fn terminate(&self, pid: u32) -> io::Result<()> {
        kill(Pid::from_raw(pid as i32), Signal::SIGTERM).map_err(io::Error::from)
    }
}
