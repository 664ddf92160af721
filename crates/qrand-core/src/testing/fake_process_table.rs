//! In-memory process table.

use qrand_proto::ProcessTable;
use regex::Regex;
use std::io;
use std::sync::{Arc, Mutex};

#[derive(Debug, Default)]
struct TableState {
    processes: Vec<(u32, String)>,
    signaled: Vec<u32>,
    fail_lookups: bool,
}

/// A process table whose entries are added by the test.
///
/// `find` treats the pattern as an unanchored regex over the command line,
/// like `pgrep -f`. Clones share state.
#[derive(Debug, Clone, Default)]
pub struct FakeProcessTable {
    state: Arc<Mutex<TableState>>,
}

impl FakeProcessTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, pid: u32, command_line: &str) {
        self.lock().processes.push((pid, command_line.to_string()));
    }

    /// Makes every subsequent `find` fail.
    pub fn fail_lookups(&self) {
        self.lock().fail_lookups = true;
    }

    /// Pids that received a termination signal, in order.
    pub fn signaled(&self) -> Vec<u32> {
        self.lock().signaled.clone()
    }

    pub fn is_running(&self, pid: u32) -> bool {
        self.lock().processes.iter().any(|(p, _)| *p == pid)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, TableState> {
        self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl ProcessTable for FakeProcessTable {
    fn find(&self, pattern: &str) -> io::Result<Vec<u32>> {
        let state = self.lock();
        if state.fail_lookups {
            return Err(io::Error::other("process table unavailable"));
        }
        let pattern = Regex::new(pattern)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
        Ok(state
            .processes
            .iter()
            .filter(|(_, cmd)| pattern.is_match(cmd))
            .map(|(pid, _)| *pid)
            .collect())
    }

    fn terminate(&self, pid: u32) -> io::Result<()> {
        let mut state = self.lock();
        let before = state.processes.len();
        state.processes.retain(|(p, _)| *p != pid);
        if state.processes.len() == before {
            return Err(io::Error::new(io::ErrorKind::NotFound, "no such process"));
        }
        state.signaled.push(pid);
        Ok(())
    }
}
