//! Node-process fake.
//!
//! [`FakeLauncher`] hands out [`FakeNode`]s that follow a [`NodeBehavior`]
//! under tokio time. All nodes spawned by one launcher (and its clones) share
//! a single log so tests can assert on spawns, signals, and lines written.

use async_trait::async_trait;
use qrand_proto::{
    CapturedOutput, Invocation, NodeLauncher, NodeProcess, NodeState, SessionError,
};
use std::io;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// How a fake node behaves after spawn.
#[derive(Debug, Clone)]
pub struct NodeBehavior {
    /// Delay before the readiness marker appears. `None` means never.
    pub ready_after: Option<Duration>,
    /// Exit with this code before the marker appears.
    pub exit_before_ready: Option<i32>,
    /// Refuse to spawn.
    pub fail_spawn: bool,
    /// Lines printed in reply to any line written to the node.
    pub echo_reply: Vec<String>,
    /// Exit code reported after termination.
    pub exit_code: Option<i32>,
}

impl Default for NodeBehavior {
    fn default() -> Self {
        Self {
            ready_after: Some(Duration::from_millis(500)),
            exit_before_ready: None,
            fail_spawn: false,
            echo_reply: Vec::new(),
            exit_code: Some(0),
        }
    }
}

impl NodeBehavior {
    pub fn ready_after(delay: Duration) -> Self {
        Self {
            ready_after: Some(delay),
            ..Self::default()
        }
    }

    pub fn never_ready() -> Self {
        Self {
            ready_after: None,
            ..Self::default()
        }
    }

    pub fn exits_early(code: i32) -> Self {
        Self {
            exit_before_ready: Some(code),
            ..Self::default()
        }
    }

    pub fn spawn_fails() -> Self {
        Self {
            fail_spawn: true,
            ..Self::default()
        }
    }
}

#[derive(Debug, Default)]
struct NodeLog {
    spawned: Vec<Invocation>,
    terminate_calls: usize,
    signals: usize,
    lines: Vec<String>,
}

/// Launcher for [`FakeNode`]s. Clones share the same log.
#[derive(Debug, Clone, Default)]
pub struct FakeLauncher {
    behavior: NodeBehavior,
    log: Arc<Mutex<NodeLog>>,
}

impl FakeLauncher {
    pub fn new(behavior: NodeBehavior) -> Self {
        Self {
            behavior,
            log: Arc::default(),
        }
    }

    pub fn spawn_count(&self) -> usize {
        self.lock().spawned.len()
    }

    pub fn spawned(&self) -> Vec<Invocation> {
        self.lock().spawned.clone()
    }

    /// Times `terminate` was called on any node.
    pub fn terminate_calls(&self) -> usize {
        self.lock().terminate_calls
    }

    /// Times a node that was still alive actually received a signal.
    pub fn signals_sent(&self) -> usize {
        self.lock().signals
    }

    /// Lines written to node terminals.
    pub fn lines_sent(&self) -> Vec<String> {
        self.lock().lines.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, NodeLog> {
        self.log.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl NodeLauncher for FakeLauncher {
    fn spawn(&self, invocation: &Invocation) -> Result<Box<dyn NodeProcess>, SessionError> {
        if self.behavior.fail_spawn {
            return Err(SessionError::Spawn {
                program: invocation.program.clone(),
                reason: "No such file or directory".to_string(),
            });
        }
        let mut log = self.lock();
        log.spawned.push(invocation.clone());
        let pid = 40_000 + u32::try_from(log.spawned.len()).unwrap_or(0);
        Ok(Box::new(FakeNode {
            pid,
            behavior: self.behavior.clone(),
            state: NodeState::Starting,
            exit_code: None,
            pending: Vec::new(),
            log: Arc::clone(&self.log),
        }))
    }
}

/// A scripted node process.
#[derive(Debug)]
pub struct FakeNode {
    pid: u32,
    behavior: NodeBehavior,
    state: NodeState,
    exit_code: Option<i32>,
    pending: Vec<String>,
    log: Arc<Mutex<NodeLog>>,
}

impl FakeNode {
    fn lock(&self) -> std::sync::MutexGuard<'_, NodeLog> {
        self.log.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

#[async_trait]
impl NodeProcess for FakeNode {
    fn pid(&self) -> Option<u32> {
        (self.state != NodeState::Exited).then_some(self.pid)
    }

    fn state(&self) -> NodeState {
        self.state
    }

    async fn await_ready(&mut self, marker: &str, timeout: Duration) -> Result<(), SessionError> {
        if let Some(code) = self.behavior.exit_before_ready {
            tokio::time::sleep(Duration::from_millis(100)).await;
            self.state = NodeState::Exited;
            self.exit_code = Some(code);
            return Err(SessionError::NodeExited { code: Some(code) });
        }
        match self.behavior.ready_after {
            Some(delay) if delay <= timeout => {
                tokio::time::sleep(delay).await;
                self.state = NodeState::Ready;
                Ok(())
            }
            _ => {
                tokio::time::sleep(timeout).await;
                Err(SessionError::Timeout {
                    marker: marker.to_string(),
                    timeout,
                })
            }
        }
    }

    async fn send_line(&mut self, line: &str) -> io::Result<()> {
        if self.state == NodeState::Exited {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "node has exited"));
        }
        self.lock().lines.push(line.to_string());
        self.pending.extend(self.behavior.echo_reply.iter().cloned());
        if self.state == NodeState::Ready {
            self.state = NodeState::Running;
        }
        Ok(())
    }

    async fn read_for(&mut self, window: Duration) -> io::Result<CapturedOutput> {
        tokio::time::sleep(window).await;
        Ok(CapturedOutput::from_lines(std::mem::take(&mut self.pending)))
    }

    async fn terminate(&mut self) -> io::Result<Option<i32>> {
        let alive = self.state != NodeState::Exited;
        {
            let mut log = self.lock();
            log.terminate_calls += 1;
            if alive {
                log.signals += 1;
            }
        }
        if alive {
            self.state = NodeState::Exited;
            self.exit_code = self.behavior.exit_code;
        }
        Ok(self.exit_code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_ready_within_timeout() {
        let launcher = FakeLauncher::new(NodeBehavior::ready_after(Duration::from_secs(3)));
        let mut node = launcher.spawn(&Invocation::new("merod")).unwrap();
        node.await_ready("ready", Duration::from_secs(15)).await.unwrap();
        assert_eq!(node.state(), NodeState::Ready);
        assert_eq!(launcher.spawn_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_never_ready_times_out() {
        let launcher = FakeLauncher::new(NodeBehavior::never_ready());
        let mut node = launcher.spawn(&Invocation::new("merod")).unwrap();
        let err = node
            .await_ready("ready", Duration::from_secs(15))
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::Timeout { .. }));
    }

    #[tokio::test]
    async fn test_terminate_is_idempotent() {
        let launcher = FakeLauncher::new(NodeBehavior::default());
        let mut node = launcher.spawn(&Invocation::new("merod")).unwrap();
        assert_eq!(node.terminate().await.unwrap(), Some(0));
        assert_eq!(node.terminate().await.unwrap(), Some(0));
        assert_eq!(launcher.terminate_calls(), 2);
        assert_eq!(launcher.signals_sent(), 1);
        assert!(node.pid().is_none());
    }
}
