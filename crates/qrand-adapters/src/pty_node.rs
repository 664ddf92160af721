//! PTY-attached node process.
//!
//! Spawns the node in a pseudo-terminal so it logs exactly as it would in an
//! interactive shell. A dedicated thread performs the blocking PTY reads,
//! splits the stream into lines, logs them under `qrand::node`, and forwards
//! them over an unbounded channel. The channel must never apply backpressure:
//! a node blocked on a full terminal stops making progress.
//!
//! Termination sends SIGTERM, polls for exit through the grace period, then
//! sends SIGKILL. Dropping a [`PtyNode`] that is still alive kills it.

use crate::line_buffer::LineBuffer;
use async_trait::async_trait;
use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;
use portable_pty::{Child, CommandBuilder, MasterPty, PtySize, native_pty_system};
use qrand_proto::{CapturedOutput, Invocation, NodeLauncher, NodeProcess, NodeState, SessionError};
use std::io::{self, Read, Write};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Interval between exit checks while waiting on a signaled child.
const EXIT_POLL: Duration = Duration::from_millis(50);

/// How long to wait for an exit status once the terminal has closed.
const EXIT_SETTLE: Duration = Duration::from_secs(1);

/// Stand-in deadline for waits too long to represent as an `Instant`.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// `now + wait`, saturating to a far-future deadline instead of overflowing.
fn deadline_after(wait: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(wait).unwrap_or(now + FAR_FUTURE)
}

/// Configuration for PTY-attached nodes.
#[derive(Debug, Clone)]
pub struct PtyConfig {
    /// Terminal width.
    pub cols: u16,
    /// Terminal height.
    pub rows: u16,
    /// Log node output at info level instead of debug.
    pub echo_output: bool,
    /// Time between SIGTERM and SIGKILL.
    pub terminate_grace: Duration,
}

impl Default for PtyConfig {
    fn default() -> Self {
        Self {
            cols: 120,
            rows: 40,
            echo_output: false,
            terminate_grace: Duration::from_secs(5),
        }
    }
}

/// Spawns node processes attached to a fresh pseudo-terminal each.
#[derive(Debug, Clone, Default)]
pub struct PtyLauncher {
    config: PtyConfig,
}

impl PtyLauncher {
    pub fn new(config: PtyConfig) -> Self {
        Self { config }
    }

    fn spawn_node(&self, invocation: &Invocation) -> io::Result<PtyNode> {
        let pair = native_pty_system()
            .openpty(PtySize {
                rows: self.config.rows,
                cols: self.config.cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| io::Error::other(e.to_string()))?;

        let mut cmd = CommandBuilder::new(&invocation.program);
        cmd.args(&invocation.args);
        cmd.cwd(std::env::current_dir()?);
        cmd.env("TERM", "xterm-256color");

        let child = pair
            .slave
            .spawn_command(cmd)
            .map_err(|e| io::Error::other(e.to_string()))?;

        // Kill the child if the rest of the setup fails
        let child = scopeguard::guard(child, |mut child| {
            let _ = child.kill();
        });

        let reader = pair
            .master
            .try_clone_reader()
            .map_err(|e| io::Error::other(e.to_string()))?;
        let writer = pair
            .master
            .take_writer()
            .map_err(|e| io::Error::other(e.to_string()))?;

        // The slave must close in this process for EOF to arrive when the child exits
        drop(pair.slave);

        let (tx, rx) = mpsc::unbounded_channel();
        let echo = self.config.echo_output;
        std::thread::Builder::new()
            .name("qrand-node-reader".to_string())
            .spawn(move || read_loop(reader, &tx, echo))?;

        Ok(PtyNode {
            program: invocation.program.clone(),
            child: scopeguard::ScopeGuard::into_inner(child),
            writer,
            _master: pair.master,
            events: rx,
            state: NodeState::Starting,
            exit_code: None,
            terminate_grace: self.config.terminate_grace,
        })
    }
}

impl NodeLauncher for PtyLauncher {
    fn spawn(&self, invocation: &Invocation) -> Result<Box<dyn NodeProcess>, SessionError> {
        debug!(command = %invocation, "Spawning node in PTY");
        self.spawn_node(invocation)
            .map(|node| Box::new(node) as Box<dyn NodeProcess>)
            .map_err(|e| SessionError::Spawn {
                program: invocation.program.clone(),
                reason: e.to_string(),
            })
    }
}

/// Output events from the reader thread.
#[derive(Debug)]
enum OutputEvent {
    /// One complete line, ANSI-stripped.
    Line(String),
    /// Terminal closed: the child exited or closed its side.
    Eof,
    /// Read failed.
    Error(String),
}

fn read_loop(mut reader: Box<dyn Read + Send>, tx: &mpsc::UnboundedSender<OutputEvent>, echo: bool) {
    let mut lines = LineBuffer::default();
    let mut buf = [0u8; 4096];

    let forward = |line: String| {
        if echo {
            info!(target: "qrand::node", "{}", line);
        } else {
            debug!(target: "qrand::node", "{}", line);
        }
        tx.send(OutputEvent::Line(line)).is_ok()
    };

    loop {
        match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => {
                for line in lines.push(&buf[..n]) {
                    if !forward(line) {
                        return;
                    }
                }
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                std::thread::sleep(Duration::from_millis(10));
            }
            // Linux reports EIO on the master once the child side is gone
            Err(e) if e.raw_os_error() == Some(nix::libc::EIO) => break,
            Err(e) => {
                if let Some(tail) = lines.flush() {
                    forward(tail);
                }
                debug!(error = %e, "PTY reader error");
                let _ = tx.send(OutputEvent::Error(e.to_string()));
                return;
            }
        }
    }

    if let Some(tail) = lines.flush() {
        forward(tail);
    }
    debug!("PTY reader: EOF");
    let _ = tx.send(OutputEvent::Eof);
}

/// A running node attached to a pseudo-terminal.
pub struct PtyNode {
    program: String,
    child: Box<dyn Child + Send + Sync>,
    writer: Box<dyn Write + Send>,
    // Closing the master hangs up the child's terminal
    _master: Box<dyn MasterPty + Send>,
    events: mpsc::UnboundedReceiver<OutputEvent>,
    state: NodeState,
    exit_code: Option<i32>,
    terminate_grace: Duration,
}

impl PtyNode {
    /// Non-blocking exit check; caches the code once seen.
    fn poll_exit(&mut self) -> io::Result<bool> {
        if self.state == NodeState::Exited {
            return Ok(true);
        }
        match self.child.try_wait()? {
            Some(status) => {
                let code = status.exit_code() as i32;
                debug!(program = %self.program, exit_code = code, "Node exited");
                self.exit_code = Some(code);
                self.state = NodeState::Exited;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Polls for exit until `limit` elapses.
    async fn wait_exit(&mut self, limit: Duration) -> io::Result<bool> {
        let deadline = deadline_after(limit);
        loop {
            if self.poll_exit()? {
                return Ok(true);
            }
            if Instant::now() >= deadline {
                return Ok(false);
            }
            tokio::time::sleep(EXIT_POLL).await;
        }
    }

    fn signal(&self, signal: Signal) {
        if let Some(pid) = self.child.process_id() {
            let pid = Pid::from_raw(pid as i32);
            debug!(%pid, ?signal, "Signaling node");
            if let Err(e) = kill(pid, signal) {
                debug!(%pid, error = %e, "Signal delivery failed");
            }
        }
    }
}

impl std::fmt::Debug for PtyNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PtyNode")
            .field("program", &self.program)
            .field("pid", &self.child.process_id())
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl NodeProcess for PtyNode {
    fn pid(&self) -> Option<u32> {
        if self.state == NodeState::Exited {
            None
        } else {
            self.child.process_id()
        }
    }

    fn state(&self) -> NodeState {
        self.state
    }

    async fn await_ready(&mut self, marker: &str, timeout: Duration) -> Result<(), SessionError> {
        let deadline = deadline_after(timeout);
        loop {
            tokio::select! {
                event = self.events.recv() => match event {
                    Some(OutputEvent::Line(line)) => {
                        if line.contains(marker) {
                            self.state = NodeState::Ready;
                            return Ok(());
                        }
                    }
                    Some(OutputEvent::Error(e)) => {
                        warn!(program = %self.program, error = %e, "Node terminal read failed before readiness");
                        self.wait_exit(EXIT_SETTLE).await?;
                        return Err(SessionError::NodeExited { code: self.exit_code });
                    }
                    Some(OutputEvent::Eof) | None => {
                        self.wait_exit(EXIT_SETTLE).await?;
                        warn!(program = %self.program, exit_code = ?self.exit_code, "Node output closed before readiness");
                        return Err(SessionError::NodeExited { code: self.exit_code });
                    }
                },
                () = tokio::time::sleep_until(deadline) => {
                    return Err(SessionError::Timeout {
                        marker: marker.to_string(),
                        timeout,
                    });
                }
            }
        }
    }

    async fn send_line(&mut self, line: &str) -> io::Result<()> {
        if self.poll_exit()? {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "node has exited"));
        }
        self.writer.write_all(line.as_bytes())?;
        self.writer.write_all(b"\n")?;
        self.writer.flush()?;
        if self.state == NodeState::Ready {
            self.state = NodeState::Running;
        }
        Ok(())
    }

    async fn read_for(&mut self, window: Duration) -> io::Result<CapturedOutput> {
        let deadline = deadline_after(window);
        let mut lines = Vec::new();
        loop {
            tokio::select! {
                event = self.events.recv() => match event {
                    Some(OutputEvent::Line(line)) => lines.push(line),
                    Some(OutputEvent::Error(e)) => {
                        debug!(program = %self.program, error = %e, "Node terminal read failed");
                        break;
                    }
                    Some(OutputEvent::Eof) | None => break,
                },
                () = tokio::time::sleep_until(deadline) => break,
            }
        }
        Ok(CapturedOutput::from_lines(lines))
    }

    async fn terminate(&mut self) -> io::Result<Option<i32>> {
        if self.poll_exit()? {
            return Ok(self.exit_code);
        }

        self.state = NodeState::Terminating;
        self.signal(Signal::SIGTERM);
        if self.wait_exit(self.terminate_grace).await? {
            return Ok(self.exit_code);
        }

        warn!(program = %self.program, grace_secs = self.terminate_grace.as_secs(), "Node ignored SIGTERM, sending SIGKILL");
        self.signal(Signal::SIGKILL);
        if self.wait_exit(EXIT_SETTLE).await? {
            return Ok(self.exit_code);
        }
        Err(io::Error::other(format!(
            "`{}` still running after SIGKILL",
            self.program
        )))
    }
}

impl Drop for PtyNode {
    fn drop(&mut self) {
        if matches!(self.child.try_wait(), Ok(None)) {
            debug!(program = %self.program, "Killing node on drop");
            let _ = self.child.kill();
        }
    }
}
