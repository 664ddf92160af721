//! One-shot control-client executor.
//!
//! Runs a client invocation to completion with piped stdio, capturing stdout
//! and stderr concurrently. On timeout the child receives SIGTERM and is
//! killed when dropped.

use crate::line_buffer::strip_ansi;
use async_trait::async_trait;
use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;
use qrand_proto::{CapturedOutput, CommandRunner, ExecError, Invocation};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tracing::{debug, warn};

/// Executes control-client invocations as child processes.
#[derive(Debug, Clone, Default)]
pub struct ClientExecutor;

impl ClientExecutor {
    pub fn new() -> Self {
        Self
    }

    /// Terminates the child process with SIGTERM.
    fn terminate_child(child: &Child) {
        if let Some(pid) = child.id() {
            let pid = Pid::from_raw(pid as i32);
            debug!(%pid, "Sending SIGTERM to client process");
            let _ = kill(pid, Signal::SIGTERM);
        }
    }
}

async fn read_lines<R: AsyncRead + Unpin>(stream: Option<R>) -> std::io::Result<Vec<String>> {
    let mut out = Vec::new();
    if let Some(stream) = stream {
        let mut lines = BufReader::new(stream).lines();
        while let Some(line) = lines.next_line().await? {
            out.push(strip_ansi(line.as_bytes()));
        }
    }
    Ok(out)
}

#[async_trait]
impl CommandRunner for ClientExecutor {
    async fn run_one_shot(
        &self,
        invocation: &Invocation,
        timeout: Duration,
    ) -> Result<CapturedOutput, ExecError> {
        let program = invocation.program.clone();

        let mut command = Command::new(&invocation.program);
        command
            .args(&invocation.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        debug!(command = %invocation, timeout_secs = timeout.as_secs(), "Running client command");

        let mut child = command.spawn().map_err(|source| ExecError::Launch {
            program: program.clone(),
            source,
        })?;

        // Read both streams concurrently so a full stderr pipe cannot stall stdout
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let run = async {
            let (out, err) = tokio::try_join!(read_lines(stdout), read_lines(stderr))?;
            let status = child.wait().await?;
            Ok::<_, std::io::Error>((out, err, status))
        };

        let finished = tokio::time::timeout(timeout, run).await;
        let (stdout_lines, stderr_lines, status) = match finished {
            Ok(Ok(done)) => done,
            Ok(Err(source)) => return Err(ExecError::Io { program, source }),
            Err(_) => {
                warn!(command = %invocation, timeout_secs = timeout.as_secs(), "Client command timed out, sending SIGTERM");
                Self::terminate_child(&child);
                return Err(ExecError::TimedOut { program, timeout });
            }
        };

        let output = CapturedOutput::from_lines(stdout_lines.into_iter().chain(stderr_lines).collect());

        if status.success() {
            Ok(output)
        } else {
            Err(ExecError::Status {
                program,
                code: status.code(),
                output,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(program: &str, args: &[&str]) -> Invocation {
        Invocation::new(program).args(args.iter().copied())
    }

    #[tokio::test]
    async fn test_captures_stdout_and_stderr() {
        let output = ClientExecutor::new()
            .run_one_shot(
                &run("sh", &["-c", "echo out; echo err >&2"]),
                Duration::from_secs(5),
            )
            .await
            .unwrap();
        assert_eq!(output.lines(), ["out", "err"]);
    }

    #[tokio::test]
    async fn test_json_argument_passed_verbatim() {
        let output = ClientExecutor::new()
            .run_one_shot(
                &run("echo", &[r#"{"node":"node1"}"#]),
                Duration::from_secs(5),
            )
            .await
            .unwrap();
        assert_eq!(output.text(), r#"{"node":"node1"}"#);
    }

    #[tokio::test]
    async fn test_nonzero_exit_is_status_error() {
        let err = ClientExecutor::new()
            .run_one_shot(&run("sh", &["-c", "echo nope; exit 4"]), Duration::from_secs(5))
            .await
            .unwrap_err();
        match err {
            ExecError::Status { code, output, .. } => {
                assert_eq!(code, Some(4));
                assert_eq!(output.text(), "nope");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_timeout() {
        let started = std::time::Instant::now();
        let err = ClientExecutor::new()
            .run_one_shot(&run("sleep", &["10"]), Duration::from_millis(200))
            .await
            .unwrap_err();
        assert!(matches!(err, ExecError::TimedOut { .. }));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_missing_executable() {
        let err = ClientExecutor::new()
            .run_one_shot(
                &run("/nonexistent/qrand-client", &[]),
                Duration::from_secs(5),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ExecError::Launch { .. }));
    }
}
