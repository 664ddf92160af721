//! Control-client fake with scripted responses.

use async_trait::async_trait;
use qrand_proto::{CapturedOutput, CommandRunner, ExecError, Invocation};
use std::collections::VecDeque;
use std::io;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// One scripted reply.
#[derive(Debug, Clone)]
pub enum ScriptedResponse {
    /// Exit 0 with this text as combined output.
    Output(String),
    /// Exit with the given status and text.
    Status(i32, String),
    /// Executable could not be launched.
    Missing,
    /// Ran past its timeout (the runner sleeps for the full timeout first).
    Hang,
}

impl ScriptedResponse {
    pub fn output(text: impl Into<String>) -> Self {
        ScriptedResponse::Output(text.into())
    }
}

#[derive(Debug, Default)]
struct Script {
    rules: Vec<(String, VecDeque<ScriptedResponse>)>,
    calls: Vec<Invocation>,
}

/// A [`CommandRunner`] that answers from a script and records every call.
///
/// Responses are keyed by a substring of the rendered invocation (for example
/// `"context ls"` or `"set_seed"`). Each call consumes the next queued
/// response for the first matching key; the last response repeats once the
/// queue is down to one. Unmatched invocations succeed with empty output.
/// Clones share the script and the call log.
#[derive(Debug, Clone, Default)]
pub struct ScriptedRunner {
    script: Arc<Mutex<Script>>,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues responses for invocations containing `pattern`.
    pub fn on<I>(self, pattern: &str, responses: I) -> Self
    where
        I: IntoIterator<Item = ScriptedResponse>,
    {
        {
            let mut script = self.lock();
            match script.rules.iter_mut().find(|(p, _)| p == pattern) {
                Some((_, queue)) => queue.extend(responses),
                None => script
                    .rules
                    .push((pattern.to_string(), responses.into_iter().collect())),
            }
        }
        self
    }

    /// Every invocation seen so far, in call order.
    pub fn calls(&self) -> Vec<Invocation> {
        self.lock().calls.clone()
    }

    /// Number of calls whose rendered invocation contains `pattern`.
    pub fn count(&self, pattern: &str) -> usize {
        self.lock()
            .calls
            .iter()
            .filter(|inv| inv.to_string().contains(pattern))
            .count()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn next_response(&self, invocation: &Invocation) -> Option<ScriptedResponse> {
        let rendered = invocation.to_string();
        let mut script = self.lock();
        script.calls.push(invocation.clone());
        let (_, queue) = script
            .rules
            .iter_mut()
            .find(|(pattern, _)| rendered.contains(pattern.as_str()))?;
        if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().cloned()
        }
    }
}

#[async_trait]
impl CommandRunner for ScriptedRunner {
    async fn run_one_shot(
        &self,
        invocation: &Invocation,
        timeout: Duration,
    ) -> Result<CapturedOutput, ExecError> {
        let program = invocation.program.clone();
        match self.next_response(invocation) {
            None => Ok(CapturedOutput::default()),
            Some(ScriptedResponse::Output(text)) => Ok(CapturedOutput::from_text(&text)),
            Some(ScriptedResponse::Status(code, text)) => Err(ExecError::Status {
                program,
                code: Some(code),
                output: CapturedOutput::from_text(&text),
            }),
            Some(ScriptedResponse::Missing) => Err(ExecError::Launch {
                program,
                source: io::Error::new(io::ErrorKind::NotFound, "No such file or directory"),
            }),
            Some(ScriptedResponse::Hang) => {
                tokio::time::sleep(timeout).await;
                Err(ExecError::TimedOut { program, timeout })
            }
        }
    }
}
