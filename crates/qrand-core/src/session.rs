//! The session orchestrator.
//!
//! A session walks a fixed, linear pipeline:
//!
//! ```text
//! Init → Reaped → Initialized → NodeSpawned → NodeReady → ContextKnown
//!      → IdentityKnown → SeedSet → ValueProcessed → ValueFetched → ShutDown
//! ```
//!
//! Any fatal step (spawn, init, readiness, discovery, interrupt) moves the
//! session to `Aborted` instead. Whichever way the pipeline ends, a node that
//! was spawned is terminated exactly once before [`Session::run`] returns.
//!
//! The three contract calls are best-effort: a failed call is recorded and
//! logged, and the next call still runs.

use crate::commands::{CommandSet, ContractCall};
use crate::config::{ConfigError, QrandConfig};
use crate::extractor::{ExtractionRule, ExtractionRules, extract_token};
use crate::reaper::Reaper;
use crate::retry::{RetryPolicy, with_retry};
use crate::seed::SeedProvider;
use qrand_proto::{
    CapturedOutput, CommandRunner, ContextId, ExecError, ExtractedToken, IdentityId, Invocation,
    NodeLauncher, NodeProcess, ProcessTable, SeedPayload, SessionError, TokenKind,
};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Where a session is in its pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Init,
    Reaped,
    Initialized,
    NodeSpawned,
    NodeReady,
    ContextKnown,
    IdentityKnown,
    SeedSet,
    ValueProcessed,
    ValueFetched,
    ShutDown,
    Aborted,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Init => "init",
            SessionState::Reaped => "reaped",
            SessionState::Initialized => "initialized",
            SessionState::NodeSpawned => "node_spawned",
            SessionState::NodeReady => "node_ready",
            SessionState::ContextKnown => "context_known",
            SessionState::IdentityKnown => "identity_known",
            SessionState::SeedSet => "seed_set",
            SessionState::ValueProcessed => "value_processed",
            SessionState::ValueFetched => "value_fetched",
            SessionState::ShutDown => "shut_down",
            SessionState::Aborted => "aborted",
        }
    }

    /// Human-readable name of the step that leads into this state.
    pub fn step_name(&self) -> &'static str {
        match self {
            SessionState::Init => "start",
            SessionState::Reaped => "stale-instance cleanup",
            SessionState::Initialized => "node initialization",
            SessionState::NodeSpawned => "node spawn",
            SessionState::NodeReady => "readiness wait",
            SessionState::ContextKnown => "context discovery",
            SessionState::IdentityKnown => "identity discovery",
            SessionState::SeedSet => "set_seed",
            SessionState::ValueProcessed => "process_value",
            SessionState::ValueFetched => "get_last_value",
            SessionState::ShutDown => "shutdown",
            SessionState::Aborted => "abort",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Timeouts and node settings a session runs with.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub ready_marker: String,
    pub run_init: bool,
    pub init_timeout: Duration,
    pub ready_timeout: Duration,
    pub discovery_timeout: Duration,
    pub command_timeout: Duration,
    pub reap_grace: Duration,
    pub terminate_grace: Duration,
    pub shutdown_line: Option<String>,
}

impl SessionConfig {
    pub fn from_config(config: &QrandConfig) -> Self {
        let t = &config.timeouts;
        Self {
            ready_marker: config.node.ready_marker.clone(),
            run_init: config.node.init,
            init_timeout: Duration::from_secs(t.init),
            ready_timeout: Duration::from_secs(t.ready),
            discovery_timeout: Duration::from_secs(t.discovery),
            command_timeout: Duration::from_secs(t.command),
            reap_grace: Duration::from_secs(t.reap_grace),
            terminate_grace: Duration::from_secs(t.terminate_grace),
            shutdown_line: config.node.shutdown_line.clone(),
        }
    }
}

/// Outcome of one best-effort contract call.
#[derive(Debug)]
pub struct CommandOutcome {
    pub method: &'static str,
    pub invocation: Invocation,
    pub result: Result<CapturedOutput, ExecError>,
}

impl CommandOutcome {
    pub fn succeeded(&self) -> bool {
        self.result.is_ok()
    }
}

/// How a session ended.
#[derive(Debug)]
pub enum Termination {
    /// Every step ran and the node was shut down.
    Completed,
    /// A fatal step failed; the node (if spawned) was still terminated.
    Aborted {
        step: SessionState,
        error: SessionError,
    },
}

/// Everything a session observed, returned by [`Session::run`].
#[derive(Debug)]
pub struct SessionReport {
    /// States reached, in order.
    pub states: Vec<SessionState>,
    /// Stale node pids signaled before start.
    pub reaped: Vec<u32>,
    pub context: Option<ContextId>,
    pub identity: Option<IdentityId>,
    pub seed: Option<SeedPayload>,
    pub commands: Vec<CommandOutcome>,
    /// Output of `get_last_value`, when the call succeeded.
    pub last_value: Option<String>,
    /// Exit code of the node after termination.
    pub node_exit_code: Option<i32>,
    pub termination: Termination,
}

impl SessionReport {
    fn new() -> Self {
        Self {
            states: vec![SessionState::Init],
            reaped: Vec::new(),
            context: None,
            identity: None,
            seed: None,
            commands: Vec::new(),
            last_value: None,
            node_exit_code: None,
            termination: Termination::Completed,
        }
    }

    fn enter(&mut self, state: SessionState) {
        debug!(state = %state, "Session state");
        self.states.push(state);
    }

    pub fn final_state(&self) -> SessionState {
        self.states.last().copied().unwrap_or(SessionState::Init)
    }

    pub fn reached(&self, state: SessionState) -> bool {
        self.states.contains(&state)
    }

    pub fn is_success(&self) -> bool {
        matches!(self.termination, Termination::Completed)
    }

    /// Process exit code for this session.
    ///
    /// Failed contract calls do not affect it: a session that reached
    /// `ShutDown` exits 0.
    pub fn exit_code(&self) -> i32 {
        match &self.termination {
            Termination::Completed => 0,
            Termination::Aborted { error, .. } => error.exit_code(),
        }
    }

    pub fn failed_commands(&self) -> impl Iterator<Item = &CommandOutcome> {
        self.commands.iter().filter(|c| !c.succeeded())
    }
}

/// External collaborators a session drives.
pub struct SessionDeps {
    pub launcher: Arc<dyn NodeLauncher>,
    pub runner: Arc<dyn CommandRunner>,
    pub process_table: Arc<dyn ProcessTable>,
    pub seed: SeedProvider,
}

/// One end-to-end run against a single node.
pub struct Session {
    config: SessionConfig,
    commands: CommandSet,
    policy: RetryPolicy,
    rules: ExtractionRules,
    reaper: Reaper,
    launcher: Arc<dyn NodeLauncher>,
    runner: Arc<dyn CommandRunner>,
    seed: SeedProvider,
    interrupt: Option<watch::Receiver<bool>>,
}

impl Session {
    /// Fails only if the extraction rules cannot be built from `config`.
    pub fn new(config: &QrandConfig, deps: SessionDeps) -> Result<Self, ConfigError> {
        let session_config = SessionConfig::from_config(config);
        Ok(Self {
            reaper: Reaper::new(deps.process_table, session_config.reap_grace),
            rules: config.extraction_rules()?,
            config: session_config,
            commands: CommandSet::new(&config.node),
            policy: config.retry_policy(),
            launcher: deps.launcher,
            runner: deps.runner,
            seed: deps.seed,
            interrupt: None,
        })
    }

    /// Aborts the session when the receiver observes `true`.
    pub fn with_interrupt(mut self, interrupt: watch::Receiver<bool>) -> Self {
        self.interrupt = Some(interrupt);
        self
    }

    pub fn commands(&self) -> &CommandSet {
        &self.commands
    }

    /// Runs the pipeline to completion or abort. Never leaves the node running.
    pub async fn run(mut self) -> SessionReport {
        let mut report = SessionReport::new();
        let mut node: Option<Box<dyn NodeProcess>> = None;

        let result = self.drive(&mut node, &mut report).await;

        if let Some(mut node) = node {
            self.shutdown(node.as_mut(), &mut report).await;
        }

        match result {
            Ok(()) => {
                report.enter(SessionState::ShutDown);
                info!("Session complete");
            }
            Err((step, error)) => {
                error!(step = step.step_name(), error = %error, "Session aborted");
                report.enter(SessionState::Aborted);
                report.termination = Termination::Aborted { step, error };
            }
        }
        report
    }

    async fn drive(
        &mut self,
        slot: &mut Option<Box<dyn NodeProcess>>,
        report: &mut SessionReport,
    ) -> Result<(), (SessionState, SessionError)> {
        let interrupt = self.interrupt.clone();

        // Stale instances hold the ports the new node needs
        let outcome = self.reaper.reap(&self.commands.node_pattern()).await;
        report.reaped = outcome.signaled;
        self.check_interrupt().map_err(at(SessionState::Reaped))?;
        report.enter(SessionState::Reaped);

        if self.config.run_init {
            info!("=== 1) Node initialization ===");
            let init = self.commands.node_init();
            let output = interruptible(interrupt.clone(), async {
                self.runner
                    .run_one_shot(&init, self.config.init_timeout)
                    .await
                    .map_err(SessionError::Init)
            })
            .await
            .map_err(at(SessionState::Initialized))?;
            log_output("init", &output);
            report.enter(SessionState::Initialized);
        }

        info!("=== 2) Starting node ===");
        let run = self.commands.node_run();
        let node = slot.insert(
            self.launcher
                .spawn(&run)
                .map_err(at(SessionState::NodeSpawned))?,
        );
        info!(pid = ?node.pid(), command = %run, "Node spawned");
        report.enter(SessionState::NodeSpawned);

        interruptible(
            interrupt.clone(),
            node.await_ready(&self.config.ready_marker, self.config.ready_timeout),
        )
        .await
        .map_err(at(SessionState::NodeReady))?;
        info!("Node is ready");
        report.enter(SessionState::NodeReady);

        info!("=== 3) Getting Context ID ===");
        let context: ContextId = self
            .discover(TokenKind::Context, &self.commands.context_ls())
            .await
            .map_err(at(SessionState::ContextKnown))?
            .into();
        info!(context = %context, "Context ID");
        report.context = Some(context.clone());
        report.enter(SessionState::ContextKnown);

        info!("=== 4) Getting Identity ID ===");
        let token = self
            .discover(TokenKind::Identity, &self.commands.identity_ls(&context))
            .await
            .map_err(at(SessionState::IdentityKnown))?;
        let identity = IdentityId::new(token, context);
        info!(identity = %identity, "Identity ID");
        report.identity = Some(identity.clone());
        report.enter(SessionState::IdentityKnown);

        info!("=== 5) Executing commands ===");
        let seed = self.seed.payload();
        report.seed = Some(seed.clone());
        let calls = [
            (ContractCall::SetSeed(seed), SessionState::SeedSet),
            (
                ContractCall::ProcessValue {
                    node: self.commands.node_name().to_string(),
                },
                SessionState::ValueProcessed,
            ),
            (ContractCall::GetLastValue, SessionState::ValueFetched),
        ];
        for (call, state) in calls {
            self.check_interrupt().map_err(at(state))?;
            let outcome = self.call(&identity, &call).await;
            if call == ContractCall::GetLastValue
                && let Ok(output) = &outcome.result
            {
                report.last_value = Some(output.text());
            }
            report.commands.push(outcome);
            report.enter(state);
        }

        Ok(())
    }

    /// Retries a listing command until `kind`'s rule matches its output.
    async fn discover(
        &self,
        kind: TokenKind,
        invocation: &Invocation,
    ) -> Result<ExtractedToken, SessionError> {
        let runner = self.runner.as_ref();
        let rule = self.rules.for_kind(kind);
        let timeout = self.config.discovery_timeout;

        let search = with_retry(&self.policy, move |attempt| {
            discover_once(runner, invocation, rule, timeout, attempt)
        });

        match interruptible(self.interrupt.clone(), async { Ok(search.await) }).await? {
            Ok(token) => Ok(token),
            Err(err) => {
                error!(kind = %kind, attempts = err.attempts, "Failed to get {} after {} attempts", kind, err.attempts);
                Err(SessionError::not_found(kind, err))
            }
        }
    }

    /// Runs one contract call; failures are reported, not propagated.
    async fn call(&self, identity: &IdentityId, call: &ContractCall) -> CommandOutcome {
        let invocation = self.commands.call(identity, call);
        let method = call.method();
        debug!(method, command = %invocation, "Calling contract method");

        let result = self
            .runner
            .run_one_shot(&invocation, self.config.command_timeout)
            .await;
        match &result {
            Ok(output) => {
                info!(method, "Call succeeded");
                log_output(method, output);
            }
            Err(e) => {
                warn!(method, error = %e, "Command execution failed");
                if let Some(output) = e.output() {
                    log_output(method, output);
                }
            }
        }

        CommandOutcome {
            method,
            invocation,
            result,
        }
    }

    /// Terminates the node exactly once, sending the shutdown line first if configured.
    async fn shutdown(&self, node: &mut dyn NodeProcess, report: &mut SessionReport) {
        info!("=== 6) Shutting down ===");

        if let Some(line) = &self.config.shutdown_line {
            match node.send_line(line).await {
                Ok(()) => match node.read_for(self.config.terminate_grace).await {
                    Ok(output) => log_output("node", &output),
                    Err(e) => debug!(error = %e, "Reading node output after shutdown line failed"),
                },
                Err(e) => debug!(error = %e, "Could not write shutdown line to node"),
            }
        }

        match node.terminate().await {
            Ok(code) => {
                debug!(exit_code = ?code, "Node terminated");
                report.node_exit_code = code;
            }
            Err(e) => warn!(error = %e, "Failed to terminate node cleanly"),
        }
    }

    fn check_interrupt(&self) -> Result<(), SessionError> {
        match &self.interrupt {
            Some(rx) if *rx.borrow() => Err(SessionError::Interrupted),
            _ => Ok(()),
        }
    }
}

/// One discovery attempt. Client failures count as "no value yet".
async fn discover_once(
    runner: &dyn CommandRunner,
    invocation: &Invocation,
    rule: &ExtractionRule,
    timeout: Duration,
    attempt: u32,
) -> Option<ExtractedToken> {
    match runner.run_one_shot(invocation, timeout).await {
        Ok(output) => {
            let token = extract_token(&output, rule);
            if token.is_none() {
                debug!(attempt, kind = %rule.kind(), lines = output.lines().len(), "No matching row yet");
            }
            token
        }
        Err(e) => {
            warn!(attempt, kind = %rule.kind(), error = %e, "Discovery command failed");
            None
        }
    }
}

/// Races `fut` against the interrupt flag.
async fn interruptible<T, F>(
    interrupt: Option<watch::Receiver<bool>>,
    fut: F,
) -> Result<T, SessionError>
where
    F: Future<Output = Result<T, SessionError>>,
{
    tokio::select! {
        result = fut => result,
        () = wait_for_interrupt(interrupt) => Err(SessionError::Interrupted),
    }
}

async fn wait_for_interrupt(interrupt: Option<watch::Receiver<bool>>) {
    if let Some(mut rx) = interrupt
        && rx.wait_for(|&interrupted| interrupted).await.is_ok()
    {
        return;
    }
    // No interrupt source, or its sender is gone
    std::future::pending::<()>().await;
}

fn at(step: SessionState) -> impl FnOnce(SessionError) -> (SessionState, SessionError) {
    move |error| (step, error)
}

fn log_output(label: &str, output: &CapturedOutput) {
    for line in output.lines() {
        debug!(target: "qrand::client", "[{}] {}", label, line);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_names() {
        assert_eq!(SessionState::NodeReady.to_string(), "node_ready");
        assert_eq!(SessionState::ContextKnown.step_name(), "context discovery");
    }

    #[test]
    fn test_session_config_from_defaults() {
        let config = SessionConfig::from_config(&QrandConfig::default());
        assert_eq!(config.ready_timeout, Duration::from_secs(15));
        assert_eq!(config.command_timeout, Duration::from_secs(15));
        assert_eq!(config.discovery_timeout, Duration::from_secs(10));
        assert_eq!(config.reap_grace, Duration::from_secs(2));
        assert!(config.run_init);
        assert!(config.shutdown_line.is_none());
    }

    #[tokio::test]
    async fn test_interruptible_passes_through_without_interrupt() {
        let result = interruptible(None, async { Ok::<_, SessionError>(7) }).await;
        assert_eq!(result.unwrap(), 7);
    }

    #[tokio::test(start_paused = true)]
    async fn test_interruptible_aborts_pending_future() {
        let (tx, rx) = watch::channel(false);
        let slow = async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok::<_, SessionError>(())
        };
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            let _ = tx.send(true);
        });
        let result = interruptible(Some(rx), slow).await;
        assert!(matches!(result, Err(SessionError::Interrupted)));
    }

    #[tokio::test]
    async fn test_dropped_interrupt_sender_never_fires() {
        let (tx, rx) = watch::channel(false);
        drop(tx);
        let result = interruptible(Some(rx), async { Ok::<_, SessionError>("done") }).await;
        assert_eq!(result.unwrap(), "done");
    }
}
