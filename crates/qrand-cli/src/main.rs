//! # qrand-cli
//!
//! Binary entry point for qrand.
//!
//! This crate provides:
//! - CLI argument parsing using `clap`
//! - Configuration loading with command-line overrides
//! - Wiring of the OS adapters into a session
//! - Signal handling and process exit codes
//! - The `reap` and `extract` maintenance commands

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use qrand_adapters::{ClientExecutor, OsRandomBits, PtyConfig, PtyLauncher, SystemProcessTable};
use qrand_core::{
    CommandSet, ContractCall, QrandConfig, Reaper, SeedProvider, SeedSourceKind, Session,
    SessionDeps, SessionReport, Termination, extract_token,
};
use qrand_proto::{
    CapturedOutput, ContextId, ExtractedToken, IdentityId, SeedPayload, TokenKind,
};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, warn};

/// Exit code of `extract` when no row matches.
const EXIT_NO_MATCH: i32 = 3;

/// qrand - drives a node and its control client through the quantum seed pipeline
#[derive(Parser, Debug)]
#[command(name = "qrand", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Path to configuration file
    #[arg(short, long, default_value = "qrand.yml", global = true)]
    config: PathBuf,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run a full session (default if no subcommand given)
    Run(RunArgs),

    /// Terminate stale node instances and exit
    Reap,

    /// Apply an extraction rule to saved client output
    Extract(ExtractArgs),
}

#[derive(Parser, Debug, Default)]
struct RunArgs {
    /// Override node name
    #[arg(long)]
    node_name: Option<String>,

    /// Override node executable
    #[arg(long)]
    node_binary: Option<String>,

    /// Override control-client executable
    #[arg(long)]
    client_binary: Option<String>,

    /// Skip `init` before starting the node
    #[arg(long)]
    skip_init: bool,

    /// Readiness timeout in seconds
    #[arg(long)]
    ready_timeout: Option<u64>,

    /// Where seed values come from
    #[arg(long, value_enum)]
    seed_source: Option<SeedSourceArg>,

    /// Fixed seed values, comma-separated (implies --seed-source fixed)
    #[arg(long, value_delimiter = ',', conflicts_with = "seed_source")]
    seed: Option<Vec<u8>>,

    /// Print the resolved invocations without executing anything
    #[arg(long)]
    dry_run: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum SeedSourceArg {
    Fixed,
    Random,
}

impl From<SeedSourceArg> for SeedSourceKind {
    fn from(arg: SeedSourceArg) -> Self {
        match arg {
            SeedSourceArg::Fixed => SeedSourceKind::Fixed,
            SeedSourceArg::Random => SeedSourceKind::Random,
        }
    }
}

#[derive(Parser, Debug)]
struct ExtractArgs {
    /// Which rule to apply
    #[arg(long, value_enum)]
    rule: RuleArg,

    /// File holding client output (stdin when omitted)
    file: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum RuleArg {
    Context,
    Identity,
}

impl From<RuleArg> for TokenKind {
    fn from(arg: RuleArg) -> Self {
        match arg {
            RuleArg::Context => TokenKind::Context,
            RuleArg::Identity => TokenKind::Identity,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging; RUST_LOG takes precedence
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new(if cli.verbose { "debug" } else { "info" })
    });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Some(Commands::Run(args)) => run_command(&cli.config, args).await,
        Some(Commands::Reap) => reap_command(&cli.config).await,
        Some(Commands::Extract(args)) => extract_command(&cli.config, &args),
        None => run_command(&cli.config, RunArgs::default()).await,
    }
}

/// Loads the config file, falling back to defaults when it does not exist.
fn load_config(path: &Path) -> Result<QrandConfig> {
    if path.exists() {
        QrandConfig::from_file(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))
    } else {
        warn!("Config file {} not found, using defaults", path.display());
        Ok(QrandConfig::default())
    }
}

/// Rejects invalid configuration and prints warnings to stderr.
fn validate_config(config: &QrandConfig) -> Result<()> {
    let warnings = config.validate().context("Configuration validation failed")?;
    for warning in &warnings {
        eprintln!("{warning}");
    }
    Ok(())
}

fn apply_overrides(config: &mut QrandConfig, args: &RunArgs) {
    if let Some(name) = &args.node_name {
        config.node.name.clone_from(name);
    }
    if let Some(binary) = &args.node_binary {
        config.node.node_binary.clone_from(binary);
    }
    if let Some(binary) = &args.client_binary {
        config.node.client_binary.clone_from(binary);
    }
    if args.skip_init {
        config.node.init = false;
    }
    if let Some(secs) = args.ready_timeout {
        config.timeouts.ready = secs;
    }
    if let Some(source) = args.seed_source {
        config.seed.source = source.into();
    }
    if let Some(values) = &args.seed {
        config.seed.source = SeedSourceKind::Fixed;
        config.seed.count = values.len();
        config.seed.values.clone_from(values);
    }
}

async fn run_command(config_path: &Path, args: RunArgs) -> Result<()> {
    let mut config = load_config(config_path)?;
    apply_overrides(&mut config, &args);

    validate_config(&config)?;

    if args.dry_run {
        print_dry_run(&config);
        return Ok(());
    }

    let (interrupt_tx, interrupt_rx) = watch::channel(false);
    spawn_signal_handlers(interrupt_tx);

    let seed = match config.seed.source {
        SeedSourceKind::Fixed => SeedProvider::Fixed(SeedPayload::new(config.seed.values.clone())),
        SeedSourceKind::Random => SeedProvider::Random {
            source: Box::new(OsRandomBits),
            count: config.seed.count,
        },
    };

    let launcher = PtyLauncher::new(PtyConfig {
        cols: config.pty.cols,
        rows: config.pty.rows,
        echo_output: config.node.echo_output,
        terminate_grace: Duration::from_secs(config.timeouts.terminate_grace),
    });

    let session = Session::new(
        &config,
        SessionDeps {
            launcher: Arc::new(launcher),
            runner: Arc::new(ClientExecutor::new()),
            process_table: Arc::new(SystemProcessTable::new()),
            seed,
        },
    )
    .context("Failed to set up session")?
    .with_interrupt(interrupt_rx);

    let report = session.run().await;
    print_report(&report);

    let exit_code = report.exit_code();
    if exit_code != 0 {
        std::process::exit(exit_code);
    }
    Ok(())
}

/// One stderr line per contract call that failed.
fn command_failures(report: &SessionReport) -> Vec<String> {
    report
        .failed_commands()
        .filter_map(|outcome| {
            outcome
                .result
                .as_ref()
                .err()
                .map(|e| format!("Command execution failed: {}: {e}", outcome.method))
        })
        .collect()
}

fn print_report(report: &SessionReport) {
    for line in command_failures(report) {
        eprintln!("{line}");
    }

    if let Some(value) = &report.last_value {
        println!("Last value: {value}");
    }

    if let Termination::Aborted { step, error } = &report.termination {
        eprintln!("Error during {}: {error}", step.step_name());
    }
    debug!(states = ?report.states, node_exit_code = ?report.node_exit_code, "Session report");
}

fn print_dry_run(config: &QrandConfig) {
    let commands = CommandSet::new(&config.node);
    let context = ContextId::from(ExtractedToken::new("<context-id>"));
    let identity = IdentityId::new(ExtractedToken::new("<identity-id>"), context.clone());

    println!("Dry run mode - invocations:");
    println!("  Reap pattern: {}", commands.node_pattern());
    if config.node.init {
        println!("  Init: {}", commands.node_init());
    }
    println!("  Node: {}", commands.node_run());
    println!("  Ready marker: {}", config.node.ready_marker);
    println!("  Context: {}", commands.context_ls());
    println!("  Identity: {}", commands.identity_ls(&context));

    let seed = match config.seed.source {
        SeedSourceKind::Fixed => SeedPayload::new(config.seed.values.clone()),
        // Placeholder of the right length; real values are drawn per session
        SeedSourceKind::Random => SeedPayload::new(vec![0; config.seed.count]),
    };
    let calls = [
        ContractCall::SetSeed(seed),
        ContractCall::ProcessValue {
            node: commands.node_name().to_string(),
        },
        ContractCall::GetLastValue,
    ];
    for call in &calls {
        println!("  Call: {}", commands.call(&identity, call));
    }
    println!(
        "  Retry: {} attempts, {}s apart",
        config.retry.max_attempts, config.retry.delay_secs
    );
}

/// Flags the session as interrupted on SIGINT or SIGTERM.
fn spawn_signal_handlers(interrupt_tx: watch::Sender<bool>) {
    let interrupt_tx = Arc::new(interrupt_tx);

    let sigint_tx = Arc::clone(&interrupt_tx);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received (SIGINT), shutting down...");
            sigint_tx.send_replace(true);
        }
    });

    #[cfg(unix)]
    {
        let sigterm_tx = Arc::clone(&interrupt_tx);
        tokio::spawn(async move {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    sigterm.recv().await;
                    warn!("SIGTERM received, shutting down...");
                    sigterm_tx.send_replace(true);
                }
                Err(e) => warn!(error = %e, "Failed to register SIGTERM handler"),
            }
        });
    }
}

async fn reap_command(config_path: &Path) -> Result<()> {
    let config = load_config(config_path)?;
    validate_config(&config)?;
    let commands = CommandSet::new(&config.node);
    let reaper = Reaper::new(
        Arc::new(SystemProcessTable::new()),
        Duration::from_secs(config.timeouts.reap_grace),
    );

    let outcome = reaper.reap(&commands.node_pattern()).await;
    if outcome.found_any() {
        println!("Terminated {} stale node process(es)", outcome.signaled.len());
    } else {
        println!("No stale node process found");
    }
    Ok(())
}

fn extract_command(config_path: &Path, args: &ExtractArgs) -> Result<()> {
    let config = load_config(config_path)?;
    validate_config(&config)?;
    let rules = config
        .extraction_rules()
        .context("Invalid extraction settings")?;
    let text = match &args.file {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?,
        None => {
            let mut text = String::new();
            std::io::stdin()
                .read_to_string(&mut text)
                .context("Failed to read stdin")?;
            text
        }
    };

    let kind = TokenKind::from(args.rule);
    match extract_token(&CapturedOutput::from_text(&text), rules.for_kind(kind)) {
        Some(token) => {
            println!("{token}");
            Ok(())
        }
        None => {
            eprintln!("No {kind} found");
            std::process::exit(EXIT_NO_MATCH);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use qrand_core::{CommandOutcome, SessionState};
    use qrand_proto::{ExecError, Invocation};

    #[test]
    fn test_overrides_apply() {
        let mut config = QrandConfig::default();
        let args = RunArgs {
            node_name: Some("node7".to_string()),
            skip_init: true,
            ready_timeout: Some(60),
            seed: Some(vec![1, 2]),
            ..RunArgs::default()
        };
        apply_overrides(&mut config, &args);
        assert_eq!(config.node.name, "node7");
        assert!(!config.node.init);
        assert_eq!(config.timeouts.ready, 60);
        assert_eq!(config.seed.values, [1, 2]);
        assert_eq!(config.seed.count, 2);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_seed_source_override() {
        let mut config = QrandConfig::default();
        let args = RunArgs {
            seed_source: Some(SeedSourceArg::Random),
            ..RunArgs::default()
        };
        apply_overrides(&mut config, &args);
        assert_eq!(config.seed.source, SeedSourceKind::Random);
        assert!(config.validate().unwrap().is_empty());
    }

    #[test]
    fn test_failed_set_seed_is_reported() {
        let outcome =
            |method: &'static str, result: Result<CapturedOutput, ExecError>| CommandOutcome {
                method,
                invocation: Invocation::new("meroctl").arg(method),
                result,
            };
        let report = SessionReport {
            states: vec![SessionState::Init, SessionState::ShutDown],
            reaped: Vec::new(),
            context: None,
            identity: None,
            seed: None,
            commands: vec![
                outcome(
                    "set_seed",
                    Err(ExecError::Status {
                        program: "meroctl".to_string(),
                        code: Some(2),
                        output: CapturedOutput::from_text("bad args"),
                    }),
                ),
                outcome("process_value", Ok(CapturedOutput::default())),
            ],
            last_value: None,
            node_exit_code: Some(0),
            termination: Termination::Completed,
        };

        assert_eq!(
            command_failures(&report),
            ["Command execution failed: set_seed: `meroctl` exited with status 2"]
        );
        assert_eq!(report.exit_code(), 0);
    }

    #[test]
    fn test_cli_parses_seed_list() {
        let cli = Cli::parse_from(["qrand", "run", "--seed", "5,6,7"]);
        match cli.command {
            Some(Commands::Run(args)) => assert_eq!(args.seed, Some(vec![5, 6, 7])),
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_cli_defaults_to_run() {
        let cli = Cli::parse_from(["qrand", "--verbose"]);
        assert!(cli.command.is_none());
        assert!(cli.verbose);
        assert_eq!(cli.config, PathBuf::from("qrand.yml"));
    }
}
