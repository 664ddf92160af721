//! # qrand-core
//!
//! Session orchestration for qrand.
//!
//! This crate provides:
//! - The session pipeline that drives a node and its control client
//! - Configuration loading and validation
//! - Identifier extraction from client listing output
//! - Bounded retry for discovery
//! - Stale-instance cleanup
//! - Seed payload selection
//! - Fakes for testing sessions without real processes

mod commands;
mod config;
mod extractor;
mod reaper;
mod retry;
mod seed;
mod session;
pub mod testing;

pub use commands::{CommandSet, ContractCall};
pub use config::{
    ConfigError, ConfigWarning, ExtractionConfig, NodeConfig, QrandConfig, RetryConfig,
    SeedConfig, SeedSourceKind, TerminalConfig, TimeoutConfig,
};
pub use extractor::{ExtractionRule, ExtractionRules, extract_token};
pub use reaper::{ReapOutcome, Reaper};
pub use retry::{RetryPolicy, with_retry};
pub use seed::SeedProvider;
pub use session::{
    CommandOutcome, Session, SessionConfig, SessionDeps, SessionReport, SessionState, Termination,
};
