//! Testing utilities for deterministic session tests.
//!
//! Fakes stand in for the OS process table, the node process, and the control
//! client so a whole session can run under tokio's paused clock.

pub mod fake_node;
pub mod fake_process_table;
pub mod scripted_runner;

pub use fake_node::{FakeLauncher, FakeNode, NodeBehavior};
pub use fake_process_table::FakeProcessTable;
pub use scripted_runner::{ScriptedResponse, ScriptedRunner};

use qrand_proto::RandomBits;

/// Random bit source that replays fixed bytes, MSB first, then zeros.
#[derive(Debug, Clone)]
pub struct FixedBits {
    bits: Vec<bool>,
}

impl FixedBits {
    pub fn from_bytes(bytes: &[u8]) -> Self {
        let bits = bytes
            .iter()
            .flat_map(|byte| (0..8).rev().map(move |shift| (byte >> shift) & 1 == 1))
            .collect();
        Self { bits }
    }
}

impl RandomBits for FixedBits {
    fn random_bits(&mut self, n: usize) -> Vec<bool> {
        (0..n).map(|i| self.bits.get(i).copied().unwrap_or(false)).collect()
    }
}
