//! Seed payloads and the random bit capability behind them.

use serde::{Deserialize, Serialize};

/// Source of random bits.
///
/// The quantum generator is an external routine; a session only needs
/// "give me N random bits".
pub trait RandomBits: Send {
    fn random_bits(&mut self, n: usize) -> Vec<bool>;
}

/// Small fixed-shape integer sequence passed to `set_seed`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SeedPayload(Vec<u8>);

impl SeedPayload {
    pub fn new(values: Vec<u8>) -> Self {
        Self(values)
    }

    /// Draws `count` bytes' worth of bits and packs them MSB-first.
    pub fn generate(source: &mut dyn RandomBits, count: usize) -> Self {
        let bits = source.random_bits(count * 8);
        Self::from_bits(&bits, count)
    }

    /// Packs bits MSB-first into `count` values. Missing bits read as zero.
    pub fn from_bits(bits: &[bool], count: usize) -> Self {
        let values = (0..count)
            .map(|i| {
                (0..8).fold(0u8, |acc, j| {
                    let bit = bits.get(i * 8 + j).copied().unwrap_or(false);
                    (acc << 1) | u8::from(bit)
                })
            })
            .collect();
        Self(values)
    }

    pub fn values(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}
