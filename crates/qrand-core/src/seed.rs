//! Seed selection for the `set_seed` call.

use qrand_proto::{RandomBits, SeedPayload};

/// Produces the seed payload for a session.
pub enum SeedProvider {
    /// The same configured values every session.
    Fixed(SeedPayload),
    /// Fresh bits from a random source, packed into `count` values.
    Random {
        source: Box<dyn RandomBits>,
        count: usize,
    },
}

impl SeedProvider {
    /// Builds the payload. Called once per session.
    pub fn payload(&mut self) -> SeedPayload {
        match self {
            SeedProvider::Fixed(payload) => payload.clone(),
            SeedProvider::Random { source, count } => SeedPayload::generate(source.as_mut(), *count),
        }
    }
}

impl Default for SeedProvider {
    fn default() -> Self {
        SeedProvider::Fixed(SeedPayload::new(vec![10, 20, 30, 40]))
    }
}

impl std::fmt::Debug for SeedProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SeedProvider::Fixed(payload) => f.debug_tuple("Fixed").field(payload).finish(),
            SeedProvider::Random { count, .. } => {
                f.debug_struct("Random").field("count", count).finish_non_exhaustive()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FixedBits;

    #[test]
    fn test_default_is_observed_payload() {
        let mut provider = SeedProvider::default();
        assert_eq!(provider.payload().values(), [10, 20, 30, 40]);
    }

    #[test]
    fn test_random_provider_packs_bits() {
        let mut provider = SeedProvider::Random {
            source: Box::new(FixedBits::from_bytes(&[0xAB, 0x01])),
            count: 2,
        };
        assert_eq!(provider.payload().values(), [0xAB, 0x01]);
    }
}
