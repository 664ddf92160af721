use qrand_proto::RandomBits;
use rand::Rng;

/// Random bits from the thread-local OS-seeded generator.
#[derive(Debug, Clone, Copy, Default)]
pub struct OsRandomBits;

impl RandomBits for OsRandomBits {
    fn random_bits(&mut self, n: usize) -> Vec<bool> {
        let mut rng = rand::rng();
        (0..n).map(|_| rng.random::<bool>()).collect()
    }
}
