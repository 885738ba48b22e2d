use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

const KEYSPACE: &[u8] = b"abcdefghijklmnopqrstuvwxyz";

/// Length used for bundle ids, file ids, and storage keys. 26^12 keys is
/// enough to make collisions across the live dataset negligible while
/// staying short enough for a URL.
pub const GENERATED_ID_LENGTH: usize = 12;

/// Produces fixed-length identifiers from a lowercase alphabet.
///
/// Keys are identifiers, not secrets, so the generator only needs an
/// unpredictable seed, not a cryptographically strong stream. `StdRng`
/// seeded from OS entropy covers both.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeyGenerator;

impl KeyGenerator {
    pub fn generate(&self, length: usize) -> String {
        let mut prng = StdRng::from_entropy();
        (0..length)
            .map(|_| KEYSPACE[prng.gen_range(0..KEYSPACE.len())] as char)
            .collect()
    }

    pub fn generate_id(&self) -> String {
        self.generate(GENERATED_ID_LENGTH)
    }
}
