use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Source of the register values a chip wakes up with.
///
/// In the default mode every field gets its documented default so runs are
/// reproducible. In randomized mode the generator is seeded once per session
/// and every request draws a fresh byte, which exposes games that depend on
/// uninitialized mapper state.
#[derive(Debug, Clone)]
pub struct PowerOnGenerator {
    rng: Option<StdRng>,
}

impl Default for PowerOnGenerator {
    fn default() -> Self {
        Self::deterministic()
    }
}

impl PowerOnGenerator {
    pub fn deterministic() -> Self {
        Self { rng: None }
    }

    pub fn randomized(seed: Option<u64>) -> Self {
        let seed = seed.unwrap_or_else(rand::random);
        log::debug!("power-on state randomized with seed {seed:#018X}");
        Self {
            rng: Some(StdRng::seed_from_u64(seed)),
        }
    }

    pub fn is_randomized(&self) -> bool {
        self.rng.is_some()
    }

    /// Next power-on byte: `default` unless randomization is enabled.
    pub fn byte(&mut self, default: u8) -> u8 {
        match self.rng.as_mut() {
            Some(rng) => rng.random(),
            None => default,
        }
    }

    /// Next power-on byte with a zero default.
    pub fn next(&mut self) -> u8 {
        self.byte(0)
    }
}
