use crate::cache::LineState;

use super::{Replace, Request, Victim};

/// Uniform random victim. Keeps no per-set state.
pub struct Random {
    n_ways: usize,
    rng: fastrand::Rng,
}

impl Random {
    pub fn new(n_ways: usize) -> Self {
        Random {
            n_ways,
            rng: fastrand::Rng::new(),
        }
    }

    pub fn with_seed(n_ways: usize, seed: u64) -> Self {
        Random {
            n_ways,
            rng: fastrand::Rng::with_seed(seed),
        }
    }
}

impl Replace for Random {
    fn victim(&mut self, _set: usize, _lines: &[LineState], _req: &Request) -> Victim {
        Victim::Way(self.rng.usize(0..self.n_ways))
    }

    fn update(&mut self, _set: usize, _way: usize, _line: &LineState, _req: &Request, _hit: bool) {}
}
