pub mod fifo;
pub mod lirs;
pub mod lru;
pub mod random;

use std::{fmt, io, iter, str::FromStr};

use serde::Serialize;
use tracing::debug;

use crate::{
    cache::{AccessType, LineState},
    error::SimError,
};

use self::{fifo::Fifo, lirs::Lirs, lru::Lru, random::Random};

/// Per-set replacement bookkeeping, built once per set at construction.
pub trait MakeS {
    fn new(n_ways: usize) -> Self;
}

pub(crate) fn make_sets<S: MakeS>(n_sets: usize, n_ways: usize) -> Vec<S> {
    iter::repeat_with(|| S::new(n_ways)).take(n_sets).collect()
}

/// Metadata the simulator hands over with every access.
#[derive(Debug, Clone, Copy)]
pub struct Request {
    pub tid: u32,
    pub pc: u64,
    pub paddr: u64,
    pub kind: AccessType,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Victim {
    Way(usize),
    /// Do not install the incoming line in this cache.
    Bypass,
}

pub enum AccessResult {
    Hit,
    Miss,
}

/// One replacement policy. `victim` is only asked on a miss into a full set,
/// `update` follows every access with the way that ended up holding the line.
pub trait Replace {
    fn victim(&mut self, set: usize, lines: &[LineState], req: &Request) -> Victim;
    fn update(&mut self, set: usize, way: usize, line: &LineState, req: &Request, hit: bool);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ReplPolicy {
    Lru = 0,
    Random = 1,
    /// The LIRS engine.
    Contestant = 2,
    Fifo = 3,
}

impl TryFrom<u32> for ReplPolicy {
    type Error = SimError;

    fn try_from(sel: u32) -> Result<Self, Self::Error> {
        match sel {
            0 => Ok(ReplPolicy::Lru),
            1 => Ok(ReplPolicy::Random),
            2 => Ok(ReplPolicy::Contestant),
            3 => Ok(ReplPolicy::Fifo),
            _ => Err(SimError::UnknownPolicy(sel.to_string())),
        }
    }
}

impl FromStr for ReplPolicy {
    type Err = SimError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Ok(sel) = s.parse::<u32>() {
            return ReplPolicy::try_from(sel);
        }
        match s.to_ascii_lowercase().as_str() {
            "lru" => Ok(ReplPolicy::Lru),
            "random" | "rand" => Ok(ReplPolicy::Random),
            "lirs" | "contestant" => Ok(ReplPolicy::Contestant),
            "fifo" => Ok(ReplPolicy::Fifo),
            _ => Err(SimError::UnknownPolicy(s.to_owned())),
        }
    }
}

impl fmt::Display for ReplPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ReplPolicy::Lru => "lru",
            ReplPolicy::Random => "random",
            ReplPolicy::Contestant => "lirs",
            ReplPolicy::Fifo => "fifo",
        };
        f.write_str(name)
    }
}

/// Replacement state of one cache level. State for every policy is allocated
/// up front so the active policy can be switched at any point.
pub struct ReplacementState {
    n_sets: usize,
    n_ways: usize,
    policy: ReplPolicy,
    lru: Lru,
    random: Random,
    lirs: Lirs,
    fifo: Fifo,
    timer: u64,
}

impl ReplacementState {
    pub fn new(n_sets: usize, n_ways: usize, policy: ReplPolicy) -> Self {
        assert!(n_sets > 0, "replacement state needs at least one set");
        assert!(n_ways > 0, "replacement state needs at least one way");
        debug!(n_sets, n_ways, %policy, "allocating replacement state");
        ReplacementState {
            n_sets,
            n_ways,
            policy,
            lru: Lru::new(n_sets, n_ways),
            random: Random::new(n_ways),
            lirs: Lirs::new(n_sets, n_ways),
            fifo: Fifo::new(n_sets, n_ways),
            timer: 0,
        }
    }

    /// Reseeds the random policy so runs are reproducible.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.random = Random::with_seed(self.n_ways, seed);
        self
    }

    pub fn policy(&self) -> ReplPolicy {
        self.policy
    }

    pub fn set_replacement_policy(&mut self, policy: ReplPolicy) {
        self.policy = policy;
    }

    pub fn increment_timer(&mut self) {
        self.timer += 1;
    }

    pub fn timer(&self) -> u64 {
        self.timer
    }

    #[cfg(test)]
    pub fn lru(&self) -> &Lru {
        &self.lru
    }

    #[cfg(test)]
    pub fn lirs(&self) -> &Lirs {
        &self.lirs
    }

    fn active(&mut self) -> &mut dyn Replace {
        match self.policy {
            ReplPolicy::Lru => &mut self.lru,
            ReplPolicy::Random => &mut self.random,
            ReplPolicy::Contestant => &mut self.lirs,
            ReplPolicy::Fifo => &mut self.fifo,
        }
    }

    pub fn get_victim_in_set(&mut self, set: usize, lines: &[LineState], req: &Request) -> Victim {
        assert!(set < self.n_sets, "set {set} out of range ({} sets)", self.n_sets);
        assert_eq!(lines.len(), self.n_ways, "victim set has the wrong associativity");
        let n_ways = self.n_ways;
        let victim = self.active().victim(set, lines, req);
        if let Victim::Way(way) = victim {
            assert!(way < n_ways, "{} chose way {way} of {n_ways}", self.policy);
        }
        victim
    }

    pub fn update_replacement_state(
        &mut self,
        set: usize,
        way: usize,
        line: &LineState,
        req: &Request,
        hit: bool,
    ) {
        assert!(set < self.n_sets, "set {set} out of range ({} sets)", self.n_sets);
        assert!(way < self.n_ways, "way {way} out of range ({} ways)", self.n_ways);
        self.active().update(set, way, line, req, hit);
    }

    pub fn print_stats(&self, out: &mut dyn io::Write, verbose: bool) -> io::Result<()> {
        writeln!(out, "==========================================================")?;
        writeln!(out, "=========== Replacement Policy Statistics ================")?;
        writeln!(out, "==========================================================")?;
        writeln!(out, "policy: {}  references: {}", self.policy, self.timer)?;
        if self.policy == ReplPolicy::Contestant {
            self.lirs.write_stats(out, verbose)?;
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use rstest::rstest;

    use super::*;

    pub(crate) fn req(paddr: u64) -> Request {
        Request {
            tid: 0,
            pc: 0x400000,
            paddr,
            kind: AccessType::Load,
        }
    }

    pub(crate) fn line(tag: u64) -> LineState {
        LineState { valid: true, tag }
    }

    #[rstest]
    #[case("0", ReplPolicy::Lru)]
    #[case("1", ReplPolicy::Random)]
    #[case("2", ReplPolicy::Contestant)]
    #[case("3", ReplPolicy::Fifo)]
    #[case("LRU", ReplPolicy::Lru)]
    #[case("lirs", ReplPolicy::Contestant)]
    #[case("contestant", ReplPolicy::Contestant)]
    #[case("fifo", ReplPolicy::Fifo)]
    fn parses_selectors(#[case] input: &str, #[case] expected: ReplPolicy) {
        assert_eq!(input.parse::<ReplPolicy>().unwrap(), expected);
    }

    #[rstest]
    #[case("4")]
    #[case("plru")]
    #[case("")]
    fn rejects_unknown_selectors(#[case] input: &str) {
        assert!(matches!(
            input.parse::<ReplPolicy>(),
            Err(SimError::UnknownPolicy(_))
        ));
    }

    #[test]
    fn timer_counts_references() {
        let mut state = ReplacementState::new(4, 4, ReplPolicy::Lru);
        for _ in 0..5 {
            state.increment_timer();
        }
        assert_eq!(state.timer(), 5);
    }

    #[test]
    fn dispatches_to_the_active_policy() {
        let lines: Vec<_> = (0..4).map(line).collect();
        let mut state = ReplacementState::new(1, 4, ReplPolicy::Lru);
        for way in 0..4 {
            state.update_replacement_state(0, way, &lines[way], &req(0), false);
        }
        assert_eq!(state.get_victim_in_set(0, &lines, &req(0)), Victim::Way(0));

        // FIFO state was never fed, so it falls back to way 0 as well; touch
        // way 0 under LRU first so the two answers differ.
        state.update_replacement_state(0, 0, &lines[0], &req(0), true);
        assert_eq!(state.get_victim_in_set(0, &lines, &req(0)), Victim::Way(1));
        state.set_replacement_policy(ReplPolicy::Fifo);
        assert_eq!(state.policy(), ReplPolicy::Fifo);
        assert_eq!(state.get_victim_in_set(0, &lines, &req(0)), Victim::Way(0));
    }

    #[test]
    fn seeded_random_is_reproducible() {
        let lines: Vec<_> = (0..8).map(line).collect();
        let mut a = ReplacementState::new(1, 8, ReplPolicy::Random).with_seed(7);
        let mut b = ReplacementState::new(1, 8, ReplPolicy::Random).with_seed(7);
        for _ in 0..32 {
            let va = a.get_victim_in_set(0, &lines, &req(0));
            assert_eq!(va, b.get_victim_in_set(0, &lines, &req(0)));
            assert!(matches!(va, Victim::Way(w) if w < 8));
        }
    }

    #[test]
    #[should_panic(expected = "wrong associativity")]
    fn victim_rejects_mismatched_set_view() {
        let lines: Vec<_> = (0..2).map(line).collect();
        let mut state = ReplacementState::new(1, 4, ReplPolicy::Lru);
        state.get_victim_in_set(0, &lines, &req(0));
    }

    #[test]
    #[should_panic(expected = "at least one way")]
    fn zero_ways_is_fatal() {
        ReplacementState::new(1, 0, ReplPolicy::Lru);
    }

    #[test]
    fn stats_header_names_policy() {
        let state = ReplacementState::new(2, 4, ReplPolicy::Fifo);
        let mut out = Vec::new();
        state.print_stats(&mut out, false).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("Replacement Policy Statistics"));
        assert!(text.contains("policy: fifo"));
    }
}
