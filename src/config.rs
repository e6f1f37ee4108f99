use serde::Deserialize;
use tracing::debug;

use crate::{
    cache::{self, Cache},
    error::Result,
    replace::{ReplPolicy, ReplacementState},
};

#[derive(Deserialize)]
struct CacheConfig {
    name: String,
    sets: usize,
    ways: usize,
    /// Policy name or numeric selector (`0` lru, `1` random, `2` lirs, `3` fifo).
    repl: String,
    #[serde(default)]
    seed: Option<u64>,
}

/// Cache hierarchy, closest level first.
#[derive(Deserialize)]
pub struct Config {
    block_size: usize,
    caches: Vec<CacheConfig>,
}

impl Config {
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn to_caches(self) -> Result<Vec<Cache>> {
        let block_size = self.block_size;
        self.caches
            .into_iter()
            .map(|cc| {
                let policy: ReplPolicy = cc.repl.parse()?;
                cache::check_geometry(&cc.name, block_size, cc.sets, cc.ways)?;
                debug!(name = %cc.name, sets = cc.sets, ways = cc.ways, %policy, "building cache");

                let mut repl = ReplacementState::new(cc.sets, cc.ways, policy);
                if let Some(seed) = cc.seed {
                    repl = repl.with_seed(seed);
                }
                Cache::new(cc.name, block_size, cc.sets, cc.ways, repl)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SimError;

    const HIERARCHY: &str = r#"{
        "block_size": 64,
        "caches": [
            { "name": "L1D", "sets": 64, "ways": 8, "repl": "lru" },
            { "name": "L2", "sets": 512, "ways": 8, "repl": "3" },
            { "name": "LLC", "sets": 1024, "ways": 16, "repl": "2", "seed": 9 }
        ]
    }"#;

    #[test]
    fn builds_hierarchy_in_order() {
        let caches = Config::from_json(HIERARCHY).unwrap().to_caches().unwrap();
        let summary: Vec<_> = caches
            .iter()
            .map(|c| (c.name().to_owned(), c.n_sets, c.n_ways, c.repl().policy()))
            .collect();
        assert_eq!(
            summary,
            vec![
                ("L1D".to_owned(), 64, 8, ReplPolicy::Lru),
                ("L2".to_owned(), 512, 8, ReplPolicy::Fifo),
                ("LLC".to_owned(), 1024, 16, ReplPolicy::Contestant),
            ]
        );
    }

    #[test]
    fn unknown_policy_is_an_error() {
        let json = r#"{ "block_size": 64, "caches": [
            { "name": "L1", "sets": 4, "ways": 4, "repl": "nmru" } ] }"#;
        let err = Config::from_json(json).unwrap().to_caches().err();
        assert!(matches!(err, Some(SimError::UnknownPolicy(p)) if p == "nmru"));
    }

    #[test]
    fn zero_sets_is_rejected_before_allocation() {
        let json = r#"{ "block_size": 64, "caches": [
            { "name": "L1", "sets": 0, "ways": 4, "repl": "lru" } ] }"#;
        let err = Config::from_json(json).unwrap().to_caches().err();
        assert!(matches!(err, Some(SimError::InvalidGeometry { .. })));
    }

    #[test]
    fn malformed_json_is_an_error() {
        assert!(matches!(
            Config::from_json("{ \"block_size\": 64 }"),
            Err(SimError::Json(_))
        ));
    }
}
