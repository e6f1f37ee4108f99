use crate::cache::LineState;

use super::{make_sets, MakeS, Replace, Request, Victim};

/// True LRU kept as a stack position per line: 0 is MRU, `n_ways - 1` is LRU.
pub struct Lru {
    sets: Vec<LruSetData>,
}

impl Lru {
    pub fn new(n_sets: usize, n_ways: usize) -> Self {
        Lru {
            sets: make_sets(n_sets, n_ways),
        }
    }

    #[cfg(test)]
    pub fn set(&self, set: usize) -> &LruSetData {
        &self.sets[set]
    }
}

impl Replace for Lru {
    fn victim(&mut self, set: usize, _lines: &[LineState], _req: &Request) -> Victim {
        Victim::Way(self.sets[set].lru_way())
    }

    fn update(&mut self, set: usize, way: usize, _line: &LineState, _req: &Request, _hit: bool) {
        self.sets[set].touch(way);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LruSetData {
    stack_pos: Vec<usize>,
}

impl MakeS for LruSetData {
    fn new(n_ways: usize) -> Self {
        LruSetData {
            stack_pos: (0..n_ways).collect(),
        }
    }
}

impl LruSetData {
    #[cfg(test)]
    pub fn positions(&self) -> &[usize] {
        &self.stack_pos
    }

    fn lru_way(&self) -> usize {
        let bottom = self.stack_pos.len() - 1;
        self.stack_pos
            .iter()
            .position(|&pos| pos == bottom)
            .unwrap_or(0)
    }

    fn touch(&mut self, way: usize) {
        let old_pos = self.stack_pos[way];
        for pos in self.stack_pos.iter_mut().filter(|pos| **pos < old_pos) {
            *pos += 1;
        }
        self.stack_pos[way] = 0;
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn initial_victim_is_last_way() {
        let set = LruSetData::new(4);
        assert_eq!(set.lru_way(), 3);
    }

    #[test]
    fn reaccess_moves_line_to_mru() {
        let mut set = LruSetData::new(4);
        for way in 0..4 {
            set.touch(way);
        }
        assert_eq!(set.positions(), &[3, 2, 1, 0]);
        assert_eq!(set.lru_way(), 0);

        set.touch(0);
        assert_eq!(set.positions(), &[0, 3, 2, 1]);
        assert_eq!(set.lru_way(), 1);

        // Touching the MRU line changes nothing.
        set.touch(0);
        assert_eq!(set.positions(), &[0, 3, 2, 1]);
    }

    #[test]
    fn sets_are_independent() {
        let mut lru = Lru::new(2, 4);
        let line = LineState::default();
        let req = crate::replace::tests::req(0);
        for way in 0..4 {
            lru.update(0, way, &line, &req, false);
        }
        assert_eq!(lru.victim(0, &[line; 4], &req), Victim::Way(0));
        assert_eq!(lru.victim(1, &[line; 4], &req), Victim::Way(3));
    }

    proptest! {
        #[test]
        fn positions_stay_a_permutation(
            n_ways in 1usize..17,
            touches in prop::collection::vec(0usize..16, 0..200),
        ) {
            let mut set = LruSetData::new(n_ways);
            for way in touches.into_iter().map(|w| w % n_ways) {
                set.touch(way);
                prop_assert_eq!(set.positions()[way], 0);
                let mut sorted = set.positions().to_vec();
                sorted.sort_unstable();
                prop_assert_eq!(sorted, (0..n_ways).collect::<Vec<_>>());
            }
        }
    }
}
