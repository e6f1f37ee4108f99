use std::collections::VecDeque;

use crate::cache::LineState;

use super::{make_sets, MakeS, Replace, Request, Victim};

/// Evicts in fill order. Hits leave the order untouched.
pub struct Fifo {
    sets: Vec<FifoSetData>,
}

impl Fifo {
    pub fn new(n_sets: usize, n_ways: usize) -> Self {
        Fifo {
            sets: make_sets(n_sets, n_ways),
        }
    }
}

impl Replace for Fifo {
    fn victim(&mut self, set: usize, _lines: &[LineState], _req: &Request) -> Victim {
        Victim::Way(self.sets[set].pop_oldest())
    }

    fn update(&mut self, set: usize, way: usize, _line: &LineState, _req: &Request, hit: bool) {
        if !hit {
            self.sets[set].filled(way);
        }
    }
}

#[derive(Debug, Default)]
pub struct FifoSetData {
    fill_order: VecDeque<u16>,
}

impl MakeS for FifoSetData {
    fn new(n_ways: usize) -> Self {
        FifoSetData {
            fill_order: VecDeque::with_capacity(n_ways),
        }
    }
}

impl FifoSetData {
    fn filled(&mut self, way: usize) {
        let way = way as u16;
        if let Some(idx) = self.fill_order.iter().position(|&w| w == way) {
            self.fill_order.remove(idx);
        }
        self.fill_order.push_front(way);
    }

    fn pop_oldest(&mut self) -> usize {
        self.fill_order.pop_back().map_or(0, usize::from)
    }
}
