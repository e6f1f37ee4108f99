//! LIRS replacement.
//!
//! Each set keeps a recency stack `S` and a resident queue `Q`, both
//! most-recent-first. `S` records references to LIR lines, resident HIR lines
//! and non-resident "ghost" HIR entries; its tail is always a LIR entry after
//! pruning. `Q` holds a copy of every resident HIR line, and its tail is the
//! next victim.
//!
//! The two containers hold independent copies keyed by tag. Every transition
//! below removes and reinserts entries explicitly so both stay consistent.

use std::{collections::VecDeque, fmt, io};

use tracing::trace;

use crate::cache::LineState;

use super::{make_sets, MakeS, Replace, Request, Victim};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Lir,
    Hir,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StackEntry {
    pub tag: u64,
    pub way: usize,
    pub status: Status,
    pub resident: bool,
}

impl StackEntry {
    fn resident(tag: u64, way: usize, status: Status) -> Self {
        StackEntry {
            tag,
            way,
            status,
            resident: true,
        }
    }
}

impl fmt::Display for StackEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let status = match self.status {
            Status::Lir => 0,
            Status::Hir => 1,
        };
        write!(
            f,
            "resident={} status={} tag={} wayID={}",
            u8::from(self.resident),
            status,
            self.tag,
            self.way
        )
    }
}

pub struct Lirs {
    sets: Vec<LirsSetData>,
}

impl Lirs {
    pub fn new(n_sets: usize, n_ways: usize) -> Self {
        Lirs {
            sets: make_sets(n_sets, n_ways),
        }
    }

    #[cfg(test)]
    pub fn set(&self, set: usize) -> &LirsSetData {
        &self.sets[set]
    }

    pub fn write_stats(&self, out: &mut dyn io::Write, verbose: bool) -> io::Result<()> {
        let stack: usize = self.sets.iter().map(|s| s.stack.len()).sum();
        let ghosts: usize = self
            .sets
            .iter()
            .map(|s| s.stack.iter().filter(|e| !e.resident).count())
            .sum();
        let queue: usize = self.sets.iter().map(|s| s.queue.len()).sum();
        let cold = self.sets.iter().filter(|s| s.filled_ways() < s.n_ways).count();
        let budget = self.sets.first().map_or(0, LirsSetData::hir_budget);
        writeln!(out, "LIRS hir budget per set: {budget}, sets still filling: {cold}")?;
        writeln!(out, "LIRS stack entries: {stack} (non-resident: {ghosts})")?;
        writeln!(out, "LIRS queue entries: {queue}")?;

        if verbose {
            if let Some(first) = self.sets.first() {
                writeln!(out, "setIndex = 0")?;
                writeln!(out, "stack: ")?;
                for (idx, entry) in first.stack.iter().enumerate() {
                    writeln!(out, "{idx}: {entry}")?;
                }
                writeln!(out)?;
                for (idx, entry) in first.queue.iter().enumerate() {
                    writeln!(out, "{idx}: {entry}")?;
                }
                writeln!(out)?;
            }
        }
        Ok(())
    }
}

impl Replace for Lirs {
    fn victim(&mut self, set: usize, _lines: &[LineState], req: &Request) -> Victim {
        let way = self.sets[set].victim();
        trace!(set, way, tid = req.tid, paddr = req.paddr, "lirs victim");
        Victim::Way(way)
    }

    fn update(&mut self, set: usize, way: usize, line: &LineState, req: &Request, hit: bool) {
        trace!(set, way, tag = line.tag, hit, pc = req.pc, kind = ?req.kind, "lirs update");
        self.sets[set].update(way, line.tag, hit);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LirsSetData {
    stack: VecDeque<StackEntry>,
    queue: VecDeque<StackEntry>,
    n_ways: usize,
    hir_budget: usize,
    filled_ways: usize,
}

impl MakeS for LirsSetData {
    fn new(n_ways: usize) -> Self {
        LirsSetData {
            stack: VecDeque::new(),
            queue: VecDeque::with_capacity(n_ways),
            n_ways,
            hir_budget: n_ways / 3,
            filled_ways: 0,
        }
    }
}

impl LirsSetData {
    #[cfg(test)]
    pub fn stack(&self) -> &VecDeque<StackEntry> {
        &self.stack
    }

    #[cfg(test)]
    pub fn queue(&self) -> &VecDeque<StackEntry> {
        &self.queue
    }

    pub fn hir_budget(&self) -> usize {
        self.hir_budget
    }

    pub fn filled_ways(&self) -> usize {
        self.filled_ways
    }

    /// Evicts the tail of `Q`. Its stack entry, if any, stays behind as a
    /// non-resident ghost.
    pub fn victim(&mut self) -> usize {
        let Some(candidate) = self.queue.pop_back() else {
            panic!(
                "LIRS victim requested with an empty resident queue ({} ways, hir budget {})",
                self.n_ways, self.hir_budget
            );
        };
        if let Some(entry) = self.stack.iter_mut().find(|e| e.tag == candidate.tag) {
            entry.resident = false;
        }
        candidate.way
    }

    pub fn update(&mut self, way: usize, tag: u64, hit: bool) {
        if hit {
            self.on_hit(way, tag);
        } else if self.filled_ways < self.n_ways {
            self.cold_fill(way, tag);
        } else {
            self.on_miss(way, tag);
        }
    }

    fn cold_fill(&mut self, way: usize, tag: u64) {
        assert_eq!(way, self.filled_ways, "LIRS cold fill out of way order");
        self.filled_ways += 1;

        let status = if way >= self.n_ways - self.hir_budget {
            Status::Hir
        } else {
            Status::Lir
        };
        let entry = StackEntry::resident(tag, way, status);
        self.stack.push_front(entry);
        if status == Status::Hir {
            self.queue.push_front(entry);
        }
    }

    fn on_miss(&mut self, way: usize, tag: u64) {
        match self.take_from_stack(tag) {
            Some(mut entry) => {
                // Reuse within the stack's reach: the ghost comes back as LIR.
                entry.resident = true;
                entry.status = Status::Lir;
                entry.way = way;
                self.stack.push_front(entry);
                self.demote_tail();
                self.prune();
            }
            None => {
                // No pruning here, the stack tail is not touched.
                let entry = StackEntry::resident(tag, way, Status::Hir);
                self.stack.push_front(entry);
                self.queue.push_front(entry);
            }
        }
    }

    fn on_hit(&mut self, way: usize, tag: u64) {
        match self.take_from_stack(tag) {
            Some(entry) if entry.status == Status::Lir => {
                self.stack.push_front(entry);
                self.prune();
            }
            Some(mut entry) => {
                entry.status = Status::Lir;
                self.remove_from_queue(tag);
                self.stack.push_front(entry);
                self.demote_tail();
                self.prune();
            }
            None => {
                self.remove_from_queue(tag);
                let entry = StackEntry::resident(tag, way, Status::Hir);
                self.stack.push_front(entry);
                self.queue.push_front(entry);
            }
        }
    }

    fn take_from_stack(&mut self, tag: u64) -> Option<StackEntry> {
        let pos = self.stack.iter().position(|e| e.tag == tag)?;
        debug_assert!(
            self.stack.iter().skip(pos + 1).all(|e| e.tag != tag),
            "duplicate tag {tag:#x} in LIRS stack"
        );
        self.stack.remove(pos)
    }

    fn remove_from_queue(&mut self, tag: u64) {
        if let Some(pos) = self.queue.iter().position(|e| e.tag == tag) {
            self.queue.remove(pos);
        }
    }

    fn demote_tail(&mut self) {
        if let Some(tail) = self.stack.back_mut() {
            tail.status = Status::Hir;
            let demoted = *tail;
            self.queue.push_front(demoted);
        }
    }

    /// Drops the trailing run of HIR entries so the stack ends on a LIR entry.
    fn prune(&mut self) {
        while self
            .stack
            .back()
            .is_some_and(|tail| tail.status == Status::Hir)
        {
            self.stack.pop_back();
        }
    }
}
