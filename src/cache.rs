use std::ops::{Not, Range};

use serde::Serialize;

use crate::{
    cpu::Cpu,
    error::{Result, SimError},
    replace::{AccessResult, ReplPolicy, ReplacementState, Request, Victim},
};

#[derive(Debug)]
pub struct Addr {
    pub set: usize,
    pub tag: usize,
}

#[derive(Debug)]
pub struct BitSection {
    shift: usize,
    mask: usize,
}

impl BitSection {
    fn apply(&self, num: usize) -> usize {
        (num >> self.shift) & self.mask
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessType {
    Load,
    Store,
    Ifetch,
}

/// What the replacement policies get to see of a physical line.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LineState {
    pub valid: bool,
    pub tag: u64,
}

#[derive(Serialize)]
pub struct CacheStats {
    name: String,
    repl: ReplPolicy,
    misses: u64,
    hits: u64,
    bypasses: u64,
    miss_rate: f64,
    mpki: f64,
    reuse: f64,
    lifetime: f64,
    efficiency: f64,
}

pub fn check_geometry(name: &str, block_size: usize, n_sets: usize, n_ways: usize) -> Result<()> {
    let reason = if !block_size.is_power_of_two() {
        format!("block size {block_size} is not a power of two")
    } else if !n_sets.is_power_of_two() {
        format!("set count {n_sets} is not a power of two")
    } else if n_ways == 0 {
        "associativity must be at least 1".to_owned()
    } else {
        return Ok(());
    };
    Err(SimError::InvalidGeometry {
        name: name.to_owned(),
        reason,
    })
}

/// LIRS needs a non-empty HIR budget (`ways / 3`) to ever have a victim.
pub fn check_policy(name: &str, n_ways: usize, policy: ReplPolicy) -> Result<()> {
    if policy == ReplPolicy::Contestant && n_ways < 3 {
        return Err(SimError::InvalidGeometry {
            name: name.to_owned(),
            reason: format!("lirs needs at least 3 ways, got {n_ways}"),
        });
    }
    Ok(())
}

pub struct Cache {
    name: String,
    lines: Vec<LineState>,
    blocks: Vec<Block>,
    pub n_ways: usize,
    pub n_sets: usize,
    set_sec: BitSection,
    tag_sec: BitSection,
    repl: ReplacementState,
    hits: u64,
    misses: u64,
    bypasses: u64,
}

impl Cache {
    pub fn new(
        name: String,
        block_size: usize,
        n_sets: usize,
        n_ways: usize,
        repl: ReplacementState,
    ) -> Result<Self> {
        check_geometry(&name, block_size, n_sets, n_ways)?;
        check_policy(&name, n_ways, repl.policy())?;

        let set_shift = block_size.ilog2() as usize;
        let set_sec = BitSection {
            shift: set_shift,
            mask: n_sets - 1,
        };

        let tag_shift = n_sets.ilog2() as usize + set_shift;
        let tag_sec = BitSection {
            shift: tag_shift,
            mask: 0usize.not(),
        };

        Ok(Cache {
            name,
            lines: vec![LineState::default(); n_sets * n_ways],
            blocks: vec![Block::default(); n_sets * n_ways],
            n_ways,
            n_sets,
            set_sec,
            tag_sec,
            repl,
            hits: 0,
            misses: 0,
            bypasses: 0,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn repl(&self) -> &ReplacementState {
        &self.repl
    }

    /// Switches the active policy. LIRS only learns from the accesses it sees,
    /// so it can only take over before the first access.
    pub fn set_policy(&mut self, policy: ReplPolicy) -> Result<()> {
        check_policy(&self.name, self.n_ways, policy)?;
        let current = self.repl.policy();
        if policy == ReplPolicy::Contestant && current != policy && self.repl.timer() > 0 {
            return Err(SimError::PolicySwitch {
                name: self.name.clone(),
                policy,
                reason: format!(
                    "{} accesses already went through {current}",
                    self.repl.timer()
                ),
            });
        }
        self.repl.set_replacement_policy(policy);
        Ok(())
    }

    pub fn split_addr(&self, addr: usize) -> Addr {
        let set = self.set_sec.apply(addr);
        let tag = self.tag_sec.apply(addr);
        Addr { set, tag }
    }

    fn set_range(&self, set: usize) -> Range<usize> {
        set * self.n_ways..(set + 1) * self.n_ways
    }

    #[cfg(test)]
    pub fn set_lines(&self, set: usize) -> &[LineState] {
        &self.lines[self.set_range(set)]
    }

    pub fn access(&mut self, cpu: &Cpu, addr: usize, kind: AccessType) -> AccessResult {
        let split = self.split_addr(addr);
        let set_range = self.set_range(split.set);
        let tag = split.tag as u64;
        let req = Request {
            tid: cpu.tid,
            pc: cpu.ip,
            paddr: addr as u64,
            kind,
        };
        self.repl.increment_timer();

        // First, look for a hit
        let hit = self.lines[set_range.clone()]
            .iter()
            .position(|l| l.valid && l.tag == tag);
        if let Some(way) = hit {
            let idx = set_range.start + way;
            self.hits += 1;
            self.blocks[idx].read(cpu);
            self.repl
                .update_replacement_state(split.set, way, &self.lines[idx], &req, true);
            return AccessResult::Hit;
        }

        // Its a miss, fill an empty way before asking the policy
        self.misses += 1;
        let vacant = self.lines[set_range.clone()].iter().position(|l| !l.valid);
        let way = match vacant {
            Some(way) => way,
            None => match self
                .repl
                .get_victim_in_set(split.set, &self.lines[set_range.clone()], &req)
            {
                Victim::Way(way) => {
                    self.blocks[set_range.start + way].evict(cpu);
                    way
                }
                Victim::Bypass => {
                    self.bypasses += 1;
                    return AccessResult::Miss;
                }
            },
        };

        let idx = set_range.start + way;
        self.lines[idx] = LineState { valid: true, tag };
        self.blocks[idx].alloc(cpu);
        self.repl
            .update_replacement_state(split.set, way, &self.lines[idx], &req, false);
        AccessResult::Miss
    }

    pub fn clear_stats(&mut self) {
        self.misses = 0;
        self.hits = 0;
        self.bypasses = 0;
        for (block, line) in self.blocks.iter_mut().zip(&self.lines) {
            block.live_dur = 0;
            block.dead_dur = 0;
            block.alloc_count = if line.valid { 1 } else { 0 };
            block.access_count = 0;
        }
    }

    pub fn make_stats(&self, cpu: &Cpu) -> CacheStats {
        let total_alloc: f64 = self.blocks.iter().map(|b| b.alloc_count as f64).sum();
        let total_dead: f64 = self.blocks.iter().map(|b| b.dead_dur as f64).sum();
        let total_live: f64 = self.blocks.iter().map(|b| b.live_dur as f64).sum();
        let total_both: f64 = total_dead + total_live;

        let total_access = (self.misses + self.hits) as f64;

        let miss_rate = self.misses as f64 / total_access;
        let mpki = self.misses as f64 * 1000.0 / cpu.instr_idx as f64;
        let reuse = total_access / total_alloc;
        let lifetime = total_both / total_alloc;
        let efficiency = total_live / total_both;

        CacheStats {
            name: self.name.clone(),
            repl: self.repl.policy(),
            miss_rate,
            mpki,
            reuse,
            lifetime,
            efficiency,
            misses: self.misses,
            hits: self.hits,
            bypasses: self.bypasses,
        }
    }
}

/// Lifetime bookkeeping of one physical line, in retired instructions.
#[derive(Debug, Default, Clone, Copy)]
struct Block {
    live_dur: u64,
    dead_dur: u64,
    alloc_count: u64,
    access_count: u64,

    // In Flight Stats
    alloc_time: u64,
    access_time: u64,
}

impl Block {
    fn alloc(&mut self, cpu: &Cpu) {
        self.alloc_time = cpu.instr_idx;
        self.access_time = cpu.instr_idx;
        self.alloc_count += 1;
    }

    fn read(&mut self, cpu: &Cpu) {
        self.access_time = cpu.instr_idx;
        self.access_count += 1;
    }

    fn evict(&mut self, cpu: &Cpu) {
        self.live_dur += self.access_time - self.alloc_time;
        self.dead_dur += cpu.instr_idx - self.access_time;
    }
}
