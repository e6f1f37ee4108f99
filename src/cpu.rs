#[derive(Debug)]
pub struct Cpu {
    pub ip: u64,
    pub instr_idx: u64,
    /// Hardware thread issuing the current instruction. Traces are single threaded.
    pub tid: u32,
}

impl Cpu {
    pub fn new() -> Self {
        Cpu {
            ip: 0,
            instr_idx: 0,
            tid: 0,
        }
    }
}
