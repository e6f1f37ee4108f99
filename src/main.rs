mod cache;
mod config;
mod cpu;
mod error;
mod replace;
mod trace;

use std::{fs, io, process};

use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use cache::Cache;
use cpu::Cpu;
use replace::{AccessResult, ReplPolicy};
use trace::{Instr, Trace};

use crate::{config::Config, error::Result};

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    if let Err(err) = run() {
        error!(%err, "simulation aborted");
        process::exit(1);
    }
}

fn run() -> Result<()> {
    let mut args = pico_args::Arguments::from_env();
    let n_warm: u64 = args.opt_value_from_str("-w")?.unwrap_or(50_000_000);
    let n_instr: u64 = args.opt_value_from_str("-i")?.unwrap_or(100_000_000);
    let heartbeat_int: u64 = args.opt_value_from_str("-h")?.unwrap_or(0);
    let llc_repl: Option<ReplPolicy> = args.opt_value_from_str("--llc-repl")?;
    let repl_stats = args.contains("--repl-stats");

    let config_str: String = match args.opt_value_from_str("--config")? {
        Some(config_str) => config_str,
        None => {
            let config_path: String = args.value_from_str("-p")?;
            fs::read_to_string(config_path)?
        }
    };
    let mut caches = Config::from_json(&config_str)?.to_caches()?;
    if let (Some(policy), Some(llc)) = (llc_repl, caches.last_mut()) {
        info!(cache = llc.name(), %policy, "overriding last-level replacement policy");
        llc.set_policy(policy)?;
    }
    let mut cpu = Cpu::new();

    let stats_path: String = args.value_from_str("--json")?;
    let trace_path: String = args.value_from_str("-t")?;
    let inst_per_block: usize = args.opt_value_from_str("--buffer-size")?.unwrap_or(1024 * 16);
    let blocks_per_queue: usize = args.opt_value_from_str("--queue-size")?.unwrap_or(32);

    let leftover = args.finish();
    if !leftover.is_empty() {
        warn!(?leftover, "ignoring unrecognized arguments");
    }

    let trace = Trace::read(trace_path.into(), inst_per_block, blocks_per_queue)?;

    let mut next_heartbeat = heartbeat_int;
    let mut warmup = n_warm > 0;
    let mut goal = if warmup { n_warm } else { n_instr };
    debug!(n_warm, n_instr, "starting simulation");

    loop {
        let instr_block = match trace.rec.recv() {
            Ok(block) => block?,
            Err(_) => {
                warn!(instrs = cpu.instr_idx, "trace ended before the instruction goal");
                break;
            }
        };
        operate(&mut cpu, &mut caches, &instr_block);
        if heartbeat_int != 0 && cpu.instr_idx > next_heartbeat {
            info!(instrs = cpu.instr_idx, "heartbeat");
            while next_heartbeat < cpu.instr_idx {
                next_heartbeat += heartbeat_int;
            }
        }

        if cpu.instr_idx > goal {
            if warmup {
                caches.iter_mut().for_each(|c| c.clear_stats());
                goal = cpu.instr_idx + n_instr;
                warmup = false;
                info!(instrs = cpu.instr_idx, "finished warmup");
            } else {
                break;
            }
        }
    }
    info!(instrs = cpu.instr_idx, "simulation finished");

    let stats = caches
        .iter()
        .map(|c| c.make_stats(&cpu))
        .collect::<Vec<_>>();
    let stats_file = fs::File::create(stats_path)?;
    serde_json::to_writer_pretty(stats_file, &stats)?;

    if repl_stats {
        let mut out = io::stdout().lock();
        for cache in &caches {
            cache.repl().print_stats(&mut out, true)?;
        }
    }
    Ok(())
}

/// Walks each access down the hierarchy until some level hits.
fn operate(cpu: &mut Cpu, caches: &mut [Cache], instrs: &[Instr]) {
    for instr in instrs {
        cpu.ip = instr.ip;
        for (addr, kind) in instr.accesses() {
            for cache in caches.iter_mut() {
                if let AccessResult::Hit = cache.access(cpu, addr, kind) {
                    break;
                }
            }
        }
        cpu.instr_idx += 1;
    }
}
