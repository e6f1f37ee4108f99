use std::{
    fs,
    io::{self, ErrorKind, Read, Seek},
    path::PathBuf,
    thread::{self, JoinHandle},
};

use crossbeam::channel::{Receiver, Sender};
use tracing::{debug, error, warn};
use xz2::read::XzDecoder;

use crate::{cache::AccessType, error::Result};

// Instruction Format
const NUM_INSTR_DESTINATIONS: usize = 2;
const NUM_INSTR_SOURCES: usize = 4;
const INSTR_SIZE: usize = 64;

/// One ChampSim trace record (64 bytes, little endian, C layout).
#[derive(Default, Clone, Copy, Debug, PartialEq, Eq)]
pub struct Instr {
    pub ip: u64,

    pub is_branch: u8,
    pub branch_taken: u8,

    pub destination_registers: [u8; NUM_INSTR_DESTINATIONS],
    pub source_registers: [u8; NUM_INSTR_SOURCES],

    pub destination_memory: [u64; NUM_INSTR_DESTINATIONS],
    pub source_memory: [u64; NUM_INSTR_SOURCES],
}

fn word(raw: &[u8], at: usize) -> u64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&raw[at..at + 8]);
    u64::from_le_bytes(bytes)
}

impl Instr {
    pub fn from_bytes(raw: &[u8]) -> Self {
        assert_eq!(raw.len(), INSTR_SIZE);
        let mut instr = Instr {
            ip: word(raw, 0),
            is_branch: raw[8],
            branch_taken: raw[9],
            ..Instr::default()
        };
        instr.destination_registers.copy_from_slice(&raw[10..12]);
        instr.source_registers.copy_from_slice(&raw[12..16]);
        for (i, mem) in instr.destination_memory.iter_mut().enumerate() {
            *mem = word(raw, 16 + 8 * i);
        }
        for (i, mem) in instr.source_memory.iter_mut().enumerate() {
            *mem = word(raw, 32 + 8 * i);
        }
        instr
    }

    /// The fetch, then every load, then every store this instruction makes.
    pub fn accesses(&self) -> impl Iterator<Item = (usize, AccessType)> + '_ {
        std::iter::once((self.ip as usize, AccessType::Ifetch))
            .chain(
                self.source_memory
                    .iter()
                    .filter(|&&addr| addr != 0)
                    .map(|&addr| (addr as usize, AccessType::Load)),
            )
            .chain(
                self.destination_memory
                    .iter()
                    .filter(|&&addr| addr != 0)
                    .map(|&addr| (addr as usize, AccessType::Store)),
            )
    }
}

/// Reads until `buf` is full or the stream ends.
fn fill_block<R: Read>(src: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match src.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(err) if err.kind() == ErrorKind::Interrupted => {}
            Err(err) => return Err(err),
        }
    }
    Ok(filled)
}

pub struct Trace {
    /// Blocks of decoded instructions, or the error that stopped decoding.
    pub rec: Receiver<io::Result<Vec<Instr>>>,
    _thread: JoinHandle<()>,
}

impl Trace {
    pub fn read(path: PathBuf, instr_per_block: usize, blocks_per_queue: usize) -> Result<Trace> {
        let stream = fs::File::open(&path)?;
        debug!(path = %path.display(), "opened trace");
        Ok(Trace::from_reader(stream, instr_per_block, blocks_per_queue))
    }

    pub fn from_reader<R>(stream: R, instr_per_block: usize, blocks_per_queue: usize) -> Trace
    where
        R: Read + Seek + Send + 'static,
    {
        let (sender, receiver) = crossbeam::channel::bounded(blocks_per_queue);
        let t = thread::spawn(move || Trace::run_thread(stream, instr_per_block, sender));
        Trace {
            rec: receiver,
            _thread: t,
        }
    }

    /// Decodes the trace forever, rewinding at the end. Stops when the
    /// receiver hangs up or the trace is empty. A decode or rewind failure is
    /// sent down the channel before stopping.
    fn run_thread<R: Read + Seek>(
        stream: R,
        instr_per_block: usize,
        queue: Sender<io::Result<Vec<Instr>>>,
    ) {
        let mut xz_stream = XzDecoder::new(stream);
        let mut raw = vec![0u8; instr_per_block.max(1) * INSTR_SIZE];
        loop {
            let mut pass_len = 0u64;
            loop {
                let n_bytes = match fill_block(&mut xz_stream, &mut raw) {
                    Ok(n) => n,
                    Err(err) => {
                        error!(%err, "trace decode failed");
                        let _ = queue.send(Err(err));
                        return;
                    }
                };
                if n_bytes == 0 {
                    break;
                }
                if n_bytes % INSTR_SIZE != 0 {
                    warn!(trailing = n_bytes % INSTR_SIZE, "dropping partial trace record");
                }
                let buffer: Vec<Instr> = raw[..n_bytes]
                    .chunks_exact(INSTR_SIZE)
                    .map(Instr::from_bytes)
                    .collect();
                pass_len += buffer.len() as u64;

                if queue.send(Ok(buffer)).is_err() {
                    return;
                }
            }

            if pass_len == 0 {
                warn!("trace holds no instructions");
                return;
            }
            debug!(instrs = pass_len, "rewinding trace");
            let mut stream = xz_stream.into_inner();
            if let Err(err) = stream.seek(io::SeekFrom::Start(0)) {
                error!(%err, "trace rewind failed");
                let _ = queue.send(Err(err));
                return;
            }
            xz_stream = XzDecoder::new(stream);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::{Cursor, Write};

    use pretty_assertions::assert_eq;
    use xz2::write::XzEncoder;

    use super::*;

    fn record(ip: u64, loads: [u64; 4], stores: [u64; 2]) -> Vec<u8> {
        let mut raw = Vec::with_capacity(INSTR_SIZE);
        raw.extend_from_slice(&ip.to_le_bytes());
        raw.extend_from_slice(&[1, 0, 3, 4, 5, 6, 7, 8]);
        for s in stores {
            raw.extend_from_slice(&s.to_le_bytes());
        }
        for l in loads {
            raw.extend_from_slice(&l.to_le_bytes());
        }
        raw
    }

    fn compressed(records: &[Vec<u8>]) -> Vec<u8> {
        let mut enc = XzEncoder::new(Vec::new(), 6);
        for r in records {
            enc.write_all(r).unwrap();
        }
        enc.finish().unwrap()
    }

    #[test]
    fn decodes_record_layout() {
        let instr = Instr::from_bytes(&record(0x401000, [0x10, 0, 0x20, 0], [0, 0x30]));
        assert_eq!(instr.ip, 0x401000);
        assert_eq!(instr.is_branch, 1);
        assert_eq!(instr.destination_registers, [3, 4]);
        assert_eq!(instr.source_registers, [5, 6, 7, 8]);
        assert_eq!(instr.source_memory, [0x10, 0, 0x20, 0]);
        assert_eq!(instr.destination_memory, [0, 0x30]);
        assert_eq!(
            instr.accesses().collect::<Vec<_>>(),
            vec![
                (0x401000, AccessType::Ifetch),
                (0x10, AccessType::Load),
                (0x20, AccessType::Load),
                (0x30, AccessType::Store),
            ]
        );
    }

    #[test]
    fn fill_block_stops_at_eof() {
        let mut src = Cursor::new(vec![7u8; 100]);
        let mut buf = [0u8; 64];
        assert_eq!(fill_block(&mut src, &mut buf).unwrap(), 64);
        assert_eq!(fill_block(&mut src, &mut buf).unwrap(), 36);
        assert_eq!(fill_block(&mut src, &mut buf).unwrap(), 0);
    }

    #[test]
    fn streams_blocks_and_rewinds() {
        let records: Vec<_> = (1..=3).map(|ip| record(ip, [0; 4], [0; 2])).collect();
        let trace = Trace::from_reader(Cursor::new(compressed(&records)), 2, 4);

        let ips = |block: Vec<Instr>| block.iter().map(|i| i.ip).collect::<Vec<_>>();
        let next = || trace.rec.recv().unwrap().unwrap();
        assert_eq!(ips(next()), vec![1, 2]);
        assert_eq!(ips(next()), vec![3]);
        // Second pass after the rewind.
        assert_eq!(ips(next()), vec![1, 2]);

        let Trace { rec, _thread } = trace;
        drop(rec);
        _thread.join().unwrap();
    }

    #[test]
    fn empty_trace_closes_channel() {
        let trace = Trace::from_reader(Cursor::new(compressed(&[])), 8, 1);
        assert!(trace.rec.recv().is_err());
    }

    #[test]
    fn corrupt_trace_reports_the_error() {
        let trace = Trace::from_reader(Cursor::new(vec![0xff; 4096]), 8, 1);
        assert!(matches!(trace.rec.recv(), Ok(Err(_))));
        // The producer stops after reporting.
        assert!(trace.rec.recv().is_err());
    }
}
