//! Benchmark payloads: cache-state preparation plus one measured operation.
//!
//! Each payload is the composition of three knobs - how the cache is primed,
//! whether a transfer precedes the measurement, and which operation is
//! measured - instead of a combinatorial family of near-identical functions.
//! Every payload satisfies the workload contract: it calls `enter`/`leave`
//! around exactly one region and behaves identically on every pass (cache
//! priming is redone from scratch each invocation).

use std::io;
use std::ptr;

use perfmux::{Error, RegionMultiplexer};

use crate::transport::Peer;

/// Cache state established before the measured operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Prime {
    /// Cache left dirty with unrelated data (the clean walk only).
    Cold,
    /// Message buffer walked in read mode so it is cache-resident.
    Read,
    /// Message buffer walked in write mode so it is cache-resident and dirty.
    Write,
}

/// The operation measured between `enter` and `leave`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Op {
    /// Load one byte per cache line of the message buffer.
    Read,
    /// Read-modify-write one byte per cache line of the message buffer.
    Write,
    /// Send (leader) or receive (follower) the message buffer.
    Transfer,
}

/// One benchmark variant. Region ids follow the historical numbering:
/// `id_base` encodes the variant and the size index is added per sweep step.
#[derive(Clone, Copy, Debug)]
pub struct Payload {
    pub name: &'static str,
    pub id_base: u64,
    pub prime: Prime,
    pub transfer_before: bool,
    pub op: Op,
}

/// The default suite, matching the variants the original experiment ran:
/// measured transfers against cold/read-hot/write-hot caches, and measured
/// loads/stores after every combination of priming and a preceding transfer.
pub fn suite() -> Vec<Payload> {
    vec![
        Payload { name: "transfer-cold", id_base: 305_200, prime: Prime::Cold, transfer_before: false, op: Op::Transfer },
        Payload { name: "transfer-read-hot", id_base: 306_200, prime: Prime::Read, transfer_before: false, op: Op::Transfer },
        Payload { name: "transfer-write-hot", id_base: 307_200, prime: Prime::Write, transfer_before: false, op: Op::Transfer },
        Payload { name: "read-cold", id_base: 720_100, prime: Prime::Cold, transfer_before: false, op: Op::Read },
        Payload { name: "read-hot", id_base: 721_100, prime: Prime::Read, transfer_before: false, op: Op::Read },
        Payload { name: "read-after-transfer", id_base: 722_100, prime: Prime::Cold, transfer_before: true, op: Op::Read },
        Payload { name: "read-hot-after-transfer", id_base: 723_100, prime: Prime::Read, transfer_before: true, op: Op::Read },
        Payload { name: "write-cold", id_base: 830_100, prime: Prime::Cold, transfer_before: false, op: Op::Write },
        Payload { name: "write-hot", id_base: 831_100, prime: Prime::Write, transfer_before: false, op: Op::Write },
        Payload { name: "write-after-transfer", id_base: 832_100, prime: Prime::Cold, transfer_before: true, op: Op::Write },
        Payload { name: "write-hot-after-transfer", id_base: 833_100, prime: Prime::Write, transfer_before: true, op: Op::Write },
    ]
}

/// Buffer geometry for one sweep step.
#[derive(Clone, Copy, Debug)]
pub struct Geometry {
    /// Last-level cache size per CPU.
    pub cache_size: usize,
    /// Cache line size.
    pub cache_line: usize,
    /// Message size measured this step.
    pub size: usize,
    /// 1-based index of this step in the size sweep.
    pub size_index: u64,
}

impl Payload {
    pub fn region_id(&self, size_index: u64) -> u64 {
        self.id_base + size_index
    }

    /// Runs one pass of this payload. `msg` is the measured buffer, `scratch`
    /// an equally sized buffer used only to evict the cache; both must hold
    /// at least `max(cache_size, size)` bytes.
    pub fn run(
        &self,
        mux: &mut RegionMultiplexer<'_>,
        peer: &mut Peer,
        msg: &mut [u8],
        scratch: &mut [u8],
        geo: Geometry,
    ) -> perfmux::Result<()> {
        let id = self.region_id(geo.size_index);

        // Evict the measured buffer by walking the scratch buffer.
        peer.barrier().map_err(transport_error)?;
        clean_walk(scratch, geo.cache_size.max(geo.size), geo.cache_line);

        match self.op {
            Op::Transfer => {
                match self.prime {
                    Prime::Cold => {}
                    Prime::Read => prime_read(msg, geo.size, geo.cache_line),
                    Prime::Write => prime_write(msg, geo.size, geo.cache_line),
                }
                // Warm the send/receive instruction path.
                peer.sync().map_err(transport_error)?;

                mux.enter(id)?;
                peer.transfer(msg, geo.size).map_err(transport_error)?;
                mux.leave(id)?;

                peer.sync().map_err(transport_error)?;
            }
            Op::Read | Op::Write => {
                peer.barrier().map_err(transport_error)?;
                match self.prime {
                    Prime::Cold => {}
                    Prime::Read => {
                        prime_read(msg, geo.size, geo.cache_line);
                        peer.barrier().map_err(transport_error)?;
                    }
                    Prime::Write => {
                        prime_write(msg, geo.size, geo.cache_line);
                        peer.barrier().map_err(transport_error)?;
                    }
                }
                if self.transfer_before {
                    peer.transfer(msg, geo.size).map_err(transport_error)?;
                    peer.barrier().map_err(transport_error)?;
                }

                mux.enter(id)?;
                match self.op {
                    Op::Read => measured_read(msg, geo.size, geo.cache_line),
                    Op::Write => measured_write(msg, geo.size, geo.cache_line),
                    Op::Transfer => unreachable!(),
                }
                mux.leave(id)?;

                peer.barrier().map_err(transport_error)?;
            }
        }
        Ok(())
    }
}

/// Transport failures abort the repetition through the driver's normal error
/// path; the peer processes resynchronize on the next repetition's barrier.
fn transport_error(e: io::Error) -> Error {
    Error::Platform(format!("peer transport failed: {}", e))
}

/// Touches one line per cache line over `len` bytes of `buf`, staggering the
/// offset within the line so the walk defeats next-line prefetching.
fn clean_walk(buf: &mut [u8], len: usize, line: usize) {
    let len = len.min(buf.len());
    let mut idx = 0;
    while idx + line <= len {
        let offset = idx + idx % (line - 1);
        unsafe {
            let p = buf.as_mut_ptr().add(offset);
            ptr::write_volatile(p, ptr::read_volatile(p).wrapping_add(1));
        }
        idx += line;
    }
}

/// Walks the buffer backwards in read mode so L1 and L2 end up holding the
/// lines the measured loop will touch first.
fn prime_read(msg: &[u8], size: usize, line: usize) {
    let mut acc = 0u8;
    let mut idx = size as isize - line as isize;
    while idx >= 0 {
        let j = idx as usize;
        let offset = j + j % (line - 1);
        acc = acc.wrapping_add(unsafe { ptr::read_volatile(msg.as_ptr().add(offset)) });
        idx -= line as isize;
    }
    std::hint::black_box(acc);
}

/// Backward walk in write mode: the cached lines are also dirty.
fn prime_write(msg: &mut [u8], size: usize, line: usize) {
    let mut idx = size as isize - line as isize;
    while idx >= 0 {
        let j = idx as usize;
        let offset = j + j % (line - 1);
        unsafe {
            let p = msg.as_mut_ptr().add(offset);
            ptr::write_volatile(p, ptr::read_volatile(p).wrapping_add(1));
        }
        idx -= line as isize;
    }
}

/// The measured load loop: one byte per cache line, front to back.
fn measured_read(msg: &[u8], size: usize, line: usize) {
    let mut acc = 0u8;
    let mut i = 0;
    while i < size {
        acc = acc.wrapping_add(unsafe { ptr::read_volatile(msg.as_ptr().add(i)) });
        i += line;
    }
    std::hint::black_box(acc);
}

/// The measured store loop: read-modify-write one byte per cache line.
fn measured_write(msg: &mut [u8], size: usize, line: usize) {
    let mut i = 0;
    while i < size {
        unsafe {
            let p = msg.as_mut_ptr().add(i);
            ptr::write_volatile(p, ptr::read_volatile(p).wrapping_add(1));
        }
        i += line;
    }
}
