//! Two-process cache and IPC latency benchmark.
//!
//! Both processes run the identical binary; only the rendezvous role
//! differs. Message sizes sweep from one cache line to a multiple of the
//! last-level cache, and every payload is measured once per configured
//! hardware counter per repetition (plus the timing-only pass).

use std::error::Error;
use std::path::PathBuf;

use clap::Parser;
use log::{info, warn};
use perfmux::{CounterSpec, MeasurementDriver, TableSink};

mod affinity;
mod payload;
mod topology;
mod transport;

use payload::Geometry;
use transport::{Peer, Role};

const WARM_UP_ROUNDS: u32 = 100;
const FIRST_SIZE: usize = 64;

#[derive(Parser, Debug)]
#[command(about = "Measure cache and inter-process transfer latency under hardware counters")]
struct Opt {
    /// Role of this process in the two-process rendezvous.
    #[arg(value_enum)]
    role: Role,

    /// Address the leader listens on and the follower connects to.
    #[arg(long, default_value = "127.0.0.1:7311")]
    addr: String,

    /// File(s) with one hardware event name per line; may repeat.
    #[arg(long = "counters")]
    counter_files: Vec<PathBuf>,

    /// Repetitions per payload per message size.
    #[arg(long, default_value_t = 10)]
    repetitions: u32,

    /// Output table path (defaults to cache_bench.<role>.log).
    #[arg(long)]
    output: Option<PathBuf>,

    /// Last-level cache size override, e.g. 8M (skips sysfs discovery).
    #[arg(long)]
    cache_size: Option<String>,

    /// Cache line size override in bytes; wins over the discovered size.
    #[arg(long)]
    cache_line: Option<usize>,

    /// Core to pin this process to (defaults to a role-based choice).
    #[arg(long)]
    pin: Option<usize>,

    /// Largest message size, as a multiple of the last-level cache.
    #[arg(long, default_value_t = 4)]
    size_factor: usize,
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let opt = Opt::parse();
    if let Err(e) = run(opt) {
        eprintln!("cache-bench: {}", e);
        std::process::exit(1);
    }
}

fn run(opt: Opt) -> Result<(), Box<dyn Error + Send + Sync>> {
    let cache = cache_info(opt.cache_size.as_deref(), opt.cache_line)?;
    info!("cache topology: {}", cache);

    // The two processes sit on maximally distant cores so transfers cross
    // the interconnect rather than a shared L1/L2.
    let core = opt.pin.unwrap_or(match opt.role {
        Role::Leader => 0,
        Role::Follower => topology::online_cpus() - 1,
    });
    if let Err(e) = affinity::pin_to_core(core) {
        warn!("could not pin to core {}: {}", core, e);
    } else {
        info!("pinned to core {}", core);
    }

    let spec = CounterSpec::from_files(&opt.counter_files)?;
    info!("{} hardware counters configured", spec.len());

    let output = opt.output.clone().unwrap_or_else(|| {
        PathBuf::from(match opt.role {
            Role::Leader => "cache_bench.leader.log",
            Role::Follower => "cache_bench.follower.log",
        })
    });
    let sink = TableSink::from_path(&output, &spec)?;

    let mut peer = Peer::connect(opt.role, &opt.addr)?;
    peer.warm_up(WARM_UP_ROUNDS)?;
    info!("channel warmed up, starting the sweep");

    let suite = payload::suite();
    let last_level = cache.last_level_size();
    let max_size = last_level * opt.size_factor.max(1);

    let mut size = FIRST_SIZE;
    let mut size_index = 0u64;
    while size <= max_size {
        size_index += 1;
        info!("measuring size {}", size);

        let buf_len = last_level.max(size);
        // One allocation split into the measured buffer and the scratch
        // buffer used to evict it.
        let mut arena = vec![2u8; 2 * buf_len];
        let (msg, scratch) = arena.split_at_mut(buf_len);

        let geo = Geometry {
            cache_size: last_level,
            cache_line: cache.line_size,
            size,
            size_index,
        };

        for payload in &suite {
            let driver = MeasurementDriver::new(&spec, opt.repetitions);
            driver.run(
                |mux| payload.run(mux, &mut peer, msg, scratch, geo),
                &sink,
            );
        }

        size *= 2;
    }

    info!("sweep finished, results in {}", output.display());
    Ok(())
}

/// Resolves the cache topology from the options. Explicit sizes win over
/// sysfs discovery, and an explicit line size wins over the discovered one.
/// Line sizes below two bytes are rejected up front; the buffer walks
/// stagger their offsets within the line and need at least that much room.
fn cache_info(
    cache_size: Option<&str>,
    cache_line: Option<usize>,
) -> Result<topology::CacheInfo, Box<dyn Error + Send + Sync>> {
    if cache_line.is_some_and(|line| line < 2) {
        return Err("--cache-line must be at least 2 bytes".into());
    }
    let mut cache = match cache_size {
        Some(size) => topology::CacheInfo::from_override(size, cache_line.unwrap_or(64))
            .ok_or("invalid --cache-size; use e.g. 512K, 8M, 1G")?,
        None => topology::CacheInfo::detect()
            .ok_or("cache discovery failed; pass --cache-size explicitly")?,
    };
    if let Some(line) = cache_line {
        cache.line_size = line;
    }
    Ok(cache)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_line_size_wins() {
        let cache = cache_info(Some("1M"), Some(128)).unwrap();
        assert_eq!(cache.line_size, 128);
        assert_eq!(cache.last_level_size(), 1 << 20);
    }

    #[test]
    fn degenerate_line_sizes_are_rejected() {
        assert!(cache_info(Some("1M"), Some(1)).is_err());
        assert!(cache_info(Some("1M"), Some(0)).is_err());
    }

    #[test]
    fn line_size_defaults_when_not_overridden() {
        let cache = cache_info(Some("512K"), None).unwrap();
        assert_eq!(cache.line_size, 64);
    }
}
