//! CPU cache topology discovery.
//!
//! Cache levels are read from sysfs on Linux; where that is unavailable (or
//! wrong for the machine at hand) the sizes can be supplied on the command
//! line with the usual `K`/`M`/`G` suffixes.

use std::fmt;
use std::fs;
use std::path::Path;

use log::debug;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CacheLevel {
    pub level: u32,
    pub size: usize,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CacheInfo {
    pub line_size: usize,
    /// Data and unified caches, ordered by level.
    pub levels: Vec<CacheLevel>,
}

impl CacheInfo {
    /// Reads the data/unified cache hierarchy of cpu0 from sysfs.
    pub fn detect() -> Option<CacheInfo> {
        Self::from_sysfs(Path::new("/sys/devices/system/cpu/cpu0/cache"))
    }

    fn from_sysfs(cache_dir: &Path) -> Option<CacheInfo> {
        let mut levels = Vec::new();
        let mut line_size = None;

        for entry in fs::read_dir(cache_dir).ok()? {
            let path = entry.ok()?.path();
            if !path
                .file_name()
                .and_then(|n| n.to_str())
                .map_or(false, |n| n.starts_with("index"))
            {
                continue;
            }

            let kind = read_trimmed(&path.join("type"))?;
            if kind == "Instruction" {
                continue;
            }

            let level: u32 = read_trimmed(&path.join("level"))?.parse().ok()?;
            let size = parse_size(&read_trimmed(&path.join("size"))?)?;
            if let Ok(line) = read_trimmed(&path.join("coherency_line_size"))?.parse() {
                line_size = Some(line);
            }
            debug!("cache level {}: {} bytes ({})", level, size, kind);
            levels.push(CacheLevel { level, size });
        }

        if levels.is_empty() {
            return None;
        }
        levels.sort_by_key(|l| l.level);
        Some(CacheInfo {
            line_size: line_size.unwrap_or(64),
            levels,
        })
    }

    /// Builds the topology from explicit sizes, mirroring the historical
    /// "no discovery library" configuration path.
    pub fn from_override(last_level: &str, line_size: usize) -> Option<CacheInfo> {
        if line_size < 2 {
            return None;
        }
        let size = parse_size(last_level)?;
        Some(CacheInfo {
            line_size,
            levels: vec![CacheLevel { level: 1, size }],
        })
    }

    /// Size of the last-level cache, the reference for the size sweep.
    pub fn last_level_size(&self) -> usize {
        self.levels.last().map(|l| l.size).unwrap_or(0)
    }
}

impl fmt::Display for CacheInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, level) in self.levels.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "L{}={}", level.level, level.size)?;
        }
        write!(f, ", line={}", self.line_size)
    }
}

fn read_trimmed(path: &Path) -> Option<String> {
    Some(fs::read_to_string(path).ok()?.trim().to_string())
}

/// Parses `64`, `32K`, `8M`, `1G`.
pub fn parse_size(s: &str) -> Option<usize> {
    let s = s.trim();
    let (digits, multiplier) = match s.chars().last()? {
        'K' | 'k' => (&s[..s.len() - 1], 1024),
        'M' | 'm' => (&s[..s.len() - 1], 1024 * 1024),
        'G' | 'g' => (&s[..s.len() - 1], 1024 * 1024 * 1024),
        _ => (s, 1),
    };
    let value: usize = digits.parse().ok()?;
    Some(value * multiplier)
}

/// Number of logical CPUs, for the role-based affinity default.
#[cfg(target_os = "linux")]
pub fn online_cpus() -> usize {
    let n = unsafe { libc::sysconf(libc::_SC_NPROCESSORS_ONLN) };
    if n < 1 {
        1
    } else {
        n as usize
    }
}

#[cfg(not(target_os = "linux"))]
pub fn online_cpus() -> usize {
    std::thread::available_parallelism().map_or(1, |n| n.get())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_suffixed_sizes() {
        assert_eq!(parse_size("64"), Some(64));
        assert_eq!(parse_size("32K"), Some(32 * 1024));
        assert_eq!(parse_size(" 8M "), Some(8 * 1024 * 1024));
        assert_eq!(parse_size("1G"), Some(1 << 30));
        assert_eq!(parse_size("12Q"), None);
        assert_eq!(parse_size(""), None);
    }

    #[test]
    fn override_builds_a_single_level() {
        let info = CacheInfo::from_override("512K", 64).unwrap();
        assert_eq!(info.last_level_size(), 512 * 1024);
        assert_eq!(info.line_size, 64);
    }

    #[test]
    fn override_rejects_degenerate_line_sizes() {
        assert_eq!(CacheInfo::from_override("512K", 1), None);
        assert_eq!(CacheInfo::from_override("512K", 0), None);
    }

    #[test]
    fn last_level_is_the_largest_level() {
        let info = CacheInfo {
            line_size: 64,
            levels: vec![
                CacheLevel { level: 1, size: 32 * 1024 },
                CacheLevel { level: 2, size: 1 << 20 },
                CacheLevel { level: 3, size: 8 << 20 },
            ],
        };
        assert_eq!(info.last_level_size(), 8 << 20);
    }
}
