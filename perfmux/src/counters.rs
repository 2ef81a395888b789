//! Hardware counter backend.
//!
//! # Event names
//!
//! Event names follow the Linux `perf` tool conventions:
//!
//! * generalized hardware events: `cycles`, `instructions`,
//!   `cache-references`, `cache-misses`, `branches`, `branch-misses`,
//!   `bus-cycles`, `ref-cycles`, `stalled-cycles-frontend`,
//!   `stalled-cycles-backend`
//! * generalized cache events: `L1-dcache-loads`, `L1-dcache-load-misses`,
//!   `L1-dcache-stores`, `L1-icache-load-misses`, `LLC-loads`,
//!   `LLC-load-misses`, `LLC-stores`, `LLC-store-misses`, `dTLB-loads`,
//!   `dTLB-load-misses`, `dTLB-stores`, `dTLB-store-misses`, `iTLB-loads`,
//!   `iTLB-load-misses`
//! * raw PMU events: `r` followed by the hex config, e.g. `r01c2`
//!
//! A `:u` suffix restricts counting to userspace (the counter is paused while
//! the kernel handles syscalls, interrupts, etc.), `:k` restricts it to the
//! kernel. Without a modifier both are counted, as in `perf`.
//!
//! # Limitations
//!
//! Hardware counters are limited to Linux on `x86_64`; on other targets every
//! operation in this module reports a `Platform` error and measurements
//! degrade to elapsed time only. The public API does not vary by target -
//! unsupported configurations are detected at runtime, which is also how
//! partially-unsupported counter lists are tolerated.

/// A resolved hardware event: perf event type, config and privilege filter.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct EventCode {
    pub type_: u32,
    pub config: u64,
    pub exclude_user: bool,
    pub exclude_kernel: bool,
}

/// Cycle-granularity monotonic clock used for region timing.
///
/// The fence keeps the timestamp read from being reordered into the measured
/// region.
#[cfg(target_arch = "x86_64")]
#[inline]
pub(crate) fn cycle_count() -> u64 {
    unsafe {
        std::arch::x86_64::_mm_lfence();
        std::arch::x86_64::_rdtsc()
    }
}

/// Nanosecond fallback where no cycle counter is readable from userspace.
#[cfg(not(target_arch = "x86_64"))]
#[inline]
pub(crate) fn cycle_count() -> u64 {
    use std::sync::OnceLock;
    use std::time::Instant;

    static EPOCH: OnceLock<Instant> = OnceLock::new();
    EPOCH.get_or_init(Instant::now).elapsed().as_nanos() as u64
}

/// Linux x86_64 implementation based on `perf_event_open`.
#[cfg(all(target_arch = "x86_64", target_os = "linux"))]
pub(crate) mod hw {
    use std::fs;
    use std::io;
    use std::mem;
    use std::os::unix::io::{AsRawFd, FromRawFd};

    use log::info;
    use perf_event_open_sys::{bindings::*, ioctls, perf_event_open};

    use super::EventCode;
    use crate::error::{Error, Result};

    /// Resolve a `perf`-style event name to a perf event code.
    pub(crate) fn resolve(name: &str) -> Result<EventCode> {
        let (base, modifiers) = match name.split_once(':') {
            Some((base, modifiers)) => (base, modifiers),
            None => (name, ""),
        };

        let mut code = resolve_base(base).ok_or_else(|| Error::UnknownEvent(name.to_string()))?;

        for modifier in modifiers.chars() {
            match modifier {
                'u' => code.exclude_kernel = true,
                'k' => code.exclude_user = true,
                _ => return Err(Error::UnknownEvent(name.to_string())),
            }
        }

        Ok(code)
    }

    fn resolve_base(base: &str) -> Option<EventCode> {
        let hw = |id: perf_hw_id| EventCode {
            type_: PERF_TYPE_HARDWARE,
            config: id as u64,
            exclude_user: false,
            exclude_kernel: false,
        };
        let cache = |id: perf_hw_cache_id,
                     op: perf_hw_cache_op_id,
                     result: perf_hw_cache_op_result_id| EventCode {
            type_: PERF_TYPE_HW_CACHE,
            config: id as u64 | (op as u64) << 8 | (result as u64) << 16,
            exclude_user: false,
            exclude_kernel: false,
        };

        use perf_event_open_sys::bindings::{
            PERF_COUNT_HW_CACHE_OP_READ as READ, PERF_COUNT_HW_CACHE_OP_WRITE as WRITE,
            PERF_COUNT_HW_CACHE_RESULT_ACCESS as ACCESS, PERF_COUNT_HW_CACHE_RESULT_MISS as MISS,
        };

        Some(match base {
            "cycles" | "cpu-cycles" => hw(PERF_COUNT_HW_CPU_CYCLES),
            "instructions" => hw(PERF_COUNT_HW_INSTRUCTIONS),
            "cache-references" => hw(PERF_COUNT_HW_CACHE_REFERENCES),
            "cache-misses" => hw(PERF_COUNT_HW_CACHE_MISSES),
            "branches" | "branch-instructions" => hw(PERF_COUNT_HW_BRANCH_INSTRUCTIONS),
            "branch-misses" => hw(PERF_COUNT_HW_BRANCH_MISSES),
            "bus-cycles" => hw(PERF_COUNT_HW_BUS_CYCLES),
            "ref-cycles" => hw(PERF_COUNT_HW_REF_CPU_CYCLES),
            "stalled-cycles-frontend" => hw(PERF_COUNT_HW_STALLED_CYCLES_FRONTEND),
            "stalled-cycles-backend" => hw(PERF_COUNT_HW_STALLED_CYCLES_BACKEND),

            "L1-dcache-loads" => cache(PERF_COUNT_HW_CACHE_L1D, READ, ACCESS),
            "L1-dcache-load-misses" => cache(PERF_COUNT_HW_CACHE_L1D, READ, MISS),
            "L1-dcache-stores" => cache(PERF_COUNT_HW_CACHE_L1D, WRITE, ACCESS),
            "L1-icache-load-misses" => cache(PERF_COUNT_HW_CACHE_L1I, READ, MISS),
            "LLC-loads" => cache(PERF_COUNT_HW_CACHE_LL, READ, ACCESS),
            "LLC-load-misses" => cache(PERF_COUNT_HW_CACHE_LL, READ, MISS),
            "LLC-stores" => cache(PERF_COUNT_HW_CACHE_LL, WRITE, ACCESS),
            "LLC-store-misses" => cache(PERF_COUNT_HW_CACHE_LL, WRITE, MISS),
            "dTLB-loads" => cache(PERF_COUNT_HW_CACHE_DTLB, READ, ACCESS),
            "dTLB-load-misses" => cache(PERF_COUNT_HW_CACHE_DTLB, READ, MISS),
            "dTLB-stores" => cache(PERF_COUNT_HW_CACHE_DTLB, WRITE, ACCESS),
            "dTLB-store-misses" => cache(PERF_COUNT_HW_CACHE_DTLB, WRITE, MISS),
            "iTLB-loads" => cache(PERF_COUNT_HW_CACHE_ITLB, READ, ACCESS),
            "iTLB-load-misses" => cache(PERF_COUNT_HW_CACHE_ITLB, READ, MISS),

            _ => {
                let config = base.strip_prefix('r')?;
                if config.is_empty() || !config.chars().all(|c| c.is_ascii_hexdigit()) {
                    return None;
                }
                EventCode {
                    type_: PERF_TYPE_RAW,
                    config: u64::from_str_radix(config, 16).ok()?,
                    exclude_user: false,
                    exclude_kernel: false,
                }
            }
        })
    }

    /// One open perf event, created disabled; counting is toggled around each
    /// region with `enable`/`disable` and the accumulated value read with
    /// `read(2)` on the event fd.
    pub(crate) struct EventHandle {
        file: fs::File,
    }

    impl EventHandle {
        pub(crate) fn open(code: &EventCode) -> Result<EventHandle> {
            let mut attrs = perf_event_attr {
                size: mem::size_of::<perf_event_attr>() as u32,
                type_: code.type_,
                config: code.config,
                ..perf_event_attr::default()
            };

            // Same-thread, any CPU. `pid = 0` means "calling thread", not
            // "any thread of the calling process".
            let pid = 0;
            let cpu = -1;
            let group_fd = -1;
            attrs.set_disabled(1);
            attrs.set_exclude_hv(1);
            if code.exclude_user {
                attrs.set_exclude_user(1);
            }
            if code.exclude_kernel {
                attrs.set_exclude_kernel(1);
            }

            let fd = unsafe {
                perf_event_open(&mut attrs, pid, cpu, group_fd, PERF_FLAG_FD_CLOEXEC.into())
            };
            if fd < 0 {
                return Err(Error::Platform(format!(
                    "perf_event_open failed: {}",
                    io::Error::last_os_error()
                )));
            }
            let file = unsafe { fs::File::from_raw_fd(fd) };

            info!(
                "EventHandle::open: type={} config={:#x} fd={}",
                code.type_,
                code.config,
                file.as_raw_fd()
            );

            Ok(EventHandle { file })
        }

        /// Handle on an fd that is not a perf event; every counter operation
        /// on it fails.
        #[cfg(test)]
        pub(crate) fn dead() -> EventHandle {
            EventHandle {
                file: fs::File::open("/dev/null").unwrap(),
            }
        }

        pub(crate) fn enable(&self) -> Result<()> {
            let fd = self.file.as_raw_fd();
            unsafe {
                if ioctls::RESET(fd, 0) < 0 || ioctls::ENABLE(fd, 0) < 0 {
                    return Err(Error::Platform(format!(
                        "could not enable counter: {}",
                        io::Error::last_os_error()
                    )));
                }
            }
            Ok(())
        }

        pub(crate) fn disable(&self) -> Result<()> {
            unsafe {
                if ioctls::DISABLE(self.file.as_raw_fd(), 0) < 0 {
                    return Err(Error::Platform(format!(
                        "could not disable counter: {}",
                        io::Error::last_os_error()
                    )));
                }
            }
            Ok(())
        }

        pub(crate) fn read_value(&self) -> Result<u64> {
            let mut value = 0u64;
            let read = unsafe {
                libc::read(
                    self.file.as_raw_fd(),
                    &mut value as *mut u64 as *mut libc::c_void,
                    mem::size_of::<u64>(),
                )
            };
            if read != mem::size_of::<u64>() as isize {
                return Err(Error::Platform(format!(
                    "counter read failed: {}",
                    io::Error::last_os_error()
                )));
            }
            Ok(value)
        }
    }

    /// Number of general-purpose hardware counters readable at once,
    /// detected with `cpuid`.
    pub(crate) fn capacity() -> Result<usize> {
        let cpuid0 = unsafe { std::arch::x86_64::__cpuid(0) };
        let mut vendor = [0u8; 12];
        vendor[0..4].copy_from_slice(&cpuid0.ebx.to_le_bytes());
        vendor[4..8].copy_from_slice(&cpuid0.edx.to_le_bytes());
        vendor[8..12].copy_from_slice(&cpuid0.ecx.to_le_bytes());

        match &vendor {
            b"GenuineIntel" => {
                if cpuid0.eax < 0xA {
                    return Err(Error::Platform(
                        "cpuid has no architectural performance monitoring leaf".to_string(),
                    ));
                }
                let leaf = unsafe { std::arch::x86_64::__cpuid(0xA) };
                let counters = (leaf.eax >> 8) & 0xff;
                info!("capacity: Intel, {} general-purpose counters", counters);
                if counters == 0 {
                    return Err(Error::Platform(
                        "cpuid reports zero general-purpose counters".to_string(),
                    ));
                }
                Ok(counters as usize)
            }
            // AMD exposes no counter-count leaf comparable to Intel's 0xA;
            // every family since K7 has at least four programmable counters
            // and Zen has six.
            b"AuthenticAMD" => {
                let family = (cpuid0_family()) as usize;
                let counters = if family >= 23 { 6 } else { 4 };
                info!("capacity: AMD family {}, {} counters", family, counters);
                Ok(counters)
            }
            _ => Err(Error::Platform(format!(
                "unknown CPU vendor {:?}",
                String::from_utf8_lossy(&vendor)
            ))),
        }
    }

    fn cpuid0_family() -> u32 {
        let version = unsafe { std::arch::x86_64::__cpuid(1) }.eax;
        let mut family = (version >> 8) & 0xf;
        if family == 15 {
            family += (version >> 20) & 0xff;
        }
        family
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn resolves_generalized_events() {
            let code = resolve("instructions").unwrap();
            assert_eq!(code.type_, PERF_TYPE_HARDWARE);
            assert_eq!(code.config, PERF_COUNT_HW_INSTRUCTIONS as u64);
            assert!(!code.exclude_kernel && !code.exclude_user);
        }

        #[test]
        fn resolves_cache_events() {
            let code = resolve("LLC-load-misses").unwrap();
            assert_eq!(code.type_, PERF_TYPE_HW_CACHE);
            assert_eq!(
                code.config,
                PERF_COUNT_HW_CACHE_LL as u64
                    | (PERF_COUNT_HW_CACHE_OP_READ as u64) << 8
                    | (PERF_COUNT_HW_CACHE_RESULT_MISS as u64) << 16
            );
        }

        #[test]
        fn resolves_raw_events_and_modifiers() {
            let code = resolve("r01c2:u").unwrap();
            assert_eq!(code.type_, PERF_TYPE_RAW);
            assert_eq!(code.config, 0x01c2);
            assert!(code.exclude_kernel);
            assert!(!code.exclude_user);
        }

        #[test]
        fn rejects_unknown_names() {
            assert!(matches!(resolve("EVT_A"), Err(Error::UnknownEvent(_))));
            assert!(matches!(resolve("rxyz"), Err(Error::UnknownEvent(_))));
            assert!(matches!(
                resolve("cycles:q"),
                Err(Error::UnknownEvent(_))
            ));
        }
    }
}

#[cfg(not(all(target_arch = "x86_64", target_os = "linux")))]
pub(crate) mod hw {
    use super::EventCode;
    use crate::error::{Error, Result};

    const UNSUPPORTED: &str = "hardware counters require Linux on x86_64";

    pub(crate) fn resolve(_name: &str) -> Result<EventCode> {
        Err(Error::Platform(UNSUPPORTED.to_string()))
    }

    pub(crate) enum EventHandle {}

    impl EventHandle {
        pub(crate) fn open(_code: &EventCode) -> Result<EventHandle> {
            Err(Error::Platform(UNSUPPORTED.to_string()))
        }

        pub(crate) fn enable(&self) -> Result<()> {
            match *self {}
        }

        pub(crate) fn disable(&self) -> Result<()> {
            match *self {}
        }

        pub(crate) fn read_value(&self) -> Result<u64> {
            match *self {}
        }
    }

    pub(crate) fn capacity() -> Result<usize> {
        Err(Error::Platform(UNSUPPORTED.to_string()))
    }
}
