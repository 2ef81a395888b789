//! Process-to-core pinning.
//!
//! Counter readings are only stable if the scheduler cannot migrate the
//! process between cores mid-pass, so each of the two processes is pinned to
//! a fixed core for the whole experiment.

use std::io;

#[cfg(target_os = "linux")]
pub fn pin_to_core(core: usize) -> io::Result<()> {
    // CPU_SET indexes into a fixed-size bit mask and aborts on cores beyond
    // its capacity; report those as EINVAL instead.
    if core >= 8 * std::mem::size_of::<libc::cpu_set_t>() {
        return Err(io::Error::from_raw_os_error(libc::EINVAL));
    }
    unsafe {
        let mut set: libc::cpu_set_t = std::mem::zeroed();
        libc::CPU_ZERO(&mut set);
        libc::CPU_SET(core, &mut set);
        if libc::sched_setaffinity(0, std::mem::size_of::<libc::cpu_set_t>(), &set) != 0 {
            return Err(io::Error::last_os_error());
        }
    }
    Ok(())
}

#[cfg(not(target_os = "linux"))]
pub fn pin_to_core(_core: usize) -> io::Result<()> {
    // No pinning elsewhere; measurements are merely noisier.
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[cfg(target_os = "linux")]
    fn pinning_to_the_first_core_succeeds() {
        pin_to_core(0).unwrap();
    }

    #[test]
    fn pinning_beyond_the_mask_capacity_fails_cleanly() {
        let result = pin_to_core(100_000);
        if cfg!(target_os = "linux") {
            assert_eq!(result.unwrap_err().kind(), io::ErrorKind::InvalidInput);
        }
    }
}
