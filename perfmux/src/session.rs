//! Counter sessions: exclusive access to the hardware counter facility.

use log::warn;

use crate::counters::{cycle_count, hw};
use crate::error::{Error, Result};

/// Mediates access to the machine's hardware performance counter facility as
/// a single logical session.
///
/// A session owns one armed set of events at a time and moves through a
/// strict arm / start / stop cycle. Arming and starting mutate process-wide
/// counter state; by contract only one session is active per process at a
/// time (documented precondition, not enforced structurally).
pub struct CounterSession {
    armed: Vec<hw::EventHandle>,
    capacity: Option<usize>,
    counting: bool,
    /// Set when `start` could not enable the armed events; the session then
    /// measures elapsed time only until the next `arm`.
    unavailable: bool,
    timer_start: u64,
}

impl CounterSession {
    pub fn new() -> CounterSession {
        let capacity = match hw::capacity() {
            Ok(n) => Some(n),
            Err(e) => {
                warn!("counter capacity unknown: {}", e);
                None
            }
        };
        CounterSession {
            armed: Vec::new(),
            capacity,
            counting: false,
            unavailable: false,
            timer_start: 0,
        }
    }

    /// Number of counters the platform can read simultaneously.
    pub fn capacity(&self) -> Result<usize> {
        self.capacity
            .ok_or_else(|| Error::Platform("hardware counter capacity not reported".to_string()))
    }

    /// Configures the session to read exactly these named events on the next
    /// `start`. An empty list is valid and means "measure elapsed time only".
    ///
    /// Re-arming replaces any previously configured set. If a name cannot be
    /// resolved or opened, the session falls back to a zero-counter
    /// configuration (elapsed time only) and the error is returned so the
    /// caller can record the degradation; the session itself stays usable.
    pub fn arm(&mut self, event_names: &[String]) -> Result<()> {
        if self.counting {
            return Err(Error::State("cannot re-arm while a measurement is in progress"));
        }
        self.armed.clear();
        self.unavailable = false;

        if let Some(capacity) = self.capacity {
            if event_names.len() > capacity {
                return Err(Error::State("more events requested than hardware counters"));
            }
        }

        for name in event_names {
            let opened = hw::resolve(name).and_then(|code| hw::EventHandle::open(&code));
            match opened {
                Ok(handle) => self.armed.push(handle),
                Err(e) => {
                    self.armed.clear();
                    return Err(e);
                }
            }
        }
        Ok(())
    }

    /// Begins counting and timing.
    ///
    /// If the facility refuses to start, the session keeps timing with the
    /// monotonic cycle clock and returns the error; `stop` will then report
    /// elapsed time with no counter values.
    pub fn start(&mut self) -> Result<()> {
        if self.counting {
            return Err(Error::State("start called while already counting"));
        }
        self.counting = true;

        let mut result = Ok(());
        for (enabled, handle) in self.armed.iter().enumerate() {
            if let Err(e) = handle.enable() {
                // Switch off whatever already started counting; the session
                // falls back to elapsed time only.
                for handle in &self.armed[..enabled] {
                    let _ = handle.disable();
                }
                self.unavailable = true;
                result = Err(e);
                break;
            }
        }

        // Timer last, so counter setup is not billed to the region.
        self.timer_start = cycle_count();
        result
    }

    /// Ends counting; returns elapsed cycles and one value per armed event.
    ///
    /// The value list is empty when the armed set was empty or `start`
    /// failed.
    pub fn stop(&mut self) -> Result<(u64, Vec<u64>)> {
        let timer_end = cycle_count();
        if !self.counting {
            return Err(Error::State("stop called while not counting"));
        }
        self.counting = false;

        let elapsed = timer_end.wrapping_sub(self.timer_start);
        if self.armed.is_empty() || self.unavailable {
            return Ok((elapsed, Vec::new()));
        }

        let mut values = Vec::with_capacity(self.armed.len());
        for handle in &self.armed {
            handle.disable()?;
            values.push(handle.read_value()?);
        }
        Ok((elapsed, values))
    }
}

impl Default for CounterSession {
    fn default() -> Self {
        CounterSession::new()
    }
}
