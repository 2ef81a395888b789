//! Region multiplexing: one counter per pass, merged by region identity.
//!
//! A CPU can only read a handful of hardware counters at once. Instead of
//! multiplexing counters in time within a single execution (and paying for
//! the interleaving artifacts that brings), the engine re-executes the same
//! deterministic workload once per configured counter - plus one leading
//! timing-only pass - and merges the per-pass samples by region identifier.
//! The result reads as if every counter had been observed on one execution,
//! at the cost of `1 + |spec|` executions of the workload per repetition.

use log::warn;
use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use crate::error::{Error, Result};
use crate::events::CounterSpec;
use crate::session::CounterSession;

/// Application-chosen identifier naming a code region, stable across passes.
pub type RegionId = u64;

/// The result of one `enter`/`leave` bracket within one pass.
#[derive(Clone, Debug, PartialEq)]
pub struct RegionSample {
    /// Elapsed cycles between `enter` and `leave`.
    pub elapsed: u64,
    /// The active counter's reading; `None` on the timing-only pass.
    pub counter: Option<u64>,
    /// True when the counter for this pass could not be armed or started and
    /// the reading is a zero placeholder.
    pub degraded: bool,
}

/// The accumulated, merged view of a region across all passes of one
/// repetition.
#[derive(Clone, Debug, PartialEq)]
pub struct RegionRecord {
    pub id: RegionId,
    /// Elapsed cycles observed in the timing-only pass. All passes execute
    /// the identical workload, so one pass's timing stands for all of them.
    pub elapsed: u64,
    /// One value per counter pass, in counter specification order.
    pub counter_values: SmallVec<[u64; 8]>,
}

/// Drives one measurement pass at a time, routing region-boundary calls from
/// the workload into accumulated samples.
///
/// A multiplexer is created fresh per repetition, starting at the timing-only
/// pass. The workload calls `enter`/`leave` around each region of interest;
/// the driver calls `advance` between passes and `collect` after the last
/// one. Regions do not nest and do not interleave within a pass, and every
/// region must be entered in the timing-only pass first - violations are
/// `Protocol` errors.
pub struct RegionMultiplexer<'s> {
    session: CounterSession,
    spec: &'s CounterSpec,
    /// Current pass index; -1 is the timing-only baseline pass.
    pass: isize,
    open_region: Option<RegionId>,
    /// Set when the current bracket's counter had to be dropped.
    degraded: bool,
    order: Vec<RegionId>,
    records: FxHashMap<RegionId, RegionRecord>,
}

impl<'s> RegionMultiplexer<'s> {
    pub fn new(spec: &'s CounterSpec) -> RegionMultiplexer<'s> {
        RegionMultiplexer {
            session: CounterSession::new(),
            spec,
            pass: -1,
            open_region: None,
            degraded: false,
            order: Vec::new(),
            records: FxHashMap::default(),
        }
    }

    /// Index of the pass currently executing; `-1` is the timing-only pass.
    pub fn pass_index(&self) -> isize {
        self.pass
    }

    /// Moves to the next pass. Returns true once all passes (the baseline
    /// plus one per configured counter) are exhausted. Must be called between
    /// passes, never while a region is open.
    pub fn advance(&mut self) -> Result<bool> {
        if self.open_region.is_some() {
            return Err(Error::State("advance called while a region is open"));
        }
        if !self.is_exhausted() {
            self.pass += 1;
        }
        Ok(self.is_exhausted())
    }

    /// True once `advance` has moved past the last counter index.
    pub fn is_exhausted(&self) -> bool {
        self.pass >= self.spec.len() as isize
    }

    /// Marks the beginning of region `id` for the current pass: arms the
    /// session with this pass's counter (none on the timing-only pass) and
    /// starts it.
    ///
    /// Arming or starting failures degrade the bracket to elapsed-time-only
    /// rather than failing the experiment; the dropped counter is replaced by
    /// a zero placeholder at `leave` so the output keeps its shape.
    pub fn enter(&mut self, id: RegionId) -> Result<()> {
        if let Some(open) = self.open_region {
            return Err(Error::Protocol(format!(
                "enter({}) while region {} is still open",
                id, open
            )));
        }
        if self.is_exhausted() {
            return Err(Error::State("enter called after the last pass"));
        }
        self.open_region = Some(id);
        self.degraded = false;

        let events: &[String] = match self.pass {
            -1 => &[],
            i => std::slice::from_ref(&self.spec.names()[i as usize]),
        };

        if let Err(e) = self.session.arm(events) {
            if !e.is_degradation() {
                return Err(e);
            }
            warn!("pass {}: counter dropped while arming: {}", self.pass, e);
            self.degraded = true;
        }

        if let Err(e) = self.session.start() {
            if !e.is_degradation() {
                return Err(e);
            }
            warn!("pass {}: counter dropped at start: {}", self.pass, e);
            self.degraded = true;
        }
        Ok(())
    }

    /// Marks the end of region `id`, stopping the session and folding the
    /// sample into the region's record.
    pub fn leave(&mut self, id: RegionId) -> Result<RegionSample> {
        match self.open_region {
            Some(open) if open == id => {}
            Some(open) => {
                return Err(Error::Protocol(format!(
                    "leave({}) does not match open region {}",
                    id, open
                )));
            }
            None => {
                return Err(Error::Protocol(format!(
                    "leave({}) without a matching enter",
                    id
                )));
            }
        }
        self.open_region = None;

        let (elapsed, values) = self.session.stop()?;
        let sample = RegionSample {
            elapsed,
            counter: match self.pass {
                -1 => None,
                // Degraded passes contribute a zero placeholder so the row
                // keeps one column per configured counter.
                _ => Some(values.first().copied().unwrap_or(0)),
            },
            degraded: self.pass >= 0 && (self.degraded || values.is_empty()),
        };

        match self.records.get_mut(&id) {
            None => {
                if self.pass >= 0 {
                    return Err(Error::Protocol(format!(
                        "region {} first observed after the timing-only pass",
                        id
                    )));
                }
                self.order.push(id);
                self.records.insert(
                    id,
                    RegionRecord {
                        id,
                        elapsed: sample.elapsed,
                        counter_values: SmallVec::new(),
                    },
                );
            }
            Some(record) => {
                if self.pass < 0 {
                    return Err(Error::Protocol(format!(
                        "region {} entered twice in the timing-only pass",
                        id
                    )));
                }
                // Exactly one sample per region per pass keeps the columns
                // aligned with the counter specification.
                if record.counter_values.len() != self.pass as usize {
                    return Err(Error::Protocol(format!(
                        "region {} sampled out of step in pass {}",
                        id, self.pass
                    )));
                }
                record
                    .counter_values
                    .push(sample.counter.unwrap_or(0));
            }
        }
        Ok(sample)
    }

    /// Returns the records of every region observed this repetition, in
    /// first-seen order. Idempotent: calling it again without further passes
    /// returns identical data.
    pub fn collect(&self) -> Vec<RegionRecord> {
        self.order
            .iter()
            .map(|id| self.records[id].clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(names: &[&str]) -> CounterSpec {
        CounterSpec::new(names.iter().map(|s| s.to_string()).collect())
    }

    fn run_all_passes(mux: &mut RegionMultiplexer<'_>, regions: &[RegionId]) {
        let mut bracket = |mux: &mut RegionMultiplexer<'_>| {
            for &id in regions {
                mux.enter(id).unwrap();
                let mut spin = 0u64;
                for i in 0..1_000u64 {
                    spin = spin.wrapping_add(std::hint::black_box(i));
                }
                std::hint::black_box(spin);
                mux.leave(id).unwrap();
            }
        };
        bracket(mux);
        while !mux.advance().unwrap() {
            bracket(mux);
        }
    }

    #[test]
    fn empty_spec_runs_a_single_pass() {
        let spec = spec(&[]);
        let mut mux = RegionMultiplexer::new(&spec);
        assert_eq!(mux.pass_index(), -1);
        run_all_passes(&mut mux, &[7]);
        assert!(mux.is_exhausted());

        let records = mux.collect();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].id, 7);
        assert!(records[0].counter_values.is_empty());
    }

    #[test]
    fn one_column_per_configured_counter() {
        let spec = spec(&["EVT_A", "EVT_B"]);
        let mut mux = RegionMultiplexer::new(&spec);
        run_all_passes(&mut mux, &[42]);

        let records = mux.collect();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].id, 42);
        assert!(records[0].elapsed > 0);
        assert_eq!(records[0].counter_values.len(), 2);
    }

    #[test]
    fn regions_come_back_in_first_seen_order() {
        let spec = spec(&["EVT_A"]);
        let mut mux = RegionMultiplexer::new(&spec);
        run_all_passes(&mut mux, &[30, 10, 20]);

        let ids: Vec<_> = mux.collect().iter().map(|r| r.id).collect();
        assert_eq!(ids, [30, 10, 20]);
    }

    #[test]
    fn collect_is_idempotent() {
        let spec = spec(&["EVT_A"]);
        let mut mux = RegionMultiplexer::new(&spec);
        run_all_passes(&mut mux, &[1, 2]);
        assert_eq!(mux.collect(), mux.collect());
    }

    #[test]
    fn nested_enter_is_a_protocol_error() {
        let spec = spec(&[]);
        let mut mux = RegionMultiplexer::new(&spec);
        mux.enter(1).unwrap();
        assert!(matches!(mux.enter(2), Err(Error::Protocol(_))));
    }

    #[test]
    fn mismatched_leave_is_a_protocol_error() {
        let spec = spec(&[]);
        let mut mux = RegionMultiplexer::new(&spec);
        mux.enter(1).unwrap();
        assert!(matches!(mux.leave(2), Err(Error::Protocol(_))));
        assert!(matches!(mux.leave(3), Err(Error::Protocol(_))));
    }

    #[test]
    fn leave_without_enter_is_a_protocol_error() {
        let spec = spec(&[]);
        let mut mux = RegionMultiplexer::new(&spec);
        assert!(matches!(mux.leave(1), Err(Error::Protocol(_))));
    }

    #[test]
    fn advance_during_an_open_region_is_a_state_error() {
        let spec = spec(&["EVT_A"]);
        let mut mux = RegionMultiplexer::new(&spec);
        mux.enter(1).unwrap();
        assert!(matches!(mux.advance(), Err(Error::State(_))));
    }

    #[test]
    fn late_region_is_a_protocol_error() {
        let spec = spec(&["EVT_A"]);
        let mut mux = RegionMultiplexer::new(&spec);

        mux.enter(1).unwrap();
        mux.leave(1).unwrap();
        assert!(!mux.advance().unwrap());

        mux.enter(1).unwrap();
        mux.leave(1).unwrap();
        mux.enter(99).unwrap();
        assert!(matches!(mux.leave(99), Err(Error::Protocol(_))));
    }

    #[test]
    fn duplicate_region_in_timing_pass_is_a_protocol_error() {
        let spec = spec(&[]);
        let mut mux = RegionMultiplexer::new(&spec);
        mux.enter(5).unwrap();
        mux.leave(5).unwrap();
        mux.enter(5).unwrap();
        assert!(matches!(mux.leave(5), Err(Error::Protocol(_))));
    }

    #[test]
    fn unresolvable_counter_yields_zero_placeholder() {
        let spec = spec(&["DEFINITELY_NOT_AN_EVENT"]);
        let mut mux = RegionMultiplexer::new(&spec);

        mux.enter(9).unwrap();
        mux.leave(9).unwrap();
        assert!(!mux.advance().unwrap());

        mux.enter(9).unwrap();
        let sample = mux.leave(9).unwrap();
        assert!(sample.degraded);
        assert_eq!(sample.counter, Some(0));
        assert!(mux.advance().unwrap());

        let records = mux.collect();
        assert_eq!(records[0].counter_values.as_slice(), &[0]);
    }

    #[test]
    fn baseline_sample_has_no_counter() {
        let spec = spec(&["EVT_A"]);
        let mut mux = RegionMultiplexer::new(&spec);
        mux.enter(3).unwrap();
        let sample = mux.leave(3).unwrap();
        assert_eq!(sample.counter, None);
        assert!(!sample.degraded);
    }
}
