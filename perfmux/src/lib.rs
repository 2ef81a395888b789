//! Performance-counter multiplexing for repeated-execution benchmarks.
//!
//! Hardware exposes only a few simultaneously readable counters. `perfmux`
//! instruments named code regions with an arbitrarily long list of named
//! events by re-executing the identical workload once per event (plus a
//! leading timing-only pass) and merging the per-pass samples into one
//! record per region per repetition - as if every counter had been observed
//! on a single execution.

mod counters;
mod driver;
mod error;
mod events;
mod multiplex;
mod session;
mod sink;

pub use crate::driver::MeasurementDriver;
pub use crate::error::{Error, Result};
pub use crate::events::CounterSpec;
pub use crate::multiplex::{RegionId, RegionMultiplexer, RegionRecord, RegionSample};
pub use crate::session::CounterSession;
pub use crate::sink::{MemorySink, RecordSink, TableSink};
