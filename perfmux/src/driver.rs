//! The measurement driver: repetitions of full multi-pass cycles.

use log::error;

use crate::error::Result;
use crate::events::CounterSpec;
use crate::multiplex::RegionMultiplexer;
use crate::sink::RecordSink;

/// Runs a full experiment.
///
/// For each repetition the driver creates a fresh [`RegionMultiplexer`],
/// invokes the workload once for the timing-only pass and once per configured
/// counter, then forwards the merged records to the sink.
///
/// The workload must call `enter`/`leave` around each of its regions exactly
/// once per invocation and must be re-invocable with identical control flow
/// on every pass. The driver cannot check this precondition; a workload with
/// pass-dependent behavior yields misaligned records (caught only when a
/// region's sample count falls out of step).
pub struct MeasurementDriver<'s> {
    spec: &'s CounterSpec,
    repetitions: u32,
}

impl<'s> MeasurementDriver<'s> {
    pub fn new(spec: &'s CounterSpec, repetitions: u32) -> MeasurementDriver<'s> {
        MeasurementDriver { spec, repetitions }
    }

    /// Runs every repetition. A failure inside one repetition discards that
    /// repetition's data and is surfaced on the log stream; subsequent
    /// repetitions still run. There is no retry of hardware operations.
    pub fn run<W>(&self, mut workload: W, sink: &dyn RecordSink)
    where
        W: FnMut(&mut RegionMultiplexer<'_>) -> Result<()>,
    {
        for repetition in 0..self.repetitions {
            if let Err(e) = self.run_repetition(&mut workload, sink, repetition) {
                error!("repetition {} aborted: {}", repetition, e);
            }
        }
    }

    fn run_repetition<W>(
        &self,
        workload: &mut W,
        sink: &dyn RecordSink,
        repetition: u32,
    ) -> Result<()>
    where
        W: FnMut(&mut RegionMultiplexer<'_>) -> Result<()>,
    {
        let mut multiplexer = RegionMultiplexer::new(self.spec);

        // Timing-only pass first; it defines the set of regions.
        workload(&mut multiplexer)?;
        while !multiplexer.advance()? {
            workload(&mut multiplexer)?;
        }

        for record in multiplexer.collect() {
            sink.emit(repetition, &record);
        }
        Ok(())
    }
}
