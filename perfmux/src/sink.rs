//! Output sinks for merged region records.

use std::error::Error;
use std::fmt::Debug;
use std::fs;
use std::io::Write;
use std::path::Path;

use parking_lot::Mutex;

use crate::events::CounterSpec;
use crate::multiplex::RegionRecord;

const ID_WIDTH: usize = 10;
const TIME_WIDTH: usize = 15;
const MIN_COUNTER_WIDTH: usize = 25;

/// Receives one row per region record per repetition.
///
/// The driver emits all records of repetition `n` before any record of
/// repetition `n + 1`; within a repetition, records arrive in first-seen
/// region order.
pub trait RecordSink {
    fn emit(&self, repetition: u32, record: &RegionRecord);
}

/// What table data gets written to.
trait BackingStorage: Write + Send + Debug {
    fn drain_bytes(&mut self) -> Vec<u8>;
}

impl BackingStorage for fs::File {
    fn drain_bytes(&mut self) -> Vec<u8> {
        unimplemented!()
    }
}

impl BackingStorage for Vec<u8> {
    fn drain_bytes(&mut self) -> Vec<u8> {
        let mut bytes = Vec::new();
        std::mem::swap(&mut bytes, self);
        bytes
    }
}

/// Fixed-width text sink: one header line, then one row per record with the
/// region id, the elapsed cycles and one column per configured counter, in
/// counter specification order. Degraded readings appear as zeros, keeping
/// the table shape stable across partially-unsupported counter lists.
#[derive(Debug)]
pub struct TableSink {
    out: Mutex<Box<dyn BackingStorage>>,
    counter_width: usize,
}

impl TableSink {
    pub fn from_path(path: &Path, spec: &CounterSpec) -> Result<TableSink, Box<dyn Error + Send + Sync>> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let file = fs::File::create(path)?;
        Ok(Self::from_storage(Box::new(file), spec))
    }

    /// In-memory sink for tests; the written table is recovered with
    /// [`TableSink::into_bytes`].
    pub fn in_memory(spec: &CounterSpec) -> TableSink {
        Self::from_storage(Box::new(Vec::new()), spec)
    }

    fn from_storage(storage: Box<dyn BackingStorage>, spec: &CounterSpec) -> TableSink {
        let sink = TableSink {
            out: Mutex::new(storage),
            counter_width: MIN_COUNTER_WIDTH.max(spec.max_name_len() + 2),
        };
        sink.write_header(spec);
        sink
    }

    fn write_header(&self, spec: &CounterSpec) {
        let mut out = self.out.lock();
        write!(out, "{:>ID_WIDTH$}{:>TIME_WIDTH$}", "id", "time").unwrap();
        for name in spec.names() {
            write!(out, "{:>width$}", name, width = self.counter_width).unwrap();
        }
        writeln!(out).unwrap();
    }

    /// Returns all bytes written so far. Meant for unit tests; panics if the
    /// backing storage is a real file.
    pub fn into_bytes(self) -> Vec<u8> {
        let mut out = self.out.lock();
        out.flush().unwrap();
        out.drain_bytes()
    }
}

impl RecordSink for TableSink {
    fn emit(&self, _repetition: u32, record: &RegionRecord) {
        let mut out = self.out.lock();
        write!(out, "{:>ID_WIDTH$}{:>TIME_WIDTH$}", record.id, record.elapsed).unwrap();
        for value in &record.counter_values {
            write!(out, "{:>width$}", value, width = self.counter_width).unwrap();
        }
        writeln!(out).unwrap();
    }
}

impl Drop for TableSink {
    fn drop(&mut self) {
        let _ = self.out.lock().flush();
    }
}

/// Collects emitted rows for assertions in tests.
#[derive(Debug, Default)]
pub struct MemorySink {
    rows: Mutex<Vec<(u32, RegionRecord)>>,
}

impl MemorySink {
    pub fn new() -> MemorySink {
        MemorySink::default()
    }

    pub fn rows(&self) -> Vec<(u32, RegionRecord)> {
        self.rows.lock().clone()
    }
}

impl RecordSink for MemorySink {
    fn emit(&self, repetition: u32, record: &RegionRecord) {
        self.rows.lock().push((repetition, record.clone()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use smallvec::smallvec;

    #[test]
    fn header_and_rows_share_column_layout() {
        let spec = CounterSpec::new(vec!["EVT_A".to_string(), "EVT_B".to_string()]);
        let sink = TableSink::in_memory(&spec);
        sink.emit(
            0,
            &RegionRecord {
                id: 42,
                elapsed: 1234,
                counter_values: smallvec![7, 8],
            },
        );

        let text = String::from_utf8(sink.into_bytes()).unwrap();
        let mut lines = text.lines();
        let header = lines.next().unwrap();
        let row = lines.next().unwrap();
        assert!(lines.next().is_none());

        assert_eq!(
            header.split_whitespace().collect::<Vec<_>>(),
            ["id", "time", "EVT_A", "EVT_B"]
        );
        assert_eq!(
            row.split_whitespace().collect::<Vec<_>>(),
            ["42", "1234", "7", "8"]
        );
        assert_eq!(header.len(), row.len());
    }

    #[test]
    fn counter_columns_widen_for_long_event_names() {
        let long_name = "x".repeat(40);
        let spec = CounterSpec::new(vec![long_name.clone()]);
        let sink = TableSink::in_memory(&spec);
        let text = String::from_utf8(sink.into_bytes()).unwrap();
        assert!(text.lines().next().unwrap().contains(&long_name));
    }
}
