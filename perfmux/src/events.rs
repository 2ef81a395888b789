//! Counter specifications and their line-oriented text sources.

use std::fs;
use std::io::{self, BufRead};
use std::path::Path;

/// An ordered list of hardware event names.
///
/// The order is significant twice over: it fixes the set of measurement
/// passes to run (one per entry, plus the leading timing-only pass) and the
/// column order in which per-region counter values are reported.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CounterSpec {
    names: Vec<String>,
}

impl CounterSpec {
    pub fn new(names: Vec<String>) -> CounterSpec {
        CounterSpec { names }
    }

    /// Reads event names from the given files, one name per line, in file
    /// order. Surrounding whitespace is stripped and blank lines are skipped.
    pub fn from_files<P: AsRef<Path>>(paths: &[P]) -> io::Result<CounterSpec> {
        let mut spec = CounterSpec::default();
        for path in paths {
            let file = fs::File::open(path)?;
            spec.append_lines(io::BufReader::new(file))?;
        }
        Ok(spec)
    }

    /// Appends event names from a line-oriented reader.
    pub fn append_lines<R: BufRead>(&mut self, reader: R) -> io::Result<()> {
        for line in reader.lines() {
            let line = line?;
            let name = line.trim();
            if !name.is_empty() {
                self.names.push(name.to_string());
            }
        }
        Ok(())
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Length of the longest event name. Collaborators use this to size the
    /// counter columns of the output table.
    pub fn max_name_len(&self) -> usize {
        self.names.iter().map(|n| n.len()).max().unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lines_are_trimmed_and_blanks_skipped() {
        let text = "  instructions \n\ncache-misses\n   \nr01c2\n";
        let mut spec = CounterSpec::default();
        spec.append_lines(io::Cursor::new(text)).unwrap();
        assert_eq!(spec.names(), ["instructions", "cache-misses", "r01c2"]);
        assert_eq!(spec.len(), 3);
        assert_eq!(spec.max_name_len(), "cache-misses".len());
    }

    #[test]
    fn appending_preserves_source_order() {
        let mut spec = CounterSpec::new(vec!["cycles".to_string()]);
        spec.append_lines(io::Cursor::new("instructions\n")).unwrap();
        assert_eq!(spec.names(), ["cycles", "instructions"]);
    }

    #[test]
    fn empty_spec() {
        let spec = CounterSpec::default();
        assert!(spec.is_empty());
        assert_eq!(spec.max_name_len(), 0);
    }
}
