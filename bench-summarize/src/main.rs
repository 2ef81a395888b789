//! Averages the rows of a cache-bench result table.
//!
//! cache-bench emits one row per region per repetition; this tool groups the
//! rows by region id and reports mean and sample standard deviation for the
//! elapsed time and every counter column.

#[macro_use]
extern crate prettytable;

use std::error::Error;
use std::fs;
use std::path::PathBuf;

use clap::Parser;
use prettytable::Table;
use rustc_hash::FxHashMap;
use serde::Serialize;

#[derive(Parser, Debug)]
#[command(about = "Summarize a cache-bench result table")]
struct Opt {
    /// Result table written by cache-bench.
    file: PathBuf,

    /// Emit JSON instead of a table.
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Serialize)]
struct ColumnSummary {
    name: String,
    mean: f64,
    stdev: f64,
}

#[derive(Debug, Serialize)]
struct RegionSummary {
    id: u64,
    samples: usize,
    columns: Vec<ColumnSummary>,
}

fn main() -> Result<(), Box<dyn Error>> {
    let opt = Opt::parse();

    let text = fs::read_to_string(&opt.file)?;
    let summaries = summarize(&text)?;

    if opt.json {
        println!("{}", serde_json::to_string_pretty(&summaries)?);
        return Ok(());
    }

    let column_names: Vec<&str> = summaries
        .first()
        .map(|s| s.columns.iter().map(|c| c.name.as_str()).collect())
        .unwrap_or_default();

    let mut table = Table::new();
    let mut header = row!["id", "samples"];
    for name in &column_names {
        header.add_cell(cell!(name));
    }
    table.add_row(header);

    for summary in &summaries {
        let mut row = row![summary.id, summary.samples];
        for column in &summary.columns {
            row.add_cell(cell!(format!("{:.1} ± {:.1}", column.mean, column.stdev)));
        }
        table.add_row(row);
    }
    table.printstd();

    Ok(())
}

/// Parses a header line plus data rows and folds them into per-region
/// summaries, in first-seen region order.
fn summarize(text: &str) -> Result<Vec<RegionSummary>, Box<dyn Error>> {
    let mut lines = text.lines();
    let header: Vec<&str> = lines.next().ok_or("empty input")?.split_whitespace().collect();
    if header.len() < 2 || header[0] != "id" {
        return Err("malformed header: expected `id time [counters...]`".into());
    }
    // Everything after "id" is a value column (time plus the counters).
    let column_names: Vec<String> = header[1..].iter().map(|s| s.to_string()).collect();

    let mut order: Vec<u64> = Vec::new();
    let mut groups: FxHashMap<u64, Vec<Vec<u64>>> = FxHashMap::default();

    for (line_no, line) in lines.enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() != header.len() {
            return Err(format!(
                "row {}: expected {} fields, found {}",
                line_no + 2,
                header.len(),
                fields.len()
            )
            .into());
        }
        let id: u64 = fields[0].parse()?;
        let values = fields[1..]
            .iter()
            .map(|f| f.parse())
            .collect::<Result<Vec<u64>, _>>()?;

        groups.entry(id).or_insert_with(|| {
            order.push(id);
            Vec::new()
        });
        groups.get_mut(&id).unwrap().push(values);
    }

    Ok(order
        .iter()
        .map(|id| {
            let rows = &groups[id];
            let columns = column_names
                .iter()
                .enumerate()
                .map(|(i, name)| {
                    let samples: Vec<f64> = rows.iter().map(|r| r[i] as f64).collect();
                    ColumnSummary {
                        name: name.clone(),
                        mean: mean(&samples),
                        stdev: stdev(&samples),
                    }
                })
                .collect();
            RegionSummary {
                id: *id,
                samples: rows.len(),
                columns,
            }
        })
        .collect())
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Sample standard deviation; zero for fewer than two samples.
fn stdev(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let mean = mean(values);
    let sum_sq: f64 = values.iter().map(|v| (v - mean).powi(2)).sum();
    (sum_sq / (values.len() - 1) as f64).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
        id           time      EVT_A      EVT_B\n\
 305201          100          4          6\n\
 306201          200          8         10\n\
 305201          300          6          6\n\
 306201          400         12         10\n";

    #[test]
    fn groups_rows_by_region_in_first_seen_order() {
        let summaries = summarize(SAMPLE).unwrap();
        assert_eq!(summaries.len(), 2);
        assert_eq!(summaries[0].id, 305_201);
        assert_eq!(summaries[1].id, 306_201);
        assert_eq!(summaries[0].samples, 2);
    }

    #[test]
    fn means_and_stdevs_are_per_column() {
        let summaries = summarize(SAMPLE).unwrap();
        let time = &summaries[0].columns[0];
        assert_eq!(time.name, "time");
        assert!((time.mean - 200.0).abs() < 1e-9);
        assert!((time.stdev - 141.4213562373095).abs() < 1e-6);

        let evt_b = &summaries[1].columns[2];
        assert_eq!(evt_b.name, "EVT_B");
        assert!((evt_b.mean - 10.0).abs() < 1e-9);
        assert!(evt_b.stdev.abs() < 1e-9);
    }

    #[test]
    fn single_sample_has_zero_stdev() {
        let summaries = summarize("id time\n7 123\n").unwrap();
        assert_eq!(summaries[0].samples, 1);
        assert!(summaries[0].columns[0].stdev.abs() < 1e-9);
    }

    #[test]
    fn malformed_rows_are_rejected() {
        assert!(summarize("").is_err());
        assert!(summarize("time counters\n").is_err());
        assert!(summarize("id time\n1 2 3\n").is_err());
    }

    #[test]
    fn time_only_tables_summarize() {
        let summaries = summarize("id time\n5 10\n5 30\n").unwrap();
        assert_eq!(summaries[0].columns.len(), 1);
        assert!((summaries[0].columns[0].mean - 20.0).abs() < 1e-9);
    }
}
