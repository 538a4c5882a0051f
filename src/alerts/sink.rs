//! Record sinks

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;

use log::debug;

use super::{AlertError, LevelRecord, LevelState};

/// Destination for level records
pub trait RecordSink: Send {
    fn write(&mut self, records: &[LevelRecord]) -> Result<(), AlertError>;
}

/// Keeps every record in memory; grows without bound
#[derive(Debug, Default)]
pub struct MemorySink {
    records: Vec<LevelRecord>,
}

impl MemorySink {
    pub fn records(&self) -> &[LevelRecord] {
        &self.records
    }
}

impl RecordSink for MemorySink {
    fn write(&mut self, records: &[LevelRecord]) -> Result<(), AlertError> {
        self.records.extend_from_slice(records);
        Ok(())
    }
}

/// Counts records and drops them, for long runs with no storage attached
#[derive(Debug, Default)]
pub struct CountingSink {
    total: u64,
    out_of_band: u64,
}

impl CountingSink {
    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn out_of_band(&self) -> u64 {
        self.out_of_band
    }
}

impl RecordSink for CountingSink {
    fn write(&mut self, records: &[LevelRecord]) -> Result<(), AlertError> {
        for record in records {
            self.total += 1;
            if record.state != LevelState::Normal {
                self.out_of_band += 1;
            }
            debug!(
                "{} {} {}: {:.3} ({})",
                record.time,
                record.plant,
                record.tank,
                record.level,
                record.state.label()
            );
        }
        Ok(())
    }
}

/// Appends records to a file, one JSON object per line
#[derive(Debug)]
pub struct JsonLinesSink {
    writer: BufWriter<File>,
}

impl JsonLinesSink {
    pub fn create(path: impl AsRef<Path>) -> Result<Self, AlertError> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            writer: BufWriter::new(file),
        })
    }
}

impl RecordSink for JsonLinesSink {
    fn write(&mut self, records: &[LevelRecord]) -> Result<(), AlertError> {
        for record in records {
            serde_json::to_writer(&mut self.writer, record)?;
            self.writer.write_all(b"\n")?;
        }
        self.writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn record(tank: &str) -> LevelRecord {
        LevelRecord {
            measurement: "level_state".to_string(),
            plant: "plant1".to_string(),
            tank: tank.to_string(),
            time: Utc::now(),
            state: LevelState::High,
            level: 2.0,
        }
    }

    #[test]
    fn test_counting_sink_keeps_no_records() {
        let mut sink = CountingSink::default();
        let mut normal = record("h2");
        normal.state = LevelState::Normal;
        for _ in 0..1000 {
            sink.write(&[record("h1"), normal.clone()]).unwrap();
        }
        assert_eq!(sink.total(), 2000);
        assert_eq!(sink.out_of_band(), 1000);
        assert_eq!(std::mem::size_of_val(&sink), 2 * std::mem::size_of::<u64>());
    }

    #[test]
    fn test_json_lines_append() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("records.jsonl");

        let mut sink = JsonLinesSink::create(&path).unwrap();
        sink.write(&[record("h1"), record("h2")]).unwrap();
        drop(sink);

        let mut sink = JsonLinesSink::create(&path).unwrap();
        sink.write(&[record("h3")]).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<LevelRecord> = text
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[2].tank, "h3");
        assert_eq!(lines[0].state, LevelState::High);
        assert!(text.contains("\"state\":\"high\""));
    }
}
