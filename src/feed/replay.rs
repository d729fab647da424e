//! replay.rs
//! Replays recorded fixture rows. The header row names the variables; every later row is
//! one sample. Cells are typed with `Value::infer`. Wraps to the first row after the last.

use std::{fs::File, io::Read, path::Path};

use csv::{ReaderBuilder, Trim};
use log::debug;

use crate::error::FeedError;
use crate::feed::{Sample, SampleFeed};
use crate::store::value::Value;

#[derive(Debug)]
pub struct CsvFeed {
    label: String,
    headers: Vec<String>,
    rows: Vec<Vec<Value>>,
    cursor: usize,
}

impl CsvFeed {
    pub fn open(path: &Path) -> Result<Self, FeedError> {
        let file = File::open(path)?;
        Self::from_reader(path.display().to_string(), file)
    }

    pub fn from_reader<R: Read>(label: impl Into<String>, reader: R) -> Result<Self, FeedError> {
        let label = label.into();
        let mut rdr = ReaderBuilder::new().trim(Trim::All).from_reader(reader);
        let headers = rdr.headers()?.iter().map(str::to_string).collect::<Vec<_>>();

        let mut rows = Vec::new();
        for record in rdr.records() {
            let record = record?;
            rows.push(record.iter().map(Value::infer).collect());
        }
        if rows.is_empty() {
            return Err(FeedError::Empty(label));
        }
        debug!("[CsvFeed] loaded {} rows from {}", rows.len(), label);

        Ok(Self {
            label,
            headers,
            rows,
            cursor: 0,
        })
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

impl SampleFeed for CsvFeed {
    fn next_sample(&mut self) -> Result<Sample, FeedError> {
        let row = &self.rows[self.cursor];
        self.cursor = (self.cursor + 1) % self.rows.len();
        Ok(self
            .headers
            .iter()
            .cloned()
            .zip(row.iter().cloned())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FIXTURE: &str = "voltage, temperature\n400, 25\n398, 26\n";

    #[test]
    fn replays_rows_in_order_and_loops() {
        let mut feed = CsvFeed::from_reader("inline", FIXTURE.as_bytes()).unwrap();
        assert_eq!(feed.len(), 2);
        let first = feed.next_sample().unwrap();
        assert_eq!(first["voltage"], Value::Int(400));
        assert_eq!(first["temperature"], Value::Int(25));
        let second = feed.next_sample().unwrap();
        assert_eq!(second["voltage"], Value::Int(398));
        let wrapped = feed.next_sample().unwrap();
        assert_eq!(wrapped, first);
    }

    #[test]
    fn header_only_fixture_is_rejected() {
        let err = CsvFeed::from_reader("empty", "voltage\n".as_bytes()).unwrap_err();
        assert!(matches!(err, FeedError::Empty(_)));
    }
}
