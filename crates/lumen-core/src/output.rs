//! Reading and writing generation results.
//!
//! Results are [`JobRecord`]s written either as one JSON array or as JSON
//! Lines. JSONL output is streamed as jobs finish, which also lets a later
//! run pick up the records of an interrupted one.

use crate::error::LumenError;
use crate::types::{JobRecord, JobState};
use std::io::{self, BufRead, Write};
use std::path::Path;

/// Output format options.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Single JSON array
    Json,
    /// One JSON object per line (newline-delimited JSON)
    JsonLines,
}

impl OutputFormat {
    /// Parse format from string (case-insensitive).
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "json" => Some(Self::Json),
            "jsonl" | "jsonlines" | "ndjson" => Some(Self::JsonLines),
            _ => None,
        }
    }
}

/// Serializes job records in the chosen format.
pub struct OutputWriter<W: Write> {
    writer: W,
    format: OutputFormat,
    pretty: bool,
    records_written: usize,
}

impl<W: Write> OutputWriter<W> {
    /// `pretty` only affects [`OutputFormat::Json`].
    pub fn new(writer: W, format: OutputFormat, pretty: bool) -> Self {
        Self {
            writer,
            format,
            pretty,
            records_written: 0,
        }
    }

    /// Append one record as a JSON line. Used to stream results as they land.
    pub fn write_line(&mut self, record: &JobRecord) -> io::Result<()> {
        serde_json::to_writer(&mut self.writer, record).map_err(io::Error::other)?;
        writeln!(self.writer)?;
        self.records_written += 1;
        Ok(())
    }

    /// Write a full batch: a JSON array, or one line per record.
    pub fn write_batch(&mut self, records: &[JobRecord]) -> io::Result<()> {
        match self.format {
            OutputFormat::Json => {
                if self.pretty {
                    serde_json::to_writer_pretty(&mut self.writer, records)
                        .map_err(io::Error::other)?;
                } else {
                    serde_json::to_writer(&mut self.writer, records).map_err(io::Error::other)?;
                }
                writeln!(self.writer)?;
                self.records_written += records.len();
            }
            OutputFormat::JsonLines => {
                for record in records {
                    self.write_line(record)?;
                }
            }
        }
        Ok(())
    }

    pub fn records_written(&self) -> usize {
        self.records_written
    }

    pub fn flush(&mut self) -> io::Result<()> {
        self.writer.flush()
    }
}

/// Load records from an earlier run's output (JSON array or JSONL).
///
/// Blank lines are ignored. A JSONL line that does not parse is skipped with
/// a warning, since the last line of an interrupted run may be truncated.
pub fn load_records(path: &Path) -> Result<Vec<JobRecord>, LumenError> {
    let content = std::fs::read_to_string(path)?;
    if content.trim_start().starts_with('[') {
        return Ok(serde_json::from_str(&content)?);
    }

    let mut records = Vec::new();
    for (idx, line) in io::Cursor::new(content).lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<JobRecord>(&line) {
            Ok(record) => records.push(record),
            Err(e) => tracing::warn!("Skipping unreadable record on line {}: {e}", idx + 1),
        }
    }
    Ok(records)
}

/// Completed `(reference, prompt)` pairs from earlier records; the last
/// record for a reference wins.
pub fn completed_prompts(records: &[JobRecord]) -> Vec<(String, String)> {
    let mut latest: Vec<(String, String)> = Vec::new();
    for record in records {
        latest.retain(|(r, _)| r != &record.reference);
        if let (JobState::Completed, Some(prompt)) = (record.state, &record.prompt) {
            latest.push((record.reference.clone(), prompt.clone()));
        }
    }
    latest
}
