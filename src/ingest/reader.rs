//! Line-oriented EIS CSV reader
//!
//! Skips a leading header, numbers data rows from 1 and writes every row it
//! cannot turn into a [`Sample`] to an optional rejects file
//! (`RowIndex,Reason,RawLine`).

use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Lines, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use super::IngestError;
use crate::types::{Sample, CSV_SEPARATORS, MIN_CSV_COLUMNS};

const REJECTS_HEADER: &str = "RowIndex,Reason,RawLine";

/// Whether `line` looks like a column header rather than data.
///
/// A header has at least six columns and a first field that mentions
/// frequency or is not a number.
pub fn is_header_line(line: &str) -> bool {
    if line.trim().is_empty() {
        return false;
    }
    let parts: Vec<&str> = line.split(CSV_SEPARATORS).collect();
    if parts.len() < MIN_CSV_COLUMNS {
        return false;
    }
    let first = parts[0].trim().trim_matches('"').to_lowercase();
    if first.contains("freq") {
        return true;
    }
    first.parse::<f64>().is_err()
}

/// Streaming reader over one EIS CSV export.
#[derive(Debug)]
pub struct EisCsvReader {
    path: PathBuf,
    lines: Lines<BufReader<File>>,
    pending: Option<String>,
    rejects: Option<(PathBuf, BufWriter<File>)>,
    row_index: i64,
    accepted: u64,
    rejected: u64,
}

impl EisCsvReader {
    /// Open `path`, sniff its first line, and start a rejects log if given.
    pub fn open(path: &Path, rejects_path: Option<&Path>) -> Result<Self, IngestError> {
        if !path.is_file() {
            return Err(IngestError::NotFound(path.to_path_buf()));
        }
        let file = File::open(path).map_err(|e| IngestError::io(path, e))?;
        let mut lines = BufReader::new(file).lines();

        let pending = match lines.next() {
            Some(Ok(first)) if is_header_line(&first) => {
                debug!(path = %path.display(), header = %first, "Skipped header");
                None
            }
            Some(Ok(first)) => Some(first),
            Some(Err(e)) => return Err(IngestError::io(path, e)),
            None => None,
        };

        let rejects = match rejects_path {
            Some(rp) => {
                if let Some(parent) = rp.parent() {
                    fs::create_dir_all(parent).map_err(|e| IngestError::io(parent, e))?;
                }
                let file = File::create(rp).map_err(|e| IngestError::io(rp, e))?;
                let mut writer = BufWriter::new(file);
                writeln!(writer, "{REJECTS_HEADER}").map_err(|e| IngestError::io(rp, e))?;
                Some((rp.to_path_buf(), writer))
            }
            None => None,
        };

        Ok(Self {
            path: path.to_path_buf(),
            lines,
            pending,
            rejects,
            row_index: 0,
            accepted: 0,
            rejected: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Rows parsed into samples so far.
    pub fn accepted_count(&self) -> u64 {
        self.accepted
    }

    /// Rows skipped as empty or unparsable so far.
    pub fn rejected_count(&self) -> u64 {
        self.rejected
    }

    /// Next parsable sample, or `None` at end of file.
    pub fn next_sample(&mut self) -> Result<Option<Sample>, IngestError> {
        loop {
            let line = match self.pending.take() {
                Some(line) => line,
                None => match self.lines.next() {
                    Some(Ok(line)) => line,
                    Some(Err(e)) => return Err(IngestError::io(&self.path, e)),
                    None => {
                        self.flush_rejects()?;
                        return Ok(None);
                    }
                },
            };
            self.row_index += 1;

            if line.trim().is_empty() {
                self.reject("Empty line", &line)?;
                continue;
            }

            match Sample::parse_csv(&line, self.row_index) {
                Ok(sample) => {
                    self.accepted += 1;
                    return Ok(Some(sample));
                }
                Err(e) => self.reject(&e.to_string(), &line)?,
            }
        }
    }

    fn reject(&mut self, reason: &str, line: &str) -> Result<(), IngestError> {
        self.rejected += 1;
        warn!(
            file = %self.path.display(),
            row_index = self.row_index,
            reason,
            "Skipping CSV row"
        );
        if let Some((path, writer)) = self.rejects.as_mut() {
            writeln!(
                writer,
                "{},{},\"{}\"",
                self.row_index,
                reason.replace(',', ";"),
                line.replace('"', "\"\"")
            )
            .map_err(|e| IngestError::io(path.as_path(), e))?;
        }
        Ok(())
    }

    fn flush_rejects(&mut self) -> Result<(), IngestError> {
        if let Some((path, writer)) = self.rejects.as_mut() {
            writer.flush().map_err(|e| IngestError::io(path.as_path(), e))?;
        }
        Ok(())
    }
}

impl Iterator for EisCsvReader {
    type Item = Result<Sample, IngestError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_sample().transpose()
    }
}
