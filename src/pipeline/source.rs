//! Request source abstraction for engine ingestion.
//!
//! Provides a unified trait for reading engine requests from different
//! sources: EIS CSV exports (replay) and stdin (JSON lines).

use anyhow::Result;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::path::PathBuf;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader, Stdin};
use tracing::{info, warn};

use crate::config::SessionDefaults;
use crate::ingest::{discover_eis_files, EisCsvReader, EisFileInfo};
use crate::types::EngineRequest;

/// Events produced by a request source.
#[derive(Debug)]
pub enum SourceEvent {
    /// A request ready for the engine.
    Request(EngineRequest),
    /// Source reached end of data.
    Eof,
}

/// Trait abstracting where engine requests come from.
///
/// Implementations handle format parsing and pacing internally.
/// The processing loop calls [`next_event`](RequestSource::next_event) in a
/// `select!` with cancellation.
#[async_trait]
pub trait RequestSource: Send + 'static {
    /// Read the next request from the source.
    ///
    /// Returns `SourceEvent::Eof` when no more data is available.
    /// Returns `Err` on unrecoverable errors.
    async fn next_event(&mut self) -> Result<SourceEvent>;

    /// Human-readable name for logging (e.g. "CSV", "stdin").
    fn source_name(&self) -> &str;
}

// ============================================================================
// CSV Replay Source
// ============================================================================

/// Replays EIS CSV exports as one session per file.
///
/// Each file becomes `StartSession`, one `PushSample` per parsable row, then
/// `EndSession`. Files that cannot be opened are skipped with a warning.
pub struct CsvReplaySource {
    files: VecDeque<EisFileInfo>,
    thresholds: SessionDefaults,
    delay_ms: u64,
    parse_rejects_dir: Option<PathBuf>,
    current: Option<EisCsvReader>,
    yielded_sample: bool,
}

impl CsvReplaySource {
    pub fn new(files: Vec<EisFileInfo>, thresholds: SessionDefaults, delay_ms: u64) -> Self {
        Self {
            files: files.into(),
            thresholds,
            delay_ms,
            parse_rejects_dir: None,
            current: None,
            yielded_sample: false,
        }
    }

    /// Discover every export under `base` and replay them in sorted order.
    pub fn from_dir(base: &std::path::Path, thresholds: SessionDefaults, delay_ms: u64) -> Result<Self> {
        let files = discover_eis_files(base)?;
        info!(base = %base.display(), files = files.len(), "Discovered EIS exports");
        Ok(Self::new(files, thresholds, delay_ms))
    }

    /// Write unparsable rows of each file to
    /// `<dir>/<battery>/<test>/<soc>%_parse_rejects.csv`.
    pub fn with_parse_rejects(mut self, dir: impl Into<PathBuf>) -> Self {
        self.parse_rejects_dir = Some(dir.into());
        self
    }

    /// Files not yet started.
    pub fn remaining_files(&self) -> usize {
        self.files.len()
    }

    fn open_next_file(&mut self) -> Option<EngineRequest> {
        while let Some(file) = self.files.pop_front() {
            let rejects_path = self.parse_rejects_dir.as_ref().map(|dir| {
                dir.join(&file.battery_id)
                    .join(&file.test_id)
                    .join(format!("{}%_parse_rejects.csv", file.soc_percent))
            });
            match EisCsvReader::open(&file.path, rejects_path.as_deref()) {
                Ok(reader) => {
                    info!(
                        file = %file.file_name,
                        battery_id = %file.battery_id,
                        test_id = %file.test_id,
                        soc = file.soc_percent,
                        "Replaying EIS export"
                    );
                    self.current = Some(reader);
                    self.yielded_sample = false;
                    return Some(EngineRequest::StartSession {
                        meta: Some(file.session_meta(&self.thresholds)),
                    });
                }
                Err(e) => warn!(file = %file.path.display(), error = %e, "Skipping unreadable export"),
            }
        }
        None
    }
}

#[async_trait]
impl RequestSource for CsvReplaySource {
    async fn next_event(&mut self) -> Result<SourceEvent> {
        let Some(reader) = self.current.as_mut() else {
            return Ok(self
                .open_next_file()
                .map_or(SourceEvent::Eof, SourceEvent::Request));
        };

        match reader.next_sample() {
            Ok(Some(sample)) => {
                // No delay before the first sample of a file
                if self.yielded_sample && self.delay_ms > 0 {
                    tokio::time::sleep(tokio::time::Duration::from_millis(self.delay_ms)).await;
                }
                self.yielded_sample = true;
                Ok(SourceEvent::Request(EngineRequest::PushSample {
                    sample: Some(sample),
                }))
            }
            Ok(None) => {
                info!(
                    file = %reader.path().display(),
                    parsed = reader.accepted_count(),
                    skipped = reader.rejected_count(),
                    "Export finished"
                );
                self.current = None;
                Ok(SourceEvent::Request(EngineRequest::EndSession))
            }
            Err(e) => {
                // Close the session on what was read so far
                warn!(error = %e, "Export read failed, ending session early");
                self.current = None;
                Ok(SourceEvent::Request(EngineRequest::EndSession))
            }
        }
    }

    fn source_name(&self) -> &str {
        "CSV"
    }
}

// ============================================================================
// Stdin Source (JSON requests, one per line)
// ============================================================================

/// Reads JSON-formatted engine requests, one per line.
///
/// `{"op":"StartSession","meta":{...}}`, `{"op":"PushSample","sample":{...}}`,
/// `{"op":"EndSession"}`. Samples without a capture time are stamped on
/// receipt.
pub struct StdinSource<R = BufReader<Stdin>> {
    reader: R,
    line_buffer: String,
    malformed: u64,
}

impl StdinSource {
    pub fn new() -> Self {
        Self::from_reader(BufReader::new(tokio::io::stdin()))
    }
}

impl Default for StdinSource {
    fn default() -> Self {
        Self::new()
    }
}

impl<R> StdinSource<R> {
    /// Read requests from any buffered async reader.
    pub fn from_reader(reader: R) -> Self {
        Self {
            reader,
            line_buffer: String::with_capacity(512),
            malformed: 0,
        }
    }

    /// Lines skipped because they were not a valid request.
    pub fn malformed_lines(&self) -> u64 {
        self.malformed
    }
}

#[async_trait]
impl<R> RequestSource for StdinSource<R>
where
    R: AsyncBufRead + Unpin + Send + 'static,
{
    async fn next_event(&mut self) -> Result<SourceEvent> {
        loop {
            self.line_buffer.clear();
            let bytes = self.reader.read_line(&mut self.line_buffer).await?;
            if bytes == 0 {
                return Ok(SourceEvent::Eof);
            }
            let line = self.line_buffer.trim();
            if line.is_empty() {
                continue;
            }
            match serde_json::from_str::<EngineRequest>(line) {
                Ok(mut request) => {
                    if let EngineRequest::PushSample {
                        sample: Some(sample),
                    } = &mut request
                    {
                        sample.stamp_receipt();
                    }
                    return Ok(SourceEvent::Request(request));
                }
                Err(e) => {
                    self.malformed += 1;
                    warn!("[StdinSource] Failed to parse request: {}", e);
                }
            }
        }
    }

    fn source_name(&self) -> &str {
        "stdin"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn op(event: SourceEvent) -> &'static str {
        match event {
            SourceEvent::Request(r) => r.op_name(),
            SourceEvent::Eof => "Eof",
        }
    }

    #[tokio::test]
    async fn test_stdin_source_skips_malformed_lines() {
        let input = concat!(
            "{\"op\":\"EndSession\"}\n",
            "not json\n",
            "\n",
            "{\"op\":\"PushSample\",\"sample\":{\"FrequencyHz\":1000.0,\"R_ohm\":0.5,\"X_ohm\":0.1,\"V\":3.7,\"T_degC\":25.0,\"Range_ohm\":3.0,\"RowIndex\":1}}\n",
        );
        let mut source = StdinSource::from_reader(input.as_bytes());

        assert_eq!(op(source.next_event().await.unwrap()), "EndSession");
        match source.next_event().await.unwrap() {
            SourceEvent::Request(EngineRequest::PushSample { sample: Some(s) }) => {
                assert!(s.captured_at_utc.is_some());
                assert_eq!(s.row_index, 1);
            }
            other => panic!("unexpected event: {other:?}"),
        }
        assert_eq!(op(source.next_event().await.unwrap()), "Eof");
        assert_eq!(source.malformed_lines(), 1);
    }

    #[tokio::test]
    async fn test_stdin_source_joins_split_reads() {
        let mock = tokio_test::io::Builder::new()
            .read(b"{\"op\":\"Start")
            .read(b"Session\",\"meta\":null}\n{\"op\":")
            .read(b"\"EndSession\"}\n")
            .build();
        let mut source = StdinSource::from_reader(BufReader::new(mock));

        match source.next_event().await.unwrap() {
            SourceEvent::Request(EngineRequest::StartSession { meta }) => assert!(meta.is_none()),
            other => panic!("unexpected event: {other:?}"),
        }
        assert_eq!(op(source.next_event().await.unwrap()), "EndSession");
        assert_eq!(op(source.next_event().await.unwrap()), "Eof");
    }

    #[tokio::test]
    async fn test_csv_replay_emits_session_per_file() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("B01/EIS/Test_1");
        fs::create_dir_all(&dir).unwrap();
        fs::write(
            dir.join("50%.csv"),
            "Frequency,R,X,V,T,Range\n1000,0.5,0.1,3.7,25,3\nbad,row\n500,0.6,0.1,3.7,25,3\n",
        )
        .unwrap();
        fs::write(dir.join("55%.csv"), "1000,0.5,0.1,3.7,25,3\n").unwrap();

        let mut source =
            CsvReplaySource::from_dir(tmp.path(), SessionDefaults::default(), 0).unwrap();
        assert_eq!(source.remaining_files(), 2);

        let mut ops = Vec::new();
        loop {
            let event = source.next_event().await.unwrap();
            let name = op(event);
            ops.push(name);
            if name == "Eof" {
                break;
            }
        }
        assert_eq!(
            ops,
            vec![
                "StartSession",
                "PushSample",
                "PushSample",
                "EndSession",
                "StartSession",
                "PushSample",
                "EndSession",
                "Eof"
            ]
        );
    }

    #[tokio::test]
    async fn test_csv_replay_skips_missing_file() {
        let file = EisFileInfo {
            battery_id: "B01".to_string(),
            test_id: "Test_1".to_string(),
            soc_percent: 50,
            path: PathBuf::from("/no/such/50%.csv"),
            file_name: "50%.csv".to_string(),
        };
        let mut source = CsvReplaySource::new(vec![file], SessionDefaults::default(), 0);
        assert!(matches!(source.next_event().await.unwrap(), SourceEvent::Eof));
    }
}
