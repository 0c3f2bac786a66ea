//! Lazy-open JSONL sink for run events.
//!
//! The sink's file path is fixed at construction (directory + optional
//! prefix + timestamp) but the file is only created on the first write, so
//! runs that fail before producing any event leave nothing behind. Each
//! record is serialized completely before a single whole-line write; a
//! partially written record can never appear in the file.

use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::Utc;

use crate::event::LogEvent;

/// Error type for sink operations.
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Configuration for the event sink.
#[derive(Debug, Clone)]
pub struct SinkConfig {
    /// Directory the log file is created in.
    pub dir: PathBuf,

    /// File-name prefix; the full name is `<prefix><timestamp>_<suffix>.jsonl`.
    pub prefix: String,

    /// Whether the sink writes at all.
    pub enabled: bool,
}

impl SinkConfig {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            prefix: "rlm_".to_string(),
            enabled: true,
        }
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    /// A sink that swallows every event.
    pub fn disabled() -> Self {
        Self {
            dir: PathBuf::new(),
            prefix: String::new(),
            enabled: false,
        }
    }
}

struct SinkState {
    writer: Option<BufWriter<File>>,
    /// True once the file has been created, even after `flush` closes it.
    created: bool,
}

/// Append-only JSONL event writer.
///
/// Thread-safe via internal mutex; shared across every agent of a run tree.
pub struct EventSink {
    config: SinkConfig,
    file_path: PathBuf,
    state: Mutex<SinkState>,
}

impl EventSink {
    /// Create a sink. No file is touched until the first write.
    pub fn new(config: SinkConfig) -> Self {
        let short = &uuid::Uuid::new_v4().to_string()[..8];
        let name = format!(
            "{}{}_{}.jsonl",
            config.prefix,
            Utc::now().format("%Y-%m-%dT%H-%M-%S"),
            short
        );
        let file_path = config.dir.join(name);
        Self {
            config,
            file_path,
            state: Mutex::new(SinkState {
                writer: None,
                created: false,
            }),
        }
    }

    /// Append one event as a single line.
    pub fn write(&self, event: &LogEvent) -> Result<(), SinkError> {
        if !self.config.enabled {
            return Ok(());
        }

        // Serialize outside the write so a failure here leaves the file
        // untouched and the line goes down in one call.
        let mut line = serde_json::to_string(event)?;
        line.push('\n');

        let mut state = self.state.lock().unwrap();
        if state.writer.is_none() {
            fs::create_dir_all(&self.config.dir)?;
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.file_path)?;
            state.writer = Some(BufWriter::new(file));
            state.created = true;
        }

        let writer = state.writer.as_mut().unwrap();
        writer.write_all(line.as_bytes())?;
        writer.flush()?;
        Ok(())
    }

    /// The log file path, once the file exists. Stable for the lifetime of
    /// the sink.
    pub fn path(&self) -> Option<PathBuf> {
        let state = self.state.lock().unwrap();
        state.created.then(|| self.file_path.clone())
    }

    /// Flush and close the sink. Later writes reopen the same file.
    pub fn flush(&self) -> Result<(), SinkError> {
        let mut state = self.state.lock().unwrap();
        if let Some(mut writer) = state.writer.take() {
            writer.flush()?;
        }
        Ok(())
    }

    /// Read every event from a log file, skipping blank lines.
    pub fn read_events(path: &Path) -> Result<Vec<LogEvent>, SinkError> {
        let content = fs::read_to_string(path)?;
        let events: Result<Vec<LogEvent>, _> = content
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(serde_json::from_str)
            .collect();
        Ok(events?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventType;
    use tempfile::tempdir;

    #[test]
    fn test_lazy_creation() {
        let dir = tempdir().unwrap();
        let sink = EventSink::new(SinkConfig::new(dir.path().join("runs")));

        // Nothing on disk, no path exposed yet.
        assert!(sink.path().is_none());
        assert!(!dir.path().join("runs").exists());

        sink.write(&LogEvent::new("r1", 0, EventType::RunStart))
            .unwrap();

        let path = sink.path().expect("path after first write");
        assert!(path.exists());
    }

    #[test]
    fn test_path_stable_after_flush() {
        let dir = tempdir().unwrap();
        let sink = EventSink::new(SinkConfig::new(dir.path()));

        sink.write(&LogEvent::new("r1", 0, EventType::RunStart))
            .unwrap();
        let before = sink.path().unwrap();
        sink.flush().unwrap();
        assert_eq!(sink.path().unwrap(), before);

        // Writing after a flush reopens the same file.
        sink.write(&LogEvent::new("r1", 0, EventType::FinalResult))
            .unwrap();
        assert_eq!(sink.path().unwrap(), before);
        assert_eq!(EventSink::read_events(&before).unwrap().len(), 2);
    }

    #[test]
    fn test_write_and_read_back() {
        let dir = tempdir().unwrap();
        let sink = EventSink::new(SinkConfig::new(dir.path()).with_prefix("trace_"));

        sink.write(&LogEvent::new("r1", 0, EventType::RunStart).with_query("q"))
            .unwrap();
        sink.write(
            &LogEvent::new("r1", 0, EventType::ExecutionResult)
                .with_step(1)
                .with_code("print(1)")
                .with_output("1", false),
        )
        .unwrap();
        sink.flush().unwrap();

        let path = sink.path().unwrap();
        assert!(
            path.file_name()
                .unwrap()
                .to_string_lossy()
                .starts_with("trace_")
        );

        let events = EventSink::read_events(&path).unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].event_type, EventType::RunStart);
        assert_eq!(events[1].step, Some(1));
    }

    #[test]
    fn test_one_line_per_event() {
        let dir = tempdir().unwrap();
        let sink = EventSink::new(SinkConfig::new(dir.path()));

        // Embedded newlines must stay inside the JSON string.
        sink.write(
            &LogEvent::new("r1", 0, EventType::ExecutionResult)
                .with_output("line one\nline two\n", false),
        )
        .unwrap();
        sink.flush().unwrap();

        let content = fs::read_to_string(sink.path().unwrap()).unwrap();
        assert_eq!(content.lines().count(), 1);
    }

    #[test]
    fn test_disabled_sink() {
        let sink = EventSink::new(SinkConfig::disabled());
        sink.write(&LogEvent::new("r1", 0, EventType::RunStart))
            .unwrap();
        assert!(sink.path().is_none());
    }
}
