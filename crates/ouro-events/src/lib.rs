//! Append-only event stream for recursive agent runs.
//!
//! This crate provides the persistence layer for run events:
//!
//! - **Event**: the `LogEvent` record, one JSON object per line
//! - **Sink**: lazy-open JSONL file writer with whole-line write semantics
//!
//! Every agent in a run tree writes to the same sink; records carry a
//! `run_id` and an optional `parent_run_id` so offline tooling can rebuild
//! the tree. Domain payloads (usage, results) are attached as opaque JSON
//! values, keeping this crate free of driver types.
//!
//! # Usage
//!
//! ```rust,no_run
//! use ouro_events::{EventSink, EventType, LogEvent, SinkConfig};
//!
//! let sink = EventSink::new(SinkConfig::new(".ouro/runs"));
//! sink.write(&LogEvent::new("run-1", 0, EventType::RunStart)).unwrap();
//! sink.flush().unwrap();
//! println!("events at {:?}", sink.path());
//! ```

pub mod event;
pub mod sink;

pub use event::{EventType, LogEvent};
pub use sink::{EventSink, SinkConfig, SinkError};
