//! Offline log viewer.
//!
//! Renders a run log in three shapes: a tree following `parent_run_id`
//! links, aggregate stats, or the raw linear sequence.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{TimeZone, Utc};
use clap::ValueEnum;

use ouro_events::{EventSink, EventType, LogEvent};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ViewMode {
    Tree,
    Stats,
    Linear,
}

pub fn render(path: &Path, mode: ViewMode) -> Result<String> {
    let events = EventSink::read_events(path)
        .with_context(|| format!("Failed to read log file: {}", path.display()))?;
    Ok(match mode {
        ViewMode::Tree => render_tree(&events),
        ViewMode::Stats => render_stats(&events),
        ViewMode::Linear => render_linear(&events),
    })
}

fn short_id(run_id: &str) -> &str {
    run_id.get(..8).unwrap_or(run_id)
}

fn first_line(text: &str) -> &str {
    text.lines().next().unwrap_or("")
}

fn event_summary(event: &LogEvent) -> String {
    match event.event_type {
        EventType::RunStart => format!(
            "run_start  query: {}",
            first_line(event.query.as_deref().unwrap_or(""))
        ),
        EventType::CodeGenerated => {
            let code = event.code.as_deref().unwrap_or("");
            if code.is_empty() {
                "code_generated  (no code extracted)".to_string()
            } else {
                format!("code_generated  {}", first_line(code))
            }
        }
        EventType::ExecutionResult => format!(
            "execution_result{}  {}",
            if event.has_error == Some(true) {
                " [error]"
            } else {
                ""
            },
            first_line(event.output.as_deref().unwrap_or(""))
        ),
        EventType::FinalResult => format!(
            "final_result  {}",
            event
                .result
                .as_ref()
                .map(|r| r.to_string())
                .unwrap_or_default()
        ),
        EventType::Error => format!("error  {}", event.message.as_deref().unwrap_or("")),
    }
}

/// Tree of runs, children indented under the step that spawned them.
fn render_tree(events: &[LogEvent]) -> String {
    // Preserve file order per run; the file is already step-ordered.
    let mut by_run: BTreeMap<&str, Vec<&LogEvent>> = BTreeMap::new();
    let mut order: Vec<&str> = Vec::new();
    let mut children: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
    let mut roots: Vec<&str> = Vec::new();

    for event in events {
        let entry = by_run.entry(&event.run_id).or_default();
        if entry.is_empty() {
            order.push(&event.run_id);
            match &event.parent_run_id {
                Some(parent) => children.entry(parent).or_default().push(&event.run_id),
                None => roots.push(&event.run_id),
            }
        }
        entry.push(event);
    }

    fn walk(
        run_id: &str,
        indent: usize,
        by_run: &BTreeMap<&str, Vec<&LogEvent>>,
        children: &BTreeMap<&str, Vec<&str>>,
        out: &mut String,
    ) {
        let pad = "  ".repeat(indent);
        let Some(run_events) = by_run.get(run_id) else {
            return;
        };
        let depth = run_events[0].depth;
        let _ = writeln!(out, "{pad}run {} (depth {depth})", short_id(run_id));
        for event in run_events {
            let step = event
                .step
                .map(|s| format!("[{s}] "))
                .unwrap_or_default();
            let _ = writeln!(out, "{pad}  {step}{}", event_summary(event));
        }
        for &child in children.get(run_id).map(Vec::as_slice).unwrap_or(&[]) {
            walk(child, indent + 1, by_run, children, out);
        }
    }

    let mut out = String::new();
    for &root in &roots {
        walk(root, 0, &by_run, &children, &mut out);
    }
    // Orphans (parent events missing from the file) still get shown.
    for &run_id in &order {
        if !roots.contains(&run_id)
            && by_run[run_id][0]
                .parent_run_id
                .as_ref()
                .is_some_and(|p| !by_run.contains_key(p.as_str()))
        {
            walk(run_id, 0, &by_run, &children, &mut out);
        }
    }
    out
}

/// Aggregate counters over the whole log.
fn render_stats(events: &[LogEvent]) -> String {
    let runs = events
        .iter()
        .filter(|e| e.event_type == EventType::RunStart)
        .count();
    let max_depth = events.iter().map(|e| e.depth).max().unwrap_or(0);
    let steps = events.iter().filter(|e| e.step.is_some()).count();
    let errors = events
        .iter()
        .filter(|e| e.event_type == EventType::Error || e.has_error == Some(true))
        .count();
    let finals = events
        .iter()
        .filter(|e| e.event_type == EventType::FinalResult)
        .count();

    let mut prompt_tokens = 0u64;
    let mut completion_tokens = 0u64;
    let mut cost = 0f64;
    for event in events {
        if let Some(usage) = &event.usage {
            prompt_tokens += usage["prompt_tokens"].as_u64().unwrap_or(0);
            completion_tokens += usage["completion_tokens"].as_u64().unwrap_or(0);
            cost += usage["cost"].as_f64().unwrap_or(0.0);
        }
    }

    let mut out = String::new();
    let _ = writeln!(out, "runs:              {runs}");
    let _ = writeln!(out, "max depth:         {max_depth}");
    let _ = writeln!(out, "steps:             {steps}");
    let _ = writeln!(out, "final results:     {finals}");
    let _ = writeln!(out, "errors:            {errors}");
    let _ = writeln!(out, "prompt tokens:     {prompt_tokens}");
    let _ = writeln!(out, "completion tokens: {completion_tokens}");
    let _ = writeln!(out, "reported cost:     {cost:.4}");
    out
}

/// The raw sequence, one line per event.
fn render_linear(events: &[LogEvent]) -> String {
    let mut out = String::new();
    for event in events {
        let time = Utc
            .timestamp_millis_opt(event.time)
            .single()
            .map(|t| t.format("%H:%M:%S%.3f").to_string())
            .unwrap_or_else(|| event.time.to_string());
        let _ = writeln!(
            out,
            "{time}  d{} {}  {}",
            event.depth,
            short_id(&event.run_id),
            event_summary(event)
        );
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use ouro_events::{EventSink, SinkConfig};
    use std::sync::Arc;
    use tempfile::tempdir;

    fn sample_log() -> (tempfile::TempDir, std::path::PathBuf) {
        let dir = tempdir().unwrap();
        let sink = Arc::new(EventSink::new(SinkConfig::new(dir.path())));

        let root = LogEvent::new("root-run-0001", 0, EventType::RunStart).with_query("big question");
        sink.write(&root).unwrap();
        sink.write(
            &LogEvent::new("root-run-0001", 0, EventType::ExecutionResult)
                .with_step(0)
                .with_code("print(context)")
                .with_output("hello", false)
                .with_usage(serde_json::json!({"prompt_tokens": 10, "completion_tokens": 2, "cost": 0.5})),
        )
        .unwrap();
        sink.write(
            &LogEvent::new("child-run-0002", 1, EventType::RunStart)
                .with_parent(Some("root-run-0001".to_string()))
                .with_query("sub question"),
        )
        .unwrap();
        sink.write(
            &LogEvent::new("child-run-0002", 1, EventType::FinalResult)
                .with_step(0)
                .with_result(serde_json::json!("sub answer")),
        )
        .unwrap();
        sink.write(
            &LogEvent::new("root-run-0001", 0, EventType::FinalResult)
                .with_step(1)
                .with_result(serde_json::json!("answer")),
        )
        .unwrap();
        sink.flush().unwrap();

        let path = sink.path().unwrap();
        (dir, path)
    }

    #[test]
    fn test_tree_nests_child_under_parent() {
        let (_dir, path) = sample_log();
        let tree = render(&path, ViewMode::Tree).unwrap();

        let root_pos = tree.find("run root-run").unwrap();
        let child_pos = tree.find("  run child-ru").unwrap();
        assert!(root_pos < child_pos, "child rendered under root:\n{tree}");
        assert!(tree.contains("big question"));
        assert!(tree.contains("\"sub answer\""));
    }

    #[test]
    fn test_stats_totals() {
        let (_dir, path) = sample_log();
        let stats = render(&path, ViewMode::Stats).unwrap();
        assert!(stats.contains("runs:              2"));
        assert!(stats.contains("max depth:         1"));
        assert!(stats.contains("final results:     2"));
        assert!(stats.contains("prompt tokens:     10"));
        assert!(stats.contains("reported cost:     0.5000"));
    }

    #[test]
    fn test_linear_one_line_per_event() {
        let (_dir, path) = sample_log();
        let linear = render(&path, ViewMode::Linear).unwrap();
        assert_eq!(linear.lines().count(), 5);
        assert!(linear.contains("d1 child-ru"));
    }
}
