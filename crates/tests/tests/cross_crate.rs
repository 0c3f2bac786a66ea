//! Cross-crate integration and E2E tests
//!
//! These run the driver over a real HTTP boundary and then verify the
//! event log through `ouro-events`, checking the ordering guarantees the
//! log format promises to offline consumers.

use std::sync::{Arc, Mutex};

use axum::{Json, Router, extract::State, http::StatusCode, routing::get, routing::post};
use serde_json::{Value, json};

use ouro_driver::testing::{MockEvaluatorFactory, ScriptedEval, completion_body, models_body};
use ouro_driver::{ChatClient, Driver, DriverConfig, DriverDeps, ProxyClientConfig};
use ouro_events::{EventSink, EventType, LogEvent, SinkConfig};

struct Proxy {
    replies: Mutex<Vec<Value>>,
}

async fn models(State(_): State<Arc<Proxy>>) -> Json<Value> {
    Json(models_body(&["gpt-5", "gpt-5-codex-mini"]))
}

async fn chat(State(proxy): State<Arc<Proxy>>) -> (StatusCode, Json<Value>) {
    let mut replies = proxy.replies.lock().unwrap();
    if replies.is_empty() {
        return (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({})));
    }
    (StatusCode::OK, Json(replies.remove(0)))
}

async fn start_proxy(replies: Vec<Value>) -> (String, tokio::sync::oneshot::Sender<()>) {
    let proxy = Arc::new(Proxy {
        replies: Mutex::new(replies),
    });
    let app = Router::new()
        .route("/v1/models", get(models))
        .route("/v1/chat/completions", post(chat))
        .with_state(proxy);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = tokio::sync::oneshot::channel::<()>();
    tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async {
                rx.await.ok();
            })
            .await
            .unwrap();
    });
    (format!("http://{addr}/v1"), tx)
}

/// The log invariants offline consumers rely on, checked per run:
/// contiguous steps, `run_start` exactly once and first, `final_result`
/// at most once and last.
fn assert_run_invariants(events: &[LogEvent]) {
    let run_ids: Vec<&String> = {
        let mut seen = Vec::new();
        for e in events {
            if !seen.contains(&&e.run_id) {
                seen.push(&e.run_id);
            }
        }
        seen
    };

    for run_id in run_ids {
        let run: Vec<&LogEvent> = events.iter().filter(|e| &e.run_id == run_id).collect();
        assert_eq!(run[0].event_type, EventType::RunStart);
        assert_eq!(
            run.iter()
                .filter(|e| e.event_type == EventType::RunStart)
                .count(),
            1
        );

        let steps: Vec<u32> = run.iter().filter_map(|e| e.step).collect();
        let expected: Vec<u32> = (0..steps.len() as u32).collect();
        assert_eq!(steps, expected, "steps not contiguous for {run_id}");

        let finals: Vec<usize> = run
            .iter()
            .enumerate()
            .filter(|(_, e)| e.event_type == EventType::FinalResult)
            .map(|(i, _)| i)
            .collect();
        assert!(finals.len() <= 1);
        if let Some(&index) = finals.first() {
            assert_eq!(index, run.len() - 1, "final_result not last for {run_id}");
        }
    }
}

#[tokio::test]
async fn test_e2e_recursive_run_and_log_round_trip() {
    let (base_url, shutdown) = start_proxy(vec![
        completion_body(
            "Delegating.\n```repl\nFINAL(llm_query(\"count the words\"))\n```",
            40,
            12,
        ),
        completion_body("```repl\nFINAL(7)\n```", 15, 4),
    ])
    .await;

    let dir = tempfile::tempdir().unwrap();
    let sink = Arc::new(EventSink::new(SinkConfig::new(dir.path())));
    let client = ChatClient::new(ProxyClientConfig {
        base_url,
        api_key: "sk-test".to_string(),
    })
    .unwrap();
    let evaluators = Arc::new(MockEvaluatorFactory::new(vec![
        vec![ScriptedEval::delegates("count the words")],
        vec![ScriptedEval::finishes(json!(7))],
    ]));
    let driver = Driver::new(
        DriverDeps::new(Arc::new(client), evaluators, sink.clone()),
        DriverConfig::new(),
    );

    let outcome = driver.run("one two three four five six seven").await;
    assert!(outcome.error.is_none(), "unexpected: {:?}", outcome.error);
    assert_eq!(outcome.result, Some(json!(7)));

    // Usage across the tree equals the sum of both agents' calls.
    assert_eq!(driver.usage().prompt_tokens, 55);
    assert_eq!(driver.usage().completion_tokens, 16);

    // Everything the driver logged parses back through ouro-events.
    let path = outcome.log_file.expect("log file");
    let events = EventSink::read_events(&path).unwrap();
    assert_run_invariants(&events);

    // The child run is linked to the root and nested between root steps.
    let root_id = events[0].run_id.clone();
    let child_start = events
        .iter()
        .find(|e| e.event_type == EventType::RunStart && e.depth == 1)
        .expect("child run");
    assert_eq!(child_start.parent_run_id.as_ref(), Some(&root_id));

    // Event usage sums to the ledger totals.
    let logged_prompt: u64 = events
        .iter()
        .filter_map(|e| e.usage.as_ref())
        .filter_map(|u| u["prompt_tokens"].as_u64())
        .sum();
    assert_eq!(logged_prompt, 55);

    shutdown.send(()).unwrap();
}

#[tokio::test]
async fn test_e2e_exhaustion_writes_error_record() {
    let (base_url, shutdown) = start_proxy(vec![
        completion_body("```repl\nprint('still going')\n```", 5, 2),
        completion_body("```repl\nprint('still going')\n```", 5, 2),
    ])
    .await;

    let dir = tempfile::tempdir().unwrap();
    let sink = Arc::new(EventSink::new(SinkConfig::new(dir.path())));
    let client = ChatClient::new(ProxyClientConfig {
        base_url,
        api_key: "sk-test".to_string(),
    })
    .unwrap();
    let evaluators = Arc::new(MockEvaluatorFactory::new(vec![vec![
        ScriptedEval::prints("still going\n"),
        ScriptedEval::prints("still going\n"),
    ]]));
    let driver = Driver::new(
        DriverDeps::new(Arc::new(client), evaluators, sink.clone()),
        DriverConfig::new().with_limits(ouro_driver::DriverLimits::new().with_max_calls(2)),
    );

    let outcome = driver.run("context").await;
    let error = outcome.error.expect("exhaustion");
    assert_eq!(error.exit_code(), 6);

    let events = EventSink::read_events(&outcome.log_file.unwrap()).unwrap();
    assert_run_invariants(&events);
    assert_eq!(events.last().unwrap().event_type, EventType::Error);

    shutdown.send(()).unwrap();
}
