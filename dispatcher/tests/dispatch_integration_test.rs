//! Integration tests for the request router and executor supervisor
//!
//! Inbound control frames are dispatched against a context whose frame
//! mailbox is captured by the test, so every status frame can be asserted
//! exactly. Executors are real child processes (small shell scripts) and
//! the bulk create endpoint is a wiremock server.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use agent_dispatcher::api_client::ApiClient;
use agent_dispatcher::config::Config;
use agent_dispatcher::router::{dispatch, AgentContext};
use serde_json::json;
use tokio::sync::mpsc;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const AGENT_TOKEN: &str = "QWE46aasdje446aasdje446aaQWE46aasdje446aasdje446aaQWE46aasdje446";

fn run_config(api_port: u16, workspace: &str, cmd: &str, max_size: usize) -> Config {
    Config::parse(&format!(
        r#"
[server]
host = "127.0.0.1"
api_port = {api_port}
websocket_port = 9000
workspace = "{workspace}"

[tokens]
registration = "QWE46aasdje446aasdje446aa"
agent = "{AGENT_TOKEN}"

[agent]
agent_name = "unnamed_agent"
executors = "ex1"

[executor.ex1]
cmd = "{cmd}"
max_size = {max_size}

[params.ex1]
out = "True"
count = "False"
err = "False"
fails = "False"
"#
    ))
    .expect("test config must parse")
}

fn context_for(config: &Config) -> (Arc<AgentContext>, mpsc::Receiver<String>) {
    let api = ApiClient::new(&config.server, config.tokens.agent.clone()).expect("client");
    let (frame_tx, frame_rx) = mpsc::channel(64);
    (Arc::new(AgentContext::new(config, api, frame_tx)), frame_rx)
}

fn write_executor(dir: &Path, body: &str) -> String {
    let script = dir.join("executor.sh");
    std::fs::write(&script, body).expect("write executor script");
    format!("sh {}", script.display())
}

async fn next_frame(frames: &mut mpsc::Receiver<String>) -> serde_json::Value {
    let frame = tokio::time::timeout(Duration::from_secs(10), frames.recv())
        .await
        .expect("timed out waiting for a status frame")
        .expect("frame mailbox closed");
    serde_json::from_str(&frame).expect("frames are valid json")
}

fn assert_no_more_frames(frames: &mut mpsc::Receiver<String>) {
    assert!(frames.try_recv().is_err(), "unexpected extra frame");
}

#[tokio::test]
async fn test_action_key_is_mandatory() {
    let config = run_config(1, "demo", "exit 0", 65536);
    let (ctx, mut frames) = context_for(&config);

    dispatch(ctx, r#"{"agent_id": 1}"#.to_string()).await;

    assert_eq!(
        next_frame(&mut frames).await,
        json!({
            "action": "RUN_STATUS",
            "running": false,
            "message": "'action' key is mandatory in this websocket connection",
        })
    );
    assert_no_more_frames(&mut frames);
}

#[tokio::test]
async fn test_unrecognized_action() {
    let config = run_config(1, "demo", "exit 0", 65536);
    let (ctx, mut frames) = context_for(&config);

    dispatch(ctx, r#"{"action": "CUT", "agent_id": 1}"#.to_string()).await;

    assert_eq!(
        next_frame(&mut frames).await,
        json!({"CUT_RESPONSE": "Error: Unrecognized action"})
    );
    assert_no_more_frames(&mut frames);
}

#[tokio::test]
async fn test_invalid_json_is_answered() {
    let config = run_config(1, "demo", "exit 0", 65536);
    let (ctx, mut frames) = context_for(&config);

    dispatch(ctx, "this is not json".to_string()).await;

    assert_eq!(
        next_frame(&mut frames).await,
        json!({
            "action": "RUN_STATUS",
            "running": false,
            "message": "Invalid JSON",
        })
    );
}

#[tokio::test]
async fn test_run_without_executor() {
    let config = run_config(1, "demo", "exit 0", 65536);
    let (ctx, mut frames) = context_for(&config);

    dispatch(
        ctx,
        json!({"action": "RUN", "agent_id": 1, "args": {"out": "json"}}).to_string(),
    )
    .await;

    assert_eq!(
        next_frame(&mut frames).await,
        json!({
            "action": "RUN_STATUS",
            "running": false,
            "message": "No executor selected to unnamed_agent agent",
        })
    );
    assert_no_more_frames(&mut frames);
}

#[tokio::test]
async fn test_run_with_unknown_executor() {
    let config = run_config(1, "demo", "exit 0", 65536);
    let (ctx, mut frames) = context_for(&config);

    dispatch(
        ctx,
        json!({
            "action": "RUN",
            "agent_id": 1,
            "executor": "NOT_4N_CORRECT_EXECUTOR",
            "args": {"out": "json"},
        })
        .to_string(),
    )
    .await;

    assert_eq!(
        next_frame(&mut frames).await,
        json!({
            "action": "RUN_STATUS",
            "executor_name": "NOT_4N_CORRECT_EXECUTOR",
            "running": false,
            "message": "The selected executor NOT_4N_CORRECT_EXECUTOR not exists in unnamed_agent agent",
        })
    );
    assert_no_more_frames(&mut frames);
}

#[tokio::test]
async fn test_missing_mandatory_argument_does_not_spawn() {
    let dir = tempfile::tempdir().expect("tempdir");
    let marker = dir.path().join("started");
    let cmd = write_executor(dir.path(), &format!("echo started > {}\n", marker.display()));
    let config = run_config(1, "demo", &cmd, 65536);
    let (ctx, mut frames) = context_for(&config);

    dispatch(
        ctx,
        json!({"action": "RUN", "agent_id": 1, "executor": "ex1", "args": {"err": "T"}}).to_string(),
    )
    .await;

    assert_eq!(
        next_frame(&mut frames).await,
        json!({
            "action": "RUN_STATUS",
            "executor_name": "ex1",
            "running": false,
            "message": "Mandatory argument(s) not passed to ex1 executor from unnamed_agent agent",
        })
    );
    assert_no_more_frames(&mut frames);

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(!marker.exists(), "the executor must not be spawned");
}

#[tokio::test]
async fn test_unexpected_argument_does_not_spawn() {
    let dir = tempfile::tempdir().expect("tempdir");
    let marker = dir.path().join("started");
    let cmd = write_executor(dir.path(), &format!("echo started > {}\n", marker.display()));
    let config = run_config(1, "demo", &cmd, 65536);
    let (ctx, mut frames) = context_for(&config);

    dispatch(
        ctx,
        json!({
            "action": "RUN",
            "agent_id": 1,
            "executor": "ex1",
            "args": {"out": "json", "WTF": "T"},
        })
        .to_string(),
    )
    .await;

    assert_eq!(
        next_frame(&mut frames).await,
        json!({
            "action": "RUN_STATUS",
            "executor_name": "ex1",
            "running": false,
            "message": "Unexpected argument(s) passed to ex1 executor from unnamed_agent agent",
        })
    );
    assert_no_more_frames(&mut frames);

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(!marker.exists(), "the executor must not be spawned");
}

#[tokio::test]
async fn test_happy_path_streams_records_in_order() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/_api/v2/ws/demo/bulk_create/"))
        .respond_with(ResponseTemplate::new(201))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().expect("tempdir");
    let cmd = write_executor(
        dir.path(),
        "printf '{\"mode\": \"'\"$EXECUTOR_CONFIG_OUT\"'\"}\\n'\nprintf '{\"hosts\": [2]}\\n'\n",
    );
    let config = run_config(server.address().port(), "demo", &cmd, 65536);
    let (ctx, mut frames) = context_for(&config);

    dispatch(
        ctx,
        json!({"action": "RUN", "agent_id": 1, "executor": "ex1", "args": {"out": "json"}}).to_string(),
    )
    .await;

    assert_eq!(
        next_frame(&mut frames).await,
        json!({
            "action": "RUN_STATUS",
            "executor_name": "ex1",
            "running": true,
            "message": "Running ex1 executor from unnamed_agent agent",
        })
    );
    assert_eq!(
        next_frame(&mut frames).await,
        json!({
            "action": "RUN_STATUS",
            "executor_name": "ex1",
            "successful": true,
            "message": "Executor ex1 from unnamed_agent finished successfully",
        })
    );
    assert_no_more_frames(&mut frames);

    let requests = server.received_requests().await.expect("recorded requests");
    let records: Vec<serde_json::Value> = requests
        .iter()
        .map(|request| request.body_json().expect("json body"))
        .collect();
    // Arguments were lifted into the environment, records arrived in
    // stdout order.
    assert_eq!(records, vec![json!({"mode": "json"}), json!({"hosts": [2]})]);
}

#[tokio::test]
async fn test_malformed_json_lines_do_not_fail_the_run() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/_api/v2/ws/demo/bulk_create/"))
        .respond_with(ResponseTemplate::new(201))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().expect("tempdir");
    let cmd = write_executor(
        dir.path(),
        "echo 'this is not json'\nprintf '{\"ok\": true}\\n'\n",
    );
    let config = run_config(server.address().port(), "demo", &cmd, 65536);
    let (ctx, mut frames) = context_for(&config);

    dispatch(
        ctx,
        json!({"action": "RUN", "agent_id": 1, "executor": "ex1", "args": {"out": "json"}}).to_string(),
    )
    .await;

    let running = next_frame(&mut frames).await;
    assert_eq!(running.get("running"), Some(&json!(true)));
    let finished = next_frame(&mut frames).await;
    assert_eq!(finished.get("successful"), Some(&json!(true)));

    let requests = server.received_requests().await.expect("recorded requests");
    assert_eq!(requests.len(), 1, "only the valid record is forwarded");
}

#[tokio::test]
async fn test_bulk_server_errors_do_not_fail_the_run() {
    for status in [500_u16, 429] {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/_api/v2/ws/demo/bulk_create/"))
            .respond_with(ResponseTemplate::new(status))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().expect("tempdir");
        let cmd = write_executor(dir.path(), "printf '{\"ok\": true}\\n'\n");
        let config = run_config(server.address().port(), "demo", &cmd, 65536);
        let (ctx, mut frames) = context_for(&config);

        dispatch(
            ctx,
            json!({"action": "RUN", "agent_id": 1, "executor": "ex1", "args": {"out": "json"}})
                .to_string(),
        )
        .await;

        let running = next_frame(&mut frames).await;
        assert_eq!(running.get("running"), Some(&json!(true)));
        let finished = next_frame(&mut frames).await;
        assert_eq!(
            finished.get("successful"),
            Some(&json!(true)),
            "a rejected record must not fail the run (HTTP {status})"
        );

        let requests = server.received_requests().await.expect("recorded requests");
        assert_eq!(requests.len(), 1, "nothing is retried (HTTP {status})");
    }
}

#[tokio::test]
async fn test_failed_executor_reports_failure() {
    let dir = tempfile::tempdir().expect("tempdir");
    let cmd = write_executor(dir.path(), "exit 1\n");
    let config = run_config(1, "demo", &cmd, 65536);
    let (ctx, mut frames) = context_for(&config);

    dispatch(
        ctx,
        json!({"action": "RUN", "agent_id": 1, "executor": "ex1", "args": {"out": "none"}}).to_string(),
    )
    .await;

    let running = next_frame(&mut frames).await;
    assert_eq!(running.get("running"), Some(&json!(true)));
    assert_eq!(
        next_frame(&mut frames).await,
        json!({
            "action": "RUN_STATUS",
            "executor_name": "ex1",
            "successful": false,
            "message": "Executor ex1 from unnamed_agent failed",
        })
    );
}

#[tokio::test]
async fn test_line_cap_drops_output_but_not_the_run() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/_api/v2/ws/demo/bulk_create/"))
        .respond_with(ResponseTemplate::new(201))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().expect("tempdir");
    let cmd = write_executor(dir.path(), "printf '{\"ok\": true}\\n'\n");
    let config = run_config(server.address().port(), "demo", &cmd, 1);
    let (ctx, mut frames) = context_for(&config);

    dispatch(
        ctx,
        json!({"action": "RUN", "agent_id": 1, "executor": "ex1", "args": {"out": "json"}}).to_string(),
    )
    .await;

    let running = next_frame(&mut frames).await;
    assert_eq!(running.get("running"), Some(&json!(true)));
    let finished = next_frame(&mut frames).await;
    assert_eq!(finished.get("successful"), Some(&json!(true)));

    let requests = server.received_requests().await.expect("recorded requests");
    assert!(requests.is_empty(), "over-long lines are dropped, not sent");
}

#[tokio::test]
async fn test_side_channel_records_are_forwarded() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/_api/v2/ws/demo/bulk_create/"))
        .respond_with(ResponseTemplate::new(201))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().expect("tempdir");
    let cmd = write_executor(
        dir.path(),
        "printf '{\"via\": \"fifo\"}\\n' > \"$FIFO_NAME\"\n",
    );
    let config = run_config(server.address().port(), "demo", &cmd, 65536);
    let (ctx, mut frames) = context_for(&config);

    dispatch(
        ctx,
        json!({"action": "RUN", "agent_id": 1, "executor": "ex1", "args": {"out": "json"}}).to_string(),
    )
    .await;

    let running = next_frame(&mut frames).await;
    assert_eq!(running.get("running"), Some(&json!(true)));
    let finished = next_frame(&mut frames).await;
    assert_eq!(finished.get("successful"), Some(&json!(true)));

    let requests = server.received_requests().await.expect("recorded requests");
    let records: Vec<serde_json::Value> = requests
        .iter()
        .map(|request| request.body_json().expect("json body"))
        .collect();
    assert_eq!(records, vec![json!({"via": "fifo"})]);
}

#[tokio::test]
async fn test_named_pipe_is_unlinked_after_the_run() {
    let dir = tempfile::tempdir().expect("tempdir");
    let marker = dir.path().join("fifo_name");
    let cmd = write_executor(
        dir.path(),
        &format!("printf '%s' \"$FIFO_NAME\" > {}\n", marker.display()),
    );
    let config = run_config(1, "demo", &cmd, 65536);
    let (ctx, mut frames) = context_for(&config);

    dispatch(
        ctx,
        json!({"action": "RUN", "agent_id": 1, "executor": "ex1", "args": {"out": "none"}}).to_string(),
    )
    .await;

    let running = next_frame(&mut frames).await;
    assert_eq!(running.get("running"), Some(&json!(true)));
    let finished = next_frame(&mut frames).await;
    assert_eq!(finished.get("successful"), Some(&json!(true)));

    let fifo_path = std::fs::read_to_string(&marker).expect("executor saw $FIFO_NAME");
    assert!(!fifo_path.is_empty());
    assert!(
        !Path::new(fifo_path.trim()).exists(),
        "the named pipe must be unlinked once the run is over"
    );
}

#[tokio::test]
async fn test_concurrent_runs_emit_whole_frames() {
    let dir = tempfile::tempdir().expect("tempdir");
    let cmd = write_executor(dir.path(), "sleep 0.2\nexit 0\n");
    let config = run_config(1, "demo", &cmd, 65536);
    let (ctx, mut frames) = context_for(&config);

    let request =
        json!({"action": "RUN", "agent_id": 1, "executor": "ex1", "args": {"out": "none"}})
            .to_string();
    dispatch(Arc::clone(&ctx), request.clone()).await;
    dispatch(Arc::clone(&ctx), request).await;

    let mut running = 0;
    let mut successful = 0;
    for _ in 0..4 {
        // Every frame must parse standalone: no byte-level interleaving.
        let frame = next_frame(&mut frames).await;
        assert_eq!(frame.get("action"), Some(&json!("RUN_STATUS")));
        if frame.get("running") == Some(&json!(true)) {
            running += 1;
        }
        if frame.get("successful") == Some(&json!(true)) {
            successful += 1;
        }
    }
    assert_eq!((running, successful), (2, 2));
}
