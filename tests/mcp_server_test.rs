//! MCP Server Integration Tests
//!
//! Runs the full stdio protocol stack over an in-memory duplex pipe with a
//! scripted browser behind it.

mod common;

use common::{fast_engine, FakeBrowser, Round, ScriptedExtractor};
use instagram_mcp::instagram::{InstagramService, PaginationEngine};
use instagram_mcp::{McpServer, ToolRegistry};
use serde_json::{json, Value};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream, Lines, ReadHalf, WriteHalf};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

const GRACE: Duration = Duration::from_secs(2);

struct Client {
    writer: WriteHalf<DuplexStream>,
    lines: Lines<BufReader<ReadHalf<DuplexStream>>>,
    server: JoinHandle<anyhow::Result<()>>,
    shutdown: CancellationToken,
}

impl Client {
    fn start(browser: FakeBrowser, extractor: ScriptedExtractor) -> Self {
        let service = InstagramService::new(browser, extractor, PaginationEngine::new(fast_engine()));
        let server = McpServer::new(ToolRegistry::new(Arc::new(service)), GRACE);
        let shutdown = server.shutdown_token();

        let (client_io, server_io) = tokio::io::duplex(64 * 1024);
        let (server_read, server_write) = tokio::io::split(server_io);
        let server = tokio::spawn(async move { server.serve(server_read, server_write).await });

        let (client_read, writer) = tokio::io::split(client_io);
        Self {
            writer,
            lines: BufReader::new(client_read).lines(),
            server,
            shutdown,
        }
    }

    async fn send(&mut self, message: Value) {
        let mut line = message.to_string();
        line.push('\n');
        self.writer.write_all(line.as_bytes()).await.unwrap();
        self.writer.flush().await.unwrap();
    }

    async fn next(&mut self) -> Option<Value> {
        let line = tokio::time::timeout(Duration::from_secs(5), self.lines.next_line())
            .await
            .expect("timed out waiting for server output")
            .unwrap()?;
        Some(serde_json::from_str(&line).unwrap())
    }

    /// Read until the response with `id`, collecting notifications on the way
    async fn response(&mut self, id: i64) -> (Value, Vec<Value>) {
        let mut notifications = Vec::new();
        loop {
            let message = self.next().await.expect("server closed before responding");
            if message.get("id") == Some(&json!(id)) {
                return (message, notifications);
            }
            notifications.push(message);
        }
    }

    /// Read until a message matches, dropping the ones before it
    async fn until(&mut self, matches: impl Fn(&Value) -> bool) -> Value {
        loop {
            let message = self.next().await.expect("server closed before the expected message");
            if matches(&message) {
                return message;
            }
        }
    }

    async fn call(&mut self, id: i64, arguments: Value) -> (Value, Vec<Value>) {
        self.start_call(id, arguments).await;
        self.response(id).await
    }

    /// Send a tools/call without waiting for its response
    async fn start_call(&mut self, id: i64, arguments: Value) {
        self.send(json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": "tools/call",
            "params": {
                "name": "get_instagram_posts",
                "arguments": arguments,
                "_meta": { "progressToken": format!("p{}", id) }
            }
        }))
        .await;
    }

    async fn close(mut self) -> anyhow::Result<()> {
        self.writer.shutdown().await.unwrap();
        drop(self.writer);
        while self.lines.next_line().await.ok().flatten().is_some() {}
        self.server.await.unwrap()
    }
}

#[tokio::test]
async fn test_initialize_and_list_tools() {
    let mut client = Client::start(FakeBrowser::default(), ScriptedExtractor::default());

    client
        .send(json!({ "jsonrpc": "2.0", "id": 1, "method": "initialize", "params": {} }))
        .await;
    let (init, _) = client.response(1).await;
    assert_eq!(init["result"]["serverInfo"]["name"], "instagram-mcp");
    assert_eq!(init["result"]["protocolVersion"], "2024-11-05");

    client
        .send(json!({ "jsonrpc": "2.0", "method": "notifications/initialized" }))
        .await;
    client
        .send(json!({ "jsonrpc": "2.0", "id": 2, "method": "tools/list" }))
        .await;
    let (list, notes) = client.response(2).await;
    assert!(notes.is_empty(), "initialized notification must not be answered");
    let tools = list["result"]["tools"].as_array().unwrap();
    assert_eq!(tools.len(), 1);
    assert_eq!(tools[0]["name"], "get_instagram_posts");
    assert_eq!(tools[0]["inputSchema"]["required"], json!(["username"]));

    client.close().await.unwrap();
}

#[tokio::test]
async fn test_alice_call_over_protocol() {
    let extractor = ScriptedExtractor::batches(&[2]);
    let mut client = Client::start(FakeBrowser::default(), extractor.clone());

    let (response, notifications) = client
        .call(7, json!({ "username": "alice", "limit": 2, "startFrom": 5 }))
        .await;

    let result = &response["result"];
    assert!(result.get("isError").is_none());
    let payload = &result["structuredContent"];
    assert_eq!(payload["posts"][0]["id"], "post5");
    assert_eq!(payload["posts"][1]["id"], "post6");
    assert_eq!(
        payload["pagination"],
        json!({
            "currentBatch": { "start": 5, "end": 7, "size": 2 },
            "nextStartFrom": 7,
            "hasMore": false
        })
    );

    assert!(!notifications.is_empty());
    for note in &notifications {
        assert_eq!(note["method"], "notifications/progress");
        assert_eq!(note["params"]["progressToken"], "p7");
        assert!(note.get("id").is_none());
    }

    client.close().await.unwrap();
}

#[tokio::test]
async fn test_bob_fetch_all_streams_progress_before_result() {
    let mut client = Client::start(FakeBrowser::default(), ScriptedExtractor::batches(&[3, 3, 1]));

    let (response, notifications) = client
        .call(3, json!({ "username": "bob", "limit": "all", "startFrom": 0 }))
        .await;

    let payload = &response["result"]["structuredContent"];
    assert_eq!(payload["posts"].as_array().unwrap().len(), 7);
    assert_eq!(payload["pagination"]["nextStartFrom"], 7);
    assert_eq!(payload["pagination"]["hasMore"], false);

    assert!(notifications.len() >= 3);
    let batches: Vec<u64> = notifications
        .iter()
        .filter(|n| n["params"]["message"].as_str().unwrap_or("").starts_with("Batch "))
        .map(|n| n["params"]["progress"].as_u64().unwrap())
        .collect();
    assert_eq!(batches, vec![3, 6, 7]);

    client.close().await.unwrap();
}

#[tokio::test]
async fn test_invalid_params_are_protocol_errors() {
    let extractor = ScriptedExtractor::batches(&[3, 3, 3]);
    let browser = FakeBrowser::default();
    let mut client = Client::start(browser.clone(), extractor.clone());

    let cases = [
        json!({ "limit": 2 }),
        json!({ "username": "alice", "limit": "lots" }),
        json!({ "username": "alice", "startFrom": "5" }),
    ];
    for (i, args) in cases.into_iter().enumerate() {
        let id = 10 + i as i64;
        let (response, _) = client.call(id, args).await;
        assert_eq!(response["error"]["code"], -32602, "{}", response);
        assert!(response.get("result").is_none());
    }

    assert_eq!(extractor.calls(), 0);
    assert_eq!(browser.acquired.load(Ordering::SeqCst), 0);

    client.close().await.unwrap();
}

#[tokio::test]
async fn test_unknown_tool_and_method() {
    let mut client = Client::start(FakeBrowser::default(), ScriptedExtractor::default());

    client
        .send(json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "tools/call",
            "params": { "name": "get_instagram_followers", "arguments": {} }
        }))
        .await;
    let (response, _) = client.response(1).await;
    assert_eq!(response["error"]["code"], -32601);

    client
        .send(json!({ "jsonrpc": "2.0", "id": 2, "method": "resources/list" }))
        .await;
    let (response, _) = client.response(2).await;
    assert_eq!(response["error"]["code"], -32601);

    client.send(json!("not a request")).await;
    let parse_error = client.next().await.unwrap();
    assert_eq!(parse_error["error"]["code"], -32700);

    client.close().await.unwrap();
}

#[tokio::test]
async fn test_session_unavailable_is_soft_error() {
    let mut client = Client::start(FakeBrowser::logged_out(), ScriptedExtractor::batches(&[3]));

    let (response, _) = client.call(4, json!({ "username": "alice" })).await;
    assert!(response.get("error").is_none());
    assert_eq!(response["result"]["isError"], true);
    let text = response["result"]["content"][0]["text"].as_str().unwrap();
    assert!(text.starts_with("Instagram error: "), "{}", text);

    // The server keeps serving after a soft error
    client
        .send(json!({ "jsonrpc": "2.0", "id": 5, "method": "ping" }))
        .await;
    let (pong, _) = client.response(5).await;
    assert_eq!(pong["result"], json!({}));

    client.close().await.unwrap();
}

#[tokio::test]
async fn test_shutdown_releases_session_and_closes_transport() {
    let browser = FakeBrowser::default();
    let mut client = Client::start(browser.clone(), ScriptedExtractor::batches(&[1]));

    let (response, _) = client.call(1, json!({ "username": "alice", "limit": 1 })).await;
    assert_eq!(response["result"]["structuredContent"]["posts"].as_array().unwrap().len(), 1);

    client.shutdown.cancel();
    assert!(client.next().await.is_none(), "transport should close on shutdown");

    client.server.await.unwrap().unwrap();
    assert_eq!(browser.released.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_shutdown_while_fetch_all_is_inside_a_round() {
    let browser = FakeBrowser::default();
    let mut client = Client::start(
        browser.clone(),
        ScriptedExtractor::new(vec![Round::Posts(3), Round::Hang]),
    );

    client
        .start_call(1, json!({ "username": "ivy", "limit": "all" }))
        .await;
    client
        .until(|m| m["params"]["message"].as_str().unwrap_or("").starts_with("Batch 1:"))
        .await;

    let started = Instant::now();
    client.shutdown.cancel();
    while client.next().await.is_some() {}

    client.server.await.unwrap().unwrap();
    assert!(started.elapsed() < GRACE + Duration::from_secs(2), "took {:?}", started.elapsed());
    assert_eq!(browser.released.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_client_cancel_stops_only_the_named_call() {
    let gate = Arc::new(Notify::new());
    let extractor = ScriptedExtractor::new(vec![Round::Held(gate.clone(), 2)]);
    let mut client = Client::start(FakeBrowser::default(), extractor.clone());

    client
        .start_call(1, json!({ "username": "alice", "limit": 2 }))
        .await;
    // alice has the tab once her first progress message is out
    client.until(|m| m["params"]["progressToken"] == "p1").await;

    client
        .start_call(2, json!({ "username": "bob", "limit": 2 }))
        .await;
    let waiting = client.until(|m| m["params"]["progressToken"] == "p2").await;
    assert!(waiting["params"]["message"].as_str().unwrap().starts_with("Waiting"));

    client
        .send(json!({
            "jsonrpc": "2.0",
            "method": "notifications/cancelled",
            "params": { "requestId": 2, "reason": "user aborted" }
        }))
        .await;

    let (bob, _) = client.response(2).await;
    assert_eq!(bob["result"]["isError"], true);
    let text = bob["result"]["content"][0]["text"].as_str().unwrap();
    assert!(text.contains("cancelled"), "{}", text);

    gate.notify_one();
    let (alice, _) = client.response(1).await;
    assert!(alice["result"].get("isError").is_none());
    let posts = alice["result"]["structuredContent"]["posts"].as_array().unwrap();
    assert_eq!(posts.len(), 2);
    assert_eq!(posts[0]["id"], "post0");
    assert_eq!(extractor.calls(), 1);

    client.close().await.unwrap();
}
