// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! One MCP server connection: a spawned child process, a frame-reassembly
//! reader task, and a pending-request map correlating responses by id.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{json, Value};
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::oneshot;
use tracing::{debug, warn};

use tern_config::McpServerConfig;
use tern_tools::security::command::validate_command;

use crate::protocol::{
    CallToolResult, JsonRpcNotification, JsonRpcRequest, ListToolsResult, McpToolInfo,
    PROTOCOL_VERSION,
};

/// Per-request timeout (initialize, tools/list, tools/call).
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
/// Grace between SIGTERM and SIGKILL on disconnect.
const TERM_GRACE: Duration = Duration::from_secs(3);
/// Read-buffer cap: a server that emits this much without a newline is
/// assumed to be writing garbage to stdout.
const MAX_FRAME_BYTES: usize = 1024 * 1024;
/// Bounded log ring of recent stderr/notification lines.
const LOG_RING_CAPACITY: usize = 500;

type PendingMap = HashMap<u64, oneshot::Sender<anyhow::Result<Value>>>;

/// Shared between the client handle and its reader tasks.
struct Shared {
    server_id: String,
    pending: Mutex<PendingMap>,
    connected: AtomicBool,
    log: Mutex<VecDeque<String>>,
}

impl Shared {
    fn log_line(&self, line: impl Into<String>) {
        let mut log = self.log.lock().unwrap();
        if log.len() >= LOG_RING_CAPACITY {
            log.pop_front();
        }
        log.push_back(line.into());
    }

    /// Reject every in-flight request with a shared error message.
    fn reject_all(&self, reason: &str) {
        let mut pending = self.pending.lock().unwrap();
        for (_, tx) in pending.drain() {
            let _ = tx.send(Err(anyhow::anyhow!("{reason}")));
        }
    }

    fn mark_disconnected(&self, reason: &str) {
        self.connected.store(false, Ordering::SeqCst);
        self.reject_all(reason);
    }
}

pub struct McpClient {
    shared: Arc<Shared>,
    stdin: tokio::sync::Mutex<Option<ChildStdin>>,
    child: tokio::sync::Mutex<Option<Child>>,
    next_id: AtomicU64,
    tools: Mutex<Vec<McpToolInfo>>,
}

impl McpClient {
    /// Spawn and handshake an MCP server.
    ///
    /// The spawn command is validated against the same executable
    /// allow-list as `execute_command`; relative traversal and shell
    /// metacharacters are rejected outright.  Any failure during the
    /// connect sequence tears the process down again.
    pub async fn connect(config: &McpServerConfig) -> anyhow::Result<Arc<Self>> {
        validate_spawn(config)?;

        let mut child = Command::new(&config.command)
            .args(&config.args)
            .envs(&config.env)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| anyhow::anyhow!("failed to spawn {}: {e}", config.command))?;

        let stdin = child.stdin.take().ok_or_else(|| anyhow::anyhow!("no stdin pipe"))?;
        let stdout = child.stdout.take().ok_or_else(|| anyhow::anyhow!("no stdout pipe"))?;
        let stderr = child.stderr.take().ok_or_else(|| anyhow::anyhow!("no stderr pipe"))?;

        let shared = Arc::new(Shared {
            server_id: config.id.clone(),
            pending: Mutex::new(HashMap::new()),
            connected: AtomicBool::new(false),
            log: Mutex::new(VecDeque::new()),
        });

        // Reader task: stdout → frame reassembly → pending-map correlation.
        tokio::spawn(read_frames(stdout, Arc::clone(&shared)));
        // stderr → log ring.
        tokio::spawn(read_stderr(stderr, Arc::clone(&shared)));

        let client = Arc::new(Self {
            shared,
            stdin: tokio::sync::Mutex::new(Some(stdin)),
            child: tokio::sync::Mutex::new(Some(child)),
            next_id: AtomicU64::new(1),
            tools: Mutex::new(Vec::new()),
        });

        if let Err(e) = client.handshake().await {
            client.disconnect().await;
            return Err(e.context(format!("MCP connect to {} failed", config.id)));
        }
        client.shared.connected.store(true, Ordering::SeqCst);
        debug!(server = %config.id, tools = client.tools.lock().unwrap().len(), "MCP server connected");
        Ok(client)
    }

    async fn handshake(&self) -> anyhow::Result<()> {
        let init = self
            .request(
                "initialize",
                Some(json!({
                    "protocolVersion": PROTOCOL_VERSION,
                    "capabilities": {},
                    "clientInfo": { "name": "tern", "version": env!("CARGO_PKG_VERSION") }
                })),
            )
            .await?;
        if init.is_null() {
            anyhow::bail!("initialize returned no result");
        }

        self.notify("notifications/initialized", None).await?;

        let listed = self.request("tools/list", None).await?;
        let result: ListToolsResult = serde_json::from_value(listed)?;
        *self.tools.lock().unwrap() = result.tools;
        Ok(())
    }

    /// Send one request and await its correlated response.
    async fn request(&self, method: &str, params: Option<Value>) -> anyhow::Result<Value> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        self.shared.pending.lock().unwrap().insert(id, tx);

        let frame = serde_json::to_string(&JsonRpcRequest::new(id, method, params))?;
        if let Err(e) = self.write_line(&frame).await {
            self.shared.pending.lock().unwrap().remove(&id);
            return Err(e);
        }

        match tokio::time::timeout(REQUEST_TIMEOUT, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => anyhow::bail!("{}: connection closed", method),
            Err(_) => {
                self.shared.pending.lock().unwrap().remove(&id);
                anyhow::bail!("{}: timed out after {}s", method, REQUEST_TIMEOUT.as_secs())
            }
        }
    }

    async fn notify(&self, method: &str, params: Option<Value>) -> anyhow::Result<()> {
        let frame = serde_json::to_string(&JsonRpcNotification::new(method, params))?;
        self.write_line(&frame).await
    }

    async fn write_line(&self, frame: &str) -> anyhow::Result<()> {
        let mut guard = self.stdin.lock().await;
        let stdin = guard.as_mut().ok_or_else(|| anyhow::anyhow!("client is disconnected"))?;
        stdin.write_all(frame.as_bytes()).await?;
        stdin.write_all(b"\n").await?;
        stdin.flush().await?;
        Ok(())
    }

    /// Invoke one tool; returns the concatenated text content.  A result
    /// flagged `isError` becomes an error carrying that text.
    pub async fn call_tool(&self, name: &str, args: &Value) -> anyhow::Result<String> {
        let result = self
            .request("tools/call", Some(json!({ "name": name, "arguments": args })))
            .await?;
        let parsed: CallToolResult = serde_json::from_value(result)?;
        let text = parsed.text();
        if parsed.is_error {
            anyhow::bail!("{text}");
        }
        Ok(text)
    }

    pub fn tools(&self) -> Vec<McpToolInfo> {
        self.tools.lock().unwrap().clone()
    }

    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::SeqCst)
    }

    pub fn server_id(&self) -> &str {
        &self.shared.server_id
    }

    /// Recent stderr and notification lines (bounded ring).
    pub fn recent_logs(&self) -> Vec<String> {
        self.shared.log.lock().unwrap().iter().cloned().collect()
    }

    /// Tear down: reject pending requests, close stdin, terminate the
    /// child (SIGTERM, then SIGKILL after a grace period).
    pub async fn disconnect(&self) {
        self.shared.mark_disconnected("client disconnecting");
        self.stdin.lock().await.take();

        let mut guard = self.child.lock().await;
        if let Some(mut child) = guard.take() {
            terminate(&mut child).await;
        }
    }
}

#[cfg(unix)]
async fn terminate(child: &mut Child) {
    if let Some(pid) = child.id() {
        // SAFETY: plain kill(2) on a pid we own.
        unsafe {
            libc::kill(pid as i32, libc::SIGTERM);
        }
        if tokio::time::timeout(TERM_GRACE, child.wait()).await.is_ok() {
            return;
        }
        warn!(pid, "MCP server ignored SIGTERM; killing");
    }
    let _ = child.kill().await;
}

#[cfg(not(unix))]
async fn terminate(child: &mut Child) {
    let _ = child.kill().await;
}

/// Reject shell metacharacters, parent-directory traversal, and executables
/// outside the spawn allow-list.
fn validate_spawn(config: &McpServerConfig) -> anyhow::Result<()> {
    if config.command.trim().is_empty() {
        anyhow::bail!("MCP server command must be a non-empty string");
    }
    if config.command.contains("..") {
        anyhow::bail!("MCP server command must not contain '..'");
    }
    validate_command(&config.command, &[])?;
    for arg in &config.args {
        if arg.contains('\n') || arg.contains('\r') {
            anyhow::bail!("MCP server arguments must be single-line");
        }
    }
    Ok(())
}

/// Stdout loop: append chunks to a carry-over buffer, split complete
/// newline-terminated frames, and correlate decoded responses by id.
/// Id-less values are notifications; decode failures are logged and
/// skipped.  A buffer exceeding [`MAX_FRAME_BYTES`] without a newline
/// means the child is not speaking the protocol: reject everything and
/// stop reading.
async fn read_frames(stdout: tokio::process::ChildStdout, shared: Arc<Shared>) {
    let mut reader = BufReader::new(stdout);
    let mut buf = String::new();
    let mut chunk = [0u8; 8192];

    loop {
        match reader.read(&mut chunk).await {
            Ok(0) => {
                shared.mark_disconnected("MCP server closed its stdout");
                return;
            }
            Err(e) => {
                shared.mark_disconnected(&format!("MCP stdout read failed: {e}"));
                return;
            }
            Ok(n) => {
                buf.push_str(&String::from_utf8_lossy(&chunk[..n]));
                if buf.len() > MAX_FRAME_BYTES && !buf.contains('\n') {
                    shared.log_line("stdout overflow: 1 MB without a newline");
                    shared.mark_disconnected("MCP server emitted malformed output");
                    return;
                }
                for frame in split_frames(&mut buf) {
                    handle_frame(&shared, &frame);
                }
            }
        }
    }
}

/// Drain complete newline-terminated frames; the trailing partial line is
/// left in `buf`.
fn split_frames(buf: &mut String) -> Vec<String> {
    let mut frames = Vec::new();
    while let Some(pos) = buf.find('\n') {
        let line: String = buf.drain(..=pos).collect();
        let line = line.trim();
        if !line.is_empty() {
            frames.push(line.to_string());
        }
    }
    frames
}

fn handle_frame(shared: &Shared, frame: &str) {
    let value: Value = match serde_json::from_str(frame) {
        Ok(v) => v,
        Err(e) => {
            shared.log_line(format!("undecodable frame: {e}"));
            return;
        }
    };

    let Some(id) = value.get("id").and_then(|i| i.as_u64()) else {
        // No id: a server notification.
        let method = value["method"].as_str().unwrap_or("(unknown)");
        debug!(server = %shared.server_id, method, "MCP notification");
        shared.log_line(format!("notification: {method}"));
        return;
    };

    let Some(tx) = shared.pending.lock().unwrap().remove(&id) else {
        shared.log_line(format!("response for unknown request id {id}"));
        return;
    };

    if let Some(error) = value.get("error").filter(|e| !e.is_null()) {
        let message = error["message"].as_str().unwrap_or("unknown error").to_string();
        let _ = tx.send(Err(anyhow::anyhow!("{message}")));
    } else {
        let _ = tx.send(Ok(value.get("result").cloned().unwrap_or(Value::Null)));
    }
}

async fn read_stderr(stderr: tokio::process::ChildStderr, shared: Arc<Shared>) {
    use tokio::io::AsyncBufReadExt;
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        shared.log_line(line);
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn shared() -> Arc<Shared> {
        Arc::new(Shared {
            server_id: "test".into(),
            pending: Mutex::new(HashMap::new()),
            connected: AtomicBool::new(true),
            log: Mutex::new(VecDeque::new()),
        })
    }

    fn config(command: &str) -> McpServerConfig {
        McpServerConfig {
            id: "srv".into(),
            command: command.into(),
            args: vec![],
            env: HashMap::new(),
        }
    }

    // ── Spawn validation ──────────────────────────────────────────────────────

    #[test]
    fn disallowed_executable_rejected() {
        assert!(validate_spawn(&config("rm")).is_err());
        assert!(validate_spawn(&config("bash")).is_err());
    }

    #[test]
    fn traversal_rejected() {
        assert!(validate_spawn(&config("../node")).is_err());
    }

    #[test]
    fn metacharacters_rejected() {
        assert!(validate_spawn(&config("node; rm -rf /")).is_err());
    }

    #[test]
    fn allow_listed_runtime_accepted() {
        assert!(validate_spawn(&config("node")).is_ok());
        assert!(validate_spawn(&config("npx")).is_ok());
        assert!(validate_spawn(&config("python3")).is_ok());
    }

    // ── Frame reassembly ──────────────────────────────────────────────────────

    #[test]
    fn frames_split_on_newlines_keeping_trailer() {
        let mut buf = String::from("{\"a\":1}\n{\"b\":2}\n{\"part");
        let frames = split_frames(&mut buf);
        assert_eq!(frames, vec!["{\"a\":1}", "{\"b\":2}"]);
        assert_eq!(buf, "{\"part");
    }

    #[test]
    fn blank_lines_are_skipped() {
        let mut buf = String::from("\n\n{\"x\":1}\n\n");
        assert_eq!(split_frames(&mut buf), vec!["{\"x\":1}"]);
    }

    // ── Correlation ───────────────────────────────────────────────────────────

    #[tokio::test]
    async fn response_resolves_matching_pending() {
        let s = shared();
        let (tx, rx) = oneshot::channel();
        s.pending.lock().unwrap().insert(9, tx);
        handle_frame(&s, r#"{"jsonrpc":"2.0","id":9,"result":{"ok":true}}"#);
        let got = rx.await.unwrap().unwrap();
        assert_eq!(got["ok"], true);
    }

    #[tokio::test]
    async fn error_response_rejects_pending() {
        let s = shared();
        let (tx, rx) = oneshot::channel();
        s.pending.lock().unwrap().insert(4, tx);
        handle_frame(&s, r#"{"jsonrpc":"2.0","id":4,"error":{"code":-1,"message":"boom"}}"#);
        let err = rx.await.unwrap().unwrap_err();
        assert!(err.to_string().contains("boom"));
    }

    #[tokio::test]
    async fn notification_does_not_touch_pending() {
        let s = shared();
        let (tx, mut rx) = oneshot::channel();
        s.pending.lock().unwrap().insert(1, tx);
        handle_frame(&s, r#"{"jsonrpc":"2.0","method":"notifications/progress"}"#);
        assert!(rx.try_recv().is_err());
        assert!(s.recent_log_contains("notification: notifications/progress"));
    }

    #[test]
    fn undecodable_frame_is_logged_not_fatal() {
        let s = shared();
        handle_frame(&s, "not json");
        assert!(s.recent_log_contains("undecodable frame"));
    }

    #[test]
    fn log_ring_is_bounded() {
        let s = shared();
        for i in 0..(LOG_RING_CAPACITY + 50) {
            s.log_line(format!("line {i}"));
        }
        let log = s.log.lock().unwrap();
        assert_eq!(log.len(), LOG_RING_CAPACITY);
        assert_eq!(log.front().unwrap(), "line 50");
    }

    #[tokio::test]
    async fn reject_all_fails_every_pending() {
        let s = shared();
        let (tx1, rx1) = oneshot::channel();
        let (tx2, rx2) = oneshot::channel();
        s.pending.lock().unwrap().insert(1, tx1);
        s.pending.lock().unwrap().insert(2, tx2);
        s.reject_all("server exited");
        assert!(rx1.await.unwrap().is_err());
        assert!(rx2.await.unwrap().is_err());
    }

    impl Shared {
        fn recent_log_contains(&self, needle: &str) -> bool {
            self.log.lock().unwrap().iter().any(|l| l.contains(needle))
        }
    }
}
