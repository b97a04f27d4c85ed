use parking_lot::Mutex;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use kiln_core::{KilnError, Result};

use crate::language::detect_language_id;
use crate::protocol::{Diagnostic, PublishDiagnosticsParams, path_to_uri};
use crate::transport;

/// Default deadline for a request/response round-trip.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

type Writer = Box<dyn AsyncWrite + Send + Unpin>;
type Responder = oneshot::Sender<std::result::Result<Value, Value>>;

/// A connection to one language server.
pub struct LspClient {
    name: String,
    writer: tokio::sync::Mutex<Writer>,
    next_id: AtomicI64,
    pending: Mutex<HashMap<i64, Responder>>,
    /// Latest diagnostics per document URI.
    diagnostics: Mutex<HashMap<String, Vec<Diagnostic>>>,
    /// Open documents and their current version.
    open_files: Mutex<HashMap<String, i32>>,
    waiters: Mutex<HashMap<u64, mpsc::Sender<String>>>,
    next_waiter: AtomicU64,
    child: Mutex<Option<Child>>,
    reader_task: Mutex<Option<JoinHandle<()>>>,
}

/// Deregisters a diagnostics waiter when dropped.
pub struct WaiterGuard {
    client: Arc<LspClient>,
    id: u64,
}

impl Drop for WaiterGuard {
    fn drop(&mut self) {
        self.client.waiters.lock().remove(&self.id);
    }
}

impl LspClient {
    /// Wrap an already-connected transport and start the reader task.
    pub fn connect<R, W>(name: impl Into<String>, reader: R, writer: W) -> Arc<Self>
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let client = Arc::new(Self {
            name: name.into(),
            writer: tokio::sync::Mutex::new(Box::new(writer)),
            next_id: AtomicI64::new(1),
            pending: Mutex::new(HashMap::new()),
            diagnostics: Mutex::new(HashMap::new()),
            open_files: Mutex::new(HashMap::new()),
            waiters: Mutex::new(HashMap::new()),
            next_waiter: AtomicU64::new(1),
            child: Mutex::new(None),
            reader_task: Mutex::new(None),
        });
        let handle = tokio::spawn(read_loop(Arc::downgrade(&client), BufReader::new(reader)));
        *client.reader_task.lock() = Some(handle);
        client
    }

    /// Start a server process in `root` and complete the handshake.
    pub async fn spawn(
        name: &str,
        command: &str,
        args: &[String],
        root: &Path,
        options: Option<Value>,
    ) -> Result<Arc<Self>> {
        let mut child = Command::new(command)
            .args(args)
            .current_dir(root)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| KilnError::Lsp {
                server: name.to_string(),
                reason: format!("failed to start '{command}': {e}"),
            })?;

        let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
            return Err(KilnError::Lsp {
                server: name.to_string(),
                reason: "server stdio unavailable".into(),
            });
        };

        let client = Self::connect(name, stdout, stdin);
        *client.child.lock() = Some(child);
        client.initialize(root, options).await?;
        info!(server = name, command, "language server initialized");
        Ok(client)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// `initialize` request followed by the `initialized` notification.
    pub async fn initialize(&self, root: &Path, options: Option<Value>) -> Result<Value> {
        let root_uri = path_to_uri(root);
        let params = json!({
            "processId": std::process::id(),
            "clientInfo": { "name": "kiln", "version": env!("CARGO_PKG_VERSION") },
            "rootPath": root.display().to_string(),
            "rootUri": root_uri,
            "workspaceFolders": [{ "uri": root_uri, "name": root.display().to_string() }],
            "capabilities": {
                "workspace": {
                    "configuration": true,
                    "didChangeConfiguration": { "dynamicRegistration": true },
                    "didChangeWatchedFiles": { "dynamicRegistration": true }
                },
                "textDocument": {
                    "synchronization": { "dynamicRegistration": true, "didSave": true },
                    "publishDiagnostics": {
                        "relatedInformation": true,
                        "versionSupport": true,
                        "tagSupport": { "valueSet": [1, 2] }
                    }
                },
                "window": { "workDoneProgress": true }
            },
            "initializationOptions": options.unwrap_or(Value::Null),
        });
        let result = self.call("initialize", params).await?;
        self.notify("initialized", json!({})).await?;
        Ok(result)
    }

    pub async fn call(&self, method: &str, params: Value) -> Result<Value> {
        self.call_with_timeout(method, params, REQUEST_TIMEOUT).await
    }

    pub async fn call_with_timeout(
        &self,
        method: &str,
        params: Value,
        timeout: Duration,
    ) -> Result<Value> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(id, tx);

        let msg = json!({ "jsonrpc": "2.0", "id": id, "method": method, "params": params });
        if let Err(e) = self.send(&msg).await {
            self.pending.lock().remove(&id);
            return Err(e);
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(Ok(result))) => Ok(result),
            Ok(Ok(Err(err))) => Err(self.error(format!("{method} failed: {err}"))),
            Ok(Err(_)) => Err(self.error("connection closed")),
            Err(_) => {
                self.pending.lock().remove(&id);
                Err(KilnError::LspTimeout {
                    method: method.to_string(),
                })
            }
        }
    }

    pub async fn notify(&self, method: &str, params: Value) -> Result<()> {
        let msg = json!({ "jsonrpc": "2.0", "method": method, "params": params });
        self.send(&msg).await
    }

    async fn send(&self, msg: &Value) -> Result<()> {
        let mut writer = self.writer.lock().await;
        transport::write_message(&mut *writer, msg)
            .await
            .map_err(|e| self.error(format!("write failed: {e}")))
    }

    fn error(&self, reason: impl Into<String>) -> KilnError {
        KilnError::Lsp {
            server: self.name.clone(),
            reason: reason.into(),
        }
    }

    // ── Document sync ──────────────────────────────────────────

    pub fn is_open(&self, path: &Path) -> bool {
        self.open_files.lock().contains_key(&path_to_uri(path))
    }

    /// Send `didOpen` with version 1. Returns false if already open.
    pub async fn open_file(&self, path: &Path) -> Result<bool> {
        let uri = path_to_uri(path);
        if self.open_files.lock().contains_key(&uri) {
            return Ok(false);
        }
        let text = tokio::fs::read_to_string(path).await?;
        self.notify(
            "textDocument/didOpen",
            json!({
                "textDocument": {
                    "uri": uri,
                    "languageId": detect_language_id(path),
                    "version": 1,
                    "text": text,
                }
            }),
        )
        .await?;
        self.open_files.lock().insert(uri, 1);
        Ok(true)
    }

    /// Send the whole document as a `didChange` with the next version.
    pub async fn notify_change(&self, path: &Path) -> Result<()> {
        let uri = path_to_uri(path);
        let text = tokio::fs::read_to_string(path).await?;
        let version = {
            let mut open = self.open_files.lock();
            let Some(v) = open.get_mut(&uri) else {
                return Err(self.error(format!(
                    "cannot notify change for unopened file: {}",
                    path.display()
                )));
            };
            *v += 1;
            *v
        };
        self.notify(
            "textDocument/didChange",
            json!({
                "textDocument": { "uri": uri, "version": version },
                "contentChanges": [{ "text": text }],
            }),
        )
        .await
    }

    pub async fn close_file(&self, path: &Path) -> Result<()> {
        let uri = path_to_uri(path);
        if self.open_files.lock().remove(&uri).is_none() {
            return Ok(());
        }
        self.notify("textDocument/didClose", json!({ "textDocument": { "uri": uri } }))
            .await
    }

    // ── Diagnostics ────────────────────────────────────────────

    pub fn diagnostics(&self) -> HashMap<String, Vec<Diagnostic>> {
        self.diagnostics.lock().clone()
    }

    pub fn diagnostics_for(&self, path: &Path) -> Vec<Diagnostic> {
        self.diagnostics
            .lock()
            .get(&path_to_uri(path))
            .cloned()
            .unwrap_or_default()
    }

    /// Total diagnostics across all documents.
    pub fn diagnostic_count(&self) -> usize {
        self.diagnostics.lock().values().map(Vec::len).sum()
    }

    /// Receive the URI of every subsequent `publishDiagnostics` on `tx`
    /// until the guard is dropped. Full channels drop notices.
    pub fn register_waiter(self: &Arc<Self>, tx: mpsc::Sender<String>) -> WaiterGuard {
        let id = self.next_waiter.fetch_add(1, Ordering::SeqCst);
        self.waiters.lock().insert(id, tx);
        WaiterGuard {
            client: Arc::clone(self),
            id,
        }
    }

    /// Polite shutdown, then kill whatever is left.
    pub async fn shutdown(&self) {
        if let Err(e) = self
            .call_with_timeout("shutdown", Value::Null, Duration::from_secs(2))
            .await
        {
            debug!(server = %self.name, error = %e, "shutdown request failed");
        }
        let _ = self.notify("exit", Value::Null).await;
        let child = self.child.lock().take();
        if let Some(mut child) = child {
            let _ = child.kill().await;
        }
        if let Some(handle) = self.reader_task.lock().take() {
            handle.abort();
        }
    }

    // ── Incoming messages ──────────────────────────────────────

    async fn handle_message(&self, msg: Value) {
        let method = msg.get("method").and_then(Value::as_str).map(str::to_string);
        let id = msg.get("id").cloned().filter(|v| !v.is_null());
        match (method, id) {
            (Some(method), Some(id)) => {
                let result = self.server_request(&method, msg.get("params"));
                let reply = json!({ "jsonrpc": "2.0", "id": id, "result": result });
                if let Err(e) = self.send(&reply).await {
                    warn!(server = %self.name, %method, error = %e, "failed to answer server request");
                }
            }
            (Some(method), None) => {
                self.handle_notification(&method, msg.get("params").cloned().unwrap_or(Value::Null))
            }
            (None, Some(id)) => {
                let Some(id) = id.as_i64() else {
                    return;
                };
                let responder = self.pending.lock().remove(&id);
                if let Some(tx) = responder {
                    let outcome = match msg.get("error") {
                        Some(err) if !err.is_null() => Err(err.clone()),
                        _ => Ok(msg.get("result").cloned().unwrap_or(Value::Null)),
                    };
                    let _ = tx.send(outcome);
                }
            }
            (None, None) => debug!(server = %self.name, "ignoring malformed message"),
        }
    }

    fn server_request(&self, method: &str, params: Option<&Value>) -> Value {
        match method {
            // One (empty) configuration section per requested item.
            "workspace/configuration" => {
                let n = params
                    .and_then(|p| p.get("items"))
                    .and_then(Value::as_array)
                    .map_or(0, Vec::len);
                Value::Array(vec![Value::Null; n])
            }
            "client/registerCapability"
            | "client/unregisterCapability"
            | "window/workDoneProgress/create" => Value::Null,
            "workspace/applyEdit" => json!({ "applied": false }),
            _ => {
                debug!(server = %self.name, method, "unhandled server request");
                Value::Null
            }
        }
    }

    fn handle_notification(&self, method: &str, params: Value) {
        match method {
            "textDocument/publishDiagnostics" => {
                match serde_json::from_value::<PublishDiagnosticsParams>(params) {
                    Ok(p) => {
                        debug!(
                            server = %self.name,
                            uri = %p.uri,
                            count = p.diagnostics.len(),
                            "diagnostics published"
                        );
                        self.diagnostics.lock().insert(p.uri.clone(), p.diagnostics);
                        let waiters: Vec<mpsc::Sender<String>> =
                            self.waiters.lock().values().cloned().collect();
                        for w in waiters {
                            let _ = w.try_send(p.uri.clone());
                        }
                    }
                    Err(e) => warn!(server = %self.name, error = %e, "bad publishDiagnostics payload"),
                }
            }
            "window/logMessage" | "window/showMessage" => {
                debug!(server = %self.name, message = ?params.get("message"), "server message");
            }
            _ => debug!(server = %self.name, method, "unhandled notification"),
        }
    }
}

impl Drop for LspClient {
    fn drop(&mut self) {
        if let Some(handle) = self.reader_task.get_mut().take() {
            handle.abort();
        }
    }
}

async fn read_loop<R: AsyncRead + Unpin>(client: Weak<LspClient>, mut reader: BufReader<R>) {
    loop {
        let msg = match transport::read_message(&mut reader).await {
            Ok(Some(msg)) => msg,
            Ok(None) => break,
            Err(e) => {
                warn!(error = %e, "language server stream error");
                break;
            }
        };
        let Some(client) = client.upgrade() else {
            return;
        };
        client.handle_message(msg).await;
    }
    if let Some(client) = client.upgrade() {
        // Dropping the responders fails every in-flight call.
        client.pending.lock().clear();
        info!(server = %client.name, "language server connection closed");
    }
}
