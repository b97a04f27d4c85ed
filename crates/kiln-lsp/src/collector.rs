use parking_lot::RwLock;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use kiln_core::Result;

use crate::client::LspClient;
use crate::protocol::path_to_uri;
use crate::render::render_diagnostics;

/// How long a write waits for fresh diagnostics.
pub const DEFAULT_WAIT_TIMEOUT: Duration = Duration::from_secs(5);

const WAIT_CHANNEL_CAPACITY: usize = 16;

/// Pool of language-server clients keyed by language name.
pub struct DiagnosticsCollector {
    clients: RwLock<BTreeMap<String, Arc<LspClient>>>,
    wait_timeout: Duration,
}

impl Default for DiagnosticsCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl DiagnosticsCollector {
    pub fn new() -> Self {
        Self::with_wait_timeout(DEFAULT_WAIT_TIMEOUT)
    }

    pub fn with_wait_timeout(wait_timeout: Duration) -> Self {
        Self {
            clients: RwLock::new(BTreeMap::new()),
            wait_timeout,
        }
    }

    pub fn add_client(&self, language: impl Into<String>, client: Arc<LspClient>) {
        self.clients.write().insert(language.into(), client);
    }

    /// Spawn a server and add it to the pool.
    pub async fn start(
        &self,
        language: &str,
        command: &str,
        args: &[String],
        root: &Path,
        options: Option<Value>,
    ) -> Result<()> {
        match LspClient::spawn(language, command, args, root, options).await {
            Ok(client) => {
                self.add_client(language, client);
                Ok(())
            }
            Err(e) => {
                warn!(language, command, error = %e, "failed to start language server");
                Err(e)
            }
        }
    }

    pub fn has_clients(&self) -> bool {
        !self.clients.read().is_empty()
    }

    pub fn languages(&self) -> Vec<String> {
        self.clients.read().keys().cloned().collect()
    }

    fn snapshot(&self) -> Vec<Arc<LspClient>> {
        self.clients.read().values().cloned().collect()
    }

    /// `didOpen` on clients that have not seen the file, `didChange` on
    /// the rest.
    pub async fn open_file(&self, path: &Path) {
        for client in self.snapshot() {
            sync_file(&client, path).await;
        }
    }

    /// Open or refresh `path` on every client, then wait for the first of:
    /// diagnostics published for `path`, any client's total diagnostic
    /// count rising above its snapshot, the wait timeout, or `cancel`.
    ///
    /// Returns true when fresh diagnostics arrived.
    pub async fn wait_for_diagnostics(&self, cancel: &CancellationToken, path: &Path) -> bool {
        let clients = self.snapshot();
        if clients.is_empty() || cancel.is_cancelled() {
            return false;
        }

        let uri = path_to_uri(path);
        let (tx, mut rx) = mpsc::channel::<String>(WAIT_CHANNEL_CAPACITY);
        let mut _guards = Vec::with_capacity(clients.len());
        let mut baseline = Vec::with_capacity(clients.len());
        for client in &clients {
            _guards.push(client.register_waiter(tx.clone()));
            baseline.push(client.diagnostic_count());
        }
        drop(tx);

        for client in &clients {
            sync_file(client, path).await;
        }

        let deadline = tokio::time::sleep(self.wait_timeout);
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!(path = %path.display(), "diagnostics wait cancelled");
                    return false;
                }
                _ = &mut deadline => {
                    debug!(path = %path.display(), "timed out waiting for diagnostics");
                    return false;
                }
                notice = rx.recv() => {
                    let Some(published) = notice else {
                        return false;
                    };
                    let increased = clients
                        .iter()
                        .zip(&baseline)
                        .any(|(c, &before)| c.diagnostic_count() > before);
                    if published == uri || increased {
                        return true;
                    }
                }
            }
        }
    }

    /// Render what every server currently reports. `current` selects the
    /// entries for the `<file_diagnostics>` block.
    pub fn render(&self, current: Option<&Path>) -> String {
        let sources: Vec<_> = self
            .clients
            .read()
            .iter()
            .map(|(name, client)| (name.clone(), client.diagnostics()))
            .collect();
        render_diagnostics(current, &sources)
    }

    /// Shut every server down and empty the pool.
    pub async fn shutdown(&self) {
        let clients = std::mem::take(&mut *self.clients.write());
        for (language, client) in clients {
            client.shutdown().await;
            info!(%language, "language server stopped");
        }
    }
}

async fn sync_file(client: &LspClient, path: &Path) {
    let outcome = if client.is_open(path) {
        client.notify_change(path).await
    } else {
        client.open_file(path).await.map(|_| ())
    };
    if let Err(e) = outcome {
        debug!(server = client.name(), path = %path.display(), error = %e, "file sync failed");
    }
}
