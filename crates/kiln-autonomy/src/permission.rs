use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use kiln_core::{Broker, EventKind, KilnError, Result, SessionId, Subscription};

/// What a tool asks permission for.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreatePermissionRequest {
    pub session_id: SessionId,
    pub tool_name: String,
    /// Verb for the side effect: "write", "replace", "execute", "fetch", ...
    pub action: String,
    pub description: String,
    /// Directory the action is scoped to.
    pub path: String,
    pub params: serde_json::Value,
}

/// A request as shown to the user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PermissionRequest {
    pub id: Uuid,
    pub session_id: SessionId,
    pub tool_name: String,
    pub action: String,
    pub description: String,
    pub path: String,
    pub params: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PermissionDecision {
    AllowOnce,
    AllowPersistent,
    Deny,
}

impl PermissionDecision {
    pub fn is_allowed(self) -> bool {
        !matches!(self, PermissionDecision::Deny)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct PersistentGrant {
    session_id: SessionId,
    tool_name: String,
    action: String,
    path: String,
}

type Pending = (PermissionRequest, oneshot::Sender<PermissionDecision>);

/// Mediates user consent for side-effecting tool actions.
///
/// Tools call [`request`](Self::request) and block. The UI subscribes, shows
/// each request, and answers with [`grant`](Self::grant),
/// [`grant_persistent`](Self::grant_persistent) or [`deny`](Self::deny).
pub struct PermissionBroker {
    pending: Mutex<HashMap<Uuid, Pending>>,
    grants: Mutex<HashSet<PersistentGrant>>,
    auto_approved: Mutex<HashSet<SessionId>>,
    events: Broker<PermissionRequest>,
}

impl Default for PermissionBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl PermissionBroker {
    pub fn new() -> Self {
        Self {
            pending: Mutex::new(HashMap::new()),
            grants: Mutex::new(HashSet::new()),
            auto_approved: Mutex::new(HashSet::new()),
            events: Broker::new(),
        }
    }

    /// Subscribe to new requests (`Created`) and resolutions (`Deleted`).
    pub fn subscribe(&self, cancel: CancellationToken) -> Subscription<PermissionRequest> {
        self.events.subscribe(cancel)
    }

    /// Every request in this session is allowed without asking.
    pub fn auto_approve_session(&self, session_id: SessionId) {
        self.auto_approved.lock().insert(session_id);
    }

    /// Ask for consent. Returns `Ok(true)` at once when a persistent grant
    /// covers the request; otherwise waits for the UI. No timeout: only an
    /// answer or `cancel` ends the wait.
    pub async fn request(
        &self,
        cancel: &CancellationToken,
        req: CreatePermissionRequest,
    ) -> Result<bool> {
        if self.auto_approved.lock().contains(&req.session_id) {
            debug!(session_id = %req.session_id, tool = %req.tool_name, "session auto-approved");
            return Ok(true);
        }
        if self.has_persistent_grant(&req) {
            debug!(tool = %req.tool_name, action = %req.action, "persistent grant matched");
            return Ok(true);
        }

        let request = PermissionRequest {
            id: Uuid::new_v4(),
            session_id: req.session_id,
            tool_name: req.tool_name,
            action: req.action,
            description: req.description,
            path: req.path,
            params: req.params,
            created_at: Utc::now(),
        };
        let id = request.id;
        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(id, (request.clone(), tx));

        info!(
            request_id = %id,
            tool = %request.tool_name,
            action = %request.action,
            "requesting permission"
        );
        self.events.publish(EventKind::Created, request);

        tokio::select! {
            decision = rx => match decision {
                Ok(d) => Ok(d.is_allowed()),
                // Responder dropped without answering.
                Err(_) => Ok(false),
            },
            _ = cancel.cancelled() => {
                if let Some((req, _)) = self.pending.lock().remove(&id) {
                    self.events.publish(EventKind::Deleted, req);
                }
                Err(KilnError::Cancelled)
            }
        }
    }

    pub fn grant(&self, id: Uuid) -> bool {
        self.resolve(id, PermissionDecision::AllowOnce)
    }

    /// Allow and remember: later requests with the same session, tool and
    /// action whose path is a prefix of this one are allowed without asking.
    pub fn grant_persistent(&self, id: Uuid) -> bool {
        self.resolve(id, PermissionDecision::AllowPersistent)
    }

    pub fn deny(&self, id: Uuid) -> bool {
        self.resolve(id, PermissionDecision::Deny)
    }

    /// Answer a pending request. Returns false if `id` is unknown.
    pub fn resolve(&self, id: Uuid, decision: PermissionDecision) -> bool {
        let Some((request, tx)) = self.pending.lock().remove(&id) else {
            warn!(request_id = %id, "no pending permission request");
            return false;
        };
        if decision == PermissionDecision::AllowPersistent {
            self.grants.lock().insert(PersistentGrant {
                session_id: request.session_id,
                tool_name: request.tool_name.clone(),
                action: request.action.clone(),
                path: request.path.clone(),
            });
        }
        info!(request_id = %id, ?decision, "permission resolved");
        let _ = tx.send(decision);
        self.events.publish(EventKind::Deleted, request);
        true
    }

    /// Requests still waiting for an answer, oldest first.
    pub fn pending(&self) -> Vec<PermissionRequest> {
        let mut out: Vec<PermissionRequest> =
            self.pending.lock().values().map(|(r, _)| r.clone()).collect();
        out.sort_by_key(|r| r.created_at);
        out
    }

    fn has_persistent_grant(&self, req: &CreatePermissionRequest) -> bool {
        self.grants.lock().iter().any(|g| {
            g.session_id == req.session_id
                && g.tool_name == req.tool_name
                && g.action == req.action
                && g.path.starts_with(&req.path)
        })
    }

    /// Answer every request with `decide` until `cancel` fires. Used for
    /// non-interactive runs.
    pub fn spawn_responder<F>(self: &Arc<Self>, cancel: CancellationToken, decide: F) -> JoinHandle<()>
    where
        F: Fn(&PermissionRequest) -> PermissionDecision + Send + 'static,
    {
        let broker = Arc::clone(self);
        let mut sub = self.subscribe(cancel);
        tokio::spawn(async move {
            while let Some(event) = sub.recv().await {
                if event.kind == EventKind::Created {
                    let decision = decide(&event.payload);
                    broker.resolve(event.payload.id, decision);
                }
            }
        })
    }
}

/// Directory a file action is scoped to: the file's parent, or the working
/// directory when the path has none.
pub fn permission_path(file_path: &Path, working_dir: &Path) -> String {
    match file_path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() && dir != Path::new(".") => {
            dir.display().to_string()
        }
        _ => working_dir.display().to_string(),
    }
}
