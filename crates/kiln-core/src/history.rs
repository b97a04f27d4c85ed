//! Versioned snapshots of file contents, per session.
//!
//! Rows form a flat table keyed by `(session_id, path, created_at)`. The
//! first row ever recorded for a path is `"initial"`; every later row gets
//! `"v<N>"` with `N` one past the latest row for that path.

use chrono::Utc;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{KilnError, Result};
use crate::event::{Broker, EventKind, Subscription};
use crate::session::SessionId;

pub const INITIAL_VERSION: &str = "initial";

const MAX_CONFLICT_RETRIES: usize = 3;

/// One stored snapshot of a file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryFile {
    pub id: Uuid,
    pub session_id: SessionId,
    pub path: String,
    pub content: String,
    pub version: String,
    /// Unix milliseconds. Strictly increasing per path.
    pub created_at: i64,
    pub updated_at: i64,
}

/// Version of the row following `latest`.
pub fn next_version(latest: &HistoryFile) -> String {
    if latest.version == INITIAL_VERSION {
        return "v1".to_string();
    }
    match latest
        .version
        .strip_prefix('v')
        .and_then(|n| n.parse::<u64>().ok())
    {
        Some(n) => format!("v{}", n + 1),
        None => format!("v{}", latest.created_at),
    }
}

/// Numeric rank of a version string, `initial` being 0. Unparseable
/// versions rank as `None`.
pub fn version_number(version: &str) -> Option<u64> {
    if version == INITIAL_VERSION {
        return Some(0);
    }
    version.strip_prefix('v').and_then(|n| n.parse().ok())
}

/// In-memory file history store with change notifications.
pub struct HistoryService {
    rows: Mutex<Vec<HistoryFile>>,
    events: Broker<HistoryFile>,
}

impl Default for HistoryService {
    fn default() -> Self {
        Self::new()
    }
}

impl HistoryService {
    pub fn new() -> Self {
        Self {
            rows: Mutex::new(Vec::new()),
            events: Broker::new(),
        }
    }

    pub fn subscribe(&self, cancel: CancellationToken) -> Subscription<HistoryFile> {
        self.events.subscribe(cancel)
    }

    /// Record the first snapshot of `path` in `session`.
    pub fn create(&self, session: SessionId, path: &str, content: &str) -> Result<HistoryFile> {
        self.create_with_version(session, path, content, INITIAL_VERSION.to_string())
    }

    /// Append a new version after the latest row for `path` in any session.
    pub fn create_version(
        &self,
        session: SessionId,
        path: &str,
        content: &str,
    ) -> Result<HistoryFile> {
        let latest = {
            let rows = self.rows.lock();
            rows.iter()
                .filter(|r| r.path == path)
                .max_by_key(|r| r.created_at)
                .cloned()
        };
        match latest {
            None => self.create(session, path, content),
            Some(latest) => self.create_with_version(session, path, content, next_version(&latest)),
        }
    }

    fn create_with_version(
        &self,
        session: SessionId,
        path: &str,
        content: &str,
        mut version: String,
    ) -> Result<HistoryFile> {
        for attempt in 0..MAX_CONFLICT_RETRIES {
            let mut rows = self.rows.lock();
            let conflict = rows
                .iter()
                .any(|r| r.path == path && r.session_id == session && r.version == version);
            if conflict {
                drop(rows);
                if attempt + 1 == MAX_CONFLICT_RETRIES {
                    return Err(KilnError::HistoryConflict {
                        path: path.to_string(),
                        version,
                    });
                }
                warn!(path, %version, attempt, "history version conflict, retrying");
                version = match version
                    .strip_prefix('v')
                    .and_then(|n| n.parse::<u64>().ok())
                {
                    Some(n) => format!("v{}", n + 1),
                    None => format!("v{}", Utc::now().timestamp()),
                };
                continue;
            }

            let latest_ts = rows
                .iter()
                .filter(|r| r.path == path)
                .map(|r| r.created_at)
                .max();
            let mut now = Utc::now().timestamp_millis();
            if let Some(ts) = latest_ts {
                now = now.max(ts + 1);
            }

            let file = HistoryFile {
                id: Uuid::new_v4(),
                session_id: session,
                path: path.to_string(),
                content: content.to_string(),
                version,
                created_at: now,
                updated_at: now,
            };
            rows.push(file.clone());
            drop(rows);

            debug!(path, version = %file.version, session_id = %session, "history version recorded");
            self.events.publish(EventKind::Created, file.clone());
            return Ok(file);
        }
        unreachable!("conflict loop always returns")
    }

    pub fn get(&self, id: Uuid) -> Result<HistoryFile> {
        self.rows
            .lock()
            .iter()
            .find(|r| r.id == id)
            .cloned()
            .ok_or_else(|| KilnError::HistoryNotFound(id.to_string()))
    }

    /// Latest row for `path` within `session`.
    pub fn get_by_path_and_session(&self, path: &str, session: SessionId) -> Result<HistoryFile> {
        self.rows
            .lock()
            .iter()
            .filter(|r| r.path == path && r.session_id == session)
            .max_by_key(|r| r.created_at)
            .cloned()
            .ok_or_else(|| KilnError::HistoryNotFound(format!("{path} in session {session}")))
    }

    /// Every row of the session, oldest first.
    pub fn list_by_session(&self, session: SessionId) -> Vec<HistoryFile> {
        let mut out: Vec<HistoryFile> = self
            .rows
            .lock()
            .iter()
            .filter(|r| r.session_id == session)
            .cloned()
            .collect();
        out.sort_by_key(|r| r.created_at);
        out
    }

    /// The newest row for each path touched in the session, oldest path first.
    pub fn list_latest_session_files(&self, session: SessionId) -> Vec<HistoryFile> {
        let mut latest: HashMap<String, HistoryFile> = HashMap::new();
        for row in self.rows.lock().iter().filter(|r| r.session_id == session) {
            match latest.get(&row.path) {
                Some(existing) if existing.created_at >= row.created_at => {}
                _ => {
                    latest.insert(row.path.clone(), row.clone());
                }
            }
        }
        let mut out: Vec<HistoryFile> = latest.into_values().collect();
        out.sort_by_key(|r| r.created_at);
        out
    }

    /// Replace the content and version of an existing row.
    pub fn update(&self, file: HistoryFile) -> Result<HistoryFile> {
        let updated = {
            let mut rows = self.rows.lock();
            let row = rows
                .iter_mut()
                .find(|r| r.id == file.id)
                .ok_or_else(|| KilnError::HistoryNotFound(file.id.to_string()))?;
            row.content = file.content;
            row.version = file.version;
            row.updated_at = Utc::now().timestamp_millis().max(row.created_at);
            row.clone()
        };
        self.events.publish(EventKind::Updated, updated.clone());
        Ok(updated)
    }

    pub fn delete(&self, id: Uuid) -> Result<()> {
        let removed = {
            let mut rows = self.rows.lock();
            let idx = rows
                .iter()
                .position(|r| r.id == id)
                .ok_or_else(|| KilnError::HistoryNotFound(id.to_string()))?;
            rows.remove(idx)
        };
        self.events.publish(EventKind::Deleted, removed);
        Ok(())
    }

    pub fn delete_session_files(&self, session: SessionId) -> Result<()> {
        let removed: Vec<HistoryFile> = {
            let mut rows = self.rows.lock();
            let (gone, kept): (Vec<_>, Vec<_>) =
                rows.drain(..).partition(|r| r.session_id == session);
            *rows = kept;
            gone
        };
        for row in removed {
            self.events.publish(EventKind::Deleted, row);
        }
        Ok(())
    }
}
