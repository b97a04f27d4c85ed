use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Unique identifier for a session.
pub type SessionId = Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TodoStatus {
    Todo,
    InProgress,
    Completed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TodoPriority {
    Low,
    #[default]
    Medium,
    High,
}

/// One checklist entry owned by a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TodoItem {
    pub id: String,
    pub content: String,
    pub status: TodoStatus,
    #[serde(default)]
    pub priority: TodoPriority,
}

impl TodoItem {
    /// Render as a markdown checklist line, e.g. `- [~] refactor parser (!)`.
    pub fn render(&self) -> String {
        let mark = match self.status {
            TodoStatus::Todo => "[ ]",
            TodoStatus::InProgress => "[~]",
            TodoStatus::Completed => "[x]",
        };
        let flag = match self.priority {
            TodoPriority::High => " (!)",
            TodoPriority::Medium => " (~)",
            TodoPriority::Low => "",
        };
        format!("- {mark} {}{flag}", self.content)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    pub title: String,
    pub todos: Vec<TodoItem>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// In-memory session records. Only the parts the tools touch live here.
#[derive(Debug, Default)]
pub struct SessionStore {
    sessions: RwLock<HashMap<SessionId, Session>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetch a session, creating an empty record on first use.
    pub fn get_or_create(&self, id: SessionId) -> Session {
        if let Some(s) = self.sessions.read().get(&id) {
            return s.clone();
        }
        let now = Utc::now();
        self.sessions
            .write()
            .entry(id)
            .or_insert_with(|| Session {
                id,
                title: String::new(),
                todos: Vec::new(),
                created_at: now,
                updated_at: now,
            })
            .clone()
    }

    pub fn todos(&self, id: SessionId) -> Vec<TodoItem> {
        self.sessions
            .read()
            .get(&id)
            .map(|s| s.todos.clone())
            .unwrap_or_default()
    }

    pub fn set_todos(&self, id: SessionId, todos: Vec<TodoItem>) {
        self.get_or_create(id);
        if let Some(s) = self.sessions.write().get_mut(&id) {
            s.todos = todos;
            s.updated_at = Utc::now();
        }
    }

    pub fn remove(&self, id: SessionId) -> Option<Session> {
        self.sessions.write().remove(&id)
    }
}
