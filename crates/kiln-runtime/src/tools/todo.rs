//! Per-session checklist the model keeps while it works.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use kiln_core::{Result, TodoItem, Tool, ToolCall, ToolContext, ToolInfo, ToolResponse};

use super::tool_info;
use crate::services::ToolServices;

pub const WRITE_NAME: &str = "todo_write";
pub const READ_NAME: &str = "todo_read";

const EMPTY_LIST: &str = "No todo items found for this session. Use todo_write to add new tasks.";

#[derive(Debug, Deserialize)]
struct TodoWriteParams {
    todos: Vec<TodoItem>,
}

fn render_list(items: &[TodoItem]) -> String {
    items
        .iter()
        .map(TodoItem::render)
        .collect::<Vec<_>>()
        .join("\n")
}

pub struct TodoWriteTool {
    services: Arc<ToolServices>,
}

impl TodoWriteTool {
    pub fn new(services: Arc<ToolServices>) -> Self {
        Self { services }
    }
}

#[async_trait]
impl Tool for TodoWriteTool {
    fn info(&self) -> ToolInfo {
        tool_info(
            WRITE_NAME,
            "Creates or replaces the todo list for the current session. Send the whole list \
            every time; items not included are dropped.",
            json!({
                "todos": {
                    "type": "array",
                    "description": "List of todo items",
                    "items": {
                        "type": "object",
                        "properties": {
                            "id": {
                                "type": "string",
                                "description": "Unique identifier for the item"
                            },
                            "content": {
                                "type": "string",
                                "description": "What needs to be done"
                            },
                            "status": {
                                "type": "string",
                                "description": "'todo', 'in-progress' or 'completed'",
                                "enum": ["todo", "in-progress", "completed"]
                            },
                            "priority": {
                                "type": "string",
                                "description": "The priority of the item",
                                "enum": ["low", "medium", "high"]
                            }
                        },
                        "required": ["id", "content", "status", "priority"]
                    }
                }
            }),
            &["todos"],
        )
    }

    async fn run(&self, ctx: &ToolContext, call: &ToolCall) -> Result<ToolResponse> {
        let params: TodoWriteParams = match call.decode() {
            Ok(p) => p,
            Err(e) => {
                return Ok(ToolResponse::error(format!(
                    "Failed to parse todo items: {e}. Please ensure you're providing valid JSON \
                     with the required fields (id, content, status, priority)."
                )));
            }
        };
        let rendered = render_list(&params.todos);
        debug!(session_id = %ctx.session_id, items = params.todos.len(), "todo list updated");
        self.services.sessions.set_todos(ctx.session_id, params.todos);
        Ok(ToolResponse::text(format!(
            "Todo list updated successfully!\n\n{rendered}"
        )))
    }
}

pub struct TodoReadTool {
    services: Arc<ToolServices>,
}

impl TodoReadTool {
    pub fn new(services: Arc<ToolServices>) -> Self {
        Self { services }
    }
}

#[async_trait]
impl Tool for TodoReadTool {
    fn info(&self) -> ToolInfo {
        tool_info(
            READ_NAME,
            "Reads the todo list for the current session.",
            json!({}),
            &[],
        )
    }

    async fn run(&self, ctx: &ToolContext, _call: &ToolCall) -> Result<ToolResponse> {
        let todos = self.services.sessions.todos(ctx.session_id);
        if todos.is_empty() {
            return Ok(ToolResponse::text(EMPTY_LIST));
        }
        Ok(ToolResponse::text(format!(
            "Current Todo List\n\n{}",
            render_list(&todos)
        )))
    }
}
