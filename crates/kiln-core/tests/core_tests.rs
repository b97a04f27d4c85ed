#[cfg(test)]
mod tests {
    use kiln_core::*;
    use tokio_util::sync::CancellationToken;
    use uuid::Uuid;

    // ── Error tests ────────────────────────────────────────────

    #[test]
    fn test_permission_denied_display() {
        let err = KilnError::PermissionDenied;
        assert_eq!(err.to_string(), "permission denied");
        assert!(err.is_fatal());
        assert_eq!(err.category(), "permission_denied");
    }

    #[test]
    fn test_tool_not_found_is_recoverable() {
        let err = KilnError::ToolNotFound("frobnicate".into());
        assert!(!err.is_fatal());
        assert!(err.to_string().contains("frobnicate"));
    }

    #[test]
    fn test_io_error_converts() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: KilnError = io.into();
        assert_eq!(err.category(), "external_failure");
    }

    // ── Tool wire format ───────────────────────────────────────

    #[test]
    fn test_tool_call_accepts_string_input() {
        let call: ToolCall =
            serde_json::from_str(r#"{"id":"1","name":"view","input":"{\"file_path\":\"/a\"}"}"#)
                .unwrap();
        let v: serde_json::Value = call.decode().unwrap();
        assert_eq!(v["file_path"], "/a");
    }

    #[test]
    fn test_tool_call_accepts_object_input() {
        let call: ToolCall =
            serde_json::from_str(r#"{"id":"1","name":"ls","input":{"path":"/tmp"}}"#).unwrap();
        let v: serde_json::Value = call.decode().unwrap();
        assert_eq!(v["path"], "/tmp");
    }

    #[test]
    fn test_tool_call_blank_input_is_empty_object() {
        let call = ToolCall::new("1", "todo_read", "  ");
        let v: serde_json::Value = call.decode().unwrap();
        assert!(v.as_object().unwrap().is_empty());
    }

    #[test]
    fn test_tool_response_envelope_shape() {
        let resp = ToolResponse::error("invalid parameters");
        let json = serde_json::to_value(&resp).unwrap();
        assert_eq!(json["type"], "text");
        assert_eq!(json["is_error"], true);
        assert!(json.get("metadata").is_none());

        let resp = ToolResponse::text("ok").with_metadata(serde_json::json!({"n": 1}));
        let json = serde_json::to_value(&resp).unwrap();
        assert_eq!(json["metadata"]["n"], 1);
    }

    #[test]
    fn test_tool_info_schema() {
        let info = ToolInfo {
            name: "view".into(),
            description: "read".into(),
            parameters: serde_json::json!({"file_path": {"type": "string"}}),
            required: vec!["file_path".into()],
        };
        let schema = info.input_schema();
        assert_eq!(schema["type"], "object");
        assert_eq!(schema["required"][0], "file_path");
    }

    // ── Event broker ───────────────────────────────────────────

    #[tokio::test]
    async fn test_broker_preserves_publish_order() {
        let broker: Broker<u32> = Broker::new();
        let mut sub = broker.subscribe(CancellationToken::new());
        for i in 0..10 {
            broker.publish(EventKind::Created, i);
        }
        for i in 0..10 {
            let ev = sub.recv().await.unwrap();
            assert_eq!(ev.payload, i);
            assert_eq!(ev.kind, EventKind::Created);
        }
        assert_eq!(sub.dropped(), 0);
    }

    #[tokio::test]
    async fn test_broker_slow_subscriber_drops_oldest() {
        let broker: Broker<u32> = Broker::new();
        let mut slow = broker.subscribe(CancellationToken::new());
        for i in 0..100 {
            broker.publish(EventKind::Updated, i);
        }
        // Only the newest 64 survive.
        let first = slow.recv().await.unwrap();
        assert_eq!(first.payload, 36);
        assert_eq!(slow.dropped(), 36);
        let mut last = first.payload;
        for _ in 0..63 {
            let ev = slow.recv().await.unwrap();
            assert_eq!(ev.payload, last + 1);
            last = ev.payload;
        }
        assert_eq!(last, 99);
    }

    #[tokio::test]
    async fn test_broker_publish_without_subscribers() {
        let broker: Broker<String> = Broker::new();
        broker.publish(EventKind::Deleted, "nobody listens".into());
        assert_eq!(broker.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_subscription_released_on_cancel() {
        let broker: Broker<u32> = Broker::new();
        let token = CancellationToken::new();
        let mut sub = broker.subscribe(token.clone());
        assert_eq!(broker.subscriber_count(), 1);
        token.cancel();
        assert!(sub.recv().await.is_none());
        assert!(!sub.is_active());
        assert_eq!(broker.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_two_subscribers_see_same_sequence() {
        let broker: Broker<u32> = Broker::new();
        let mut a = broker.subscribe(CancellationToken::new());
        let mut b = broker.subscribe(CancellationToken::new());
        for i in 0..5 {
            broker.publish(EventKind::Created, i);
        }
        for i in 0..5 {
            assert_eq!(a.recv().await.unwrap().payload, i);
            assert_eq!(b.recv().await.unwrap().payload, i);
        }
    }

    // ── History ────────────────────────────────────────────────

    #[test]
    fn test_history_initial_then_v1() {
        let history = HistoryService::new();
        let s = Uuid::new_v4();
        let a = history.create_version(s, "/p", "c1").unwrap();
        let b = history.create_version(s, "/p", "c2").unwrap();
        assert_eq!(a.version, "initial");
        assert_eq!(b.version, "v1");
        assert!(b.created_at > a.created_at);

        let latest = history.list_latest_session_files(s);
        assert_eq!(latest.len(), 1);
        assert_eq!(latest[0].content, "c2");
    }

    #[test]
    fn test_history_versions_count_up() {
        let history = HistoryService::new();
        let s = Uuid::new_v4();
        history.create(s, "/p", "0").unwrap();
        for n in 1..=4 {
            let f = history.create_version(s, "/p", &n.to_string()).unwrap();
            assert_eq!(f.version, format!("v{n}"));
        }
        let rows = history.list_by_session(s);
        assert_eq!(rows.len(), 5);
        assert!(rows.windows(2).all(|w| w[0].created_at < w[1].created_at));
    }

    #[test]
    fn test_history_unparseable_version_falls_back_to_created_at() {
        let history = HistoryService::new();
        let s = Uuid::new_v4();
        let first = history.create(s, "/p", "a").unwrap();
        let mut odd = first.clone();
        odd.version = "custom".into();
        let odd = history.update(odd).unwrap();
        let next = history.create_version(s, "/p", "b").unwrap();
        assert_eq!(next.version, format!("v{}", odd.created_at));
    }

    #[test]
    fn test_next_version_rules() {
        let mut f = HistoryFile {
            id: Uuid::new_v4(),
            session_id: Uuid::new_v4(),
            path: "/x".into(),
            content: String::new(),
            version: "initial".into(),
            created_at: 42,
            updated_at: 42,
        };
        assert_eq!(history::next_version(&f), "v1");
        f.version = "v9".into();
        assert_eq!(history::next_version(&f), "v10");
        f.version = "vX".into();
        assert_eq!(history::next_version(&f), "v42");
        assert_eq!(history::version_number("initial"), Some(0));
        assert_eq!(history::version_number("v3"), Some(3));
        assert_eq!(history::version_number("nope"), None);
    }

    #[test]
    fn test_history_get_by_path_and_session_returns_latest() {
        let history = HistoryService::new();
        let s = Uuid::new_v4();
        history.create(s, "/p", "a").unwrap();
        history.create_version(s, "/p", "b").unwrap();
        let latest = history.get_by_path_and_session("/p", s).unwrap();
        assert_eq!(latest.content, "b");
        assert!(history.get_by_path_and_session("/p", Uuid::new_v4()).is_err());
    }

    #[test]
    fn test_history_delete_session_files() {
        let history = HistoryService::new();
        let s1 = Uuid::new_v4();
        let s2 = Uuid::new_v4();
        history.create(s1, "/a", "a").unwrap();
        history.create(s2, "/b", "b").unwrap();
        history.delete_session_files(s1).unwrap();
        assert!(history.list_by_session(s1).is_empty());
        assert_eq!(history.list_by_session(s2).len(), 1);
    }

    #[test]
    fn test_history_delete_and_get() {
        let history = HistoryService::new();
        let f = history.create(Uuid::new_v4(), "/a", "a").unwrap();
        assert_eq!(history.get(f.id).unwrap().content, "a");
        history.delete(f.id).unwrap();
        assert!(matches!(history.get(f.id), Err(KilnError::HistoryNotFound(_))));
    }

    #[tokio::test]
    async fn test_history_mutations_publish_events() {
        let history = HistoryService::new();
        let mut sub = history.subscribe(CancellationToken::new());
        let f = history.create(Uuid::new_v4(), "/a", "a").unwrap();
        history.delete(f.id).unwrap();
        assert_eq!(sub.recv().await.unwrap().kind, EventKind::Created);
        assert_eq!(sub.recv().await.unwrap().kind, EventKind::Deleted);
    }

    // ── Sessions / todos ───────────────────────────────────────

    #[test]
    fn test_todo_render() {
        let item = TodoItem {
            id: "1".into(),
            content: "write parser".into(),
            status: TodoStatus::InProgress,
            priority: TodoPriority::High,
        };
        assert_eq!(item.render(), "- [~] write parser (!)");

        let done = TodoItem {
            status: TodoStatus::Completed,
            priority: TodoPriority::Low,
            ..item
        };
        assert_eq!(done.render(), "- [x] write parser");
    }

    #[test]
    fn test_todo_status_wire_names() {
        let s: TodoStatus = serde_json::from_str("\"in-progress\"").unwrap();
        assert_eq!(s, TodoStatus::InProgress);
    }

    #[test]
    fn test_session_store_todos() {
        let store = SessionStore::new();
        let id = Uuid::new_v4();
        assert!(store.todos(id).is_empty());
        store.set_todos(
            id,
            vec![TodoItem {
                id: "a".into(),
                content: "x".into(),
                status: TodoStatus::Todo,
                priority: TodoPriority::Medium,
            }],
        );
        assert_eq!(store.todos(id).len(), 1);
        assert!(store.remove(id).is_some());
    }

    // ── Message tests ──────────────────────────────────────────

    #[test]
    fn test_message_text_constructor() {
        let sid = Uuid::new_v4();
        let msg = Message::text(sid, Role::User, "hello");
        assert_eq!(msg.role, Role::User);
        assert_eq!(msg.text_content(), "hello");
        assert!(msg.tool_calls.is_empty());
    }
}
