#[cfg(test)]
mod tests {
    use kiln_core::KilnError;
    use kiln_lsp::protocol::path_to_uri;
    use kiln_lsp::transport;
    use kiln_lsp::*;
    use pretty_assertions::assert_eq;
    use serde_json::{Value, json};
    use std::path::Path;
    use std::sync::Arc;
    use std::time::{Duration, Instant};
    use tokio::io::BufReader;
    use tokio::sync::mpsc;
    use tokio_util::sync::CancellationToken;

    // ── Fake server ────────────────────────────────────────────

    /// Spawn an in-process server. Requests are answered with
    /// `{"echo": method}` except `slow` (never answered) and `fail`
    /// (error). `react` may emit extra messages for anything received.
    fn fake_server<F>(react: F) -> (Arc<LspClient>, mpsc::UnboundedReceiver<Value>)
    where
        F: Fn(&Value) -> Vec<Value> + Send + 'static,
    {
        let (client_side, server_side) = tokio::io::duplex(1 << 16);
        let (client_read, client_write) = tokio::io::split(client_side);
        let (server_read, mut server_write) = tokio::io::split(server_side);
        let (seen_tx, seen_rx) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            let mut reader = BufReader::new(server_read);
            while let Ok(Some(msg)) = transport::read_message(&mut reader).await {
                let method = msg
                    .get("method")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                let mut out = Vec::new();
                if let Some(id) = msg.get("id").cloned().filter(|_| !method.is_empty()) {
                    match method.as_str() {
                        "slow" => {}
                        "fail" => out.push(json!({
                            "jsonrpc": "2.0", "id": id,
                            "error": { "code": -32601, "message": "nope" }
                        })),
                        _ => out.push(json!({
                            "jsonrpc": "2.0", "id": id, "result": { "echo": method }
                        })),
                    }
                }
                out.extend(react(&msg));
                for m in &out {
                    if transport::write_message(&mut server_write, m).await.is_err() {
                        return;
                    }
                }
                let _ = seen_tx.send(msg);
            }
        });

        (LspClient::connect("fake", client_read, client_write), seen_rx)
    }

    async fn next_with(rx: &mut mpsc::UnboundedReceiver<Value>, method: &str) -> Value {
        tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                let msg = rx.recv().await.expect("server gone");
                if msg.get("method").and_then(Value::as_str) == Some(method) {
                    return msg;
                }
            }
        })
        .await
        .expect("message not seen")
    }

    fn publish(uri: &str, diagnostics: Value) -> Value {
        json!({
            "jsonrpc": "2.0",
            "method": "textDocument/publishDiagnostics",
            "params": { "uri": uri, "diagnostics": diagnostics }
        })
    }

    fn diag(line: u32, severity: u8, message: &str) -> Value {
        json!({
            "range": {
                "start": { "line": line, "character": 2 },
                "end": { "line": line, "character": 5 }
            },
            "severity": severity,
            "source": "fake",
            "message": message
        })
    }

    fn opened_uri(msg: &Value) -> Option<String> {
        match msg.get("method").and_then(Value::as_str) {
            Some("textDocument/didOpen") | Some("textDocument/didChange") => msg["params"]
                ["textDocument"]["uri"]
                .as_str()
                .map(str::to_string),
            _ => None,
        }
    }

    fn write_file(dir: &Path, name: &str, body: &str) -> std::path::PathBuf {
        let p = dir.join(name);
        std::fs::write(&p, body).unwrap();
        p
    }

    // ── Client tests ───────────────────────────────────────────

    #[tokio::test]
    async fn test_call_round_trip() {
        let (client, _seen) = fake_server(|_| vec![]);
        let result = client.call("workspace/symbol", json!({})).await.unwrap();
        assert_eq!(result, json!({ "echo": "workspace/symbol" }));
    }

    #[tokio::test]
    async fn test_error_response_becomes_lsp_error() {
        let (client, _seen) = fake_server(|_| vec![]);
        let err = client.call("fail", Value::Null).await.unwrap_err();
        match err {
            KilnError::Lsp { server, reason } => {
                assert_eq!(server, "fake");
                assert!(reason.contains("nope"), "{reason}");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_unanswered_request_times_out() {
        let (client, _seen) = fake_server(|_| vec![]);
        let err = client
            .call_with_timeout("slow", Value::Null, Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(matches!(err, KilnError::LspTimeout { ref method } if method == "slow"));
    }

    #[tokio::test]
    async fn test_initialize_sends_initialized() {
        let (client, mut seen) = fake_server(|_| vec![]);
        let dir = tempfile::tempdir().unwrap();
        client.initialize(dir.path(), None).await.unwrap();
        let init = next_with(&mut seen, "initialize").await;
        assert_eq!(init["params"]["rootUri"], path_to_uri(dir.path()));
        next_with(&mut seen, "initialized").await;
    }

    #[tokio::test]
    async fn test_open_then_change_bumps_version() {
        let (client, mut seen) = fake_server(|_| vec![]);
        let dir = tempfile::tempdir().unwrap();
        let file = write_file(dir.path(), "main.rs", "fn main() {}\n");

        assert!(client.open_file(&file).await.unwrap());
        assert!(!client.open_file(&file).await.unwrap());
        assert!(client.is_open(&file));

        let open = next_with(&mut seen, "textDocument/didOpen").await;
        assert_eq!(open["params"]["textDocument"]["version"], 1);
        assert_eq!(open["params"]["textDocument"]["languageId"], "rust");

        std::fs::write(&file, "fn main() { todo!() }\n").unwrap();
        client.notify_change(&file).await.unwrap();
        let change = next_with(&mut seen, "textDocument/didChange").await;
        assert_eq!(change["params"]["textDocument"]["version"], 2);
        assert_eq!(
            change["params"]["contentChanges"][0]["text"],
            "fn main() { todo!() }\n"
        );
    }

    #[tokio::test]
    async fn test_change_on_unopened_file_fails() {
        let (client, _seen) = fake_server(|_| vec![]);
        let dir = tempfile::tempdir().unwrap();
        let file = write_file(dir.path(), "a.go", "package a\n");
        assert!(client.notify_change(&file).await.is_err());
    }

    #[tokio::test]
    async fn test_server_configuration_request_gets_one_null_per_item() {
        let (client, mut seen) = fake_server(|msg| {
            if msg.get("method").and_then(Value::as_str) == Some("initialized") {
                vec![json!({
                    "jsonrpc": "2.0", "id": 99, "method": "workspace/configuration",
                    "params": { "items": [{ "section": "a" }, { "section": "b" }] }
                })]
            } else {
                vec![]
            }
        });
        client.notify("initialized", json!({})).await.unwrap();

        let reply = tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                let msg = seen.recv().await.unwrap();
                if msg.get("id") == Some(&json!(99)) {
                    return msg;
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(reply["result"], json!([null, null]));
    }

    #[tokio::test]
    async fn test_published_diagnostics_are_stored() {
        let dir = tempfile::tempdir().unwrap();
        let file = write_file(dir.path(), "lib.rs", "x\n");
        let (client, _seen) = fake_server(|msg| match opened_uri(msg) {
            Some(uri) => vec![publish(&uri, json!([diag(0, 1, "bad")]))],
            None => vec![],
        });

        let (tx, mut rx) = mpsc::channel(4);
        let _guard = client.register_waiter(tx);
        client.open_file(&file).await.unwrap();
        let uri = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();

        assert_eq!(uri, path_to_uri(&file));
        assert_eq!(client.diagnostic_count(), 1);
        assert_eq!(client.diagnostics_for(&file)[0].message, "bad");
    }

    // ── Collector tests ────────────────────────────────────────

    #[tokio::test]
    async fn test_wait_returns_on_uri_match() {
        let dir = tempfile::tempdir().unwrap();
        let file = write_file(dir.path(), "lib.rs", "x\n");
        let (client, _seen) = fake_server(|msg| match opened_uri(msg) {
            Some(uri) => vec![publish(&uri, json!([]))],
            None => vec![],
        });
        let collector = DiagnosticsCollector::with_wait_timeout(Duration::from_secs(5));
        collector.add_client("rust", client);

        let started = Instant::now();
        let fresh = collector
            .wait_for_diagnostics(&CancellationToken::new(), &file)
            .await;
        assert!(fresh);
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_wait_wakes_on_increase_elsewhere() {
        let dir = tempfile::tempdir().unwrap();
        let file = write_file(dir.path(), "a.rs", "x\n");
        let other = path_to_uri(&dir.path().join("b.rs"));
        let (client, _seen) = fake_server(move |msg| match opened_uri(msg) {
            Some(_) => vec![publish(&other, json!([diag(3, 2, "unused")]))],
            None => vec![],
        });
        let collector = DiagnosticsCollector::with_wait_timeout(Duration::from_secs(5));
        collector.add_client("rust", client);

        assert!(
            collector
                .wait_for_diagnostics(&CancellationToken::new(), &file)
                .await
        );
    }

    #[tokio::test]
    async fn test_wait_times_out_when_server_is_silent() {
        let dir = tempfile::tempdir().unwrap();
        let file = write_file(dir.path(), "a.rs", "x\n");
        let (client, _seen) = fake_server(|_| vec![]);
        let collector = DiagnosticsCollector::with_wait_timeout(Duration::from_millis(100));
        collector.add_client("rust", client);

        let started = Instant::now();
        let fresh = collector
            .wait_for_diagnostics(&CancellationToken::new(), &file)
            .await;
        assert!(!fresh);
        assert!(started.elapsed() >= Duration::from_millis(100));
    }

    #[tokio::test]
    async fn test_wait_returns_early_on_cancel() {
        let dir = tempfile::tempdir().unwrap();
        let file = write_file(dir.path(), "a.rs", "x\n");
        let (client, _seen) = fake_server(|_| vec![]);
        let collector = DiagnosticsCollector::with_wait_timeout(Duration::from_secs(30));
        collector.add_client("rust", client);

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let started = Instant::now();
        assert!(!collector.wait_for_diagnostics(&cancel, &file).await);
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_second_wait_sends_did_change() {
        let dir = tempfile::tempdir().unwrap();
        let file = write_file(dir.path(), "a.rs", "x\n");
        let (client, mut seen) = fake_server(|msg| match opened_uri(msg) {
            Some(uri) => vec![publish(&uri, json!([]))],
            None => vec![],
        });
        let collector = DiagnosticsCollector::new();
        collector.add_client("rust", client);

        let cancel = CancellationToken::new();
        collector.wait_for_diagnostics(&cancel, &file).await;
        collector.wait_for_diagnostics(&cancel, &file).await;
        next_with(&mut seen, "textDocument/didOpen").await;
        let change = next_with(&mut seen, "textDocument/didChange").await;
        assert_eq!(change["params"]["textDocument"]["version"], 2);
    }

    #[tokio::test]
    async fn test_no_clients() {
        let collector = DiagnosticsCollector::new();
        assert!(!collector.has_clients());
        assert!(
            !collector
                .wait_for_diagnostics(&CancellationToken::new(), Path::new("/nope.rs"))
                .await
        );
        assert_eq!(collector.render(None), "");
    }

    #[tokio::test]
    async fn test_render_splits_file_and_project() {
        let dir = tempfile::tempdir().unwrap();
        let current = write_file(dir.path(), "a.rs", "x\n");
        let other = write_file(dir.path(), "b.rs", "y\n");
        let gone = path_to_uri(&dir.path().join("deleted.rs"));
        let other_uri = path_to_uri(&other);

        let (client, _seen) = fake_server(move |msg| match opened_uri(msg) {
            Some(uri) => vec![
                publish(&gone, json!([diag(0, 1, "ghost")])),
                publish(&other_uri, json!([diag(1, 2, "unused import")])),
                publish(&uri, json!([diag(4, 2, "shadowed"), diag(9, 1, "type mismatch")])),
            ],
            None => vec![],
        });
        let collector = DiagnosticsCollector::new();
        collector.add_client("rust", client);
        assert!(
            collector
                .wait_for_diagnostics(&CancellationToken::new(), &current)
                .await
        );
        // Let the remaining notifications land.
        tokio::time::sleep(Duration::from_millis(50)).await;

        let a = current.display().to_string();
        let b = other.display().to_string();
        let expected = format!(
            "\n<file_diagnostics>\n\
             Error: {a}:10:3 [fake] type mismatch\n\
             Warn: {a}:5:3 [fake] shadowed\n\
             </file_diagnostics>\n\
             \n<project_diagnostics>\n\
             Warn: {b}:2:3 [fake] unused import\n\
             </project_diagnostics>\n\
             \n<diagnostic_summary>\n\
             Current file: 1 errors, 1 warnings\n\
             Project: 0 errors, 1 warnings\n\
             </diagnostic_summary>\n"
        );
        assert_eq!(collector.render(Some(&current)), expected);
    }

    #[test]
    fn test_render_truncates_after_ten() {
        let dir = tempfile::tempdir().unwrap();
        let file = write_file(dir.path(), "a.rs", "x\n");
        let diags: Vec<Diagnostic> = (0..13)
            .map(|i| serde_json::from_value(diag(i, 2, &format!("w{i:02}"))).unwrap())
            .collect();
        let mut by_uri = std::collections::HashMap::new();
        by_uri.insert(path_to_uri(&file), diags);

        let out = render_diagnostics(None, &[("rust".to_string(), by_uri)]);
        assert!(out.contains("<project_diagnostics>"));
        assert!(out.contains("\n... and 3 more diagnostics\n</project_diagnostics>"));
        assert!(out.contains("Project: 0 errors, 13 warnings"));
        assert_eq!(out.matches("Warn: ").count(), 10);
    }
}
