use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use kiln_config::KilnConfig;
use kiln_core::{KilnError, Result, ToolCall, ToolContext, ToolResponse};
use kiln_runtime::{ToolRegistry, ToolServices, builtin_tools};

use super::permissions;

/// One line of `kiln run` output.
#[derive(Debug, Serialize)]
struct Envelope {
    id: String,
    ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    response: Option<ToolResponse>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<EnvelopeError>,
}

#[derive(Debug, Serialize)]
struct EnvelopeError {
    category: String,
    message: String,
}

impl Envelope {
    fn from_outcome(id: String, outcome: Result<ToolResponse>) -> Self {
        match outcome {
            Ok(response) => Self {
                id,
                ok: true,
                response: Some(response),
                error: None,
            },
            Err(e) => Self {
                id,
                ok: false,
                response: None,
                error: Some(EnvelopeError {
                    category: e.category().to_string(),
                    message: e.to_string(),
                }),
            },
        }
    }

    fn invalid_request(message: String) -> Self {
        Self {
            id: String::new(),
            ok: false,
            response: None,
            error: Some(EnvelopeError {
                category: "invalid_request".into(),
                message,
            }),
        }
    }

    fn to_line(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|e| {
            format!(r#"{{"id":"","ok":false,"error":{{"category":"external_failure","message":"{e}"}}}}"#)
        })
    }
}

enum Input {
    Line(std::io::Result<Option<String>>),
    Interrupt,
}

fn parse_session(raw: Option<String>) -> Result<Uuid> {
    match raw {
        Some(raw) => Uuid::parse_str(&raw)
            .map_err(|e| KilnError::Config(format!("invalid session id '{raw}': {e}"))),
        None => Ok(Uuid::new_v4()),
    }
}

pub(super) async fn cmd_run(
    config: KilnConfig,
    working_dir: PathBuf,
    session: Option<String>,
    yes: bool,
) -> Result<()> {
    let session_id = parse_session(session)?;
    let services = Arc::new(ToolServices::from_config(&config, &working_dir)?);
    services.start_language_servers(&config).await;
    let registry = Arc::new(ToolRegistry::with_tools(builtin_tools(&services)));

    let root = CancellationToken::new();
    if yes {
        services.permissions.auto_approve_session(session_id);
    } else {
        permissions::spawn_prompter(services.permissions.clone(), root.child_token());
    }
    info!(
        session_id = %session_id,
        working_dir = %working_dir.display(),
        tools = registry.len(),
        auto_approve = yes,
        "ready for tool calls"
    );

    let (tx, mut rx) = mpsc::channel::<String>(64);
    let writer = tokio::spawn(async move {
        let mut stdout = tokio::io::stdout();
        while let Some(line) = rx.recv().await {
            let written = async {
                stdout.write_all(line.as_bytes()).await?;
                stdout.write_all(b"\n").await?;
                stdout.flush().await
            };
            if let Err(e) = written.await {
                warn!(error = %e, "stdout closed, dropping results");
                break;
            }
        }
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut calls = JoinSet::new();
    let mut interrupted = false;
    loop {
        let input = tokio::select! {
            line = lines.next_line() => Input::Line(line),
            _ = tokio::signal::ctrl_c() => Input::Interrupt,
        };
        let line = match input {
            Input::Interrupt => {
                warn!("interrupted, cancelling running tools");
                interrupted = true;
                root.cancel();
                break;
            }
            Input::Line(line) => match line? {
                Some(line) => line,
                None => break,
            },
        };
        if line.trim().is_empty() {
            continue;
        }

        let call: ToolCall = match serde_json::from_str(&line) {
            Ok(call) => call,
            Err(e) => {
                debug!(error = %e, "unparseable tool call");
                let _ = tx
                    .send(Envelope::invalid_request(format!("invalid tool call: {e}")).to_line())
                    .await;
                continue;
            }
        };

        let registry = registry.clone();
        let tx = tx.clone();
        let ctx = ToolContext::with_cancel(session_id, root.child_token());
        calls.spawn(async move {
            let outcome = registry.invoke(&ctx, &call).await;
            let _ = tx.send(Envelope::from_outcome(call.id, outcome).to_line()).await;
        });
    }

    while let Some(joined) = calls.join_next().await {
        if let Err(e) = joined {
            warn!(error = %e, "tool task failed to complete");
        }
    }
    drop(tx);
    let _ = writer.await;
    root.cancel();
    services.shutdown().await;

    if interrupted {
        Err(KilnError::Cancelled)
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_envelope() {
        let line = Envelope::from_outcome("c1".into(), Ok(ToolResponse::text("hi"))).to_line();
        let v: serde_json::Value = serde_json::from_str(&line).unwrap();
        assert_eq!(v["id"], "c1");
        assert_eq!(v["ok"], true);
        assert_eq!(v["response"]["content"], "hi");
        assert_eq!(v["response"]["type"], "text");
        assert!(v.get("error").is_none());
    }

    #[test]
    fn error_envelope_carries_category() {
        let line = Envelope::from_outcome("c2".into(), Err(KilnError::PermissionDenied)).to_line();
        let v: serde_json::Value = serde_json::from_str(&line).unwrap();
        assert_eq!(v["ok"], false);
        assert_eq!(v["error"]["category"], "permission_denied");
        assert_eq!(v["error"]["message"], "permission denied");
    }

    #[test]
    fn session_ids() {
        assert!(parse_session(None).is_ok());
        let id = Uuid::new_v4();
        assert_eq!(parse_session(Some(id.to_string())).unwrap(), id);
        assert!(matches!(
            parse_session(Some("nope".into())),
            Err(KilnError::Config(_))
        ));
    }
}
