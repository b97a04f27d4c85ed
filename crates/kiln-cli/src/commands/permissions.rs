//! Interactive answers to permission requests.
//!
//! stdin carries tool calls, so questions are written to stderr and the
//! answer is read from the controlling terminal.

use std::fs::File;
use std::io::{BufRead, BufReader, Write};
use std::sync::Arc;

use console::style;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use kiln_autonomy::{PermissionBroker, PermissionDecision, PermissionRequest};
use kiln_core::EventKind;

const TTY: &str = "/dev/tty";

/// Map a typed answer to a decision. Anything unrecognised denies.
fn parse_answer(answer: &str) -> PermissionDecision {
    match answer.trim().to_ascii_lowercase().as_str() {
        "a" | "y" | "yes" | "allow" => PermissionDecision::AllowOnce,
        "s" | "session" | "always" => PermissionDecision::AllowPersistent,
        _ => PermissionDecision::Deny,
    }
}

fn ask(request: &PermissionRequest) -> PermissionDecision {
    let tty = match File::options().read(true).write(true).open(TTY) {
        Ok(tty) => tty,
        Err(e) => {
            warn!(error = %e, tool = %request.tool_name, "no terminal to ask on, denying");
            return PermissionDecision::Deny;
        }
    };

    let mut stderr = std::io::stderr();
    let _ = writeln!(
        stderr,
        "\n{} {} wants to {}",
        style("?").yellow().bold(),
        style(&request.tool_name).cyan(),
        request.action
    );
    let _ = writeln!(stderr, "  {}", request.description);
    let _ = writeln!(stderr, "  {} {}", style("in").dim(), request.path);
    let _ = write!(
        stderr,
        "  [{}]llow once, allow for [{}]ession, [{}]eny: ",
        style("a").green().bold(),
        style("s").green().bold(),
        style("d").red().bold()
    );
    let _ = stderr.flush();

    let mut answer = String::new();
    match BufReader::new(tty).read_line(&mut answer) {
        Ok(_) => parse_answer(&answer),
        Err(e) => {
            warn!(error = %e, "failed to read permission answer, denying");
            PermissionDecision::Deny
        }
    }
}

/// Answer requests one at a time until `cancel` fires.
pub(super) fn spawn_prompter(
    broker: Arc<PermissionBroker>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    let mut sub = broker.subscribe(cancel);
    tokio::spawn(async move {
        while let Some(event) = sub.recv().await {
            if event.kind != EventKind::Created {
                continue;
            }
            let request = event.payload;
            let id = request.id;
            let decision = tokio::task::spawn_blocking(move || ask(&request))
                .await
                .unwrap_or(PermissionDecision::Deny);
            broker.resolve(id, decision);
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn answers() {
        assert_eq!(parse_answer("a\n"), PermissionDecision::AllowOnce);
        assert_eq!(parse_answer("Y"), PermissionDecision::AllowOnce);
        assert_eq!(parse_answer(" s "), PermissionDecision::AllowPersistent);
        assert_eq!(parse_answer("d"), PermissionDecision::Deny);
        assert_eq!(parse_answer(""), PermissionDecision::Deny);
        assert_eq!(parse_answer("maybe"), PermissionDecision::Deny);
    }
}
