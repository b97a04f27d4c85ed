use tracing::{debug, info};

/// Outcome of checking a shell command against the policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandVerdict {
    /// Read-only command; run without asking.
    Allow,
    /// Refused before dispatch.
    Deny(String),
    /// Run only after the user consents.
    Escalate,
}

/// Commands the model may never run: raw network fetchers and browsers.
pub const BANNED_COMMANDS: &[&str] = &[
    "alias", "curl", "curlie", "wget", "axel", "aria2c", "nc", "telnet", "lynx", "w3m", "links",
    "httpie", "xh", "http-prompt", "chrome", "firefox", "safari",
];

/// Prefixes of commands that cannot change anything worth asking about.
pub const SAFE_READ_ONLY_COMMANDS: &[&str] = &[
    // Basic shell commands
    "ls", "echo", "pwd", "date", "cal", "uptime", "whoami", "id", "groups", "env", "printenv",
    "set", "unset", "which", "type", "whereis", "whatis", "uname", "hostname", "df", "du", "free",
    "top", "ps", "kill", "killall", "nice", "nohup", "time", "timeout",
    // Git read-only commands
    "git status", "git log", "git diff", "git show", "git branch", "git tag", "git remote",
    "git ls-files", "git ls-remote", "git rev-parse", "git config --get", "git config --list",
    "git describe", "git blame", "git grep", "git shortlog",
    // Go commands
    "go version", "go help", "go list", "go env", "go doc", "go vet", "go fmt", "go mod",
    "go test", "go build", "go run", "go install", "go clean",
];

/// Banned / safe-list policy applied by the bash tool.
#[derive(Debug, Clone)]
pub struct CommandPolicy {
    banned: Vec<String>,
    safe: Vec<String>,
}

impl Default for CommandPolicy {
    fn default() -> Self {
        Self {
            banned: BANNED_COMMANDS.iter().map(|s| s.to_string()).collect(),
            safe: SAFE_READ_ONLY_COMMANDS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl CommandPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_banned(mut self, extra: impl IntoIterator<Item = String>) -> Self {
        self.banned.extend(extra);
        self
    }

    pub fn with_safe(mut self, extra: impl IntoIterator<Item = String>) -> Self {
        self.safe.extend(extra);
        self
    }

    pub fn evaluate(&self, command: &str) -> CommandVerdict {
        if let Some(banned) = self.banned_head(command) {
            info!(command = banned, "banned command refused");
            return CommandVerdict::Deny(format!("command '{banned}' is not allowed"));
        }
        if self.is_safe_read_only(command) {
            debug!(command, "safe read-only command");
            return CommandVerdict::Allow;
        }
        CommandVerdict::Escalate
    }

    /// The first word of `command` when it is on the banned list.
    fn banned_head<'a>(&self, command: &'a str) -> Option<&'a str> {
        let head = command.split_whitespace().next()?;
        self.banned
            .iter()
            .any(|b| b.eq_ignore_ascii_case(head))
            .then_some(head)
    }

    /// Case-folded prefix match followed by end, space, or `-`.
    pub fn is_safe_read_only(&self, command: &str) -> bool {
        let lower = command.trim().to_lowercase();
        self.safe.iter().any(|safe| {
            lower.strip_prefix(safe.as_str()).is_some_and(|rest| {
                rest.is_empty() || rest.starts_with(' ') || rest.starts_with('-')
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn banned_match_is_on_first_word_only() {
        let p = CommandPolicy::new();
        assert!(matches!(p.evaluate("CURL http://x"), CommandVerdict::Deny(_)));
        assert_eq!(p.evaluate("echo curl"), CommandVerdict::Allow);
    }

    #[test]
    fn safe_prefix_needs_boundary() {
        let p = CommandPolicy::new();
        assert!(p.is_safe_read_only("ls"));
        assert!(p.is_safe_read_only("ls -la"));
        assert!(p.is_safe_read_only("ls-files"));
        assert!(!p.is_safe_read_only("lsblk"));
        assert!(p.is_safe_read_only("Git Status"));
    }
}
