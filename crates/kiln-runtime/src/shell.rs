//! # Persistent shell
//!
//! One long-lived shell per working directory, so `cd`, exported variables
//! and shell functions carry over between bash tool calls.
//!
//! ## Framing
//!
//! Each command is `eval`'d with stdin from `/dev/null`. Afterwards the
//! shell prints a line `\n<sentinel> <status> <pwd>` on stdout and
//! `\n<sentinel> <status>` on stderr; the sentinel is fresh per command.
//! Both pipes are read concurrently until both sentinel lines arrive.
//!
//! ## Interruption
//!
//! The shell runs with job control on (`set -m`), so every command it forks
//! leads its own process group. On timeout or cancellation each of those
//! groups gets SIGKILL; the shell itself is never signalled and still prints
//! its sentinel (status 137). Work the shell does in-process, such as a
//! builtin loop, cannot be killed that way: if the shell stays silent for
//! [`KILL_GRACE`], it is killed and respawned on the next call in its last
//! known directory.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::sync::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use kiln_config::ShellConfig;
use kiln_core::{KilnError, Result};

/// Each stream is cut to this many bytes, keeping head and tail.
pub const MAX_OUTPUT_LENGTH: usize = 30_000;

/// How long an interrupted command may take to unwind before the shell is
/// considered wedged.
pub const KILL_GRACE: Duration = Duration::from_secs(1);

/// Exit status reported when the command was killed and the shell could not
/// tell us what happened.
pub const INTERRUPTED_EXIT_CODE: i32 = 143;

const STARTUP_TIMEOUT: Duration = Duration::from_secs(10);
const READ_CHUNK: usize = 8 * 1024;

/// Result of one command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
    pub interrupted: bool,
}

/// Which binary to run, and how.
#[derive(Debug, Clone)]
pub struct ShellSettings {
    pub program: String,
    pub args: Vec<String>,
}

impl Default for ShellSettings {
    fn default() -> Self {
        Self::from(&ShellConfig::default())
    }
}

impl From<&ShellConfig> for ShellSettings {
    fn from(cfg: &ShellConfig) -> Self {
        Self {
            program: cfg.resolve_path(),
            args: cfg.args.clone(),
        }
    }
}

// ─── Shell process ────────────────────────────────────────────────────

struct ShellProcess {
    child: Child,
    stdin: ChildStdin,
    stdout: ChildStdout,
    stderr: ChildStderr,
}

/// One framed stream: bytes so far and, once seen, the sentinel payload.
struct Frame {
    buf: Vec<u8>,
    scanned: usize,
    payload: Option<String>,
    eof: bool,
}

impl Frame {
    fn new() -> Self {
        Self {
            buf: Vec::new(),
            scanned: 0,
            payload: None,
            eof: false,
        }
    }

    fn done(&self) -> bool {
        self.payload.is_some() || self.eof
    }

    /// Append a chunk and look for `\n<sentinel> ... \n`.
    fn push(&mut self, chunk: &[u8], marker: &[u8]) {
        self.buf.extend_from_slice(chunk);
        let from = self.scanned.saturating_sub(marker.len());
        let Some(rel) = find(&self.buf[from..], marker) else {
            self.scanned = self.buf.len();
            return;
        };
        let start = from + rel;
        let rest = &self.buf[start + marker.len()..];
        let Some(nl) = rest.iter().position(|&b| b == b'\n') else {
            // Sentinel line still incomplete; rescan from its start.
            self.scanned = start;
            return;
        };
        self.payload = Some(String::from_utf8_lossy(&rest[..nl]).into_owned());
        self.buf.truncate(start);
    }

    fn text(&self) -> String {
        String::from_utf8_lossy(&self.buf).into_owned()
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}

struct RunOutcome {
    output: ExecOutput,
    cwd: Option<PathBuf>,
    /// The shell died or stopped responding and must be replaced.
    lost: bool,
}

impl ShellProcess {
    async fn spawn(settings: &ShellSettings, dir: &Path) -> Result<Self> {
        let mut cmd = Command::new(&settings.program);
        cmd.args(&settings.args)
            .current_dir(dir)
            .env("GIT_EDITOR", "true")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        cmd.process_group(0);

        let mut child = cmd.spawn().map_err(|e| {
            KilnError::Shell(format!("failed to start {}: {e}", settings.program))
        })?;
        let (Some(stdin), Some(stdout), Some(stderr)) =
            (child.stdin.take(), child.stdout.take(), child.stderr.take())
        else {
            return Err(KilnError::Shell("shell stdio unavailable".into()));
        };

        let mut process = Self {
            child,
            stdin,
            stdout,
            stderr,
        };
        info!(
            program = %settings.program,
            pid = process.child.id(),
            dir = %dir.display(),
            "spawned persistent shell"
        );

        // Swallow anything the login profile prints, and turn on job control.
        let warmup = process
            .run(&CancellationToken::new(), "set -m", STARTUP_TIMEOUT)
            .await;
        if warmup.lost {
            return Err(KilnError::Shell(format!(
                "{} exited during startup",
                settings.program
            )));
        }
        Ok(process)
    }

    fn is_alive(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }

    async fn run(
        &mut self,
        cancel: &CancellationToken,
        command: &str,
        timeout: Duration,
    ) -> RunOutcome {
        let sentinel = format!("__KILN_{}__", Uuid::new_v4().simple());
        let script = format!(
            "eval {cmd} < /dev/null\n\
             __kiln_status=$?\n\
             printf '\\n{s} %d %s\\n' \"$__kiln_status\" \"$PWD\"\n\
             printf '\\n{s} %d\\n' \"$__kiln_status\" >&2\n",
            cmd = shell_escape(command),
            s = sentinel,
        );
        let marker = format!("\n{sentinel} ").into_bytes();

        if let Err(e) = self.stdin.write_all(script.as_bytes()).await {
            warn!(error = %e, "failed to write to shell");
            return RunOutcome {
                output: ExecOutput {
                    stderr: format!("Failed to write command to shell: {e}"),
                    exit_code: 1,
                    ..ExecOutput::default()
                },
                cwd: None,
                lost: true,
            };
        }
        let _ = self.stdin.flush().await;

        let mut out = Frame::new();
        let mut err = Frame::new();
        let mut out_chunk = vec![0u8; READ_CHUNK];
        let mut err_chunk = vec![0u8; READ_CHUNK];
        let mut interrupted = false;
        let mut lost = false;

        let deadline = tokio::time::sleep(timeout);
        tokio::pin!(deadline);
        let grace = tokio::time::sleep(Duration::from_secs(u32::MAX as u64));
        tokio::pin!(grace);

        while !(out.done() && err.done()) {
            tokio::select! {
                n = self.stdout.read(&mut out_chunk), if !out.done() => match n {
                    Ok(0) | Err(_) => out.eof = true,
                    Ok(n) => out.push(&out_chunk[..n], &marker),
                },
                n = self.stderr.read(&mut err_chunk), if !err.done() => match n {
                    Ok(0) | Err(_) => err.eof = true,
                    Ok(n) => err.push(&err_chunk[..n], &marker),
                },
                _ = &mut deadline, if !interrupted => {
                    debug!(command, ?timeout, "command timed out");
                    interrupted = true;
                    self.kill_command().await;
                    grace.as_mut().reset(Instant::now() + KILL_GRACE);
                }
                _ = cancel.cancelled(), if !interrupted => {
                    debug!(command, "command cancelled");
                    interrupted = true;
                    self.kill_command().await;
                    grace.as_mut().reset(Instant::now() + KILL_GRACE);
                }
                _ = &mut grace, if interrupted => {
                    warn!(command, "shell did not recover after interrupt, killing it");
                    if let Some(pid) = self.child.id() {
                        kill_group(pid);
                    }
                    let _ = self.child.start_kill();
                    lost = true;
                    break;
                }
            }
        }
        if out.eof || err.eof {
            lost = true;
        }

        let mut stdout = out.text();
        let mut stderr = err.text();
        let mut cwd = None;
        let exit_code = match out.payload.as_deref() {
            Some(payload) => {
                let (status, dir) = payload.split_once(' ').unwrap_or((payload, ""));
                if !dir.is_empty() {
                    cwd = Some(PathBuf::from(dir));
                }
                status.trim().parse().unwrap_or(0)
            }
            None if interrupted => {
                stderr.push_str("\nCommand execution timed out or was interrupted");
                INTERRUPTED_EXIT_CODE
            }
            None => {
                if !stderr.is_empty() && !stderr.ends_with('\n') {
                    stderr.push('\n');
                }
                stderr.push_str("shell exited unexpectedly");
                1
            }
        };
        stdout = truncate_output(&stdout);
        stderr = truncate_output(&stderr);

        RunOutcome {
            output: ExecOutput {
                stdout,
                stderr,
                exit_code,
                interrupted,
            },
            cwd,
            lost,
        }
    }

    /// SIGKILL the process group of every job the shell has forked,
    /// leaving the shell running.
    async fn kill_command(&self) {
        let Some(pid) = self.child.id() else {
            return;
        };
        let jobs = children(pid).await;
        debug!(shell_pid = pid, count = jobs.len(), "killing command process groups");
        for job in jobs {
            kill_job(job);
        }
    }
}

/// Direct children of `pid`: from procfs where available, else `pgrep -P`.
async fn children(pid: u32) -> Vec<u32> {
    let proc_path = format!("/proc/{pid}/task/{pid}/children");
    let listing = match tokio::fs::read_to_string(&proc_path).await {
        Ok(text) => text,
        Err(_) => match Command::new("pgrep").arg("-P").arg(pid.to_string()).output().await {
            Ok(o) => String::from_utf8_lossy(&o.stdout).into_owned(),
            Err(e) => {
                warn!(error = %e, "cannot list shell children, command not interrupted");
                return Vec::new();
            }
        },
    };
    parse_pids(&listing)
}

fn parse_pids(listing: &str) -> Vec<u32> {
    listing
        .split_whitespace()
        .filter_map(|s| s.parse().ok())
        .collect()
}

/// SIGKILL the group led by `pid`. Without job control the child is not a
/// group leader, so it is killed on its own.
#[cfg(unix)]
fn kill_job(pid: u32) {
    let pid = pid as libc::pid_t;
    unsafe {
        if libc::kill(-pid, libc::SIGKILL) != 0 {
            libc::kill(pid, libc::SIGKILL);
        }
    }
}

/// SIGKILL the shell's whole process group.
#[cfg(unix)]
fn kill_group(pgid: u32) {
    unsafe {
        libc::kill(-(pgid as libc::pid_t), libc::SIGKILL);
    }
}

#[cfg(not(unix))]
fn kill_job(_pid: u32) {}

#[cfg(not(unix))]
fn kill_group(_pgid: u32) {}

// ─── Public API ───────────────────────────────────────────────────────

/// A shell bound to one working directory. Calls are serialized.
pub struct PersistentShell {
    settings: ShellSettings,
    cwd: parking_lot::Mutex<PathBuf>,
    process: Mutex<Option<ShellProcess>>,
}

impl PersistentShell {
    /// The process is started lazily on the first [`exec`](Self::exec).
    pub fn new(settings: ShellSettings, dir: impl Into<PathBuf>) -> Self {
        Self {
            settings,
            cwd: parking_lot::Mutex::new(dir.into()),
            process: Mutex::new(None),
        }
    }

    /// Directory the shell was in after the last command.
    pub fn cwd(&self) -> PathBuf {
        self.cwd.lock().clone()
    }

    /// Run `command`, waiting at most `timeout`.
    ///
    /// Returns `Err` when no shell could be started, or when `cancel` fires
    /// while another command still holds the shell.
    pub async fn exec(
        &self,
        cancel: &CancellationToken,
        command: &str,
        timeout: Duration,
    ) -> Result<ExecOutput> {
        let mut slot = tokio::select! {
            slot = self.process.lock() => slot,
            _ = cancel.cancelled() => {
                debug!(command, "cancelled while waiting for the shell");
                return Err(KilnError::Cancelled);
            }
        };
        let healthy = match slot.as_mut() {
            Some(p) => p.is_alive(),
            None => false,
        };
        if !healthy {
            let dir = self.cwd();
            *slot = Some(ShellProcess::spawn(&self.settings, &dir).await?);
        }
        let Some(process) = slot.as_mut() else {
            return Err(KilnError::Shell("shell unavailable".into()));
        };

        let outcome = process.run(cancel, command, timeout).await;
        if let Some(dir) = outcome.cwd {
            *self.cwd.lock() = dir;
        }
        if outcome.lost {
            info!("persistent shell lost, will respawn on next command");
            *slot = None;
        }
        Ok(outcome.output)
    }

    /// Kill the shell process, if any.
    pub async fn close(&self) {
        if let Some(mut process) = self.process.lock().await.take() {
            let _ = process.stdin.write_all(b"exit\n").await;
            let _ = process.child.kill().await;
        }
    }
}

/// Process-wide map from working directory to its shell.
pub struct ShellPool {
    settings: ShellSettings,
    shells: DashMap<PathBuf, Arc<PersistentShell>>,
}

impl ShellPool {
    pub fn new(settings: ShellSettings) -> Self {
        Self {
            settings,
            shells: DashMap::new(),
        }
    }

    /// The shell for `dir`, created on first use.
    pub fn get(&self, dir: &Path) -> Arc<PersistentShell> {
        self.shells
            .entry(dir.to_path_buf())
            .or_insert_with(|| Arc::new(PersistentShell::new(self.settings.clone(), dir)))
            .clone()
    }

    pub async fn close_all(&self) {
        let shells: Vec<_> = self.shells.iter().map(|e| Arc::clone(e.value())).collect();
        self.shells.clear();
        for shell in shells {
            shell.close().await;
        }
    }
}

// ─── Helpers ──────────────────────────────────────────────────────────

/// Single-quote `s` for the shell.
pub fn shell_escape(s: &str) -> String {
    format!("'{}'", s.replace('\'', "'\\''"))
}

/// Keep the first and last halves of oversized output with a marker saying
/// how many lines were dropped in between.
pub fn truncate_output(content: &str) -> String {
    if content.len() <= MAX_OUTPUT_LENGTH {
        return content.to_string();
    }
    let half = MAX_OUTPUT_LENGTH / 2;
    let head_end = floor_char_boundary(content, half);
    let tail_start = ceil_char_boundary(content, content.len() - half);
    let dropped = count_lines(&content[head_end..tail_start]);
    format!(
        "{}\n\n... [{dropped} lines truncated] ...\n\n{}",
        &content[..head_end],
        &content[tail_start..]
    )
}

fn count_lines(s: &str) -> usize {
    if s.is_empty() { 0 } else { s.split('\n').count() }
}

fn floor_char_boundary(s: &str, mut i: usize) -> usize {
    while i > 0 && !s.is_char_boundary(i) {
        i -= 1;
    }
    i
}

fn ceil_char_boundary(s: &str, mut i: usize) -> usize {
    while i < s.len() && !s.is_char_boundary(i) {
        i += 1;
    }
    i
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escape_single_quotes() {
        assert_eq!(shell_escape("it's"), r"'it'\''s'");
    }

    #[test]
    fn short_output_untouched() {
        assert_eq!(truncate_output("a\nb\n"), "a\nb\n");
    }

    #[test]
    fn long_output_keeps_both_ends() {
        let line = "x".repeat(99);
        let content = vec![line.as_str(); 1000].join("\n");
        let out = truncate_output(&content);
        assert!(out.starts_with(&"x".repeat(99)));
        assert!(out.ends_with(&"x".repeat(99)));
        assert!(out.contains("lines truncated] ..."));
        assert!(out.len() < content.len());
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        let content = "é".repeat(MAX_OUTPUT_LENGTH);
        let out = truncate_output(&content);
        assert!(out.contains("... ["));
    }

    #[test]
    fn child_listing_parses() {
        assert_eq!(parse_pids("12 345 \n"), vec![12, 345]);
        assert_eq!(parse_pids("12\n345\n"), vec![12, 345]);
        assert!(parse_pids("").is_empty());
    }

    #[test]
    fn frame_finds_split_sentinel() {
        let marker = b"\n__S__ ";
        let mut f = Frame::new();
        f.push(b"hello\n\n__S", marker);
        assert!(f.payload.is_none());
        f.push(b"__ 0 /tmp", marker);
        assert!(f.payload.is_none());
        f.push(b"\n", marker);
        assert_eq!(f.payload.as_deref(), Some("0 /tmp"));
        assert_eq!(f.text(), "hello\n");
    }
}
