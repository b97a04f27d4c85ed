//! Line-level unified diffs: generation with `similar`, plus a parser and
//! an applier for GNU-style patches.

use regex::Regex;
use similar::udiff::UnifiedHunkHeader;
use similar::{ChangeTag, TextDiff};
use std::fmt::Write as _;
use std::sync::LazyLock;
use thiserror::Error;

const NO_NEWLINE_MARKER: &str = "\\ No newline at end of file";
const CONTEXT_RADIUS: usize = 3;

static HUNK_HEADER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^@@ -(\d+)(?:,(\d+))? \+(\d+)(?:,(\d+))? @@").expect("static regex")
});

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DiffError {
    #[error("invalid hunk header: {0}")]
    InvalidHeader(String),
    #[error("hunk {hunk} does not match the file near line {line}")]
    Mismatch { hunk: usize, line: usize },
    #[error("hunk {hunk} starts past the end of the file")]
    OutOfRange { hunk: usize },
    #[error("patch touches more than one file")]
    MultipleFiles,
}

/// Patch text plus line statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GeneratedDiff {
    pub patch: String,
    pub additions: usize,
    pub removals: usize,
}

/// Unified diff from `old` to `new` labelled `a/<path>` and `b/<path>`.
/// Identical inputs produce an empty patch.
///
/// Lines end at `\n` only. A `\r` without a following `\n` stays inside
/// its line, so the patch text parses back to the same lines.
pub fn generate(old: &str, new: &str, path: &str) -> GeneratedDiff {
    let old_lines: Vec<&str> = old.split_inclusive('\n').collect();
    let new_lines: Vec<&str> = new.split_inclusive('\n').collect();
    let diff = TextDiff::from_slices(&old_lines[..], &new_lines[..]);

    let mut additions = 0;
    let mut removals = 0;
    for change in diff.iter_all_changes() {
        match change.tag() {
            ChangeTag::Insert => additions += 1,
            ChangeTag::Delete => removals += 1,
            ChangeTag::Equal => {}
        }
    }

    let label = path.trim_start_matches('/');
    let mut patch = String::new();
    for ops in diff.grouped_ops(CONTEXT_RADIUS) {
        if ops.is_empty() {
            continue;
        }
        if patch.is_empty() {
            let _ = writeln!(patch, "--- a/{label}\n+++ b/{label}");
        }
        let _ = writeln!(patch, "{}", UnifiedHunkHeader::new(&ops));
        for op in &ops {
            for change in diff.iter_changes(op) {
                let sign = match change.tag() {
                    ChangeTag::Equal => ' ',
                    ChangeTag::Delete => '-',
                    ChangeTag::Insert => '+',
                };
                push_patch_line(&mut patch, sign, change.value());
            }
        }
    }
    GeneratedDiff {
        patch,
        additions,
        removals,
    }
}

fn push_patch_line(patch: &mut String, sign: char, line: &str) {
    patch.push(sign);
    match line.strip_suffix('\n') {
        Some(body) => {
            patch.push_str(body);
            patch.push('\n');
        }
        None => {
            patch.push_str(line);
            patch.push('\n');
            patch.push_str(NO_NEWLINE_MARKER);
            patch.push('\n');
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineKind {
    Context,
    Removed,
    Added,
}

/// One hunk line. `content` includes its trailing newline unless the
/// patch marked it with `\ No newline at end of file`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiffLine {
    pub kind: LineKind,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hunk {
    pub header: String,
    pub old_start: usize,
    pub old_count: usize,
    pub new_start: usize,
    pub new_count: usize,
    pub lines: Vec<DiffLine>,
}

impl Hunk {
    fn old_side(&self) -> impl Iterator<Item = &str> {
        self.lines
            .iter()
            .filter(|l| l.kind != LineKind::Added)
            .map(|l| l.content.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileDiff {
    pub old_file: Option<String>,
    pub new_file: Option<String>,
    pub hunks: Vec<Hunk>,
}

/// Parse unified diff text into file sections. Text before the first
/// header or hunk is ignored; hunks without file headers land in a
/// section with no names.
pub fn parse(text: &str) -> Result<Vec<FileDiff>, DiffError> {
    let mut files: Vec<FileDiff> = Vec::new();
    let mut old_left = 0usize;
    let mut new_left = 0usize;
    let raw: Vec<&str> = text.split('\n').collect();

    let mut i = 0;
    while i < raw.len() {
        let line = raw[i];
        i += 1;

        let in_body = old_left > 0 || new_left > 0;
        if !in_body {
            if let Some(old) = line.strip_prefix("--- ") {
                if raw.get(i).is_some_and(|next| next.starts_with("+++ ")) {
                    let new = &raw[i][4..];
                    i += 1;
                    files.push(FileDiff {
                        old_file: Some(strip_label(old, "a/")),
                        new_file: Some(strip_label(new, "b/")),
                        hunks: Vec::new(),
                    });
                    continue;
                }
            }
            if line.starts_with("@@") {
                let caps = HUNK_HEADER
                    .captures(line)
                    .ok_or_else(|| DiffError::InvalidHeader(line.to_string()))?;
                let num = |idx: usize, default: usize| {
                    caps.get(idx)
                        .and_then(|m| m.as_str().parse().ok())
                        .unwrap_or(default)
                };
                let hunk = Hunk {
                    header: line.to_string(),
                    old_start: num(1, 0),
                    old_count: num(2, 1),
                    new_start: num(3, 0),
                    new_count: num(4, 1),
                    lines: Vec::new(),
                };
                old_left = hunk.old_count;
                new_left = hunk.new_count;
                if files.is_empty() {
                    files.push(FileDiff::default());
                }
                if let Some(file) = files.last_mut() {
                    file.hunks.push(hunk);
                }
                continue;
            }
        }

        if line.starts_with(NO_NEWLINE_MARKER) {
            if let Some(last) = current_hunk(&mut files).and_then(|h| h.lines.last_mut()) {
                if last.content.ends_with('\n') {
                    last.content.pop();
                }
            }
            continue;
        }

        let Some(hunk) = current_hunk(&mut files) else {
            continue;
        };
        // Past the declared counts only explicit body lines are accepted.
        if !in_body && !matches!(line.chars().next(), Some(' ' | '+' | '-')) {
            continue;
        }
        let (kind, body) = match line.chars().next() {
            Some('+') => (LineKind::Added, &line[1..]),
            Some('-') => (LineKind::Removed, &line[1..]),
            Some(' ') => (LineKind::Context, &line[1..]),
            _ => (LineKind::Context, line),
        };
        match kind {
            LineKind::Added => new_left = new_left.saturating_sub(1),
            LineKind::Removed => old_left = old_left.saturating_sub(1),
            LineKind::Context => {
                old_left = old_left.saturating_sub(1);
                new_left = new_left.saturating_sub(1);
            }
        }
        hunk.lines.push(DiffLine {
            kind,
            content: format!("{body}\n"),
        });
    }
    Ok(files)
}

fn strip_label(name: &str, prefix: &str) -> String {
    let name = name.split('\t').next().unwrap_or(name).trim_end();
    name.strip_prefix(prefix).unwrap_or(name).to_string()
}

fn current_hunk(files: &mut [FileDiff]) -> Option<&mut Hunk> {
    files.last_mut().and_then(|f| f.hunks.last_mut())
}

fn same_line(base: &str, patch: &str) -> bool {
    base == patch || base.trim_end_matches(['\n', '\r']) == patch.trim_end_matches(['\n', '\r'])
}

fn matches_at(base: &[&str], at: usize, old: &[&str]) -> bool {
    at + old.len() <= base.len() && old.iter().enumerate().all(|(j, l)| same_line(base[at + j], l))
}

/// Push `line`, first terminating a previous line that lacked a newline.
fn push_line(out: &mut String, line: &str) {
    if !out.is_empty() && !out.ends_with('\n') {
        out.push('\n');
    }
    out.push_str(line);
}

/// Apply the hunks of one file section to `base`.
///
/// Each hunk is tried at its header position first, then at the first
/// later position where its context and removed lines match.
pub fn apply_hunks(base: &str, hunks: &[Hunk]) -> Result<String, DiffError> {
    let lines: Vec<&str> = base.split_inclusive('\n').collect();
    let mut out = String::with_capacity(base.len());
    let mut cursor = 0usize;

    for (n, hunk) in hunks.iter().enumerate() {
        let hunk_no = n + 1;
        let old: Vec<&str> = hunk.old_side().collect();
        let hinted = if hunk.old_count == 0 {
            hunk.old_start
        } else {
            hunk.old_start.saturating_sub(1)
        };
        if hinted > lines.len() && old.is_empty() {
            return Err(DiffError::OutOfRange { hunk: hunk_no });
        }

        let at = if hinted >= cursor && matches_at(&lines, hinted, &old) {
            hinted
        } else {
            (cursor..=lines.len())
                .find(|&i| matches_at(&lines, i, &old))
                .ok_or(DiffError::Mismatch {
                    hunk: hunk_no,
                    line: hinted + 1,
                })?
        };

        for l in &lines[cursor..at] {
            push_line(&mut out, l);
        }
        cursor = at;

        for dl in &hunk.lines {
            match dl.kind {
                LineKind::Context => {
                    push_line(&mut out, lines[cursor]);
                    cursor += 1;
                }
                LineKind::Removed => cursor += 1,
                LineKind::Added => push_line(&mut out, &dl.content),
            }
        }
    }
    for l in &lines[cursor..] {
        push_line(&mut out, l);
    }
    Ok(out)
}

/// Parse `patch` and apply it to `base`. The patch may describe at most
/// one file.
pub fn apply(patch: &str, base: &str) -> Result<String, DiffError> {
    let files = parse(patch)?;
    let mut with_hunks = files.iter().filter(|f| !f.hunks.is_empty());
    let Some(file) = with_hunks.next() else {
        return Ok(base.to_string());
    };
    if with_hunks.next().is_some() {
        return Err(DiffError::MultipleFiles);
    }
    apply_hunks(base, &file.hunks)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    fn roundtrip(a: &str, b: &str) {
        let d = generate(a, b, "f.txt");
        assert_eq!(apply(&d.patch, a).unwrap(), b, "patch was:\n{}", d.patch);
    }

    #[test]
    fn roundtrips() {
        roundtrip("", "");
        roundtrip("", "one\n");
        roundtrip("one\n", "");
        roundtrip("a\nb\nc\n", "a\nB\nc\n");
        roundtrip("a\nb\nc", "a\nb\nc\n");
        roundtrip("a\nb\nc\n", "a\nb\nc");
        roundtrip("x", "y");
        roundtrip("keep\n", "keep\nmore");
        let long: String = (0..40).map(|i| format!("line {i}\n")).collect();
        let edited = long.replace("line 5\n", "five\n").replace("line 33\n", "");
        roundtrip(&long, &edited);
    }

    #[test]
    fn lone_carriage_returns() {
        roundtrip("a\r", "b\r");
        roundtrip("x\r", "x\r\ny\r");
        roundtrip("one\n\r", "one\n");
        roundtrip("p\rq\n", "p\rQ\n");
        roundtrip("crlf\r\nend\r", "crlf\r\nEND\r");
    }

    proptest! {
        #[test]
        fn apply_inverts_generate(a in r"[ab\r\n]{0,16}", b in r"[ab\r\n]{0,16}") {
            let d = generate(&a, &b, "f.txt");
            prop_assert_eq!(apply(&d.patch, &a).unwrap(), b, "patch was:\n{}", d.patch);
        }
    }

    #[test]
    fn counts_changes() {
        let d = generate("a\nb\n", "a\nc\nd\n", "/src/x.rs");
        assert_eq!((d.additions, d.removals), (2, 1));
        assert!(d.patch.starts_with("--- a/src/x.rs\n+++ b/src/x.rs\n"));
    }

    #[test]
    fn identical_inputs_give_empty_patch() {
        let d = generate("same\n", "same\n", "f");
        assert_eq!(d.patch, "");
        assert_eq!(apply(&d.patch, "same\n").unwrap(), "same\n");
    }

    #[test]
    fn parse_defaults_missing_counts_to_one() {
        let files = parse("@@ -2 +2 @@\n-b\n+B\n").unwrap();
        let h = &files[0].hunks[0];
        assert_eq!((h.old_start, h.old_count, h.new_start, h.new_count), (2, 1, 2, 1));
        assert_eq!(apply_hunks("a\nb\nc\n", &files[0].hunks).unwrap(), "a\nB\nc\n");
    }

    #[test]
    fn removed_line_that_looks_like_a_header() {
        let patch = "--- a/f\n+++ b/f\n@@ -1,2 +1,1 @@\n--- old\n keep\n";
        let files = parse(patch).unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].hunks[0].lines[0].kind, LineKind::Removed);
        assert_eq!(apply(patch, "-- old\nkeep\n").unwrap(), "keep\n");
    }

    #[test]
    fn context_mismatch_is_an_error() {
        let err = apply("@@ -1,2 +1,2 @@\n nope\n-b\n+c\n", "a\nb\n").unwrap_err();
        assert!(matches!(err, DiffError::Mismatch { hunk: 1, .. }));
    }

    #[test]
    fn wrong_line_numbers_are_tolerated() {
        let out = apply("@@ -10,2 +10,2 @@\n b\n-c\n+C\n", "a\nb\nc\nd\n").unwrap();
        assert_eq!(out, "a\nb\nC\nd\n");
    }

    #[test]
    fn two_files_rejected() {
        let patch = "--- a/x\n+++ b/x\n@@ -1 +1 @@\n-a\n+b\n--- a/y\n+++ b/y\n@@ -1 +1 @@\n-a\n+b\n";
        assert_eq!(apply(patch, "a\n").unwrap_err(), DiffError::MultipleFiles);
    }
}
