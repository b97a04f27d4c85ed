//! The multi-file `*** Begin Patch` format.
//!
//! ```text
//! *** Begin Patch
//! *** Update File: /abs/a.rs
//! @@ fn anchor()
//!  keep
//! -remove
//! +add
//! *** Add File: /abs/b.rs
//! +line
//! *** Delete File: /abs/c.rs
//! *** End Patch
//! ```
//!
//! Parsing needs the current contents of every updated or deleted file and
//! reports a fuzz score describing how loosely the context matched.

use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;

const BEGIN_PATCH: &str = "*** Begin Patch";
const END_PATCH: &str = "*** End Patch";
const UPDATE_FILE: &str = "*** Update File: ";
const DELETE_FILE: &str = "*** Delete File: ";
const ADD_FILE: &str = "*** Add File: ";
const MOVE_TO: &str = "*** Move to: ";
const END_OF_FILE: &str = "*** End of File";

/// Fuzz added when context matched only after trimming trailing blanks.
const FUZZ_RSTRIP: usize = 1;
/// Fuzz added when context matched only after trimming both ends.
const FUZZ_TRIM: usize = 100;
/// Fuzz added when an end-of-file section matched away from the end.
const FUZZ_EOF_MISS: usize = 10_000;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{0}")]
pub struct PatchError(String);

impl PatchError {
    fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }

    fn file(action: &str, reason: &str, path: &str) -> Self {
        Self(format!("{action} File Error: {reason}: {path}"))
    }

    fn context(index: usize, context: &[String], eof: bool) -> Self {
        let prefix = if eof {
            "Invalid EOF Context"
        } else {
            "Invalid Context"
        };
        Self(format!("{prefix} {index}:\n{}", context.join("\n")))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionKind {
    Add,
    Delete,
    Update,
}

/// A replacement within an updated file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Chunk {
    /// Line index in the original file where `del_lines` begin.
    pub orig_index: usize,
    pub del_lines: Vec<String>,
    pub ins_lines: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchAction {
    pub kind: ActionKind,
    pub new_file: Option<String>,
    pub chunks: Vec<Chunk>,
    pub move_path: Option<String>,
}

impl PatchAction {
    fn new(kind: ActionKind) -> Self {
        Self {
            kind,
            new_file: None,
            chunks: Vec::new(),
            move_path: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Patch {
    pub actions: BTreeMap<String, PatchAction>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileChange {
    Add {
        new: String,
    },
    Update {
        old: String,
        new: String,
        move_path: Option<String>,
    },
    Delete {
        old: String,
    },
}

impl FileChange {
    pub fn old_content(&self) -> &str {
        match self {
            FileChange::Add { .. } => "",
            FileChange::Update { old, .. } | FileChange::Delete { old } => old,
        }
    }

    pub fn new_content(&self) -> &str {
        match self {
            FileChange::Add { new } | FileChange::Update { new, .. } => new,
            FileChange::Delete { .. } => "",
        }
    }
}

/// Every file touched by a patch, keyed by path.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Commit {
    pub changes: BTreeMap<String, FileChange>,
}

struct Parser<'a> {
    current_files: &'a BTreeMap<String, String>,
    lines: Vec<&'a str>,
    index: usize,
    patch: Patch,
    fuzz: usize,
}

impl<'a> Parser<'a> {
    fn is_done(&self, prefixes: &[&str]) -> bool {
        match self.lines.get(self.index) {
            None => true,
            Some(line) => prefixes.iter().any(|p| line.starts_with(p)),
        }
    }

    /// Consume the current line if it starts with `prefix`, returning the
    /// remainder. Empty remainders count as no match.
    fn read_prefixed(&mut self, prefix: &str) -> Option<&'a str> {
        let line: &'a str = self.lines.get(self.index).copied()?;
        let rest = line.strip_prefix(prefix)?;
        self.index += 1;
        (!rest.is_empty()).then_some(rest)
    }

    fn parse(&mut self) -> Result<(), PatchError> {
        while !self.is_done(&[END_PATCH]) {
            if let Some(path) = self.read_prefixed(UPDATE_FILE) {
                if self.patch.actions.contains_key(path) {
                    return Err(PatchError::file("Update", "Duplicate Path", path));
                }
                let move_to = self.read_prefixed(MOVE_TO);
                let current = self.current_files;
                let Some(text) = current.get(path) else {
                    return Err(PatchError::file("Update", "Missing File", path));
                };
                let mut action = self.parse_update_file(text)?;
                action.move_path = move_to.map(str::to_string);
                self.patch.actions.insert(path.to_string(), action);
                continue;
            }
            if let Some(path) = self.read_prefixed(DELETE_FILE) {
                if self.patch.actions.contains_key(path) {
                    return Err(PatchError::file("Delete", "Duplicate Path", path));
                }
                if !self.current_files.contains_key(path) {
                    return Err(PatchError::file("Delete", "Missing File", path));
                }
                self.patch
                    .actions
                    .insert(path.to_string(), PatchAction::new(ActionKind::Delete));
                continue;
            }
            if let Some(path) = self.read_prefixed(ADD_FILE) {
                if self.patch.actions.contains_key(path) {
                    return Err(PatchError::file("Add", "Duplicate Path", path));
                }
                if self.current_files.contains_key(path) {
                    return Err(PatchError::file("Add", "File already exists", path));
                }
                let action = self.parse_add_file()?;
                self.patch.actions.insert(path.to_string(), action);
                continue;
            }
            return Err(PatchError::new(format!(
                "Unknown Line: {}",
                self.lines[self.index]
            )));
        }
        if !self.lines.get(self.index).is_some_and(|l| l.starts_with(END_PATCH)) {
            return Err(PatchError::new("Missing End Patch"));
        }
        self.index += 1;

        let mut targets = BTreeSet::new();
        for action in self.patch.actions.values() {
            if let Some(dest) = action.move_path.as_deref() {
                if self.patch.actions.contains_key(dest) || !targets.insert(dest) {
                    return Err(PatchError::file("Move", "Duplicate Path", dest));
                }
            }
        }
        Ok(())
    }

    fn parse_update_file(&mut self, text: &str) -> Result<PatchAction, PatchError> {
        let mut action = PatchAction::new(ActionKind::Update);
        let file_lines: Vec<&str> = text.split('\n').collect();
        let mut index = 0usize;
        let end_prefixes = [
            END_PATCH,
            "*** Update File:",
            "*** Delete File:",
            "*** Add File:",
            END_OF_FILE,
        ];

        while !self.is_done(&end_prefixes) {
            let def = self.read_prefixed("@@ ");
            let mut bare_section = false;
            if def.is_none() && self.lines.get(self.index) == Some(&"@@") {
                bare_section = true;
                self.index += 1;
            }
            if def.is_none() && !bare_section && index != 0 {
                let line = self.lines.get(self.index).copied().unwrap_or_default();
                return Err(PatchError::new(format!("Invalid Line:\n{line}")));
            }

            if let Some(def) = def.filter(|d| !d.trim().is_empty()) {
                index = self.seek_anchor(&file_lines, index, def);
            }

            let section = peek_next_section(&self.lines, self.index);
            // A section that consumes nothing would leave the cursor in place.
            if def.is_none() && !bare_section && section.end_index == self.index {
                let line = self.lines.get(self.index).copied().unwrap_or_default();
                return Err(PatchError::new(format!("Invalid Line:\n{line}")));
            }
            let Some((new_index, fuzz)) =
                find_context(&file_lines, &section.context, index, section.eof)
            else {
                return Err(PatchError::context(index, &section.context, section.eof));
            };
            self.fuzz += fuzz;
            action
                .chunks
                .extend(section.chunks.into_iter().map(|mut chunk| {
                    chunk.orig_index += new_index;
                    chunk
                }));
            index = new_index + section.context.len();
            self.index = section.end_index;
        }
        Ok(action)
    }

    /// Move `index` past an `@@ <anchor>` line. An anchor already behind
    /// the cursor leaves it in place.
    fn seek_anchor(&mut self, file_lines: &[&str], index: usize, def: &str) -> usize {
        let index = index.min(file_lines.len());
        if file_lines[..index].iter().any(|l| *l == def) {
            return index;
        }
        if let Some(pos) = file_lines[index..].iter().position(|l| *l == def) {
            return index + pos + 1;
        }
        let wanted = def.trim();
        if file_lines[..index].iter().any(|l| l.trim() == wanted) {
            return index;
        }
        if let Some(pos) = file_lines[index..].iter().position(|l| l.trim() == wanted) {
            self.fuzz += FUZZ_RSTRIP;
            return index + pos + 1;
        }
        index
    }

    fn parse_add_file(&mut self) -> Result<PatchAction, PatchError> {
        let mut lines = Vec::new();
        let end_prefixes = [END_PATCH, "*** Update File:", "*** Delete File:", "*** Add File:"];
        while !self.is_done(&end_prefixes) {
            let line = self.lines[self.index];
            self.index += 1;
            let Some(body) = line.strip_prefix('+') else {
                return Err(PatchError::new(format!("Invalid Add File Line: {line}")));
            };
            lines.push(body);
        }
        let mut action = PatchAction::new(ActionKind::Add);
        action.new_file = Some(lines.join("\n"));
        Ok(action)
    }
}

struct Section {
    /// Original-file lines the section expects: keep plus delete lines.
    context: Vec<String>,
    chunks: Vec<Chunk>,
    end_index: usize,
    eof: bool,
}

#[derive(PartialEq, Eq, Clone, Copy)]
enum Mode {
    Keep,
    Add,
    Delete,
}

fn flush_chunk(old: &[String], del: &mut Vec<String>, ins: &mut Vec<String>, chunks: &mut Vec<Chunk>) {
    if !del.is_empty() || !ins.is_empty() {
        chunks.push(Chunk {
            orig_index: old.len() - del.len(),
            del_lines: std::mem::take(del),
            ins_lines: std::mem::take(ins),
        });
    }
}

fn peek_next_section(lines: &[&str], start: usize) -> Section {
    let mut index = start;
    let mut old: Vec<String> = Vec::new();
    let mut del_lines: Vec<String> = Vec::new();
    let mut ins_lines: Vec<String> = Vec::new();
    let mut chunks = Vec::new();
    let mut mode = Mode::Keep;

    while let Some(&line) = lines.get(index) {
        if line.starts_with("@@") || line.starts_with("***") {
            break;
        }
        index += 1;

        let last_mode = mode;
        let (next_mode, body) = match line.chars().next() {
            Some('+') => (Mode::Add, &line[1..]),
            Some('-') => (Mode::Delete, &line[1..]),
            Some(' ') => (Mode::Keep, &line[1..]),
            _ => (Mode::Keep, line),
        };
        mode = next_mode;

        if mode == Mode::Keep && last_mode != mode {
            flush_chunk(&old, &mut del_lines, &mut ins_lines, &mut chunks);
        }
        match mode {
            Mode::Delete => {
                del_lines.push(body.to_string());
                old.push(body.to_string());
            }
            Mode::Add => ins_lines.push(body.to_string()),
            Mode::Keep => old.push(body.to_string()),
        }
    }
    flush_chunk(&old, &mut del_lines, &mut ins_lines, &mut chunks);

    let eof = lines.get(index) == Some(&END_OF_FILE);
    if eof {
        index += 1;
    }
    Section {
        context: old,
        chunks,
        end_index: index,
        eof,
    }
}

fn try_find(
    lines: &[&str],
    context: &[String],
    start: usize,
    same: impl Fn(&str, &str) -> bool,
) -> Option<usize> {
    if context.len() > lines.len() {
        return None;
    }
    (start..=lines.len() - context.len())
        .find(|&i| context.iter().enumerate().all(|(j, c)| same(lines[i + j], c)))
}

fn find_context_core(lines: &[&str], context: &[String], start: usize) -> Option<(usize, usize)> {
    if context.is_empty() {
        return Some((start, 0));
    }
    if let Some(i) = try_find(lines, context, start, |a, b| a == b) {
        return Some((i, 0));
    }
    let rstrip = |s: &str| s.trim_end_matches([' ', '\t']).to_string();
    if let Some(i) = try_find(lines, context, start, |a, b| rstrip(a) == rstrip(b)) {
        return Some((i, FUZZ_RSTRIP));
    }
    if let Some(i) = try_find(lines, context, start, |a, b| a.trim() == b.trim()) {
        return Some((i, FUZZ_TRIM));
    }
    None
}

fn find_context(
    lines: &[&str],
    context: &[String],
    start: usize,
    eof: bool,
) -> Option<(usize, usize)> {
    if eof {
        let tail = lines.len().saturating_sub(context.len());
        if let Some(found) = find_context_core(lines, context, tail) {
            return Some(found);
        }
        return find_context_core(lines, context, start).map(|(i, f)| (i, f + FUZZ_EOF_MISS));
    }
    find_context_core(lines, context, start)
}

/// Parse patch text against the current contents of the files it updates
/// or deletes. Returns the patch and its fuzz score.
pub fn text_to_patch(
    text: &str,
    current_files: &BTreeMap<String, String>,
) -> Result<(Patch, usize), PatchError> {
    let lines: Vec<&str> = text.trim().split('\n').collect();
    let well_formed = lines.len() >= 2
        && lines[0].starts_with(BEGIN_PATCH)
        && lines.last() == Some(&END_PATCH);
    if !well_formed {
        return Err(PatchError::new("Invalid patch text"));
    }
    let mut parser = Parser {
        current_files,
        lines,
        index: 1,
        patch: Patch::default(),
        fuzz: 0,
    };
    parser.parse()?;
    Ok((parser.patch, parser.fuzz))
}

fn paths_with_prefixes(text: &str, prefixes: &[&str]) -> Vec<String> {
    let set: BTreeSet<String> = text
        .trim()
        .split('\n')
        .filter_map(|line| prefixes.iter().find_map(|p| line.strip_prefix(p)))
        .map(str::to_string)
        .collect();
    set.into_iter().collect()
}

/// Paths the patch updates or deletes; their contents must be loaded
/// before parsing.
pub fn identify_files_needed(text: &str) -> Vec<String> {
    paths_with_prefixes(text, &[UPDATE_FILE, DELETE_FILE])
}

/// Paths the patch creates.
pub fn identify_files_added(text: &str) -> Vec<String> {
    paths_with_prefixes(text, &[ADD_FILE])
}

/// Destinations of moved files. Like added files they must not exist yet.
pub fn identify_move_targets(text: &str) -> Vec<String> {
    paths_with_prefixes(text, &[MOVE_TO])
}

fn updated_file(text: &str, action: &PatchAction, path: &str) -> Result<String, PatchError> {
    let orig: Vec<&str> = text.split('\n').collect();
    let mut dest: Vec<&str> = Vec::with_capacity(orig.len());
    let mut orig_index = 0usize;
    for chunk in &action.chunks {
        if chunk.orig_index > orig.len() {
            return Err(PatchError::new(format!(
                "{path}: chunk.orig_index {} > len(lines) {}",
                chunk.orig_index,
                orig.len()
            )));
        }
        if orig_index > chunk.orig_index {
            return Err(PatchError::new(format!(
                "{path}: orig_index {orig_index} > chunk.orig_index {}",
                chunk.orig_index
            )));
        }
        dest.extend_from_slice(&orig[orig_index..chunk.orig_index]);
        dest.extend(chunk.ins_lines.iter().map(String::as_str));
        orig_index = (chunk.orig_index + chunk.del_lines.len()).min(orig.len());
    }
    dest.extend_from_slice(&orig[orig_index..]);
    Ok(dest.join("\n"))
}

/// Resolve a parsed patch into concrete old and new contents.
pub fn patch_to_commit(
    patch: &Patch,
    current_files: &BTreeMap<String, String>,
) -> Result<Commit, PatchError> {
    let mut commit = Commit::default();
    for (path, action) in &patch.actions {
        let old = current_files.get(path).cloned().unwrap_or_default();
        let change = match action.kind {
            ActionKind::Delete => FileChange::Delete { old },
            ActionKind::Add => FileChange::Add {
                new: action.new_file.clone().unwrap_or_default(),
            },
            ActionKind::Update => FileChange::Update {
                new: updated_file(&old, action, path)?,
                old,
                move_path: action.move_path.clone(),
            },
        };
        commit.changes.insert(path.clone(), change);
    }
    Ok(commit)
}

/// Write every change through the supplied callbacks, stopping at the
/// first failure. A moved update writes the destination, then removes the
/// source.
pub fn apply_commit<E>(
    commit: &Commit,
    mut write: impl FnMut(&str, &str) -> Result<(), E>,
    mut remove: impl FnMut(&str) -> Result<(), E>,
) -> Result<(), E> {
    for (path, change) in &commit.changes {
        match change {
            FileChange::Delete { .. } => remove(path)?,
            FileChange::Add { new } => write(path, new)?,
            FileChange::Update {
                new,
                move_path: Some(dest),
                ..
            } => {
                write(dest, new)?;
                remove(path)?;
            }
            FileChange::Update { new, .. } => write(path, new)?,
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn files(entries: &[(&str, &str)]) -> BTreeMap<String, String> {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn commit_for(text: &str, current: &BTreeMap<String, String>) -> (Commit, usize) {
        let (patch, fuzz) = text_to_patch(text, current).unwrap();
        (patch_to_commit(&patch, current).unwrap(), fuzz)
    }

    #[test]
    fn update_with_anchor() {
        let current = files(&[("/w/a.rs", "fn one() {\n    1\n}\nfn two() {\n    1\n}\n")]);
        let text = "*** Begin Patch\n*** Update File: /w/a.rs\n@@ fn two() {\n-    1\n+    2\n }\n*** End Patch";
        let (commit, fuzz) = commit_for(text, &current);
        assert_eq!(fuzz, 0);
        assert_eq!(
            commit.changes["/w/a.rs"].new_content(),
            "fn one() {\n    1\n}\nfn two() {\n    2\n}\n"
        );
    }

    #[test]
    fn add_delete_and_move() {
        let current = files(&[("/w/old.txt", "x\ny"), ("/w/gone.txt", "bye")]);
        let text = "*** Begin Patch\n\
                    *** Update File: /w/old.txt\n\
                    *** Move to: /w/new.txt\n\
                    @@\n x\n-y\n+z\n\
                    *** Add File: /w/added.txt\n+hello\n+world\n\
                    *** Delete File: /w/gone.txt\n\
                    *** End Patch";
        let (commit, _) = commit_for(text, &current);
        assert_eq!(
            commit.changes["/w/added.txt"],
            FileChange::Add {
                new: "hello\nworld".into()
            }
        );
        assert_eq!(
            commit.changes["/w/gone.txt"],
            FileChange::Delete { old: "bye".into() }
        );
        assert_eq!(
            commit.changes["/w/old.txt"],
            FileChange::Update {
                old: "x\ny".into(),
                new: "x\nz".into(),
                move_path: Some("/w/new.txt".into()),
            }
        );

        let mut writes = Vec::new();
        let mut removes = Vec::new();
        apply_commit::<()>(
            &commit,
            |p, c| {
                writes.push((p.to_string(), c.to_string()));
                Ok(())
            },
            |p| {
                removes.push(p.to_string());
                Ok(())
            },
        )
        .unwrap();
        assert_eq!(writes.len(), 2);
        assert!(writes.contains(&("/w/new.txt".into(), "x\nz".into())));
        assert_eq!(removes, vec!["/w/gone.txt".to_string(), "/w/old.txt".to_string()]);
    }

    #[test]
    fn whitespace_fuzz_levels() {
        let current = files(&[("/f", "a  \nb\nc\n")]);
        let rstrip = "*** Begin Patch\n*** Update File: /f\n@@\n a\n-b\n+B\n*** End Patch";
        assert_eq!(commit_for(rstrip, &current).1, 1);

        let current = files(&[("/f", "   a\nb\n")]);
        let trimmed = "*** Begin Patch\n*** Update File: /f\n@@\n a\n-b\n+B\n*** End Patch";
        assert_eq!(commit_for(trimmed, &current).1, 100);
    }

    #[test]
    fn end_of_file_section_matches_tail() {
        let current = files(&[("/f", "x\nend\nx\nend")]);
        let text = "*** Begin Patch\n*** Update File: /f\n@@\n x\n-end\n+END\n*** End of File\n*** End Patch";
        let (commit, fuzz) = commit_for(text, &current);
        assert_eq!(fuzz, 0);
        assert_eq!(commit.changes["/f"].new_content(), "x\nend\nx\nEND");
    }

    #[test]
    fn framing_errors() {
        let none = BTreeMap::new();
        assert_eq!(
            text_to_patch("*** Update File: /f", &none).unwrap_err().to_string(),
            "Invalid patch text"
        );
        assert_eq!(
            text_to_patch("*** Begin Patch\n*** Update File: /f\n*** End Patch", &none)
                .unwrap_err()
                .to_string(),
            "Update File Error: Missing File: /f"
        );
        assert_eq!(
            text_to_patch("*** Begin Patch\nbogus\n*** End Patch", &none)
                .unwrap_err()
                .to_string(),
            "Unknown Line: bogus"
        );
        assert_eq!(
            text_to_patch("*** Begin Patch\n*** Add File: /n\nplain\n*** End Patch", &none)
                .unwrap_err()
                .to_string(),
            "Invalid Add File Line: plain"
        );
    }

    #[test]
    fn unknown_marker_inside_update_is_rejected() {
        let current = files(&[("/f", "a\nb\n")]);
        let first = "*** Begin Patch\n*** Update File: /f\n*** Bogus\n*** End Patch";
        assert_eq!(
            text_to_patch(first, &current).unwrap_err().to_string(),
            "Invalid Line:\n*** Bogus"
        );
        let after_empty_section = "*** Begin Patch\n*** Update File: /f\n@@\n*** Bogus\n*** End Patch";
        assert_eq!(
            text_to_patch(after_empty_section, &current)
                .unwrap_err()
                .to_string(),
            "Invalid Line:\n*** Bogus"
        );
        let after_change = "*** Begin Patch\n*** Update File: /f\n@@\n-a\n+A\n*** Bogus\n*** End Patch";
        assert!(text_to_patch(after_change, &current)
            .unwrap_err()
            .to_string()
            .starts_with("Invalid Line"));
    }

    #[test]
    fn duplicate_and_existing_paths() {
        let current = files(&[("/f", "a")]);
        let dup = "*** Begin Patch\n*** Delete File: /f\n*** Delete File: /f\n*** End Patch";
        assert_eq!(
            text_to_patch(dup, &current).unwrap_err().to_string(),
            "Delete File Error: Duplicate Path: /f"
        );
        let exists = "*** Begin Patch\n*** Add File: /f\n+a\n*** End Patch";
        assert_eq!(
            text_to_patch(exists, &current).unwrap_err().to_string(),
            "Add File Error: File already exists: /f"
        );
    }

    #[test]
    fn missing_context_is_reported() {
        let current = files(&[("/f", "a\nb\n")]);
        let text = "*** Begin Patch\n*** Update File: /f\n@@\n zzz\n-b\n+c\n*** End Patch";
        assert_eq!(
            text_to_patch(text, &current).unwrap_err().to_string(),
            "Invalid Context 0:\nzzz\nb"
        );
    }

    #[test]
    fn identifies_paths() {
        let text = "*** Begin Patch\n*** Update File: /a\n*** Delete File: /b\n*** Add File: /c\n+x\n*** Update File: /a\n*** End Patch";
        assert_eq!(identify_files_needed(text), vec!["/a", "/b"]);
        assert_eq!(identify_files_added(text), vec!["/c"]);

        let moved = "*** Begin Patch\n*** Update File: /a\n*** Move to: /d\n@@\n-x\n+y\n*** End Patch";
        assert_eq!(identify_move_targets(moved), vec!["/d"]);
        assert!(identify_move_targets(text).is_empty());
    }

    #[test]
    fn move_onto_another_patched_path_is_rejected() {
        let current = files(&[("/a", "x\n"), ("/b", "y\n")]);
        let onto_update = "*** Begin Patch\n\
                           *** Update File: /a\n*** Move to: /b\n@@\n-x\n+X\n\
                           *** Update File: /b\n@@\n-y\n+Y\n\
                           *** End Patch";
        assert_eq!(
            text_to_patch(onto_update, &current).unwrap_err().to_string(),
            "Move File Error: Duplicate Path: /b"
        );
        let twice = "*** Begin Patch\n\
                     *** Update File: /a\n*** Move to: /c\n@@\n-x\n+X\n\
                     *** Update File: /b\n*** Move to: /c\n@@\n-y\n+Y\n\
                     *** End Patch";
        assert_eq!(
            text_to_patch(twice, &current).unwrap_err().to_string(),
            "Move File Error: Duplicate Path: /c"
        );
    }
}
