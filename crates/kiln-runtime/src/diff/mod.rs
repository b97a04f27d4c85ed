//! Diff engine: unified diffs for single files and the multi-file patch
//! grammar.

pub mod patch;
pub mod unified;

pub use patch::{
    ActionKind, Commit, FileChange, Patch, PatchError, apply_commit, identify_files_added,
    identify_files_needed, identify_move_targets, patch_to_commit, text_to_patch,
};
pub use unified::{
    DiffError, DiffLine, FileDiff, GeneratedDiff, Hunk, LineKind, apply, apply_hunks, generate,
    parse,
};
