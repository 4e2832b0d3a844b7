//! Patch Validator: the gate every batch passes before it may become live.
//!
//! Pure function over the batch and a read-only view of the tree it would be
//! applied to. All-or-nothing: one failing file fails the batch.

use std::collections::{BTreeMap, BTreeSet};

use crate::core::patch::{FileChange, Patch, RESPONSE_FILE};
use crate::core::references::introduced_references;
use crate::core::syntax::{check_delimiters, lexicon_for};
use crate::core::tracking::{Tracking, check_patch_path};
use crate::core::types::{Diagnostic, ValidationResult};

/// Read-only view of the tracked tree a patch is validated against.
pub trait ExistingTree {
    fn contains(&self, path: &str) -> bool;
    fn read(&self, path: &str) -> Option<String>;
}

impl ExistingTree for BTreeMap<String, String> {
    fn contains(&self, path: &str) -> bool {
        self.contains_key(path)
    }

    fn read(&self, path: &str) -> Option<String> {
        self.get(path).cloned()
    }
}

#[derive(Debug, Clone)]
pub struct ValidationPolicy {
    pub tracking: Tracking,
    pub max_file_bytes: u64,
}

pub fn validate(patch: &Patch, existing: &dyn ExistingTree, policy: &ValidationPolicy) -> ValidationResult {
    let mut diagnostics = Vec::new();
    let mut seen = BTreeSet::new();

    for change in &patch.changes {
        if !seen.insert(change.path.as_str()) {
            diagnostics.push(Diagnostic::new(&change.path, "path appears more than once in the batch"));
            continue;
        }
        if let Err(reason) = check_patch_path(&change.path) {
            diagnostics.push(Diagnostic::new(&change.path, reason));
            continue;
        }
        if policy.tracking.is_excluded(&change.path) {
            diagnostics.push(Diagnostic::new(&change.path, "path is excluded from tracking"));
            continue;
        }
        match &change.content {
            None => {
                if !existing.contains(&change.path) {
                    diagnostics.push(Diagnostic::new(&change.path, "cannot delete a file that does not exist"));
                }
            }
            Some(content) => check_file(change, content, existing, patch, policy, &mut diagnostics),
        }
    }

    if patch.summary.trim().is_empty() {
        diagnostics.push(Diagnostic::new(RESPONSE_FILE, "patch summary is empty"));
    }

    ValidationResult::from_diagnostics(diagnostics)
}

fn check_file(
    change: &FileChange,
    content: &str,
    existing: &dyn ExistingTree,
    patch: &Patch,
    policy: &ValidationPolicy,
    diagnostics: &mut Vec<Diagnostic>,
) {
    let path = change.path.as_str();
    if content.len() as u64 > policy.max_file_bytes {
        diagnostics.push(Diagnostic::new(
            path,
            format!("{} bytes exceeds the {} byte limit", content.len(), policy.max_file_bytes),
        ));
        return;
    }
    if content.contains('\0') {
        diagnostics.push(Diagnostic::new(path, "content contains NUL bytes"));
        return;
    }

    if let Err(reason) = check_structure(path, content) {
        diagnostics.push(Diagnostic::new(path, reason));
        return;
    }

    let previous = existing.read(path);
    for reference in introduced_references(path, previous.as_deref(), content) {
        let resolves = reference
            .candidates
            .iter()
            .any(|candidate| resolves_after_patch(candidate, patch, existing));
        if !resolves {
            let reason = if reference.candidates.is_empty() {
                format!("reference `{}` points outside the tree", reference.written)
            } else {
                format!("unresolved reference `{}`", reference.written)
            };
            diagnostics.push(Diagnostic::new(path, reason));
        }
    }
}

fn resolves_after_patch(candidate: &str, patch: &Patch, existing: &dyn ExistingTree) -> bool {
    match patch.change_for(candidate) {
        Some(Some(_)) => true,
        Some(None) => false,
        None => existing.contains(candidate),
    }
}

/// Structural well-formedness check chosen by file extension.
pub fn check_structure(path: &str, content: &str) -> Result<(), String> {
    let file_name = path.rsplit('/').next().unwrap_or(path);
    let extension = file_name.rsplit_once('.').map(|(_, ext)| ext).unwrap_or("");
    match extension {
        "json" => serde_json::from_str::<serde_json::Value>(content)
            .map(|_| ())
            .map_err(|err| format!("invalid JSON: {err}")),
        "toml" => toml::from_str::<toml::Table>(content)
            .map(|_| ())
            .map_err(|err| format!("invalid TOML: {}", err.message())),
        other => match lexicon_for(other) {
            Some(lexicon) => check_delimiters(content, &lexicon),
            None => Ok(()),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> ValidationPolicy {
        ValidationPolicy {
            tracking: Tracking::new(&[".git", "target", ".warden"]),
            max_file_bytes: 1_000,
        }
    }

    fn tree(files: &[(&str, &str)]) -> BTreeMap<String, String> {
        files
            .iter()
            .map(|(path, content)| (path.to_string(), content.to_string()))
            .collect()
    }

    fn patch(changes: Vec<FileChange>) -> Patch {
        Patch {
            summary: "change".to_string(),
            changes,
        }
    }

    fn reasons(result: &ValidationResult) -> Vec<String> {
        result.diagnostics.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn well_formed_batch_passes() {
        let existing = tree(&[("src/lib.rs", "pub mod a;\n"), ("src/a.rs", "")]);
        let batch = patch(vec![
            FileChange::write("src/lib.rs", "pub mod a;\npub mod b;\n"),
            FileChange::write("src/b.rs", "pub fn b() -> u8 { 1 }\n"),
            FileChange::write("Cargo.toml", "[package]\nname = \"x\"\n"),
        ]);
        let result = validate(&batch, &existing, &policy());
        assert!(result.passed, "{:?}", reasons(&result));
    }

    #[test]
    fn one_malformed_file_fails_the_whole_batch() {
        let batch = patch(vec![
            FileChange::write("ok.rs", "fn ok() {}\n"),
            FileChange::write("data.json", "{\"a\": }"),
        ]);
        let result = validate(&batch, &tree(&[]), &policy());
        assert!(!result.passed);
        assert_eq!(result.diagnostics.len(), 1);
        assert_eq!(result.diagnostics[0].file, "data.json");
        assert!(result.diagnostics[0].reason.starts_with("invalid JSON"));
    }

    #[test]
    fn new_reference_must_resolve() {
        let existing = tree(&[("src/main.rs", "fn main() {}\n")]);
        let batch = patch(vec![FileChange::write("src/main.rs", "mod missing;\nfn main() {}\n")]);
        let result = validate(&batch, &existing, &policy());
        assert_eq!(reasons(&result), vec!["src/main.rs: unresolved reference `mod missing;`"]);
    }

    #[test]
    fn reference_to_file_deleted_in_batch_fails() {
        let existing = tree(&[("docs/a.md", "see [b](b.md)\n"), ("docs/b.md", "b\n"), ("docs/c.md", "")]);
        let batch = patch(vec![
            FileChange::write("docs/c.md", "[b](b.md)\n"),
            FileChange::delete("docs/b.md"),
        ]);
        let result = validate(&batch, &existing, &policy());
        assert_eq!(reasons(&result), vec!["docs/c.md: unresolved reference `b.md`"]);
    }

    #[test]
    fn preexisting_references_are_not_rechecked() {
        let existing = tree(&[("README.md", "[gone](gone.md)\n")]);
        let batch = patch(vec![FileChange::write("README.md", "[gone](gone.md)\nmore text\n")]);
        assert!(validate(&batch, &existing, &policy()).passed);
    }

    #[test]
    fn unsafe_and_excluded_paths_are_rejected() {
        let batch = patch(vec![
            FileChange::write("../escape.txt", "x"),
            FileChange::write(".git/config", "x"),
            FileChange::write("a.txt", "x"),
            FileChange::write("a.txt", "y"),
            FileChange::delete("never-existed.txt"),
        ]);
        let result = validate(&batch, &tree(&[]), &policy());
        let files: Vec<&str> = result.diagnostics.iter().map(|d| d.file.as_str()).collect();
        assert_eq!(files, vec!["../escape.txt", ".git/config", "a.txt", "never-existed.txt"]);
    }

    #[test]
    fn oversized_and_binary_content_is_rejected() {
        let big = "x".repeat(1_001);
        let batch = patch(vec![
            FileChange::write("big.txt", big),
            FileChange::write("bin.dat", "a\0b"),
        ]);
        let result = validate(&batch, &tree(&[]), &policy());
        assert_eq!(result.diagnostics.len(), 2);
    }

    #[test]
    fn empty_batch_passes() {
        assert!(validate(&patch(Vec::new()), &tree(&[]), &policy()).passed);
    }
}
