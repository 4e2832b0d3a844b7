//! Which paths of the live tree are tracked.
//!
//! Exclusions come from configuration only. An entry without a slash matches
//! any path component with that name (`target` excludes `target/` at every
//! depth); an entry with a slash matches a relative path prefix
//! (`docs/generated` excludes that directory only).

use std::path::{Component, Path};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tracking {
    exclude: Vec<String>,
}

impl Tracking {
    pub fn new<S: AsRef<str>>(exclude: &[S]) -> Self {
        Self {
            exclude: exclude
                .iter()
                .map(|e| e.as_ref().trim().trim_matches('/').to_string())
                .filter(|e| !e.is_empty())
                .collect(),
        }
    }

    /// True if the slash-separated relative path is excluded from tracking.
    pub fn is_excluded(&self, rel_path: &str) -> bool {
        let rel_path = rel_path.trim_start_matches("./");
        self.exclude.iter().any(|entry| {
            if entry.contains('/') {
                rel_path == entry || rel_path.starts_with(&format!("{entry}/"))
            } else {
                rel_path.split('/').any(|segment| segment == entry)
            }
        })
    }

    pub fn is_tracked(&self, rel_path: &str) -> bool {
        !self.is_excluded(rel_path)
    }
}

/// Convert a filesystem-relative path into the canonical slash-separated form
/// used in manifests and patches. Returns `None` for paths that escape the root.
pub fn to_rel_string(path: &Path) -> Option<String> {
    let mut parts = Vec::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => parts.push(part.to_str()?.to_string()),
            Component::CurDir => {}
            _ => return None,
        }
    }
    if parts.is_empty() {
        return None;
    }
    Some(parts.join("/"))
}

/// Check a patch path: relative, normalized, slash-separated, no parent hops.
///
/// Returns a human-readable reason on failure.
pub fn check_patch_path(path: &str) -> Result<(), String> {
    if path.is_empty() {
        return Err("empty path".to_string());
    }
    if path.starts_with('/') || path.contains('\\') || has_drive_prefix(path) {
        return Err("path must be relative and use '/' separators".to_string());
    }
    for segment in path.split('/') {
        match segment {
            "" => return Err("path contains an empty segment".to_string()),
            "." | ".." => return Err(format!("path segment '{segment}' is not allowed")),
            _ => {}
        }
    }
    Ok(())
}

fn has_drive_prefix(path: &str) -> bool {
    let bytes = path.as_bytes();
    bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':'
}
