//! Cross-file references that a staged file introduces.
//!
//! Only forms that name a file in the tree are recognized: Rust `mod x;`,
//! Python relative imports, relative JS/TS module specifiers and relative
//! Markdown links. A reference resolves when any of its candidate paths exists
//! in the post-patch view of the tree.

use std::collections::BTreeSet;
use std::sync::LazyLock;

use regex::Regex;

static RUST_MOD_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^\s*(?:pub(?:\([^)]*\))?\s+)?mod\s+([A-Za-z_][A-Za-z0-9_]*)\s*;")
        .expect("rust mod regex")
});

static PY_FROM_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^\s*from\s+(\.+)([A-Za-z_][A-Za-z0-9_.]*)?\s+import\s+([A-Za-z_][A-Za-z0-9_, ]*)")
        .expect("python import regex")
});

static JS_SPEC_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?:\bfrom\s*|\bimport\s*\(?\s*|\brequire\s*\(\s*)["'](\.{1,2}/[^"']*)["']"#)
        .expect("js specifier regex")
});

static MD_LINK_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[[^\]]*\]\(([^)\s]+)(?:\s+[^)]*)?\)").expect("markdown link regex"));

const JS_EXTENSIONS: &[&str] = &["ts", "tsx", "js", "jsx", "mjs", "cjs", "json"];

/// One cross-file reference found in a file.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct Reference {
    /// The reference as written, used for diagnostics and for diffing old vs new.
    pub written: String,
    /// Tree paths that would satisfy the reference. Empty when it escapes the root.
    pub candidates: Vec<String>,
}

/// Every recognized reference in `content`, which lives at tree path `path`.
pub fn references_in(path: &str, content: &str) -> Vec<Reference> {
    let dir = parent_dir(path);
    let mut refs = match extension(path) {
        "rs" => rust_mods(path, content),
        "py" => python_imports(dir, content),
        "js" | "jsx" | "ts" | "tsx" | "mjs" | "cjs" => js_specifiers(dir, content),
        "md" | "markdown" => markdown_links(dir, content),
        _ => Vec::new(),
    };
    refs.sort();
    refs.dedup();
    refs
}

/// References present in `new` but absent from `old`.
pub fn introduced_references(path: &str, old: Option<&str>, new: &str) -> Vec<Reference> {
    let existing: BTreeSet<String> = old
        .map(|old| {
            references_in(path, old)
                .into_iter()
                .map(|r| r.written)
                .collect()
        })
        .unwrap_or_default();
    references_in(path, new)
        .into_iter()
        .filter(|r| !existing.contains(&r.written))
        .collect()
}

fn rust_mods(path: &str, content: &str) -> Vec<Reference> {
    let file_name = path.rsplit('/').next().unwrap_or(path);
    let parent = parent_dir(path);
    // `lib.rs`, `main.rs` and `mod.rs` own their directory; `foo.rs` owns `foo/`.
    let module_dir = match file_name {
        "lib.rs" | "main.rs" | "mod.rs" => parent.to_string(),
        other => join(parent, other.trim_end_matches(".rs")),
    };
    RUST_MOD_RE
        .captures_iter(content)
        .map(|caps| {
            let name = &caps[1];
            Reference {
                written: format!("mod {name};"),
                candidates: vec![
                    join(&module_dir, &format!("{name}.rs")),
                    join(&module_dir, &format!("{name}/mod.rs")),
                ],
            }
        })
        .collect()
}

fn python_imports(dir: &str, content: &str) -> Vec<Reference> {
    let mut refs = Vec::new();
    for caps in PY_FROM_RE.captures_iter(content) {
        let dots = caps[1].len();
        let Some(base) = ascend(dir, dots - 1) else {
            refs.push(escaping(caps[0].trim()));
            continue;
        };
        match caps.get(2) {
            Some(module) => {
                let module_path = join(&base, &module.as_str().replace('.', "/"));
                refs.push(Reference {
                    written: format!("from {}{} import", &caps[1], module.as_str()),
                    candidates: python_candidates(&module_path),
                });
            }
            // `from . import a, b` names sibling modules (or package attributes).
            None => {
                for name in caps[3].split(',').map(str::trim).filter(|n| !n.is_empty()) {
                    let name = name.split_whitespace().next().unwrap_or(name);
                    let mut candidates = python_candidates(&join(&base, name));
                    candidates.push(join(&base, "__init__.py"));
                    refs.push(Reference {
                        written: format!("from {} import {name}", &caps[1]),
                        candidates,
                    });
                }
            }
        }
    }
    refs
}

fn python_candidates(module_path: &str) -> Vec<String> {
    vec![
        format!("{module_path}.py"),
        format!("{module_path}/__init__.py"),
    ]
}

fn js_specifiers(dir: &str, content: &str) -> Vec<Reference> {
    JS_SPEC_RE
        .captures_iter(content)
        .map(|caps| {
            let spec = &caps[1];
            let Some(target) = resolve(dir, spec) else {
                return escaping(spec);
            };
            let mut candidates = vec![target.clone()];
            candidates.extend(JS_EXTENSIONS.iter().map(|ext| format!("{target}.{ext}")));
            candidates.extend(
                JS_EXTENSIONS
                    .iter()
                    .take(4)
                    .map(|ext| format!("{target}/index.{ext}")),
            );
            Reference {
                written: spec.to_string(),
                candidates,
            }
        })
        .collect()
}

fn markdown_links(dir: &str, content: &str) -> Vec<Reference> {
    MD_LINK_RE
        .captures_iter(content)
        .filter_map(|caps| {
            let link = caps.get(1)?.as_str();
            if link.starts_with('#') || link.starts_with('/') || link.contains("://") || link.starts_with("mailto:") {
                return None;
            }
            let target = link.split(['#', '?']).next().unwrap_or(link);
            if target.is_empty() {
                return None;
            }
            Some(match resolve(dir, target) {
                Some(resolved) => Reference {
                    written: link.to_string(),
                    candidates: vec![resolved.trim_end_matches('/').to_string()],
                },
                None => escaping(link),
            })
        })
        .collect()
}

fn escaping(written: &str) -> Reference {
    Reference {
        written: written.to_string(),
        candidates: Vec::new(),
    }
}

fn extension(path: &str) -> &str {
    let file_name = path.rsplit('/').next().unwrap_or(path);
    file_name.rsplit_once('.').map(|(_, ext)| ext).unwrap_or("")
}

fn parent_dir(path: &str) -> &str {
    path.rsplit_once('/').map(|(dir, _)| dir).unwrap_or("")
}

fn join(dir: &str, rel: &str) -> String {
    if dir.is_empty() {
        rel.to_string()
    } else {
        format!("{dir}/{rel}")
    }
}

fn ascend(dir: &str, levels: usize) -> Option<String> {
    let mut parts: Vec<&str> = dir.split('/').filter(|p| !p.is_empty()).collect();
    for _ in 0..levels {
        parts.pop()?;
    }
    Some(parts.join("/"))
}

/// Lexically resolve `rel` against `dir`. `None` if it climbs above the root.
fn resolve(dir: &str, rel: &str) -> Option<String> {
    let mut parts: Vec<&str> = dir.split('/').filter(|p| !p.is_empty()).collect();
    for segment in rel.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                parts.pop()?;
            }
            other => parts.push(other),
        }
    }
    Some(parts.join("/"))
}
