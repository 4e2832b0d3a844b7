//! Prompt builder for the planning and patch collaborators.
//!
//! Templates mark sections with `<!-- section:KEY required|droppable -->`.
//! When the rendered prompt exceeds the byte budget, droppable sections are
//! shed in a fixed order and the last remaining section is truncated.

use std::sync::LazyLock;

use anyhow::{Context, Result};
use minijinja::{Environment, context};
use regex::Regex;
use serde::Serialize;
use tracing::debug;

use crate::core::types::Task;
use crate::core::validator::ExistingTree;

const PLAN_TEMPLATE: &str = include_str!("prompts/plan.md");
const PATCH_TEMPLATE: &str = include_str!("prompts/patch.md");

/// Droppable sections, least important first.
const DROP_ORDER: [&str; 5] = ["files", "tree", "memory", "stuck", "diagnostics"];

/// Per-file cap when gathering file contents for the patch prompt.
const FILE_EXCERPT_BYTES: usize = 16_000;

static SECTION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"<!--\s*section:(\w+)\s+(required|droppable)\s*-->").expect("section marker regex")
});

#[derive(Debug, Clone, Serialize)]
struct TaskContext {
    id: u64,
    description: String,
    attempts: u32,
}

impl From<&Task> for TaskContext {
    fn from(task: &Task) -> Self {
        Self {
            id: task.id,
            description: task.description.clone(),
            attempts: task.attempts,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileExcerpt {
    pub path: String,
    pub content: String,
}

/// Inputs for the planning prompt.
#[derive(Debug, Clone, Default)]
pub struct PlanInputs {
    pub goal: String,
    pub memory: Vec<String>,
    pub tree: Vec<String>,
    pub stuck: Vec<String>,
}

/// Inputs for the patch prompt.
#[derive(Debug, Clone)]
pub struct PatchInputs {
    pub goal: String,
    pub task: Task,
    pub scope_hint: Option<String>,
    pub diagnostics: Vec<String>,
    pub memory: Vec<String>,
    pub tree: Vec<String>,
    pub files: Vec<FileExcerpt>,
}

/// Builds prompts within a byte budget.
#[derive(Debug, Clone)]
pub struct PromptBuilder {
    budget_bytes: usize,
}

impl PromptBuilder {
    pub fn new(budget_bytes: usize) -> Self {
        Self { budget_bytes }
    }

    pub fn build_plan(&self, input: &PlanInputs) -> Result<String> {
        let rendered = render(
            "plan",
            PLAN_TEMPLATE,
            context! {
                goal => input.goal.trim(),
                memory => &input.memory,
                tree => &input.tree,
                stuck => &input.stuck,
            },
        )?;
        Ok(self.fit(&rendered))
    }

    pub fn build_patch(&self, input: &PatchInputs) -> Result<String> {
        let rendered = render(
            "patch",
            PATCH_TEMPLATE,
            context! {
                goal => input.goal.trim(),
                task => TaskContext::from(&input.task),
                scope_hint => input.scope_hint.as_deref().map(str::trim).filter(|s| !s.is_empty()),
                diagnostics => &input.diagnostics,
                memory => &input.memory,
                tree => &input.tree,
                files => &input.files,
            },
        )?;
        Ok(self.fit(&rendered))
    }

    fn fit(&self, rendered: &str) -> String {
        let mut sections = parse_sections(rendered);
        apply_budget(&mut sections, self.budget_bytes);
        sections
            .iter()
            .map(|s| s.content.as_str())
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

fn render(name: &str, source: &str, ctx: minijinja::Value) -> Result<String> {
    let mut env = Environment::new();
    env.add_template(name, source)
        .with_context(|| format!("compile {name} template"))?;
    env.get_template(name)?
        .render(ctx)
        .with_context(|| format!("render {name} template"))
}

/// Gather file excerpts from `tree`, files named in `focus` first, until
/// `budget_bytes` is used up.
pub fn gather_files<'a>(
    tree: &dyn ExistingTree,
    paths: impl IntoIterator<Item = &'a str>,
    focus: &str,
    budget_bytes: usize,
) -> Vec<FileExcerpt> {
    let (mut ordered, rest): (Vec<&str>, Vec<&str>) =
        paths.into_iter().partition(|path| focus.contains(*path));
    ordered.extend(rest);

    let mut used = 0usize;
    let mut files = Vec::new();
    for path in ordered {
        if used >= budget_bytes {
            break;
        }
        let Some(mut content) = tree.read(path) else {
            continue;
        };
        if content.len() > FILE_EXCERPT_BYTES {
            let mut cut = FILE_EXCERPT_BYTES;
            while !content.is_char_boundary(cut) {
                cut -= 1;
            }
            content.truncate(cut);
            content.push_str("\n[truncated]");
        }
        used += content.len();
        files.push(FileExcerpt {
            path: path.to_string(),
            content,
        });
    }
    files
}

#[derive(Debug, Clone)]
struct ParsedSection {
    key: String,
    required: bool,
    content: String,
}

fn parse_sections(rendered: &str) -> Vec<ParsedSection> {
    let markers: Vec<_> = SECTION_RE.captures_iter(rendered).collect();
    let mut sections = Vec::new();
    for (i, caps) in markers.iter().enumerate() {
        let (Some(whole), Some(key), Some(kind)) = (caps.get(0), caps.get(1), caps.get(2)) else {
            continue;
        };
        let end = markers
            .get(i + 1)
            .and_then(|next| next.get(0))
            .map_or(rendered.len(), |next| next.start());
        let content = rendered[whole.end()..end].trim().to_string();
        let required = kind.as_str() == "required";
        if !content.is_empty() || required {
            sections.push(ParsedSection {
                key: key.as_str().to_string(),
                required,
                content,
            });
        }
    }
    sections
}

fn apply_budget(sections: &mut Vec<ParsedSection>, budget: usize) {
    let total = |secs: &[ParsedSection]| -> usize { secs.iter().map(|s| s.content.len()).sum() };

    for key in DROP_ORDER {
        if total(sections) <= budget {
            return;
        }
        if let Some(idx) = sections.iter().position(|s| s.key == key && !s.required) {
            debug!(section = key, bytes_dropped = sections[idx].content.len(), "dropped section for budget");
            sections.remove(idx);
        }
    }

    if total(sections) <= budget {
        return;
    }
    let other: usize = sections
        .iter()
        .take(sections.len().saturating_sub(1))
        .map(|s| s.content.len())
        .sum();
    let allowed = budget.saturating_sub(other);
    if let Some(last) = sections.last_mut() {
        let marker = "\n[truncated]";
        let mut cut = allowed.saturating_sub(marker.len());
        while !last.content.is_char_boundary(cut) {
            cut -= 1;
        }
        last.content.truncate(cut);
        last.content.push_str(marker);
        debug!(section = last.key, after_len = last.content.len(), "truncated section for budget");
    }
}
