//! Parsing of planning-collaborator replies into task descriptions.

use serde_json::Value;

/// Parse a planning reply into task descriptions.
///
/// A JSON array of strings is taken as-is. Anything else is read line by
/// line, stripping bullet and numbering prefixes. Blank results are dropped.
pub fn parse_plan(reply: &str) -> Vec<String> {
    let trimmed = reply.trim();
    if let Ok(Value::Array(items)) = serde_json::from_str::<Value>(trimmed) {
        return items
            .iter()
            .filter_map(|item| item.as_str())
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();
    }

    trimmed
        .lines()
        .map(strip_bullet)
        .filter(|line| !line.is_empty() && !line.starts_with("```"))
        .map(str::to_string)
        .collect()
}

fn strip_bullet(line: &str) -> &str {
    line.trim()
        .trim_start_matches(|c: char| c.is_ascii_digit() || matches!(c, '-' | '*' | '•' | '.' | ')'))
        .trim()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_array_reply() {
        let tasks = parse_plan(r#"["Add a README", "  ", "Write tests"]"#);
        assert_eq!(tasks, vec!["Add a README", "Write tests"]);
    }

    #[test]
    fn bullet_list_reply() {
        let tasks = parse_plan("1. Add logging\n- Split parser module\n\n* Remove dead code\n");
        assert_eq!(
            tasks,
            vec!["Add logging", "Split parser module", "Remove dead code"]
        );
    }

    #[test]
    fn empty_reply_yields_no_tasks() {
        assert!(parse_plan("   \n ").is_empty());
    }
}
