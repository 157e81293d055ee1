//! robots.txt merging.
//!
//! The root discovery file is line oriented and only ever grows: links
//! already present are struck from the target set before the rest are
//! appended as `Sitemap:` directives.

use std::collections::BTreeSet;

const DIRECTIVE: &str = "Sitemap:";

/// Result of merging index links into a robots.txt body.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RobotsMerge {
    pub content: String,
    /// Links that were not present before, in input order.
    pub appended: Vec<String>,
}

/// Links referenced by `Sitemap:` lines in `content`.
pub fn sitemap_links(content: &str) -> BTreeSet<String> {
    content
        .lines()
        .filter_map(|line| {
            let line = line.trim();
            let head = line.get(..DIRECTIVE.len())?;
            if !head.eq_ignore_ascii_case(DIRECTIVE) {
                return None;
            }
            line[DIRECTIVE.len()..]
                .split_whitespace()
                .last()
                .map(str::to_string)
        })
        .collect()
}

/// Append a `Sitemap:` line for every link not already referenced.
pub fn merge(existing: &str, links: &[String]) -> RobotsMerge {
    let present = sitemap_links(existing);
    let mut seen = BTreeSet::new();
    let appended: Vec<String> = links
        .iter()
        .filter(|link| !present.contains(*link) && seen.insert(link.to_string()))
        .cloned()
        .collect();

    let mut lines: Vec<&str> = existing.lines().collect();
    // Drop trailing blank lines so appended directives stay contiguous.
    while lines.last().is_some_and(|l| l.trim().is_empty()) {
        lines.pop();
    }
    let mut content = lines.join("\n");
    for link in &appended {
        if !content.is_empty() {
            content.push('\n');
        }
        content.push_str(DIRECTIVE);
        content.push(' ');
        content.push_str(link);
    }

    RobotsMerge { content, appended }
}

/// Initial robots.txt written at bootstrap when none exists.
pub fn default_robots() -> String {
    "User-agent: *\nAllow: /".to_string()
}
