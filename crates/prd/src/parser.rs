// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! PRD parsing (markdown with YAML front-matter, and JSON)

use ralph_core::Priority;
use serde::Deserialize;
use std::path::Path;
use thiserror::Error;

/// PRD file format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Markdown,
    Json,
}

impl Format {
    /// Pick a format from a file extension, defaulting to markdown.
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Format::Json,
            _ => Format::Markdown,
        }
    }
}

/// Errors that can occur during PRD parsing
#[derive(Debug, Error)]
pub enum PrdError {
    #[error("IO error reading {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("front-matter parse error: {0}")]
    FrontMatter(#[from] serde_yaml::Error),

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid PRD {location}: {message}")]
    InvalidFormat { location: String, message: String },
}

/// Front-matter keys honored on markdown PRDs.
#[derive(Debug, Default, Deserialize)]
struct FrontMatter {
    #[serde(default, alias = "branchName", alias = "branch_name")]
    branch: Option<String>,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    priority: Option<String>,
    #[serde(default)]
    dependencies: Vec<String>,
}

/// JSON PRD document shape.
#[derive(Debug, Deserialize)]
struct JsonPrd {
    #[serde(default, alias = "branchName", alias = "branch_name")]
    branch: Option<String>,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    priority: Option<String>,
    #[serde(default)]
    dependencies: Vec<String>,
    #[serde(default, alias = "userStories", alias = "user_stories")]
    stories: Vec<JsonStory>,
}

#[derive(Debug, Deserialize)]
struct JsonStory {
    title: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default, alias = "acceptanceCriteria", alias = "acceptance_criteria")]
    acceptance_criteria: Vec<String>,
    #[serde(default)]
    priority: Option<String>,
}

/// A user story extracted from a PRD.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedStory {
    pub title: String,
    pub description: String,
    pub acceptance_criteria: Vec<String>,
    pub priority: Priority,
}

/// A parsed PRD, ready for insertion as an execution record.
#[derive(Debug, Clone)]
pub struct ParsedPrd {
    /// Branch the work lands on (front-matter, or derived from the filename)
    pub branch_name: String,
    pub id: Option<String>,
    /// Front-matter `status` (e.g. "completed"), used by dependency resolution
    pub status: Option<String>,
    pub description: String,
    pub priority: Priority,
    pub dependencies: Vec<String>,
    pub user_stories: Vec<ParsedStory>,
}

impl ParsedPrd {
    /// Whether this PRD declares itself finished.
    pub fn is_completed(&self) -> bool {
        self.status
            .as_deref()
            .is_some_and(|s| s.eq_ignore_ascii_case("completed"))
    }

    /// Identifiers this PRD answers to when named as a dependency:
    /// the branch, the front-matter id, and the file stem (handled by the
    /// caller, which knows the path).
    pub fn matches_dependency(&self, dependency: &str) -> bool {
        self.branch_name == dependency || self.id.as_deref() == Some(dependency)
    }
}

/// Parse a PRD file, picking the format from the extension.
pub fn parse_prd(path: &Path) -> Result<ParsedPrd, PrdError> {
    let content = std::fs::read_to_string(path).map_err(|source| PrdError::Io {
        path: path.display().to_string(),
        source,
    })?;
    parse_prd_str(&content, path)
}

/// Parse PRD content. The path supplies the fallback branch name
/// (`ralph/<file-stem>`) when no front-matter branch is declared.
pub fn parse_prd_str(content: &str, path: &Path) -> Result<ParsedPrd, PrdError> {
    match Format::from_path(path) {
        Format::Json => parse_json(content, path),
        Format::Markdown => parse_markdown(content, path),
    }
}

fn fallback_branch(path: &Path) -> String {
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("unnamed");
    format!("ralph/{stem}")
}

fn parse_json(content: &str, path: &Path) -> Result<ParsedPrd, PrdError> {
    let doc: JsonPrd = serde_json::from_str(content)?;
    Ok(ParsedPrd {
        branch_name: doc.branch.unwrap_or_else(|| fallback_branch(path)),
        id: doc.id,
        status: doc.status,
        description: doc.description.unwrap_or_default(),
        priority: doc
            .priority
            .as_deref()
            .map(Priority::parse_lossy)
            .unwrap_or_default(),
        dependencies: doc.dependencies,
        user_stories: doc
            .stories
            .into_iter()
            .map(|s| ParsedStory {
                title: s.title,
                description: s.description.unwrap_or_default(),
                acceptance_criteria: s.acceptance_criteria,
                priority: s
                    .priority
                    .as_deref()
                    .map(Priority::parse_lossy)
                    .unwrap_or_default(),
            })
            .collect(),
    })
}

fn parse_markdown(content: &str, path: &Path) -> Result<ParsedPrd, PrdError> {
    let (front, body) = split_front_matter(content);
    let front: FrontMatter = match front {
        // An empty fence pair deserializes as YAML null, not a mapping
        Some(raw) if !raw.trim().is_empty() => serde_yaml::from_str(raw)?,
        _ => FrontMatter::default(),
    };

    Ok(ParsedPrd {
        branch_name: front.branch.unwrap_or_else(|| fallback_branch(path)),
        id: front.id,
        status: front.status,
        description: extract_description(body),
        priority: front
            .priority
            .as_deref()
            .map(Priority::parse_lossy)
            .unwrap_or_default(),
        dependencies: front.dependencies,
        user_stories: extract_stories(body),
    })
}

/// Split `---`-delimited YAML front-matter from the markdown body.
///
/// Returns `(front_matter, body)`; front_matter is `None` when the file
/// does not open with a `---` fence.
fn split_front_matter(content: &str) -> (Option<&str>, &str) {
    let rest = match content.strip_prefix("---") {
        Some(r) => r,
        None => return (None, content),
    };
    // The opening fence must be a full line
    let rest = match rest.strip_prefix('\n').or_else(|| rest.strip_prefix("\r\n")) {
        Some(r) => r,
        None => return (None, content),
    };

    // Find the closing fence on its own line
    let mut offset = 0usize;
    for line in rest.split_inclusive('\n') {
        if line.trim_end() == "---" {
            let front = &rest[..offset];
            let body = &rest[offset + line.len()..];
            return (Some(front), body);
        }
        offset += line.len();
    }

    (None, content)
}

/// First paragraph of prose after any leading heading.
fn extract_description(body: &str) -> String {
    let mut lines = Vec::new();
    for line in body.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            if lines.is_empty() {
                continue;
            }
            break;
        }
        if trimmed.starts_with('#') {
            if lines.is_empty() {
                continue;
            }
            break;
        }
        lines.push(trimmed);
    }
    lines.join(" ")
}

/// Extract `## Story: <title>` sections and their `- [ ]` checklist items.
fn extract_stories(body: &str) -> Vec<ParsedStory> {
    let mut stories: Vec<ParsedStory> = Vec::new();
    let mut current: Option<ParsedStory> = None;
    let mut description_lines: Vec<String> = Vec::new();

    let flush = |story: Option<ParsedStory>,
                 description_lines: &mut Vec<String>,
                 stories: &mut Vec<ParsedStory>| {
        if let Some(mut s) = story {
            s.description = description_lines.join(" ");
            description_lines.clear();
            stories.push(s);
        }
    };

    for line in body.lines() {
        let trimmed = line.trim();

        if let Some(title) = story_heading(trimmed) {
            flush(current.take(), &mut description_lines, &mut stories);
            current = Some(ParsedStory {
                title: title.to_string(),
                description: String::new(),
                acceptance_criteria: Vec::new(),
                priority: Priority::default(),
            });
            continue;
        }

        // A non-story heading ends the current story section
        if trimmed.starts_with('#') && current.is_some() {
            flush(current.take(), &mut description_lines, &mut stories);
            continue;
        }

        let Some(story) = current.as_mut() else {
            continue;
        };

        if let Some(item) = checklist_item(trimmed) {
            story.acceptance_criteria.push(item.to_string());
        } else if !trimmed.is_empty() && !trimmed.starts_with('#') {
            description_lines.push(trimmed.to_string());
        }
    }

    flush(current, &mut description_lines, &mut stories);
    stories
}

fn story_heading(line: &str) -> Option<&str> {
    let rest = line.trim_start_matches('#').trim_start();
    rest.strip_prefix("Story:").map(str::trim).filter(|t| {
        // Require an actual heading marker, not body text mentioning "Story:"
        line.starts_with('#') && !t.is_empty()
    })
}

fn checklist_item(line: &str) -> Option<&str> {
    line.strip_prefix("- [ ]")
        .or_else(|| line.strip_prefix("- [x]"))
        .or_else(|| line.strip_prefix("- [X]"))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

#[cfg(test)]
#[path = "parser_tests.rs"]
mod tests;
