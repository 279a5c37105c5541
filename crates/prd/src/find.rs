// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! PRD file discovery for dependency resolution.
//!
//! A dependency identifier may match a PRD by filename stem, front-matter
//! `branch`/`branch_name`, or front-matter `id`. Discovery looks at the
//! siblings of the dependent PRD and at `tasks/` under the project root.

use crate::parser::parse_prd;
use std::path::{Path, PathBuf};
use tracing::debug;

const PRD_EXTENSIONS: [&str; 2] = ["md", "json"];

/// Last path segment of a dependency identifier ("ralph/login" → "login").
fn dependency_slug(dependency: &str) -> &str {
    dependency.rsplit('/').next().unwrap_or(dependency)
}

/// Locate the PRD file a dependency identifier refers to.
///
/// Checks, in order: `<slug>.md|.json` next to the dependent PRD and under
/// `<project_root>/tasks/`, then every PRD in those directories whose
/// front-matter branch or id matches. Returns the first hit.
pub fn find_dependency_prd(
    dependency: &str,
    dependent_prd: &Path,
    project_root: &Path,
) -> Option<PathBuf> {
    let slug = dependency_slug(dependency);
    let mut dirs: Vec<PathBuf> = Vec::new();
    if let Some(parent) = dependent_prd.parent() {
        dirs.push(parent.to_path_buf());
    }
    dirs.push(project_root.join("tasks"));

    // Fast path: filename stem match
    for dir in &dirs {
        for ext in PRD_EXTENSIONS {
            let candidate = dir.join(format!("{slug}.{ext}"));
            if candidate.is_file() {
                return Some(candidate);
            }
        }
    }

    // Slow path: front-matter match over directory contents
    for dir in &dirs {
        let entries = match std::fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(_) => continue,
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path == dependent_prd || !is_prd_file(&path) {
                continue;
            }
            match parse_prd(&path) {
                Ok(prd) if prd.matches_dependency(dependency) => return Some(path),
                Ok(_) => {}
                Err(e) => {
                    debug!(path = %path.display(), error = %e, "skipping unparseable PRD");
                }
            }
        }
    }

    None
}

/// Whether a dependency's PRD file declares `status: completed`.
///
/// Missing files and parse failures count as "not complete" — dependency
/// errors are treated as still-pending, never as hard failures.
pub fn dependency_declared_complete(
    dependency: &str,
    dependent_prd: &Path,
    project_root: &Path,
) -> bool {
    let Some(path) = find_dependency_prd(dependency, dependent_prd, project_root) else {
        return false;
    };
    match parse_prd(&path) {
        Ok(prd) => prd.is_completed(),
        Err(e) => {
            debug!(path = %path.display(), error = %e, "dependency PRD unparseable, treating as pending");
            false
        }
    }
}

fn is_prd_file(path: &Path) -> bool {
    path.is_file()
        && path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|ext| PRD_EXTENSIONS.contains(&ext))
}

#[cfg(test)]
#[path = "find_tests.rs"]
mod tests;
