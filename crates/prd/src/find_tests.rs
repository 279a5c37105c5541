// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use std::fs;
use tempfile::TempDir;

fn write(path: &Path, content: &str) {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, content).unwrap();
}

#[test]
fn finds_sibling_by_filename_stem() {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path();
    let dependent = root.join("prds/login.md");
    write(&dependent, "# Login\n");
    write(&root.join("prds/auth-core.md"), "# Auth\n");

    let found = find_dependency_prd("ralph/auth-core", &dependent, root);
    assert_eq!(found, Some(root.join("prds/auth-core.md")));
}

#[test]
fn finds_in_tasks_directory() {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path();
    let dependent = root.join("prds/login.md");
    write(&dependent, "# Login\n");
    write(&root.join("tasks/session-store.json"), "{}");

    let found = find_dependency_prd("session-store", &dependent, root);
    assert_eq!(found, Some(root.join("tasks/session-store.json")));
}

#[test]
fn falls_back_to_front_matter_branch_match() {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path();
    let dependent = root.join("prds/login.md");
    write(&dependent, "# Login\n");
    write(
        &root.join("prds/0001-auth.md"),
        "---\nbranch: ralph/auth-core\n---\n",
    );

    let found = find_dependency_prd("ralph/auth-core", &dependent, root);
    assert_eq!(found, Some(root.join("prds/0001-auth.md")));
}

#[test]
fn matches_front_matter_id() {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path();
    let dependent = root.join("prds/login.md");
    write(&dependent, "# Login\n");
    write(&root.join("prds/0002-sessions.md"), "---\nid: prd-9\n---\n");

    let found = find_dependency_prd("prd-9", &dependent, root);
    assert_eq!(found, Some(root.join("prds/0002-sessions.md")));
}

#[test]
fn missing_dependency_returns_none() {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path();
    let dependent = root.join("prds/login.md");
    write(&dependent, "# Login\n");

    assert_eq!(find_dependency_prd("ralph/ghost", &dependent, root), None);
}

#[test]
fn declared_complete_requires_completed_status() {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path();
    let dependent = root.join("prds/login.md");
    write(&dependent, "# Login\n");
    write(
        &root.join("prds/auth-core.md"),
        "---\nstatus: completed\n---\n",
    );
    write(
        &root.join("prds/session-store.md"),
        "---\nstatus: in_progress\n---\n",
    );

    assert!(dependency_declared_complete(
        "ralph/auth-core",
        &dependent,
        root
    ));
    assert!(!dependency_declared_complete(
        "ralph/session-store",
        &dependent,
        root
    ));
}

#[test]
fn unparseable_dependency_counts_as_pending() {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path();
    let dependent = root.join("prds/login.md");
    write(&dependent, "# Login\n");
    write(&root.join("prds/broken.json"), "{not json");

    assert!(!dependency_declared_complete("broken", &dependent, root));
}
