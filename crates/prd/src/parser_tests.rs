// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use ralph_core::Priority;
use std::path::PathBuf;
use yare::parameterized;

const FULL_PRD: &str = r#"---
branch: ralph/login-flow
id: prd-042
status: in_progress
priority: P0
dependencies:
  - ralph/auth-core
  - ralph/session-store
---

# Login flow

Users sign in with email and password and get a session cookie.

## Story: Email sign-in

The happy path for registered users.

- [ ] Valid credentials return a session cookie
- [ ] Invalid credentials return 401
- [x] Rate limiting kicks in after 5 failures

## Story: Password reset

- [ ] Reset email is sent

## Notes

Not part of any story.
"#;

#[test]
fn parses_front_matter_fields() {
    let prd = parse_prd_str(FULL_PRD, &PathBuf::from("/prds/login-flow.md")).unwrap();

    assert_eq!(prd.branch_name, "ralph/login-flow");
    assert_eq!(prd.id.as_deref(), Some("prd-042"));
    assert_eq!(prd.status.as_deref(), Some("in_progress"));
    assert_eq!(prd.priority, Priority::P0);
    assert_eq!(
        prd.dependencies,
        vec!["ralph/auth-core", "ralph/session-store"]
    );
}

#[test]
fn extracts_description_from_first_paragraph() {
    let prd = parse_prd_str(FULL_PRD, &PathBuf::from("/prds/login-flow.md")).unwrap();
    assert_eq!(
        prd.description,
        "Users sign in with email and password and get a session cookie."
    );
}

#[test]
fn extracts_stories_with_acceptance_criteria() {
    let prd = parse_prd_str(FULL_PRD, &PathBuf::from("/prds/login-flow.md")).unwrap();

    assert_eq!(prd.user_stories.len(), 2);
    let signin = &prd.user_stories[0];
    assert_eq!(signin.title, "Email sign-in");
    assert_eq!(signin.description, "The happy path for registered users.");
    assert_eq!(signin.acceptance_criteria.len(), 3);
    assert_eq!(
        signin.acceptance_criteria[0],
        "Valid credentials return a session cookie"
    );

    let reset = &prd.user_stories[1];
    assert_eq!(reset.title, "Password reset");
    assert_eq!(reset.acceptance_criteria, vec!["Reset email is sent"]);
}

#[test]
fn missing_front_matter_derives_branch_from_filename() {
    let prd = parse_prd_str("# Title\n\nBody.\n", &PathBuf::from("/prds/cache-layer.md")).unwrap();
    assert_eq!(prd.branch_name, "ralph/cache-layer");
    assert_eq!(prd.status, None);
    assert!(prd.dependencies.is_empty());
}

#[parameterized(
    branch_name_alias = { "branchName: ralph/alias-a" },
    snake_alias = { "branch_name: ralph/alias-a" },
    plain = { "branch: ralph/alias-a" },
)]
fn branch_front_matter_aliases(line: &str) {
    let content = format!("---\n{line}\n---\n\nBody.\n");
    let prd = parse_prd_str(&content, &PathBuf::from("/prds/x.md")).unwrap();
    assert_eq!(prd.branch_name, "ralph/alias-a");
}

#[test]
fn completed_status_is_case_insensitive() {
    let content = "---\nstatus: Completed\n---\n\nDone.\n";
    let prd = parse_prd_str(content, &PathBuf::from("/prds/x.md")).unwrap();
    assert!(prd.is_completed());
}

#[test]
fn matches_dependency_by_branch_and_id() {
    let content = "---\nbranch: ralph/feature\nid: prd-7\n---\n";
    let prd = parse_prd_str(content, &PathBuf::from("/prds/feature.md")).unwrap();
    assert!(prd.matches_dependency("ralph/feature"));
    assert!(prd.matches_dependency("prd-7"));
    assert!(!prd.matches_dependency("ralph/other"));
}

#[test]
fn json_prd_round_trips_aliases() {
    let content = r#"{
        "branchName": "ralph/json-feature",
        "status": "completed",
        "description": "From JSON",
        "priority": "P2",
        "dependencies": ["ralph/base"],
        "userStories": [
            {
                "title": "Parse input",
                "acceptanceCriteria": ["Accepts UTF-8"]
            }
        ]
    }"#;
    let prd = parse_prd_str(content, &PathBuf::from("/prds/feature.json")).unwrap();

    assert_eq!(prd.branch_name, "ralph/json-feature");
    assert!(prd.is_completed());
    assert_eq!(prd.priority, Priority::P2);
    assert_eq!(prd.user_stories.len(), 1);
    assert_eq!(
        prd.user_stories[0].acceptance_criteria,
        vec!["Accepts UTF-8"]
    );
}

#[test]
fn malformed_front_matter_is_an_error() {
    let content = "---\nbranch: [unterminated\n---\n";
    assert!(parse_prd_str(content, &PathBuf::from("/prds/x.md")).is_err());
}

#[test]
fn unclosed_front_matter_fence_treated_as_body() {
    let content = "---\nbranch: ralph/x\n\nNo closing fence.\n";
    let prd = parse_prd_str(content, &PathBuf::from("/prds/fenceless.md")).unwrap();
    assert_eq!(prd.branch_name, "ralph/fenceless");
}
