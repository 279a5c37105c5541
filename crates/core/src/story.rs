// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! User stories owned by an execution.

use crate::execution::{ExecutionId, Priority};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

crate::define_id! {
    /// Unique identifier for a user story.
    pub struct StoryId;
}

/// Per-acceptance-criterion evidence recorded by the agent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AcEvidence {
    #[serde(default)]
    pub passes: bool,
    #[serde(default)]
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evidence: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blocked_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_steps: Option<String>,
}

/// A named sub-goal of an execution with its acceptance criteria.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserStory {
    pub story_id: StoryId,
    pub execution_id: ExecutionId,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub acceptance_criteria: Vec<String>,
    #[serde(default)]
    pub priority: Priority,
    /// True once every acceptance criterion is satisfied
    #[serde(default)]
    pub passes: bool,
    /// Keyed by acceptance-criterion label (e.g. "ac-1")
    #[serde(default)]
    pub ac_evidence: HashMap<String, AcEvidence>,
}

impl UserStory {
    pub fn new(
        story_id: impl Into<StoryId>,
        execution_id: impl Into<ExecutionId>,
        title: impl Into<String>,
    ) -> Self {
        Self {
            story_id: story_id.into(),
            execution_id: execution_id.into(),
            title: title.into(),
            description: String::new(),
            acceptance_criteria: Vec::new(),
            priority: Priority::default(),
            passes: false,
            ac_evidence: HashMap::new(),
        }
    }
}
