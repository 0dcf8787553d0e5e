//! Skill node and trigger types.

use anyhow::{Context, Result};
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// How a trigger pattern is tested against request text
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum TriggerKind {
    /// Case-insensitive substring
    Keyword,
    /// Compiled case-insensitive regex search
    Regex,
    /// Case-insensitive equality against the whole trimmed text
    ExactPhrase,
}

/// A pattern-and-weight rule used to score how well a skill matches a request
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Trigger {
    pub kind: TriggerKind,
    pub pattern: String,
    #[serde(default = "default_weight")]
    pub weight: u32,
    #[serde(skip)]
    compiled: Option<Regex>,
}

fn default_weight() -> u32 {
    1
}

impl Trigger {
    pub fn new(kind: TriggerKind, pattern: &str, weight: u32) -> Self {
        Self {
            kind,
            pattern: pattern.to_string(),
            weight,
            compiled: None,
        }
    }

    /// Compile the regex for `Regex` triggers. Must run before matching;
    /// the registry calls this at registration time so that scoring stays pure.
    pub fn compile(&mut self) -> Result<()> {
        if self.kind == TriggerKind::Regex && self.compiled.is_none() {
            let re = RegexBuilder::new(&self.pattern)
                .case_insensitive(true)
                .build()
                .with_context(|| format!("invalid trigger pattern: {}", self.pattern))?;
            self.compiled = Some(re);
        }
        Ok(())
    }

    /// Test this trigger against request text
    pub fn matches(&self, text: &str) -> bool {
        match self.kind {
            TriggerKind::Keyword => text.to_lowercase().contains(&self.pattern.to_lowercase()),
            TriggerKind::Regex => self
                .compiled
                .as_ref()
                .map(|re| re.is_match(text))
                .unwrap_or(false),
            TriggerKind::ExactPhrase => text.trim().eq_ignore_ascii_case(self.pattern.trim()),
        }
    }
}

/// A node in the capability tree: either an orchestrator (has children)
/// or an invokable leaf (has a handler_ref).
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SkillNode {
    /// Unique stable id, e.g. "faion-ml-engineer/faion-rag-engineer"
    pub id: String,
    pub display_name: String,
    pub description: String,
    /// Ordered triggers; empty means the node matches only as explicit fallback
    #[serde(default)]
    pub triggers: Vec<Trigger>,
    /// Child ids in registration order (first-registered wins score ties)
    #[serde(default)]
    pub children: Vec<String>,
    /// Opaque reference to an external handler; present on leaves and
    /// explicitly invokable internal nodes
    #[serde(default)]
    pub handler_ref: Option<String>,
    /// Nodes marked false are only reachable via parent delegation
    #[serde(default = "default_true")]
    pub user_invocable: bool,
    /// Selected when no trigger matches anything at this node's level
    #[serde(default)]
    pub default_fallback: bool,
    /// Reserved hint entries; a matching request hint short-circuits scoring
    #[serde(default)]
    pub hints: HashMap<String, String>,
}

fn default_true() -> bool {
    true
}

impl SkillNode {
    pub fn new(id: &str, display_name: &str, description: &str) -> Self {
        Self {
            id: id.to_string(),
            display_name: display_name.to_string(),
            description: description.to_string(),
            triggers: Vec::new(),
            children: Vec::new(),
            handler_ref: None,
            user_invocable: true,
            default_fallback: false,
            hints: HashMap::new(),
        }
    }

    /// Builder-style helpers for programmatic registration (tests, embedders)
    pub fn with_trigger(mut self, trigger: Trigger) -> Self {
        self.triggers.push(trigger);
        self
    }

    pub fn with_handler(mut self, handler_ref: &str) -> Self {
        self.handler_ref = Some(handler_ref.to_string());
        self
    }

    pub fn with_hint(mut self, key: &str, value: &str) -> Self {
        self.hints.insert(key.to_string(), value.to_string());
        self
    }

    pub fn fallback(mut self) -> Self {
        self.default_fallback = true;
        self
    }

    pub fn not_invocable(mut self) -> Self {
        self.user_invocable = false;
        self
    }

    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    /// Sum of all trigger weights; denominator for score normalization
    pub fn total_weight(&self) -> u32 {
        self.triggers.iter().map(|t| t.weight).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keyword_case_insensitive() {
        let t = Trigger::new(TriggerKind::Keyword, "Terraform", 10);
        assert!(t.matches("help me write a terraform module"));
        assert!(t.matches("TERRAFORM plan fails"));
        assert!(!t.matches("what's the weather"));
    }

    #[test]
    fn test_regex_requires_compile() {
        let mut t = Trigger::new(TriggerKind::Regex, r"docker(file)?", 5);
        // Uncompiled regex never matches
        assert!(!t.matches("write a Dockerfile"));
        t.compile().unwrap();
        assert!(t.matches("write a Dockerfile"));
        assert!(t.matches("docker compose up"));
        assert!(!t.matches("kubernetes"));
    }

    #[test]
    fn test_invalid_regex_rejected() {
        let mut t = Trigger::new(TriggerKind::Regex, "([unclosed", 1);
        assert!(t.compile().is_err());
    }

    #[test]
    fn test_exact_phrase() {
        let t = Trigger::new(TriggerKind::ExactPhrase, "deploy to staging", 3);
        assert!(t.matches("  Deploy To Staging  "));
        assert!(!t.matches("deploy to staging now"));
    }

    #[test]
    fn test_total_weight() {
        let node = SkillNode::new("devops", "DevOps", "infra work")
            .with_trigger(Trigger::new(TriggerKind::Keyword, "terraform", 10))
            .with_trigger(Trigger::new(TriggerKind::Keyword, "docker", 5));
        assert_eq!(node.total_weight(), 15);
    }
}
