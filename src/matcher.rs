//! Pure scoring of a skill node against a task request.
//!
//! Deterministic and side-effect-free: the same `(node, request)` pair
//! always yields the same score, which is what makes audit logs
//! reproducible and resolutions safe to run concurrently.

use crate::registry::SkillNode;
use crate::request::TaskRequest;
use serde::Serialize;

/// Result of scoring one node against one request
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MatchScore {
    /// Sum of matched trigger weights
    pub raw: u32,
    /// raw / total trigger weight, in [0,1]; 0.0 for trigger-less nodes
    pub normalized: f64,
}

impl MatchScore {
    pub const ZERO: MatchScore = MatchScore {
        raw: 0,
        normalized: 0.0,
    };
}

/// Swappable scoring contract. Implementations must be stateless.
pub trait Matcher: Send + Sync {
    fn score(&self, node: &SkillNode, request: &TaskRequest) -> MatchScore;
}

/// Default matcher: declared triggers plus hint short-circuits.
#[derive(Debug, Clone, Copy, Default)]
pub struct TriggerMatcher;

impl Matcher for TriggerMatcher {
    fn score(&self, node: &SkillNode, request: &TaskRequest) -> MatchScore {
        // A hint hit forces a certain match, but never onto a non-invocable
        // leaf: delegation has to continue through an orchestrator rather
        // than end on a node the user may not target directly.
        let hint_hit = node
            .hints
            .iter()
            .any(|(k, v)| request.hints.get(k) == Some(v));
        if hint_hit && (node.user_invocable || !node.children.is_empty()) {
            return MatchScore {
                raw: node.total_weight().max(1),
                normalized: 1.0,
            };
        }

        let total = node.total_weight();
        if total == 0 {
            // Pure fallback nodes never win on score alone
            return MatchScore::ZERO;
        }

        let raw: u32 = node
            .triggers
            .iter()
            .filter(|t| t.matches(&request.raw_text))
            .map(|t| t.weight)
            .sum();

        MatchScore {
            raw,
            normalized: raw as f64 / total as f64,
        }
    }
}
