//! Greedy top-down resolution of a request to a terminal handler.

use crate::matcher::Matcher;
use crate::registry::{CapabilityRegistry, SkillNode};
use crate::request::TaskRequest;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Fixed per-step score contributed by a fallback selection. Keeps a single
/// fallback from zeroing out confidence while several still compound
/// multiplicatively.
pub const FALLBACK_SCORE: f64 = 0.3;

/// Tunable resolution policy
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ResolverPolicy {
    /// Second-best children within this margin of the top score are
    /// recorded as alternatives
    #[serde(default = "default_ambiguity_margin")]
    pub ambiguity_margin: f64,
    /// Hard bound on path depth; guards termination even if registration
    /// validation was bypassed
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,
    /// Cap on recorded alternatives
    #[serde(default = "default_max_alternatives")]
    pub max_alternatives: usize,
    /// When no trigger matches at a level and no child is marked as the
    /// default fallback, fall back to the first-registered child instead
    /// of returning NoMatch
    #[serde(default = "default_true")]
    pub fallback_to_first: bool,
}

fn default_ambiguity_margin() -> f64 {
    0.05
}
fn default_max_depth() -> usize {
    6
}
fn default_max_alternatives() -> usize {
    3
}
fn default_true() -> bool {
    true
}

impl Default for ResolverPolicy {
    fn default() -> Self {
        Self {
            ambiguity_margin: default_ambiguity_margin(),
            max_depth: default_max_depth(),
            max_alternatives: default_max_alternatives(),
            fallback_to_first: default_true(),
        }
    }
}

/// A sibling that nearly won at some step of the walk
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Alternative {
    pub id: String,
    pub score: f64,
    /// 1-based step at which this sibling competed
    pub depth: usize,
}

/// Output of walking the tree for one request
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Resolution {
    /// Node ids from root to the chosen terminal
    pub path: Vec<String>,
    /// Product of per-step normalized scores, in [0,1]
    pub confidence: f64,
    pub alternatives: Vec<Alternative>,
    pub terminal_handler_ref: Option<String>,
    /// How many steps were decided by fallback rather than a trigger match
    pub fallback_steps: u32,
}

/// Resolution-time errors; recoverable per-request. Both carry the partial
/// path walked so far, for diagnosing near-misses.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ResolveError {
    #[error("no skill matched the request (walked {})", path.join(" -> "))]
    NoMatch { path: Vec<String> },
    #[error("resolution exceeded max depth {max_depth} (walked {})", path.join(" -> "))]
    MaxDepthExceeded { path: Vec<String>, max_depth: usize },
}

impl ResolveError {
    pub fn path(&self) -> &[String] {
        match self {
            ResolveError::NoMatch { path } => path,
            ResolveError::MaxDepthExceeded { path, .. } => path,
        }
    }
}

/// Walk the registry from the root to a single terminal handler.
///
/// Deterministic: children are ranked by `(normalized score desc,
/// registration order asc)`, so repeated calls with the same inputs return
/// identical resolutions.
pub fn resolve(
    registry: &CapabilityRegistry,
    matcher: &dyn Matcher,
    request: &TaskRequest,
    policy: &ResolverPolicy,
) -> Result<Resolution, ResolveError> {
    let mut current = registry.root();
    let mut path = vec![current.id.clone()];
    let mut confidence = 1.0;
    let mut alternatives = Vec::new();
    let mut fallback_steps = 0u32;
    let mut depth = 0usize;

    while !current.children.is_empty() {
        depth += 1;
        if depth > policy.max_depth {
            return Err(ResolveError::MaxDepthExceeded {
                path,
                max_depth: policy.max_depth,
            });
        }

        let children = registry.children_of(&current.id);

        let mut scored: Vec<(usize, &SkillNode, f64)> = children
            .iter()
            .enumerate()
            .map(|(i, c)| (i, *c, matcher.score(c, request).normalized))
            .collect();
        scored.sort_by(|a, b| {
            b.2.partial_cmp(&a.2)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.0.cmp(&b.0))
        });

        let (_, top, top_score) = scored[0];
        if top_score == 0.0 {
            // Nothing matched at this level. A trigger-less only child is
            // structural delegation, not a guess: it contributes a full step.
            if children.len() == 1 && children[0].total_weight() == 0 {
                current = children[0];
                path.push(current.id.clone());
                continue;
            }
            // Otherwise the fallback policy decides: the explicitly marked
            // child, else the first-registered one when the policy allows it
            let pick = children
                .iter()
                .find(|c| c.default_fallback)
                .copied()
                .or(if policy.fallback_to_first {
                    Some(children[0])
                } else {
                    None
                });
            let Some(pick) = pick else {
                return Err(ResolveError::NoMatch { path });
            };
            confidence *= FALLBACK_SCORE;
            fallback_steps += 1;
            current = pick;
            path.push(current.id.clone());
            continue;
        }

        if let Some(&(_, second, second_score)) = scored.get(1) {
            if second_score > 0.0
                && top_score - second_score <= policy.ambiguity_margin
                && alternatives.len() < policy.max_alternatives
            {
                alternatives.push(Alternative {
                    id: second.id.clone(),
                    score: second_score,
                    depth,
                });
            }
        }

        confidence *= top_score;
        current = top;
        path.push(current.id.clone());
    }

    // Terminal node; a leaf without a handler is a misconfiguration the
    // caller sees as NoMatch with the full path
    match &current.handler_ref {
        Some(handler_ref) => Ok(Resolution {
            path,
            confidence,
            alternatives,
            terminal_handler_ref: Some(handler_ref.clone()),
            fallback_steps,
        }),
        None => Err(ResolveError::NoMatch { path }),
    }
}
