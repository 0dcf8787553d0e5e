//! Capability registry: owns the skill tree and its structural invariants.
//!
//! The registry is built once at startup (from the declarative skill source
//! or programmatic registration) and treated as read-only afterwards, so
//! concurrent resolutions never need a lock on it.

pub mod loader;
pub mod node;

pub use loader::{load_tree, LoadedTree};
pub use node::{SkillNode, Trigger, TriggerKind};

use std::collections::{HashMap, HashSet, VecDeque};
use thiserror::Error;

/// Id of the implicit root orchestrator
pub const ROOT_ID: &str = "root";

/// Configuration-time errors; all fatal at startup
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("duplicate skill id: {id}")]
    DuplicateId { id: String },
    #[error("skill {id} is already attached under {existing_parent}")]
    DuplicateChild { id: String, existing_parent: String },
    #[error("unknown parent {parent} for skill {id}")]
    UnknownParent { id: String, parent: String },
    #[error("registering {id} under {parent} would create a cycle")]
    Cycle { id: String, parent: String },
    #[error("skill {id} is unreachable from the root")]
    OrphanNode { id: String },
    #[error("skill {id} has no handler_ref and no children")]
    DeadEnd { id: String },
    #[error("skill {id} has an invalid trigger: {reason}")]
    InvalidTrigger { id: String, reason: String },
}

/// In-memory tree of skill nodes keyed by id
#[derive(Debug)]
pub struct CapabilityRegistry {
    nodes: HashMap<String, SkillNode>,
    parents: HashMap<String, String>,
    /// Ids in registration order, for deterministic validation output
    order: Vec<String>,
}

impl CapabilityRegistry {
    /// Create a registry with an empty root orchestrator
    pub fn new() -> Self {
        let root = SkillNode::new(ROOT_ID, "root", "top-level orchestrator").not_invocable();
        let mut nodes = HashMap::new();
        nodes.insert(root.id.clone(), root);
        Self {
            nodes,
            parents: HashMap::new(),
            order: vec![ROOT_ID.to_string()],
        }
    }

    /// Register a node under the given parent (root when `None`).
    ///
    /// `node.children` must be empty: the child list is maintained by the
    /// registry as children register themselves, so that registration order
    /// is the tie-break order.
    pub fn register(
        &mut self,
        mut node: SkillNode,
        parent_id: Option<&str>,
    ) -> Result<(), RegistryError> {
        let parent = parent_id.unwrap_or(ROOT_ID).to_string();

        if self.nodes.contains_key(&node.id) {
            return Err(match self.parents.get(&node.id) {
                Some(existing) if *existing != parent => RegistryError::DuplicateChild {
                    id: node.id,
                    existing_parent: existing.clone(),
                },
                _ => RegistryError::DuplicateId { id: node.id },
            });
        }
        if !self.nodes.contains_key(&parent) {
            return Err(RegistryError::UnknownParent {
                id: node.id,
                parent,
            });
        }

        // Walk the ancestor chain of the parent; the new id must not appear
        let mut ancestor = Some(parent.as_str());
        while let Some(a) = ancestor {
            if a == node.id {
                return Err(RegistryError::Cycle {
                    id: node.id,
                    parent,
                });
            }
            ancestor = self.parents.get(a).map(|s| s.as_str());
        }

        for trigger in &mut node.triggers {
            trigger
                .compile()
                .map_err(|e| RegistryError::InvalidTrigger {
                    id: node.id.clone(),
                    reason: e.to_string(),
                })?;
        }
        node.children.clear();

        let id = node.id.clone();
        self.nodes
            .get_mut(&parent)
            .expect("parent existence checked above")
            .children
            .push(id.clone());
        self.parents.insert(id.clone(), parent);
        self.order.push(id.clone());
        self.nodes.insert(id, node);
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<&SkillNode> {
        self.nodes.get(id)
    }

    pub fn root(&self) -> &SkillNode {
        self.nodes.get(ROOT_ID).expect("root always present")
    }

    pub fn parent_of(&self, id: &str) -> Option<&str> {
        self.parents.get(id).map(|s| s.as_str())
    }

    /// Children of a node in registration order; empty for leaves
    pub fn children_of(&self, id: &str) -> Vec<&SkillNode> {
        self.nodes
            .get(id)
            .map(|n| {
                n.children
                    .iter()
                    .filter_map(|c| self.nodes.get(c))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Number of registered skills, excluding the implicit root
    pub fn len(&self) -> usize {
        self.nodes.len() - 1
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Depth-first walk in child order, yielding each node with its depth
    pub fn walk(&self) -> Vec<(&SkillNode, usize)> {
        let mut out = Vec::new();
        let mut stack: Vec<(&str, usize)> = self
            .root()
            .children
            .iter()
            .rev()
            .map(|c| (c.as_str(), 0))
            .collect();
        while let Some((id, depth)) = stack.pop() {
            if let Some(node) = self.nodes.get(id) {
                out.push((node, depth));
                for child in node.children.iter().rev() {
                    stack.push((child.as_str(), depth + 1));
                }
            }
        }
        out
    }

    /// Full-tree structural check, run once after bulk load.
    ///
    /// Deterministic: errors come out in registration order, so calling this
    /// twice on an unchanged registry yields the same list.
    pub fn validate(&self) -> Result<(), Vec<RegistryError>> {
        let mut errors = Vec::new();

        let mut reachable = HashSet::new();
        let mut queue = VecDeque::from([ROOT_ID]);
        while let Some(id) = queue.pop_front() {
            if !reachable.insert(id) {
                continue;
            }
            if let Some(node) = self.nodes.get(id) {
                for child in &node.children {
                    queue.push_back(child.as_str());
                }
            }
        }

        for id in &self.order {
            if id == ROOT_ID {
                continue;
            }
            let node = &self.nodes[id];
            if !reachable.contains(id.as_str()) {
                errors.push(RegistryError::OrphanNode { id: id.clone() });
            }
            if node.children.is_empty() && node.handler_ref.is_none() {
                errors.push(RegistryError::DeadEnd { id: id.clone() });
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

impl Default for CapabilityRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaf(id: &str) -> SkillNode {
        SkillNode::new(id, id, "a leaf").with_handler("doc:test")
    }

    #[test]
    fn test_register_and_lookup() {
        let mut reg = CapabilityRegistry::new();
        reg.register(SkillNode::new("devops", "DevOps", "infra"), None)
            .unwrap();
        reg.register(leaf("terraform"), Some("devops")).unwrap();

        assert_eq!(reg.len(), 2);
        assert_eq!(reg.parent_of("terraform"), Some("devops"));
        let children = reg.children_of("devops");
        assert_eq!(children.len(), 1);
        assert_eq!(children[0].id, "terraform");
    }

    #[test]
    fn test_children_keep_registration_order() {
        let mut reg = CapabilityRegistry::new();
        for id in ["beta", "alpha", "gamma"] {
            reg.register(leaf(id), None).unwrap();
        }
        let ids: Vec<&str> = reg
            .children_of(ROOT_ID)
            .iter()
            .map(|n| n.id.as_str())
            .collect();
        assert_eq!(ids, vec!["beta", "alpha", "gamma"]);
    }

    #[test]
    fn test_duplicate_id_rejected() {
        let mut reg = CapabilityRegistry::new();
        reg.register(leaf("devops"), None).unwrap();
        let err = reg.register(leaf("devops"), None).unwrap_err();
        assert_eq!(
            err,
            RegistryError::DuplicateId {
                id: "devops".to_string()
            }
        );
    }

    #[test]
    fn test_duplicate_child_rejected() {
        let mut reg = CapabilityRegistry::new();
        reg.register(SkillNode::new("a", "a", ""), None).unwrap();
        reg.register(SkillNode::new("b", "b", ""), None).unwrap();
        reg.register(leaf("shared"), Some("a")).unwrap();
        let err = reg.register(leaf("shared"), Some("b")).unwrap_err();
        assert_eq!(
            err,
            RegistryError::DuplicateChild {
                id: "shared".to_string(),
                existing_parent: "a".to_string()
            }
        );
    }

    #[test]
    fn test_unknown_parent_rejected() {
        let mut reg = CapabilityRegistry::new();
        let err = reg.register(leaf("x"), Some("missing")).unwrap_err();
        assert!(matches!(err, RegistryError::UnknownParent { .. }));
    }

    #[test]
    fn test_invalid_trigger_rejected() {
        let mut reg = CapabilityRegistry::new();
        let node = SkillNode::new("bad", "bad", "")
            .with_trigger(Trigger::new(TriggerKind::Regex, "([unclosed", 1));
        let err = reg.register(node, None).unwrap_err();
        assert!(matches!(err, RegistryError::InvalidTrigger { .. }));
    }

    #[test]
    fn test_validate_flags_dead_ends() {
        let mut reg = CapabilityRegistry::new();
        // Orchestrator with no children and no handler
        reg.register(SkillNode::new("empty", "empty", ""), None)
            .unwrap();
        let errors = reg.validate().unwrap_err();
        assert_eq!(
            errors,
            vec![RegistryError::DeadEnd {
                id: "empty".to_string()
            }]
        );
    }

    #[test]
    fn test_validate_is_idempotent() {
        let mut reg = CapabilityRegistry::new();
        reg.register(SkillNode::new("a", "a", ""), None).unwrap();
        reg.register(SkillNode::new("b", "b", ""), None).unwrap();
        let first = reg.validate().unwrap_err();
        let second = reg.validate().unwrap_err();
        assert_eq!(first, second);
    }

    #[test]
    fn test_walk_depth_first() {
        let mut reg = CapabilityRegistry::new();
        reg.register(SkillNode::new("a", "a", ""), None).unwrap();
        reg.register(leaf("a1"), Some("a")).unwrap();
        reg.register(leaf("b"), None).unwrap();
        let ids: Vec<(&str, usize)> = reg
            .walk()
            .iter()
            .map(|(n, d)| (n.id.as_str(), *d))
            .collect();
        assert_eq!(ids, vec![("a", 0), ("a1", 1), ("b", 0)]);
    }
}
