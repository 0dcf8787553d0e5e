//! Task request: the input to a resolution.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;

/// A single routing request, created per-call and never persisted beyond
/// its audit entry.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct TaskRequest {
    /// The user's task description
    pub raw_text: String,
    /// Pre-classified metadata (e.g. {"domain": "devops"}) that
    /// short-circuits matching at a given level
    #[serde(default)]
    pub hints: HashMap<String, String>,
}

impl TaskRequest {
    pub fn new(raw_text: &str) -> Self {
        Self {
            raw_text: raw_text.to_string(),
            hints: HashMap::new(),
        }
    }

    pub fn with_hint(mut self, key: &str, value: &str) -> Self {
        self.hints.insert(key.to_string(), value.to_string());
        self
    }

    /// SHA-256 hex digest of the raw text. Audit entries store this instead
    /// of the text itself to avoid unbounded retention of request content.
    pub fn digest(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.raw_text.as_bytes());
        format!("{:x}", hasher.finalize())
    }
}
