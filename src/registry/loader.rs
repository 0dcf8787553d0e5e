//! Declarative registry source: a directory tree of SKILL.md files.
//!
//! One skill per directory, defined by a SKILL.md with YAML frontmatter
//! (name, description, user-invocable, triggers, hints, handler). A
//! subdirectory containing its own SKILL.md is a child of the enclosing
//! skill. Child registration order comes from the optional `children:` list
//! in the parent's frontmatter; unlisted directories are appended in
//! lexicographic order so the tree is deterministic either way.

use super::{CapabilityRegistry, SkillNode, Trigger};
use crate::dispatch::{DocHandler, InMemoryHandlers};
use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Validation constants
const MAX_NAME_LEN: usize = 64;
const MAX_DESCRIPTION_LEN: usize = 1024;

/// Parsed SKILL.md frontmatter
#[derive(Debug, Clone, Deserialize)]
pub struct SkillFrontmatter {
    pub name: String,
    pub description: String,
    #[serde(default, rename = "display-name")]
    pub display_name: Option<String>,
    #[serde(default = "default_true", rename = "user-invocable")]
    pub user_invocable: bool,
    #[serde(default, rename = "default-fallback")]
    pub default_fallback: bool,
    /// "doc" serves the SKILL.md body itself; any other value is an opaque
    /// reference into an external handler registry
    #[serde(default)]
    pub handler: Option<String>,
    #[serde(default)]
    pub hints: HashMap<String, String>,
    #[serde(default)]
    pub triggers: Vec<Trigger>,
    /// Explicit child ordering (names); the tie-break order for routing
    #[serde(default)]
    pub children: Vec<String>,
}

fn default_true() -> bool {
    true
}

/// Parse only the frontmatter from a SKILL.md file
pub fn parse_frontmatter(content: &str) -> Result<SkillFrontmatter> {
    let (yaml, _) = split_frontmatter(content)?;
    let frontmatter: SkillFrontmatter = serde_yaml::from_str(yaml)?;
    validate_name(&frontmatter.name)?;
    validate_description(&frontmatter.description)?;
    Ok(frontmatter)
}

/// Parse a complete SKILL.md: frontmatter plus the document body
pub fn parse_skill_md(content: &str) -> Result<(SkillFrontmatter, String)> {
    let frontmatter = parse_frontmatter(content)?;
    let (_, body) = split_frontmatter(content)?;
    Ok((frontmatter, body.trim().to_string()))
}

/// Split content into YAML frontmatter and body at the --- markers
fn split_frontmatter(content: &str) -> Result<(&str, &str)> {
    if !content.starts_with("---") {
        return Err(anyhow!("SKILL.md must start with YAML frontmatter (---)"));
    }
    let rest = &content[3..];
    let end = rest
        .find("\n---")
        .ok_or_else(|| anyhow!("Missing closing --- for frontmatter"))?;
    let yaml = &rest[..end];
    let body_start = 3 + end + 4; // skip "---" + "\n---"
    let body = if body_start < content.len() {
        &content[body_start..]
    } else {
        ""
    };
    Ok((yaml, body))
}

fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() || name.len() > MAX_NAME_LEN {
        return Err(anyhow!("Skill name must be 1..={} chars", MAX_NAME_LEN));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
    {
        return Err(anyhow!(
            "Skill name must be lowercase letters, numbers, hyphens only"
        ));
    }
    Ok(())
}

fn validate_description(desc: &str) -> Result<()> {
    if desc.len() > MAX_DESCRIPTION_LEN {
        return Err(anyhow!("Description exceeds {} chars", MAX_DESCRIPTION_LEN));
    }
    Ok(())
}

/// Result of scanning a skills directory
pub struct LoadedTree {
    pub registry: CapabilityRegistry,
    /// Built-in doc handlers for skills declaring `handler: doc`
    pub handlers: InMemoryHandlers,
    /// Per-file problems that did not abort the scan
    pub parse_errors: Vec<(PathBuf, String)>,
}

struct ParsedSkill {
    frontmatter: SkillFrontmatter,
    body: String,
}

/// Scan a skills directory and build the registry.
///
/// Parse errors are collected per-file rather than aborting the scan;
/// structural registration errors are fatal (the process must refuse to
/// serve with an invalid tree).
pub fn load_tree(dir: &Path) -> Result<LoadedTree> {
    if !dir.is_dir() {
        return Err(anyhow!("skills directory not found: {}", dir.display()));
    }

    let mut parsed: HashMap<PathBuf, ParsedSkill> = HashMap::new();
    let mut parse_errors = Vec::new();

    for entry in WalkDir::new(dir)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
    {
        if entry.file_type().is_file() && entry.file_name().to_str() == Some("SKILL.md") {
            let skill_dir = entry
                .path()
                .parent()
                .expect("SKILL.md always has a parent dir")
                .to_path_buf();
            let content = std::fs::read_to_string(entry.path())
                .with_context(|| format!("reading {}", entry.path().display()))?;
            match parse_skill_md(&content) {
                Ok((frontmatter, body)) => {
                    parsed.insert(skill_dir, ParsedSkill { frontmatter, body });
                }
                Err(e) => parse_errors.push((entry.path().to_path_buf(), e.to_string())),
            }
        }
    }

    // Group skill dirs under their nearest enclosing skill dir (or the scan
    // root for top-level skills)
    let mut by_parent: HashMap<PathBuf, Vec<PathBuf>> = HashMap::new();
    for skill_dir in parsed.keys() {
        let mut ancestor = skill_dir.parent();
        let parent_dir = loop {
            match ancestor {
                Some(a) if a == dir => break dir.to_path_buf(),
                Some(a) if parsed.contains_key(a) => break a.to_path_buf(),
                Some(a) => ancestor = a.parent(),
                None => break dir.to_path_buf(),
            }
        };
        by_parent.entry(parent_dir).or_default().push(skill_dir.clone());
    }
    for dirs in by_parent.values_mut() {
        dirs.sort();
    }

    let mut registry = CapabilityRegistry::new();
    let handlers = InMemoryHandlers::new();
    register_level(
        dir,
        None,
        &[],
        &parsed,
        &by_parent,
        &mut registry,
        &handlers,
    )?;

    Ok(LoadedTree {
        registry,
        handlers,
        parse_errors,
    })
}

fn register_level(
    parent_dir: &Path,
    parent_id: Option<&str>,
    ordering: &[String],
    parsed: &HashMap<PathBuf, ParsedSkill>,
    by_parent: &HashMap<PathBuf, Vec<PathBuf>>,
    registry: &mut CapabilityRegistry,
    handlers: &InMemoryHandlers,
) -> Result<()> {
    let Some(child_dirs) = by_parent.get(parent_dir) else {
        return Ok(());
    };

    // Dirs named in the parent's `children:` list come first, in that order;
    // the rest keep their lexicographic position
    let mut ordered: Vec<&PathBuf> = child_dirs.iter().collect();
    ordered.sort_by_key(|d| {
        let name = &parsed[*d].frontmatter.name;
        ordering
            .iter()
            .position(|c| c == name)
            .unwrap_or(ordering.len())
    });

    for skill_dir in ordered {
        let skill = &parsed[skill_dir];
        let fm = &skill.frontmatter;
        let id = match parent_id {
            Some(p) => format!("{}/{}", p, fm.name),
            None => fm.name.clone(),
        };

        let handler_ref = match fm.handler.as_deref() {
            Some("doc") => {
                let doc_ref = format!("doc:{}", id);
                handlers.insert(&doc_ref, DocHandler::new(&id, &skill.body));
                Some(doc_ref)
            }
            Some(external) => Some(external.to_string()),
            None => None,
        };

        let node = SkillNode {
            id: id.clone(),
            display_name: fm.display_name.clone().unwrap_or_else(|| fm.name.clone()),
            description: fm.description.clone(),
            triggers: fm.triggers.clone(),
            children: Vec::new(),
            handler_ref,
            user_invocable: fm.user_invocable,
            default_fallback: fm.default_fallback,
            hints: fm.hints.clone(),
        };
        registry
            .register(node, parent_id)
            .with_context(|| format!("registering skill from {}", skill_dir.display()))?;

        register_level(
            skill_dir,
            Some(&id),
            &fm.children,
            parsed,
            by_parent,
            registry,
            handlers,
        )?;
    }
    Ok(())
}
