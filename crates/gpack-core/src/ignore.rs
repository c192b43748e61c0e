//! Ignore rules controlling which files enter a snapshot.
//!
//! Rules come from the project's `.gpackignore`, one glob per line. A rule
//! without a `/` matches an entry of that name at any depth; a rule with a
//! `/` (or a leading `/`) is anchored at the project root. A matched
//! directory excludes everything beneath it. The `.gpack` metadata
//! directory is always excluded, whatever the rules say.

use crate::error::Result;
use crate::project::METADATA_DIR;
use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use std::fs;
use std::io::ErrorKind;
use std::path::{Component, Path};
use tracing::debug;

/// Ordered list of ignore patterns, comments and blank lines removed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IgnoreRuleSet {
    patterns: Vec<String>,
}

impl IgnoreRuleSet {
    /// Reads rules from `path`. A missing file is an empty rule set, not an error.
    pub fn load(path: &Path) -> Result<Self> {
        match fs::read_to_string(path) {
            Ok(content) => {
                let rules = Self::parse(&content);
                debug!(path = %path.display(), count = rules.patterns.len(), "Loaded ignore rules.");
                Ok(rules)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(path = %path.display(), "No ignore file, using empty rule set.");
                Ok(Self::default())
            }
            Err(e) => Err(e.into()),
        }
    }

    pub fn parse(content: &str) -> Self {
        let patterns = content
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .map(String::from)
            .collect();
        Self { patterns }
    }

    pub fn from_patterns<I, S>(patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            patterns: patterns.into_iter().map(Into::into).collect(),
        }
    }

    pub fn patterns(&self) -> &[String] {
        &self.patterns
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    /// Compiles the rules into a matcher. Fails on a malformed glob.
    pub fn compile(&self) -> Result<IgnoreMatcher> {
        let mut builder = GlobSetBuilder::new();
        for pattern in &self.patterns {
            let trimmed = pattern.trim_end_matches('/');
            let glob = match trimmed.strip_prefix('/') {
                Some(anchored) => anchored.to_string(),
                None if trimmed.contains('/') => trimmed.to_string(),
                None => format!("**/{}", trimmed),
            };
            builder.add(GlobBuilder::new(&glob).literal_separator(true).build()?);
        }
        Ok(IgnoreMatcher {
            globs: builder.build()?,
        })
    }
}

/// Compiled form of an [`IgnoreRuleSet`].
#[derive(Debug, Clone)]
pub struct IgnoreMatcher {
    globs: GlobSet,
}

impl IgnoreMatcher {
    /// `relative` is the entry path relative to the snapshot root.
    pub fn is_ignored(&self, relative: &Path) -> bool {
        if is_metadata_path(relative) {
            return true;
        }
        let normalized = normalize(relative);
        !normalized.is_empty() && self.globs.is_match(normalized.as_str())
    }
}

fn is_metadata_path(relative: &Path) -> bool {
    matches!(
        relative.components().next(),
        Some(Component::Normal(first)) if first == METADATA_DIR
    )
}

/// Joins the normal components with `/` so matching is platform independent.
fn normalize(relative: &Path) -> String {
    relative
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}
