//! Resource path parsing for the in-memory back-ends.

use std::fmt;

use ignis_core::ResourceType;
use thiserror::Error;

pub const DEFAULT_PROVIDER: &str = "default";

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum PathError {
    #[error("resource path is empty")]
    Empty,
    #[error("tag provider bracket is not closed in `{0}`")]
    UnclosedProvider(String),
    #[error("tag provider name is empty in `{0}`")]
    EmptyProvider(String),
    #[error("path `{0}` contains an empty segment")]
    EmptySegment(String),
}

/// A tag location: provider plus `/`-separated folder and tag names.
///
/// `[default]Line1/Speed` and `Line1/Speed` name the same tag.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TagPath {
    provider: String,
    segments: Vec<String>,
}

impl TagPath {
    pub fn parse(raw: &str) -> Result<Self, PathError> {
        let raw = raw.trim();
        let (provider, rest) = match raw.strip_prefix('[') {
            Some(rest) => {
                let (provider, rest) = rest
                    .split_once(']')
                    .ok_or_else(|| PathError::UnclosedProvider(raw.to_string()))?;
                if provider.trim().is_empty() {
                    return Err(PathError::EmptyProvider(raw.to_string()));
                }
                (provider.trim().to_string(), rest)
            }
            None => (DEFAULT_PROVIDER.to_string(), raw),
        };

        let rest = rest.trim_matches('/');
        if rest.is_empty() {
            return Ok(Self { provider, segments: Vec::new() });
        }
        let segments: Vec<String> = rest.split('/').map(|segment| segment.trim().to_string()).collect();
        if segments.iter().any(String::is_empty) {
            return Err(PathError::EmptySegment(raw.to_string()));
        }
        Ok(Self { provider, segments })
    }

    pub fn provider(&self) -> &str {
        &self.provider
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// Provider root, `[default]`.
    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn name(&self) -> Option<&str> {
        self.segments.last().map(String::as_str)
    }

    pub fn parent(&self) -> Option<Self> {
        if self.is_root() {
            return None;
        }
        let mut segments = self.segments.clone();
        segments.pop();
        Some(Self { provider: self.provider.clone(), segments })
    }

    /// Every folder between the provider root and this path, outermost first.
    pub fn ancestors(&self) -> Vec<Self> {
        (1..self.segments.len())
            .map(|depth| Self {
                provider: self.provider.clone(),
                segments: self.segments[..depth].to_vec(),
            })
            .collect()
    }

    /// Strictly below `other` in the tree.
    pub fn is_descendant_of(&self, other: &Self) -> bool {
        self.provider == other.provider
            && self.segments.len() > other.segments.len()
            && self.segments.starts_with(&other.segments)
    }

    pub fn is_child_of(&self, other: &Self) -> bool {
        self.is_descendant_of(other) && self.segments.len() == other.segments.len() + 1
    }
}

impl fmt::Display for TagPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]{}", self.provider, self.segments.join("/"))
    }
}

/// Canonical storage key for non-tag resources. Scripts accept `.` as a
/// separator and are stored with `/`.
pub fn document_key(resource_type: ResourceType, raw: &str) -> Result<String, PathError> {
    let raw = raw.trim().trim_matches('/');
    if raw.is_empty() {
        return Err(PathError::Empty);
    }
    let separators: &[char] = match resource_type {
        ResourceType::Script => &['/', '.'],
        _ => &['/'],
    };
    let segments: Vec<&str> = raw.split(separators).map(str::trim).collect();
    if segments.iter().any(|segment| segment.is_empty()) {
        return Err(PathError::EmptySegment(raw.to_string()));
    }
    Ok(segments.join("/"))
}
