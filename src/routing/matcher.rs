//! Route matching logic.
//!
//! # Responsibilities
//! - Compile path patterns (`/rides/{id}`, `/static/{*rest}`) into segments
//! - Match a concrete path and capture parameters
//! - Rank patterns by specificity
//!
//! # Design Decisions
//! - Method matching is exact (case-insensitive on input, stored uppercase)
//! - Path matching is case-sensitive
//! - Wildcard only allowed as the last segment
//! - No regex to guarantee O(n) matching

use std::collections::BTreeMap;

/// Parameters captured from a matched path.
pub type PathParams = BTreeMap<String, String>;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Param(String),
    Wildcard(String),
}

/// A compiled path pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathPattern {
    raw: String,
    segments: Vec<Segment>,
}

/// Ordering key for pattern specificity. Greater = more specific.
/// Field order defines the ranking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Specificity {
    literals: usize,
    no_wildcard: bool,
    segments: usize,
}

impl PathPattern {
    /// Compile a pattern. Returns a human readable reason on failure.
    pub fn parse(pattern: &str) -> Result<Self, String> {
        if !pattern.starts_with('/') {
            return Err(format!("'{pattern}' must start with '/'"));
        }

        let parts: Vec<&str> = split_path(pattern).collect();
        let mut segments = Vec::with_capacity(parts.len());

        for (i, part) in parts.iter().enumerate() {
            let segment = match part.strip_prefix('{').and_then(|p| p.strip_suffix('}')) {
                Some(inner) => {
                    if let Some(name) = inner.strip_prefix('*') {
                        if i != parts.len() - 1 {
                            return Err(format!("wildcard '{part}' must be the last segment"));
                        }
                        Segment::Wildcard(checked_name(name, part)?)
                    } else {
                        Segment::Param(checked_name(inner, part)?)
                    }
                }
                None => {
                    if part.contains('{') || part.contains('}') {
                        return Err(format!("malformed segment '{part}'"));
                    }
                    Segment::Literal(part.to_string())
                }
            };
            segments.push(segment);
        }

        Ok(Self {
            raw: pattern.to_string(),
            segments,
        })
    }

    /// The pattern as written in config.
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn specificity(&self) -> Specificity {
        Specificity {
            literals: self
                .segments
                .iter()
                .filter(|s| matches!(s, Segment::Literal(_)))
                .count(),
            no_wildcard: !self
                .segments
                .iter()
                .any(|s| matches!(s, Segment::Wildcard(_))),
            segments: self.segments.len(),
        }
    }

    /// Match a request path, returning captured parameters.
    pub fn match_path(&self, path: &str) -> Option<PathParams> {
        let parts: Vec<&str> = split_path(path).collect();
        let mut params = PathParams::new();

        for (i, segment) in self.segments.iter().enumerate() {
            match segment {
                Segment::Literal(expected) => {
                    if parts.get(i) != Some(&expected.as_str()) {
                        return None;
                    }
                }
                Segment::Param(name) => {
                    let value = parts.get(i)?;
                    params.insert(name.clone(), (*value).to_string());
                }
                Segment::Wildcard(name) => {
                    if i >= parts.len() {
                        return None;
                    }
                    params.insert(name.clone(), parts[i..].join("/"));
                    return Some(params);
                }
            }
        }

        (parts.len() == self.segments.len()).then_some(params)
    }
}

fn split_path(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|s| !s.is_empty())
}

fn checked_name(name: &str, part: &str) -> Result<String, String> {
    if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(format!("invalid parameter name in '{part}'"));
    }
    Ok(name.to_string())
}
