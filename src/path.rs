//! Typed paths into the realtime datastore tree.
use std::fmt;

use thiserror::Error;

/// Longest key the datastore accepts, in bytes.
const MAX_SEGMENT_LEN: usize = 768;

const FORBIDDEN_CHARS: &[char] = &['.', '$', '#', '[', ']', '/'];

#[derive(Debug, Error, PartialEq)]
pub enum PathError {
    #[error("path segment is empty")]
    Empty,
    #[error("path segment is longer than {} bytes", MAX_SEGMENT_LEN)]
    TooLong,
    #[error("path segment '{segment}' contains forbidden character {found:?}")]
    ForbiddenChar { segment: String, found: char },
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// A single validated key of the datastore tree.
pub struct PathSegment(String);

impl PathSegment {
    pub fn new(segment: &str) -> Result<Self, PathError> {
        if segment.is_empty() {
            return Err(PathError::Empty);
        }
        if segment.len() > MAX_SEGMENT_LEN {
            return Err(PathError::TooLong);
        }
        if let Some(found) = segment.chars().find(|c| FORBIDDEN_CHARS.contains(c) || c.is_ascii_control()) {
            return Err(PathError::ForbiddenChar { segment: segment.to_string(), found });
        }
        Ok(PathSegment(segment.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// Absolute path made of validated segments, rendered as `a/b/c`.
pub struct DatastorePath {
    segments: Vec<PathSegment>,
}

impl DatastorePath {
    pub fn root() -> Self {
        DatastorePath { segments: Vec::new() }
    }

    pub fn child(&self, segment: PathSegment) -> Self {
        let mut segments = self.segments.clone();
        segments.push(segment);
        DatastorePath { segments }
    }
}

impl fmt::Display for DatastorePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let joined: Vec<&str> = self.segments.iter().map(PathSegment::as_str).collect();
        f.write_str(&joined.join("/"))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// Subtree `nodes/<identity>` owned by one node.
pub struct NodePath {
    identity: PathSegment,
    base: DatastorePath,
}

impl NodePath {
    pub fn new(identity: &str) -> Result<Self, PathError> {
        let identity = PathSegment::new(identity)?;
        let base = DatastorePath::root()
            .child(PathSegment("nodes".to_string()))
            .child(identity.clone());
        Ok(NodePath { identity, base })
    }

    pub fn identity(&self) -> &str {
        self.identity.as_str()
    }

    /// Snapshot object overwritten every cycle.
    pub fn latest(&self) -> DatastorePath {
        self.base.child(PathSegment("latest".to_string()))
    }

    /// Collection records are appended to.
    pub fn history(&self) -> DatastorePath {
        self.base.child(PathSegment("history".to_string()))
    }
}
