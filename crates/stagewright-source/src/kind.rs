//! Artifact representation tags.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The representation an artifact currently has.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    /// A filesystem path to a file.
    Path,
    /// A handle to an existing directory.
    Directory,
    /// A readable byte stream.
    Stream,
    /// Decoded UTF-8 text.
    String,
    /// An opaque value, e.g. a live connection threaded between steps.
    Untyped,
}

impl SourceType {
    /// All representation tags, in declaration order.
    pub const ALL: [SourceType; 5] = [
        SourceType::Path,
        SourceType::Directory,
        SourceType::Stream,
        SourceType::String,
        SourceType::Untyped,
    ];
}

impl fmt::Display for SourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Path => write!(f, "Path"),
            Self::Directory => write!(f, "Directory"),
            Self::Stream => write!(f, "Stream"),
            Self::String => write!(f, "String"),
            Self::Untyped => write!(f, "Untyped"),
        }
    }
}
