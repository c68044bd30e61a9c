//! Conversion errors.

use std::io;

use crate::kind::SourceType;

/// Errors raised while converting a Source between representations.
#[derive(Debug, thiserror::Error)]
pub enum ConversionError {
    /// No single-hop conversion is registered between the two tags.
    #[error("unsupported conversion from {0} to {1}")]
    UnsupportedConversion(SourceType, SourceType),

    /// A path claimed to be a directory but is not one.
    #[error("source `{0}` is not a directory")]
    SourceConversionNotDirectory(String),

    #[error("I/O error during conversion: {0}")]
    Io(#[from] io::Error),
}
