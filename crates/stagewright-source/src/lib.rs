//! Stagewright Source Model
//!
//! Defines the tagged artifact values that flow between pipeline steps and
//! the fixed set of single-hop conversions between their representations.

pub mod conversions;
pub mod directory;
pub mod error;
pub mod kind;
pub mod source;

pub use conversions::{conversion_exists, convert};
pub use directory::{tmp_dir, Directory};
pub use error::ConversionError;
pub use kind::SourceType;
pub use source::{Source, Stream};
