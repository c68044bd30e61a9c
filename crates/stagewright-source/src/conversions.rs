//! Single-hop conversions between Source representations.
//!
//! The table is fixed:
//!
//! | from   | to        | function            |
//! |--------|-----------|---------------------|
//! | Path   | Directory | [`path_to_directory`] |
//! | Path   | Stream    | [`path_to_stream`]    |
//! | Stream | Path      | [`stream_to_path`]    |
//! | Stream | String    | [`stream_to_string`]  |
//! | String | Stream    | [`string_to_stream`]  |
//!
//! [`convert`] never chains two hops. Conversions that allocate local
//! temporary storage hand it to the caller and never clean it up.

use std::fs::File;
use std::io::{self, Cursor, Read};
use std::path::PathBuf;

use crate::directory::Directory;
use crate::error::ConversionError;
use crate::kind::SourceType;
use crate::source::{Source, Stream};

/// Check that `path` is a directory and wrap it
pub fn path_to_directory(path: PathBuf) -> Result<Directory, ConversionError> {
    if path.is_dir() {
        Ok(Directory::new(path))
    } else {
        Err(ConversionError::SourceConversionNotDirectory(
            path.display().to_string(),
        ))
    }
}

/// Open `path` for reading
pub fn path_to_stream(path: PathBuf) -> Result<Stream, ConversionError> {
    let file = File::open(&path)?;
    Ok(Stream::new(file))
}

/// Materialise a stream into a kept temporary file
pub fn stream_to_path(mut stream: Stream) -> Result<PathBuf, ConversionError> {
    let mut tmp = tempfile::Builder::new()
        .prefix("stagewright-")
        .tempfile()?;
    io::copy(&mut stream, tmp.as_file_mut())?;
    let (_file, path) = tmp.keep().map_err(|e| ConversionError::Io(e.error))?;
    Ok(path)
}

/// Decode the remaining bytes of a stream as UTF-8
pub fn stream_to_string(mut stream: Stream) -> Result<String, ConversionError> {
    let mut text = String::new();
    stream.read_to_string(&mut text)?;
    Ok(text)
}

/// Wrap text in an in-memory stream
pub fn string_to_stream(text: String) -> Stream {
    Stream::new(Cursor::new(text.into_bytes()))
}

/// Whether a registered single hop exists from `from` to `to`
pub fn conversion_exists(from: SourceType, to: SourceType) -> bool {
    use SourceType::*;
    matches!(
        (from, to),
        (Path, Directory) | (Path, Stream) | (Stream, Path) | (Stream, String) | (String, Stream)
    )
}

/// Convert `source` to `target` with at most one registered hop.
///
/// A Source already tagged `target` is returned unchanged, and any Source
/// satisfies an `Untyped` target.
pub fn convert(source: Source, target: SourceType) -> Result<Source, ConversionError> {
    let from = source.kind();
    if from == target || target == SourceType::Untyped {
        return Ok(source);
    }

    match (source, target) {
        (Source::Path(path), SourceType::Directory) => path_to_directory(path).map(Source::Directory),
        (Source::Path(path), SourceType::Stream) => path_to_stream(path).map(Source::Stream),
        (Source::Stream(stream), SourceType::Path) => stream_to_path(stream).map(Source::Path),
        (Source::Stream(stream), SourceType::String) => stream_to_string(stream).map(Source::String),
        (Source::String(text), SourceType::Stream) => Ok(Source::Stream(string_to_stream(text))),
        _ => Err(ConversionError::UnsupportedConversion(from, target)),
    }
}
