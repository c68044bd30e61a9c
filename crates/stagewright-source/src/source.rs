//! Tagged artifact values.

use std::any::Any;
use std::fmt;
use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use crate::directory::Directory;
use crate::kind::SourceType;

/// Readable byte stream.
///
/// `backing` records local temporary storage the stream was materialised
/// into, if any. The holder of the stream owns that storage.
pub struct Stream {
    reader: Box<dyn Read + Send>,
    backing: Option<PathBuf>,
}

impl Stream {
    /// Wrap a reader with no owned backing storage
    pub fn new<R: Read + Send + 'static>(reader: R) -> Self {
        Self {
            reader: Box::new(reader),
            backing: None,
        }
    }

    /// Wrap a reader over a file the holder now owns
    pub fn with_backing<R: Read + Send + 'static>(reader: R, backing: impl Into<PathBuf>) -> Self {
        Self {
            reader: Box::new(reader),
            backing: Some(backing.into()),
        }
    }

    /// Local temporary storage behind this stream
    pub fn backing_path(&self) -> Option<&Path> {
        self.backing.as_deref()
    }

    /// Drain the remaining bytes
    pub fn read_all(&mut self) -> io::Result<Vec<u8>> {
        let mut buf = Vec::new();
        self.reader.read_to_end(&mut buf)?;
        Ok(buf)
    }

    pub fn into_reader(self) -> Box<dyn Read + Send> {
        self.reader
    }
}

impl Read for Stream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.reader.read(buf)
    }
}

impl From<File> for Stream {
    fn from(file: File) -> Self {
        Self::new(file)
    }
}

impl fmt::Debug for Stream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stream")
            .field("backing", &self.backing)
            .finish_non_exhaustive()
    }
}

/// An artifact value together with its representation.
///
/// The variant is the tag, so a Source can never claim a representation it
/// does not have. Sources are not `Clone`: handing one on moves it.
pub enum Source {
    Path(PathBuf),
    Directory(Directory),
    Stream(Stream),
    String(String),
    Untyped(Box<dyn Any + Send>),
}

impl Source {
    /// Wrap an arbitrary value as an untyped Source
    pub fn untyped<T: Any + Send>(value: T) -> Self {
        Source::Untyped(Box::new(value))
    }

    /// The representation tag of this value
    pub fn kind(&self) -> SourceType {
        match self {
            Source::Path(_) => SourceType::Path,
            Source::Directory(_) => SourceType::Directory,
            Source::Stream(_) => SourceType::Stream,
            Source::String(_) => SourceType::String,
            Source::Untyped(_) => SourceType::Untyped,
        }
    }

    pub fn as_path(&self) -> Option<&Path> {
        match self {
            Source::Path(path) => Some(path),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Source::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_directory(&self) -> Option<&Directory> {
        match self {
            Source::Directory(dir) => Some(dir),
            _ => None,
        }
    }

    pub fn stream_mut(&mut self) -> Option<&mut Stream> {
        match self {
            Source::Stream(stream) => Some(stream),
            _ => None,
        }
    }

    /// Borrow the untyped payload as `T`
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        match self {
            Source::Untyped(value) => value.downcast_ref::<T>(),
            _ => None,
        }
    }

    /// Mutably borrow the untyped payload as `T`
    pub fn downcast_mut<T: Any>(&mut self) -> Option<&mut T> {
        match self {
            Source::Untyped(value) => value.downcast_mut::<T>(),
            _ => None,
        }
    }

    /// Consume into a path, handing the Source back on mismatch
    pub fn into_path(self) -> Result<PathBuf, Source> {
        match self {
            Source::Path(path) => Ok(path),
            other => Err(other),
        }
    }

    pub fn into_stream(self) -> Result<Stream, Source> {
        match self {
            Source::Stream(stream) => Ok(stream),
            other => Err(other),
        }
    }

    pub fn into_string(self) -> Result<String, Source> {
        match self {
            Source::String(s) => Ok(s),
            other => Err(other),
        }
    }

    pub fn into_directory(self) -> Result<Directory, Source> {
        match self {
            Source::Directory(dir) => Ok(dir),
            other => Err(other),
        }
    }
}

impl From<PathBuf> for Source {
    fn from(path: PathBuf) -> Self {
        Source::Path(path)
    }
}

impl From<String> for Source {
    fn from(s: String) -> Self {
        Source::String(s)
    }
}

impl From<Stream> for Source {
    fn from(stream: Stream) -> Self {
        Source::Stream(stream)
    }
}

impl From<Directory> for Source {
    fn from(dir: Directory) -> Self {
        Source::Directory(dir)
    }
}

impl fmt::Debug for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Source::Path(path) => f.debug_tuple("Path").field(path).finish(),
            Source::Directory(dir) => f.debug_tuple("Directory").field(dir).finish(),
            Source::Stream(stream) => f.debug_tuple("Stream").field(stream).finish(),
            Source::String(s) => f.debug_tuple("String").field(s).finish(),
            Source::Untyped(_) => f.write_str("Untyped(..)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_kind_matches_variant() {
        assert_eq!(Source::from(PathBuf::from("/tmp")).kind(), SourceType::Path);
        assert_eq!(Source::from("x".to_string()).kind(), SourceType::String);
        assert_eq!(
            Source::from(Stream::new(Cursor::new(vec![1u8]))).kind(),
            SourceType::Stream
        );
        assert_eq!(Source::untyped(42u32).kind(), SourceType::Untyped);
    }

    #[test]
    fn test_downcast_untyped() {
        let mut source = Source::untyped(vec![1, 2, 3]);
        assert!(source.downcast_ref::<String>().is_none());

        source.downcast_mut::<Vec<i32>>().unwrap().push(4);
        assert_eq!(source.downcast_ref::<Vec<i32>>().unwrap(), &vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_into_accessor_returns_source_on_mismatch() {
        let source = Source::from("text".to_string());
        let back = source.into_path().unwrap_err();
        assert_eq!(back.as_str(), Some("text"));
    }

    #[test]
    fn test_stream_read_all() {
        let mut stream = Stream::with_backing(Cursor::new(b"hello".to_vec()), "/tmp/x");
        assert_eq!(stream.backing_path(), Some(Path::new("/tmp/x")));
        assert_eq!(stream.read_all().unwrap(), b"hello");
    }
}
