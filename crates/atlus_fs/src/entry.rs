//! Storage of entry contents: in-memory buffers or ranges of a backing stream.

use std::{
    io::{self, Write},
    sync::Arc,
};

use crate::window::{Backing, ByteWindow};

/// In-memory content handed to an archive.
///
/// `Owned` buffers are released together with the entry holding them. `Shared`
/// buffers are reference counted, the caller keeps its own handle to the bytes
/// and the archive only drops its clone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Source {
    Owned(Vec<u8>),
    Shared(Arc<[u8]>),
}

impl Source {
    pub fn as_slice(&self) -> &[u8] {
        match self {
            Source::Owned(data) => data,
            Source::Shared(data) => data,
        }
    }

    pub fn len(&self) -> usize {
        self.as_slice().len()
    }

    pub fn is_empty(&self) -> bool {
        self.as_slice().is_empty()
    }

    /// Take the bytes out, copying only when they are shared.
    pub fn into_vec(self) -> Vec<u8> {
        match self {
            Source::Owned(data) => data,
            Source::Shared(data) => data.to_vec(),
        }
    }
}

impl From<Vec<u8>> for Source {
    fn from(value: Vec<u8>) -> Self {
        Source::Owned(value)
    }
}

impl From<&[u8]> for Source {
    fn from(value: &[u8]) -> Self {
        Source::Owned(value.to_vec())
    }
}

impl From<Arc<[u8]>> for Source {
    fn from(value: Arc<[u8]>) -> Self {
        Source::Shared(value)
    }
}

impl Backing for Source {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Source::Owned(data) => data.read_at(offset, buf),
            Source::Shared(data) => data.read_at(offset, buf),
        }
    }

    fn len(&self) -> io::Result<u64> {
        Ok(self.as_slice().len() as u64)
    }
}

/// Where the bytes of an entry live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryData {
    /// Content added to the archive after loading
    Buffered(Source),
    /// A byte range in the stream the archive was loaded from
    Stored { offset: u64, length: u64 },
}

impl EntryData {
    pub fn len(&self) -> u64 {
        match self {
            EntryData::Buffered(source) => source.as_slice().len() as u64,
            EntryData::Stored { length, .. } => *length,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Open a window over the content, resolving stored ranges against `stream`.
    pub fn window<'a>(&'a self, stream: &'a dyn Backing) -> ByteWindow<'a> {
        match self {
            EntryData::Buffered(source) => ByteWindow::new(source, 0, source.as_slice().len() as u64),
            EntryData::Stored { offset, length } => ByteWindow::new(stream, *offset, *length),
        }
    }

    /// Read the whole content into memory.
    pub fn to_vec(&self, stream: &dyn Backing) -> io::Result<Vec<u8>> {
        match self {
            EntryData::Buffered(source) => Ok(source.as_slice().to_vec()),
            EntryData::Stored { .. } => self.window(stream).read_remaining(),
        }
    }

    /// Copy the content into `writer`, returning the number of bytes copied.
    pub fn copy_to<W: Write + ?Sized>(&self, stream: &dyn Backing, writer: &mut W) -> io::Result<u64> {
        match self {
            EntryData::Buffered(source) => {
                writer.write_all(source.as_slice())?;
                Ok(source.as_slice().len() as u64)
            }
            EntryData::Stored { .. } => {
                let mut window = self.window(stream);
                let copied = io::copy(&mut window, writer)?;
                if copied != window.len() {
                    return Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "backing stream ended before the entry did",
                    ));
                }
                Ok(copied)
            }
        }
    }
}

#[cfg(test)]
mod test {
    use std::{io::Cursor, sync::Arc};

    use pretty_assertions::assert_eq;

    use super::{EntryData, Source};
    use crate::window::SharedStream;

    #[test]
    fn shared_source_outlives_entry() {
        let bytes: Arc<[u8]> = Arc::from(&b"shared"[..]);
        let entry = EntryData::Buffered(Source::Shared(bytes.clone()));
        assert_eq!(Arc::strong_count(&bytes), 2);

        drop(entry);
        assert_eq!(Arc::strong_count(&bytes), 1);
        assert_eq!(&*bytes, b"shared");
    }

    #[test]
    fn stored_entry_reads_its_range() -> std::io::Result<()> {
        let stream = SharedStream::new(Cursor::new(b"0123456789".to_vec()));
        let entry = EntryData::Stored {
            offset: 3,
            length: 4,
        };

        assert_eq!(entry.to_vec(&stream)?, b"3456".to_vec());

        let mut out = Vec::new();
        assert_eq!(entry.copy_to(&stream, &mut out)?, 4);
        assert_eq!(out, b"3456".to_vec());

        Ok(())
    }

    #[test]
    fn truncated_stored_entry_fails_to_copy() {
        let stream = SharedStream::new(Cursor::new(b"0123".to_vec()));
        let entry = EntryData::Stored {
            offset: 2,
            length: 8,
        };

        let mut out = Vec::new();
        assert!(entry.copy_to(&stream, &mut out).is_err());
    }
}
