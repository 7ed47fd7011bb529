//! Bounded read-only views over a shared backing source.

use std::{
    cell::RefCell,
    fmt::{self, Debug},
    io::{self, Read, Seek, SeekFrom},
    sync::Arc,
};

use tracing::instrument;

/// A byte source that supports reads at an absolute position.
///
/// Every [`ByteWindow`] keeps its own cursor and translates it into an absolute
/// position on each call, so any number of windows can alias one backing.
pub trait Backing {
    /// Read into `buf` starting at the absolute `offset`, returning the number of bytes read.
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize>;

    /// Total length of the source in bytes.
    fn len(&self) -> io::Result<u64>;

    /// Whether the source holds no bytes at all.
    fn is_empty(&self) -> io::Result<bool> {
        Ok(self.len()? == 0)
    }
}

fn read_slice_at(data: &[u8], offset: u64, buf: &mut [u8]) -> io::Result<usize> {
    let Ok(start) = usize::try_from(offset) else {
        return Ok(0);
    };
    let Some(available) = data.get(start..) else {
        return Ok(0);
    };
    let n = available.len().min(buf.len());
    buf[..n].copy_from_slice(&available[..n]);
    Ok(n)
}

impl Backing for Vec<u8> {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        read_slice_at(self, offset, buf)
    }

    fn len(&self) -> io::Result<u64> {
        Ok(self.as_slice().len() as u64)
    }
}

impl Backing for Arc<[u8]> {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        read_slice_at(self, offset, buf)
    }

    fn len(&self) -> io::Result<u64> {
        Ok(<[u8]>::len(self) as u64)
    }
}

/// A stream shared between the windows opened on an archive.
///
/// Reads seek the inner stream before every call. A read issued while another
/// one is still running on the same stream fails with an I/O error.
pub struct SharedStream<R> {
    inner: RefCell<R>,
}

impl<R> SharedStream<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner: RefCell::new(inner),
        }
    }

    /// Unwrap and return the inner stream
    ///
    /// The position of the stream is undefined.
    pub fn into_inner(self) -> R {
        self.inner.into_inner()
    }

    pub fn get_mut(&mut self) -> &mut R {
        self.inner.get_mut()
    }
}

impl<R> Debug for SharedStream<R> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("SharedStream").finish_non_exhaustive()
    }
}

impl<R: Read + Seek> Backing for SharedStream<R> {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        let mut inner = self
            .inner
            .try_borrow_mut()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "backing stream is busy"))?;
        inner.seek(SeekFrom::Start(offset))?;
        inner.read(buf)
    }

    fn len(&self) -> io::Result<u64> {
        let mut inner = self
            .inner
            .try_borrow_mut()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "backing stream is busy"))?;
        inner.seek(SeekFrom::End(0))
    }
}

/// A readable and seekable view over `[start, start + length)` of a [`Backing`].
///
/// ```
/// use std::io::{Read, Seek, SeekFrom};
/// use atlus_fs::window::ByteWindow;
///
/// let data = b"hello world".to_vec();
/// let mut window = ByteWindow::new(&data, 6, 5);
///
/// let mut text = String::new();
/// window.read_to_string(&mut text).unwrap();
/// assert_eq!(text, "world");
///
/// // seeking past the end clamps to the window length
/// assert_eq!(window.seek(SeekFrom::Current(10)).unwrap(), 5);
/// ```
pub struct ByteWindow<'a> {
    backing: &'a dyn Backing,
    start: u64,
    length: u64,
    cursor: u64,
}

impl<'a> ByteWindow<'a> {
    pub fn new(backing: &'a dyn Backing, start: u64, length: u64) -> Self {
        Self {
            backing,
            start,
            length,
            cursor: 0,
        }
    }

    /// Absolute offset of the first byte of the window in the backing source
    pub fn start(&self) -> u64 {
        self.start
    }

    /// Length of the window in bytes
    pub fn len(&self) -> u64 {
        self.length
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    /// Current cursor position relative to the window start
    pub fn position(&self) -> u64 {
        self.cursor
    }

    /// Read everything from the cursor to the end of the window.
    pub fn read_remaining(&mut self) -> io::Result<Vec<u8>> {
        let mut buffer = Vec::with_capacity((self.length - self.cursor) as usize);
        self.read_to_end(&mut buffer)?;
        Ok(buffer)
    }
}

impl Debug for ByteWindow<'_> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("ByteWindow")
            .field("start", &self.start)
            .field("length", &self.length)
            .field("cursor", &self.cursor)
            .finish()
    }
}

impl Read for ByteWindow<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let remaining = self.length - self.cursor;
        if remaining == 0 || buf.is_empty() {
            return Ok(0);
        }

        let n = (buf.len() as u64).min(remaining) as usize;
        let read = self.backing.read_at(self.start + self.cursor, &mut buf[..n])?;
        self.cursor += read as u64;
        Ok(read)
    }
}

impl Seek for ByteWindow<'_> {
    #[instrument(skip(self), err)]
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(offset) => i128::from(offset),
            SeekFrom::Current(delta) => i128::from(self.cursor) + i128::from(delta),
            SeekFrom::End(delta) => i128::from(self.length) + i128::from(delta),
        };

        if target < 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "invalid seek to a negative position",
            ));
        }

        self.cursor = u64::try_from(target).map_or(self.length, |t| t.min(self.length));
        Ok(self.cursor)
    }
}
