//! The interface shared by every archive backend.

use std::{
    borrow::Borrow,
    fs::{self, File},
    io::{BufWriter, Cursor, Read, Seek, Write},
    path::{Path, PathBuf},
};

use tracing::{debug, instrument};

use crate::{
    entry::Source,
    error::{Error, Result},
    window::ByteWindow,
};

/// How to resolve adding an entry under a handle that is already taken
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ConflictPolicy {
    /// Fail with [`Error::FileExists`] and leave the archive untouched
    #[default]
    ThrowError,
    /// Overwrite the content, keeping any metadata not explicitly overridden
    Replace,
    /// Leave the archive untouched and report success
    Ignore,
}

/// How deep an enumeration descends
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Traversal {
    #[default]
    TopLevel,
    Recursive,
}

/// What an archive backend is able to do
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    pub read_only: bool,
    pub has_directories: bool,
    pub can_save: bool,
    pub can_add_or_remove: bool,
}

/// Owned form of a handle, as yielded by enumeration
pub type OwnedHandle<A> = <<A as Archive>::Handle as ToOwned>::Owned;

/// A container of handle-keyed entries.
///
/// Archives are loaded through the constructors of each backend and dropping an
/// archive releases its backing stream (when it owns it) along with every
/// buffered entry. Windows returned by [`Archive::open`] borrow the archive, so
/// it cannot be mutated or dropped while one of them is alive.
pub trait Archive {
    /// Key identifying an entry: an index, a name or a path
    type Handle: ?Sized + ToOwned;
    /// Metadata reported for an entry
    type Info;

    fn capabilities(&self) -> Capabilities;

    /// Number of files in the archive
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn exists(&self, handle: &Self::Handle) -> bool;

    fn is_file(&self, handle: &Self::Handle) -> bool {
        self.exists(handle)
    }

    fn is_directory(&self, _handle: &Self::Handle) -> bool {
        false
    }

    fn info(&self, handle: &Self::Handle) -> Result<Self::Info>;

    /// Open the content of a file for reading
    fn open(&self, handle: &Self::Handle) -> Result<ByteWindow<'_>>;

    /// Add a file, resolving an existing handle with `policy`
    fn add_file(&mut self, handle: &Self::Handle, source: Source, policy: ConflictPolicy) -> Result<()>;

    fn add_directory(&mut self, _handle: &Self::Handle, _policy: ConflictPolicy) -> Result<()> {
        Err(Error::Unsupported("archive has no directories"))
    }

    fn delete(&mut self, handle: &Self::Handle) -> Result<()>;

    /// Enumerate handles from the root of the archive
    fn entries(&self, traversal: Traversal) -> impl Iterator<Item = OwnedHandle<Self>> + '_;

    /// Enumerate handles below a directory
    fn entries_in(
        &self,
        _directory: &Self::Handle,
        _traversal: Traversal,
    ) -> Result<impl Iterator<Item = OwnedHandle<Self>> + '_> {
        Err::<std::iter::Empty<OwnedHandle<Self>>, _>(Error::Unsupported(
            "archive has no directories",
        ))
    }

    fn files(&self, traversal: Traversal) -> impl Iterator<Item = OwnedHandle<Self>> + '_ {
        self.entries(traversal)
            .filter(move |handle| self.is_file(handle.borrow()))
    }

    fn directories(&self, traversal: Traversal) -> impl Iterator<Item = OwnedHandle<Self>> + '_ {
        self.entries(traversal)
            .filter(move |handle| self.is_directory(handle.borrow()))
    }

    /// Serialize the archive into `writer`, returning the writer once done
    fn save<W: Write + Seek>(&self, writer: W) -> Result<W>;

    /// Serialize the archive into a new buffer
    fn save_to_vec(&self) -> Result<Vec<u8>> {
        Ok(self.save(Cursor::new(Vec::new()))?.into_inner())
    }

    /// Serialize the archive to a file.
    ///
    /// The output goes to a sibling temporary file first, which is then renamed
    /// over `path`, so the file the archive was loaded from can be the target.
    #[instrument(skip(self), err)]
    fn save_to_path(&self, path: &Path) -> Result<()> {
        let (temporary, writer) = create_temporary(path)?;
        let writer = self.save(writer)?;
        commit_temporary(&temporary, path, writer)
    }
}

/// Create the sibling temporary file that output for `path` is written to.
pub(crate) fn create_temporary(path: &Path) -> Result<(PathBuf, BufWriter<File>)> {
    let mut temporary = path.as_os_str().to_owned();
    temporary.push(".tmp");
    let temporary = PathBuf::from(temporary);
    debug!("writing {}", temporary.display());
    Ok((temporary.clone(), BufWriter::new(File::create(&temporary)?)))
}

/// Flush a temporary file and move it over `path`.
pub(crate) fn commit_temporary(temporary: &Path, path: &Path, writer: BufWriter<File>) -> Result<()> {
    writer
        .into_inner()
        .map_err(|e| Error::IOError(e.into_error()))?
        .sync_all()?;

    fs::rename(temporary, path)?;
    Ok(())
}

/// Archives whose handles are integer indices allocated by the archive
pub trait IndexedArchive: Archive<Handle = usize> {
    /// The handle the next pushed file will receive
    fn allocate_handle(&self) -> usize;

    /// Add a file under a freshly allocated handle
    fn push_file(&mut self, source: Source) -> Result<usize> {
        let handle = self.allocate_handle();
        self.add_file(&handle, source, ConflictPolicy::ThrowError)?;
        Ok(handle)
    }
}

/// Round `value` up to the next multiple of `alignment`.
pub(crate) fn align(value: u64, alignment: u64) -> u64 {
    value.div_ceil(alignment) * alignment
}

/// Write zero bytes until the stream position is a multiple of `alignment`.
pub(crate) fn pad_to<W: Write + Seek + ?Sized>(writer: &mut W, alignment: u64) -> Result<()> {
    let position = writer.stream_position()?;
    let padding = align(position, alignment) - position;
    write_zeros(writer, padding)
}

/// Decode a NUL padded name field, stopping at the first NUL.
///
/// Every byte maps to the char with the same value, so names in any single byte
/// or Shift-JIS encoding survive a trip through [`name_to_field`] unchanged.
pub(crate) fn field_to_name(field: &[u8]) -> String {
    field
        .iter()
        .take_while(|&&b| b != 0)
        .map(|&b| char::from(b))
        .collect()
}

/// Encode a name produced by [`field_to_name`] back to its bytes.
///
/// Returns `None` when the name holds a char above `U+00FF`.
pub(crate) fn name_to_field(name: &str) -> Option<Vec<u8>> {
    name.chars().map(|c| u8::try_from(c).ok()).collect()
}

pub(crate) fn write_zeros<W: Write + ?Sized>(writer: &mut W, count: u64) -> Result<()> {
    std::io::copy(&mut std::io::repeat(0).take(count), writer)?;
    Ok(())
}

#[cfg(test)]
mod test {
    use std::io::Cursor;

    use pretty_assertions::assert_eq;

    use super::{align, field_to_name, name_to_field, pad_to};
    use crate::error::Result;

    #[test]
    fn align_rounds_up() {
        assert_eq!(align(0, 64), 0);
        assert_eq!(align(1, 64), 64);
        assert_eq!(align(64, 64), 64);
        assert_eq!(align(0x801, 0x800), 0x1000);
    }

    #[test]
    fn pad_uses_absolute_position() -> Result<()> {
        let mut cursor = Cursor::new(vec![0xAAu8; 5]);
        cursor.set_position(5);
        pad_to(&mut cursor, 4)?;
        assert_eq!(cursor.into_inner().len(), 8);

        Ok(())
    }

    #[test]
    fn names_stop_at_first_nul() {
        assert_eq!(field_to_name(b"END0"), "END0");
        assert_eq!(field_to_name(b"ab\0cd\0"), "ab");
        assert_eq!(field_to_name(&[0; 8]), "");
    }

    #[test]
    fn names_keep_every_byte() {
        let field = [0x82, 0xA0, b'.', b'b', 0x00];
        let name = field_to_name(&field);
        assert_eq!(name.chars().count(), 4);
        assert_ne!(name, field_to_name(&[0x82, 0xA2, b'.', b'b']));
        assert_eq!(name_to_field(&name), Some(field[..4].to_vec()));

        assert_eq!(name_to_field("a.bin"), Some(b"a.bin".to_vec()));
        assert_eq!(name_to_field("\u{3042}.bin"), None);
    }
}
