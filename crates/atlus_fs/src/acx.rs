//! Types for reading and writing ACX archives
//!
//! ACX archives are big endian: an 8 byte entry count, a table of
//! `(offset, length)` pairs and then the payloads, each aligned to 4 bytes.

use std::{
    collections::BTreeMap,
    fmt::{self, Debug},
    fs::File,
    io::{self, Read, Seek, SeekFrom, Write},
    path::Path,
};

use binrw::{BinRead, BinWrite, Endian};
use tracing::{debug, instrument};

use crate::{
    archive::{Archive, Capabilities, ConflictPolicy, IndexedArchive, Traversal},
    entry::{EntryData, Source},
    error::{Error, FileExistsError, FileNotFoundError, Result},
    fixup::FixupWriter,
    window::{ByteWindow, SharedStream},
};

const ALIGNMENT: u64 = 4;

/// One row of the offset table
#[derive(BinRead, BinWrite, Debug, Clone, Copy, PartialEq, Eq)]
#[brw(big)]
struct AcxRecord {
    offset: u32,
    length: u32,
}

/// Information on an ACX entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcxInfo {
    pub handle: usize,
    pub size: u64,
}

/// ACX archive
pub struct AcxArchive<R = io::Empty> {
    stream: SharedStream<R>,
    next_handle: usize,
    entries: BTreeMap<usize, EntryData>,
}

impl<R> Debug for AcxArchive<R> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("AcxArchive")
            .field("next_handle", &self.next_handle)
            .field("entries", &self.entries.len())
            .finish()
    }
}

impl AcxArchive {
    pub fn new() -> Self {
        Self {
            stream: SharedStream::new(io::empty()),
            next_handle: 0,
            entries: BTreeMap::new(),
        }
    }
}

impl Default for AcxArchive {
    fn default() -> Self {
        Self::new()
    }
}

impl AcxArchive<File> {
    /// Open and read the ACX archive at `path`
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_reader(File::open(path)?)
    }
}

impl<R: Read + Seek> AcxArchive<R> {
    #[instrument(skip(reader), err)]
    pub fn from_reader(mut reader: R) -> Result<Self> {
        let stream_len = reader.seek(SeekFrom::End(0))?;
        reader.seek(SeekFrom::Start(0))?;

        let count = u64::read_options(&mut reader, Endian::Big, ())?;
        count
            .checked_mul(8)
            .and_then(|table| table.checked_add(8))
            .filter(|&end| end <= stream_len)
            .ok_or_else(|| {
                Error::MalformedArchive(format!("table of {count} entries does not fit the stream"))
            })?;

        let mut entries = BTreeMap::new();
        for handle in 0..count as usize {
            let record = AcxRecord::read(&mut reader)?;
            let (offset, length) = (u64::from(record.offset), u64::from(record.length));
            if offset + length > stream_len {
                return Err(Error::MalformedArchive(format!(
                    "entry {handle} extends past the end of the archive"
                )));
            }
            entries.insert(handle, EntryData::Stored { offset, length });
        }
        debug!(count, "read acx");

        Ok(Self {
            stream: SharedStream::new(reader),
            next_handle: entries.len(),
            entries,
        })
    }

    /// Unwrap and return the inner reader object
    ///
    /// The position of the reader is undefined.
    pub fn into_inner(self) -> R {
        self.stream.into_inner()
    }
}

impl<R> AcxArchive<R> {
    fn entry(&self, handle: usize) -> Result<&EntryData> {
        self.entries
            .get(&handle)
            .ok_or(Error::FileNotFound(FileNotFoundError::Index(handle)))
    }
}

impl<R: Read + Seek> Archive for AcxArchive<R> {
    type Handle = usize;
    type Info = AcxInfo;

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            read_only: false,
            has_directories: false,
            can_save: true,
            can_add_or_remove: true,
        }
    }

    fn len(&self) -> usize {
        self.entries.len()
    }

    fn exists(&self, handle: &usize) -> bool {
        self.entries.contains_key(handle)
    }

    fn info(&self, handle: &usize) -> Result<AcxInfo> {
        Ok(AcxInfo {
            handle: *handle,
            size: self.entry(*handle)?.len(),
        })
    }

    fn open(&self, handle: &usize) -> Result<ByteWindow<'_>> {
        Ok(self.entry(*handle)?.window(&self.stream))
    }

    fn add_file(&mut self, handle: &usize, source: Source, policy: ConflictPolicy) -> Result<()> {
        if self.entries.contains_key(handle) {
            match policy {
                ConflictPolicy::ThrowError => return Err(FileExistsError::Index(*handle).into()),
                ConflictPolicy::Ignore => return Ok(()),
                ConflictPolicy::Replace => {}
            }
        }

        self.entries.insert(*handle, EntryData::Buffered(source));
        self.next_handle = self.next_handle.max(handle + 1);
        Ok(())
    }

    fn delete(&mut self, handle: &usize) -> Result<()> {
        self.entries
            .remove(handle)
            .map(|_| ())
            .ok_or_else(|| FileNotFoundError::Index(*handle).into())
    }

    fn entries(&self, _traversal: Traversal) -> impl Iterator<Item = usize> + '_ {
        self.entries.keys().copied()
    }

    #[instrument(skip_all, err)]
    fn save<W: Write + Seek>(&self, writer: W) -> Result<W> {
        let stream = &self.stream;
        let mut writer: FixupWriter<'_, W, ()> = FixupWriter::new(writer, Endian::Big);

        writer.write_value(&(self.entries.len() as u64))?;
        for data in self.entries.values() {
            let length = u32::try_from(data.len())
                .map_err(|_| Error::MalformedArchive("entry is too large for an ACX".into()))?;

            writer.write_offset(move |writer, _| {
                data.copy_to(stream, writer)?;
                writer.align(ALIGNMENT)
            })?;
            writer.write_value(&length)?;
        }

        writer.finish(&mut ())
    }
}

impl<R: Read + Seek> IndexedArchive for AcxArchive<R> {
    fn allocate_handle(&self) -> usize {
        self.next_handle
    }
}
