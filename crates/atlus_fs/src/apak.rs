//! Types for reading APAK archives
//!
//! APAK archives can only be read. The byte order is given by the signature,
//! `APAK` for little endian and `KAPA` for big endian.

use std::{
    fmt::{self, Debug},
    fs::File,
    io::{Read, Seek, SeekFrom, Write},
    path::Path,
};

use binrw::{BinRead, Endian};
use indexmap::IndexMap;
use tracing::{debug, instrument};

use crate::{
    archive::{field_to_name, Archive, Capabilities, ConflictPolicy, Traversal},
    entry::{EntryData, Source},
    error::{Error, FileNotFoundError, Result},
    window::{ByteWindow, SharedStream},
};

const READ_ONLY: &str = "APAK archives are read-only";
const HEADER_LEN: u64 = 24;
const RECORD_LEN: u64 = 64;

/// Fields following the signature
#[derive(BinRead, Debug, Clone, PartialEq, Eq)]
pub struct ApakHeader {
    pub field04: i16,
    pub field06: i16,
    pub file_count: i32,
    pub field0c: i32,
    pub header_size: i32,
    pub length: i32,
}

/// APAK file record
#[derive(BinRead, Debug, Clone, PartialEq, Eq)]
pub struct ApakRecord {
    pub hash: i32,
    pub offset: i32,
    pub size: i32,
    pub aligned_size: i32,
    pub alignment: i32,
    pub field10: i32,
    pub field14: i32,
    pub field18: i32,
    name: [u8; 32],
}

impl ApakRecord {
    pub fn name(&self) -> String {
        field_to_name(&self.name)
    }
}

/// Information on an APAK entry
pub type ApakInfo = ApakRecord;

struct ApakEntry {
    record: ApakRecord,
    data: EntryData,
}

/// APAK archive
pub struct ApakArchive<R> {
    stream: SharedStream<R>,
    endian: Endian,
    header: ApakHeader,
    entries: IndexMap<String, ApakEntry>,
}

impl<R> Debug for ApakArchive<R> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("ApakArchive")
            .field("endian", &self.endian)
            .field("header", &self.header)
            .field("entries", &self.entries.len())
            .finish()
    }
}

impl ApakArchive<File> {
    /// Open and read the APAK archive at `path`
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_reader(File::open(path)?)
    }
}

impl<R: Read + Seek> ApakArchive<R> {
    #[instrument(skip(reader), err)]
    pub fn from_reader(mut reader: R) -> Result<Self> {
        let stream_len = reader.seek(SeekFrom::End(0))?;
        reader.seek(SeekFrom::Start(0))?;

        let mut signature = [0u8; 4];
        reader.read_exact(&mut signature)?;
        let endian = match &signature {
            b"APAK" => Endian::Little,
            b"KAPA" => Endian::Big,
            _ => return Err(Error::InvalidArchive),
        };

        let header = ApakHeader::read_options(&mut reader, endian, ())?;
        let count = usize::try_from(header.file_count)
            .map_err(|_| Error::MalformedArchive("negative file count".into()))?;
        if HEADER_LEN + count as u64 * RECORD_LEN > stream_len {
            return Err(Error::MalformedArchive(format!(
                "{count} records do not fit in {stream_len} bytes"
            )));
        }

        let mut entries = IndexMap::with_capacity(count);
        for _ in 0..count {
            let record = ApakRecord::read_options(&mut reader, endian, ())?;
            let name = record.name();

            let (Ok(offset), Ok(length)) = (u64::try_from(record.offset), u64::try_from(record.size))
            else {
                return Err(Error::MalformedArchive(format!("{name} has a negative range")));
            };
            if offset + length > stream_len {
                return Err(Error::MalformedArchive(format!(
                    "{name} extends past the end of the archive"
                )));
            }

            let key = name.to_ascii_lowercase();
            if entries.contains_key(&key) {
                return Err(Error::MalformedArchive(format!("{name} is stored twice")));
            }
            entries.insert(
                key,
                ApakEntry {
                    record,
                    data: EntryData::Stored { offset, length },
                },
            );
        }
        debug!(?endian, count, "read apak");

        Ok(Self {
            stream: SharedStream::new(reader),
            endian,
            header,
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

impl<R> ApakArchive<R> {
    pub fn endian(&self) -> Endian {
        self.endian
    }

    pub fn header(&self) -> &ApakHeader {
        &self.header
    }

    fn entry(&self, name: &str) -> Result<&ApakEntry> {
        self.entries
            .get(&name.to_ascii_lowercase())
            .ok_or_else(|| Error::FileNotFound(FileNotFoundError::Name(name.to_owned())))
    }
}

impl<R: Read + Seek> Archive for ApakArchive<R> {
    type Handle = str;
    type Info = ApakInfo;

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            read_only: true,
            has_directories: false,
            can_save: false,
            can_add_or_remove: false,
        }
    }

    fn len(&self) -> usize {
        self.entries.len()
    }

    fn exists(&self, handle: &str) -> bool {
        self.entries.contains_key(&handle.to_ascii_lowercase())
    }

    fn info(&self, handle: &str) -> Result<ApakInfo> {
        Ok(self.entry(handle)?.record.clone())
    }

    fn open(&self, handle: &str) -> Result<ByteWindow<'_>> {
        Ok(self.entry(handle)?.data.window(&self.stream))
    }

    fn add_file(&mut self, _handle: &str, _source: Source, _policy: ConflictPolicy) -> Result<()> {
        Err(Error::Unsupported(READ_ONLY))
    }

    fn add_directory(&mut self, _handle: &str, _policy: ConflictPolicy) -> Result<()> {
        Err(Error::Unsupported(READ_ONLY))
    }

    fn delete(&mut self, _handle: &str) -> Result<()> {
        Err(Error::Unsupported(READ_ONLY))
    }

    fn entries(&self, _traversal: Traversal) -> impl Iterator<Item = String> + '_ {
        self.entries.values().map(|entry| entry.record.name())
    }

    fn save<W: Write + Seek>(&self, _writer: W) -> Result<W> {
        Err(Error::Unsupported(READ_ONLY))
    }

    fn save_to_path(&self, _path: &Path) -> Result<()> {
        Err(Error::Unsupported(READ_ONLY))
    }
}
