//! Types for reading and writing PAK archives
//!
//! PAK archives are flat lists of named files in one of five layouts, picked by
//! [`detect::detect`] when an archive is loaded.

pub mod detect;
pub mod types;

use std::{
    fmt::{self, Debug},
    fs::File,
    io::{self, Read, Seek, SeekFrom, Write},
    path::Path,
};

use binrw::{BinRead, BinWrite, Endian};
use indexmap::IndexMap;
use tracing::{debug, instrument, warn};

use crate::{
    archive::{align, pad_to, write_zeros, Archive, Capabilities, ConflictPolicy, Traversal},
    entry::{EntryData, Source},
    error::{Error, FileExistsError, FileNotFoundError, Result},
    window::{ByteWindow, SharedStream},
};
use types::PakRecord;

pub(crate) const V1_NAME_LEN: usize = 252;
const V1_ALIGNMENT: u64 = 64;
const V1_TERMINATOR_LEN: u64 = 256;
const COUNTED_ALIGNMENT: u64 = 32;

/// The on-disk layout of a PAK archive
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PakVersion {
    /// Header-less records with 252 byte names, aligned to 64 bytes
    #[default]
    V1,
    /// Entry count followed by records with 32 byte names
    V2,
    /// [`PakVersion::V2`] in big endian
    V2Be,
    /// Entry count followed by records with 24 byte names
    V3,
    /// [`PakVersion::V3`] in big endian
    V3Be,
}

impl PakVersion {
    pub fn endian(self) -> Endian {
        match self {
            PakVersion::V2Be | PakVersion::V3Be => Endian::Big,
            _ => Endian::Little,
        }
    }

    /// Width of the name field of a record
    pub fn name_len(self) -> usize {
        match self {
            PakVersion::V1 => V1_NAME_LEN,
            PakVersion::V2 | PakVersion::V2Be => 32,
            PakVersion::V3 | PakVersion::V3Be => 24,
        }
    }

    /// Size of a record header
    pub fn record_len(self) -> usize {
        self.name_len() + 4
    }

    /// Whether the archive starts with an entry count
    pub fn is_counted(self) -> bool {
        self != PakVersion::V1
    }
}

impl fmt::Display for PakVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PakVersion::V1 => "v1",
            PakVersion::V2 => "v2",
            PakVersion::V2Be => "v2be",
            PakVersion::V3 => "v3",
            PakVersion::V3Be => "v3be",
        };
        f.write_str(name)
    }
}

/// Information on a PAK entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PakInfo {
    /// Name of the entry as stored
    pub name: String,
    /// Length of the content in bytes
    pub size: u64,
}

#[derive(Debug, Clone)]
struct PakEntry {
    name: String,
    data: EntryData,
}

/// Names are looked up without regard to ASCII case
fn key(name: &str) -> String {
    name.to_ascii_lowercase()
}

/// PAK archive
///
/// ```
/// use atlus_fs::{pak::{PakArchive, PakVersion}, Archive, ConflictPolicy};
///
/// # fn doit() -> atlus_fs::error::Result<()> {
/// let mut pak = PakArchive::new(PakVersion::V3);
/// pak.add_file("init.bin", b"data".to_vec().into(), ConflictPolicy::ThrowError)?;
///
/// let bytes = pak.save_to_vec()?;
/// let loaded = PakArchive::from_reader(std::io::Cursor::new(bytes))?;
/// assert_eq!(loaded.version(), PakVersion::V3);
/// assert!(loaded.exists("INIT.BIN"));
/// # Ok(())
/// # }
/// # doit().unwrap();
/// ```
pub struct PakArchive<R = io::Empty> {
    stream: SharedStream<R>,
    version: PakVersion,
    entries: IndexMap<String, PakEntry>,
}

impl<R> Debug for PakArchive<R> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("PakArchive")
            .field("version", &self.version)
            .field("entries", &self.entries.len())
            .finish()
    }
}

impl PakArchive {
    /// Create an empty archive that will be saved in the given layout
    ///
    /// Layout detection needs at least one record with content, so an archive
    /// saved without entries, or a counted one whose only entry is empty, is
    /// not recognised when it is read back.
    pub fn new(version: PakVersion) -> Self {
        Self {
            stream: SharedStream::new(io::empty()),
            version,
            entries: IndexMap::new(),
        }
    }
}

impl PakArchive<File> {
    /// Open and read the PAK archive at `path`
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_reader(File::open(path)?)
    }
}

impl<R: Read + Seek> PakArchive<R> {
    /// Read a PAK archive, detecting its layout.
    ///
    /// Pass `&mut reader` to keep ownership of the stream.
    #[instrument(skip(reader), err)]
    pub fn from_reader(mut reader: R) -> Result<Self> {
        let version = detect::detect_stream(&mut reader)?.ok_or(Error::InvalidArchive)?;
        let entries = Self::read_entries(&mut reader, version)?;
        debug!(%version, count = entries.len(), "read pak");

        Ok(Self {
            stream: SharedStream::new(reader),
            version,
            entries,
        })
    }

    fn read_entries(reader: &mut R, version: PakVersion) -> Result<IndexMap<String, PakEntry>> {
        let stream_len = reader.seek(SeekFrom::End(0))?;
        reader.seek(SeekFrom::Start(0))?;

        let endian = version.endian();
        let remaining = if version.is_counted() {
            i32::read_options(reader, endian, ())?.max(0) as usize
        } else {
            usize::MAX
        };

        let mut entries = IndexMap::new();
        for _ in 0..remaining {
            let start = reader.stream_position()?;
            if stream_len.saturating_sub(start) < version.record_len() as u64 {
                if start < stream_len {
                    warn!(start, "trailing bytes after the last record");
                }
                break;
            }

            let record = PakRecord::read_options(reader, endian, (version.name_len(),))?;
            let Some(length) = record.entry_length() else {
                break;
            };

            let offset = start + version.record_len() as u64;
            if offset + length > stream_len {
                return Err(Error::MalformedArchive(format!(
                    "{} extends past the end of the archive",
                    record.name()
                )));
            }

            let name = record.name();
            entries.insert(
                key(&name),
                PakEntry {
                    name,
                    data: EntryData::Stored { offset, length },
                },
            );

            let next = match version {
                PakVersion::V1 => align(offset + length, V1_ALIGNMENT),
                _ => offset + length,
            };
            reader.seek(SeekFrom::Start(next))?;
        }

        Ok(entries)
    }

    /// Unwrap and return the inner reader object
    ///
    /// The position of the reader is undefined.
    pub fn into_inner(self) -> R {
        self.stream.into_inner()
    }
}

impl<R> PakArchive<R> {
    /// Layout the archive was read in, and will be saved in
    pub fn version(&self) -> PakVersion {
        self.version
    }

    /// Change the layout used when saving
    pub fn set_version(&mut self, version: PakVersion) {
        self.version = version;
    }

    fn entry(&self, name: &str) -> Result<&PakEntry> {
        self.entries
            .get(&key(name))
            .ok_or_else(|| Error::FileNotFound(FileNotFoundError::Name(name.to_owned())))
    }
}

impl<R: Read + Seek> Archive for PakArchive<R> {
    type Handle = str;
    type Info = PakInfo;

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

    fn exists(&self, handle: &str) -> bool {
        self.entries.contains_key(&key(handle))
    }

    fn info(&self, handle: &str) -> Result<PakInfo> {
        let entry = self.entry(handle)?;
        Ok(PakInfo {
            name: entry.name.clone(),
            size: entry.data.len(),
        })
    }

    fn open(&self, handle: &str) -> Result<ByteWindow<'_>> {
        Ok(self.entry(handle)?.data.window(&self.stream))
    }

    #[instrument(skip(self, source), err)]
    fn add_file(&mut self, handle: &str, source: Source, policy: ConflictPolicy) -> Result<()> {
        PakRecord::new(handle, self.version.name_len(), source.len() as u64)?;

        if let Some(entry) = self.entries.get_mut(&key(handle)) {
            match policy {
                ConflictPolicy::ThrowError => {
                    return Err(FileExistsError::Name(handle.to_owned()).into())
                }
                ConflictPolicy::Ignore => return Ok(()),
                ConflictPolicy::Replace => {
                    entry.data = EntryData::Buffered(source);
                    return Ok(());
                }
            }
        }

        self.entries.insert(
            key(handle),
            PakEntry {
                name: handle.to_owned(),
                data: EntryData::Buffered(source),
            },
        );
        Ok(())
    }

    #[instrument(skip(self), err)]
    fn delete(&mut self, handle: &str) -> Result<()> {
        self.entries
            .shift_remove(&key(handle))
            .map(|_| ())
            .ok_or_else(|| FileNotFoundError::Name(handle.to_owned()).into())
    }

    fn entries(&self, _traversal: Traversal) -> impl Iterator<Item = String> + '_ {
        self.entries.values().map(|entry| entry.name.clone())
    }

    /// Write the archive in [`PakArchive::version`]'s layout.
    ///
    /// See [`PakArchive::new`] for archives that cannot be read back.
    #[instrument(skip_all, err)]
    fn save<W: Write + Seek>(&self, mut writer: W) -> Result<W> {
        let version = self.version;
        let endian = version.endian();

        if version.is_counted() {
            let count = i32::try_from(self.entries.len())
                .map_err(|_| Error::MalformedArchive("too many entries".into()))?;
            count.write_options(&mut writer, endian, ())?;
        }

        for entry in self.entries.values() {
            let length = entry.data.len();
            let padding = match version {
                PakVersion::V1 => 0,
                _ => align(length, COUNTED_ALIGNMENT) - length,
            };

            PakRecord::new(&entry.name, version.name_len(), length + padding)?
                .write_options(&mut writer, endian, ())?;
            entry.data.copy_to(&self.stream, &mut writer)?;

            match version {
                PakVersion::V1 => pad_to(&mut writer, V1_ALIGNMENT)?,
                _ => write_zeros(&mut writer, padding)?,
            }
        }

        if version == PakVersion::V1 {
            write_zeros(&mut writer, V1_TERMINATOR_LEN)?;
        }

        Ok(writer)
    }
}
