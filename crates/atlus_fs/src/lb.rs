//! Types for reading and writing LB archives
//!
//! An LB archive is a run of 16 byte headers, each followed by its payload and
//! padded to 64 bytes, closed by an `END0` sentinel header. Payloads may be
//! compressed with the codec in [`crate::compression`].

use std::{
    cell::OnceCell,
    collections::BTreeMap,
    fmt::{self, Debug},
    fs::File,
    io::{self, Read, Seek, SeekFrom, Write},
    path::Path,
};

use binrw::{BinRead, BinWrite};
use bon::Builder;
use tracing::{debug, instrument, trace, warn};

use crate::{
    archive::{
        align, field_to_name, name_to_field, pad_to, Archive, Capabilities, ConflictPolicy,
        IndexedArchive, Traversal,
    },
    compression,
    entry::{EntryData, Source},
    error::{Error, FileExistsError, FileNotFoundError, Result},
    window::{ByteWindow, SharedStream},
};

const HEADER_LEN: u64 = 16;
const ALIGNMENT: u64 = 64;
const SENTINEL_KIND: u8 = 0xFF;
const DEFAULT_KIND: u8 = 1;

#[derive(BinRead, BinWrite, Debug, Clone, PartialEq)]
#[brw(little)]
struct LbHeader {
    kind: u8,
    compressed: u8,
    user_id: i16,
    /// Payload length plus the header itself
    length: i32,
    extension: [u8; 4],
    decompressed_len: i32,
}

impl LbHeader {
    fn sentinel() -> Self {
        Self {
            kind: SENTINEL_KIND,
            compressed: 0,
            user_id: 0,
            length: HEADER_LEN as i32,
            extension: *b"END0",
            decompressed_len: 0,
        }
    }
}

/// Overrides applied when adding an LB entry
///
/// Fields left unset keep the values of the entry being replaced, or fall back
/// to type `1`, user id `0` and no extension for a new entry.
#[derive(Debug, Clone, Default, Builder)]
pub struct LbEntryOptions {
    /// Type tag stored in the header
    pub kind: Option<u8>,

    /// Game specific identifier stored in the header
    pub user_id: Option<i16>,

    /// Up to four ASCII characters, upper-cased with any leading dot removed
    pub extension: Option<String>,

    /// Run the payload through the codec before storing it
    #[builder(default)]
    pub compress: bool,
}

/// Information on an LB entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LbInfo {
    pub handle: usize,
    pub kind: u8,
    pub compressed: bool,
    pub user_id: i16,
    /// Length of the payload as stored
    pub length: u64,
    pub extension: String,
    pub decompressed_len: u64,
}

#[derive(Debug)]
struct LbEntry {
    kind: u8,
    compressed: bool,
    user_id: i16,
    extension: String,
    decompressed_len: u64,
    data: EntryData,
    decompressed: OnceCell<Vec<u8>>,
}

fn normalize_extension(extension: &str) -> String {
    extension.trim_start_matches('.').to_ascii_uppercase()
}

fn extension_field(extension: &str) -> Result<[u8; 4]> {
    let mut field = [0u8; 4];
    let bytes = name_to_field(extension)
        .filter(|bytes| bytes.len() <= field.len() && !bytes.contains(&0))
        .ok_or_else(|| Error::InvalidName(format!("{extension:?} is not a valid LB extension")))?;
    field[..bytes.len()].copy_from_slice(&bytes);
    Ok(field)
}

/// LB archive
///
/// ```
/// use atlus_fs::{lb::{LbArchive, LbEntryOptions}, ConflictPolicy};
///
/// # fn doit() -> atlus_fs::error::Result<()> {
/// let mut lb = LbArchive::new();
/// lb.add_file_with(
///     0,
///     vec![0u8; 256].into(),
///     ConflictPolicy::ThrowError,
///     LbEntryOptions::builder().extension("tmx".into()).compress(true).build(),
/// )?;
/// assert_eq!(lb.handle_for_extension(".TMX")?, 0);
/// # Ok(())
/// # }
/// # doit().unwrap();
/// ```
pub struct LbArchive<R = io::Empty> {
    stream: SharedStream<R>,
    next_handle: usize,
    entries: BTreeMap<usize, LbEntry>,
}

impl<R> Debug for LbArchive<R> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("LbArchive")
            .field("next_handle", &self.next_handle)
            .field("entries", &self.entries.len())
            .finish()
    }
}

impl LbArchive {
    pub fn new() -> Self {
        Self {
            stream: SharedStream::new(io::empty()),
            next_handle: 0,
            entries: BTreeMap::new(),
        }
    }
}

impl Default for LbArchive {
    fn default() -> Self {
        Self::new()
    }
}

impl LbArchive<File> {
    /// Open and read the LB archive at `path`
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_reader(File::open(path)?)
    }
}

impl<R: Read + Seek> LbArchive<R> {
    /// Read an LB archive, numbering entries from 0 in stream order.
    #[instrument(skip(reader), err)]
    pub fn from_reader(mut reader: R) -> Result<Self> {
        let stream_len = reader.seek(SeekFrom::End(0))?;
        reader.seek(SeekFrom::Start(0))?;

        let mut entries = BTreeMap::new();
        loop {
            let start = reader.stream_position()?;
            if start >= stream_len {
                break;
            }
            if stream_len - start < HEADER_LEN {
                warn!(start, "stream ends inside an entry header");
                break;
            }

            let header = LbHeader::read(&mut reader)?;
            if header.kind == SENTINEL_KIND {
                break;
            }

            let offset = start + HEADER_LEN;
            let length = u64::try_from(header.length)
                .ok()
                .and_then(|length| length.checked_sub(HEADER_LEN))
                .filter(|length| offset + length <= stream_len)
                .ok_or_else(|| {
                    Error::MalformedArchive(format!("entry at {start:#X} has an invalid length"))
                })?;
            let decompressed_len = u64::try_from(header.decompressed_len).map_err(|_| {
                Error::MalformedArchive(format!("entry at {start:#X} has a negative size"))
            })?;

            let handle = entries.len();
            trace!(handle, offset, length, "read entry");
            entries.insert(
                handle,
                LbEntry {
                    kind: header.kind,
                    compressed: header.compressed != 0,
                    user_id: header.user_id,
                    extension: field_to_name(&header.extension),
                    decompressed_len,
                    data: EntryData::Stored { offset, length },
                    decompressed: OnceCell::new(),
                },
            );

            reader.seek(SeekFrom::Start(align(offset + length, ALIGNMENT)))?;
        }
        debug!(count = entries.len(), "read lb");

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

    /// Open the payload exactly as stored, without decompressing it
    pub fn open_raw(&self, handle: usize) -> Result<ByteWindow<'_>> {
        Ok(self.entry(handle)?.data.window(&self.stream))
    }

    /// Add or replace a file with explicit header values
    #[instrument(skip(self, source, options), err)]
    pub fn add_file_with(
        &mut self,
        handle: usize,
        source: Source,
        policy: ConflictPolicy,
        options: LbEntryOptions,
    ) -> Result<()> {
        let existing = self.entries.get(&handle);
        if existing.is_some() {
            match policy {
                ConflictPolicy::ThrowError => return Err(FileExistsError::Index(handle).into()),
                ConflictPolicy::Ignore => return Ok(()),
                ConflictPolicy::Replace => {}
            }
        }

        let (kind, user_id, extension) = match existing {
            Some(entry) => (
                options.kind.unwrap_or(entry.kind),
                options.user_id.unwrap_or(entry.user_id),
                options
                    .extension
                    .map(|extension| normalize_extension(&extension))
                    .unwrap_or_else(|| entry.extension.clone()),
            ),
            None => (
                options.kind.unwrap_or(DEFAULT_KIND),
                options.user_id.unwrap_or_default(),
                options
                    .extension
                    .map(|extension| normalize_extension(&extension))
                    .unwrap_or_default(),
            ),
        };
        extension_field(&extension)?;

        let decompressed_len = source.len() as u64;
        let entry = if options.compress {
            let packed = compression::compress(source.as_slice());
            LbEntry {
                kind,
                compressed: true,
                user_id,
                extension,
                decompressed_len,
                data: EntryData::Buffered(packed.into()),
                decompressed: OnceCell::from(source.into_vec()),
            }
        } else {
            LbEntry {
                kind,
                compressed: false,
                user_id,
                extension,
                decompressed_len,
                data: EntryData::Buffered(source),
                decompressed: OnceCell::new(),
            }
        };

        self.entries.insert(handle, entry);
        self.next_handle = self.next_handle.max(handle + 1);
        Ok(())
    }

    /// Handle of the first entry with the given extension, ignoring case and a leading dot
    pub fn handle_for_extension(&self, extension: &str) -> Result<usize> {
        let extension = normalize_extension(extension);
        self.entries
            .iter()
            .find(|(_, entry)| entry.extension.eq_ignore_ascii_case(&extension))
            .map(|(handle, _)| *handle)
            .ok_or_else(|| FileNotFoundError::Name(extension).into())
    }
}

impl<R> LbArchive<R> {
    fn entry(&self, handle: usize) -> Result<&LbEntry> {
        self.entries
            .get(&handle)
            .ok_or(Error::FileNotFound(FileNotFoundError::Index(handle)))
    }
}

impl<R: Read + Seek> Archive for LbArchive<R> {
    type Handle = usize;
    type Info = LbInfo;

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

    fn info(&self, handle: &usize) -> Result<LbInfo> {
        let entry = self.entry(*handle)?;
        Ok(LbInfo {
            handle: *handle,
            kind: entry.kind,
            compressed: entry.compressed,
            user_id: entry.user_id,
            length: entry.data.len(),
            extension: entry.extension.clone(),
            decompressed_len: entry.decompressed_len,
        })
    }

    /// Open a file, decompressing it on first access
    fn open(&self, handle: &usize) -> Result<ByteWindow<'_>> {
        let entry = self.entry(*handle)?;
        if !entry.compressed {
            return Ok(entry.data.window(&self.stream));
        }

        let decompressed = match entry.decompressed.get() {
            Some(decompressed) => decompressed,
            None => {
                let packed = entry.data.to_vec(&self.stream)?;
                let decoded = compression::decompress(&packed, entry.decompressed_len as usize)?;
                debug!(handle, packed = packed.len(), "decompressed entry");
                entry.decompressed.get_or_init(|| decoded)
            }
        };
        Ok(ByteWindow::new(decompressed, 0, decompressed.len() as u64))
    }

    fn add_file(&mut self, handle: &usize, source: Source, policy: ConflictPolicy) -> Result<()> {
        self.add_file_with(*handle, source, policy, LbEntryOptions::default())
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
    fn save<W: Write + Seek>(&self, mut writer: W) -> Result<W> {
        for entry in self.entries.values() {
            let length = entry.data.len();
            let too_large = || Error::MalformedArchive("entry is too large for an LB".into());

            LbHeader {
                kind: entry.kind,
                compressed: entry.compressed.into(),
                user_id: entry.user_id,
                length: i32::try_from(length + HEADER_LEN).map_err(|_| too_large())?,
                extension: extension_field(&entry.extension)?,
                decompressed_len: i32::try_from(entry.decompressed_len).map_err(|_| too_large())?,
            }
            .write(&mut writer)?;

            entry.data.copy_to(&self.stream, &mut writer)?;
            pad_to(&mut writer, ALIGNMENT)?;
        }

        LbHeader::sentinel().write(&mut writer)?;
        pad_to(&mut writer, ALIGNMENT)?;

        Ok(writer)
    }
}

impl<R: Read + Seek> IndexedArchive for LbArchive<R> {
    fn allocate_handle(&self) -> usize {
        self.next_handle
    }
}

#[cfg(test)]
mod test {
    use std::io::Cursor;

    use pretty_assertions::assert_eq;
    use tracing_test::traced_test;

    use super::{LbArchive, LbEntryOptions};
    use crate::{
        archive::{Archive, ConflictPolicy, IndexedArchive, Traversal},
        error::{Error, Result},
    };

    fn entry(kind: u8, compressed: u8, user_id: i16, ext: &[u8; 4], payload: &[u8], decompressed_len: i32) -> Vec<u8> {
        let mut data = vec![kind, compressed];
        data.extend(user_id.to_le_bytes());
        data.extend((payload.len() as i32 + 16).to_le_bytes());
        data.extend(ext);
        data.extend(decompressed_len.to_le_bytes());
        data.extend(payload);
        data.resize(data.len().div_ceil(64) * 64, 0);
        data
    }

    fn sample() -> Vec<u8> {
        let mut data = entry(1, 0, 5, b"TMX\0", b"\x01\x02\x03\x04", 4);
        data.extend(entry(2, 1, -1, b"BF\0\0", &[0x24, 0x43, 0x05, 0x03, 0x01, 0x02, 0x03], 10));
        data.extend(entry(0xFF, 0, 0, b"END0", &[], 0));
        data
    }

    #[traced_test]
    #[test]
    fn read_plain_and_compressed() -> Result<()> {
        let lb = LbArchive::from_reader(Cursor::new(sample()))?;
        assert_eq!(lb.len(), 2);
        assert_eq!(lb.entries(Traversal::TopLevel).collect::<Vec<_>>(), vec![0, 1]);

        let info = lb.info(&0)?;
        assert_eq!(info.kind, 1);
        assert_eq!(info.user_id, 5);
        assert_eq!(info.extension, "TMX");
        assert_eq!(lb.open(&0)?.read_remaining()?, vec![1, 2, 3, 4]);

        let info = lb.info(&1)?;
        assert!(info.compressed);
        assert_eq!(info.length, 7);
        assert_eq!(info.decompressed_len, 10);

        let expected = vec![0, 0, 0, 0, 5, 5, 5, 1, 2, 3];
        assert_eq!(lb.open(&1)?.read_remaining()?, expected);
        // served from the memoised buffer the second time
        assert_eq!(lb.open(&1)?.read_remaining()?, expected);
        assert_eq!(lb.open_raw(1)?.len(), 7);

        Ok(())
    }

    #[test]
    fn sentinel_stops_reading() -> Result<()> {
        let mut data = sample();
        data.extend(entry(1, 0, 0, b"JUNK", b"ignored", 7));

        let lb = LbArchive::from_reader(Cursor::new(data))?;
        assert_eq!(lb.len(), 2);
        assert_eq!(lb.allocate_handle(), 2);

        Ok(())
    }

    #[test]
    fn payload_past_end_is_malformed() {
        let mut data = entry(1, 0, 0, b"BIN\0", &[0; 8], 8);
        data[4] = 0x7F;
        assert!(matches!(
            LbArchive::from_reader(Cursor::new(data)),
            Err(Error::MalformedArchive(_))
        ));
    }

    #[traced_test]
    #[test]
    fn write_entry_and_sentinel() -> Result<()> {
        let mut lb = LbArchive::new();
        let handle = lb.allocate_handle();
        lb.add_file_with(
            handle,
            vec![0xAA, 0xBB, 0xCC].into(),
            ConflictPolicy::ThrowError,
            LbEntryOptions::builder().extension(".bin".into()).build(),
        )?;

        #[rustfmt::skip]
        let mut expected = vec![
            0x01, 0x00, 0x00, 0x00,
            0x13, 0x00, 0x00, 0x00,
            b'B', b'I', b'N', 0x00,
            0x03, 0x00, 0x00, 0x00,
            0xAA, 0xBB, 0xCC,
        ];
        expected.resize(64, 0);
        #[rustfmt::skip]
        expected.extend([
            0xFF, 0x00, 0x00, 0x00,
            0x10, 0x00, 0x00, 0x00,
            b'E', b'N', b'D', b'0',
            0x00, 0x00, 0x00, 0x00,
        ]);
        expected.resize(128, 0);

        assert_eq!(lb.save_to_vec()?, expected);

        Ok(())
    }

    #[test]
    fn compressed_entries_survive_saving() -> Result<()> {
        let content: Vec<u8> = (0..512u32).map(|i| (i % 7) as u8 * (i % 3) as u8).collect();

        let mut lb = LbArchive::new();
        let handle = lb.push_file(vec![9; 3].into())?;
        assert_eq!(handle, 0);
        lb.add_file_with(
            1,
            content.clone().into(),
            ConflictPolicy::ThrowError,
            LbEntryOptions::builder().compress(true).user_id(7).build(),
        )?;
        assert_eq!(lb.open(&1)?.read_remaining()?, content);

        let loaded = LbArchive::from_reader(Cursor::new(lb.save_to_vec()?))?;
        let info = loaded.info(&1)?;
        assert!(info.compressed);
        assert_eq!(info.user_id, 7);
        assert_eq!(info.decompressed_len, 512);
        assert_eq!(loaded.open(&1)?.read_remaining()?, content);
        assert_eq!(loaded.open(&0)?.read_remaining()?, vec![9; 3]);

        Ok(())
    }

    #[test]
    fn replace_keeps_header_values() -> Result<()> {
        let mut lb = LbArchive::from_reader(Cursor::new(sample()))?;

        assert!(matches!(
            lb.add_file(&0, vec![1].into(), ConflictPolicy::ThrowError),
            Err(Error::FileExists(_))
        ));
        lb.add_file(&0, vec![1].into(), ConflictPolicy::Ignore)?;
        assert_eq!(lb.open(&0)?.read_remaining()?, vec![1, 2, 3, 4]);

        lb.add_file(&0, vec![8, 8].into(), ConflictPolicy::Replace)?;
        let info = lb.info(&0)?;
        assert_eq!((info.kind, info.user_id, info.extension.as_str()), (1, 5, "TMX"));
        assert_eq!(lb.open(&0)?.read_remaining()?, vec![8, 8]);

        lb.add_file_with(
            0,
            vec![8, 8].into(),
            ConflictPolicy::Replace,
            LbEntryOptions::builder().kind(3).build(),
        )?;
        assert_eq!(lb.info(&0)?.kind, 3);
        assert_eq!(lb.info(&0)?.user_id, 5);

        Ok(())
    }

    #[test]
    fn lookup_by_extension() -> Result<()> {
        let mut lb = LbArchive::from_reader(Cursor::new(sample()))?;
        assert_eq!(lb.handle_for_extension(".tmx")?, 0);
        assert_eq!(lb.handle_for_extension("bf")?, 1);
        assert!(matches!(lb.handle_for_extension("PAC"), Err(Error::FileNotFound(_))));

        lb.delete(&0)?;
        assert!(matches!(lb.handle_for_extension("TMX"), Err(Error::FileNotFound(_))));
        assert!(matches!(lb.delete(&0), Err(Error::FileNotFound(_))));

        Ok(())
    }

    #[test]
    fn extension_must_fit() {
        let mut lb = LbArchive::new();
        let err = lb.add_file_with(
            0,
            vec![0].into(),
            ConflictPolicy::ThrowError,
            LbEntryOptions::builder().extension("TOOLONG".into()).build(),
        );
        assert!(matches!(err, Err(Error::InvalidName(_))));
        assert!(lb.is_empty());
    }
}
