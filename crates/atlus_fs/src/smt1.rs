//! Types for reading and writing the SMT1 `DATA.BIN` archive
//!
//! `DATA.BIN` has no index of its own. Its file table is an array of
//! [`OFFSET_COUNT`] little endian offsets inside the game executable, where
//! file `n` spans from offset `n` to offset `n + 1`. The number of files is
//! fixed, so entries can be replaced but never added or removed.

use std::{
    fmt::{self, Debug},
    fs::{File, OpenOptions},
    io::{self, Read, Seek, SeekFrom, Write},
    path::Path,
};

use binrw::{BinRead, BinWrite, Endian};
use tracing::{debug, instrument};

use crate::{
    archive::{
        commit_temporary, create_temporary, pad_to, Archive, Capabilities, ConflictPolicy,
        Traversal,
    },
    entry::{EntryData, Source},
    error::{Error, FileExistsError, FileNotFoundError, Result},
    window::{ByteWindow, SharedStream},
};

/// Name of the executable holding the file table
pub const EXECUTABLE_NAME: &str = "SLPS_031.70";
/// Position of the file table in the executable
pub const TABLE_OFFSET: u64 = 0x8F140;
/// Number of offsets in the file table
pub const OFFSET_COUNT: usize = 1228;
/// Number of files in the archive
pub const FILE_COUNT: usize = OFFSET_COUNT - 1;

const SECTOR_LEN: u64 = 2048;
const FIXED_SIZE: &str = "SMT1 archives have a fixed number of files";

/// Information on an SMT1 entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Smt1Info {
    pub handle: usize,
    pub size: u64,
}

/// Read the file table from a game executable.
#[instrument(skip(executable), err)]
pub fn read_table<E: Read + Seek>(executable: &mut E) -> Result<Vec<u32>> {
    let length = executable.seek(SeekFrom::End(0))?;
    if length < TABLE_OFFSET + 4 * OFFSET_COUNT as u64 {
        return Err(Error::InvalidArchive);
    }

    executable.seek(SeekFrom::Start(TABLE_OFFSET))?;
    let table = (0..OFFSET_COUNT)
        .map(|_| i32::read_options(&mut *executable, Endian::Little, ()))
        .map(|offset| {
            u32::try_from(offset?)
                .map_err(|_| Error::MalformedArchive("negative offset in the file table".into()))
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(table)
}

/// Overwrite the file table in a game executable.
#[instrument(skip_all, err)]
pub fn write_table<E: Write + Seek>(executable: &mut E, table: &[u32]) -> Result<()> {
    if table.len() != OFFSET_COUNT {
        return Err(Error::MalformedArchive(format!(
            "the file table needs {OFFSET_COUNT} offsets, got {}",
            table.len()
        )));
    }

    executable.seek(SeekFrom::Start(TABLE_OFFSET))?;
    for offset in table {
        let offset = i32::try_from(*offset)
            .map_err(|_| Error::MalformedArchive(format!("offset {offset:#X} is too large")))?;
        offset.write_options(&mut *executable, Endian::Little, ())?;
    }
    Ok(())
}

/// SMT1 archive
///
/// Every one of the [`FILE_COUNT`] handles always exists. A freshly created
/// archive has no content for any of them until it is filled in with
/// [`ConflictPolicy::Replace`].
pub struct Smt1Archive<R = io::Empty> {
    stream: SharedStream<R>,
    slots: Vec<Option<EntryData>>,
}

impl<R> Debug for Smt1Archive<R> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Smt1Archive")
            .field("filled", &self.slots.iter().flatten().count())
            .finish()
    }
}

impl Smt1Archive {
    pub fn new() -> Self {
        Self {
            stream: SharedStream::new(io::empty()),
            slots: vec![None; FILE_COUNT],
        }
    }
}

impl Default for Smt1Archive {
    fn default() -> Self {
        Self::new()
    }
}

impl Smt1Archive<File> {
    /// Open `DATA.BIN` at `path`, reading the table from the executable beside it
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        Self::load_with_executable(path, path.with_file_name(EXECUTABLE_NAME))
    }

    pub fn load_with_executable(path: impl AsRef<Path>, executable: impl AsRef<Path>) -> Result<Self> {
        let mut executable = File::open(executable)?;
        Self::from_readers(File::open(path)?, &mut executable)
    }
}

impl<R: Read + Seek> Smt1Archive<R> {
    /// Read the archive from `DATA.BIN` and the executable holding its table
    #[instrument(skip_all, err)]
    pub fn from_readers<E: Read + Seek>(mut reader: R, executable: &mut E) -> Result<Self> {
        let table = read_table(executable)?;
        let stream_len = reader.seek(SeekFrom::End(0))?;

        let slots = table
            .windows(2)
            .enumerate()
            .map(|(handle, pair)| {
                let (offset, end) = (u64::from(pair[0]), u64::from(pair[1]));
                if end < offset || end > stream_len {
                    return Err(Error::MalformedArchive(format!(
                        "file {handle} spans {offset:#X}..{end:#X} outside of the archive"
                    )));
                }
                Ok(Some(EntryData::Stored {
                    offset,
                    length: end - offset,
                }))
            })
            .collect::<Result<Vec<_>>>()?;
        debug!(stream_len, "read smt1");

        Ok(Self {
            stream: SharedStream::new(reader),
            slots,
        })
    }

    /// Unwrap and return the inner reader object
    ///
    /// The position of the reader is undefined.
    pub fn into_inner(self) -> R {
        self.stream.into_inner()
    }

    /// Write `DATA.BIN` into `writer` and its file table into `executable`.
    #[instrument(skip_all, err)]
    pub fn save_with_executable<W, E>(&self, writer: W, executable: &mut E) -> Result<W>
    where
        W: Write + Seek,
        E: Write + Seek,
    {
        let length = executable.seek(SeekFrom::End(0))?;
        if length < TABLE_OFFSET + 4 * OFFSET_COUNT as u64 {
            return Err(Error::InvalidArchive);
        }

        let (writer, table) = self.write_data(writer)?;
        write_table(executable, &table)?;
        Ok(writer)
    }

    /// Save `DATA.BIN` to `path` and, when given, patch the table of `executable` in place.
    #[instrument(skip(self), err)]
    pub fn save_to_paths(&self, path: &Path, executable: Option<&Path>) -> Result<()> {
        let (temporary, writer) = create_temporary(path)?;
        let writer = match executable {
            Some(executable) => {
                let mut executable = OpenOptions::new().read(true).write(true).open(executable)?;
                let writer = self.save_with_executable(writer, &mut executable)?;
                executable.sync_all()?;
                writer
            }
            None => self.save(writer)?,
        };
        commit_temporary(&temporary, path, writer)
    }

    fn write_data<W: Write + Seek>(&self, mut writer: W) -> Result<(W, Vec<u32>)> {
        let start = writer.stream_position()?;
        let mut table = Vec::with_capacity(OFFSET_COUNT);

        let position = |writer: &mut W| -> Result<u32> {
            let offset = writer.stream_position()? - start;
            u32::try_from(offset)
                .map_err(|_| Error::MalformedArchive("DATA.BIN grew past 4 GiB".into()))
        };

        for (handle, slot) in self.slots.iter().enumerate() {
            let data = slot
                .as_ref()
                .ok_or(Error::FileNotFound(FileNotFoundError::Index(handle)))?;

            table.push(position(&mut writer)?);
            data.copy_to(&self.stream, &mut writer)?;
            pad_to(&mut writer, SECTOR_LEN)?;
        }
        table.push(position(&mut writer)?);

        Ok((writer, table))
    }
}

impl<R> Smt1Archive<R> {
    fn slot(&self, handle: usize) -> Result<&EntryData> {
        self.slots
            .get(handle)
            .and_then(Option::as_ref)
            .ok_or(Error::FileNotFound(FileNotFoundError::Index(handle)))
    }
}

impl<R: Read + Seek> Archive for Smt1Archive<R> {
    type Handle = usize;
    type Info = Smt1Info;

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            read_only: false,
            has_directories: false,
            can_save: true,
            can_add_or_remove: false,
        }
    }

    fn len(&self) -> usize {
        self.slots.len()
    }

    fn exists(&self, handle: &usize) -> bool {
        *handle < self.slots.len()
    }

    fn info(&self, handle: &usize) -> Result<Smt1Info> {
        Ok(Smt1Info {
            handle: *handle,
            size: self.slot(*handle)?.len(),
        })
    }

    fn open(&self, handle: &usize) -> Result<ByteWindow<'_>> {
        Ok(self.slot(*handle)?.window(&self.stream))
    }

    fn add_file(&mut self, handle: &usize, source: Source, policy: ConflictPolicy) -> Result<()> {
        let slot = self
            .slots
            .get_mut(*handle)
            .ok_or(Error::Unsupported(FIXED_SIZE))?;

        match policy {
            ConflictPolicy::ThrowError => Err(FileExistsError::Index(*handle).into()),
            ConflictPolicy::Ignore => Ok(()),
            ConflictPolicy::Replace => {
                *slot = Some(EntryData::Buffered(source));
                Ok(())
            }
        }
    }

    fn delete(&mut self, _handle: &usize) -> Result<()> {
        Err(Error::Unsupported(FIXED_SIZE))
    }

    fn entries(&self, _traversal: Traversal) -> impl Iterator<Item = usize> + '_ {
        0..self.slots.len()
    }

    /// Write `DATA.BIN` alone, leaving the executable untouched
    fn save<W: Write + Seek>(&self, writer: W) -> Result<W> {
        Ok(self.write_data(writer)?.0)
    }

    /// Save to `path`, updating the table of an executable found beside it
    fn save_to_path(&self, path: &Path) -> Result<()> {
        let executable = path.with_file_name(EXECUTABLE_NAME);
        if executable.is_file() {
            self.save_to_paths(path, Some(&executable))
        } else {
            self.save_to_paths(path, None)
        }
    }
}

#[cfg(test)]
mod test {
    use std::io::Cursor;

    use pretty_assertions::assert_eq;
    use tracing_test::traced_test;

    use super::{read_table, Smt1Archive, FILE_COUNT, OFFSET_COUNT, TABLE_OFFSET};
    use crate::{
        archive::{Archive, ConflictPolicy},
        error::{Error, Result},
    };

    fn executable(offsets: impl Iterator<Item = u32>) -> Vec<u8> {
        let mut data = vec![0xCC; TABLE_OFFSET as usize];
        for offset in offsets {
            data.extend(offset.to_le_bytes());
        }
        data.extend([0xCC; 16]);
        data
    }

    /// Every file is 4 bytes holding its own index
    fn sample() -> (Vec<u8>, Vec<u8>) {
        let data = (0..FILE_COUNT as u32).flat_map(u32::to_le_bytes).collect();
        (data, executable((0..OFFSET_COUNT as u32).map(|i| i * 4)))
    }

    #[traced_test]
    #[test]
    fn read() -> Result<()> {
        let (data, exe) = sample();
        let smt1 = Smt1Archive::from_readers(Cursor::new(data), &mut Cursor::new(exe))?;

        assert_eq!(smt1.len(), FILE_COUNT);
        assert_eq!(smt1.open(&5)?.read_remaining()?, 5u32.to_le_bytes().to_vec());
        assert_eq!(smt1.info(&1226)?.size, 4);
        assert!(!smt1.exists(&FILE_COUNT));

        Ok(())
    }

    #[test]
    fn executable_too_short() {
        let mut exe = Cursor::new(vec![0u8; 1024]);
        assert!(matches!(read_table(&mut exe), Err(Error::InvalidArchive)));
    }

    #[test]
    fn offsets_out_of_range() {
        let (data, _) = sample();
        let exe = executable((0..OFFSET_COUNT as u32).map(|i| i * 8));
        assert!(matches!(
            Smt1Archive::from_readers(Cursor::new(data), &mut Cursor::new(exe)),
            Err(Error::MalformedArchive(_))
        ));
    }

    #[test]
    fn only_replacement_is_allowed() -> Result<()> {
        let (data, exe) = sample();
        let mut smt1 = Smt1Archive::from_readers(Cursor::new(data), &mut Cursor::new(exe))?;

        assert!(matches!(
            smt1.add_file(&0, vec![1].into(), ConflictPolicy::ThrowError),
            Err(Error::FileExists(_))
        ));
        assert!(matches!(
            smt1.add_file(&FILE_COUNT, vec![1].into(), ConflictPolicy::Replace),
            Err(Error::Unsupported(_))
        ));
        assert!(matches!(smt1.delete(&0), Err(Error::Unsupported(_))));

        smt1.add_file(&0, vec![1].into(), ConflictPolicy::Ignore)?;
        assert_eq!(smt1.open(&0)?.read_remaining()?, vec![0, 0, 0, 0]);

        smt1.add_file(&0, vec![0xAB; 3].into(), ConflictPolicy::Replace)?;
        assert_eq!(smt1.open(&0)?.read_remaining()?, vec![0xAB; 3]);

        Ok(())
    }

    #[traced_test]
    #[test]
    fn save_pads_to_sectors_and_rewrites_table() -> Result<()> {
        let (data, exe) = sample();
        let mut smt1 = Smt1Archive::from_readers(Cursor::new(data), &mut Cursor::new(exe.clone()))?;
        smt1.add_file(&1, vec![0xEE; 2049].into(), ConflictPolicy::Replace)?;

        let mut new_exe = Cursor::new(exe);
        let saved = smt1.save_with_executable(Cursor::new(Vec::new()), &mut new_exe)?;
        let saved = saved.into_inner();
        assert_eq!(saved.len(), (FILE_COUNT + 1) * 2048);

        let table = read_table(&mut new_exe)?;
        assert_eq!(&table[..4], &[0, 2048, 6144, 8192]);
        assert_eq!(table[OFFSET_COUNT - 1] as usize, saved.len());

        let reloaded = Smt1Archive::from_readers(Cursor::new(saved), &mut new_exe)?;
        assert_eq!(reloaded.info(&1)?.size, 4096);
        assert_eq!(&reloaded.open(&2)?.read_remaining()?[..4], &2u32.to_le_bytes());

        Ok(())
    }

    #[test]
    fn empty_slots_cannot_be_saved() {
        let smt1 = Smt1Archive::new();
        assert!(matches!(smt1.open(&0), Err(Error::FileNotFound(_))));
        assert!(matches!(smt1.save_to_vec(), Err(Error::FileNotFound(_))));
    }
}
