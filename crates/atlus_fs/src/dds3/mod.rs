//! Types for reading and writing DDS3 archives
//!
//! A DDS3 archive is split in two. The `.ddt` index holds 12 byte records
//! along with the names they point to, the `.img` blob holds the file contents
//! aligned to 0x800 byte sectors.
//!
//! | Field         | Type  | Notes                                               |
//! |---------------|-------|-----------------------------------------------------|
//! | `name_offset` | `u32` | NUL terminated name in the index, 0 for the root    |
//! | `offset`      | `u32` | Child records in the index, or a sector of the blob |
//! | `count`       | `i32` | Negated child count for directories, else file size |

mod tree;

use std::{
    collections::HashSet,
    fmt::{self, Debug},
    fs::File,
    io::{self, Read, Seek, SeekFrom, Write},
    path::Path,
};

use binrw::{BinRead, BinWrite, Endian};
use tracing::{debug, instrument, trace};

use crate::{
    archive::{
        commit_temporary, create_temporary, field_to_name, name_to_field, pad_to, Archive,
        Capabilities, ConflictPolicy, Traversal,
    },
    entry::{EntryData, Source},
    error::{Error, FileExistsError, FileNotFoundError, Result},
    fixup::FixupWriter,
    window::{ByteWindow, SharedStream},
};
use tree::{components, Node, NodeId, NodeKind, Tree};

/// Size of an IMG sector
pub const SECTOR_LEN: u64 = 0x800;
const RECORD_LEN: u64 = 12;
const TABLE_ALIGNMENT: u64 = 4;

#[derive(BinRead, BinWrite, Debug, Clone, Copy, PartialEq, Eq)]
#[brw(little)]
struct Dds3Record {
    name_offset: u32,
    offset: u32,
    count: i32,
}

/// Information on a DDS3 entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dds3Info {
    /// Path from the root, separated by `/`
    pub path: String,
    pub is_directory: bool,
    /// Size of a file, 0 for directories
    pub size: u64,
}

/// DDS3 archive
///
/// Handles are paths. Either slash separates components and empty components
/// are skipped, so `/data/file.bin`, `data\file.bin` and `data/file.bin` all
/// name the same file. Names are compared exactly.
pub struct Dds3Archive<R = io::Empty> {
    stream: SharedStream<R>,
    tree: Tree,
}

impl<R> Debug for Dds3Archive<R> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Dds3Archive")
            .field("files", &self.tree.file_count())
            .finish()
    }
}

impl Dds3Archive {
    pub fn new() -> Self {
        Self {
            stream: SharedStream::new(io::empty()),
            tree: Tree::new(),
        }
    }
}

impl Default for Dds3Archive {
    fn default() -> Self {
        Self::new()
    }
}

impl Dds3Archive<File> {
    /// Open the `.ddt` and `.img` pair sharing the stem of `path`
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut ddt = File::open(path.with_extension("ddt"))?;
        Self::from_readers(&mut ddt, File::open(path.with_extension("img"))?)
    }
}

impl<R: Read + Seek> Dds3Archive<R> {
    /// Read the tree from the `ddt` index, with file contents stored in `img`
    #[instrument(skip_all, err)]
    pub fn from_readers<D: Read + Seek>(ddt: &mut D, mut img: R) -> Result<Self> {
        let ddt_len = ddt.seek(SeekFrom::End(0))?;
        let img_len = img.seek(SeekFrom::End(0))?;

        if ddt_len < RECORD_LEN {
            return Err(Error::InvalidArchive);
        }
        ddt.seek(SeekFrom::Start(0))?;
        let root = Dds3Record::read(ddt)?;
        if root.count > 0 {
            return Err(Error::MalformedArchive("root record is not a directory".into()));
        }

        let mut tree = Tree::new();
        let mut visited = HashSet::new();
        let mut pending = vec![(Tree::ROOT, root)];

        while let Some((directory, record)) = pending.pop() {
            if !visited.insert(record.offset) {
                return Err(Error::MalformedArchive(format!(
                    "directory table at {:#X} is referenced more than once",
                    record.offset
                )));
            }

            let count = u64::from(record.count.unsigned_abs());
            let table = u64::from(record.offset);
            if table + count * RECORD_LEN > ddt_len {
                return Err(Error::MalformedArchive(format!(
                    "directory table at {table:#X} extends past the end of the index"
                )));
            }

            for index in 0..count {
                ddt.seek(SeekFrom::Start(table + index * RECORD_LEN))?;
                let child = Dds3Record::read(ddt)?;
                let name = read_name(ddt, child.name_offset, ddt_len)?;

                if child.count < 0 {
                    let id = tree
                        .insert(directory, name, NodeKind::Directory(Default::default()))
                        .ok_or_else(|| Error::MalformedArchive("orphaned record".into()))?;
                    pending.push((id, child));
                } else {
                    let offset = u64::from(child.offset) * SECTOR_LEN;
                    let length = child.count as u64;
                    if offset + length > img_len {
                        return Err(Error::MalformedArchive(format!(
                            "{name} extends past the end of the image"
                        )));
                    }
                    trace!(%name, offset, length, "read file record");
                    tree.insert(directory, name, NodeKind::File(EntryData::Stored { offset, length }))
                        .ok_or_else(|| Error::MalformedArchive("orphaned record".into()))?;
                }
            }
        }
        debug!(files = tree.file_count(), "read dds3");

        Ok(Self {
            stream: SharedStream::new(img),
            tree,
        })
    }

    /// Unwrap and return the inner image reader
    ///
    /// The position of the reader is undefined.
    pub fn into_inner(self) -> R {
        self.stream.into_inner()
    }

    /// Write the index into `ddt` and the file contents into `img`.
    #[instrument(skip_all, err)]
    pub fn save_split<D, I>(&self, ddt: D, mut img: I) -> Result<(D, I)>
    where
        D: Write + Seek,
        I: Write + Seek,
    {
        let mut writer: FixupWriter<'_, D, I> = FixupWriter::new(ddt, Endian::Little);
        self.write_record(&mut writer, &mut img, Tree::ROOT)?;
        let ddt = writer.finish(&mut img)?;
        Ok((ddt, img))
    }

    fn write_record<'a, D, I>(
        &'a self,
        writer: &mut FixupWriter<'a, D, I>,
        img: &mut I,
        id: NodeId,
    ) -> Result<()>
    where
        D: Write + Seek,
        I: Write + Seek,
    {
        let node = self
            .tree
            .get(id)
            .ok_or_else(|| Error::MalformedArchive("dangling node".into()))?;

        writer.align(TABLE_ALIGNMENT)?;
        if node.parent.is_none() {
            writer.write_value(&0u32)?;
        } else {
            let name = name_to_field(&node.name)
                .ok_or_else(|| Error::InvalidName(node.name.clone()))?;
            writer.write_offset(move |writer, _| {
                writer.write_all(&name)?;
                writer.write_all(&[0])?;
                Ok(())
            })?;
        }

        match &node.kind {
            // an empty directory cannot be told apart from an empty file
            NodeKind::Directory(children) if children.is_empty() && node.parent.is_some() => {
                writer.write_value(&0u32)?;
                writer.write_value(&0i32)?;
            }
            NodeKind::Directory(children) => {
                let count = i32::try_from(children.len())
                    .map_err(|_| Error::MalformedArchive("directory is too large".into()))?;
                writer.write_offset_aligned(TABLE_ALIGNMENT, move |writer, img| {
                    for &child in children.values() {
                        self.write_record(writer, img, child)?;
                    }
                    Ok(())
                })?;
                writer.write_value(&-count)?;
            }
            NodeKind::File(data) => {
                let sector = u32::try_from(img.stream_position()? / SECTOR_LEN)
                    .map_err(|_| Error::MalformedArchive("image grew past its sector range".into()))?;
                let length = i32::try_from(data.len())
                    .map_err(|_| Error::MalformedArchive(format!("{} is too large", node.name)))?;

                writer.write_value(&sector)?;
                writer.write_value(&length)?;
                data.copy_to(&self.stream, img)?;
                pad_to(img, SECTOR_LEN)?;
            }
        }

        Ok(())
    }

    /// Create every missing directory along `components`, returning the last one.
    fn ensure_directories<'p>(
        &mut self,
        parts: impl IntoIterator<Item = &'p str>,
        path: &str,
    ) -> Result<NodeId> {
        let mut current = Tree::ROOT;
        for part in parts {
            current = match self.tree.child(current, part) {
                Some(id) if self.tree.children(id).is_some() => id,
                Some(_) => return Err(FileNotFoundError::Name(path.to_owned()).into()),
                None => self
                    .tree
                    .insert(current, part.to_owned(), NodeKind::Directory(Default::default()))
                    .ok_or_else(|| FileNotFoundError::Name(path.to_owned()))?,
            };
        }
        Ok(current)
    }

    fn node_data(&self, handle: &str) -> Result<&EntryData> {
        match self.tree.lookup(handle).and_then(|id| self.tree.get(id)) {
            Some(Node {
                kind: NodeKind::File(data),
                ..
            }) => Ok(data),
            _ => Err(FileNotFoundError::Name(handle.to_owned()).into()),
        }
    }
}

fn read_name<D: Read + Seek>(ddt: &mut D, name_offset: u32, ddt_len: u64) -> Result<String> {
    if name_offset == 0 || u64::from(name_offset) >= ddt_len {
        return Err(Error::MalformedArchive(format!(
            "name offset {name_offset:#X} is outside of the index"
        )));
    }

    ddt.seek(SeekFrom::Start(u64::from(name_offset)))?;
    let mut name = Vec::new();
    let mut byte = [0u8];
    while ddt.read(&mut byte)? == 1 && byte[0] != 0 {
        name.push(byte[0]);
    }

    let name = field_to_name(&name);
    if components(&name).count() != 1 || name.contains(['/', '\\']) {
        return Err(Error::InvalidName(name));
    }
    Ok(name)
}

fn validate_name(name: &str) -> Result<()> {
    if name.contains('\0') || name_to_field(name).is_none() {
        return Err(Error::InvalidName(name.to_owned()));
    }
    Ok(())
}

impl<R: Read + Seek> Archive for Dds3Archive<R> {
    type Handle = str;
    type Info = Dds3Info;

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            read_only: false,
            has_directories: true,
            can_save: true,
            can_add_or_remove: true,
        }
    }

    fn len(&self) -> usize {
        self.tree.file_count()
    }

    fn exists(&self, handle: &str) -> bool {
        self.tree.lookup(handle).is_some()
    }

    fn is_file(&self, handle: &str) -> bool {
        self.node_data(handle).is_ok()
    }

    fn is_directory(&self, handle: &str) -> bool {
        self.tree
            .lookup(handle)
            .and_then(|id| self.tree.children(id))
            .is_some()
    }

    fn info(&self, handle: &str) -> Result<Dds3Info> {
        let id = self
            .tree
            .lookup(handle)
            .ok_or_else(|| FileNotFoundError::Name(handle.to_owned()))?;
        let node = self
            .tree
            .get(id)
            .ok_or_else(|| FileNotFoundError::Name(handle.to_owned()))?;

        Ok(Dds3Info {
            path: self.tree.path(id),
            is_directory: node.is_directory(),
            size: match &node.kind {
                NodeKind::File(data) => data.len(),
                NodeKind::Directory(_) => 0,
            },
        })
    }

    fn open(&self, handle: &str) -> Result<ByteWindow<'_>> {
        Ok(self.node_data(handle)?.window(&self.stream))
    }

    /// Add a file, creating any missing parent directories
    #[instrument(skip(self, source), err)]
    fn add_file(&mut self, handle: &str, source: Source, policy: ConflictPolicy) -> Result<()> {
        let parts: Vec<&str> = components(handle).collect();
        let Some((name, parents)) = parts.split_last() else {
            return Err(Error::InvalidName(handle.to_owned()));
        };
        validate_name(handle)?;

        if self.exists(handle) {
            match policy {
                ConflictPolicy::ThrowError => {
                    return Err(FileExistsError::Name(handle.to_owned()).into())
                }
                ConflictPolicy::Ignore => return Ok(()),
                ConflictPolicy::Replace => {}
            }
        }

        let parent = self.ensure_directories(parents.iter().copied(), handle)?;
        self.tree
            .insert(parent, (*name).to_owned(), NodeKind::File(EntryData::Buffered(source)))
            .ok_or_else(|| FileNotFoundError::Name(handle.to_owned()))?;
        Ok(())
    }

    /// Create a directory along with any missing parents
    #[instrument(skip(self), err)]
    fn add_directory(&mut self, handle: &str, policy: ConflictPolicy) -> Result<()> {
        let parts: Vec<&str> = components(handle).collect();
        let Some((name, parents)) = parts.split_last() else {
            return Err(Error::InvalidName(handle.to_owned()));
        };
        validate_name(handle)?;

        if self.exists(handle) {
            match policy {
                ConflictPolicy::ThrowError => {
                    return Err(FileExistsError::Name(handle.to_owned()).into())
                }
                ConflictPolicy::Replace if !self.is_directory(handle) => {}
                _ => return Ok(()),
            }
        }

        let parent = self.ensure_directories(parents.iter().copied(), handle)?;
        self.tree
            .insert(parent, (*name).to_owned(), NodeKind::Directory(Default::default()))
            .ok_or_else(|| FileNotFoundError::Name(handle.to_owned()))?;
        Ok(())
    }

    /// Delete a file, or a directory along with its contents
    fn delete(&mut self, handle: &str) -> Result<()> {
        let id = self
            .tree
            .lookup(handle)
            .ok_or_else(|| FileNotFoundError::Name(handle.to_owned()))?;
        self.tree.remove(id);
        Ok(())
    }

    fn entries(&self, traversal: Traversal) -> impl Iterator<Item = String> + '_ {
        self.tree
            .walk(Tree::ROOT, traversal == Traversal::Recursive)
            .map(|id| self.tree.path(id))
    }

    fn entries_in(
        &self,
        directory: &str,
        traversal: Traversal,
    ) -> Result<impl Iterator<Item = String> + '_> {
        let id = self
            .tree
            .lookup(directory)
            .filter(|&id| self.tree.children(id).is_some())
            .ok_or_else(|| FileNotFoundError::Name(directory.to_owned()))?;

        Ok(self
            .tree
            .walk(id, traversal == Traversal::Recursive)
            .map(|id| self.tree.path(id)))
    }

    /// DDS3 archives span two streams, see [`Dds3Archive::save_split`]
    fn save<W: Write + Seek>(&self, _writer: W) -> Result<W> {
        Err(Error::Unsupported(
            "DDS3 archives are saved as an index and image pair",
        ))
    }

    /// Save to the `.ddt` and `.img` pair sharing the stem of `path`
    #[instrument(skip(self), err)]
    fn save_to_path(&self, path: &Path) -> Result<()> {
        let (ddt_path, img_path) = (path.with_extension("ddt"), path.with_extension("img"));
        let (ddt_temporary, ddt) = create_temporary(&ddt_path)?;
        let (img_temporary, img) = create_temporary(&img_path)?;

        let (ddt, img) = self.save_split(ddt, img)?;
        commit_temporary(&img_temporary, &img_path, img)?;
        commit_temporary(&ddt_temporary, &ddt_path, ddt)
    }
}
