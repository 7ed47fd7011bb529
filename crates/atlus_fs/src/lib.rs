//! This library reads, edits and writes the archive containers found in games by *Atlus*.
//!
//! Every container is exposed through the [`Archive`] trait. Entries are opened as
//! [`ByteWindow`]s that read straight from the backing stream, while added or replaced
//! entries are held in memory until the archive is saved. Saving writes a whole new
//! archive, so the stream an archive was loaded from is never modified in place.
//!
//! # Formats
//!
//! | Module    | Handle        | Directories | Saving               | Notes                                        |
//! |-----------|---------------|-------------|----------------------|----------------------------------------------|
//! | [`pak`]   | name          | no          | yes                  | five layouts, detected from the first record |
//! | [`lb`]    | index         | no          | yes                  | optional LB compression per entry            |
//! | [`acx`]   | index         | no          | yes                  | big endian offset table                      |
//! | [`dds3`]  | path          | yes         | `.ddt` + `.img` pair | tree index and sector aligned blob           |
//! | [`apak`]  | name          | no          | no                   | byte order from the signature                |
//! | [`smt1`]  | index         | no          | yes                  | offset table lives in the game executable    |
//!
//! Names are matched without regard to ASCII case except in DDS3 archives, whose
//! paths are compared exactly.
//!
//! # Example
//!
//! ```
//! use atlus_fs::{pak::{PakArchive, PakVersion}, Archive, ConflictPolicy};
//!
//! let mut pak = PakArchive::new(PakVersion::V3);
//! pak.add_file("hello.txt", b"hello".to_vec().into(), ConflictPolicy::ThrowError)?;
//!
//! let saved = PakArchive::from_reader(std::io::Cursor::new(pak.save_to_vec()?))?;
//! assert_eq!(saved.version(), PakVersion::V3);
//! assert_eq!(saved.open("HELLO.TXT")?.read_remaining()?, b"hello");
//! # Ok::<(), atlus_fs::Error>(())
//! ```

pub mod acx;
pub mod apak;
pub mod archive;
pub mod compression;
pub mod dds3;
pub mod entry;
pub mod error;
pub mod fixup;
pub mod lb;
pub mod pak;
pub mod smt1;
pub mod window;

pub use acx::AcxArchive;
pub use apak::ApakArchive;
pub use archive::{Archive, Capabilities, ConflictPolicy, IndexedArchive, OwnedHandle, Traversal};
pub use dds3::Dds3Archive;
pub use entry::{EntryData, Source};
pub use error::{Error, Result};
pub use lb::LbArchive;
pub use pak::{PakArchive, PakVersion};
pub use smt1::Smt1Archive;
pub use window::ByteWindow;
