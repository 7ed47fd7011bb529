//! Record layout of PAK files.

use binrw::{BinRead, BinWrite};

use crate::{
    archive::{field_to_name, name_to_field},
    error::{Error, Result},
};

/// Largest payload a record may declare before it is treated as garbage
pub const MAX_ENTRY_LEN: i32 = 100 * 1024 * 1024;

/// PAK record header
///
/// Every layout stores a fixed width, zero padded name followed by the payload
/// length. The width of the name and the byte order depend on the layout.
#[derive(BinRead, BinWrite, Debug, Clone, PartialEq)]
#[br(import(name_len: usize))]
pub struct PakRecord {
    /// The zero padded name of the entry
    #[br(count = name_len)]
    pub name: Vec<u8>,

    /// The payload length, including padding for the counted layouts
    pub length: i32,
}

impl PakRecord {
    /// Build a record for `name`, failing when it does not fit the name field.
    pub fn new(name: &str, name_len: usize, length: u64) -> Result<Self> {
        let mut field = name_to_field(name)
            .filter(|field| !field.is_empty() && field.len() <= name_len && !field.contains(&0))
            .ok_or_else(|| {
                Error::InvalidName(format!("{name:?} does not fit a {name_len} byte name field"))
            })?;

        let length = i32::try_from(length)
            .ok()
            .filter(|length| *length <= MAX_ENTRY_LEN)
            .ok_or_else(|| Error::MalformedArchive(format!("{name} is too large for a PAK")))?;

        field.resize(name_len, 0);
        Ok(Self {
            name: field,
            length,
        })
    }

    /// The name up to its terminator
    pub fn name(&self) -> String {
        field_to_name(&self.name)
    }

    /// The payload length when the record looks like a real entry.
    ///
    /// Archives end either at the end of the stream or at the first record with
    /// an empty name or an out of range length.
    pub fn entry_length(&self) -> Option<u64> {
        if self.name.first().map_or(true, |&b| b == 0) {
            return None;
        }
        (0..=MAX_ENTRY_LEN)
            .contains(&self.length)
            .then_some(self.length as u64)
    }
}
