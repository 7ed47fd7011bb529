//! Layout detection for PAK files.
//!
//! PAK files carry no magic number. The layout is picked by checking whether
//! the first record makes sense under each candidate, in the fixed order
//! [`PakVersion::V1`], then the 32 byte name layouts, then the 24 byte ones.

use std::io::{self, Read, Seek, SeekFrom};

use tracing::{debug, instrument};

use super::{PakVersion, V1_NAME_LEN};

/// Number of bytes needed to judge every layout
pub const PROBE_LEN: usize = V1_NAME_LEN + 4;

const MAX_COUNT: i32 = 1024;

/// Pick the layout of a PAK file from its first bytes and its total length.
///
/// `probe` should hold the first [`PROBE_LEN`] bytes of the file, or the whole
/// file when it is shorter. Returns `None` when no layout is plausible.
pub fn detect(probe: &[u8], stream_len: u64) -> Option<PakVersion> {
    if is_v1(probe, stream_len) {
        return Some(PakVersion::V1);
    }

    if let Some(big_endian) = counted_layout(probe, stream_len, PakVersion::V2.record_len()) {
        return Some(if big_endian { PakVersion::V2Be } else { PakVersion::V2 });
    }

    counted_layout(probe, stream_len, PakVersion::V3.record_len())
        .map(|big_endian| if big_endian { PakVersion::V3Be } else { PakVersion::V3 })
}

/// Run [`detect`] on a stream, leaving it positioned at the start.
#[instrument(skip(reader), err)]
pub fn detect_stream<R: Read + Seek>(reader: &mut R) -> io::Result<Option<PakVersion>> {
    let stream_len = reader.seek(SeekFrom::End(0))?;
    reader.seek(SeekFrom::Start(0))?;

    let mut probe = Vec::with_capacity(PROBE_LEN);
    reader.by_ref().take(PROBE_LEN as u64).read_to_end(&mut probe)?;
    reader.seek(SeekFrom::Start(0))?;

    let version = detect(&probe, stream_len);
    debug!(?version, stream_len, "detected layout");
    Ok(version)
}

/// A name must be present and be followed by nothing but zero padding.
fn is_name_field(field: &[u8]) -> bool {
    match field.iter().position(|&b| b == 0) {
        Some(0) => false,
        Some(end) => field[end..].iter().all(|&b| b == 0),
        None => !field.is_empty(),
    }
}

fn word_at(probe: &[u8], offset: usize) -> Option<[u8; 4]> {
    probe.get(offset..offset + 4)?.try_into().ok()
}

fn is_v1(probe: &[u8], stream_len: u64) -> bool {
    if stream_len <= PROBE_LEN as u64 || probe.len() < PROBE_LEN {
        return false;
    }

    if !is_name_field(&probe[..V1_NAME_LEN]) {
        return false;
    }

    word_at(probe, V1_NAME_LEN)
        .map(i32::from_le_bytes)
        .is_some_and(|length| is_plausible_length(length, stream_len))
}

fn is_plausible_length(length: i32, stream_len: u64) -> bool {
    length >= 0 && (length as u64) < stream_len
}

fn is_plausible_count(count: i32, record_len: usize, stream_len: u64) -> bool {
    (1..=MAX_COUNT).contains(&count) && count as u64 * record_len as u64 <= stream_len
}

/// Returns whether the layout is big endian when the first record is plausible.
fn counted_layout(probe: &[u8], stream_len: u64, record_len: usize) -> Option<bool> {
    if stream_len <= (4 + record_len) as u64 || probe.len() < 4 + record_len {
        return None;
    }

    let mut big_endian = false;

    let count = word_at(probe, 0)?;
    if !is_plausible_count(i32::from_le_bytes(count), record_len, stream_len) {
        if !is_plausible_count(i32::from_be_bytes(count), record_len, stream_len) {
            return None;
        }
        big_endian = true;
    }

    if !is_name_field(&probe[4..record_len]) {
        return None;
    }

    let length = word_at(probe, record_len)?;
    if !is_plausible_length(i32::from_le_bytes(length), stream_len) {
        if !is_plausible_length(i32::from_be_bytes(length), stream_len) {
            return None;
        }
        big_endian = true;
    }

    Some(big_endian)
}
