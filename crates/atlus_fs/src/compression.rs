//! The LB codec, a byte oriented LZ scheme used for the payloads of LB archives.
//!
//! A compressed stream is a sequence of operations. Every operation starts with
//! a header byte whose bits 5–7 select the opcode and whose bits 0–4 hold the
//! count. When the count does not fit in five bits they are left at zero and a
//! little endian `u16` count follows the header.
//!
//! | Opcode | Operation                | Operands                                    |
//! |--------|--------------------------|---------------------------------------------|
//! | `0x0`  | copy literal bytes       | `count` raw bytes                           |
//! | `0x2`  | repeat zero              | none                                        |
//! | `0x4`  | repeat byte              | the byte to repeat                          |
//! | `0x6`  | copy from offset         | `u8` distance back into the output          |
//! | `0x8`  | copy from large offset   | `u16` distance back into the output         |
//! | `0xA`  | zero interleaved copy    | `count` bytes, each followed by a zero      |
//!
//! The stream carries no length and no end marker, so the caller has to supply
//! the decompressed length.

use std::collections::HashMap;

use byteorder::{LittleEndian, ReadBytesExt};
use tracing::{instrument, trace};

use crate::error::{Error, Result};

const INLINE_COUNT_MAX: usize = 0x1F;
const COUNT_MAX: usize = u16::MAX as usize;
const MIN_PATTERN_LENGTH: usize = 4;
/// Upper bound on the output of a single input byte
const MAX_EXPANSION: usize = 0x1_0000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
enum Opcode {
    CopyBytes = 0x0,
    RepeatZero = 0x2,
    RepeatByte = 0x4,
    CopyFromOffset = 0x6,
    CopyFromLargeOffset = 0x8,
    ZeroInterleaved = 0xA,
}

impl TryFrom<u8> for Opcode {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0x0 => Ok(Opcode::CopyBytes),
            0x2 => Ok(Opcode::RepeatZero),
            0x4 => Ok(Opcode::RepeatByte),
            0x6 => Ok(Opcode::CopyFromOffset),
            0x8 => Ok(Opcode::CopyFromLargeOffset),
            0xA => Ok(Opcode::ZeroInterleaved),
            other => Err(Error::CorruptData(format!("reserved opcode {other:#X}"))),
        }
    }
}

fn truncated(_: std::io::Error) -> Error {
    Error::CorruptData("unexpected end of compressed data".into())
}

fn short_literal(count: usize, available: usize) -> Error {
    Error::CorruptData(format!(
        "literal of {count} bytes with {available} bytes of input left"
    ))
}

/// Decompress `input`, producing exactly `expected_len` bytes.
///
/// ```
/// let packed = [0x24, 0x43, 0x05, 0x03, 0x01, 0x02, 0x03];
/// let data = atlus_fs::compression::decompress(&packed, 10).unwrap();
/// assert_eq!(data, [0, 0, 0, 0, 5, 5, 5, 1, 2, 3]);
/// ```
#[instrument(skip(input), fields(input_len = input.len()), err)]
pub fn decompress(input: &[u8], expected_len: usize) -> Result<Vec<u8>> {
    let mut reader = input;
    let mut output: Vec<u8> =
        Vec::with_capacity(expected_len.min(input.len().saturating_mul(MAX_EXPANSION)));

    while output.len() < expected_len {
        let header = reader.read_u8().map_err(truncated)?;

        let mut count = usize::from(header) & INLINE_COUNT_MAX;
        if count == 0 {
            count = usize::from(reader.read_u16::<LittleEndian>().map_err(truncated)?);
        }

        match Opcode::try_from((header >> 4) & 0xE)? {
            Opcode::CopyBytes => {
                if reader.len() < count {
                    return Err(short_literal(count, reader.len()));
                }
                let (literal, rest) = reader.split_at(count);
                output.extend_from_slice(literal);
                reader = rest;
            }
            Opcode::RepeatZero => output.resize(output.len() + count, 0),
            Opcode::RepeatByte => {
                let value = reader.read_u8().map_err(truncated)?;
                output.resize(output.len() + count, value);
            }
            Opcode::CopyFromOffset => {
                let distance = usize::from(reader.read_u8().map_err(truncated)?);
                copy_back(&mut output, distance, count)?;
            }
            Opcode::CopyFromLargeOffset => {
                let distance = usize::from(reader.read_u16::<LittleEndian>().map_err(truncated)?);
                copy_back(&mut output, distance, count)?;
            }
            Opcode::ZeroInterleaved => {
                output.reserve(count * 2);
                for _ in 0..count {
                    output.push(reader.read_u8().map_err(truncated)?);
                    output.push(0);
                }
            }
        }
    }

    output.truncate(expected_len);
    Ok(output)
}

/// Byte by byte so that a distance shorter than the count repeats the tail.
fn copy_back(output: &mut Vec<u8>, distance: usize, count: usize) -> Result<()> {
    if distance == 0 || distance > output.len() {
        return Err(Error::CorruptData(format!(
            "back reference of {distance} bytes with {} bytes of output",
            output.len()
        )));
    }

    output.reserve(count);
    for _ in 0..count {
        let value = output[output.len() - distance];
        output.push(value);
    }
    Ok(())
}

/// Compress `input` with a single greedy pass.
///
/// ```
/// let packed = atlus_fs::compression::compress(&[0, 0, 0, 0, 5, 5, 5, 1, 2, 3]);
/// assert_eq!(packed, [0x24, 0x43, 0x05, 0x03, 0x01, 0x02, 0x03]);
/// ```
#[instrument(skip(input), fields(input_len = input.len()))]
pub fn compress(input: &[u8]) -> Vec<u8> {
    let mut encoder = Encoder {
        input,
        output: Vec::with_capacity(input.len() / 2 + 16),
        patterns: HashMap::new(),
    };

    let mut position = 0;
    while position < input.len() {
        position += match encoder.run_at(position) {
            Some(length) => encoder.emit_run(position, length),
            None => match encoder.interleave_at(position) {
                Some(pairs) => encoder.emit_interleave(position, pairs),
                None => encoder.emit_literals(position),
            },
        };
    }

    trace!(output_len = encoder.output.len(), "compressed");
    encoder.output
}

struct Encoder<'a> {
    input: &'a [u8],
    output: Vec<u8>,
    /// First position each literal chunk was seen at
    patterns: HashMap<&'a [u8], usize>,
}

impl<'a> Encoder<'a> {
    fn write_op(&mut self, opcode: Opcode, count: usize) {
        let selector = ((opcode as u8) & 0xE) << 4;
        if count <= INLINE_COUNT_MAX {
            self.output.push(selector | count as u8);
        } else {
            self.output.push(selector);
            self.output.extend_from_slice(&(count as u16).to_le_bytes());
        }
    }

    /// Length of the run starting at `position` if it is worth encoding.
    fn run_at(&self, position: usize) -> Option<usize> {
        let value = self.input[position];
        let length = self.input[position..]
            .iter()
            .take(COUNT_MAX)
            .take_while(|&&b| b == value)
            .count();

        let minimum = if value == 0 { 2 } else { 3 };
        (length >= minimum).then_some(length)
    }

    /// Number of `(nonzero, 0)` pairs starting at `position`.
    fn interleave_at(&self, position: usize) -> Option<usize> {
        let pairs = self.input[position..]
            .chunks_exact(2)
            .take(COUNT_MAX)
            .take_while(|pair| pair[0] != 0 && pair[1] == 0)
            .count();

        (pairs > 0).then_some(pairs)
    }

    fn emit_run(&mut self, position: usize, length: usize) -> usize {
        let value = self.input[position];
        if value == 0 {
            self.write_op(Opcode::RepeatZero, length);
        } else {
            self.write_op(Opcode::RepeatByte, length);
            self.output.push(value);
        }
        length
    }

    fn emit_interleave(&mut self, position: usize, pairs: usize) -> usize {
        self.write_op(Opcode::ZeroInterleaved, pairs);
        let input = self.input;
        self.output.extend(
            input[position..position + pairs * 2]
                .iter()
                .step_by(2),
        );
        pairs * 2
    }

    /// Encode literals up to the next position where a run or interleave starts.
    fn emit_literals(&mut self, position: usize) -> usize {
        let mut end = position + 1;
        while end < self.input.len()
            && self.run_at(end).is_none()
            && self.interleave_at(end).is_none()
        {
            end += 1;
        }

        let input = self.input;
        let mut chunk_start = position;
        for chunk in input[position..end].chunks(COUNT_MAX) {
            if !self.emit_back_reference(chunk, chunk_start) {
                self.write_op(Opcode::CopyBytes, chunk.len());
                self.output.extend_from_slice(chunk);
            }
            chunk_start += chunk.len();
        }

        end - position
    }

    /// Try to encode `chunk` as a copy of an earlier identical chunk.
    fn emit_back_reference(&mut self, chunk: &'a [u8], chunk_start: usize) -> bool {
        if chunk.len() < MIN_PATTERN_LENGTH {
            return false;
        }

        let Some(&seen_at) = self.patterns.get(chunk) else {
            self.patterns.insert(chunk, chunk_start);
            return false;
        };

        let distance = chunk_start - seen_at;
        if distance <= usize::from(u8::MAX) {
            self.write_op(Opcode::CopyFromOffset, chunk.len());
            self.output.push(distance as u8);
            true
        } else if distance <= COUNT_MAX {
            self.write_op(Opcode::CopyFromLargeOffset, chunk.len());
            self.output.extend_from_slice(&(distance as u16).to_le_bytes());
            true
        } else {
            false
        }
    }
}
