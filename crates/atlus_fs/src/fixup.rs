//! Deferred offset patching for layouts that point forward to their own content.
//!
//! Writing a record that stores "offset of X" before X exists is done by writing
//! a zero placeholder and queueing an action that writes X later. Once the
//! initial pass is done, [`FixupWriter::finish`] runs the queue in order. Each
//! action returns the offset it started writing at, which is patched into its
//! placeholder before the next action runs. Actions can queue more actions.

use std::{
    collections::VecDeque,
    fmt::{self, Debug},
    io::{self, Seek, SeekFrom, Write},
};

use binrw::{BinWrite, Endian};
use tracing::{instrument, trace};

use crate::{
    archive::pad_to,
    error::{Error, Result},
};

type Deferred<'a, W, C> = Box<dyn FnOnce(&mut FixupWriter<'a, W, C>, &mut C) -> Result<u64> + 'a>;

/// A writer with a queue of deferred writes whose offsets get patched in.
///
/// `C` is a context handed to every deferred action, such as a second output
/// stream that receives file payloads.
pub struct FixupWriter<'a, W, C> {
    inner: W,
    endian: Endian,
    pending: VecDeque<(u64, Deferred<'a, W, C>)>,
}

impl<W, C> Debug for FixupWriter<'_, W, C> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("FixupWriter")
            .field("endian", &self.endian)
            .field("pending", &self.pending.len())
            .finish_non_exhaustive()
    }
}

impl<'a, W: Write + Seek, C> FixupWriter<'a, W, C> {
    pub fn new(inner: W, endian: Endian) -> Self {
        Self {
            inner,
            endian,
            pending: VecDeque::new(),
        }
    }

    pub fn endian(&self) -> Endian {
        self.endian
    }

    /// Number of deferred writes still queued
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Write a value in the byte order of this writer.
    pub fn write_value<T>(&mut self, value: &T) -> Result<()>
    where
        T: for<'b> BinWrite<Args<'b> = ()>,
    {
        value.write_options(&mut self.inner, self.endian, ())?;
        Ok(())
    }

    /// Pad with zeros up to the next multiple of `alignment`.
    pub fn align(&mut self, alignment: u64) -> Result<()> {
        pad_to(&mut self.inner, alignment)
    }

    /// Write a placeholder now and patch in the value `action` returns once it runs.
    pub fn defer<F>(&mut self, action: F) -> Result<()>
    where
        F: FnOnce(&mut Self, &mut C) -> Result<u64> + 'a,
    {
        let placeholder = self.inner.stream_position()?;
        self.write_value(&0u32)?;
        self.pending.push_back((placeholder, Box::new(action)));
        Ok(())
    }

    /// Write a placeholder for the offset at which `action` starts writing.
    pub fn write_offset<F>(&mut self, action: F) -> Result<()>
    where
        F: FnOnce(&mut Self, &mut C) -> Result<()> + 'a,
    {
        self.defer(|writer, context| {
            let start = writer.stream_position()?;
            action(writer, context)?;
            Ok(start)
        })
    }

    /// Like [`FixupWriter::write_offset`], aligning the target first.
    pub fn write_offset_aligned<F>(&mut self, alignment: u64, action: F) -> Result<()>
    where
        F: FnOnce(&mut Self, &mut C) -> Result<()> + 'a,
    {
        self.defer(move |writer, context| {
            writer.align(alignment)?;
            let start = writer.stream_position()?;
            action(writer, context)?;
            Ok(start)
        })
    }

    /// Run every deferred write in queue order and return the inner writer.
    #[instrument(skip_all, err)]
    pub fn finish(mut self, context: &mut C) -> Result<W> {
        while let Some((placeholder, action)) = self.pending.pop_front() {
            let value = action(&mut self, context)?;
            let value = u32::try_from(value).map_err(|_| {
                Error::MalformedArchive(format!("offset {value:#X} does not fit in 32 bits"))
            })?;
            trace!(placeholder, value, "patching offset");

            let resume = self.inner.stream_position()?;
            self.inner.seek(SeekFrom::Start(placeholder))?;
            self.write_value(&value)?;
            self.inner.seek(SeekFrom::Start(resume))?;
        }

        Ok(self.inner)
    }
}

impl<W: Write + Seek, C> Write for FixupWriter<'_, W, C> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.inner.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

impl<W: Write + Seek, C> Seek for FixupWriter<'_, W, C> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.inner.seek(pos)
    }
}

#[cfg(test)]
mod test {
    use std::io::{Cursor, Write};

    use binrw::Endian;
    use pretty_assertions::assert_eq;

    use super::FixupWriter;
    use crate::error::Result;

    #[test]
    fn placeholder_points_at_target() -> Result<()> {
        let mut writer: FixupWriter<'_, _, ()> = FixupWriter::new(Cursor::new(Vec::new()), Endian::Little);
        writer.write_all(b"HEAD")?;
        writer.write_offset_aligned(8, |w, _| {
            w.write_all(b"body")?;
            Ok(())
        })?;
        writer.write_value(&0xAABBu16)?;

        let out = writer.finish(&mut ())?.into_inner();

        #[rustfmt::skip]
        let expected = vec![
            b'H', b'E', b'A', b'D',
            0x10, 0x00, 0x00, 0x00,
            0xBB, 0xAA,
            0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
            b'b', b'o', b'd', b'y',
        ];
        assert_eq!(out, expected);

        Ok(())
    }

    #[test]
    fn big_endian_offsets() -> Result<()> {
        let mut writer: FixupWriter<'_, _, ()> = FixupWriter::new(Cursor::new(Vec::new()), Endian::Big);
        writer.write_offset(|w, _| {
            w.write_all(&[0xEE])?;
            Ok(())
        })?;

        let out = writer.finish(&mut ())?.into_inner();
        assert_eq!(out, vec![0x00, 0x00, 0x00, 0x04, 0xEE]);

        Ok(())
    }

    #[test]
    fn queue_grows_while_draining_in_fifo_order() -> Result<()> {
        let mut order: Vec<&'static str> = Vec::new();
        let mut writer = FixupWriter::new(Cursor::new(Vec::new()), Endian::Little);

        writer.write_offset(|w, order: &mut Vec<&'static str>| {
            order.push("first");
            w.write_offset(|_, order: &mut Vec<&'static str>| {
                order.push("nested");
                Ok(())
            })
        })?;
        writer.write_offset(|_, order: &mut Vec<&'static str>| {
            order.push("second");
            Ok(())
        })?;
        assert_eq!(writer.pending(), 2);

        let out = writer.finish(&mut order)?.into_inner();
        assert_eq!(order, vec!["first", "second", "nested"]);

        #[rustfmt::skip]
        let expected = vec![
            // first, points at the nested placeholder
            0x08, 0x00, 0x00, 0x00,
            // second, written nothing so points at the end of the nested placeholder
            0x0C, 0x00, 0x00, 0x00,
            // nested, points at the end
            0x0C, 0x00, 0x00, 0x00,
        ];
        assert_eq!(out, expected);

        Ok(())
    }
}
