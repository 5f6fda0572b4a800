//! Binary encoding of keys and items.
//!
//! Integers are little-endian. Strings and vectors carry a `u32` length
//! prefix. Pointers use their 6-byte layout.

use std::io::{Read, Seek, Write};

use binrw::{BinReaderExt, BinResult, BinWriterExt};
use sift_blob::BlobPointer;

/// Largest element count preallocated while decoding a vector.
const MAX_PREALLOC: usize = 4096;

/// Value with a stable binary encoding.
pub trait Persist: Sized {
    /// Write the encoding of `self`.
    fn write_to<W: Write + Seek>(&self, writer: &mut W) -> BinResult<()>;

    /// Read one encoded value.
    fn read_from<R: Read + Seek>(reader: &mut R) -> BinResult<Self>;
}

macro_rules! persist_primitive {
    ($($ty:ty),* $(,)?) => {
        $(
            impl Persist for $ty {
                fn write_to<W: Write + Seek>(&self, writer: &mut W) -> BinResult<()> {
                    writer.write_le(self)
                }

                fn read_from<R: Read + Seek>(reader: &mut R) -> BinResult<Self> {
                    reader.read_le()
                }
            }
        )*
    };
}

persist_primitive!(u8, u16, u32, u64, i32, i64, f32, f64);

impl Persist for String {
    fn write_to<W: Write + Seek>(&self, writer: &mut W) -> BinResult<()> {
        write_len(writer, self.len())?;
        writer.write_all(self.as_bytes())?;
        Ok(())
    }

    fn read_from<R: Read + Seek>(reader: &mut R) -> BinResult<Self> {
        let pos = reader.stream_position()?;
        let len: u32 = reader.read_le()?;
        let mut bytes = vec![0u8; len as usize];
        reader.read_exact(&mut bytes)?;
        Self::from_utf8(bytes).map_err(|e| binrw::Error::AssertFail {
            pos,
            message: format!("invalid UTF-8 string: {e}"),
        })
    }
}

impl Persist for BlobPointer {
    fn write_to<W: Write + Seek>(&self, writer: &mut W) -> BinResult<()> {
        writer.write_le(self)
    }

    fn read_from<R: Read + Seek>(reader: &mut R) -> BinResult<Self> {
        reader.read_le()
    }
}

impl<A: Persist, B: Persist> Persist for (A, B) {
    fn write_to<W: Write + Seek>(&self, writer: &mut W) -> BinResult<()> {
        self.0.write_to(writer)?;
        self.1.write_to(writer)
    }

    fn read_from<R: Read + Seek>(reader: &mut R) -> BinResult<Self> {
        Ok((A::read_from(reader)?, B::read_from(reader)?))
    }
}

/// Write a `u32` length prefix.
pub fn write_len<W: Write + Seek>(writer: &mut W, len: usize) -> BinResult<()> {
    let pos = writer.stream_position()?;
    let len = u32::try_from(len).map_err(|_| binrw::Error::AssertFail {
        pos,
        message: format!("length {len} does not fit in u32"),
    })?;
    writer.write_le(&len)
}

/// Write a length-prefixed sequence.
pub fn write_vec<T: Persist, W: Write + Seek>(writer: &mut W, items: &[T]) -> BinResult<()> {
    write_len(writer, items.len())?;
    for item in items {
        item.write_to(writer)?;
    }
    Ok(())
}

/// Read a length-prefixed sequence.
pub fn read_vec<T: Persist, R: Read + Seek>(reader: &mut R) -> BinResult<Vec<T>> {
    let len: u32 = reader.read_le()?;
    let mut items = Vec::with_capacity((len as usize).min(MAX_PREALLOC));
    for _ in 0..len {
        items.push(T::read_from(reader)?);
    }
    Ok(items)
}
