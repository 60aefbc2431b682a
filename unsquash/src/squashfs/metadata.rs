use std::io::{self, Read};

use byteorder::{LittleEndian, ReadBytesExt};

use crate::error::Result;
use super::block::BlockReader;
use super::source::image_offset;

/// A packed pointer into the inode (or xattr) table: the upper 48 bits are the byte offset of a
/// metadata block relative to the start of the table, the lower 16 bits are the offset of the
/// entry inside the uncompressed block.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct EntryReference {
    val: u64
}

impl EntryReference {
    pub fn new(location: u64, offset: u16) -> Self {
        Self {
            val: (location << 16) | u64::from(offset),
        }
    }

    pub fn from_raw(val: u64) -> Self {
        Self { val }
    }

    pub fn location(&self) -> u64 {
        self.val >> 16
    }

    pub fn offset(&self) -> u16 {
        (self.val & 0xFFFF) as u16
    }

    pub fn raw(&self) -> u64 {
        self.val
    }

    pub(crate) fn read<R>(r: &mut R) -> io::Result<Self>
    where R: Read
    {
        Ok(Self {
            val: r.read_u64::<LittleEndian>()?
        })
    }
}

impl std::fmt::Debug for EntryReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.location(), self.offset())
    }
}

/// Position in the logical (uncompressed) metadata stream: the image offset of a physical
/// metadata block and a byte offset within its decoded contents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct MetadataCursor {
    pub block: u64,
    pub offset: usize,
}

impl MetadataCursor {
    pub fn new(block: u64, offset: usize) -> Self {
        Self { block, offset }
    }

    /// Resolve an entry reference against the start of the table it points into
    pub fn at(table_start: u64, entry: EntryReference) -> io::Result<Self> {
        Ok(Self::new(image_offset(table_start, entry.location())?, entry.offset().into()))
    }
}

/// A reader over the logical metadata stream. Reads run across physical block boundaries by
/// following each block's next pointer, and every block touched goes through the image's block
/// cache, so re-reading records near a boundary does not decompress anything twice.
///
/// When a read ends exactly at the end of a block the cursor moves on to offset 0 of the next
/// block without loading it.
pub(crate) struct MetadataReader<'a, R> {
    blocks: &'a BlockReader<R>,
    cursor: MetadataCursor,
}

impl<'a, R> MetadataReader<'a, R>
where R: Read + io::Seek
{
    pub fn new(blocks: &'a BlockReader<R>, cursor: MetadataCursor) -> Self {
        Self { blocks, cursor }
    }

    pub fn cursor(&self) -> MetadataCursor {
        self.cursor
    }

    /// Read exactly `len` bytes of the logical stream
    pub fn read_logical(&mut self, len: usize) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; len];
        self.read_exact(&mut buf)?;
        Ok(buf)
    }
}

impl<'a, R> Read for MetadataReader<'a, R>
where R: Read + io::Seek
{
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        loop {
            let block = self.blocks.metadata_block(self.cursor.block)?;
            let len = block.data.len();
            if self.cursor.offset > len {
                return Err(io::Error::new(io::ErrorKind::InvalidData,
                    format!("offset {} is past the end of the {} byte metadata block at {:#x}",
                        self.cursor.offset, len, self.cursor.block)));
            }
            if self.cursor.offset == len {
                // Nothing left in this block (or it was empty); continue in the next one
                self.cursor = MetadataCursor::new(block.next, 0);
                continue;
            }

            let n = Read::read(&mut &block.data[self.cursor.offset..], buf)?;
            self.cursor.offset += n;
            if self.cursor.offset == len {
                self.cursor = MetadataCursor::new(block.next, 0);
            }
            return Ok(n);
        }
    }
}
