use std::cell::RefCell;
use std::collections::HashMap;
use std::io::{self, Read, Seek};
use std::rc::Rc;

use byteorder::{ByteOrder, LittleEndian};
use log::{debug, trace};

use crate::error::{Error, Result};
use super::compressed::Decompress;
use super::metadata::{MetadataCursor, MetadataReader};
use super::source::{image_offset, ImageSource};
use super::superblock::Superblock;

/// Largest decoded size of one metadata block
pub const METADATA_BLOCK_SIZE: usize = 8192;

const METADATA_UNCOMPRESSED: u16 = 0x8000;
const DATA_UNCOMPRESSED: u32 = 1 << 24;

/// The size word stored for a data or fragment block. Bit 24 marks a block stored uncompressed,
/// the low 24 bits hold its on-disk length, and a length of 0 marks a sparse (all zero) block.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct DataBlockSize(u32);

impl DataBlockSize {
    pub fn from_raw(word: u32) -> Self {
        Self(word)
    }

    pub fn raw(&self) -> u32 {
        self.0
    }

    /// On-disk length in bytes
    pub fn len(&self) -> u32 {
        self.0 & (DATA_UNCOMPRESSED - 1)
    }

    pub fn is_sparse(&self) -> bool {
        self.len() == 0
    }

    pub fn is_compressed(&self) -> bool {
        self.0 & DATA_UNCOMPRESSED == 0
    }
}

impl std::fmt::Debug for DataBlockSize {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}{}", self.len(), if self.is_compressed() { "" } else { "u" })
    }
}

/// One decoded metadata block along with the image offset of the block that follows it
#[derive(Debug)]
pub(crate) struct MetadataBlock {
    pub data: Vec<u8>,
    pub next: u64,
}

/// Block-level access to an image: memoized metadata blocks and uncached data blocks, both
/// decoded with the image's compression backend.
#[derive(Debug)]
pub(crate) struct BlockReader<R> {
    source: RefCell<ImageSource<R>>,
    codec: Box<dyn Decompress>,
    header_len: u64,
    block_size: u32,
    metadata: RefCell<HashMap<u64, Rc<MetadataBlock>>>,
}

impl<R> BlockReader<R>
where R: Read + Seek
{
    pub fn new(source: ImageSource<R>, codec: Box<dyn Decompress>, sb: &Superblock) -> Self {
        Self {
            source: RefCell::new(source),
            codec,
            header_len: sb.metadata_header_len(),
            block_size: sb.block_size,
            metadata: RefCell::new(HashMap::new()),
        }
    }

    pub fn block_size(&self) -> u32 {
        self.block_size
    }

    pub fn codec_name(&self) -> &'static str {
        self.codec.name()
    }

    /// Fetch the metadata block starting at `start`, decoding it on first use
    pub fn metadata_block(&self, start: u64) -> Result<Rc<MetadataBlock>> {
        self.metadata_block_sized(start, METADATA_BLOCK_SIZE)
    }

    /// As [`metadata_block`](Self::metadata_block), with a smaller decoded size where the caller
    /// knows it (the final block of a table)
    pub fn metadata_block_sized(&self, start: u64, expected: usize) -> Result<Rc<MetadataBlock>> {
        if let Some(block) = self.metadata.borrow().get(&start) {
            return Ok(Rc::clone(block));
        }
        let block = Rc::new(self.load_metadata_block(start, expected)?);
        self.metadata.borrow_mut().insert(start, Rc::clone(&block));
        Ok(block)
    }

    fn load_metadata_block(&self, start: u64, expected: usize) -> Result<MetadataBlock> {
        let raw = {
            let mut source = self.source.borrow_mut();
            let mut header = [0u8; 2];
            source.read_at(start, &mut header)?;
            let header = LittleEndian::read_u16(&header);
            let size = header & !METADATA_UNCOMPRESSED;
            if usize::from(size) > METADATA_BLOCK_SIZE {
                return Err(Error::MetadataBlockTooLarge { offset: start, size });
            }
            let payload_start = image_offset(start, self.header_len)?;
            let payload = source.read_vec_at(payload_start, size.into())?;
            (header & METADATA_UNCOMPRESSED == 0, image_offset(payload_start, u64::from(size))?, payload)
        };

        let (compressed, next, payload) = raw;
        let data = if compressed {
            self.codec.decompress(&payload, payload.len(), expected)?
        } else {
            payload
        };
        debug!("metadata block at {:#x}: {} bytes{}, next {:#x}",
            start, data.len(), if compressed { "" } else { " (stored)" }, next);
        Ok(MetadataBlock { data, next })
    }

    /// A streaming reader over the logical metadata stream starting at `cursor`
    pub fn metadata_reader(&self, cursor: MetadataCursor) -> MetadataReader<'_, R> {
        MetadataReader::new(self, cursor)
    }

    /// Read `len` bytes of the logical metadata stream starting at `cursor`, returning the bytes
    /// and the cursor just past them
    pub fn read_logical(&self, cursor: MetadataCursor, len: usize) -> Result<(Vec<u8>, MetadataCursor)> {
        let mut reader = self.metadata_reader(cursor);
        let bytes = reader.read_logical(len)?;
        Ok((bytes, reader.cursor()))
    }

    /// Read and decode a data or fragment block. Data blocks are never cached here.
    pub fn read_data_block(&self, start: u64, size: DataBlockSize) -> Result<Vec<u8>> {
        let len = size.len();
        if len > self.block_size {
            return Err(io::Error::new(io::ErrorKind::InvalidData,
                format!("data block at {:#x} claims {} bytes, more than the block size", start, len)).into());
        }
        trace!("data block at {:#x}: {:?}", start, size);
        let raw = self.source.borrow_mut().read_vec_at(start, len as usize)?;
        if size.is_compressed() {
            self.codec.decompress(&raw, raw.len(), self.block_size as usize)
        } else {
            Ok(raw)
        }
    }

    /// Read raw, undecoded bytes of the image
    pub fn read_raw(&self, pos: u64, len: usize) -> Result<Vec<u8>> {
        Ok(self.source.borrow_mut().read_vec_at(pos, len)?)
    }

    /// Read the array of little endian u64 block pointers that precedes the ID, fragment and
    /// xattr tables
    pub fn read_index(&self, pos: u64, count: usize) -> Result<Vec<u64>> {
        let raw = self.read_raw(pos, count * 8)?;
        Ok(raw.chunks_exact(8).map(LittleEndian::read_u64).collect())
    }

    pub fn cached_metadata_blocks(&self) -> usize {
        self.metadata.borrow().len()
    }

    pub fn into_inner(self) -> R {
        self.source.into_inner().into_inner()
    }
}
