use std::cell::RefCell;
use std::collections::HashMap;
use std::io::{self, Read, Seek};
use std::rc::Rc;

use byteorder::{LittleEndian, ReadBytesExt};
use log::debug;

use crate::error::{Error, Result};
use super::block::{BlockReader, DataBlockSize, METADATA_BLOCK_SIZE};
use super::metadata::EntryReference;
use super::source::image_offset;
use super::superblock::Superblock;

/// Inode field value meaning "no extended attributes"
pub const NO_XATTRS: u32 = 0xFFFFFFFF;

const FRAGMENT_ENTRY_SIZE: usize = 16;
const XATTR_ID_SIZE: usize = 16;
const XATTR_VALUE_OOL: u16 = 0x100;

/// Read a table stored as an index of metadata block pointers followed (elsewhere) by the blocks
/// themselves. `total` is the decoded length of the whole table; every block but the last holds a
/// full 8 KiB.
fn read_indexed_table<R>(blocks: &BlockReader<R>, index_pos: u64, total: usize) -> Result<Vec<u8>>
where R: Read + Seek
{
    let count = total.div_ceil(METADATA_BLOCK_SIZE);
    let index = blocks.read_index(index_pos, count)?;
    let mut out = Vec::with_capacity(total);
    for (i, ptr) in index.iter().enumerate() {
        let expected = if i + 1 == count {
            match total % METADATA_BLOCK_SIZE {
                0 => METADATA_BLOCK_SIZE,
                n => n,
            }
        } else {
            METADATA_BLOCK_SIZE
        };
        let block = blocks.metadata_block_sized(*ptr, expected)?;
        out.extend_from_slice(&block.data);
    }
    if out.len() < total {
        return Err(io::Error::new(io::ErrorKind::UnexpectedEof,
            format!("table at {:#x} holds {} of {} bytes", index_pos, out.len(), total)).into());
    }
    out.truncate(total);
    Ok(out)
}

/// Dense index to numeric uid/gid table
#[derive(Debug, Clone)]
pub struct IdTable {
    ids: Vec<u32>,
}

impl IdTable {
    pub(crate) fn read<R>(blocks: &BlockReader<R>, sb: &Superblock) -> Result<Self>
    where R: Read + Seek
    {
        let raw = read_indexed_table(blocks, sb.id_table, usize::from(sb.id_count) * 4)?;
        let ids: Vec<u32> = raw.chunks_exact(4)
            .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect();
        debug!("id table: {} ids", ids.len());
        Ok(Self { ids })
    }

    pub fn get(&self, idx: u16) -> Result<u32> {
        self.ids.get(usize::from(idx))
            .copied()
            .ok_or(Error::IdOutOfRange(idx))
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FragmentEntry {
    pub start: u64,
    pub size: DataBlockSize,
}

/// Fragment block locations plus a cache of decoded fragment blocks keyed by fragment index
#[derive(Debug)]
pub struct FragmentTable {
    entries: Vec<FragmentEntry>,
    cache: RefCell<HashMap<u32, Rc<[u8]>>>,
}

impl FragmentTable {
    pub(crate) fn read<R>(blocks: &BlockReader<R>, sb: &Superblock) -> Result<Self>
    where R: Read + Seek
    {
        let count = sb.frag_count as usize;
        let entries = if count == 0 {
            Vec::new()
        } else {
            let raw = read_indexed_table(blocks, sb.frag_table, count * FRAGMENT_ENTRY_SIZE)?;
            let mut r = &raw[..];
            let mut entries = Vec::with_capacity(count);
            for _ in 0..count {
                let start = r.read_u64::<LittleEndian>()?;
                let size = DataBlockSize::from_raw(r.read_u32::<LittleEndian>()?);
                let _unused = r.read_u32::<LittleEndian>()?;
                entries.push(FragmentEntry { start, size });
            }
            entries
        };
        debug!("fragment table: {} entries", entries.len());
        Ok(Self { entries, cache: RefCell::new(HashMap::new()) })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entry(&self, idx: u32) -> Result<FragmentEntry> {
        self.entries.get(idx as usize)
            .copied()
            .ok_or(Error::FragmentOutOfRange(idx))
    }

    /// The decoded contents of fragment block `idx`
    pub(crate) fn block<R>(&self, blocks: &BlockReader<R>, idx: u32) -> Result<Rc<[u8]>>
    where R: Read + Seek
    {
        if let Some(data) = self.cache.borrow().get(&idx) {
            return Ok(Rc::clone(data));
        }
        let entry = self.entry(idx)?;
        let data: Rc<[u8]> = blocks.read_data_block(entry.start, entry.size)?.into();
        self.cache.borrow_mut().insert(idx, Rc::clone(&data));
        Ok(data)
    }

    /// Decode every fragment block now rather than on first use
    pub(crate) fn preload<R>(&self, blocks: &BlockReader<R>) -> Result<()>
    where R: Read + Seek
    {
        for idx in 0..self.entries.len() as u32 {
            self.block(blocks, idx)?;
        }
        Ok(())
    }

    pub fn cached_blocks(&self) -> usize {
        self.cache.borrow().len()
    }
}

/// One extended attribute with its namespace prefix applied to the name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Xattr {
    pub name: String,
    pub value: Vec<u8>,
}

#[derive(Debug, Clone, Copy)]
struct XattrId {
    xattr: EntryReference,
    count: u32,
    #[allow(dead_code)]
    size: u32,
}

/// The xattr id table and the key/value blocks it points into. The key/value metadata blocks are
/// decoded up front into one buffer; `block_offsets` maps each block's position (relative to the
/// start of the key/value area) to where its bytes begin in that buffer.
#[derive(Debug, Default)]
pub struct XattrTable {
    ids: Vec<XattrId>,
    kv: Vec<u8>,
    block_offsets: HashMap<u64, usize>,
}

impl XattrTable {
    pub(crate) fn read<R>(blocks: &BlockReader<R>, sb: &Superblock) -> Result<Self>
    where R: Read + Seek
    {
        if !sb.has_xattrs() {
            return Ok(Self::default());
        }

        let header = blocks.read_raw(sb.xattr_table, 16)?;
        let mut r = &header[..];
        let kv_start = r.read_u64::<LittleEndian>()?;
        let count = r.read_u32::<LittleEndian>()? as usize;
        let _unused = r.read_u32::<LittleEndian>()?;

        let index_pos = image_offset(sb.xattr_table, 16)?;
        let raw = read_indexed_table(blocks, index_pos, count * XATTR_ID_SIZE)?;
        let mut r = &raw[..];
        let mut ids = Vec::with_capacity(count);
        for _ in 0..count {
            ids.push(XattrId {
                xattr: EntryReference::read(&mut r)?,
                count: r.read_u32::<LittleEndian>()?,
                size: r.read_u32::<LittleEndian>()?,
            });
        }

        let mut kv = Vec::new();
        let mut block_offsets = HashMap::new();
        if count > 0 {
            let kv_end = blocks.read_index(index_pos, 1)?[0];
            let mut pos = kv_start;
            while pos < kv_end {
                let block = blocks.metadata_block(pos)?;
                block_offsets.insert(pos - kv_start, kv.len());
                kv.extend_from_slice(&block.data);
                pos = block.next;
            }
        }
        let table = Self { ids, kv, block_offsets };
        debug!("xattr table: {} ids, {} bytes of keys and values", table.len(), table.kv.len());
        Ok(table)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    fn locate(&self, r: EntryReference) -> Result<&[u8]> {
        let start = self.block_offsets.get(&r.location())
            .map(|o| o + usize::from(r.offset()))
            .filter(|o| *o <= self.kv.len())
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData,
                format!("xattr reference {:?} points outside the key/value area", r)))?;
        Ok(&self.kv[start..])
    }

    /// Decode the attributes of xattr index `idx` in on-disk order
    pub fn get(&self, idx: u32) -> Result<Vec<Xattr>> {
        if idx == NO_XATTRS {
            return Ok(Vec::new());
        }
        let id = self.ids.get(idx as usize).ok_or(Error::XattrOutOfRange(idx))?;
        let mut r = self.locate(id.xattr)?;
        let mut attrs = Vec::with_capacity(id.count.min(4096) as usize);
        for _ in 0..id.count {
            let kind = r.read_u16::<LittleEndian>()?;
            let name_size = r.read_u16::<LittleEndian>()?;
            let mut name = vec![0u8; name_size.into()];
            r.read_exact(&mut name)?;

            let prefix = match kind & 0xFF {
                0 => "user.",
                1 => "trusted.",
                2 => "security.",
                p => return Err(io::Error::new(io::ErrorKind::InvalidData,
                    format!("unknown xattr prefix id {}", p)).into()),
            };

            let value = if kind & XATTR_VALUE_OOL != 0 {
                let _ref_size = r.read_u32::<LittleEndian>()?;
                let target = EntryReference::from_raw(r.read_u64::<LittleEndian>()?);
                read_value(&mut self.locate(target)?)?
            } else {
                read_value(&mut r)?
            };

            attrs.push(Xattr {
                name: format!("{}{}", prefix, String::from_utf8_lossy(&name)),
                value,
            });
        }
        Ok(attrs)
    }
}

fn read_value(r: &mut &[u8]) -> io::Result<Vec<u8>> {
    let size = r.read_u32::<LittleEndian>()? as usize;
    if size > r.len() {
        return Err(io::ErrorKind::UnexpectedEof.into());
    }
    let (value, rest) = r.split_at(size);
    *r = rest;
    Ok(value.to_vec())
}
