use std::io::Read;

use byteorder::{LittleEndian, ReadBytesExt};

use crate::error::{Error, Result};
use super::inode::InodeType;
use super::metadata::EntryReference;

/// Introduces a run of entries whose inodes all live in the same inode table block
#[derive(Debug, Clone, Copy)]
pub struct DirectoryHeader {
    /// Number of entries that follow, minus one
    pub count: u32,
    pub start_block: u32,
    pub inode_number: u32,
}

impl DirectoryHeader {
    pub fn read<R>(r: &mut R) -> Result<Self>
    where R: Read
    {
        Ok(Self {
            count: r.read_u32::<LittleEndian>()?,
            start_block: r.read_u32::<LittleEndian>()?,
            inode_number: r.read_u32::<LittleEndian>()?,
        })
    }
}

/// One name in a directory listing, with the location of its inode resolved against the header
/// that introduced it
#[derive(Debug, Clone)]
pub struct DirectoryEntry {
    pub name: String,
    pub inode_type: InodeType,
    pub inode: EntryReference,
    pub inode_number: u32,
}

impl DirectoryEntry {
    fn read<R>(r: &mut R, header: &DirectoryHeader) -> Result<Self>
    where R: Read
    {
        let offset = r.read_u16::<LittleEndian>()?;
        let delta = r.read_i16::<LittleEndian>()?;
        let raw_type = r.read_u16::<LittleEndian>()?;
        let name_len = usize::from(r.read_u16::<LittleEndian>()?) + 1;
        let mut name = vec![0u8; name_len];
        r.read_exact(&mut name)?;

        if matches!(&name[..], b"" | b"." | b"..") || name.contains(&b'/') {
            return Err(Error::InvalidEntryName(String::from_utf8_lossy(&name).into_owned()));
        }

        let inode_type = InodeType::try_from(raw_type)
            .map_err(|e| Error::UnknownInodeType(e.number))?;
        Ok(Self {
            name: String::from_utf8_lossy(&name).into_owned(),
            inode_type,
            inode: EntryReference::new(header.start_block.into(), offset),
            inode_number: header.inode_number.wrapping_add_signed(delta.into()),
        })
    }
}

/// Decode a complete directory listing of `size` bytes (the inode's file size less 3) from the
/// directory table stream. Entries come back in on-disk order.
pub fn read_listing<R>(r: &mut R, size: u32) -> Result<Vec<DirectoryEntry>>
where R: Read
{
    let mut r = r.take(size.into());
    let mut entries = Vec::new();
    while r.limit() > 0 {
        let header = DirectoryHeader::read(&mut r)?;
        for _ in 0..=header.count {
            entries.push(DirectoryEntry::read(&mut r, &header)?);
        }
    }
    Ok(entries)
}
