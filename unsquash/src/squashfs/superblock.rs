use std::io::Read;

use bitflags::bitflags;
use byteorder::{LittleEndian, ReadBytesExt};
use num_enum::{IntoPrimitive, TryFromPrimitive};

use crate::error::{Error, Result};
use super::metadata::EntryReference;

pub const MAGIC: u32 = 0x73717368;

/// On-disk size of the superblock
pub const SUPERBLOCK_SIZE: usize = 96;

/// Marker stored in optional table offsets (xattr, export) when the table is absent
pub const INVALID_TABLE: u64 = u64::MAX;

/// The fixed header at the start of every SquashFS image. Values are stored exactly as they appear
/// on disk; use [`Superblock::parse`] to also validate them.
#[derive(Debug, Clone)]
pub struct Superblock {
    pub magic: u32,
    pub inode_count: u32,
    pub mod_time: u32,
    pub block_size: u32,
    pub frag_count: u32,
    pub compression_id: u16,
    pub block_log: u16,
    pub flags: SuperblockFlags,
    pub id_count: u16,
    pub version_major: u16,
    pub version_minor: u16,
    pub root_inode: EntryReference,
    pub bytes_used: u64,
    pub id_table: u64,
    pub xattr_table: u64,
    pub inode_table: u64,
    pub dir_table: u64,
    pub frag_table: u64,
    pub export_table: u64,
}

bitflags! {
    pub struct SuperblockFlags: u16 {
        const INODES_UNCOMPRESSED = 0x0001;
        const DATABLOCKS_UNCOMPRESSED = 0x0002;
        const CHECK_DATA = 0x0004;
        const FRAGMENTS_UNCOMPRESSED = 0x0008;
        const FRAGMENTS_NOT_USED = 0x0010;
        const FRAGMENTS_ALWAYS_GENERATED = 0x0020;
        const DATA_DEDUPLICATED = 0x0040;
        const NFS_EXPORT_EXISTS = 0x0080;
        const XATTRS_UNCOMPRESSED = 0x0100;
        const NO_XATTRS = 0x0200;
        const COMPRESSOR_OPTIONS_PRESENT = 0x0400;
        const ID_TABLE_UNCOMPRESSED = 0x0800;
    }
}

#[derive(Debug, IntoPrimitive, TryFromPrimitive, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum Compressor {
    None = 0,
    Gzip = 1,
    Lzma = 2,
    Lzo = 3,
    Xz = 4,
    Lz4 = 5,
    Zstd = 6,
}

impl Compressor {
    pub fn name(&self) -> &'static str {
        match self {
            Compressor::None => "none",
            Compressor::Gzip => "gzip",
            Compressor::Lzma => "lzma",
            Compressor::Lzo => "lzo",
            Compressor::Xz => "xz",
            Compressor::Lz4 => "lz4",
            Compressor::Zstd => "zstd",
        }
    }
}

impl Superblock {
    /// Read the raw superblock fields without validating them
    pub fn read<R>(r: &mut R) -> Result<Superblock>
    where R: Read
    {
        Ok(Superblock {
            magic: r.read_u32::<LittleEndian>()?,
            inode_count: r.read_u32::<LittleEndian>()?,
            mod_time: r.read_u32::<LittleEndian>()?,
            block_size: r.read_u32::<LittleEndian>()?,
            frag_count: r.read_u32::<LittleEndian>()?,
            compression_id: r.read_u16::<LittleEndian>()?,
            block_log: r.read_u16::<LittleEndian>()?,
            flags: SuperblockFlags::from_bits_truncate(r.read_u16::<LittleEndian>()?),
            id_count: r.read_u16::<LittleEndian>()?,
            version_major: r.read_u16::<LittleEndian>()?,
            version_minor: r.read_u16::<LittleEndian>()?,
            root_inode: EntryReference::read(r)?,
            bytes_used: r.read_u64::<LittleEndian>()?,
            id_table: r.read_u64::<LittleEndian>()?,
            xattr_table: r.read_u64::<LittleEndian>()?,
            inode_table: r.read_u64::<LittleEndian>()?,
            dir_table: r.read_u64::<LittleEndian>()?,
            frag_table: r.read_u64::<LittleEndian>()?,
            export_table: r.read_u64::<LittleEndian>()?,
        })
    }

    /// Read the superblock and check every invariant a 4.0 image must hold. Checks run in order
    /// magic, version, block geometry, compression so the reported error names the first
    /// structural problem found.
    pub fn parse<R>(r: &mut R) -> Result<Superblock>
    where R: Read
    {
        let sb = Self::read(r)?;
        sb.validate()?;
        Ok(sb)
    }

    pub fn from_bytes(b: &[u8]) -> Result<Superblock> {
        Superblock::parse(&mut &b[..])
    }

    pub fn validate(&self) -> Result<()> {
        if self.magic != MAGIC {
            return Err(Error::BadMagic { expected: MAGIC, found: self.magic });
        }
        if self.version_major != 4 || self.version_minor != 0 {
            return Err(Error::UnsupportedVersion { major: self.version_major, minor: self.version_minor });
        }
        if self.block_log >= 32 || self.block_size != 1u32 << self.block_log {
            return Err(Error::BlockSizeMismatch { block_size: self.block_size, block_log: self.block_log });
        }
        self.compressor()?;
        Ok(())
    }

    pub fn compressor(&self) -> Result<Compressor> {
        Compressor::try_from(self.compression_id)
            .map_err(|e| Error::UnsupportedCompression(e.number))
    }

    pub fn has_xattrs(&self) -> bool {
        self.xattr_table != INVALID_TABLE
    }

    /// Length of the header in front of every metadata block
    pub(crate) fn metadata_header_len(&self) -> u64 {
        if self.flags.contains(SuperblockFlags::CHECK_DATA) { 3 } else { 2 }
    }
}
