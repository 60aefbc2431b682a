use std::io;

use thiserror::Error;

/// Errors produced while opening or reading a SquashFS image.
///
/// Lookups that simply miss (a path or name that is not in the image) are not errors; they are
/// reported as `None` by [`Node::select`](crate::squashfs::Node::select) and
/// [`Node::find`](crate::squashfs::Node::find).
#[derive(Error, Debug)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Bad magic: expected {expected:#010x}, found {found:#010x}")]
    BadMagic { expected: u32, found: u32 },

    #[error("Unsupported SquashFS version {major}.{minor} (only 4.0 is supported)")]
    UnsupportedVersion { major: u16, minor: u16 },

    #[error("Block size {block_size} does not match block_log {block_log}")]
    BlockSizeMismatch { block_size: u32, block_log: u16 },

    #[error("Unsupported compression id {0}")]
    UnsupportedCompression(u16),

    #[error("Unknown inode type {0}")]
    UnknownInodeType(u16),

    #[error("{codec} decompression failed: {reason}")]
    Decompress { codec: &'static str, reason: String },

    #[error("Metadata block at {offset:#x} is {size} bytes, larger than 8192")]
    MetadataBlockTooLarge { offset: u64, size: u16 },

    #[error("ID index {0} is out of range")]
    IdOutOfRange(u16),

    #[error("Fragment index {0} is out of range")]
    FragmentOutOfRange(u32),

    #[error("Xattr index {0} is out of range")]
    XattrOutOfRange(u32),

    #[error("Invalid directory entry name {0:?}")]
    InvalidEntryName(String),

    #[error("Directory at inode {inode_number} lists one of its own ancestors")]
    DirectoryLoop { inode_number: u32 },

    #[error("Not a regular file: {0}")]
    NotAFile(String),

    #[error("Not a symbolic link: {0}")]
    NotASymlink(String),

    #[error("File data size mismatch: expected {expected} bytes, got {actual}")]
    SizeMismatch { expected: u64, actual: u64 },
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// True for errors caused by a malformed or unsupported image, as opposed to I/O failures or
    /// caller mistakes.
    pub fn is_format_error(&self) -> bool {
        !matches!(self, Error::Io(_) | Error::NotAFile(_) | Error::NotASymlink(_))
    }
}

impl From<Error> for io::Error {
    fn from(e: Error) -> Self {
        match e {
            Error::Io(e) => e,
            Error::NotAFile(_) | Error::NotASymlink(_) => io::Error::new(io::ErrorKind::InvalidInput, e),
            Error::UnsupportedCompression(_) => io::Error::new(io::ErrorKind::Unsupported, e),
            e => io::Error::new(io::ErrorKind::InvalidData, e),
        }
    }
}
