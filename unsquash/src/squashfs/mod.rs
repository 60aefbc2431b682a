mod block;
mod compressed;
mod directory;
mod filedata;
mod inode;
mod source;
mod squashfs;
mod table;
mod tree;

pub mod metadata;
pub mod path;
pub mod superblock;

pub use self::block::DataBlockSize;
pub use self::directory::{DirectoryEntry, DirectoryHeader};
pub use self::filedata::{FileChunks, FileReader};
pub use self::inode::{
    DeviceInode, DirectoryInode, FileInode, FileType, Inode, InodeHeader, InodeKind, InodeType,
    IpcInode, SymlinkInode, NO_FRAGMENT,
};
pub use self::squashfs::{OpenOptions, SquashFS};
pub use self::superblock::{Compressor, Superblock};
pub use self::table::{FragmentEntry, FragmentTable, IdTable, Xattr, NO_XATTRS};
pub use self::path::Walk;
pub use self::tree::Node;
