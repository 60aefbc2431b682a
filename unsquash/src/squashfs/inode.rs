use std::io::Read;

use byteorder::{LittleEndian, ReadBytesExt};
use num_enum::{IntoPrimitive, TryFromPrimitive};

use crate::error::{Error, Result};
use super::block::DataBlockSize;
use super::table::{IdTable, NO_XATTRS};

/// Fragment index of a file whose tail is stored in full blocks
pub const NO_FRAGMENT: u32 = 0xFFFFFFFF;

#[derive(Debug, IntoPrimitive, TryFromPrimitive, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum InodeType {
    BasicDirectory = 1,
    BasicFile = 2,
    BasicSymlink = 3,
    BasicBlockDevice = 4,
    BasicCharDevice = 5,
    BasicFifo = 6,
    BasicSocket = 7,
    ExtendedDirectory = 8,
    ExtendedFile = 9,
    ExtendedSymlink = 10,
    ExtendedBlockDevice = 11,
    ExtendedCharDevice = 12,
    ExtendedFifo = 13,
    ExtendedSocket = 14,
}

/// The kind of file an inode describes, with basic and extended forms folded together
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileType {
    Directory,
    File,
    Symlink,
    BlockDevice,
    CharDevice,
    Fifo,
    Socket,
}

impl FileType {
    /// The S_IFMT bits for this file type
    pub fn mode_bits(&self) -> u32 {
        match self {
            FileType::Directory => 0o040000,
            FileType::File => 0o100000,
            FileType::Symlink => 0o120000,
            FileType::BlockDevice => 0o060000,
            FileType::CharDevice => 0o020000,
            FileType::Fifo => 0o010000,
            FileType::Socket => 0o140000,
        }
    }

    fn mode_char(&self) -> char {
        match self {
            FileType::Directory => 'd',
            FileType::File => '-',
            FileType::Symlink => 'l',
            FileType::BlockDevice => 'b',
            FileType::CharDevice => 'c',
            FileType::Fifo => 'p',
            FileType::Socket => 's',
        }
    }
}

impl InodeType {
    pub fn file_type(&self) -> FileType {
        match self {
            InodeType::BasicDirectory | InodeType::ExtendedDirectory => FileType::Directory,
            InodeType::BasicFile | InodeType::ExtendedFile => FileType::File,
            InodeType::BasicSymlink | InodeType::ExtendedSymlink => FileType::Symlink,
            InodeType::BasicBlockDevice | InodeType::ExtendedBlockDevice => FileType::BlockDevice,
            InodeType::BasicCharDevice | InodeType::ExtendedCharDevice => FileType::CharDevice,
            InodeType::BasicFifo | InodeType::ExtendedFifo => FileType::Fifo,
            InodeType::BasicSocket | InodeType::ExtendedSocket => FileType::Socket,
        }
    }

    pub fn is_extended(&self) -> bool {
        u16::from(*self) >= u16::from(InodeType::ExtendedDirectory)
    }
}

/// Fields shared by every inode. `uid_idx` and `gid_idx` index the ID table.
#[derive(Debug, Clone, Copy)]
pub struct InodeHeader {
    pub inode_type: InodeType,
    pub mode: u16,
    pub uid_idx: u16,
    pub gid_idx: u16,
    pub mtime: u32,
    pub inode_number: u32,
}

impl InodeHeader {
    pub fn read<R>(r: &mut R) -> Result<Self>
    where R: Read
    {
        let raw_type = r.read_u16::<LittleEndian>()?;
        let inode_type = InodeType::try_from(raw_type)
            .map_err(|e| Error::UnknownInodeType(e.number))?;
        Ok(Self {
            inode_type,
            mode: r.read_u16::<LittleEndian>()?,
            uid_idx: r.read_u16::<LittleEndian>()?,
            gid_idx: r.read_u16::<LittleEndian>()?,
            mtime: r.read_u32::<LittleEndian>()?,
            inode_number: r.read_u32::<LittleEndian>()?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct DirectoryInode {
    /// Offset of the first listing block, relative to the directory table
    pub start_block: u32,
    /// Offset of the listing within its first block
    pub offset: u16,
    /// Listing size in bytes, 3 larger than the real size
    pub file_size: u32,
    pub nlink: u32,
    pub parent_inode: u32,
    pub index_count: u16,
    pub xattr: u32,
}

impl DirectoryInode {
    /// Number of listing bytes actually stored on disk
    pub fn listing_size(&self) -> u32 {
        self.file_size.saturating_sub(3)
    }
}

#[derive(Debug, Clone)]
pub struct FileInode {
    pub start_block: u64,
    pub fragment: u32,
    pub fragment_offset: u32,
    pub file_size: u64,
    pub sparse: u64,
    pub nlink: u32,
    pub xattr: u32,
    /// One size word per full data block
    pub block_sizes: Vec<DataBlockSize>,
    /// Length of the tail stored in the fragment block, 0 without a fragment
    pub frag_bytes: u32,
}

impl FileInode {
    pub fn has_fragment(&self) -> bool {
        self.fragment != NO_FRAGMENT
    }

    fn read_blocks<R>(&mut self, r: &mut R, block_size: u32, block_log: u16) -> Result<()>
    where R: Read
    {
        let block_size = u64::from(block_size);
        let count = if self.has_fragment() {
            self.frag_bytes = (self.file_size % block_size) as u32;
            self.file_size >> block_log
        } else {
            self.file_size.div_ceil(block_size)
        };
        self.block_sizes = Vec::with_capacity(count.min(4096) as usize);
        for _ in 0..count {
            self.block_sizes.push(DataBlockSize::from_raw(r.read_u32::<LittleEndian>()?));
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct SymlinkInode {
    pub nlink: u32,
    pub target: Vec<u8>,
    pub xattr: u32,
}

#[derive(Debug, Clone)]
pub struct DeviceInode {
    pub nlink: u32,
    pub rdev: u32,
    pub xattr: u32,
}

impl DeviceInode {
    pub fn major(&self) -> u32 {
        (self.rdev >> 8) & 0xFFF
    }

    pub fn minor(&self) -> u32 {
        (self.rdev & 0xFF) | ((self.rdev >> 12) & 0xFFF00)
    }
}

#[derive(Debug, Clone)]
pub struct IpcInode {
    pub nlink: u32,
    pub xattr: u32,
}

#[derive(Debug, Clone)]
pub enum InodeKind {
    Directory(DirectoryInode),
    File(FileInode),
    Symlink(SymlinkInode),
    BlockDevice(DeviceInode),
    CharDevice(DeviceInode),
    Fifo(IpcInode),
    Socket(IpcInode),
}

/// A decoded inode with its owner ids already resolved through the ID table
#[derive(Debug, Clone)]
pub struct Inode {
    pub header: InodeHeader,
    pub uid: u32,
    pub gid: u32,
    pub kind: InodeKind,
}

impl Inode {
    /// Decode one inode from the inode table stream. `block_size` and `block_log` come from the
    /// superblock and determine how many block size words a regular file carries.
    pub fn read<R>(r: &mut R, block_size: u32, block_log: u16, ids: &IdTable) -> Result<Inode>
    where R: Read
    {
        let header = InodeHeader::read(r)?;
        let kind = match header.inode_type {
            InodeType::BasicDirectory => {
                let start_block = r.read_u32::<LittleEndian>()?;
                let nlink = r.read_u32::<LittleEndian>()?;
                let file_size = r.read_u16::<LittleEndian>()?.into();
                let offset = r.read_u16::<LittleEndian>()?;
                let parent_inode = r.read_u32::<LittleEndian>()?;
                InodeKind::Directory(DirectoryInode {
                    start_block, offset, file_size, nlink, parent_inode,
                    index_count: 0,
                    xattr: NO_XATTRS,
                })
            },
            InodeType::ExtendedDirectory => {
                let nlink = r.read_u32::<LittleEndian>()?;
                let file_size = r.read_u32::<LittleEndian>()?;
                let start_block = r.read_u32::<LittleEndian>()?;
                let parent_inode = r.read_u32::<LittleEndian>()?;
                let index_count = r.read_u16::<LittleEndian>()?;
                let offset = r.read_u16::<LittleEndian>()?;
                let xattr = r.read_u32::<LittleEndian>()?;
                // The directory index that follows is a lookup accelerator; listings are always
                // read in full so it is left unread
                InodeKind::Directory(DirectoryInode {
                    start_block, offset, file_size, nlink, parent_inode, index_count, xattr,
                })
            },
            InodeType::BasicFile => {
                let mut file = FileInode {
                    start_block: r.read_u32::<LittleEndian>()?.into(),
                    fragment: r.read_u32::<LittleEndian>()?,
                    fragment_offset: r.read_u32::<LittleEndian>()?,
                    file_size: r.read_u32::<LittleEndian>()?.into(),
                    sparse: 0,
                    nlink: 1,
                    xattr: NO_XATTRS,
                    block_sizes: Vec::new(),
                    frag_bytes: 0,
                };
                file.read_blocks(r, block_size, block_log)?;
                InodeKind::File(file)
            },
            InodeType::ExtendedFile => {
                let mut file = FileInode {
                    start_block: r.read_u64::<LittleEndian>()?,
                    file_size: r.read_u64::<LittleEndian>()?,
                    sparse: r.read_u64::<LittleEndian>()?,
                    nlink: r.read_u32::<LittleEndian>()?,
                    fragment: r.read_u32::<LittleEndian>()?,
                    fragment_offset: r.read_u32::<LittleEndian>()?,
                    xattr: r.read_u32::<LittleEndian>()?,
                    block_sizes: Vec::new(),
                    frag_bytes: 0,
                };
                file.read_blocks(r, block_size, block_log)?;
                InodeKind::File(file)
            },
            InodeType::BasicSymlink | InodeType::ExtendedSymlink => {
                let nlink = r.read_u32::<LittleEndian>()?;
                let size = r.read_u32::<LittleEndian>()?;
                let mut target = Vec::new();
                r.by_ref().take(u64::from(size)).read_to_end(&mut target)?;
                if target.len() != size as usize {
                    return Err(std::io::Error::from(std::io::ErrorKind::UnexpectedEof).into());
                }
                let xattr = if header.inode_type.is_extended() {
                    r.read_u32::<LittleEndian>()?
                } else {
                    NO_XATTRS
                };
                InodeKind::Symlink(SymlinkInode { nlink, target, xattr })
            },
            InodeType::BasicBlockDevice | InodeType::BasicCharDevice
            | InodeType::ExtendedBlockDevice | InodeType::ExtendedCharDevice => {
                let nlink = r.read_u32::<LittleEndian>()?;
                let rdev = r.read_u32::<LittleEndian>()?;
                let xattr = if header.inode_type.is_extended() {
                    r.read_u32::<LittleEndian>()?
                } else {
                    NO_XATTRS
                };
                let dev = DeviceInode { nlink, rdev, xattr };
                if header.inode_type.file_type() == FileType::BlockDevice {
                    InodeKind::BlockDevice(dev)
                } else {
                    InodeKind::CharDevice(dev)
                }
            },
            InodeType::BasicFifo | InodeType::BasicSocket
            | InodeType::ExtendedFifo | InodeType::ExtendedSocket => {
                let nlink = r.read_u32::<LittleEndian>()?;
                let xattr = if header.inode_type.is_extended() {
                    r.read_u32::<LittleEndian>()?
                } else {
                    NO_XATTRS
                };
                let ipc = IpcInode { nlink, xattr };
                if header.inode_type.file_type() == FileType::Fifo {
                    InodeKind::Fifo(ipc)
                } else {
                    InodeKind::Socket(ipc)
                }
            },
        };

        Ok(Inode {
            uid: ids.get(header.uid_idx)?,
            gid: ids.get(header.gid_idx)?,
            header,
            kind,
        })
    }

    pub fn file_type(&self) -> FileType {
        self.header.inode_type.file_type()
    }

    /// Full `st_mode`: file type bits plus the stored permission bits
    pub fn mode(&self) -> u32 {
        self.file_type().mode_bits() | u32::from(self.header.mode & 0o7777)
    }

    /// `ls -l` style rendering of the mode, e.g. `drwxr-xr-x`
    pub fn filemode(&self) -> String {
        filemode(self.file_type(), self.header.mode)
    }

    pub fn mtime(&self) -> u32 {
        self.header.mtime
    }

    pub fn inode_number(&self) -> u32 {
        self.header.inode_number
    }

    pub fn nlink(&self) -> u32 {
        match &self.kind {
            InodeKind::Directory(d) => d.nlink,
            InodeKind::File(f) => f.nlink,
            InodeKind::Symlink(s) => s.nlink,
            InodeKind::BlockDevice(d) | InodeKind::CharDevice(d) => d.nlink,
            InodeKind::Fifo(i) | InodeKind::Socket(i) => i.nlink,
        }
    }

    /// Xattr table index, [`NO_XATTRS`] if the inode has none
    pub fn xattr_index(&self) -> u32 {
        match &self.kind {
            InodeKind::Directory(d) => d.xattr,
            InodeKind::File(f) => f.xattr,
            InodeKind::Symlink(s) => s.xattr,
            InodeKind::BlockDevice(d) | InodeKind::CharDevice(d) => d.xattr,
            InodeKind::Fifo(i) | InodeKind::Socket(i) => i.xattr,
        }
    }

    /// The inode's size field: content length for files, listing size for directories, target
    /// length for symlinks, the packed device number for devices and 0 for fifos and sockets
    pub fn size(&self) -> u64 {
        match &self.kind {
            InodeKind::Directory(d) => d.file_size.into(),
            InodeKind::File(f) => f.file_size,
            InodeKind::Symlink(s) => s.target.len() as u64,
            InodeKind::BlockDevice(d) | InodeKind::CharDevice(d) => d.rdev.into(),
            InodeKind::Fifo(_) | InodeKind::Socket(_) => 0,
        }
    }

    pub fn as_dir(&self) -> Option<&DirectoryInode> {
        match &self.kind {
            InodeKind::Directory(d) => Some(d),
            _ => None,
        }
    }

    pub fn as_file(&self) -> Option<&FileInode> {
        match &self.kind {
            InodeKind::File(f) => Some(f),
            _ => None,
        }
    }

    pub fn as_symlink(&self) -> Option<&SymlinkInode> {
        match &self.kind {
            InodeKind::Symlink(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_device(&self) -> Option<&DeviceInode> {
        match &self.kind {
            InodeKind::BlockDevice(d) | InodeKind::CharDevice(d) => Some(d),
            _ => None,
        }
    }
}

fn filemode(file_type: FileType, mode: u16) -> String {
    const SETUID: u16 = 0o4000;
    const SETGID: u16 = 0o2000;
    const STICKY: u16 = 0o1000;

    let mut s = String::with_capacity(10);
    s.push(file_type.mode_char());
    for (shift, special, special_set, special_unset) in [
        (6, SETUID, 's', 'S'),
        (3, SETGID, 's', 'S'),
        (0, STICKY, 't', 'T'),
    ] {
        let bits = (mode >> shift) & 0o7;
        s.push(if bits & 0o4 != 0 { 'r' } else { '-' });
        s.push(if bits & 0o2 != 0 { 'w' } else { '-' });
        s.push(match (bits & 0o1 != 0, mode & special != 0) {
            (true, true) => special_set,
            (false, true) => special_unset,
            (true, false) => 'x',
            (false, false) => '-',
        });
    }
    s
}
