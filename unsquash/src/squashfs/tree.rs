use std::io::{Read, Seek};
use std::rc::Rc;

use log::debug;

use crate::error::{Error, Result};
use super::block::BlockReader;
use super::directory;
use super::filedata::{FileChunks, FileReader};
use super::inode::{FileType, Inode};
use super::metadata::{EntryReference, MetadataCursor};
use super::source::image_offset;
use super::squashfs::SquashFS;
use super::superblock::Superblock;
use super::table::{IdTable, Xattr};

/// Index of a node in the tree arena
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct NodeId(usize);

#[derive(Debug)]
struct NodeData {
    name: String,
    parent: Option<NodeId>,
    inode: Rc<Inode>,
    children: Vec<NodeId>,
}

/// Every file in an image, decoded once at open time. Nodes live in a flat arena and refer to
/// each other by index; a directory's children keep their on-disk order.
#[derive(Debug)]
pub(crate) struct Tree {
    nodes: Vec<NodeData>,
}

impl Tree {
    pub const ROOT: NodeId = NodeId(0);

    pub fn build<R>(blocks: &BlockReader<R>, sb: &Superblock, ids: &IdTable) -> Result<Tree>
    where R: Read + Seek
    {
        let decode = |at: EntryReference| -> Result<Inode> {
            let mut r = blocks.metadata_reader(MetadataCursor::at(sb.inode_table, at)?);
            Inode::read(&mut r, sb.block_size, sb.block_log, ids)
        };

        let root = decode(sb.root_inode)?;
        let mut tree = Tree {
            nodes: vec![NodeData {
                name: String::new(),
                parent: None,
                inode: Rc::new(root),
                children: Vec::new(),
            }],
        };

        let mut pending = vec![Self::ROOT];
        while let Some(dir_id) = pending.pop() {
            let dir = match tree.nodes[dir_id.0].inode.as_dir() {
                Some(d) if d.listing_size() > 0 => d.clone(),
                _ => continue,
            };
            let block = image_offset(sb.dir_table, u64::from(dir.start_block))?;
            let cursor = MetadataCursor::new(block, dir.offset.into());
            let listing = directory::read_listing(&mut blocks.metadata_reader(cursor), dir.listing_size())?;

            for entry in listing {
                let inode = decode(entry.inode)?;
                let is_dir = inode.file_type() == FileType::Directory;
                if is_dir && tree.is_ancestor_inode(dir_id, inode.inode_number()) {
                    return Err(Error::DirectoryLoop { inode_number: inode.inode_number() });
                }
                let id = NodeId(tree.nodes.len());
                tree.nodes.push(NodeData {
                    name: entry.name,
                    parent: Some(dir_id),
                    inode: Rc::new(inode),
                    children: Vec::new(),
                });
                tree.nodes[dir_id.0].children.push(id);
                if is_dir {
                    pending.push(id);
                }
            }
        }
        debug!("directory tree: {} nodes", tree.nodes.len());
        Ok(tree)
    }

    /// Whether `inode_number` belongs to `id` or any directory above it
    fn is_ancestor_inode(&self, id: NodeId, inode_number: u32) -> bool {
        let mut cur = Some(id);
        while let Some(c) = cur {
            let node = &self.nodes[c.0];
            if node.inode.inode_number() == inode_number {
                return true;
            }
            cur = node.parent;
        }
        false
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }
}

/// A file, directory or other entry in an image. Nodes borrow the image they came from and are
/// cheap to copy.
pub struct Node<'a, R> {
    fs: &'a SquashFS<R>,
    id: NodeId,
}

impl<'a, R> Clone for Node<'a, R> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<'a, R> Copy for Node<'a, R> {}

impl<'a, R> PartialEq for Node<'a, R> {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::eq(self.fs, other.fs) && self.id == other.id
    }
}

impl<'a, R> Eq for Node<'a, R> {}

impl<'a, R> std::fmt::Debug for Node<'a, R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("path", &self.path())
            .field("type", &self.file_type())
            .finish()
    }
}

impl<'a, R> Node<'a, R> {
    pub(crate) fn new(fs: &'a SquashFS<R>, id: NodeId) -> Self {
        Self { fs, id }
    }

    fn data(&self) -> &'a NodeData {
        &self.fs.tree().nodes[self.id.0]
    }

    fn at(&self, id: NodeId) -> Self {
        Self::new(self.fs, id)
    }

    /// The entry name; empty for the root
    pub fn name(&self) -> &'a str {
        &self.data().name
    }

    /// Absolute path of this node within the image
    pub fn path(&self) -> String {
        let mut names = Vec::new();
        let mut cur = Some(*self);
        while let Some(n) = cur {
            if n.parent().is_some() {
                names.push(n.name());
            }
            cur = n.parent();
        }
        if names.is_empty() {
            return "/".to_string();
        }
        names.iter().rev().fold(String::new(), |mut p, n| {
            p.push('/');
            p.push_str(n);
            p
        })
    }

    pub fn parent(&self) -> Option<Self> {
        self.data().parent.map(|p| self.at(p))
    }

    /// The root of the image this node belongs to
    pub fn root(&self) -> Self {
        self.at(Tree::ROOT)
    }

    /// Entries of a directory in on-disk order. Empty for anything else.
    pub fn children(&self) -> impl Iterator<Item = Node<'a, R>> + 'a {
        let fs = self.fs;
        self.data().children.iter().map(move |c| Node::new(fs, *c))
    }

    /// The directory entry called `name`, if this is a directory that has one
    pub fn child(&self, name: &str) -> Option<Self> {
        self.children().find(|c| c.name() == name)
    }

    pub fn inode(&self) -> &'a Inode {
        &self.data().inode
    }

    pub fn file_type(&self) -> FileType {
        self.inode().file_type()
    }

    pub fn is_dir(&self) -> bool {
        self.file_type() == FileType::Directory
    }

    pub fn is_file(&self) -> bool {
        self.file_type() == FileType::File
    }

    pub fn is_symlink(&self) -> bool {
        self.file_type() == FileType::Symlink
    }

    pub fn is_block_device(&self) -> bool {
        self.file_type() == FileType::BlockDevice
    }

    pub fn is_char_device(&self) -> bool {
        self.file_type() == FileType::CharDevice
    }

    pub fn is_fifo(&self) -> bool {
        self.file_type() == FileType::Fifo
    }

    pub fn is_socket(&self) -> bool {
        self.file_type() == FileType::Socket
    }

    pub fn mode(&self) -> u32 {
        self.inode().mode()
    }

    pub fn filemode(&self) -> String {
        self.inode().filemode()
    }

    pub fn uid(&self) -> u32 {
        self.inode().uid
    }

    pub fn gid(&self) -> u32 {
        self.inode().gid
    }

    pub fn mtime(&self) -> u32 {
        self.inode().mtime()
    }

    /// See [`Inode::size`]
    pub fn size(&self) -> u64 {
        self.inode().size()
    }

    pub fn major(&self) -> Option<u32> {
        self.inode().as_device().map(|d| d.major())
    }

    pub fn minor(&self) -> Option<u32> {
        self.inode().as_device().map(|d| d.minor())
    }

    /// Extended attributes in on-disk order
    pub fn xattrs(&self) -> Result<Vec<Xattr>> {
        self.fs.xattr_table().get(self.inode().xattr_index())
    }

    /// Symlink target
    pub fn readlink(&self) -> Result<String> {
        match self.inode().as_symlink() {
            Some(s) => Ok(String::from_utf8_lossy(&s.target).into_owned()),
            None => Err(Error::NotASymlink(self.path())),
        }
    }
}

impl<'a, R> Node<'a, R>
where R: Read + Seek
{
    /// The contents of a regular file as a lazy sequence of chunks: one per data block, then the
    /// fragment tail. Nothing is read until the iterator is advanced.
    pub fn iter_bytes(&self) -> Result<FileChunks<'a, R>> {
        match self.inode().as_file() {
            Some(file) => Ok(FileChunks::new(self.fs, file)),
            None => Err(Error::NotAFile(self.path())),
        }
    }

    /// The whole contents of a regular file
    pub fn read_bytes(&self) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(self.size().min(1 << 24) as usize);
        for chunk in self.iter_bytes()? {
            out.extend_from_slice(&chunk?);
        }
        Ok(out)
    }

    /// A reader over the contents of a regular file
    pub fn open(&self) -> Result<FileReader<'a, R>> {
        Ok(FileReader::new(self.iter_bytes()?))
    }
}
