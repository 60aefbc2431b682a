//! See https://dr-emann.github.io/squashfs/squashfs.html
//! for details on the SquashFS binary format

use std::fs::File;
use std::io::{BufReader, Cursor, Read, Seek};
use std::path::Path;

use log::debug;

use crate::error::Result;
use super::block::BlockReader;
use super::compressed;
use super::source::ImageSource;
use super::superblock::{Superblock, SUPERBLOCK_SIZE};
use super::table::{FragmentTable, IdTable, XattrTable};
use super::path::Walk;
use super::tree::{Node, Tree};

/// Settings used when opening an image, in the style of [`std::fs::OpenOptions`]
#[derive(Debug, Clone)]
pub struct OpenOptions {
    offset: u64,
    preload_fragments: bool,
    strict_sizes: bool,
}

impl Default for OpenOptions {
    fn default() -> Self {
        Self {
            offset: 0,
            preload_fragments: true,
            strict_sizes: false,
        }
    }
}

impl OpenOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Byte offset of the image within the source
    pub fn offset(&mut self, offset: u64) -> &mut Self {
        self.offset = offset;
        self
    }

    /// Decode every fragment block while opening instead of on first use
    pub fn preload_fragments(&mut self, preload: bool) -> &mut Self {
        self.preload_fragments = preload;
        self
    }

    /// Treat a file whose decoded length differs from its inode's size as an error rather than
    /// logging a warning
    pub fn strict_sizes(&mut self, strict: bool) -> &mut Self {
        self.strict_sizes = strict;
        self
    }

    pub fn open<P>(&self, path: P) -> Result<SquashFS<BufReader<File>>>
    where P: AsRef<Path>
    {
        self.read_from(BufReader::new(File::open(path)?))
    }

    pub fn from_bytes(&self, data: Vec<u8>) -> Result<SquashFS<Cursor<Vec<u8>>>> {
        self.read_from(Cursor::new(data))
    }

    /// Open an image from any seekable reader. On failure the reader is dropped along with
    /// everything decoded so far.
    pub fn read_from<R>(&self, r: R) -> Result<SquashFS<R>>
    where R: Read + Seek
    {
        let mut source = ImageSource::new(r, self.offset);
        let raw = source.read_vec_at(0, SUPERBLOCK_SIZE)?;
        let sb = Superblock::from_bytes(&raw)?;
        let codec = compressed::backend(sb.compressor()?)?;
        let blocks = BlockReader::new(source, codec, &sb);
        debug!("squashfs {}.{}: {} compression, block size {}, {} inodes",
            sb.version_major, sb.version_minor, blocks.codec_name(), sb.block_size, sb.inode_count);

        let ids = IdTable::read(&blocks, &sb)?;
        let fragments = FragmentTable::read(&blocks, &sb)?;
        if self.preload_fragments {
            fragments.preload(&blocks)?;
        }
        let xattrs = XattrTable::read(&blocks, &sb)?;
        let tree = Tree::build(&blocks, &sb, &ids)?;

        Ok(SquashFS {
            superblock: sb,
            blocks,
            ids,
            fragments,
            xattrs,
            tree,
            strict_sizes: self.strict_sizes,
        })
    }
}

/// A SquashFS 4.0 image opened for reading. All tables and the full directory tree are decoded
/// while opening; file contents are read on demand through [`Node`].
///
/// Reads go through interior caches, so only a shared reference is needed. The type is not
/// `Sync` and is meant to be used from one thread.
#[derive(Debug)]
pub struct SquashFS<R> {
    superblock: Superblock,
    blocks: BlockReader<R>,
    ids: IdTable,
    fragments: FragmentTable,
    xattrs: XattrTable,
    tree: Tree,
    strict_sizes: bool,
}

impl SquashFS<BufReader<File>> {
    /// Open the contents of a filepath as a SquashFS, using a BufReader
    pub fn open<P>(path: P) -> Result<Self>
    where P: AsRef<Path>
    {
        OpenOptions::new().open(path)
    }
}

impl SquashFS<Cursor<Vec<u8>>> {
    /// Open an image held in memory
    pub fn from_bytes(data: Vec<u8>) -> Result<Self> {
        OpenOptions::new().from_bytes(data)
    }
}

impl<R> SquashFS<R>
where R: Read + Seek
{
    /// Create a new SquashFS instance from the provided Reader
    pub fn new(r: R) -> Result<Self> {
        OpenOptions::new().read_from(r)
    }

    /// Release the image and its caches. Dropping the image does the same.
    pub fn close(self) {}

    /// Give back the underlying reader
    pub fn into_inner(self) -> R {
        self.blocks.into_inner()
    }
}

impl<R> SquashFS<R> {
    pub fn superblock(&self) -> &Superblock {
        &self.superblock
    }

    /// The `/` directory
    pub fn root(&self) -> Node<'_, R> {
        Node::new(self, Tree::ROOT)
    }

    /// Resolve `path` from the root; see [`Node::select`]
    pub fn select(&self, path: &str) -> Option<Node<'_, R>> {
        self.root().select(path)
    }

    /// First entry in the image called `name`; see [`Node::find`]
    pub fn find(&self, name: &str) -> Option<Node<'_, R>> {
        self.root().find(name)
    }

    /// Every node in the image, root first, in depth-first order
    pub fn walk(&self) -> Walk<'_, R> {
        self.root().walk()
    }

    /// Number of entries in the image including the root
    pub fn len(&self) -> usize {
        self.tree.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tree.len() <= 1
    }

    pub fn ids(&self) -> &IdTable {
        &self.ids
    }

    pub fn fragments(&self) -> &FragmentTable {
        &self.fragments
    }

    pub(crate) fn tree(&self) -> &Tree {
        &self.tree
    }

    pub(crate) fn blocks(&self) -> &BlockReader<R> {
        &self.blocks
    }

    pub(crate) fn xattr_table(&self) -> &XattrTable {
        &self.xattrs
    }

    pub(crate) fn strict_sizes(&self) -> bool {
        self.strict_sizes
    }
}
