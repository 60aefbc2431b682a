//! A small SquashFS 4.0 writer used to build test images in memory. It lays images out the way
//! mksquashfs does (data and fragment blocks, then the inode, directory, fragment, id and xattr
//! tables) and can compress with every backend the reader supports.
#![allow(dead_code)]

use std::cell::Cell;
use std::io::{self, Cursor, Read, Seek, SeekFrom};
use std::rc::Rc;

pub const SUPERBLOCK_SIZE: usize = 96;
const METADATA_BLOCK_SIZE: usize = 8192;
const NO_FRAGMENT: u32 = 0xFFFFFFFF;
const NO_XATTRS: u32 = 0xFFFFFFFF;
const INVALID_TABLE: u64 = u64::MAX;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Codec {
    None,
    Gzip,
    Lzma,
    Lzo,
    Xz,
    Lz4,
    Zstd,
}

impl Codec {
    pub fn id(self) -> u16 {
        match self {
            Codec::None => 0,
            Codec::Gzip => 1,
            Codec::Lzma => 2,
            Codec::Lzo => 3,
            Codec::Xz => 4,
            Codec::Lz4 => 5,
            Codec::Zstd => 6,
        }
    }

    /// Compress `data`, or return `None` when it should be stored as is
    pub fn compress(self, data: &[u8]) -> Option<Vec<u8>> {
        let packed = match self {
            Codec::None => return None,
            #[cfg(feature = "flate2")]
            Codec::Gzip => {
                use std::io::Write;
                let mut enc = flate2::write::ZlibEncoder::new(Vec::new(), flate2::Compression::best());
                enc.write_all(data).expect("zlib write");
                enc.finish().expect("zlib finish")
            },
            #[cfg(feature = "lzma-rs")]
            Codec::Lzma => {
                let mut out = Vec::new();
                lzma_rs::lzma_compress(&mut &data[..], &mut out).expect("lzma");
                out
            },
            #[cfg(feature = "lzma-rs")]
            Codec::Xz => {
                let mut out = Vec::new();
                lzma_rs::xz_compress(&mut &data[..], &mut out).expect("xz");
                out
            },
            #[cfg(feature = "rust-lzo")]
            Codec::Lzo => {
                let mut out = vec![0u8; rust_lzo::worst_compress(data.len())];
                let mut ctx = rust_lzo::LZOContext::new();
                let (packed, err) = ctx.compress_to_slice(data, &mut out);
                assert!(matches!(err, rust_lzo::LZOError::OK));
                packed.to_vec()
            },
            #[cfg(feature = "lz4_flex")]
            Codec::Lz4 => lz4_flex::block::compress(data),
            #[cfg(feature = "ruzstd")]
            Codec::Zstd => ruzstd::encoding::compress_to_vec(data, ruzstd::encoding::CompressionLevel::Fastest),
            #[allow(unreachable_patterns)]
            c => panic!("{:?} support is not compiled in", c),
        };
        (packed.len() < data.len()).then_some(packed)
    }
}

#[derive(Debug, Clone)]
pub enum Kind {
    Dir(Vec<Item>),
    File(Vec<u8>),
    Symlink(String),
    BlockDev(u32, u32),
    CharDev(u32, u32),
    Fifo,
    Socket,
}

#[derive(Debug, Clone)]
pub struct Item {
    pub name: String,
    pub mode: u16,
    pub uid: u32,
    pub gid: u32,
    pub mtime: u32,
    pub xattrs: Vec<(String, Vec<u8>)>,
    pub kind: Kind,
}

fn item(name: &str, mode: u16, kind: Kind) -> Item {
    Item {
        name: name.to_string(),
        mode,
        uid: 0,
        gid: 0,
        mtime: 1_700_000_000,
        xattrs: Vec::new(),
        kind,
    }
}

pub fn dir(name: &str, children: Vec<Item>) -> Item {
    item(name, 0o755, Kind::Dir(children))
}

pub fn root(children: Vec<Item>) -> Item {
    dir("", children)
}

pub fn file(name: &str, data: impl Into<Vec<u8>>) -> Item {
    item(name, 0o644, Kind::File(data.into()))
}

pub fn symlink(name: &str, target: &str) -> Item {
    item(name, 0o777, Kind::Symlink(target.to_string()))
}

pub fn block_dev(name: &str, major: u32, minor: u32) -> Item {
    item(name, 0o660, Kind::BlockDev(major, minor))
}

pub fn char_dev(name: &str, major: u32, minor: u32) -> Item {
    item(name, 0o620, Kind::CharDev(major, minor))
}

pub fn fifo(name: &str) -> Item {
    item(name, 0o644, Kind::Fifo)
}

pub fn socket(name: &str) -> Item {
    item(name, 0o755, Kind::Socket)
}

impl Item {
    pub fn mode(mut self, mode: u16) -> Self {
        self.mode = mode;
        self
    }

    pub fn owner(mut self, uid: u32, gid: u32) -> Self {
        self.uid = uid;
        self.gid = gid;
        self
    }

    pub fn xattr(mut self, name: &str, value: &[u8]) -> Self {
        self.xattrs.push((name.to_string(), value.to_vec()));
        self
    }

    fn basic_type(&self) -> u16 {
        match self.kind {
            Kind::Dir(_) => 1,
            Kind::File(_) => 2,
            Kind::Symlink(_) => 3,
            Kind::BlockDev(..) => 4,
            Kind::CharDev(..) => 5,
            Kind::Fifo => 6,
            Kind::Socket => 7,
        }
    }
}

/// Bytes of a file made of `blocks` full blocks of distinct, mildly compressible content
pub fn patterned(len: usize, seed: u8) -> Vec<u8> {
    (0..len).map(|i| ((i / 7) as u8).wrapping_mul(31).wrapping_add(seed) ^ (i as u8 & 0x3)).collect()
}

#[derive(Debug, Clone)]
pub struct ImageBuilder {
    codec: Codec,
    block_size: u32,
    fragments: bool,
    sparse: bool,
    extended: bool,
    check_data: bool,
    offset: usize,
}

impl Default for ImageBuilder {
    fn default() -> Self {
        Self {
            codec: Codec::None,
            block_size: 4096,
            fragments: true,
            sparse: true,
            extended: false,
            check_data: false,
            offset: 0,
        }
    }
}

impl ImageBuilder {
    pub fn new(codec: Codec) -> Self {
        Self { codec, ..Self::default() }
    }

    pub fn block_size(mut self, block_size: u32) -> Self {
        assert!(block_size.is_power_of_two());
        self.block_size = block_size;
        self
    }

    /// Pack file tails into shared fragment blocks
    pub fn fragments(mut self, on: bool) -> Self {
        self.fragments = on;
        self
    }

    /// Store all-zero blocks as sparse
    pub fn sparse(mut self, on: bool) -> Self {
        self.sparse = on;
        self
    }

    /// Use the extended form of every inode
    pub fn extended(mut self, on: bool) -> Self {
        self.extended = on;
        self
    }

    /// Set the CHECK_DATA flag, which adds a byte to every metadata block header
    pub fn check_data(mut self, on: bool) -> Self {
        self.check_data = on;
        self
    }

    /// Prepend this many filler bytes in front of the image
    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    pub fn build(&self, root: &Item) -> Vec<u8> {
        let mut w = Writer {
            opts: self,
            data: Vec::new(),
            frag_buf: Vec::new(),
            frag_entries: Vec::new(),
            inodes: MetaWriter::new(self),
            dirs: MetaWriter::new(self),
            xattr_kv: MetaWriter::new(self),
            xattr_ids: Vec::new(),
            ids: Vec::new(),
            inode_count: 1,
        };
        let root_ref = w.write_item(root, 1, 0);
        w.flush_fragment();
        w.finish(root_ref)
    }
}

/// Accumulates a logical metadata stream and cuts it into 8 KiB blocks as it fills
struct MetaWriter {
    codec: Codec,
    check_data: bool,
    out: Vec<u8>,
    pending: Vec<u8>,
    block_starts: Vec<u64>,
}

impl MetaWriter {
    fn new(opts: &ImageBuilder) -> Self {
        Self {
            codec: opts.codec,
            check_data: opts.check_data,
            out: Vec::new(),
            pending: Vec::new(),
            block_starts: Vec::new(),
        }
    }

    /// Block start (relative to the table) and offset where the next byte will land
    fn position(&self) -> (u64, u16) {
        (self.out.len() as u64, self.pending.len() as u16)
    }

    fn reference(&self) -> u64 {
        let (block, offset) = self.position();
        (block << 16) | u64::from(offset)
    }

    fn write(&mut self, bytes: &[u8]) {
        self.pending.extend_from_slice(bytes);
        while self.pending.len() >= METADATA_BLOCK_SIZE {
            let rest = self.pending.split_off(METADATA_BLOCK_SIZE);
            let block = std::mem::replace(&mut self.pending, rest);
            self.flush_block(&block);
        }
    }

    fn flush_block(&mut self, block: &[u8]) {
        self.block_starts.push(self.out.len() as u64);
        let (header, payload) = match self.codec.compress(block) {
            Some(packed) => (packed.len() as u16, packed),
            None => (block.len() as u16 | 0x8000, block.to_vec()),
        };
        self.out.extend_from_slice(&header.to_le_bytes());
        if self.check_data {
            self.out.push(0xff);
        }
        self.out.extend_from_slice(&payload);
    }

    fn finish(mut self) -> (Vec<u8>, Vec<u64>) {
        if !self.pending.is_empty() {
            let block = std::mem::take(&mut self.pending);
            self.flush_block(&block);
        }
        (self.out, self.block_starts)
    }
}

struct Writer<'a> {
    opts: &'a ImageBuilder,
    data: Vec<u8>,
    frag_buf: Vec<u8>,
    frag_entries: Vec<(u64, u32)>,
    inodes: MetaWriter,
    dirs: MetaWriter,
    xattr_kv: MetaWriter,
    xattr_ids: Vec<(u64, u32, u32)>,
    ids: Vec<u32>,
    inode_count: u32,
}

struct ListingEntry {
    name: String,
    inode_ref: u64,
    number: u32,
    inode_type: u16,
}

impl<'a> Writer<'a> {
    fn data_pos(&self) -> u64 {
        (SUPERBLOCK_SIZE + self.data.len()) as u64
    }

    fn id_index(&mut self, id: u32) -> u16 {
        match self.ids.iter().position(|i| *i == id) {
            Some(p) => p as u16,
            None => {
                self.ids.push(id);
                (self.ids.len() - 1) as u16
            },
        }
    }

    /// Compress and append one data or fragment block, returning its size word
    fn push_block(&mut self, block: &[u8]) -> u32 {
        match self.opts.codec.compress(block) {
            Some(packed) => {
                self.data.extend_from_slice(&packed);
                packed.len() as u32
            },
            None => {
                self.data.extend_from_slice(block);
                block.len() as u32 | 1 << 24
            },
        }
    }

    fn flush_fragment(&mut self) {
        if self.frag_buf.is_empty() {
            return;
        }
        let start = self.data_pos();
        let block = std::mem::take(&mut self.frag_buf);
        let word = self.push_block(&block);
        self.frag_entries.push((start, word));
    }

    fn write_xattrs(&mut self, xattrs: &[(String, Vec<u8>)]) -> u32 {
        if xattrs.is_empty() {
            return NO_XATTRS;
        }
        let reference = self.xattr_kv.reference();
        let mut size = 0;
        for (name, value) in xattrs {
            let (prefix, rest) = if let Some(rest) = name.strip_prefix("user.") {
                (0u16, rest)
            } else if let Some(rest) = name.strip_prefix("trusted.") {
                (1u16, rest)
            } else if let Some(rest) = name.strip_prefix("security.") {
                (2u16, rest)
            } else {
                panic!("unsupported xattr namespace in {}", name);
            };
            let mut entry = Vec::new();
            entry.extend_from_slice(&prefix.to_le_bytes());
            entry.extend_from_slice(&(rest.len() as u16).to_le_bytes());
            entry.extend_from_slice(rest.as_bytes());
            entry.extend_from_slice(&(value.len() as u32).to_le_bytes());
            entry.extend_from_slice(value);
            size += entry.len() as u32;
            self.xattr_kv.write(&entry);
        }
        self.xattr_ids.push((reference, xattrs.len() as u32, size));
        (self.xattr_ids.len() - 1) as u32
    }

    fn inode_header(&mut self, item: &Item, inode_type: u16, number: u32) -> Vec<u8> {
        let uid = self.id_index(item.uid);
        let gid = self.id_index(item.gid);
        let mut b = Vec::new();
        b.extend_from_slice(&inode_type.to_le_bytes());
        b.extend_from_slice(&item.mode.to_le_bytes());
        b.extend_from_slice(&uid.to_le_bytes());
        b.extend_from_slice(&gid.to_le_bytes());
        b.extend_from_slice(&item.mtime.to_le_bytes());
        b.extend_from_slice(&number.to_le_bytes());
        b
    }

    /// Write `item` (and for directories everything below it) and return its inode reference
    fn write_item(&mut self, item: &Item, number: u32, parent: u32) -> u64 {
        let xattr = self.write_xattrs(&item.xattrs);
        let extended = self.opts.extended || xattr != NO_XATTRS;
        let ext = |basic: u16| if extended { basic + 7 } else { basic };

        let inode = match &item.kind {
            Kind::Dir(children) => {
                let mut entries = Vec::new();
                for child in children {
                    self.inode_count += 1;
                    let n = self.inode_count;
                    let inode_ref = self.write_item(child, n, number);
                    entries.push(ListingEntry {
                        name: child.name.clone(),
                        inode_ref,
                        number: n,
                        inode_type: child.basic_type(),
                    });
                }
                let (start_block, offset) = self.dirs.position();
                let listing = encode_listing(&entries);
                self.dirs.write(&listing);
                let file_size = listing.len() as u32 + 3;
                let nlink = 2 + children.iter().filter(|c| matches!(c.kind, Kind::Dir(_))).count() as u32;

                let mut b = self.inode_header(item, ext(1), number);
                if extended || file_size > 0xFFFF {
                    b[0..2].copy_from_slice(&8u16.to_le_bytes());
                    b.extend_from_slice(&nlink.to_le_bytes());
                    b.extend_from_slice(&file_size.to_le_bytes());
                    b.extend_from_slice(&(start_block as u32).to_le_bytes());
                    b.extend_from_slice(&parent.to_le_bytes());
                    b.extend_from_slice(&0u16.to_le_bytes());
                    b.extend_from_slice(&offset.to_le_bytes());
                    b.extend_from_slice(&xattr.to_le_bytes());
                } else {
                    b.extend_from_slice(&(start_block as u32).to_le_bytes());
                    b.extend_from_slice(&nlink.to_le_bytes());
                    b.extend_from_slice(&(file_size as u16).to_le_bytes());
                    b.extend_from_slice(&offset.to_le_bytes());
                    b.extend_from_slice(&parent.to_le_bytes());
                }
                b
            },
            Kind::File(data) => {
                let (start, words, sparse, fragment, frag_offset) = self.write_file(data);
                let size = data.len() as u64;
                let mut b;
                if extended || start > u64::from(u32::MAX) || size > u64::from(u32::MAX) {
                    b = self.inode_header(item, 9, number);
                    b.extend_from_slice(&start.to_le_bytes());
                    b.extend_from_slice(&size.to_le_bytes());
                    b.extend_from_slice(&sparse.to_le_bytes());
                    b.extend_from_slice(&1u32.to_le_bytes());
                    b.extend_from_slice(&fragment.to_le_bytes());
                    b.extend_from_slice(&frag_offset.to_le_bytes());
                    b.extend_from_slice(&xattr.to_le_bytes());
                } else {
                    b = self.inode_header(item, 2, number);
                    b.extend_from_slice(&(start as u32).to_le_bytes());
                    b.extend_from_slice(&fragment.to_le_bytes());
                    b.extend_from_slice(&frag_offset.to_le_bytes());
                    b.extend_from_slice(&(size as u32).to_le_bytes());
                }
                for w in words {
                    b.extend_from_slice(&w.to_le_bytes());
                }
                b
            },
            Kind::Symlink(target) => {
                let mut b = self.inode_header(item, ext(3), number);
                b.extend_from_slice(&1u32.to_le_bytes());
                b.extend_from_slice(&(target.len() as u32).to_le_bytes());
                b.extend_from_slice(target.as_bytes());
                if extended {
                    b.extend_from_slice(&xattr.to_le_bytes());
                }
                b
            },
            Kind::BlockDev(major, minor) | Kind::CharDev(major, minor) => {
                let rdev = (minor & 0xFF) | (major << 8) | ((minor & !0xFF) << 12);
                let mut b = self.inode_header(item, ext(item.basic_type()), number);
                b.extend_from_slice(&1u32.to_le_bytes());
                b.extend_from_slice(&rdev.to_le_bytes());
                if extended {
                    b.extend_from_slice(&xattr.to_le_bytes());
                }
                b
            },
            Kind::Fifo | Kind::Socket => {
                let mut b = self.inode_header(item, ext(item.basic_type()), number);
                b.extend_from_slice(&1u32.to_le_bytes());
                if extended {
                    b.extend_from_slice(&xattr.to_le_bytes());
                }
                b
            },
        };

        let reference = self.inodes.reference();
        self.inodes.write(&inode);
        reference
    }

    /// Returns (start, block size words, sparse bytes, fragment index, fragment offset)
    fn write_file(&mut self, data: &[u8]) -> (u64, Vec<u32>, u64, u32, u32) {
        let bs = self.opts.block_size as usize;
        let start = self.data_pos();
        let has_tail = data.len() % bs != 0;
        let use_fragment = self.opts.fragments && has_tail;
        let full = if use_fragment { data.len() / bs } else { data.len().div_ceil(bs) };

        let mut words = Vec::new();
        let mut sparse = 0u64;
        for chunk in data.chunks(bs).take(full) {
            if self.opts.sparse && chunk.iter().all(|b| *b == 0) {
                words.push(0);
                sparse += chunk.len() as u64;
            } else {
                let w = self.push_block(chunk);
                words.push(w);
            }
        }

        let (fragment, frag_offset) = if use_fragment {
            let tail = &data[full * bs..];
            if self.frag_buf.len() + tail.len() > bs {
                self.flush_fragment();
            }
            let at = (self.frag_entries.len() as u32, self.frag_buf.len() as u32);
            self.frag_buf.extend_from_slice(tail);
            at
        } else {
            (NO_FRAGMENT, 0)
        };
        (start, words, sparse, fragment, frag_offset)
    }

    fn finish(mut self, root_ref: u64) -> Vec<u8> {
        let opts = self.opts;
        let mut image = vec![0u8; SUPERBLOCK_SIZE];
        image.append(&mut self.data);

        let inode_table = image.len() as u64;
        let (bytes, _) = self.inodes.finish();
        image.extend_from_slice(&bytes);

        let dir_table = image.len() as u64;
        let (bytes, _) = self.dirs.finish();
        image.extend_from_slice(&bytes);

        let frag_table = if self.frag_entries.is_empty() {
            INVALID_TABLE
        } else {
            let mut mw = MetaWriter::new(opts);
            for (start, word) in &self.frag_entries {
                mw.write(&start.to_le_bytes());
                mw.write(&word.to_le_bytes());
                mw.write(&0u32.to_le_bytes());
            }
            write_indexed(&mut image, mw)
        };

        let mut mw = MetaWriter::new(opts);
        for id in &self.ids {
            mw.write(&id.to_le_bytes());
        }
        let id_table = write_indexed(&mut image, mw);

        let xattr_table = if self.xattr_ids.is_empty() {
            INVALID_TABLE
        } else {
            let kv_start = image.len() as u64;
            let (bytes, _) = self.xattr_kv.finish();
            image.extend_from_slice(&bytes);

            let mut mw = MetaWriter::new(opts);
            for (reference, count, size) in &self.xattr_ids {
                mw.write(&reference.to_le_bytes());
                mw.write(&count.to_le_bytes());
                mw.write(&size.to_le_bytes());
            }
            let ids_pos = image.len() as u64;
            let (bytes, starts) = mw.finish();
            image.extend_from_slice(&bytes);

            let table = image.len() as u64;
            image.extend_from_slice(&kv_start.to_le_bytes());
            image.extend_from_slice(&(self.xattr_ids.len() as u32).to_le_bytes());
            image.extend_from_slice(&0u32.to_le_bytes());
            for s in starts {
                image.extend_from_slice(&(ids_pos + s).to_le_bytes());
            }
            table
        };

        let bytes_used = image.len() as u64;
        image.resize(image.len().div_ceil(4096) * 4096, 0);

        let mut sb = Vec::with_capacity(SUPERBLOCK_SIZE);
        sb.extend_from_slice(&0x73717368u32.to_le_bytes());
        sb.extend_from_slice(&self.inode_count.to_le_bytes());
        sb.extend_from_slice(&1_700_000_000u32.to_le_bytes());
        sb.extend_from_slice(&opts.block_size.to_le_bytes());
        sb.extend_from_slice(&(self.frag_entries.len() as u32).to_le_bytes());
        sb.extend_from_slice(&opts.codec.id().to_le_bytes());
        sb.extend_from_slice(&(opts.block_size.trailing_zeros() as u16).to_le_bytes());
        let flags: u16 = if opts.check_data { 0x0004 } else { 0 };
        sb.extend_from_slice(&flags.to_le_bytes());
        sb.extend_from_slice(&(self.ids.len() as u16).to_le_bytes());
        sb.extend_from_slice(&4u16.to_le_bytes());
        sb.extend_from_slice(&0u16.to_le_bytes());
        sb.extend_from_slice(&root_ref.to_le_bytes());
        for v in [bytes_used, id_table, xattr_table, inode_table, dir_table, frag_table, INVALID_TABLE] {
            sb.extend_from_slice(&v.to_le_bytes());
        }
        image[..SUPERBLOCK_SIZE].copy_from_slice(&sb);

        if opts.offset > 0 {
            let mut padded = vec![0xA5u8; opts.offset];
            padded.extend_from_slice(&image);
            image = padded;
        }
        image
    }
}

/// Append a table's metadata blocks followed by the index of their absolute positions, returning
/// the position of the index
fn write_indexed(image: &mut Vec<u8>, mw: MetaWriter) -> u64 {
    let blocks_pos = image.len() as u64;
    let (bytes, starts) = mw.finish();
    image.extend_from_slice(&bytes);
    let index = image.len() as u64;
    for s in starts {
        image.extend_from_slice(&(blocks_pos + s).to_le_bytes());
    }
    index
}

fn encode_listing(entries: &[ListingEntry]) -> Vec<u8> {
    let mut out = Vec::new();
    let mut i = 0;
    while i < entries.len() {
        let base = &entries[i];
        let block = base.inode_ref >> 16;
        let run: Vec<&ListingEntry> = entries[i..].iter()
            .take(256)
            .take_while(|e| {
                e.inode_ref >> 16 == block
                    && i16::try_from(i64::from(e.number) - i64::from(base.number)).is_ok()
            })
            .collect();

        out.extend_from_slice(&(run.len() as u32 - 1).to_le_bytes());
        out.extend_from_slice(&(block as u32).to_le_bytes());
        out.extend_from_slice(&base.number.to_le_bytes());
        for e in &run {
            out.extend_from_slice(&((e.inode_ref & 0xFFFF) as u16).to_le_bytes());
            out.extend_from_slice(&((i64::from(e.number) - i64::from(base.number)) as i16).to_le_bytes());
            out.extend_from_slice(&e.inode_type.to_le_bytes());
            out.extend_from_slice(&(e.name.len() as u16 - 1).to_le_bytes());
            out.extend_from_slice(e.name.as_bytes());
        }
        i += run.len();
    }
    out
}

/// A reader over an in-memory image that counts the reads issued against it
#[derive(Debug)]
pub struct CountingReader {
    inner: Cursor<Vec<u8>>,
    reads: Rc<Cell<usize>>,
}

impl CountingReader {
    pub fn new(data: Vec<u8>) -> (Self, Rc<Cell<usize>>) {
        let reads = Rc::new(Cell::new(0));
        (Self { inner: Cursor::new(data), reads: Rc::clone(&reads) }, reads)
    }
}

impl Read for CountingReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.reads.set(self.reads.get() + 1);
        self.inner.read(buf)
    }
}

impl Seek for CountingReader {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.inner.seek(pos)
    }
}
