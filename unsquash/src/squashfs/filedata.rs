use std::io::{self, Read, Seek};

use log::warn;

use crate::error::{Error, Result};
use super::inode::FileInode;
use super::source::image_offset;
use super::squashfs::SquashFS;

/// Block list entries with this value are not real blocks and are passed over
const SKIPPED_BLOCK: u32 = 0xFFFFFFFF;

/// Lazy sequence of the chunks that make up a regular file: one per data block followed by the
/// fragment tail, if the file has one.
///
/// Sparse blocks become runs of zeros without touching the image. Data blocks are read at a
/// running position that starts at the inode's `start_block` and advances by each block's
/// on-disk size. Once exhausted, the total produced is compared with the inode's file size; a
/// difference is logged, or returned as [`Error::SizeMismatch`] when the image was opened with
/// strict size checking.
pub struct FileChunks<'a, R> {
    fs: &'a SquashFS<R>,
    file: &'a FileInode,
    index: usize,
    pos: u64,
    produced: u64,
    fragment_done: bool,
    done: bool,
}

impl<'a, R> FileChunks<'a, R>
where R: Read + Seek
{
    pub(crate) fn new(fs: &'a SquashFS<R>, file: &'a FileInode) -> Self {
        Self {
            fs,
            file,
            index: 0,
            pos: file.start_block,
            produced: 0,
            fragment_done: false,
            done: false,
        }
    }

    fn next_block(&mut self) -> Option<Result<Vec<u8>>> {
        let block_size = u64::from(self.fs.blocks().block_size());
        while let Some(word) = self.file.block_sizes.get(self.index).copied() {
            let i = self.index as u64;
            self.index += 1;

            if word.raw() == SKIPPED_BLOCK {
                warn!("skipping block size word {} of file at {:#x}", i, self.file.start_block);
                continue;
            }
            if word.is_sparse() {
                let len = if i == self.file.file_size / block_size {
                    self.file.file_size % block_size
                } else {
                    block_size
                };
                return Some(Ok(vec![0u8; len as usize]));
            }

            let next = match image_offset(self.pos, u64::from(word.len())) {
                Ok(next) => next,
                Err(e) => return Some(Err(e.into())),
            };
            let block = self.fs.blocks().read_data_block(self.pos, word);
            self.pos = next;
            return Some(block);
        }
        None
    }

    fn fragment(&mut self) -> Option<Result<Vec<u8>>> {
        // A whole number of blocks leaves no tail even if a fragment index is set
        if self.fragment_done || !self.file.has_fragment() || self.file.frag_bytes == 0 {
            return None;
        }
        self.fragment_done = true;
        let block = match self.fs.fragments().block(self.fs.blocks(), self.file.fragment) {
            Ok(b) => b,
            Err(e) => return Some(Err(e)),
        };
        let start = (self.file.fragment_offset as usize).min(block.len());
        let end = start.saturating_add(self.file.frag_bytes as usize).min(block.len());
        Some(Ok(block[start..end].to_vec()))
    }

    fn check_size(&self) -> Result<()> {
        if self.produced != self.file.file_size {
            if self.fs.strict_sizes() {
                return Err(Error::SizeMismatch { expected: self.file.file_size, actual: self.produced });
            }
            warn!("file at {:#x} decoded to {} bytes, inode says {}",
                self.file.start_block, self.produced, self.file.file_size);
        }
        Ok(())
    }
}

impl<'a, R> Iterator for FileChunks<'a, R>
where R: Read + Seek
{
    type Item = Result<Vec<u8>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let chunk = match self.next_block().or_else(|| self.fragment()) {
            Some(c) => c,
            None => {
                self.done = true;
                return self.check_size().err().map(Err);
            },
        };
        match &chunk {
            Ok(data) => self.produced += data.len() as u64,
            Err(_) => self.done = true,
        }
        Some(chunk)
    }
}

/// [`io::Read`] over the contents of a regular file. Decoding errors surface as
/// [`io::ErrorKind::InvalidData`].
pub struct FileReader<'a, R> {
    chunks: FileChunks<'a, R>,
    buf: Vec<u8>,
    pos: usize,
}

impl<'a, R> FileReader<'a, R>
where R: Read + Seek
{
    pub(crate) fn new(chunks: FileChunks<'a, R>) -> Self {
        Self { chunks, buf: Vec::new(), pos: 0 }
    }
}

impl<'a, R> Read for FileReader<'a, R>
where R: Read + Seek
{
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        while self.pos >= self.buf.len() {
            match self.chunks.next() {
                Some(chunk) => {
                    self.buf = chunk?;
                    self.pos = 0;
                },
                None => return Ok(0),
            }
        }
        let n = (&self.buf[self.pos..]).read(out)?;
        self.pos += n;
        Ok(n)
    }
}
