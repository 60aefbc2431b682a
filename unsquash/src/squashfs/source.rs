use std::io::{self, Read, Seek, SeekFrom};

use log::trace;

/// Seek+read access to the bytes of an image that may be embedded at a non-zero offset within a
/// larger container (for example one partition of a disk image). All positions passed in are
/// relative to the start of the image.
///
/// The last known position of the inner reader is remembered so that back-to-back reads of
/// consecutive ranges (the common case for file data blocks) do not issue a seek each time.
/// `pos + delta` for positions taken from the image itself; a sum past `u64::MAX` can only come
/// from a corrupt table pointer
pub(crate) fn image_offset(pos: u64, delta: u64) -> io::Result<u64> {
    pos.checked_add(delta).ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData,
        format!("image offset {:#x} + {:#x} overflows", pos, delta)))
}

#[derive(Debug)]
pub(crate) struct ImageSource<R> {
    inner: R,
    base: u64,
    pos: Option<u64>,
}

impl<R> ImageSource<R>
where R: Read + Seek
{
    pub fn new(inner: R, base: u64) -> Self {
        Self { inner, base, pos: None }
    }

    fn position_at(&mut self, pos: u64) -> io::Result<()> {
        if self.pos != Some(pos) {
            let target = self.base.checked_add(pos)
                .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "image offset overflows"))?;
            self.pos = None;
            self.inner.seek(SeekFrom::Start(target))?;
            self.pos = Some(pos);
        }
        Ok(())
    }

    /// Fill `buf` from image position `pos`
    pub fn read_at(&mut self, pos: u64, buf: &mut [u8]) -> io::Result<()> {
        trace!("read {} bytes at {:#x}", buf.len(), pos);
        self.position_at(pos)?;
        match self.inner.read_exact(buf) {
            Ok(()) => {
                self.pos = Some(pos + buf.len() as u64);
                Ok(())
            },
            Err(e) => {
                self.pos = None;
                Err(e)
            },
        }
    }

    pub fn read_vec_at(&mut self, pos: u64, len: usize) -> io::Result<Vec<u8>> {
        let mut buf = vec![0u8; len];
        self.read_at(pos, &mut buf)?;
        Ok(buf)
    }

    pub fn into_inner(self) -> R {
        self.inner
    }
}
