use std::fmt::Debug;

#[cfg(feature = "flate2")]
use std::io::Read;

#[cfg(feature = "flate2")]
use flate2::read::ZlibDecoder;

#[cfg(feature = "ruzstd")]
use ruzstd::decoding::StreamingDecoder;

use crate::error::{Error, Result};
use super::superblock::Compressor;

/// A decompression backend for one of the SquashFS compression ids.
///
/// `expected_size` is the largest amount of data the block may decode to (8 KiB for metadata,
/// the filesystem block size for data and fragment blocks). Backends whose library wants an output
/// buffer up front size it from `expected_size`; the returned vector holds only the bytes actually
/// produced.
pub(crate) trait Decompress: Debug {
    fn name(&self) -> &'static str;

    fn decompress(&self, data: &[u8], compressed_size: usize, expected_size: usize) -> Result<Vec<u8>>;
}

/// Choose the backend for a compression id. Ids for codecs that were compiled out are reported
/// the same way as ids that SquashFS does not define at all.
pub(crate) fn backend(c: Compressor) -> Result<Box<dyn Decompress>> {
    Ok(match c {
        Compressor::None => Box::new(Store),
        #[cfg(feature = "flate2")]
        Compressor::Gzip => Box::new(Zlib),
        #[cfg(feature = "lzma-rs")]
        Compressor::Lzma => Box::new(Lzma),
        #[cfg(feature = "rust-lzo")]
        Compressor::Lzo => Box::new(Lzo),
        #[cfg(feature = "lzma-rs")]
        Compressor::Xz => Box::new(Xz),
        #[cfg(feature = "lz4_flex")]
        Compressor::Lz4 => Box::new(Lz4),
        #[cfg(feature = "ruzstd")]
        Compressor::Zstd => Box::new(Zstd),
        #[allow(unreachable_patterns)]
        _ => return Err(Error::UnsupportedCompression(c.into())),
    })
}

fn check_input(codec: &'static str, data: &[u8], compressed_size: usize) -> Result<()> {
    if data.len() != compressed_size {
        return Err(Error::Decompress {
            codec,
            reason: format!("have {} bytes of input, block header says {}", data.len(), compressed_size),
        });
    }
    Ok(())
}

fn decode_error(codec: &'static str, e: impl std::fmt::Display) -> Error {
    Error::Decompress { codec, reason: e.to_string() }
}

#[derive(Debug)]
struct Store;

impl Decompress for Store {
    fn name(&self) -> &'static str { "none" }

    fn decompress(&self, data: &[u8], compressed_size: usize, _expected_size: usize) -> Result<Vec<u8>> {
        check_input(self.name(), data, compressed_size)?;
        Ok(data.to_vec())
    }
}

#[cfg(feature = "flate2")]
#[derive(Debug)]
struct Zlib;

#[cfg(feature = "flate2")]
impl Decompress for Zlib {
    fn name(&self) -> &'static str { "gzip" }

    fn decompress(&self, data: &[u8], compressed_size: usize, expected_size: usize) -> Result<Vec<u8>> {
        check_input(self.name(), data, compressed_size)?;
        let mut out = Vec::with_capacity(expected_size);
        ZlibDecoder::new(data).read_to_end(&mut out)
            .map_err(|e| decode_error(self.name(), e))?;
        Ok(out)
    }
}

#[cfg(feature = "lzma-rs")]
#[derive(Debug)]
struct Lzma;

#[cfg(feature = "lzma-rs")]
impl Decompress for Lzma {
    fn name(&self) -> &'static str { "lzma" }

    fn decompress(&self, data: &[u8], compressed_size: usize, expected_size: usize) -> Result<Vec<u8>> {
        check_input(self.name(), data, compressed_size)?;
        let mut out = Vec::with_capacity(expected_size);
        lzma_rs::lzma_decompress(&mut &data[..], &mut out)
            .map_err(|e| decode_error(self.name(), e))?;
        Ok(out)
    }
}

#[cfg(feature = "lzma-rs")]
#[derive(Debug)]
struct Xz;

#[cfg(feature = "lzma-rs")]
impl Decompress for Xz {
    fn name(&self) -> &'static str { "xz" }

    fn decompress(&self, data: &[u8], compressed_size: usize, expected_size: usize) -> Result<Vec<u8>> {
        check_input(self.name(), data, compressed_size)?;
        // The xz decoder has no incremental interface, so the whole block goes into one buffer
        let mut out = Vec::with_capacity(expected_size);
        lzma_rs::xz_decompress(&mut &data[..], &mut out)
            .map_err(|e| decode_error(self.name(), e))?;
        Ok(out)
    }
}

#[cfg(feature = "rust-lzo")]
#[derive(Debug)]
struct Lzo;

#[cfg(feature = "rust-lzo")]
impl Decompress for Lzo {
    fn name(&self) -> &'static str { "lzo" }

    fn decompress(&self, data: &[u8], compressed_size: usize, expected_size: usize) -> Result<Vec<u8>> {
        check_input(self.name(), data, compressed_size)?;
        let mut out = vec![0u8; expected_size];
        let (decoded, err) = rust_lzo::LZOContext::decompress_to_slice(data, &mut out);
        let len = decoded.len();
        if !matches!(err, rust_lzo::LZOError::OK) {
            return Err(Error::Decompress { codec: self.name(), reason: "corrupt input or output overrun".to_string() });
        }
        out.truncate(len);
        Ok(out)
    }
}

#[cfg(feature = "lz4_flex")]
#[derive(Debug)]
struct Lz4;

#[cfg(feature = "lz4_flex")]
impl Decompress for Lz4 {
    fn name(&self) -> &'static str { "lz4" }

    fn decompress(&self, data: &[u8], compressed_size: usize, expected_size: usize) -> Result<Vec<u8>> {
        check_input(self.name(), data, compressed_size)?;
        let mut out = vec![0u8; expected_size];
        let len = lz4_flex::block::decompress_into(data, &mut out)
            .map_err(|e| decode_error(self.name(), e))?;
        out.truncate(len);
        Ok(out)
    }
}

#[cfg(feature = "ruzstd")]
#[derive(Debug)]
struct Zstd;

#[cfg(feature = "ruzstd")]
impl Decompress for Zstd {
    fn name(&self) -> &'static str { "zstd" }

    /// The destination is exactly `expected_size` bytes. A frame that decodes to more than that is
    /// an error rather than being silently cut off.
    fn decompress(&self, data: &[u8], compressed_size: usize, expected_size: usize) -> Result<Vec<u8>> {
        use std::io::Read;

        check_input(self.name(), data, compressed_size)?;
        let mut decoder = StreamingDecoder::new(data)
            .map_err(|e| decode_error(self.name(), e))?;

        let mut out = vec![0u8; expected_size];
        let mut filled = 0;
        while filled < out.len() {
            let n = decoder.read(&mut out[filled..])
                .map_err(|e| decode_error(self.name(), e))?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        if filled == out.len() {
            let mut trailing = [0u8; 1];
            let extra = decoder.read(&mut trailing)
                .map_err(|e| decode_error(self.name(), e))?;
            if extra != 0 {
                return Err(Error::Decompress {
                    codec: self.name(),
                    reason: format!("frame decodes to more than {} bytes", expected_size),
                });
            }
        }
        out.truncate(filled);
        Ok(out)
    }
}
