//! Unsquash is a read-only decoder for SquashFS 4.0 images. An image is opened from a file, any
//! seekable reader or a buffer in memory; its tables and directory tree are decoded up front and
//! file contents are decompressed on demand.
//!
//! ## Feature Flags
//! Each compression backend can be compiled out. All of them are enabled by default.
//! - `gzip`: zlib compression via `flate2`
//! - `xz`: xz and legacy lzma compression via `lzma-rs`
//! - `lzo`: lzo compression via `rust-lzo`
//! - `lz4`: lz4 compression via `lz4_flex`
//! - `zstd`: zstd compression via `ruzstd`
//!
//! Opening an image that uses a disabled backend fails with
//! [`Error::UnsupportedCompression`].
//!
//! ## Usage Example
//! ```no_run
//! use std::io;
//! use unsquash::squashfs::SquashFS;
//!
//! fn print_file_from_squashfs() -> unsquash::Result<()> {
//!     let sqfs = SquashFS::open("rootfs.squashfs")?;
//!
//!     // List the contents of a directory
//!     if let Some(etc) = sqfs.select("/etc") {
//!         for child in etc.children() {
//!             println!("{} {}", child.filemode(), child.name());
//!         }
//!     }
//!
//!     // Copy a file to stdout
//!     if let Some(group) = sqfs.select("/etc/group") {
//!         let mut reader = group.open()?;
//!         io::copy(&mut reader, &mut io::stdout().lock())?;
//!     }
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod squashfs;

pub use error::{Error, Result};
