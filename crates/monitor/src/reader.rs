//! Async file reader with size ceiling and binary detection.
//!
//! All disk reads the monitor performs go through [`read_file`], which
//! opens, stats, and reads without blocking the runtime. The processor
//! depends on `NotFound` being distinct from other I/O errors to infer
//! deletions.

use std::{io, path::Path};

/// Window scanned for NUL bytes when classifying content as binary.
const BINARY_SNIFF_BYTES: usize = 8 * 1024;

/// A successful read: content plus the stat identity of the file.
#[derive(Debug, Clone)]
pub struct FileRead {
  pub content: String,
  pub device: u64,
  pub inode: u64,
  pub size: u64,
}

/// Errors from [`read_file`].
///
/// Everything except `NotFound` is absorbed by callers into error counters;
/// `NotFound` drives deletion inference.
#[derive(Debug, thiserror::Error)]
pub enum ReadError {
  #[error("File not found")]
  NotFound,

  #[error("File size {size} exceeds ceiling {limit}")]
  TooLarge { size: u64, limit: u64 },

  #[error("Binary content")]
  Binary,

  #[error("I/O error: {0}")]
  Io(#[source] io::Error),
}

impl From<io::Error> for ReadError {
  fn from(e: io::Error) -> Self {
    if e.kind() == io::ErrorKind::NotFound {
      ReadError::NotFound
    } else {
      ReadError::Io(e)
    }
  }
}

/// Read a file's content and stat identity.
///
/// Rejects files whose stat-reported size exceeds `max_size` before reading
/// a byte, and rejects content with a NUL in the first 8 KiB (or that is
/// not valid UTF-8) as binary. Symlinks are read through: the content and
/// `(device, inode)` are those of the target.
pub async fn read_file(path: &Path, max_size: u64) -> Result<FileRead, ReadError> {
  let metadata = tokio::fs::metadata(path).await?;

  if !metadata.is_file() {
    return Err(ReadError::Io(io::Error::new(
      io::ErrorKind::InvalidInput,
      "not a regular file",
    )));
  }

  let size = metadata.len();
  if size > max_size {
    return Err(ReadError::TooLarge { size, limit: max_size });
  }

  let (device, inode) = device_inode(&metadata);

  let bytes = tokio::fs::read(path).await?;

  let window = bytes.len().min(BINARY_SNIFF_BYTES);
  if bytes[..window].contains(&0) {
    return Err(ReadError::Binary);
  }

  let content = String::from_utf8(bytes).map_err(|_| ReadError::Binary)?;

  Ok(FileRead {
    content,
    device,
    inode,
    size,
  })
}

#[cfg(unix)]
fn device_inode(metadata: &std::fs::Metadata) -> (u64, u64) {
  use std::os::unix::fs::MetadataExt;
  (metadata.dev(), metadata.ino())
}

#[cfg(not(unix))]
fn device_inode(_metadata: &std::fs::Metadata) -> (u64, u64) {
  // Rename inference falls back to content fingerprints here.
  (0, 0)
}
