//! Streams materialized to a local scratch file.
//!
//! Snapshot blobs can be far larger than memory, so they are spooled to disk
//! and hashed on the way in. The resulting file can be reopened any number of
//! times for synchronous or async reads.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;
use tempfile::NamedTempFile;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};

use crate::error::Result;
use crate::types::BlobId;

const COPY_BUFFER_SIZE: usize = 64 * 1024;

/// A payload spooled to a scratch file, with its length and content address.
#[derive(Debug)]
pub struct BufferedPayload {
    file: NamedTempFile,
    len: u64,
    blob_id: BlobId,
}

impl BufferedPayload {
    /// Drain `reader` into a scratch file in `scratch_dir` (or the OS temp dir).
    pub async fn from_reader<R>(mut reader: R, scratch_dir: Option<&Path>) -> Result<Self>
    where
        R: AsyncRead + Unpin,
    {
        let file = scratch_file(scratch_dir)?;
        let mut writer = tokio::fs::File::from_std(file.reopen()?);
        let mut hasher = blake3::Hasher::new();
        let mut buf = vec![0u8; COPY_BUFFER_SIZE];
        let mut len = 0u64;

        loop {
            let n = reader.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
            writer.write_all(&buf[..n]).await?;
            len += n as u64;
        }
        writer.flush().await?;
        writer.sync_all().await?;

        Ok(Self {
            file,
            len,
            blob_id: BlobId::from_hasher(&hasher),
        })
    }

    /// Adopt a scratch file that was written synchronously; hashes its content.
    pub fn from_file(mut file: NamedTempFile) -> Result<Self> {
        let handle = file.as_file_mut();
        handle.sync_all()?;
        handle.seek(SeekFrom::Start(0))?;

        let mut hasher = blake3::Hasher::new();
        let mut buf = vec![0u8; COPY_BUFFER_SIZE];
        let mut len = 0u64;
        loop {
            let n = handle.read(&mut buf)?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
            len += n as u64;
        }

        Ok(Self {
            file,
            len,
            blob_id: BlobId::from_hasher(&hasher),
        })
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Content address of the payload.
    pub fn blob_id(&self) -> BlobId {
        self.blob_id
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }

    /// Independent synchronous handle positioned at the start.
    pub fn open(&self) -> Result<File> {
        Ok(self.file.reopen()?)
    }
}

/// New scratch file, removed when dropped.
pub fn scratch_file(scratch_dir: Option<&Path>) -> Result<NamedTempFile> {
    let mut builder = tempfile::Builder::new();
    builder.prefix("replog-");
    let file = match scratch_dir {
        Some(dir) => builder.tempfile_in(dir)?,
        None => builder.tempfile()?,
    };
    Ok(file)
}
