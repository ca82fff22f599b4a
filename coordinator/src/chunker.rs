use sha2::{Digest, Sha256};
use std::path::Path;
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::{debug, info};

use crate::error::{Error, Result};

pub const BYTES_PER_MB: usize = 1024 * 1024;

/// Validated, positive chunk window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkSize(usize);

impl ChunkSize {
    pub fn from_mb(mb: u32) -> Result<Self> {
        if mb == 0 {
            return Err(Error::Configuration(
                "chunk size must be a positive number of MB".to_string(),
            ));
        }
        Self::from_bytes((mb as usize).saturating_mul(BYTES_PER_MB))
    }

    pub fn from_bytes(bytes: usize) -> Result<Self> {
        if bytes == 0 {
            return Err(Error::Configuration(
                "chunk size must be positive".to_string(),
            ));
        }
        Ok(Self(bytes))
    }

    pub fn bytes(self) -> usize {
        self.0
    }
}

/// A contiguous byte range of a file with a stable identifier
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    id: String,
    index: usize,
    data: Vec<u8>,
    checksum: String,
}

impl Chunk {
    pub fn new(file_name: &str, index: usize, data: Vec<u8>) -> Self {
        Self {
            id: chunk_id(file_name, index),
            index,
            checksum: checksum(&data),
            data,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn size(&self) -> u64 {
        self.data.len() as u64
    }

    /// Hex SHA-256 of the chunk bytes
    pub fn checksum(&self) -> &str {
        &self.checksum
    }

    pub fn into_data(self) -> Vec<u8> {
        self.data
    }
}

/// Identifier of the `index`-th chunk of `file_name`
pub fn chunk_id(file_name: &str, index: usize) -> String {
    format!("{}-chunk-{}", file_name, index)
}

pub fn checksum(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Final path component of `name`, which is what chunk ids are derived from
pub fn base_name(name: &str) -> String {
    Path::new(name)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(name)
        .to_string()
}

/// Splits byte streams into fixed-size chunks
#[derive(Debug, Clone, Default)]
pub struct Chunker;

impl Chunker {
    pub fn new() -> Self {
        Self
    }

    /// Read `source` to the end in `chunk_size` windows.
    ///
    /// Every chunk but the last is exactly `chunk_size` bytes. An empty source
    /// yields no chunks.
    pub async fn decompose<R>(
        &self,
        file_name: &str,
        mut source: R,
        chunk_size: ChunkSize,
    ) -> Result<Vec<Chunk>>
    where
        R: AsyncRead + Unpin,
    {
        let name = base_name(file_name);
        if name.trim().is_empty() {
            return Err(Error::Configuration("file name is required".to_string()));
        }

        let window = chunk_size.bytes();
        let mut chunks = Vec::new();

        loop {
            let mut data = Vec::new();
            let read = (&mut source)
                .take(window as u64)
                .read_to_end(&mut data)
                .await?;

            if read == 0 {
                break;
            }

            debug!("Read chunk {} of {} ({} bytes)", chunks.len(), name, read);
            chunks.push(Chunk::new(&name, chunks.len(), data));

            if read < window {
                break;
            }
        }

        info!(
            "Decomposed {} into {} chunk(s) of up to {} bytes",
            name,
            chunks.len(),
            window
        );

        Ok(chunks)
    }

    pub async fn decompose_path(&self, path: &Path, chunk_size: ChunkSize) -> Result<Vec<Chunk>> {
        let file = tokio::fs::File::open(path).await?;
        self.decompose(&path.to_string_lossy(), file, chunk_size).await
    }
}
