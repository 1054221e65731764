//! The bounded entropy pool and its on-disk image.
//!
//! The pool is an ordered sequence of fixed-capacity chunks with a hard
//! byte ceiling. Deposits fill the tail chunk and allocate fresh chunks as
//! needed; input past the ceiling is silently dropped and reported through
//! the return value. Persistence is atomic: the full image is streamed to
//! an owner-only temporary sibling, fsynced and renamed over the target,
//! so the target file is never observed partially written.
//!
//! # On-disk format (little-endian)
//!
//! ```text
//! Header (32 B): magic "EGD\0" | version u32 (=1) | max_entropy i64 |
//!                chunk_capacity i32 | chunk_count u32 | created_at i64 (ns)
//! Per chunk:     chunk_id i64 | chunk_size u32 | bytes (chunk_size B)
//! Footer (32 B): total_bytes i64 | checksum u64 (CRC-64-ISO over
//!                header+chunks) | magic "EGD\0" | 12 B reserved
//! ```

use std::fs;
use std::io::Write;
use std::path::Path;

use crc::{Crc, CRC_64_GO_ISO};
use serde::Serialize;

use crate::chunk::PoolChunk;
use crate::clock;
use crate::error::{codes, Component, EgdError};

const MAGIC: &[u8; 4] = b"EGD\0";
const FORMAT_VERSION: u32 = 1;
const HEADER_LEN: usize = 32;
const FOOTER_LEN: usize = 32;

const CRC64: Crc<u64> = Crc::<u64>::new(&CRC_64_GO_ISO);

/// Point-in-time pool statistics, as reported on the control channel.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct PoolStats {
    pub total_bytes: u64,
    pub max_total_bytes: u64,
    pub chunk_count: usize,
    pub is_full: bool,
}

/// Bounded, chunked accumulator of distilled entropy bytes.
#[derive(Debug)]
pub struct EntropyPool {
    chunks: Vec<PoolChunk>,
    total_bytes: u64,
    max_total_bytes: u64,
    chunk_capacity: usize,
    next_chunk_id: i64,
    created_at_ns: i64,
}

impl EntropyPool {
    /// Create an empty pool. Both limits must be positive; the
    /// configuration layer guarantees this for daemon-created pools.
    pub fn new(max_total_bytes: u64, chunk_capacity: usize) -> Self {
        Self {
            chunks: Vec::new(),
            total_bytes: 0,
            max_total_bytes,
            chunk_capacity,
            next_chunk_id: 0,
            created_at_ns: clock::epoch_nanos(),
        }
    }

    pub fn total_bytes(&self) -> u64 {
        self.total_bytes
    }

    pub fn max_total_bytes(&self) -> u64 {
        self.max_total_bytes
    }

    pub fn chunk_capacity(&self) -> usize {
        self.chunk_capacity
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_full(&self) -> bool {
        self.total_bytes >= self.max_total_bytes
    }

    pub fn created_at_ns(&self) -> i64 {
        self.created_at_ns
    }

    /// Chunk ids in insertion order.
    pub fn chunk_ids(&self) -> Vec<i64> {
        self.chunks.iter().map(|c| c.id()).collect()
    }

    /// Byte length of every chunk in insertion order.
    pub fn chunk_lens(&self) -> Vec<usize> {
        self.chunks.iter().map(|c| c.len()).collect()
    }

    /// Append processed bytes, filling the tail chunk and allocating new
    /// chunks with fresh ids as chunks fill. Stops at the pool ceiling and
    /// returns the number of bytes actually added.
    pub fn deposit(&mut self, data: &[u8]) -> usize {
        let room = (self.max_total_bytes - self.total_bytes) as usize;
        let take = data.len().min(room);
        if take == 0 {
            return 0;
        }

        let mut written = 0;
        while written < take {
            let needs_chunk = match self.chunks.last() {
                Some(tail) => tail.is_full(),
                None => true,
            };
            if needs_chunk {
                let chunk = PoolChunk::new(self.next_chunk_id, self.chunk_capacity);
                self.next_chunk_id += 1;
                self.chunks.push(chunk);
            }
            let tail = self
                .chunks
                .last_mut()
                .unwrap_or_else(|| unreachable!("tail chunk allocated above"));
            written += tail.append(&data[written..take]);
        }

        self.total_bytes += take as u64;
        take
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            total_bytes: self.total_bytes,
            max_total_bytes: self.max_total_bytes,
            chunk_count: self.chunks.len(),
            is_full: self.is_full(),
        }
    }

    /// Take an immutable copy of the pool for persistence. The snapshot is
    /// consistent: it observes whole chunks only.
    pub fn snapshot(&self) -> PoolSnapshot {
        PoolSnapshot {
            chunks: self.chunks.clone(),
            total_bytes: self.total_bytes,
            max_total_bytes: self.max_total_bytes,
            chunk_capacity: self.chunk_capacity,
            created_at_ns: self.created_at_ns,
        }
    }

    /// Serialize and atomically write the pool image. Returns the number
    /// of bytes written.
    pub fn persist(&self, path: &Path) -> Result<u64, EgdError> {
        self.snapshot().write_to(path)
    }

    /// Read and verify a persisted image, replacing nothing on failure.
    ///
    /// Verifies both magics, the version, the trailing CRC-64, every
    /// chunk's size bound, and that the recorded total matches the sum of
    /// chunk lengths. Any mismatch yields a typed error.
    pub fn load(path: &Path) -> Result<Self, EgdError> {
        let image = fs::read(path).map_err(|e| {
            EgdError::fatal(
                Component::Storage,
                codes::STORAGE_IO,
                format!("cannot read pool file {}", path.display()),
            )
            .with_cause(e)
        })?;
        Self::from_image(&image)
    }

    fn from_image(image: &[u8]) -> Result<Self, EgdError> {
        if image.len() < HEADER_LEN + FOOTER_LEN {
            return Err(corrupted("image shorter than header and footer"));
        }

        // Header
        if &image[0..4] != MAGIC {
            return Err(corrupted("bad header magic"));
        }
        let version = u32::from_le_bytes(image[4..8].try_into().unwrap());
        if version != FORMAT_VERSION {
            return Err(EgdError::fatal(
                Component::Storage,
                codes::STORAGE_VERSION,
                format!("unsupported pool format version {version}"),
            ));
        }
        let max_entropy = i64::from_le_bytes(image[8..16].try_into().unwrap());
        let chunk_capacity = i32::from_le_bytes(image[16..20].try_into().unwrap());
        let chunk_count = u32::from_le_bytes(image[20..24].try_into().unwrap());
        let created_at_ns = i64::from_le_bytes(image[24..32].try_into().unwrap());

        if max_entropy < 0 || chunk_capacity <= 0 {
            return Err(corrupted("negative size bounds in header"));
        }
        let chunk_capacity = chunk_capacity as usize;

        // Chunk records
        let body_end = image.len() - FOOTER_LEN;
        let mut offset = HEADER_LEN;
        let mut chunks = Vec::with_capacity(chunk_count as usize);
        let mut sum: u64 = 0;
        for _ in 0..chunk_count {
            if offset + 12 > body_end {
                return Err(corrupted("truncated chunk record"));
            }
            let id = i64::from_le_bytes(image[offset..offset + 8].try_into().unwrap());
            let size = u32::from_le_bytes(image[offset + 8..offset + 12].try_into().unwrap()) as usize;
            offset += 12;
            if size > chunk_capacity {
                return Err(corrupted("chunk size exceeds chunk capacity"));
            }
            if offset + size > body_end {
                return Err(corrupted("chunk bytes run past footer"));
            }
            let bytes = image[offset..offset + size].to_vec();
            offset += size;
            sum += size as u64;
            chunks.push(PoolChunk::from_parts(id, bytes, chunk_capacity));
        }
        if offset != body_end {
            return Err(corrupted("trailing bytes between chunks and footer"));
        }

        // Footer
        let footer = &image[body_end..];
        let total_bytes = i64::from_le_bytes(footer[0..8].try_into().unwrap());
        let checksum = u64::from_le_bytes(footer[8..16].try_into().unwrap());
        if &footer[16..20] != MAGIC {
            return Err(corrupted("bad footer magic"));
        }

        let computed = CRC64.checksum(&image[..body_end]);
        if computed != checksum {
            return Err(corrupted("checksum mismatch"));
        }
        if total_bytes < 0 || total_bytes as u64 != sum {
            return Err(corrupted("recorded total does not match chunk sum"));
        }

        let next_chunk_id = chunks.iter().map(|c| c.id() + 1).max().unwrap_or(0);
        Ok(Self {
            chunks,
            total_bytes: sum,
            max_total_bytes: max_entropy as u64,
            chunk_capacity,
            next_chunk_id,
            created_at_ns,
        })
    }
}

fn corrupted(detail: &str) -> EgdError {
    EgdError::fatal(
        Component::Storage,
        codes::STORAGE_CORRUPTED,
        format!("pool file corrupted: {detail}"),
    )
}

/// Immutable copy of the pool taken under the read lock. The serialization
/// and file I/O run on the snapshot so depositors are never blocked by
/// disk latency.
#[derive(Debug, Clone)]
pub struct PoolSnapshot {
    chunks: Vec<PoolChunk>,
    total_bytes: u64,
    max_total_bytes: u64,
    chunk_capacity: usize,
    created_at_ns: i64,
}

impl PoolSnapshot {
    pub fn total_bytes(&self) -> u64 {
        self.total_bytes
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    /// Render the full on-disk image.
    pub fn to_image(&self) -> Vec<u8> {
        let body_len: usize = self.chunks.iter().map(|c| 12 + c.len()).sum();
        let mut image = Vec::with_capacity(HEADER_LEN + body_len + FOOTER_LEN);

        image.extend_from_slice(MAGIC);
        image.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
        image.extend_from_slice(&(self.max_total_bytes as i64).to_le_bytes());
        image.extend_from_slice(&(self.chunk_capacity as i32).to_le_bytes());
        image.extend_from_slice(&(self.chunks.len() as u32).to_le_bytes());
        image.extend_from_slice(&self.created_at_ns.to_le_bytes());

        for chunk in &self.chunks {
            chunk.serialize_into(&mut image);
        }

        let checksum = CRC64.checksum(&image);
        image.extend_from_slice(&(self.total_bytes as i64).to_le_bytes());
        image.extend_from_slice(&checksum.to_le_bytes());
        image.extend_from_slice(MAGIC);
        image.extend_from_slice(&[0u8; 12]);

        image
    }

    /// Atomically write the image to `path`: owner-only temporary sibling,
    /// full stream, fsync, rename. On any error the temporary file is
    /// removed and the target keeps its previous contents.
    pub fn write_to(&self, path: &Path) -> Result<u64, EgdError> {
        let image = self.to_image();
        let dir = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };

        let mut tmp = tempfile::Builder::new()
            .prefix(".egd-pool.")
            .tempfile_in(dir)
            .map_err(|e| storage_io("cannot create temporary pool file", e))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perm = fs::Permissions::from_mode(0o600);
            fs::set_permissions(tmp.path(), perm)
                .map_err(|e| storage_io("cannot restrict pool file permissions", e))?;
        }

        tmp.write_all(&image)
            .map_err(|e| storage_io("short write to temporary pool file", e))?;
        tmp.as_file()
            .sync_all()
            .map_err(|e| storage_io("fsync of temporary pool file failed", e))?;
        tmp.persist(path)
            .map_err(|e| storage_io("rename over pool file failed", e.error))?;

        Ok(image.len() as u64)
    }

    /// Structural equality against a live pool: chunk count, ids and every
    /// chunk's bytes.
    pub fn same_contents(&self, pool: &EntropyPool) -> bool {
        self.chunks.len() == pool.chunks.len()
            && self
                .chunks
                .iter()
                .zip(pool.chunks.iter())
                .all(|(a, b)| a.id() == b.id() && a.snapshot() == b.snapshot())
    }
}

fn storage_io(msg: &str, cause: std::io::Error) -> EgdError {
    EgdError::fatal(Component::Storage, codes::STORAGE_IO, msg).with_cause(cause)
}
