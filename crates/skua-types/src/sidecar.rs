//! Chunk-hash sidecar format.
//!
//! Every stored file can carry a sidecar holding one BLAKE2b-256 digest per
//! fixed-size chunk of its body. The patch protocol uses the sidecar of the
//! prior backup's copy to decide which chunks changed; the hashing pipeline
//! writes a fresh sidecar for every completed download.
//!
//! The format is a bare concatenation of 32-byte digests, one per
//! [`CHUNK_SIZE`] chunk (the final chunk may be short). A sidecar that holds
//! only file metadata instead of chunk hashes starts with
//! [`METADATA_ONLY_MAGIC`] and must not be fed to the patch protocol.

use std::io::{self, Read, Seek, SeekFrom, Write};

use blake2::digest::consts::U32;
use blake2::{Blake2b, Digest};

type ChunkHasher = Blake2b<U32>;

/// Chunk granularity of the sidecar, in bytes.
pub const CHUNK_SIZE: u64 = 512 * 1024;

/// Size of one chunk digest.
pub const CHUNK_HASH_SIZE: u64 = 32;

/// Marker at the start of a sidecar that carries metadata only.
pub const METADATA_ONLY_MAGIC: [u8; 8] = *b"SKUAMETA";

/// Expected sidecar size for a file body of `file_size` bytes.
///
/// Negative or zero sizes yield 0 (metadata-only entries have no body).
pub fn hashdata_size(file_size: i64) -> i64 {
    if file_size <= 0 {
        return 0;
    }
    let chunks = (file_size as u64).div_ceil(CHUNK_SIZE);
    (chunks * CHUNK_HASH_SIZE) as i64
}

/// Whether the sidecar starts with the metadata-only marker.
///
/// Rewinds the reader before and after the check.
pub fn is_metadata_only<R: Read + Seek>(sidecar: &mut R) -> io::Result<bool> {
    sidecar.seek(SeekFrom::Start(0))?;
    let mut magic = [0u8; 8];
    let mut filled = 0;
    while filled < magic.len() {
        let n = sidecar.read(&mut magic[filled..])?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    sidecar.seek(SeekFrom::Start(0))?;
    Ok(filled == magic.len() && magic == METADATA_ONLY_MAGIC)
}

/// Scan `src` and write one digest per chunk to `out`. Returns the number of
/// chunks written.
pub fn build_sidecar<R: Read, W: Write>(src: &mut R, out: &mut W) -> io::Result<u64> {
    let mut buf = vec![0u8; CHUNK_SIZE as usize];
    let mut chunks = 0u64;
    loop {
        let mut filled = 0;
        while filled < buf.len() {
            let n = src.read(&mut buf[filled..])?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        if filled == 0 {
            break;
        }
        let mut hasher = ChunkHasher::new();
        hasher.update(&buf[..filled]);
        out.write_all(hasher.finalize().as_slice())?;
        chunks += 1;
        if filled < buf.len() {
            break;
        }
    }
    Ok(chunks)
}
