//! Binary completion record written to the hashing pipeline's pipe.
//!
//! Layout, in order: temp-file path, backup id (i32), is-incremental
//! (i32, 0/1), destination path, destination hash path, hash-output path or
//! empty, old file path or empty, file size (i64), metadata blob. Strings and
//! the metadata blob are length-prefixed with a u32; all integers are
//! native-endian (the pipe never leaves the machine).

use std::path::PathBuf;

use crate::{path_to_wire, wire_to_path, FileMetadata};

/// One completed (or partially completed) download, ready for hashing.
#[derive(Debug, Clone, PartialEq)]
pub struct HashRecord {
    /// Temp file holding the downloaded body (or patch stream). Ownership of
    /// the file passes to the pipeline with this record.
    pub temp_path: PathBuf,
    pub backup_id: i32,
    pub incremental: bool,
    /// Final destination of the file inside the backup tree.
    pub dest_path: PathBuf,
    /// Final destination of the chunk-hash sidecar.
    pub hash_dest_path: PathBuf,
    /// Sidecar produced by the chunked transport, when one exists.
    pub hashoutput_path: Option<PathBuf>,
    /// Prior-backup copy usable as a reflink/patch source.
    pub old_file_path: Option<PathBuf>,
    pub file_size: i64,
    pub metadata: FileMetadata,
}

impl HashRecord {
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(256);
        put_bytes(&mut buf, &path_to_wire(&self.temp_path));
        buf.extend_from_slice(&self.backup_id.to_ne_bytes());
        buf.extend_from_slice(&(self.incremental as i32).to_ne_bytes());
        put_bytes(&mut buf, &path_to_wire(&self.dest_path));
        put_bytes(&mut buf, &path_to_wire(&self.hash_dest_path));
        put_opt_path(&mut buf, self.hashoutput_path.as_deref());
        put_opt_path(&mut buf, self.old_file_path.as_deref());
        buf.extend_from_slice(&self.file_size.to_ne_bytes());
        let meta = rmp_serde::to_vec(&self.metadata).unwrap_or_default();
        put_bytes(&mut buf, &meta);
        buf
    }

    /// Decode a record previously produced by [`encode`](Self::encode).
    /// Returns `None` on any truncation or framing error.
    pub fn decode(data: &[u8]) -> Option<Self> {
        let mut rd = Reader { data, pos: 0 };
        let temp_path = wire_to_path(rd.bytes()?);
        let backup_id = rd.i32()?;
        let incremental = rd.i32()? != 0;
        let dest_path = wire_to_path(rd.bytes()?);
        let hash_dest_path = wire_to_path(rd.bytes()?);
        let hashoutput_path = opt_path(rd.bytes()?);
        let old_file_path = opt_path(rd.bytes()?);
        let file_size = rd.i64()?;
        let metadata = rmp_serde::from_slice(rd.bytes()?).ok()?;
        if rd.pos != data.len() {
            return None;
        }
        Some(Self {
            temp_path,
            backup_id,
            incremental,
            dest_path,
            hash_dest_path,
            hashoutput_path,
            old_file_path,
            file_size,
            metadata,
        })
    }
}

fn put_bytes(buf: &mut Vec<u8>, bytes: &[u8]) {
    buf.extend_from_slice(&(bytes.len() as u32).to_ne_bytes());
    buf.extend_from_slice(bytes);
}

fn put_opt_path(buf: &mut Vec<u8>, path: Option<&std::path::Path>) {
    match path {
        Some(p) => put_bytes(buf, &path_to_wire(p)),
        None => put_bytes(buf, b""),
    }
}

fn opt_path(bytes: &[u8]) -> Option<PathBuf> {
    if bytes.is_empty() {
        None
    } else {
        Some(wire_to_path(bytes))
    }
}

struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, n: usize) -> Option<&'a [u8]> {
        let end = self.pos.checked_add(n)?;
        let slice = self.data.get(self.pos..end)?;
        self.pos = end;
        Some(slice)
    }

    fn i32(&mut self) -> Option<i32> {
        Some(i32::from_ne_bytes(self.take(4)?.try_into().ok()?))
    }

    fn i64(&mut self) -> Option<i64> {
        Some(i64::from_ne_bytes(self.take(8)?.try_into().ok()?))
    }

    fn bytes(&mut self) -> Option<&'a [u8]> {
        let len = u32::from_ne_bytes(self.take(4)?.try_into().ok()?) as usize;
        self.take(len)
    }
}
