use std::path::PathBuf;

use tracing::debug;

use skua_protocol::{FileMetadata, HashRecord};
use skua_types::sidecar;

use super::DownloadEngine;
use crate::error::Result;
use crate::platform;
use crate::temp::TempFile;

/// A finished (or salvaged) download on its way to the hashing pipeline.
pub(crate) struct HashInput {
    /// Temp holding the body or patch stream; consumed into the record.
    pub body: TempFile,
    /// Sidecar written by the chunked transport, when present.
    pub hashoutput: Option<TempFile>,
    pub dest_path: PathBuf,
    pub hash_dest_path: PathBuf,
    pub old_file_path: Option<PathBuf>,
    pub file_size: i64,
    pub metadata: FileMetadata,
    pub is_script: bool,
}

impl DownloadEngine {
    /// Hand a completed item to the hashing pipeline. Temp ownership moves
    /// into the record; the pipeline deletes the files once hashed.
    pub(crate) fn dispatch_hash(&mut self, input: HashInput) -> Result<()> {
        debug!(file = %input.dest_path.display(), "loaded file");

        let temp_path = input.body.into_path()?;

        let hashoutput_path = match input.hashoutput {
            Some(hashoutput) => {
                let len = hashoutput.len()?;
                let path = hashoutput.into_path()?;
                if !input.is_script {
                    // Retries can leave stale tail bytes behind the sidecar's
                    // true end.
                    let expected = sidecar::hashdata_size(input.file_size);
                    if (len as i64) > expected {
                        platform::fs::truncate(&path, expected as u64)?;
                    }
                }
                Some(path)
            }
            None => None,
        };

        let record = HashRecord {
            temp_path,
            backup_id: self.shared.cfg.backup_id,
            incremental: self.shared.cfg.incremental,
            dest_path: input.dest_path,
            hash_dest_path: input.hash_dest_path,
            hashoutput_path,
            old_file_path: input.old_file_path,
            file_size: input.file_size,
            metadata: input.metadata,
        };
        self.hash_sink.send(record.encode())
    }
}
