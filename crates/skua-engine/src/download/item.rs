use std::fs::File;
use std::io::{self, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use skua_protocol::FileMetadata;

use crate::temp::TempFile;

/// Queue weight of a full-transfer item.
pub(crate) const WEIGHT_FULL: usize = 1;

/// Queue weight of a chunked item. Chunked items pin pre-opened temp files in
/// the transport's look-ahead buffer, so they weigh more. Changing the ratio
/// requires revisiting the transport's buffer sizing.
pub(crate) const WEIGHT_CHUNKED: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferKind {
    Full,
    Chunked,
}

/// A file the orchestrator wants downloaded.
#[derive(Debug, Clone)]
pub struct DownloadRequest {
    /// Dense job id, monotonically assigned by the orchestrator.
    pub id: u64,
    /// File name on the client.
    pub remote_name: String,
    /// File name inside the backup tree.
    pub short_name: String,
    /// Client-side directory of the file.
    pub current_path: String,
    /// Backup-tree directory of the file.
    pub os_path: String,
    /// Size prediction from the client's file list; `> 0` makes the item
    /// eligible for transport look-ahead.
    pub predicted_size: i64,
    pub metadata: FileMetadata,
    /// Remote entry is a script invocation: running it is the point, stderr
    /// is fetched afterwards, and a non-zero exit fails the item.
    pub is_script: bool,
    /// Transfer no body and open no local file.
    pub metadata_only: bool,
}

/// One enqueued transfer with its engine-side processing state.
pub(crate) struct TransferItem {
    pub id: u64,
    pub kind: TransferKind,
    pub remote_name: String,
    pub short_name: String,
    pub current_path: String,
    pub os_path: String,
    pub predicted_size: i64,
    pub metadata: FileMetadata,
    pub is_script: bool,
    pub metadata_only: bool,
    /// Taken by a transport via look-ahead.
    pub queued: bool,
    /// Sticky: once preparation failed it is never re-attempted.
    pub prepare_error: bool,
    pub patch: Option<Box<PatchFiles>>,
}

impl TransferItem {
    pub fn from_request(req: DownloadRequest, kind: TransferKind) -> Self {
        Self {
            id: req.id,
            kind,
            remote_name: req.remote_name,
            short_name: req.short_name,
            current_path: req.current_path,
            os_path: req.os_path,
            predicted_size: req.predicted_size,
            metadata: req.metadata,
            is_script: req.is_script,
            // Chunked transfers always move a body.
            metadata_only: kind == TransferKind::Full && req.metadata_only,
            queued: false,
            prepare_error: false,
            patch: None,
        }
    }

    pub fn to_request(&self) -> DownloadRequest {
        DownloadRequest {
            id: self.id,
            remote_name: self.remote_name.clone(),
            short_name: self.short_name.clone(),
            current_path: self.current_path.clone(),
            os_path: self.os_path.clone(),
            predicted_size: self.predicted_size,
            metadata: self.metadata,
            is_script: self.is_script,
            metadata_only: self.metadata_only,
        }
    }

    pub fn weight(&self) -> usize {
        match self.kind {
            TransferKind::Full => WEIGHT_FULL,
            TransferKind::Chunked => WEIGHT_CHUNKED,
        }
    }
}

/// Work records flowing through the download queue.
pub(crate) enum QueueEntry {
    Transfer(Box<TransferItem>),
    StartSnapshot(String),
    StopSnapshot(String),
    Skip,
    Quit,
}

impl QueueEntry {
    /// Weight this entry contributes to the queue's flow control. Control
    /// entries are weightless.
    pub fn weight(&self) -> usize {
        match self {
            QueueEntry::Transfer(item) => item.weight(),
            _ => 0,
        }
    }
}

/// The prior chunk-hash sidecar: either a long-lived file beside the prior
/// backup (closed on exit) or a freshly synthesized temp (deleted on exit).
pub(crate) enum ChunkHashes {
    Sidecar { file: File, path: PathBuf },
    Synthesized(TempFile),
}

impl ChunkHashes {
    pub fn file(&mut self) -> &mut File {
        match self {
            ChunkHashes::Sidecar { file, .. } => file,
            ChunkHashes::Synthesized(temp) => temp.file(),
        }
    }

    pub fn path(&self) -> &Path {
        match self {
            ChunkHashes::Sidecar { path, .. } => path,
            ChunkHashes::Synthesized(temp) => temp.path(),
        }
    }

    pub fn rewind(&mut self) -> io::Result<()> {
        self.file().seek(SeekFrom::Start(0)).map(|_| ())
    }

    pub fn try_clone_handle(&self) -> io::Result<File> {
        match self {
            ChunkHashes::Sidecar { file, .. } => file.try_clone(),
            ChunkHashes::Synthesized(temp) => temp.try_clone_handle(),
        }
    }
}

/// Everything a differential transfer needs, as one owning record.
///
/// Dropping the record releases every resource correctly: temps are deleted,
/// the prior file and a long-lived sidecar are merely closed. Success paths
/// consume the temps into the hashing pipeline instead of dropping them.
pub(crate) struct PatchFiles {
    pub orig_file: File,
    /// Path of the prior-backup copy (`filepath_old` in the hash record).
    pub orig_path: PathBuf,
    pub orig_size: u64,
    pub patchfile: TempFile,
    pub chunkhashes: ChunkHashes,
    pub hashoutput: TempFile,
    /// Destination of the new sidecar inside the backup's hash tree.
    pub hash_dest_path: PathBuf,
}

impl PatchFiles {
    pub fn io(&mut self) -> crate::transport::PatchIo<'_> {
        crate::transport::PatchIo {
            orig_file: &mut self.orig_file,
            patchfile: self.patchfile.file(),
            chunkhashes: self.chunkhashes.file(),
            hashoutput: self.hashoutput.file(),
        }
    }
}
