//! The download engine: pulls one client's files into a backup tree.
//!
//! One consumer thread runs [`DownloadEngine::run`]; producer threads feed it
//! through [`DownloadHandle`]; the chunked transport concurrently polls the
//! look-ahead surface registered with it. Completed files are handed to the
//! hashing pipeline as encoded records.

mod full;
mod hash_dispatch;
pub(crate) mod item;
mod lookahead;
mod patch;
pub(crate) mod prepare;
pub(crate) mod queue;
mod script;
mod shadow;

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tracing::{debug, error, warn};

use skua_types::IdSet;

use crate::config::EngineConfig;
use crate::error::Result;
use crate::temp::TempStore;
use crate::transport::{ChunkedTransfer, ClientControl, FullTransfer, HashSink};

pub use item::DownloadRequest;
pub use lookahead::QueueLookahead;

use item::{QueueEntry, TransferItem, TransferKind};
use prepare::{prepare_patch_files, Prepared};
use queue::DownloadQueue;

/// Bounded retries on a content hash mismatch.
pub(crate) const HASH_RETRIES: u32 = 5;

/// State shared between the engine thread, producers, and the look-ahead
/// provider.
pub(crate) struct EngineShared {
    pub cfg: EngineConfig,
    pub queue: DownloadQueue,
    /// Highest id that reached at least partial success. Monotonic;
    /// approximate reads without the queue mutex are fine.
    pub max_ok_id: AtomicU64,
    pub temp: Arc<dyn TempStore>,
    pub control: Arc<dyn ClientControl>,
}

impl EngineShared {
    pub fn bump_max_ok(&self, id: u64) {
        self.max_ok_id.fetch_max(id, Ordering::Relaxed);
    }

    /// Remote request string for an item: `current_path/remote_name` with the
    /// leading separator stripped, wrapped for scripts (with a fresh
    /// orchestrator nonce) or prefixed with the session token otherwise.
    pub fn derive_remote_name(&self, item: &TransferItem) -> String {
        let base = skua_protocol::remote_path(&item.current_path, &item.remote_name);
        if item.is_script {
            skua_protocol::wrap_script_remote(
                &base,
                self.cfg.incremental_num,
                self.control.next_nonce(),
            )
        } else if !self.cfg.server_token.is_empty() {
            skua_protocol::prefix_session_token(&self.cfg.server_token, &base)
        } else {
            base
        }
    }

    /// Backup-tree-relative path of an item.
    pub fn item_rel(&self, item: &TransferItem) -> PathBuf {
        crate::platform::paths::join_rel(&item.os_path, &item.short_name)
    }
}

/// Producer-side handle: enqueue work and observe run state.
#[derive(Clone)]
pub struct DownloadHandle {
    shared: Arc<EngineShared>,
}

impl DownloadHandle {
    /// Enqueue a whole-file transfer. `at_front` is reserved for the engine
    /// recycling an item and skips backpressure.
    pub fn enqueue_full(&self, req: DownloadRequest, at_front: bool) {
        let entry = QueueEntry::Transfer(Box::new(TransferItem::from_request(
            req,
            TransferKind::Full,
        )));
        if at_front {
            self.shared.queue.push_front(entry);
        } else {
            self.shared.queue.push_back(entry);
        }
    }

    /// Enqueue a differential transfer against the prior backup.
    pub fn enqueue_chunked(&self, req: DownloadRequest) {
        self.shared
            .queue
            .push_back(QueueEntry::Transfer(Box::new(TransferItem::from_request(
                req,
                TransferKind::Chunked,
            ))));
    }

    /// Enqueue a shadow-copy activation for `path`, serialized with the
    /// downloads. Weightless, but still throttled so snapshot control cannot
    /// pile up without bound.
    pub fn enqueue_start_snapshot(&self, path: impl Into<String>) {
        self.shared
            .queue
            .push_back(QueueEntry::StartSnapshot(path.into()));
    }

    pub fn enqueue_stop_snapshot(&self, path: impl Into<String>) {
        self.shared
            .queue
            .push_back(QueueEntry::StopSnapshot(path.into()));
    }

    /// Drain the rest of the run: every remaining transfer resolves as a
    /// failure (or salvage for chunked items with a usable prior).
    pub fn enqueue_skip(&self) {
        self.shared.queue.push_front(QueueEntry::Skip);
    }

    /// Stop the engine; `immediate` jumps the queue.
    pub fn enqueue_quit(&self, immediate: bool) {
        if immediate {
            self.shared.queue.push_front(QueueEntry::Quit);
        } else {
            self.shared.queue.push_back_unthrottled(QueueEntry::Quit);
        }
    }

    pub fn is_offline(&self) -> bool {
        self.shared.queue.is_offline()
    }

    pub fn all_downloads_ok(&self) -> bool {
        self.shared.queue.all_ok()
    }

    pub fn max_ok_id(&self) -> u64 {
        self.shared.max_ok_id.load(Ordering::Relaxed)
    }

    #[cfg(test)]
    pub(crate) fn queue_weight(&self) -> usize {
        self.shared.queue.weight()
    }
}

/// The engine proper. Owns the transports for the duration of
/// [`run`](Self::run) and the per-id result registry afterwards.
pub struct DownloadEngine {
    shared: Arc<EngineShared>,
    full: Box<dyn FullTransfer>,
    chunked: Option<Box<dyn ChunkedTransfer>>,
    hash_sink: Box<dyn HashSink>,
    partial_ids: IdSet,
    failed_ids: IdSet,
}

impl DownloadEngine {
    pub fn new(
        cfg: EngineConfig,
        full: Box<dyn FullTransfer>,
        chunked: Option<Box<dyn ChunkedTransfer>>,
        control: Arc<dyn ClientControl>,
        hash_sink: Box<dyn HashSink>,
        temp: Arc<dyn TempStore>,
    ) -> Self {
        let queue = DownloadQueue::new(cfg.max_queue_weight);
        Self {
            shared: Arc::new(EngineShared {
                cfg,
                queue,
                max_ok_id: AtomicU64::new(0),
                temp,
                control,
            }),
            full,
            chunked,
            hash_sink,
            partial_ids: IdSet::new(),
            failed_ids: IdSet::new(),
        }
    }

    pub fn handle(&self) -> DownloadHandle {
        DownloadHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Consume the queue until `Quit`. Returns `Err` only on structural
    /// failures (the hash pipeline went away); per-item failures are recorded
    /// in the id sets and the run continues.
    pub fn run(&mut self) -> Result<()> {
        if let Some(chunked) = self.chunked.as_mut() {
            if skua_protocol::supports_lookahead(self.shared.control.protocol().version) {
                let provider: Arc<dyn crate::transport::TransferQueue> =
                    Arc::new(QueueLookahead::new(Arc::clone(&self.shared)));
                chunked.set_lookahead(Some(provider));
            }
        }

        loop {
            let entry = self.shared.queue.pop_blocking();
            match entry {
                QueueEntry::Quit => break,
                QueueEntry::Skip => {
                    self.shared.queue.set_skipping();
                }
                QueueEntry::StartSnapshot(path) => {
                    if self.draining() {
                        warn!(%path, "client unreachable, skipping shadow copy activation");
                    } else {
                        self.start_shadowcopy(&path);
                    }
                }
                QueueEntry::StopSnapshot(path) => {
                    if self.draining() {
                        warn!(%path, "client unreachable, skipping shadow copy removal");
                    } else {
                        self.stop_shadowcopy(&path);
                    }
                }
                QueueEntry::Transfer(item) => {
                    if self.draining() {
                        self.drain_item(*item)?;
                        continue;
                    }
                    let ok = match item.kind {
                        TransferKind::Full => self.load_file(*item)?,
                        TransferKind::Chunked => self.load_file_patch(*item)?,
                    };
                    if !ok {
                        self.shared.queue.set_offline();
                    }
                }
            }
        }

        if !self.draining()
            && self
                .shared
                .control
                .protocol()
                .supports_metadata_stream()
        {
            let rc = self
                .full
                .inform_metadata_stream_end(&self.shared.cfg.server_token);
            if !rc.is_success() {
                error!(
                    code = rc.as_u32(),
                    "error informing client about metadata stream end: {rc}"
                );
            }
        }

        self.failed_ids.finalize();
        self.partial_ids.finalize();
        Ok(())
    }

    fn draining(&self) -> bool {
        self.shared.queue.is_offline() || self.shared.queue.is_skipping()
    }

    /// Resolve a transfer item without touching the network: chunked items
    /// with a usable prior are salvaged as partial, everything else fails.
    fn drain_item(&mut self, mut item: TransferItem) -> Result<()> {
        if item.kind == TransferKind::Chunked {
            debug!(file = %item.remote_name, "copying incomplete file");
            if item.patch.is_none() && !item.prepare_error {
                match prepare_patch_files(&self.shared, &item.os_path, &item.short_name) {
                    Prepared::Files(files) => item.patch = Some(files),
                    Prepared::FallbackFull | Prepared::Failed => item.prepare_error = true,
                }
            }
            if let Some(patch) = item.patch.take() {
                if self.link_or_copy(&item, *patch)? {
                    self.shared.bump_max_ok(item.id);
                    self.partial_ids.add(item.id);
                } else {
                    warn!(file = %item.remote_name, "copying incomplete file failed");
                    self.failed_ids.add(item.id);
                    self.shared.queue.clear_all_ok();
                }
                return Ok(());
            }
        }

        self.failed_ids.add(item.id);
        self.shared.queue.clear_all_ok();
        Ok(())
    }

    /// Record a hard failure for an item.
    fn record_failed(&mut self, id: u64) {
        self.failed_ids.add(id);
        self.shared.queue.clear_all_ok();
    }

    pub fn is_offline(&self) -> bool {
        self.shared.queue.is_offline()
    }

    pub fn all_downloads_ok(&self) -> bool {
        self.shared.queue.all_ok()
    }

    pub fn max_ok_id(&self) -> u64 {
        self.shared.max_ok_id.load(Ordering::Relaxed)
    }

    pub fn is_download_ok(&self, id: u64) -> bool {
        !self.failed_ids.contains(id)
    }

    pub fn is_download_partial(&self, id: u64) -> bool {
        self.partial_ids.contains(id)
    }

    pub fn failed_ids(&self) -> &IdSet {
        &self.failed_ids
    }

    pub fn partial_ids(&self) -> &IdSet {
        &self.partial_ids
    }

    #[cfg(test)]
    pub(crate) fn lookahead_for_tests(&self) -> QueueLookahead {
        QueueLookahead::new(Arc::clone(&self.shared))
    }

    #[cfg(test)]
    pub(crate) fn shared_for_tests(&self) -> &EngineShared {
        &self.shared
    }
}
