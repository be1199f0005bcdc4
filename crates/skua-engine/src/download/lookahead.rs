use std::io;
use std::sync::Arc;

use tracing::warn;

use super::item::{PatchFiles, QueueEntry, TransferItem, TransferKind, WEIGHT_CHUNKED, WEIGHT_FULL};
use super::prepare::{prepare_patch_files, Prepared};
use super::queue::QueueState;
use super::EngineShared;
use crate::transport::{ChunkedJob, LookaheadKind, TransferQueue};

/// Look-ahead surface handed to the chunked transport.
///
/// The transport polls it from its own threads to pre-open the next queued
/// item's files while the current transfer is still in flight. The scan never
/// reorders consumption: items stay in the queue, only their `queued` mark
/// and prepared state change.
pub struct QueueLookahead {
    shared: Arc<EngineShared>,
}

impl QueueLookahead {
    pub(crate) fn new(shared: Arc<EngineShared>) -> Self {
        Self { shared }
    }
}

enum Scan {
    /// An already-prepared item was taken.
    Job(ChunkedJob),
    /// The first eligible item still needs preparation.
    Prepare {
        id: u64,
        os_path: String,
        short_name: String,
    },
}

impl TransferQueue for QueueLookahead {
    fn next_full(&self) -> Option<(String, LookaheadKind)> {
        let mut st = self.shared.queue.lock();
        for entry in st.entries.iter_mut() {
            let QueueEntry::Transfer(item) = entry else {
                continue;
            };
            if item.kind == TransferKind::Full && !item.queued && item.predicted_size > 0 {
                let name = self.shared.derive_remote_name(item);
                item.queued = true;
                return Some((name, LookaheadKind::Data));
            }
        }
        None
    }

    fn next_chunked(&self) -> Option<ChunkedJob> {
        loop {
            // Pass 1, under the lock: take a prepared item or pick the first
            // candidate that still needs its patch inputs.
            let scan = {
                let mut st = self.shared.queue.lock();
                let mut scan = None;
                for entry in st.entries.iter_mut() {
                    let QueueEntry::Transfer(item) = entry else {
                        continue;
                    };
                    if item.kind != TransferKind::Chunked
                        || item.queued
                        || item.predicted_size <= 0
                        || item.prepare_error
                    {
                        continue;
                    }
                    if let Some(patch) = item.patch.as_deref() {
                        let name = self.shared.derive_remote_name(item);
                        match build_job(name, patch, item.predicted_size) {
                            Ok(job) => {
                                item.queued = true;
                                scan = Some(Scan::Job(job));
                                break;
                            }
                            Err(e) => {
                                // Out of handles, most likely. Leave the item
                                // for the engine thread.
                                warn!(file = %item.remote_name, error = %e, "cannot clone patch handles for look-ahead");
                                continue;
                            }
                        }
                    }
                    scan = Some(Scan::Prepare {
                        id: item.id,
                        os_path: item.os_path.clone(),
                        short_name: item.short_name.clone(),
                    });
                    break;
                }
                scan
            };

            let (id, os_path, short_name) = match scan {
                None => return None,
                Some(Scan::Job(job)) => return Some(job),
                Some(Scan::Prepare {
                    id,
                    os_path,
                    short_name,
                }) => (id, os_path, short_name),
            };

            // Pass 2, lock released: preparation does file I/O.
            let prepared = prepare_patch_files(&self.shared, &os_path, &short_name);

            // Pass 3, under the lock again: install the result if the item is
            // still waiting, then rescan. If the engine dequeued it meanwhile
            // the prepared temps are dropped here.
            let mut st = self.shared.queue.lock();
            let Some(item) = find_transfer_mut(&mut st, id) else {
                continue;
            };
            match prepared {
                Prepared::Failed => {
                    item.prepare_error = true;
                }
                Prepared::FallbackFull => {
                    if item.kind == TransferKind::Chunked {
                        // No prior version: the item becomes a full transfer
                        // and sheds the chunked weight surcharge.
                        item.kind = TransferKind::Full;
                        item.prepare_error = true;
                        st.weight = st.weight.saturating_sub(WEIGHT_CHUNKED - WEIGHT_FULL);
                    }
                }
                Prepared::Files(files) => {
                    if item.kind == TransferKind::Chunked
                        && item.patch.is_none()
                        && !item.prepare_error
                    {
                        item.patch = Some(files);
                    }
                }
            }
        }
    }

    fn unqueue_full(&self, remote_name: &str) {
        let mut st = self.shared.queue.lock();
        for entry in st.entries.iter_mut() {
            let QueueEntry::Transfer(item) = entry else {
                continue;
            };
            if item.kind == TransferKind::Full
                && item.queued
                && self.shared.derive_remote_name(item) == remote_name
            {
                item.queued = false;
                return;
            }
        }
    }

    fn unqueue_chunked(&self, remote_name: &str) {
        let mut st = self.shared.queue.lock();
        for entry in st.entries.iter_mut() {
            let QueueEntry::Transfer(item) = entry else {
                continue;
            };
            if item.kind == TransferKind::Chunked
                && item.queued
                && self.shared.derive_remote_name(item) == remote_name
            {
                item.queued = false;
                return;
            }
        }
    }

    fn reset_full(&self) {
        let mut st = self.shared.queue.lock();
        for entry in st.entries.iter_mut() {
            if let QueueEntry::Transfer(item) = entry {
                if item.kind == TransferKind::Full {
                    item.queued = false;
                }
            }
        }
    }

    fn reset_chunked(&self) {
        let mut st = self.shared.queue.lock();
        for entry in st.entries.iter_mut() {
            if let QueueEntry::Transfer(item) = entry {
                if item.kind == TransferKind::Chunked {
                    item.queued = false;
                }
            }
        }
    }
}

fn find_transfer_mut(st: &mut QueueState, id: u64) -> Option<&mut TransferItem> {
    st.entries.iter_mut().find_map(|entry| match entry {
        QueueEntry::Transfer(item) if item.id == id => Some(item.as_mut()),
        _ => None,
    })
}

fn build_job(remote_name: String, patch: &PatchFiles, predicted_size: i64) -> io::Result<ChunkedJob> {
    Ok(ChunkedJob {
        remote_name,
        orig_file: patch.orig_file.try_clone()?,
        patchfile: patch.patchfile.try_clone_handle()?,
        chunkhashes: patch.chunkhashes.try_clone_handle()?,
        hashoutput: patch.hashoutput.try_clone_handle()?,
        predicted_size,
    })
}
