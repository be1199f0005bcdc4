use std::io::{self, Seek, SeekFrom, Write};

use tracing::{debug, error, info, warn};

use skua_types::TransferCode;

use super::hash_dispatch::HashInput;
use super::item::{PatchFiles, QueueEntry, TransferItem, TransferKind};
use super::prepare::{prepare_patch_files, Prepared};
use super::{DownloadEngine, HASH_RETRIES};
use crate::error::Result;
use crate::platform;

impl DownloadEngine {
    /// Execute a differential transfer against the prepared prior-backup
    /// inputs. Returns `false` when the failure takes the transport offline.
    pub(crate) fn load_file_patch(&mut self, mut item: TransferItem) -> Result<bool> {
        if item.patch.is_none() && !item.prepare_error {
            match prepare_patch_files(&self.shared, &item.os_path, &item.short_name) {
                Prepared::Files(files) => item.patch = Some(files),
                Prepared::FallbackFull => {
                    // No prior version to patch against: recycle the item as a
                    // full transfer at the head of the queue.
                    let req = item.to_request();
                    self.shared
                        .queue
                        .push_front(QueueEntry::Transfer(Box::new(TransferItem::from_request(
                            req,
                            TransferKind::Full,
                        ))));
                    return Ok(true);
                }
                Prepared::Failed => item.prepare_error = true,
            }
        }

        let Some(patch) = item.patch.take() else {
            error!(file = %item.remote_name, "cannot prepare patch download");
            self.record_failed(item.id);
            return Ok(false);
        };
        let mut patch = patch;

        debug!(file = %item.remote_name, "loading file patch");

        let remote_name = self.shared.derive_remote_name(&item);
        let mut file_size = item.predicted_size;

        let Some(chunked) = self.chunked.as_mut() else {
            error!(file = %item.remote_name, "no chunked transfer client available");
            self.failed_ids.add(item.id);
            self.shared.queue.clear_all_ok();
            return Ok(false);
        };

        let mut rc = chunked.get_file_patch(&remote_name, patch.io(), &mut file_size);
        let mut hash_retries = HASH_RETRIES;
        while rc == TransferCode::Hash && hash_retries > 0 {
            // Start over: fresh outputs, rewound inputs.
            if let Err(e) = patch
                .orig_file
                .seek(SeekFrom::Start(0))
                .and_then(|_| patch.chunkhashes.rewind())
            {
                error!(file = %item.remote_name, error = %e, "error rewinding patch inputs");
                self.failed_ids.add(item.id);
                self.shared.queue.clear_all_ok();
                return Ok(false);
            }
            patch.patchfile = match self.shared.temp.create() {
                Ok(t) => t,
                Err(e) => {
                    error!(error = %e, "error creating temporary patch file for retry");
                    self.failed_ids.add(item.id);
                    self.shared.queue.clear_all_ok();
                    return Ok(false);
                }
            };
            patch.hashoutput = match self.shared.temp.create() {
                Ok(t) => t,
                Err(e) => {
                    error!(error = %e, "error creating temporary hash output file for retry");
                    self.failed_ids.add(item.id);
                    self.shared.queue.clear_all_ok();
                    return Ok(false);
                }
            };
            file_size = item.predicted_size;
            rc = chunked.get_file_patch(&remote_name, patch.io(), &mut file_size);
            hash_retries -= 1;
        }

        if file_size < 0 {
            debug!(file_size, "patch transfer reported a negative size");
            file_size = item.predicted_size;
        }

        let mut patch = Some(patch);
        let mut hash_file = false;
        let mut script_ok = true;

        if !rc.is_success() {
            error!(
                file = %remote_name,
                client = %self.shared.cfg.client_name,
                code = rc.as_u32(),
                "error getting file patch: {rc}"
            );
            if rc == TransferCode::ErrorCodes {
                if let Some(chunked) = self.chunked.as_ref() {
                    error!(detail = %chunked.remote_error(), "remote error");
                }
            }
            self.shared.queue.clear_all_ok();

            if rc == TransferCode::BaseDirLost && self.shared.cfg.save_incomplete_file {
                info!(file = %item.remote_name, "saving incomplete file from prior version");
                let salvaged = match patch.take() {
                    Some(p) => self.link_or_copy(&item, *p)?,
                    None => false,
                };
                if salvaged {
                    self.shared.bump_max_ok(item.id);
                    self.partial_ids.add(item.id);
                } else {
                    self.failed_ids.add(item.id);
                }
            } else if rc.partial_after_patch_transfer()
                && self.shared.cfg.save_incomplete_file
                && patch
                    .as_ref()
                    .map(|p| !p.patchfile.is_empty().unwrap_or(true))
                    .unwrap_or(false)
            {
                info!(file = %item.remote_name, "saving incomplete file");
                hash_file = true;
                self.shared.bump_max_ok(item.id);
                self.partial_ids.add(item.id);
            } else {
                self.failed_ids.add(item.id);
            }
        } else {
            if item.is_script {
                script_ok = self.log_script_output(&remote_name, &item);
            }
            self.shared.bump_max_ok(item.id);
            hash_file = true;
        }

        if hash_file {
            if let Some(patch) = patch.take() {
                let PatchFiles {
                    patchfile,
                    hashoutput,
                    orig_path,
                    hash_dest_path,
                    ..
                } = *patch;
                let rel = self.shared.item_rel(&item);
                self.dispatch_hash(HashInput {
                    body: patchfile,
                    hashoutput: Some(hashoutput),
                    dest_path: self.shared.cfg.backup_path.join(&rel),
                    hash_dest_path,
                    old_file_path: Some(orig_path),
                    file_size,
                    metadata: item.metadata,
                    is_script: item.is_script,
                })?;
            }
        }

        if item.is_script && (!rc.is_success() || !script_ok) {
            return Ok(false);
        }

        Ok(!rc.offline_after_patch_transfer())
    }

    /// Carry the prior-backup copy forward into the new backup: hardlink (or
    /// reflink) the file and its sidecar as a pair, falling back to a byte
    /// copy through the patch machinery.
    ///
    /// The hardlink branch reuses the prior sidecar in place and skips hash
    /// dispatch. That assumes the prior backup's sidecar was valid, which a
    /// partial prior backup may not guarantee; the debug line below keeps the
    /// reuse auditable.
    pub(crate) fn link_or_copy(&mut self, item: &TransferItem, mut patch: PatchFiles) -> Result<bool> {
        let rel = self.shared.item_rel(item);
        let dest = self.shared.cfg.backup_path.join(&rel);
        let hash_dest = self.shared.cfg.backup_hash_path.join(&rel);

        match platform::fs::link_pair(
            &dest,
            &patch.orig_path,
            &hash_dest,
            patch.chunkhashes.path(),
            self.shared.cfg.use_reflink,
        ) {
            Ok(()) => {
                debug!(file = %dest.display(), "reusing prior version and sidecar without rehash");
                return Ok(true);
            }
            Err(e) => {
                debug!(file = %dest.display(), error = %e, "linking prior version failed, copying");
            }
        }

        let _ = std::fs::remove_file(&dest);

        if let Err(e) = copy_salvage(&mut patch) {
            warn!(file = %dest.display(), error = %e, "salvage copy failed");
            return Ok(false);
        }

        let PatchFiles {
            patchfile,
            hashoutput,
            orig_path,
            orig_size,
            hash_dest_path,
            ..
        } = patch;
        self.dispatch_hash(HashInput {
            body: patchfile,
            hashoutput: Some(hashoutput),
            dest_path: dest,
            hash_dest_path,
            old_file_path: Some(orig_path),
            file_size: orig_size as i64,
            metadata: item.metadata,
            is_script: item.is_script,
        })?;
        Ok(true)
    }
}

/// Turn the patch temps into a whole-file carry-forward: the patchfile gets
/// the prior size as an 8-byte little-endian prefix (marking an unmodified
/// original body), and the prior sidecar is copied onto the hash output.
fn copy_salvage(patch: &mut PatchFiles) -> io::Result<()> {
    patch.patchfile.rewind()?;
    patch
        .patchfile
        .file()
        .write_all(&(patch.orig_size as i64).to_le_bytes())?;
    std::fs::copy(patch.chunkhashes.path(), patch.hashoutput.path())?;
    patch.hashoutput.rewind()?;
    Ok(())
}
