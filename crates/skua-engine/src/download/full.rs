use tracing::{debug, error, info};

use skua_types::TransferCode;

use super::hash_dispatch::HashInput;
use super::item::TransferItem;
use super::prepare::locate_prior_file;
use super::{DownloadEngine, HASH_RETRIES};
use crate::error::Result;
use crate::temp::TempFile;

impl DownloadEngine {
    /// Execute a whole-file transfer. Returns `false` when the failure takes
    /// the transport offline.
    pub(crate) fn load_file(&mut self, item: TransferItem) -> Result<bool> {
        debug!(file = %item.remote_name, "loading file");

        let mut temp: Option<TempFile> = None;
        if !item.metadata_only {
            match self.shared.temp.create() {
                Ok(t) => temp = Some(t),
                Err(e) => {
                    error!(file = %item.remote_name, error = %e, "error creating temporary file for download");
                    self.record_failed(item.id);
                    return Ok(false);
                }
            }
        }

        let remote_name = self.shared.derive_remote_name(&item);
        let hashed = self.shared.cfg.hashed_transfer;

        let mut rc = self.full.get_file(
            &remote_name,
            temp.as_mut().map(|t| t.file()),
            hashed,
            item.metadata_only,
        );
        let mut hash_retries = HASH_RETRIES;
        while rc == TransferCode::Hash && hash_retries > 0 {
            if let Some(t) = temp.as_mut() {
                if let Err(e) = t.rewind() {
                    error!(file = %item.remote_name, error = %e, "error rewinding download temp");
                    self.record_failed(item.id);
                    return Ok(false);
                }
            }
            rc = self.full.get_file(
                &remote_name,
                temp.as_mut().map(|t| t.file()),
                hashed,
                item.metadata_only,
            );
            hash_retries -= 1;
        }

        let mut ret = true;
        let mut hash_file = false;
        let mut script_ok = true;

        if !rc.is_success() {
            error!(
                file = %remote_name,
                client = %self.shared.cfg.client_name,
                code = rc.as_u32(),
                "error getting complete file: {rc}"
            );
            self.shared.queue.clear_all_ok();

            let keep_partial = rc.partial_after_full_transfer()
                && self.shared.cfg.save_incomplete_file
                && !item.metadata_only
                && temp.as_ref().map(|t| !t.is_empty().unwrap_or(true)).unwrap_or(false);
            if keep_partial {
                info!(file = %item.remote_name, "saving incomplete file");
                hash_file = true;
                self.shared.bump_max_ok(item.id);
                self.partial_ids.add(item.id);
            } else {
                self.failed_ids.add(item.id);
                temp = None;
            }

            if rc.offline_after_full_transfer() {
                ret = false;
            }
        } else {
            if item.is_script {
                script_ok = self.log_script_output(&remote_name, &item);
            }
            self.shared.bump_max_ok(item.id);
            hash_file = true;
        }

        if hash_file && !item.metadata_only {
            if let Some(temp) = temp.take() {
                let rel = self.shared.item_rel(&item);
                let old_file_path = if self.shared.cfg.use_reflink {
                    match locate_prior_file(&self.shared.cfg, &rel) {
                        Some((path, _file, _root)) => Some(path),
                        None => {
                            debug!(file = %item.remote_name, "no old file");
                            None
                        }
                    }
                } else {
                    None
                };

                let file_size = temp.len()? as i64;
                self.dispatch_hash(HashInput {
                    body: temp,
                    hashoutput: None,
                    dest_path: self.shared.cfg.backup_path.join(&rel),
                    hash_dest_path: self.shared.cfg.backup_hash_path.join(&rel),
                    old_file_path,
                    file_size,
                    metadata: item.metadata,
                    is_script: item.is_script,
                })?;
            }
        }

        if item.is_script && (!rc.is_success() || !script_ok) {
            return Ok(false);
        }

        Ok(ret)
    }
}
