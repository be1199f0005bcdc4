use std::fs::File;
use std::path::{Path, PathBuf};

use tracing::{debug, error};

use skua_types::sidecar;

use super::item::{ChunkHashes, PatchFiles};
use super::EngineShared;
use crate::config::EngineConfig;

/// Name of the sidecar subtree inside a finished backup.
const HASHES_DIR: &str = ".hashes";

pub(crate) enum Prepared {
    Files(Box<PatchFiles>),
    /// No prior copy exists in either prior backup; the item must be
    /// downloaded in full.
    FallbackFull,
    Failed,
}

/// Find a file's prior-backup copy, preferring the most recent backup over
/// the most recent *complete* one. Returns the opened file, its path, and
/// the root it was found under.
pub(crate) fn locate_prior_file(
    cfg: &EngineConfig,
    rel: &Path,
) -> Option<(PathBuf, File, PathBuf)> {
    for root in [&cfg.last_backup_path, &cfg.last_backup_complete_path]
        .into_iter()
        .flatten()
    {
        let path = root.join(rel);
        if let Ok(file) = File::open(&path) {
            return Some((path, file, root.clone()));
        }
    }
    None
}

/// Gather everything a differential transfer needs for one file: the prior
/// copy, its chunk-hash sidecar (synthesized if missing), and writable temps
/// for the patch and the new sidecar.
///
/// Callers make the outcome sticky on the item: `Files` installs into
/// `item.patch`, `Failed` and `FallbackFull` set `item.prepare_error`, and
/// preparation is never re-run for either.
pub(crate) fn prepare_patch_files(
    shared: &EngineShared,
    os_path: &str,
    short_name: &str,
) -> Prepared {
    let cfg = &shared.cfg;
    let rel = crate::platform::paths::join_rel(os_path, short_name);

    let Some((orig_path, mut orig_file, prior_root)) = locate_prior_file(cfg, &rel) else {
        debug!(file = %rel.display(), "no old file, falling back to full download");
        return Prepared::FallbackFull;
    };

    let orig_size = match orig_file.metadata() {
        Ok(m) => m.len(),
        Err(e) => {
            error!(file = %orig_path.display(), error = %e, "cannot stat old file");
            return Prepared::Failed;
        }
    };

    let sidecar_path = prior_root.join(HASHES_DIR).join(&rel);
    let chunkhashes = match open_or_synthesize_sidecar(shared, &sidecar_path, &mut orig_file) {
        Some(ch) => ch,
        None => return Prepared::Failed,
    };

    let patchfile = match shared.temp.create() {
        Ok(t) => t,
        Err(e) => {
            error!(error = %e, "error creating temporary patch file");
            return Prepared::Failed;
        }
    };
    let hashoutput = match shared.temp.create() {
        Ok(t) => t,
        Err(e) => {
            error!(error = %e, "error creating temporary hash output file");
            return Prepared::Failed;
        }
    };

    Prepared::Files(Box::new(PatchFiles {
        orig_file,
        orig_path,
        orig_size,
        patchfile,
        chunkhashes,
        hashoutput,
        hash_dest_path: cfg.backup_hash_path.join(&rel),
    }))
}

/// Open the prior sidecar, or synthesize one into a temp by scanning the
/// prior file when the sidecar is missing, empty, or metadata-only.
fn open_or_synthesize_sidecar(
    shared: &EngineShared,
    sidecar_path: &Path,
    orig_file: &mut File,
) -> Option<ChunkHashes> {
    if let Ok(mut file) = File::open(sidecar_path) {
        let usable = file.metadata().map(|m| m.len() > 0).unwrap_or(false)
            && !sidecar::is_metadata_only(&mut file).unwrap_or(true);
        if usable {
            return Some(ChunkHashes::Sidecar {
                file,
                path: sidecar_path.to_owned(),
            });
        }
    }

    debug!(sidecar = %sidecar_path.display(), "chunk hashes not available, calculating");
    let mut temp = match shared.temp.create() {
        Ok(t) => t,
        Err(e) => {
            error!(error = %e, "error creating temporary chunk-hash file");
            return None;
        }
    };
    let synthesized = sidecar::build_sidecar(orig_file, temp.file())
        .and_then(|_| temp.rewind())
        .and_then(|_| {
            use std::io::Seek;
            orig_file.seek(std::io::SeekFrom::Start(0)).map(|_| ())
        });
    if let Err(e) = synthesized {
        error!(error = %e, "error calculating chunk hashes of old file");
        return None;
    }
    Some(ChunkHashes::Synthesized(temp))
}
