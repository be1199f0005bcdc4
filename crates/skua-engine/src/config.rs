use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Settings for one backup job's download engine.
///
/// The orchestrator builds this from its job record and server settings; the
/// engine never reads configuration files itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Root of the backup tree being filled by this job.
    pub backup_path: PathBuf,
    /// Root of the chunk-hash sidecar tree for this job.
    pub backup_hash_path: PathBuf,
    /// Most recent prior backup of this client, complete or not.
    #[serde(default)]
    pub last_backup_path: Option<PathBuf>,
    /// Most recent prior backup known to be complete.
    #[serde(default)]
    pub last_backup_complete_path: Option<PathBuf>,
    pub client_name: String,
    /// Session token prefixed to non-script remote names. Empty disables the
    /// prefix.
    #[serde(default)]
    pub server_token: String,
    /// Ask the full transport to verify transfers with content hashes.
    #[serde(default = "default_true")]
    pub hashed_transfer: bool,
    /// Keep and hash partially transferred files instead of discarding them.
    #[serde(default)]
    pub save_incomplete_file: bool,
    /// Salvage via reflink instead of hardlink.
    #[serde(default)]
    pub use_reflink: bool,
    pub backup_id: i32,
    /// Whether this job is an incremental backup.
    #[serde(default)]
    pub incremental: bool,
    /// Ordinal of this incremental within its chain; part of script remote
    /// names.
    #[serde(default)]
    pub incremental_num: i32,
    /// Flow-control ceiling for the download queue weight.
    #[serde(default = "default_max_queue_weight")]
    pub max_queue_weight: usize,
}

fn default_true() -> bool {
    true
}

fn default_max_queue_weight() -> usize {
    500
}
