//! Shared wire-format types and constants for the server ↔ client download
//! protocol.
//!
//! This crate is intentionally minimal: control message formats, remote-name
//! encoding, protocol version gates, the script-output reply format, and the
//! binary record handed to the hashing pipeline. No I/O, no engine logic.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

pub mod record;

pub use record::HashRecord;

// ── Protocol version gates ─────────────────────────────────────────────────

/// First file-server protocol version whose chunked transport pulls jobs
/// ahead of time through the look-ahead queue.
pub const LOOKAHEAD_MIN_PROTOCOL: i32 = 3;

/// Whether the client's file-server protocol supports transport look-ahead.
pub fn supports_lookahead(version: i32) -> bool {
    version >= LOOKAHEAD_MIN_PROTOCOL
}

/// Protocol capabilities negotiated by the orchestrator for one client.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ProtocolInfo {
    /// File-server protocol version.
    pub version: i32,
    /// File-metadata streaming revision; 0 when the client does not stream
    /// metadata.
    pub file_meta: i32,
}

impl ProtocolInfo {
    pub fn supports_metadata_stream(&self) -> bool {
        self.file_meta > 0
    }
}

// ── Client control messages ────────────────────────────────────────────────

/// Reply expected from the client for shadow-copy control messages.
pub const DONE_REPLY: &str = "DONE";

/// Shadow-copy RPCs are slow on large volumes; the client gets half an hour.
pub const SHADOW_COPY_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// Total time budget for fetching script output.
pub const SCRIPT_OUTPUT_TIMEOUT: Duration = Duration::from_secs(10);

/// Retry count within [`SCRIPT_OUTPUT_TIMEOUT`].
pub const SCRIPT_OUTPUT_RETRIES: u32 = 10;

pub fn start_shadowcopy_msg(path: &str, token: &str) -> String {
    format!("START SC \"{path}\"#token={token}")
}

pub fn stop_shadowcopy_msg(path: &str, token: &str) -> String {
    format!("STOP SC \"{path}\"#token={token}")
}

pub fn script_stderr_msg(remote_name: &str) -> String {
    format!("SCRIPT STDERR {remote_name}")
}

// ── Remote-name encoding ───────────────────────────────────────────────────

/// Join a directory and file name into the remote request path, stripping a
/// leading separator.
pub fn remote_path(current_path: &str, name: &str) -> String {
    let joined = format!("{current_path}/{name}");
    joined.trim_start_matches('/').to_string()
}

/// Wrap a script entry's remote path. The nonce keeps repeated invocations
/// of the same script distinct on the client.
pub fn wrap_script_remote(base: &str, incremental_num: i32, nonce: u64) -> String {
    format!("SCRIPT|{base}|{incremental_num}|{nonce}")
}

/// Prefix a remote path with the backup session token.
pub fn prefix_session_token(token: &str, base: &str) -> String {
    format!("{token}|{base}")
}

// ── Script output replies ──────────────────────────────────────────────────

/// Parsed `SCRIPT STDERR` reply body: `<retcode>SPACE<lines>`.
///
/// Callers handle the two special replies (`"err"` and empty) before parsing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptOutput {
    pub exit_code: i32,
    pub lines: Vec<String>,
}

pub fn parse_script_output(reply: &str) -> ScriptOutput {
    let (code, body) = match reply.split_once(' ') {
        Some((code, body)) => (code, body),
        None => (reply, ""),
    };
    let exit_code = code.trim().parse().unwrap_or(0);
    let lines = body
        .split('\n')
        .map(|l| l.trim().to_string())
        .filter(|l| !l.is_empty())
        .collect();
    ScriptOutput { exit_code, lines }
}

// ── File metadata ──────────────────────────────────────────────────────────

/// Per-file metadata the orchestrator collects from the client's file list.
///
/// The download engine treats this as an opaque blob and forwards it to the
/// hashing pipeline, which persists it next to the stored file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMetadata {
    pub modified: i64,
    pub created: i64,
    pub accessed: i64,
}

// ── Path helpers shared by both record sides ───────────────────────────────

pub(crate) fn path_to_wire(path: &Path) -> Vec<u8> {
    path.to_string_lossy().into_owned().into_bytes()
}

pub(crate) fn wire_to_path(bytes: &[u8]) -> PathBuf {
    PathBuf::from(String::from_utf8_lossy(bytes).into_owned())
}
