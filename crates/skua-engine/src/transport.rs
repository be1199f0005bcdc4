//! Capability traits at the engine's seams.
//!
//! The engine never speaks the wire protocol; it drives two transport
//! clients, a control channel to the orchestrator, and a pipe into the
//! hashing pipeline, all behind the traits below.

use std::fs::File;
use std::sync::Arc;
use std::time::Duration;

use skua_protocol::ProtocolInfo;
use skua_types::TransferCode;

use crate::error::{EngineError, Result};

/// Whole-file transport client.
pub trait FullTransfer: Send {
    /// Pull `remote_name` into `dest`. `dest` is `None` for metadata-only
    /// entries, which transfer no body.
    fn get_file(
        &mut self,
        remote_name: &str,
        dest: Option<&mut File>,
        hashed_transfer: bool,
        metadata_only: bool,
    ) -> TransferCode;

    /// Tell the client that no further file-metadata requests will follow in
    /// this session.
    fn inform_metadata_stream_end(&mut self, server_token: &str) -> TransferCode;
}

/// Handle bundle for one differential transfer.
pub struct PatchIo<'a> {
    /// Prior-backup copy, read side.
    pub orig_file: &'a mut File,
    /// Receives the patched/new bytes.
    pub patchfile: &'a mut File,
    /// Chunk-hash sidecar of `orig_file`, read side.
    pub chunkhashes: &'a mut File,
    /// Receives the new sidecar.
    pub hashoutput: &'a mut File,
}

/// Differential (chunked/patch) transport client.
pub trait ChunkedTransfer: Send {
    /// Pull the changed chunks of `remote_name` against the prepared inputs.
    /// `file_size` carries the predicted size in and the transferred size
    /// out; a negative output is nonsense and reverts to the prediction.
    fn get_file_patch(&mut self, remote_name: &str, io: PatchIo<'_>, file_size: &mut i64)
        -> TransferCode;

    /// Register (or clear) the look-ahead queue the transport may poll to
    /// pre-open the next job's files.
    fn set_lookahead(&mut self, queue: Option<Arc<dyn TransferQueue>>);

    /// Remote error detail after [`TransferCode::ErrorCodes`].
    fn remote_error(&self) -> String;
}

/// Out-of-band control channel to the client, owned by the orchestrator.
pub trait ClientControl: Send + Sync {
    /// Synchronous request/response exchange; `Ok` only if the client
    /// answered `expected_reply` within `timeout`.
    fn send_message(&self, msg: &str, expected_reply: &str, timeout: Duration) -> Result<()>;

    /// Request/response with retries spread over `timeout`; returns the raw
    /// reply body.
    fn send_message_retry(&self, msg: &str, timeout: Duration, retries: u32) -> Result<String>;

    /// Draw a nonce from the orchestrator's RNG. Script remote names must be
    /// unique across the whole backup, so the engine never uses a local RNG.
    fn next_nonce(&self) -> u64;

    fn protocol(&self) -> ProtocolInfo;
}

/// What the look-ahead queue knows about the next full-transfer job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LookaheadKind {
    /// File body follows.
    Data,
    /// Metadata-only entry.
    Metadata,
}

/// Pre-opened handles for the next chunked job. The handles share file
/// offsets with the queued item's own handles.
pub struct ChunkedJob {
    pub remote_name: String,
    pub orig_file: File,
    pub patchfile: File,
    pub chunkhashes: File,
    pub hashoutput: File,
    pub predicted_size: i64,
}

/// Look-ahead surface the engine exposes to the chunked transport.
///
/// All operations are callable concurrently with the engine loop. They never
/// reorder consumption; they only mark items as taken and pre-open their
/// resources.
pub trait TransferQueue: Send + Sync {
    /// Take the next unqueued full-transfer item with a usable size
    /// prediction. Returns its derived remote name.
    fn next_full(&self) -> Option<(String, LookaheadKind)>;

    /// Take the next unqueued chunked item, preparing its patch inputs if
    /// necessary.
    fn next_chunked(&self) -> Option<ChunkedJob>;

    /// Give back a full item previously taken via [`next_full`](Self::next_full).
    fn unqueue_full(&self, remote_name: &str);

    /// Give back a chunked item previously taken via
    /// [`next_chunked`](Self::next_chunked).
    fn unqueue_chunked(&self, remote_name: &str);

    /// Clear the taken mark on all full items (transport reconnected).
    fn reset_full(&self);

    /// Clear the taken mark on all chunked items.
    fn reset_chunked(&self);
}

/// Downstream pipe into the hashing pipeline.
pub trait HashSink: Send {
    fn send(&self, record: Vec<u8>) -> Result<()>;
}

impl HashSink for crossbeam_channel::Sender<Vec<u8>> {
    fn send(&self, record: Vec<u8>) -> Result<()> {
        crossbeam_channel::Sender::send(self, record).map_err(|_| EngineError::HashPipeClosed)
    }
}
