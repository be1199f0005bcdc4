//! Shared scaffolding for engine tests: scripted mock transports, a mock
//! control channel, and a backup-tree harness over real temp directories.

use std::collections::VecDeque;
use std::fs::File;
use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use skua_protocol::{FileMetadata, HashRecord, ProtocolInfo};
use skua_types::TransferCode;

use crate::config::EngineConfig;
use crate::download::{DownloadEngine, DownloadRequest};
use crate::error::{EngineError, Result};
use crate::temp::{DirTempStore, TempFile, TempStore};
use crate::transport::{
    ChunkedTransfer, ClientControl, FullTransfer, HashSink, PatchIo, TransferQueue,
};

// ── Full transport mock ────────────────────────────────────────────────────

pub(crate) struct FullReply {
    pub code: TransferCode,
    pub body: Vec<u8>,
}

impl FullReply {
    pub fn ok(body: &[u8]) -> Self {
        Self {
            code: TransferCode::Success,
            body: body.to_vec(),
        }
    }

    pub fn code(code: TransferCode) -> Self {
        Self {
            code,
            body: Vec::new(),
        }
    }

    pub fn partial(code: TransferCode, body: &[u8]) -> Self {
        Self {
            code,
            body: body.to_vec(),
        }
    }
}

#[derive(Default)]
struct MockFullState {
    replies: VecDeque<FullReply>,
    calls: Vec<String>,
    stream_end_tokens: Vec<String>,
}

#[derive(Clone, Default)]
pub(crate) struct MockFull {
    state: Arc<Mutex<MockFullState>>,
}

impl MockFull {
    pub fn push(&self, reply: FullReply) {
        self.state.lock().unwrap().replies.push_back(reply);
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn stream_end_tokens(&self) -> Vec<String> {
        self.state.lock().unwrap().stream_end_tokens.clone()
    }
}

impl FullTransfer for MockFull {
    fn get_file(
        &mut self,
        remote_name: &str,
        dest: Option<&mut File>,
        _hashed_transfer: bool,
        _metadata_only: bool,
    ) -> TransferCode {
        let reply = {
            let mut st = self.state.lock().unwrap();
            st.calls.push(remote_name.to_string());
            st.replies
                .pop_front()
                .unwrap_or_else(|| FullReply::code(TransferCode::Error))
        };
        if let Some(dest) = dest {
            dest.write_all(&reply.body).unwrap();
        }
        reply.code
    }

    fn inform_metadata_stream_end(&mut self, server_token: &str) -> TransferCode {
        self.state
            .lock()
            .unwrap()
            .stream_end_tokens
            .push(server_token.to_string());
        TransferCode::Success
    }
}

// ── Chunked transport mock ─────────────────────────────────────────────────

pub(crate) struct ChunkedReply {
    pub code: TransferCode,
    pub patch_body: Vec<u8>,
    pub hashoutput_body: Vec<u8>,
    pub reported_size: Option<i64>,
}

impl ChunkedReply {
    pub fn ok(patch_body: &[u8], size: i64) -> Self {
        Self {
            code: TransferCode::Success,
            patch_body: patch_body.to_vec(),
            hashoutput_body: Vec::new(),
            reported_size: Some(size),
        }
    }

    pub fn code(code: TransferCode) -> Self {
        Self {
            code,
            patch_body: Vec::new(),
            hashoutput_body: Vec::new(),
            reported_size: None,
        }
    }
}

#[derive(Default)]
struct MockChunkedState {
    replies: VecDeque<ChunkedReply>,
    calls: Vec<String>,
    lookahead: Option<Arc<dyn TransferQueue>>,
    remote_error: String,
}

#[derive(Clone, Default)]
pub(crate) struct MockChunked {
    state: Arc<Mutex<MockChunkedState>>,
}

impl MockChunked {
    pub fn push(&self, reply: ChunkedReply) {
        self.state.lock().unwrap().replies.push_back(reply);
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn lookahead(&self) -> Option<Arc<dyn TransferQueue>> {
        self.state.lock().unwrap().lookahead.clone()
    }

    pub fn set_remote_error(&self, detail: &str) {
        self.state.lock().unwrap().remote_error = detail.to_string();
    }
}

impl ChunkedTransfer for MockChunked {
    fn get_file_patch(
        &mut self,
        remote_name: &str,
        io: PatchIo<'_>,
        file_size: &mut i64,
    ) -> TransferCode {
        let reply = {
            let mut st = self.state.lock().unwrap();
            st.calls.push(remote_name.to_string());
            st.replies
                .pop_front()
                .unwrap_or_else(|| ChunkedReply::code(TransferCode::Error))
        };
        io.patchfile.write_all(&reply.patch_body).unwrap();
        io.hashoutput.write_all(&reply.hashoutput_body).unwrap();
        if let Some(size) = reply.reported_size {
            *file_size = size;
        }
        reply.code
    }

    fn set_lookahead(&mut self, queue: Option<Arc<dyn TransferQueue>>) {
        self.state.lock().unwrap().lookahead = queue;
    }

    fn remote_error(&self) -> String {
        self.state.lock().unwrap().remote_error.clone()
    }
}

// ── Control channel mock ───────────────────────────────────────────────────

#[derive(Default)]
struct MockControlState {
    messages: Vec<String>,
    fail_messages: bool,
    retry_replies: VecDeque<Result<String>>,
    retry_calls: Vec<String>,
}

#[derive(Clone)]
pub(crate) struct MockControl {
    state: Arc<Mutex<MockControlState>>,
    nonce: Arc<AtomicU64>,
    protocol: ProtocolInfo,
}

impl MockControl {
    pub fn new(protocol: ProtocolInfo) -> Self {
        Self {
            state: Arc::new(Mutex::new(MockControlState::default())),
            nonce: Arc::new(AtomicU64::new(1)),
            protocol,
        }
    }

    pub fn messages(&self) -> Vec<String> {
        self.state.lock().unwrap().messages.clone()
    }

    pub fn retry_calls(&self) -> Vec<String> {
        self.state.lock().unwrap().retry_calls.clone()
    }

    pub fn fail_messages(&self) {
        self.state.lock().unwrap().fail_messages = true;
    }

    pub fn push_retry_reply(&self, reply: Result<String>) {
        self.state.lock().unwrap().retry_replies.push_back(reply);
    }
}

impl ClientControl for MockControl {
    fn send_message(&self, msg: &str, _expected_reply: &str, _timeout: Duration) -> Result<()> {
        let mut st = self.state.lock().unwrap();
        st.messages.push(msg.to_string());
        if st.fail_messages {
            Err(EngineError::ControlTimeout(msg.to_string()))
        } else {
            Ok(())
        }
    }

    fn send_message_retry(&self, msg: &str, _timeout: Duration, _retries: u32) -> Result<String> {
        let mut st = self.state.lock().unwrap();
        st.retry_calls.push(msg.to_string());
        st.retry_replies
            .pop_front()
            .unwrap_or_else(|| Ok("0".to_string()))
    }

    fn next_nonce(&self) -> u64 {
        self.nonce.fetch_add(1, Ordering::Relaxed)
    }

    fn protocol(&self) -> ProtocolInfo {
        self.protocol
    }
}

// ── Failing temp store ─────────────────────────────────────────────────────

/// Delegates to a real store until `budget` creations have happened, then
/// fails.
pub(crate) struct LimitedTempStore {
    inner: DirTempStore,
    budget: AtomicU64,
}

impl LimitedTempStore {
    pub fn new(dir: impl Into<PathBuf>, budget: u64) -> Self {
        Self {
            inner: DirTempStore::new(dir),
            budget: AtomicU64::new(budget),
        }
    }
}

impl TempStore for LimitedTempStore {
    fn create(&self) -> Result<TempFile> {
        let left = self.budget.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
            n.checked_sub(1)
        });
        match left {
            Ok(_) => self.inner.create(),
            Err(_) => Err(EngineError::TempFile("temp budget exhausted".into())),
        }
    }
}

// ── Harness ────────────────────────────────────────────────────────────────

pub(crate) struct HarnessOptions {
    pub save_incomplete_file: bool,
    pub use_reflink: bool,
    pub with_chunked: bool,
    pub protocol: ProtocolInfo,
    pub server_token: String,
    pub temp_budget: Option<u64>,
    pub temp_store: Option<Arc<dyn TempStore>>,
}

impl Default for HarnessOptions {
    fn default() -> Self {
        Self {
            save_incomplete_file: false,
            use_reflink: false,
            with_chunked: true,
            protocol: ProtocolInfo {
                version: 3,
                file_meta: 1,
            },
            server_token: String::new(),
            temp_budget: None,
            temp_store: None,
        }
    }
}

pub(crate) struct Harness {
    pub dir: tempfile::TempDir,
    pub full: MockFull,
    pub chunked: MockChunked,
    pub control: MockControl,
    pub records: crossbeam_channel::Receiver<Vec<u8>>,
    pub engine: DownloadEngine,
}

impl Harness {
    pub fn new(opts: HarnessOptions) -> Self {
        let dir = tempfile::tempdir().unwrap();
        for sub in ["cur", "cur_hashes", "last", "last/.hashes", "lastc", "lastc/.hashes", "tmp"] {
            std::fs::create_dir_all(dir.path().join(sub)).unwrap();
        }

        let cfg = EngineConfig {
            backup_path: dir.path().join("cur"),
            backup_hash_path: dir.path().join("cur_hashes"),
            last_backup_path: Some(dir.path().join("last")),
            last_backup_complete_path: Some(dir.path().join("lastc")),
            client_name: "testclient".into(),
            server_token: opts.server_token,
            hashed_transfer: true,
            save_incomplete_file: opts.save_incomplete_file,
            use_reflink: opts.use_reflink,
            backup_id: 11,
            incremental: true,
            incremental_num: 2,
            max_queue_weight: 500,
        };

        let full = MockFull::default();
        let chunked = MockChunked::default();
        let control = MockControl::new(opts.protocol);
        let (tx, rx) = crossbeam_channel::unbounded::<Vec<u8>>();
        let temp: Arc<dyn TempStore> = match (opts.temp_store, opts.temp_budget) {
            (Some(store), _) => store,
            (None, Some(budget)) => Arc::new(LimitedTempStore::new(dir.path().join("tmp"), budget)),
            (None, None) => Arc::new(DirTempStore::new(dir.path().join("tmp"))),
        };

        let engine = DownloadEngine::new(
            cfg,
            Box::new(full.clone()),
            opts.with_chunked.then(|| Box::new(chunked.clone()) as Box<dyn ChunkedTransfer>),
            Arc::new(control.clone()),
            Box::new(tx) as Box<dyn HashSink>,
            temp,
        );

        Self {
            dir,
            full,
            chunked,
            control,
            records: rx,
            engine,
        }
    }

    pub fn basic() -> Self {
        Self::new(HarnessOptions::default())
    }

    /// A transfer request rooted at `share/` on both sides.
    pub fn req(&self, id: u64, name: &str, predicted_size: i64) -> DownloadRequest {
        DownloadRequest {
            id,
            remote_name: name.to_string(),
            short_name: name.to_string(),
            current_path: "share".to_string(),
            os_path: "share".to_string(),
            predicted_size,
            metadata: FileMetadata {
                modified: 1_700_000_000,
                created: 0,
                accessed: 0,
            },
            is_script: false,
            metadata_only: false,
        }
    }

    pub fn prior_path(&self, name: &str) -> PathBuf {
        self.dir.path().join("last").join("share").join(name)
    }

    pub fn prior_sidecar_path(&self, name: &str) -> PathBuf {
        self.dir
            .path()
            .join("last")
            .join(".hashes")
            .join("share")
            .join(name)
    }

    pub fn dest_path(&self, name: &str) -> PathBuf {
        self.dir.path().join("cur").join("share").join(name)
    }

    pub fn dest_hash_path(&self, name: &str) -> PathBuf {
        self.dir.path().join("cur_hashes").join("share").join(name)
    }

    /// Write a prior-backup copy of `name` and, optionally, a real sidecar
    /// for it.
    pub fn write_prior(&self, name: &str, body: &[u8], with_sidecar: bool) {
        let path = self.prior_path(name);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, body).unwrap();
        if with_sidecar {
            let sc = self.prior_sidecar_path(name);
            std::fs::create_dir_all(sc.parent().unwrap()).unwrap();
            let mut out = Vec::new();
            skua_types::sidecar::build_sidecar(&mut std::io::Cursor::new(body), &mut out).unwrap();
            std::fs::write(&sc, out).unwrap();
        }
        // Destination directories exist in a real run; mirror that.
        std::fs::create_dir_all(self.dest_path(name).parent().unwrap()).unwrap();
        std::fs::create_dir_all(self.dest_hash_path(name).parent().unwrap()).unwrap();
    }

    pub fn drain_records(&self) -> Vec<HashRecord> {
        self.records
            .try_iter()
            .map(|buf| HashRecord::decode(&buf).expect("malformed hash record"))
            .collect()
    }

    /// Temp files still on disk (those not consumed by the hash pipeline).
    pub fn leftover_temps(&self) -> Vec<PathBuf> {
        std::fs::read_dir(self.dir.path().join("tmp"))
            .unwrap()
            .map(|e| e.unwrap().path())
            .collect()
    }
}
