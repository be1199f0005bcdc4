//! End-to-end runs of the download engine over the public API: scripted
//! transports, a real temp directory tree, and the engine on its own thread
//! with producers feeding it concurrently.

use std::collections::VecDeque;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use skua_engine::config::EngineConfig;
use skua_engine::download::{DownloadEngine, DownloadRequest};
use skua_engine::error::Result;
use skua_engine::temp::{DirTempStore, TempStore};
use skua_engine::transport::{
    ChunkedTransfer, ClientControl, FullTransfer, HashSink, PatchIo, TransferQueue,
};
use skua_protocol::{FileMetadata, HashRecord, ProtocolInfo};
use skua_types::TransferCode;

// ── Scripted test doubles ──────────────────────────────────────────────────

#[derive(Clone, Default)]
struct ScriptedFull {
    replies: Arc<Mutex<VecDeque<(TransferCode, Vec<u8>)>>>,
}

impl ScriptedFull {
    fn push(&self, code: TransferCode, body: &[u8]) {
        self.replies.lock().unwrap().push_back((code, body.to_vec()));
    }
}

impl FullTransfer for ScriptedFull {
    fn get_file(
        &mut self,
        _remote_name: &str,
        dest: Option<&mut File>,
        _hashed_transfer: bool,
        _metadata_only: bool,
    ) -> TransferCode {
        let (code, body) = self
            .replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or((TransferCode::Error, Vec::new()));
        if let Some(dest) = dest {
            dest.write_all(&body).unwrap();
        }
        code
    }

    fn inform_metadata_stream_end(&mut self, _server_token: &str) -> TransferCode {
        TransferCode::Success
    }
}

#[derive(Clone, Default)]
struct ScriptedChunked {
    replies: Arc<Mutex<VecDeque<(TransferCode, Vec<u8>, i64)>>>,
}

impl ScriptedChunked {
    fn push(&self, code: TransferCode, patch_body: &[u8], size: i64) {
        self.replies
            .lock()
            .unwrap()
            .push_back((code, patch_body.to_vec(), size));
    }
}

impl ChunkedTransfer for ScriptedChunked {
    fn get_file_patch(
        &mut self,
        _remote_name: &str,
        io: PatchIo<'_>,
        file_size: &mut i64,
    ) -> TransferCode {
        let (code, body, size) = self
            .replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or((TransferCode::Error, Vec::new(), -1));
        io.patchfile.write_all(&body).unwrap();
        *file_size = size;
        code
    }

    fn set_lookahead(&mut self, _queue: Option<Arc<dyn TransferQueue>>) {}

    fn remote_error(&self) -> String {
        String::new()
    }
}

struct StubControl;

impl ClientControl for StubControl {
    fn send_message(&self, _msg: &str, _expected_reply: &str, _timeout: Duration) -> Result<()> {
        Ok(())
    }

    fn send_message_retry(&self, _msg: &str, _timeout: Duration, _retries: u32) -> Result<String> {
        Ok("0".to_string())
    }

    fn next_nonce(&self) -> u64 {
        4
    }

    fn protocol(&self) -> ProtocolInfo {
        ProtocolInfo {
            version: 3,
            file_meta: 0,
        }
    }
}

// ── Tree scaffolding ───────────────────────────────────────────────────────

struct Tree {
    _dir: tempfile::TempDir,
    root: PathBuf,
}

impl Tree {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().to_owned();
        for sub in ["cur/docs", "cur_hashes/docs", "last/docs", "last/.hashes/docs", "tmp"] {
            std::fs::create_dir_all(root.join(sub)).unwrap();
        }
        Self { _dir: dir, root }
    }

    fn config(&self) -> EngineConfig {
        EngineConfig {
            backup_path: self.root.join("cur"),
            backup_hash_path: self.root.join("cur_hashes"),
            last_backup_path: Some(self.root.join("last")),
            last_backup_complete_path: None,
            client_name: "it-client".into(),
            server_token: String::new(),
            hashed_transfer: true,
            save_incomplete_file: true,
            use_reflink: false,
            backup_id: 1,
            incremental: false,
            incremental_num: 0,
            max_queue_weight: 500,
        }
    }

    fn write_prior(&self, name: &str, body: &[u8]) {
        std::fs::write(self.root.join("last/docs").join(name), body).unwrap();
        let mut sidecar = Vec::new();
        skua_types::sidecar::build_sidecar(&mut std::io::Cursor::new(body), &mut sidecar).unwrap();
        std::fs::write(self.root.join("last/.hashes/docs").join(name), sidecar).unwrap();
    }

    fn engine(
        &self,
        full: ScriptedFull,
        chunked: Option<ScriptedChunked>,
    ) -> (DownloadEngine, crossbeam_channel::Receiver<Vec<u8>>) {
        let (tx, rx) = crossbeam_channel::unbounded::<Vec<u8>>();
        let temp: Arc<dyn TempStore> = Arc::new(DirTempStore::new(self.root.join("tmp")));
        let engine = DownloadEngine::new(
            self.config(),
            Box::new(full),
            chunked.map(|c| Box::new(c) as Box<dyn ChunkedTransfer>),
            Arc::new(StubControl),
            Box::new(tx) as Box<dyn HashSink>,
            temp,
        );
        (engine, rx)
    }
}

fn req(id: u64, name: &str, predicted_size: i64) -> DownloadRequest {
    DownloadRequest {
        id,
        remote_name: name.to_string(),
        short_name: name.to_string(),
        current_path: "docs".to_string(),
        os_path: "docs".to_string(),
        predicted_size,
        metadata: FileMetadata::default(),
        is_script: false,
        metadata_only: false,
    }
}

fn records(rx: &crossbeam_channel::Receiver<Vec<u8>>) -> Vec<HashRecord> {
    rx.try_iter()
        .map(|buf| HashRecord::decode(&buf).expect("malformed record"))
        .collect()
}

fn inode(path: &Path) -> u64 {
    #[cfg(unix)]
    {
        use std::os::unix::fs::MetadataExt;
        return std::fs::metadata(path).unwrap().ino();
    }
    #[cfg(not(unix))]
    {
        let _ = path;
        0
    }
}

// ── Scenarios ──────────────────────────────────────────────────────────────

#[test]
fn producers_feed_a_running_engine() {
    use rand::Rng;

    let tree = Tree::new();
    let full = ScriptedFull::default();
    let mut rng = rand::thread_rng();
    let mut total = 0i64;
    let mut sizes = Vec::new();
    for _ in 0..20 {
        let size = rng.gen_range(1..2048usize);
        full.push(TransferCode::Success, &vec![0xa5; size]);
        total += size as i64;
        sizes.push(size as i64);
    }
    let (mut engine, rx) = tree.engine(full, None);
    let handle = engine.handle();

    let feeder = {
        let handle = handle.clone();
        std::thread::spawn(move || {
            for (i, size) in sizes.into_iter().enumerate() {
                let id = i as u64 + 1;
                handle.enqueue_full(req(id, &format!("f{id}.bin"), size), false);
            }
            handle.enqueue_quit(false);
        })
    };

    let runner = std::thread::spawn(move || {
        engine.run().unwrap();
        engine
    });

    feeder.join().unwrap();
    let engine = runner.join().unwrap();

    assert!(engine.all_downloads_ok());
    assert_eq!(engine.max_ok_id(), 20);
    let recs = records(&rx);
    assert_eq!(recs.len(), 20);
    assert_eq!(recs.iter().map(|r| r.file_size).sum::<i64>(), total);
}

#[test]
fn partial_save_then_offline_drain() {
    let tree = Tree::new();
    let full = ScriptedFull::default();
    // First file dies mid-body; the engine goes offline and the second file
    // never touches the transport.
    full.push(TransferCode::Timeout, &[1u8; 50]);
    let (mut engine, rx) = tree.engine(full, None);
    let handle = engine.handle();

    handle.enqueue_full(req(1, "a.bin", 100), false);
    handle.enqueue_full(req(2, "b.bin", 100), false);
    handle.enqueue_quit(false);
    engine.run().unwrap();

    assert!(engine.is_download_partial(1));
    assert!(engine.is_download_ok(1));
    assert!(!engine.is_download_ok(2));
    assert!(!engine.all_downloads_ok());
    assert!(engine.is_offline());
    assert_eq!(engine.max_ok_id(), 1);

    let recs = records(&rx);
    assert_eq!(recs.len(), 1);
    assert_eq!(recs[0].file_size, 50);
}

#[test]
fn chunked_without_prior_becomes_a_full_download() {
    let tree = Tree::new();
    let full = ScriptedFull::default();
    full.push(TransferCode::Success, b"freshly downloaded");
    let chunked = ScriptedChunked::default();
    let (mut engine, rx) = tree.engine(full, Some(chunked));
    let handle = engine.handle();

    handle.enqueue_chunked(req(1, "brandnew.bin", 18));
    handle.enqueue_quit(false);
    engine.run().unwrap();

    assert!(engine.is_download_ok(1));
    assert_eq!(engine.max_ok_id(), 1);
    let recs = records(&rx);
    assert_eq!(recs.len(), 1);
    assert_eq!(std::fs::read(&recs[0].temp_path).unwrap(), b"freshly downloaded");
}

#[test]
fn base_dir_lost_links_the_prior_version_forward() {
    let tree = Tree::new();
    tree.write_prior("report.odt", b"last week's report");
    let full = ScriptedFull::default();
    let chunked = ScriptedChunked::default();
    chunked.push(TransferCode::BaseDirLost, b"", 0);
    let (mut engine, rx) = tree.engine(full, Some(chunked));
    let handle = engine.handle();

    handle.enqueue_chunked(req(7, "report.odt", 18));
    handle.enqueue_quit(false);
    engine.run().unwrap();

    assert!(engine.is_download_partial(7));
    assert_eq!(engine.max_ok_id(), 7);
    assert!(engine.is_offline());

    let dest = tree.root.join("cur/docs/report.odt");
    let prior = tree.root.join("last/docs/report.odt");
    assert_eq!(std::fs::read(&dest).unwrap(), b"last week's report");
    #[cfg(unix)]
    assert_eq!(inode(&dest), inode(&prior));
    assert_eq!(
        inode(&tree.root.join("cur_hashes/docs/report.odt")),
        inode(&tree.root.join("last/.hashes/docs/report.odt"))
    );

    // The prior's sidecar is reused in place: no hash record.
    assert!(records(&rx).is_empty());
}

#[test]
fn patched_download_feeds_the_hash_pipeline() {
    let tree = Tree::new();
    tree.write_prior("big.db", &[0u8; 4096]);
    let full = ScriptedFull::default();
    let chunked = ScriptedChunked::default();
    chunked.push(TransferCode::Success, b"delta-stream", 4096);
    let (mut engine, rx) = tree.engine(full, Some(chunked));
    let handle = engine.handle();

    handle.enqueue_chunked(req(3, "big.db", 4096));
    handle.enqueue_quit(false);
    engine.run().unwrap();

    assert!(engine.is_download_ok(3));
    let recs = records(&rx);
    assert_eq!(recs.len(), 1);
    assert_eq!(recs[0].file_size, 4096);
    assert_eq!(
        recs[0].old_file_path.as_deref(),
        Some(tree.root.join("last/docs/big.db").as_path())
    );
    assert!(recs[0].hashoutput_path.is_some());
}

#[test]
fn skip_resolves_every_queued_transfer() {
    let tree = Tree::new();
    let full = ScriptedFull::default();
    let (mut engine, _rx) = tree.engine(full, None);
    let handle = engine.handle();

    for id in 1..=5u64 {
        handle.enqueue_full(req(id, &format!("f{id}"), 8), false);
    }
    handle.enqueue_skip();
    handle.enqueue_quit(false);
    engine.run().unwrap();

    // Skip is head-inserted: it wins over all five queued transfers.
    for id in 1..=5u64 {
        assert!(!engine.is_download_ok(id));
        assert!(!engine.is_download_partial(id));
    }
    assert!(!engine.all_downloads_ok());
}
