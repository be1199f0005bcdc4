use skua_types::TransferCode;

use crate::testutil::{FullReply, Harness, HarnessOptions};

#[test]
fn happy_full_download() {
    let mut h = Harness::basic();
    h.full.push(FullReply::ok(b"0123456789"));

    let handle = h.engine.handle();
    handle.enqueue_full(h.req(1, "a.txt", 10), false);
    handle.enqueue_quit(false);
    h.engine.run().unwrap();

    assert!(h.engine.is_download_ok(1));
    assert!(!h.engine.is_download_partial(1));
    assert!(h.engine.all_downloads_ok());
    assert_eq!(h.engine.max_ok_id(), 1);
    assert!(!h.engine.is_offline());

    let recs = h.drain_records();
    assert_eq!(recs.len(), 1);
    let rec = &recs[0];
    assert_eq!(rec.file_size, 10);
    assert_eq!(rec.dest_path, h.dest_path("a.txt"));
    assert_eq!(rec.hash_dest_path, h.dest_hash_path("a.txt"));
    assert_eq!(rec.hashoutput_path, None);
    assert_eq!(rec.old_file_path, None);
    assert_eq!(rec.backup_id, 11);
    assert!(rec.incremental);
    // The body temp now belongs to the hashing pipeline.
    assert_eq!(std::fs::read(&rec.temp_path).unwrap(), b"0123456789");

    // Clean run with metadata streaming: end-of-stream notice sent.
    assert_eq!(h.full.stream_end_tokens().len(), 1);
}

#[test]
fn hash_mismatch_retries_then_succeeds() {
    let mut h = Harness::basic();
    h.full.push(FullReply::partial(TransferCode::Hash, b"garbage"));
    h.full.push(FullReply::code(TransferCode::Hash));
    h.full.push(FullReply::ok(b"decent!"));

    let handle = h.engine.handle();
    handle.enqueue_full(h.req(1, "a.txt", 7), false);
    handle.enqueue_quit(false);
    h.engine.run().unwrap();

    assert_eq!(h.full.calls().len(), 3);
    assert!(h.engine.is_download_ok(1));
    assert!(h.engine.all_downloads_ok());

    // The temp was rewound before each retry, so the kept body is the last
    // attempt's bytes.
    let recs = h.drain_records();
    assert_eq!(std::fs::read(&recs[0].temp_path).unwrap(), b"decent!");
}

#[test]
fn hash_mismatch_retries_are_bounded() {
    let mut h = Harness::basic();
    for _ in 0..8 {
        h.full.push(FullReply::code(TransferCode::Hash));
    }

    let handle = h.engine.handle();
    handle.enqueue_full(h.req(1, "a.txt", 7), false);
    handle.enqueue_quit(false);
    h.engine.run().unwrap();

    // Initial attempt plus five retries.
    assert_eq!(h.full.calls().len(), 6);
    assert!(!h.engine.is_download_ok(1));
    assert!(!h.engine.all_downloads_ok());
    // A hash mismatch is not an offline condition.
    assert!(!h.engine.is_offline());
    assert!(h.drain_records().is_empty());
}

#[test]
fn timeout_with_partial_body_is_saved() {
    let mut h = Harness::new(HarnessOptions {
        save_incomplete_file: true,
        ..Default::default()
    });
    h.full.push(FullReply::partial(TransferCode::Timeout, &[7u8; 50]));

    let handle = h.engine.handle();
    handle.enqueue_full(h.req(3, "big.bin", 100), false);
    handle.enqueue_quit(false);
    h.engine.run().unwrap();

    assert!(h.engine.is_download_partial(3));
    assert!(h.engine.is_download_ok(3), "partial is not a hard failure");
    assert_eq!(h.engine.max_ok_id(), 3);
    assert!(!h.engine.all_downloads_ok());
    assert!(h.engine.is_offline(), "timeout takes the transport offline");

    let recs = h.drain_records();
    assert_eq!(recs.len(), 1);
    assert_eq!(recs[0].file_size, 50);

    // Offline run: no metadata stream end notice.
    assert!(h.full.stream_end_tokens().is_empty());
}

#[test]
fn timeout_without_retention_drops_the_temp() {
    let mut h = Harness::basic(); // save_incomplete_file = false
    h.full.push(FullReply::partial(TransferCode::Timeout, &[7u8; 50]));

    let handle = h.engine.handle();
    handle.enqueue_full(h.req(3, "big.bin", 100), false);
    handle.enqueue_quit(false);
    h.engine.run().unwrap();

    assert!(!h.engine.is_download_ok(3));
    assert!(!h.engine.is_download_partial(3));
    assert!(h.drain_records().is_empty());
    assert!(h.leftover_temps().is_empty(), "failed temp must be deleted");
}

#[test]
fn empty_partial_body_is_not_retained() {
    let mut h = Harness::new(HarnessOptions {
        save_incomplete_file: true,
        ..Default::default()
    });
    h.full.push(FullReply::code(TransferCode::Timeout));

    let handle = h.engine.handle();
    handle.enqueue_full(h.req(1, "a.txt", 10), false);
    handle.enqueue_quit(false);
    h.engine.run().unwrap();

    assert!(!h.engine.is_download_ok(1));
    assert!(h.drain_records().is_empty());
    assert!(h.leftover_temps().is_empty());
}

#[test]
fn metadata_only_success_transfers_no_body() {
    let mut h = Harness::basic();
    h.full.push(FullReply::ok(b""));

    let mut req = h.req(4, "meta.txt", 0);
    req.metadata_only = true;
    let handle = h.engine.handle();
    handle.enqueue_full(req, false);
    handle.enqueue_quit(false);
    h.engine.run().unwrap();

    assert!(h.engine.is_download_ok(4));
    assert_eq!(h.engine.max_ok_id(), 4);
    assert!(h.drain_records().is_empty(), "no body, no hash record");
    assert!(h.leftover_temps().is_empty(), "no temp is even allocated");
}

#[test]
fn metadata_only_failure_is_recorded() {
    let mut h = Harness::basic();
    h.full.push(FullReply::code(TransferCode::Error));

    let mut req = h.req(4, "meta.txt", 0);
    req.metadata_only = true;
    let handle = h.engine.handle();
    handle.enqueue_full(req, false);
    handle.enqueue_quit(false);
    h.engine.run().unwrap();

    assert!(!h.engine.is_download_ok(4));
    assert!(!h.engine.all_downloads_ok());
    assert!(h.engine.is_offline());
}

#[test]
fn temp_allocation_failure_is_a_hard_failure() {
    let mut h = Harness::new(HarnessOptions {
        temp_budget: Some(0),
        ..Default::default()
    });

    let handle = h.engine.handle();
    handle.enqueue_full(h.req(1, "a.txt", 10), false);
    handle.enqueue_quit(false);
    h.engine.run().unwrap();

    assert!(h.full.calls().is_empty(), "no transfer is attempted");
    assert!(!h.engine.is_download_ok(1));
    assert!(h.engine.is_offline());
}

#[test]
fn reflink_hint_points_at_the_prior_copy() {
    let mut h = Harness::new(HarnessOptions {
        use_reflink: true,
        ..Default::default()
    });
    h.write_prior("a.txt", b"old body", false);
    h.full.push(FullReply::ok(b"new body"));

    let handle = h.engine.handle();
    handle.enqueue_full(h.req(1, "a.txt", 8), false);
    handle.enqueue_quit(false);
    h.engine.run().unwrap();

    let recs = h.drain_records();
    assert_eq!(recs[0].old_file_path.as_deref(), Some(h.prior_path("a.txt").as_path()));
}

#[test]
fn session_token_prefixes_the_remote_name() {
    let mut h = Harness::new(HarnessOptions {
        server_token: "tok123".into(),
        ..Default::default()
    });
    h.full.push(FullReply::ok(b"x"));

    let handle = h.engine.handle();
    handle.enqueue_full(h.req(1, "a.txt", 1), false);
    handle.enqueue_quit(false);
    h.engine.run().unwrap();

    assert_eq!(h.full.calls(), vec!["tok123|share/a.txt".to_string()]);
}

#[test]
fn script_success_logs_and_passes() {
    let mut h = Harness::basic();
    h.full.push(FullReply::ok(b"script body"));
    h.control.push_retry_reply(Ok("0 all good".to_string()));

    let mut req = h.req(1, "post.sh", 11);
    req.is_script = true;
    let handle = h.engine.handle();
    handle.enqueue_full(req, false);
    handle.enqueue_quit(false);
    h.engine.run().unwrap();

    assert!(!h.engine.is_offline());
    assert!(h.engine.is_download_ok(1));
    assert_eq!(h.drain_records().len(), 1);

    let calls = h.control.retry_calls();
    assert_eq!(calls.len(), 1);
    // Script remote names carry the wrapper, the incremental ordinal, and an
    // orchestrator nonce.
    assert!(calls[0].starts_with("SCRIPT STDERR SCRIPT|share/post.sh|2|"), "got {}", calls[0]);
}

#[test]
fn script_nonzero_exit_fails_the_item() {
    let mut h = Harness::basic();
    h.full.push(FullReply::ok(b"script body"));
    h.control.push_retry_reply(Ok("3 line1\nline2".to_string()));

    let mut req = h.req(1, "post.sh", 11);
    req.is_script = true;
    let handle = h.engine.handle();
    handle.enqueue_full(req, false);
    handle.enqueue_quit(false);
    h.engine.run().unwrap();

    // The transfer itself succeeded, so the body is still hashed and the id
    // counts as reached; the script failure takes the run offline.
    assert_eq!(h.engine.max_ok_id(), 1);
    assert_eq!(h.drain_records().len(), 1);
    assert!(h.engine.is_download_ok(1));
    assert!(h.engine.is_offline());
}

#[test]
fn script_empty_reply_fails_the_item() {
    let mut h = Harness::basic();
    h.full.push(FullReply::ok(b"script body"));
    h.control.push_retry_reply(Ok(String::new()));

    let mut req = h.req(1, "post.sh", 11);
    req.is_script = true;
    let handle = h.engine.handle();
    handle.enqueue_full(req, false);
    handle.enqueue_quit(false);
    h.engine.run().unwrap();

    assert!(h.engine.is_offline());
}
