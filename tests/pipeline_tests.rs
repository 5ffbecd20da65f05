//! End-to-end runs of the coordinator. Worker and receiver processes are this crate's binary.

use dirmirage::pipeline::LogSink;
use dirmirage::walk::scan_source;
use dirmirage::{
    CancelToken, CaptureSink, LogRecord, Opts, ReceiverMode, RunOutcome, mirror_dir, verify,
};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

const JOIN_TIMEOUT: Duration = Duration::from_secs(10);

fn opts(num_workers: usize, receiver_mode: ReceiverMode) -> Opts {
    Opts {
        num_workers,
        receiver_mode,
        join_timeout: JOIN_TIMEOUT,
        worker_program: Some(PathBuf::from(env!("CARGO_BIN_EXE_dirmirage"))),
        ..Opts::default()
    }
}

fn make_tree(root: &Path, files: &[&str]) {
    for f in files {
        let p = root.join(f);
        fs::create_dir_all(p.parent().unwrap()).unwrap();
        fs::write(p, b"source content").unwrap();
    }
}

fn run_captured(src: &Path, dst: &Path, opts: &Opts) -> (RunOutcome, Vec<LogRecord>) {
    let sink = CaptureSink::new();
    let outcome = mirror_dir(src, dst, opts, &CancelToken::new(), Some(Box::new(sink.clone())))
        .unwrap();
    (outcome, sink.records())
}

fn count_messages(records: &[LogRecord], prefix: &str) -> usize {
    records
        .iter()
        .filter(|r| r.message.starts_with(prefix))
        .count()
}

fn assert_placeholders(dst: &Path, files: &[&str]) {
    for f in files {
        let len = fs::metadata(dst.join(f)).unwrap().len();
        assert_eq!(len, 1024, "{f}");
    }
}

fn mirror_three_files(mode: ReceiverMode) {
    let src = tempfile::tempdir().unwrap();
    let dst = tempfile::tempdir().unwrap();
    let files = ["a.txt", "sub/b.txt", "sub/deeper/c.txt"];
    make_tree(src.path(), &files);

    let (outcome, records) = run_captured(src.path(), dst.path(), &opts(2, mode));

    let RunOutcome::Completed(summary) = outcome else {
        panic!("expected completion, got {outcome:?}");
    };
    assert_eq!(summary.succeeded, 3);
    assert_eq!(summary.failed, 0);
    assert_placeholders(dst.path(), &files);
    assert!(
        verify::check(src.path(), dst.path(), &summary.succeeded_paths())
            .unwrap()
            .is_consistent()
    );

    assert_eq!(count_messages(&records, "created "), 3);
    assert_eq!(count_messages(&records, "worker 0 started (pid "), 1);
    assert_eq!(count_messages(&records, "worker 1 started (pid "), 1);
    assert_eq!(count_messages(&records, "finished: 3 created, 0 failed"), 1);
    // Each worker's records keep their own order.
    for id in 0..2 {
        let own: Vec<&LogRecord> = records.iter().filter(|r| r.worker_id == Some(id)).collect();
        assert!(own.first().unwrap().message.contains("started"));
        assert!(own.last().unwrap().message.contains("finished"));
    }
}

#[test]
fn test_mirror_thread_receiver() {
    mirror_three_files(ReceiverMode::Thread);
}

#[test]
fn test_mirror_process_receiver() {
    mirror_three_files(ReceiverMode::Process);
}

#[test]
fn test_empty_source() {
    let src = tempfile::tempdir().unwrap();
    let dst = tempfile::tempdir().unwrap();
    let target = dst.path().join("new/out");
    for mode in [ReceiverMode::Thread, ReceiverMode::Process] {
        let (outcome, records) = run_captured(src.path(), &target, &opts(3, mode));
        assert_eq!(outcome, RunOutcome::Completed(Default::default()));
        assert!(target.is_dir());
        assert_eq!(count_messages(&records, "created "), 0);
    }
}

#[test]
fn test_empty_directories_are_mirrored() {
    let src = tempfile::tempdir().unwrap();
    let dst = tempfile::tempdir().unwrap();
    fs::create_dir_all(src.path().join("x/y/z")).unwrap();
    make_tree(src.path(), &["x/f.txt"]);

    let (outcome, _) = run_captured(src.path(), dst.path(), &opts(1, ReceiverMode::Thread));
    assert_eq!(outcome.summary().succeeded, 1);
    assert!(dst.path().join("x/y/z").is_dir());
}

#[test]
fn test_rerun_overwrites_placeholders() {
    let src = tempfile::tempdir().unwrap();
    let dst = tempfile::tempdir().unwrap();
    let files = ["a.txt", "d/b.txt"];
    make_tree(src.path(), &files);

    let first = run_captured(src.path(), dst.path(), &opts(2, ReceiverMode::Thread)).0;
    fs::write(dst.path().join("a.txt"), vec![b'q'; 4096]).unwrap();
    let second = run_captured(src.path(), dst.path(), &opts(2, ReceiverMode::Process)).0;

    assert_eq!(first.summary().succeeded, 2);
    assert_eq!(second.summary().succeeded, 2);
    assert!(!second.is_cancelled());
    assert_placeholders(dst.path(), &files);
}

#[test]
fn test_single_worker_preserves_submission_order() {
    let src = tempfile::tempdir().unwrap();
    let dst = tempfile::tempdir().unwrap();
    make_tree(
        src.path(),
        &["b.txt", "a/2.txt", "a/1.txt", "c/d/e.txt", "z.txt"],
    );
    let submitted: Vec<PathBuf> = scan_source(src.path())
        .unwrap()
        .files
        .into_iter()
        .map(|t| t.relative_path)
        .collect();

    for mode in [ReceiverMode::Thread, ReceiverMode::Process] {
        let (outcome, _) = run_captured(src.path(), dst.path(), &opts(1, mode));
        assert_eq!(outcome.summary().arrivals, submitted);
    }
}

#[test]
fn test_failed_task_is_reported_not_fatal() {
    let src = tempfile::tempdir().unwrap();
    let dst = tempfile::tempdir().unwrap();
    make_tree(src.path(), &["a.txt", "b.txt"]);
    // A directory where the placeholder should go makes that one write fail.
    fs::create_dir_all(dst.path().join("a.txt")).unwrap();

    let (outcome, records) = run_captured(src.path(), dst.path(), &opts(2, ReceiverMode::Thread));
    let RunOutcome::Completed(summary) = outcome else {
        panic!("expected completion, got {outcome:?}");
    };
    assert_eq!(summary.succeeded, 1);
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.errors[0].0, PathBuf::from("a.txt"));
    assert_eq!(count_messages(&records, "failed a.txt: "), 1);
    assert_placeholders(dst.path(), &["b.txt"]);
}

#[test]
fn test_setup_failures() {
    let tmp = tempfile::tempdir().unwrap();
    let src = tmp.path().join("src");
    make_tree(&src, &["a.txt"]);
    let cancel = CancelToken::new();
    let o = opts(2, ReceiverMode::Thread);

    let missing = mirror_dir(&tmp.path().join("nope"), &tmp.path().join("out"), &o, &cancel, None);
    assert!(missing.unwrap_err().to_string().contains("does not exist"));

    let inside = mirror_dir(&src, &src.join("out"), &o, &cancel, None);
    assert!(inside.is_err());
    assert!(!src.join("out").exists());

    let zero = opts(0, ReceiverMode::Thread);
    assert!(mirror_dir(&src, &tmp.path().join("out"), &zero, &cancel, None).is_err());

    let mut bad_program = opts(2, ReceiverMode::Process);
    bad_program.worker_program = Some(tmp.path().join("no-such-program"));
    assert!(mirror_dir(&src, &tmp.path().join("out2"), &bad_program, &cancel, None).is_err());
}

#[test]
fn test_cancel_before_dispatch() {
    let src = tempfile::tempdir().unwrap();
    let dst = tempfile::tempdir().unwrap();
    make_tree(src.path(), &["a.txt", "b.txt", "c.txt"]);
    let cancel = CancelToken::new();
    cancel.cancel();

    for mode in [ReceiverMode::Thread, ReceiverMode::Process] {
        let started = Instant::now();
        let outcome = mirror_dir(src.path(), dst.path(), &opts(2, mode), &cancel, None).unwrap();
        assert!(outcome.is_cancelled());
        assert_eq!(outcome.summary().total(), 0);
        assert!(started.elapsed() < JOIN_TIMEOUT);
    }
}

#[test]
fn test_cancel_during_setup_builds_no_skeleton() {
    let src = tempfile::tempdir().unwrap();
    let dst = tempfile::tempdir().unwrap();
    make_tree(src.path(), &["a/x.txt", "b/c/y.txt"]);
    let cancel = CancelToken::new();
    cancel.cancel();

    let sink = CaptureSink::new();
    let outcome = mirror_dir(
        src.path(),
        dst.path(),
        &opts(2, ReceiverMode::Process),
        &cancel,
        Some(Box::new(sink.clone())),
    )
    .unwrap();
    assert_eq!(outcome, RunOutcome::Cancelled(Default::default()));
    assert!(!dst.path().join("a").exists());
    assert!(!dst.path().join("b").exists());
    // No worker was started.
    assert_eq!(count_messages(&sink.records(), "worker 0 started"), 0);
}

#[test]
fn test_library_caller_must_name_worker_program() {
    let src = tempfile::tempdir().unwrap();
    let dst = tempfile::tempdir().unwrap();
    make_tree(src.path(), &["a.txt"]);
    let mut o = opts(1, ReceiverMode::Thread);
    o.worker_program = None;

    // The current executable is this test harness, which has no worker role.
    let err = mirror_dir(src.path(), dst.path(), &o, &CancelToken::new(), None).unwrap_err();
    assert!(err.to_string().contains("Opts::worker_program"), "{err:#}");
    assert!(!dst.path().join("a.txt").exists());
}

#[cfg(target_os = "linux")]
fn non_utf8_name_is_mirrored(mode: ReceiverMode) {
    use std::ffi::OsStr;
    use std::os::unix::ffi::OsStrExt;

    let src = tempfile::tempdir().unwrap();
    let dst = tempfile::tempdir().unwrap();
    let odd = PathBuf::from(OsStr::from_bytes(b"a\xff.txt"));
    fs::write(src.path().join(&odd), b"x").unwrap();
    let files = ["b.txt", "c.txt", "d/e.txt", "d/f.txt", "g.txt"];
    make_tree(src.path(), &files);

    let (outcome, records) = run_captured(src.path(), dst.path(), &opts(1, mode));
    let RunOutcome::Completed(summary) = outcome else {
        panic!("expected completion, got {outcome:?}");
    };
    assert_eq!(summary.failed, 0, "{:?}", summary.errors);
    assert_eq!(summary.succeeded, 6);
    assert!(summary.arrivals.contains(&odd));
    assert_placeholders(dst.path(), &files);
    assert_eq!(fs::metadata(dst.path().join(&odd)).unwrap().len(), 1024);
    assert_eq!(count_messages(&records, "created "), 6);
}

#[cfg(target_os = "linux")]
#[test]
fn test_non_utf8_name_thread_receiver() {
    non_utf8_name_is_mirrored(ReceiverMode::Thread);
}

#[cfg(target_os = "linux")]
#[test]
fn test_non_utf8_name_process_receiver() {
    non_utf8_name_is_mirrored(ReceiverMode::Process);
}

/// A wrapper around the real binary whose worker processes matching the shell `case`
/// `pattern` (against "worker <id>") exit at once without reading their input.
#[cfg(unix)]
fn dying_worker_program(dir: &Path, pattern: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let script = dir.join("dying-worker.sh");
    let body = format!(
        "#!/bin/sh\ncase \"$1 $3\" in\n  {pattern}) exit 3 ;;\nesac\nexec \"{}\" \"$@\"\n",
        env!("CARGO_BIN_EXE_dirmirage")
    );
    fs::write(&script, body).unwrap();
    fs::set_permissions(&script, fs::Permissions::from_mode(0o755)).unwrap();
    script
}

/// Workers matching `pattern` die at start; the run must still complete in time with every
/// task accounted for.
#[cfg(unix)]
fn run_with_dying_workers(mode: ReceiverMode, pattern: &str) -> (usize, usize, Vec<LogRecord>) {
    let src = tempfile::tempdir().unwrap();
    let dst = tempfile::tempdir().unwrap();
    let bin = tempfile::tempdir().unwrap();
    let files = ["a.txt", "b/c.txt", "d.txt"];
    make_tree(src.path(), &files);

    let mut o = opts(2, mode);
    o.join_timeout = Duration::from_secs(5);
    o.worker_program = Some(dying_worker_program(bin.path(), pattern));

    let started = Instant::now();
    let (outcome, records) = run_captured(src.path(), dst.path(), &o);
    let elapsed = started.elapsed();

    let RunOutcome::Completed(summary) = outcome else {
        panic!("expected completion, got {outcome:?}");
    };
    assert!(elapsed < o.join_timeout, "took {elapsed:?}");
    assert_eq!(summary.total(), files.len(), "{summary:?}");
    assert_eq!(summary.failed, summary.errors.len());
    for path in summary.succeeded_paths() {
        assert_eq!(fs::metadata(dst.path().join(&path)).unwrap().len(), 1024);
    }
    (summary.succeeded, summary.failed, records)
}

#[cfg(unix)]
fn all_workers_die(mode: ReceiverMode) {
    let (succeeded, failed, records) = run_with_dying_workers(mode, "\"worker \"*");
    assert_eq!(succeeded, 0);
    assert_eq!(failed, 3);
    assert_eq!(
        count_messages(&records, "exited without acknowledging its sentinel"),
        2
    );
    assert_eq!(count_messages(&records, "finished: 0 created, 3 failed"), 1);
}

#[cfg(unix)]
#[test]
fn test_all_workers_die_thread_receiver() {
    all_workers_die(ReceiverMode::Thread);
}

#[cfg(unix)]
#[test]
fn test_all_workers_die_process_receiver() {
    all_workers_die(ReceiverMode::Process);
}

#[cfg(unix)]
#[test]
fn test_one_worker_dies_others_finish() {
    for mode in [ReceiverMode::Thread, ReceiverMode::Process] {
        let (succeeded, failed, records) = run_with_dying_workers(mode, "\"worker 0\"");
        assert_eq!(succeeded + failed, 3);
        assert_eq!(
            count_messages(&records, "exited without acknowledging its sentinel"),
            1
        );
        assert_eq!(count_messages(&records, "worker 1 started (pid "), 1);
    }
}

/// Cancels the run once it has seen `after` created files, and remembers every worker pid.
struct CancelAfter {
    cancel: CancelToken,
    after: usize,
    created: usize,
    pids: Arc<Mutex<Vec<u32>>>,
    inner: CaptureSink,
}

impl LogSink for CancelAfter {
    fn emit(&mut self, record: &LogRecord) {
        if record.message.starts_with("created ") {
            self.created += 1;
            if self.created == self.after {
                self.cancel.cancel();
            }
        }
        if let Some(pid) = parse_pid(&record.message) {
            self.pids.lock().unwrap().push(pid);
        }
        self.inner.emit(record);
    }
}

fn parse_pid(message: &str) -> Option<u32> {
    let start = message.find("(pid ")? + "(pid ".len();
    let end = start + message[start..].find(')')?;
    message[start..end].parse().ok()
}

fn cancel_mid_run(mode: ReceiverMode, file_count: usize) {
    let src = tempfile::tempdir().unwrap();
    let dst = tempfile::tempdir().unwrap();
    for i in 0..file_count {
        let dir = src.path().join(format!("d{:02}", i % 50));
        if i < 50 {
            fs::create_dir_all(&dir).unwrap();
        }
        fs::write(dir.join(format!("f{i:05}.txt")), b"x").unwrap();
    }

    let cancel = CancelToken::new();
    let pids = Arc::new(Mutex::new(Vec::new()));
    let capture = CaptureSink::new();
    let sink = CancelAfter {
        cancel: cancel.clone(),
        after: 100,
        created: 0,
        pids: Arc::clone(&pids),
        inner: capture.clone(),
    };

    let started = Instant::now();
    let outcome = mirror_dir(
        src.path(),
        dst.path(),
        &opts(4, mode),
        &cancel,
        Some(Box::new(sink)),
    )
    .unwrap();
    let elapsed = started.elapsed();

    assert!(outcome.is_cancelled(), "{:?}", outcome.summary().total());
    assert!(outcome.summary().total() < file_count);
    assert!(elapsed < JOIN_TIMEOUT * 3, "took {elapsed:?}");

    // Every reported success is really on disk.
    for path in outcome.summary().succeeded_paths() {
        assert_eq!(fs::metadata(dst.path().join(&path)).unwrap().len(), 1024);
    }

    let pids = pids.lock().unwrap().clone();
    assert_eq!(pids.len(), 4);
    #[cfg(target_os = "linux")]
    for pid in pids {
        let cmdline = fs::read(format!("/proc/{pid}/cmdline")).unwrap_or_default();
        let cmdline = String::from_utf8_lossy(&cmdline);
        assert!(
            !(cmdline.contains("dirmirage") && cmdline.contains("--dest")),
            "worker {pid} still running: {cmdline}"
        );
    }
    assert!(
        capture
            .records()
            .iter()
            .any(|r| r.message.starts_with("cancelled: "))
    );
}

#[test]
fn test_cancel_mid_run_thread_receiver() {
    cancel_mid_run(ReceiverMode::Thread, 3_000);
}

#[test]
fn test_cancel_mid_run_process_receiver_stress() {
    cancel_mid_run(ReceiverMode::Process, 10_000);
}
