//! 批量解码管理器测试

mod common;

use std::collections::HashMap;
use std::fs;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

use tempfile::tempdir;

use common::*;
use ncmdump::{BatchManager, DecodeJob, JobStatus, NcmError, ProgressEvent, SharedSink};

#[test]
fn wait_all_covers_more_jobs_than_workers() {
    let temp = tempdir().expect("create temp dir");
    let input_dir = temp.path().join("in");
    let out_dir = temp.path().join("out");

    let mut expected = HashMap::new();
    let mut inputs = Vec::new();
    for i in 0..8 {
        let plain = sample_audio(CHUNK * 2 + i * 97);
        let (path, syn) = write_synthetic(&input_dir, &format!("track{i}.ncm"), "mp3", &plain);
        expected.insert(format!("track{i}.mp3"), syn.plain_audio);
        inputs.push(path);
    }

    let manager = Arc::new(BatchManager::new(Some(2)).expect("manager"));
    assert_eq!(manager.threads(), 2);

    let watching = Arc::new(AtomicBool::new(true));
    let watcher = {
        let manager = Arc::clone(&manager);
        let watching = Arc::clone(&watching);
        thread::spawn(move || {
            while watching.load(Ordering::SeqCst) {
                let snap = manager.progress();
                assert!(snap.completed <= snap.submitted, "{snap:?}");
                thread::yield_now();
            }
        })
    };

    for input in &inputs {
        manager.submit(DecodeJob::new(input, &out_dir)).expect("submit");
    }
    manager.wait_all();

    watching.store(false, Ordering::SeqCst);
    watcher.join().expect("watcher thread");

    let snap = manager.progress();
    assert_eq!(snap.submitted, 8);
    assert_eq!(snap.completed, 8);
    assert_eq!(snap.files.len(), 8);
    assert!(snap.files.iter().all(|f| f.finished && f.status == JobStatus::Succeeded));

    for (name, plain) in expected {
        assert_eq!(fs::read(out_dir.join(&name)).expect("read output"), plain, "{name}");
    }
}

#[test]
fn stop_rejects_new_jobs_but_finishes_scheduled_ones() {
    let temp = tempdir().expect("create temp dir");
    let out_dir = temp.path().join("out");
    let manager = BatchManager::new(Some(1)).expect("manager");

    let mut inputs = Vec::new();
    for i in 0..3 {
        let (path, _) = write_synthetic(temp.path(), &format!("s{i}.ncm"), "flac", &sample_audio(CHUNK * 4));
        inputs.push(path);
    }

    manager.submit(DecodeJob::new(&inputs[0], &out_dir)).expect("submit");
    manager.submit(DecodeJob::new(&inputs[1], &out_dir)).expect("submit");
    manager.stop();
    assert!(manager.is_stopped());

    let err = manager
        .submit(DecodeJob::new(&inputs[2], &out_dir))
        .expect_err("submit after stop");
    assert!(matches!(err, NcmError::InvalidState(_)));

    manager.wait_all();
    let snap = manager.progress();
    assert_eq!(snap.submitted, 2);
    assert_eq!(snap.completed, 2);
    assert!(snap.files.iter().all(|f| f.success()));
    assert!(out_dir.join("s0.flac").exists());
    assert!(out_dir.join("s1.flac").exists());
    assert!(!out_dir.join("s2.flac").exists());
}

#[test]
fn zero_threads_is_invalid_state() {
    assert!(matches!(
        BatchManager::new(Some(0)),
        Err(NcmError::InvalidState(_))
    ));
    assert!(BatchManager::new(None).expect("default pool").threads() >= 1);
}

#[test]
fn failed_job_does_not_affect_siblings() {
    let temp = tempdir().expect("create temp dir");
    let out_dir = temp.path().join("out");
    let (good, _) = write_synthetic(temp.path(), "good.ncm", "mp3", &sample_audio(5000));
    let bad = temp.path().join("missing.ncm");
    let garbage = temp.path().join("garbage.ncm");
    fs::write(&garbage, b"not an ncm file at all").expect("write garbage");

    let manager = BatchManager::new(Some(3)).expect("manager");
    for input in [&bad, &good, &garbage] {
        manager.submit(DecodeJob::new(input, &out_dir)).expect("submit");
    }
    manager.wait_all();

    let snap = manager.progress();
    assert_eq!(snap.completed, 3);
    assert_eq!(snap.failed().count(), 2);

    let good_entry = snap.file(&good.to_string_lossy()).expect("good entry");
    assert_eq!(good_entry.status, JobStatus::Succeeded);
    assert_eq!(good_entry.format.as_deref(), Some("mp3"));
    assert_eq!(good_entry.output_path.as_deref(), Some(out_dir.join("good.mp3").as_path()));

    let bad_entry = snap.file(&bad.to_string_lossy()).expect("bad entry");
    assert_eq!(bad_entry.status, JobStatus::Failed);
    assert!(bad_entry.finished);
    assert!(bad_entry.error.is_some());

    // 按提交顺序枚举
    let order: Vec<&str> = snap.files.iter().map(|f| f.file.as_str()).collect();
    assert_eq!(
        order,
        vec![
            bad.to_str().unwrap(),
            good.to_str().unwrap(),
            garbage.to_str().unwrap()
        ]
    );
}

#[test]
fn user_sink_sees_one_terminal_event_per_job() {
    let temp = tempdir().expect("create temp dir");
    let out_dir = temp.path().join("out");

    let seen: Arc<Mutex<Vec<ProgressEvent>>> = Arc::default();
    let sink: SharedSink = {
        let seen = Arc::clone(&seen);
        Arc::new(move |e: &ProgressEvent| seen.lock().unwrap().push(e.clone()))
    };

    let manager = BatchManager::new(Some(2)).expect("manager");
    let mut files = Vec::new();
    for i in 0..4 {
        let (path, _) = write_synthetic(temp.path(), &format!("p{i}.ncm"), "mp3", &sample_audio(CHUNK + i));
        manager
            .submit(DecodeJob::new(&path, &out_dir).with_sink(Arc::clone(&sink)))
            .expect("submit");
        files.push(path.to_string_lossy().into_owned());
    }
    manager.wait_all();

    let seen = seen.lock().unwrap();
    for file in &files {
        let per_file: Vec<&ProgressEvent> = seen.iter().filter(|e| &e.file == file).collect();
        assert_eq!(per_file.iter().filter(|e| e.finished).count(), 1, "{file}");
        assert!(per_file.last().unwrap().finished);

        let entry = manager.progress();
        let entry = entry.file(file).expect("entry");
        assert_eq!(entry.bytes_done, entry.bytes_total);
    }
}

#[test]
fn reset_clears_state_and_allows_reuse() {
    let temp = tempdir().expect("create temp dir");
    let out_dir = temp.path().join("out");
    let (input, _) = write_synthetic(temp.path(), "r.ncm", "mp3", &sample_audio(100));

    let manager = BatchManager::new(Some(1)).expect("manager");
    manager.submit(DecodeJob::new(&input, &out_dir)).expect("submit");
    manager.stop();
    manager.wait_all();

    manager.reset().expect("reset after wait");
    let snap = manager.progress();
    assert_eq!(snap.submitted, 0);
    assert_eq!(snap.completed, 0);
    assert!(snap.files.is_empty());
    assert!(!manager.is_stopped());

    manager.submit(DecodeJob::new(&input, &out_dir)).expect("submit after reset");
    manager.wait_all();
    assert_eq!(manager.progress().completed, 1);
}

#[test]
fn wait_all_without_jobs_returns_immediately() {
    let manager = BatchManager::new(Some(1)).expect("manager");
    manager.wait_all();
    assert_eq!(manager.progress().submitted, 0);
}

#[test]
fn concurrent_submitters_are_all_counted() {
    let temp = tempdir().expect("create temp dir");
    let out_dir = temp.path().join("out");
    let manager = Arc::new(BatchManager::new(Some(4)).expect("manager"));

    let mut handles = Vec::new();
    for t in 0..4 {
        let manager = Arc::clone(&manager);
        let dir = temp.path().join(format!("t{t}"));
        let out_dir = out_dir.join(format!("t{t}"));
        handles.push(thread::spawn(move || {
            for i in 0..3 {
                let (path, _) = write_synthetic(&dir, &format!("c{i}.ncm"), "mp3", &sample_audio(2048));
                manager.submit(DecodeJob::new(path, &out_dir)).expect("submit");
            }
        }));
    }
    for h in handles {
        h.join().expect("submitter");
    }

    manager.wait_all();
    let snap = manager.progress();
    assert_eq!(snap.submitted, 12);
    assert_eq!(snap.completed, 12);
    assert_eq!(snap.failed().count(), 0);
}

#[test]
fn panicking_user_sink_keeps_job_successful() {
    let temp = tempdir().expect("create temp dir");
    let out_dir = temp.path().join("out");
    let (input, syn) = write_synthetic(temp.path(), "q.ncm", "flac", &sample_audio(CHUNK * 3));

    let sink: SharedSink = Arc::new(|e: &ProgressEvent| {
        if !e.finished {
            panic!("sink failure");
        }
    });

    let manager = BatchManager::new(Some(1)).expect("manager");
    manager
        .submit(DecodeJob::new(&input, &out_dir).with_sink(sink))
        .expect("submit");
    manager.wait_all();

    let snap = manager.progress();
    let entry = snap.file(&input.to_string_lossy()).expect("entry");
    assert_eq!(entry.status, JobStatus::Succeeded);
    assert!(entry.status.is_terminal());
    assert_eq!(entry.bytes_done, entry.bytes_total);
    assert_eq!(fs::read(out_dir.join("q.flac")).expect("read output"), syn.plain_audio);
}
