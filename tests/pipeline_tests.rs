//! Pipeline tests: delivery, tiering, accurate mode, error policy, and shutdown, against MemoryStore.

use anyhow::Result;
use cloudfetch::consumer::{copy_task, read_task_to_vec};
use cloudfetch::pipeline::{NextTask, Orchestrator, PipelineStatus};
use cloudfetch::store::MemoryStore;
use cloudfetch::{FetchSummary, Opts, Task, TaskData, TaskType, fetch_all};
use std::collections::HashMap;
use std::io;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

const MIB: u64 = 1024 * 1024;
const LAST_RUN: i64 = 1_000;
const NEW: i64 = 2_000;
const OLD: i64 = 500;

fn test_opts() -> Opts {
    Opts {
        in_memory_threshold: MIB,
        prefetch_size: 100 * MIB,
        shutdown_timeout: Duration::from_secs(5),
        join_timeout: Duration::from_secs(1),
        poll_interval: Duration::from_millis(20),
        ..Default::default()
    }
}

/// What the consumer saw for one task.
#[derive(Debug)]
struct Seen {
    task_type: TaskType,
    bytes: Option<u64>,
    content: Option<Vec<u8>>,
}

/// Run the pipeline to completion, consuming every task. Content is kept for `Downloaded` tasks.
fn run(
    store: &MemoryStore,
    opts: &Opts,
    tmp: &Path,
) -> (Result<FetchSummary>, HashMap<String, Vec<Seen>>) {
    let mut seen: HashMap<String, Vec<Seen>> = HashMap::new();
    let result = fetch_all(Arc::new(store.clone()), opts, LAST_RUN, tmp, None, |task| {
        let key = task.object.key();
        let task_type = task.task_type();
        let (bytes, content) = if task_type == TaskType::Downloaded {
            let content = read_task_to_vec(task)?;
            (content.as_ref().map(|c| c.len() as u64), content)
        } else {
            (copy_task(task, &mut io::sink())?, None)
        };
        seen.entry(key).or_default().push(Seen {
            task_type,
            bytes,
            content,
        });
        Ok(())
    });
    (result, seen)
}

fn wait_final_status(orch: &mut Orchestrator) -> PipelineStatus {
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        let status = orch.check_messages();
        if status != PipelineStatus::Continue || Instant::now() >= deadline {
            return status;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
}

fn next_task_blocking(orch: &mut Orchestrator) -> Option<Task> {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        match orch.next_task_timeout(Duration::from_millis(50)) {
            NextTask::Task(task) => return Some(task),
            NextTask::Finished => return None,
            NextTask::Pending => {}
        }
    }
    None
}

// --- scenarios ---

#[test]
fn test_empty_store_finishes_with_no_tasks() -> Result<()> {
    let store = MemoryStore::new();
    store.add_bucket("empty-a").add_bucket("empty-b");
    let tmp = tempfile::tempdir()?;
    let mut orch = Orchestrator::start(test_opts(), Arc::new(store.clone()), LAST_RUN, tmp.path())?;

    assert!(next_task_blocking(&mut orch).is_none());
    assert!(matches!(orch.get_next_task(), NextTask::Finished));
    assert_eq!(wait_final_status(&mut orch), PipelineStatus::Success);

    let work_dir = orch.work_dir().to_path_buf();
    assert!(work_dir.exists());
    let report = orch.shutdown();
    assert!(report.all_ready);
    assert_eq!(report.detached_threads, 0);
    assert_eq!(report.discarded_discovery, 0);
    assert_eq!(report.discarded_download, 0);
    assert!(report.work_dir_removed);
    assert!(!work_dir.exists());
    Ok(())
}

#[test]
fn test_small_object_is_downloaded_in_memory() -> Result<()> {
    let store = MemoryStore::new();
    store.put("b", "small.txt", b"0123456789".to_vec(), NEW);
    let tmp = tempfile::tempdir()?;

    let (result, seen) = run(&store, &test_opts(), tmp.path());
    let summary = result?;
    assert_eq!(summary.delivered, 1);
    let tasks = &seen["b/small.txt"];
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].task_type, TaskType::Downloaded);
    assert_eq!(tasks[0].content, store.content_of("b", "small.txt"));
    assert_eq!(tasks[0].content.as_deref(), Some(&b"0123456789"[..]));
    Ok(())
}

#[test]
fn test_large_object_is_streamed_with_full_length() -> Result<()> {
    let store = MemoryStore::new();
    store.put_repeat("b", "big.bin", 0xAB, 200 * MIB, NEW);
    let tmp = tempfile::tempdir()?;

    let (result, seen) = run(&store, &test_opts(), tmp.path());
    result?;
    let tasks = &seen["b/big.bin"];
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].task_type, TaskType::Stream);
    assert_eq!(tasks[0].bytes, Some(200 * MIB));
    // No content was fetched by the worker; only the consumer opened the stream.
    assert_eq!(store.counters().streams_opened.load(Ordering::SeqCst), 1);
    assert_eq!(store.counters().downloads.load(Ordering::SeqCst), 0);
    Ok(())
}

#[test]
fn test_mid_size_object_goes_through_temp_file() -> Result<()> {
    let store = MemoryStore::new();
    store.put_repeat("b", "mid.bin", 7, 2 * MIB, NEW);
    let tmp = tempfile::tempdir()?;
    let mut orch = Orchestrator::start(test_opts(), Arc::new(store.clone()), LAST_RUN, tmp.path())?;

    let task = next_task_blocking(&mut orch).expect("one task");
    let path = match &task.data {
        TaskData::TempFile(path) => path.clone(),
        other => panic!("expected TempFile, got {:?}", other),
    };
    assert!(path.starts_with(orch.work_dir()));
    assert!(path.exists());

    assert_eq!(copy_task(task, &mut io::sink())?, Some(2 * MIB));
    assert!(!path.exists(), "consumer must delete the temp file");

    assert!(next_task_blocking(&mut orch).is_none());
    assert_eq!(wait_final_status(&mut orch), PipelineStatus::Success);
    let report = orch.shutdown();
    assert!(report.work_dir_removed);
    Ok(())
}

#[test]
fn test_accurate_mode_records_unchanged_without_fetching() -> Result<()> {
    let store = MemoryStore::new();
    store.put("b", "old.txt", b"unchanged".to_vec(), OLD);
    let tmp = tempfile::tempdir()?;
    let opts = Opts {
        accurate: true,
        ..test_opts()
    };

    let (result, seen) = run(&store, &opts, tmp.path());
    let summary = result?;
    assert_eq!(summary.count(TaskType::Accurate), 1);
    let tasks = &seen["b/old.txt"];
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].task_type, TaskType::Accurate);
    assert_eq!(tasks[0].bytes, None);
    assert_eq!(store.counters().get_object.load(Ordering::SeqCst), 0);
    assert_eq!(store.counters().streams_opened.load(Ordering::SeqCst), 0);
    assert_eq!(store.counters().downloads.load(Ordering::SeqCst), 0);
    Ok(())
}

#[test]
fn test_unchanged_objects_skipped_without_accurate_mode() -> Result<()> {
    let store = MemoryStore::new();
    store.put("b", "old.txt", b"unchanged".to_vec(), OLD);
    store.put("b", "at-last-run.txt", b"edge".to_vec(), LAST_RUN);
    store.put("b", "new.txt", b"changed".to_vec(), NEW);
    let tmp = tempfile::tempdir()?;

    let (result, seen) = run(&store, &test_opts(), tmp.path());
    let summary = result?;
    assert_eq!(summary.delivered, 1);
    assert!(seen.contains_key("b/new.txt"));
    assert!(!seen.contains_key("b/old.txt"));
    assert!(!seen.contains_key("b/at-last-run.txt"));
    Ok(())
}

#[test]
fn test_missing_object_skipped_when_not_fail_fast() -> Result<()> {
    let store = MemoryStore::new();
    store.put("b", "a-missing", b"gone".to_vec(), NEW);
    store.put("b", "b-present", b"here".to_vec(), NEW);
    store.mark_missing("b", "a-missing");
    let tmp = tempfile::tempdir()?;

    let (result, seen) = run(&store, &test_opts(), tmp.path());
    let summary = result?;
    assert_eq!(summary.delivered, 1);
    assert_eq!(summary.errors, 1);
    assert!(seen.contains_key("b/b-present"));
    assert!(!seen.contains_key("b/a-missing"));
    Ok(())
}

#[test]
fn test_missing_object_aborts_when_fail_fast() -> Result<()> {
    let store = MemoryStore::new();
    store.put("b", "a-missing", b"gone".to_vec(), NEW);
    store.put("b", "b-present", b"here".to_vec(), NEW);
    store.mark_missing("b", "a-missing");
    let tmp = tempfile::tempdir()?;
    let opts = Opts {
        fail_on_download_error: true,
        ..test_opts()
    };

    let (result, seen) = run(&store, &opts, tmp.path());
    let err = result.expect_err("fail-fast must abort");
    assert!(format!("{err:#}").contains("aborted"), "{err:#}");
    assert!(seen.is_empty());
    Ok(())
}

#[test]
fn test_fail_fast_reports_abort_status() -> Result<()> {
    let store = MemoryStore::new();
    store.put("b", "missing", b"x".to_vec(), NEW);
    store.mark_missing("b", "missing");
    let tmp = tempfile::tempdir()?;
    let opts = Opts {
        fail_on_download_error: true,
        ..test_opts()
    };
    let mut orch = Orchestrator::start(opts, Arc::new(store.clone()), LAST_RUN, tmp.path())?;

    match wait_final_status(&mut orch) {
        PipelineStatus::Abort(text) => assert!(text.contains("b/missing"), "{text}"),
        other => panic!("expected abort, got {:?}", other),
    }
    assert_eq!(orch.stats().errors, 1);
    let report = orch.shutdown();
    assert_eq!(report.detached_threads, 0);
    Ok(())
}

#[test]
fn test_abort_stops_delivery_with_many_workers() -> Result<()> {
    let store = MemoryStore::new();
    store.put("b", "a-missing", b"gone".to_vec(), NEW);
    store.mark_missing("b", "a-missing");
    for i in 0..200 {
        store.put("b", &format!("obj-{i:03}"), b"payload".to_vec(), NEW);
    }
    let tmp = tempfile::tempdir()?;
    let opts = Opts {
        nb_worker: 4,
        queue_size: 50,
        fail_on_download_error: true,
        ..test_opts()
    };
    let mut orch = Orchestrator::start(opts, Arc::new(store.clone()), LAST_RUN, tmp.path())?;

    // Let good tasks pile up in the download queue while the abort comes in.
    assert!(matches!(wait_final_status(&mut orch), PipelineStatus::Abort(_)));
    std::thread::sleep(Duration::from_millis(200));

    assert!(orch.is_aborted());
    assert!(matches!(orch.get_next_task(), NextTask::Finished));
    assert!(matches!(
        orch.next_task_timeout(Duration::from_millis(50)),
        NextTask::Finished
    ));
    assert_eq!(orch.stats().delivered, 0);

    // The abort cancelled the pool, so every thread is already done.
    let report = orch.shutdown();
    assert!(report.all_ready);
    assert_eq!(report.detached_threads, 0);
    Ok(())
}

#[test]
fn test_fail_fast_with_many_workers_hands_nothing_to_consumer() -> Result<()> {
    let store = MemoryStore::new();
    store.put("b", "a-missing", b"gone".to_vec(), NEW);
    store.mark_missing("b", "a-missing");
    for i in 0..40 {
        let name = format!("obj-{i:02}");
        store.put("b", &name, b"payload".to_vec(), NEW);
        // Good objects only become ready well after the missing one has failed.
        store.delay_object("b", &name, Duration::from_millis(300));
    }
    let tmp = tempfile::tempdir()?;
    let opts = Opts {
        nb_worker: 4,
        fail_on_download_error: true,
        ..test_opts()
    };

    let (result, seen) = run(&store, &opts, tmp.path());
    let err = result.expect_err("fail-fast must abort");
    assert!(format!("{err:#}").contains("aborted"), "{err:#}");
    assert!(seen.is_empty(), "{:?}", seen.keys().collect::<Vec<_>>());
    // Cancelled workers stopped fetching after their in-flight call.
    assert!(store.counters().get_object.load(Ordering::SeqCst) <= 5);
    Ok(())
}

// --- properties ---

#[test]
fn test_exactly_once_delivery_under_backpressure() -> Result<()> {
    let store = MemoryStore::new();
    let mut expected = Vec::new();
    for bucket in ["alpha", "beta", "gamma"] {
        for i in 0..60 {
            let name = format!("obj-{i:03}");
            let len = (i % 7) as u64 * 10;
            store.put_repeat(bucket, &name, i as u8, len, NEW + i as i64);
            expected.push(format!("{bucket}/{name}"));
        }
    }
    let tmp = tempfile::tempdir()?;
    let opts = Opts {
        nb_worker: 4,
        queue_size: 3,
        in_memory_threshold: 20,
        prefetch_size: 50,
        ..test_opts()
    };

    let (result, seen) = run(&store, &opts, tmp.path());
    let summary = result?;
    assert_eq!(summary.delivered, expected.len());
    assert_eq!(seen.len(), expected.len());
    for key in &expected {
        assert_eq!(seen[key].len(), 1, "{key} delivered more than once");
    }
    assert!(summary.shutdown.work_dir_removed);
    Ok(())
}

#[test]
fn test_tiering_is_independent_of_worker_count() -> Result<()> {
    let sizes = [
        (0_u64, TaskType::Downloaded),
        (9, TaskType::Downloaded),
        (10, TaskType::TempFile),
        (19, TaskType::TempFile),
        (20, TaskType::Stream),
        (64, TaskType::Stream),
    ];
    for workers in [1, 3] {
        let store = MemoryStore::new();
        for (size, _) in sizes {
            store.put_repeat("b", &format!("size-{size}"), 1, size, NEW);
        }
        let tmp = tempfile::tempdir()?;
        let opts = Opts {
            nb_worker: workers,
            in_memory_threshold: 10,
            prefetch_size: 20,
            ..test_opts()
        };
        let (result, seen) = run(&store, &opts, tmp.path());
        result?;
        for (size, tier) in sizes {
            let tasks = &seen[&format!("b/size-{size}")];
            assert_eq!(tasks.len(), 1);
            assert_eq!(tasks[0].task_type, tier, "size {size} with {workers} workers");
            assert_eq!(tasks[0].bytes, Some(size));
        }
    }
    Ok(())
}

#[test]
fn test_short_read_in_memory_is_object_error() -> Result<()> {
    let store = MemoryStore::new();
    store.put("b", "short", b"truncated".to_vec(), NEW);
    store.mark_short_read("b", "short");
    store.put("b", "whole", b"complete".to_vec(), NEW);
    let tmp = tempfile::tempdir()?;

    let (result, seen) = run(&store, &test_opts(), tmp.path());
    let summary = result?;
    assert_eq!(summary.errors, 1);
    assert!(!seen.contains_key("b/short"));
    assert!(seen.contains_key("b/whole"));
    Ok(())
}

#[test]
fn test_short_stream_fails_in_consumer() -> Result<()> {
    let store = MemoryStore::new();
    store.put_repeat("b", "short-stream", 3, 64, NEW);
    store.mark_short_read("b", "short-stream");
    let tmp = tempfile::tempdir()?;
    let opts = Opts {
        in_memory_threshold: 8,
        prefetch_size: 16,
        ..test_opts()
    };
    let mut orch = Orchestrator::start(opts, Arc::new(store.clone()), LAST_RUN, tmp.path())?;

    let task = next_task_blocking(&mut orch).expect("one task");
    assert_eq!(task.task_type(), TaskType::Stream);
    let err = copy_task(task, &mut io::sink()).expect_err("length mismatch");
    assert!(format!("{err:#}").contains("stream length mismatch"), "{err:#}");
    orch.shutdown();
    Ok(())
}

#[test]
fn test_connect_failure_aborts_pipeline() -> Result<()> {
    let store = MemoryStore::new();
    store.put("b", "x", b"x".to_vec(), NEW);
    store.refuse_connections();
    let tmp = tempfile::tempdir()?;

    let (result, seen) = run(&store, &test_opts(), tmp.path());
    let err = result.expect_err("connect failure is fatal");
    assert!(format!("{err:#}").contains("connect"), "{err:#}");
    assert!(seen.is_empty());
    Ok(())
}

#[test]
fn test_bucket_listing_error_skips_bucket() -> Result<()> {
    let store = MemoryStore::new();
    store.put("bad", "x", b"x".to_vec(), NEW);
    store.put("good", "y", b"y".to_vec(), NEW);
    store.fail_listing("bad");
    let tmp = tempfile::tempdir()?;

    let (result, seen) = run(&store, &test_opts(), tmp.path());
    let summary = result?;
    assert_eq!(summary.delivered, 1);
    assert_eq!(summary.errors, 1);
    assert!(seen.contains_key("good/y"));

    let opts = Opts {
        fail_on_download_error: true,
        ..test_opts()
    };
    let (result, _) = run(&store, &opts, tmp.path());
    assert!(result.is_err());
    Ok(())
}

#[test]
fn test_bucket_filters() -> Result<()> {
    let store = MemoryStore::new();
    store.put("logs-2024", "a", b"a".to_vec(), NEW);
    store.put("logs-old", "b", b"b".to_vec(), NEW);
    store.put("media", "c", b"c".to_vec(), NEW);
    let tmp = tempfile::tempdir()?;
    let opts = Opts {
        buckets_include: vec!["logs-*".to_string()],
        buckets_exclude: vec!["logs-old".to_string()],
        ..test_opts()
    };

    let (result, seen) = run(&store, &opts, tmp.path());
    result?;
    assert_eq!(seen.len(), 1);
    assert!(seen.contains_key("logs-2024/a"));
    assert_eq!(store.counters().listings.load(Ordering::SeqCst), 1);
    Ok(())
}

#[test]
fn test_invalid_options_rejected_before_start() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    let opts = Opts {
        in_memory_threshold: 100,
        prefetch_size: 10,
        ..test_opts()
    };
    let res = Orchestrator::start(opts, Arc::new(MemoryStore::new()), 0, tmp.path());
    assert!(res.is_err());
    assert_eq!(std::fs::read_dir(tmp.path())?.count(), 0);
    Ok(())
}

// --- shutdown ---

#[test]
fn test_shutdown_with_full_queues_cleans_up() -> Result<()> {
    let store = MemoryStore::new();
    for i in 0..50 {
        store.put_repeat("b", &format!("obj-{i:02}"), 1, 32, NEW);
    }
    let tmp = tempfile::tempdir()?;
    let opts = Opts {
        nb_worker: 2,
        queue_size: 2,
        in_memory_threshold: 16,
        prefetch_size: 1024,
        ..test_opts()
    };
    let mut orch = Orchestrator::start(opts, Arc::new(store.clone()), LAST_RUN, tmp.path())?;
    // Let the queues fill without consuming anything.
    std::thread::sleep(Duration::from_millis(200));
    let work_dir = orch.work_dir().to_path_buf();

    let started = Instant::now();
    let report = orch.shutdown();
    assert!(started.elapsed() < Duration::from_secs(3));
    assert!(report.all_ready);
    assert_eq!(report.detached_threads, 0);
    assert!(report.discarded_download > 0);
    assert!(!work_dir.exists());
    assert!(matches!(orch.get_next_task(), NextTask::Finished));
    Ok(())
}

#[test]
fn test_shutdown_is_bounded_with_stuck_worker() -> Result<()> {
    let store = MemoryStore::new();
    store.put("b", "slow", b"slow".to_vec(), NEW);
    store.delay_get_object(Duration::from_secs(3));
    let tmp = tempfile::tempdir()?;
    let opts = Opts {
        shutdown_timeout: Duration::from_millis(300),
        join_timeout: Duration::from_millis(100),
        ..test_opts()
    };
    let mut orch = Orchestrator::start(opts, Arc::new(store.clone()), LAST_RUN, tmp.path())?;
    let deadline = Instant::now() + Duration::from_secs(2);
    while store.counters().get_object.load(Ordering::SeqCst) == 0 && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(10));
    }
    let work_dir = orch.work_dir().to_path_buf();

    let started = Instant::now();
    let report = orch.shutdown();
    assert!(started.elapsed() < Duration::from_secs(2), "{:?}", started.elapsed());
    assert!(!report.all_ready);
    assert_eq!(report.detached_threads, 1);
    assert!(!work_dir.exists());
    Ok(())
}

#[test]
fn test_shutdown_join_deadline_is_shared_by_stuck_workers() -> Result<()> {
    let store = MemoryStore::new();
    for i in 0..4 {
        store.put("b", &format!("slow-{i}"), b"slow".to_vec(), NEW);
    }
    store.delay_get_object(Duration::from_secs(5));
    let tmp = tempfile::tempdir()?;
    let opts = Opts {
        nb_worker: 4,
        shutdown_timeout: Duration::from_millis(200),
        join_timeout: Duration::from_millis(500),
        ..test_opts()
    };
    let mut orch = Orchestrator::start(opts, Arc::new(store.clone()), LAST_RUN, tmp.path())?;
    let deadline = Instant::now() + Duration::from_secs(3);
    while store.counters().get_object.load(Ordering::SeqCst) < 4 && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(10));
    }
    assert_eq!(store.counters().get_object.load(Ordering::SeqCst), 4);

    let started = Instant::now();
    let report = orch.shutdown();
    // One join window for all four, not one each.
    assert!(started.elapsed() < Duration::from_millis(1500), "{:?}", started.elapsed());
    assert_eq!(report.detached_threads, 4);
    assert!(report.work_dir_removed);
    Ok(())
}

#[test]
fn test_shutdown_is_idempotent_and_runs_on_drop() -> Result<()> {
    let store = MemoryStore::new();
    store.put("b", "x", b"x".to_vec(), NEW);
    let tmp = tempfile::tempdir()?;

    let mut orch = Orchestrator::start(test_opts(), Arc::new(store.clone()), LAST_RUN, tmp.path())?;
    let first = orch.shutdown();
    let second = orch.shutdown();
    assert!(first.work_dir_removed);
    assert!(second.work_dir_removed);
    assert_eq!(second.detached_threads, 0);

    let orch = Orchestrator::start(test_opts(), Arc::new(store.clone()), LAST_RUN, tmp.path())?;
    let work_dir = orch.work_dir().to_path_buf();
    drop(orch);
    assert!(!work_dir.exists());
    Ok(())
}

#[test]
fn test_cancel_flag_stops_fetch() -> Result<()> {
    let store = MemoryStore::new();
    for i in 0..20 {
        store.put("b", &format!("obj-{i}"), b"x".to_vec(), NEW);
    }
    let tmp = tempfile::tempdir()?;
    let cancel = AtomicBool::new(false);
    let mut delivered = 0;
    let summary = fetch_all(
        Arc::new(store.clone()),
        &test_opts(),
        LAST_RUN,
        tmp.path(),
        Some(&cancel),
        |task| {
            delivered += 1;
            copy_task(task, &mut io::sink())?;
            cancel.store(true, Ordering::Relaxed);
            Ok(())
        },
    )?;
    assert!(summary.cancelled);
    assert_eq!(delivered, 1);
    assert!(summary.shutdown.work_dir_removed);
    Ok(())
}
