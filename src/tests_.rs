use std::sync::{
    atomic::{AtomicBool, AtomicUsize, Ordering},
    Arc,
};

use futures_lite::future::poll_once;

use super::*;

fn init_env_logger_() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn level_(n: u8) -> LockLevel {
    LockLevel::new(n).unwrap()
}

fn levels_(ctx: &LockContext) -> Vec<u8> {
    ctx.held_locks().iter().map(|e| e.level().get()).collect()
}

/// Scenario: two contexts request the write lock of the same level; the
/// second is granted only after the first gives it back.
#[tokio::test]
async fn second_writer_waits_for_first_release() {
    init_env_logger_();

    let manager = Arc::new(LockManager::default());
    let first = LockContext::new(manager.clone())
        .acquire_write(level_(3))
        .unwrap()
        .await;

    let mut second = LockContext::new(manager.clone())
        .acquire_write(level_(3))
        .unwrap();
    assert!(poll_once(&mut second).await.is_none());
    assert_eq!(manager.snapshot().pending_writer_depth(level_(3)), 1);
    assert!(poll_once(&mut second).await.is_none());

    let first = first.dispose();
    assert!(first.is_empty());
    let snapshot = manager.snapshot();
    assert!(snapshot.is_write_locked(level_(3)));
    assert_eq!(snapshot.pending_writer_depth(level_(3)), 0);

    let second = second.await;
    assert_eq!(second.lock_mode(level_(3)), Option::Some(LockMode::Write));
    drop(second);
    assert!(manager.snapshot().is_idle());
}

/// The same scenario across tasks of a multi-thread runtime.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn second_writer_task_resumes_after_first_task_releases() {
    init_env_logger_();

    let manager = Arc::new(LockManager::default());
    let (held_send, held_recv) = async_channel::bounded::<()>(1);
    let (exit_send, exit_recv) = async_channel::bounded::<()>(1);
    let released = Arc::new(AtomicBool::new(false));

    let m = manager.clone();
    let r = released.clone();
    let first = tokio::spawn(async move {
        let ctx = LockContext::new(m).acquire_write(level_(3)).unwrap().await;
        assert!(held_send.send(()).await.is_ok());
        assert!(exit_recv.recv().await.is_ok());
        r.store(true, Ordering::SeqCst);
        drop(ctx);
    });
    assert!(held_recv.recv().await.is_ok());

    let m = manager.clone();
    let r = released.clone();
    let second = tokio::spawn(async move {
        let ctx = LockContext::new(m).acquire_write(level_(3)).unwrap().await;
        assert!(r.load(Ordering::SeqCst));
        drop(ctx);
    });
    while manager.snapshot().pending_writer_depth(level_(3)) == 0 {
        tokio::task::yield_now().await;
    }
    assert!(exit_send.send(()).await.is_ok());

    assert!(first.await.is_ok());
    assert!(second.await.is_ok());
    assert!(manager.snapshot().is_idle());
}

/// Scenario: two readers of one level do not wait for each other.
#[tokio::test]
async fn concurrent_readers_share_a_level() {
    init_env_logger_();

    let manager = Arc::new(LockManager::default());
    let mut a = LockContext::new(manager.clone()).acquire_read(level_(5)).unwrap();
    let mut b = LockContext::new(manager.clone()).acquire_read(level_(5)).unwrap();
    let a = poll_once(&mut a).await.expect("first reader granted at once");
    let b = poll_once(&mut b).await.expect("second reader granted at once");
    assert_eq!(manager.snapshot().reader_count(level_(5)), 2);
    assert!(!manager.snapshot().is_write_locked(level_(5)));

    drop(a);
    assert_eq!(manager.snapshot().reader_count(level_(5)), 1);
    drop(b);
    assert!(manager.snapshot().is_idle());
}

/// Scenario: a reader holds the level, a writer queues behind it, then a
/// second reader arrives. The second reader runs only after the writer has
/// acquired and released.
#[tokio::test]
async fn queued_writer_blocks_later_readers() {
    init_env_logger_();

    let manager = Arc::new(LockManager::default());
    let reader1 = LockContext::new(manager.clone())
        .acquire_read(level_(5))
        .unwrap()
        .await;

    let mut writer = LockContext::new(manager.clone())
        .acquire_write(level_(5))
        .unwrap();
    assert!(poll_once(&mut writer).await.is_none());

    let mut reader2 = LockContext::new(manager.clone())
        .acquire_read(level_(5))
        .unwrap();
    assert!(poll_once(&mut reader2).await.is_none());
    let snapshot = manager.snapshot();
    assert_eq!(snapshot.reader_count(level_(5)), 1);
    assert_eq!(snapshot.pending_writer_depth(level_(5)), 1);
    assert_eq!(snapshot.pending_reader_depth(level_(5)), 1);

    drop(reader1);
    assert!(poll_once(&mut reader2).await.is_none());
    let writer = poll_once(&mut writer).await.expect("writer follows reader1");
    assert!(manager.snapshot().is_write_locked(level_(5)));
    assert!(poll_once(&mut reader2).await.is_none());

    drop(writer);
    let reader2 = poll_once(&mut reader2).await.expect("reader2 follows writer");
    assert_eq!(manager.snapshot().reader_count(level_(5)), 1);
    drop(reader2);
    assert!(manager.snapshot().is_idle());
}

/// Scenario: rolling a context holding [1, 3, 5] back to 3 keeps [1, 3] and
/// unblocks a pending acquirer of 5.
#[tokio::test]
async fn rollback_unblocks_pending_acquirer() {
    init_env_logger_();

    let manager = Arc::new(LockManager::default());
    let mut ctx = LockContext::new(manager.clone());
    for n in [1, 3, 5] {
        ctx = ctx.acquire_write(level_(n)).unwrap().await;
    }
    let mut pending = LockContext::new(manager.clone())
        .acquire_read(level_(5))
        .unwrap();
    assert!(poll_once(&mut pending).await.is_none());

    let ctx = ctx.rollback_to(level_(3)).unwrap();
    assert_eq!(levels_(&ctx), vec![1, 3]);
    let other = poll_once(&mut pending).await.expect("level 5 was released");
    assert_eq!(levels_(&other), vec![5]);

    let snapshot = manager.snapshot();
    assert!(snapshot.is_write_locked(level_(1)));
    assert!(snapshot.is_write_locked(level_(3)));
    assert_eq!(snapshot.reader_count(level_(5)), 1);
}

/// Scenario: releasing the middle entry of [1, 2, 3] leaves [1, 3].
#[tokio::test]
async fn release_of_middle_entry_keeps_neighbours() {
    init_env_logger_();

    let manager = Arc::new(LockManager::default());
    let mut ctx = LockContext::new(manager.clone());
    for n in [1, 2, 3] {
        ctx = ctx.acquire_read(level_(n)).unwrap().await;
    }
    let ctx = ctx.release_lock(level_(2)).unwrap();
    assert_eq!(levels_(&ctx), vec![1, 3]);
    let snapshot = manager.snapshot();
    assert_eq!(snapshot.reader_count(level_(1)), 1);
    assert_eq!(snapshot.reader_count(level_(2)), 0);
    assert_eq!(snapshot.reader_count(level_(3)), 1);
}

#[tokio::test]
async fn dispose_of_three_levels_leaves_no_residue() {
    init_env_logger_();

    let manager = Arc::new(LockManager::default());
    let mut ctx = LockContext::new(manager.clone());
    ctx = ctx.acquire_read(level_(2)).unwrap().await;
    ctx = ctx.acquire_write(level_(7)).unwrap().await;
    ctx = ctx.acquire_read(level_(11)).unwrap().await;
    let ctx = ctx.dispose();
    let snapshot = manager.snapshot();
    for n in [2, 7, 11] {
        assert!(snapshot.is_level_clear(level_(n)));
    }
    assert!(ctx.dispose().is_empty());
}

#[tokio::test]
async fn writers_are_granted_in_request_order() {
    init_env_logger_();

    let manager = Arc::new(LockManager::default());
    let holder = LockContext::new(manager.clone())
        .acquire_write(level_(4))
        .unwrap()
        .await;

    let mut queued = Vec::new();
    for _ in 0..3 {
        let mut f = LockContext::new(manager.clone())
            .acquire_write(level_(4))
            .unwrap();
        assert!(poll_once(&mut f).await.is_none());
        queued.push(f);
    }
    assert_eq!(manager.snapshot().pending_writer_depth(level_(4)), 3);

    drop(holder);
    for i in 0..queued.len() {
        for later in queued.iter_mut().skip(i + 1) {
            assert!(poll_once(later).await.is_none());
        }
        let granted = poll_once(&mut queued[i]).await.expect("head writer");
        assert_eq!(
            manager.snapshot().pending_writer_depth(level_(4)),
            queued.len() - i - 1,
        );
        drop(granted);
    }
    assert!(manager.snapshot().is_idle());
}

#[tokio::test]
async fn released_writer_admits_all_pending_readers_at_once() {
    init_env_logger_();

    let manager = Arc::new(LockManager::default());
    let writer = LockContext::new(manager.clone())
        .acquire_write(level_(6))
        .unwrap()
        .await;

    let mut readers = Vec::new();
    for _ in 0..4 {
        let mut f = LockContext::new(manager.clone())
            .acquire_read(level_(6))
            .unwrap();
        assert!(poll_once(&mut f).await.is_none());
        readers.push(f);
    }
    assert_eq!(manager.snapshot().pending_reader_depth(level_(6)), 4);

    drop(writer);
    let snapshot = manager.snapshot();
    assert_eq!(snapshot.reader_count(level_(6)), 4);
    assert_eq!(snapshot.pending_reader_depth(level_(6)), 0);

    let mut held = Vec::new();
    for f in readers.iter_mut() {
        held.push(poll_once(f).await.expect("batch admitted"));
    }
    drop(held);
    assert!(manager.snapshot().is_idle());
}

#[tokio::test]
async fn withdrawn_writer_lets_waiting_readers_in() {
    init_env_logger_();

    let manager = Arc::new(LockManager::default());
    let reader1 = LockContext::new(manager.clone())
        .acquire_read(level_(4))
        .unwrap()
        .await;
    let mut writer = LockContext::new(manager.clone())
        .acquire_write(level_(4))
        .unwrap();
    assert!(poll_once(&mut writer).await.is_none());
    let mut reader2 = LockContext::new(manager.clone())
        .acquire_read(level_(4))
        .unwrap();
    assert!(poll_once(&mut reader2).await.is_none());

    drop(writer);
    assert_eq!(manager.snapshot().pending_writer_depth(level_(4)), 0);
    let reader2 = poll_once(&mut reader2).await.expect("no writer ahead");
    assert_eq!(manager.snapshot().reader_count(level_(4)), 2);

    drop(reader1);
    drop(reader2);
    assert!(manager.snapshot().is_idle());
}

#[tokio::test]
async fn unobserved_grant_is_released_on_drop() {
    init_env_logger_();

    let manager = Arc::new(LockManager::default());
    manager.acquire_write(level_(7)).await;

    let mut writer = manager.acquire_write(level_(7));
    assert!(poll_once(&mut writer).await.is_none());
    let mut reader = manager.acquire_read(level_(7));
    assert!(poll_once(&mut reader).await.is_none());

    manager.release_write(level_(7));
    assert!(manager.snapshot().is_write_locked(level_(7)));

    drop(writer);
    let snapshot = manager.snapshot();
    assert!(!snapshot.is_write_locked(level_(7)));
    assert_eq!(snapshot.reader_count(level_(7)), 1);

    assert!(poll_once(&mut reader).await.is_some());
    manager.release_read(level_(7));
    assert!(manager.snapshot().is_idle());
}

#[tokio::test]
async fn debug_capture_tracks_holders() {
    init_env_logger_();

    let manager = Arc::new(LockManager::new(
        ManagerConfig::new().with_debug_capture(true)));
    assert!(manager.is_debug_capture_enabled());

    let line = line!() + 1;
    let writer = LockContext::new(manager.clone()).acquire_write(level_(2)).unwrap();
    let writer = writer.await;
    let snapshot = manager.snapshot();
    let trace = snapshot.writer_trace(level_(2)).expect("writer trace");
    assert_eq!(trace.mode(), LockMode::Write);
    assert_eq!(trace.location().file(), file!());
    assert_eq!(trace.location().line(), line);

    let r1 = LockContext::new(manager.clone()).acquire_read(level_(8)).unwrap().await;
    let r2 = LockContext::new(manager.clone()).acquire_read(level_(8)).unwrap().await;
    assert_eq!(manager.snapshot().reader_traces(level_(8)).len(), 2);
    drop(r1);
    assert_eq!(manager.snapshot().reader_traces(level_(8)).len(), 1);

    drop(writer);
    assert!(manager.snapshot().writer_trace(level_(2)).is_none());

    manager.set_debug_capture(false);
    assert!(manager.snapshot().reader_traces(level_(8)).is_empty());
    assert_eq!(manager.snapshot().reader_count(level_(8)), 1);
    drop(r2);
    assert!(manager.snapshot().is_idle());
}

#[tokio::test]
async fn queued_writer_trace_is_recorded_on_hand_off() {
    init_env_logger_();

    let manager = Arc::new(LockManager::new(
        ManagerConfig::new().with_debug_capture(true)));
    assert!(manager.try_acquire_write(level_(10)));

    let line = line!() + 1;
    let mut waiting = manager.acquire_write(level_(10));
    assert!(poll_once(&mut waiting).await.is_none());

    manager.release_write(level_(10));
    let snapshot = manager.snapshot();
    let trace = snapshot.writer_trace(level_(10)).expect("handed-off trace");
    assert_eq!(trace.location().line(), line);

    waiting.await;
    manager.release_write(level_(10));
    assert!(manager.snapshot().is_idle());
}

#[test]
fn capture_disabled_records_nothing() {
    let manager = LockManager::default();
    assert!(!manager.is_debug_capture_enabled());
    assert!(manager.try_acquire_write(level_(12)));
    assert!(manager.try_acquire_read(level_(13)));
    let snapshot = manager.snapshot();
    assert!(snapshot.writer_traces.is_empty());
    assert!(snapshot.reader_traces.is_empty());
    manager.release_write(level_(12));
    manager.release_read(level_(13));
}

#[test]
fn global_manager_is_shared() {
    let a = LockManager::global();
    let b = LockManager::global();
    assert!(Arc::ptr_eq(&a, &b));
}

struct LevelProbe {
    readers: AtomicUsize,
    writers: AtomicUsize,
}

/// Readers and writers of three levels hammer the manager from several
/// tasks; no reader ever overlaps a writer and writers never overlap.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn readers_and_writers_never_overlap() {
    init_env_logger_();

    const TASK_COUNT: usize = 8;
    const LOOP_COUNT: usize = 200;

    let manager = Arc::new(LockManager::default());
    let probes: Arc<Vec<LevelProbe>> = Arc::new(
        (0..3)
            .map(|_| LevelProbe {
                readers: AtomicUsize::new(0),
                writers: AtomicUsize::new(0),
            })
            .collect(),
    );

    let mut tasks = Vec::new();
    for t in 0..TASK_COUNT {
        let manager = manager.clone();
        let probes = probes.clone();
        tasks.push(tokio::spawn(async move {
            for i in 0..LOOP_COUNT {
                let p = (t + i) % 3;
                let level = level_(p as u8 + 1);
                let probe = &probes[p];
                let ctx = LockContext::new(manager.clone());
                if (t * 7 + i) % 4 == 0 {
                    let ctx = ctx.acquire_write(level).unwrap().await;
                    assert_eq!(probe.writers.fetch_add(1, Ordering::SeqCst), 0);
                    assert_eq!(probe.readers.load(Ordering::SeqCst), 0);
                    tokio::task::yield_now().await;
                    probe.writers.fetch_sub(1, Ordering::SeqCst);
                    drop(ctx);
                } else {
                    let ctx = ctx.acquire_read(level).unwrap().await;
                    probe.readers.fetch_add(1, Ordering::SeqCst);
                    assert_eq!(probe.writers.load(Ordering::SeqCst), 0);
                    tokio::task::yield_now().await;
                    probe.readers.fetch_sub(1, Ordering::SeqCst);
                    drop(ctx);
                }
            }
        }));
    }
    for task in tasks {
        assert!(task.await.is_ok());
    }
    assert!(manager.snapshot().is_idle());
}
