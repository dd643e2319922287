use std::{
    fmt,
    future::Future,
    panic::Location,
    pin::Pin,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, OnceLock,
    },
    task::{Context, Poll, Waker},
};

use parking_lot::{Mutex, MutexGuard};

use super::{
    config_::ManagerConfig,
    contexts_::{Ticket, WakeList},
    level_::{LockLevel, LockMode},
    reader_::ReadFuture,
    snapshot_::ManagerSnapshot,
    trace_::{AcquireTrace, TraceSlots},
    writer_::WriteFuture,
};

/// Grants reader/writer access to lock levels.
///
/// Each level is an independent reader-writer lock with writer preference:
/// once a writer is waiting on a level, readers arriving later wait behind
/// it. Writers of one level are served in request order. Readers parked
/// behind writers are admitted together as soon as no writer is active or
/// pending.
///
/// The manager is shared through an `Arc`; the acquisition futures keep a
/// handle of their own.
pub struct LockManager {
    state_: Mutex<ManagerState>,
    capture_: AtomicBool,
    config_: ManagerConfig,
}

impl LockManager {
    pub fn new(config: ManagerConfig) -> Self {
        LockManager {
            state_: Mutex::new(ManagerState::new()),
            capture_: AtomicBool::new(config.debug_capture),
            config_: config,
        }
    }

    /// The process-wide manager, configured from the environment on first
    /// use.
    pub fn global() -> Arc<LockManager> {
        static GLOBAL: OnceLock<Arc<LockManager>> = OnceLock::new();
        GLOBAL
            .get_or_init(|| Arc::new(LockManager::new(ManagerConfig::from_env())))
            .clone()
    }

    #[inline(always)]
    pub fn config(&self) -> &ManagerConfig {
        &self.config_
    }

    /// Requests shared access to `level`.
    ///
    /// The returned future resolves once the level is held in read mode. The
    /// caller owns that hold and must give it back with `release_read`.
    ///
    /// # Examples
    ///
    /// ```
    /// # futures_lite::future::block_on(async {
    /// use std::sync::Arc;
    /// use asyncex_levellock::{LockLevel, LockManager};
    ///
    /// let manager = Arc::new(LockManager::default());
    /// let level = LockLevel::new(5).unwrap();
    /// manager.acquire_read(level).await;
    /// manager.acquire_read(level).await;
    /// assert_eq!(manager.snapshot().reader_count(level), 2);
    /// manager.release_read(level);
    /// manager.release_read(level);
    /// assert!(!manager.is_acquired(level));
    /// # })
    /// ```
    #[track_caller]
    pub fn acquire_read(self: &Arc<Self>, level: LockLevel) -> ReadFuture {
        let trace = self.capture_trace_(LockMode::Read, Location::caller());
        ReadFuture::new(self.clone(), level, trace)
    }

    /// Requests exclusive access to `level`.
    ///
    /// # Examples
    ///
    /// ```
    /// # futures_lite::future::block_on(async {
    /// use std::sync::Arc;
    /// use asyncex_levellock::{LockLevel, LockManager};
    ///
    /// let manager = Arc::new(LockManager::default());
    /// let level = LockLevel::new(3).unwrap();
    /// manager.acquire_write(level).await;
    /// assert!(!manager.try_acquire_read(level));
    /// manager.release_write(level);
    /// assert!(manager.try_acquire_read(level));
    /// manager.release_read(level);
    /// # })
    /// ```
    #[track_caller]
    pub fn acquire_write(self: &Arc<Self>, level: LockLevel) -> WriteFuture {
        let trace = self.capture_trace_(LockMode::Write, Location::caller());
        WriteFuture::new(self.clone(), level, trace)
    }

    pub(super) fn acquire_at_(
        self: &Arc<Self>,
        level: LockLevel,
        mode: LockMode,
        location: &'static Location<'static>,
    ) -> LevelFuture {
        let trace = self.capture_trace_(mode, location);
        match mode {
            LockMode::Read =>
                LevelFuture::Read(ReadFuture::new(self.clone(), level, trace)),
            LockMode::Write =>
                LevelFuture::Write(WriteFuture::new(self.clone(), level, trace)),
        }
    }

    /// Takes a read hold of `level` only if that needs no waiting.
    #[track_caller]
    pub fn try_acquire_read(&self, level: LockLevel) -> bool {
        self.try_acquire_at_(level, LockMode::Read, Location::caller())
    }

    /// Takes the write hold of `level` only if that needs no waiting.
    #[track_caller]
    pub fn try_acquire_write(&self, level: LockLevel) -> bool {
        self.try_acquire_at_(level, LockMode::Write, Location::caller())
    }

    pub(super) fn try_acquire_at_(
        &self,
        level: LockLevel,
        mode: LockMode,
        location: &'static Location<'static>,
    ) -> bool {
        let trace = self.capture_trace_(mode, location);
        let mut g = self.lock_state_();
        let capture = self.is_debug_capture_enabled();
        match mode {
            LockMode::Read => g.try_read_(level, trace, capture),
            LockMode::Write => g.try_write_(level, trace, capture),
        }
    }

    /// Gives back one read hold of `level`.
    ///
    /// When the last reader leaves, the level is handed to the first pending
    /// writer.
    pub fn release_read(&self, level: LockLevel) {
        let wakers = {
            let mut g = self.lock_state_();
            let capture = self.is_debug_capture_enabled();
            let s = g.level_mut(level);
            if s.reader_count_ == 0 {
                log::warn!("[LockManager::release_read] {level} has no reader");
                return;
            }
            s.reader_count_ -= 1;
            s.traces_.on_read_released();
            log::trace!(
                "[LockManager::release_read] {level} readers({})",
                s.reader_count_);
            s.dispatch_(level, capture)
        };
        wakers.into_iter().for_each(Waker::wake);
    }

    /// Gives back the write hold of `level`.
    ///
    /// The next pending writer takes over; without one, every pending reader
    /// is admitted at once.
    pub fn release_write(&self, level: LockLevel) {
        let wakers = {
            let mut g = self.lock_state_();
            let capture = self.is_debug_capture_enabled();
            let s = g.level_mut(level);
            if !s.writer_active_ {
                log::warn!("[LockManager::release_write] {level} has no writer");
                return;
            }
            s.writer_active_ = false;
            s.traces_.on_write_released();
            log::trace!("[LockManager::release_write] {level}");
            s.dispatch_(level, capture)
        };
        wakers.into_iter().for_each(Waker::wake);
    }

    pub(super) fn release_(&self, level: LockLevel, mode: LockMode) {
        match mode {
            LockMode::Read => self.release_read(level),
            LockMode::Write => self.release_write(level),
        }
    }

    /// Tests if `level` is held by any reader or by a writer.
    ///
    /// The answer may be out of date as soon as it is returned.
    pub fn is_acquired(&self, level: LockLevel) -> bool {
        let g = self.lock_state_();
        let s = g.level_(level);
        s.reader_count_ > 0 || s.writer_active_
    }

    /// A consistent copy of the state of every level.
    pub fn snapshot(&self) -> ManagerSnapshot {
        let g = self.lock_state_();
        let mut snapshot = ManagerSnapshot::default();
        for level in LockLevel::all() {
            let s = g.level_(level);
            snapshot.record_level_(
                level,
                s.reader_count_,
                s.writer_active_,
                s.pending_writers_.len(),
                s.pending_readers_.len(),
                s.traces_.writer(),
                s.traces_.readers(),
            );
        }
        snapshot
    }

    #[inline]
    pub fn is_debug_capture_enabled(&self) -> bool {
        self.capture_.load(Ordering::Acquire)
    }

    /// Switches call-site capture on or off. Switching it off drops every
    /// stored trace.
    pub fn set_debug_capture(&self, enabled: bool) {
        let mut g = self.lock_state_();
        self.capture_.store(enabled, Ordering::Release);
        if !enabled {
            g.levels_.iter_mut().for_each(|s| s.traces_.clear());
        }
        log::debug!("[LockManager::set_debug_capture] {enabled}");
    }

    fn capture_trace_(
        &self,
        mode: LockMode,
        location: &'static Location<'static>,
    ) -> Option<AcquireTrace> {
        if self.is_debug_capture_enabled() {
            Option::Some(AcquireTrace::capture(mode, location))
        } else {
            Option::None
        }
    }

    pub(super) fn lock_state_(&self) -> MutexGuard<'_, ManagerState> {
        self.state_.lock()
    }
}

impl Default for LockManager {
    fn default() -> Self {
        LockManager::new(ManagerConfig::default())
    }
}

impl fmt::Debug for LockManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockManager")
            .field("config", &self.config_)
            .field("debug_capture", &self.is_debug_capture_enabled())
            .field("state", &self.snapshot())
            .finish()
    }
}

/// The future of an acquisition in either mode.
#[derive(Debug)]
pub(super) enum LevelFuture {
    Read(ReadFuture),
    Write(WriteFuture),
}

impl Future for LevelFuture {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match self.get_mut() {
            LevelFuture::Read(f) => Pin::new(f).poll(cx),
            LevelFuture::Write(f) => Pin::new(f).poll(cx),
        }
    }
}

/// State of all levels, guarded by the manager mutex.
pub(super) struct ManagerState {
    levels_: Vec<LevelState>,
    next_ticket_: Ticket,
}

impl ManagerState {
    fn new() -> Self {
        ManagerState {
            levels_: (0..LockLevel::COUNT).map(|_| LevelState::default()).collect(),
            next_ticket_: 0,
        }
    }

    pub fn next_ticket(&mut self) -> Ticket {
        let t = self.next_ticket_;
        self.next_ticket_ += 1;
        t
    }

    #[inline]
    pub fn level_(&self, level: LockLevel) -> &LevelState {
        &self.levels_[level.index_()]
    }

    #[inline]
    pub fn level_mut(&mut self, level: LockLevel) -> &mut LevelState {
        &mut self.levels_[level.index_()]
    }

    fn try_read_(
        &mut self,
        level: LockLevel,
        trace: Option<AcquireTrace>,
        capture: bool,
    ) -> bool {
        let s = self.level_mut(level);
        if !s.admits_reader() {
            return false;
        }
        s.grant_read_(trace, capture);
        true
    }

    fn try_write_(
        &mut self,
        level: LockLevel,
        trace: Option<AcquireTrace>,
        capture: bool,
    ) -> bool {
        let s = self.level_mut(level);
        if !s.admits_writer() {
            return false;
        }
        s.grant_write_(trace, capture);
        true
    }
}

/// One level's reader-writer state and wait queues.
#[derive(Debug, Default)]
pub(super) struct LevelState {
    pub(super) reader_count_: usize,
    pub(super) writer_active_: bool,
    pub(super) pending_writers_: WakeList,
    pub(super) pending_readers_: WakeList,
    traces_: TraceSlots,
}

impl LevelState {
    /// A new reader may enter without waiting.
    #[inline]
    pub fn admits_reader(&self) -> bool {
        !self.writer_active_ && self.pending_writers_.is_empty()
    }

    /// A new writer may enter without waiting.
    #[inline]
    pub fn admits_writer(&self) -> bool {
        !self.writer_active_
            && self.reader_count_ == 0
            && self.pending_writers_.is_empty()
    }

    pub fn grant_read_(&mut self, trace: Option<AcquireTrace>, capture: bool) {
        debug_assert!(!self.writer_active_);
        self.reader_count_ += 1;
        if capture {
            self.traces_.on_read_granted(trace);
        }
    }

    pub fn grant_write_(&mut self, trace: Option<AcquireTrace>, capture: bool) {
        debug_assert!(!self.writer_active_ && self.reader_count_ == 0);
        self.writer_active_ = true;
        if capture {
            self.traces_.on_write_granted(trace);
        }
    }

    /// Hands the level to whoever may run next and returns their wakers.
    ///
    /// The granted contexts leave their queues here, with the counts already
    /// updated on their behalf.
    pub fn dispatch_(&mut self, level: LockLevel, capture: bool) -> Vec<Waker> {
        let mut wakers = Vec::new();
        if self.writer_active_ {
            return wakers;
        }
        if !self.pending_writers_.is_empty() {
            if self.reader_count_ > 0 {
                return wakers;
            }
            if let Option::Some(head) = self.pending_writers_.pop_head() {
                let ticket = head.ticket();
                let (waker, trace) = head.into_signal();
                self.grant_write_(trace, capture);
                log::trace!("[LevelState::dispatch_] {level} writer ticket({ticket})");
                wakers.extend(waker);
            }
            return wakers;
        }
        let n = self.pending_readers_.len();
        if n == 0 {
            return wakers;
        }
        let granted: Vec<_> = self.pending_readers_.drain_all().collect();
        for ctx in granted {
            let (waker, trace) = ctx.into_signal();
            self.grant_read_(trace, capture);
            wakers.extend(waker);
        }
        log::trace!("[LevelState::dispatch_] {level} {n} readers");
        wakers
    }
}
