use core::{
    fmt,
    future::Future,
    pin::Pin,
    task::{Context, Poll},
};
use std::{
    panic::{self, AssertUnwindSafe, Location},
    sync::Arc,
};

use super::{
    config_::OrderingPolicy,
    error_::{ContextError, LockError},
    level_::{HeldEntry, LockLevel, LockMode},
    manager_::{LevelFuture, LockManager},
};

/// The levels held by one logical call chain.
///
/// A context is a value: every operation that changes what it holds takes
/// the context by value and hands back its successor, so a context can
/// never be used again once it has produced one. Rejected operations return
/// the untouched context inside `ContextError`.
///
/// Dropping a context releases everything it still holds, exactly like
/// `dispose`.
///
/// # Examples
///
/// ```
/// # futures_lite::future::block_on(async {
/// use std::sync::Arc;
/// use asyncex_levellock::{LockContext, LockLevel, LockManager};
///
/// let manager = Arc::new(LockManager::default());
/// let l1 = LockLevel::new(1).unwrap();
/// let l3 = LockLevel::new(3).unwrap();
///
/// let ctx = LockContext::new(manager.clone());
/// let ctx = ctx.acquire_read(l1).unwrap().await;
/// let ctx = ctx.acquire_write(l3).unwrap().await;
/// assert_eq!(ctx.max_held_lock(), Some(l3));
///
/// let ctx = ctx.rollback_to(l1).unwrap();
/// assert!(!ctx.has_lock(l3));
///
/// let ctx = ctx.dispose();
/// assert!(ctx.is_empty());
/// assert!(manager.snapshot().is_idle());
/// # })
/// ```
pub struct LockContext {
    manager_: Arc<LockManager>,
    policy_: OrderingPolicy,
    held_: Vec<HeldEntry>,
}

impl LockContext {
    /// Creates an empty context using the manager's configured ordering
    /// policy.
    pub fn new(manager: Arc<LockManager>) -> Self {
        let policy = manager.config().ordering;
        LockContext::with_policy(manager, policy)
    }

    pub fn with_policy(manager: Arc<LockManager>, policy: OrderingPolicy) -> Self {
        LockContext {
            manager_: manager,
            policy_: policy,
            held_: Vec::with_capacity(LockLevel::COUNT),
        }
    }

    #[inline(always)]
    pub fn manager(&self) -> &Arc<LockManager> {
        &self.manager_
    }

    #[inline(always)]
    pub fn policy(&self) -> OrderingPolicy {
        self.policy_
    }

    /// Requests `level` in read mode.
    ///
    /// Validation happens right here; the returned future only waits for the
    /// manager and resolves to the extended context.
    #[track_caller]
    pub fn acquire_read(
        self,
        level: LockLevel,
    ) -> Result<AcquireFuture, ContextError> {
        self.acquire_at_(level, LockMode::Read, Location::caller())
    }

    /// Requests `level` in write mode.
    #[track_caller]
    pub fn acquire_write(
        self,
        level: LockLevel,
    ) -> Result<AcquireFuture, ContextError> {
        self.acquire_at_(level, LockMode::Write, Location::caller())
    }

    #[track_caller]
    pub fn acquire(
        self,
        level: LockLevel,
        mode: LockMode,
    ) -> Result<AcquireFuture, ContextError> {
        self.acquire_at_(level, mode, Location::caller())
    }

    /// Acquires `level` only if the manager can grant it without waiting.
    ///
    /// Fails with `LockError::WouldBlock` otherwise.
    #[track_caller]
    pub fn try_acquire(
        mut self,
        level: LockLevel,
        mode: LockMode,
    ) -> Result<LockContext, ContextError> {
        if let Result::Err(e) = self.check_acquire_(level) {
            return Result::Err(ContextError::new(e, self));
        }
        let granted = self
            .manager_
            .try_acquire_at_(level, mode, Location::caller());
        if !granted {
            let e = LockError::WouldBlock { level };
            return Result::Err(ContextError::new(e, self));
        }
        self.held_.push(HeldEntry::new(level, mode));
        Result::Ok(self)
    }

    fn acquire_at_(
        self,
        level: LockLevel,
        mode: LockMode,
        location: &'static Location<'static>,
    ) -> Result<AcquireFuture, ContextError> {
        if let Result::Err(e) = self.check_acquire_(level) {
            return Result::Err(ContextError::new(e, self));
        }
        let inner = self.manager_.acquire_at_(level, mode, location);
        Result::Ok(AcquireFuture {
            opt_context_: Option::Some(self),
            entry_: HeldEntry::new(level, mode),
            inner_: inner,
        })
    }

    fn check_acquire_(&self, level: LockLevel) -> Result<(), LockError> {
        if self.has_lock(level) {
            return Result::Err(LockError::DuplicateAcquisition { level });
        }
        if matches!(self.policy_, OrderingPolicy::DuplicatesOnly) {
            return Result::Ok(());
        }
        match self.max_held_lock() {
            Option::Some(highest) if level <= highest =>
                Result::Err(LockError::OrderingViolation {
                    requested: level,
                    highest,
                }),
            _ => Result::Ok(()),
        }
    }

    /// Releases `level` alone, wherever it sits in the acquisition order.
    pub fn release_lock(
        mut self,
        level: LockLevel,
    ) -> Result<LockContext, ContextError> {
        let Option::Some(i) = self.position_(level) else {
            return Result::Err(ContextError::new(LockError::NotHeld { level }, self));
        };
        let entry = self.held_.remove(i);
        self.manager_.release_(entry.level(), entry.mode());
        Result::Ok(self)
    }

    /// Releases every level acquired after `level`, keeping `level` and
    /// everything before it.
    pub fn rollback_to(
        mut self,
        level: LockLevel,
    ) -> Result<LockContext, ContextError> {
        let Option::Some(i) = self.position_(level) else {
            return Result::Err(ContextError::new(LockError::NotHeld { level }, self));
        };
        let trailing = self.held_.split_off(i + 1);
        for e in trailing.iter().rev() {
            self.manager_.release_(e.level(), e.mode());
        }
        Result::Ok(self)
    }

    /// Releases everything and returns the now empty context.
    ///
    /// Disposing an empty context does nothing.
    pub fn dispose(mut self) -> LockContext {
        self.release_all_();
        self
    }

    /// Runs `f` with this context, provided `level` is held.
    pub fn use_lock<F, R>(&self, level: LockLevel, f: F) -> Result<R, LockError>
    where
        F: FnOnce(&LockContext) -> R,
    {
        if !self.has_lock(level) {
            return Result::Err(LockError::NotHeld { level });
        }
        Result::Ok(f(self))
    }

    /// Acquires `level` for writing, runs `f` with the extended context and
    /// releases `level` again.
    ///
    /// See `use_lock_with_acquire_mode`.
    #[track_caller]
    pub fn use_lock_with_acquire<F, R>(
        self,
        level: LockLevel,
        f: F,
    ) -> impl Future<Output = Result<(LockContext, R), ContextError>>
    where
        F: FnOnce(&LockContext) -> R,
    {
        let acquiring = self.acquire_at_(level, LockMode::Write, Location::caller());
        Self::run_scoped_(acquiring, level, f)
    }

    /// Acquires `level` in `mode`, runs `f` with the extended context and
    /// releases `level` again.
    ///
    /// `level` is released exactly once whether `f` returns or panics. A
    /// panic is resumed unchanged after the release.
    ///
    /// # Examples
    ///
    /// ```
    /// # futures_lite::future::block_on(async {
    /// use std::sync::Arc;
    /// use asyncex_levellock::{LockContext, LockLevel, LockManager, LockMode};
    ///
    /// let manager = Arc::new(LockManager::default());
    /// let l2 = LockLevel::new(2).unwrap();
    ///
    /// let ctx = LockContext::new(manager.clone());
    /// let (ctx, mode) = ctx
    ///     .use_lock_with_acquire_mode(l2, LockMode::Read, |c| c.lock_mode(l2))
    ///     .await
    ///     .unwrap();
    /// assert_eq!(mode, Some(LockMode::Read));
    /// assert!(!ctx.has_lock(l2));
    /// assert!(!manager.is_acquired(l2));
    /// # })
    /// ```
    #[track_caller]
    pub fn use_lock_with_acquire_mode<F, R>(
        self,
        level: LockLevel,
        mode: LockMode,
        f: F,
    ) -> impl Future<Output = Result<(LockContext, R), ContextError>>
    where
        F: FnOnce(&LockContext) -> R,
    {
        let acquiring = self.acquire_at_(level, mode, Location::caller());
        Self::run_scoped_(acquiring, level, f)
    }

    async fn run_scoped_<F, R>(
        acquiring: Result<AcquireFuture, ContextError>,
        level: LockLevel,
        f: F,
    ) -> Result<(LockContext, R), ContextError>
    where
        F: FnOnce(&LockContext) -> R,
    {
        let extended = acquiring?.await;
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| f(&extended)));
        let restored = extended
            .release_lock(level)
            .unwrap_or_else(ContextError::into_context);
        match outcome {
            Result::Ok(r) => Result::Ok((restored, r)),
            Result::Err(payload) => {
                log::debug!("[LockContext::run_scoped_] {level} released after panic");
                panic::resume_unwind(payload)
            }
        }
    }

    #[inline]
    pub fn has_lock(&self, level: LockLevel) -> bool {
        self.position_(level).is_some()
    }

    /// The held entries in acquisition order.
    #[inline]
    pub fn held_locks(&self) -> &[HeldEntry] {
        &self.held_
    }

    pub fn lock_mode(&self, level: LockLevel) -> Option<LockMode> {
        self.position_(level).map(|i| self.held_[i].mode())
    }

    /// The highest held level, regardless of acquisition order.
    pub fn max_held_lock(&self) -> Option<LockLevel> {
        self.held_.iter().map(HeldEntry::level).max()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.held_.is_empty()
    }

    fn position_(&self, level: LockLevel) -> Option<usize> {
        self.held_.iter().position(|e| e.level() == level)
    }

    fn release_all_(&mut self) {
        for e in self.held_.drain(..).rev() {
            self.manager_.release_(e.level(), e.mode());
        }
    }
}

impl Drop for LockContext {
    fn drop(&mut self) {
        if !self.held_.is_empty() {
            log::trace!("[LockContext::drop] releasing {:?}", self.held_);
            self.release_all_();
        }
    }
}

impl fmt::Debug for LockContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockContext")
            .field("policy", &self.policy_)
            .field("held", &self.held_)
            .finish()
    }
}

/// Future for the acquisitions of `LockContext`.
///
/// Resolves to the successor context. Dropping it unresolved drops the
/// context it carries, which releases the levels that context held.
#[must_use = "futures do nothing unless polled"]
#[derive(Debug)]
pub struct AcquireFuture {
    opt_context_: Option<LockContext>,
    entry_: HeldEntry,
    inner_: LevelFuture,
}

impl AcquireFuture {
    /// The entry this future adds once granted.
    #[inline(always)]
    pub fn entry(&self) -> HeldEntry {
        self.entry_
    }
}

impl Future for AcquireFuture {
    type Output = LockContext;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        if Pin::new(&mut this.inner_).poll(cx).is_pending() {
            return Poll::Pending;
        }
        let Option::Some(mut context) = this.opt_context_.take() else {
            panic!("[AcquireFuture::poll] polled after completion")
        };
        context.held_.push(this.entry_);
        Poll::Ready(context)
    }
}
