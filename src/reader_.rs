use core::{
    fmt,
    future::Future,
    pin::Pin,
    task::{Context, Poll},
};
use std::sync::Arc;

use super::{
    contexts_::{Stage, WaitCtx},
    level_::LockLevel,
    manager_::LockManager,
    trace_::AcquireTrace,
};

/// Future for `LockManager::acquire_read`.
///
/// Resolves once the caller holds `level` in read mode. Dropping the future
/// before it resolves withdraws the request; dropping it after the manager
/// granted the level but before it was observed gives the hold back.
#[must_use = "futures do nothing unless polled"]
pub struct ReadFuture {
    manager_: Arc<LockManager>,
    level_: LockLevel,
    opt_trace_: Option<AcquireTrace>,
    stage_: Stage,
}

impl ReadFuture {
    pub(super) fn new(
        manager: Arc<LockManager>,
        level: LockLevel,
        trace: Option<AcquireTrace>,
    ) -> Self {
        ReadFuture {
            manager_: manager,
            level_: level,
            opt_trace_: trace,
            stage_: Stage::Init,
        }
    }

    #[inline(always)]
    pub fn level(&self) -> LockLevel {
        self.level_
    }
}

impl Future for ReadFuture {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        let level = this.level_;
        match this.stage_ {
            Stage::Init => {
                let mut g = this.manager_.lock_state_();
                let capture = this.manager_.is_debug_capture_enabled();
                if g.level_(level).admits_reader() {
                    g.level_mut(level).grant_read_(this.opt_trace_.take(), capture);
                    this.stage_ = Stage::Done;
                    log::trace!("[ReadFuture::poll] {level} granted");
                    return Poll::Ready(());
                }
                let ticket = g.next_ticket();
                let ctx = WaitCtx::new(
                    ticket, cx.waker().clone(), this.opt_trace_.take());
                g.level_mut(level).pending_readers_.push_tail(ctx);
                this.stage_ = Stage::Queued(ticket);
                log::trace!("[ReadFuture::poll] {level} parked ticket({ticket})");
                Poll::Pending
            }
            Stage::Queued(ticket) => {
                let mut g = this.manager_.lock_state_();
                let queue = &mut g.level_mut(level).pending_readers_;
                if let Option::Some(ctx) = queue.find_mut(ticket) {
                    ctx.update_waker(cx.waker());
                    return Poll::Pending;
                }
                this.stage_ = Stage::Done;
                log::trace!("[ReadFuture::poll] {level} ticket({ticket}) granted");
                Poll::Ready(())
            }
            Stage::Done => panic!("[ReadFuture::poll] polled after completion"),
        }
    }
}

impl Drop for ReadFuture {
    fn drop(&mut self) {
        let Stage::Queued(ticket) = self.stage_ else {
            return;
        };
        let level = self.level_;
        let detached = self
            .manager_
            .lock_state_()
            .level_mut(level)
            .pending_readers_
            .try_detach(ticket);
        if detached {
            log::debug!("[ReadFuture::drop] {level} ticket({ticket}) withdrawn");
        } else {
            log::debug!("[ReadFuture::drop] {level} ticket({ticket}) unobserved grant");
            self.manager_.release_read(level);
        }
    }
}

impl fmt::Debug for ReadFuture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ReadFuture(level: {}, stage: {:?})", self.level_, self.stage_)
    }
}
