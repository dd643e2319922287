use core::{
    fmt,
    future::Future,
    pin::Pin,
    task::{Context, Poll},
};
use std::{sync::Arc, task::Waker};

use super::{
    contexts_::{Stage, WaitCtx},
    level_::LockLevel,
    manager_::LockManager,
    trace_::AcquireTrace,
};

/// Future for `LockManager::acquire_write`.
///
/// A request that cannot be granted on first poll takes its place in the
/// level's writer queue right away, so readers arriving after it wait even
/// while earlier readers are still active.
#[must_use = "futures do nothing unless polled"]
pub struct WriteFuture {
    manager_: Arc<LockManager>,
    level_: LockLevel,
    opt_trace_: Option<AcquireTrace>,
    stage_: Stage,
}

impl WriteFuture {
    pub(super) fn new(
        manager: Arc<LockManager>,
        level: LockLevel,
        trace: Option<AcquireTrace>,
    ) -> Self {
        WriteFuture {
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

impl Future for WriteFuture {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        let level = this.level_;
        match this.stage_ {
            Stage::Init => {
                let mut g = this.manager_.lock_state_();
                let capture = this.manager_.is_debug_capture_enabled();
                if g.level_(level).admits_writer() {
                    g.level_mut(level).grant_write_(this.opt_trace_.take(), capture);
                    this.stage_ = Stage::Done;
                    log::trace!("[WriteFuture::poll] {level} granted");
                    return Poll::Ready(());
                }
                let ticket = g.next_ticket();
                let ctx = WaitCtx::new(
                    ticket, cx.waker().clone(), this.opt_trace_.take());
                g.level_mut(level).pending_writers_.push_tail(ctx);
                this.stage_ = Stage::Queued(ticket);
                log::trace!("[WriteFuture::poll] {level} parked ticket({ticket})");
                Poll::Pending
            }
            Stage::Queued(ticket) => {
                let mut g = this.manager_.lock_state_();
                let queue = &mut g.level_mut(level).pending_writers_;
                if let Option::Some(ctx) = queue.find_mut(ticket) {
                    ctx.update_waker(cx.waker());
                    return Poll::Pending;
                }
                this.stage_ = Stage::Done;
                log::trace!("[WriteFuture::poll] {level} ticket({ticket}) granted");
                Poll::Ready(())
            }
            Stage::Done => panic!("[WriteFuture::poll] polled after completion"),
        }
    }
}

impl Drop for WriteFuture {
    fn drop(&mut self) {
        let Stage::Queued(ticket) = self.stage_ else {
            return;
        };
        let level = self.level_;
        let wakers = {
            let mut g = self.manager_.lock_state_();
            let capture = self.manager_.is_debug_capture_enabled();
            let s = g.level_mut(level);
            if !s.pending_writers_.try_detach(ticket) {
                drop(g);
                log::debug!("[WriteFuture::drop] {level} ticket({ticket}) unobserved grant");
                self.manager_.release_write(level);
                return;
            }
            log::debug!("[WriteFuture::drop] {level} ticket({ticket}) withdrawn");
            // Readers parked only behind this writer may run now.
            s.dispatch_(level, capture)
        };
        wakers.into_iter().for_each(Waker::wake);
    }
}

impl fmt::Debug for WriteFuture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "WriteFuture(level: {}, stage: {:?})", self.level_, self.stage_)
    }
}
