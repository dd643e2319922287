use std::{collections::VecDeque, fmt, task::Waker};

use super::trace_::AcquireTrace;

/// Identifies one parked acquisition within a `LockManager`.
pub(super) type Ticket = u64;

/// Progress of an acquisition future.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum Stage {
    /// Not yet polled; nothing is registered with the manager.
    Init,
    /// Parked under the ticket.
    Queued(Ticket),
    /// Granted and observed by the caller.
    Done,
}

/// A parked acquisition request.
///
/// A context stays in its queue until the manager grants it; a future that
/// no longer finds its ticket in the queue has been granted.
pub(super) struct WaitCtx {
    ticket_: Ticket,
    opt_waker_: Option<Waker>,
    opt_trace_: Option<AcquireTrace>,
}

impl WaitCtx {
    pub fn new(
        ticket: Ticket,
        waker: Waker,
        trace: Option<AcquireTrace>,
    ) -> Self {
        WaitCtx {
            ticket_: ticket,
            opt_waker_: Option::Some(waker),
            opt_trace_: trace,
        }
    }

    #[inline]
    pub fn ticket(&self) -> Ticket {
        self.ticket_
    }

    pub fn update_waker(&mut self, waker: &Waker) {
        match &mut self.opt_waker_ {
            Option::Some(w) if w.will_wake(waker) => (),
            slot => *slot = Option::Some(waker.clone()),
        }
    }

    /// Consumes the context on grant, yielding what the caller must wake and
    /// the trace to be recorded.
    pub fn into_signal(self) -> (Option<Waker>, Option<AcquireTrace>) {
        (self.opt_waker_, self.opt_trace_)
    }
}

impl fmt::Debug for WaitCtx {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f,
            "[WaitCtx:ticket({}), waker({}), trace({})]",
            self.ticket_,
            self.opt_waker_.is_some(),
            self.opt_trace_.is_some())
    }
}

/// FIFO of parked acquisitions for one level and one mode.
#[derive(Debug, Default)]
pub(super) struct WakeList(VecDeque<WaitCtx>);

impl WakeList {
    #[inline]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn push_tail(&mut self, ctx: WaitCtx) {
        self.0.push_back(ctx)
    }

    pub fn pop_head(&mut self) -> Option<WaitCtx> {
        self.0.pop_front()
    }

    pub fn drain_all(&mut self) -> impl Iterator<Item = WaitCtx> + '_ {
        self.0.drain(..)
    }

    pub fn find_mut(&mut self, ticket: Ticket) -> Option<&mut WaitCtx> {
        self.0.iter_mut().find(|c| c.ticket() == ticket)
    }

    /// Detaches the context with `ticket`, returning whether it was present.
    pub fn try_detach(&mut self, ticket: Ticket) -> bool {
        let Option::Some(i) = self.0.iter().position(|c| c.ticket() == ticket)
        else {
            return false;
        };
        self.0.remove(i).is_some()
    }
}
