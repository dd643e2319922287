//! Call-site capture of lock acquisitions for diagnostics.
//!
//! Capture is switched on per `LockManager`. While it is off no trace is
//! built at all. The stack trace part depends on the host: it is only
//! resolved when `RUST_BACKTRACE` or `RUST_LIB_BACKTRACE` enables it, the
//! source location and timestamp are always recorded.

use std::{
    backtrace::{Backtrace, BacktraceStatus},
    collections::VecDeque,
    fmt,
    panic::Location,
    sync::Arc,
    thread,
};

use chrono::{DateTime, Utc};

use super::level_::LockMode;

/// Where and when a lock was requested.
#[derive(Clone)]
pub struct AcquireTrace {
    mode_: LockMode,
    location_: &'static Location<'static>,
    thread_: Option<String>,
    captured_at_: DateTime<Utc>,
    backtrace_: Arc<Backtrace>,
}

impl AcquireTrace {
    pub(super) fn capture(
        mode: LockMode,
        location: &'static Location<'static>,
    ) -> Self {
        AcquireTrace {
            mode_: mode,
            location_: location,
            thread_: thread::current().name().map(str::to_owned),
            captured_at_: Utc::now(),
            backtrace_: Arc::new(Backtrace::capture()),
        }
    }

    #[inline(always)]
    pub fn mode(&self) -> LockMode {
        self.mode_
    }

    /// The source location that requested the lock.
    #[inline(always)]
    pub fn location(&self) -> &'static Location<'static> {
        self.location_
    }

    #[inline(always)]
    pub fn thread_name(&self) -> Option<&str> {
        self.thread_.as_deref()
    }

    #[inline(always)]
    pub fn captured_at(&self) -> DateTime<Utc> {
        self.captured_at_
    }

    /// The stack trace, if the host resolved one.
    pub fn backtrace(&self) -> Option<&Backtrace> {
        match self.backtrace_.status() {
            BacktraceStatus::Captured => Option::Some(&self.backtrace_),
            _ => Option::None,
        }
    }
}

impl fmt::Debug for AcquireTrace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AcquireTrace")
            .field("mode", &self.mode_)
            .field("location", &self.location_)
            .field("thread", &self.thread_)
            .field("captured_at", &self.captured_at_)
            .field("backtrace", &self.backtrace_.status())
            .finish()
    }
}

impl fmt::Display for AcquireTrace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let thread = self.thread_.as_deref().unwrap_or("<unnamed>");
        write!(f,
            "{} at {} on thread {thread} ({})",
            self.mode_,
            self.location_,
            self.captured_at_.to_rfc3339())?;
        if let Option::Some(bt) = self.backtrace() {
            write!(f, "\n{bt}")?;
        }
        Result::Ok(())
    }
}

/// Traces of the current holders of one level.
///
/// Readers are not told apart: a read release drops the oldest reader trace.
#[derive(Debug, Default)]
pub(super) struct TraceSlots {
    writer_: Option<AcquireTrace>,
    readers_: VecDeque<AcquireTrace>,
}

impl TraceSlots {
    pub fn on_write_granted(&mut self, trace: Option<AcquireTrace>) {
        if trace.is_some() {
            self.writer_ = trace;
        }
    }

    pub fn on_read_granted(&mut self, trace: Option<AcquireTrace>) {
        if let Option::Some(t) = trace {
            self.readers_.push_back(t);
        }
    }

    pub fn on_write_released(&mut self) {
        self.writer_ = Option::None;
    }

    pub fn on_read_released(&mut self) {
        let _ = self.readers_.pop_front();
    }

    pub fn clear(&mut self) {
        self.writer_ = Option::None;
        self.readers_.clear();
    }

    pub fn writer(&self) -> Option<&AcquireTrace> {
        self.writer_.as_ref()
    }

    pub fn readers(&self) -> &VecDeque<AcquireTrace> {
        &self.readers_
    }
}
