use std::collections::{BTreeMap, BTreeSet, VecDeque};

use super::{level_::LockLevel, trace_::AcquireTrace};

/// A copy of a `LockManager`'s state taken under its mutex.
///
/// Only levels with something to report appear in the maps; an idle level
/// leaves no entry behind.
#[derive(Debug, Clone, Default)]
pub struct ManagerSnapshot {
    pub reader_counts: BTreeMap<LockLevel, usize>,
    pub active_writers: BTreeSet<LockLevel>,
    pub pending_writers: BTreeMap<LockLevel, usize>,
    pub pending_readers: BTreeMap<LockLevel, usize>,
    pub writer_traces: BTreeMap<LockLevel, AcquireTrace>,
    pub reader_traces: BTreeMap<LockLevel, Vec<AcquireTrace>>,
}

impl ManagerSnapshot {
    #[allow(clippy::too_many_arguments)]
    pub(super) fn record_level_(
        &mut self,
        level: LockLevel,
        reader_count: usize,
        writer_active: bool,
        pending_writers: usize,
        pending_readers: usize,
        writer_trace: Option<&AcquireTrace>,
        reader_traces: &VecDeque<AcquireTrace>,
    ) {
        if reader_count > 0 {
            self.reader_counts.insert(level, reader_count);
        }
        if writer_active {
            self.active_writers.insert(level);
        }
        if pending_writers > 0 {
            self.pending_writers.insert(level, pending_writers);
        }
        if pending_readers > 0 {
            self.pending_readers.insert(level, pending_readers);
        }
        if let Option::Some(t) = writer_trace {
            self.writer_traces.insert(level, t.clone());
        }
        if !reader_traces.is_empty() {
            self.reader_traces.insert(level, reader_traces.iter().cloned().collect());
        }
    }

    #[inline]
    pub fn reader_count(&self, level: LockLevel) -> usize {
        self.reader_counts.get(&level).copied().unwrap_or(0)
    }

    #[inline]
    pub fn is_write_locked(&self, level: LockLevel) -> bool {
        self.active_writers.contains(&level)
    }

    /// Number of writers waiting on `level`.
    #[inline]
    pub fn pending_writer_depth(&self, level: LockLevel) -> usize {
        self.pending_writers.get(&level).copied().unwrap_or(0)
    }

    #[inline]
    pub fn pending_reader_depth(&self, level: LockLevel) -> usize {
        self.pending_readers.get(&level).copied().unwrap_or(0)
    }

    pub fn writer_trace(&self, level: LockLevel) -> Option<&AcquireTrace> {
        self.writer_traces.get(&level)
    }

    pub fn reader_traces(&self, level: LockLevel) -> &[AcquireTrace] {
        self.reader_traces
            .get(&level)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// No holder, waiter, or trace is recorded for `level`.
    pub fn is_level_clear(&self, level: LockLevel) -> bool {
        !self.reader_counts.contains_key(&level)
            && !self.active_writers.contains(&level)
            && !self.pending_writers.contains_key(&level)
            && !self.pending_readers.contains_key(&level)
            && !self.writer_traces.contains_key(&level)
            && !self.reader_traces.contains_key(&level)
    }

    /// Every level is clear.
    pub fn is_idle(&self) -> bool {
        self.reader_counts.is_empty()
            && self.active_writers.is_empty()
            && self.pending_writers.is_empty()
            && self.pending_readers.is_empty()
            && self.writer_traces.is_empty()
            && self.reader_traces.is_empty()
    }
}
