//! An asynchronous lock manager over a fixed set of ordered lock levels.
//!
//! Every level is a reader-writer lock with writer preference and FIFO
//! fairness among writers. A `LockContext` records which levels a call chain
//! holds, and is threaded through that chain by value: acquiring, releasing
//! or rolling back always yields a new context. Acquiring levels in strictly
//! ascending order, which contexts check by default, rules out deadlocks
//! between call chains.

mod config_;
mod context_;
mod contexts_;
mod error_;
mod level_;
mod manager_;
mod reader_;
mod snapshot_;
mod trace_;
mod writer_;

pub use config_::{ManagerConfig, OrderingPolicy, ENV_DEBUG_CAPTURE, ENV_ORDERING};
pub use context_::{AcquireFuture, LockContext};
pub use error_::{ContextError, LockError};
pub use level_::{HeldEntry, LockLevel, LockMode};
pub use manager_::LockManager;
pub use reader_::ReadFuture;
pub use snapshot_::ManagerSnapshot;
pub use trace_::AcquireTrace;
pub use writer_::WriteFuture;

#[cfg(test)]mod tests_;
