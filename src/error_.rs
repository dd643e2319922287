use core::fmt;

use super::{context_::LockContext, level_::LockLevel};

/// Misuse of a `LockContext`, always reported before the lock manager is
/// touched.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LockError {
    #[error("lock level {level} is already held by this context")]
    DuplicateAcquisition { level: LockLevel },

    #[error("lock level {requested} must be above the highest held level {highest}")]
    OrderingViolation {
        requested: LockLevel,
        highest: LockLevel,
    },

    #[error("lock level {level} is not held by this context")]
    NotHeld { level: LockLevel },

    #[error("lock level {level} cannot be acquired without waiting")]
    WouldBlock { level: LockLevel },

    #[error("lock level value {value} is outside {}..={}", LockLevel::MIN.get(), LockLevel::MAX.get())]
    LevelOutOfRange { value: u8 },
}

/// A rejected operation on a `LockContext`.
///
/// The context passed into the operation is handed back unchanged, so the
/// caller keeps ownership of the locks it already holds.
#[derive(thiserror::Error)]
#[error("{error_}")]
pub struct ContextError {
    #[source]
    error_: LockError,
    context_: LockContext,
}

impl ContextError {
    pub(super) fn new(error: LockError, context: LockContext) -> Self {
        ContextError {
            error_: error,
            context_: context,
        }
    }

    #[inline(always)]
    pub fn error(&self) -> &LockError {
        &self.error_
    }

    #[inline(always)]
    pub fn context(&self) -> &LockContext {
        &self.context_
    }

    /// Recovers the context that was passed into the rejected operation.
    pub fn into_context(self) -> LockContext {
        self.context_
    }

    pub fn into_parts(self) -> (LockError, LockContext) {
        (self.error_, self.context_)
    }
}

impl fmt::Debug for ContextError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContextError")
            .field("error", &self.error_)
            .field("held", &self.context_.held_locks())
            .finish()
    }
}

impl From<ContextError> for LockError {
    fn from(e: ContextError) -> Self {
        e.error_
    }
}
