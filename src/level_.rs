use core::fmt;

use super::error_::LockError;

/// One of the totally ordered lock levels, drawn from `1..=15`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LockLevel(u8);

impl LockLevel {
    /// The lowest valid level.
    pub const MIN: LockLevel = LockLevel(1);

    /// The highest valid level.
    pub const MAX: LockLevel = LockLevel(15);

    /// The number of levels in the domain.
    pub const COUNT: usize = (Self::MAX.0 - Self::MIN.0 + 1) as usize;

    /// Creates a level, rejecting values outside `1..=15`.
    ///
    /// # Examples
    ///
    /// ```
    /// use asyncex_levellock::{LockError, LockLevel};
    ///
    /// let level = LockLevel::new(3).unwrap();
    /// assert_eq!(level.get(), 3);
    /// assert_eq!(
    ///     LockLevel::new(0),
    ///     Err(LockError::LevelOutOfRange { value: 0 }),
    /// );
    /// ```
    pub const fn new(value: u8) -> Result<LockLevel, LockError> {
        if value < Self::MIN.0 || value > Self::MAX.0 {
            Result::Err(LockError::LevelOutOfRange { value })
        } else {
            Result::Ok(LockLevel(value))
        }
    }

    #[inline(always)]
    pub const fn get(self) -> u8 {
        self.0
    }

    /// Iterates every level of the domain in ascending order.
    pub fn all() -> impl Iterator<Item = LockLevel> {
        (Self::MIN.0..=Self::MAX.0).map(LockLevel)
    }

    pub(super) const fn index_(self) -> usize {
        (self.0 - Self::MIN.0) as usize
    }
}

impl TryFrom<u8> for LockLevel {
    type Error = LockError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        LockLevel::new(value)
    }
}

impl From<LockLevel> for u8 {
    fn from(level: LockLevel) -> Self {
        level.0
    }
}

impl fmt::Display for LockLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "L{}", self.0)
    }
}

/// The concurrency mode of a held level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockMode {
    Read,
    Write,
}

impl fmt::Display for LockMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let x = match self {
            LockMode::Read => "Read",
            LockMode::Write => "Write",
        };
        write!(f, "LockMode::{x}")
    }
}

/// A `(level, mode)` pair owned by a `LockContext`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HeldEntry {
    level_: LockLevel,
    mode_: LockMode,
}

impl HeldEntry {
    pub const fn new(level: LockLevel, mode: LockMode) -> Self {
        HeldEntry { level_: level, mode_: mode }
    }

    #[inline(always)]
    pub const fn level(&self) -> LockLevel {
        self.level_
    }

    #[inline(always)]
    pub const fn mode(&self) -> LockMode {
        self.mode_
    }
}
