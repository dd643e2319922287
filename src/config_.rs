use core::{fmt, str::FromStr};

/// Environment variable selecting the `OrderingPolicy` of `from_env`.
pub const ENV_ORDERING: &str = "ASYNCEX_LOCK_ORDERING";

/// Environment variable switching debug capture on for `from_env`.
pub const ENV_DEBUG_CAPTURE: &str = "ASYNCEX_LOCK_DEBUG_CAPTURE";

/// How strictly a `LockContext` checks the levels it is asked to acquire.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OrderingPolicy {
    /// Only levels above the current highest held level may be acquired.
    #[default]
    Strict,

    /// Only re-acquisition of a held level is rejected. Use this when the
    /// calling layer already guarantees ascending acquisition.
    DuplicatesOnly,
}

impl FromStr for OrderingPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "strict" => Result::Ok(OrderingPolicy::Strict),
            "duplicates-only" | "duplicates_only" | "duplicates" =>
                Result::Ok(OrderingPolicy::DuplicatesOnly),
            _ => Result::Err(s.to_owned()),
        }
    }
}

impl fmt::Display for OrderingPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let x = match self {
            OrderingPolicy::Strict => "strict",
            OrderingPolicy::DuplicatesOnly => "duplicates-only",
        };
        f.write_str(x)
    }
}

/// Settings of a `LockManager`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ManagerConfig {
    pub ordering: OrderingPolicy,
    pub debug_capture: bool,
}

impl ManagerConfig {
    pub const fn new() -> Self {
        ManagerConfig {
            ordering: OrderingPolicy::Strict,
            debug_capture: false,
        }
    }

    pub const fn with_ordering(mut self, ordering: OrderingPolicy) -> Self {
        self.ordering = ordering;
        self
    }

    pub const fn with_debug_capture(mut self, enabled: bool) -> Self {
        self.debug_capture = enabled;
        self
    }

    /// Reads `ASYNCEX_LOCK_ORDERING` and `ASYNCEX_LOCK_DEBUG_CAPTURE`.
    ///
    /// Unset variables keep the default; unparsable values are logged and
    /// ignored.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub(super) fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = ManagerConfig::new();
        if let Option::Some(v) = lookup(ENV_ORDERING) {
            match v.parse::<OrderingPolicy>() {
                Result::Ok(p) => config.ordering = p,
                Result::Err(v) => log::warn!(
                    "[ManagerConfig::from_env] ignoring {ENV_ORDERING}={v:?}"),
            }
        }
        if let Option::Some(v) = lookup(ENV_DEBUG_CAPTURE) {
            match parse_switch_(&v) {
                Option::Some(b) => config.debug_capture = b,
                Option::None => log::warn!(
                    "[ManagerConfig::from_env] ignoring {ENV_DEBUG_CAPTURE}={v:?}"),
            }
        }
        config
    }
}

fn parse_switch_(s: &str) -> Option<bool> {
    match s.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "on" | "yes" => Option::Some(true),
        "0" | "false" | "off" | "no" => Option::Some(false),
        _ => Option::None,
    }
}
