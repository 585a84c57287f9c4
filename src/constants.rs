//! Crate-wide constants.

/// Default delay, in milliseconds, before a running unit is shown in its
/// host's task list.
pub const DEFAULT_VISIBILITY_THRESHOLD_MS: u64 = 500;

/// Configuration file read by [`TaskConfig::load`](crate::TaskConfig::load).
pub const CONFIG_FILE: &str = ".apptask.toml";
