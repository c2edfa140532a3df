//! Per-component download backoff (spec §3, "OTA backoff state"; §4.G, "Component
//! failure backoff"). Grounded on `backoff_reset`/`backoff_increment`/
//! `backoff_ms_before_expiration` in `fw_update.c`.

use std::collections::HashMap;
use std::time::{Duration, Instant};

const INITIAL: Duration = Duration::from_secs(60);
const MAX: Duration = Duration::from_secs(24 * 60 * 60);

/// Backoff state for a single package name.
#[derive(Debug, Clone)]
pub struct ComponentBackoff {
    current: Duration,
    last_failure: Option<Instant>,
    /// The target version the backoff applies to; a newer target resets it.
    target_version: Option<String>,
}

impl ComponentBackoff {
    fn new() -> Self {
        ComponentBackoff { current: INITIAL, last_failure: None, target_version: None }
    }

    /// Records a failed download attempt against `target_version`, doubling the
    /// backoff (capped at 24 h).
    pub fn record_failure(&mut self, target_version: &str) {
        if self.target_version.as_deref() != Some(target_version) {
            self.current = INITIAL;
        } else {
            self.current = (self.current * 2).min(MAX);
        }
        self.target_version = Some(target_version.to_string());
        self.last_failure = Some(Instant::now());
    }

    /// Resets the backoff, e.g. on a successful download start or when a newer
    /// target version arrives (spec §3, "Reset on successful download start or
    /// when a newer target version arrives").
    pub fn reset(&mut self) {
        self.current = INITIAL;
        self.last_failure = None;
        self.target_version = None;
    }

    /// Whether `target_version` is the same one currently backing off.
    pub fn is_same_target(&self, target_version: &str) -> bool {
        self.target_version.as_deref() == Some(target_version)
    }

    /// Remaining time before this backoff expires, or `Duration::ZERO` if it
    /// already has (or there has been no failure yet).
    pub fn remaining(&self) -> Duration {
        match self.last_failure {
            Some(at) => {
                let elapsed = at.elapsed();
                self.current.saturating_sub(elapsed)
            }
            None => Duration::ZERO,
        }
    }

    pub fn is_active(&self) -> bool {
        self.remaining() > Duration::ZERO
    }
}

impl Default for ComponentBackoff {
    fn default() -> Self {
        Self::new()
    }
}

/// One [`ComponentBackoff`] per package name, owned exclusively by the OTA thread.
#[derive(Debug, Default)]
pub struct BackoffTable {
    entries: HashMap<String, ComponentBackoff>,
}

impl BackoffTable {
    pub fn new() -> Self {
        BackoffTable { entries: HashMap::new() }
    }

    pub fn entry(&mut self, package: &str) -> &mut ComponentBackoff {
        self.entries.entry(package.to_string()).or_insert_with(ComponentBackoff::new)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn doubles_on_repeated_failure_against_the_same_target() {
        let mut backoff = ComponentBackoff::new();
        backoff.record_failure("1.0.0");
        assert_eq!(backoff.current, INITIAL);
        backoff.record_failure("1.0.0");
        assert_eq!(backoff.current, INITIAL * 2);
        backoff.record_failure("1.0.0");
        assert_eq!(backoff.current, INITIAL * 4);
    }

    #[test]
    fn caps_at_twenty_four_hours() {
        let mut backoff = ComponentBackoff::new();
        backoff.current = MAX;
        backoff.record_failure("1.0.0");
        assert_eq!(backoff.current, MAX);
    }

    #[test]
    fn resets_when_target_version_changes() {
        let mut backoff = ComponentBackoff::new();
        backoff.record_failure("1.0.0");
        backoff.record_failure("1.0.0");
        assert_eq!(backoff.current, INITIAL * 2);
        backoff.record_failure("1.1.0");
        assert_eq!(backoff.current, INITIAL);
        assert!(backoff.is_same_target("1.1.0"));
    }

    #[test]
    fn remaining_is_zero_before_any_failure() {
        let backoff = ComponentBackoff::new();
        assert_eq!(backoff.remaining(), Duration::ZERO);
        assert!(!backoff.is_active());
    }

    #[test]
    fn table_creates_independent_entries_per_package() {
        let mut table = BackoffTable::new();
        table.entry("main").record_failure("1.0.0");
        table.entry("net").record_failure("2.0.0");
        assert!(table.entry("main").is_same_target("1.0.0"));
        assert!(table.entry("net").is_same_target("2.0.0"));
    }
}
