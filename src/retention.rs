//! Snapshot retention policy applied by the prune step.

use serde::{Deserialize, Serialize};

/// How many periodic snapshots to keep per period granularity.
///
/// Immutable once constructed; the prune step forwards the four counters
/// to the backup engine as keep flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetentionPolicy {
    #[serde(default = "default_daily")]
    daily: u32,

    #[serde(default = "default_weekly")]
    weekly: u32,

    #[serde(default = "default_monthly")]
    monthly: u32,

    #[serde(default = "default_yearly")]
    yearly: u32,
}

fn default_daily() -> u32 {
    7
}

fn default_weekly() -> u32 {
    8
}

fn default_monthly() -> u32 {
    12
}

fn default_yearly() -> u32 {
    2
}

impl RetentionPolicy {
    pub fn new(daily: u32, weekly: u32, monthly: u32, yearly: u32) -> Self {
        Self {
            daily,
            weekly,
            monthly,
            yearly,
        }
    }

    pub fn daily(&self) -> u32 {
        self.daily
    }

    pub fn weekly(&self) -> u32 {
        self.weekly
    }

    pub fn monthly(&self) -> u32 {
        self.monthly
    }

    pub fn yearly(&self) -> u32 {
        self.yearly
    }

    /// All counters zero: a prune would keep nothing. Callers warn on this
    /// but it is not an error.
    pub fn is_degenerate(&self) -> bool {
        self.daily == 0 && self.weekly == 0 && self.monthly == 0 && self.yearly == 0
    }
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self::new(default_daily(), default_weekly(), default_monthly(), default_yearly())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_counters() {
        let policy = RetentionPolicy::default();
        assert_eq!(policy.daily(), 7);
        assert_eq!(policy.weekly(), 8);
        assert_eq!(policy.monthly(), 12);
        assert_eq!(policy.yearly(), 2);
        assert!(!policy.is_degenerate());
    }

    #[test]
    fn test_degenerate_policy() {
        assert!(RetentionPolicy::new(0, 0, 0, 0).is_degenerate());
        assert!(!RetentionPolicy::new(0, 0, 0, 1).is_degenerate());
    }

    #[test]
    fn test_deserialize_partial() {
        let policy: RetentionPolicy = toml::from_str("daily = 3\nyearly = 0").unwrap();
        assert_eq!(policy.daily(), 3);
        assert_eq!(policy.weekly(), 8);
        assert_eq!(policy.monthly(), 12);
        assert_eq!(policy.yearly(), 0);
    }
}
