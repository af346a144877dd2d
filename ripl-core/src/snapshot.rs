//! Snapshot cadence.
//!
//! Aggregates carry their snapshot interval as a plain number so that it
//! survives in every version. [`SnapshotPolicy`] is the interpretation of that
//! number:
//!
//! - [`SnapshotPolicy::Always`]: snapshot after every change (interval `0`)
//! - [`SnapshotPolicy::EveryNVersions`]: snapshot whenever the aggregate
//!   version is a multiple of `n`
//!
//! Creation always produces a snapshot regardless of the policy, so every
//! stored aggregate has at least one base to replay from.

/// When to persist a snapshot of an aggregate.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SnapshotPolicy {
    /// Snapshot every version.
    #[default]
    Always,
    /// Snapshot versions divisible by N.
    EveryNVersions(u64),
}

impl SnapshotPolicy {
    #[must_use]
    pub const fn from_interval(interval: u64) -> Self {
        match interval {
            0 => Self::Always,
            n => Self::EveryNVersions(n),
        }
    }

    #[must_use]
    pub const fn interval(&self) -> u64 {
        match self {
            Self::Always => 0,
            Self::EveryNVersions(n) => *n,
        }
    }

    /// Whether the aggregate at `version` should be snapshotted.
    #[must_use]
    pub const fn should_snapshot(&self, version: u64) -> bool {
        match self {
            Self::Always => true,
            Self::EveryNVersions(n) => version % *n == 0,
        }
    }
}

impl From<u64> for SnapshotPolicy {
    fn from(interval: u64) -> Self {
        Self::from_interval(interval)
    }
}
