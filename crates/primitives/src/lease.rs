use crate::{HeightRange, WorkerKind};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Lease lifecycle states.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LeaseStatus {
    /// Handed out to a worker instance; expires at `expires_at`.
    Active,
    /// The worker finished the range and advanced its checkpoint.
    Completed,
    /// The worker raised, or the reaper expired the lease.
    Failed,
}

/// A reservation of a contiguous height range by a named worker instance.
///
/// Leases for one worker kind never overlap: `(worker, from_height)` is
/// unique in the store, and claims are truncated by the dependency gate
/// before they are inserted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lease {
    /// The worker kind this lease belongs to.
    pub worker: WorkerKind,
    /// The reserved `[from, to)` heights.
    pub range: HeightRange,
    /// Instance label of the claimant, for diagnostics only.
    pub leased_by: String,
    /// When an ACTIVE lease becomes eligible for reaping.
    pub expires_at: DateTime<Utc>,
    /// Current lifecycle state.
    pub status: LeaseStatus,
    /// How many times this range has been attempted.
    pub attempt: u32,
    /// Row id of the most recent associated indexing error.
    pub last_error_id: Option<i64>,
}

impl Lease {
    /// Attempt ceiling after which a failed lease is dead-lettered and no
    /// longer retried.
    pub const DEAD_LETTER_ATTEMPTS: u32 = 20;

    /// Returns `true` if the lease has reached the dead-letter threshold.
    pub fn is_dead_letter(&self) -> bool {
        self.status == LeaseStatus::Failed && self.attempt >= Self::DEAD_LETTER_ATTEMPTS
    }

    /// Returns `true` if an ACTIVE lease has expired as of `now`.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.status == LeaseStatus::Active && self.expires_at < now
    }
}
