//! Claim leases.
//!
//! A store claims an item by stamping it with a lease: the claimant's id and
//! the instant the claim expires. While the lease is active no other processor
//! can claim the item. If the claimant crashes before recording an outcome,
//! the lease runs out and the item becomes claimable again, which is what
//! makes delivery at-least-once rather than at-most-once.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::time::after;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lease {
    pub owner: String,
    pub until: DateTime<Utc>,
}

impl Lease {
    pub fn new(owner: impl Into<String>, now: DateTime<Utc>, duration: Duration) -> Self {
        Self {
            owner: owner.into(),
            until: after(now, duration),
        }
    }

    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        self.until > now
    }
}

/// True when an item stamped with `claimed_until` may be claimed at `now`.
pub(crate) fn lease_expired(claimed_until: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
    claimed_until.map(|until| until <= now).unwrap_or(true)
}
