use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// The singleton lock document.
///
/// A free lock is a record whose fields are all `None`; a held lock names
/// its holder, the run it executes, and the last heartbeat.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockRecord {
    pub holder_id: Option<String>,
    pub thread_id: Option<String>,
    pub acquired_at: Option<DateTime<Utc>>,
}

impl LockRecord {
    pub fn held_by(holder_id: impl Into<String>, thread_id: impl Into<String>, at: DateTime<Utc>) -> Self {
        Self {
            holder_id: Some(holder_id.into()),
            thread_id: Some(thread_id.into()),
            acquired_at: Some(at),
        }
    }

    pub fn is_free(&self) -> bool {
        self.holder_id.is_none()
    }

    pub fn is_held_by(&self, holder_id: &str) -> bool {
        self.holder_id.as_deref() == Some(holder_id)
    }

    /// A held record whose last heartbeat is older than `stale_timeout`.
    ///
    /// A holder without a timestamp is always stale.
    pub fn is_stale(&self, now: DateTime<Utc>, stale_timeout: Duration) -> bool {
        if self.is_free() {
            return false;
        }
        match self.acquired_at {
            None => true,
            Some(at) => now
                .signed_duration_since(at)
                .to_std()
                .map_or(false, |age| age > stale_timeout),
        }
    }

    /// Held and not stale.
    pub fn is_live(&self, now: DateTime<Utc>, stale_timeout: Duration) -> bool {
        !self.is_free() && !self.is_stale(now, stale_timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_staleness() {
        let now = Utc::now();
        let timeout = Duration::from_secs(300);

        assert!(!LockRecord::default().is_stale(now, timeout));
        assert!(!LockRecord::default().is_live(now, timeout));

        let fresh = LockRecord::held_by("p1", "t1", now - chrono::Duration::seconds(30));
        assert!(fresh.is_live(now, timeout));

        let stale = LockRecord::held_by("p1", "t1", now - chrono::Duration::seconds(301));
        assert!(stale.is_stale(now, timeout));

        let no_timestamp = LockRecord {
            acquired_at: None,
            ..fresh
        };
        assert!(no_timestamp.is_stale(now, timeout));
    }

    #[test]
    fn test_future_timestamp_is_not_stale() {
        let now = Utc::now();
        let skewed = LockRecord::held_by("p2", "t1", now + chrono::Duration::seconds(5));
        assert!(skewed.is_live(now, Duration::from_secs(1)));
    }
}
