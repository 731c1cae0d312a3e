//! Temporary allowances and per-domain video-change trackers.
//!
//! An allowance is created when the user gets through the interstitial. Time
//! allowances expire on the wall clock and are evicted by [`AllowanceStore::sweep`];
//! video allowances never expire on their own and only end when the domain's
//! video-change budget is exceeded.
//!
//! The store also owns the per-domain [`VideoChangeTracker`]s, since every
//! grant and every expiry resets the tracker of that domain.

use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

use crate::types::{LimitType, Purpose, Timestamp};

/// Period of the expiry sweep.
pub const SWEEP_INTERVAL_MS: u64 = 6_000;

// =============================================================================
// Allowance
// =============================================================================

/// When an allowance stops being valid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Option<Timestamp>", into = "Option<Timestamp>")]
pub enum Expiry {
    At(Timestamp),
    Never,
}

impl From<Option<Timestamp>> for Expiry {
    fn from(value: Option<Timestamp>) -> Self {
        match value {
            Some(ts) => Self::At(ts),
            None => Self::Never,
        }
    }
}

impl From<Expiry> for Option<Timestamp> {
    fn from(value: Expiry) -> Self {
        match value {
            Expiry::At(ts) => Some(ts),
            Expiry::Never => None,
        }
    }
}

impl Expiry {
    #[inline]
    pub fn is_after(&self, now: Timestamp) -> bool {
        match self {
            Self::At(ts) => *ts > now,
            Self::Never => true,
        }
    }

    #[inline]
    pub fn is_before(&self, now: Timestamp) -> bool {
        match self {
            Self::At(ts) => *ts < now,
            Self::Never => false,
        }
    }
}

/// Permission to use a domain without being redirected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Allowance {
    pub expiry: Expiry,
    pub purpose: Purpose,
    pub limit_type: LimitType,
    pub granted_at: Timestamp,
}

impl Allowance {
    /// Validity as far as the clock is concerned. Video allowances are
    /// checked against the change budget by the engine instead.
    pub fn is_valid_at(&self, now: Timestamp) -> bool {
        match self.limit_type {
            LimitType::Time => self.expiry.is_after(now),
            LimitType::Video => true,
        }
    }
}

// =============================================================================
// Video Change Tracker
// =============================================================================

/// Count of video changes seen for a domain since its last reset.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoChangeTracker {
    pub count: u32,
    pub last_change_time: Timestamp,
}

// =============================================================================
// Allowance Store
// =============================================================================

/// In-memory allowances and trackers, keyed by canonical domain.
#[derive(Debug, Clone, Default)]
pub struct AllowanceStore {
    allowances: HashMap<String, Allowance>,
    trackers: HashMap<String, VideoChangeTracker>,
}

impl AllowanceStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Check whether a domain currently holds a valid allowance.
    pub fn is_allowed(&self, domain: &str, now: Timestamp) -> bool {
        self.allowances
            .get(domain)
            .is_some_and(|allowance| allowance.is_valid_at(now))
    }

    pub fn get(&self, domain: &str) -> Option<&Allowance> {
        self.allowances.get(domain)
    }

    /// Grant (or replace) an allowance. A new grant is a fresh budget, so the
    /// domain's video-change count goes back to zero.
    pub fn grant(
        &mut self,
        domain: &str,
        limit_type: LimitType,
        purpose: Purpose,
        access_duration_min: u32,
        now: Timestamp,
    ) -> Allowance {
        let expiry = match limit_type {
            LimitType::Time => Expiry::At(now + u64::from(access_duration_min) * 60 * 1000),
            LimitType::Video => Expiry::Never,
        };
        let allowance = Allowance {
            expiry,
            purpose,
            limit_type,
            granted_at: now,
        };
        self.allowances.insert(domain.to_string(), allowance);
        self.reset_tracker(domain);
        log::info!(
            "Granted {:?} allowance for {} ({:?}, expiry {:?})",
            limit_type,
            domain,
            purpose,
            expiry
        );
        allowance
    }

    /// Remove an allowance outright.
    pub fn revoke(&mut self, domain: &str) -> Option<Allowance> {
        self.allowances.remove(domain)
    }

    /// Evict expired time allowances and reset their trackers.
    ///
    /// Returns the domains that expired in this pass.
    pub fn sweep(&mut self, now: Timestamp) -> BTreeSet<String> {
        let expired: BTreeSet<String> = self
            .allowances
            .iter()
            .filter(|(_, a)| a.limit_type == LimitType::Time && a.expiry.is_before(now))
            .map(|(domain, _)| domain.clone())
            .collect();

        for domain in &expired {
            self.allowances.remove(domain);
            self.reset_tracker(domain);
            log::debug!("Allowance for {} expired", domain);
        }

        expired
    }

    /// Count one video change for a domain and return the new count.
    pub fn record_change(&mut self, domain: &str, now: Timestamp) -> u32 {
        let tracker = self.trackers.entry(domain.to_string()).or_default();
        tracker.count += 1;
        tracker.last_change_time = now;
        tracker.count
    }

    pub fn reset_tracker(&mut self, domain: &str) {
        if let Some(tracker) = self.trackers.get_mut(domain) {
            tracker.count = 0;
        }
    }

    pub fn tracker(&self, domain: &str) -> Option<&VideoChangeTracker> {
        self.trackers.get(domain)
    }

    pub fn change_count(&self, domain: &str) -> u32 {
        self.trackers.get(domain).map_or(0, |t| t.count)
    }

    /// Number of live allowances.
    pub fn len(&self) -> usize {
        self.allowances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.allowances.is_empty()
    }

    /// Allowances sorted by domain.
    pub fn entries(&self) -> Vec<(&str, &Allowance)> {
        let mut entries: Vec<_> = self.allowances.iter().map(|(d, a)| (d.as_str(), a)).collect();
        entries.sort_by(|a, b| a.0.cmp(b.0));
        entries
    }

    pub fn clear(&mut self) {
        self.allowances.clear();
        self.trackers.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MIN: u64 = 60_000;

    #[test]
    fn test_time_allowance_expires() {
        let mut store = AllowanceStore::new();
        let allowance = store.grant("reddit.com", LimitType::Time, Purpose::Fun, 5, 1_000);
        assert_eq!(allowance.expiry, Expiry::At(1_000 + 5 * MIN));

        assert!(store.is_allowed("reddit.com", 1_000));
        assert!(store.is_allowed("reddit.com", 1_000 + 5 * MIN - 1));
        assert!(!store.is_allowed("reddit.com", 1_000 + 5 * MIN));
        assert!(!store.is_allowed("other.com", 1_000));
    }

    #[test]
    fn test_video_allowance_ignores_clock() {
        let mut store = AllowanceStore::new();
        store.grant("youtube.com", LimitType::Video, Purpose::Fun, 5, 0);
        assert!(store.is_allowed("youtube.com", u64::MAX));
        assert!(store.sweep(u64::MAX).is_empty());
        assert_eq!(store.get("youtube.com").unwrap().expiry, Expiry::Never);
    }

    #[test]
    fn test_grant_resets_tracker() {
        let mut store = AllowanceStore::new();
        assert_eq!(store.record_change("youtube.com", 10), 1);
        assert_eq!(store.record_change("youtube.com", 20), 2);
        store.grant("youtube.com", LimitType::Video, Purpose::Fun, 5, 30);
        assert_eq!(store.change_count("youtube.com"), 0);
        assert_eq!(store.record_change("youtube.com", 40), 1);
    }

    #[test]
    fn test_sweep_evicts_and_resets() {
        let mut store = AllowanceStore::new();
        store.grant("a.com", LimitType::Time, Purpose::Fun, 5, 0);
        store.grant("b.com", LimitType::Time, Purpose::Work, 30, 0);
        store.record_change("a.com", 1);

        assert!(store.sweep(5 * MIN).is_empty());

        let expired = store.sweep(5 * MIN + 1_000);
        assert_eq!(expired.into_iter().collect::<Vec<_>>(), vec!["a.com".to_string()]);
        assert!(store.get("a.com").is_none());
        assert_eq!(store.change_count("a.com"), 0);
        assert!(store.get("b.com").is_some());
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_regrant_replaces() {
        let mut store = AllowanceStore::new();
        store.grant("a.com", LimitType::Time, Purpose::Fun, 5, 0);
        store.grant("a.com", LimitType::Video, Purpose::Work, 5, 100);
        let allowance = store.get("a.com").unwrap();
        assert_eq!(allowance.limit_type, LimitType::Video);
        assert_eq!(allowance.granted_at, 100);
        assert_eq!(store.len(), 1);
        assert!(store.revoke("a.com").is_some());
        assert!(store.is_empty());
    }

    #[test]
    fn test_expiry_serializes_as_nullable_number() {
        assert_eq!(serde_json::to_string(&Expiry::At(5)).unwrap(), "5");
        assert_eq!(serde_json::to_string(&Expiry::Never).unwrap(), "null");
        let expiry: Expiry = serde_json::from_str("null").unwrap();
        assert_eq!(expiry, Expiry::Never);
    }
}
