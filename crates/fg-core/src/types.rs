//! Core type definitions for FocusGate
//!
//! These types are shared by the engine, the detector and the message
//! protocol, and serialize to the names the extension pages use.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// Milliseconds since the Unix epoch (the unit of `Date.now()`).
pub type Timestamp = u64;

/// Browser tab identifier.
pub type TabId = i32;

// =============================================================================
// Categories and Purposes
// =============================================================================

/// Classification bucket for a domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
#[serde(rename_all = "camelCase")]
pub enum Category {
    Fun,
    FunAndWork,
    SocialMedia,
}

impl Category {
    /// Lookup precedence when a host appears in several lists.
    pub const PRECEDENCE: [Category; 3] = [Self::Fun, Self::FunAndWork, Self::SocialMedia];

    /// Name used in storage and in the interstitial URL.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Fun => "fun",
            Self::FunAndWork => "funAndWork",
            Self::SocialMedia => "socialMedia",
        }
    }

    /// Parse the storage / URL name of a category.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "fun" => Some(Self::Fun),
            "funAndWork" => Some(Self::FunAndWork),
            "socialMedia" => Some(Self::SocialMedia),
            _ => None,
        }
    }

    /// Purpose implied by the category when the user is not asked for one.
    pub fn implied_purpose(&self) -> Option<Purpose> {
        match self {
            Self::Fun => Some(Purpose::Fun),
            Self::SocialMedia => Some(Purpose::Social),
            Self::FunAndWork => None,
        }
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// User-declared intent when passing the interstitial.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
#[serde(rename_all = "lowercase")]
pub enum Purpose {
    #[default]
    Fun,
    Work,
    Social,
}

/// How an allowance is bounded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
#[serde(rename_all = "lowercase")]
pub enum LimitType {
    /// Wall-clock expiry after `accessDuration` minutes
    #[default]
    Time,
    /// Budget of `maxVideoChanges` detected video changes
    Video,
}

/// Process-wide mode selecting the `funAndWork` sub-profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Work,
    #[default]
    Fun,
}

// =============================================================================
// Tabs
// =============================================================================

/// Snapshot of an open tab as reported by the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TabInfo {
    pub id: TabId,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub audible: bool,
}

impl TabInfo {
    pub fn new(id: TabId, url: impl Into<String>) -> Self {
        Self {
            id,
            url: Some(url.into()),
            audible: false,
        }
    }
}

/// Access state of a (tab, domain) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AccessState {
    /// Domain has no category
    Unclassified,
    /// Categorized, but an allowance or mode override lets it through
    Allowed,
    /// Categorized and redirected to the interstitial
    Blocked,
}

// =============================================================================
// Clock
// =============================================================================

/// Source of the current time.
pub trait Clock {
    fn now(&self) -> Timestamp;
}

/// Wall clock backed by `SystemTime`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as Timestamp)
            .unwrap_or(0)
    }
}
