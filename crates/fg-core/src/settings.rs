//! Per-category timer settings and the persisted configuration.
//!
//! Settings come from `chrome.storage.local` as loosely-typed JSON written by
//! older and newer versions of the settings page, so every field is optional
//! on the way in and falls back to the default of its own profile.

use serde::{Deserialize, Deserializer, Serialize};

use crate::categories::Categories;
use crate::error::EngineError;
use crate::types::{Category, LimitType, Mode, Purpose};

// =============================================================================
// Timer Settings
// =============================================================================

/// Limits applied to one category profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
#[serde(rename_all = "camelCase")]
pub struct TimerSettings {
    /// Interstitial countdown, in seconds
    pub wait_time: u32,
    /// Length of a time allowance, in minutes
    pub access_duration: u32,
    /// Video changes tolerated before re-blocking
    pub max_video_changes: u32,
    /// Limit preselected on the interstitial
    pub default_limit_type: LimitType,
}

impl TimerSettings {
    pub const fn new(wait_time: u32, access_duration: u32, max_video_changes: u32) -> Self {
        Self {
            wait_time,
            access_duration,
            max_video_changes,
            default_limit_type: LimitType::Time,
        }
    }

    /// Allowance length in milliseconds.
    pub fn access_duration_ms(&self) -> u64 {
        u64::from(self.access_duration) * 60 * 1000
    }
}

pub const DEFAULT_FUN: TimerSettings = TimerSettings::new(5, 5, 3);
pub const DEFAULT_WORK: TimerSettings = TimerSettings::new(2, 30, 10);
pub const DEFAULT_SOCIAL: TimerSettings = TimerSettings::new(15, 5, 3);

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct PartialTimerSettings {
    wait_time: Option<u32>,
    access_duration: Option<u32>,
    max_video_changes: Option<u32>,
    default_limit_type: Option<LimitType>,
}

impl PartialTimerSettings {
    fn merge_onto(self, base: TimerSettings) -> TimerSettings {
        TimerSettings {
            wait_time: self.wait_time.unwrap_or(base.wait_time),
            access_duration: self.access_duration.unwrap_or(base.access_duration),
            max_video_changes: self.max_video_changes.unwrap_or(base.max_video_changes),
            default_limit_type: self.default_limit_type.unwrap_or(base.default_limit_type),
        }
    }
}

// =============================================================================
// Category Settings
// =============================================================================

/// The `funAndWork` category carries one profile per purpose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct FunAndWorkSettings {
    pub fun: TimerSettings,
    pub work: TimerSettings,
}

/// Settings for every category profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
#[serde(rename_all = "camelCase")]
pub struct CategorySettings {
    pub fun: TimerSettings,
    pub fun_and_work: FunAndWorkSettings,
    pub social_media: TimerSettings,
}

impl Default for CategorySettings {
    fn default() -> Self {
        Self {
            fun: DEFAULT_FUN,
            fun_and_work: FunAndWorkSettings {
                fun: DEFAULT_FUN,
                work: DEFAULT_WORK,
            },
            social_media: DEFAULT_SOCIAL,
        }
    }
}

impl CategorySettings {
    /// Profile for a category. `purpose` only matters for `funAndWork`,
    /// where `Work` selects the work profile and anything else the fun one.
    pub fn profile(&self, category: Category, purpose: Purpose) -> &TimerSettings {
        match category {
            Category::Fun => &self.fun,
            Category::SocialMedia => &self.social_media,
            Category::FunAndWork => match purpose {
                Purpose::Work => &self.fun_and_work.work,
                Purpose::Fun | Purpose::Social => &self.fun_and_work.fun,
            },
        }
    }

    /// Profile selected by the process mode.
    pub fn profile_for_mode(&self, category: Category, mode: Mode) -> &TimerSettings {
        let purpose = match mode {
            Mode::Work => Purpose::Work,
            Mode::Fun => Purpose::Fun,
        };
        self.profile(category, purpose)
    }
}

impl<'de> Deserialize<'de> for CategorySettings {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize, Default)]
        #[serde(default)]
        struct RawFunAndWork {
            fun: PartialTimerSettings,
            work: PartialTimerSettings,
        }

        #[derive(Deserialize, Default)]
        #[serde(rename_all = "camelCase", default)]
        struct Raw {
            fun: PartialTimerSettings,
            fun_and_work: RawFunAndWork,
            social_media: PartialTimerSettings,
        }

        let raw = Raw::deserialize(deserializer)?;
        Ok(Self {
            fun: raw.fun.merge_onto(DEFAULT_FUN),
            fun_and_work: FunAndWorkSettings {
                fun: raw.fun_and_work.fun.merge_onto(DEFAULT_FUN),
                work: raw.fun_and_work.work.merge_onto(DEFAULT_WORK),
            },
            social_media: raw.social_media.merge_onto(DEFAULT_SOCIAL),
        })
    }
}

// =============================================================================
// Persisted Configuration
// =============================================================================

/// Everything the engine reads from storage.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StoredConfig {
    pub website_categories: Categories,
    pub category_settings: CategorySettings,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_mode: Option<Mode>,
}

impl StoredConfig {
    /// Parse the stored JSON blob.
    pub fn from_json(text: &str) -> Result<Self, EngineError> {
        serde_json::from_str(text).map_err(|e| EngineError::StorageUnavailable(e.to_string()))
    }

    pub fn to_json_pretty(&self) -> Result<String, EngineError> {
        serde_json::to_string_pretty(self).map_err(|e| EngineError::StorageUnavailable(e.to_string()))
    }
}

/// Keys that changed in storage, carrying their new values.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StorageChange {
    pub website_categories: Option<Categories>,
    pub category_settings: Option<CategorySettings>,
    pub current_mode: Option<Mode>,
}

/// Anything that can produce the persisted configuration.
pub trait ConfigSource {
    fn load(&self) -> Result<StoredConfig, EngineError>;
}

/// In-memory configuration, used by hosts that receive config as JSON.
pub struct JsonSource(pub String);

impl ConfigSource for JsonSource {
    fn load(&self) -> Result<StoredConfig, EngineError> {
        StoredConfig::from_json(&self.0)
    }
}
