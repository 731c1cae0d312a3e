//! Sampled media and page state, and the comparison between two samples.

use serde::{Deserialize, Serialize};

use super::metadata::{page_title_changed, Metadata};
use super::platform::PlatformTable;

/// Host-assigned identity of a media element, stable for its lifetime.
pub type MediaKey = u32;

/// Host-assigned identity of an iframe.
pub type FrameKey = u32;

// =============================================================================
// Raw Samples
// =============================================================================

/// What the host read off a `<video>` or `<audio>` element.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MediaState {
    /// `currentSrc`, or `src` when nothing is loaded yet
    pub src: String,
    pub current_time: f64,
    pub paused: bool,
    /// Seconds; NaN and infinity (live streams) are treated as 0
    pub duration: f64,
    pub title_attr: Option<String>,
    pub aria_label: Option<String>,
    pub parent_title: Option<String>,
}

impl MediaState {
    #[inline]
    pub fn is_playing(&self) -> bool {
        !self.paused
    }
}

/// What the host read off the document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PageState {
    pub url: String,
    pub title: String,
    pub metadata: Metadata,
    /// Text of the platform's title element, if the platform has one
    pub platform_title: Option<String>,
}

impl PageState {
    pub fn new(url: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            title: title.into(),
            ..Self::default()
        }
    }
}

// =============================================================================
// Snapshot
// =============================================================================

/// Last known state of one media element.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MediaSnapshot {
    pub src: String,
    pub playing: bool,
    pub current_time: f64,
    pub title: String,
    pub duration: f64,
    pub video_id: Option<String>,
    pub platform: Option<String>,
    pub page_title: String,
    pub metadata: Metadata,
}

impl MediaSnapshot {
    /// Combine an element sample with the page it lives in.
    ///
    /// The title is the first non-empty of the element's `title`, its
    /// `aria-label`, the parent's `title` and the platform title element.
    /// The video id comes from the source, or from the page URL when the
    /// source yields none.
    pub fn capture(media: &MediaState, page: &PageState, platforms: &PlatformTable) -> Self {
        let title = [
            media.title_attr.as_deref(),
            media.aria_label.as_deref(),
            media.parent_title.as_deref(),
            page.platform_title.as_deref(),
        ]
        .into_iter()
        .flatten()
        .map(str::trim)
        .find(|t| !t.is_empty())
        .unwrap_or("")
        .to_string();

        let mut identity = if media.src.is_empty() {
            Default::default()
        } else {
            platforms.identify(&media.src)
        };
        if identity.video_id.is_none() {
            identity = platforms.identify(&page.url);
        }

        Self {
            src: media.src.clone(),
            playing: media.is_playing(),
            current_time: finite_or_zero(media.current_time),
            title,
            duration: finite_or_zero(media.duration),
            video_id: identity.video_id,
            platform: identity.platform,
            page_title: page.title.clone(),
            metadata: page.metadata.clone(),
        }
    }
}

#[inline]
fn finite_or_zero(value: f64) -> f64 {
    if value.is_finite() {
        value
    } else {
        0.0
    }
}

// =============================================================================
// Change Reasons
// =============================================================================

bitflags::bitflags! {
    /// Why a detector decided the media item changed.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ChangeReasons: u16 {
        /// Media source URL differs
        const SOURCE = 1 << 0;
        /// Platform video id differs
        const VIDEO_ID = 1 << 1;
        /// Playback started again near 0 after a pause
        const RESTART = 1 << 2;
        /// Element title differs
        const TITLE = 1 << 3;
        /// Duration moved by more than a second
        const DURATION = 1 << 4;
        /// Document title differs, ignoring notification counters
        const PAGE_TITLE = 1 << 5;
        /// Player metadata tags or JSON-LD differ
        const METADATA = 1 << 6;
        /// Host, path, video id or fragment of the page URL changed
        const URL = 1 << 7;
        /// Embedded player iframe loaded a new source
        const IFRAME_SRC = 1 << 8;
        /// Tab became audible with new metadata and no media elements
        const AUDIO = 1 << 9;
    }
}

impl ChangeReasons {
    /// Lowercase flag names, as sent in `videoInfo.reasons`.
    pub fn labels(&self) -> Vec<String> {
        self.iter_names().map(|(name, _)| name.to_ascii_lowercase()).collect()
    }
}

/// Compare two snapshots of the same element.
///
/// Page title and metadata only take part while the element plays or the
/// tab is audible, since pages rewrite both freely while idle.
pub fn compare_snapshots(previous: &MediaSnapshot, current: &MediaSnapshot, audible: bool) -> ChangeReasons {
    let mut reasons = ChangeReasons::empty();

    if current.src != previous.src {
        reasons |= ChangeReasons::SOURCE;
    }
    if let (Some(old), Some(new)) = (&previous.video_id, &current.video_id) {
        if old != new {
            reasons |= ChangeReasons::VIDEO_ID;
        }
    }
    if current.playing && !previous.playing && current.current_time < 1.0 {
        reasons |= ChangeReasons::RESTART;
    }
    if !current.title.is_empty() && current.title != previous.title {
        reasons |= ChangeReasons::TITLE;
    }
    if (current.duration - previous.duration).abs() > 1.0 {
        reasons |= ChangeReasons::DURATION;
    }
    if current.playing || audible {
        if page_title_changed(&previous.page_title, &current.page_title) {
            reasons |= ChangeReasons::PAGE_TITLE;
        }
        if previous.metadata.has_changed(&current.metadata) {
            reasons |= ChangeReasons::METADATA;
        }
    }

    reasons
}
