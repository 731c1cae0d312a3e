//! Media observers.
//!
//! Every observer sees every [`Signal`] and answers with an optional
//! [`Detection`]. The detector merges the answers, applies the debounce and
//! turns a surviving detection into a `VIDEO_CHANGED` report.

use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::OnceLock;

use regex::Regex;
use url::Url;

use super::metadata::{page_title_changed, Metadata};
use super::platform::{is_player_url, PlatformTable};
use super::state::{compare_snapshots, ChangeReasons, FrameKey, MediaKey, MediaSnapshot, MediaState, PageState};
use crate::message::{ChangeSource, VideoInfo};

// =============================================================================
// Contract
// =============================================================================

/// One observation delivered to the observers.
#[derive(Debug, Clone, Copy)]
pub enum Signal<'a> {
    /// Element seen for the first time
    MediaAdded { key: MediaKey, state: &'a MediaState },
    /// Media event (`play`, `timeupdate`, `durationchange`, src mutation, ...)
    MediaSample { key: MediaKey, state: &'a MediaState },
    MediaRemoved { key: MediaKey },
    /// Iframe discovered or its `src` mutated
    Iframe { key: FrameKey, src: &'a str },
    FrameRemoved { key: FrameKey },
    /// Tab went from silent to audible
    AudioStarted,
    /// History navigation, hash change, periodic check
    PageCheck,
}

/// Page-level state shared by the observers that compare whole pages.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PageBaseline {
    pub url: String,
    pub title: String,
    pub metadata: Metadata,
}

impl PageBaseline {
    pub fn from_page(page: &PageState) -> Self {
        Self {
            url: page.url.clone(),
            title: page.title.clone(),
            metadata: page.metadata.clone(),
        }
    }
}

/// Everything an observer may read besides the signal itself.
pub struct ObserveContext<'a> {
    pub page: &'a PageState,
    pub platforms: &'a PlatformTable,
    pub audible: bool,
    /// Initial-playback grace is over
    pub armed: bool,
    pub media_count: usize,
    pub baseline: &'a mut PageBaseline,
}

/// A change one observer believes happened.
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    pub reasons: ChangeReasons,
    pub info: VideoInfo,
}

/// Common contract of the detection strategies.
pub trait MediaObserver: Debug {
    fn name(&self) -> &'static str;

    /// Record the signal and report a change if it shows one. Observers must
    /// keep recording state while `ctx.armed` is false but never report.
    fn observe(&mut self, signal: &Signal<'_>, ctx: &mut ObserveContext<'_>) -> Option<Detection>;

    /// Drop all per-context state.
    fn reset(&mut self);
}

// =============================================================================
// Native Media Elements
// =============================================================================

/// Tracks `<video>` and `<audio>` elements by snapshot comparison.
#[derive(Debug, Default)]
pub struct NativeMediaObserver {
    states: HashMap<MediaKey, MediaSnapshot>,
}

impl NativeMediaObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self, key: MediaKey) -> Option<&MediaSnapshot> {
        self.states.get(&key)
    }

    pub fn tracked(&self) -> usize {
        self.states.len()
    }
}

impl MediaObserver for NativeMediaObserver {
    fn name(&self) -> &'static str {
        "native-media"
    }

    fn observe(&mut self, signal: &Signal<'_>, ctx: &mut ObserveContext<'_>) -> Option<Detection> {
        match *signal {
            Signal::MediaAdded { key, state } => {
                self.states
                    .entry(key)
                    .or_insert_with(|| MediaSnapshot::capture(state, ctx.page, ctx.platforms));
                None
            }
            Signal::MediaRemoved { key } => {
                self.states.remove(&key);
                None
            }
            Signal::MediaSample { key, state } => {
                let current = MediaSnapshot::capture(state, ctx.page, ctx.platforms);
                let previous = self.states.insert(key, current.clone())?;
                if !ctx.armed {
                    return None;
                }

                let reasons = compare_snapshots(&previous, &current, ctx.audible);
                if reasons.is_empty() {
                    return None;
                }
                log::debug!("Media {} changed: {:?}", key, reasons);

                Some(Detection {
                    reasons,
                    info: VideoInfo {
                        video_id: current.video_id,
                        platform: current.platform,
                        previous_src: (previous.src != current.src).then_some(previous.src),
                        src: Some(current.src),
                        title: Some(current.title).filter(|t| !t.is_empty()),
                        duration: Some(current.duration),
                        page_title: Some(current.page_title),
                        previous_title: Some(previous.title).filter(|t| !t.is_empty()),
                        has_active_videos: true,
                        is_audible: ctx.audible,
                        source: ChangeSource::VideoDetection,
                        ..VideoInfo::default()
                    },
                })
            }
            _ => None,
        }
    }

    fn reset(&mut self) {
        self.states.clear();
    }
}

// =============================================================================
// Iframe Embeds
// =============================================================================

/// Watches the `src` of player-looking iframes. The first source seen for a
/// frame is only recorded.
#[derive(Debug, Default)]
pub struct IframeEmbedObserver {
    known: HashMap<FrameKey, String>,
}

impl IframeEmbedObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn known_src(&self, key: FrameKey) -> Option<&str> {
        self.known.get(&key).map(String::as_str)
    }
}

impl MediaObserver for IframeEmbedObserver {
    fn name(&self) -> &'static str {
        "iframe-embed"
    }

    fn observe(&mut self, signal: &Signal<'_>, ctx: &mut ObserveContext<'_>) -> Option<Detection> {
        match *signal {
            Signal::Iframe { key, src } => {
                if !is_player_url(src) {
                    return None;
                }
                let previous = match self.known.get(&key) {
                    Some(known) if known == src => return None,
                    Some(known) => Some(known.clone()),
                    None => None,
                };
                self.known.insert(key, src.to_string());

                let previous = previous?;
                if !ctx.armed {
                    return None;
                }
                log::debug!("Iframe {} navigated: {} -> {}", key, previous, src);

                let identity = ctx.platforms.identify(src);
                Some(Detection {
                    reasons: ChangeReasons::IFRAME_SRC,
                    info: VideoInfo {
                        video_id: identity.video_id,
                        platform: identity.platform,
                        src: Some(src.to_string()),
                        previous_src: Some(previous),
                        page_title: Some(ctx.page.title.clone()),
                        has_active_videos: ctx.media_count > 0,
                        is_audible: ctx.audible,
                        source: ChangeSource::IframeDetection,
                        ..VideoInfo::default()
                    },
                })
            }
            Signal::FrameRemoved { key } => {
                self.known.remove(&key);
                None
            }
            _ => None,
        }
    }

    fn reset(&mut self) {
        self.known.clear();
    }
}

// =============================================================================
// Audio Fallback
// =============================================================================

/// Covers players the DOM scan cannot see: the tab starts playing sound, no
/// media element is tracked, and the page metadata moved on.
#[derive(Debug, Default)]
pub struct AudioSignalObserver;

impl MediaObserver for AudioSignalObserver {
    fn name(&self) -> &'static str {
        "audio-signal"
    }

    fn observe(&mut self, signal: &Signal<'_>, ctx: &mut ObserveContext<'_>) -> Option<Detection> {
        if !matches!(signal, Signal::AudioStarted) || ctx.media_count > 0 {
            return None;
        }
        if !ctx.baseline.metadata.has_changed(&ctx.page.metadata) {
            return None;
        }
        ctx.baseline.metadata = ctx.page.metadata.clone();
        if !ctx.armed {
            return None;
        }
        log::debug!("Audio started with new metadata and no media elements");

        let identity = ctx.platforms.identify(&ctx.page.url);
        Some(Detection {
            reasons: ChangeReasons::AUDIO,
            info: VideoInfo {
                video_id: identity.video_id,
                platform: identity.platform,
                page_title: Some(ctx.page.title.clone()),
                previous_title: Some(ctx.baseline.title.clone()),
                has_active_videos: false,
                is_audible: true,
                source: ChangeSource::AudioDetection,
                ..VideoInfo::default()
            },
        })
    }

    fn reset(&mut self) {}
}

// =============================================================================
// Page Navigation
// =============================================================================

/// Compares the page against the shared baseline on history navigation and
/// periodic checks.
///
/// A URL change always counts. Title and metadata only count while media is
/// active or the tab is audible.
#[derive(Debug, Default)]
pub struct PageObserver;

impl MediaObserver for PageObserver {
    fn name(&self) -> &'static str {
        "page"
    }

    fn observe(&mut self, signal: &Signal<'_>, ctx: &mut ObserveContext<'_>) -> Option<Detection> {
        if !matches!(signal, Signal::PageCheck) {
            return None;
        }

        let page = ctx.page;
        let has_active = ctx.media_count > 0 && ctx.armed;
        let considered = has_active || ctx.audible;
        let previous_title = ctx.baseline.title.clone();
        let mut reasons = ChangeReasons::empty();

        if url_changed(&ctx.baseline.url, &page.url, ctx.platforms) {
            reasons |= ChangeReasons::URL;
        }
        if considered {
            if page_title_changed(&ctx.baseline.title, &page.title) {
                reasons |= ChangeReasons::PAGE_TITLE;
            }
            if ctx.baseline.metadata.has_changed(&page.metadata) {
                reasons |= ChangeReasons::METADATA;
            }
            ctx.baseline.title = page.title.clone();
            ctx.baseline.metadata = page.metadata.clone();
        }
        ctx.baseline.url = page.url.clone();

        if reasons.is_empty() || !ctx.armed {
            return None;
        }
        log::debug!("Page changed: {:?}", reasons);

        let identity = ctx.platforms.identify(&page.url);
        let source = if ctx.audible && !has_active {
            ChangeSource::AudioDetection
        } else {
            ChangeSource::PageDetection
        };
        Some(Detection {
            reasons,
            info: VideoInfo {
                video_id: identity.video_id,
                platform: identity.platform,
                page_title: Some(page.title.clone()),
                previous_title: Some(previous_title),
                has_active_videos: has_active,
                is_audible: ctx.audible,
                source,
                ..VideoInfo::default()
            },
        })
    }

    fn reset(&mut self) {}
}

/// Check whether a page URL moved to a different item.
///
/// Host, path and platform video id changes count; fragment changes count
/// unless only a `t=<seconds>` timestamp moved. Unparseable URLs count.
pub fn url_changed(old: &str, new: &str, platforms: &PlatformTable) -> bool {
    if old == new {
        return false;
    }
    let (old_url, new_url) = match (Url::parse(old), Url::parse(new)) {
        (Ok(a), Ok(b)) => (a, b),
        _ => return true,
    };

    if old_url.host_str() != new_url.host_str() || old_url.path() != new_url.path() {
        return true;
    }
    if let (Some(a), Some(b)) = (platforms.video_id(old), platforms.video_id(new)) {
        if a != b {
            return true;
        }
    }
    old_url.fragment() != new_url.fragment()
        && strip_timestamp(old_url.fragment()) != strip_timestamp(new_url.fragment())
}

fn strip_timestamp(fragment: Option<&str>) -> String {
    static TIMESTAMP: OnceLock<Option<Regex>> = OnceLock::new();
    let hash = fragment.map(|f| format!("#{f}")).unwrap_or_default();
    match TIMESTAMP.get_or_init(|| Regex::new(r"[#&]t=\d+").ok()) {
        Some(re) => re.replace(&hash, "").into_owned(),
        None => hash,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx<'a>(
        page: &'a PageState,
        platforms: &'a PlatformTable,
        baseline: &'a mut PageBaseline,
        armed: bool,
        audible: bool,
        media_count: usize,
    ) -> ObserveContext<'a> {
        ObserveContext {
            page,
            platforms,
            audible,
            armed,
            media_count,
            baseline,
        }
    }

    fn media(src: &str, time: f64) -> MediaState {
        MediaState {
            src: src.to_string(),
            current_time: time,
            duration: 100.0,
            ..MediaState::default()
        }
    }

    #[test]
    fn test_url_changed() {
        let t = PlatformTable::default();
        assert!(!url_changed("https://a.com/x", "https://a.com/x", &t));
        assert!(url_changed("https://a.com/x", "https://b.com/x", &t));
        assert!(url_changed("https://a.com/x", "https://a.com/y", &t));
        assert!(url_changed(
            "https://www.youtube.com/watch?v=1",
            "https://www.youtube.com/watch?v=2",
            &t
        ));
        assert!(!url_changed(
            "https://www.youtube.com/watch?v=1",
            "https://www.youtube.com/watch?v=1&list=PL",
            &t
        ));
        assert!(!url_changed("https://a.com/x#t=10", "https://a.com/x#t=95", &t));
        assert!(url_changed("https://a.com/x#ep1", "https://a.com/x#ep2", &t));
        assert!(url_changed("garbage", "https://a.com/", &t));
    }

    #[test]
    fn test_native_observer_reports_after_grace() {
        let platforms = PlatformTable::default();
        let page = PageState::new("https://example.com/", "Page");
        let mut baseline = PageBaseline::from_page(&page);
        let mut observer = NativeMediaObserver::new();

        let first = media("https://cdn/a.mp4", 5.0);
        let second = media("https://cdn/b.mp4", 5.0);
        let third = media("https://cdn/c.mp4", 5.0);

        let mut c = ctx(&page, &platforms, &mut baseline, false, false, 1);
        assert!(observer.observe(&Signal::MediaAdded { key: 1, state: &first }, &mut c).is_none());
        // Grace: recorded, not reported
        assert!(observer.observe(&Signal::MediaSample { key: 1, state: &second }, &mut c).is_none());
        assert_eq!(observer.snapshot(1).unwrap().src, "https://cdn/b.mp4");

        c.armed = true;
        let detection = observer
            .observe(&Signal::MediaSample { key: 1, state: &third }, &mut c)
            .unwrap();
        assert!(detection.reasons.contains(ChangeReasons::SOURCE));
        assert_eq!(detection.info.previous_src.as_deref(), Some("https://cdn/b.mp4"));
        assert_eq!(detection.info.source, ChangeSource::VideoDetection);

        assert!(observer.observe(&Signal::MediaRemoved { key: 1 }, &mut c).is_none());
        assert_eq!(observer.tracked(), 0);
    }

    #[test]
    fn test_iframe_first_sighting_recorded() {
        let platforms = PlatformTable::default();
        let page = PageState::new("https://blog.example.com/", "Blog");
        let mut baseline = PageBaseline::from_page(&page);
        let mut observer = IframeEmbedObserver::new();
        let mut c = ctx(&page, &platforms, &mut baseline, true, false, 0);

        let a = "https://www.youtube.com/embed/aaa";
        let b = "https://www.youtube.com/embed/bbb";
        assert!(observer.observe(&Signal::Iframe { key: 7, src: a }, &mut c).is_none());
        assert!(observer.observe(&Signal::Iframe { key: 7, src: a }, &mut c).is_none());
        let detection = observer.observe(&Signal::Iframe { key: 7, src: b }, &mut c).unwrap();
        assert_eq!(detection.reasons, ChangeReasons::IFRAME_SRC);
        assert_eq!(detection.info.video_id.as_deref(), Some("bbb"));

        // Non-player frames are ignored entirely
        assert!(observer
            .observe(&Signal::Iframe { key: 8, src: "https://ads.example.com/x" }, &mut c)
            .is_none());
        assert_eq!(observer.known_src(8), None);
    }

    #[test]
    fn test_audio_observer_needs_new_metadata() {
        let platforms = PlatformTable::default();
        let mut page = PageState::new("https://radio.example.com/", "Radio");
        let mut baseline = PageBaseline::from_page(&page);
        let mut observer = AudioSignalObserver;

        {
            let mut c = ctx(&page, &platforms, &mut baseline, true, true, 0);
            assert!(observer.observe(&Signal::AudioStarted, &mut c).is_none());
        }

        page.metadata.insert("og:title", "Song 2");
        {
            let mut c = ctx(&page, &platforms, &mut baseline, true, true, 1);
            assert!(observer.observe(&Signal::AudioStarted, &mut c).is_none());
        }
        let mut c = ctx(&page, &platforms, &mut baseline, true, true, 0);
        let detection = observer.observe(&Signal::AudioStarted, &mut c).unwrap();
        assert_eq!(detection.reasons, ChangeReasons::AUDIO);
        assert_eq!(detection.info.source, ChangeSource::AudioDetection);
        assert_eq!(baseline.metadata.get("og:title"), Some("Song 2"));
    }

    #[test]
    fn test_page_observer() {
        let platforms = PlatformTable::default();
        let start = PageState::new("https://www.youtube.com/watch?v=1", "One");
        let mut baseline = PageBaseline::from_page(&start);
        let mut observer = PageObserver;

        // Title change while idle is ignored and does not move the baseline
        let retitled = PageState::new("https://www.youtube.com/watch?v=1", "Other");
        let mut c = ctx(&retitled, &platforms, &mut baseline, true, false, 0);
        assert!(observer.observe(&Signal::PageCheck, &mut c).is_none());
        assert_eq!(baseline.title, "One");

        let next = PageState::new("https://www.youtube.com/watch?v=2", "Two");
        let mut c = ctx(&next, &platforms, &mut baseline, true, false, 1);
        let detection = observer.observe(&Signal::PageCheck, &mut c).unwrap();
        assert!(detection.reasons.contains(ChangeReasons::URL | ChangeReasons::PAGE_TITLE));
        assert_eq!(detection.info.previous_title.as_deref(), Some("One"));
        assert_eq!(detection.info.video_id.as_deref(), Some("2"));
        assert_eq!(baseline.url, "https://www.youtube.com/watch?v=2");

        // Same page again: nothing
        let mut c = ctx(&next, &platforms, &mut baseline, true, false, 1);
        assert!(observer.observe(&Signal::PageCheck, &mut c).is_none());
    }
}
