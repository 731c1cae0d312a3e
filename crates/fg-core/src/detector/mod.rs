//! Video-change detection for one browsing context.
//!
//! The detector never touches the DOM. The host samples media elements,
//! iframes and the document into plain structs and feeds them in together
//! with the current time; the detector answers with the messages to send to
//! the background engine.
//!
//! # Signals
//!
//! - media element events ([`VideoChangeDetector::on_media_event`])
//! - iframe `src` mutations ([`VideoChangeDetector::on_iframe`])
//! - history navigation and the periodic page check ([`VideoChangeDetector::on_page_check`])
//! - tab audibility pushed by the engine ([`VideoChangeDetector::on_audio_status`])
//! - periodic discovery scans ([`VideoChangeDetector::sync`])
//!
//! Each signal goes to every [`MediaObserver`]. A change survives only when
//! the initial-playback grace is over and no other change passed for the same
//! domain within the debounce window.

pub mod dom;
pub mod metadata;
pub mod observer;
pub mod platform;
pub mod state;

use std::collections::BTreeSet;

pub use dom::{collect_media, Discovered, NodeKind, NodeSource};
pub use metadata::Metadata;
pub use observer::{
    AudioSignalObserver, Detection, IframeEmbedObserver, MediaObserver, NativeMediaObserver, ObserveContext,
    PageBaseline, PageObserver, Signal,
};
pub use platform::{Platform, PlatformTable};
pub use state::{ChangeReasons, FrameKey, MediaKey, MediaState, PageState};

use crate::limiter::RateLimiter;
use crate::message::{MediaCleared, Message, VideoChanged};
use crate::types::Timestamp;
use crate::url::domain_of;

// =============================================================================
// Configuration
// =============================================================================

/// Timing knobs of the detector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DetectorConfig {
    /// Changes within this window of the last one are dropped
    pub debounce_ms: u64,
    /// Detection starts at the latest this long after load
    pub grace_ms: u64,
    /// Regular discovery scan period
    pub scan_interval_ms: u64,
    /// Scan period right after a change
    pub aggressive_interval_ms: u64,
    /// How long the aggressive period lasts
    pub aggressive_window_ms: u64,
    /// Delay before re-checking the page after audio stops
    pub silence_check_ms: u64,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            debounce_ms: 500,
            grace_ms: 5_000,
            scan_interval_ms: 1_000,
            aggressive_interval_ms: 200,
            aggressive_window_ms: 5_000,
            silence_check_ms: 500,
        }
    }
}

/// What the host should do after an audibility update.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AudioReaction {
    pub change: Option<VideoChanged>,
    /// Run a discovery scan now; sound may come from a player not seen yet
    pub rescan: bool,
}

// =============================================================================
// Detector
// =============================================================================

#[derive(Debug)]
pub struct VideoChangeDetector {
    config: DetectorConfig,
    platforms: PlatformTable,
    observers: Vec<Box<dyn MediaObserver>>,
    baseline: PageBaseline,
    media: BTreeSet<MediaKey>,
    frames: BTreeSet<FrameKey>,
    change_count: u32,
    armed: bool,
    started_at: Timestamp,
    audible: bool,
    limiter: RateLimiter<String>,
    aggressive_until: Option<Timestamp>,
    silence_check_at: Option<Timestamp>,
}

impl VideoChangeDetector {
    /// Start detecting in a freshly loaded page.
    pub fn new(config: DetectorConfig, page: &PageState, now: Timestamp) -> Self {
        Self {
            config,
            platforms: PlatformTable::default(),
            observers: vec![
                Box::new(NativeMediaObserver::new()),
                Box::new(IframeEmbedObserver::new()),
                Box::new(AudioSignalObserver),
                Box::new(PageObserver),
            ],
            baseline: PageBaseline::from_page(page),
            media: BTreeSet::new(),
            frames: BTreeSet::new(),
            change_count: 0,
            armed: false,
            started_at: now,
            audible: false,
            limiter: RateLimiter::new(config.debounce_ms),
            aggressive_until: None,
            silence_check_at: None,
        }
    }

    /// Replace the platform table.
    pub fn with_platforms(mut self, platforms: PlatformTable) -> Self {
        self.platforms = platforms;
        self
    }

    /// Add an observer after the built-in ones.
    pub fn with_observer(mut self, observer: Box<dyn MediaObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    pub fn platforms(&self) -> &PlatformTable {
        &self.platforms
    }

    /// Changes reported since load or the last reset.
    pub fn change_count(&self) -> u32 {
        self.change_count
    }

    pub fn media_count(&self) -> usize {
        self.media.len()
    }

    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    pub fn is_armed(&self) -> bool {
        self.armed
    }

    pub fn is_audible(&self) -> bool {
        self.audible
    }

    // =========================================================================
    // Signals
    // =========================================================================

    /// Apply a discovery scan: register new elements, forget vanished ones,
    /// and during the aggressive period re-sample every known element.
    ///
    /// Emits `MEDIA_CLEARED` when the last tracked media element disappears.
    pub fn sync(&mut self, discovered: &Discovered, page: &PageState, now: Timestamp) -> Vec<Message> {
        self.tick_grace(now);
        let mut out = Vec::new();
        let had_media = !self.media.is_empty();
        let resample = self.is_aggressive(now);

        for (key, state) in &discovered.media {
            if self.media.insert(*key) {
                log::debug!("Tracking media element {} ({})", key, state.src);
                self.dispatch(&Signal::MediaAdded { key: *key, state }, page, now);
            } else if resample {
                if let Some(change) = self.sample(*key, state, page, now) {
                    out.push(Message::VideoChanged(change));
                }
            }
        }

        let present: BTreeSet<MediaKey> = discovered.media.iter().map(|(k, _)| *k).collect();
        let vanished: Vec<MediaKey> = self.media.difference(&present).copied().collect();
        for key in vanished {
            self.media.remove(&key);
            self.dispatch(&Signal::MediaRemoved { key }, page, now);
        }

        for (key, src) in &discovered.iframes {
            self.frames.insert(*key);
            if let Some(change) = self.dispatch(&Signal::Iframe { key: *key, src }, page, now) {
                out.push(Message::VideoChanged(change));
            }
        }

        let present: BTreeSet<FrameKey> = discovered.iframes.iter().map(|(k, _)| *k).collect();
        let vanished: Vec<FrameKey> = self.frames.difference(&present).copied().collect();
        for key in vanished {
            self.frames.remove(&key);
            self.dispatch(&Signal::FrameRemoved { key }, page, now);
        }

        if had_media && self.media.is_empty() {
            log::debug!("No media left on page, resetting change count");
            self.change_count = 0;
            self.aggressive_until = None;
            out.push(Message::MediaCleared(MediaCleared { url: page.url.clone() }));
        }

        out
    }

    /// A media element fired an event. Unknown elements are registered and
    /// produce no change.
    pub fn on_media_event(
        &mut self,
        key: MediaKey,
        state: &MediaState,
        page: &PageState,
        now: Timestamp,
    ) -> Option<VideoChanged> {
        self.tick_grace(now);
        if self.media.insert(key) {
            self.dispatch(&Signal::MediaAdded { key, state }, page, now);
            return None;
        }
        self.sample(key, state, page, now)
    }

    /// An iframe was discovered or changed its `src`.
    pub fn on_iframe(&mut self, key: FrameKey, src: &str, page: &PageState, now: Timestamp) -> Option<VideoChanged> {
        self.tick_grace(now);
        self.frames.insert(key);
        self.dispatch(&Signal::Iframe { key, src }, page, now)
    }

    /// History navigation, hash change, or the periodic page check.
    pub fn on_page_check(&mut self, page: &PageState, now: Timestamp) -> Option<VideoChanged> {
        self.tick_grace(now);
        self.dispatch(&Signal::PageCheck, page, now)
    }

    /// `AUDIO_STATUS_CHANGED` from the engine.
    pub fn on_audio_status(&mut self, audible: bool, page: &PageState, now: Timestamp) -> AudioReaction {
        self.tick_grace(now);
        let was_audible = self.audible;
        self.audible = audible;

        if audible && !was_audible {
            log::debug!("Audio started, scanning for hidden players");
            self.silence_check_at = None;
            self.start_aggressive(now);
            return AudioReaction {
                change: self.dispatch(&Signal::AudioStarted, page, now),
                rescan: true,
            };
        }
        if !audible && was_audible {
            self.silence_check_at = Some(now + self.config.silence_check_ms);
        }
        AudioReaction::default()
    }

    /// Timer housekeeping: ends the grace period and runs the deferred page
    /// check once audio has stayed off.
    pub fn tick(&mut self, page: &PageState, now: Timestamp) -> Option<VideoChanged> {
        self.tick_grace(now);
        match self.silence_check_at {
            Some(at) if now >= at => {
                self.silence_check_at = None;
                if self.audible {
                    None
                } else {
                    self.dispatch(&Signal::PageCheck, page, now)
                }
            }
            _ => None,
        }
    }

    /// Tear down all per-context state. The grace period starts over at `now`
    /// and the next page check records a fresh baseline.
    pub fn unload(&mut self, now: Timestamp) {
        self.change_count = 0;
        self.media.clear();
        self.frames.clear();
        self.armed = false;
        self.started_at = now;
        self.baseline = PageBaseline::default();
        self.aggressive_until = None;
        self.silence_check_at = None;
        self.limiter.clear();
        for observer in &mut self.observers {
            observer.reset();
        }
    }

    // =========================================================================
    // Scan Cadence
    // =========================================================================

    /// Delay until the host should scan again.
    pub fn next_scan_delay(&self, now: Timestamp) -> u64 {
        if self.is_aggressive(now) {
            self.config.aggressive_interval_ms
        } else {
            self.config.scan_interval_ms
        }
    }

    /// Aggressive scanning only runs while there are elements to re-sample.
    pub fn is_aggressive(&self, now: Timestamp) -> bool {
        !self.media.is_empty() && self.aggressive_until.is_some_and(|until| now < until)
    }

    fn start_aggressive(&mut self, now: Timestamp) {
        if self.media.is_empty() {
            return;
        }
        self.aggressive_until = Some(now + self.config.aggressive_window_ms);
    }

    // =========================================================================
    // Internals
    // =========================================================================

    fn tick_grace(&mut self, now: Timestamp) {
        if !self.armed && now.saturating_sub(self.started_at) >= self.config.grace_ms {
            log::debug!("Grace period over");
            self.armed = true;
        }
    }

    fn sample(&mut self, key: MediaKey, state: &MediaState, page: &PageState, now: Timestamp) -> Option<VideoChanged> {
        // The sample that ends the grace is itself not compared
        if !self.armed && state.is_playing() && state.current_time > 0.0 {
            self.dispatch(&Signal::MediaSample { key, state }, page, now);
            log::debug!("Initial playback on media element {}", key);
            self.armed = true;
            return None;
        }
        self.dispatch(&Signal::MediaSample { key, state }, page, now)
    }

    fn dispatch(&mut self, signal: &Signal<'_>, page: &PageState, now: Timestamp) -> Option<VideoChanged> {
        let mut ctx = ObserveContext {
            page,
            platforms: &self.platforms,
            audible: self.audible,
            armed: self.armed,
            media_count: self.media.len(),
            baseline: &mut self.baseline,
        };

        let mut found: Option<Detection> = None;
        for observer in &mut self.observers {
            if let Some(detection) = observer.observe(signal, &mut ctx) {
                log::trace!("{} reported {:?}", observer.name(), detection.reasons);
                if let Some(first) = found.as_mut() {
                    first.reasons |= detection.reasons;
                } else {
                    found = Some(detection);
                }
            }
        }

        found.and_then(|detection| self.emit(detection, page, now))
    }

    fn emit(&mut self, detection: Detection, page: &PageState, now: Timestamp) -> Option<VideoChanged> {
        if !self.armed {
            return None;
        }
        let key = domain_of(&page.url).unwrap_or_else(|| page.url.clone());
        if !self.limiter.check(&key, now) {
            log::debug!("Ignoring rapid change on {} ({:?})", key, detection.reasons);
            return None;
        }

        self.change_count += 1;
        let mut info = detection.info;
        info.reasons = detection.reasons.labels();
        info.media_count = self.media.len() as u32;
        log::debug!(
            "Video change #{} on {} via {:?}: {:?}",
            self.change_count,
            key,
            info.source,
            detection.reasons
        );

        self.start_aggressive(now);
        Some(VideoChanged {
            url: page.url.clone(),
            change_count: self.change_count,
            video_info: info,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::dom::tests::Tree;
    use super::*;
    use crate::message::ChangeSource;

    const GRACE: u64 = 5_000;

    fn page(url: &str, title: &str) -> PageState {
        PageState::new(url, title)
    }

    fn playing(src: &str, time: f64) -> MediaState {
        MediaState {
            src: src.to_string(),
            current_time: time,
            paused: false,
            duration: 300.0,
            ..MediaState::default()
        }
    }

    fn armed_detector(p: &PageState) -> VideoChangeDetector {
        let mut d = VideoChangeDetector::new(DetectorConfig::default(), p, 0);
        d.on_media_event(1, &playing("https://cdn/a.mp4", 0.0), p, 10);
        d.on_media_event(1, &playing("https://cdn/a.mp4", 2.0), p, 20);
        assert!(d.is_armed());
        d
    }

    #[test]
    fn test_grace_by_playback() {
        let p = page("https://example.com/", "Ex");
        let mut d = VideoChangeDetector::new(DetectorConfig::default(), &p, 0);
        assert!(d.on_media_event(1, &playing("https://cdn/a.mp4", 0.0), &p, 10).is_none());
        assert!(!d.is_armed());
        // First playing sample arms without counting
        assert!(d.on_media_event(1, &playing("https://cdn/b.mp4", 1.5), &p, 20).is_none());
        assert!(d.is_armed());
        assert_eq!(d.change_count(), 0);

        let change = d.on_media_event(1, &playing("https://cdn/c.mp4", 1.5), &p, 1_000).unwrap();
        assert_eq!(change.change_count, 1);
        assert_eq!(change.video_info.media_count, 1);
        assert!(change.video_info.reasons.contains(&"source".to_string()));
    }

    #[test]
    fn test_grace_by_timeout() {
        let p = page("https://example.com/", "Ex");
        let mut d = VideoChangeDetector::new(DetectorConfig::default(), &p, 0);
        let mut paused = playing("https://cdn/a.mp4", 0.0);
        paused.paused = true;
        d.on_media_event(1, &paused, &p, 10);

        let mut swapped = paused.clone();
        swapped.src = "https://cdn/b.mp4".into();
        assert!(d.on_media_event(1, &swapped, &p, GRACE - 1).is_none());
        assert!(!d.is_armed());

        swapped.src = "https://cdn/c.mp4".into();
        assert!(d.on_media_event(1, &swapped, &p, GRACE).is_some());
    }

    #[test]
    fn test_debounce_collapses_bursts() {
        let p = page("https://example.com/", "Ex");
        let mut d = armed_detector(&p);

        assert!(d.on_media_event(1, &playing("https://cdn/b.mp4", 1.0), &p, 1_000).is_some());
        assert!(d.on_media_event(1, &playing("https://cdn/c.mp4", 1.0), &p, 1_200).is_none());
        assert_eq!(d.change_count(), 1);
        assert!(d.on_media_event(1, &playing("https://cdn/d.mp4", 1.0), &p, 1_500).is_some());
        assert_eq!(d.change_count(), 2);
    }

    #[test]
    fn test_sync_registers_and_clears() {
        let p = page("https://example.com/", "Ex");
        let mut d = VideoChangeDetector::new(DetectorConfig::default(), &p, 0);

        let mut tree = Tree::new();
        let host = tree.child(0, NodeKind::Other);
        let shadow = tree.attach_shadow(host);
        tree.child(shadow, NodeKind::Media(4, playing("https://cdn/a.mp4", 0.0)));
        tree.child(0, NodeKind::Iframe(5, "https://www.youtube.com/embed/a".into()));

        let found = collect_media(&tree, &0);
        assert!(d.sync(&found, &p, 100).is_empty());
        assert_eq!(d.media_count(), 1);
        assert_eq!(d.frame_count(), 1);

        // Counter grows, then the element goes away
        d.on_media_event(4, &playing("https://cdn/a.mp4", 3.0), &p, 200);
        d.on_media_event(4, &playing("https://cdn/b.mp4", 0.5), &p, 1_000);
        assert_eq!(d.change_count(), 1);

        let out = d.sync(&Discovered::default(), &p, 2_000);
        assert_eq!(out, vec![Message::MediaCleared(MediaCleared { url: p.url.clone() })]);
        assert_eq!(d.change_count(), 0);
        assert_eq!(d.frame_count(), 0);
    }

    #[test]
    fn test_iframe_change_through_sync() {
        let p = page("https://blog.example.com/", "Blog");
        let mut d = VideoChangeDetector::new(DetectorConfig::default(), &p, 0);
        let first = Discovered {
            media: vec![],
            iframes: vec![(1, "https://www.youtube.com/embed/a".into())],
        };
        let second = Discovered {
            media: vec![],
            iframes: vec![(1, "https://www.youtube.com/embed/b".into())],
        };
        assert!(d.sync(&first, &p, 100).is_empty());
        let out = d.sync(&second, &p, GRACE + 100);
        match out.as_slice() {
            [Message::VideoChanged(change)] => {
                assert_eq!(change.video_info.source, ChangeSource::IframeDetection);
                assert_eq!(change.video_info.video_id.as_deref(), Some("b"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_page_navigation() {
        let p1 = page("https://www.youtube.com/watch?v=1", "One");
        let mut d = armed_detector(&p1);
        let p2 = page("https://www.youtube.com/watch?v=2", "Two");
        let change = d.on_page_check(&p2, 2_000).unwrap();
        assert_eq!(change.url, p2.url);
        assert_eq!(change.video_info.source, ChangeSource::PageDetection);
        assert!(change.video_info.has_active_videos);
        assert!(d.on_page_check(&p2, 3_000).is_none());
    }

    #[test]
    fn test_audio_start_without_media() {
        let p = page("https://radio.example.com/", "Radio");
        let mut d = VideoChangeDetector::new(DetectorConfig::default(), &p, 0);

        let mut next = p.clone();
        next.metadata.insert("og:title", "Track 2");
        let reaction = d.on_audio_status(true, &next, GRACE + 1);
        assert!(reaction.rescan);
        let change = reaction.change.unwrap();
        assert_eq!(change.video_info.source, ChangeSource::AudioDetection);
        assert!(change.video_info.is_audible);
        assert_eq!(change.video_info.media_count, 0);

        // Repeated audible status is not a transition
        assert_eq!(d.on_audio_status(true, &next, GRACE + 2_000), AudioReaction::default());
    }

    #[test]
    fn test_silence_triggers_deferred_page_check() {
        let p = page("https://radio.example.com/a", "A");
        let mut d = VideoChangeDetector::new(DetectorConfig::default(), &p, 0);
        d.on_audio_status(true, &p, GRACE + 1);
        d.on_audio_status(false, &p, GRACE + 1_000);

        let moved = page("https://radio.example.com/b", "B");
        assert!(d.tick(&moved, GRACE + 1_200).is_none());
        let change = d.tick(&moved, GRACE + 1_500).unwrap();
        assert!(change.video_info.reasons.contains(&"url".to_string()));
        assert!(d.tick(&moved, GRACE + 3_000).is_none());
    }

    #[test]
    fn test_aggressive_scan_window() {
        let p = page("https://example.com/", "Ex");
        let mut d = armed_detector(&p);
        assert_eq!(d.next_scan_delay(100), 1_000);

        d.on_media_event(1, &playing("https://cdn/b.mp4", 1.0), &p, 1_000).unwrap();
        assert!(d.is_aggressive(1_000));
        assert_eq!(d.next_scan_delay(5_999), 200);
        assert_eq!(d.next_scan_delay(6_000), 1_000);
    }

    #[test]
    fn test_aggressive_scan_resamples_known_media() {
        let p = page("https://example.com/", "Ex");
        let mut d = armed_detector(&p);
        d.on_media_event(1, &playing("https://cdn/b.mp4", 1.0), &p, 1_000).unwrap();

        let scan = Discovered {
            media: vec![(1, playing("https://cdn/c.mp4", 0.5))],
            iframes: vec![],
        };
        let out = d.sync(&scan, &p, 1_600);
        assert_eq!(out.len(), 1);
        assert_eq!(d.change_count(), 2);
    }

    #[test]
    fn test_unload_resets() {
        let p = page("https://example.com/", "Ex");
        let mut d = armed_detector(&p);
        d.on_media_event(1, &playing("https://cdn/b.mp4", 1.0), &p, 1_000).unwrap();
        d.unload(1_000);
        assert_eq!(d.change_count(), 0);
        assert_eq!(d.media_count(), 0);
        assert!(!d.is_armed());
        assert!(!d.is_aggressive(1_000));
    }

    #[test]
    fn test_unload_restarts_grace() {
        let p = page("https://example.com/", "Ex");
        let mut d = armed_detector(&p);
        d.unload(10_000);

        let mut paused = playing("https://cdn/x.mp4", 0.0);
        paused.paused = true;
        assert!(d.on_media_event(2, &paused, &p, 10_050).is_none());
        paused.src = "https://cdn/y.mp4".into();
        assert!(d.on_media_event(2, &paused, &p, 10_100).is_none());
        assert!(!d.is_armed());
        assert_eq!(d.change_count(), 0);

        paused.src = "https://cdn/z.mp4".into();
        let change = d.on_media_event(2, &paused, &p, 10_000 + GRACE).unwrap();
        assert_eq!(change.change_count, 1);
    }

    #[test]
    fn test_unload_forgets_old_page() {
        let old = page("https://example.com/a", "Old");
        let mut d = armed_detector(&old);
        d.unload(10_000);

        // The first check after unload records the new page without reporting
        let new = page("https://example.com/b", "New");
        assert!(d.on_page_check(&new, 10_500).is_none());
        assert!(d.on_page_check(&new, 10_000 + GRACE).is_none());
        assert_eq!(d.change_count(), 0);
    }
}
