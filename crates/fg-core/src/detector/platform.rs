//! Video platform table.
//!
//! Each entry knows how to recognize its host, pull a video id out of a URL,
//! and where the player renders the current title. Hosts not in the table
//! fall back to the URL without its query string as the id.

use regex::Regex;
use url::Url;

use crate::url::strip_query;

/// Substrings that make an iframe source look like an embedded player.
const PLAYER_MARKERS: [&str; 7] = ["/embed", "/player", "watch", "video", "stream", "media", "play"];

/// One recognized video platform.
#[derive(Debug, Clone)]
pub struct Platform {
    pub name: String,
    domain: Regex,
    video_id: Regex,
    pub title_selector: String,
}

impl Platform {
    /// Build a platform entry. Returns `None` if either pattern is invalid.
    pub fn new(name: &str, domain: &str, video_id: &str, title_selector: &str) -> Option<Self> {
        Some(Self {
            name: name.to_string(),
            domain: Regex::new(domain).ok()?,
            video_id: Regex::new(video_id).ok()?,
            title_selector: title_selector.to_string(),
        })
    }

    #[inline]
    pub fn matches(&self, url: &str) -> bool {
        self.domain.is_match(url)
    }

    /// First capture group of the id pattern.
    pub fn video_id(&self, url: &str) -> Option<String> {
        self.video_id
            .captures(url)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().to_string())
    }
}

/// Video id and platform name resolved for a URL.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VideoIdentity {
    pub video_id: Option<String>,
    pub platform: Option<String>,
}

/// Ordered platform list; the first entry whose domain pattern matches wins.
#[derive(Debug, Clone)]
pub struct PlatformTable {
    platforms: Vec<Platform>,
}

impl Default for PlatformTable {
    fn default() -> Self {
        let builtin = [
            (
                "youtube",
                r"youtube\.com|youtu\.be",
                r"(?:v=|/embed/|/v/|youtu\.be/|/watch\?v=|/watch\?.+&v=)([^#&?/]+)",
                ".title.ytd-video-primary-info-renderer, .ytp-title-link",
            ),
            (
                "vimeo",
                r"vimeo\.com",
                r"(?:vimeo\.com/|player\.vimeo\.com/video/)([0-9]+)",
                ".vp-title",
            ),
            (
                "facebook",
                r"facebook\.com",
                r"facebook\.com/.*/videos/([0-9]+)",
                ".pvs-header-actions__title",
            ),
            ("netflix", r"netflix\.com", r"netflix\.com/watch/(\d+)", ".video-title, .title-logo"),
            ("hulu", r"hulu\.com", r"hulu\.com/watch/(\d+)", ".metadata-area__second-line"),
        ];

        Self {
            platforms: builtin
                .iter()
                .filter_map(|(name, domain, id, selector)| Platform::new(name, domain, id, selector))
                .collect(),
        }
    }
}

impl PlatformTable {
    pub fn empty() -> Self {
        Self { platforms: Vec::new() }
    }

    /// Append a platform. Entries added later have lower priority.
    pub fn push(&mut self, platform: Platform) {
        self.platforms.push(platform);
    }

    pub fn len(&self) -> usize {
        self.platforms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.platforms.is_empty()
    }

    pub fn find(&self, url: &str) -> Option<&Platform> {
        self.platforms.iter().find(|p| p.matches(url))
    }

    /// Resolve the video identity of a URL, falling back to the URL without
    /// its query string and the hostname for unknown platforms.
    pub fn identify(&self, url: &str) -> VideoIdentity {
        if let Some(platform) = self.find(url) {
            if let Some(id) = platform.video_id(url) {
                return VideoIdentity {
                    video_id: Some(id),
                    platform: Some(platform.name.clone()),
                };
            }
        }

        match Url::parse(url) {
            Ok(parsed) => VideoIdentity {
                video_id: Some(strip_query(url).to_string()),
                platform: parsed.host_str().map(str::to_string),
            },
            Err(_) => VideoIdentity::default(),
        }
    }

    /// Platform video id only, without the fallback.
    pub fn video_id(&self, url: &str) -> Option<String> {
        self.find(url).and_then(|p| p.video_id(url))
    }

    /// CSS selector for the player's title element.
    pub fn title_selector(&self, url: &str) -> Option<&str> {
        self.find(url).map(|p| p.title_selector.as_str())
    }
}

/// Check whether an iframe source looks like an embedded player.
pub fn is_player_url(src: &str) -> bool {
    let lower = src.to_ascii_lowercase();
    PLAYER_MARKERS.iter().any(|marker| lower.contains(marker))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_youtube_ids() {
        let table = PlatformTable::default();
        let cases = [
            ("https://www.youtube.com/watch?v=dQw4w9WgXcQ", "dQw4w9WgXcQ"),
            ("https://www.youtube.com/watch?list=PL1&v=abc123&t=4", "abc123"),
            ("https://www.youtube.com/embed/xyz789?autoplay=1", "xyz789"),
            ("https://youtu.be/short1", "short1"),
        ];
        for (url, id) in cases {
            let identity = table.identify(url);
            assert_eq!(identity.video_id.as_deref(), Some(id), "{url}");
            assert_eq!(identity.platform.as_deref(), Some("youtube"));
        }
    }

    #[test]
    fn test_other_platforms() {
        let table = PlatformTable::default();
        assert_eq!(table.video_id("https://vimeo.com/123456"), Some("123456".to_string()));
        assert_eq!(
            table.video_id("https://player.vimeo.com/video/42?h=1"),
            Some("42".to_string())
        );
        assert_eq!(
            table.video_id("https://www.facebook.com/page/videos/9876/"),
            Some("9876".to_string())
        );
        assert_eq!(table.video_id("https://www.netflix.com/watch/80100172"), Some("80100172".to_string()));
        assert_eq!(table.video_id("https://www.hulu.com/watch/555"), Some("555".to_string()));
        assert_eq!(table.title_selector("https://vimeo.com/1"), Some(".vp-title"));
    }

    #[test]
    fn test_fallback_identity() {
        let table = PlatformTable::default();
        let identity = table.identify("https://media.example.com/clips/7.mp4?sig=abc");
        assert_eq!(identity.video_id.as_deref(), Some("https://media.example.com/clips/7.mp4"));
        assert_eq!(identity.platform.as_deref(), Some("media.example.com"));

        // Known platform without an id in the URL also falls back
        let home = table.identify("https://www.youtube.com/feed/subscriptions");
        assert_eq!(home.platform.as_deref(), Some("www.youtube.com"));

        assert_eq!(table.identify("not a url"), VideoIdentity::default());
        assert_eq!(table.video_id("https://example.com/v/1"), None);
    }

    #[test]
    fn test_custom_platform() {
        let mut table = PlatformTable::empty();
        assert!(table.is_empty());
        table.push(Platform::new("twitch", r"twitch\.tv", r"twitch\.tv/videos/(\d+)", ".title").unwrap());
        assert_eq!(table.video_id("https://www.twitch.tv/videos/99"), Some("99".to_string()));
        assert!(Platform::new("bad", "(", "x", "").is_none());
    }

    #[test]
    fn test_is_player_url() {
        assert!(is_player_url("https://www.youtube.com/embed/abc"));
        assert!(is_player_url("https://player.vimeo.com/video/1"));
        assert!(is_player_url("https://cdn.example.com/STREAM/live"));
        assert!(!is_player_url("https://ads.example.com/banner.html"));
        assert!(!is_player_url(""));
    }
}
