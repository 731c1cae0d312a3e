//! Interstitial page contract.
//!
//! Blocked tabs land on `<interstitial>?type=<category>&url=<original>`. The
//! page decodes that context, asks for a purpose when the category needs one,
//! asks for a limit type, counts down the category's wait time and then
//! requests an allowance with `ALLOW_TEMPORARILY`.

use url::Url;

use crate::message::{AllowTemporarily, Message};
use crate::settings::{CategorySettings, TimerSettings};
use crate::types::{Category, LimitType, Purpose, Timestamp};

/// Interstitial page path inside the extension package.
pub const DEFAULT_INTERSTITIAL_PATH: &str = "build/redirect.html";

// =============================================================================
// Redirect URL
// =============================================================================

/// Build the interstitial URL for a blocked navigation.
pub fn redirect_url(base: &str, category: Category, original: &str) -> String {
    format!(
        "{}?type={}&url={}",
        base,
        category.as_str(),
        urlencoding::encode(original)
    )
}

/// What the interstitial knows about the blocked navigation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterstitialContext {
    pub category: Category,
    pub original_url: String,
}

/// Decode an interstitial URL. Returns `None` when `type` is missing or not
/// a category; a missing `url` decodes as empty.
pub fn parse_redirect(url: &str) -> Option<InterstitialContext> {
    let parsed = Url::parse(url).ok()?;
    let mut category = None;
    let mut original_url = String::new();

    for (key, value) in parsed.query_pairs() {
        match key.as_ref() {
            "type" => category = Category::parse(&value),
            "url" => original_url = value.into_owned(),
            _ => {}
        }
    }

    Some(InterstitialContext {
        category: category?,
        original_url,
    })
}

// =============================================================================
// Session
// =============================================================================

/// Where the user is on the interstitial.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    ChoosePurpose,
    ChooseLimit,
    Countdown { remaining_secs: u32 },
    Ready,
}

/// Countdown and purpose selection for one blocked navigation.
#[derive(Debug, Clone)]
pub struct InterstitialSession {
    context: InterstitialContext,
    settings: CategorySettings,
    purpose: Option<Purpose>,
    limit: Option<LimitType>,
    countdown_ends: Option<Timestamp>,
}

impl InterstitialSession {
    /// `fun` and `socialMedia` imply their purpose; `funAndWork` asks.
    pub fn new(context: InterstitialContext, settings: CategorySettings) -> Self {
        let purpose = context.category.implied_purpose();
        Self {
            context,
            settings,
            purpose,
            limit: None,
            countdown_ends: None,
        }
    }

    pub fn context(&self) -> &InterstitialContext {
        &self.context
    }

    pub fn purpose(&self) -> Option<Purpose> {
        self.purpose
    }

    pub fn limit(&self) -> Option<LimitType> {
        self.limit
    }

    pub fn needs_purpose(&self) -> bool {
        self.purpose.is_none()
    }

    /// Settings profile for the chosen purpose, once known.
    pub fn profile(&self) -> Option<&TimerSettings> {
        self.purpose
            .map(|purpose| self.settings.profile(self.context.category, purpose))
    }

    /// Limit type to preselect.
    pub fn default_limit(&self) -> LimitType {
        self.profile().map(|p| p.default_limit_type).unwrap_or_default()
    }

    /// Pick a purpose. Only meaningful before the countdown starts.
    pub fn choose_purpose(&mut self, purpose: Purpose) -> bool {
        if self.countdown_ends.is_some() {
            return false;
        }
        self.purpose = Some(purpose);
        true
    }

    /// Pick a limit type and start the countdown. Returns the wait in
    /// seconds, or `None` while the purpose is still open.
    pub fn choose_limit(&mut self, limit: LimitType, now: Timestamp) -> Option<u32> {
        let wait = self.profile()?.wait_time;
        self.limit = Some(limit);
        self.countdown_ends = Some(now + u64::from(wait) * 1000);
        log::debug!(
            "Interstitial countdown for {} ({:?}, {:?}): {}s",
            self.context.category,
            self.purpose,
            limit,
            wait
        );
        Some(wait)
    }

    /// Whole seconds left on the countdown, rounded up.
    pub fn remaining_secs(&self, now: Timestamp) -> u32 {
        match self.countdown_ends {
            Some(ends) => {
                let left = ends.saturating_sub(now);
                u32::try_from(left.div_ceil(1000)).unwrap_or(u32::MAX)
            }
            None => 0,
        }
    }

    pub fn can_continue(&self, now: Timestamp) -> bool {
        self.countdown_ends.is_some_and(|ends| now >= ends)
    }

    pub fn stage(&self, now: Timestamp) -> Stage {
        if self.purpose.is_none() {
            Stage::ChoosePurpose
        } else if self.countdown_ends.is_none() {
            Stage::ChooseLimit
        } else if self.can_continue(now) {
            Stage::Ready
        } else {
            Stage::Countdown {
                remaining_secs: self.remaining_secs(now),
            }
        }
    }

    /// The `ALLOW_TEMPORARILY` request to send once the countdown is over.
    ///
    /// Purpose defaults to `fun` and limit to `time` when unset.
    pub fn continue_request(&self, now: Timestamp) -> Option<Message> {
        if !self.can_continue(now) || self.context.original_url.is_empty() {
            return None;
        }
        Some(Message::AllowTemporarily(AllowTemporarily {
            url: self.context.original_url.clone(),
            limit_type: Some(self.limit.unwrap_or_default()),
            purpose: Some(self.purpose.unwrap_or_default()),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: &str = "chrome-extension://abc/build/redirect.html";

    #[test]
    fn test_redirect_url_round_trip() {
        let original = "https://www.youtube.com/watch?v=1&t=30#c";
        let url = redirect_url(BASE, Category::FunAndWork, original);
        assert_eq!(
            url,
            "chrome-extension://abc/build/redirect.html?type=funAndWork&url=https%3A%2F%2Fwww.youtube.com%2Fwatch%3Fv%3D1%26t%3D30%23c"
        );

        let ctx = parse_redirect(&url).unwrap();
        assert_eq!(ctx.category, Category::FunAndWork);
        assert_eq!(ctx.original_url, original);
    }

    #[test]
    fn test_parse_redirect_rejects_unknown_type() {
        assert!(parse_redirect(&format!("{BASE}?type=work&url=x")).is_none());
        assert!(parse_redirect(&format!("{BASE}?url=x")).is_none());
        assert!(parse_redirect("not a url").is_none());
        assert_eq!(parse_redirect(&format!("{BASE}?type=fun")).unwrap().original_url, "");
    }

    #[test]
    fn test_fun_session_flow() {
        let ctx = InterstitialContext {
            category: Category::Fun,
            original_url: "https://reddit.com/r/rust".into(),
        };
        let mut session = InterstitialSession::new(ctx, CategorySettings::default());
        assert_eq!(session.stage(0), Stage::ChooseLimit);
        assert!(session.continue_request(0).is_none());

        assert_eq!(session.choose_limit(LimitType::Video, 1_000), Some(5));
        assert_eq!(session.stage(1_000), Stage::Countdown { remaining_secs: 5 });
        assert_eq!(session.remaining_secs(4_500), 2);
        assert!(!session.can_continue(5_999));
        assert_eq!(session.stage(6_000), Stage::Ready);
        assert!(!session.choose_purpose(Purpose::Work));

        assert_eq!(
            session.continue_request(6_000),
            Some(Message::AllowTemporarily(AllowTemporarily {
                url: "https://reddit.com/r/rust".into(),
                limit_type: Some(LimitType::Video),
                purpose: Some(Purpose::Fun),
            }))
        );
    }

    #[test]
    fn test_fun_and_work_requires_purpose() {
        let ctx = InterstitialContext {
            category: Category::FunAndWork,
            original_url: "https://github.com".into(),
        };
        let mut session = InterstitialSession::new(ctx, CategorySettings::default());
        assert!(session.needs_purpose());
        assert_eq!(session.stage(0), Stage::ChoosePurpose);
        assert_eq!(session.choose_limit(LimitType::Time, 0), None);

        assert!(session.choose_purpose(Purpose::Work));
        assert_eq!(session.profile().unwrap().access_duration, 30);
        assert_eq!(session.choose_limit(LimitType::Time, 0), Some(2));
        assert!(session.can_continue(2_000));
    }

    #[test]
    fn test_social_implies_purpose() {
        let ctx = InterstitialContext {
            category: Category::SocialMedia,
            original_url: "https://twitter.com".into(),
        };
        let session = InterstitialSession::new(ctx, CategorySettings::default());
        assert_eq!(session.purpose(), Some(Purpose::Social));
        assert_eq!(session.profile().unwrap().wait_time, 15);
        assert_eq!(session.default_limit(), LimitType::Time);
    }
}
