//! Access-control decision engine.
//!
//! The engine owns the category lists, the timer settings, the process mode
//! and the allowance store. It is driven by the host:
//!
//! ```text
//! tabs.onUpdated(loading) ──► on_navigation ─┐
//! tabs.onCreated ───────────► on_tab_created ├──► Vec<Action> ──► TabDriver
//! VIDEO_CHANGED ────────────► on_video_changed│
//! sweep timer (6 s) ────────► on_sweep        │
//! audio poll (1 s) ─────────► on_audio_poll ──┘
//! ```
//!
//! Handlers never block and never fail; anything unparseable is let through.

use std::collections::HashMap;

use crate::allowance::AllowanceStore;
use crate::categories::{Categories, DomainIndex};
use crate::error::EngineError;
use crate::interstitial::{redirect_url, DEFAULT_INTERSTITIAL_PATH};
use crate::limiter::RateLimiter;
use crate::message::{
    AllowTemporarily, AllowanceResponse, AllowanceStatus, AudioStatusChanged, CheckAllowance, Message, Response,
    VideoChanged,
};
use crate::settings::{CategorySettings, ConfigSource, StorageChange, StoredConfig, TimerSettings};
use crate::types::{AccessState, Category, LimitType, Mode, Purpose, TabId, TabInfo, Timestamp};
use crate::url::{canonical_host, domain_of, is_extension_url, try_domain_of};

// =============================================================================
// Configuration
// =============================================================================

/// Hosts where video changes only count on actual viewing pages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchPageRule {
    /// Canonical hosts (no `www.`)
    pub hosts: Vec<String>,
    /// URL substrings that mark a viewing page
    pub markers: Vec<String>,
}

impl WatchPageRule {
    pub fn new<H, M>(hosts: H, markers: M) -> Self
    where
        H: IntoIterator,
        H::Item: AsRef<str>,
        M: IntoIterator,
        M::Item: Into<String>,
    {
        Self {
            hosts: hosts.into_iter().map(|h| canonical_host(h.as_ref())).collect(),
            markers: markers.into_iter().map(Into::into).collect(),
        }
    }

    /// YouTube: autoplay previews on the home and browse pages are not views.
    pub fn youtube() -> Self {
        Self::new(["youtube.com", "www.youtube.com", "m.youtube.com"], ["/watch", "/shorts"])
    }

    pub fn covers(&self, domain: &str) -> bool {
        self.hosts.iter().any(|h| h == domain)
    }

    pub fn is_watch_page(&self, url: &str) -> bool {
        self.markers.iter().any(|m| url.contains(m.as_str()))
    }
}

/// Host-provided engine configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Absolute URL of the interstitial page
    pub interstitial_url: String,
    /// `chrome-extension://<id>/`; pages under it are never evaluated
    pub extension_origin: String,
    /// Minimum time between two identical redirects of the same tab
    pub redirect_debounce_ms: u64,
    pub watch_pages: Vec<WatchPageRule>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            interstitial_url: DEFAULT_INTERSTITIAL_PATH.to_string(),
            extension_origin: String::new(),
            redirect_debounce_ms: 1_000,
            watch_pages: vec![WatchPageRule::youtube()],
        }
    }
}

impl EngineConfig {
    /// Configuration for an extension installed under `origin`.
    pub fn for_extension(origin: &str) -> Self {
        let origin = if origin.ends_with('/') {
            origin.to_string()
        } else {
            format!("{origin}/")
        };
        Self {
            interstitial_url: format!("{origin}{DEFAULT_INTERSTITIAL_PATH}"),
            extension_origin: origin,
            ..Self::default()
        }
    }
}

// =============================================================================
// Actions
// =============================================================================

/// Browser side effect requested by the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// `chrome.tabs.update(tab_id, { url })`
    Redirect { tab_id: TabId, url: String },
    /// `chrome.tabs.sendMessage(tab_id, AUDIO_STATUS_CHANGED)`
    NotifyAudio { tab_id: TabId, is_audible: bool },
}

/// Executes actions against the browser.
pub trait TabDriver {
    fn update_url(&mut self, tab_id: TabId, url: &str) -> Result<(), EngineError>;
    fn send_message(&mut self, tab_id: TabId, message: &Message) -> Result<(), EngineError>;
}

/// Execute actions in order. Failures are logged and not retried; the next
/// navigation or sweep re-evaluates the tab anyway.
///
/// Returns the number of actions that succeeded.
pub fn apply_actions<D: TabDriver + ?Sized>(driver: &mut D, actions: &[Action]) -> usize {
    let mut applied = 0;
    for action in actions {
        let result = match action {
            Action::Redirect { tab_id, url } => driver.update_url(*tab_id, url),
            Action::NotifyAudio { tab_id, is_audible } => driver.send_message(
                *tab_id,
                &Message::AudioStatusChanged(AudioStatusChanged {
                    is_audible: *is_audible,
                }),
            ),
        };
        match result {
            Ok(()) => applied += 1,
            // Tabs without a content script reject messages
            Err(e) if matches!(action, Action::NotifyAudio { .. }) => log::debug!("{}", e),
            Err(e) => log::warn!("{}", e),
        }
    }
    applied
}

/// Reply and side effects of one handled message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Outcome {
    pub response: Option<Response>,
    pub actions: Vec<Action>,
}

// =============================================================================
// Engine
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
struct TabState {
    domain: String,
    state: AccessState,
}

#[derive(Debug)]
pub struct Engine {
    config: EngineConfig,
    categories: Categories,
    index: DomainIndex,
    settings: CategorySettings,
    mode: Mode,
    store: AllowanceStore,
    tabs: HashMap<TabId, TabState>,
    audible: HashMap<TabId, bool>,
    /// Keyed by tab and interstitial URL
    redirects: RateLimiter<(TabId, String)>,
}

impl Engine {
    pub fn new(config: EngineConfig, stored: StoredConfig) -> Self {
        let redirects = RateLimiter::new(config.redirect_debounce_ms);
        Self {
            config,
            index: stored.website_categories.index(),
            categories: stored.website_categories,
            settings: stored.category_settings,
            mode: stored.current_mode.unwrap_or_default(),
            store: AllowanceStore::new(),
            tabs: HashMap::new(),
            audible: HashMap::new(),
            redirects,
        }
    }

    /// Build from a config source, starting from defaults if it fails.
    pub fn from_source(config: EngineConfig, source: &dyn ConfigSource) -> Self {
        let mut engine = Self::new(config, StoredConfig::default());
        // Failure already logged; defaults stay in place
        let _ = engine.reload(source);
        engine
    }

    /// Re-read the persisted configuration. On failure the current lists and
    /// settings stay in effect.
    pub fn reload(&mut self, source: &dyn ConfigSource) -> Result<(), EngineError> {
        match source.load() {
            Ok(stored) => {
                self.set_categories(stored.website_categories);
                self.settings = stored.category_settings;
                if let Some(mode) = stored.current_mode {
                    self.mode = mode;
                }
                log::debug!("Loaded {} categorized sites", self.categories.len());
                Ok(())
            }
            Err(e) => {
                log::warn!("Keeping current configuration: {}", e);
                Err(e)
            }
        }
    }

    /// Apply a `chrome.storage.onChanged` notification.
    pub fn apply_storage_change(&mut self, change: StorageChange) {
        if let Some(categories) = change.website_categories {
            self.set_categories(categories);
        }
        if let Some(settings) = change.category_settings {
            self.settings = settings;
        }
        if let Some(mode) = change.current_mode {
            self.set_mode(mode);
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn categories(&self) -> &Categories {
        &self.categories
    }

    fn set_categories(&mut self, categories: Categories) {
        self.index = categories.index();
        self.categories = categories;
    }

    /// Category of a URL, if listed.
    pub fn classify(&self, url: &str) -> Option<Category> {
        self.index.classify(url)
    }

    pub fn settings(&self) -> &CategorySettings {
        &self.settings
    }

    pub fn store(&self) -> &AllowanceStore {
        &self.store
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn set_mode(&mut self, mode: Mode) {
        if mode != self.mode {
            log::info!("Mode changed to {:?}", mode);
        }
        self.mode = mode;
    }

    /// Last decision recorded for a tab.
    pub fn tab_state(&self, tab_id: TabId) -> Option<AccessState> {
        self.tabs.get(&tab_id).map(|t| t.state)
    }

    pub fn is_tab_audible(&self, tab_id: TabId) -> bool {
        self.audible.get(&tab_id).copied().unwrap_or(false)
    }

    /// Tabs with a known audibility.
    pub fn tracked_audible_tabs(&self) -> usize {
        self.audible.len()
    }

    // =========================================================================
    // Decisions
    // =========================================================================

    /// Decide access for a URL without side effects.
    pub fn evaluate(&self, url: &str, now: Timestamp) -> (AccessState, Option<Category>) {
        let Some(domain) = domain_of(url) else {
            return (AccessState::Unclassified, None);
        };
        self.evaluate_domain(&domain, now)
    }

    fn evaluate_domain(&self, domain: &str, now: Timestamp) -> (AccessState, Option<Category>) {
        let Some(category) = self.index.classify_domain(domain) else {
            return (AccessState::Unclassified, None);
        };
        let state = if self.is_mode_exempt(category) || self.store.is_allowed(domain, now) {
            AccessState::Allowed
        } else {
            AccessState::Blocked
        };
        (state, Some(category))
    }

    #[inline]
    fn is_mode_exempt(&self, category: Category) -> bool {
        category == Category::FunAndWork && self.mode == Mode::Work
    }

    fn is_own_page(&self, url: &str) -> bool {
        is_extension_url(url, &self.config.extension_origin)
            || (!self.config.interstitial_url.is_empty() && url.starts_with(&self.config.interstitial_url))
    }

    /// Settings profile that applies to a domain right now: the allowance's
    /// purpose picks the `funAndWork` sub-profile, the mode does otherwise.
    pub fn applicable_profile(&self, category: Category, domain: &str) -> &TimerSettings {
        match self.store.get(domain) {
            Some(allowance) => self.settings.profile(category, allowance.purpose),
            None => self.settings.profile_for_mode(category, self.mode),
        }
    }

    /// Redirect a tab to the interstitial. Only a repeat of the same redirect
    /// inside the debounce window is dropped; once the tab has reached the
    /// interstitial the window is cleared.
    fn redirect(&mut self, tab_id: TabId, category: Category, url: &str, now: Timestamp) -> Option<Action> {
        let target = redirect_url(&self.config.interstitial_url, category, url);
        let key = (tab_id, target);
        if !self.redirects.check(&key, now) {
            log::debug!("Suppressing repeated redirect of tab {}", tab_id);
            return None;
        }
        log::info!("Redirecting tab {} ({}) to the interstitial", tab_id, category);
        Some(Action::Redirect { tab_id, url: key.1 })
    }

    fn forget_redirects(&mut self, tab_id: TabId) {
        self.redirects.retain(|(id, _)| *id != tab_id);
    }

    fn record(&mut self, tab_id: TabId, domain: String, state: AccessState) {
        self.tabs.insert(tab_id, TabState { domain, state });
    }

    // =========================================================================
    // Tab Events
    // =========================================================================

    /// A tab started loading `url`.
    pub fn on_navigation(&mut self, tab_id: TabId, url: &str, now: Timestamp) -> Vec<Action> {
        if self.is_own_page(url) {
            // The redirect landed; a later visit to the blocked page redirects again
            self.forget_redirects(tab_id);
            self.tabs.remove(&tab_id);
            return Vec::new();
        }
        let Some(domain) = domain_of(url) else {
            log::debug!("Not evaluating malformed URL: {}", url);
            self.tabs.remove(&tab_id);
            return Vec::new();
        };

        let (state, category) = self.evaluate_domain(&domain, now);
        log::debug!("Tab {} -> {} is {:?}", tab_id, domain, state);
        self.record(tab_id, domain, state);

        match (state, category) {
            (AccessState::Blocked, Some(category)) => self.redirect(tab_id, category, url, now).into_iter().collect(),
            _ => Vec::new(),
        }
    }

    /// A tab was created, possibly already pointing somewhere.
    pub fn on_tab_created(&mut self, tab: &TabInfo, now: Timestamp) -> Vec<Action> {
        match tab.url.as_deref() {
            Some(url) if !url.is_empty() => self.on_navigation(tab.id, url, now),
            _ => Vec::new(),
        }
    }

    pub fn on_tab_removed(&mut self, tab_id: TabId) {
        self.tabs.remove(&tab_id);
        self.audible.remove(&tab_id);
        self.forget_redirects(tab_id);
    }

    // =========================================================================
    // Video Changes
    // =========================================================================

    /// Check whether a change on this URL counts at all.
    pub fn counts_video_change(&self, domain: &str, url: &str) -> bool {
        self.config
            .watch_pages
            .iter()
            .filter(|rule| rule.covers(domain))
            .all(|rule| rule.is_watch_page(url))
    }

    /// Handle a `VIDEO_CHANGED` report.
    ///
    /// The report's own counter is informational; the engine counts one
    /// change per report for the domain.
    pub fn on_video_changed(&mut self, change: &VideoChanged, tabs: &[TabInfo], now: Timestamp) -> Vec<Action> {
        let Some(domain) = domain_of(&change.url) else {
            log::debug!("Video change on malformed URL: {}", change.url);
            return Vec::new();
        };
        if !self.counts_video_change(&domain, &change.url) {
            log::debug!("Ignoring video change outside a watch page: {}", change.url);
            return Vec::new();
        }

        let previous = self.store.change_count(&domain);
        let count = self.store.record_change(&domain, now);
        log::debug!(
            "Video count for {}: {} -> {} (context reports {})",
            domain,
            previous,
            count,
            change.change_count
        );

        let Some(category) = self.index.classify_domain(&domain) else {
            return Vec::new();
        };
        let limit = self.applicable_profile(category, &domain).max_video_changes;
        if count <= limit {
            return Vec::new();
        }

        log::debug!("Too many video changes on {}: {} (limit {})", domain, count, limit);
        if self.is_mode_exempt(category) {
            log::debug!("Work mode exempts {}", domain);
            return Vec::new();
        }

        if self
            .store
            .get(&domain)
            .is_some_and(|a| a.limit_type == LimitType::Video)
        {
            self.store.revoke(&domain);
        }

        let target = tabs
            .iter()
            .find(|tab| tab.url.as_deref().and_then(domain_of).as_deref() == Some(domain.as_str()))
            .map(|tab| tab.id);
        let Some(tab_id) = target else {
            log::debug!("No open tab on {}", domain);
            return Vec::new();
        };

        self.record(tab_id, domain, AccessState::Blocked);
        self.redirect(tab_id, category, &change.url, now).into_iter().collect()
    }

    /// The reporting context has no media left.
    pub fn on_media_cleared(&mut self, url: &str) {
        if let Some(domain) = domain_of(url) {
            self.store.reset_tracker(&domain);
        }
    }

    // =========================================================================
    // Timers
    // =========================================================================

    /// Periodic expiry sweep. Redirects every open tab whose domain just lost
    /// its allowance, and every tab still sitting on a domain it was blocked
    /// from (a redirect that was dropped or undone).
    pub fn on_sweep(&mut self, now: Timestamp, tabs: &[TabInfo]) -> Vec<Action> {
        let expired = self.store.sweep(now);
        self.redirects.prune(now);
        if !expired.is_empty() {
            log::info!("Allowances expired: {:?}", expired);
        }

        let mut actions = Vec::new();
        for tab in tabs {
            let Some(url) = tab.url.as_deref() else { continue };
            if self.is_own_page(url) {
                continue;
            }
            let Some(domain) = domain_of(url) else { continue };
            let stranded = self
                .tabs
                .get(&tab.id)
                .is_some_and(|t| t.state == AccessState::Blocked && t.domain == domain);
            if !expired.contains(&domain) && !stranded {
                continue;
            }
            if stranded {
                log::debug!("Tab {} is still on blocked {}", tab.id, domain);
            }
            let (state, category) = self.evaluate_domain(&domain, now);
            self.record(tab.id, domain, state);
            if let (AccessState::Blocked, Some(category)) = (state, category) {
                actions.extend(self.redirect(tab.id, category, url, now));
            }
        }
        actions
    }

    /// Periodic audibility poll over all tabs.
    pub fn on_audio_poll(&mut self, tabs: &[TabInfo]) -> Vec<Action> {
        let mut actions = Vec::new();
        for tab in tabs {
            let Some(url) = tab.url.as_deref() else { continue };
            if self.is_own_page(url) {
                continue;
            }
            let previous = self.audible.insert(tab.id, tab.audible).unwrap_or(false);
            if previous != tab.audible {
                log::debug!("Tab {} audible: {}", tab.id, tab.audible);
                actions.push(Action::NotifyAudio {
                    tab_id: tab.id,
                    is_audible: tab.audible,
                });
            }
        }
        actions
    }

    /// `tabs.onUpdated` reported an `audible` change.
    ///
    /// Tabs with no URL are unknown to the host (closed or not loaded) and
    /// are not tracked.
    pub fn on_audible_changed(&mut self, tab_id: TabId, url: Option<&str>, audible: bool) -> Vec<Action> {
        let Some(url) = url else {
            log::debug!("Ignoring audible change of unknown tab {}", tab_id);
            return Vec::new();
        };
        self.audible.insert(tab_id, audible);
        if self.is_own_page(url) {
            return Vec::new();
        }
        vec![Action::NotifyAudio {
            tab_id,
            is_audible: audible,
        }]
    }

    // =========================================================================
    // Allowances
    // =========================================================================

    /// Grant an allowance for the URL's domain, sized by its category profile.
    pub fn request_allowance(
        &mut self,
        url: &str,
        limit_type: LimitType,
        purpose: Purpose,
        now: Timestamp,
    ) -> AllowanceResponse {
        let domain = match try_domain_of(url) {
            Ok(domain) => domain,
            Err(e) => {
                log::debug!("Refusing allowance: {}", e);
                return AllowanceResponse { success: false };
            }
        };
        let Some(category) = self.index.classify_domain(&domain) else {
            log::debug!("Refusing allowance for uncategorized {}", domain);
            return AllowanceResponse { success: false };
        };

        let minutes = self.settings.profile(category, purpose).access_duration;
        self.store.grant(&domain, limit_type, purpose, minutes, now);
        self.redirects.clear();
        AllowanceResponse { success: true }
    }

    /// Allowance status for a URL, or for a bare domain.
    pub fn check_allowance(&self, url: Option<&str>, domain: Option<&str>, now: Timestamp) -> AllowanceStatus {
        let target = match (url, domain) {
            (Some(url), _) if !url.is_empty() => url.to_string(),
            (_, Some(domain)) if !domain.is_empty() => format!("https://{domain}"),
            _ => {
                log::debug!("Allowance check without url or domain");
                return AllowanceStatus::denied();
            }
        };
        let Some(domain) = domain_of(&target) else {
            return AllowanceStatus::denied();
        };

        let is_allowed = self.store.is_allowed(&domain, now);
        let allowance = self.store.get(&domain);
        AllowanceStatus {
            is_allowed,
            allowed: is_allowed,
            expiry: allowance.and_then(|a| a.expiry.into()),
            purpose: allowance.map(|a| a.purpose),
            limit_type: allowance.map(|a| a.limit_type),
            change_count: self.store.change_count(&domain),
        }
    }

    // =========================================================================
    // Messages
    // =========================================================================

    /// Dispatch a runtime message.
    pub fn handle_message(&mut self, message: Message, tabs: &[TabInfo], now: Timestamp) -> Outcome {
        log::trace!("Received {}", message.kind());
        match message {
            Message::VideoChanged(change) => Outcome {
                response: None,
                actions: self.on_video_changed(&change, tabs, now),
            },
            Message::AllowTemporarily(AllowTemporarily { url, limit_type, purpose }) => Outcome {
                response: Some(Response::Allowance(self.request_allowance(
                    &url,
                    limit_type.unwrap_or_default(),
                    purpose.unwrap_or_default(),
                    now,
                ))),
                actions: Vec::new(),
            },
            Message::CheckAllowance(CheckAllowance { url, domain }) => Outcome {
                response: Some(Response::Status(self.check_allowance(
                    url.as_deref(),
                    domain.as_deref(),
                    now,
                ))),
                actions: Vec::new(),
            },
            Message::MediaCleared(cleared) => {
                self.on_media_cleared(&cleared.url);
                Outcome::default()
            }
            Message::SetMode(set) => {
                self.set_mode(set.mode);
                Outcome {
                    response: Some(Response::Allowance(AllowanceResponse { success: true })),
                    actions: Vec::new(),
                }
            }
            Message::DebugLog(entry) => {
                log::debug!("[content] {}", entry.message);
                Outcome::default()
            }
            Message::AudioStatusChanged(_) => {
                log::debug!("Ignoring AUDIO_STATUS_CHANGED sent to the engine");
                Outcome::default()
            }
        }
    }

    /// Decode and dispatch a JSON message.
    pub fn handle_json(&mut self, text: &str, tabs: &[TabInfo], now: Timestamp) -> Result<Outcome, EngineError> {
        let message = Message::from_json(text)?;
        Ok(self.handle_message(message, tabs, now))
    }
}
