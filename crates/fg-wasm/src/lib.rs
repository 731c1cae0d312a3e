//! WebAssembly bindings for FocusGate
//!
//! Three entry points, one per extension context:
//!
//! - [`BackgroundEngine`] for the service worker
//! - [`ContentMonitor`] for content scripts
//! - [`InterstitialPage`] for the redirect page
//!
//! Browser APIs (`chrome.tabs`, `chrome.storage`, timers) stay in JavaScript.
//! The bindings take plain values and hand back action and message objects
//! for the host to execute.

mod content;

use js_sys::Reflect;
use wasm_bindgen::prelude::*;

use fg_core::interstitial::{parse_redirect, redirect_url, InterstitialSession, Stage};
use fg_core::message::AudioStatusChanged;
use fg_core::settings::{JsonSource, StorageChange};
use fg_core::url::{domain_of, format_url, is_valid_url};
use fg_core::{
    Action, Categories, Category, CategorySettings, Engine, EngineConfig, LimitType, Message, Purpose, StoredConfig,
    TabId, TabInfo, Timestamp,
};

pub use content::ContentMonitor;

#[wasm_bindgen(start)]
pub fn start() {
    console_error_panic_hook::set_once();
    wasm_logger::init(wasm_logger::Config::new(log::Level::Info));
}

// =============================================================================
// Conversions
// =============================================================================

/// `Date.now()` unless the caller passes its own clock.
fn timestamp(now: Option<f64>) -> Timestamp {
    let ms = now.unwrap_or_else(js_sys::Date::now);
    if ms.is_finite() && ms > 0.0 {
        ms as Timestamp
    } else {
        0
    }
}

fn json_to_js(json: &str) -> JsValue {
    js_sys::JSON::parse(json).unwrap_or(JsValue::NULL)
}

fn js_to_json(value: &JsValue) -> Result<String, JsValue> {
    if value.is_undefined() || value.is_null() {
        return Ok("{}".to_string());
    }
    if let Some(text) = value.as_string() {
        return Ok(text);
    }
    js_sys::JSON::stringify(value).map(String::from)
}

fn error_to_js(e: impl std::fmt::Display) -> JsValue {
    JsValue::from_str(&e.to_string())
}

fn parse_enum<T: serde::de::DeserializeOwned>(name: &str) -> Option<T> {
    serde_json::from_value(serde_json::Value::String(name.to_string())).ok()
}

fn enum_name<T: serde::Serialize>(value: &T) -> String {
    match serde_json::to_value(value) {
        Ok(serde_json::Value::String(name)) => name,
        _ => String::new(),
    }
}

/// Read `chrome.tabs.Tab`-shaped objects. Entries without a numeric id are
/// skipped.
fn tabs_from_js(tabs: &JsValue) -> Vec<TabInfo> {
    if !js_sys::Array::is_array(tabs) {
        return Vec::new();
    }
    js_sys::Array::from(tabs)
        .iter()
        .filter_map(|tab| {
            let id = Reflect::get(&tab, &"id".into()).ok()?.as_f64()? as TabId;
            let url = Reflect::get(&tab, &"url".into()).ok().and_then(|v| v.as_string());
            let audible = Reflect::get(&tab, &"audible".into())
                .ok()
                .and_then(|v| v.as_bool())
                .unwrap_or(false);
            Some(TabInfo { id, url, audible })
        })
        .collect()
}

fn action_to_js(action: &Action) -> JsValue {
    let result = js_sys::Object::new();
    match action {
        Action::Redirect { tab_id, url } => {
            let _ = Reflect::set(&result, &"type".into(), &"redirect".into());
            let _ = Reflect::set(&result, &"tabId".into(), &JsValue::from(*tab_id));
            let _ = Reflect::set(&result, &"url".into(), &JsValue::from_str(url));
        }
        Action::NotifyAudio { tab_id, is_audible } => {
            let message = Message::AudioStatusChanged(AudioStatusChanged {
                is_audible: *is_audible,
            });
            let _ = Reflect::set(&result, &"type".into(), &"sendMessage".into());
            let _ = Reflect::set(&result, &"tabId".into(), &JsValue::from(*tab_id));
            let _ = Reflect::set(&result, &"message".into(), &json_to_js(&message.to_json()));
        }
    }
    result.into()
}

fn actions_to_js(actions: &[Action]) -> JsValue {
    let array = js_sys::Array::new();
    for action in actions {
        array.push(&action_to_js(action));
    }
    array.into()
}

// =============================================================================
// Background
// =============================================================================

/// Decision engine for the background service worker.
#[wasm_bindgen]
pub struct BackgroundEngine {
    engine: Engine,
}

#[wasm_bindgen]
impl BackgroundEngine {
    /// `extension_origin` is `chrome.runtime.getURL("")`; `stored` is the
    /// `chrome.storage.sync` contents. Unreadable storage starts from defaults.
    #[wasm_bindgen(constructor)]
    pub fn new(extension_origin: &str, stored: JsValue) -> BackgroundEngine {
        let config = EngineConfig::for_extension(extension_origin);
        let engine = match js_to_json(&stored) {
            Ok(json) => Engine::from_source(config, &JsonSource(json)),
            Err(_) => {
                log::warn!("Storage contents are not serializable, using defaults");
                Engine::new(config, StoredConfig::default())
            }
        };
        BackgroundEngine { engine }
    }

    /// Replace the configuration. On failure the previous one stays.
    pub fn reload(&mut self, stored: JsValue) -> Result<(), JsValue> {
        let json = js_to_json(&stored)?;
        self.engine.reload(&JsonSource(json)).map_err(error_to_js)
    }

    /// Apply `chrome.storage.onChanged`, flattened to `{ key: newValue }`.
    pub fn apply_storage_change(&mut self, changes: JsValue) -> Result<(), JsValue> {
        let json = js_to_json(&changes)?;
        let change: StorageChange = serde_json::from_str(&json).map_err(error_to_js)?;
        self.engine.apply_storage_change(change);
        Ok(())
    }

    pub fn on_navigation(&mut self, tab_id: i32, url: &str, now: Option<f64>) -> JsValue {
        actions_to_js(&self.engine.on_navigation(tab_id, url, timestamp(now)))
    }

    pub fn on_tab_created(&mut self, tab_id: i32, url: Option<String>, now: Option<f64>) -> JsValue {
        let tab = TabInfo {
            id: tab_id,
            url,
            audible: false,
        };
        actions_to_js(&self.engine.on_tab_created(&tab, timestamp(now)))
    }

    pub fn on_tab_removed(&mut self, tab_id: i32) {
        self.engine.on_tab_removed(tab_id);
    }

    pub fn on_audible_changed(&mut self, tab_id: i32, url: Option<String>, audible: bool) -> JsValue {
        actions_to_js(&self.engine.on_audible_changed(tab_id, url.as_deref(), audible))
    }

    /// Periodic expiry sweep over `chrome.tabs.query({})`.
    pub fn on_sweep(&mut self, tabs: JsValue, now: Option<f64>) -> JsValue {
        actions_to_js(&self.engine.on_sweep(timestamp(now), &tabs_from_js(&tabs)))
    }

    /// Periodic audibility poll over `chrome.tabs.query({})`.
    pub fn on_audio_poll(&mut self, tabs: JsValue) -> JsValue {
        actions_to_js(&self.engine.on_audio_poll(&tabs_from_js(&tabs)))
    }

    /// Handle a `chrome.runtime.onMessage` payload.
    ///
    /// Returns `{ response, actions }`; `response` is absent for messages
    /// that expect no reply.
    pub fn handle_message(&mut self, message: JsValue, tabs: JsValue, now: Option<f64>) -> Result<JsValue, JsValue> {
        let json = js_to_json(&message)?;
        let outcome = self
            .engine
            .handle_json(&json, &tabs_from_js(&tabs), timestamp(now))
            .map_err(error_to_js)?;

        let result = js_sys::Object::new();
        if let Some(response) = outcome.response {
            let _ = Reflect::set(&result, &"response".into(), &json_to_js(&response.to_json()));
        }
        let _ = Reflect::set(&result, &"actions".into(), &actions_to_js(&outcome.actions));
        Ok(result.into())
    }

    pub fn classify(&self, url: &str) -> Option<String> {
        self.engine.classify(url).map(|c| c.as_str().to_string())
    }

    pub fn mode(&self) -> String {
        enum_name(&self.engine.mode())
    }

    pub fn allowance_count(&self) -> usize {
        self.engine.store().len()
    }
}

// =============================================================================
// Interstitial
// =============================================================================

/// State behind the redirect page.
#[wasm_bindgen]
pub struct InterstitialPage {
    session: InterstitialSession,
}

#[wasm_bindgen]
impl InterstitialPage {
    /// `href` is `location.href`; `settings` the stored `categorySettings`
    /// (anything unreadable falls back to the defaults).
    #[wasm_bindgen(constructor)]
    pub fn new(href: &str, settings: JsValue) -> Result<InterstitialPage, JsValue> {
        let context = parse_redirect(href).ok_or_else(|| JsValue::from_str("Missing or unknown category"))?;
        let settings = if settings.is_undefined() || settings.is_null() {
            CategorySettings::default()
        } else {
            js_to_json(&settings)
                .ok()
                .and_then(|json| serde_json::from_str(&json).ok())
                .unwrap_or_default()
        };
        Ok(InterstitialPage {
            session: InterstitialSession::new(context, settings),
        })
    }

    pub fn category(&self) -> String {
        self.session.context().category.as_str().to_string()
    }

    pub fn original_url(&self) -> String {
        self.session.context().original_url.clone()
    }

    pub fn needs_purpose(&self) -> bool {
        self.session.needs_purpose()
    }

    pub fn default_limit(&self) -> String {
        enum_name(&self.session.default_limit())
    }

    pub fn choose_purpose(&mut self, purpose: &str) -> Result<bool, JsValue> {
        let purpose: Purpose =
            parse_enum(purpose).ok_or_else(|| JsValue::from_str(&format!("Unknown purpose: {purpose}")))?;
        Ok(self.session.choose_purpose(purpose))
    }

    /// Start the countdown. Returns the wait in seconds, or `undefined`
    /// while a purpose is still required.
    pub fn choose_limit(&mut self, limit: &str, now: Option<f64>) -> Result<Option<u32>, JsValue> {
        let limit: LimitType =
            parse_enum(limit).ok_or_else(|| JsValue::from_str(&format!("Unknown limit type: {limit}")))?;
        Ok(self.session.choose_limit(limit, timestamp(now)))
    }

    /// `{ stage, remainingSecs? }` for rendering.
    pub fn stage(&self, now: Option<f64>) -> JsValue {
        let result = js_sys::Object::new();
        let name = match self.session.stage(timestamp(now)) {
            Stage::ChoosePurpose => "choosePurpose",
            Stage::ChooseLimit => "chooseLimit",
            Stage::Countdown { remaining_secs } => {
                let _ = Reflect::set(&result, &"remainingSecs".into(), &JsValue::from(remaining_secs));
                "countdown"
            }
            Stage::Ready => "ready",
        };
        let _ = Reflect::set(&result, &"stage".into(), &JsValue::from_str(name));
        result.into()
    }

    /// The `ALLOW_TEMPORARILY` message to send, or `null` before the
    /// countdown is over.
    pub fn continue_request(&self, now: Option<f64>) -> JsValue {
        match self.session.continue_request(timestamp(now)) {
            Some(message) => json_to_js(&message.to_json()),
            None => JsValue::NULL,
        }
    }
}

// =============================================================================
// Options Page Helpers
// =============================================================================

/// Origin form stored in the category lists, or `undefined` if invalid.
#[wasm_bindgen]
pub fn format_site(raw: &str) -> Option<String> {
    format_url(raw)
}

#[wasm_bindgen]
pub fn is_valid_site(raw: &str) -> bool {
    is_valid_url(raw)
}

#[wasm_bindgen]
pub fn domain_of_js(url: &str) -> Option<String> {
    domain_of(url)
}

/// Classify a URL against a `websiteCategories` object.
#[wasm_bindgen]
pub fn classify_url(categories: JsValue, url: &str) -> Result<Option<String>, JsValue> {
    let json = js_to_json(&categories)?;
    let categories: Categories = serde_json::from_str(&json).map_err(error_to_js)?;
    Ok(categories.classify(url).map(|c| c.as_str().to_string()))
}

/// Hosts listed under more than one category: `[{ domain, categories }]`.
#[wasm_bindgen]
pub fn find_overlaps(categories: JsValue) -> Result<JsValue, JsValue> {
    let json = js_to_json(&categories)?;
    let categories: Categories = serde_json::from_str(&json).map_err(error_to_js)?;

    let result = js_sys::Array::new();
    for (domain, lists) in categories.overlaps() {
        let entry = js_sys::Object::new();
        let names = js_sys::Array::new();
        for category in lists {
            names.push(&JsValue::from_str(category.as_str()));
        }
        let _ = Reflect::set(&entry, &"domain".into(), &JsValue::from_str(&domain));
        let _ = Reflect::set(&entry, &"categories".into(), &names);
        result.push(&entry);
    }
    Ok(result.into())
}

#[wasm_bindgen]
pub fn interstitial_url(base: &str, category: &str, original: &str) -> Result<String, JsValue> {
    let category =
        Category::parse(category).ok_or_else(|| JsValue::from_str(&format!("Unknown category: {category}")))?;
    Ok(redirect_url(base, category, original))
}
