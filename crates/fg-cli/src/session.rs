//! A browser stand-in: a tab table driven by JSON events.
//!
//! Used by `simulate` (events carry their own virtual time) and `watch`
//! (events arrive on stdin and use the wall clock).

use std::collections::BTreeMap;

use serde::Deserialize;

use fg_core::engine::apply_actions;
use fg_core::settings::ConfigSource;
use fg_core::{Action, Engine, EngineError, Message, Mode, TabDriver, TabId, TabInfo, Timestamp};

/// One browser-side event.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Event {
    /// A tab was created, possibly with a URL
    Open {
        tab: TabId,
        #[serde(default)]
        url: Option<String>,
    },
    Navigate { tab: TabId, url: String },
    Close { tab: TabId },
    Audible { tab: TabId, audible: bool },
    /// A runtime message, as a page would send it
    Message { message: serde_json::Value },
    Sweep,
    AudioPoll,
    Mode { mode: Mode },
    /// Re-read the configuration
    Reload,
}

/// An event at a point in virtual time.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TimedEvent {
    pub at: Timestamp,
    #[serde(flatten)]
    pub event: Event,
}

/// Parse a scenario: a JSON array of timed events, or one per line.
pub fn parse_scenario(text: &str) -> Result<Vec<TimedEvent>, String> {
    let trimmed = text.trim_start();
    if trimmed.starts_with('[') {
        return serde_json::from_str(trimmed).map_err(|e| format!("Invalid scenario: {}", e));
    }
    trimmed
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(n, line)| serde_json::from_str(line).map_err(|e| format!("Invalid event on line {}: {}", n + 1, e)))
        .collect()
}

// =============================================================================
// Tab Table
// =============================================================================

/// Executes engine actions against the tab table and records what happened.
struct TableDriver<'a> {
    tabs: &'a mut BTreeMap<TabId, TabInfo>,
    log: &'a mut Vec<String>,
}

impl TabDriver for TableDriver<'_> {
    fn update_url(&mut self, tab_id: TabId, url: &str) -> Result<(), EngineError> {
        let tab = self.tabs.get_mut(&tab_id).ok_or_else(|| EngineError::TabOperationFailed {
            tab_id,
            reason: "No tab with id".to_string(),
        })?;
        tab.url = Some(url.to_string());
        self.log.push(format!("tab {} redirected to {}", tab_id, url));
        Ok(())
    }

    fn send_message(&mut self, tab_id: TabId, message: &Message) -> Result<(), EngineError> {
        if !self.tabs.contains_key(&tab_id) {
            return Err(EngineError::TabOperationFailed {
                tab_id,
                reason: "Receiving end does not exist".to_string(),
            });
        }
        self.log.push(format!("tab {} <- {}", tab_id, message.to_json()));
        Ok(())
    }
}

pub struct Session {
    engine: Engine,
    tabs: BTreeMap<TabId, TabInfo>,
}

impl Session {
    pub fn new(engine: Engine) -> Self {
        Self {
            engine,
            tabs: BTreeMap::new(),
        }
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    pub fn tabs(&self) -> Vec<TabInfo> {
        self.tabs.values().cloned().collect()
    }

    pub fn tab_url(&self, tab_id: TabId) -> Option<&str> {
        self.tabs.get(&tab_id).and_then(|t| t.url.as_deref())
    }

    /// Apply one event and return a line per observable effect.
    pub fn apply(&mut self, event: Event, now: Timestamp, source: &dyn ConfigSource) -> Vec<String> {
        let mut log = Vec::new();
        let actions = match event {
            Event::Open { tab, url } => {
                let info = TabInfo {
                    id: tab,
                    url,
                    audible: false,
                };
                self.tabs.insert(tab, info.clone());
                self.engine.on_tab_created(&info, now)
            }
            Event::Navigate { tab, url } => {
                self.tabs
                    .entry(tab)
                    .or_insert_with(|| TabInfo {
                        id: tab,
                        url: None,
                        audible: false,
                    })
                    .url = Some(url.clone());
                self.engine.on_navigation(tab, &url, now)
            }
            Event::Close { tab } => {
                self.tabs.remove(&tab);
                self.engine.on_tab_removed(tab);
                Vec::new()
            }
            Event::Audible { tab, audible } => {
                let url = match self.tabs.get_mut(&tab) {
                    Some(info) => {
                        info.audible = audible;
                        info.url.clone()
                    }
                    None => None,
                };
                self.engine.on_audible_changed(tab, url.as_deref(), audible)
            }
            Event::Message { message } => {
                let tabs = self.tabs();
                match Message::from_value(message) {
                    Ok(message) => {
                        let outcome = self.engine.handle_message(message, &tabs, now);
                        if let Some(response) = outcome.response {
                            log.push(format!("response {}", response.to_json()));
                        }
                        outcome.actions
                    }
                    Err(e) => {
                        log.push(format!("rejected: {}", e));
                        Vec::new()
                    }
                }
            }
            Event::Sweep => {
                let tabs = self.tabs();
                self.engine.on_sweep(now, &tabs)
            }
            Event::AudioPoll => {
                let tabs = self.tabs();
                self.engine.on_audio_poll(&tabs)
            }
            Event::Mode { mode } => {
                self.engine.set_mode(mode);
                Vec::new()
            }
            Event::Reload => {
                if let Err(e) = self.engine.reload(source) {
                    log.push(format!("reload failed: {}", e));
                }
                Vec::new()
            }
        };

        self.execute(&actions, &mut log);
        log
    }

    fn execute(&mut self, actions: &[Action], log: &mut Vec<String>) {
        let mut driver = TableDriver {
            tabs: &mut self.tabs,
            log,
        };
        let applied = apply_actions(&mut driver, actions);
        if applied < actions.len() {
            log::debug!("{} of {} actions failed", actions.len() - applied, actions.len());
        }
    }
}

/// Run a scenario to completion and return the transcript.
pub fn run_scenario(engine: Engine, events: Vec<TimedEvent>, source: &dyn ConfigSource) -> Vec<String> {
    let mut session = Session::new(engine);
    let mut transcript = Vec::new();
    for TimedEvent { at, event } in events {
        for line in session.apply(event, at, source) {
            transcript.push(format!("[{:>8}ms] {}", at, line));
        }
    }
    transcript
}
