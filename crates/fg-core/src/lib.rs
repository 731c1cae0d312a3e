//! FocusGate Core Library
//!
//! This crate provides the access-control decision engine for the FocusGate
//! site blocker. It decides, for every navigation or media event, whether a
//! tab may stay on a user-categorized site or must be sent to the interstitial.
//!
//! # Architecture
//!
//! The engine is a single-threaded state machine. It never talks to the
//! browser directly: handlers take plain snapshots (tab lists, page and media
//! state) plus an explicit `now` timestamp and return [`engine::Action`]s for
//! the host to execute. This keeps every decision deterministic and testable.
//!
//! # Modules
//!
//! - `url`: URL normalization and hostname extraction
//! - `categories`: category lists and the domain matcher
//! - `settings`: per-category timer settings and persisted configuration
//! - `allowance`: temporary allowances and per-domain video-change trackers
//! - `detector`: heuristic video-change detection for one browsing context
//! - `engine`: the decision engine
//! - `interstitial`: redirect URL format and the countdown session
//! - `message`: the message protocol between pages and the engine
//! - `limiter`: keyed rate limiters used for debouncing
//! - `types`: shared type definitions

pub mod allowance;
pub mod categories;
pub mod detector;
pub mod engine;
pub mod error;
pub mod interstitial;
pub mod limiter;
pub mod message;
pub mod settings;
pub mod types;
pub mod url;

// Re-export commonly used types
pub use allowance::{Allowance, AllowanceStore, Expiry, VideoChangeTracker};
pub use categories::{Categories, DomainIndex};
pub use detector::{DetectorConfig, VideoChangeDetector};
pub use engine::{apply_actions, Action, Engine, EngineConfig, Outcome, TabDriver};
pub use error::EngineError;
pub use message::{Message, Response};
pub use settings::{CategorySettings, StoredConfig, TimerSettings};
pub use types::{AccessState, Category, LimitType, Mode, Purpose, TabId, TabInfo, Timestamp};
