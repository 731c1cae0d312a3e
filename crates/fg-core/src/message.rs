//! Message protocol between extension pages and the engine.
//!
//! Messages travel through `chrome.runtime.sendMessage` as JSON objects with a
//! `type` tag, e.g. `{"type":"ALLOW_TEMPORARILY","url":"...","limitType":"time","purpose":"fun"}`.

use serde::{Deserialize, Serialize};

use crate::error::EngineError;
use crate::types::{LimitType, Mode, Purpose, Timestamp};

// =============================================================================
// Video Change Report
// =============================================================================

/// Which detector path produced a change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
#[serde(rename_all = "snake_case")]
pub enum ChangeSource {
    #[default]
    VideoDetection,
    IframeDetection,
    AudioDetection,
    PageDetection,
}

/// What the detector knew about the new item.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
#[serde(rename_all = "camelCase", default)]
pub struct VideoInfo {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub video_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub platform: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub src: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous_title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous_src: Option<String>,
    pub has_active_videos: bool,
    pub is_audible: bool,
    pub source: ChangeSource,
    pub reasons: Vec<String>,
    pub media_count: u32,
}

/// `VIDEO_CHANGED`: a browsing context saw a new media item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
#[serde(rename_all = "camelCase")]
pub struct VideoChanged {
    pub url: String,
    /// Changes seen by this context since it loaded
    #[serde(default)]
    pub change_count: u32,
    #[serde(default)]
    pub video_info: VideoInfo,
}

// =============================================================================
// Requests
// =============================================================================

/// `ALLOW_TEMPORARILY`: sent by the interstitial when the user continues.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
#[serde(rename_all = "camelCase")]
pub struct AllowTemporarily {
    pub url: String,
    #[serde(default)]
    pub limit_type: Option<LimitType>,
    #[serde(default)]
    pub purpose: Option<Purpose>,
}

/// `CHECK_ALLOWANCE`: either a full URL or a bare domain.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
#[serde(rename_all = "camelCase", default)]
pub struct CheckAllowance {
    pub url: Option<String>,
    pub domain: Option<String>,
}

/// `AUDIO_STATUS_CHANGED`: pushed from the engine to a tab's detector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
#[serde(rename_all = "camelCase")]
pub struct AudioStatusChanged {
    pub is_audible: bool,
}

/// `MEDIA_CLEARED`: the last media element of a context went away.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
#[serde(rename_all = "camelCase")]
pub struct MediaCleared {
    pub url: String,
}

/// `SET_MODE`: switch between work and fun mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct SetMode {
    pub mode: Mode,
}

/// `DEBUG_LOG`: a content script forwarding a log line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct DebugLog {
    pub message: String,
}

/// Every message the engine understands.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Message {
    VideoChanged(VideoChanged),
    AllowTemporarily(AllowTemporarily),
    CheckAllowance(CheckAllowance),
    AudioStatusChanged(AudioStatusChanged),
    MediaCleared(MediaCleared),
    SetMode(SetMode),
    DebugLog(DebugLog),
}

impl Message {
    pub fn from_json(text: &str) -> Result<Self, EngineError> {
        serde_json::from_str(text).map_err(|e| EngineError::InvalidMessage(e.to_string()))
    }

    pub fn from_value(value: serde_json::Value) -> Result<Self, EngineError> {
        serde_json::from_value(value).map_err(|e| EngineError::InvalidMessage(e.to_string()))
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    /// Tag name as it appears on the wire.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::VideoChanged(_) => "VIDEO_CHANGED",
            Self::AllowTemporarily(_) => "ALLOW_TEMPORARILY",
            Self::CheckAllowance(_) => "CHECK_ALLOWANCE",
            Self::AudioStatusChanged(_) => "AUDIO_STATUS_CHANGED",
            Self::MediaCleared(_) => "MEDIA_CLEARED",
            Self::SetMode(_) => "SET_MODE",
            Self::DebugLog(_) => "DEBUG_LOG",
        }
    }
}

// =============================================================================
// Responses
// =============================================================================

/// Reply to `ALLOW_TEMPORARILY` and `SET_MODE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct AllowanceResponse {
    pub success: bool,
}

/// Reply to `CHECK_ALLOWANCE`.
///
/// `isAllowed` and `allowed` carry the same value; older pages read the
/// former. `expiry` is `null` for video allowances.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
#[serde(rename_all = "camelCase")]
pub struct AllowanceStatus {
    pub is_allowed: bool,
    pub allowed: bool,
    pub expiry: Option<Timestamp>,
    pub purpose: Option<Purpose>,
    pub limit_type: Option<LimitType>,
    pub change_count: u32,
}

impl AllowanceStatus {
    pub fn denied() -> Self {
        Self {
            is_allowed: false,
            allowed: false,
            expiry: None,
            purpose: None,
            limit_type: None,
            change_count: 0,
        }
    }
}

/// Reply sent back through `sendResponse`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
#[serde(untagged)]
pub enum Response {
    Allowance(AllowanceResponse),
    Status(AllowanceStatus),
}

impl Response {
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_allow_temporarily() {
        let msg = Message::from_json(
            r#"{"type":"ALLOW_TEMPORARILY","url":"https://x.com","limitType":"video","purpose":"work"}"#,
        )
        .unwrap();
        assert_eq!(
            msg,
            Message::AllowTemporarily(AllowTemporarily {
                url: "https://x.com".to_string(),
                limit_type: Some(LimitType::Video),
                purpose: Some(Purpose::Work),
            })
        );
        assert_eq!(msg.kind(), "ALLOW_TEMPORARILY");
    }

    #[test]
    fn test_parse_video_changed_with_extra_fields() {
        let msg = Message::from_json(
            r#"{"type":"VIDEO_CHANGED","url":"https://youtube.com/watch?v=1","changeCount":2,
                "previousUrl":"https://youtube.com/","videoInfo":{"videoId":"1","platform":"youtube"}}"#,
        )
        .unwrap();
        match msg {
            Message::VideoChanged(change) => {
                assert_eq!(change.change_count, 2);
                assert_eq!(change.video_info.video_id.as_deref(), Some("1"));
                assert_eq!(change.video_info.source, ChangeSource::VideoDetection);
            }
            other => panic!("unexpected message {other:?}"),
        }
    }

    #[test]
    fn test_check_allowance_by_domain() {
        let msg = Message::from_json(r#"{"type":"CHECK_ALLOWANCE","domain":"x.com"}"#).unwrap();
        assert_eq!(
            msg,
            Message::CheckAllowance(CheckAllowance {
                url: None,
                domain: Some("x.com".to_string()),
            })
        );
    }

    #[test]
    fn test_unknown_message_is_invalid() {
        assert!(matches!(
            Message::from_json(r#"{"type":"NOPE"}"#),
            Err(EngineError::InvalidMessage(_))
        ));
    }

    #[test]
    fn test_audio_status_wire_format() {
        let msg = Message::AudioStatusChanged(AudioStatusChanged { is_audible: true });
        assert_eq!(msg.to_json(), r#"{"type":"AUDIO_STATUS_CHANGED","isAudible":true}"#);
    }

    #[test]
    fn test_response_wire_format() {
        let ok = Response::Allowance(AllowanceResponse { success: true });
        assert_eq!(ok.to_json(), r#"{"success":true}"#);

        let status = Response::Status(AllowanceStatus::denied());
        let value: serde_json::Value = serde_json::from_str(&status.to_json()).unwrap();
        assert_eq!(value["isAllowed"], false);
        assert!(value["expiry"].is_null());
    }
}
