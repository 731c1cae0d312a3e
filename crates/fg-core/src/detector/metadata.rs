//! Page metadata fingerprint.
//!
//! A flat map of the Open Graph / Twitter card tags that describe the current
//! media item, plus a few fields from JSON-LD `VideoObject`-like blocks keyed
//! as `jsonld_<index>_<field>`.

use std::collections::BTreeMap;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// `<meta>` properties and names that are kept.
pub const METADATA_TAGS: [&str; 12] = [
    "og:title",
    "og:video",
    "og:video:url",
    "og:video:secure_url",
    "og:video:type",
    "og:video:width",
    "og:video:height",
    "twitter:player",
    "twitter:title",
    "video:duration",
    "video:release_date",
    "article:published_time",
];

/// Keys whose change means the page is showing a different item.
const MATERIAL_KEYS: [&str; 5] = ["og:video", "og:video:url", "twitter:player", "video:duration", "og:title"];

const JSONLD_PREFIX: &str = "jsonld_";

const JSONLD_TYPES: [&str; 3] = ["VideoObject", "Movie", "TVEpisode"];

/// Metadata fingerprint of a page.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Metadata(BTreeMap<String, String>);

impl Metadata {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from `(property, content)` pairs of `<meta>` tags and the raw
    /// text of `application/ld+json` scripts, in document order.
    ///
    /// Unknown properties, empty contents and unparseable JSON-LD are skipped.
    pub fn extract<'a, M, J>(meta_tags: M, json_ld: J) -> Self
    where
        M: IntoIterator<Item = (&'a str, &'a str)>,
        J: IntoIterator<Item = &'a str>,
    {
        let mut map = BTreeMap::new();

        for (property, content) in meta_tags {
            if !content.is_empty() && METADATA_TAGS.contains(&property) {
                map.insert(property.to_string(), content.to_string());
            }
        }

        for (index, text) in json_ld.into_iter().enumerate() {
            let data: Value = match serde_json::from_str(text) {
                Ok(data) => data,
                Err(e) => {
                    log::trace!("Skipping JSON-LD block {}: {}", index, e);
                    continue;
                }
            };
            if let Some(item) = video_item(&data) {
                map.insert(format!("{JSONLD_PREFIX}{index}_name"), string_field(item, &["name"]));
                map.insert(format!("{JSONLD_PREFIX}{index}_url"), string_field(item, &["url"]));
                map.insert(
                    format!("{JSONLD_PREFIX}{index}_id"),
                    string_field(item, &["identifier", "@id"]),
                );
            }
        }

        Self(map)
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Compare against a newer fingerprint.
    ///
    /// Only the player tags, `og:title` and JSON-LD fields count. A key counts
    /// when the values differ and at least one side is non-empty.
    pub fn has_changed(&self, newer: &Metadata) -> bool {
        let differs = |key: &str| {
            let old = self.get(key).unwrap_or("");
            let new = newer.get(key).unwrap_or("");
            old != new && (!old.is_empty() || !new.is_empty())
        };

        MATERIAL_KEYS.iter().any(|key| differs(key))
            || newer
                .0
                .keys()
                .filter(|key| key.starts_with(JSONLD_PREFIX))
                .any(|key| differs(key))
    }
}

/// Find the video-like object in a JSON-LD document. Arrays are searched for
/// their first matching element.
fn video_item(data: &Value) -> Option<&Value> {
    match data {
        Value::Array(items) => items.iter().find(|item| is_video_type(item)),
        Value::Object(_) if is_video_type(data) => Some(data),
        _ => None,
    }
}

fn is_video_type(item: &Value) -> bool {
    match item.get("@type") {
        Some(Value::String(t)) => JSONLD_TYPES.contains(&t.as_str()),
        Some(Value::Array(types)) => types
            .iter()
            .filter_map(Value::as_str)
            .any(|t| JSONLD_TYPES.contains(&t)),
        _ => false,
    }
}

fn string_field(item: &Value, keys: &[&str]) -> String {
    keys.iter()
        .filter_map(|key| item.get(*key))
        .find_map(|value| match value {
            Value::String(s) if !s.is_empty() => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        })
        .unwrap_or_default()
}

/// Strip a leading notification counter such as `(3) ` from a page title.
pub fn clean_page_title(title: &str) -> &str {
    static COUNTER: OnceLock<Option<Regex>> = OnceLock::new();
    let counter = COUNTER.get_or_init(|| Regex::new(r"^\(\d+\)\s+").ok());
    match counter.as_ref().and_then(|re| re.find(title)) {
        Some(m) => &title[m.end()..],
        None => title,
    }
}

/// Check whether two page titles name different items.
pub fn page_title_changed(old: &str, new: &str) -> bool {
    !old.is_empty() && !new.is_empty() && old != new && clean_page_title(old) != clean_page_title(new)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(pairs: &[(&str, &str)]) -> Metadata {
        Metadata::extract(pairs.iter().copied(), std::iter::empty())
    }

    #[test]
    fn test_extract_filters_tags() {
        let m = meta(&[
            ("og:title", "Cats"),
            ("og:description", "ignored"),
            ("twitter:player", ""),
            ("video:duration", "120"),
        ]);
        assert_eq!(m.len(), 2);
        assert_eq!(m.get("og:title"), Some("Cats"));
        assert_eq!(m.get("twitter:player"), None);
    }

    #[test]
    fn test_extract_json_ld() {
        let blocks = [
            r#"{"@type":"Organization","name":"Acme"}"#,
            r#"{"@type":"VideoObject","name":"Episode 1","url":"https://x.com/v/1","@id":"v1"}"#,
            "{broken",
            r#"[{"@type":"BreadcrumbList"},{"@type":["Movie"],"name":"Film","identifier":42}]"#,
        ];
        let m = Metadata::extract(std::iter::empty(), blocks.iter().copied());
        assert_eq!(m.get("jsonld_0_name"), None);
        assert_eq!(m.get("jsonld_1_name"), Some("Episode 1"));
        assert_eq!(m.get("jsonld_1_id"), Some("v1"));
        assert_eq!(m.get("jsonld_3_name"), Some("Film"));
        assert_eq!(m.get("jsonld_3_id"), Some("42"));
        assert_eq!(m.get("jsonld_3_url"), Some(""));
    }

    #[test]
    fn test_has_changed_material_keys_only() {
        let old = meta(&[("og:title", "A"), ("twitter:title", "A")]);
        assert!(!old.has_changed(&meta(&[("og:title", "A"), ("twitter:title", "B")])));
        assert!(old.has_changed(&meta(&[("og:title", "B")])));
        assert!(meta(&[]).has_changed(&meta(&[("og:video", "https://x/v.mp4")])));
        assert!(!meta(&[]).has_changed(&meta(&[])));
    }

    #[test]
    fn test_has_changed_json_ld() {
        let mut old = Metadata::new();
        old.insert("jsonld_0_id", "a");
        let mut new = Metadata::new();
        new.insert("jsonld_0_id", "b");
        assert!(old.has_changed(&new));

        new.insert("jsonld_0_id", "a");
        assert!(!old.has_changed(&new));
    }

    #[test]
    fn test_clean_page_title() {
        assert_eq!(clean_page_title("(3) Cats - YouTube"), "Cats - YouTube");
        assert_eq!(clean_page_title("(x) Cats"), "(x) Cats");
        assert!(!page_title_changed("(1) Cats", "(2) Cats"));
        assert!(page_title_changed("Cats", "Dogs"));
        assert!(!page_title_changed("", "Dogs"));
    }
}
