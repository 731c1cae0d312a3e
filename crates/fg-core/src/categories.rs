//! Category lists and the domain matcher.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use crate::error::EngineError;
use crate::types::Category;
use crate::url::{domain_of, format_url};

/// A listed website. Only its hostname takes part in matching.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Website {
    pub url: String,
}

impl Website {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

/// The three user-maintained website lists.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Categories {
    pub fun: Vec<Website>,
    pub fun_and_work: Vec<Website>,
    pub social_media: Vec<Website>,
}

impl Categories {
    pub fn new() -> Self {
        Self::default()
    }

    /// List for a category.
    pub fn list(&self, category: Category) -> &[Website] {
        match category {
            Category::Fun => &self.fun,
            Category::FunAndWork => &self.fun_and_work,
            Category::SocialMedia => &self.social_media,
        }
    }

    fn list_mut(&mut self, category: Category) -> &mut Vec<Website> {
        match category {
            Category::Fun => &mut self.fun,
            Category::FunAndWork => &mut self.fun_and_work,
            Category::SocialMedia => &mut self.social_media,
        }
    }

    /// Total number of listed sites.
    pub fn len(&self) -> usize {
        self.fun.len() + self.fun_and_work.len() + self.social_media.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Classify a URL.
    ///
    /// Lists are searched in `fun`, `funAndWork`, `socialMedia` order and the
    /// first hostname match wins. Unparseable input is never blocked.
    pub fn classify(&self, url: &str) -> Option<Category> {
        let domain = match domain_of(url) {
            Some(domain) => domain,
            None => {
                log::debug!("Not classifying malformed URL: {}", url);
                return None;
            }
        };
        self.classify_domain(&domain)
    }

    /// Classify an already-canonical domain.
    pub fn classify_domain(&self, domain: &str) -> Option<Category> {
        Category::PRECEDENCE
            .into_iter()
            .find(|&category| self.list(category).iter().any(|site| site_matches(site, domain)))
    }

    /// Hosts that appear in more than one list, with every list they are in.
    pub fn overlaps(&self) -> Vec<(String, Vec<Category>)> {
        let mut seen: BTreeMap<String, Vec<Category>> = BTreeMap::new();
        for category in Category::PRECEDENCE {
            for site in self.list(category) {
                if let Some(domain) = domain_of(&site.url) {
                    let entry = seen.entry(domain).or_default();
                    if !entry.contains(&category) {
                        entry.push(category);
                    }
                }
            }
        }
        seen.into_iter().filter(|(_, cats)| cats.len() > 1).collect()
    }

    /// Add a site to a list, stored as its origin.
    ///
    /// Rejects sites that are already present in any list.
    pub fn add(&mut self, category: Category, raw: &str) -> Result<String, EngineError> {
        let formatted = format_url(raw).ok_or_else(|| EngineError::MalformedUrl(raw.to_string()))?;
        let domain = domain_of(&formatted).ok_or_else(|| EngineError::MalformedUrl(raw.to_string()))?;
        if let Some(existing) = self.classify_domain(&domain) {
            return Err(EngineError::AlreadyListed(existing.to_string()));
        }
        self.list_mut(category).push(Website::new(formatted.clone()));
        Ok(formatted)
    }

    /// Remove every entry for the URL's host from a list.
    pub fn remove(&mut self, category: Category, raw: &str) -> bool {
        let Some(domain) = domain_of(raw) else {
            return false;
        };
        let list = self.list_mut(category);
        let before = list.len();
        list.retain(|site| !site_matches(site, &domain));
        list.len() != before
    }

    /// Build the lookup table used on every navigation.
    pub fn index(&self) -> DomainIndex {
        DomainIndex::build(self)
    }
}

// =============================================================================
// Lookup
// =============================================================================

/// Canonical host to category, built once per list update.
///
/// Overlapping hosts keep the category that comes first in precedence order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DomainIndex {
    hosts: HashMap<String, Category>,
}

impl DomainIndex {
    pub fn build(categories: &Categories) -> Self {
        let mut hosts = HashMap::with_capacity(categories.len());
        for category in Category::PRECEDENCE {
            for site in categories.list(category) {
                match domain_of(&site.url) {
                    Some(domain) => {
                        hosts.entry(domain).or_insert(category);
                    }
                    None => log::debug!("Invalid URL in website categories: {}", site.url),
                }
            }
        }
        Self { hosts }
    }

    pub fn len(&self) -> usize {
        self.hosts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty()
    }

    /// Same answer as [`Categories::classify_domain`].
    #[inline]
    pub fn classify_domain(&self, domain: &str) -> Option<Category> {
        self.hosts.get(domain).copied()
    }

    pub fn classify(&self, url: &str) -> Option<Category> {
        domain_of(url).and_then(|domain| self.classify_domain(&domain))
    }
}

fn site_matches(site: &Website, domain: &str) -> bool {
    match domain_of(&site.url) {
        Some(site_domain) => site_domain == domain,
        None => {
            log::debug!("Invalid URL in website categories: {}", site.url);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Categories {
        Categories {
            fun: vec![Website::new("https://www.youtube.com")],
            fun_and_work: vec![Website::new("github.com")],
            social_media: vec![Website::new("https://twitter.com"), Website::new("::bad::")],
        }
    }

    #[test]
    fn test_classify_by_hostname() {
        let cats = sample();
        assert_eq!(cats.classify("https://youtube.com/watch?v=1"), Some(Category::Fun));
        assert_eq!(cats.classify("github.com/rust-lang/rust"), Some(Category::FunAndWork));
        assert_eq!(cats.classify("https://twitter.com/home#top"), Some(Category::SocialMedia));
        assert_eq!(cats.classify("https://gist.github.com"), None);
        assert_eq!(cats.classify("chrome://extensions"), None);
        assert_eq!(cats.classify(""), None);
    }

    #[test]
    fn test_classify_stable_under_variations() {
        let cats = sample();
        let variants = [
            "youtube.com",
            "www.youtube.com",
            "https://www.youtube.com/feed/subscriptions",
            "http://youtube.com/?q=rust",
            "https://YOUTUBE.com/#comments",
        ];
        for variant in variants {
            assert_eq!(cats.classify(variant), Some(Category::Fun), "{variant}");
        }
    }

    #[test]
    fn test_format_then_classify_round_trip() {
        let cats = sample();
        for raw in ["twitter.com/home", "https://github.com/x?y=1", "example.org", "::bad::"] {
            let direct = cats.classify(raw);
            let formatted = format_url(raw).and_then(|f| cats.classify(&f));
            assert_eq!(direct, formatted, "{raw}");
        }
    }

    #[test]
    fn test_precedence_on_overlap() {
        let mut cats = sample();
        cats.social_media.push(Website::new("youtube.com"));
        assert_eq!(cats.classify("youtube.com"), Some(Category::Fun));

        let overlaps = cats.overlaps();
        assert_eq!(overlaps.len(), 1);
        assert_eq!(overlaps[0].0, "youtube.com");
        assert_eq!(overlaps[0].1, vec![Category::Fun, Category::SocialMedia]);
    }

    #[test]
    fn test_index_agrees_with_lists() {
        let mut cats = sample();
        cats.social_media.push(Website::new("youtube.com"));
        let index = cats.index();
        // The malformed entry is skipped, the overlap counted once
        assert_eq!(index.len(), 3);
        for url in [
            "https://youtube.com/watch?v=1",
            "www.youtube.com",
            "github.com/rust-lang",
            "https://twitter.com/home",
            "https://gist.github.com",
            "chrome://extensions",
            "::bad::",
        ] {
            assert_eq!(index.classify(url), cats.classify(url), "{url}");
        }
        assert_eq!(index.classify_domain("youtube.com"), Some(Category::Fun));
        assert!(Categories::new().index().is_empty());
    }

    #[test]
    fn test_add_and_remove() {
        let mut cats = Categories::new();
        assert_eq!(cats.add(Category::Fun, "reddit.com/r/rust").unwrap(), "https://reddit.com");
        assert!(matches!(
            cats.add(Category::SocialMedia, "https://www.reddit.com"),
            Err(EngineError::AlreadyListed(_))
        ));
        assert!(matches!(cats.add(Category::Fun, "chrome://x"), Err(EngineError::MalformedUrl(_))));
        assert_eq!(cats.len(), 1);

        assert!(cats.remove(Category::Fun, "www.reddit.com"));
        assert!(!cats.remove(Category::Fun, "reddit.com"));
        assert!(cats.is_empty());
    }

    #[test]
    fn test_deserialize_partial_lists() {
        let cats: Categories = serde_json::from_str(r#"{"fun":[{"url":"https://a.com"}]}"#).unwrap();
        assert_eq!(cats.fun.len(), 1);
        assert!(cats.fun_and_work.is_empty());
        assert!(cats.social_media.is_empty());
    }
}
