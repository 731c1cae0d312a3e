use std::fs;
use std::path::{Path, PathBuf};

use fg_core::settings::ConfigSource;
use fg_core::{EngineError, StoredConfig};

/// Configuration stored as a JSON file in the `chrome.storage.sync` layout.
pub struct JsonFileSource {
    path: PathBuf,
}

impl JsonFileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load, requiring the file to exist.
    pub fn load_config(&self) -> Result<StoredConfig, String> {
        self.load().map_err(|e| e.to_string())
    }

    pub fn save(&self, config: &StoredConfig) -> Result<(), String> {
        let json = config.to_json_pretty().map_err(|e| e.to_string())?;
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| format!("Failed to create '{}': {}", parent.display(), e))?;
        }
        fs::write(&self.path, json + "\n").map_err(|e| format!("Failed to write '{}': {}", self.path.display(), e))
    }
}

impl ConfigSource for JsonFileSource {
    fn load(&self) -> Result<StoredConfig, EngineError> {
        let text = fs::read_to_string(&self.path)
            .map_err(|e| EngineError::StorageUnavailable(format!("{}: {}", self.path.display(), e)))?;
        StoredConfig::from_json(&text)
    }
}

/// Load a config file, or start from defaults when it does not exist yet.
pub fn load_or_default(source: &JsonFileSource) -> Result<StoredConfig, String> {
    if !source.path().exists() {
        log::info!("No config at '{}', using defaults", source.path().display());
        return Ok(StoredConfig::default());
    }
    source.load().map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use fg_core::Category;

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("fg-cli-{}-{}.json", name, std::process::id()))
    }

    #[test]
    fn test_save_then_load() {
        let path = temp_path("save");
        let source = JsonFileSource::new(&path);

        let mut config = StoredConfig::default();
        config
            .website_categories
            .add(Category::SocialMedia, "twitter.com")
            .unwrap();
        source.save(&config).unwrap();

        let loaded = source.load().unwrap();
        assert_eq!(loaded, config);
        assert_eq!(loaded.website_categories.classify("https://twitter.com/x"), Some(Category::SocialMedia));
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn test_missing_and_broken_files() {
        let path = temp_path("broken");
        let source = JsonFileSource::new(&path);
        assert_eq!(load_or_default(&source).unwrap(), StoredConfig::default());
        assert!(matches!(source.load(), Err(EngineError::StorageUnavailable(_))));

        fs::write(&path, "{ not json").unwrap();
        assert!(load_or_default(&source).is_err());
        let _ = fs::remove_file(&path);
    }
}
