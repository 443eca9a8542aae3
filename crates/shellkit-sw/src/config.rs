//! Worker configuration.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::classify::Classifier;
use crate::retention::RetentionPolicy;
use crate::ConfigError;

/// Version compiled into the worker when none is configured.
pub const DEFAULT_VERSION: &str = "1.2.0";

/// Tag of the background sync event that refreshes cached entries.
pub const DEFAULT_SYNC_TAG: &str = "background-sync";

/// Caching configuration for one worker version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Prefix shared by every store this application creates.
    pub app_prefix: String,

    /// Running version, embedded in the current store name.
    pub version: String,

    /// Maximum number of entries kept in the current store.
    pub max_entries: usize,

    /// Age in seconds after which an entry is stale.
    pub max_age_secs: u64,

    /// Application shell, pre-cached at install (exact paths).
    pub critical_resources: Vec<String>,

    /// Path patterns cached on first request.
    pub cache_on_request: Vec<String>,

    /// Path patterns that are never cached.
    pub no_cache_patterns: Vec<String>,

    /// Documents served, in order, when a navigation fails and has no entry.
    pub navigation_fallbacks: Vec<String>,

    /// Extra hostnames handled as if they were the worker's origin.
    pub allowed_hosts: Vec<String>,

    /// Activate immediately after install instead of waiting.
    pub skip_waiting_on_install: bool,

    /// Background sync tag that triggers a refresh sweep.
    pub sync_tag: String,

    /// Icon and badge for push notifications.
    pub notification_icon: String,

    /// Title used when a push payload has none.
    pub default_notification_title: String,

    /// Body used when a push payload has none.
    pub default_notification_body: String,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            app_prefix: "shellkit-".to_string(),
            version: DEFAULT_VERSION.to_string(),
            max_entries: 100,
            max_age_secs: 7 * 24 * 60 * 60, // 7 days
            critical_resources: [
                "/",
                "/index.html",
                "/style.css",
                "/script.js",
                "/manifest.json",
                "/assets/logo.png",
                "/assets/favicon.png",
                "/assets/hero.jpg",
                "/assets/palace.jpg",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
            cache_on_request: [
                r"\.(?:png|jpg|jpeg|svg|gif|webp)$",
                r"\.(?:mp4|webm|ogg)$",
                r"\.(?:css|js)$",
                r"\.(?:woff|woff2|ttf|otf)$",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
            no_cache_patterns: [
                r"/api/",
                r"/admin/",
                r"/login",
                r"/register",
                r"\.(?:php|asp|aspx|jsp)$",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
            navigation_fallbacks: vec!["/".to_string(), "/index.html".to_string()],
            allowed_hosts: Vec::new(),
            skip_waiting_on_install: true,
            sync_tag: DEFAULT_SYNC_TAG.to_string(),
            notification_icon: "/assets/favicon.png".to_string(),
            default_notification_title: "New content".to_string(),
            default_notification_body: "New content available".to_string(),
        }
    }
}

impl CacheConfig {
    /// Parse a JSON document; missing fields take their defaults.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a JSON configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    /// Name of the store owned by this version.
    pub fn cache_name(&self) -> String {
        format!("{}v{}", self.app_prefix, self.version)
    }

    /// Whether `name` belongs to this application but another version.
    pub fn is_stale_store(&self, name: &str) -> bool {
        name.starts_with(&self.app_prefix) && name != self.cache_name()
    }

    /// Maximum entry age.
    pub fn max_age(&self) -> Duration {
        Duration::from_secs(self.max_age_secs)
    }

    /// Retention bounds for the current store.
    pub fn retention(&self) -> RetentionPolicy {
        RetentionPolicy::new(self.max_entries, self.max_age())
    }

    /// Compile the classification rules.
    pub fn classifier(&self) -> Result<Classifier, ConfigError> {
        Classifier::new(
            &self.no_cache_patterns,
            &self.critical_resources,
            &self.cache_on_request,
        )
    }

    /// Check values that serde cannot.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.app_prefix.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "app_prefix",
                message: "must not be empty".to_string(),
            });
        }
        if self.version.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "version",
                message: "must not be empty".to_string(),
            });
        }
        check_absolute("critical_resources", &self.critical_resources)?;
        check_absolute("navigation_fallbacks", &self.navigation_fallbacks)?;
        self.classifier().map(|_| ())
    }
}

fn check_absolute(field: &'static str, paths: &[String]) -> Result<(), ConfigError> {
    match paths.iter().find(|p| !p.starts_with('/')) {
        Some(path) => Err(ConfigError::InvalidValue {
            field,
            message: format!("{path:?} is not an absolute path"),
        }),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = CacheConfig::default();
        assert_eq!(config.cache_name(), "shellkit-v1.2.0");
        assert_eq!(config.max_entries, 100);
        assert_eq!(config.max_age(), Duration::from_secs(604_800));
        assert_eq!(config.critical_resources.len(), 9);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_stale_store_detection() {
        let config = CacheConfig::default();
        assert!(config.is_stale_store("shellkit-v1.1.0"));
        assert!(!config.is_stale_store("shellkit-v1.2.0"));
        assert!(!config.is_stale_store("other-app-v1.0.0"));
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config = CacheConfig::from_json_str(r#"{"version": "2.0.0", "max_entries": 5}"#)
            .unwrap();
        assert_eq!(config.cache_name(), "shellkit-v2.0.0");
        assert_eq!(config.max_entries, 5);
        assert_eq!(config.sync_tag, DEFAULT_SYNC_TAG);
    }

    #[test]
    fn test_invalid_pattern_rejected() {
        let err = CacheConfig::from_json_str(r#"{"no_cache_patterns": ["(unclosed"]}"#)
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidPattern { .. }));
    }

    #[test]
    fn test_relative_critical_path_rejected() {
        let err = CacheConfig::from_json_str(r#"{"critical_resources": ["style.css"]}"#)
            .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidValue {
                field: "critical_resources",
                ..
            }
        ));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"app_prefix": "site-", "allowed_hosts": ["cdn.example.net"]}}"#)
            .unwrap();

        let config = CacheConfig::load(file.path()).unwrap();
        assert_eq!(config.cache_name(), "site-v1.2.0");
        assert_eq!(config.allowed_hosts, vec!["cdn.example.net".to_string()]);
    }

    #[test]
    fn test_load_missing_file() {
        let err = CacheConfig::load("/nonexistent/shellkit.json").unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }
}
