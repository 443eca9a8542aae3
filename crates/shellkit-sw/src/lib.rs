//! # ShellKit Service Worker
//!
//! Offline caching engine for a static site's application shell.
//!
//! ## Features
//!
//! - **Classification**: ordered never-cache / critical / cache-on-request rules
//! - **Cache API**: versioned named stores of request → response snapshots
//! - **Retention**: max entry count and max age per entry
//! - **Strategies**: network-first for navigations, cache-first with
//!   background refresh for static assets, network-only for the rest
//! - **Lifecycle**: install, activate, skip-waiting, update notification
//! - **Messaging, sync and push**: page messages, background sync sweeps,
//!   push notifications and notification clicks
//!
//! ## Architecture
//!
//! ```text
//! WorkerContainer
//!     │
//!     ├── Registration
//!     │       ├── installing (CacheWorker)
//!     │       ├── waiting (CacheWorker)
//!     │       └── active (CacheWorker)
//!     │               └── FetchHandler ── Classifier
//!     │                       │         └── RetentionPolicy
//!     │                       └── Fetcher (network)
//!     ├── Clients
//!     └── CacheStorage
//!             └── Cache
//!                     └── RequestKey → CacheEntry
//! ```

use shellkit_net::NetError;
use thiserror::Error;

pub mod cache;
pub mod classify;
pub mod clients;
pub mod config;
pub mod lifecycle;
pub mod message;
pub mod push;
pub mod retention;
pub mod strategy;

pub use cache::{
    Cache, CacheEntry, CacheHandle, CacheStorage, MemoryCacheStorage, RequestKey,
    ResponseSnapshot,
};
pub use classify::{Classifier, Verdict};
pub use clients::{Client, ClientType, Clients};
pub use config::CacheConfig;
pub use lifecycle::{
    CacheWorker, InstallReport, Registration, SyncReport, WorkerContainer, WorkerId, WorkerState,
};
pub use message::{MessageOutcome, PageEvent, VersionReply, WorkerMessage};
pub use push::{Notification, NotificationAction, NotificationClick, PushPayload};
pub use retention::RetentionPolicy;
pub use strategy::{FetchHandler, FetchResponse, FetchScope, ResponseSource};

// ==================== Errors ====================

/// Errors that can occur in service worker operations.
#[derive(Error, Debug)]
pub enum ServiceWorkerError {
    #[error("Network error: {0}")]
    Network(#[from] NetError),

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("State error: {0}")]
    StateError(String),

    #[error("Invalid message: {0}")]
    InvalidMessage(String),
}

/// Errors raised by cache storage.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CacheError {
    #[error("Write failed: {0}")]
    WriteFailed(String),

    #[error("Storage quota exceeded: {requested} bytes requested, {available} available")]
    QuotaExceeded { requested: usize, available: usize },

    #[error("Not found: {0}")]
    NotFound(String),
}

/// Errors raised while loading or compiling configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid pattern {pattern:?}: {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: &'static str, message: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_conversions() {
        let err: ServiceWorkerError = NetError::RequestFailed("offline".into()).into();
        assert!(matches!(err, ServiceWorkerError::Network(_)));

        let err: ServiceWorkerError = CacheError::NotFound("v1".into()).into();
        assert_eq!(err.to_string(), "Cache error: Not found: v1");
    }

    #[test]
    fn test_quota_message() {
        let err = CacheError::QuotaExceeded {
            requested: 10,
            available: 4,
        };
        assert_eq!(
            err.to_string(),
            "Storage quota exceeded: 10 bytes requested, 4 available"
        );
    }
}
