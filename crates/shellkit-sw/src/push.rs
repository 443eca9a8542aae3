//! Push messages and the notifications they produce.

use serde::{Deserialize, Serialize};

use crate::config::CacheConfig;
use crate::ServiceWorkerError;

/// Action that opens the notification's URL.
pub const ACTION_VIEW: &str = "view";

/// Action that only dismisses the notification.
pub const ACTION_CLOSE: &str = "close";

/// JSON payload of a push message. Every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushPayload {
    pub title: Option<String>,
    pub body: Option<String>,
    pub url: Option<String>,
}

impl PushPayload {
    pub fn from_json(json: &str) -> Result<Self, ServiceWorkerError> {
        serde_json::from_str(json).map_err(|e| ServiceWorkerError::InvalidMessage(e.to_string()))
    }
}

/// Button on a notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationAction {
    pub action: String,
    pub title: String,
    pub icon: String,
}

/// Data carried by a notification until it is clicked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationData {
    pub url: String,
    pub date_of_arrival: u64,
    pub primary_key: u32,
}

/// Notification to display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub title: String,
    pub body: String,
    pub icon: String,
    pub badge: String,
    pub vibrate: Vec<u32>,
    pub data: NotificationData,
    pub actions: Vec<NotificationAction>,
}

impl Notification {
    /// Build the notification for a push payload, filling gaps from `config`.
    pub fn from_push(payload: PushPayload, config: &CacheConfig, now_ms: u64) -> Self {
        let icon = config.notification_icon.clone();
        let action = |action: &str, title: &str| NotificationAction {
            action: action.to_string(),
            title: title.to_string(),
            icon: icon.clone(),
        };

        Self {
            title: payload
                .title
                .unwrap_or_else(|| config.default_notification_title.clone()),
            body: payload
                .body
                .unwrap_or_else(|| config.default_notification_body.clone()),
            icon: icon.clone(),
            badge: icon.clone(),
            vibrate: vec![100, 50, 100],
            data: NotificationData {
                url: payload.url.unwrap_or_else(|| "/".to_string()),
                date_of_arrival: now_ms,
                primary_key: 1,
            },
            actions: vec![action(ACTION_VIEW, "View"), action(ACTION_CLOSE, "Close")],
        }
    }
}

/// A click on a displayed notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationClick {
    /// Action button pressed, if any.
    pub action: Option<String>,
    /// The clicked notification.
    pub notification: Notification,
}

impl NotificationClick {
    /// Whether the click asks for the notification's URL to be shown.
    pub fn wants_view(&self) -> bool {
        self.action.as_deref() == Some(ACTION_VIEW)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_payload() {
        let payload =
            PushPayload::from_json(r#"{"title":"Festival","body":"Dates announced","url":"/events"}"#)
                .unwrap();
        let n = Notification::from_push(payload, &CacheConfig::default(), 7);

        assert_eq!(n.title, "Festival");
        assert_eq!(n.body, "Dates announced");
        assert_eq!(n.data.url, "/events");
        assert_eq!(n.data.date_of_arrival, 7);
        assert_eq!(n.icon, "/assets/favicon.png");
        assert_eq!(n.actions.len(), 2);
        assert_eq!(n.actions[0].action, ACTION_VIEW);
    }

    #[test]
    fn test_empty_payload_uses_defaults() {
        let config = CacheConfig::default();
        let n = Notification::from_push(PushPayload::from_json("{}").unwrap(), &config, 0);

        assert_eq!(n.title, config.default_notification_title);
        assert_eq!(n.body, config.default_notification_body);
        assert_eq!(n.data.url, "/");
    }

    #[test]
    fn test_malformed_payload() {
        assert!(PushPayload::from_json("not json").is_err());
    }

    #[test]
    fn test_click_wants_view() {
        let notification =
            Notification::from_push(PushPayload::default(), &CacheConfig::default(), 0);
        let view = NotificationClick {
            action: Some("view".to_string()),
            notification: notification.clone(),
        };
        let close = NotificationClick {
            action: Some("close".to_string()),
            notification: notification.clone(),
        };
        let body = NotificationClick {
            action: None,
            notification,
        };

        assert!(view.wants_view());
        assert!(!close.wants_view());
        assert!(!body.wants_view());
    }
}
