//! Push payloads and the notifications they produce.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use hashbrown::HashMap;
use serde::{Deserialize, Serialize};

use crate::config::NotificationDefaults;
use crate::error::{Result, ServiceWorkerError};

/// Unique identifier for a shown notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NotificationId(u64);

impl NotificationId {
    fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for NotificationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "notification-{}", self.0)
    }
}

/// Body of a push message. Every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushPayload {
    pub title: Option<String>,
    pub body: Option<String>,
    pub icon: Option<String>,
    pub badge: Option<String>,
    #[serde(alias = "target_url")]
    pub url: Option<String>,
}

impl PushPayload {
    /// Parse push message data. Missing data counts as malformed.
    pub fn parse(data: Option<&[u8]>) -> Result<Self> {
        let data = data.ok_or_else(|| ServiceWorkerError::PushParse("push message has no data".into()))?;
        serde_json::from_slice(data).map_err(|e| ServiceWorkerError::PushParse(e.to_string()))
    }
}

/// Data attached to a notification for the click handler.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationData {
    pub url: Option<String>,
}

/// A displayed notification.
#[derive(Debug, Clone)]
pub struct Notification {
    pub id: NotificationId,
    pub title: String,
    pub body: String,
    pub icon: String,
    pub badge: String,
    pub data: NotificationData,
    pub shown_at: Instant,
}

impl Notification {
    /// Build a notification, taking anything the payload leaves out (or
    /// leaves empty) from `defaults`.
    pub fn from_payload(payload: PushPayload, defaults: &NotificationDefaults) -> Self {
        fn or_default(value: Option<String>, fallback: &str) -> String {
            value
                .filter(|v| !v.is_empty())
                .unwrap_or_else(|| fallback.to_string())
        }

        Self {
            id: NotificationId::new(),
            title: or_default(payload.title, &defaults.title),
            body: or_default(payload.body, &defaults.body),
            icon: or_default(payload.icon, &defaults.icon),
            badge: or_default(payload.badge, &defaults.badge),
            data: NotificationData {
                url: payload.url.filter(|u| !u.is_empty()),
            },
            shown_at: Instant::now(),
        }
    }
}

/// Notifications currently on screen.
#[derive(Debug, Default)]
pub struct NotificationCenter {
    shown: HashMap<NotificationId, Notification>,
}

impl NotificationCenter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Display a notification.
    pub fn show(&mut self, notification: Notification) -> NotificationId {
        let id = notification.id;
        self.shown.insert(id, notification);
        id
    }

    /// Close a notification. Returns it if it was still shown.
    pub fn close(&mut self, id: NotificationId) -> Option<Notification> {
        self.shown.remove(&id)
    }

    pub fn get(&self, id: NotificationId) -> Option<&Notification> {
        self.shown.get(&id)
    }

    /// Shown notifications, oldest first.
    pub fn get_notifications(&self) -> Vec<&Notification> {
        let mut shown: Vec<&Notification> = self.shown.values().collect();
        shown.sort_by_key(|n| n.id.raw());
        shown
    }
}
