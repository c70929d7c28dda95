use chrono::{DateTime, Utc};
use log::info;
use serde::Serialize;
use std::sync::Mutex;
use std::time::Instant;

pub const CHANNEL_ID: &str = "WallpaperServiceChannel";

pub const MSG_SETTING: &str = "Setting wallpaper...";
pub const MSG_SUCCESS: &str = "Wallpaper set successfully!";
pub const MSG_FAILURE: &str = "Failed to set wallpaper";
pub const MSG_TIMED_OUT: &str = "Operation timed out";
pub const MSG_NO_DATA: &str = "No image data provided";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Importance {
    Min,
    Low,
    Default,
    High,
}

#[derive(Debug, Clone, Serialize)]
pub struct NotificationChannel {
    pub id: String,
    pub name: String,
    pub description: String,
    pub importance: Importance,
}

impl NotificationChannel {
    pub fn wallpaper_service() -> Self {
        Self {
            id: CHANNEL_ID.to_string(),
            name: "Wallpaper Service".to_string(),
            description: "Handles wallpaper setting operations".to_string(),
            importance: Importance::Low,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Notification {
    pub channel_id: String,
    pub title: String,
    pub text: String,
    pub small_icon: String,
    pub when: DateTime<Utc>,
}

impl Notification {
    pub fn new(channel_id: &str, title: &str, text: &str) -> Self {
        Self {
            channel_id: channel_id.to_string(),
            title: title.to_string(),
            text: text.to_string(),
            small_icon: "ic_menu_gallery".to_string(),
            when: Utc::now(),
        }
    }
}

/// Where service notifications end up: the system tray on a device, a log or
/// an in-memory history when running headless.
pub trait NotificationSink: Send + Sync {
    fn create_channel(&self, channel: &NotificationChannel);
    fn notify(&self, id: i32, notification: &Notification);
    fn cancel(&self, id: i32);
}

pub struct LogNotificationSink;

impl NotificationSink for LogNotificationSink {
    fn create_channel(&self, channel: &NotificationChannel) {
        info!("Notification channel '{}' ready ({:?})", channel.id, channel.importance);
    }

    fn notify(&self, id: i32, notification: &Notification) {
        info!("[{}#{}] {}: {}", notification.channel_id, id, notification.title, notification.text);
    }

    fn cancel(&self, id: i32) {
        info!("Notification #{} removed", id);
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum NotificationEvent {
    Posted { id: i32, notification: Notification },
    Cancelled { id: i32 },
}

/// Records every notification event with the instant it happened, optionally
/// echoing it to the log.
#[derive(Default)]
pub struct NotificationHistory {
    events: Mutex<Vec<(Instant, NotificationEvent)>>,
    echo: bool,
}

impl NotificationHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn echoing() -> Self {
        Self {
            events: Mutex::new(Vec::new()),
            echo: true,
        }
    }

    pub fn events(&self) -> Vec<(Instant, NotificationEvent)> {
        self.lock().clone()
    }

    /// Content texts of every posted notification, in order.
    pub fn texts(&self) -> Vec<String> {
        self.lock()
            .iter()
            .filter_map(|(_, event)| match event {
                NotificationEvent::Posted { notification, .. } => Some(notification.text.clone()),
                NotificationEvent::Cancelled { .. } => None,
            })
            .collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<(Instant, NotificationEvent)>> {
        self.events.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn record(&self, event: NotificationEvent) {
        self.lock().push((Instant::now(), event));
    }
}

impl NotificationSink for NotificationHistory {
    fn create_channel(&self, channel: &NotificationChannel) {
        if self.echo {
            LogNotificationSink.create_channel(channel);
        }
    }

    fn notify(&self, id: i32, notification: &Notification) {
        if self.echo {
            LogNotificationSink.notify(id, notification);
        }
        self.record(NotificationEvent::Posted {
            id,
            notification: notification.clone(),
        });
    }

    fn cancel(&self, id: i32) {
        if self.echo {
            LogNotificationSink.cancel(id);
        }
        self.record(NotificationEvent::Cancelled { id });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn history_keeps_posts_in_order() {
        let history = NotificationHistory::new();
        history.notify(7, &Notification::new(CHANNEL_ID, "Bingtray", MSG_SETTING));
        history.notify(7, &Notification::new(CHANNEL_ID, "Bingtray", MSG_SUCCESS));
        history.cancel(7);

        assert_eq!(history.texts(), vec![MSG_SETTING, MSG_SUCCESS]);
        assert!(matches!(
            history.events().last(),
            Some((_, NotificationEvent::Cancelled { id: 7 }))
        ));
    }

    #[test]
    fn events_serialize_with_tag() {
        let event = NotificationEvent::Posted {
            id: 1001,
            notification: Notification::new(CHANNEL_ID, "Bingtray", MSG_NO_DATA),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "posted");
        assert_eq!(json["notification"]["text"], MSG_NO_DATA);
    }
}
