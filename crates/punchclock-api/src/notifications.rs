use chrono::Utc;
use serde_json::json;

use punchclock_types::ids::new_id;
use punchclock_types::models::Notification;
use punchclock_types::tables::Table;

use crate::backend::Filter;
use crate::facade::{Facade, FacadeError};

impl Facade {
    /// Notifications of a user, newest first.
    pub async fn notifications(&self, user_id: &str) -> Result<Vec<Notification>, FacadeError> {
        let mut notifications: Vec<Notification> = self
            .fetch_all(Table::Notifications, &Filter::eq("user_id", user_id))
            .await?;
        notifications.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(notifications)
    }

    pub async fn unread_count(&self, user_id: &str) -> Result<usize, FacadeError> {
        Ok(self
            .notifications(user_id)
            .await?
            .iter()
            .filter(|n| !n.read)
            .count())
    }

    pub async fn notify(&self, user_id: &str, title: &str, message: &str) -> Result<Notification, FacadeError> {
        let notification = Notification {
            id: new_id(),
            user_id: user_id.to_string(),
            title: title.to_string(),
            message: message.to_string(),
            read: false,
            created_at: Utc::now(),
        };
        self.insert(Table::Notifications, &notification).await
    }

    pub async fn mark_notification_read(&self, id: &str) -> Result<Notification, FacadeError> {
        self.update(Table::Notifications, id, json!({ "read": true }))
            .await
    }

    /// Returns how many were marked.
    pub async fn mark_all_notifications_read(&self, user_id: &str) -> Result<usize, FacadeError> {
        let unread: Vec<Notification> = self
            .fetch_all(
                Table::Notifications,
                &Filter::eq("user_id", user_id).and("read", "false"),
            )
            .await?;
        for notification in &unread {
            self.mark_notification_read(&notification.id).await?;
        }
        Ok(unread.len())
    }
}
