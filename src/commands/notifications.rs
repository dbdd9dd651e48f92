//! Notification commands.
//!
//! ```bash
//! pharmadesk-realtime notifications
//! pharmadesk-realtime mark-all-read
//! ```

use anyhow::Result;

use super::require_token;
use crate::api::ApiClient;
use crate::config::Config;
use crate::dashboard::{Notification, NotificationBackend};

/// Print every notification, newest first, followed by the unread count.
pub async fn list(config: &Config) -> Result<()> {
    require_token(config)?;
    let api = ApiClient::new(&config.api_url, &config.token)?;

    let mut notifications = api.notifications().await?;
    notifications.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    for notification in &notifications {
        println!("{}", format_line(notification));
    }

    let unread = api.unread_notification_count().await?;
    println!("{} notifications, {} unread", notifications.len(), unread);
    Ok(())
}

/// Mark every notification as read on the server.
pub async fn mark_all_read(config: &Config) -> Result<()> {
    require_token(config)?;
    let api = ApiClient::new(&config.api_url, &config.token)?;
    api.mark_all_notifications_read().await?;
    println!("All notifications marked as read.");
    Ok(())
}

fn format_line(notification: &Notification) -> String {
    format!(
        "{} #{:<5} {} [{}] {}",
        if notification.is_read { " " } else { "*" },
        notification.id,
        notification.created_at.format("%Y-%m-%d %H:%M"),
        notification.kind,
        notification.message
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    #[test]
    fn test_format_line_marks_unread() {
        let mut notification = Notification {
            id: 12,
            kind: "offer".to_string(),
            message: "Teklifiniz kabul edildi".to_string(),
            is_read: false,
            created_at: Utc.with_ymd_and_hms(2025, 3, 1, 9, 30, 0).unwrap(),
            related_id: None,
        };
        assert_eq!(
            format_line(&notification),
            "* #12    2025-03-01 09:30 [offer] Teklifiniz kabul edildi"
        );
        notification.is_read = true;
        assert!(format_line(&notification).starts_with("  #12"));
    }

    #[tokio::test]
    async fn test_list_requires_token() {
        let config = Config::default();
        let err = list(&config).await.unwrap_err();
        assert!(err.to_string().contains("PHARMADESK_TOKEN"));
    }
}
