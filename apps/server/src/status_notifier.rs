//! Status notifier for bot lifecycle events.
//!
//! Sends a Telegram message to the admin chat when the bot goes live and
//! when it shuts down.

use chrono::{DateTime, Utc};
use smartflow_alerts::MessageSender;
use smartflow_core::ChatId;
use std::sync::Arc;
use tracing::{error, info};

/// Status event types for notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusEvent {
    /// Bot started and polling.
    Started,
    /// Bot stopping.
    Stopping,
}

/// Sends lifecycle notices to the admin chat.
pub struct StatusNotifier {
    sender: Arc<dyn MessageSender>,
    chat_id: ChatId,
    hostname: String,
}

impl StatusNotifier {
    pub fn new(sender: Arc<dyn MessageSender>, chat_id: ChatId) -> Self {
        let hostname = hostname::get()
            .map(|h| h.to_string_lossy().to_string())
            .unwrap_or_else(|_| "unknown".to_string());

        Self {
            sender,
            chat_id,
            hostname,
        }
    }

    /// Render the message for an event.
    pub fn message(&self, event: StatusEvent, at: DateTime<Utc>) -> String {
        let headline = match event {
            StatusEvent::Started => "✅ <b>Smart Flow is now LIVE!</b>",
            StatusEvent::Stopping => "🛑 <b>Smart Flow is shutting down</b>",
        };
        format!(
            "{}\n🖥 Host: <code>{}</code>\n🕒 {}",
            headline,
            self.hostname,
            at.format("%Y-%m-%d %H:%M:%S UTC")
        )
    }

    /// Send a status notification. Failures are logged only.
    pub async fn notify(&self, event: StatusEvent) {
        let message = self.message(event, Utc::now());
        match self.sender.send(self.chat_id, &message).await {
            Ok(()) => info!(chat_id = self.chat_id, event = ?event, "Status notification sent"),
            Err(e) => error!(chat_id = self.chat_id, error = %e, "Failed to send status notification"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use smartflow_alerts::DeliveryError;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Outbox {
        sent: Mutex<Vec<(ChatId, String)>>,
    }

    #[async_trait]
    impl MessageSender for Outbox {
        async fn send(&self, chat_id: ChatId, html: &str) -> Result<(), DeliveryError> {
            self.sent.lock().unwrap().push((chat_id, html.to_string()));
            Ok(())
        }
    }

    #[test]
    fn test_message_includes_host_and_time() {
        let notifier = StatusNotifier::new(Arc::new(Outbox::default()), 1);
        let at = DateTime::<Utc>::from_timestamp(1_700_000_000, 0).unwrap();
        let msg = notifier.message(StatusEvent::Started, at);
        assert!(msg.starts_with("✅ <b>Smart Flow is now LIVE!</b>"));
        assert!(msg.contains(&notifier.hostname));
        assert!(msg.contains("2023-11-14 22:13:20 UTC"));
    }

    #[tokio::test]
    async fn test_notify_sends_to_admin_chat() {
        let outbox = Arc::new(Outbox::default());
        let notifier = StatusNotifier::new(outbox.clone(), -42);
        notifier.notify(StatusEvent::Stopping).await;

        let sent = outbox.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, -42);
        assert!(sent[0].1.contains("shutting down"));
    }
}
