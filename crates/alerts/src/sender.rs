//! Outbound message delivery capability.

use async_trait::async_trait;
use smartflow_core::ChatId;
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur while delivering a message.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum DeliveryError {
    #[error("Delivery timed out")]
    Timeout,

    #[error("Telegram API error: {0}")]
    Api(String),

    #[error("Rate limited, retry after {0:?}")]
    RetryAfter(Duration),

    #[error("Chat {0} cannot receive messages")]
    InvalidChat(ChatId),

    #[error("Message rejected: {0}")]
    Rejected(String),

    #[error("Gave up after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: String },
}

impl DeliveryError {
    /// Returns true if another attempt may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            DeliveryError::Timeout | DeliveryError::Api(_) | DeliveryError::RetryAfter(_)
        )
    }

    /// Server-provided delay before the next attempt.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            DeliveryError::RetryAfter(delay) => Some(*delay),
            _ => None,
        }
    }
}

/// Sends HTML messages to chats.
#[async_trait]
pub trait MessageSender: Send + Sync {
    async fn send(&self, chat_id: ChatId, html: &str) -> Result<(), DeliveryError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(DeliveryError::Timeout.is_transient());
        assert!(DeliveryError::RetryAfter(Duration::from_secs(3)).is_transient());
        assert!(!DeliveryError::InvalidChat(42).is_transient());
        assert!(!DeliveryError::Rejected("can't parse entities".into()).is_transient());
        assert_eq!(
            DeliveryError::RetryAfter(Duration::from_secs(3)).retry_after(),
            Some(Duration::from_secs(3))
        );
        assert_eq!(DeliveryError::Timeout.retry_after(), None);
    }
}
