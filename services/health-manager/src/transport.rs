//! Outbound message transport and mock implementation.
//!
//! The sender hands encoded start/stop commands to a [`Publisher`]. The
//! message-bus client lives outside this crate; [`MockPublisher`] records
//! what would have been published, for development and tests.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::info;

/// Transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The bus rejected or failed to deliver a message.
    #[error("failed to publish on {subject}: {message}")]
    PublishFailed { subject: String, message: String },

    /// A command could not be encoded.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Publishes encoded commands on a subject.
#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(&self, subject: &str, payload: Vec<u8>) -> Result<(), TransportError>;
}

/// A message captured by [`MockPublisher`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedMessage {
    pub subject: String,
    pub payload: Vec<u8>,
}

impl PublishedMessage {
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, TransportError> {
        Ok(serde_json::from_slice(&self.payload)?)
    }
}

/// Mock publisher for testing and development.
pub struct MockPublisher {
    published: Mutex<Vec<PublishedMessage>>,

    /// Publishes allowed to succeed before every later one fails.
    fail_after: Option<usize>,
}

impl MockPublisher {
    /// Create a mock publisher that accepts everything.
    pub fn new() -> Self {
        Self {
            published: Mutex::new(Vec::new()),
            fail_after: None,
        }
    }

    /// Create a mock publisher that fails every publish.
    pub fn failing() -> Self {
        Self::failing_after(0)
    }

    /// Create a mock publisher that accepts `successes` messages, then fails.
    pub fn failing_after(successes: usize) -> Self {
        Self {
            published: Mutex::new(Vec::new()),
            fail_after: Some(successes),
        }
    }

    /// Everything published so far, in order.
    pub async fn published(&self) -> Vec<PublishedMessage> {
        self.published.lock().await.clone()
    }

    pub async fn published_on(&self, subject: &str) -> Vec<PublishedMessage> {
        self.published
            .lock()
            .await
            .iter()
            .filter(|m| m.subject == subject)
            .cloned()
            .collect()
    }
}

impl Default for MockPublisher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Publisher for MockPublisher {
    async fn publish(&self, subject: &str, payload: Vec<u8>) -> Result<(), TransportError> {
        let mut published = self.published.lock().await;

        if self.fail_after.is_some_and(|limit| published.len() >= limit) {
            return Err(TransportError::PublishFailed {
                subject: subject.to_string(),
                message: "mock publisher configured to fail".to_string(),
            });
        }

        info!(subject, bytes = payload.len(), "[MOCK] Publishing message");
        published.push(PublishedMessage {
            subject: subject.to_string(),
            payload,
        });
        Ok(())
    }
}
