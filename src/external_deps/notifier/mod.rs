//! Outbound operator notifications.
//!
//! Delivery is best effort: a notifier reports whether the message went out
//! but never fails the pipeline.

mod telegram;

pub use telegram::TelegramNotifier;

use async_trait::async_trait;
use thiserror::Error;

/// Shared interface implemented by notification channels.
#[async_trait]
pub trait Notifier: Send + Sync {
    fn name(&self) -> &'static str;

    /// Deliver `text`. Returns `false` when the message was not delivered.
    async fn send(&self, text: &str) -> bool;
}

/// Notifier used when no channel is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct DisabledNotifier;

#[async_trait]
impl Notifier for DisabledNotifier {
    fn name(&self) -> &'static str {
        "disabled"
    }

    async fn send(&self, text: &str) -> bool {
        log::debug!("notification suppressed: {text}");
        false
    }
}

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("notifier misconfigured: {0}")]
    Configuration(String),
    #[error("notification request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("notification rejected with HTTP {0}")]
    Rejected(u16),
}
