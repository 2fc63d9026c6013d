//! Integrations that rely on third-party services.
//!
//! Currently only operator notifications live here; the sweep talks to them
//! through the [`notifier::Notifier`] trait.

pub mod notifier;

pub use notifier::{DisabledNotifier, Notifier, NotifyError, TelegramNotifier};
