use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;

use super::{Notifier, NotifyError};

const DEFAULT_API_BASE: &str = "https://api.telegram.org";
const SEND_TIMEOUT: Duration = Duration::from_secs(10);

/// Telegram Bot API notifier.
pub struct TelegramNotifier {
    client: Client,
    api_base: String,
    bot_token: Option<String>,
    chat_id: Option<String>,
}

impl TelegramNotifier {
    pub fn new(bot_token: Option<String>, chat_id: Option<String>) -> Self {
        Self {
            client: Client::builder()
                .timeout(SEND_TIMEOUT)
                .build()
                .unwrap_or_default(),
            api_base: DEFAULT_API_BASE.to_string(),
            bot_token: bot_token.filter(|token| !token.is_empty()),
            chat_id: chat_id.filter(|chat| !chat.is_empty()),
        }
    }

    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self
    }

    pub fn is_configured(&self) -> bool {
        self.bot_token.is_some() && self.chat_id.is_some()
    }

    fn endpoint(&self, token: &str) -> String {
        format!("{}/bot{}/sendMessage", self.api_base, token)
    }

    async fn deliver(&self, text: &str) -> Result<(), NotifyError> {
        let (Some(token), Some(chat_id)) = (&self.bot_token, &self.chat_id) else {
            return Err(NotifyError::Configuration(
                "bot token or chat id missing".into(),
            ));
        };

        let response = self
            .client
            .post(self.endpoint(token))
            .form(&[("chat_id", chat_id.as_str()), ("text", text)])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(NotifyError::Rejected(response.status().as_u16()));
        }
        Ok(())
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    fn name(&self) -> &'static str {
        "telegram"
    }

    async fn send(&self, text: &str) -> bool {
        if !self.is_configured() {
            return false;
        }

        match self.deliver(text).await {
            Ok(()) => true,
            Err(err) => {
                log::error!("failed to send telegram notification: {err}");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unconfigured_notifier_declines_quietly() {
        let notifier = TelegramNotifier::new(None, Some("42".into()));
        assert!(!notifier.is_configured());
        assert!(!notifier.send("hello").await);

        let blank = TelegramNotifier::new(Some(String::new()), Some("42".into()));
        assert!(!blank.is_configured());
    }

    #[test]
    fn endpoint_uses_api_base() {
        let notifier = TelegramNotifier::new(Some("t0k".into()), Some("1".into()))
            .with_api_base("http://localhost:9000/");
        assert_eq!(
            notifier.endpoint("t0k"),
            "http://localhost:9000/bott0k/sendMessage"
        );
    }

    #[tokio::test]
    async fn unreachable_api_reports_failure() {
        let notifier = TelegramNotifier::new(Some("t".into()), Some("1".into()))
            .with_api_base("http://127.0.0.1:9");
        assert!(!notifier.send("hello").await);
    }
}
