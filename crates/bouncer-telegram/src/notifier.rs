//! The teloxide-backed notifier.

use async_trait::async_trait;
use teloxide::prelude::*;
use teloxide::types::{InlineKeyboardButton, InlineKeyboardMarkup, ParseMode};
use tracing::warn;

use bouncer_core::MessageId;
use bouncer_gateway::{Notification, Notifier, NotifyError};

use crate::error::TelegramNotifierError;
use crate::format::render_html;

/// Telegram implementation of the gateway [`Notifier`] seam.
///
/// One bot, one approval chat. Message handles are the Telegram message ids
/// rendered as strings; the adapter is the only thing that parses them
/// back.
pub struct TelegramNotifier {
    bot: Bot,
    chat_id: ChatId,
}

impl TelegramNotifier {
    /// Build a notifier from a bot token and the approval chat id.
    ///
    /// # Errors
    ///
    /// Returns [`TelegramNotifierError::Api`] for an unparseable chat id.
    pub fn new(bot_token: &str, chat_id: &str) -> Result<Self, TelegramNotifierError> {
        let chat_id = chat_id
            .parse::<i64>()
            .map(ChatId)
            .map_err(|_| TelegramNotifierError::Api(format!("invalid chat id '{chat_id}'")))?;
        Ok(Self {
            bot: Bot::new(bot_token),
            chat_id,
        })
    }

    fn keyboard(notification: &Notification) -> Option<InlineKeyboardMarkup> {
        if notification.buttons.is_empty() {
            return None;
        }
        let rows: Vec<Vec<InlineKeyboardButton>> = notification
            .buttons
            .iter()
            .map(|row| {
                row.iter()
                    .map(|button| {
                        InlineKeyboardButton::callback(
                            button.label.clone(),
                            button.callback_data.clone(),
                        )
                    })
                    .collect()
            })
            .collect();
        Some(InlineKeyboardMarkup::new(rows))
    }

    fn parse_message_id(message_id: &MessageId) -> Result<teloxide::types::MessageId, NotifyError> {
        message_id
            .as_str()
            .parse::<i32>()
            .map(teloxide::types::MessageId)
            .map_err(|_| {
                NotifyError(
                    TelegramNotifierError::BadMessageId(message_id.to_string()).to_string(),
                )
            })
    }

    async fn send_inner(
        &self,
        notification: &Notification,
        silent: bool,
    ) -> Result<MessageId, NotifyError> {
        let text = render_html(notification);
        let mut request = self
            .bot
            .send_message(self.chat_id, text)
            .parse_mode(ParseMode::Html)
            .disable_notification(silent);
        if let Some(markup) = Self::keyboard(notification) {
            request = request.reply_markup(markup);
        }
        let message = request.await.map_err(|e| {
            warn!(error = %e, "telegram send failed");
            NotifyError(TelegramNotifierError::Api(e.to_string()).to_string())
        })?;
        Ok(MessageId(message.id.0.to_string()))
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn send(&self, message: &Notification) -> Result<MessageId, NotifyError> {
        self.send_inner(message, false).await
    }

    async fn send_silent(&self, message: &Notification) -> Result<(), NotifyError> {
        self.send_inner(message, true).await.map(|_| ())
    }

    async fn edit(
        &self,
        message_id: &MessageId,
        message: &Notification,
    ) -> Result<(), NotifyError> {
        let telegram_id = Self::parse_message_id(message_id)?;
        let text = render_html(message);
        let mut request = self
            .bot
            .edit_message_text(self.chat_id, telegram_id, text)
            .parse_mode(ParseMode::Html);
        if let Some(markup) = Self::keyboard(message) {
            request = request.reply_markup(markup);
        }
        request.await.map_err(|e| {
            warn!(error = %e, "telegram edit failed");
            NotifyError(TelegramNotifierError::Api(e.to_string()).to_string())
        })?;
        Ok(())
    }

    async fn answer_callback(&self, callback_id: &str, text: &str) -> Result<(), NotifyError> {
        self.bot
            .answer_callback_query(callback_id.to_owned())
            .text(text)
            .await
            .map_err(|e| {
                warn!(error = %e, "telegram answer_callback failed");
                NotifyError(TelegramNotifierError::Api(e.to_string()).to_string())
            })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bouncer_gateway::{Button, Segment};

    #[test]
    fn test_keyboard_shape() {
        let notification = Notification {
            segments: vec![Segment::Plain("x".to_owned())],
            buttons: vec![vec![
                Button {
                    label: "✅ approve".to_owned(),
                    callback_data: "cmd_approve:req-1".to_owned(),
                },
                Button {
                    label: "❌ deny".to_owned(),
                    callback_data: "cmd_deny:req-1".to_owned(),
                },
            ]],
        };
        let markup = TelegramNotifier::keyboard(&notification).unwrap();
        assert_eq!(markup.inline_keyboard.len(), 1);
        assert_eq!(markup.inline_keyboard[0].len(), 2);
    }

    #[test]
    fn test_no_buttons_no_keyboard() {
        let notification = Notification::text_only(vec![Segment::Plain("x".to_owned())]);
        assert!(TelegramNotifier::keyboard(&notification).is_none());
    }

    #[test]
    fn test_message_id_roundtrip() {
        let id = MessageId("12345".to_owned());
        let parsed = TelegramNotifier::parse_message_id(&id).unwrap();
        assert_eq!(parsed.0, 12345);
        assert!(TelegramNotifier::parse_message_id(&MessageId("abc".to_owned())).is_err());
    }
}
