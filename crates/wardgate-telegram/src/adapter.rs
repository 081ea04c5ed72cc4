//! Teloxide-backed messenger adapter.

use std::sync::Arc;

use async_trait::async_trait;
use teloxide::dispatching::UpdateFilterExt;
use teloxide::prelude::*;
use teloxide::types::{InlineKeyboardButton, InlineKeyboardMarkup, MessageId};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};
use wardgate_config::TelegramConfig;
use wardgate_core::time::now_epoch;
use wardgate_core::{
    ApprovalAction, ApprovalCallback, ApprovalPrompt, ApprovalResponse, MessengerAdapter,
    MessengerError, SentPrompt,
};

use crate::callback::{encode_callback_data, is_allowed_user, parse_callback_data};

/// State shared with the update dispatcher.
struct CallbackState {
    allowed_users: Vec<u64>,
    callback: RwLock<Option<ApprovalCallback>>,
}

/// Telegram guardian bot.
///
/// Posts approval prompts with Allow/Deny inline keyboards to a single
/// configured chat and relays allowed users' button presses to the
/// registered callback. Presses by anyone else are dropped without a
/// reply, so outsiders cannot even probe for live request ids.
pub struct TelegramAdapter {
    bot: Bot,
    chat_id: ChatId,
    state: Arc<CallbackState>,
    listener: Mutex<Option<ListenerHandle>>,
}

struct ListenerHandle {
    shutdown: teloxide::dispatching::ShutdownToken,
    task: tokio::task::JoinHandle<()>,
}

impl TelegramAdapter {
    /// Build an adapter from Telegram configuration.
    #[must_use]
    pub fn new(config: &TelegramConfig) -> Self {
        Self {
            bot: Bot::new(config.token.clone()),
            chat_id: ChatId(config.chat_id),
            state: Arc::new(CallbackState {
                allowed_users: config.allowed_users.clone(),
                callback: RwLock::new(None),
            }),
            listener: Mutex::new(None),
        }
    }

    async fn handle_callback_query(
        bot: Bot,
        query: CallbackQuery,
        state: Arc<CallbackState>,
    ) -> ResponseResult<()> {
        let Some(parsed) = query.data.as_deref().and_then(parse_callback_data) else {
            // Stale button from a previous release or foreign handler.
            let _ = bot
                .answer_callback_query(query.id.clone())
                .text("This request has expired")
                .await;
            return Ok(());
        };

        if !is_allowed_user(query.from.id.0, &state.allowed_users) {
            // Silently discard: no answer, no error, no probe surface.
            debug!(user = query.from.id.0, "ignoring callback from non-allowed user");
            return Ok(());
        }

        let _ = bot
            .answer_callback_query(query.id.clone())
            .text(match parsed.action {
                ApprovalAction::Allow => "Approved",
                ApprovalAction::Deny => "Denied",
            })
            .await;

        let response = ApprovalResponse {
            request_id: parsed.request_id,
            action: parsed.action,
            user_id: query.from.id.0.to_string(),
            username: query.from.username.as_ref().map(|u| format!("@{u}")),
            timestamp: now_epoch(),
        };

        let callback = state.callback.read().await;
        if let Some(callback) = callback.as_ref() {
            callback(response).await;
        } else {
            warn!("approval callback received before a handler was registered");
        }
        Ok(())
    }
}

#[async_trait]
impl MessengerAdapter for TelegramAdapter {
    async fn send_approval(&self, prompt: &ApprovalPrompt) -> Result<SentPrompt, MessengerError> {
        let buttons: Vec<InlineKeyboardButton> = ApprovalAction::ALL
            .iter()
            .map(|action| {
                InlineKeyboardButton::callback(
                    action.label(),
                    encode_callback_data(&prompt.request_id, *action),
                )
            })
            .collect();
        let markup = InlineKeyboardMarkup::new([buttons]);

        let text = format!("Permission Request\n\nAction: {}", prompt.signature);

        let message = self
            .bot
            .send_message(self.chat_id, text)
            .reply_markup(markup)
            .await
            .map_err(|e| MessengerError::Send(e.to_string()))?;

        Ok(SentPrompt {
            message_id: message.id.0.to_string(),
            chat_id: Some(self.chat_id.0),
        })
    }

    async fn update_approval(&self, message_id: &str, status: &str, detail: &str) {
        let Ok(id) = message_id.parse::<i32>() else {
            warn!(message_id, "cannot edit message with non-numeric id");
            return;
        };
        let text = format!("{status}\n\n{detail}");
        if let Err(e) = self
            .bot
            .edit_message_text(self.chat_id, MessageId(id), text)
            .await
        {
            warn!(message_id, error = %e, "failed to edit approval message");
        }
    }

    async fn set_callback(&self, callback: ApprovalCallback) {
        *self.state.callback.write().await = Some(callback);
    }

    async fn start(&self) -> Result<(), MessengerError> {
        let handler = dptree::entry().branch(
            Update::filter_callback_query().endpoint(Self::handle_callback_query),
        );

        let mut dispatcher = Dispatcher::builder(self.bot.clone(), handler)
            .dependencies(dptree::deps![Arc::clone(&self.state)])
            .default_handler(|_| async {})
            .build();
        let shutdown = dispatcher.shutdown_token();

        let task = tokio::spawn(async move {
            dispatcher.dispatch().await;
        });

        *self.listener.lock().await = Some(ListenerHandle { shutdown, task });
        info!(chat_id = self.chat_id.0, "telegram guardian bot started");
        Ok(())
    }

    async fn stop(&self) {
        let Some(handle) = self.listener.lock().await.take() else {
            return;
        };
        let result = handle.shutdown.shutdown();
        match result {
            Ok(wait) => wait.await,
            Err(_) => handle.task.abort(),
        }
    }
}

impl std::fmt::Debug for TelegramAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelegramAdapter")
            .field("chat_id", &self.chat_id)
            .field("allowed_users", &self.state.allowed_users.len())
            .finish_non_exhaustive()
    }
}
