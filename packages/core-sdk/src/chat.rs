use std::sync::Arc;

use crate::{
    db::{self, Store},
    error::AppResult,
    llm::{CompletionBackend, CompletionOptions},
    models::{ChatMessageRecord, Message, NewMessage},
    prompts, telemetry,
};

/** \brief 助手回复入库时的发送者标记。 */
pub const ASSISTANT_SENDER: &str = "Ai Model";

/**
 * \brief 输入农户问题，输出已入库的助手回复。
 */
#[derive(Clone)]
pub struct ChatPipeline {
    backend: Arc<dyn CompletionBackend>,
    store: Store,
}

impl ChatPipeline {
    pub fn new(backend: Arc<dyn CompletionBackend>, store: Store) -> Self {
        Self { backend, store }
    }

    pub async fn run(&self, user_text: &str) -> AppResult<ChatMessageRecord> {
        let messages = [
            Message::system(prompts::CHAT_SYSTEM_PROMPT),
            Message::user(user_text),
        ];
        let reply = match self
            .backend
            .complete(&messages, &CompletionOptions::default())
            .await
        {
            Ok(reply) => reply,
            Err(err) => {
                telemetry::log_error("chat", &format!("completion failed: {}", err));
                return Err(err);
            }
        };

        let message = NewMessage {
            text: reply,
            sender: Some(ASSISTANT_SENDER.to_string()),
        };
        let record = self
            .store
            .call(move |conn| Ok(db::insert_message(conn, &message)?))
            .await?;
        telemetry::log_event(
            "chat",
            &format!(
                "reply id={} prompt_len={} reply_len={}",
                record.id,
                user_text.len(),
                record.text.len()
            ),
        );
        Ok(record)
    }
}
