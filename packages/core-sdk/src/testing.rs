//! 上游边界的测试替身。

use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::{AppError, AppResult};
use crate::llm::{CompletionBackend, CompletionOptions, GroundedSearch};
use crate::models::Message;

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Chat(Vec<Message>, CompletionOptions),
    Vision { data_url: String },
    Search { contents: String },
}

/**
 * \brief 返回预设回复（或上游错误），并记录每次调用。
 */
#[derive(Debug)]
pub struct StubBackend {
    reply: Result<String, String>,
    pub calls: Mutex<Vec<Call>>,
}

impl StubBackend {
    pub fn ok(reply: &str) -> Self {
        Self {
            reply: Ok(reply.to_string()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(message: &str) -> Self {
        Self {
            reply: Err(message.to_string()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    fn respond(&self, call: Call) -> AppResult<String> {
        self.calls.lock().unwrap().push(call);
        self.reply.clone().map_err(AppError::Upstream)
    }
}

#[async_trait]
impl CompletionBackend for StubBackend {
    async fn complete(
        &self,
        messages: &[Message],
        options: &CompletionOptions,
    ) -> AppResult<String> {
        self.respond(Call::Chat(messages.to_vec(), options.clone()))
    }

    async fn complete_vision(
        &self,
        image_data_url: &str,
        _user_prompt: &str,
        _system_prompt: &str,
    ) -> AppResult<String> {
        self.respond(Call::Vision {
            data_url: image_data_url.to_string(),
        })
    }
}

#[async_trait]
impl GroundedSearch for StubBackend {
    async fn search_grounded(
        &self,
        _system_instruction: &str,
        contents: &str,
    ) -> AppResult<String> {
        self.respond(Call::Search {
            contents: contents.to_string(),
        })
    }
}
