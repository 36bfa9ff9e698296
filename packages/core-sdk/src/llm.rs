use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use reqwest::StatusCode;
use serde_json::{json, Value};

use crate::error::{AppError, AppResult};
use crate::models::Message;
use crate::rotator::CredentialRotator;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);
const MAX_RETRIES: u32 = 2;
const RETRY_BACKOFF: Duration = Duration::from_millis(500);

const CHAT_MODEL: &str = "openai/gpt-4.1";
const VISION_MODEL: &str = "openai/gpt-4.1-mini";
/** \brief 视觉请求专用的凭据槽位。 */
const VISION_CREDENTIAL_SLOT: usize = 1;

pub const SEARCH_MODEL: &str = "gemini-2.5-flash";

/**
 * \brief 聊天补全的采样参数。
 */
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionOptions {
    pub model: String,
    pub temperature: f32,
    pub top_p: f32,
    pub max_tokens: u32,
}

impl Default for CompletionOptions {
    fn default() -> Self {
        Self {
            model: CHAT_MODEL.to_string(),
            temperature: 1.0,
            top_p: 1.0,
            max_tokens: 2000,
        }
    }
}

/**
 * \brief 单次文本与视觉补全接口，流水线依赖此抽象。
 */
#[async_trait]
pub trait CompletionBackend: Send + Sync {
    /**
     * \brief 聊天补全；返回第一个候选的内容。
     */
    async fn complete(&self, messages: &[Message], options: &CompletionOptions)
        -> AppResult<String>;

    /**
     * \brief 系统提示词、用户文本与内联图片；返回去除首尾空白的内容。
     */
    async fn complete_vision(
        &self,
        image_data_url: &str,
        user_prompt: &str,
        system_prompt: &str,
    ) -> AppResult<String>;
}

/**
 * \brief 对搜索增强生成模型的单次调用。
 */
#[async_trait]
pub trait GroundedSearch: Send + Sync {
    async fn search_grounded(&self, system_instruction: &str, contents: &str)
        -> AppResult<String>;
}

/**
 * \brief 基于轮换凭据池的 OpenAI 兼容推理客户端。
 */
#[derive(Debug)]
pub struct OpenAiClient {
    rotator: CredentialRotator,
    endpoint: String,
    http: reqwest::Client,
    max_retries: u32,
    retry_backoff: Duration,
}

impl OpenAiClient {
    /**
     * \param rotator 本客户端持有的凭据池
     * \param endpoint 推理服务基地址，不含 `/chat/completions` 后缀
     */
    pub fn new(rotator: CredentialRotator, endpoint: &str) -> AppResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| AppError::Configuration(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self {
            rotator,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            http,
            max_retries: MAX_RETRIES,
            retry_backoff: RETRY_BACKOFF,
        })
    }

    pub fn with_retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = backoff;
        self
    }

    pub fn credential_count(&self) -> usize {
        self.rotator.len()
    }

    async fn post_chat(&self, token: &str, body: &Value) -> Result<Value, String> {
        let url = format!("{}/chat/completions", self.endpoint);
        let mut attempt = 0;
        loop {
            let result = self
                .http
                .post(&url)
                .header(CONTENT_TYPE, "application/json")
                .header(AUTHORIZATION, format!("Bearer {}", token))
                .json(body)
                .send()
                .await;

            match result {
                Ok(resp) if resp.status().is_success() => {
                    return resp
                        .json::<Value>()
                        .await
                        .map_err(|e| format!("invalid response body: {}", e));
                }
                Ok(resp) => {
                    let status = resp.status();
                    let text = resp.text().await.unwrap_or_default();
                    if is_retryable(status) && attempt < self.max_retries {
                        attempt += 1;
                        tracing::warn!(%status, attempt, "retrying completion request");
                        tokio::time::sleep(self.retry_backoff).await;
                        continue;
                    }
                    return Err(format!("{} {}", status, upstream_message(&text)));
                }
                Err(e) if (e.is_timeout() || e.is_connect()) && attempt < self.max_retries => {
                    attempt += 1;
                    tracing::warn!(error = %e, attempt, "retrying completion request");
                    tokio::time::sleep(self.retry_backoff).await;
                }
                Err(e) => return Err(e.to_string()),
            }
        }
    }
}

#[async_trait]
impl CompletionBackend for OpenAiClient {
    async fn complete(
        &self,
        messages: &[Message],
        options: &CompletionOptions,
    ) -> AppResult<String> {
        let token = self.rotator.next();
        let body = json!({
            "model": options.model,
            "messages": messages,
            "temperature": options.temperature,
            "top_p": options.top_p,
            "max_tokens": options.max_tokens,
        });

        let v = self
            .post_chat(token, &body)
            .await
            .map_err(|e| AppError::Upstream(format!("AI service error: {}", e)))?;
        extract_openai_content(&v).ok_or_else(|| {
            AppError::Upstream("AI service error: response contained no message".to_string())
        })
    }

    async fn complete_vision(
        &self,
        image_data_url: &str,
        user_prompt: &str,
        system_prompt: &str,
    ) -> AppResult<String> {
        let token = self.rotator.at(VISION_CREDENTIAL_SLOT);
        let body = json!({
            "model": VISION_MODEL,
            "messages": [
                { "role": "system", "content": system_prompt },
                {
                    "role": "user",
                    "content": [
                        { "type": "text", "text": user_prompt },
                        {
                            "type": "image_url",
                            "image_url": { "url": image_data_url, "detail": "high" }
                        }
                    ]
                }
            ],
            "temperature": 1.0,
            "top_p": 1.0,
            "max_tokens": 1500,
        });

        let v = self
            .post_chat(token, &body)
            .await
            .map_err(|e| AppError::Upstream(format!("Vision analysis failed: {}", e)))?;
        extract_openai_content(&v)
            .map(|s| s.trim().to_string())
            .ok_or_else(|| {
                AppError::Upstream("Vision analysis failed: response contained no message".to_string())
            })
    }
}

/**
 * \brief 启用 Google Search 工具的 Gemini `generateContent` 客户端。
 */
#[derive(Debug, Clone)]
pub struct GeminiClient {
    api_key: String,
    api_base: String,
    model: String,
    http: reqwest::Client,
}

impl GeminiClient {
    pub fn new(api_key: &str, api_base: &str) -> AppResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| AppError::Configuration(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self {
            api_key: api_key.to_string(),
            api_base: normalize_gemini_base(api_base),
            model: SEARCH_MODEL.to_string(),
            http,
        })
    }
}

#[async_trait]
impl GroundedSearch for GeminiClient {
    async fn search_grounded(
        &self,
        system_instruction: &str,
        contents: &str,
    ) -> AppResult<String> {
        let url = format!("{}/models/{}:generateContent", self.api_base, self.model);
        let messages = [Message::system(system_instruction), Message::user(contents)];
        let (system_prompt, contents) = gemini_payload(&messages);

        let mut body = json!({
            "contents": contents,
            "tools": [{ "google_search": {} }],
        });
        if let Some(sys) = system_prompt {
            body["system_instruction"] = json!({
                "parts": [{"text": sys}]
            });
        }

        let resp = self
            .http
            .post(url)
            .query(&[("key", self.api_key.as_str())])
            .json(&body)
            .send()
            .await
            .map_err(|e| AppError::Upstream(format!("search request failed: {}", e)))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(AppError::Upstream(format!(
                "search request failed: {} {}",
                status,
                upstream_message(&text)
            )));
        }
        let v: Value = resp
            .json()
            .await
            .map_err(|e| AppError::Upstream(format!("search request failed: {}", e)))?;
        Ok(extract_gemini_content(&v))
    }
}

fn is_retryable(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::REQUEST_TIMEOUT | StatusCode::CONFLICT | StatusCode::TOO_MANY_REQUESTS
    ) || status.is_server_error()
}

/** \brief 从上游错误体中提取 `error.message`，失败时回退为原文。 */
fn upstream_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| {
            v.get("error")
                .and_then(|e| e.get("message").or(Some(e)))
                .and_then(|m| m.as_str())
                .map(|s| s.to_string())
        })
        .unwrap_or_else(|| body.trim().to_string())
}

fn extract_openai_content(v: &Value) -> Option<String> {
    v.get("choices")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("message"))
        .and_then(|m| m.get("content"))
        .and_then(|c| c.as_str())
        .map(|s| s.to_string())
}

fn extract_gemini_content(v: &Value) -> String {
    v.get("candidates")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("content"))
        .and_then(|c| c.get("parts"))
        .and_then(|p| p.as_array())
        .map(|parts| {
            parts
                .iter()
                .filter_map(|p| p.get("text").and_then(|t| t.as_str()))
                .collect::<Vec<_>>()
                .join("")
        })
        .unwrap_or_default()
}

fn gemini_payload(messages: &[Message]) -> (Option<String>, Vec<Value>) {
    let mut system_parts = Vec::new();
    let mut contents = Vec::new();
    for msg in messages {
        if msg.role == "system" {
            system_parts.push(msg.content.clone());
        } else {
            contents.push(json!({
                "role": "user",
                "parts": [{"text": msg.content}]
            }));
        }
    }
    let system_prompt = if system_parts.is_empty() {
        None
    } else {
        Some(system_parts.join("\n\n"))
    };
    (system_prompt, contents)
}

fn normalize_gemini_base(api_base: &str) -> String {
    let trimmed = api_base.trim_end_matches('/');
    if trimmed.ends_with("/v1")
        || trimmed.ends_with("/v1beta")
        || trimmed.contains("/v1/")
        || trimmed.contains("/v1beta/")
    {
        trimmed.to_string()
    } else {
        format!("{}/v1beta", trimmed)
    }
}
