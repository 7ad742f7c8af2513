use quern_core::error::AppError;
use serde::{Deserialize, Serialize};

use super::{ChatClient, ChatCompletion, ChatMessage, ChatUsage};
use crate::openai::OpenAiClient;

/// [`ChatClient`] backed by the OpenAI-style `/v1/chat/completions`
/// endpoint.
#[derive(Debug, Clone)]
pub struct OpenAiChat {
    client: OpenAiClient,
}

impl OpenAiChat {
    pub fn new(client: OpenAiClient) -> Self {
        Self { client }
    }
}

#[derive(Debug, Clone, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
}

#[derive(Debug, Clone, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
    #[serde(default)]
    usage: ChatUsage,
}

#[derive(Debug, Clone, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Clone, Deserialize)]
struct ResponseMessage {
    content: String,
}

impl ChatClient for OpenAiChat {
    fn complete(
        &self,
        model: &str,
        messages: &[ChatMessage],
    ) -> Result<ChatCompletion, AppError> {
        let url = format!("{}/v1/chat/completions", self.client.base_url());
        let req = ChatRequest { model, messages };
        let resp = ureq::post(&url)
            .set("Authorization", &self.client.bearer())
            .timeout(std::time::Duration::from_secs(60))
            .send_json(serde_json::to_value(req).map_err(|e| {
                AppError::new("KB_CHAT_FAILED", "Failed to encode chat request")
                    .with_details(e.to_string())
            })?);

        match resp {
            Ok(r) if r.status() == 200 => {
                let v: ChatResponse = r.into_json().map_err(|e| {
                    AppError::new("KB_CHAT_FAILED", "Failed to decode chat response")
                        .with_details(e.to_string())
                })?;
                let first = v.choices.into_iter().next().ok_or_else(|| {
                    AppError::new("KB_CHAT_FAILED", "Chat response contained no choices")
                })?;
                if first.message.content.trim().is_empty() {
                    return Err(AppError::new("KB_CHAT_FAILED", "Chat response was empty"));
                }
                Ok(ChatCompletion {
                    content: first.message.content,
                    usage: v.usage,
                })
            }
            Ok(r) => Err(AppError::new("KB_CHAT_FAILED", "Chat request failed")
                .with_details(format!("status={}", r.status()))),
            Err(e) => Err(AppError::new("KB_CHAT_FAILED", "Failed to call chat endpoint")
                .with_details(e.to_string())
                .with_retryable(true)),
        }
    }
}
