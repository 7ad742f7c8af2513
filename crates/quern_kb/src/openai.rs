use quern_core::error::AppError;

/// Base URL used when `OPENAI_BASE_URL` is not set.
pub const DEFAULT_BASE_URL: &str = "https://api.openai.com";

/// Shared client configuration for the embeddings and chat endpoints.
#[derive(Debug, Clone)]
pub struct OpenAiClient {
    base_url: String,
    api_key: String,
}

impl OpenAiClient {
    pub fn new(base_url: &str, api_key: &str) -> Result<Self, AppError> {
        if api_key.trim().is_empty() {
            return Err(AppError::new(
                "KB_PROVIDER_MISCONFIGURED",
                "Provider API key must not be empty",
            ));
        }
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        })
    }

    /// Reads `OPENAI_API_KEY` (required) and `OPENAI_BASE_URL` (optional).
    pub fn from_env() -> Result<Self, AppError> {
        let api_key = std::env::var("OPENAI_API_KEY").map_err(|_| {
            AppError::new(
                "KB_PROVIDER_MISCONFIGURED",
                "OPENAI_API_KEY is not set",
            )
        })?;
        let base_url =
            std::env::var("OPENAI_BASE_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.to_string());
        Self::new(&base_url, &api_key)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub(crate) fn bearer(&self) -> String {
        format!("Bearer {}", self.api_key)
    }
}
