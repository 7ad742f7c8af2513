use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::AppError;

/// Model used for every embedding request.
pub const EMBEDDING_MODEL: &str = "text-embedding-ada-002";

/// Token capacity of the embedding model.
pub const EMBEDDING_TOKEN_LIMIT: u32 = 8192;

/// Character-per-token proxy. The engine deliberately carries no real
/// tokenizer; every token limit is converted to bytes with this factor.
pub const CHARS_PER_TOKEN: f64 = 3.1;

/// Model resolved when the caller passes an empty name.
pub const DEFAULT_MODEL: &str = "gpt-4";

/// A chat model the engine knows how to drive, with its provider-side
/// token capacity.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ModelSpec {
    pub name: String,
    pub token_limit: u32,
}

/// The fixed set of known chat models. A plain value, constructed on
/// demand wherever it is needed; nothing here is process-global.
#[derive(Debug, Clone)]
pub struct Models {
    available: Vec<ModelSpec>,
}

impl Models {
    pub fn new() -> Self {
        let available = [
            ("gpt-3.5-turbo", 4096),
            ("gpt-4", 8192),
            ("gpt-4-32k", 32768),
            ("gpt-4-turbo-preview", 128_000),
        ]
        .into_iter()
        .map(|(name, token_limit)| ModelSpec {
            name: name.to_string(),
            token_limit,
        })
        .collect();
        Self { available }
    }

    /// Resolves a model by name; an empty name means [`DEFAULT_MODEL`].
    pub fn find(&self, name: &str) -> Result<&ModelSpec, AppError> {
        let name = if name.is_empty() { DEFAULT_MODEL } else { name };
        self.available
            .iter()
            .find(|m| m.name == name)
            .ok_or_else(|| {
                AppError::new("KB_NOT_FOUND", "Model not found")
                    .with_details(format!("model={name}"))
            })
    }

    pub fn list(&self) -> &[ModelSpec] {
        &self.available
    }
}

impl Default for Models {
    fn default() -> Self {
        Self::new()
    }
}

/// Byte-length limits derived from a model spec via [`CHARS_PER_TOKEN`].
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ModelLimits {
    /// Bound on an assembled chat context, from the chat model's capacity.
    pub max_context_len: usize,
    /// Bound on a single embedding input.
    pub max_embed_item_len: usize,
    /// Bound on the summed input lengths of one embedding request.
    pub max_embed_request_len: usize,
}

impl ModelLimits {
    pub fn for_spec(spec: &ModelSpec) -> Self {
        let embed_len = (f64::from(EMBEDDING_TOKEN_LIMIT) * CHARS_PER_TOKEN).floor() as usize;
        Self {
            max_context_len: (f64::from(spec.token_limit) * CHARS_PER_TOKEN).floor() as usize,
            max_embed_item_len: embed_len,
            max_embed_request_len: embed_len,
        }
    }
}

/// One row of a model listing; `active` marks the model the knowledge
/// base is currently configured with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelInfo {
    pub spec: ModelSpec,
    pub active: bool,
}

impl fmt::Display for ModelInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let marker = if self.active { "*" } else { " " };
        write!(
            f,
            "{} {:<20} tokens: {}",
            marker, self.spec.name, self.spec.token_limit
        )
    }
}
