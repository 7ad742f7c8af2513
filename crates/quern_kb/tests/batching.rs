use std::sync::Mutex;

use quern_core::error::AppError;
use quern_core::model::ModelLimits;
use quern_kb::embed::{embed_all, Embedder};

fn limits(item: usize, request: usize) -> ModelLimits {
    ModelLimits {
        max_context_len: 1_000,
        max_embed_item_len: item,
        max_embed_request_len: request,
    }
}

struct RecordingEmbedder {
    batches: Mutex<Vec<Vec<String>>>,
}

impl RecordingEmbedder {
    fn new() -> Self {
        Self {
            batches: Mutex::new(Vec::new()),
        }
    }

    fn batches(&self) -> Vec<Vec<String>> {
        self.batches.lock().unwrap().clone()
    }
}

impl Embedder for RecordingEmbedder {
    fn embed_batch(&self, _model: &str, inputs: &[String]) -> Result<Vec<Vec<f32>>, AppError> {
        self.batches.lock().unwrap().push(inputs.to_vec());
        Ok(inputs.iter().map(|t| vec![t.len() as f32]).collect())
    }
}

#[test]
fn zero_texts_never_contact_the_provider() {
    let embedder = RecordingEmbedder::new();
    let out = embed_all(&embedder, "mock", &[], &limits(10, 10)).expect("embed");
    assert!(out.is_empty());
    assert!(embedder.batches().is_empty());
}

#[test]
fn results_come_back_in_input_order_across_batches() {
    let embedder = RecordingEmbedder::new();
    let texts: Vec<String> = ["aaaaa", "bb", "ccccccccc", "d", "e", "ffffffff"]
        .iter()
        .map(|s| s.to_string())
        .collect();
    let out = embed_all(&embedder, "mock", &texts, &limits(10, 10)).expect("embed");

    assert_eq!(out.len(), texts.len());
    for (vector, text) in out.iter().zip(texts.iter()) {
        assert_eq!(vector[0], text.len() as f32);
    }
    // Several round trips were needed, each strictly under the limit
    // unless it holds a single item.
    let batches = embedder.batches();
    assert!(batches.len() > 1);
    for b in &batches {
        let total: usize = b.iter().map(|t| t.len()).sum();
        assert!(b.len() == 1 || total < 10);
        assert!(!b.is_empty());
    }
}

#[test]
fn lone_item_at_the_request_limit_is_accepted() {
    let embedder = RecordingEmbedder::new();
    let texts = vec!["x".repeat(10)];
    let out = embed_all(&embedder, "mock", &texts, &limits(10, 10)).expect("embed");
    assert_eq!(out.len(), 1);
    assert_eq!(embedder.batches().len(), 1);
}

#[test]
fn items_that_fit_strictly_below_share_one_request() {
    let embedder = RecordingEmbedder::new();
    let texts = vec!["aaa".to_string(), "bbb".to_string(), "ccc".to_string()];
    embed_all(&embedder, "mock", &texts, &limits(10, 10)).expect("embed");
    assert_eq!(embedder.batches().len(), 1);
}

#[test]
fn an_oversized_item_is_malformed_input() {
    let embedder = RecordingEmbedder::new();
    let texts = vec!["x".repeat(11)];
    let err = embed_all(&embedder, "mock", &texts, &limits(10, 10)).unwrap_err();
    assert_eq!(err.code, "KB_MALFORMED_INPUT");
    assert!(embedder.batches().is_empty());
}

struct MiscountingEmbedder;

impl Embedder for MiscountingEmbedder {
    fn embed_batch(&self, _model: &str, _inputs: &[String]) -> Result<Vec<Vec<f32>>, AppError> {
        Ok(vec![vec![1.0]])
    }
}

#[test]
fn a_short_provider_response_is_rejected() {
    let texts = vec!["aa".to_string(), "bb".to_string()];
    let err = embed_all(&MiscountingEmbedder, "mock", &texts, &limits(10, 10)).unwrap_err();
    assert_eq!(err.code, "KB_EMBEDDINGS_FAILED");
}

struct FailsAfterFirst {
    batches: Mutex<usize>,
}

impl Embedder for FailsAfterFirst {
    fn embed_batch(&self, _model: &str, inputs: &[String]) -> Result<Vec<Vec<f32>>, AppError> {
        let mut n = self.batches.lock().unwrap();
        *n += 1;
        if *n > 1 {
            return Err(
                AppError::new("KB_EMBEDDINGS_FAILED", "Embeddings request failed")
                    .with_retryable(true),
            );
        }
        Ok(inputs.iter().map(|_| vec![0.0]).collect())
    }
}

#[test]
fn a_provider_failure_aborts_the_whole_operation() {
    let embedder = FailsAfterFirst {
        batches: Mutex::new(0),
    };
    let texts = vec!["x".repeat(9), "y".repeat(9)];
    let err = embed_all(&embedder, "mock", &texts, &limits(10, 10)).unwrap_err();
    assert_eq!(err.code, "KB_EMBEDDINGS_FAILED");
    assert!(err.retryable);
}
