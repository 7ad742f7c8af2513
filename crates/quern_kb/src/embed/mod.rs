use quern_core::error::AppError;
use quern_core::model::ModelLimits;
use tracing::debug;

pub mod openai_embed;

/// One round trip to the embedding provider: one vector per input, in
/// input order. A failure aborts the whole call; no partial result.
pub trait Embedder {
    fn embed_batch(&self, model: &str, inputs: &[String]) -> Result<Vec<Vec<f32>>, AppError>;
}

/// Embeds `texts` using the fewest provider round trips whose summed
/// input lengths stay below the request limit, then reassembles the
/// vectors in input order. Zero texts return an empty list without
/// contacting the provider.
///
/// Every text must fit the per-item limit; the chunker guarantees this,
/// so a violation here is an internal invariant failure, not bad user
/// input.
pub fn embed_all(
    embedder: &dyn Embedder,
    model: &str,
    texts: &[String],
    limits: &ModelLimits,
) -> Result<Vec<Vec<f32>>, AppError> {
    if texts.is_empty() {
        return Ok(Vec::new());
    }
    for t in texts {
        if t.len() > limits.max_embed_item_len {
            return Err(AppError::new(
                "KB_MALFORMED_INPUT",
                "Embedding input exceeds the per-item length limit",
            )
            .with_details(format!(
                "len={}; limit={}",
                t.len(),
                limits.max_embed_item_len
            )));
        }
    }

    let mut embeddings: Vec<Vec<f32>> = Vec::with_capacity(texts.len());
    for batch in plan_batches(texts, limits.max_embed_request_len) {
        debug!(batch_len = batch.len(), "requesting embeddings");
        let got = embedder.embed_batch(model, batch)?;
        if got.len() != batch.len() {
            return Err(AppError::new(
                "KB_EMBEDDINGS_FAILED",
                "Provider returned the wrong number of embeddings",
            )
            .with_details(format!("expected={}; got={}", batch.len(), got.len())));
        }
        embeddings.extend(got);
    }
    Ok(embeddings)
}

// Greedy packing. An item whose addition would make the running total
// meet or exceed the limit closes the batch and starts the next one. The
// first item of a batch is always accepted, so a batch is never emitted
// empty and a lone item whose length equals the limit still forms a
// valid single-item request.
fn plan_batches(texts: &[String], request_len: usize) -> Vec<&[String]> {
    let mut batches = Vec::new();
    let mut start = 0usize;
    let mut total = 0usize;
    for (i, t) in texts.iter().enumerate() {
        if i > start && total + t.len() >= request_len {
            batches.push(&texts[start..i]);
            start = i;
            total = 0;
        }
        total += t.len();
    }
    if start < texts.len() {
        batches.push(&texts[start..]);
    }
    batches
}
