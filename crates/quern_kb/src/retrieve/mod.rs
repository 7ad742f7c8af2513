use quern_core::error::AppError;
use quern_core::model::EMBEDDING_MODEL;

use crate::embed::{embed_all, Embedder};
use crate::kb::{Chunk, KnowledgeBase};

mod similarity;

pub use similarity::similarity;

/// Scores every live chunk against the query embedding and returns the
/// top `k`, best first. `k == 0` means all, ranked. Order among equal
/// scores is unspecified.
pub fn rank<'a>(query: &[f32], chunks: &'a [Chunk], k: usize) -> Vec<&'a Chunk> {
    let mut scored: Vec<(&Chunk, f32)> = chunks
        .iter()
        .filter(|c| !c.stale)
        .map(|c| (c, similarity(query, &c.embedding)))
        .collect();
    scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    if k > 0 {
        scored.truncate(k);
    }
    scored.into_iter().map(|(c, _)| c).collect()
}

/// Embeds the query and ranks the knowledge base's chunks against it.
pub fn find_chunks<'a>(
    kb: &'a KnowledgeBase,
    embedder: &dyn Embedder,
    query: &str,
    k: usize,
) -> Result<Vec<&'a Chunk>, AppError> {
    let limits = kb.limits();
    let queries = vec![query.to_string()];
    let mut vectors = embed_all(embedder, EMBEDDING_MODEL, &queries, &limits)?;
    let query_vec = vectors.pop().unwrap_or_default();
    Ok(rank(&query_vec, kb.chunks(), k))
}
