use quern_core::error::AppError;
use quern_core::model::ModelLimits;
use tracing::debug;

use crate::embed::Embedder;
use crate::kb::{Chunk, KnowledgeBase};
use crate::llm::{ChatClient, ChatCompletion, ChatMessage};
use crate::retrieve::find_chunks;

/// Builds the retrieved-passages context: ranked chunks are appended as
/// labeled blocks until the next block would push the total past
/// `byte_budget`. A chunk is included whole or not at all.
pub fn assemble_context(chunks: &[&Chunk], byte_budget: usize) -> String {
    let mut out = String::new();
    for chunk in chunks {
        let block = format!("{}:\n\n{}\n\n", chunk.rel_path, chunk.text);
        if out.len() + block.len() > byte_budget {
            break;
        }
        out.push_str(&block);
    }
    out
}

/// Byte budget for retrieved context: half the model's context length
/// minus the question, since the question and the answer must also fit
/// inside the provider's total limit.
pub fn context_budget(limits: &ModelLimits, question: &str) -> usize {
    (limits.max_context_len / 2).saturating_sub(question.len())
}

/// Answers a question from the knowledge base: rank every chunk against
/// the question, assemble a budgeted context, and drive the chat
/// collaborator.
pub fn answer(
    kb: &KnowledgeBase,
    embedder: &dyn Embedder,
    chat: &dyn ChatClient,
    question: &str,
    global: bool,
) -> Result<ChatCompletion, AppError> {
    let ranked = find_chunks(kb, embedder, question, 0)?;
    let budget = context_budget(&kb.limits(), question);
    let context = assemble_context(&ranked, budget);
    debug!(
        ranked = ranked.len(),
        context_len = context.len(),
        "assembled answer context"
    );
    generate(kb, chat, question, &context, global)
}

/// Runs the chat exchange for a question with pre-assembled context.
///
/// With `global` set, the bare question is asked first and the reply is
/// folded into the history, letting the model combine what it already
/// knows with the retrieved passages.
pub fn generate(
    kb: &KnowledgeBase,
    chat: &dyn ChatClient,
    question: &str,
    context: &str,
    global: bool,
) -> Result<ChatCompletion, AppError> {
    let mut messages = vec![ChatMessage::system("You are a helpful assistant.")];

    if global {
        messages.push(ChatMessage::user(question));
        let resp = chat.complete(kb.model(), &messages)?;
        messages.push(ChatMessage::assistant(resp.content));
    }

    if !context.is_empty() {
        messages.push(ChatMessage::user(format!(
            "first, some context:\n\n{context}"
        )));
        messages.push(ChatMessage::assistant("Great! I've read the context."));
    }

    messages.push(ChatMessage::user(question));
    chat.complete(kb.model(), &messages)
}
