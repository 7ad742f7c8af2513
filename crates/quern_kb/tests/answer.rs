use std::fs;
use std::sync::Mutex;

use quern_core::error::AppError;
use quern_core::model::{ModelLimits, Models};
use quern_kb::answer::{answer, assemble_context, context_budget};
use quern_kb::embed::Embedder;
use quern_kb::kb::{Chunk, KnowledgeBase};
use quern_kb::llm::{ChatClient, ChatCompletion, ChatMessage, ChatUsage, Role};

struct UnitEmbedder;

impl Embedder for UnitEmbedder {
    fn embed_batch(&self, _model: &str, inputs: &[String]) -> Result<Vec<Vec<f32>>, AppError> {
        Ok(inputs.iter().map(|_| vec![1.0, 0.0]).collect())
    }
}

/// Chat double that records every conversation it is handed.
struct ScriptedChat {
    calls: Mutex<Vec<Vec<ChatMessage>>>,
}

impl ScriptedChat {
    fn new() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
        }
    }

    fn calls(&self) -> Vec<Vec<ChatMessage>> {
        self.calls.lock().unwrap().clone()
    }
}

impl ChatClient for ScriptedChat {
    fn complete(
        &self,
        _model: &str,
        messages: &[ChatMessage],
    ) -> Result<ChatCompletion, AppError> {
        self.calls.lock().unwrap().push(messages.to_vec());
        Ok(ChatCompletion {
            content: "scripted reply".to_string(),
            usage: ChatUsage {
                prompt_tokens: 10,
                completion_tokens: 5,
                total_tokens: 15,
            },
        })
    }
}

fn chunk(rel_path: &str, text: &str) -> Chunk {
    Chunk {
        rel_path: rel_path.to_string(),
        text: text.to_string(),
        text_sha256: String::new(),
        embedding: vec![1.0, 0.0],
        stale: false,
    }
}

#[test]
fn context_blocks_are_labeled_with_the_document_path() {
    let a = chunk("notes/a.txt", "alpha");
    let refs = vec![&a];
    let ctx = assemble_context(&refs, 1_000);
    assert_eq!(ctx, "notes/a.txt:\n\nalpha\n\n");
}

#[test]
fn assembly_stops_before_the_budget_overflows() {
    let a = chunk("a.txt", "aaaa");
    let b = chunk("b.txt", "bbbb");
    let refs = vec![&a, &b];
    // One block is "a.txt:\n\naaaa\n\n" = 14 bytes.
    let both = assemble_context(&refs, 28);
    assert!(both.contains("aaaa") && both.contains("bbbb"));
    let one = assemble_context(&refs, 27);
    assert!(one.contains("aaaa") && !one.contains("bbbb"));
    // An exact fit is still included.
    assert_eq!(assemble_context(&refs, 14), "a.txt:\n\naaaa\n\n");
}

#[test]
fn chunks_are_never_truncated() {
    let a = chunk("a.txt", "a chunk that will not fit in the budget at all");
    let refs = vec![&a];
    assert_eq!(assemble_context(&refs, 10), "");
}

#[test]
fn budget_subtracts_the_question_and_saturates() {
    let limits = ModelLimits::for_spec(Models::new().find("gpt-4").unwrap());
    let question = "why?";
    assert_eq!(
        context_budget(&limits, question),
        limits.max_context_len / 2 - question.len()
    );
    let long_question = "q".repeat(limits.max_context_len);
    assert_eq!(context_budget(&limits, &long_question), 0);
}

#[test]
fn answering_introduces_context_then_asks_the_question() {
    let dir = tempfile::tempdir().expect("tempdir");
    fs::write(dir.path().join("facts.txt"), "the sky is blue").expect("write");

    let mut kb = KnowledgeBase::create(dir.path(), "gpt-4").expect("create");
    kb.add_document(&UnitEmbedder, "facts.txt").expect("add");

    let chat = ScriptedChat::new();
    let completion =
        answer(&kb, &UnitEmbedder, &chat, "what color is the sky?", false).expect("answer");
    assert_eq!(completion.content, "scripted reply");
    assert_eq!(completion.usage.total_tokens, 15);

    let calls = chat.calls();
    assert_eq!(calls.len(), 1);
    let messages = &calls[0];
    assert_eq!(messages.len(), 4);
    assert_eq!(messages[0].role, Role::System);
    assert_eq!(messages[1].role, Role::User);
    assert!(messages[1].content.starts_with("first, some context:"));
    assert!(messages[1].content.contains("facts.txt:\n\nthe sky is blue"));
    assert_eq!(messages[2].role, Role::Assistant);
    assert_eq!(messages[3].role, Role::User);
    assert_eq!(messages[3].content, "what color is the sky?");
}

#[test]
fn an_empty_knowledge_base_asks_without_context() {
    let dir = tempfile::tempdir().expect("tempdir");
    let kb = KnowledgeBase::create(dir.path(), "gpt-4").expect("create");

    let chat = ScriptedChat::new();
    answer(&kb, &UnitEmbedder, &chat, "anything?", false).expect("answer");

    let calls = chat.calls();
    assert_eq!(calls.len(), 1);
    let roles: Vec<Role> = calls[0].iter().map(|m| m.role).collect();
    assert_eq!(roles, vec![Role::System, Role::User]);
    assert_eq!(calls[0][1].content, "anything?");
}

#[test]
fn global_mode_asks_the_bare_question_first() {
    let dir = tempfile::tempdir().expect("tempdir");
    fs::write(dir.path().join("facts.txt"), "water is wet").expect("write");

    let mut kb = KnowledgeBase::create(dir.path(), "gpt-4").expect("create");
    kb.add_document(&UnitEmbedder, "facts.txt").expect("add");

    let chat = ScriptedChat::new();
    answer(&kb, &UnitEmbedder, &chat, "is water wet?", true).expect("answer");

    let calls = chat.calls();
    assert_eq!(calls.len(), 2);
    // First exchange: just the system preamble and the bare question.
    let first_roles: Vec<Role> = calls[0].iter().map(|m| m.role).collect();
    assert_eq!(first_roles, vec![Role::System, Role::User]);
    // Second exchange folds the first reply into the history before the
    // context introduction and the final question.
    let second_roles: Vec<Role> = calls[1].iter().map(|m| m.role).collect();
    assert_eq!(
        second_roles,
        vec![
            Role::System,
            Role::User,
            Role::Assistant,
            Role::User,
            Role::Assistant,
            Role::User
        ]
    );
    assert_eq!(calls[1][2].content, "scripted reply");
}
