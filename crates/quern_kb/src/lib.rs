pub mod answer;
pub mod embed;
pub mod kb;
pub mod llm;
pub mod openai;
pub mod retrieve;
