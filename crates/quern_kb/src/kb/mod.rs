mod chunking;
mod model;
mod store;
mod sync;

pub use chunking::split_passages;
pub use model::{Chunk, Document};
pub use store::{KnowledgeBase, MigrationReport, CURRENT_VERSION, OLDEST_VERSION};
