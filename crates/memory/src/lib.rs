pub mod context;
pub mod recency;
pub mod semantic;

pub use context::{MemoryContext, MemoryStore};
pub use recency::{RecencyStore, TurnRecord};
pub use semantic::{Embedder, SemanticIndex, SemanticMatch, MIN_MATCH_SIMILARITY};
