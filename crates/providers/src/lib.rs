pub mod ollama;
pub mod openai;
pub mod router;
pub mod sse;

pub use router::{CompletionStream, ProviderRouter};
