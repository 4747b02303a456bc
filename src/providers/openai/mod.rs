pub mod embeddings;
pub mod openai;

pub use embeddings::OpenAiEmbedder;
pub use openai::OpenAIProvider;
