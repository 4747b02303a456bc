pub mod composer;
pub mod retriever;

pub use composer::{build_context, build_prompt, Answer, AnswerComposer};
pub use retriever::{Retriever, DEFAULT_TOP_K};
