pub mod deepseek;
pub mod openai;
pub mod traits;
pub mod utils;

pub use traits::{Embedder, Generator};
pub use utils::HashEmbedder;
