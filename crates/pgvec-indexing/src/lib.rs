pub mod document;
pub mod loader;
pub mod splitter;
#[cfg(feature = "token-aware")]
pub mod tiktoken;

use std::path::PathBuf;

pub use document::Document;
pub use loader::TextLoader;
pub use splitter::CharacterSplitter;

#[derive(Debug, thiserror::Error)]
pub enum IndexingError {
    #[error("Failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Invalid splitter config: {0}")]
    InvalidConfig(String),
    #[error("Tokenizer error: {0}")]
    Tokenizer(String),
}

pub type IndexingResult<T> = Result<T, IndexingError>;
