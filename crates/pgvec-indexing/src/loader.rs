use std::fs;
use std::path::{Path, PathBuf};

use tracing::info;

use crate::{Document, IndexingError, IndexingResult};

/// 读取 UTF-8 文本文件，整个文件作为一个文档，metadata 中记录来源路径
#[derive(Debug, Clone)]
pub struct TextLoader {
    path: PathBuf,
}

impl TextLoader {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn load(&self) -> IndexingResult<Vec<Document>> {
        info!("Loading text document: {:?}", self.path);

        let content = fs::read_to_string(&self.path).map_err(|source| IndexingError::Io {
            path: self.path.clone(),
            source,
        })?;

        let document = Document::new(content).with_metadata("source", self.path.display().to_string());
        Ok(vec![document])
    }
}
