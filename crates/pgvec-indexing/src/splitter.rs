use std::collections::VecDeque;
use std::fmt;

use serde_json::Value as JsonValue;
use tracing::warn;

use crate::{Document, IndexingError, IndexingResult};

type LengthFn = Box<dyn Fn(&str) -> usize + Send + Sync>;

/// 按分隔符切分后再合并到 `chunk_size` 以内的分块器
pub struct CharacterSplitter {
    chunk_size: usize,
    chunk_overlap: usize,
    separator: String,
    length: LengthFn,
    length_unit: &'static str,
}

impl fmt::Debug for CharacterSplitter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CharacterSplitter")
            .field("chunk_size", &self.chunk_size)
            .field("chunk_overlap", &self.chunk_overlap)
            .field("separator", &self.separator)
            .field("length_unit", &self.length_unit)
            .finish()
    }
}

impl CharacterSplitter {
    /// 创建分块器，长度按字符数计算
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> IndexingResult<Self> {
        if chunk_size == 0 {
            return Err(IndexingError::InvalidConfig("chunk_size must be positive".to_string()));
        }
        if chunk_overlap > chunk_size {
            return Err(IndexingError::InvalidConfig(format!(
                "chunk_overlap ({}) is larger than chunk_size ({})",
                chunk_overlap, chunk_size
            )));
        }

        Ok(Self {
            chunk_size,
            chunk_overlap,
            separator: "\n\n".to_string(),
            length: Box::new(|s: &str| s.chars().count()),
            length_unit: "chars",
        })
    }

    pub fn with_separator(mut self, separator: impl Into<String>) -> Self {
        self.separator = separator.into();
        self
    }

    /// 长度改为按模型 tokenizer 的 token 数计算
    #[cfg(feature = "token-aware")]
    pub fn token_aware(mut self, model: &str) -> IndexingResult<Self> {
        let bpe = crate::tiktoken::bpe_for_model(model)?;
        self.length = Box::new(move |s: &str| bpe.encode_with_special_tokens(s).len());
        self.length_unit = "tokens";
        Ok(self)
    }

    pub fn split_text(&self, text: &str) -> Vec<String> {
        let pieces: Vec<&str> = if self.separator.is_empty() {
            text.char_indices()
                .map(|(i, c)| &text[i..i + c.len_utf8()])
                .collect()
        } else {
            text.split(self.separator.as_str()).collect()
        };
        let pieces: Vec<&str> = pieces
            .into_iter()
            .filter(|p| !p.trim().is_empty())
            .collect();

        self.merge(&pieces)
    }

    /// 分块并保留原文档 metadata，额外写入 `chunk_index`
    pub fn split_documents(&self, documents: &[Document]) -> Vec<Document> {
        let mut chunks = Vec::new();
        for document in documents {
            for (index, content) in self.split_text(&document.content).into_iter().enumerate() {
                let mut metadata = document.metadata.clone();
                metadata.insert("chunk_index".to_string(), JsonValue::from(index));
                chunks.push(Document { content, metadata });
            }
        }
        chunks
    }

    fn merge(&self, pieces: &[&str]) -> Vec<String> {
        let sep_len = (self.length)(&self.separator);
        let mut chunks = Vec::new();
        let mut current: VecDeque<(&str, usize)> = VecDeque::new();
        let mut total = 0usize;

        for &piece in pieces {
            let len = (self.length)(piece);

            if grown(total, len, sep_len, current.is_empty()) > self.chunk_size {
                if total > self.chunk_size {
                    warn!(
                        "Created a chunk of size {} {}, which is longer than the specified {}",
                        total, self.length_unit, self.chunk_size
                    );
                }
                if !current.is_empty() {
                    chunks.push(self.join(&current));

                    // 保留末尾不超过 chunk_overlap 的片段作为下一块的开头
                    while total > self.chunk_overlap
                        || (grown(total, len, sep_len, current.is_empty()) > self.chunk_size && total > 0)
                    {
                        let Some((_, removed)) = current.pop_front() else {
                            break;
                        };
                        total -= removed + if current.is_empty() { 0 } else { sep_len };
                    }
                }
            }

            total = grown(total, len, sep_len, current.is_empty());
            current.push_back((piece, len));
        }

        if !current.is_empty() {
            if total > self.chunk_size {
                warn!(
                    "Created a chunk of size {} {}, which is longer than the specified {}",
                    total, self.length_unit, self.chunk_size
                );
            }
            chunks.push(self.join(&current));
        }

        chunks
    }

    fn join(&self, pieces: &VecDeque<(&str, usize)>) -> String {
        pieces
            .iter()
            .map(|(p, _)| *p)
            .collect::<Vec<_>>()
            .join(&self.separator)
            .trim()
            .to_string()
    }
}

/// 追加一个片段后的总长度（非空时计入分隔符）
fn grown(total: usize, len: usize, sep_len: usize, empty: bool) -> usize {
    total + len + if empty { 0 } else { sep_len }
}
