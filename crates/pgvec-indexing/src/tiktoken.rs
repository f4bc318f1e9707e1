use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::sync::Mutex;
use tiktoken_rs::{CoreBPE, get_bpe_from_model};

use crate::{IndexingError, IndexingResult};

/// 全局缓存：模型名 → BPE 编码器
static BPE_CACHE: Lazy<Mutex<HashMap<String, CoreBPE>>> = Lazy::new(|| Mutex::new(HashMap::new()));

/// 获取模型对应的编码器（带缓存）
pub fn bpe_for_model(model: &str) -> IndexingResult<CoreBPE> {
    let model_key = normalize_model_name(model);

    let mut cache = BPE_CACHE.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    if let Some(bpe) = cache.get(&model_key) {
        return Ok(bpe.clone());
    }

    let bpe = get_bpe_from_model(&model_key)
        .map_err(|e| IndexingError::Tokenizer(format!("{} ({}): {}", model, model_key, e)))?;
    cache.insert(model_key, bpe.clone());
    Ok(bpe)
}

/// 计算文本的 token 数量
pub fn count_tokens(text: &str, model: &str) -> IndexingResult<usize> {
    Ok(bpe_for_model(model)?.encode_with_special_tokens(text).len())
}

/// 标准化模型名（支持别名）
fn normalize_model_name(model: &str) -> String {
    match model.trim().to_lowercase().as_str() {
        "gpt-4" | "gpt-4-turbo" | "gpt-4o" | "gpt-4o-mini" => "gpt-4o".to_string(),
        "gpt-3.5" | "gpt-3.5-turbo" | "chatgpt" => "gpt-3.5-turbo".to_string(),
        // 嵌入模型
        "text-embedding-3-small" | "embedding-small" => "text-embedding-3-small".to_string(),
        "text-embedding-3-large" | "embedding-large" => "text-embedding-3-large".to_string(),
        "text-embedding-ada-002" | "ada" => "text-embedding-ada-002".to_string(),
        _ => model.to_string(),
    }
}
