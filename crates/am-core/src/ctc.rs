//! Greedy CTC-декодирование.
//!
//! argmax по классам → удаление последовательных дублей → удаление blank.
//! Логиты приходят в time-major раскладке `[max_time, batch, num_classes]`,
//! как их отдают модели workspace.

use std::collections::HashMap;
use std::path::Path;

use candle_core::{D, Tensor};
use tracing::debug;

use crate::{AmError, AmResult};

/// Простой CTC greedy-декодер.
pub struct CtcGreedyDecoder {
    /// ID blank-токена.
    blank_id: usize,
    /// Словарь: id → строка (необязателен).
    vocab: HashMap<usize, String>,
}

impl CtcGreedyDecoder {
    /// Декодер без словаря: возвращает только ID меток.
    pub fn new(blank_id: usize) -> Self {
        Self {
            blank_id,
            vocab: HashMap::new(),
        }
    }

    /// Присоединить словарь id → piece.
    pub fn with_vocab(mut self, vocab: HashMap<usize, String>) -> Self {
        self.vocab = vocab;
        self
    }

    /// Создать декодер из файла vocab.json (`{"0": "a", "1": "b", ...}`).
    pub fn from_vocab_file(path: impl AsRef<Path>, blank_id: usize) -> AmResult<Self> {
        let path = path.as_ref();
        let data = std::fs::read_to_string(path)?;
        let raw: HashMap<String, String> = serde_json::from_str(&data)?;

        let mut vocab = HashMap::with_capacity(raw.len());
        for (key, piece) in raw {
            match key.parse::<usize>() {
                Ok(id) => {
                    vocab.insert(id, piece);
                }
                Err(_) => debug!("CTC словарь {:?}: пропущен нечисловой ключ {:?}", path, key),
            }
        }

        debug!("CTC словарь загружен: {} токенов, blank_id={}", vocab.len(), blank_id);

        Ok(Self::new(blank_id).with_vocab(vocab))
    }

    pub fn blank_id(&self) -> usize {
        self.blank_id
    }

    /// Размер словаря.
    pub fn vocab_size(&self) -> usize {
        self.vocab.len()
    }

    /// CTC-свёртка последовательности argmax-меток.
    pub fn collapse(&self, frame_ids: &[u32]) -> Vec<usize> {
        let blank = self.blank_id as u32;
        let mut decoded = Vec::new();
        let mut prev = blank;

        for &tok in frame_ids {
            if tok != blank && tok != prev {
                decoded.push(tok as usize);
            }
            prev = tok;
        }
        decoded
    }

    /// Декодировать батч логитов `[max_time, batch, num_classes]`.
    ///
    /// Для каждой последовательности учитываются только первые `seq_lens[b]` фреймов.
    pub fn decode_batch(&self, logits: &Tensor, seq_lens: &[usize]) -> AmResult<Vec<Vec<usize>>> {
        let (max_time, batch, num_classes) = logits.dims3()?;
        if self.blank_id >= num_classes {
            return Err(AmError::Inference(format!(
                "blank_id={} вне диапазона классов ({num_classes})",
                self.blank_id
            )));
        }
        if seq_lens.len() != batch {
            return Err(AmError::Inference(format!(
                "seq_lens содержит {} элементов, а batch={batch}",
                seq_lens.len()
            )));
        }

        // argmax по классам → [max_time, batch]
        let best: Vec<Vec<u32>> = logits.argmax(D::Minus1)?.to_vec2()?;

        let mut out = Vec::with_capacity(batch);
        for (b, &len) in seq_lens.iter().enumerate() {
            let frames: Vec<u32> = best.iter().take(len.min(max_time)).map(|row| row[b]).collect();
            out.push(self.collapse(&frames));
        }
        Ok(out)
    }

    /// Преобразовать список ID в текст.
    ///
    /// Неизвестные ID пропускаются; `▁` (SentencePiece) заменяется пробелом.
    pub fn ids_to_text(&self, ids: &[usize]) -> String {
        let text: String = ids
            .iter()
            .filter_map(|id| self.vocab.get(id).map(String::as_str))
            .collect();
        text.replace('▁', " ").trim_start().to_string()
    }
}

/// Апостериорные вероятности классов: softmax по последней оси.
pub fn posteriors(logits: &Tensor) -> candle_core::Result<Tensor> {
    candle_nn::ops::softmax_last_dim(logits)
}
