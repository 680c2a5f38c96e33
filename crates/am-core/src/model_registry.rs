//! Реестр поддерживаемых акустических моделей.
//!
//! Содержит перечисление архитектур и метаданные о каждой.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Тип акустической модели.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ModelType {
    /// Двунаправленный GRU + CTC.
    BgruCtc,
    /// Однонаправленный многослойный GRU + CTC.
    GruCtc,
    /// VGG-свёрточный фронтенд + двунаправленный LSTM.
    VggBlstm,
    /// Двунаправленный LSTM с дополнительной CTC-головой на промежуточном слое.
    MultitaskBlstm,
}

impl ModelType {
    /// Все поддерживаемые типы моделей.
    pub fn all() -> &'static [ModelType] {
        &[
            ModelType::BgruCtc,
            ModelType::GruCtc,
            ModelType::VggBlstm,
            ModelType::MultitaskBlstm,
        ]
    }

    /// Строковый идентификатор для CLI и конфигов.
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelType::BgruCtc => "bgru-ctc",
            ModelType::GruCtc => "gru-ctc",
            ModelType::VggBlstm => "vgg-blstm",
            ModelType::MultitaskBlstm => "multitask-blstm",
        }
    }

    /// Полное человекочитаемое название.
    pub fn display_name(&self) -> &'static str {
        match self {
            ModelType::BgruCtc => "Bidirectional GRU-CTC",
            ModelType::GruCtc => "GRU-CTC",
            ModelType::VggBlstm => "VGG + BLSTM CTC encoder",
            ModelType::MultitaskBlstm => "Multi-task BLSTM CTC encoder",
        }
    }

    /// Бэкенд инференса.
    pub fn backend(&self) -> &'static str {
        "candle"
    }

    /// Парсинг из строки (CLI-совместимо).
    pub fn from_str_loose(s: &str) -> Option<ModelType> {
        match s.to_lowercase().replace('_', "-").as_str() {
            "bgru-ctc" | "bgru" => Some(ModelType::BgruCtc),
            "gru-ctc" | "gru" => Some(ModelType::GruCtc),
            "vgg-blstm" | "vgg-blstm-encoder" | "vgg" => Some(ModelType::VggBlstm),
            "multitask-blstm" | "multitask-blstm-encoder" | "multitask" => {
                Some(ModelType::MultitaskBlstm)
            }
            _ => None,
        }
    }
}

impl fmt::Display for ModelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.display_name())
    }
}
