//! Общие типы для акустических моделей.
//!
//! Содержит параметры dropout, выбор реализации LSTM-ячейки
//! и метаданные загруженной модели.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{AmError, AmResult};
use crate::model_registry::ModelType;

// ---------------------------------------------------------------------------
// Dropout
// ---------------------------------------------------------------------------

/// Вероятности *сохранения* нейронов для трёх типов связей.
///
/// 1.0 означает отсутствие dropout (режим инференса).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct KeepProbs {
    /// Вход → первый скрытый слой.
    pub input: f64,
    /// Скрытый → скрытый (выходы каждого рекуррентного слоя).
    pub hidden: f64,
    /// Скрытый → выходной (bottleneck и логиты).
    pub output: f64,
}

impl Default for KeepProbs {
    fn default() -> Self {
        Self::inference()
    }
}

impl KeepProbs {
    /// Без dropout.
    pub fn inference() -> Self {
        Self {
            input: 1.0,
            hidden: 1.0,
            output: 1.0,
        }
    }

    pub fn new(input: f64, hidden: f64, output: f64) -> Self {
        Self {
            input,
            hidden,
            output,
        }
    }

    /// Проверить, что каждая вероятность лежит в (0, 1].
    pub fn validate(&self) -> AmResult<()> {
        for (name, p) in [
            ("keep_prob_input", self.input),
            ("keep_prob_hidden", self.hidden),
            ("keep_prob_output", self.output),
        ] {
            if !(p > 0.0 && p <= 1.0) {
                return Err(AmError::Config(format!(
                    "{name} должен лежать в (0, 1], получено {p}"
                )));
            }
        }
        Ok(())
    }

    /// `true`, если ни один dropout не активен.
    pub fn is_inference(&self) -> bool {
        self.input >= 1.0 && self.hidden >= 1.0 && self.output >= 1.0
    }
}

// ---------------------------------------------------------------------------
// Реализация LSTM-ячейки
// ---------------------------------------------------------------------------

/// Вариант LSTM-ячейки.
///
/// Названия совпадают с классами TensorFlow, из которых пришли
/// конфиги обученных моделей.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum LstmImpl {
    /// Без peephole, без клиппинга, без проекции.
    #[serde(rename = "BasicLSTMCell")]
    BasicLstmCell,
    /// Peephole, клиппинг ячейки и рекуррентная проекция.
    #[serde(rename = "LSTMCell")]
    LstmCell,
    /// Peephole без клиппинга и проекции.
    #[default]
    #[serde(rename = "LSTMBlockCell")]
    LstmBlockCell,
    /// Не реализована.
    #[serde(rename = "LSTMBlockFusedCell")]
    LstmBlockFusedCell,
}

impl LstmImpl {
    pub fn as_str(&self) -> &'static str {
        match self {
            LstmImpl::BasicLstmCell => "BasicLSTMCell",
            LstmImpl::LstmCell => "LSTMCell",
            LstmImpl::LstmBlockCell => "LSTMBlockCell",
            LstmImpl::LstmBlockFusedCell => "LSTMBlockFusedCell",
        }
    }
}

impl FromStr for LstmImpl {
    type Err = AmError;

    fn from_str(s: &str) -> AmResult<Self> {
        match s {
            "BasicLSTMCell" => Ok(LstmImpl::BasicLstmCell),
            "LSTMCell" => Ok(LstmImpl::LstmCell),
            "LSTMBlockCell" => Ok(LstmImpl::LstmBlockCell),
            "LSTMBlockFusedCell" => Ok(LstmImpl::LstmBlockFusedCell),
            other => Err(AmError::Config(format!(
                "lstm_impl \"{other}\": ожидается \"BasicLSTMCell\", \"LSTMCell\", \
                 \"LSTMBlockCell\" или \"LSTMBlockFusedCell\""
            ))),
        }
    }
}

impl fmt::Display for LstmImpl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Нормализовать опциональную размерность: `Some(0)` трактуется как «не задано».
pub fn non_zero(dim: Option<usize>) -> Option<usize> {
    dim.filter(|&d| d != 0)
}

// ---------------------------------------------------------------------------
// Метаданные модели
// ---------------------------------------------------------------------------

/// Метаданные загруженной модели.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelInfo {
    /// Тип модели.
    pub model_type: ModelType,
    /// Человекочитаемое название.
    pub display_name: String,
    /// Количество обучаемых параметров (если известно).
    pub parameters: Option<u64>,
    /// Размерность входного вектора признаков.
    pub input_dim: usize,
    /// Количество выходных классов, включая blank.
    pub num_classes: usize,
    /// Бэкенд инференса.
    pub backend: String,
}

impl ModelInfo {
    /// Создать метаданные модели.
    pub fn new(model_type: ModelType, input_dim: usize, num_classes: usize) -> Self {
        Self {
            display_name: model_type.display_name().to_string(),
            backend: model_type.backend().to_string(),
            model_type,
            parameters: None,
            input_dim,
            num_classes,
        }
    }

    /// Задать количество параметров.
    pub fn with_parameters(mut self, params: u64) -> Self {
        self.parameters = Some(params);
        self
    }

    /// Задать отображаемое имя.
    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = name.into();
        self
    }
}
