//! Конфигурация BLSTM-энкодеров.

use am_core::types::non_zero;
use am_core::{AmError, AmResult, LstmImpl};
use serde::{Deserialize, Serialize};

fn default_parameter_init() -> f64 {
    0.1
}

fn default_splice() -> usize {
    11
}

fn default_use_peephole() -> bool {
    true
}

fn check_positive(fields: &[(&str, usize)]) -> AmResult<()> {
    for (field, value) in fields {
        if *value == 0 {
            return Err(AmError::Config(format!("{field} должен быть > 0")));
        }
    }
    Ok(())
}

fn check_init_and_clip(parameter_init: f64, clip_activation: Option<f64>) -> AmResult<()> {
    if !(parameter_init.is_finite() && parameter_init > 0.0) {
        return Err(AmError::Config(format!(
            "parameter_init должен быть положительным, получено {parameter_init}"
        )));
    }
    if let Some(clip) = clip_activation {
        if !(clip.is_finite() && clip > 0.0) {
            return Err(AmError::Config(format!(
                "clip_activation должен быть > 0, получено {clip}"
            )));
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// VGG + BLSTM
// ---------------------------------------------------------------------------

/// Конфигурация VGG + BLSTM энкодера.
///
/// Вход — `splice` соседних фреймов по `input_size` признаков
/// (статические + Δ + ΔΔ, поэтому `input_size` кратно 3).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VggBlstmConfig {
    #[serde(default)]
    pub name: Option<String>,

    /// Признаков в одном фрейме (включая Δ и ΔΔ).
    pub input_size: usize,

    /// Количество склеенных фреймов в одном входном векторе.
    #[serde(default = "default_splice")]
    pub splice: usize,

    /// Юнитов в LSTM-ячейке (на одно направление).
    pub num_unit: usize,

    /// Количество BLSTM-слоёв.
    pub num_layer: usize,

    /// Количество меток без blank.
    pub num_classes: usize,

    /// Диапазон равномерной инициализации LSTM; stddev для свёрток.
    #[serde(default = "default_parameter_init")]
    pub parameter_init: f64,

    /// Клиппинг состояния LSTM-ячейки.
    #[serde(default)]
    pub clip_activation: Option<f64>,

    /// Размер рекуррентной проекции (0 — без проекции).
    #[serde(default)]
    pub num_proj: Option<usize>,

    /// Размерность bottleneck-слоя (0 — без bottleneck).
    #[serde(default)]
    pub bottleneck_dim: Option<usize>,
}

impl VggBlstmConfig {
    /// Размерность линейного слоя после VGG-фронтенда.
    pub const LINEAR_DIM: usize = 256;

    pub fn new(input_size: usize, num_unit: usize, num_layer: usize, num_classes: usize) -> Self {
        Self {
            name: None,
            input_size,
            splice: default_splice(),
            num_unit,
            num_layer,
            num_classes,
            parameter_init: default_parameter_init(),
            clip_activation: None,
            num_proj: None,
            bottleneck_dim: None,
        }
    }

    /// Размерность входного вектора: `input_size * splice`.
    pub fn input_dim(&self) -> usize {
        self.input_size * self.splice
    }

    pub fn num_proj(&self) -> Option<usize> {
        non_zero(self.num_proj)
    }

    pub fn bottleneck(&self) -> Option<usize> {
        non_zero(self.bottleneck_dim)
    }

    pub fn validate(&self) -> AmResult<()> {
        check_positive(&[
            ("input_size", self.input_size),
            ("splice", self.splice),
            ("num_unit", self.num_unit),
            ("num_layer", self.num_layer),
            ("num_classes", self.num_classes),
        ])?;
        if self.input_size % 3 != 0 {
            return Err(AmError::Config(format!(
                "input_size={} должен делиться на 3 (статические + Δ + ΔΔ)",
                self.input_size
            )));
        }
        check_init_and_clip(self.parameter_init, self.clip_activation)
    }
}

// ---------------------------------------------------------------------------
// Multi-task BLSTM
// ---------------------------------------------------------------------------

/// Конфигурация multi-task BLSTM энкодера.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MultitaskBlstmConfig {
    #[serde(default)]
    pub name: Option<String>,

    /// Размерность входного вектора признаков.
    pub input_size: usize,

    /// Юнитов в LSTM-ячейке (на одно направление).
    pub num_unit: usize,

    /// Количество BLSTM-слоёв основной задачи.
    pub num_layer_main: usize,

    /// Слой (с 1), к которому подключена голова вспомогательной задачи.
    pub num_layer_sub: usize,

    /// Количество меток основной задачи без blank.
    pub num_classes_main: usize,

    /// Количество меток вспомогательной задачи без blank.
    pub num_classes_sub: usize,

    #[serde(default)]
    pub lstm_impl: LstmImpl,

    #[serde(default = "default_use_peephole")]
    pub use_peephole: bool,

    #[serde(default = "default_parameter_init")]
    pub parameter_init: f64,

    /// Клиппинг состояния ячейки (только для `LSTMCell`).
    #[serde(default)]
    pub clip_activation: Option<f64>,

    /// Рекуррентная проекция (только для `LSTMCell`; 0 — без проекции).
    #[serde(default)]
    pub num_proj: Option<usize>,

    /// Размерность bottleneck-слоя основной головы (0 — без bottleneck).
    #[serde(default)]
    pub bottleneck_dim: Option<usize>,
}

impl MultitaskBlstmConfig {
    pub fn new(
        input_size: usize,
        num_unit: usize,
        num_layer_main: usize,
        num_layer_sub: usize,
        num_classes_main: usize,
        num_classes_sub: usize,
    ) -> Self {
        Self {
            name: None,
            input_size,
            num_unit,
            num_layer_main,
            num_layer_sub,
            num_classes_main,
            num_classes_sub,
            lstm_impl: LstmImpl::default(),
            use_peephole: default_use_peephole(),
            parameter_init: default_parameter_init(),
            clip_activation: None,
            num_proj: None,
            bottleneck_dim: None,
        }
    }

    /// Проекция учитывается только для `LSTMCell`.
    pub fn num_proj(&self) -> Option<usize> {
        match self.lstm_impl {
            LstmImpl::LstmCell => non_zero(self.num_proj),
            _ => None,
        }
    }

    pub fn bottleneck(&self) -> Option<usize> {
        non_zero(self.bottleneck_dim)
    }

    pub fn validate(&self) -> AmResult<()> {
        check_positive(&[
            ("input_size", self.input_size),
            ("num_unit", self.num_unit),
            ("num_classes_main", self.num_classes_main),
            ("num_classes_sub", self.num_classes_sub),
        ])?;
        if self.num_layer_sub < 1 || self.num_layer_main < self.num_layer_sub {
            return Err(AmError::Config(
                "Set num_layer_sub between 1 to num_layer_main.".to_string(),
            ));
        }
        check_init_and_clip(self.parameter_init, self.clip_activation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vgg_requires_delta_features() {
        assert!(VggBlstmConfig::new(120, 8, 1, 10).validate().is_ok());
        assert!(VggBlstmConfig::new(40, 8, 1, 10).validate().is_err());
        assert_eq!(VggBlstmConfig::new(120, 8, 1, 10).input_dim(), 1320);
    }

    #[test]
    fn test_vgg_rejects_non_positive_clip() {
        let mut cfg = VggBlstmConfig::new(120, 8, 1, 10);
        cfg.clip_activation = Some(0.0);
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_multitask_layer_range() {
        assert!(MultitaskBlstmConfig::new(10, 8, 3, 1, 20, 5).validate().is_ok());
        assert!(MultitaskBlstmConfig::new(10, 8, 3, 3, 20, 5).validate().is_ok());
        for sub in [0, 4] {
            let err = MultitaskBlstmConfig::new(10, 8, 3, sub, 20, 5)
                .validate()
                .unwrap_err();
            assert!(err.to_string().contains("num_layer_sub"));
        }
    }

    #[test]
    fn test_multitask_projection_only_for_lstm_cell() {
        let mut cfg = MultitaskBlstmConfig::new(10, 8, 3, 1, 20, 5);
        cfg.num_proj = Some(4);
        assert_eq!(cfg.num_proj(), None);
        cfg.lstm_impl = LstmImpl::LstmCell;
        assert_eq!(cfg.num_proj(), Some(4));
        cfg.num_proj = Some(0);
        assert_eq!(cfg.num_proj(), None);
    }

    #[test]
    fn test_multitask_json_defaults() {
        let cfg: MultitaskBlstmConfig = serde_json::from_str(
            r#"{
                "input_size": 123, "num_unit": 320,
                "num_layer_main": 5, "num_layer_sub": 3,
                "num_classes_main": 60, "num_classes_sub": 30,
                "lstm_impl": "LSTMCell", "num_proj": 0
            }"#,
        )
        .unwrap();
        assert_eq!(cfg.lstm_impl, LstmImpl::LstmCell);
        assert!(cfg.use_peephole);
        assert_eq!(cfg.num_proj(), None);
        assert_eq!(cfg.parameter_init, 0.1);
    }
}
