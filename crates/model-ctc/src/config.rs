//! Конфигурация рекуррентных CTC-моделей.

use am_core::types::non_zero;
use am_core::{AmError, AmResult};
use serde::{Deserialize, Serialize};

fn default_parameter_init() -> f64 {
    0.1
}

/// Конфигурация [`crate::BgruCtc`].
pub type BgruCtcConfig = CtcConfig;

/// Конфигурация [`crate::GruCtc`].
pub type GruCtcConfig = CtcConfig;

/// Конфигурация BGRU-CTC / GRU-CTC.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CtcConfig {
    /// Имя модели. `None` — имя по умолчанию для архитектуры.
    #[serde(default)]
    pub name: Option<String>,

    /// Размерность входного вектора признаков.
    pub input_size: usize,

    /// Количество юнитов в каждом рекуррентном слое (на одно направление).
    pub num_unit: usize,

    /// Количество рекуррентных слоёв.
    pub num_layer: usize,

    /// Количество выходных меток без blank.
    pub output_size: usize,

    /// Диапазон равномерной инициализации рекуррентных весов.
    #[serde(default = "default_parameter_init")]
    pub parameter_init: f64,

    /// Размерность bottleneck-слоя между RNN и выходом (0 — без bottleneck).
    #[serde(default)]
    pub bottleneck_dim: Option<usize>,
}

impl CtcConfig {
    pub fn new(input_size: usize, num_unit: usize, num_layer: usize, output_size: usize) -> Self {
        Self {
            name: None,
            input_size,
            num_unit,
            num_layer,
            output_size,
            parameter_init: default_parameter_init(),
            bottleneck_dim: None,
        }
    }

    pub fn with_bottleneck(mut self, dim: usize) -> Self {
        self.bottleneck_dim = Some(dim);
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Количество выходных классов, включая blank.
    pub fn num_classes(&self) -> usize {
        self.output_size + 1
    }

    /// Bottleneck с нормализацией `Some(0)` → `None`.
    pub fn bottleneck(&self) -> Option<usize> {
        non_zero(self.bottleneck_dim)
    }

    /// Проверить размерности и параметры инициализации.
    pub fn validate(&self) -> AmResult<()> {
        for (field, value) in [
            ("input_size", self.input_size),
            ("num_unit", self.num_unit),
            ("num_layer", self.num_layer),
            ("output_size", self.output_size),
        ] {
            if value == 0 {
                return Err(AmError::Config(format!("{field} должен быть > 0")));
            }
        }
        if !(self.parameter_init.is_finite() && self.parameter_init > 0.0) {
            return Err(AmError::Config(format!(
                "parameter_init должен быть положительным, получено {}",
                self.parameter_init
            )));
        }
        Ok(())
    }

    /// Параметры выходной части: bottleneck (если есть) + выходной слой.
    pub(crate) fn head_parameters(&self, hidden: usize) -> u64 {
        let classes = self.num_classes() as u64;
        match self.bottleneck() {
            Some(b) => {
                let b = b as u64;
                hidden as u64 * b + b + b * classes + classes
            }
            None => hidden as u64 * classes + classes,
        }
    }
}

/// Параметры одной GRU-ячейки.
pub(crate) fn gru_parameters(input_dim: usize, units: usize) -> u64 {
    let (d, u) = (input_dim as u64, units as u64);
    3 * u * (d + u) + 3 * u
}
