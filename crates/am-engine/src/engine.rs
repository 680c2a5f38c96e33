//! Диспетчеризация по типу модели.
//!
//! `AcousticEngine` — единая точка входа для загрузки и использования
//! любой из поддерживаемых акустических моделей.

use std::path::Path;

use candle_core::{Device, Tensor};
use candle_nn::VarMap;
use tracing::info;

use am_core::{AmResult, CtcGreedyDecoder, CtcModel, KeepProbs, ModelInfo, ModelType};

/// Единый движок, абстрагирующий конкретную акустическую модель.
///
/// Под капотом хранит `Box<dyn CtcModel>` и делегирует вызовы.
pub struct AcousticEngine {
    inner: Box<dyn CtcModel>,
}

/// Ошибка для модели, чей feature отключён при сборке.
#[cfg(not(all(feature = "ctc", feature = "encoders")))]
fn not_compiled(model_type: ModelType, feature: &str) -> am_core::AmError {
    am_core::AmError::Model(format!(
        "{} не скомпилирован. Включите feature '{}' в am-engine.",
        model_type.display_name(),
        feature
    ))
}

impl AcousticEngine {
    /// Загрузить модель по типу и пути к директории.
    ///
    /// # Аргументы
    /// * `model_type` — архитектура модели.
    /// * `model_dir` — директория с `config.json` и `model.safetensors`.
    /// * `device` — устройство (CPU, Metal, CUDA).
    ///
    /// # Ошибки
    /// Возвращает ошибку, если:
    /// - Тип модели не скомпилирован (feature gate отключен).
    /// - Файлы модели не найдены, повреждены или не совпадают с конфигурацией.
    pub fn load(
        model_type: ModelType,
        model_dir: impl AsRef<Path>,
        device: &Device,
    ) -> AmResult<Self> {
        let model_dir = model_dir.as_ref();
        info!(
            "AcousticEngine: загрузка модели {} из {:?}",
            model_type, model_dir
        );

        let inner: Box<dyn CtcModel> = match model_type {
            #[cfg(feature = "ctc")]
            ModelType::BgruCtc => Box::new(model_ctc::BgruCtc::load(model_dir, device)?),
            #[cfg(feature = "ctc")]
            ModelType::GruCtc => Box::new(model_ctc::GruCtc::load(model_dir, device)?),

            #[cfg(not(feature = "ctc"))]
            ModelType::BgruCtc | ModelType::GruCtc => {
                return Err(not_compiled(model_type, "ctc"));
            }

            #[cfg(feature = "encoders")]
            ModelType::VggBlstm => {
                Box::new(model_encoders::VggBlstmEncoder::load(model_dir, device)?)
            }
            #[cfg(feature = "encoders")]
            ModelType::MultitaskBlstm => {
                Box::new(model_encoders::MultitaskBlstmEncoder::load(model_dir, device)?)
            }

            #[cfg(not(feature = "encoders"))]
            ModelType::VggBlstm | ModelType::MultitaskBlstm => {
                return Err(not_compiled(model_type, "encoders"));
            }
        };

        Ok(Self::from_loaded(inner))
    }

    /// Создать модель со случайными весами по JSON-конфигурации.
    ///
    /// Возвращает также [`VarMap`], через который веса можно сохранить
    /// (`VarMap::save`) и потом загрузить через [`Self::load`].
    pub fn init_random(
        model_type: ModelType,
        config_json: &str,
        device: &Device,
    ) -> AmResult<(Self, VarMap)> {
        info!("AcousticEngine: случайная инициализация {}", model_type);

        let (inner, varmap): (Box<dyn CtcModel>, VarMap) = match model_type {
            #[cfg(feature = "ctc")]
            ModelType::BgruCtc => {
                let config = serde_json::from_str(config_json)?;
                let (m, v) = model_ctc::BgruCtc::init_random(config, device)?;
                (Box::new(m), v)
            }
            #[cfg(feature = "ctc")]
            ModelType::GruCtc => {
                let config = serde_json::from_str(config_json)?;
                let (m, v) = model_ctc::GruCtc::init_random(config, device)?;
                (Box::new(m), v)
            }

            #[cfg(not(feature = "ctc"))]
            ModelType::BgruCtc | ModelType::GruCtc => {
                return Err(not_compiled(model_type, "ctc"));
            }

            #[cfg(feature = "encoders")]
            ModelType::VggBlstm => {
                let config = serde_json::from_str(config_json)?;
                let (m, v) = model_encoders::VggBlstmEncoder::init_random(config, device)?;
                (Box::new(m), v)
            }
            #[cfg(feature = "encoders")]
            ModelType::MultitaskBlstm => {
                let config = serde_json::from_str(config_json)?;
                let (m, v) = model_encoders::MultitaskBlstmEncoder::init_random(config, device)?;
                (Box::new(m), v)
            }

            #[cfg(not(feature = "encoders"))]
            ModelType::VggBlstm | ModelType::MultitaskBlstm => {
                return Err(not_compiled(model_type, "encoders"));
            }
        };

        Ok((Self::from_loaded(inner), varmap))
    }

    /// Создать движок из уже загруженной модели.
    pub fn from_model(model: Box<dyn CtcModel>) -> Self {
        Self { inner: model }
    }

    fn from_loaded(inner: Box<dyn CtcModel>) -> Self {
        let info = inner.model_info();
        info!(
            "AcousticEngine: модель '{}' готова ({} классов, вход {}, параметров {})",
            inner.name(),
            info.num_classes,
            info.input_dim,
            info.parameters.map_or_else(|| "?".to_string(), |p| p.to_string()),
        );
        Self { inner }
    }

    // -----------------------------------------------------------------------
    // Делегация CtcModel
    // -----------------------------------------------------------------------

    /// Имя загруженной модели.
    pub fn name(&self) -> &str {
        self.inner.name()
    }

    /// Тип модели.
    pub fn model_type(&self) -> ModelType {
        self.inner.model_type()
    }

    /// Размерность входного вектора признаков.
    pub fn input_dim(&self) -> usize {
        self.inner.input_dim()
    }

    /// Количество выходных классов (включая blank).
    pub fn num_classes(&self) -> usize {
        self.inner.num_classes()
    }

    /// Индекс blank-метки.
    pub fn blank_id(&self) -> usize {
        self.inner.blank_id()
    }

    /// Метаданные модели.
    pub fn model_info(&self) -> ModelInfo {
        self.inner.model_info()
    }

    /// Логиты `[T, B, num_classes]`.
    pub fn forward(
        &self,
        inputs: &Tensor,
        seq_lens: &[usize],
        keep: &KeepProbs,
    ) -> AmResult<Tensor> {
        self.inner.forward(inputs, seq_lens, keep)
    }

    /// Inference-прогон и greedy CTC-декодирование.
    ///
    /// Для каждой последовательности батча возвращает метки без повторов и blank.
    pub fn recognize(&self, inputs: &Tensor, seq_lens: &[usize]) -> AmResult<Vec<Vec<usize>>> {
        let logits = self.forward(inputs, seq_lens, &KeepProbs::inference())?;
        CtcGreedyDecoder::new(self.blank_id()).decode_batch(&logits, seq_lens)
    }

    /// Список скомпилированных моделей.
    pub fn available_models() -> Vec<ModelType> {
        let mut models = Vec::new();

        #[cfg(feature = "ctc")]
        models.extend([ModelType::BgruCtc, ModelType::GruCtc]);

        #[cfg(feature = "encoders")]
        models.extend([ModelType::VggBlstm, ModelType::MultitaskBlstm]);

        models
    }
}
