//! Унифицированный trait для всех CTC акустических моделей.
//!
//! Каждая архитектура (BGRU-CTC, GRU-CTC, VGG-BLSTM, Multitask-BLSTM)
//! реализует [`CtcModel`], обеспечивая единый интерфейс для прямого прохода.

use candle_core::Tensor;

use crate::error::{AmError, AmResult};
use crate::model_registry::ModelType;
use crate::types::{KeepProbs, ModelInfo};

/// Унифицированный trait для всех CTC-моделей.
///
/// # Пример
/// ```ignore
/// let model = BgruCtc::load("models/bgru-ctc", &device)?;
/// let logits = model.forward(&features, &[120, 97], &KeepProbs::inference())?;
/// // logits: [max_time, batch, num_classes]
/// ```
pub trait CtcModel: Send {
    /// Имя модели из конфигурации (например, "bgru_ctc").
    fn name(&self) -> &str;

    /// Тип модели для реестра.
    fn model_type(&self) -> ModelType;

    /// Размерность входного вектора признаков на один фрейм.
    fn input_dim(&self) -> usize;

    /// Количество выходных классов, включая blank.
    fn num_classes(&self) -> usize;

    /// ID blank-класса (последний класс).
    fn blank_id(&self) -> usize {
        self.num_classes() - 1
    }

    /// Информация о модели.
    fn model_info(&self) -> ModelInfo {
        ModelInfo::new(self.model_type(), self.input_dim(), self.num_classes())
    }

    /// Прямой проход.
    ///
    /// # Аргументы
    /// * `inputs` — признаки формы `[batch, max_time, input_dim]`.
    /// * `seq_lens` — длина каждой последовательности в батче (`<= max_time`).
    /// * `keep` — вероятности сохранения для dropout.
    ///
    /// # Возвращает
    /// Логиты формы `[max_time, batch, num_classes]` (time-major).
    fn forward(&self, inputs: &Tensor, seq_lens: &[usize], keep: &KeepProbs)
        -> AmResult<Tensor>;
}

/// Проверить вход модели: ранг, размерность признаков и длины последовательностей.
///
/// Возвращает `(batch, max_time)`.
pub fn validate_inputs(
    inputs: &Tensor,
    seq_lens: &[usize],
    input_dim: usize,
) -> AmResult<(usize, usize)> {
    let (batch, max_time, dim) = inputs.dims3().map_err(|_| {
        AmError::Inference(format!(
            "ожидается вход формы [batch, max_time, {input_dim}], получено {:?}",
            inputs.dims()
        ))
    })?;

    if batch == 0 || max_time == 0 {
        return Err(AmError::Inference(format!(
            "пустой батч: batch={batch}, max_time={max_time}"
        )));
    }
    if dim != input_dim {
        return Err(AmError::Inference(format!(
            "размерность признаков {dim} не совпадает с input_dim={input_dim}"
        )));
    }
    if seq_lens.len() != batch {
        return Err(AmError::Inference(format!(
            "seq_lens содержит {} элементов, а batch={batch}",
            seq_lens.len()
        )));
    }
    if let Some((i, &len)) = seq_lens.iter().enumerate().find(|(_, l)| **l > max_time) {
        return Err(AmError::Inference(format!(
            "seq_lens[{i}]={len} превышает max_time={max_time}"
        )));
    }

    Ok((batch, max_time))
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};

    #[test]
    fn test_validate_inputs_accepts_padded_batch() {
        let x = Tensor::zeros((2, 5, 3), DType::F32, &Device::Cpu).unwrap();
        assert_eq!(validate_inputs(&x, &[5, 0], 3).unwrap(), (2, 5));
    }

    #[test]
    fn test_validate_inputs_rejects_bad_shapes() {
        let x = Tensor::zeros((2, 5, 3), DType::F32, &Device::Cpu).unwrap();
        assert!(validate_inputs(&x, &[5, 5], 4).is_err());
        assert!(validate_inputs(&x, &[5], 3).is_err());
        assert!(validate_inputs(&x, &[5, 6], 3).is_err());

        let empty = Tensor::zeros((1, 0, 3), DType::F32, &Device::Cpu).unwrap();
        assert!(validate_inputs(&empty, &[0], 3).is_err());

        let flat = Tensor::zeros((5, 3), DType::F32, &Device::Cpu).unwrap();
        assert!(matches!(
            validate_inputs(&flat, &[5], 3),
            Err(AmError::Inference(_))
        ));
    }
}
