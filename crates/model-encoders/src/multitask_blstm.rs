//! Multi-task BLSTM энкодер.
//!
//! Общий стек BLSTM-слоёв и две CTC-головы: основная (поверх последнего
//! слоя) и вспомогательная (поверх слоя `num_layer_sub`).

use std::path::Path;

use candle_core::{DType, Device, Tensor};
use candle_nn::{VarBuilder, VarMap};
use tracing::{debug, info};

use am_core::model_files::{count_parameters, load_var_builder, read_config};
use am_core::{AmError, AmResult, CtcModel, KeepProbs, ModelInfo, ModelType, validate_inputs};
use rnn_layers::{BiState, LstmCellConfig, LstmState, dropout};

use crate::blstm::{BlstmStack, OutputHead, blstm_parameters, head_parameters};
use crate::config::MultitaskBlstmConfig;

const DEFAULT_NAME: &str = "multitask_blstm_encoder";

/// Результат multi-task прогона.
pub struct MultitaskOutput {
    /// Логиты основной задачи `[T, B, num_classes_main + 1]`.
    pub logits_main: Tensor,
    /// Логиты вспомогательной задачи `[T, B, num_classes_sub + 1]`.
    pub logits_sub: Tensor,
    /// Финальные состояния последнего слоя.
    pub final_state: BiState<LstmState>,
    /// Финальные состояния слоя `num_layer_sub`.
    pub final_state_sub: BiState<LstmState>,
}

/// Multi-task BLSTM CTC-энкодер.
pub struct MultitaskBlstmEncoder {
    config: MultitaskBlstmConfig,
    cell_config: LstmCellConfig,
    blstm: BlstmStack,
    head_main: OutputHead,
    head_sub: OutputHead,
}

impl MultitaskBlstmEncoder {
    /// Собрать энкодер из [`VarBuilder`].
    ///
    /// Ключи тензоров: `blstm_hidden{i}.{fw,bw}.*`, `bottleneck.*`,
    /// `output_main.*`, `output_sub.*`.
    pub fn new(config: MultitaskBlstmConfig, vb: VarBuilder) -> AmResult<Self> {
        config.validate()?;

        let cell_config = LstmCellConfig::for_impl(
            config.lstm_impl,
            config.use_peephole,
            config.clip_activation,
            config.num_proj(),
        )?;

        let blstm = BlstmStack::new(
            config.input_size,
            config.num_unit,
            config.num_layer_main,
            cell_config,
            config.parameter_init,
            vb.clone(),
        )?;

        // Все слои стека имеют одинаковую выходную размерность.
        let out_dim = blstm.output_dim();
        let head_sub = OutputHead::new(
            out_dim,
            None,
            config.num_classes_sub + 1,
            "output_sub",
            vb.clone(),
        )?;
        let head_main = OutputHead::new(
            out_dim,
            config.bottleneck(),
            config.num_classes_main + 1,
            "output_main",
            vb,
        )?;

        debug!(
            "Multitask BLSTM: {} ({}), {} слоёв (sub на {}), классов {}/{}",
            config.lstm_impl,
            config.num_unit,
            config.num_layer_main,
            config.num_layer_sub,
            config.num_classes_main + 1,
            config.num_classes_sub + 1,
        );

        Ok(Self {
            config,
            cell_config,
            blstm,
            head_main,
            head_sub,
        })
    }

    /// Загрузить энкодер из директории (`config.json` + `model.safetensors`).
    pub fn load(model_dir: impl AsRef<Path>, device: &Device) -> AmResult<Self> {
        let model_dir = model_dir.as_ref();
        info!("Multitask BLSTM: загрузка модели из {:?}", model_dir);

        let config: MultitaskBlstmConfig = read_config(model_dir)?;
        let vb = load_var_builder(model_dir, DType::F32, device)?;
        Self::new(config, vb)
    }

    /// Создать энкодер со случайно инициализированными весами.
    pub fn init_random(
        config: MultitaskBlstmConfig,
        device: &Device,
    ) -> AmResult<(Self, VarMap)> {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, device);
        let model = Self::new(config, vb)?;
        info!(
            "Multitask BLSTM: инициализировано {} параметров",
            count_parameters(&varmap)
        );
        Ok((model, varmap))
    }

    pub fn config(&self) -> &MultitaskBlstmConfig {
        &self.config
    }

    /// Количество классов вспомогательной задачи (включая blank).
    pub fn num_classes_sub(&self) -> usize {
        self.config.num_classes_sub + 1
    }

    /// Количество обучаемых параметров.
    pub fn num_parameters(&self) -> u64 {
        let c = &self.config;
        let (blstm, out_dim) = blstm_parameters(
            c.input_size,
            c.num_unit,
            c.num_layer_main,
            &self.cell_config,
        );
        blstm
            + head_parameters(out_dim, c.bottleneck(), c.num_classes_main + 1)
            + head_parameters(out_dim, None, c.num_classes_sub + 1)
    }

    /// Прогон обеих задач.
    pub fn forward_multitask(
        &self,
        inputs: &Tensor,
        seq_lens: &[usize],
        keep: &KeepProbs,
    ) -> AmResult<MultitaskOutput> {
        keep.validate()?;
        validate_inputs(inputs, seq_lens, self.config.input_size)?;

        let hidden = dropout(&inputs.to_dtype(DType::F32)?, keep.input)?;
        let out = self.blstm.forward(
            &hidden,
            seq_lens,
            keep.hidden,
            Some(self.config.num_layer_sub),
        )?;

        let Some((hidden_sub, final_state_sub)) = out.tapped else {
            return Err(AmError::Inference(format!(
                "нет выхода слоя {} для вспомогательной задачи",
                self.config.num_layer_sub
            )));
        };

        let logits_sub = self.head_sub.forward(&hidden_sub, keep.output)?;
        let logits_main = self.head_main.forward(&out.outputs, keep.output)?;

        if am_core::debug::enabled() {
            eprintln!(
                "DEBUG MultitaskBlstmEncoder: main={:?}, sub={:?}",
                logits_main.dims(),
                logits_sub.dims()
            );
        }

        Ok(MultitaskOutput {
            logits_main,
            logits_sub,
            final_state: out.final_state,
            final_state_sub,
        })
    }
}

impl CtcModel for MultitaskBlstmEncoder {
    fn name(&self) -> &str {
        self.config.name.as_deref().unwrap_or(DEFAULT_NAME)
    }

    fn model_type(&self) -> ModelType {
        ModelType::MultitaskBlstm
    }

    fn input_dim(&self) -> usize {
        self.config.input_size
    }

    fn num_classes(&self) -> usize {
        self.config.num_classes_main + 1
    }

    fn model_info(&self) -> ModelInfo {
        ModelInfo::new(self.model_type(), self.input_dim(), self.num_classes())
            .with_parameters(self.num_parameters())
    }

    /// Логиты основной задачи.
    fn forward(
        &self,
        inputs: &Tensor,
        seq_lens: &[usize],
        keep: &KeepProbs,
    ) -> AmResult<Tensor> {
        Ok(self.forward_multitask(inputs, seq_lens, keep)?.logits_main)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use am_core::LstmImpl;
    use candle_core::IndexOp;

    fn small_config() -> MultitaskBlstmConfig {
        MultitaskBlstmConfig::new(6, 4, 3, 2, 8, 5)
    }

    #[test]
    fn test_both_heads_time_major() {
        let (model, _vars) = MultitaskBlstmEncoder::init_random(small_config(), &Device::Cpu).unwrap();
        let x = Tensor::randn(0f32, 1.0, (2, 5, 6), &Device::Cpu).unwrap();
        let out = model
            .forward_multitask(&x, &[5, 3], &KeepProbs::inference())
            .unwrap();
        assert_eq!(out.logits_main.dims(), &[5, 2, 9]);
        assert_eq!(out.logits_sub.dims(), &[5, 2, 6]);
        assert_eq!(out.final_state.fw.h.dims(), &[2, 4]);
        assert_eq!(out.final_state_sub.bw.c.dims(), &[2, 4]);
        assert_eq!(model.blank_id(), 8);
        assert_eq!(model.num_classes_sub(), 6);
    }

    #[test]
    fn test_forward_returns_main_logits() {
        let (model, _vars) = MultitaskBlstmEncoder::init_random(small_config(), &Device::Cpu).unwrap();
        let x = Tensor::randn(0f32, 1.0, (1, 4, 6), &Device::Cpu).unwrap();
        let keep = KeepProbs::inference();
        let main = model.forward(&x, &[4], &keep).unwrap();
        let both = model.forward_multitask(&x, &[4], &keep).unwrap();
        let diff = (main - both.logits_main).unwrap().abs().unwrap().sum_all().unwrap();
        assert!(diff.to_scalar::<f32>().unwrap() < 1e-6);
    }

    #[test]
    fn test_sub_layer_equal_to_main_shares_final_state() {
        // num_layer_sub == num_layer_main: вспомогательная голова смотрит на последний слой.
        let cfg = MultitaskBlstmConfig::new(6, 4, 2, 2, 8, 5);
        let (model, _vars) = MultitaskBlstmEncoder::init_random(cfg, &Device::Cpu).unwrap();
        let x = Tensor::randn(0f32, 1.0, (1, 3, 6), &Device::Cpu).unwrap();
        let out = model
            .forward_multitask(&x, &[3], &KeepProbs::inference())
            .unwrap();
        assert_eq!(out.logits_sub.i((.., 0, ..)).unwrap().dims(), &[3, 6]);
        let diff = (out.final_state.fw.h - out.final_state_sub.fw.h)
            .unwrap()
            .abs()
            .unwrap()
            .sum_all()
            .unwrap();
        assert!(diff.to_scalar::<f32>().unwrap() < 1e-6);
    }

    #[test]
    fn test_parameter_count_per_lstm_impl() {
        for lstm_impl in [LstmImpl::BasicLstmCell, LstmImpl::LstmCell, LstmImpl::LstmBlockCell] {
            let mut cfg = small_config();
            cfg.lstm_impl = lstm_impl;
            cfg.num_proj = Some(3);
            cfg.clip_activation = Some(10.0);
            cfg.bottleneck_dim = Some(4);
            let (model, vars) = MultitaskBlstmEncoder::init_random(cfg, &Device::Cpu).unwrap();
            assert_eq!(model.num_parameters(), count_parameters(&vars), "{lstm_impl}");
        }
    }

    #[test]
    fn test_fused_cell_is_rejected() {
        let mut cfg = small_config();
        cfg.lstm_impl = LstmImpl::LstmBlockFusedCell;
        assert!(MultitaskBlstmEncoder::init_random(cfg, &Device::Cpu).is_err());
    }

    #[test]
    fn test_invalid_sub_layer_is_rejected() {
        let cfg = MultitaskBlstmConfig::new(6, 4, 2, 3, 8, 5);
        let err = MultitaskBlstmEncoder::init_random(cfg, &Device::Cpu)
            .err()
            .unwrap();
        assert!(err.to_string().contains("num_layer_sub"));
    }
}
