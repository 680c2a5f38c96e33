//! GRU-CTC: стек однонаправленных GRU-слоёв.

use std::path::Path;

use candle_core::{DType, Device, Module, Tensor};
use candle_nn::{Linear, VarBuilder, VarMap};
use tracing::{debug, info};

use am_core::model_files::{count_parameters, load_var_builder, read_config};
use am_core::{AmResult, CtcModel, KeepProbs, ModelInfo, ModelType, validate_inputs};
use rnn_layers::{GruCell, StackedRnn, affine, dropout, time_major_logits};

use crate::config::{CtcConfig, gru_parameters};

const DEFAULT_NAME: &str = "gru_ctc";

/// GRU-CTC модель.
pub struct GruCtc {
    config: CtcConfig,
    rnn: StackedRnn<GruCell>,
    bottleneck: Option<Linear>,
    output: Linear,
}

impl GruCtc {
    /// Собрать модель из [`VarBuilder`].
    ///
    /// Ключи тензоров: `gru_hidden{i}.*`, `bottleneck.*`, `output.*` (i с 1).
    pub fn new(config: CtcConfig, vb: VarBuilder) -> AmResult<Self> {
        config.validate()?;

        let units = config.num_unit;
        let init = config.parameter_init;
        let rnn = StackedRnn::new(
            config.input_size,
            config.num_layer,
            "gru_hidden",
            vb.clone(),
            |_, in_dim, vb| GruCell::new(in_dim, units, init, vb),
        )?;

        let mut in_dim = units;
        let bottleneck = match config.bottleneck() {
            Some(dim) => {
                let layer = affine(in_dim, dim, vb.pp("bottleneck"))?;
                in_dim = dim;
                Some(layer)
            }
            None => None,
        };
        let output = affine(in_dim, config.num_classes(), vb.pp("output"))?;

        debug!(
            "GRU-CTC: {} слоёв × {} юнитов, bottleneck={:?}, классов={}",
            config.num_layer,
            units,
            config.bottleneck(),
            config.num_classes()
        );

        Ok(Self {
            config,
            rnn,
            bottleneck,
            output,
        })
    }

    /// Загрузить модель из директории (`config.json` + `model.safetensors`).
    pub fn load(model_dir: impl AsRef<Path>, device: &Device) -> AmResult<Self> {
        let model_dir = model_dir.as_ref();
        info!("GRU-CTC: загрузка модели из {:?}", model_dir);

        let config: CtcConfig = read_config(model_dir)?;
        let vb = load_var_builder(model_dir, DType::F32, device)?;
        Self::new(config, vb)
    }

    /// Создать модель со случайно инициализированными весами.
    pub fn init_random(config: CtcConfig, device: &Device) -> AmResult<(Self, VarMap)> {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, device);
        let model = Self::new(config, vb)?;
        info!(
            "GRU-CTC: инициализировано {} параметров",
            count_parameters(&varmap)
        );
        Ok((model, varmap))
    }

    pub fn config(&self) -> &CtcConfig {
        &self.config
    }

    /// Количество обучаемых параметров.
    pub fn num_parameters(&self) -> u64 {
        let c = &self.config;
        let first = gru_parameters(c.input_size, c.num_unit);
        let rest = (c.num_layer as u64 - 1) * gru_parameters(c.num_unit, c.num_unit);
        first + rest + c.head_parameters(c.num_unit)
    }
}

impl CtcModel for GruCtc {
    fn name(&self) -> &str {
        self.config.name.as_deref().unwrap_or(DEFAULT_NAME)
    }

    fn model_type(&self) -> ModelType {
        ModelType::GruCtc
    }

    fn input_dim(&self) -> usize {
        self.config.input_size
    }

    fn num_classes(&self) -> usize {
        self.config.num_classes()
    }

    fn model_info(&self) -> ModelInfo {
        ModelInfo::new(self.model_type(), self.input_dim(), self.num_classes())
            .with_parameters(self.num_parameters())
    }

    fn forward(
        &self,
        inputs: &Tensor,
        seq_lens: &[usize],
        keep: &KeepProbs,
    ) -> AmResult<Tensor> {
        keep.validate()?;
        validate_inputs(inputs, seq_lens, self.config.input_size)?;

        let inputs = dropout(&inputs.to_dtype(DType::F32)?, keep.input)?;
        let (mut hidden, _) = self.rnn.forward(&inputs, seq_lens, keep.hidden)?;

        if let Some(bottleneck) = &self.bottleneck {
            hidden = bottleneck.forward(&hidden)?;
        }

        let logits = time_major_logits(&self.output, &hidden)?;
        if am_core::debug::enabled() {
            eprintln!("DEBUG GruCtc: logits={:?}", logits.dims());
        }
        Ok(logits)
    }
}
