//! Bidirectional GRU-CTC.
//!
//! dropout(вход) → N × [BGRU → dropout] → (bottleneck) → affine → логиты `[T, B, C]`.

use std::path::Path;

use candle_core::{DType, Device, Module, Tensor};
use candle_nn::{Linear, VarBuilder, VarMap};
use tracing::{debug, info};

use am_core::model_files::{count_parameters, load_var_builder, read_config};
use am_core::{AmResult, CtcModel, KeepProbs, ModelInfo, ModelType, validate_inputs};
use rnn_layers::{GruCell, affine, bidirectional_dynamic_rnn, dropout, time_major_logits};

use crate::config::{CtcConfig, gru_parameters};

const DEFAULT_NAME: &str = "bgru_ctc";

/// Один двунаправленный слой: прямая и обратная ячейки.
struct BgruLayer {
    fw: GruCell,
    bw: GruCell,
}

/// Bidirectional GRU-CTC модель.
pub struct BgruCtc {
    config: CtcConfig,
    layers: Vec<BgruLayer>,
    bottleneck: Option<Linear>,
    output: Linear,
}

impl BgruCtc {
    /// Собрать модель из [`VarBuilder`].
    ///
    /// Ключи тензоров: `bgru_hidden{i}.{fw,bw}.*`, `bottleneck.*`, `output.*` (i с 1).
    pub fn new(config: CtcConfig, vb: VarBuilder) -> AmResult<Self> {
        config.validate()?;

        let mut layers = Vec::with_capacity(config.num_layer);
        let mut in_dim = config.input_size;
        for i in 1..=config.num_layer {
            let vb_layer = vb.pp(format!("bgru_hidden{i}"));
            let fw = GruCell::new(in_dim, config.num_unit, config.parameter_init, vb_layer.pp("fw"))?;
            let bw = GruCell::new(in_dim, config.num_unit, config.parameter_init, vb_layer.pp("bw"))?;
            layers.push(BgruLayer { fw, bw });
            in_dim = config.num_unit * 2;
        }

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
            "BGRU-CTC: {} слоёв × 2 × {} юнитов, bottleneck={:?}, классов={}",
            config.num_layer,
            config.num_unit,
            config.bottleneck(),
            config.num_classes()
        );

        Ok(Self {
            config,
            layers,
            bottleneck,
            output,
        })
    }

    /// Загрузить модель из директории (`config.json` + `model.safetensors`).
    pub fn load(model_dir: impl AsRef<Path>, device: &Device) -> AmResult<Self> {
        let model_dir = model_dir.as_ref();
        info!("BGRU-CTC: загрузка модели из {:?}", model_dir);

        let config: CtcConfig = read_config(model_dir)?;
        let vb = load_var_builder(model_dir, DType::F32, device)?;
        Self::new(config, vb)
    }

    /// Создать модель со случайно инициализированными весами.
    ///
    /// Возвращает также [`VarMap`] с переменными модели.
    pub fn init_random(config: CtcConfig, device: &Device) -> AmResult<(Self, VarMap)> {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, device);
        let model = Self::new(config, vb)?;
        info!(
            "BGRU-CTC: инициализировано {} параметров",
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
        let mut total = 0;
        let mut in_dim = c.input_size;
        for _ in 0..c.num_layer {
            total += 2 * gru_parameters(in_dim, c.num_unit);
            in_dim = 2 * c.num_unit;
        }
        total + c.head_parameters(in_dim)
    }
}

impl CtcModel for BgruCtc {
    fn name(&self) -> &str {
        self.config.name.as_deref().unwrap_or(DEFAULT_NAME)
    }

    fn model_type(&self) -> ModelType {
        ModelType::BgruCtc
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

        let inputs = inputs.to_dtype(DType::F32)?;
        let mut hidden = dropout(&inputs, keep.input)?;

        for layer in &self.layers {
            let (out, _) = bidirectional_dynamic_rnn(&layer.fw, &layer.bw, &hidden, seq_lens)?;
            hidden = dropout(&out, keep.hidden)?;
        }

        if let Some(bottleneck) = &self.bottleneck {
            hidden = bottleneck.forward(&hidden)?;
        }

        let logits = time_major_logits(&self.output, &hidden)?;
        if am_core::debug::enabled() {
            eprintln!("DEBUG BgruCtc: logits={:?}", logits.dims());
        }
        Ok(logits)
    }
}
