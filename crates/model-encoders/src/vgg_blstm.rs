//! VGG + Bidirectional LSTM энкодер.
//!
//! Каждый входной фрейм — `splice` соседних фреймов по `input_size` признаков —
//! рассматривается как маленькое изображение `[3, input_size/3, splice]`
//! (каналы: статические, Δ, ΔΔ) и проходит через два VGG-блока.
//! Дальше: linear(256) → dropout → BLSTM × N → (bottleneck) → CTC-выход.

use std::path::Path;

use candle_core::{DType, Device, Module, Tensor};
use candle_nn::{Linear, VarBuilder, VarMap};
use tracing::{debug, info};

use am_core::model_files::{count_parameters, load_var_builder, read_config};
use am_core::{AmResult, CtcModel, KeepProbs, ModelInfo, ModelType, validate_inputs};
use rnn_layers::{LstmCellConfig, VggBlock, dropout};

use crate::blstm::{BlstmStack, OutputHead, blstm_parameters, head_parameters};
use crate::config::VggBlstmConfig;

const DEFAULT_NAME: &str = "vgg_blstm_encoder";

/// Каналы VGG-блоков.
const VGG1_CHANNELS: usize = 64;
const VGG2_CHANNELS: usize = 128;

/// VGG + BLSTM CTC-энкодер.
pub struct VggBlstmEncoder {
    config: VggBlstmConfig,
    vgg1: VggBlock,
    vgg2: VggBlock,
    linear: Linear,
    blstm: BlstmStack,
    head: OutputHead,
}

impl VggBlstmEncoder {
    /// Собрать энкодер из [`VarBuilder`].
    ///
    /// Ключи тензоров: `vgg1.conv{1,2}.*`, `vgg2.conv{1,2}.*`, `linear.*`,
    /// `blstm_hidden{i}.{fw,bw}.*`, `bottleneck.*`, `output.*`.
    pub fn new(config: VggBlstmConfig, vb: VarBuilder) -> AmResult<Self> {
        config.validate()?;

        let init = config.parameter_init;
        let vgg1 = VggBlock::new(3, VGG1_CHANNELS, init, vb.pp("vgg1"))?;
        let vgg2 = VggBlock::new(VGG1_CHANNELS, VGG2_CHANNELS, init, vb.pp("vgg2"))?;

        let linear = candle_nn::linear(
            Self::vgg_output_dim(&config),
            VggBlstmConfig::LINEAR_DIM,
            vb.pp("linear"),
        )?;

        let blstm = BlstmStack::new(
            VggBlstmConfig::LINEAR_DIM,
            config.num_unit,
            config.num_layer,
            Self::cell_config(&config),
            init,
            vb.clone(),
        )?;

        let head = OutputHead::new(
            blstm.output_dim(),
            config.bottleneck(),
            config.num_classes + 1,
            "output",
            vb,
        )?;

        debug!(
            "VGG-BLSTM: вход {}×{}, VGG→{}, {} BLSTM-слоёв × {} юнитов, proj={:?}",
            config.input_size,
            config.splice,
            Self::vgg_output_dim(&config),
            config.num_layer,
            config.num_unit,
            config.num_proj(),
        );

        Ok(Self {
            config,
            vgg1,
            vgg2,
            linear,
            blstm,
            head,
        })
    }

    /// Загрузить энкодер из директории (`config.json` + `model.safetensors`).
    pub fn load(model_dir: impl AsRef<Path>, device: &Device) -> AmResult<Self> {
        let model_dir = model_dir.as_ref();
        info!("VGG-BLSTM: загрузка модели из {:?}", model_dir);

        let config: VggBlstmConfig = read_config(model_dir)?;
        let vb = load_var_builder(model_dir, DType::F32, device)?;
        Self::new(config, vb)
    }

    /// Создать энкодер со случайно инициализированными весами.
    pub fn init_random(config: VggBlstmConfig, device: &Device) -> AmResult<(Self, VarMap)> {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, device);
        let model = Self::new(config, vb)?;
        info!(
            "VGG-BLSTM: инициализировано {} параметров",
            count_parameters(&varmap)
        );
        Ok((model, varmap))
    }

    pub fn config(&self) -> &VggBlstmConfig {
        &self.config
    }

    /// LSTMCell с peephole, клиппингом и проекцией.
    fn cell_config(config: &VggBlstmConfig) -> LstmCellConfig {
        LstmCellConfig {
            use_peephole: true,
            cell_clip: config.clip_activation,
            num_proj: config.num_proj(),
            ..Default::default()
        }
    }

    /// Размер «изображения» после двух VGG-блоков: (высота, ширина).
    fn vgg_output_hw(config: &VggBlstmConfig) -> (usize, usize) {
        let h = VggBlock::output_len(VggBlock::output_len(config.input_size / 3));
        let w = VggBlock::output_len(VggBlock::output_len(config.splice));
        (h, w)
    }

    /// Размерность вектора после VGG (вход linear-слоя).
    fn vgg_output_dim(config: &VggBlstmConfig) -> usize {
        let (h, w) = Self::vgg_output_hw(config);
        h * w * VGG2_CHANNELS
    }

    /// Количество обучаемых параметров.
    pub fn num_parameters(&self) -> u64 {
        let c = &self.config;
        let conv = |i: u64, o: u64| 9 * i * o + o;
        let (c1, c2) = (VGG1_CHANNELS as u64, VGG2_CHANNELS as u64);
        let vgg = conv(3, c1) + conv(c1, c1) + conv(c1, c2) + conv(c2, c2);

        let lin_in = Self::vgg_output_dim(c) as u64;
        let lin_out = VggBlstmConfig::LINEAR_DIM as u64;
        let linear = lin_in * lin_out + lin_out;

        let (blstm, out_dim) = blstm_parameters(
            VggBlstmConfig::LINEAR_DIM,
            c.num_unit,
            c.num_layer,
            &Self::cell_config(c),
        );
        vgg + linear + blstm + head_parameters(out_dim, c.bottleneck(), c.num_classes + 1)
    }

    /// `[B, T, input_size·splice]` → `[B, T, LINEAR_DIM]`.
    fn frontend(&self, inputs: &Tensor) -> AmResult<Tensor> {
        let (batch, max_time, _) = inputs.dims3()?;
        let x = splice_to_image(inputs, self.config.input_size / 3, self.config.splice)?;

        let x = self.vgg1.forward(&x)?;
        let x = self.vgg2.forward(&x)?;

        let x = flatten_channels_last(&x, batch, max_time)?;
        Ok(self.linear.forward(&x)?)
    }
}

/// `[B, T, feat·3·splice]` → `[B·T, 3, feat, splice]` (NCHW).
///
/// Признак `(h·3 + c)·splice + s` попадает в канал `c`, строку `h`, столбец `s`.
fn splice_to_image(inputs: &Tensor, feat: usize, splice: usize) -> candle_core::Result<Tensor> {
    let (batch, max_time, _) = inputs.dims3()?;
    inputs
        .reshape((batch, max_time, feat, 3, splice))?
        .permute((0, 1, 3, 2, 4))?
        .contiguous()?
        .reshape((batch * max_time, 3, feat, splice))
}

/// `[B·T, C, H, W]` → `[B, T, H·W·C]`, порядок (высота, ширина, канал) как у NHWC-весов.
fn flatten_channels_last(x: &Tensor, batch: usize, max_time: usize) -> candle_core::Result<Tensor> {
    let (_, c, h, w) = x.dims4()?;
    x.permute((0, 2, 3, 1))?
        .contiguous()?
        .reshape((batch, max_time, h * w * c))
}

impl CtcModel for VggBlstmEncoder {
    fn name(&self) -> &str {
        self.config.name.as_deref().unwrap_or(DEFAULT_NAME)
    }

    fn model_type(&self) -> ModelType {
        ModelType::VggBlstm
    }

    fn input_dim(&self) -> usize {
        self.config.input_dim()
    }

    fn num_classes(&self) -> usize {
        self.config.num_classes + 1
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
        validate_inputs(inputs, seq_lens, self.config.input_dim())?;

        let features = self.frontend(&inputs.to_dtype(DType::F32)?)?;
        let hidden = dropout(&features, keep.input)?;

        let out = self.blstm.forward(&hidden, seq_lens, keep.hidden, None)?;
        let logits = self.head.forward(&out.outputs, keep.output)?;

        if am_core::debug::enabled() {
            eprintln!(
                "DEBUG VggBlstmEncoder: frontend={:?}, logits={:?}",
                features.dims(),
                logits.dims()
            );
        }
        Ok(logits)
    }
}
