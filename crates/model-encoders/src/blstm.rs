//! Общие части энкодеров: стек BLSTM-слоёв и CTC-голова.

use candle_core::{Module, Result, Tensor};
use candle_nn::{Linear, VarBuilder};

use rnn_layers::{
    BiState, LstmCell, LstmCellConfig, LstmState, RecurrentCell, affine,
    bidirectional_dynamic_rnn, dropout, time_major_logits,
};

/// Результат прогона [`BlstmStack`].
pub struct BlstmOutput {
    /// Выход последнего слоя `[B, T, 2·H]` (после dropout).
    pub outputs: Tensor,
    /// Финальные состояния последнего слоя.
    pub final_state: BiState<LstmState>,
    /// Выход и состояния слоя `tap_layer`, если он был запрошен.
    pub tapped: Option<(Tensor, BiState<LstmState>)>,
}

/// Стек двунаправленных LSTM-слоёв.
///
/// Ключи тензоров: `blstm_hidden{i}.{fw,bw}.*` (i с 1).
pub struct BlstmStack {
    layers: Vec<(LstmCell, LstmCell)>,
    output_dim: usize,
}

impl BlstmStack {
    pub fn new(
        input_dim: usize,
        num_unit: usize,
        num_layer: usize,
        cell_config: LstmCellConfig,
        init_range: f64,
        vb: VarBuilder,
    ) -> Result<Self> {
        let mut layers = Vec::with_capacity(num_layer);
        let mut in_dim = input_dim;
        for i in 1..=num_layer {
            let vb_layer = vb.pp(format!("blstm_hidden{i}"));
            let fw = LstmCell::new(in_dim, num_unit, cell_config, init_range, vb_layer.pp("fw"))?;
            let bw = LstmCell::new(in_dim, num_unit, cell_config, init_range, vb_layer.pp("bw"))?;
            in_dim = fw.output_size() + bw.output_size();
            layers.push((fw, bw));
        }
        Ok(Self {
            layers,
            output_dim: in_dim,
        })
    }

    /// Размерность выхода последнего слоя (`2·num_unit` или `2·num_proj`).
    pub fn output_dim(&self) -> usize {
        self.output_dim
    }

    pub fn num_layers(&self) -> usize {
        self.layers.len()
    }

    /// Прогнать все слои; выход каждого слоя проходит dropout с `keep_hidden`.
    ///
    /// `tap_layer` (с 1) — слой, выход которого нужно вернуть дополнительно.
    pub fn forward(
        &self,
        inputs: &Tensor,
        seq_lens: &[usize],
        keep_hidden: f64,
        tap_layer: Option<usize>,
    ) -> Result<BlstmOutput> {
        let mut hidden = inputs.clone();
        let mut final_state = None;
        let mut tapped = None;

        for (i, (fw, bw)) in self.layers.iter().enumerate() {
            let (out, state) = bidirectional_dynamic_rnn(fw, bw, &hidden, seq_lens)?;
            hidden = dropout(&out, keep_hidden)?;
            if tap_layer == Some(i + 1) {
                tapped = Some((hidden.clone(), state.clone()));
            }
            final_state = Some(state);
        }

        let Some(final_state) = final_state else {
            candle_core::bail!("BlstmStack без слоёв");
        };
        Ok(BlstmOutput {
            outputs: hidden,
            final_state,
            tapped,
        })
    }
}

/// CTC-голова: (bottleneck → dropout) → affine → time-major → dropout.
pub struct OutputHead {
    bottleneck: Option<Linear>,
    output: Linear,
}

impl OutputHead {
    /// `bottleneck.*` и `{output_name}.*` внутри `vb`.
    pub fn new(
        in_dim: usize,
        bottleneck_dim: Option<usize>,
        num_classes: usize,
        output_name: &str,
        vb: VarBuilder,
    ) -> Result<Self> {
        let (bottleneck, in_dim) = match bottleneck_dim {
            Some(dim) => (Some(affine(in_dim, dim, vb.pp("bottleneck"))?), dim),
            None => (None, in_dim),
        };
        let output = affine(in_dim, num_classes, vb.pp(output_name))?;
        Ok(Self { bottleneck, output })
    }

    /// `[B, T, H]` → логиты `[T, B, num_classes]`.
    pub fn forward(&self, hidden: &Tensor, keep_output: f64) -> Result<Tensor> {
        let hidden = match &self.bottleneck {
            Some(b) => dropout(&b.forward(hidden)?, keep_output)?,
            None => hidden.clone(),
        };
        let logits = time_major_logits(&self.output, &hidden)?;
        dropout(&logits, keep_output)
    }
}

/// Параметры одной LSTM-ячейки.
pub(crate) fn lstm_parameters(input_dim: usize, units: usize, config: &LstmCellConfig) -> u64 {
    let (d, u) = (input_dim as u64, units as u64);
    let out = config.num_proj.unwrap_or(units) as u64;
    let mut total = 4 * u * (d + out) + 4 * u;
    if config.use_peephole {
        total += 3 * u;
    }
    if config.num_proj.is_some() {
        total += out * u;
    }
    total
}

/// Параметры стека BLSTM и выходной размерности.
pub(crate) fn blstm_parameters(
    input_dim: usize,
    units: usize,
    layers: usize,
    config: &LstmCellConfig,
) -> (u64, usize) {
    let out = 2 * config.num_proj.unwrap_or(units);
    let mut total = 0;
    let mut in_dim = input_dim;
    for _ in 0..layers {
        total += 2 * lstm_parameters(in_dim, units, config);
        in_dim = out;
    }
    (total, in_dim)
}

/// Параметры головы: bottleneck (если есть) + выходной слой.
pub(crate) fn head_parameters(in_dim: usize, bottleneck: Option<usize>, classes: usize) -> u64 {
    let c = classes as u64;
    match bottleneck {
        Some(b) => {
            let b = b as u64;
            in_dim as u64 * b + b + b * c + c
        }
        None => in_dim as u64 * c + c,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use am_core::model_files::count_parameters;
    use candle_core::{DType, Device};
    use candle_nn::VarMap;

    #[test]
    fn test_blstm_stack_tap_and_dims() {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let config = LstmCellConfig {
            use_peephole: true,
            num_proj: Some(3),
            ..Default::default()
        };
        let stack = BlstmStack::new(5, 4, 3, config, 0.1, vb).unwrap();
        assert_eq!(stack.output_dim(), 6);

        let x = Tensor::randn(0f32, 1.0, (2, 4, 5), &Device::Cpu).unwrap();
        let out = stack.forward(&x, &[4, 2], 1.0, Some(2)).unwrap();
        assert_eq!(out.outputs.dims(), &[2, 4, 6]);
        assert_eq!(out.final_state.fw.h.dims(), &[2, 3]);
        assert_eq!(out.final_state.bw.c.dims(), &[2, 4]);
        let (tap, _) = out.tapped.unwrap();
        assert_eq!(tap.dims(), &[2, 4, 6]);

        let (params, out_dim) = blstm_parameters(5, 4, 3, &config);
        assert_eq!(out_dim, 6);
        assert_eq!(params, count_parameters(&varmap));
    }

    #[test]
    fn test_output_head_with_bottleneck() {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let head = OutputHead::new(8, Some(3), 5, "output", vb).unwrap();
        let hidden = Tensor::randn(0f32, 1.0, (2, 7, 8), &Device::Cpu).unwrap();
        assert_eq!(head.forward(&hidden, 1.0).unwrap().dims(), &[7, 2, 5]);
        assert_eq!(head_parameters(8, Some(3), 5), count_parameters(&varmap));
    }
}
