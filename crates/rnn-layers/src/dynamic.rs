//! Unrolling cells over padded, variable-length batches.
//!
//! Batches are batch-major `[B, T, D]` with per-row lengths. Steps at or past
//! a row's length emit zeros and leave the state untouched, so the final state
//! of every row is the state after its last valid frame.

use candle_core::{DType, Device, IndexOp, Result, Tensor};
use candle_nn::VarBuilder;
use tracing::trace;

use crate::cells::RecurrentCell;
use crate::layers::dropout;

/// Final states of a bidirectional layer.
#[derive(Debug, Clone)]
pub struct BiState<S> {
    pub fw: S,
    pub bw: S,
}

/// Time-major validity mask `[T, B, 1]`: 1.0 where `t < seq_lens[b]`.
pub fn sequence_mask(
    seq_lens: &[usize],
    max_time: usize,
    device: &Device,
    dtype: DType,
) -> Result<Tensor> {
    let batch = seq_lens.len();
    let mut data = vec![0f32; max_time * batch];
    for (b, &len) in seq_lens.iter().enumerate() {
        for t in 0..len.min(max_time) {
            data[t * batch + b] = 1.0;
        }
    }
    Tensor::from_vec(data, (max_time, batch, 1), device)?.to_dtype(dtype)
}

/// Reverse every row of `[B, T, D]` within its first `seq_lens[b]` steps.
///
/// Padding steps stay where they are. Applying it twice is the identity.
pub fn reverse_sequence(x: &Tensor, seq_lens: &[usize]) -> Result<Tensor> {
    let (batch, max_time, dim) = x.dims3()?;
    if seq_lens.len() != batch {
        candle_core::bail!(
            "reverse_sequence: {} lengths for batch of {batch}",
            seq_lens.len()
        );
    }

    let mut index = Vec::with_capacity(batch * max_time);
    for (b, &len) in seq_lens.iter().enumerate() {
        let len = len.min(max_time);
        let base = (b * max_time) as u32;
        for t in 0..max_time {
            let src = if t < len { len - 1 - t } else { t };
            index.push(base + src as u32);
        }
    }
    let index = Tensor::from_vec(index, batch * max_time, x.device())?;

    x.reshape((batch * max_time, dim))?
        .index_select(&index, 0)?
        .reshape((batch, max_time, dim))
}

/// Run `cell` over `inputs [B, T, D]` under `mask [T, B, 1]`.
///
/// Returns outputs `[B, T, H]` (zeros past each length) and the final state.
pub fn dynamic_rnn<C: RecurrentCell>(
    cell: &C,
    inputs: &Tensor,
    mask: &Tensor,
) -> Result<(Tensor, C::State)> {
    let (batch, max_time, _) = inputs.dims3()?;
    let projected = cell.input_projection(inputs)?;
    let mut state = cell.zero_state(batch, inputs.device(), inputs.dtype())?;

    let mut outputs = Vec::with_capacity(max_time);
    for t in 0..max_time {
        let x_t = projected.i((.., t, ..))?;
        let m_t = mask.i(t)?;

        let (out, next) = cell.step(&x_t, &state)?;
        state = C::select_state(&m_t, &next, &state)?;
        outputs.push(out.broadcast_mul(&m_t)?);
    }
    trace!(batch, max_time, "dynamic_rnn unrolled");

    Ok((Tensor::stack(&outputs, 1)?, state))
}

/// Bidirectional layer: `fw` over the sequence, `bw` over its per-row reversal.
///
/// Returns `[B, T, H_fw + H_bw]` (forward features first) and both final states.
pub fn bidirectional_dynamic_rnn<C: RecurrentCell>(
    fw: &C,
    bw: &C,
    inputs: &Tensor,
    seq_lens: &[usize],
) -> Result<(Tensor, BiState<C::State>)> {
    let (_, max_time, _) = inputs.dims3()?;
    let mask = sequence_mask(seq_lens, max_time, inputs.device(), inputs.dtype())?;

    let (out_fw, state_fw) = dynamic_rnn(fw, inputs, &mask)?;

    let reversed = reverse_sequence(inputs, seq_lens)?;
    let (out_bw, state_bw) = dynamic_rnn(bw, &reversed, &mask)?;
    let out_bw = reverse_sequence(&out_bw, seq_lens)?;

    Ok((
        Tensor::cat(&[&out_fw, &out_bw], 2)?,
        BiState {
            fw: state_fw,
            bw: state_bw,
        },
    ))
}

/// Stack of unidirectional cells; each layer's output feeds the next one.
#[derive(Debug, Clone)]
pub struct StackedRnn<C> {
    layers: Vec<C>,
}

impl<C: RecurrentCell> StackedRnn<C> {
    /// Build `num_layers` cells with `make(layer_idx, input_dim, vb)`.
    ///
    /// Layer `i` (from 0) reads its tensors under `{prefix}{i + 1}`.
    pub fn new<F>(
        input_dim: usize,
        num_layers: usize,
        prefix: &str,
        vb: VarBuilder,
        mut make: F,
    ) -> Result<Self>
    where
        F: FnMut(usize, usize, VarBuilder) -> Result<C>,
    {
        let mut layers = Vec::with_capacity(num_layers);
        let mut in_dim = input_dim;
        for i in 0..num_layers {
            let cell = make(i, in_dim, vb.pp(format!("{prefix}{}", i + 1)))?;
            in_dim = cell.output_size();
            layers.push(cell);
        }
        Ok(Self { layers })
    }

    pub fn num_layers(&self) -> usize {
        self.layers.len()
    }

    /// Output size of the top layer.
    pub fn output_size(&self) -> Option<usize> {
        self.layers.last().map(|c| c.output_size())
    }

    /// Run all layers, dropping each layer's outputs with `keep_prob`.
    ///
    /// Returns the top-layer outputs `[B, T, H]` and the final state of every layer.
    pub fn forward(
        &self,
        inputs: &Tensor,
        seq_lens: &[usize],
        keep_prob: f64,
    ) -> Result<(Tensor, Vec<C::State>)> {
        let (_, max_time, _) = inputs.dims3()?;
        let mask = sequence_mask(seq_lens, max_time, inputs.device(), inputs.dtype())?;

        let mut hidden = inputs.clone();
        let mut states = Vec::with_capacity(self.layers.len());
        for cell in &self.layers {
            let (out, state) = dynamic_rnn(cell, &hidden, &mask)?;
            hidden = dropout(&out, keep_prob)?;
            states.push(state);
        }
        Ok((hidden, states))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cells::{GruCell, LstmCell, LstmCellConfig};
    use candle_nn::VarMap;

    fn max_abs_diff(a: &Tensor, b: &Tensor) -> f32 {
        (a - b)
            .unwrap()
            .abs()
            .unwrap()
            .flatten_all()
            .unwrap()
            .max(0)
            .unwrap()
            .to_scalar::<f32>()
            .unwrap()
    }

    #[test]
    fn test_sequence_mask_layout() {
        let mask = sequence_mask(&[2, 0, 3], 3, &Device::Cpu, DType::F32).unwrap();
        assert_eq!(mask.dims(), &[3, 3, 1]);
        let m: Vec<Vec<f32>> = mask.squeeze(2).unwrap().to_vec2().unwrap();
        assert_eq!(m, vec![vec![1., 0., 1.], vec![1., 0., 1.], vec![0., 0., 1.]]);
    }

    #[test]
    fn test_reverse_sequence_keeps_padding() {
        let x = Tensor::arange(0f32, 8.0, &Device::Cpu)
            .unwrap()
            .reshape((2, 4, 1))
            .unwrap();
        let r = reverse_sequence(&x, &[4, 2]).unwrap();
        let v: Vec<Vec<f32>> = r.squeeze(2).unwrap().to_vec2().unwrap();
        assert_eq!(v, vec![vec![3., 2., 1., 0.], vec![5., 4., 6., 7.]]);

        let back = reverse_sequence(&r, &[4, 2]).unwrap();
        assert_eq!(max_abs_diff(&back, &x), 0.0);
    }

    #[test]
    fn test_dynamic_rnn_zero_outputs_and_frozen_state_past_length() {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let cell = GruCell::new(3, 4, 0.5, vb).unwrap();

        let x = Tensor::randn(0f32, 1.0, (2, 5, 3), &Device::Cpu).unwrap();
        let mask = sequence_mask(&[5, 3], 5, &Device::Cpu, DType::F32).unwrap();
        let (out, state) = dynamic_rnn(&cell, &x, &mask).unwrap();
        assert_eq!(out.dims(), &[2, 5, 4]);

        let padded = out.i((1, 3.., ..)).unwrap();
        assert_eq!(padded.abs().unwrap().sum_all().unwrap().to_scalar::<f32>().unwrap(), 0.0);

        // Финальное состояние короткой строки = состояние после её 3-го фрейма.
        let short = x.i((1..2, ..3, ..)).unwrap();
        let short_mask = sequence_mask(&[3], 3, &Device::Cpu, DType::F32).unwrap();
        let (short_out, short_state) = dynamic_rnn(&cell, &short, &short_mask).unwrap();
        assert!(max_abs_diff(&state.i(1..2).unwrap(), &short_state) < 1e-6);
        assert!(max_abs_diff(&out.i((1..2, ..3, ..)).unwrap(), &short_out) < 1e-6);
    }

    #[test]
    fn test_bidirectional_ignores_padding_contents() {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let config = LstmCellConfig {
            use_peephole: true,
            ..Default::default()
        };
        let fw = LstmCell::new(3, 4, config, 0.3, vb.pp("fw")).unwrap();
        let bw = LstmCell::new(3, 4, config, 0.3, vb.pp("bw")).unwrap();

        let valid = Tensor::randn(0f32, 1.0, (1, 3, 3), &Device::Cpu).unwrap();
        let pad_a = Tensor::zeros((1, 2, 3), DType::F32, &Device::Cpu).unwrap();
        let pad_b = Tensor::randn(0f32, 10.0, (1, 2, 3), &Device::Cpu).unwrap();
        let xa = Tensor::cat(&[&valid, &pad_a], 1).unwrap();
        let xb = Tensor::cat(&[&valid, &pad_b], 1).unwrap();

        let (out_a, st_a) = bidirectional_dynamic_rnn(&fw, &bw, &xa, &[3]).unwrap();
        let (out_b, st_b) = bidirectional_dynamic_rnn(&fw, &bw, &xb, &[3]).unwrap();
        assert_eq!(out_a.dims(), &[1, 5, 8]);
        assert!(max_abs_diff(&out_a, &out_b) < 1e-6);
        assert!(max_abs_diff(&st_a.bw.c, &st_b.bw.c) < 1e-6);

        // Обратное направление на первом фрейме видело всю последовательность:
        // совпадает с финальным состоянием bw.
        let bw_first = out_a.i((.., 0, 4..)).unwrap();
        assert!(max_abs_diff(&bw_first, &st_a.bw.h) < 1e-6);
    }

    #[test]
    fn test_stacked_rnn_layers_chain_output_sizes() {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let stack = StackedRnn::new(6, 3, "rnn", vb, |_, in_dim, vb| {
            GruCell::new(in_dim, 5, 0.1, vb)
        })
        .unwrap();
        assert_eq!(stack.num_layers(), 3);
        assert_eq!(stack.output_size(), Some(5));

        let x = Tensor::randn(0f32, 1.0, (2, 4, 6), &Device::Cpu).unwrap();
        let (out, states) = stack.forward(&x, &[4, 1], 1.0).unwrap();
        assert_eq!(out.dims(), &[2, 4, 5]);
        assert_eq!(states.len(), 3);

        let names: Vec<String> = varmap.data().lock().unwrap().keys().cloned().collect();
        assert!(names.iter().any(|n| n == "rnn1.weight_ih"));
        assert!(names.iter().any(|n| n == "rnn3.weight_hh_gates"));
    }
}
