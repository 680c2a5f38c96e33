//! Recurrent cells.
//!
//! Cells split the input-to-hidden projection out of the per-step update:
//! [`RecurrentCell::input_projection`] runs once over the whole
//! `[batch, time, input_dim]` tensor, [`RecurrentCell::step`] only does the
//! hidden-to-hidden part. Gate order matches the TensorFlow cells:
//! `r, u` for GRU and `i, j, f, o` for LSTM.

use am_core::{AmError, AmResult, LstmImpl};
use candle_core::{DType, Device, Module, Result, Tensor};
use candle_nn::ops::sigmoid;
use candle_nn::{Init, Linear, VarBuilder};

use crate::layers::uniform_init;

/// A single recurrent cell that can be unrolled by [`crate::dynamic_rnn`].
pub trait RecurrentCell {
    /// Recurrent state carried between timesteps.
    type State: Clone;

    /// Size of the per-step output.
    fn output_size(&self) -> usize;

    /// All-zero initial state for `batch` sequences.
    fn zero_state(&self, batch: usize, device: &Device, dtype: DType) -> Result<Self::State>;

    /// Input-to-hidden projection for all timesteps: `[B, T, D] → [B, T, G]`.
    fn input_projection(&self, inputs: &Tensor) -> Result<Tensor>;

    /// One step: projected input `[B, G]` + previous state → (output `[B, H]`, new state).
    fn step(&self, projected: &Tensor, state: &Self::State) -> Result<(Tensor, Self::State)>;

    /// Per-row state selection: `mask = 1` takes `new`, `mask = 0` keeps `old`.
    ///
    /// `mask` has shape `[B, 1]`.
    fn select_state(mask: &Tensor, new: &Self::State, old: &Self::State) -> Result<Self::State>;
}

/// `old + mask·(new − old)`
fn blend(mask: &Tensor, new: &Tensor, old: &Tensor) -> Result<Tensor> {
    old.add(&(new - old)?.broadcast_mul(mask)?)
}

// -----------------------------------------------------------------------
// GRU
// -----------------------------------------------------------------------

/// GRU cell.
///
/// ```text
/// r, u = σ(W_x·x + W_h·h + b_g)     (b_g initialized to 1.0)
/// c    = tanh(W_cx·x + W_ch·(r⊙h) + b_c)
/// h'   = u⊙h + (1 − u)⊙c
/// ```
#[derive(Debug, Clone)]
pub struct GruCell {
    /// `x → [r, u, c]`, bias included.
    input: Linear,
    /// `h → [r, u]`.
    gates_hidden: Linear,
    /// `r⊙h → c`.
    candidate_hidden: Linear,
    num_units: usize,
}

impl GruCell {
    pub fn new(input_dim: usize, num_units: usize, init_range: f64, vb: VarBuilder) -> Result<Self> {
        let init = uniform_init(init_range);

        let w_input = vb.get_with_hints((3 * num_units, input_dim), "weight_ih", init)?;
        let b_gates = vb.get_with_hints(2 * num_units, "bias_gates", Init::Const(1.0))?;
        let b_candidate = vb.get_with_hints(num_units, "bias_candidate", Init::Const(0.0))?;
        let bias = Tensor::cat(&[&b_gates, &b_candidate], 0)?;

        let w_gates = vb.get_with_hints((2 * num_units, num_units), "weight_hh_gates", init)?;
        let w_candidate =
            vb.get_with_hints((num_units, num_units), "weight_hh_candidate", init)?;

        Ok(Self {
            input: Linear::new(w_input, Some(bias)),
            gates_hidden: Linear::new(w_gates, None),
            candidate_hidden: Linear::new(w_candidate, None),
            num_units,
        })
    }
}

impl RecurrentCell for GruCell {
    type State = Tensor;

    fn output_size(&self) -> usize {
        self.num_units
    }

    fn zero_state(&self, batch: usize, device: &Device, dtype: DType) -> Result<Tensor> {
        Tensor::zeros((batch, self.num_units), dtype, device)
    }

    fn input_projection(&self, inputs: &Tensor) -> Result<Tensor> {
        self.input.forward(inputs)
    }

    fn step(&self, projected: &Tensor, h: &Tensor) -> Result<(Tensor, Tensor)> {
        let u = self.num_units;
        let gates_x = projected.narrow(1, 0, 2 * u)?;
        let candidate_x = projected.narrow(1, 2 * u, u)?;

        let gates = sigmoid(&(gates_x + self.gates_hidden.forward(h)?)?)?;
        let r = gates.narrow(1, 0, u)?;
        let update = gates.narrow(1, u, u)?;

        let candidate = (candidate_x + self.candidate_hidden.forward(&(r * h)?)?)?.tanh()?;

        // h' = c + u⊙(h − c)
        let new_h = candidate.add(&(h - &candidate)?.mul(&update)?)?;
        Ok((new_h.clone(), new_h))
    }

    fn select_state(mask: &Tensor, new: &Tensor, old: &Tensor) -> Result<Tensor> {
        blend(mask, new, old)
    }
}

// -----------------------------------------------------------------------
// LSTM
// -----------------------------------------------------------------------

/// Options of [`LstmCell`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LstmCellConfig {
    /// Diagonal peephole connections from the cell state to the gates.
    pub use_peephole: bool,
    /// Clamp the cell state to `[-clip, clip]`.
    pub cell_clip: Option<f64>,
    /// Size of the recurrent projection of the output.
    pub num_proj: Option<usize>,
    /// Added to the forget gate pre-activation.
    pub forget_bias: f64,
}

impl Default for LstmCellConfig {
    fn default() -> Self {
        Self {
            use_peephole: false,
            cell_clip: None,
            num_proj: None,
            forget_bias: 1.0,
        }
    }
}

impl LstmCellConfig {
    /// Options honored by each TensorFlow-style cell implementation.
    ///
    /// - `BasicLSTMCell`: plain LSTM.
    /// - `LSTMCell`: peepholes, cell clipping and projection.
    /// - `LSTMBlockCell`: peepholes only.
    /// - `LSTMBlockFusedCell`: not supported.
    pub fn for_impl(
        lstm_impl: LstmImpl,
        use_peephole: bool,
        cell_clip: Option<f64>,
        num_proj: Option<usize>,
    ) -> AmResult<Self> {
        let base = Self::default();
        match lstm_impl {
            LstmImpl::BasicLstmCell => Ok(base),
            LstmImpl::LstmCell => Ok(Self {
                use_peephole,
                cell_clip,
                num_proj: num_proj.filter(|&p| p != 0),
                ..base
            }),
            LstmImpl::LstmBlockCell => Ok(Self {
                use_peephole,
                ..base
            }),
            LstmImpl::LstmBlockFusedCell => Err(AmError::Model(
                "LSTMBlockFusedCell пока не реализован".to_string(),
            )),
        }
    }
}

/// LSTM state: cell `c` and output `h` (after projection, if any).
#[derive(Debug, Clone)]
pub struct LstmState {
    pub c: Tensor,
    pub h: Tensor,
}

/// LSTM cell with optional peepholes, cell clipping and output projection.
///
/// ```text
/// i, j, f, o = W_x·x + W_h·m + b
/// c  = σ(f + forget_bias + w_f⊙c₋₁)⊙c₋₁ + σ(i + w_i⊙c₋₁)⊙tanh(j)
/// c  = clip(c)
/// m  = σ(o + w_o⊙c)⊙tanh(c)
/// m  = W_proj·m
/// ```
#[derive(Debug, Clone)]
pub struct LstmCell {
    /// `x → [i, j, f, o]`, bias included.
    input: Linear,
    /// `m → [i, j, f, o]`.
    hidden: Linear,
    /// Peephole diagonals `(w_i, w_f, w_o)`.
    peepholes: Option<(Tensor, Tensor, Tensor)>,
    projection: Option<Linear>,
    cell_clip: Option<f64>,
    forget_bias: f64,
    num_units: usize,
    out_dim: usize,
}

impl LstmCell {
    pub fn new(
        input_dim: usize,
        num_units: usize,
        config: LstmCellConfig,
        init_range: f64,
        vb: VarBuilder,
    ) -> Result<Self> {
        let init = uniform_init(init_range);
        let out_dim = config.num_proj.unwrap_or(num_units);

        let w_input = vb.get_with_hints((4 * num_units, input_dim), "weight_ih", init)?;
        let bias = vb.get_with_hints(4 * num_units, "bias", Init::Const(0.0))?;
        let w_hidden = vb.get_with_hints((4 * num_units, out_dim), "weight_hh", init)?;

        let peepholes = if config.use_peephole {
            Some((
                vb.get_with_hints(num_units, "w_i_diag", init)?,
                vb.get_with_hints(num_units, "w_f_diag", init)?,
                vb.get_with_hints(num_units, "w_o_diag", init)?,
            ))
        } else {
            None
        };

        let projection = match config.num_proj {
            Some(p) => Some(Linear::new(
                vb.get_with_hints((p, num_units), "weight_proj", init)?,
                None,
            )),
            None => None,
        };

        Ok(Self {
            input: Linear::new(w_input, Some(bias)),
            hidden: Linear::new(w_hidden, None),
            peepholes,
            projection,
            cell_clip: config.cell_clip,
            forget_bias: config.forget_bias,
            num_units,
            out_dim,
        })
    }
}

impl RecurrentCell for LstmCell {
    type State = LstmState;

    fn output_size(&self) -> usize {
        self.out_dim
    }

    fn zero_state(&self, batch: usize, device: &Device, dtype: DType) -> Result<LstmState> {
        Ok(LstmState {
            c: Tensor::zeros((batch, self.num_units), dtype, device)?,
            h: Tensor::zeros((batch, self.output_size()), dtype, device)?,
        })
    }

    fn input_projection(&self, inputs: &Tensor) -> Result<Tensor> {
        self.input.forward(inputs)
    }

    fn step(&self, projected: &Tensor, state: &LstmState) -> Result<(Tensor, LstmState)> {
        let u = self.num_units;
        let z = (projected + self.hidden.forward(&state.h)?)?;
        let i = z.narrow(1, 0, u)?;
        let j = z.narrow(1, u, u)?;
        let f = (z.narrow(1, 2 * u, u)? + self.forget_bias)?;
        let o = z.narrow(1, 3 * u, u)?;

        let c_prev = &state.c;
        let (i, f) = match &self.peepholes {
            Some((w_i, w_f, _)) => (
                (i + c_prev.broadcast_mul(w_i)?)?,
                (f + c_prev.broadcast_mul(w_f)?)?,
            ),
            None => (i, f),
        };

        let mut c = (sigmoid(&f)?.mul(c_prev)? + sigmoid(&i)?.mul(&j.tanh()?)?)?;
        if let Some(clip) = self.cell_clip {
            c = c.clamp(-clip, clip)?;
        }

        let o = match &self.peepholes {
            Some((_, _, w_o)) => (o + c.broadcast_mul(w_o)?)?,
            None => o,
        };
        let mut m = sigmoid(&o)?.mul(&c.tanh()?)?;
        if let Some(proj) = &self.projection {
            m = proj.forward(&m)?;
        }

        Ok((m.clone(), LstmState { c, h: m }))
    }

    fn select_state(mask: &Tensor, new: &LstmState, old: &LstmState) -> Result<LstmState> {
        Ok(LstmState {
            c: blend(mask, &new.c, &old.c)?,
            h: blend(mask, &new.h, &old.h)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::IndexOp;
    use candle_nn::VarMap;
    use std::collections::HashMap;

    fn cpu_vb(varmap: &VarMap) -> VarBuilder<'_> {
        VarBuilder::from_varmap(varmap, DType::F32, &Device::Cpu)
    }

    fn tensor(data: &[f32], shape: &[usize]) -> Tensor {
        Tensor::from_slice(data, shape, &Device::Cpu).unwrap()
    }

    /// VarBuilder поверх заданных вручную тензоров.
    fn fixed_vb(tensors: Vec<(&str, Tensor)>) -> VarBuilder<'static> {
        let map: HashMap<String, Tensor> = tensors
            .into_iter()
            .map(|(name, tensor)| (name.to_string(), tensor))
            .collect();
        VarBuilder::from_tensors(map, DType::F32, &Device::Cpu)
    }

    fn sigm(x: f64) -> f64 {
        1.0 / (1.0 + (-x).exp())
    }

    /// Прогнать ячейку по скалярной последовательности (batch=1, dim=1).
    fn run_scalar<C: RecurrentCell>(cell: &C, xs: &[f32]) -> Vec<f32> {
        let x = Tensor::from_slice(xs, (1, xs.len(), 1), &Device::Cpu).unwrap();
        let proj = cell.input_projection(&x).unwrap();
        let mut state = cell.zero_state(1, &Device::Cpu, DType::F32).unwrap();
        let mut outs = Vec::new();
        for t in 0..xs.len() {
            let (out, next) = cell.step(&proj.i((.., t, ..)).unwrap(), &state).unwrap();
            outs.push(out.flatten_all().unwrap().to_vec1::<f32>().unwrap()[0]);
            state = next;
        }
        outs
    }

    #[test]
    fn test_gru_step_shapes_and_state() {
        let varmap = VarMap::new();
        let cell = GruCell::new(5, 8, 0.1, cpu_vb(&varmap).pp("gru")).unwrap();
        assert_eq!(cell.output_size(), 8);

        let x = Tensor::randn(0f32, 1.0, (3, 4, 5), &Device::Cpu).unwrap();
        let proj = cell.input_projection(&x).unwrap();
        assert_eq!(proj.dims(), &[3, 4, 24]);

        let h0 = cell.zero_state(3, &Device::Cpu, DType::F32).unwrap();
        let x0 = proj.narrow(1, 0, 1).unwrap().squeeze(1).unwrap();
        let (out, h1) = cell.step(&x0, &h0).unwrap();
        assert_eq!(out.dims(), &[3, 8]);
        let diff = (out - &h1).unwrap().abs().unwrap().sum_all().unwrap();
        assert_eq!(diff.to_scalar::<f32>().unwrap(), 0.0);

        // Выход GRU — выпуклая комбинация h₋₁ = 0 и tanh(·), поэтому |h| < 1.
        let max = h1.abs().unwrap().flatten_all().unwrap().max(0).unwrap();
        assert!(max.to_scalar::<f32>().unwrap() < 1.0);
    }

    #[test]
    fn test_gru_gate_bias_initialized_to_one() {
        let varmap = VarMap::new();
        let _cell = GruCell::new(2, 4, 0.1, cpu_vb(&varmap).pp("gru")).unwrap();
        let data = varmap.data().lock().unwrap();
        let bias = data.get("gru.bias_gates").unwrap().as_tensor().to_vec1::<f32>().unwrap();
        assert!(bias.iter().all(|&b| b == 1.0));
        let cand = data
            .get("gru.bias_candidate")
            .unwrap()
            .as_tensor()
            .to_vec1::<f32>()
            .unwrap();
        assert!(cand.iter().all(|&b| b == 0.0));
    }

    #[test]
    fn test_lstm_projection_output_size() {
        let varmap = VarMap::new();
        let config = LstmCellConfig {
            use_peephole: true,
            num_proj: Some(3),
            ..Default::default()
        };
        let cell = LstmCell::new(4, 6, config, 0.1, cpu_vb(&varmap)).unwrap();
        assert_eq!(cell.output_size(), 3);

        let state = cell.zero_state(2, &Device::Cpu, DType::F32).unwrap();
        assert_eq!(state.c.dims(), &[2, 6]);
        assert_eq!(state.h.dims(), &[2, 3]);

        let x = Tensor::randn(0f32, 1.0, (2, 1, 4), &Device::Cpu).unwrap();
        let proj = cell.input_projection(&x).unwrap().squeeze(1).unwrap();
        let (out, next) = cell.step(&proj, &state).unwrap();
        assert_eq!(out.dims(), &[2, 3]);
        assert_eq!(next.c.dims(), &[2, 6]);
    }

    #[test]
    fn test_lstm_cell_clip_bounds_state() {
        let varmap = VarMap::new();
        let config = LstmCellConfig {
            cell_clip: Some(0.05),
            ..Default::default()
        };
        let cell = LstmCell::new(3, 4, config, 1.0, cpu_vb(&varmap)).unwrap();

        let mut state = cell.zero_state(2, &Device::Cpu, DType::F32).unwrap();
        let x = (Tensor::ones((2, 1, 3), DType::F32, &Device::Cpu).unwrap() * 50.0).unwrap();
        let proj = cell.input_projection(&x).unwrap().squeeze(1).unwrap();
        for _ in 0..5 {
            state = cell.step(&proj, &state).unwrap().1;
        }
        let c: Vec<Vec<f32>> = state.c.to_vec2().unwrap();
        assert!(c.iter().flatten().all(|v| v.abs() <= 0.05 + 1e-6));
    }

    #[test]
    fn test_config_for_impl() {
        let basic = LstmCellConfig::for_impl(LstmImpl::BasicLstmCell, true, Some(5.0), Some(16))
            .unwrap();
        assert_eq!(basic, LstmCellConfig::default());

        let full =
            LstmCellConfig::for_impl(LstmImpl::LstmCell, true, Some(5.0), Some(16)).unwrap();
        assert!(full.use_peephole);
        assert_eq!(full.cell_clip, Some(5.0));
        assert_eq!(full.num_proj, Some(16));

        let block =
            LstmCellConfig::for_impl(LstmImpl::LstmBlockCell, true, Some(5.0), Some(16)).unwrap();
        assert!(block.use_peephole);
        assert_eq!(block.cell_clip, None);
        assert_eq!(block.num_proj, None);

        assert!(matches!(
            LstmCellConfig::for_impl(LstmImpl::LstmBlockFusedCell, true, None, None),
            Err(AmError::Model(_))
        ));
    }

    #[test]
    fn test_gru_matches_scalar_equations() {
        // Веса x → [r, u, c], h → [r, u], r⊙h → c.
        let wx = [0.4f32, -0.7, 0.9];
        let (bg, bc) = ([0.3f32, -0.2], [0.1f32]);
        let (wh, whc) = ([0.5f32, 0.8], [-0.6f32]);
        let vb = fixed_vb(vec![
            ("weight_ih", tensor(&wx, &[3, 1])),
            ("bias_gates", tensor(&bg, &[2])),
            ("bias_candidate", tensor(&bc, &[1])),
            ("weight_hh_gates", tensor(&wh, &[2, 1])),
            ("weight_hh_candidate", tensor(&whc, &[1, 1])),
        ]);
        let cell = GruCell::new(1, 1, 0.1, vb).unwrap();

        let xs = [0.5f32, -1.0, 0.8];
        let got = run_scalar(&cell, &xs);

        let mut h = 0.0f64;
        for (t, &x) in xs.iter().enumerate() {
            let x = x as f64;
            let r = sigm(wx[0] as f64 * x + wh[0] as f64 * h + bg[0] as f64);
            let u = sigm(wx[1] as f64 * x + wh[1] as f64 * h + bg[1] as f64);
            let c = (wx[2] as f64 * x + whc[0] as f64 * (r * h) + bc[0] as f64).tanh();
            h = u * h + (1.0 - u) * c;
            assert!((got[t] as f64 - h).abs() < 1e-5, "t={t}: {} vs {h}", got[t]);
        }
    }

    #[test]
    fn test_lstm_matches_scalar_equations() {
        // Порядок гейтов i, j, f, o; разные веса, чтобы перестановка была заметна.
        let wx = [0.6f32, -0.4, 0.2, 0.9];
        let wh = [-0.3f32, 0.7, 0.5, -0.8];
        let b = [0.1f32, -0.2, 0.3, 0.05];
        let (p_i, p_f, p_o) = ([0.25f32], [-0.35f32], [0.45f32]);
        let vb = fixed_vb(vec![
            ("weight_ih", tensor(&wx, &[4, 1])),
            ("bias", tensor(&b, &[4])),
            ("weight_hh", tensor(&wh, &[4, 1])),
            ("w_i_diag", tensor(&p_i, &[1])),
            ("w_f_diag", tensor(&p_f, &[1])),
            ("w_o_diag", tensor(&p_o, &[1])),
        ]);
        let config = LstmCellConfig {
            use_peephole: true,
            ..Default::default()
        };
        let cell = LstmCell::new(1, 1, config, 0.1, vb).unwrap();

        let xs = [0.5f32, -1.0, 0.8];
        let got = run_scalar(&cell, &xs);

        let g = |k: usize, x: f64, m: f64| wx[k] as f64 * x + wh[k] as f64 * m + b[k] as f64;
        let (mut c, mut m) = (0.0f64, 0.0f64);
        for (t, &x) in xs.iter().enumerate() {
            let x = x as f64;
            let i = sigm(g(0, x, m) + p_i[0] as f64 * c);
            let j = g(1, x, m).tanh();
            let f = sigm(g(2, x, m) + 1.0 + p_f[0] as f64 * c);
            c = f * c + i * j;
            let o = sigm(g(3, x, m) + p_o[0] as f64 * c);
            m = o * c.tanh();
            assert!((got[t] as f64 - m).abs() < 1e-5, "t={t}: {} vs {m}", got[t]);
        }
    }

    #[test]
    fn test_lstm_projection_matches_scalar_equations() {
        // Без peephole, с клиппингом и проекцией 1 → 1.
        let wx = [1.5f32, 2.0, -0.5, 1.0];
        let wh = [0.2f32, -0.1, 0.3, 0.4];
        let b = [0.0f32; 4];
        let w_proj = [0.7f32];
        let vb = fixed_vb(vec![
            ("weight_ih", tensor(&wx, &[4, 1])),
            ("bias", tensor(&b, &[4])),
            ("weight_hh", tensor(&wh, &[4, 1])),
            ("weight_proj", tensor(&w_proj, &[1, 1])),
        ]);
        let config = LstmCellConfig {
            cell_clip: Some(0.3),
            num_proj: Some(1),
            ..Default::default()
        };
        let cell = LstmCell::new(1, 1, config, 0.1, vb).unwrap();

        let xs = [2.0f32, 1.5, -0.5];
        let got = run_scalar(&cell, &xs);

        let g = |k: usize, x: f64, m: f64| wx[k] as f64 * x + wh[k] as f64 * m + b[k] as f64;
        let (mut c, mut m) = (0.0f64, 0.0f64);
        for (t, &x) in xs.iter().enumerate() {
            let x = x as f64;
            let i = sigm(g(0, x, m));
            let j = g(1, x, m).tanh();
            let f = sigm(g(2, x, m) + 1.0);
            c = (f * c + i * j).clamp(-0.3, 0.3);
            let o = sigm(g(3, x, m));
            m = w_proj[0] as f64 * o * c.tanh();
            assert!((got[t] as f64 - m).abs() < 1e-5, "t={t}: {} vs {m}", got[t]);
        }
    }
}
