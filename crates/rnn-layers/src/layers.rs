//! Dropout, affine projections and initializers shared by all models.

use candle_core::{Result, Tensor};
use candle_nn::{Init, Linear, Module, VarBuilder};

/// Standard deviation of the affine (bottleneck / output) weight initializer.
pub const AFFINE_INIT_STDDEV: f64 = 0.1;

/// Uniform initializer in `[-range, range]`, used for recurrent weights.
pub fn uniform_init(range: f64) -> Init {
    Init::Uniform {
        lo: -range,
        up: range,
    }
}

/// Inverted dropout parameterized by the probability to *keep* a unit.
///
/// `keep_prob >= 1.0` is the identity. Tiny keep probabilities are clamped
/// so the drop rate stays below 1 after rounding to `f32`.
pub fn dropout(x: &Tensor, keep_prob: f64) -> Result<Tensor> {
    if keep_prob >= 1.0 {
        return Ok(x.clone());
    }
    let drop_p = ((1.0 - keep_prob) as f32).min(1.0 - f32::EPSILON);
    candle_nn::ops::dropout(x, drop_p)
}

/// Affine layer `x·Wᵀ + b` with normal(0, 0.1) weights and zero bias.
///
/// Tensor names: `weight` `[out_dim, in_dim]`, `bias` `[out_dim]`.
pub fn affine(in_dim: usize, out_dim: usize, vb: VarBuilder) -> Result<Linear> {
    let weight = vb.get_with_hints(
        (out_dim, in_dim),
        "weight",
        Init::Randn {
            mean: 0.0,
            stdev: AFFINE_INIT_STDDEV,
        },
    )?;
    let bias = vb.get_with_hints(out_dim, "bias", Init::Const(0.0))?;
    Ok(Linear::new(weight, Some(bias)))
}

/// Apply `proj` to every timestep of `[batch, time, hidden]` and return
/// time-major logits `[time, batch, out_dim]`.
pub fn time_major_logits(proj: &Linear, hidden: &Tensor) -> Result<Tensor> {
    proj.forward(hidden)?.transpose(0, 1)?.contiguous()
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};
    use candle_nn::VarMap;

    #[test]
    fn test_dropout_identity_when_keep_is_one() {
        let x = Tensor::ones((4, 8), DType::F32, &Device::Cpu).unwrap();
        let y = dropout(&x, 1.0).unwrap();
        let v: Vec<Vec<f32>> = y.to_vec2().unwrap();
        assert!(v.iter().flatten().all(|&e| e == 1.0));
    }

    #[test]
    fn test_dropout_scales_kept_units() {
        let x = Tensor::ones((64, 64), DType::F32, &Device::Cpu).unwrap();
        let y = dropout(&x, 0.5).unwrap();
        let v: Vec<Vec<f32>> = y.to_vec2().unwrap();
        let values: Vec<f32> = v.into_iter().flatten().collect();
        assert!(values.iter().all(|&e| e == 0.0 || (e - 2.0).abs() < 1e-6));
        let dropped = values.iter().filter(|&&e| e == 0.0).count();
        // 4096 независимых испытаний с p=0.5.
        assert!(dropped > 1500 && dropped < 2600, "dropped={dropped}");
    }

    #[test]
    fn test_dropout_accepts_tiny_keep_prob() {
        let x = Tensor::ones((8, 8), DType::F32, &Device::Cpu).unwrap();
        let y = dropout(&x, 1e-9).unwrap();
        assert_eq!(y.dims(), &[8, 8]);
        let v: Vec<Vec<f32>> = y.to_vec2().unwrap();
        assert!(v.iter().flatten().all(|e| e.is_finite()));
    }

    #[test]
    fn test_affine_time_major_shape() {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let proj = affine(6, 4, vb.pp("output")).unwrap();

        let hidden = Tensor::zeros((2, 7, 6), DType::F32, &Device::Cpu).unwrap();
        let logits = time_major_logits(&proj, &hidden).unwrap();
        assert_eq!(logits.dims(), &[7, 2, 4]);

        // Нулевой вход + нулевой bias → нулевые логиты.
        let sum = logits.abs().unwrap().sum_all().unwrap().to_scalar::<f32>().unwrap();
        assert_eq!(sum, 0.0);
    }
}
