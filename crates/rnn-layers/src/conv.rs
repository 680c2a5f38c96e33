//! VGG-style convolution blocks.
//!
//! Layout is NCHW as candle expects: `[N, channels, height, width]`.

use candle_core::{Module, Result, Tensor};
use candle_nn::{Conv2d, Conv2dConfig, Init, VarBuilder};

/// 3×3 convolution, stride 1, SAME padding, bias, ReLU.
#[derive(Debug, Clone)]
pub struct ConvLayer {
    conv: Conv2d,
}

impl ConvLayer {
    /// Weights: normal(0, `init_stddev`), tensor `weight` `[out, in, 3, 3]`; bias zeros.
    pub fn new(
        in_channels: usize,
        out_channels: usize,
        init_stddev: f64,
        vb: VarBuilder,
    ) -> Result<Self> {
        let weight = vb.get_with_hints(
            (out_channels, in_channels, 3, 3),
            "weight",
            Init::Randn {
                mean: 0.0,
                stdev: init_stddev,
            },
        )?;
        let bias = vb.get_with_hints(out_channels, "bias", Init::Const(0.0))?;
        let cfg = Conv2dConfig {
            padding: 1,
            stride: 1,
            ..Default::default()
        };
        Ok(Self {
            conv: Conv2d::new(weight, Some(bias), cfg),
        })
    }

    pub fn forward(&self, x: &Tensor) -> Result<Tensor> {
        self.conv.forward(x)?.relu()
    }
}

/// 2×2 max pooling, stride 2, SAME padding: `[N, C, H, W] → [N, C, ⌈H/2⌉, ⌈W/2⌉]`.
///
/// Inputs come out of a ReLU, so zero padding never wins over a real value.
pub fn max_pool_same(x: &Tensor) -> Result<Tensor> {
    let (_, _, h, w) = x.dims4()?;
    let x = if h % 2 == 1 {
        x.pad_with_zeros(2, 0, 1)?
    } else {
        x.clone()
    };
    let x = if w % 2 == 1 {
        x.pad_with_zeros(3, 0, 1)?
    } else {
        x
    };
    x.max_pool2d(2)
}

/// Two [`ConvLayer`]s followed by [`max_pool_same`].
#[derive(Debug, Clone)]
pub struct VggBlock {
    conv1: ConvLayer,
    conv2: ConvLayer,
    out_channels: usize,
}

impl VggBlock {
    pub fn new(
        in_channels: usize,
        out_channels: usize,
        init_stddev: f64,
        vb: VarBuilder,
    ) -> Result<Self> {
        let conv1 = ConvLayer::new(in_channels, out_channels, init_stddev, vb.pp("conv1"))?;
        let conv2 = ConvLayer::new(out_channels, out_channels, init_stddev, vb.pp("conv2"))?;
        Ok(Self {
            conv1,
            conv2,
            out_channels,
        })
    }

    pub fn out_channels(&self) -> usize {
        self.out_channels
    }

    /// Spatial size after this block: `⌈n/2⌉`.
    pub fn output_len(input_len: usize) -> usize {
        input_len.div_ceil(2)
    }

    pub fn forward(&self, x: &Tensor) -> Result<Tensor> {
        let x = self.conv1.forward(x)?;
        let x = self.conv2.forward(&x)?;
        max_pool_same(&x)
    }
}
