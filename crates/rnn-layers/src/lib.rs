//! # rnn-layers
//!
//! Recurrent and convolutional building blocks for the RustCTC acoustic models.
//!
//! - GRU and LSTM cells (peepholes, cell clipping, recurrent projection)
//! - Masked dynamic RNN over padded batches, bidirectional and stacked variants
//! - Dropout with keep probabilities, affine projections to time-major logits
//! - VGG convolution blocks with SAME padding
//!
//! All cells take a [`candle_nn::VarBuilder`], so the same constructors work
//! with freshly initialized `VarMap` weights and with mmaped safetensors.

pub mod cells;
pub mod conv;
pub mod dynamic;
pub mod layers;

pub use cells::{GruCell, LstmCell, LstmCellConfig, LstmState, RecurrentCell};
pub use conv::{ConvLayer, VggBlock, max_pool_same};
pub use dynamic::{
    BiState, StackedRnn, bidirectional_dynamic_rnn, dynamic_rnn, reverse_sequence, sequence_mask,
};
pub use layers::{affine, dropout, time_major_logits, uniform_init};
