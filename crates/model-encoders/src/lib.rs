//! BLSTM CTC-энкодеры — чистая Rust-реализация на Candle.
//!
//! - [`VggBlstmEncoder`]: VGG-фронтенд над сплайсированными фреймами + BLSTM.
//! - [`MultitaskBlstmEncoder`]: BLSTM с дополнительной CTC-головой на
//!   промежуточном слое (вспомогательная задача, например фонемы при
//!   основной задаче на символах).

pub mod blstm;
pub mod config;
pub mod multitask_blstm;
pub mod vgg_blstm;

pub use blstm::{BlstmStack, OutputHead};
pub use config::{MultitaskBlstmConfig, VggBlstmConfig};
pub use multitask_blstm::{MultitaskBlstmEncoder, MultitaskOutput};
pub use vgg_blstm::VggBlstmEncoder;
