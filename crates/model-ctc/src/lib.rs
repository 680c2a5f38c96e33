//! Рекуррентные CTC-модели — чистая Rust-реализация на Candle.
//!
//! - [`BgruCtc`]: стек двунаправленных GRU-слоёв + (bottleneck) + CTC-выход.
//! - [`GruCtc`]: стек однонаправленных GRU-слоёв + (bottleneck) + CTC-выход.
//!
//! Обе модели выдают логиты `[max_time, batch, output_size + 1]`,
//! последний класс — blank.

pub mod bgru;
pub mod config;
pub mod gru;

pub use bgru::BgruCtc;
pub use config::{BgruCtcConfig, CtcConfig, GruCtcConfig};
pub use gru::GruCtc;
