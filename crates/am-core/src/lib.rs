//! # am-core
//!
//! Базовые типы, трейты и определения ошибок для RustCTC.
//!
//! Этот крейт предоставляет фундаментальные абстракции для всех остальных
//! крейтов в workspace:
//!
//! - Унифицированная обработка ошибок через [`AmError`]
//! - Вероятности сохранения для dropout ([`KeepProbs`]) и выбор LSTM-ячейки ([`LstmImpl`])
//! - Trait [`CtcModel`] — единый интерфейс для всех акустических моделей
//! - Реестр моделей [`ModelType`]
//! - Greedy CTC-декодер ([`ctc::CtcGreedyDecoder`])

pub mod ctc;
pub mod debug;
pub mod error;
pub mod model_files;
pub mod model_registry;
pub mod traits;
pub mod types;

pub use ctc::CtcGreedyDecoder;
pub use error::{AmError, AmResult};
pub use model_registry::ModelType;
pub use traits::{CtcModel, validate_inputs};
pub use types::{KeepProbs, LstmImpl, ModelInfo};
