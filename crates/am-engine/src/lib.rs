//! # am-engine
//!
//! Единый фасад для всех CTC акустических моделей RustCTC.
//!
//! `AcousticEngine` позволяет загружать любую поддерживаемую модель через
//! единый интерфейс и получать логиты или greedy CTC-разметку, не привязываясь
//! к конкретной архитектуре.
//!
//! # Пример
//!
//! ```ignore
//! use am_engine::AcousticEngine;
//! use am_core::ModelType;
//!
//! let engine = AcousticEngine::load(
//!     ModelType::BgruCtc,
//!     "models/timit-bgru",
//!     &candle_core::Device::Cpu,
//! )?;
//!
//! let labels = engine.recognize(&features, &[features.dim(1)?])?;
//! ```

mod engine;

pub use engine::AcousticEngine;
