//!
//! CLI для CTC акустических моделей (BGRU-CTC, GRU-CTC, VGG-BLSTM, multi-task BLSTM).

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};
use std::time::Instant;

use am_core::{CtcGreedyDecoder, KeepProbs, ModelType};
use am_engine::AcousticEngine;
use candle_core::{DType, Device, Tensor};

/// Архитектура модели для CLI.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
enum ModelTypeArg {
    /// Bidirectional GRU-CTC
    BgruCtc,
    /// Однонаправленный GRU-CTC
    GruCtc,
    /// VGG + BLSTM энкодер (сплайсированные фреймы с Δ и ΔΔ)
    VggBlstm,
    /// BLSTM с основной и вспомогательной CTC-головами
    MultitaskBlstm,
}

impl ModelTypeArg {
    fn to_model_type(self) -> ModelType {
        match self {
            ModelTypeArg::BgruCtc => ModelType::BgruCtc,
            ModelTypeArg::GruCtc => ModelType::GruCtc,
            ModelTypeArg::VggBlstm => ModelType::VggBlstm,
            ModelTypeArg::MultitaskBlstm => ModelType::MultitaskBlstm,
        }
    }
}

#[derive(Parser)]
#[command(name = "rustctc")]
#[command(author, version, about = "RustCTC: CTC acoustic models on Candle", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// Откуда брать модель: директория с весами или только конфигурация.
#[derive(Args, Debug)]
struct ModelSource {
    /// Тип модели
    #[arg(long, value_enum)]
    model_type: ModelTypeArg,

    /// Директория модели (config.json + model.safetensors)
    #[arg(long, conflicts_with = "config", required_unless_present = "config")]
    model: Option<PathBuf>,

    /// JSON-конфигурация; веса инициализируются случайно
    #[arg(long)]
    config: Option<PathBuf>,

    /// Device to use (cpu, metal, cuda)
    #[arg(long, default_value = "cpu")]
    device: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Show model summary and parameter count
    Info {
        #[command(flatten)]
        source: ModelSource,
    },

    /// Run a forward pass and print the logits shape
    Forward {
        #[command(flatten)]
        source: ModelSource,

        /// Признаки в формате .npy: [T, D] или [B, T, D]
        #[arg(long)]
        features: PathBuf,
    },

    /// Greedy CTC decoding of a feature file
    Decode {
        /// Тип модели
        #[arg(long, value_enum)]
        model_type: ModelTypeArg,

        /// Директория модели (config.json + model.safetensors)
        #[arg(long)]
        model: PathBuf,

        /// Признаки в формате .npy: [T, D] или [B, T, D]
        #[arg(long)]
        features: PathBuf,

        /// Словарь {"id": "метка"}; без него печатаются индексы
        #[arg(long)]
        vocab: Option<PathBuf>,

        /// Device to use (cpu, metal, cuda)
        #[arg(long, default_value = "cpu")]
        device: String,
    },

    /// List model architectures compiled into this binary
    Models,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Info { source } => {
            let device = create_device(&source.device)?;
            let engine = open_engine(&source, &device)?;
            print_info(&engine);
            Ok(())
        }

        Commands::Forward { source, features } => {
            let device = create_device(&source.device)?;
            let engine = open_engine(&source, &device)?;
            let (inputs, seq_lens) = load_features(&features, &device)?;

            let start = Instant::now();
            let logits = engine.forward(&inputs, &seq_lens, &KeepProbs::inference())?;
            println!("Модель: {} ({})", engine.name(), engine.model_type());
            println!("Вход: {:?}", inputs.dims());
            println!("Логиты: {:?} (time-major, blank = {})", logits.dims(), engine.blank_id());
            println!("Время: {:.2?}", start.elapsed());
            Ok(())
        }

        Commands::Decode {
            model_type,
            model,
            features,
            vocab,
            device,
        } => {
            let device = create_device(&device)?;
            let engine = AcousticEngine::load(model_type.to_model_type(), &model, &device)?;
            let (inputs, seq_lens) = load_features(&features, &device)?;

            let decoder = match &vocab {
                Some(path) => CtcGreedyDecoder::from_vocab_file(path, engine.blank_id())
                    .with_context(|| format!("Не удалось прочитать словарь: {}", path.display()))?,
                None => CtcGreedyDecoder::new(engine.blank_id()),
            };

            let start = Instant::now();
            let logits = engine.forward(&inputs, &seq_lens, &KeepProbs::inference())?;
            let labels = decoder.decode_batch(&logits, &seq_lens)?;

            for (i, ids) in labels.iter().enumerate() {
                if decoder.vocab_size() > 0 {
                    println!("[{i}] {}", decoder.ids_to_text(ids));
                } else {
                    println!("[{i}] {ids:?}");
                }
            }
            tracing::info!("Декодирование заняло {:.2?}", start.elapsed());
            Ok(())
        }

        Commands::Models => {
            println!("Доступные модели:");
            for model_type in AcousticEngine::available_models() {
                println!("- {:<16} {}", model_type.as_str(), model_type.display_name());
            }
            Ok(())
        }
    }
}

/// Загрузить модель из директории или инициализировать по конфигурации.
fn open_engine(source: &ModelSource, device: &Device) -> Result<AcousticEngine> {
    let model_type = source.model_type.to_model_type();
    match (&source.model, &source.config) {
        (Some(dir), _) => {
            if !dir.is_dir() {
                anyhow::bail!("Директория модели не найдена: {}", dir.display());
            }
            Ok(AcousticEngine::load(model_type, dir, device)?)
        }
        (None, Some(config)) => {
            let json = std::fs::read_to_string(config)
                .with_context(|| format!("Не удалось прочитать {}", config.display()))?;
            let (engine, _vars) = AcousticEngine::init_random(model_type, &json, device)?;
            Ok(engine)
        }
        (None, None) => anyhow::bail!("Укажите --model или --config"),
    }
}

fn print_info(engine: &AcousticEngine) {
    let info = engine.model_info();
    println!("Модель: {}", engine.name());
    println!("Архитектура: {} ({})", info.display_name, info.model_type);
    println!("Бэкенд: {}", info.backend);
    println!("Вход: {} признаков на фрейм", info.input_dim);
    println!(
        "Классов: {} (blank = {})",
        info.num_classes,
        engine.blank_id()
    );
    match info.parameters {
        Some(p) => println!("Параметров: {p} ({:.2}M)", p as f64 / 1e6),
        None => println!("Параметров: неизвестно"),
    }
}

/// Прочитать признаки из `.npy`.
///
/// `[T, D]` — одна последовательность, `[B, T, D]` — батч без паддинга
/// (все последовательности полной длины).
fn load_features(path: &Path, device: &Device) -> Result<(Tensor, Vec<usize>)> {
    let tensor = Tensor::read_npy(path)
        .with_context(|| format!("Не удалось прочитать признаки: {}", path.display()))?
        .to_dtype(DType::F32)?;
    let tensor = match tensor.rank() {
        2 => tensor.unsqueeze(0)?,
        3 => tensor,
        r => anyhow::bail!("Ожидались признаки ранга 2 или 3, получено {r}"),
    };
    let (batch, max_time, _) = tensor.dims3()?;
    Ok((tensor.to_device(device)?, vec![max_time; batch]))
}

fn create_device(device: &str) -> Result<Device> {
    match device {
        "metal" => {
            // candle может panic при инициализации Metal, если устройство недоступно.
            let prev_hook = std::panic::take_hook();
            std::panic::set_hook(Box::new(|_| {}));
            let res = std::panic::catch_unwind(|| Device::new_metal(0));
            std::panic::set_hook(prev_hook);

            match res {
                Ok(Ok(dev)) => Ok(dev),
                Ok(Err(e)) => Err(e.into()),
                Err(_) => Err(anyhow::anyhow!(
                    "Инициализация Metal недоступна в этом окружении. Попробуйте --device cpu."
                )),
            }
        }
        "cuda" => Ok(Device::new_cuda(0)?),
        _ => Ok(Device::Cpu),
    }
}
