//! Утилиты для работы с файлами модели на диске.
//!
//! Директория модели содержит `config.json` и веса в формате safetensors
//! (один файл или шарды с `model.safetensors.index.json`).

use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};

use candle_core::{DType, Device};
use candle_nn::{VarBuilder, VarMap};
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::{AmError, AmResult};

/// Имя файла конфигурации в директории модели.
pub const CONFIG_FILE: &str = "config.json";

/// Имя файла весов в директории модели.
pub const WEIGHTS_FILE: &str = "model.safetensors";

#[derive(serde::Deserialize)]
struct SafetensorsIndex {
    weight_map: HashMap<String, String>,
}

/// Разрешить список safetensors-файлов в директории модели.
///
/// Поддерживает:
/// - `model.safetensors` (один файл)
/// - `model.safetensors.index.json` + шардированные `model-00001-of-0000N.safetensors`
pub fn resolve_safetensors_files(model_dir: impl AsRef<Path>) -> AmResult<Vec<PathBuf>> {
    let model_dir = model_dir.as_ref();

    let single = model_dir.join(WEIGHTS_FILE);
    if single.exists() {
        return Ok(vec![single]);
    }

    let index_path = model_dir.join("model.safetensors.index.json");
    if index_path.exists() {
        let data = std::fs::read(&index_path)?;
        let idx: SafetensorsIndex = serde_json::from_slice(&data)?;

        // weight_map: tensor_name -> shard_filename
        // Для детерминизма порядок шардов сортируем.
        let uniq: BTreeSet<&String> = idx.weight_map.values().collect();
        let mut files = Vec::with_capacity(uniq.len());
        for shard in uniq {
            let p = model_dir.join(shard);
            if !p.exists() {
                return Err(AmError::Model(format!(
                    "Шард {:?} из index.json не найден в {:?}",
                    shard, model_dir
                )));
            }
            files.push(p);
        }
        if !files.is_empty() {
            return Ok(files);
        }
    }

    Err(AmError::Model(format!(
        "Файл {WEIGHTS_FILE} не найден в {:?}",
        model_dir
    )))
}

/// Прочитать `config.json` из директории модели.
pub fn read_config<T: DeserializeOwned>(model_dir: impl AsRef<Path>) -> AmResult<T> {
    let path = model_dir.as_ref().join(CONFIG_FILE);
    if !path.exists() {
        return Err(AmError::Config(format!(
            "Файл {CONFIG_FILE} не найден в {:?}",
            model_dir.as_ref()
        )));
    }
    let data = std::fs::read_to_string(&path)?;
    Ok(serde_json::from_str(&data)?)
}

/// Открыть веса модели из директории как [`VarBuilder`] (mmap safetensors).
pub fn load_var_builder(
    model_dir: impl AsRef<Path>,
    dtype: DType,
    device: &Device,
) -> AmResult<VarBuilder<'static>> {
    let files = resolve_safetensors_files(&model_dir)?;
    debug!("Веса: {} файл(ов) safetensors из {:?}", files.len(), model_dir.as_ref());
    // SAFETY: файлы весов не модифицируются во время жизни модели.
    let vb = unsafe { VarBuilder::from_mmaped_safetensors(&files, dtype, device)? };
    Ok(vb)
}

/// Количество скалярных параметров во всех переменных [`VarMap`].
pub fn count_parameters(varmap: &VarMap) -> u64 {
    varmap
        .all_vars()
        .iter()
        .map(|v| v.elem_count() as u64)
        .sum()
}
