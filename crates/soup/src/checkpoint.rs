//! Parameter maps and checkpoint resolution.
//!
//! A checkpoint is a mapping from parameter name to a rank-erased
//! [`TensorData`]. Sources come in two fixed variants: an in-memory map, or
//! a path to a JSON checkpoint file. The file format stores each parameter
//! as `{dtype, shape, values}` with values as f64, which is exact for the
//! 32-bit-and-narrower integer dtypes and for i64 magnitudes below 2^53.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use burn::tensor::{DType, TensorData};
use serde::{Deserialize, Serialize};

/// Mapping from parameter name to tensor data.
pub type ParamMap = HashMap<String, TensorData>;

/// Errors from checkpoint resolution and the file format.
#[derive(Debug, thiserror::Error)]
pub enum CheckpointError {
    #[error("failed to read checkpoint {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed checkpoint {path}: {source}")]
    Malformed {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("unsupported dtype {dtype} for parameter {key}")]
    UnsupportedDtype { key: String, dtype: String },

    #[error("corrupt tensor data for parameter {key}: {detail}")]
    Corrupt { key: String, detail: String },
}

/// A checkpoint reference, resolvable to a [`ParamMap`].
///
/// The two variants are resolved the same way everywhere: `Params` clones
/// the in-memory map, `Path` loads the JSON checkpoint file. Keys that a
/// caller later filters away (`by_name`) are dropped silently, never an
/// error — checkpoints with partially overlapping parameter sets combine
/// on their intersection.
#[derive(Debug, Clone)]
pub enum CheckpointSource {
    Params(ParamMap),
    Path(PathBuf),
}

impl CheckpointSource {
    /// Resolve this source to a parameter map.
    pub fn resolve(&self) -> Result<ParamMap, CheckpointError> {
        match self {
            CheckpointSource::Params(params) => Ok(params.clone()),
            CheckpointSource::Path(path) => load_checkpoint(path),
        }
    }

    /// Short display name used in progress logs.
    pub fn label(&self) -> String {
        match self {
            CheckpointSource::Params(_) => "<in-memory>".to_string(),
            CheckpointSource::Path(path) => path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| path.display().to_string()),
        }
    }
}

impl From<ParamMap> for CheckpointSource {
    fn from(params: ParamMap) -> Self {
        CheckpointSource::Params(params)
    }
}

impl From<PathBuf> for CheckpointSource {
    fn from(path: PathBuf) -> Self {
        CheckpointSource::Path(path)
    }
}

/// One parameter in the JSON checkpoint file.
#[derive(Debug, Serialize, Deserialize)]
struct ParamRecord {
    dtype: String,
    shape: Vec<usize>,
    values: Vec<f64>,
}

/// Load a [`ParamMap`] from a JSON checkpoint file.
pub fn load_checkpoint(path: &Path) -> Result<ParamMap, CheckpointError> {
    let contents = std::fs::read_to_string(path).map_err(|source| CheckpointError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let records: BTreeMap<String, ParamRecord> =
        serde_json::from_str(&contents).map_err(|source| CheckpointError::Malformed {
            path: path.to_path_buf(),
            source,
        })?;

    let mut params = ParamMap::with_capacity(records.len());
    for (key, record) in records {
        let dtype = parse_dtype(&record.dtype).ok_or_else(|| CheckpointError::UnsupportedDtype {
            key: key.clone(),
            dtype: record.dtype.clone(),
        })?;
        if record.values.len() != record.shape.iter().product::<usize>() {
            return Err(CheckpointError::Corrupt {
                key,
                detail: format!(
                    "{} values for shape {:?}",
                    record.values.len(),
                    record.shape
                ),
            });
        }
        let data = data_from_f64(&key, record.values, record.shape, dtype)?;
        params.insert(key, data);
    }
    tracing::debug!(path = %path.display(), params = params.len(), "Loaded checkpoint");
    Ok(params)
}

/// Save a [`ParamMap`] to a JSON checkpoint file, keys sorted.
pub fn save_checkpoint(path: &Path, params: &ParamMap) -> Result<(), CheckpointError> {
    let mut records = BTreeMap::new();
    for (key, data) in params {
        let record = ParamRecord {
            dtype: dtype_tag(key, data.dtype)?.to_string(),
            shape: data.shape.clone(),
            values: values_f64(key, data)?,
        };
        records.insert(key.clone(), record);
    }
    let file = std::fs::File::create(path).map_err(|source| CheckpointError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::to_writer(file, &records).map_err(|source| CheckpointError::Malformed {
        path: path.to_path_buf(),
        source,
    })?;
    tracing::debug!(path = %path.display(), params = records.len(), "Saved checkpoint");
    Ok(())
}

/// Extract a tensor's elements as f64, for any supported dtype.
pub fn values_f64(key: &str, data: &TensorData) -> Result<Vec<f64>, CheckpointError> {
    fn extract<E: burn::tensor::Element>(
        key: &str,
        data: &TensorData,
        cast: impl Fn(E) -> f64,
    ) -> Result<Vec<f64>, CheckpointError> {
        data.to_vec::<E>()
            .map_err(|e| CheckpointError::Corrupt {
                key: key.to_string(),
                detail: format!("{e:?}"),
            })
            .map(|v| v.into_iter().map(cast).collect())
    }

    match data.dtype {
        DType::F64 => extract::<f64>(key, data, |v| v),
        DType::F32 => extract::<f32>(key, data, |v| v as f64),
        DType::I64 => extract::<i64>(key, data, |v| v as f64),
        DType::I32 => extract::<i32>(key, data, |v| v as f64),
        DType::U32 => extract::<u32>(key, data, |v| v as f64),
        DType::U8 => extract::<u8>(key, data, |v| v as f64),
        other => Err(CheckpointError::UnsupportedDtype {
            key: key.to_string(),
            dtype: format!("{other:?}"),
        }),
    }
}

/// Build a tensor of the given dtype from f64 elements.
///
/// Values are cast with `as`, which truncates toward zero for integer
/// dtypes — the same convention as casting an averaged float tensor back
/// to its integer storage dtype.
pub fn data_from_f64(
    key: &str,
    values: Vec<f64>,
    shape: Vec<usize>,
    dtype: DType,
) -> Result<TensorData, CheckpointError> {
    let data = match dtype {
        DType::F64 => TensorData::new(values, shape),
        DType::F32 => TensorData::new(values.into_iter().map(|v| v as f32).collect::<Vec<_>>(), shape),
        DType::I64 => TensorData::new(values.into_iter().map(|v| v as i64).collect::<Vec<_>>(), shape),
        DType::I32 => TensorData::new(values.into_iter().map(|v| v as i32).collect::<Vec<_>>(), shape),
        DType::U32 => TensorData::new(values.into_iter().map(|v| v as u32).collect::<Vec<_>>(), shape),
        DType::U8 => TensorData::new(values.into_iter().map(|v| v as u8).collect::<Vec<_>>(), shape),
        other => {
            return Err(CheckpointError::UnsupportedDtype {
                key: key.to_string(),
                dtype: format!("{other:?}"),
            })
        }
    };
    Ok(data)
}

fn dtype_tag(key: &str, dtype: DType) -> Result<&'static str, CheckpointError> {
    match dtype {
        DType::F64 => Ok("f64"),
        DType::F32 => Ok("f32"),
        DType::I64 => Ok("i64"),
        DType::I32 => Ok("i32"),
        DType::U32 => Ok("u32"),
        DType::U8 => Ok("u8"),
        other => Err(CheckpointError::UnsupportedDtype {
            key: key.to_string(),
            dtype: format!("{other:?}"),
        }),
    }
}

fn parse_dtype(tag: &str) -> Option<DType> {
    match tag {
        "f64" => Some(DType::F64),
        "f32" => Some(DType::F32),
        "i64" => Some(DType::I64),
        "i32" => Some(DType::I32),
        "u32" => Some(DType::U32),
        "u8" => Some(DType::U8),
        _ => None,
    }
}
