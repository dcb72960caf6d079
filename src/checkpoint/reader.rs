//! Checkpoint file decoding
//!
//! Checkpoints are `safetensors` files. Nested containers are flattened into
//! dotted key namespaces (`model_state_dict.stem.0.weight`) and side metadata
//! lives in the header's `__metadata__` string map.

use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::io::Read;
use std::path::Path;

use half::{bf16, f16};
use safetensors::tensor::{Dtype, TensorView};
use safetensors::SafeTensors;
use tracing::debug;

use super::tensor::{WeightMap, WeightTensor};
use crate::utils::error::{Error, Result};

/// A decoded but not yet interpreted checkpoint
#[derive(Debug, Clone, Default)]
pub struct RawCheckpoint {
    /// Every float tensor in the file, keyed by its full dotted name
    pub tensors: WeightMap,
    /// Header metadata (`__metadata__`)
    pub metadata: BTreeMap<String, String>,
}

impl RawCheckpoint {
    /// Decode a safetensors blob
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let (_, header) = SafeTensors::read_metadata(bytes)?;
        let metadata: BTreeMap<String, String> = header
            .metadata()
            .as_ref()
            .map(|m| m.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default();

        let safetensors = SafeTensors::deserialize(bytes)?;
        let mut tensors = WeightMap::new();
        let mut skipped = 0usize;
        for (name, view) in safetensors.tensors() {
            match decode_tensor(&view)? {
                Some(tensor) => {
                    tensors.insert(name, tensor);
                }
                None => {
                    debug!("Skipping non-float tensor {} ({:?})", name, view.dtype());
                    skipped += 1;
                }
            }
        }
        if skipped > 0 {
            debug!("Skipped {} non-float tensors", skipped);
        }

        Ok(Self { tensors, metadata })
    }

    /// Read and decode a checkpoint file
    pub fn from_file(path: &Path) -> Result<Self> {
        let bytes = read_file(path)?;
        let raw = Self::from_bytes(&bytes);
        drop(bytes);
        raw
    }

    /// Encode as a safetensors blob with `f32` tensors
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let buffers: Vec<(&String, &Vec<usize>, Vec<u8>)> = self
            .tensors
            .iter()
            .map(|(name, t)| {
                let bytes = t.values.iter().flat_map(|v| v.to_le_bytes()).collect();
                (name, &t.shape, bytes)
            })
            .collect();

        let mut views = Vec::with_capacity(buffers.len());
        for (name, shape, bytes) in &buffers {
            views.push((name.as_str(), TensorView::new(Dtype::F32, shape.to_vec(), bytes)?));
        }

        let metadata: Option<HashMap<String, String>> = if self.metadata.is_empty() {
            None
        } else {
            Some(self.metadata.clone().into_iter().collect())
        };

        Ok(safetensors::serialize(views, &metadata)?)
    }

    /// Encode and write to `path`
    pub fn write_file(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, self.to_bytes()?)?;
        Ok(())
    }
}

/// Read a whole file, reserving the buffer up front so an oversized
/// checkpoint surfaces as `OutOfMemory` instead of aborting the process.
pub fn read_file(path: &Path) -> Result<Vec<u8>> {
    if !path.exists() {
        return Err(Error::NotFound(path.to_path_buf()));
    }
    let mut file = File::open(path)?;
    let len = file.metadata()?.len() as usize;

    let mut bytes = Vec::new();
    bytes.try_reserve_exact(len)?;
    file.read_to_end(&mut bytes)?;
    Ok(bytes)
}

fn decode_tensor(view: &TensorView<'_>) -> Result<Option<WeightTensor>> {
    let data = view.data();
    let count: usize = view.shape().iter().product();

    let mut values = Vec::new();
    values.try_reserve_exact(count)?;

    match view.dtype() {
        Dtype::F32 => values.extend(
            data.chunks_exact(4)
                .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]])),
        ),
        Dtype::F16 => values.extend(
            data.chunks_exact(2)
                .map(|c| f16::from_le_bytes([c[0], c[1]]).to_f32()),
        ),
        Dtype::BF16 => values.extend(
            data.chunks_exact(2)
                .map(|c| bf16::from_le_bytes([c[0], c[1]]).to_f32()),
        ),
        Dtype::F64 => values.extend(data.chunks_exact(8).map(|c| {
            f64::from_le_bytes([c[0], c[1], c[2], c[3], c[4], c[5], c[6], c[7]]) as f32
        })),
        _ => return Ok(None),
    }

    WeightTensor::new(view.shape().to_vec(), values).map(Some)
}
