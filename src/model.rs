//! Model artifacts and class labels.
//!
//! The model is an opaque byte blob plus the tensor shapes the pipeline needs
//! to build inputs and decode outputs. Labels come either from a JSON class
//! list or a plain text file with one label per line.

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::path::Path;

use crate::detect::OutputLayout;

/// Trained model blob with tensor shape metadata.
#[derive(Clone, Debug)]
pub struct ModelArtifact {
    bytes: Vec<u8>,
    /// NHWC input shape, `[1, S, S, 3]`.
    pub input_shape: Vec<usize>,
    /// Output shape, `[1, N, 5 + C]`.
    pub output_shape: Vec<usize>,
}

impl ModelArtifact {
    pub fn new(bytes: Vec<u8>, input_shape: Vec<usize>, output_shape: Vec<usize>) -> Result<Self> {
        if input_shape.len() != 4 || input_shape[1] == 0 || input_shape[1] != input_shape[2] {
            return Err(anyhow!(
                "model input shape must be [1, S, S, 3], got {:?}",
                input_shape
            ));
        }
        if input_shape[3] != 3 {
            return Err(anyhow!(
                "model input must have 3 channels, got {}",
                input_shape[3]
            ));
        }
        match output_shape.last() {
            Some(&stride) if stride >= 5 => {}
            _ => {
                return Err(anyhow!(
                    "model output shape must end in 5 + classes, got {:?}",
                    output_shape
                ))
            }
        }
        Ok(Self {
            bytes,
            input_shape,
            output_shape,
        })
    }

    /// Read a model file from disk.
    pub fn from_path<P: AsRef<Path>>(
        path: P,
        input_shape: Vec<usize>,
        output_shape: Vec<usize>,
    ) -> Result<Self> {
        let path = path.as_ref();
        let bytes = std::fs::read(path)
            .with_context(|| format!("failed to read model from {}", path.display()))?;
        if bytes.is_empty() {
            return Err(anyhow!("model file {} is empty", path.display()));
        }
        Self::new(bytes, input_shape, output_shape)
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Square input edge length `S`.
    pub fn input_size(&self) -> u32 {
        self.input_shape[1] as u32
    }

    /// Decoder layout derived from the output shape.
    pub fn output_layout(&self) -> OutputLayout {
        let stride = self.output_shape.last().copied().unwrap_or(5);
        let slots: usize = self.output_shape[..self.output_shape.len() - 1]
            .iter()
            .product();
        OutputLayout::new(slots, stride.saturating_sub(5))
    }

    /// Hex SHA-256 of the model bytes.
    pub fn fingerprint(&self) -> String {
        hex::encode(Sha256::digest(&self.bytes))
    }
}

#[derive(Debug, Deserialize)]
struct ClassEntry {
    id: Option<u32>,
    name: String,
    #[serde(rename = "displayName")]
    display_name: Option<String>,
}

/// Load class labels from a JSON class list or a text file.
///
/// JSON entries are ordered by `id` (entries without one keep file order
/// after those with one) and use `displayName` when present.
pub fn load_labels<P: AsRef<Path>>(path: P) -> Result<Vec<String>> {
    let path = path.as_ref();
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read labels {}", path.display()))?;
    let is_json = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
    let labels = if is_json {
        parse_class_list(&raw)
            .with_context(|| format!("invalid class list {}", path.display()))?
    } else {
        parse_label_lines(&raw)
    };
    if labels.is_empty() {
        return Err(anyhow!("label file {} has no labels", path.display()));
    }
    Ok(labels)
}

pub fn parse_class_list(raw: &str) -> Result<Vec<String>> {
    let mut entries: Vec<ClassEntry> = serde_json::from_str(raw)?;
    entries.sort_by_key(|entry| entry.id.unwrap_or(u32::MAX));
    Ok(entries
        .into_iter()
        .map(|entry| entry.display_name.unwrap_or(entry.name))
        .collect())
}

pub fn parse_label_lines(raw: &str) -> Vec<String> {
    raw.lines()
        .map(|line| line.trim())
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(|line| line.to_string())
        .collect()
}

/// Model plus its labels, as handed over by the model/label provider.
#[derive(Clone, Debug)]
pub struct ModelBundle {
    pub artifact: ModelArtifact,
    pub labels: Vec<String>,
}
