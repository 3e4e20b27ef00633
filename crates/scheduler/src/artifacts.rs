//! Artifact collection for completed workflows.
//!
//! The engine leaves image files on local disk and reports them as
//! `{filename, subfolder, type}` references inside node outputs. This
//! module resolves those references, reads the files, and inlines them
//! base64-encoded for transport. The raw node outputs pass through
//! untouched so the center always sees what the engine reported.

use std::collections::BTreeMap;
use std::path::PathBuf;

use base64::{Engine as _, engine::general_purpose::STANDARD};
use serde::Serialize;

use crate::aggregator::AggregatedResult;

/// Maps an engine file reference to a local path.
pub trait ArtifactStore: Send + Sync {
    /// Path for a reported file, relative to the store's root.
    fn resolve(&self, subfolder: Option<&str>, filename: &str) -> PathBuf;
}

/// Production store rooted at the engine's output directory.
pub struct OutputDir {
    root: PathBuf,
}

impl OutputDir {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl ArtifactStore for OutputDir {
    fn resolve(&self, subfolder: Option<&str>, filename: &str) -> PathBuf {
        let mut path = self.root.clone();
        if let Some(subfolder) = subfolder {
            if !subfolder.is_empty() {
                path.push(subfolder);
            }
        }
        path.push(filename);
        path
    }
}

/// One engine-produced image, inlined for transport.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImageArtifact {
    /// Base64-encoded file contents.
    pub data: String,
    pub filename: String,
    /// Node that produced the file.
    pub node_id: String,
    /// The engine's artifact class (`output`, `temp`, ...).
    #[serde(rename = "type")]
    pub kind: String,
}

/// Submission payload for a completed task.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ProcessedOutput {
    pub images: Vec<ImageArtifact>,
    /// Raw per-node outputs exactly as the engine reported them.
    pub node_outputs: BTreeMap<String, serde_json::Value>,
}

/// Inline every image reference in `result` that resolves to a
/// readable file.
///
/// Missing or unreadable files are logged and skipped; artifact
/// collection never fails the task.
pub async fn collect_artifacts(
    store: &dyn ArtifactStore,
    result: &AggregatedResult,
) -> ProcessedOutput {
    let mut output = ProcessedOutput {
        images: Vec::new(),
        node_outputs: result.node_outputs.clone(),
    };

    for (node_id, node_output) in &result.node_outputs {
        let Some(images) = node_output.get("images").and_then(|v| v.as_array()) else {
            continue;
        };
        for image in images {
            let Some(filename) = image.get("filename").and_then(|v| v.as_str()) else {
                tracing::warn!(node_id = %node_id, "Image reference without filename, skipping");
                continue;
            };
            let subfolder = image.get("subfolder").and_then(|v| v.as_str());
            let kind = image
                .get("type")
                .and_then(|v| v.as_str())
                .unwrap_or("output");

            let path = store.resolve(subfolder, filename);
            match tokio::fs::read(&path).await {
                Ok(bytes) => {
                    output.images.push(ImageArtifact {
                        data: STANDARD.encode(&bytes),
                        filename: filename.to_string(),
                        node_id: node_id.clone(),
                        kind: kind.to_string(),
                    });
                }
                Err(e) => {
                    tracing::warn!(
                        path = %path.display(),
                        error = %e,
                        "Reported artifact not readable, skipping",
                    );
                }
            }
        }
    }

    tracing::debug!(images = output.images.len(), "Artifacts collected");
    output
}
