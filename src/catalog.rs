use anyhow::{Context, Result};
use facesort_vision::{Embedding, EmbeddingSource};
use log::{debug, info, warn};
use ndarray::Axis;
use std::collections::BTreeMap;
use std::path::Path;

use crate::storage;

/// A reference identity: its label and the mean of its reference embeddings.
#[derive(Debug, Clone, PartialEq)]
pub struct Identity {
    pub label: String,
    pub centroid: Embedding,
    pub image_count: usize,
}

/// Label -> identity, iterated in label order. Built once, then read-only.
#[derive(Debug, Clone, Default)]
pub struct IdentityCatalog {
    identities: BTreeMap<String, Identity>,
}

impl IdentityCatalog {
    pub fn len(&self) -> usize {
        self.identities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.identities.is_empty()
    }

    pub fn get(&self, label: &str) -> Option<&Identity> {
        self.identities.get(label)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Identity> {
        self.identities.values()
    }
}

/// Element-wise mean. `None` for an empty slice or mixed dimensions.
pub fn centroid(embeddings: &[Embedding]) -> Option<Embedding> {
    let views: Vec<_> = embeddings.iter().map(|e| e.vector.view()).collect();
    let stacked = ndarray::stack(Axis(0), &views).ok()?;
    stacked
        .mean_axis(Axis(0))
        .map(|vector| Embedding { vector })
}

/// Collects reference embeddings per label and turns them into a catalog.
#[derive(Debug, Default)]
pub struct CatalogBuilder {
    embeddings: BTreeMap<String, Vec<Embedding>>,
}

impl CatalogBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a label so it is reported even if none of its photos yield a face.
    pub fn declare(&mut self, label: &str) {
        self.embeddings.entry(label.to_string()).or_default();
    }

    /// Add one embedding. Rejected when its dimension differs from the
    /// label's earlier embeddings.
    pub fn add(&mut self, label: &str, embedding: Embedding) -> bool {
        let list = self.embeddings.entry(label.to_string()).or_default();
        if let Some(first) = list.first() {
            if first.dim() != embedding.dim() {
                warn!(
                    "Embedding for {} has dimension {}, expected {}; ignored",
                    label,
                    embedding.dim(),
                    first.dim()
                );
                return false;
            }
        }
        list.push(embedding);
        true
    }

    pub fn finish(self) -> IdentityCatalog {
        let mut identities = BTreeMap::new();
        for (label, list) in self.embeddings {
            match centroid(&list) {
                Some(centroid) => {
                    identities.insert(
                        label.clone(),
                        Identity {
                            label,
                            centroid,
                            image_count: list.len(),
                        },
                    );
                }
                None => warn!("No usable reference photo for {}; identity left out", label),
            }
        }
        IdentityCatalog { identities }
    }
}

/// Embedding of the first face in a reference photo, `None` if it has no face.
pub fn reference_embedding<S>(source: &mut S, path: &Path) -> Result<Option<Embedding>>
where
    S: EmbeddingSource + ?Sized,
{
    let img = image::open(path).with_context(|| format!("decoding {}", path.display()))?;
    let faces = source.detect_faces(&img)?;
    let Some(first) = faces.first() else {
        return Ok(None);
    };
    if faces.len() > 1 {
        debug!(
            "{} faces in {}, using the first",
            faces.len(),
            path.display()
        );
    }
    source.embed_detection(&img, first).map(Some)
}

fn ingest<S>(source: &mut S, builder: &mut CatalogBuilder, label: &str, path: &Path)
where
    S: EmbeddingSource + ?Sized,
{
    match reference_embedding(source, path) {
        Ok(Some(embedding)) => {
            if builder.add(label, embedding) {
                info!(
                    "Embedding built for {} ({})",
                    label,
                    storage::display_name(path)
                );
            }
        }
        Ok(None) => warn!("No face detected in {}, skipping", path.display()),
        Err(e) => warn!("Skipping reference {}: {:#}", path.display(), e),
    }
}

/// Build the catalog from a reference folder.
///
/// Each subfolder is one identity named after the folder; every file in it is
/// a reference photo. Files lying directly in `reference_dir` are identities
/// of their own, named by file stem. Photos that cannot be decoded or hold no
/// face are skipped. The result may be empty.
pub fn build_catalog<S>(source: &mut S, reference_dir: &Path) -> Result<IdentityCatalog>
where
    S: EmbeddingSource + ?Sized,
{
    let mut builder = CatalogBuilder::new();

    for dir in storage::list_dirs(reference_dir)? {
        let label = storage::display_name(&dir);
        builder.declare(&label);
        let files = match storage::list_files(&dir) {
            Ok(files) => files,
            Err(e) => {
                warn!("Skipping identity {}: {:#}", label, e);
                continue;
            }
        };
        for path in files {
            ingest(source, &mut builder, &label, &path);
        }
    }

    for path in storage::list_files(reference_dir)? {
        let Some(label) = path.file_stem().map(|s| s.to_string_lossy().into_owned()) else {
            continue;
        };
        builder.declare(&label);
        ingest(source, &mut builder, &label, &path);
    }

    let catalog = builder.finish();
    info!(
        "Reference catalog: {} identities from {}",
        catalog.len(),
        reference_dir.display()
    );
    Ok(catalog)
}
