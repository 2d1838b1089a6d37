use anyhow::{Context, Result};
use log::{debug, warn};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};

use crate::config::ConflictPolicy;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DispatchAction {
    Moved,
    Copied,
    Skipped,
    Errored,
}

/// What happened to one probe file.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DispatchOutcome {
    pub source: PathBuf,
    pub destination: Option<PathBuf>,
    pub action: DispatchAction,
    pub label: Option<String>,
    pub distance: Option<f32>,
    pub detail: Option<String>,
}

impl DispatchOutcome {
    /// File left where it was.
    pub fn left_in_place(
        source: &Path,
        action: DispatchAction,
        detail: impl Into<String>,
    ) -> Self {
        Self {
            source: source.to_path_buf(),
            destination: None,
            action,
            label: None,
            distance: None,
            detail: Some(detail.into()),
        }
    }
}

/// A photo with several faces may belong to several people, so it is copied;
/// a single-face photo has exactly one owner and is moved.
pub fn action_for(face_count: usize) -> DispatchAction {
    if face_count > 1 {
        DispatchAction::Copied
    } else {
        DispatchAction::Moved
    }
}

/// Places matched probe files under `output_root/<label>/`.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    output_root: PathBuf,
    on_conflict: ConflictPolicy,
}

impl Dispatcher {
    pub fn new(output_root: impl Into<PathBuf>, on_conflict: ConflictPolicy) -> Self {
        Self {
            output_root: output_root.into(),
            on_conflict,
        }
    }

    pub fn destination(&self, source: &Path, label: &str) -> Option<PathBuf> {
        source
            .file_name()
            .map(|name| self.output_root.join(label).join(name))
    }

    /// Move or copy `source` into the folder of `label`. Never fails: filesystem
    /// errors come back as an [`DispatchAction::Errored`] outcome and the source
    /// is kept.
    pub fn dispatch(
        &self,
        source: &Path,
        label: &str,
        distance: f32,
        face_count: usize,
    ) -> DispatchOutcome {
        let mut outcome = DispatchOutcome {
            source: source.to_path_buf(),
            destination: None,
            action: DispatchAction::Errored,
            label: Some(label.to_string()),
            distance: Some(distance),
            detail: None,
        };

        let Some(dest) = self.destination(source, label) else {
            outcome.detail = Some("source has no file name".to_string());
            return outcome;
        };
        outcome.destination = Some(dest.clone());

        if is_same_file(source, &dest) {
            outcome.action = DispatchAction::Skipped;
            outcome.detail = Some(format!("{} is already in place", dest.display()));
            return outcome;
        }

        if dest.exists() && self.on_conflict == ConflictPolicy::Skip {
            outcome.action = DispatchAction::Skipped;
            outcome.detail = Some(format!("{} already exists", dest.display()));
            return outcome;
        }

        let action = action_for(face_count);
        let result = match action {
            DispatchAction::Copied => copy_into(source, &dest),
            _ => move_into(source, &dest),
        };
        match result {
            Ok(()) => outcome.action = action,
            Err(e) => {
                warn!("Could not place {}: {:#}", source.display(), e);
                outcome.detail = Some(format!("{:#}", e));
            }
        }
        outcome
    }
}

/// Copying a file onto itself truncates it before reading, so this must be
/// checked before any copy or rename.
fn is_same_file(source: &Path, dest: &Path) -> bool {
    match (fs::canonicalize(source), fs::canonicalize(dest)) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

fn ensure_parent(dest: &Path) -> Result<()> {
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent).with_context(|| format!("creating {}", parent.display()))?;
    }
    Ok(())
}

fn copy_into(source: &Path, dest: &Path) -> Result<()> {
    ensure_parent(dest)?;
    fs::copy(source, dest)
        .with_context(|| format!("copying {} to {}", source.display(), dest.display()))?;
    Ok(())
}

fn move_into(source: &Path, dest: &Path) -> Result<()> {
    ensure_parent(dest)?;
    if let Err(e) = fs::rename(source, dest) {
        // rename cannot cross filesystems; fall back to copy, then delete
        debug!(
            "rename {} -> {} failed ({}), copying instead",
            source.display(),
            dest.display(),
            e
        );
        fs::copy(source, dest)
            .with_context(|| format!("copying {} to {}", source.display(), dest.display()))?;
        fs::remove_file(source)
            .with_context(|| format!("removing {} after copy", source.display()))?;
    }
    Ok(())
}
