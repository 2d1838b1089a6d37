use anyhow::{Context, Result};
use facesort_vision::{Detection, EmbeddingSource};
use image::DynamicImage;
use log::{info, warn};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;

use crate::catalog::{self, IdentityCatalog};
use crate::config::ResolvedPaths;
use crate::dispatch::{DispatchAction, DispatchOutcome, Dispatcher};
use crate::error::FatalError;
use crate::matcher::{self, MatchResult};
use crate::storage;

/// Everything that happened during one run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunReport {
    pub identities: usize,
    pub outcomes: Vec<DispatchOutcome>,
}

impl RunReport {
    pub fn count(&self, action: DispatchAction) -> usize {
        self.outcomes.iter().filter(|o| o.action == action).count()
    }

    pub fn summary(&self) -> BTreeMap<&'static str, usize> {
        [
            ("moved", DispatchAction::Moved),
            ("copied", DispatchAction::Copied),
            ("skipped", DispatchAction::Skipped),
            ("errored", DispatchAction::Errored),
        ]
        .into_iter()
        .map(|(name, action)| (name, self.count(action)))
        .collect()
    }
}

/// Check the reference folder and build the catalog from it.
pub fn load_catalog<S>(source: &mut S, reference_dir: &Path) -> Result<IdentityCatalog>
where
    S: EmbeddingSource + ?Sized,
{
    if !reference_dir.is_dir() {
        return Err(FatalError::ReferenceRootMissing(reference_dir.to_path_buf()).into());
    }
    let catalog = catalog::build_catalog(source, reference_dir)?;
    if catalog.is_empty() {
        return Err(FatalError::EmptyCatalog(reference_dir.to_path_buf()).into());
    }
    Ok(catalog)
}

/// Per-face result inside one probe image.
#[derive(Debug, Clone, PartialEq)]
pub enum FaceVerdict {
    Matched(MatchResult),
    Unmatched(MatchResult),
    Failed(String),
}

/// Sorts probe photos against a frozen catalog.
pub struct Triage<'a, S: EmbeddingSource + ?Sized> {
    source: &'a mut S,
    catalog: &'a IdentityCatalog,
    dispatcher: Dispatcher,
    threshold: f32,
}

impl<'a, S: EmbeddingSource + ?Sized> Triage<'a, S> {
    pub fn new(
        source: &'a mut S,
        catalog: &'a IdentityCatalog,
        dispatcher: Dispatcher,
        threshold: f32,
    ) -> Self {
        Self {
            source,
            catalog,
            dispatcher,
            threshold,
        }
    }

    /// Classify every file directly under `probe_root`, in name order.
    pub fn run(&mut self, probe_root: &Path) -> Result<Vec<DispatchOutcome>> {
        let files =
            storage::list_files(probe_root).map_err(|e| FatalError::ProbeRootUnreadable {
                path: probe_root.to_path_buf(),
                reason: format!("{:#}", e),
            })?;
        info!("{} photos to sort in {}", files.len(), probe_root.display());

        Ok(files.iter().map(|path| self.process_file(path)).collect())
    }

    /// Decode, detect and dispatch one probe photo. Never fails; every
    /// problem ends up in the outcome.
    pub fn process_file(&mut self, path: &Path) -> DispatchOutcome {
        let name = storage::display_name(path);
        let img = match image::open(path).with_context(|| format!("decoding {}", name)) {
            Ok(img) => img,
            Err(e) => {
                warn!("Photo {}: {:#}; left in place", name, e);
                return DispatchOutcome::left_in_place(
                    path,
                    DispatchAction::Errored,
                    format!("{:#}", e),
                );
            }
        };
        self.process_image(path, &img)
    }

    pub fn process_image(&mut self, path: &Path, img: &DynamicImage) -> DispatchOutcome {
        let name = storage::display_name(path);
        let faces = match self.source.detect_faces(img) {
            Ok(faces) => faces,
            Err(e) => {
                warn!("Photo {}: {:#}; left in place", name, e);
                return DispatchOutcome::left_in_place(
                    path,
                    DispatchAction::Errored,
                    format!("{:#}", e),
                );
            }
        };
        if faces.is_empty() {
            info!("Photo {}: no face detected", name);
            return DispatchOutcome::left_in_place(
                path,
                DispatchAction::Skipped,
                "no face detected",
            );
        }
        info!("Photo {}: {} face(s) detected", name, faces.len());

        for (idx, face) in faces.iter().enumerate() {
            match self.judge_face(img, face) {
                FaceVerdict::Matched(m) => {
                    info!(
                        "Photo {} face #{}: best = {}, distance = {:.3}",
                        name,
                        idx + 1,
                        m.label,
                        m.distance
                    );
                    let outcome = self
                        .dispatcher
                        .dispatch(path, &m.label, m.distance, faces.len());
                    log_dispatch(&name, &outcome);
                    return outcome;
                }
                FaceVerdict::Unmatched(m) => info!(
                    "Photo {} face #{}: best = {}, distance = {:.3} (no match)",
                    name,
                    idx + 1,
                    m.label,
                    m.distance
                ),
                FaceVerdict::Failed(e) => warn!(
                    "Photo {} face #{}: {}; trying next face",
                    name,
                    idx + 1,
                    e
                ),
            }
        }

        info!("Photo {}: no match, left in place", name);
        DispatchOutcome::left_in_place(path, DispatchAction::Skipped, "no match")
    }

    fn judge_face(&mut self, img: &DynamicImage, face: &Detection) -> FaceVerdict {
        let embedding = match self.source.embed_detection(img, face) {
            Ok(embedding) => embedding,
            Err(e) => return FaceVerdict::Failed(format!("{:#}", e)),
        };
        match matcher::best_match(&embedding, self.catalog) {
            Some(m) if m.accepted(self.threshold) => FaceVerdict::Matched(m),
            Some(m) => FaceVerdict::Unmatched(m),
            None => FaceVerdict::Failed("catalog is empty".to_string()),
        }
    }
}

fn log_dispatch(name: &str, outcome: &DispatchOutcome) {
    let dest = outcome
        .destination
        .as_ref()
        .map(|d| d.display().to_string())
        .unwrap_or_default();
    match outcome.action {
        DispatchAction::Moved => info!(" → Moved {} to {}", name, dest),
        DispatchAction::Copied => info!(" → Copied {} to {}", name, dest),
        DispatchAction::Skipped => warn!(
            " → {} not placed: {}",
            name,
            outcome.detail.as_deref().unwrap_or("skipped")
        ),
        DispatchAction::Errored => warn!(
            "Photo {}: an error occurred, left in place ({})",
            name,
            outcome.detail.as_deref().unwrap_or("unknown error")
        ),
    }
}

/// Full run: catalog from the reference folder, then every probe photo.
pub fn run<S>(
    source: &mut S,
    paths: &ResolvedPaths,
    dispatcher: Dispatcher,
    threshold: f32,
) -> Result<RunReport>
where
    S: EmbeddingSource + ?Sized,
{
    let catalog = load_catalog(source, &paths.reference_dir)?;
    let mut triage = Triage::new(source, &catalog, dispatcher, threshold);
    let outcomes = triage.run(&paths.probe_root)?;

    let report = RunReport {
        identities: catalog.len(),
        outcomes,
    };
    info!("Processing finished: {:?}", report.summary());
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{tests::emb, CatalogBuilder};
    use crate::config::ConflictPolicy;
    use facesort_vision::{Embedding, FaceBox};
    use std::collections::VecDeque;

    /// Hands out scripted detections and embeddings in call order.
    struct Scripted {
        faces: Vec<Detection>,
        embeddings: VecDeque<Result<Embedding>>,
        embed_calls: usize,
    }

    impl Scripted {
        fn new(face_count: usize, embeddings: Vec<Result<Embedding>>) -> Self {
            Self {
                faces: (0..face_count)
                    .map(|i| Detection::from_box(FaceBox::new(i as f32, 0.0, 1.0, 1.0)))
                    .collect(),
                embeddings: embeddings.into(),
                embed_calls: 0,
            }
        }
    }

    impl EmbeddingSource for Scripted {
        fn detect_faces(&mut self, _image: &DynamicImage) -> Result<Vec<Detection>> {
            Ok(self.faces.clone())
        }

        fn embed(&mut self, _face: &DynamicImage) -> Result<Embedding> {
            self.embed_calls += 1;
            self.embeddings
                .pop_front()
                .unwrap_or_else(|| Err(anyhow::anyhow!("no embedding scripted")))
        }
    }

    fn catalog() -> IdentityCatalog {
        let mut builder = CatalogBuilder::new();
        builder.add("alice", emb(&[1.0, 0.0]));
        builder.add("bob", emb(&[0.0, 1.0]));
        builder.finish()
    }

    fn probe(dir: &Path, name: &str) -> std::path::PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, name).unwrap();
        path
    }

    #[test]
    fn test_first_match_wins_and_stops() {
        let dir = tempfile::tempdir().unwrap();
        let src = probe(dir.path(), "group.jpg");
        let catalog = catalog();
        let mut source = Scripted::new(
            3,
            vec![
                Ok(emb(&[-1.0, 0.0])),
                Ok(emb(&[1.0, 0.1])),
                Ok(emb(&[0.0, 1.0])),
            ],
        );
        let dispatcher = Dispatcher::new(dir.path().join("out"), ConflictPolicy::Overwrite);
        let mut triage = Triage::new(&mut source, &catalog, dispatcher, 0.45);

        let outcome = triage.process_image(&src, &DynamicImage::new_rgb8(4, 4));

        assert_eq!(outcome.action, DispatchAction::Copied);
        assert_eq!(outcome.label.as_deref(), Some("alice"));
        assert!(src.exists());
        assert!(dir.path().join("out/alice/group.jpg").exists());
        assert!(!dir.path().join("out/bob/group.jpg").exists());
        assert_eq!(source.embed_calls, 2);
    }

    #[test]
    fn test_failed_face_moves_on_to_next() {
        let dir = tempfile::tempdir().unwrap();
        let src = probe(dir.path(), "pair.jpg");
        let catalog = catalog();
        let mut source = Scripted::new(
            2,
            vec![Err(anyhow::anyhow!("encoder crashed")), Ok(emb(&[0.0, 2.0]))],
        );
        let dispatcher = Dispatcher::new(dir.path().join("out"), ConflictPolicy::Overwrite);
        let mut triage = Triage::new(&mut source, &catalog, dispatcher, 0.45);

        let outcome = triage.process_image(&src, &DynamicImage::new_rgb8(4, 4));

        assert_eq!(outcome.action, DispatchAction::Copied);
        assert_eq!(outcome.label.as_deref(), Some("bob"));
    }

    #[test]
    fn test_all_faces_fail_leaves_file() {
        let dir = tempfile::tempdir().unwrap();
        let src = probe(dir.path(), "broken.jpg");
        let catalog = catalog();
        let mut source = Scripted::new(1, vec![Err(anyhow::anyhow!("bad crop"))]);
        let dispatcher = Dispatcher::new(dir.path().join("out"), ConflictPolicy::Overwrite);
        let mut triage = Triage::new(&mut source, &catalog, dispatcher, 0.45);

        let outcome = triage.process_image(&src, &DynamicImage::new_rgb8(4, 4));

        assert_eq!(outcome.action, DispatchAction::Skipped);
        assert_eq!(outcome.detail.as_deref(), Some("no match"));
        assert!(src.exists());
        assert!(!dir.path().join("out").exists());
    }

    #[test]
    fn test_no_face_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let src = probe(dir.path(), "landscape.jpg");
        let catalog = catalog();
        let mut source = Scripted::new(0, vec![]);
        let dispatcher = Dispatcher::new(dir.path().join("out"), ConflictPolicy::Overwrite);
        let mut triage = Triage::new(&mut source, &catalog, dispatcher, 0.45);

        let outcome = triage.process_image(&src, &DynamicImage::new_rgb8(4, 4));

        assert_eq!(outcome.action, DispatchAction::Skipped);
        assert_eq!(outcome.detail.as_deref(), Some("no face detected"));
        assert_eq!(source.embed_calls, 0);
    }

    #[test]
    fn test_undecodable_probe_is_errored() {
        let dir = tempfile::tempdir().unwrap();
        let src = probe(dir.path(), "corrupt.jpg");
        let catalog = catalog();
        let mut source = Scripted::new(1, vec![]);
        let dispatcher = Dispatcher::new(dir.path().join("out"), ConflictPolicy::Overwrite);
        let mut triage = Triage::new(&mut source, &catalog, dispatcher, 0.45);

        let outcome = triage.process_file(&src);

        assert_eq!(outcome.action, DispatchAction::Errored);
        assert!(src.exists());
    }

    #[test]
    fn test_missing_reference_dir_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let mut source = Scripted::new(1, vec![]);
        let err = load_catalog(&mut source, &dir.path().join("3A")).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<FatalError>(),
            Some(FatalError::ReferenceRootMissing(_))
        ));
    }

    #[test]
    fn test_empty_reference_dir_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let mut source = Scripted::new(1, vec![]);
        let err = load_catalog(&mut source, dir.path()).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<FatalError>(),
            Some(FatalError::EmptyCatalog(_))
        ));
    }

    #[test]
    fn test_report_summary() {
        let report = RunReport {
            identities: 2,
            outcomes: vec![
                DispatchOutcome::left_in_place(Path::new("a"), DispatchAction::Skipped, "no match"),
                DispatchOutcome::left_in_place(Path::new("b"), DispatchAction::Errored, "boom"),
                DispatchOutcome::left_in_place(
                    Path::new("c"),
                    DispatchAction::Skipped,
                    "no face detected",
                ),
            ],
        };
        let summary = report.summary();
        assert_eq!(summary["skipped"], 2);
        assert_eq!(summary["errored"], 1);
        assert_eq!(summary["moved"], 0);
    }
}
