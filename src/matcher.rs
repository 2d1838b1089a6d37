use crate::catalog::IdentityCatalog;
use facesort_vision::Embedding;

/// Distance reported when a comparison is undefined (zero vector, mismatched
/// dimensions). Never below any usable threshold.
pub const MAX_DISTANCE: f32 = f32::MAX;

/// Best identity for one probe face.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchResult {
    pub label: String,
    pub distance: f32,
}

/// `1 - cos(a, b)`, in [0, 2] for nonzero vectors.
pub fn cosine_distance(a: &Embedding, b: &Embedding) -> f32 {
    if a.dim() != b.dim() {
        return MAX_DISTANCE;
    }

    let (mut dot, mut na, mut nb) = (0.0f64, 0.0f64, 0.0f64);
    for (&x, &y) in a.vector.iter().zip(b.vector.iter()) {
        let (x, y) = (x as f64, y as f64);
        dot += x * y;
        na += x * x;
        nb += y * y;
    }
    if na == 0.0 || nb == 0.0 {
        return MAX_DISTANCE;
    }

    (1.0 - dot / (na.sqrt() * nb.sqrt())).clamp(0.0, 2.0) as f32
}

/// Closest identity by cosine distance, no threshold applied. Ties go to the
/// label that sorts first. `None` only when the catalog is empty.
pub fn best_match(probe: &Embedding, catalog: &IdentityCatalog) -> Option<MatchResult> {
    let mut best: Option<MatchResult> = None;
    for identity in catalog.iter() {
        let distance = cosine_distance(probe, &identity.centroid);
        if best.as_ref().map_or(true, |b| distance < b.distance) {
            best = Some(MatchResult {
                label: identity.label.clone(),
                distance,
            });
        }
    }
    best
}

pub fn is_match(distance: f32, threshold: f32) -> bool {
    distance < threshold
}

impl MatchResult {
    pub fn accepted(&self, threshold: f32) -> bool {
        is_match(self.distance, threshold)
    }
}
