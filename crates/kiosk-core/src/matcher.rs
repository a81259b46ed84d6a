//! Template matcher.
//!
//! Scores a candidate signature against every stored signature with two
//! normalized correlations evaluated at the single full-overlap alignment,
//! and accepts the best identity when the averaged score clears a fixed
//! threshold.

use crate::signature::Signature;
use crate::store::SignatureStore;
use crate::types::MatchResult;
use image::imageops::{self, FilterType};
use image::GrayImage;

/// Averaged correlation a match must strictly exceed. Fixed, not configurable.
pub const ACCEPT_THRESHOLD: f32 = 0.65;

/// Energy below which a patch counts as flat.
const FLAT_EPSILON: f64 = 1e-9;

/// Strategy for matching a candidate face against the gallery.
pub trait Matcher {
    fn best_match(&self, candidate: &Signature, gallery: &SignatureStore) -> MatchResult;
}

/// Classical template-correlation matcher.
pub struct TemplateMatcher;

impl Matcher for TemplateMatcher {
    fn best_match(&self, candidate: &Signature, gallery: &SignatureStore) -> MatchResult {
        let mut best_score = 0.0f32;
        let mut best_id: Option<&str> = None;

        for (employee_id, signature) in gallery.iter() {
            let score = template_score(candidate.as_image(), signature.as_image());
            if score > best_score {
                best_score = score;
                best_id = Some(employee_id);
            }
        }

        match best_id {
            Some(id) if best_score > ACCEPT_THRESHOLD => MatchResult {
                employee_id: Some(id.to_string()),
                score: best_score,
            },
            _ => MatchResult::no_match(best_score),
        }
    }
}

/// Mean of the correlation coefficient and the normalized cross-correlation
/// between `candidate` and `reference`.
///
/// `reference` is resized to the candidate's dimensions when they differ.
pub fn template_score(candidate: &GrayImage, reference: &GrayImage) -> f32 {
    let resized;
    let reference = if reference.dimensions() != candidate.dimensions() {
        let (w, h) = candidate.dimensions();
        resized = imageops::resize(reference, w, h, FilterType::Triangle);
        &resized
    } else {
        reference
    };

    let a = candidate.as_raw();
    let b = reference.as_raw();
    ((correlation_coefficient(a, b) + cross_correlation(a, b)) / 2.0) as f32
}

/// Zero-mean normalized correlation in [-1, 1].
///
/// Two flat patches correlate perfectly; one flat patch does not correlate.
pub fn correlation_coefficient(a: &[u8], b: &[u8]) -> f64 {
    let n = a.len().min(b.len());
    if n == 0 {
        return 0.0;
    }

    let mean_a = a[..n].iter().map(|&v| v as f64).sum::<f64>() / n as f64;
    let mean_b = b[..n].iter().map(|&v| v as f64).sum::<f64>() / n as f64;

    let mut dot = 0.0f64;
    let mut var_a = 0.0f64;
    let mut var_b = 0.0f64;
    for (&pa, &pb) in a[..n].iter().zip(&b[..n]) {
        let da = pa as f64 - mean_a;
        let db = pb as f64 - mean_b;
        dot += da * db;
        var_a += da * da;
        var_b += db * db;
    }

    normalize(dot, var_a, var_b)
}

/// Normalized cross-correlation of raw intensities in [0, 1].
pub fn cross_correlation(a: &[u8], b: &[u8]) -> f64 {
    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (&pa, &pb) in a.iter().zip(b) {
        let (fa, fb) = (pa as f64, pb as f64);
        dot += fa * fb;
        norm_a += fa * fa;
        norm_b += fb * fb;
    }

    normalize(dot, norm_a, norm_b)
}

fn normalize(dot: f64, energy_a: f64, energy_b: f64) -> f64 {
    match (energy_a < FLAT_EPSILON, energy_b < FLAT_EPSILON) {
        (true, true) => 1.0,
        (true, false) | (false, true) => 0.0,
        (false, false) => (dot / (energy_a.sqrt() * energy_b.sqrt())).clamp(-1.0, 1.0),
    }
}
