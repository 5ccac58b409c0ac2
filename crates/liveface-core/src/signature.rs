//! Geometric face signature extraction.
//!
//! A signature is a fixed-length vector of scale-invariant facial geometry
//! ratios, using the inter-pupillary distance (IPD) as the scale reference.
//! It is far coarser than a learned embedding, but needs no model, works on
//! any landmark detector, and is stable enough for same-person verification
//! against reference photos.
//!
//! The vector is L2-normalized; extraction fails on degenerate geometry
//! rather than ever producing a zero vector.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::observation::{centroid, x_extent, y_extent, Landmarks, Point, MIN_DENOMINATOR};

/// Signature vector length.
pub const SIGNATURE_DIM: usize = 30;

#[derive(Error, Debug)]
pub enum SignatureError {
    #[error("missing landmark group: {0}")]
    MissingLandmarks(&'static str),
    #[error("degenerate face geometry produced a zero feature vector")]
    DegenerateGeometry,
}

/// L2-normalized geometric feature vector for one face.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signature {
    pub values: Vec<f32>,
}

impl Signature {
    pub fn norm(&self) -> f32 {
        self.values.iter().map(|v| v * v).sum::<f32>().sqrt()
    }
}

/// Extract a [`Signature`] from one frame's landmark set.
///
/// Eyes, nose, outer lips, and face contour are required; eyebrows are
/// optional and their three features are zero-filled when absent.
pub fn extract_signature(lm: &Landmarks) -> Result<Signature, SignatureError> {
    let left_eye_c =
        centroid(&lm.left_eye).ok_or(SignatureError::MissingLandmarks("left eye"))?;
    let right_eye_c =
        centroid(&lm.right_eye).ok_or(SignatureError::MissingLandmarks("right eye"))?;
    let nose_c = centroid(&lm.nose).ok_or(SignatureError::MissingLandmarks("nose"))?;
    let mouth_c =
        centroid(&lm.outer_lips).ok_or(SignatureError::MissingLandmarks("outer lips"))?;
    if lm.face_contour.len() < 3 {
        return Err(SignatureError::MissingLandmarks("face contour"));
    }
    let face_c =
        centroid(&lm.face_contour).ok_or(SignatureError::MissingLandmarks("face contour"))?;

    let eye_mid = left_eye_c.midpoint(&right_eye_c);
    // Raw IPD as numerator; floored copy wherever it divides
    let ipd = left_eye_c.distance(&right_eye_c);
    let scale = ipd.max(MIN_DENOMINATOR);
    let face_width = x_extent(&lm.face_contour).max(MIN_DENOMINATOR);
    let face_height = y_extent(&lm.face_contour);

    let mut features = Vec::with_capacity(SIGNATURE_DIM);

    // Distance ratios, IPD-scaled
    features.push(ipd / face_width);
    features.push(ipd / face_height.max(MIN_DENOMINATOR));
    features.push(face_height / face_width);
    features.push(eye_mid.distance(&nose_c) / scale);
    features.push(nose_c.distance(&mouth_c) / scale);
    features.push(eye_mid.distance(&mouth_c) / scale);
    features.push(left_eye_c.distance(&nose_c) / scale);
    features.push(right_eye_c.distance(&nose_c) / scale);
    features.push(left_eye_c.distance(&mouth_c) / scale);
    features.push(right_eye_c.distance(&mouth_c) / scale);

    // Shape ratios
    features.push(y_extent(&lm.left_eye) / x_extent(&lm.left_eye).max(MIN_DENOMINATOR));
    features.push(y_extent(&lm.right_eye) / x_extent(&lm.right_eye).max(MIN_DENOMINATOR));
    features.push(y_extent(&lm.nose) / scale);
    features.push(x_extent(&lm.outer_lips) / scale);
    features.push(y_extent(&lm.outer_lips) / scale);

    // Angular features
    features.push(left_eye_c.angle_to(&right_eye_c));
    features.push(eye_mid.angle_to(&nose_c));
    features.push(nose_c.angle_to(&mouth_c));

    // Eyebrow features: zero-filled triple when either brow is absent
    match (centroid(&lm.left_brow), centroid(&lm.right_brow)) {
        (Some(lb), Some(rb)) => {
            features.push(lb.distance(&left_eye_c) / scale);
            features.push(rb.distance(&right_eye_c) / scale);
            features.push(lb.angle_to(&rb));
        }
        _ => features.extend_from_slice(&[0.0, 0.0, 0.0]),
    }

    // Jaw-width ratios from the middle and lower thirds of the contour
    let (middle_width, lower_width) = jaw_widths(&lm.face_contour);
    features.push(middle_width / scale);
    features.push(lower_width / scale);
    features.push(lower_width / middle_width.max(MIN_DENOMINATOR));

    // Normalized offsets of feature centers from the face centroid
    for p in [&eye_mid, &nose_c, &mouth_c] {
        features.push((p.x - face_c.x) / scale);
        features.push((p.y - face_c.y) / scale);
    }

    debug_assert_eq!(features.len(), SIGNATURE_DIM);

    let norm = features.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm <= 0.0 || !norm.is_finite() {
        return Err(SignatureError::DegenerateGeometry);
    }
    for v in &mut features {
        *v /= norm;
    }

    Ok(Signature { values: features })
}

/// Horizontal widths of the middle and lower vertical thirds of the face
/// contour, sorted by y (image coordinates grow downward, so the lower third
/// is the jaw).
fn jaw_widths(contour: &[Point]) -> (f32, f32) {
    let mut sorted: Vec<Point> = contour.to_vec();
    sorted.sort_by(|a, b| a.y.total_cmp(&b.y));
    let n = sorted.len();
    let middle = &sorted[n / 3..(2 * n) / 3];
    let lower = &sorted[(2 * n) / 3..];
    (x_extent(middle), x_extent(lower))
}
