//! Reference-photo matching.
//!
//! After capture completes, the probe signature (best-quality center capture)
//! is compared against signatures extracted from the user's stored profile
//! photos. Photos are fetched over the network under a per-request timeout
//! and a total deadline; per-photo failures are aggregated into category
//! counters and collapsed into the single most actionable diagnostic rather
//! than surfaced individually.

use std::io::Read;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use thiserror::Error;

use liveface_core::matcher::compare_signatures;
use liveface_core::observation::FrameObservation;
use liveface_core::signature::{extract_signature, Signature};

use crate::config::Config;
use crate::session::{ConfidenceTier, FailureReason};

/// Similarity below which a failed match is reported as a different person
/// rather than a low-confidence capture.
pub const DIFFERENT_PERSON_CEILING: f32 = 0.5;

#[derive(Error, Debug)]
#[error("profile photo lookup failed: {0}")]
pub struct PhotoSourceError(pub String);

#[derive(Error, Debug)]
#[error("download failed: {0}")]
pub struct FetchError(pub String);

#[derive(Error, Debug)]
#[error("face analysis failed: {0}")]
pub struct AnalyzerError(pub String);

/// Source of a user's stored reference photo URLs.
pub trait ProfilePhotoSource: Send + Sync {
    fn profile_photos(&self, user_id: &str) -> Result<Vec<String>, PhotoSourceError>;
}

/// Byte-level image download.
pub trait ImageFetcher: Send + Sync {
    fn download(&self, url: &str, timeout: Duration) -> Result<Vec<u8>, FetchError>;
}

/// External face-landmark detection over a decoded image. Implementations
/// report the largest detected face, or `None` when no face is found.
pub trait FaceAnalyzer: Send + Sync {
    fn detect_face(&self, image: &image::DynamicImage)
        -> Result<Option<FrameObservation>, AnalyzerError>;
}

/// Seam between the session engine and the matching pipeline. The production
/// implementation is [`PhotoMatchEngine`]; tests substitute stubs.
pub trait ReferenceMatcher: Send + Sync {
    fn compare(&self, user_id: &str, probe: &Signature) -> MatchOutcome;
}

/// Observable result of one match run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchResult {
    pub success: bool,
    pub message: String,
    pub confidence: f32,
}

/// Internal match verdict: the best similarity reached plus the failure
/// classification, if any.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchOutcome {
    pub confidence: f32,
    pub failure: Option<FailureReason>,
}

impl MatchOutcome {
    pub fn success(confidence: f32) -> Self {
        Self {
            confidence,
            failure: None,
        }
    }

    pub fn failure(confidence: f32, reason: FailureReason) -> Self {
        Self {
            confidence,
            failure: Some(reason),
        }
    }

    pub fn to_result(&self) -> MatchResult {
        match &self.failure {
            None => MatchResult {
                success: true,
                message: "Verification successful".to_string(),
                confidence: self.confidence,
            },
            Some(reason) => MatchResult {
                success: false,
                message: reason.message(),
                confidence: self.confidence,
            },
        }
    }
}

/// Production matcher: downloads each reference photo, extracts a signature
/// with the same extractor used for live captures, and keeps the maximum
/// similarity across references.
pub struct PhotoMatchEngine {
    photos: Arc<dyn ProfilePhotoSource>,
    fetcher: Arc<dyn ImageFetcher>,
    analyzer: Arc<dyn FaceAnalyzer>,
    threshold: f32,
    download_timeout: Duration,
    total_deadline: Duration,
}

impl PhotoMatchEngine {
    pub fn new(
        photos: Arc<dyn ProfilePhotoSource>,
        fetcher: Arc<dyn ImageFetcher>,
        analyzer: Arc<dyn FaceAnalyzer>,
        threshold: f32,
        download_timeout: Duration,
        total_deadline: Duration,
    ) -> Self {
        Self {
            photos,
            fetcher,
            analyzer,
            threshold,
            download_timeout,
            total_deadline,
        }
    }

    /// Production wiring: fetch over HTTP with [`UreqFetcher`], thresholds
    /// and deadlines from [`Config`].
    pub fn from_config(
        config: &Config,
        photos: Arc<dyn ProfilePhotoSource>,
        analyzer: Arc<dyn FaceAnalyzer>,
    ) -> Self {
        Self::new(
            photos,
            Arc::new(UreqFetcher),
            analyzer,
            config.match_threshold,
            config.download_timeout,
            config.match_deadline,
        )
    }
}

impl ReferenceMatcher for PhotoMatchEngine {
    fn compare(&self, user_id: &str, probe: &Signature) -> MatchOutcome {
        let urls = match self.photos.profile_photos(user_id) {
            Ok(urls) => urls,
            Err(err) => {
                tracing::error!(user_id, error = %err, "profile photo lookup failed");
                return MatchOutcome::failure(0.0, FailureReason::MatchFailed);
            }
        };
        if urls.is_empty() {
            return MatchOutcome::failure(0.0, FailureReason::NoProfilePhotos);
        }

        let deadline = Instant::now() + self.total_deadline;
        let mut best = 0.0f32;
        let mut compared = 0usize;
        let mut download_failures = 0usize;
        let mut extraction_failures = 0usize;

        for url in &urls {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                // Out of time: the remaining photos were never reached, which
                // reads as a connectivity problem to the user.
                tracing::warn!(user_id, "match deadline reached, skipping remaining photos");
                download_failures += 1;
                continue;
            }

            let timeout = self.download_timeout.min(remaining);
            let bytes = match self.fetcher.download(url, timeout) {
                Ok(bytes) => bytes,
                Err(err) => {
                    tracing::debug!(url, error = %err, "reference download failed");
                    download_failures += 1;
                    continue;
                }
            };

            let decoded = match image::load_from_memory(&bytes) {
                Ok(img) => img,
                Err(err) => {
                    tracing::debug!(url, error = %err, "reference decode failed");
                    extraction_failures += 1;
                    continue;
                }
            };

            let observation = match self.analyzer.detect_face(&decoded) {
                Ok(Some(obs)) => obs,
                Ok(None) => {
                    tracing::debug!(url, "no face in reference photo");
                    extraction_failures += 1;
                    continue;
                }
                Err(err) => {
                    tracing::debug!(url, error = %err, "reference analysis failed");
                    extraction_failures += 1;
                    continue;
                }
            };

            let reference = match extract_signature(&observation.landmarks) {
                Ok(sig) => sig,
                Err(err) => {
                    tracing::debug!(url, error = %err, "reference signature extraction failed");
                    extraction_failures += 1;
                    continue;
                }
            };

            let similarity = compare_signatures(probe, &reference);
            compared += 1;
            best = best.max(similarity);
            tracing::debug!(url, similarity, "reference compared");
        }

        tracing::info!(
            user_id,
            compared,
            download_failures,
            extraction_failures,
            best,
            "match pass complete"
        );

        decide(best, compared, download_failures, extraction_failures, self.threshold)
    }
}

/// Collapse the aggregated counters into a single decision. Diagnostics are
/// prioritized connectivity > missing-face-in-reference > generic.
fn decide(
    best: f32,
    compared: usize,
    download_failures: usize,
    extraction_failures: usize,
    threshold: f32,
) -> MatchOutcome {
    if compared == 0 {
        let reason = if download_failures > 0 && extraction_failures == 0 {
            FailureReason::ReferenceDownloadFailed
        } else if extraction_failures > 0 {
            FailureReason::ReferenceFaceExtractionFailed
        } else {
            FailureReason::MatchFailed
        };
        return MatchOutcome::failure(0.0, reason);
    }

    if best >= threshold {
        MatchOutcome::success(best)
    } else if best < DIFFERENT_PERSON_CEILING {
        MatchOutcome::failure(
            best,
            FailureReason::LowConfidenceMatch(ConfidenceTier::DifferentPerson),
        )
    } else {
        MatchOutcome::failure(
            best,
            FailureReason::LowConfidenceMatch(ConfidenceTier::LowConfidence),
        )
    }
}

/// [`ImageFetcher`] backed by ureq, one agent per request so the timeout can
/// be set per call.
pub struct UreqFetcher;

impl ImageFetcher for UreqFetcher {
    fn download(&self, url: &str, timeout: Duration) -> Result<Vec<u8>, FetchError> {
        let agent: ureq::Agent = ureq::Agent::config_builder()
            .timeout_global(Some(timeout))
            .build()
            .into();

        let resp = agent
            .get(url)
            .call()
            .map_err(|e| FetchError(e.to_string()))?;

        let mut reader = resp.into_body().into_reader();
        let mut bytes = Vec::new();
        reader
            .read_to_end(&mut bytes)
            .map_err(|e| FetchError(e.to_string()))?;
        Ok(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use liveface_core::observation::{BoundingBox, Landmarks, Point};
    use std::io::Cursor;

    fn landmarks() -> Landmarks {
        let eye = |cx: f32, cy: f32| {
            vec![
                Point::new(cx - 0.04, cy),
                Point::new(cx - 0.015, cy - 0.012),
                Point::new(cx + 0.015, cy - 0.012),
                Point::new(cx + 0.04, cy),
                Point::new(cx + 0.015, cy + 0.012),
                Point::new(cx - 0.015, cy + 0.012),
            ]
        };
        Landmarks {
            left_eye: eye(0.38, 0.42),
            right_eye: eye(0.62, 0.42),
            left_brow: vec![],
            right_brow: vec![],
            nose: vec![
                Point::new(0.5, 0.44),
                Point::new(0.49, 0.50),
                Point::new(0.5, 0.55),
                Point::new(0.51, 0.50),
            ],
            outer_lips: vec![
                Point::new(0.42, 0.66),
                Point::new(0.5, 0.64),
                Point::new(0.58, 0.66),
                Point::new(0.5, 0.69),
            ],
            face_contour: vec![
                Point::new(0.28, 0.40),
                Point::new(0.30, 0.55),
                Point::new(0.36, 0.68),
                Point::new(0.5, 0.78),
                Point::new(0.64, 0.68),
                Point::new(0.70, 0.55),
                Point::new(0.72, 0.40),
                Point::new(0.5, 0.25),
                Point::new(0.38, 0.28),
            ],
        }
    }

    fn observation() -> FrameObservation {
        FrameObservation {
            bounding_box: BoundingBox {
                x: 0.3,
                y: 0.3,
                width: 0.4,
                height: 0.4,
            },
            yaw: 0.0,
            pitch: 0.0,
            roll: 0.0,
            quality: 0.9,
            landmarks: landmarks(),
        }
    }

    fn probe() -> Signature {
        extract_signature(&landmarks()).unwrap()
    }

    fn png_bytes() -> Vec<u8> {
        let img = image::DynamicImage::new_rgb8(4, 4);
        let mut bytes = Vec::new();
        img.write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png)
            .unwrap();
        bytes
    }

    struct Photos(Vec<String>);
    impl ProfilePhotoSource for Photos {
        fn profile_photos(&self, _user_id: &str) -> Result<Vec<String>, PhotoSourceError> {
            Ok(self.0.clone())
        }
    }

    struct OkFetcher(Vec<u8>);
    impl ImageFetcher for OkFetcher {
        fn download(&self, _url: &str, _timeout: Duration) -> Result<Vec<u8>, FetchError> {
            Ok(self.0.clone())
        }
    }

    struct FailFetcher;
    impl ImageFetcher for FailFetcher {
        fn download(&self, _url: &str, _timeout: Duration) -> Result<Vec<u8>, FetchError> {
            Err(FetchError("connection refused".to_string()))
        }
    }

    struct FaceStub(Option<FrameObservation>);
    impl FaceAnalyzer for FaceStub {
        fn detect_face(
            &self,
            _image: &image::DynamicImage,
        ) -> Result<Option<FrameObservation>, AnalyzerError> {
            Ok(self.0.clone())
        }
    }

    fn engine(
        photos: Vec<String>,
        fetcher: Arc<dyn ImageFetcher>,
        analyzer: Arc<dyn FaceAnalyzer>,
    ) -> PhotoMatchEngine {
        PhotoMatchEngine::new(
            Arc::new(Photos(photos)),
            fetcher,
            analyzer,
            0.70,
            Duration::from_secs(15),
            Duration::from_secs(30),
        )
    }

    #[test]
    fn decision_accepts_at_threshold() {
        let outcome = decide(0.70, 1, 0, 0, 0.70);
        assert!(outcome.failure.is_none());
        assert!((outcome.confidence - 0.70).abs() < 1e-6);
    }

    #[test]
    fn decision_just_below_threshold_is_low_confidence_tier() {
        let outcome = decide(0.699, 1, 0, 0, 0.70);
        assert_eq!(
            outcome.failure,
            Some(FailureReason::LowConfidenceMatch(
                ConfidenceTier::LowConfidence
            ))
        );
    }

    #[test]
    fn decision_below_half_is_different_person_tier() {
        let outcome = decide(0.42, 2, 0, 0, 0.70);
        assert_eq!(
            outcome.failure,
            Some(FailureReason::LowConfidenceMatch(
                ConfidenceTier::DifferentPerson
            ))
        );
    }

    #[test]
    fn decision_all_downloads_failed_is_connectivity() {
        let outcome = decide(0.0, 0, 3, 0, 0.70);
        assert_eq!(outcome.failure, Some(FailureReason::ReferenceDownloadFailed));
    }

    #[test]
    fn decision_extractions_failed_is_missing_face() {
        // Mixed failures: downloads partially failed, remaining extractions failed
        let outcome = decide(0.0, 0, 1, 2, 0.70);
        assert_eq!(
            outcome.failure,
            Some(FailureReason::ReferenceFaceExtractionFailed)
        );
    }

    #[test]
    fn matching_identical_face_succeeds() {
        let engine = engine(
            vec!["https://photos.example/a.jpg".to_string()],
            Arc::new(OkFetcher(png_bytes())),
            Arc::new(FaceStub(Some(observation()))),
        );
        let outcome = engine.compare("alice", &probe());
        assert!(outcome.failure.is_none());
        assert!((outcome.confidence - 1.0).abs() < 1e-5);
        assert!(outcome.to_result().success);
    }

    #[test]
    fn matching_with_unreachable_photos_reports_connectivity() {
        let engine = engine(
            vec![
                "https://photos.example/a.jpg".to_string(),
                "https://photos.example/b.jpg".to_string(),
            ],
            Arc::new(FailFetcher),
            Arc::new(FaceStub(Some(observation()))),
        );
        let outcome = engine.compare("alice", &probe());
        assert_eq!(outcome.failure, Some(FailureReason::ReferenceDownloadFailed));
    }

    #[test]
    fn matching_with_no_face_in_references_reports_missing_face() {
        let engine = engine(
            vec!["https://photos.example/a.jpg".to_string()],
            Arc::new(OkFetcher(png_bytes())),
            Arc::new(FaceStub(None)),
        );
        let outcome = engine.compare("alice", &probe());
        assert_eq!(
            outcome.failure,
            Some(FailureReason::ReferenceFaceExtractionFailed)
        );
    }

    #[test]
    fn matching_undecodable_bytes_counts_as_extraction_failure() {
        let engine = engine(
            vec!["https://photos.example/a.jpg".to_string()],
            Arc::new(OkFetcher(b"not an image".to_vec())),
            Arc::new(FaceStub(Some(observation()))),
        );
        let outcome = engine.compare("alice", &probe());
        assert_eq!(
            outcome.failure,
            Some(FailureReason::ReferenceFaceExtractionFailed)
        );
    }

    #[test]
    fn from_config_engine_reports_empty_photo_list() {
        // UreqFetcher is wired in but never reached: the photo list is empty
        let engine = PhotoMatchEngine::from_config(
            &Config::default(),
            Arc::new(Photos(vec![])),
            Arc::new(FaceStub(None)),
        );
        let outcome = engine.compare("alice", &probe());
        assert_eq!(outcome.failure, Some(FailureReason::NoProfilePhotos));
    }

    #[test]
    fn matching_without_photos_reports_no_profile_photos() {
        let engine = engine(
            vec![],
            Arc::new(OkFetcher(png_bytes())),
            Arc::new(FaceStub(Some(observation()))),
        );
        let outcome = engine.compare("alice", &probe());
        assert_eq!(outcome.failure, Some(FailureReason::NoProfilePhotos));
    }

    #[test]
    fn matching_keeps_best_reference() {
        // One unreachable photo plus one identical face: max wins, no penalty
        struct AlternatingFetcher {
            good: Vec<u8>,
            calls: std::sync::Mutex<usize>,
        }
        impl ImageFetcher for AlternatingFetcher {
            fn download(&self, _url: &str, _timeout: Duration) -> Result<Vec<u8>, FetchError> {
                let mut calls = self.calls.lock().unwrap();
                *calls += 1;
                if *calls == 1 {
                    Err(FetchError("timed out".to_string()))
                } else {
                    Ok(self.good.clone())
                }
            }
        }

        let engine = engine(
            vec![
                "https://photos.example/a.jpg".to_string(),
                "https://photos.example/b.jpg".to_string(),
            ],
            Arc::new(AlternatingFetcher {
                good: png_bytes(),
                calls: std::sync::Mutex::new(0),
            }),
            Arc::new(FaceStub(Some(observation()))),
        );
        let outcome = engine.compare("alice", &probe());
        assert!(outcome.failure.is_none());
        assert!((outcome.confidence - 1.0).abs() < 1e-5);
    }
}
