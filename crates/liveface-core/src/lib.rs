//! Pure geometry and decision code for the Liveface verification engine:
//! frame observations, pose acceptance windows, liveness challenge trackers,
//! geometric face signatures, and signature similarity.
//!
//! Everything here is deterministic and I/O-free; the stateful session
//! engine lives in `liveface-engine`.

pub mod liveness;
pub mod matcher;
pub mod observation;
pub mod pose;
pub mod signature;

pub use liveness::{Challenge, ChallengeTracker, REQUIRED_CHALLENGES};
pub use matcher::{compare_signatures, cosine_similarity, remap_similarity};
pub use observation::{BoundingBox, FrameObservation, Landmarks, Point};
pub use pose::{check_pose, check_positioning, Pose, PoseCheck, PositionCheck, REQUIRED_POSES};
pub use signature::{extract_signature, Signature, SignatureError, SIGNATURE_DIM};
