//! Liveface verification session engine.
//!
//! Drives a user through face positioning, pose capture, and liveness
//! challenges, then matches the captured geometric signature against the
//! user's reference photos. See `liveface-core` for the underlying geometry.

pub mod config;
pub mod engine;
pub mod matching;
pub mod session;
pub mod store;

pub use config::Config;
pub use engine::{
    spawn_engine, spawn_engine_from_config, EngineError, EngineHandle, SessionSnapshot,
};
pub use matching::{
    FaceAnalyzer, ImageFetcher, MatchOutcome, MatchResult, PhotoMatchEngine, ProfilePhotoSource,
    ReferenceMatcher, UreqFetcher,
};
pub use session::{Capture, ConfidenceTier, FailureReason, Stage, VerificationSession};
pub use store::{StoreError, VerificationRecord, VerificationStore};
