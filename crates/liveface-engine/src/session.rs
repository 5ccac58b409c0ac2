//! Verification session state machine.
//!
//! A [`VerificationSession`] owns all per-session state and advances through
//! `Positioning → CapturingPoses → LivenessCheck → Processing → Success |
//! Failure`. It is pure: every input arrives as a method call from the
//! engine's single event loop, and anything requiring I/O is returned as a
//! [`SessionAction`] for the engine to perform. Terminal failures are state,
//! not errors — callers observe [`Stage::Failure`] rather than catching
//! anything.

use chrono::{DateTime, Utc};
use serde::Serialize;

use liveface_core::liveness::{Challenge, ChallengeTracker, REQUIRED_CHALLENGES};
use liveface_core::observation::FrameObservation;
use liveface_core::pose::{
    check_pose, check_positioning, Pose, PoseCheck, PositionCheck, REQUIRED_POSES,
};
use liveface_core::signature::{extract_signature, Signature};

use crate::config::Config;
use crate::matching::{MatchOutcome, MatchResult};

/// Session lifecycle stage. `Success` and `Failure` are terminal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Initializing,
    Positioning,
    CapturingPoses,
    LivenessCheck,
    Processing,
    Success,
    Failure(FailureReason),
}

impl Stage {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Stage::Success | Stage::Failure(_))
    }
}

/// Why a session ended in `Failure`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    PoseCaptureExhausted(Pose),
    ChallengeExhausted(Challenge),
    NoFaceCaptured,
    NoProfilePhotos,
    ReferenceDownloadFailed,
    ReferenceFaceExtractionFailed,
    LowConfidenceMatch(ConfidenceTier),
    SessionTimedOut,
    /// No specific diagnostic could be produced; ask the user to retry.
    MatchFailed,
}

/// Graded low-similarity tiers for user messaging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfidenceTier {
    /// Similarity below 0.5.
    DifferentPerson,
    /// Similarity in [0.5, threshold).
    LowConfidence,
}

impl FailureReason {
    /// User-facing message for this failure.
    pub fn message(&self) -> String {
        match self {
            FailureReason::PoseCaptureExhausted(pose) => format!(
                "We couldn't capture the {} pose. Please try again in better lighting.",
                pose.label()
            ),
            FailureReason::ChallengeExhausted(challenge) => format!(
                "We couldn't detect the {} gesture. Please try again.",
                challenge.label()
            ),
            FailureReason::NoFaceCaptured => {
                "We couldn't get a usable capture of your face. Please try again.".to_string()
            }
            FailureReason::NoProfilePhotos => {
                "You have no profile photos to compare against. Add a profile photo first."
                    .to_string()
            }
            FailureReason::ReferenceDownloadFailed => {
                "We couldn't download your profile photos. Check your connection and try again."
                    .to_string()
            }
            FailureReason::ReferenceFaceExtractionFailed => {
                "No detectable face in your profile photos. Add a clear photo of your face."
                    .to_string()
            }
            FailureReason::LowConfidenceMatch(ConfidenceTier::DifferentPerson) => {
                "This doesn't look like the person in your photos.".to_string()
            }
            FailureReason::LowConfidenceMatch(ConfidenceTier::LowConfidence) => {
                "Similarity too low. Try again with better lighting.".to_string()
            }
            FailureReason::SessionTimedOut => {
                "Verification timed out. Please try again.".to_string()
            }
            FailureReason::MatchFailed => {
                "Verification could not be completed. Please try again.".to_string()
            }
        }
    }

    /// Whether this failure occurred in the matching phase, after capture
    /// completed. Such failures keep their captures and may be retried
    /// without redoing the capture flow.
    pub fn is_match_failure(&self) -> bool {
        matches!(
            self,
            FailureReason::NoProfilePhotos
                | FailureReason::ReferenceDownloadFailed
                | FailureReason::ReferenceFaceExtractionFailed
                | FailureReason::LowConfidenceMatch(_)
                | FailureReason::MatchFailed
        )
    }
}

/// One accepted pose capture.
#[derive(Debug, Clone)]
pub struct Capture {
    pub pose: Pose,
    pub signature: Signature,
    pub observation: FrameObservation,
    pub captured_at: DateTime<Utc>,
}

/// I/O the engine must perform after a session method returns.
#[derive(Debug)]
pub enum SessionAction {
    None,
    /// Capture is complete: cancel the session timer and run the match
    /// engine against this probe signature.
    StartMatch { probe: Signature },
}

const INSTRUCTION_POSITION: &str = "Position your face in the frame";
const INSTRUCTION_PROCESSING: &str = "Hold on, verifying...";

/// State for one verification session. Owned exclusively by the engine's
/// event loop; all mutation happens through the handle_* methods.
pub struct VerificationSession {
    pub user_id: String,
    pub session_id: String,
    stage: Stage,
    progress: f32,
    pub started_at: DateTime<Utc>,
    instruction: String,
    face_detected: bool,
    face_in_position: bool,
    yaw: f32,
    pitch: f32,
    roll: f32,

    captures: Vec<Capture>,
    completed_poses: Vec<Pose>,
    completed_challenges: Vec<Challenge>,
    pose_index: usize,
    pose_frame_count: u32,
    pose_retries: u32,
    challenge_index: usize,
    challenge_frame_count: u32,
    challenge_retries: u32,
    tracker: Option<ChallengeTracker>,

    completing: bool,
    last_match: Option<MatchResult>,

    limits: Limits,
}

/// Budgets copied out of [`Config`] at session start.
#[derive(Debug, Clone)]
struct Limits {
    pose_frame_budget: u32,
    challenge_frame_budget: u32,
    max_pose_retries: u32,
    max_challenge_retries: u32,
    captures_per_pose: usize,
}

impl VerificationSession {
    pub fn new(user_id: String, config: &Config) -> Self {
        let session_id = uuid::Uuid::new_v4().to_string();
        tracing::info!(user_id, session_id, "verification session started");
        Self {
            user_id,
            session_id,
            stage: Stage::Positioning,
            progress: 0.0,
            started_at: Utc::now(),
            instruction: INSTRUCTION_POSITION.to_string(),
            face_detected: false,
            face_in_position: false,
            yaw: 0.0,
            pitch: 0.0,
            roll: 0.0,
            captures: Vec::new(),
            completed_poses: Vec::new(),
            completed_challenges: Vec::new(),
            pose_index: 0,
            pose_frame_count: 0,
            pose_retries: 0,
            challenge_index: 0,
            challenge_frame_count: 0,
            challenge_retries: 0,
            tracker: None,
            completing: false,
            last_match: None,
            limits: Limits {
                pose_frame_budget: config.pose_frame_budget,
                challenge_frame_budget: config.challenge_frame_budget,
                max_pose_retries: config.max_pose_retries,
                max_challenge_retries: config.max_challenge_retries,
                captures_per_pose: config.captures_per_pose,
            },
        }
    }

    pub fn stage(&self) -> &Stage {
        &self.stage
    }

    pub fn progress(&self) -> f32 {
        self.progress
    }

    pub fn instruction(&self) -> &str {
        &self.instruction
    }

    pub fn face_detected(&self) -> bool {
        self.face_detected
    }

    pub fn face_in_position(&self) -> bool {
        self.face_in_position
    }

    pub fn head_angles(&self) -> (f32, f32, f32) {
        (self.yaw, self.pitch, self.roll)
    }

    pub fn completed_poses(&self) -> &[Pose] {
        &self.completed_poses
    }

    pub fn completed_challenges(&self) -> &[Challenge] {
        &self.completed_challenges
    }

    pub fn captures(&self) -> &[Capture] {
        &self.captures
    }

    pub fn last_match(&self) -> Option<&MatchResult> {
        self.last_match.as_ref()
    }

    /// Process one frame observation. Terminal stages and `Processing`
    /// ignore frames entirely.
    pub fn handle_frame(&mut self, obs: &FrameObservation) -> SessionAction {
        if self.stage.is_terminal() || self.stage == Stage::Processing {
            return SessionAction::None;
        }

        self.face_detected = true;
        self.yaw = obs.yaw;
        self.pitch = obs.pitch;
        self.roll = obs.roll;

        match self.stage {
            Stage::Positioning => {
                self.handle_positioning(obs);
                SessionAction::None
            }
            Stage::CapturingPoses => self.handle_pose_capture(obs),
            Stage::LivenessCheck => self.handle_liveness(obs),
            _ => SessionAction::None,
        }
    }

    /// Called when a frame contained no detectable face. Resets the
    /// positioning prompt; captured data is kept.
    pub fn handle_no_face(&mut self) {
        if matches!(self.stage, Stage::Positioning | Stage::CapturingPoses) {
            self.face_detected = false;
            self.face_in_position = false;
            self.instruction = INSTRUCTION_POSITION.to_string();
        }
    }

    /// Global session timeout fired. A no-op once the session is already
    /// processing or terminal.
    pub fn handle_timeout(&mut self) {
        if self.stage.is_terminal() || self.stage == Stage::Processing {
            return;
        }
        tracing::warn!(
            session_id = self.session_id,
            stage = ?self.stage,
            "session timed out"
        );
        self.fail(FailureReason::SessionTimedOut);
    }

    /// Apply the match engine's result. Ignored unless the session is in
    /// `Processing` (a stale result from a superseded attempt must not land).
    pub fn handle_match_outcome(&mut self, outcome: MatchOutcome) {
        if self.stage != Stage::Processing {
            tracing::debug!(
                session_id = self.session_id,
                stage = ?self.stage,
                "discarding match outcome outside Processing"
            );
            return;
        }

        let result = outcome.to_result();
        tracing::info!(
            session_id = self.session_id,
            success = result.success,
            confidence = result.confidence,
            "match complete"
        );
        self.last_match = Some(result.clone());

        match outcome.failure {
            None => {
                self.stage = Stage::Success;
                self.progress = 1.0;
                self.instruction = result.message;
            }
            Some(reason) => {
                // Captures are kept and the completing guard is cleared, so
                // a retry can re-run matching without redoing capture.
                self.completing = false;
                self.fail(reason);
            }
        }
    }

    /// Re-run matching after a match-phase failure, reusing the captures
    /// from this session. No-op in any other situation.
    pub fn retry_match(&mut self) -> SessionAction {
        match &self.stage {
            Stage::Failure(reason) if reason.is_match_failure() => {
                tracing::info!(session_id = self.session_id, "retrying match");
                self.stage = Stage::Processing;
                self.begin_processing()
            }
            _ => SessionAction::None,
        }
    }

    // ── Stage handlers ───────────────────────────────────────────────────

    fn handle_positioning(&mut self, obs: &FrameObservation) {
        match check_positioning(obs) {
            PositionCheck::InPosition => {
                self.face_in_position = true;
                self.stage = Stage::CapturingPoses;
                self.instruction = REQUIRED_POSES[0].prompt().to_string();
                tracing::debug!(session_id = self.session_id, "face positioned");
            }
            PositionCheck::Adjust(msg) => {
                self.face_in_position = false;
                self.instruction = msg.to_string();
            }
        }
        self.update_progress();
    }

    fn handle_pose_capture(&mut self, obs: &FrameObservation) -> SessionAction {
        let pose = REQUIRED_POSES[self.pose_index];
        self.pose_frame_count += 1;

        match check_pose(pose, obs) {
            PoseCheck::Match => match extract_signature(&obs.landmarks) {
                Ok(signature) => {
                    self.captures.push(Capture {
                        pose,
                        signature,
                        observation: obs.clone(),
                        captured_at: Utc::now(),
                    });
                    self.instruction = "Hold it right there...".to_string();

                    if self.pose_capture_count(pose) >= self.limits.captures_per_pose {
                        return self.complete_pose(pose);
                    }
                }
                Err(err) => {
                    tracing::debug!(
                        session_id = self.session_id,
                        pose = pose.label(),
                        error = %err,
                        "frame matched pose but signature extraction failed"
                    );
                }
            },
            PoseCheck::Adjust(msg) => {
                self.instruction = msg.to_string();
            }
        }

        if self.pose_frame_count >= self.limits.pose_frame_budget {
            self.pose_retries += 1;
            if self.pose_retries >= self.limits.max_pose_retries {
                self.fail(FailureReason::PoseCaptureExhausted(pose));
            } else {
                tracing::debug!(
                    session_id = self.session_id,
                    pose = pose.label(),
                    attempt = self.pose_retries + 1,
                    "pose attempt exhausted, restarting"
                );
                self.pose_frame_count = 0;
                self.captures.retain(|c| c.pose != pose);
                self.instruction = format!("Let's try that again. {}", pose.prompt());
            }
        }

        self.update_progress();
        SessionAction::None
    }

    fn complete_pose(&mut self, pose: Pose) -> SessionAction {
        self.completed_poses.push(pose);
        self.pose_index += 1;
        self.pose_frame_count = 0;
        self.pose_retries = 0;
        tracing::info!(
            session_id = self.session_id,
            pose = pose.label(),
            "pose complete"
        );

        if self.pose_index >= REQUIRED_POSES.len() {
            self.stage = Stage::LivenessCheck;
            let first = REQUIRED_CHALLENGES[0];
            self.tracker = Some(ChallengeTracker::new(first));
            self.instruction = first.prompt().to_string();
        } else {
            self.instruction = REQUIRED_POSES[self.pose_index].prompt().to_string();
        }
        self.update_progress();
        SessionAction::None
    }

    fn handle_liveness(&mut self, obs: &FrameObservation) -> SessionAction {
        let challenge = REQUIRED_CHALLENGES[self.challenge_index];
        self.challenge_frame_count += 1;

        let satisfied = match self.tracker.as_mut() {
            Some(tracker) => tracker.observe(obs),
            None => false,
        };

        if satisfied {
            return self.complete_challenge(challenge);
        }

        if self.challenge_frame_count >= self.limits.challenge_frame_budget {
            self.challenge_retries += 1;
            if self.challenge_retries >= self.limits.max_challenge_retries {
                self.fail(FailureReason::ChallengeExhausted(challenge));
            } else {
                tracing::debug!(
                    session_id = self.session_id,
                    challenge = challenge.label(),
                    attempt = self.challenge_retries + 1,
                    "challenge attempt exhausted, restarting"
                );
                self.challenge_frame_count = 0;
                self.tracker = Some(ChallengeTracker::new(challenge));
                self.instruction = format!("Let's try that again. {}", challenge.prompt());
            }
        }

        self.update_progress();
        SessionAction::None
    }

    fn complete_challenge(&mut self, challenge: Challenge) -> SessionAction {
        self.completed_challenges.push(challenge);
        self.challenge_index += 1;
        self.challenge_frame_count = 0;
        self.challenge_retries = 0;
        tracing::info!(
            session_id = self.session_id,
            challenge = challenge.label(),
            "challenge complete"
        );

        if self.challenge_index >= REQUIRED_CHALLENGES.len() {
            self.stage = Stage::Processing;
            let action = self.begin_processing();
            self.update_progress();
            return action;
        }

        let next = REQUIRED_CHALLENGES[self.challenge_index];
        self.tracker = Some(ChallengeTracker::new(next));
        self.instruction = next.prompt().to_string();
        self.update_progress();
        SessionAction::None
    }

    /// Enter the matching phase. The `completing` guard ensures at most one
    /// match run is in flight for this session.
    fn begin_processing(&mut self) -> SessionAction {
        if self.completing {
            tracing::warn!(
                session_id = self.session_id,
                "begin_processing called while already completing"
            );
            return SessionAction::None;
        }

        let probe = self.best_center_capture().map(|c| c.signature.clone());
        match probe {
            Some(probe) => {
                self.completing = true;
                self.instruction = INSTRUCTION_PROCESSING.to_string();
                SessionAction::StartMatch { probe }
            }
            None => {
                self.fail(FailureReason::NoFaceCaptured);
                SessionAction::None
            }
        }
    }

    /// Highest-quality center-pose capture; the probe for matching.
    fn best_center_capture(&self) -> Option<&Capture> {
        self.captures
            .iter()
            .filter(|c| c.pose == Pose::Center)
            .max_by(|a, b| {
                a.observation
                    .quality
                    .total_cmp(&b.observation.quality)
            })
    }

    fn pose_capture_count(&self, pose: Pose) -> usize {
        self.captures.iter().filter(|c| c.pose == pose).count()
    }

    fn fail(&mut self, reason: FailureReason) {
        tracing::info!(
            session_id = self.session_id,
            reason = ?reason,
            "session failed"
        );
        self.instruction = reason.message();
        self.stage = Stage::Failure(reason);
    }

    fn update_progress(&mut self) {
        self.progress = match &self.stage {
            Stage::Initializing => 0.0,
            Stage::Positioning => 0.05,
            Stage::CapturingPoses => {
                let active = REQUIRED_POSES
                    .get(self.pose_index)
                    .map(|p| {
                        self.pose_capture_count(*p) as f32 / self.limits.captures_per_pose as f32
                    })
                    .unwrap_or(0.0);
                let done = self.completed_poses.len() as f32;
                0.1 + 0.5 * ((done + active.min(1.0)) / REQUIRED_POSES.len() as f32)
            }
            Stage::LivenessCheck => {
                0.6 + 0.3 * (self.completed_challenges.len() as f32
                    / REQUIRED_CHALLENGES.len() as f32)
            }
            Stage::Processing => 0.9,
            Stage::Success => 1.0,
            Stage::Failure(_) => self.progress,
        };
    }
}
