//! Session engine actor.
//!
//! All session mutation flows through one `mpsc` event channel consumed by a
//! single task, so frame callbacks, the session timer, and match completion
//! can never race on session state. Timer and match results carry the epoch
//! they were spawned under; `reset()` bumps the epoch, which makes any
//! in-flight result from the old session land as a discarded no-op.

use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use liveface_core::liveness::Challenge;
use liveface_core::observation::FrameObservation;
use liveface_core::pose::Pose;

use crate::config::Config;
use crate::matching::{
    FaceAnalyzer, MatchOutcome, MatchResult, PhotoMatchEngine, ProfilePhotoSource,
    ReferenceMatcher,
};
use crate::session::{FailureReason, SessionAction, Stage, VerificationSession};
use crate::store::{StoreError, VerificationStore};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("engine task exited")]
    ChannelClosed,
}

enum EngineEvent {
    Start { user_id: String },
    Frame(Box<FrameObservation>),
    NoFace,
    Reset,
    RetryMatch,
    TimeoutFired { epoch: u64 },
    MatchFinished { epoch: u64, outcome: MatchOutcome },
}

/// Read-only view of the current session, published on every change.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub stage: Stage,
    pub progress: f32,
    pub instruction: String,
    pub face_detected: bool,
    pub face_in_position: bool,
    pub completed_poses: Vec<Pose>,
    pub completed_challenges: Vec<Challenge>,
    pub yaw: f32,
    pub pitch: f32,
    pub roll: f32,
    pub last_match: Option<MatchResult>,
}

impl Default for SessionSnapshot {
    fn default() -> Self {
        Self {
            stage: Stage::Initializing,
            progress: 0.0,
            instruction: String::new(),
            face_detected: false,
            face_in_position: false,
            completed_poses: Vec::new(),
            completed_challenges: Vec::new(),
            yaw: 0.0,
            pitch: 0.0,
            roll: 0.0,
            last_match: None,
        }
    }
}

/// Clone-safe handle to the engine task.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineEvent>,
    snapshot_rx: watch::Receiver<SessionSnapshot>,
}

impl EngineHandle {
    /// Begin a verification session for a user, replacing any active one.
    pub async fn start_verification(
        &self,
        user_id: impl Into<String>,
    ) -> Result<(), EngineError> {
        self.send(EngineEvent::Start {
            user_id: user_id.into(),
        })
        .await
    }

    /// Deliver one frame's face observation.
    pub async fn process_observation(&self, obs: FrameObservation) -> Result<(), EngineError> {
        self.send(EngineEvent::Frame(Box::new(obs))).await
    }

    /// Report a frame with no detectable face.
    pub async fn no_face_detected(&self) -> Result<(), EngineError> {
        self.send(EngineEvent::NoFace).await
    }

    /// Abandon the current session. In-flight timer and match results are
    /// discarded, never applied to a later session.
    pub async fn reset(&self) -> Result<(), EngineError> {
        self.send(EngineEvent::Reset).await
    }

    /// After a match-phase failure, run matching again with the captures
    /// already taken in this session.
    pub async fn retry_match(&self) -> Result<(), EngineError> {
        self.send(EngineEvent::RetryMatch).await
    }

    /// Current session snapshot.
    pub fn snapshot(&self) -> SessionSnapshot {
        self.snapshot_rx.borrow().clone()
    }

    /// Subscribe to session snapshot updates.
    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshot_rx.clone()
    }

    async fn send(&self, event: EngineEvent) -> Result<(), EngineError> {
        self.tx
            .send(event)
            .await
            .map_err(|_| EngineError::ChannelClosed)
    }
}

/// Spawn the engine task and return a handle to it.
pub fn spawn_engine(
    config: Config,
    matcher: Arc<dyn ReferenceMatcher>,
    store: VerificationStore,
) -> EngineHandle {
    let (tx, rx) = mpsc::channel::<EngineEvent>(64);
    let (snapshot_tx, snapshot_rx) = watch::channel(SessionSnapshot::default());

    let actor = EngineActor {
        config,
        matcher,
        store,
        session: None,
        epoch: 0,
        timeout_task: None,
        tx: tx.clone(),
        snapshot_tx,
    };
    tokio::spawn(actor.run(rx));

    EngineHandle { tx, snapshot_rx }
}

/// Wire the production stack from configuration: open the verification
/// store at `config.db_path` and match against reference photos fetched
/// over HTTP. Photo lookup and face detection stay caller-provided.
pub async fn spawn_engine_from_config(
    config: Config,
    photos: Arc<dyn ProfilePhotoSource>,
    analyzer: Arc<dyn FaceAnalyzer>,
) -> Result<EngineHandle, StoreError> {
    let store = VerificationStore::open(&config.db_path).await?;
    let matcher = Arc::new(PhotoMatchEngine::from_config(&config, photos, analyzer));
    Ok(spawn_engine(config, matcher, store))
}

struct EngineActor {
    config: Config,
    matcher: Arc<dyn ReferenceMatcher>,
    store: VerificationStore,
    session: Option<VerificationSession>,
    epoch: u64,
    timeout_task: Option<JoinHandle<()>>,
    tx: mpsc::Sender<EngineEvent>,
    snapshot_tx: watch::Sender<SessionSnapshot>,
}

impl EngineActor {
    async fn run(mut self, mut rx: mpsc::Receiver<EngineEvent>) {
        tracing::info!("engine task started");
        while let Some(event) = rx.recv().await {
            self.handle(event).await;
        }
        self.cancel_timeout();
        tracing::info!("engine task exiting");
    }

    async fn handle(&mut self, event: EngineEvent) {
        match event {
            EngineEvent::Start { user_id } => {
                self.epoch += 1;
                self.cancel_timeout();
                self.session = Some(VerificationSession::new(user_id, &self.config));
                self.arm_timeout();
                self.publish();
            }
            EngineEvent::Frame(obs) => {
                if let Some(session) = self.session.as_mut() {
                    let action = session.handle_frame(&obs);
                    self.apply(action);
                    self.publish();
                }
            }
            EngineEvent::NoFace => {
                if let Some(session) = self.session.as_mut() {
                    session.handle_no_face();
                    self.publish();
                }
            }
            EngineEvent::Reset => {
                self.epoch += 1;
                self.cancel_timeout();
                if let Some(session) = self.session.take() {
                    tracing::info!(session_id = session.session_id, "session reset");
                }
                self.publish();
            }
            EngineEvent::RetryMatch => {
                if let Some(session) = self.session.as_mut() {
                    let action = session.retry_match();
                    self.apply(action);
                    self.publish();
                }
            }
            EngineEvent::TimeoutFired { epoch } => {
                if epoch != self.epoch {
                    return;
                }
                if let Some(session) = self.session.as_mut() {
                    session.handle_timeout();
                    self.publish();
                }
            }
            EngineEvent::MatchFinished { epoch, outcome } => {
                if epoch != self.epoch {
                    tracing::debug!("discarding match result from superseded session");
                    return;
                }
                let Some(session) = self.session.as_mut() else {
                    return;
                };
                session.handle_match_outcome(outcome);

                if *session.stage() == Stage::Success {
                    let confidence = session
                        .last_match()
                        .map(|m| m.confidence)
                        .unwrap_or_default();
                    if let Err(err) = self
                        .store
                        .record_verification(&session.user_id, confidence)
                        .await
                    {
                        // Verification itself succeeded; the flag write is
                        // retried on the next session.
                        tracing::error!(error = %err, "failed to persist verification");
                    }
                }
                self.publish();
            }
        }
    }

    fn apply(&mut self, action: SessionAction) {
        match action {
            SessionAction::None => {}
            SessionAction::StartMatch { probe } => {
                // Capture is done; the wall-clock budget no longer applies.
                self.cancel_timeout();

                let Some(session) = self.session.as_ref() else {
                    return;
                };
                let matcher = self.matcher.clone();
                let user_id = session.user_id.clone();
                let tx = self.tx.clone();
                let epoch = self.epoch;

                tokio::spawn(async move {
                    let outcome = match tokio::task::spawn_blocking(move || {
                        matcher.compare(&user_id, &probe)
                    })
                    .await
                    {
                        Ok(outcome) => outcome,
                        Err(err) => {
                            tracing::error!(error = %err, "match task failed");
                            MatchOutcome::failure(0.0, FailureReason::MatchFailed)
                        }
                    };
                    let _ = tx.send(EngineEvent::MatchFinished { epoch, outcome }).await;
                });
            }
        }
    }

    fn arm_timeout(&mut self) {
        let tx = self.tx.clone();
        let epoch = self.epoch;
        let timeout = self.config.session_timeout;
        self.timeout_task = Some(tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            let _ = tx.send(EngineEvent::TimeoutFired { epoch }).await;
        }));
    }

    fn cancel_timeout(&mut self) {
        if let Some(task) = self.timeout_task.take() {
            task.abort();
        }
    }

    fn publish(&self) {
        let snapshot = match self.session.as_ref() {
            Some(session) => {
                let (yaw, pitch, roll) = session.head_angles();
                SessionSnapshot {
                    stage: session.stage().clone(),
                    progress: session.progress(),
                    instruction: session.instruction().to_string(),
                    face_detected: session.face_detected(),
                    face_in_position: session.face_in_position(),
                    completed_poses: session.completed_poses().to_vec(),
                    completed_challenges: session.completed_challenges().to_vec(),
                    yaw,
                    pitch,
                    roll,
                    last_match: session.last_match().cloned(),
                }
            }
            None => SessionSnapshot::default(),
        };
        let _ = self.snapshot_tx.send(snapshot);
    }
}
