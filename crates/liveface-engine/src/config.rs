use std::path::PathBuf;
use std::time::Duration;

/// Engine configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Wall-clock budget for one verification session.
    pub session_timeout: Duration,
    /// Frames allowed per pose attempt before a retry is consumed
    /// (~10 s at 30 fps).
    pub pose_frame_budget: u32,
    /// Frames allowed per liveness challenge attempt (~5 s at 30 fps).
    pub challenge_frame_budget: u32,
    /// Attempts allowed per pose before the session fails.
    pub max_pose_retries: u32,
    /// Attempts allowed per challenge before the session fails.
    pub max_challenge_retries: u32,
    /// Accepted captures required to complete a pose.
    pub captures_per_pose: usize,
    /// Similarity score in [0,1] required for a positive match.
    pub match_threshold: f32,
    /// Per-request timeout for one reference photo download.
    pub download_timeout: Duration,
    /// Total wall-clock budget for the whole matching pass.
    pub match_deadline: Duration,
    /// Path to the SQLite verification database.
    pub db_path: PathBuf,
}

impl Config {
    /// Load configuration from `LIVEFACE_*` environment variables with defaults.
    pub fn from_env() -> Self {
        let data_dir = std::env::var("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
                PathBuf::from(home).join(".local/share")
            })
            .join("liveface");

        let db_path = std::env::var("LIVEFACE_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("verifications.db"));

        Self {
            session_timeout: Duration::from_secs(env_u64("LIVEFACE_SESSION_TIMEOUT_SECS", 90)),
            pose_frame_budget: env_u32("LIVEFACE_POSE_FRAME_BUDGET", 300),
            challenge_frame_budget: env_u32("LIVEFACE_CHALLENGE_FRAME_BUDGET", 150),
            max_pose_retries: env_u32("LIVEFACE_MAX_POSE_RETRIES", 3),
            max_challenge_retries: env_u32("LIVEFACE_MAX_CHALLENGE_RETRIES", 3),
            captures_per_pose: env_u32("LIVEFACE_CAPTURES_PER_POSE", 3) as usize,
            match_threshold: env_f32("LIVEFACE_MATCH_THRESHOLD", 0.70),
            download_timeout: Duration::from_secs(env_u64("LIVEFACE_DOWNLOAD_TIMEOUT_SECS", 15)),
            match_deadline: Duration::from_secs(env_u64("LIVEFACE_MATCH_DEADLINE_SECS", 30)),
            db_path,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            session_timeout: Duration::from_secs(90),
            pose_frame_budget: 300,
            challenge_frame_budget: 150,
            max_pose_retries: 3,
            max_challenge_retries: 3,
            captures_per_pose: 3,
            match_threshold: 0.70,
            download_timeout: Duration::from_secs(15),
            match_deadline: Duration::from_secs(30),
            db_path: PathBuf::from(":memory:"),
        }
    }
}

fn env_f32(key: &str, default: f32) -> f32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u32(key: &str, default: u32) -> u32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
