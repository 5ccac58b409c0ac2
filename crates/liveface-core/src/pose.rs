//! Head-pose acceptance windows and corrective guidance.
//!
//! Each pose is a closed yaw/pitch interval. A frame matches the active pose
//! when both angles fall inside the window, the head is not tilted, and the
//! detector quality is acceptable. Guidance is table-driven so every pose has
//! an exhaustive, testable pair of corrective prompts.

use serde::{Deserialize, Serialize};

use crate::observation::FrameObservation;

/// Maximum in-plane tilt accepted for a pose capture, radians.
pub const MAX_CAPTURE_ROLL: f32 = 0.3;
/// Minimum detector quality accepted for a pose capture.
pub const MIN_CAPTURE_QUALITY: f32 = 0.3;

/// Minimum fraction of the frame the face box must cover during positioning.
pub const MIN_FACE_AREA: f32 = 0.15;
/// Face box fraction above which the user is asked to back up.
pub const MAX_FACE_AREA: f32 = 0.55;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Pose {
    Center,
    Left,
    Right,
    Up,
    Down,
}

/// Poses the default verification flow requires, in capture order.
/// `Up`/`Down` are reserved for future flows.
pub const REQUIRED_POSES: [Pose; 3] = [Pose::Center, Pose::Left, Pose::Right];

/// Acceptance window and guidance table entry for one pose.
///
/// `short_of` is shown when the driving angle has not yet reached the window;
/// `past` when it has overshot it. For yaw-driven poses the driving angle is
/// yaw, for `Up`/`Down` it is pitch.
struct PoseWindow {
    yaw: (f32, f32),
    pitch: (f32, f32),
    prompt: &'static str,
    short_of: &'static str,
    past: &'static str,
}

const CENTER: PoseWindow = PoseWindow {
    yaw: (-0.15, 0.15),
    pitch: (-0.2, 0.2),
    prompt: "Look straight at the camera",
    short_of: "Turn your head back to center",
    past: "Turn your head back to center",
};

const LEFT: PoseWindow = PoseWindow {
    yaw: (-0.6, -0.15),
    pitch: (-0.25, 0.25),
    prompt: "Turn your head to the left",
    short_of: "Turn a little more to the left",
    past: "Not so far — come back a little",
};

const RIGHT: PoseWindow = PoseWindow {
    yaw: (0.15, 0.6),
    pitch: (-0.25, 0.25),
    prompt: "Turn your head to the right",
    short_of: "Turn a little more to the right",
    past: "Not so far — come back a little",
};

const UP: PoseWindow = PoseWindow {
    yaw: (-0.2, 0.2),
    pitch: (0.15, 0.5),
    prompt: "Tilt your head up",
    short_of: "Tilt a little further up",
    past: "Not so far — come back down a little",
};

const DOWN: PoseWindow = PoseWindow {
    yaw: (-0.2, 0.2),
    pitch: (-0.5, -0.15),
    prompt: "Tilt your head down",
    short_of: "Tilt a little further down",
    past: "Not so far — come back up a little",
};

impl Pose {
    fn window(&self) -> &'static PoseWindow {
        match self {
            Pose::Center => &CENTER,
            Pose::Left => &LEFT,
            Pose::Right => &RIGHT,
            Pose::Up => &UP,
            Pose::Down => &DOWN,
        }
    }

    /// Instruction shown when this pose becomes the active capture target.
    pub fn prompt(&self) -> &'static str {
        self.window().prompt
    }

    /// Human-readable pose name for diagnostics.
    pub fn label(&self) -> &'static str {
        match self {
            Pose::Center => "center",
            Pose::Left => "left",
            Pose::Right => "right",
            Pose::Up => "up",
            Pose::Down => "down",
        }
    }
}

/// Outcome of checking a frame against the active pose.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoseCheck {
    /// Frame satisfies the pose window and capture constraints.
    Match,
    /// Frame does not match; show this corrective instruction.
    Adjust(&'static str),
}

/// Check one frame against a target pose's acceptance window.
pub fn check_pose(pose: Pose, obs: &FrameObservation) -> PoseCheck {
    if obs.quality < MIN_CAPTURE_QUALITY {
        return PoseCheck::Adjust("Hold still — move to better lighting");
    }
    if obs.roll.abs() >= MAX_CAPTURE_ROLL {
        return PoseCheck::Adjust("Keep your head level");
    }

    let w = pose.window();

    // Yaw-driven poses report yaw guidance first; pitch-driven report pitch.
    let (drive, range, cross) = match pose {
        Pose::Up | Pose::Down => (obs.pitch, w.pitch, (obs.yaw, w.yaw)),
        _ => (obs.yaw, w.yaw, (obs.pitch, w.pitch)),
    };

    // Which side of the window the driving angle missed on depends on the
    // window's sign: for Left/Down the window sits in negative territory, so
    // "short of" means the angle is still above the upper bound.
    let negative_window = range.1 <= 0.0 && range.0 < 0.0;
    if drive < range.0 {
        return PoseCheck::Adjust(if negative_window { w.past } else { w.short_of });
    }
    if drive > range.1 {
        return PoseCheck::Adjust(if negative_window { w.short_of } else { w.past });
    }

    let (cross_angle, cross_range) = cross;
    if cross_angle < cross_range.0 || cross_angle > cross_range.1 {
        return PoseCheck::Adjust("Keep your head level");
    }

    PoseCheck::Match
}

/// Outcome of the initial face-positioning check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PositionCheck {
    InPosition,
    Adjust(&'static str),
}

/// Whether the face is framed well enough to begin pose capture: box covers
/// at least [`MIN_FACE_AREA`] of the frame, box center inside the central
/// [0.2,0.8]² region, head roughly frontal.
pub fn check_positioning(obs: &FrameObservation) -> PositionCheck {
    let area = obs.bounding_box.area();
    if area < MIN_FACE_AREA {
        return PositionCheck::Adjust("Move closer to the camera");
    }
    if area > MAX_FACE_AREA {
        return PositionCheck::Adjust("Move back a little");
    }

    let center = obs.bounding_box.center();
    if center.x < 0.2 {
        return PositionCheck::Adjust("Move to your right");
    }
    if center.x > 0.8 {
        return PositionCheck::Adjust("Move to your left");
    }
    if center.y < 0.2 || center.y > 0.8 {
        return PositionCheck::Adjust("Center your face in the frame");
    }

    if obs.yaw.abs() >= 0.2 || obs.roll.abs() >= 0.2 {
        return PositionCheck::Adjust("Look straight at the camera");
    }

    PositionCheck::InPosition
}
