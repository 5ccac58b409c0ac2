//! Active liveness challenges: blink and smile detection from landmark
//! geometry over a sliding frame window.
//!
//! A static photograph cannot blink or smile on cue. Blink detection uses the
//! eye-aspect-ratio (EAR) of the 6-point eye contour; a blink is a short
//! closed-eye streak followed by reopening. A long closed streak is an
//! eyes-closed event, not a blink, and is deliberately not scored. Smile
//! detection uses the width/height ratio of the outer-lip contour and
//! requires a sustained count of smiling frames so a single transient frame
//! cannot pass the challenge.

use serde::{Deserialize, Serialize};

use crate::observation::{x_extent, y_extent, FrameObservation, Point, MIN_DENOMINATOR};

/// EAR above which an eye counts as open.
pub const EAR_OPEN_THRESHOLD: f32 = 0.18;
/// Shortest closed-eye streak scored as a blink, frames.
pub const MIN_BLINK_STREAK: u32 = 3;
/// Longest closed-eye streak scored as a blink, frames. Longer streaks are
/// eyes-closed events.
pub const MAX_BLINK_STREAK: u32 = 14;
/// Blinks required to pass the blink challenge.
pub const BLINKS_REQUIRED: u32 = 2;

/// Mouth width/height ratio above which the face counts as smiling.
pub const SMILE_RATIO_THRESHOLD: f32 = 3.0;
/// Cumulative smiling frames required to pass the smile challenge.
pub const SMILE_FRAMES_REQUIRED: u32 = 10;

/// Yaw magnitude a turn challenge must reach, radians.
pub const TURN_YAW_THRESHOLD: f32 = 0.3;
/// Consecutive frames the turn must be held.
pub const TURN_HOLD_FRAMES: u32 = 5;

/// Eye-aspect-ratio of a 6-point ordered eye contour:
/// `(|p1−p5| + |p2−p4|) / (2·|p0−p3|)`. `None` if fewer than 6 points.
pub fn eye_aspect_ratio(eye: &[Point]) -> Option<f32> {
    if eye.len() < 6 {
        return None;
    }
    let vertical = eye[1].distance(&eye[5]) + eye[2].distance(&eye[4]);
    let horizontal = 2.0 * eye[0].distance(&eye[3]);
    Some(vertical / horizontal.max(MIN_DENOMINATOR))
}

/// Whether an eye contour reads as open. `None` if the contour is malformed.
pub fn eye_open(eye: &[Point]) -> Option<bool> {
    eye_aspect_ratio(eye).map(|ear| ear > EAR_OPEN_THRESHOLD)
}

/// Mouth width/height ratio of the outer-lip contour. `None` if the contour
/// has fewer than 4 points.
pub fn mouth_aspect_ratio(lips: &[Point]) -> Option<f32> {
    if lips.len() < 4 {
        return None;
    }
    let width = x_extent(lips);
    let height = y_extent(lips);
    Some(width / height.max(MIN_DENOMINATOR))
}

/// Whether the outer-lip contour reads as a smile.
pub fn is_smiling(lips: &[Point]) -> Option<bool> {
    mouth_aspect_ratio(lips).map(|ratio| ratio > SMILE_RATIO_THRESHOLD)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Challenge {
    Blink,
    Smile,
    TurnLeft,
    TurnRight,
}

/// Challenges the default verification flow requires, in order.
/// `TurnLeft`/`TurnRight` are reserved for future flows.
pub const REQUIRED_CHALLENGES: [Challenge; 2] = [Challenge::Blink, Challenge::Smile];

impl Challenge {
    pub fn prompt(&self) -> &'static str {
        match self {
            Challenge::Blink => "Blink twice",
            Challenge::Smile => "Give us a big smile",
            Challenge::TurnLeft => "Turn your head to the left",
            Challenge::TurnRight => "Turn your head to the right",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Challenge::Blink => "blink",
            Challenge::Smile => "smile",
            Challenge::TurnLeft => "turn left",
            Challenge::TurnRight => "turn right",
        }
    }
}

/// Per-challenge frame accumulator. Create one when a challenge becomes
/// active; feed it every frame until [`ChallengeTracker::observe`] reports
/// success or the challenge's frame budget runs out.
#[derive(Debug, Clone)]
pub struct ChallengeTracker {
    challenge: Challenge,
    closed_streak: u32,
    blink_count: u32,
    smile_frames: u32,
    turn_hold: u32,
}

impl ChallengeTracker {
    pub fn new(challenge: Challenge) -> Self {
        Self {
            challenge,
            closed_streak: 0,
            blink_count: 0,
            smile_frames: 0,
            turn_hold: 0,
        }
    }

    pub fn challenge(&self) -> Challenge {
        self.challenge
    }

    /// Blinks observed so far (blink challenge only).
    pub fn blink_count(&self) -> u32 {
        self.blink_count
    }

    /// Smiling frames observed so far (smile challenge only).
    pub fn smile_frames(&self) -> u32 {
        self.smile_frames
    }

    /// Feed one frame. Returns `true` once the challenge is satisfied.
    pub fn observe(&mut self, obs: &FrameObservation) -> bool {
        match self.challenge {
            Challenge::Blink => self.observe_blink(obs),
            Challenge::Smile => self.observe_smile(obs),
            Challenge::TurnLeft => self.observe_turn(obs.yaw <= -TURN_YAW_THRESHOLD),
            Challenge::TurnRight => self.observe_turn(obs.yaw >= TURN_YAW_THRESHOLD),
        }
    }

    fn observe_blink(&mut self, obs: &FrameObservation) -> bool {
        let (left, right) = (
            eye_open(&obs.landmarks.left_eye),
            eye_open(&obs.landmarks.right_eye),
        );
        match (left, right) {
            (Some(l), Some(r)) => {
                if !l && !r {
                    self.closed_streak += 1;
                } else {
                    if (MIN_BLINK_STREAK..=MAX_BLINK_STREAK).contains(&self.closed_streak) {
                        self.blink_count += 1;
                    }
                    self.closed_streak = 0;
                }
            }
            // Malformed eye contour: cannot tell open from closed. Abandon
            // the current streak without scoring it.
            _ => self.closed_streak = 0,
        }
        self.blink_count >= BLINKS_REQUIRED
    }

    fn observe_smile(&mut self, obs: &FrameObservation) -> bool {
        if is_smiling(&obs.landmarks.outer_lips) == Some(true) {
            self.smile_frames += 1;
        }
        self.smile_frames >= SMILE_FRAMES_REQUIRED
    }

    fn observe_turn(&mut self, turned: bool) -> bool {
        if turned {
            self.turn_hold += 1;
        } else {
            self.turn_hold = 0;
        }
        self.turn_hold >= TURN_HOLD_FRAMES
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observation::{BoundingBox, Landmarks};

    /// Horizontal 6-point eye contour with width 1.0 and the given EAR.
    fn eye_with_ear(ear: f32) -> Vec<Point> {
        let h = ear / 2.0;
        vec![
            Point::new(0.0, 0.0),
            Point::new(0.3, -h),
            Point::new(0.7, -h),
            Point::new(1.0, 0.0),
            Point::new(0.7, h),
            Point::new(0.3, h),
        ]
    }

    fn lips_with_ratio(ratio: f32) -> Vec<Point> {
        vec![
            Point::new(0.0, 0.0),
            Point::new(ratio, 0.0),
            Point::new(ratio / 2.0, -0.5),
            Point::new(ratio / 2.0, 0.5),
        ]
    }

    fn frame(eyes_open: bool) -> FrameObservation {
        let eye = if eyes_open {
            eye_with_ear(0.3)
        } else {
            eye_with_ear(0.05)
        };
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
            landmarks: Landmarks {
                left_eye: eye.clone(),
                right_eye: eye,
                ..Landmarks::default()
            },
        }
    }

    #[test]
    fn ear_just_above_threshold_is_open() {
        assert_eq!(eye_open(&eye_with_ear(0.181)), Some(true));
    }

    #[test]
    fn ear_just_below_threshold_is_closed() {
        assert_eq!(eye_open(&eye_with_ear(0.179)), Some(false));
    }

    #[test]
    fn ear_requires_six_points() {
        assert_eq!(eye_aspect_ratio(&[Point::new(0.0, 0.0); 5]), None);
    }

    fn run_streak(tracker: &mut ChallengeTracker, closed_frames: u32) {
        for _ in 0..closed_frames {
            tracker.observe(&frame(false));
        }
        tracker.observe(&frame(true));
    }

    #[test]
    fn streak_of_three_counts_as_blink() {
        let mut t = ChallengeTracker::new(Challenge::Blink);
        run_streak(&mut t, 3);
        assert_eq!(t.blink_count(), 1);
    }

    #[test]
    fn streak_of_fourteen_counts_as_blink() {
        let mut t = ChallengeTracker::new(Challenge::Blink);
        run_streak(&mut t, 14);
        assert_eq!(t.blink_count(), 1);
    }

    #[test]
    fn streak_of_two_is_not_a_blink() {
        let mut t = ChallengeTracker::new(Challenge::Blink);
        run_streak(&mut t, 2);
        assert_eq!(t.blink_count(), 0);
    }

    #[test]
    fn streak_of_fifteen_is_eyes_closed_not_blink() {
        let mut t = ChallengeTracker::new(Challenge::Blink);
        run_streak(&mut t, 15);
        assert_eq!(t.blink_count(), 0);
    }

    #[test]
    fn two_blinks_satisfy_challenge() {
        let mut t = ChallengeTracker::new(Challenge::Blink);
        run_streak(&mut t, 4);
        assert_eq!(t.blink_count(), 1);
        for _ in 0..4 {
            assert!(!t.observe(&frame(false)));
        }
        assert!(t.observe(&frame(true)));
        assert_eq!(t.blink_count(), 2);
    }

    #[test]
    fn malformed_eye_contour_abandons_streak() {
        let mut t = ChallengeTracker::new(Challenge::Blink);
        for _ in 0..5 {
            t.observe(&frame(false));
        }
        // Frame with no eye landmarks at all
        let mut bad = frame(true);
        bad.landmarks.left_eye.clear();
        t.observe(&bad);
        // Streak ended without scoring
        t.observe(&frame(true));
        assert_eq!(t.blink_count(), 0);
    }

    #[test]
    fn smile_ratio_boundary() {
        assert_eq!(is_smiling(&lips_with_ratio(3.2)), Some(true));
        assert_eq!(is_smiling(&lips_with_ratio(2.8)), Some(false));
    }

    #[test]
    fn single_smiling_frame_does_not_pass() {
        let mut t = ChallengeTracker::new(Challenge::Smile);
        let mut f = frame(true);
        f.landmarks.outer_lips = lips_with_ratio(3.5);
        assert!(!t.observe(&f));
        assert_eq!(t.smile_frames(), 1);
    }

    #[test]
    fn ten_smiling_frames_pass() {
        let mut t = ChallengeTracker::new(Challenge::Smile);
        let mut f = frame(true);
        f.landmarks.outer_lips = lips_with_ratio(3.5);
        let mut done = false;
        for _ in 0..10 {
            done = t.observe(&f);
        }
        assert!(done);
    }

    #[test]
    fn smiling_frames_need_not_be_consecutive() {
        let mut t = ChallengeTracker::new(Challenge::Smile);
        let mut smiling = frame(true);
        smiling.landmarks.outer_lips = lips_with_ratio(3.5);
        let mut neutral = frame(true);
        neutral.landmarks.outer_lips = lips_with_ratio(2.0);

        let mut done = false;
        for _ in 0..9 {
            done = t.observe(&smiling);
            t.observe(&neutral);
        }
        assert!(!done);
        assert!(t.observe(&smiling));
    }

    #[test]
    fn turn_left_requires_held_yaw() {
        let mut t = ChallengeTracker::new(Challenge::TurnLeft);
        let mut f = frame(true);
        f.yaw = -0.4;
        for _ in 0..TURN_HOLD_FRAMES - 1 {
            assert!(!t.observe(&f));
        }
        assert!(t.observe(&f));
    }

    #[test]
    fn turn_hold_resets_when_head_returns() {
        let mut t = ChallengeTracker::new(Challenge::TurnRight);
        let mut turned = frame(true);
        turned.yaw = 0.4;
        let centered = frame(true);
        for _ in 0..3 {
            t.observe(&turned);
        }
        t.observe(&centered);
        for _ in 0..TURN_HOLD_FRAMES - 1 {
            assert!(!t.observe(&turned));
        }
        assert!(t.observe(&turned));
    }
}
