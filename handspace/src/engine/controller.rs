//! Single-hand "VR controller" manipulation.
//!
//! While a hand holds a grab, pinch or point pose it acts like a handheld
//! motion controller: palm motion translates the object and wrist roll
//! rotates it.  Each side runs its own instance.
//!
//! The transition logic is the pure function [`step`]; [`HandController`]
//! only owns the state between frames.

use std::f32::consts::{PI, TAU};

use tracing::debug;

use super::gesture::GestureLabel;
use super::landmarks::{Hand, HandSide, Point2};
use super::smoothing::RollingBuffer;
use super::transform::{Point3, TransformBounds};

/// Translation and rotation gains.
#[derive(Debug, Clone, PartialEq)]
pub struct ControllerConfig {
    /// Scene units per unit of horizontal palm motion.
    pub gain_x: f32,
    /// Scene units per unit of vertical palm motion.
    pub gain_y: f32,
    /// Orientation change (radians) below which no rotation is applied.
    pub rotation_deadband: f32,
    /// Object radians per radian of wrist roll.
    pub rotation_gain: f32,
    /// Samples in the rotation smoothing window.
    pub window: usize,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            gain_x: 12.0,
            gain_y: 10.0,
            rotation_deadband: 0.02,
            rotation_gain: 3.0,
            window: 5,
        }
    }
}

impl ControllerConfig {
    pub fn sexp(&self) -> String {
        format!(
            "(:gain-x {:.2} :gain-y {:.2} :rotation-deadband {:.3} :rotation-gain {:.2} :window {})",
            self.gain_x, self.gain_y, self.rotation_deadband, self.rotation_gain, self.window,
        )
    }
}

/// Controller state for one side.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum ControllerState {
    #[default]
    Inactive,
    Active {
        /// Palm position at the previous frame.
        anchor: Point2,
        /// Object position the next palm delta is applied to.
        base: Point3,
        /// Hand orientation at the previous frame.
        prev_orientation: f32,
        /// Smoothed rotation steps for this side.
        rotation: RollingBuffer,
    },
}

impl ControllerState {
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Active { .. })
    }
}

/// Per-frame inputs for one side.
#[derive(Debug, Clone, Copy)]
pub struct ControllerInput<'a> {
    pub hand: Option<&'a Hand>,
    pub gesture: GestureLabel,
    /// Object position as committed before this controller runs.
    pub position: Point3,
}

/// Change to apply to the object transform.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct TransformMutation {
    pub position: Option<Point3>,
    /// Added to the object's x rotation.
    pub rotation_x: Option<f32>,
}

impl TransformMutation {
    pub fn is_empty(&self) -> bool {
        self.position.is_none() && self.rotation_x.is_none()
    }
}

/// Lifecycle change produced by a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Engaged,
    Released,
}

/// Wrap an angle difference into `(-π, π]`.
pub fn wrap_angle(mut delta: f32) -> f32 {
    while delta > PI {
        delta -= TAU;
    }
    while delta <= -PI {
        delta += TAU;
    }
    delta
}

/// Advance one side's controller by one frame.
pub fn step(
    state: ControllerState,
    input: &ControllerInput<'_>,
    config: &ControllerConfig,
    bounds: &TransformBounds,
) -> (ControllerState, TransformMutation, Option<Transition>) {
    let hand = match input.hand {
        Some(hand) if input.gesture.is_controller_pose() => hand,
        _ => {
            let released = state.is_active().then_some(Transition::Released);
            return (ControllerState::Inactive, TransformMutation::default(), released);
        }
    };

    let palm = hand.palm_center();
    let orientation = hand.orientation();

    match state {
        ControllerState::Inactive => {
            let next = ControllerState::Active {
                anchor: palm,
                base: input.position,
                prev_orientation: orientation,
                rotation: RollingBuffer::new(config.window),
            };
            (next, TransformMutation::default(), Some(Transition::Engaged))
        }
        ControllerState::Active {
            anchor,
            base,
            prev_orientation,
            mut rotation,
        } => {
            // Video is mirrored, so screen motion is inverted on both axes.
            let moved = Point3 {
                x: base.x - (palm.x - anchor.x) * config.gain_x,
                y: base.y - (palm.y - anchor.y) * config.gain_y,
                z: base.z,
            };
            let position = bounds.clamp_position(moved);

            let delta = wrap_angle(orientation - prev_orientation);
            let rotation_x = (delta.abs() > config.rotation_deadband)
                .then(|| rotation.push(delta * config.rotation_gain));

            let next = ControllerState::Active {
                anchor: palm,
                base: position,
                prev_orientation: orientation,
                rotation,
            };
            let mutation = TransformMutation {
                position: Some(position),
                rotation_x,
            };
            (next, mutation, None)
        }
    }
}

/// Owns one side's controller state between frames.
#[derive(Debug, Clone)]
pub struct HandController {
    pub side: HandSide,
    state: ControllerState,
}

impl HandController {
    pub fn new(side: HandSide) -> Self {
        Self {
            side,
            state: ControllerState::Inactive,
        }
    }

    pub fn state(&self) -> &ControllerState {
        &self.state
    }

    pub fn is_active(&self) -> bool {
        self.state.is_active()
    }

    pub fn update(
        &mut self,
        input: &ControllerInput<'_>,
        config: &ControllerConfig,
        bounds: &TransformBounds,
    ) -> (TransformMutation, Option<Transition>) {
        let state = std::mem::take(&mut self.state);
        let (next, mutation, transition) = step(state, input, config, bounds);
        self.state = next;
        match transition {
            Some(Transition::Engaged) => debug!(side = self.side.as_str(), "Controller engaged"),
            Some(Transition::Released) => debug!(side = self.side.as_str(), "Controller released"),
            None => {}
        }
        (mutation, transition)
    }

    /// Tear the controller down regardless of input.  Returns whether it
    /// was active.
    pub fn deactivate(&mut self) -> bool {
        let was_active = self.is_active();
        self.state = ControllerState::Inactive;
        if was_active {
            debug!(side = self.side.as_str(), "Controller force-released");
        }
        was_active
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::landmarks::fixtures::*;

    fn run(
        state: ControllerState,
        hand: Option<&Hand>,
        gesture: GestureLabel,
        position: Point3,
    ) -> (ControllerState, TransformMutation, Option<Transition>) {
        step(
            state,
            &ControllerInput {
                hand,
                gesture,
                position,
            },
            &ControllerConfig::default(),
            &TransformBounds::default(),
        )
    }

    #[test]
    fn test_engage_snapshots_anchor_and_base() {
        let hand = fist(HandSide::Right, (0.5, 0.5));
        let origin = Point3::new(1.0, 2.0, 0.5);
        let (state, mutation, transition) =
            run(ControllerState::Inactive, Some(&hand), GestureLabel::Grab, origin);
        assert_eq!(transition, Some(Transition::Engaged));
        assert!(mutation.is_empty());
        match state {
            ControllerState::Active { anchor, base, .. } => {
                assert!((anchor.x - 0.5).abs() < 1e-6);
                assert!((anchor.y - 0.5).abs() < 1e-6);
                assert_eq!(base, origin);
            }
            ControllerState::Inactive => panic!("expected active"),
        }
    }

    #[test]
    fn test_palm_motion_translates_object() {
        let start = fist(HandSide::Right, (0.5, 0.5));
        let moved = fist(HandSide::Right, (0.4, 0.5));
        let (state, _, _) =
            run(ControllerState::Inactive, Some(&start), GestureLabel::Grab, Point3::default());
        let (_, mutation, transition) =
            run(state, Some(&moved), GestureLabel::Grab, Point3::default());
        assert_eq!(transition, None);
        let p = mutation.position.unwrap();
        // -(-0.1) * 12
        assert!((p.x - 1.2).abs() < 1e-4, "x = {}", p.x);
        assert!(p.y.abs() < 1e-4);
        assert_eq!(p.z, 0.0);
    }

    #[test]
    fn test_vertical_motion_inverted() {
        let start = point(HandSide::Left, (0.5, 0.5));
        let moved = point(HandSide::Left, (0.5, 0.6));
        let (state, _, _) =
            run(ControllerState::Inactive, Some(&start), GestureLabel::Point, Point3::default());
        let (_, mutation, _) = run(state, Some(&moved), GestureLabel::Point, Point3::default());
        // -(0.1) * 10
        assert!((mutation.position.unwrap().y + 1.0).abs() < 1e-4);
    }

    #[test]
    fn test_motion_integrates_across_frames() {
        let mut state = ControllerState::Inactive;
        let mut position = Point3::default();
        for x in [0.5, 0.45, 0.40, 0.35] {
            let hand = fist(HandSide::Right, (x, 0.5));
            let (next, mutation, _) = run(state, Some(&hand), GestureLabel::Grab, position);
            state = next;
            if let Some(p) = mutation.position {
                position = p;
            }
        }
        // Total palm travel -0.15 → +1.8
        assert!((position.x - 1.8).abs() < 1e-3, "x = {}", position.x);
    }

    #[test]
    fn test_position_clamped() {
        let start = fist(HandSide::Right, (0.9, 0.1));
        let moved = fist(HandSide::Right, (0.1, 0.9));
        let (state, _, _) =
            run(ControllerState::Inactive, Some(&start), GestureLabel::Grab, Point3::default());
        let (_, mutation, _) = run(state, Some(&moved), GestureLabel::Grab, Point3::default());
        let p = mutation.position.unwrap();
        assert_eq!(p.x, 6.0);
        assert_eq!(p.y, -5.0);
    }

    #[test]
    fn test_switching_qualifying_poses_keeps_controller() {
        let a = fist(HandSide::Left, (0.5, 0.5));
        let b = pinch(HandSide::Left, (0.5, 0.5));
        let (state, _, _) =
            run(ControllerState::Inactive, Some(&a), GestureLabel::Grab, Point3::default());
        let (state, _, transition) = run(state, Some(&b), GestureLabel::Pinch, Point3::default());
        assert_eq!(transition, None);
        let (state, _, transition) = run(state, Some(&a), GestureLabel::Point, Point3::default());
        assert_eq!(transition, None);
        assert!(state.is_active());
    }

    #[test]
    fn test_non_qualifying_pose_releases() {
        let hand = fist(HandSide::Left, (0.5, 0.5));
        let (state, _, _) =
            run(ControllerState::Inactive, Some(&hand), GestureLabel::Grab, Point3::default());
        for gesture in [GestureLabel::PalmOpen, GestureLabel::Victory, GestureLabel::Idle] {
            let (next, mutation, transition) =
                run(state.clone(), Some(&hand), gesture, Point3::default());
            assert_eq!(next, ControllerState::Inactive);
            assert!(mutation.is_empty());
            assert_eq!(transition, Some(Transition::Released));
        }
    }

    #[test]
    fn test_hand_loss_releases() {
        let hand = fist(HandSide::Left, (0.5, 0.5));
        let (state, _, _) =
            run(ControllerState::Inactive, Some(&hand), GestureLabel::Grab, Point3::default());
        let (next, _, transition) = run(state, None, GestureLabel::Grab, Point3::default());
        assert_eq!(next, ControllerState::Inactive);
        assert_eq!(transition, Some(Transition::Released));
    }

    #[test]
    fn test_inactive_without_hand_is_noop() {
        let (next, mutation, transition) =
            run(ControllerState::Inactive, None, GestureLabel::Idle, Point3::default());
        assert_eq!(next, ControllerState::Inactive);
        assert!(mutation.is_empty());
        assert_eq!(transition, None);
    }

    #[test]
    fn test_reengage_uses_fresh_anchor() {
        let first = fist(HandSide::Right, (0.5, 0.5));
        let (state, _, _) =
            run(ControllerState::Inactive, Some(&first), GestureLabel::Grab, Point3::default());
        let (state, _, _) = run(state, None, GestureLabel::Idle, Point3::default());

        // Object moved elsewhere meanwhile; hand returns at a new spot.
        let current = Point3::new(-2.0, 1.0, 0.0);
        let back = fist(HandSide::Right, (0.2, 0.8));
        let (state, mutation, transition) =
            run(state, Some(&back), GestureLabel::Grab, current);
        assert_eq!(transition, Some(Transition::Engaged));
        assert!(mutation.is_empty());

        // Holding still produces no jump.
        let (_, mutation, _) = run(state, Some(&back), GestureLabel::Grab, current);
        assert_eq!(mutation.position, Some(current));
    }

    #[test]
    fn test_wrist_roll_rotates() {
        let start = fist(HandSide::Right, (0.5, 0.5));
        let rolled = rotated(&start, 0.1);
        let (state, _, _) =
            run(ControllerState::Inactive, Some(&start), GestureLabel::Grab, Point3::default());
        let (_, mutation, _) = run(state, Some(&rolled), GestureLabel::Grab, Point3::default());
        // First sample: mean == 0.1 * 3
        assert!((mutation.rotation_x.unwrap() - 0.3).abs() < 1e-3);
    }

    #[test]
    fn test_small_roll_ignored() {
        let start = fist(HandSide::Right, (0.5, 0.5));
        let rolled = rotated(&start, 0.01);
        let (state, _, _) =
            run(ControllerState::Inactive, Some(&start), GestureLabel::Grab, Point3::default());
        let (state, mutation, _) = run(state, Some(&rolled), GestureLabel::Grab, Point3::default());
        assert_eq!(mutation.rotation_x, None);
        match state {
            ControllerState::Active { prev_orientation, .. } => {
                // Reference still advances every frame.
                assert!((prev_orientation - rolled.orientation()).abs() < 1e-6);
            }
            ControllerState::Inactive => panic!("expected active"),
        }
    }

    #[test]
    fn test_rotation_smoothed_over_window() {
        let mut hand = fist(HandSide::Right, (0.5, 0.5));
        let (mut state, _, _) =
            run(ControllerState::Inactive, Some(&hand), GestureLabel::Grab, Point3::default());
        let mut last = 0.0;
        for roll in [0.1, 0.1, -0.1] {
            hand = rotated(&hand, roll);
            let (next, mutation, _) = run(state, Some(&hand), GestureLabel::Grab, Point3::default());
            state = next;
            last = mutation.rotation_x.unwrap();
        }
        // Window holds 0.3, 0.3, -0.3
        assert!((last - 0.1).abs() < 1e-3, "mean = {}", last);
    }

    #[test]
    fn test_wrap_angle() {
        assert!((wrap_angle(0.5) - 0.5).abs() < 1e-6);
        assert!((wrap_angle(PI + 0.1) - (-PI + 0.1)).abs() < 1e-5);
        assert!((wrap_angle(-PI - 0.1) - (PI - 0.1)).abs() < 1e-5);
        assert!((wrap_angle(-PI) - PI).abs() < 1e-6);
        assert!((wrap_angle(PI) - PI).abs() < 1e-6);
    }

    #[test]
    fn test_hand_controller_force_deactivate() {
        let mut ctl = HandController::new(HandSide::Left);
        let hand = fist(HandSide::Left, (0.5, 0.5));
        let input = ControllerInput {
            hand: Some(&hand),
            gesture: GestureLabel::Grab,
            position: Point3::default(),
        };
        let (_, transition) =
            ctl.update(&input, &ControllerConfig::default(), &TransformBounds::default());
        assert_eq!(transition, Some(Transition::Engaged));
        assert!(ctl.deactivate());
        assert!(!ctl.is_active());
        assert!(!ctl.deactivate());
    }
}
