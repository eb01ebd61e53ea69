//! Gesture classification from hand landmark geometry.
//!
//! Maps one hand's 21 landmarks to a discrete [`GestureLabel`].  The
//! classifier itself is stateless; [`GestureTracker`] remembers the
//! previous label per side so the arbiter can react to label changes.

use tracing::debug;

use super::landmarks::{Finger, Hand, HandSide};

// ── Gesture labels ─────────────────────────────────────────

/// Recognized hand poses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum GestureLabel {
    /// No recognized pose (or no hand).
    #[default]
    Idle,
    /// Thumb and index fingertips together, or all fingertips bunched
    /// at the palm.
    Pinch,
    /// Fist: no finger extended, thumb tucked.
    Grab,
    /// All four fingers extended.
    PalmOpen,
    /// Index finger extended, others curled.
    Point,
    /// Index and middle fingers extended.
    Victory,
}

impl GestureLabel {
    /// String representation for IPC.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Pinch => "pinch",
            Self::Grab => "grab",
            Self::PalmOpen => "palm-open",
            Self::Point => "point",
            Self::Victory => "victory",
        }
    }

    pub fn is_idle(&self) -> bool {
        *self == Self::Idle
    }

    /// Whether this pose drives a single-hand controller.
    pub fn is_controller_pose(&self) -> bool {
        matches!(self, Self::Grab | Self::Pinch | Self::Point)
    }
}

// ── Config ─────────────────────────────────────────────────

/// Classifier thresholds, in normalized screen units.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassifierConfig {
    /// Tip-to-wrist over PIP-to-wrist ratio above which a finger counts
    /// as extended.
    pub extension_ratio: f32,
    /// Thumb–index distance below which the hand is pinching.
    pub pinch_distance: f32,
    /// Mean fingertip-to-palm distance below which the hand is pinching.
    pub pinch_spread: f32,
    /// Thumb–index distance below which a closed hand counts as a fist.
    pub grab_thumb_distance: f32,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            extension_ratio: 1.1,
            pinch_distance: 0.06,
            pinch_spread: 0.08,
            grab_thumb_distance: 0.10,
        }
    }
}

impl ClassifierConfig {
    pub fn sexp(&self) -> String {
        format!(
            "(:extension-ratio {:.3} :pinch-distance {:.3} :pinch-spread {:.3} :grab-thumb-distance {:.3})",
            self.extension_ratio, self.pinch_distance, self.pinch_spread, self.grab_thumb_distance,
        )
    }
}

// ── Classification ─────────────────────────────────────────

/// Classify a single hand.  First match wins; pinch dominates.
pub fn classify(hand: &Hand, config: &ClassifierConfig) -> GestureLabel {
    let thumb_index = hand.thumb_index_distance();
    if thumb_index < config.pinch_distance || hand.finger_spread() < config.pinch_spread {
        return GestureLabel::Pinch;
    }

    let [index, middle, ring, pinky] =
        Finger::ALL.map(|finger| hand.is_extended(finger, config.extension_ratio));

    if index && middle && ring && pinky {
        return GestureLabel::PalmOpen;
    }

    if !index && !middle && !ring && !pinky && thumb_index < config.grab_thumb_distance {
        return GestureLabel::Grab;
    }

    match (index, middle, ring, pinky) {
        (true, false, false, false) => GestureLabel::Point,
        (true, true, false, false) => GestureLabel::Victory,
        _ => GestureLabel::Idle,
    }
}

// ── Per-side label tracking ────────────────────────────────

/// A change of label on one side between consecutive frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GestureEdge {
    pub side: HandSide,
    pub from: GestureLabel,
    pub to: GestureLabel,
}

/// Remembers the last label seen on each side.
#[derive(Debug, Clone, Default)]
pub struct GestureTracker {
    left: GestureLabel,
    right: GestureLabel,
}

impl GestureTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self, side: HandSide) -> GestureLabel {
        match side {
            HandSide::Left => self.left,
            HandSide::Right => self.right,
        }
    }

    /// Record this frame's label for `side`.  An absent hand is `Idle`.
    pub fn update(&mut self, side: HandSide, label: GestureLabel) -> Option<GestureEdge> {
        let slot = match side {
            HandSide::Left => &mut self.left,
            HandSide::Right => &mut self.right,
        };
        let from = std::mem::replace(slot, label);
        if from == label {
            return None;
        }
        debug!("Gesture {:?} -> {:?} on {:?}", from, label, side);
        Some(GestureEdge {
            side,
            from,
            to: label,
        })
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

// ── Tests ──────────────────────────────────────────────────
