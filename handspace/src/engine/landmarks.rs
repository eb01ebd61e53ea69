//! Hand landmark data structures and single-hand geometry.
//!
//! Models the 21-point hand layout emitted by the external landmark
//! detector.  Points are normalized screen coordinates in `[0, 1]`
//! with an optional depth component that the engine ignores.

use tracing::debug;

// ── Landmark indices ───────────────────────────────────────

/// The 21 hand landmarks, in detector order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandLandmark {
    Wrist,
    ThumbCmc,
    ThumbMcp,
    ThumbIp,
    ThumbTip,
    IndexMcp,
    IndexPip,
    IndexDip,
    IndexTip,
    MiddleMcp,
    MiddlePip,
    MiddleDip,
    MiddleTip,
    RingMcp,
    RingPip,
    RingDip,
    RingTip,
    PinkyMcp,
    PinkyPip,
    PinkyDip,
    PinkyTip,
}

/// Total number of landmarks per hand.
pub const LANDMARK_COUNT: usize = 21;

impl HandLandmark {
    /// Array index of this landmark (0-20).
    pub fn index(&self) -> usize {
        *self as usize
    }

    /// Palm center.  The middle finger knuckle is the most stable point
    /// on the hand and is used as the hand's position everywhere.
    pub const PALM_CENTER: HandLandmark = HandLandmark::MiddleMcp;

    /// Fingertips, thumb first.
    pub fn fingertips() -> [HandLandmark; 5] {
        [
            Self::ThumbTip,
            Self::IndexTip,
            Self::MiddleTip,
            Self::RingTip,
            Self::PinkyTip,
        ]
    }
}

/// The four non-thumb fingers used for extension tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Finger {
    Index,
    Middle,
    Ring,
    Pinky,
}

impl Finger {
    pub const ALL: [Finger; 4] = [Finger::Index, Finger::Middle, Finger::Ring, Finger::Pinky];

    pub fn tip(&self) -> HandLandmark {
        match self {
            Self::Index => HandLandmark::IndexTip,
            Self::Middle => HandLandmark::MiddleTip,
            Self::Ring => HandLandmark::RingTip,
            Self::Pinky => HandLandmark::PinkyTip,
        }
    }

    /// PIP joint used as the extension reference (6, 10, 14, 18).
    pub fn pip(&self) -> HandLandmark {
        match self {
            Self::Index => HandLandmark::IndexPip,
            Self::Middle => HandLandmark::MiddlePip,
            Self::Ring => HandLandmark::RingPip,
            Self::Pinky => HandLandmark::PinkyPip,
        }
    }
}

// ── Hand side ──────────────────────────────────────────────

/// Which hand, as labelled by the detector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandSide {
    Left,
    Right,
}

impl HandSide {
    pub const BOTH: [HandSide; 2] = [HandSide::Left, HandSide::Right];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Left => "left",
            Self::Right => "right",
        }
    }

    /// Parse a side label.  Accepts the detector's capitalized form too.
    pub fn parse(s: &str) -> Option<HandSide> {
        match s {
            "left" | "Left" => Some(Self::Left),
            "right" | "Right" => Some(Self::Right),
            _ => None,
        }
    }
}

// ── Points ─────────────────────────────────────────────────

/// A single normalized landmark.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Landmark {
    pub x: f32,
    pub y: f32,
    /// Relative depth; carried through but unused by the engine.
    pub z: f32,
}

impl Landmark {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y, z: 0.0 }
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }

    pub fn point(&self) -> Point2 {
        Point2 {
            x: self.x,
            y: self.y,
        }
    }
}

/// Screen-space point.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Point2 {
    pub x: f32,
    pub y: f32,
}

impl Point2 {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    /// Euclidean distance in the screen plane.
    pub fn distance(&self, other: &Point2) -> f32 {
        (self.x - other.x).hypot(self.y - other.y)
    }
}

/// Planar distance between two landmarks (depth ignored).
pub fn distance(a: &Landmark, b: &Landmark) -> f32 {
    (a.x - b.x).hypot(a.y - b.y)
}

// ── Hand ───────────────────────────────────────────────────

/// One detected hand: exactly 21 landmarks.
#[derive(Debug, Clone, PartialEq)]
pub struct Hand {
    pub side: HandSide,
    landmarks: [Landmark; LANDMARK_COUNT],
}

impl Hand {
    /// Build a hand from detector output.  Anything other than exactly
    /// 21 finite points is not a hand and yields `None`.
    pub fn new(side: HandSide, points: &[Landmark]) -> Option<Hand> {
        let landmarks: [Landmark; LANDMARK_COUNT] = points.try_into().ok()?;
        if !landmarks.iter().all(Landmark::is_finite) {
            return None;
        }
        Some(Self { side, landmarks })
    }

    pub fn landmark(&self, which: HandLandmark) -> &Landmark {
        &self.landmarks[which.index()]
    }

    pub fn landmarks(&self) -> &[Landmark; LANDMARK_COUNT] {
        &self.landmarks
    }

    /// Palm center (landmark 9) in screen space.
    pub fn palm_center(&self) -> Point2 {
        self.landmark(HandLandmark::PALM_CENTER).point()
    }

    /// Angle of the wrist → middle-knuckle vector, in radians.
    pub fn orientation(&self) -> f32 {
        let wrist = self.landmark(HandLandmark::Wrist);
        let knuckle = self.landmark(HandLandmark::MiddleMcp);
        (knuckle.y - wrist.y).atan2(knuckle.x - wrist.x)
    }

    /// Mean distance from each fingertip to the palm center.
    pub fn finger_spread(&self) -> f32 {
        let palm = self.landmark(HandLandmark::PALM_CENTER);
        let tips = HandLandmark::fingertips();
        let total: f32 = tips
            .iter()
            .map(|tip| distance(self.landmark(*tip), palm))
            .sum();
        total / tips.len() as f32
    }

    /// Distance between thumb tip and index tip.
    pub fn thumb_index_distance(&self) -> f32 {
        distance(
            self.landmark(HandLandmark::ThumbTip),
            self.landmark(HandLandmark::IndexTip),
        )
    }

    /// A finger is extended when its tip is further from the wrist than
    /// `ratio` times its PIP joint's distance.
    pub fn is_extended(&self, finger: Finger, ratio: f32) -> bool {
        let wrist = self.landmark(HandLandmark::Wrist);
        let tip_dist = distance(self.landmark(finger.tip()), wrist);
        let pip_dist = distance(self.landmark(finger.pip()), wrist);
        tip_dist > pip_dist * ratio
    }
}

// ── Frame ──────────────────────────────────────────────────

/// Hands present in one detector frame, at most one per side.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HandFrame {
    pub left: Option<Hand>,
    pub right: Option<Hand>,
}

impl HandFrame {
    pub fn new(left: Option<Hand>, right: Option<Hand>) -> Self {
        Self { left, right }
    }

    /// Collect raw detections into a frame.
    ///
    /// Detections with the wrong landmark count are dropped (the side is
    /// treated as absent).  When the detector reports the same side twice
    /// the later detection wins.
    pub fn from_detections<I>(detections: I) -> Self
    where
        I: IntoIterator<Item = (HandSide, Vec<Landmark>)>,
    {
        let mut frame = Self::default();
        for (side, points) in detections {
            let Some(hand) = Hand::new(side, &points) else {
                debug!(
                    "Dropping {:?} hand: expected {} finite landmarks, got {}",
                    side,
                    LANDMARK_COUNT,
                    points.len(),
                );
                continue;
            };
            let slot = frame.slot_mut(side);
            if slot.is_some() {
                debug!("Duplicate {:?} hand in frame, keeping the later one", side);
            }
            *slot = Some(hand);
        }
        frame
    }

    pub fn hand(&self, side: HandSide) -> Option<&Hand> {
        match side {
            HandSide::Left => self.left.as_ref(),
            HandSide::Right => self.right.as_ref(),
        }
    }

    fn slot_mut(&mut self, side: HandSide) -> &mut Option<Hand> {
        match side {
            HandSide::Left => &mut self.left,
            HandSide::Right => &mut self.right,
        }
    }

    pub fn hand_count(&self) -> usize {
        self.left.is_some() as usize + self.right.is_some() as usize
    }
}

// ── Test fixtures ──────────────────────────────────────────


// ── Tests ──────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;
    use std::f32::consts::FRAC_PI_2;

    fn flat_points(n: usize) -> Vec<Landmark> {
        (0..n).map(|i| Landmark::new(i as f32 * 0.01, 0.5)).collect()
    }

    #[test]
    fn test_landmark_indices() {
        assert_eq!(HandLandmark::Wrist.index(), 0);
        assert_eq!(HandLandmark::ThumbTip.index(), 4);
        assert_eq!(HandLandmark::IndexTip.index(), 8);
        assert_eq!(HandLandmark::PALM_CENTER.index(), 9);
        assert_eq!(HandLandmark::PinkyPip.index(), 18);
        assert_eq!(HandLandmark::PinkyTip.index(), 20);
        assert_eq!(LANDMARK_COUNT, 21);
    }

    #[test]
    fn test_hand_requires_21_points() {
        assert!(Hand::new(HandSide::Left, &flat_points(21)).is_some());
        assert!(Hand::new(HandSide::Left, &flat_points(20)).is_none());
        assert!(Hand::new(HandSide::Left, &flat_points(22)).is_none());
        assert!(Hand::new(HandSide::Left, &[]).is_none());
    }

    #[test]
    fn test_palm_center_is_landmark_9() {
        let hand = Hand::new(HandSide::Right, &flat_points(21)).unwrap();
        let palm = hand.palm_center();
        assert!((palm.x - 0.09).abs() < 1e-6);
        assert!((palm.y - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_orientation_upright_hand() {
        // Knuckle straight above the wrist (smaller y) → -π/2.
        let hand = open_palm(HandSide::Left, (0.5, 0.5));
        assert!((hand.orientation() + FRAC_PI_2).abs() < 1e-5);
    }

    #[test]
    fn test_orientation_follows_rotation() {
        let hand = open_palm(HandSide::Left, (0.5, 0.5));
        let turned = rotated(&hand, 0.3);
        assert!((turned.orientation() - hand.orientation() - 0.3).abs() < 1e-4);
    }

    #[test]
    fn test_finger_spread_open_vs_fist() {
        let open = open_palm(HandSide::Left, (0.5, 0.5));
        let fist = fist(HandSide::Left, (0.5, 0.5));
        assert!(open.finger_spread() > fist.finger_spread());
    }

    #[test]
    fn test_thumb_index_distance() {
        let pinch = pinch(HandSide::Right, (0.5, 0.5));
        assert!((pinch.thumb_index_distance() - 0.02).abs() < 1e-5);
    }

    #[test]
    fn test_is_extended() {
        let hand = point(HandSide::Right, (0.5, 0.5));
        assert!(hand.is_extended(Finger::Index, 1.1));
        assert!(!hand.is_extended(Finger::Middle, 1.1));
        assert!(!hand.is_extended(Finger::Ring, 1.1));
        assert!(!hand.is_extended(Finger::Pinky, 1.1));
    }

    #[test]
    fn test_frame_from_detections() {
        let frame = HandFrame::from_detections(vec![
            (HandSide::Left, flat_points(21)),
            (HandSide::Right, flat_points(5)),
        ]);
        assert!(frame.left.is_some());
        assert!(frame.right.is_none());
        assert_eq!(frame.hand_count(), 1);
    }

    #[test]
    fn test_frame_duplicate_side_keeps_later() {
        let mut later = flat_points(21);
        later[0] = Landmark::new(0.9, 0.9);
        let frame = HandFrame::from_detections(vec![
            (HandSide::Right, flat_points(21)),
            (HandSide::Right, later),
        ]);
        let wrist = frame.right.unwrap().landmark(HandLandmark::Wrist).x;
        assert!((wrist - 0.9).abs() < 1e-6);
    }

    #[test]
    fn test_side_parse() {
        assert_eq!(HandSide::parse("left"), Some(HandSide::Left));
        assert_eq!(HandSide::parse("Right"), Some(HandSide::Right));
        assert_eq!(HandSide::parse("both"), None);
        assert_eq!(HandSide::Left.as_str(), "left");
    }

    #[test]
    fn test_hand_rejects_non_finite_points() {
        let mut points = flat_points(21);
        points[HandLandmark::PALM_CENTER.index()] = Landmark::new(f32::INFINITY, 0.5);
        assert!(Hand::new(HandSide::Left, &points).is_none());
        points[HandLandmark::PALM_CENTER.index()] = Landmark::new(0.5, 0.5);
        points[HandLandmark::Wrist.index()].z = f32::NAN;
        assert!(Hand::new(HandSide::Left, &points).is_none());

        let frame = HandFrame::from_detections(vec![(HandSide::Left, points)]);
        assert_eq!(frame.hand_count(), 0);
    }
}
