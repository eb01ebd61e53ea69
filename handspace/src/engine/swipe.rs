//! Open-palm horizontal swipe → scene navigation.
//!
//! Tracks the palm center of one open hand between frames.  A large
//! horizontal jump fires a single navigation step, then the cooldown
//! blocks further steps until it expires.

use tracing::debug;

use super::gesture::GestureLabel;
use super::landmarks::{Hand, Point2};

#[derive(Debug, Clone, PartialEq)]
pub struct SwipeConfig {
    /// Horizontal palm travel between consecutive frames that counts as a
    /// swipe.
    pub min_delta_x: f32,
    /// Minimum time between two swipes.
    pub cooldown_ms: u64,
}

impl Default for SwipeConfig {
    fn default() -> Self {
        Self {
            min_delta_x: 0.18,
            cooldown_ms: 1000,
        }
    }
}

impl SwipeConfig {
    pub fn sexp(&self) -> String {
        format!(
            "(:min-delta-x {:.3} :cooldown-ms {})",
            self.min_delta_x, self.cooldown_ms,
        )
    }
}

/// Navigation direction.  Screen space is mirrored, so a palm moving
/// toward smaller `x` on screen advances.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwipeDirection {
    Advance,
    Retreat,
}

impl SwipeDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Advance => "advance",
            Self::Retreat => "retreat",
        }
    }
}

/// Swipe detector state.
#[derive(Debug, Clone, Default)]
pub struct SwipeNavigator {
    pub config: SwipeConfig,
    prev_centroid: Option<Point2>,
    last_trigger_ms: Option<u64>,
}

impl SwipeNavigator {
    pub fn new(config: SwipeConfig) -> Self {
        Self {
            config,
            prev_centroid: None,
            last_trigger_ms: None,
        }
    }

    /// The hand that drives swiping: right if present, else left.
    pub fn select<'a>(
        left: Option<(&'a Hand, GestureLabel)>,
        right: Option<(&'a Hand, GestureLabel)>,
    ) -> Option<(&'a Hand, GestureLabel)> {
        right.or(left)
    }

    pub fn prev_centroid(&self) -> Option<Point2> {
        self.prev_centroid
    }

    pub fn last_trigger_ms(&self) -> Option<u64> {
        self.last_trigger_ms
    }

    fn cooled_down(&self, now_ms: u64) -> bool {
        match self.last_trigger_ms {
            Some(last) => now_ms.saturating_sub(last) > self.config.cooldown_ms,
            None => true,
        }
    }

    /// Advance one frame with the selected hand, if any.
    pub fn update(
        &mut self,
        selected: Option<(&Hand, GestureLabel)>,
        now_ms: u64,
    ) -> Option<SwipeDirection> {
        let hand = match selected {
            Some((hand, GestureLabel::PalmOpen)) => hand,
            _ => {
                self.prev_centroid = None;
                return None;
            }
        };

        let centroid = hand.palm_center();
        let mut fired = None;
        if let Some(prev) = self.prev_centroid {
            let delta_x = centroid.x - prev.x;
            if delta_x.abs() > self.config.min_delta_x && self.cooled_down(now_ms) {
                let direction = if delta_x < 0.0 {
                    SwipeDirection::Advance
                } else {
                    SwipeDirection::Retreat
                };
                debug!(
                    side = hand.side.as_str(),
                    delta_x,
                    "Swipe {}",
                    direction.as_str()
                );
                self.last_trigger_ms = Some(now_ms);
                fired = Some(direction);
            }
        }
        self.prev_centroid = Some(centroid);
        fired
    }

    /// Forget the tracked centroid.  Used when a higher-priority
    /// interaction claims the frame.  The cooldown is kept.
    pub fn clear(&mut self) {
        self.prev_centroid = None;
    }

    pub fn reset(&mut self) {
        self.prev_centroid = None;
        self.last_trigger_ms = None;
    }
}
