//! Two-hand uniform scaling.
//!
//! Both hands pinching (or both holding any pose while their palms drift
//! apart) engages scaling.  While engaged, the change in inter-palm
//! distance since the last applied step is smoothed and added to the
//! current scale, then the reference distance ratchets forward.

use tracing::debug;

use super::gesture::GestureLabel;
use super::landmarks::Hand;
use super::smoothing::RollingBuffer;
use super::transform::TransformBounds;

/// Scaling thresholds.
#[derive(Debug, Clone, PartialEq)]
pub struct ScaleConfig {
    /// Inter-palm distance drift that engages scaling for non-pinch poses.
    pub drift_threshold: f32,
    /// Scale units per unit of inter-palm distance change.
    pub gain: f32,
    /// Smoothed change below which nothing is applied.
    pub min_step: f32,
    /// Samples in the smoothing window.
    pub window: usize,
}

impl Default for ScaleConfig {
    fn default() -> Self {
        Self {
            drift_threshold: 0.05,
            gain: 2.5,
            min_step: 0.005,
            window: 5,
        }
    }
}

impl ScaleConfig {
    pub fn sexp(&self) -> String {
        format!(
            "(:drift-threshold {:.3} :gain {:.3} :min-step {:.4} :window {})",
            self.drift_threshold, self.gain, self.min_step, self.window,
        )
    }
}

/// Scaling state.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum ScaleState {
    #[default]
    Inactive,
    Active {
        /// Inter-palm distance at the last applied step.
        base_distance: f32,
        buffer: RollingBuffer,
    },
}

/// Per-frame inputs.
#[derive(Debug, Clone, Copy)]
pub struct ScaleInput<'a> {
    pub left: Option<&'a Hand>,
    pub right: Option<&'a Hand>,
    pub left_gesture: GestureLabel,
    pub right_gesture: GestureLabel,
    pub current_scale: f32,
}

/// Result of one frame.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ScaleStep {
    /// Scaling holds this frame; lower-priority interactions must not run.
    pub active: bool,
    /// Scaling engaged this frame.
    pub started: bool,
    /// Scaling disengaged this frame.
    pub ended: bool,
    /// New scale to write, if any.
    pub scale: Option<f32>,
}

/// The two-hand scale state machine.
#[derive(Debug, Clone, Default)]
pub struct ScaleController {
    pub config: ScaleConfig,
    state: ScaleState,
}

impl ScaleController {
    pub fn new(config: ScaleConfig) -> Self {
        Self {
            config,
            state: ScaleState::Inactive,
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self.state, ScaleState::Active { .. })
    }

    pub fn state(&self) -> &ScaleState {
        &self.state
    }

    pub fn base_distance(&self) -> Option<f32> {
        match &self.state {
            ScaleState::Active { base_distance, .. } => Some(*base_distance),
            ScaleState::Inactive => None,
        }
    }

    pub fn reset(&mut self) {
        self.state = ScaleState::Inactive;
    }

    /// Whether this frame's inputs hold or engage scaling.
    fn should_scale(&self, input: &ScaleInput<'_>, distance: f32) -> bool {
        if input.left_gesture == GestureLabel::Pinch && input.right_gesture == GestureLabel::Pinch {
            return true;
        }
        if input.left_gesture.is_idle() || input.right_gesture.is_idle() {
            return false;
        }
        // With no reference distance there is no drift.
        let base = self.base_distance().unwrap_or(distance);
        (distance - base).abs() > self.config.drift_threshold
    }

    /// Advance one frame.
    pub fn update(&mut self, input: ScaleInput<'_>, bounds: &TransformBounds) -> ScaleStep {
        let distance = match (input.left, input.right) {
            (Some(l), Some(r)) => Some(l.palm_center().distance(&r.palm_center())),
            _ => None,
        };

        let engaged = distance.filter(|d| self.should_scale(&input, *d));
        let Some(distance) = engaged else {
            let ended = self.is_active();
            if ended {
                debug!("Two-hand scaling ended");
            }
            self.state = ScaleState::Inactive;
            return ScaleStep {
                ended,
                ..ScaleStep::default()
            };
        };

        match &mut self.state {
            ScaleState::Inactive => {
                debug!(distance, "Two-hand scaling started");
                self.state = ScaleState::Active {
                    base_distance: distance,
                    buffer: RollingBuffer::new(self.config.window),
                };
                ScaleStep {
                    active: true,
                    started: true,
                    ..ScaleStep::default()
                }
            }
            ScaleState::Active {
                base_distance,
                buffer,
            } => {
                let change = (distance - *base_distance) * self.config.gain;
                let mean = buffer.push(change);
                let mut step = ScaleStep {
                    active: true,
                    ..ScaleStep::default()
                };
                if mean.abs() > self.config.min_step {
                    step.scale = Some(bounds.clamp_scale(input.current_scale + mean));
                    *base_distance = distance;
                }
                step
            }
        }
    }
}
