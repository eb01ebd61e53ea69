//! Per-frame interaction arbitration.
//!
//! [`Engine::process_frame`] is the whole engine from the outside: it takes
//! one detector frame, classifies both hands, runs the interactions in
//! priority order (two-hand scale, then the per-side controllers, then
//! swipe navigation) and returns the committed transform together with a
//! list of discrete [`EngineEvent`]s.  The engine performs no I/O; cues
//! and navigation are only reported, never executed here.

use std::sync::Arc;

use anyhow::bail;
use tracing::debug;

use super::controller::{ControllerConfig, ControllerInput, HandController, TransformMutation, Transition};
use super::gesture::{classify, ClassifierConfig, GestureLabel, GestureTracker};
use super::landmarks::{HandFrame, HandSide};
use super::scale::{ScaleConfig, ScaleController, ScaleInput};
use super::swipe::{SwipeConfig, SwipeDirection, SwipeNavigator};
use super::transform::{ObjectTransform, SceneIndex, SharedTransform, TransformBounds};

// ── Config ─────────────────────────────────────────────────

/// Every tunable of the engine.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    pub classifier: ClassifierConfig,
    pub scale: ScaleConfig,
    pub controller: ControllerConfig,
    pub swipe: SwipeConfig,
    pub bounds: TransformBounds,
    /// Number of scenes the swipe navigator cycles through.
    pub scene_count: u32,
    /// Object scale after start and after a reset.
    pub initial_scale: f32,
    /// Emit audio cue events.
    pub cues_enabled: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            classifier: ClassifierConfig::default(),
            scale: ScaleConfig::default(),
            controller: ControllerConfig::default(),
            swipe: SwipeConfig::default(),
            bounds: TransformBounds::default(),
            scene_count: 4,
            initial_scale: 1.5,
            cues_enabled: true,
        }
    }
}

impl EngineConfig {
    /// Reject values the controllers cannot work with.
    pub fn validate(&self) -> anyhow::Result<()> {
        let positive = [
            ("extension-ratio", self.classifier.extension_ratio),
            ("pinch-distance", self.classifier.pinch_distance),
            ("pinch-spread", self.classifier.pinch_spread),
            ("grab-thumb-distance", self.classifier.grab_thumb_distance),
            ("scale-drift", self.scale.drift_threshold),
            ("scale-gain", self.scale.gain),
            ("gain-x", self.controller.gain_x),
            ("gain-y", self.controller.gain_y),
            ("rotation-gain", self.controller.rotation_gain),
            ("swipe-min-delta", self.swipe.min_delta_x),
            ("max-x", self.bounds.max_x),
            ("max-y", self.bounds.max_y),
            ("min-scale", self.bounds.min_scale),
            ("max-scale", self.bounds.max_scale),
            ("initial-scale", self.initial_scale),
        ];
        for (name, value) in positive {
            if !value.is_finite() || value <= 0.0 {
                bail!("{name} must be a positive number, got {value}");
            }
        }
        for (name, value) in [
            ("scale-min-step", self.scale.min_step),
            ("rotation-deadband", self.controller.rotation_deadband),
        ] {
            if !value.is_finite() || value < 0.0 {
                bail!("{name} must be non-negative, got {value}");
            }
        }
        if self.bounds.min_scale > self.bounds.max_scale {
            bail!(
                "min-scale {} exceeds max-scale {}",
                self.bounds.min_scale,
                self.bounds.max_scale
            );
        }
        if self.scale.window == 0 || self.controller.window == 0 {
            bail!("smoothing window must hold at least one sample");
        }
        if self.scene_count == 0 {
            bail!("scene-count must be at least 1");
        }
        Ok(())
    }

    pub fn sexp(&self) -> String {
        format!(
            "(:classifier {} :scale {} :controller {} :swipe {} :bounds (:max-x {:.2} :max-y {:.2} :min-scale {:.2} :max-scale {:.2}) :scene-count {} :initial-scale {:.3} :cues {})",
            self.classifier.sexp(),
            self.scale.sexp(),
            self.controller.sexp(),
            self.swipe.sexp(),
            self.bounds.max_x,
            self.bounds.max_y,
            self.bounds.min_scale,
            self.bounds.max_scale,
            self.scene_count,
            self.initial_scale,
            if self.cues_enabled { "t" } else { "nil" },
        )
    }
}

// ── Events ─────────────────────────────────────────────────

/// Discrete things that happened during one frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EngineEvent {
    /// A side's label differs from the previous frame.
    GestureChanged {
        side: HandSide,
        from: GestureLabel,
        to: GestureLabel,
    },
    /// Audio cue: a hand closed into a grab.
    EngageCue { side: HandSide },
    /// Audio cue: a hand changed into any other non-idle pose.
    SelectCue { side: HandSide },
    /// Audio cue played with swipe navigation.
    HoverCue,
    SceneAdvance { scene: u32 },
    SceneRetreat { scene: u32 },
    ScaleStarted,
    ScaleEnded,
    ControllerEngaged { side: HandSide },
    ControllerReleased { side: HandSide },
}

impl EngineEvent {
    /// Event name on the wire.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::GestureChanged { .. } => "gesture-changed",
            Self::EngageCue { .. } => "engage-cue",
            Self::SelectCue { .. } => "select-cue",
            Self::HoverCue => "hover-cue",
            Self::SceneAdvance { .. } => "scene-advance",
            Self::SceneRetreat { .. } => "scene-retreat",
            Self::ScaleStarted => "scale-started",
            Self::ScaleEnded => "scale-ended",
            Self::ControllerEngaged { .. } => "controller-engaged",
            Self::ControllerReleased { .. } => "controller-released",
        }
    }

    /// Payload as `(key, s-expression value)` pairs.
    pub fn fields(&self) -> Vec<(&'static str, String)> {
        let side = |s: &HandSide| ("side", format!(":{}", s.as_str()));
        match self {
            Self::GestureChanged { side: s, from, to } => vec![
                side(s),
                ("from", format!(":{}", from.as_str())),
                ("to", format!(":{}", to.as_str())),
            ],
            Self::EngageCue { side: s }
            | Self::SelectCue { side: s }
            | Self::ControllerEngaged { side: s }
            | Self::ControllerReleased { side: s } => vec![side(s)],
            Self::SceneAdvance { scene } | Self::SceneRetreat { scene } => {
                vec![("scene", scene.to_string())]
            }
            Self::HoverCue | Self::ScaleStarted | Self::ScaleEnded => Vec::new(),
        }
    }

    pub fn is_cue(&self) -> bool {
        matches!(
            self,
            Self::EngageCue { .. } | Self::SelectCue { .. } | Self::HoverCue
        )
    }
}

// ── Frame output ───────────────────────────────────────────

/// Cursor data for one side, for on-screen hand indicators.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct HandUi {
    pub visible: bool,
    /// Palm center; kept at the last seen position while hidden.
    pub x: f32,
    pub y: f32,
    pub gesture: GestureLabel,
}

impl HandUi {
    pub fn sexp(&self) -> String {
        format!(
            "(:visible {} :x {:.4} :y {:.4} :gesture :{})",
            if self.visible { "t" } else { "nil" },
            self.x,
            self.y,
            self.gesture.as_str(),
        )
    }
}

/// Everything one frame produced.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameOutput {
    pub events: Vec<EngineEvent>,
    pub left: HandUi,
    pub right: HandUi,
    pub transform: ObjectTransform,
    pub scene: u32,
    /// Transform or scene differ from the previous frame.
    pub changed: bool,
}

impl FrameOutput {
    pub fn gesture(&self, side: HandSide) -> GestureLabel {
        match side {
            HandSide::Left => self.left.gesture,
            HandSide::Right => self.right.gesture,
        }
    }

    pub fn sexp(&self) -> String {
        format!(
            "(:left {} :right {} :transform {} :scene {} :changed {} :events {})",
            self.left.sexp(),
            self.right.sexp(),
            self.transform.sexp(),
            self.scene,
            if self.changed { "t" } else { "nil" },
            self.events.len(),
        )
    }
}

// ── Engine ─────────────────────────────────────────────────

/// The frame-synchronous interaction engine.
#[derive(Debug)]
pub struct Engine {
    config: EngineConfig,
    tracker: GestureTracker,
    scale: ScaleController,
    left: HandController,
    right: HandController,
    swipe: SwipeNavigator,
    transform: ObjectTransform,
    scene: SceneIndex,
    left_ui: HandUi,
    right_ui: HandUi,
    shared: Arc<SharedTransform>,
    frames: u64,
}

impl Default for Engine {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

impl Engine {
    pub fn new(config: EngineConfig) -> Self {
        let transform = ObjectTransform::with_scale(config.bounds.clamp_scale(config.initial_scale));
        let scene = SceneIndex::new(config.scene_count);
        Self {
            tracker: GestureTracker::new(),
            scale: ScaleController::new(config.scale.clone()),
            left: HandController::new(HandSide::Left),
            right: HandController::new(HandSide::Right),
            swipe: SwipeNavigator::new(config.swipe.clone()),
            shared: SharedTransform::new(transform, scene.get()),
            transform,
            scene,
            left_ui: HandUi::default(),
            right_ui: HandUi::default(),
            frames: 0,
            config,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Replace the configuration.  Interaction state is kept; new
    /// smoothing windows apply from the next activation.
    pub fn set_config(&mut self, config: EngineConfig) {
        self.scale.config = config.scale.clone();
        self.swipe.config = config.swipe.clone();
        if config.scene_count != self.scene.count() {
            let current = self.scene.get();
            self.scene = SceneIndex::new(config.scene_count);
            self.scene.set(current);
        }
        self.transform.position = config.bounds.clamp_position(self.transform.position);
        self.transform.scale = config.bounds.clamp_scale(self.transform.scale);
        self.config = config;
        self.publish();
    }

    pub fn transform(&self) -> &ObjectTransform {
        &self.transform
    }

    pub fn scene(&self) -> u32 {
        self.scene.get()
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }

    pub fn gesture(&self, side: HandSide) -> GestureLabel {
        self.tracker.current(side)
    }

    pub fn hand_ui(&self, side: HandSide) -> &HandUi {
        match side {
            HandSide::Left => &self.left_ui,
            HandSide::Right => &self.right_ui,
        }
    }

    pub fn is_scaling(&self) -> bool {
        self.scale.is_active()
    }

    pub fn controller_active(&self, side: HandSide) -> bool {
        self.controller(side).is_active()
    }

    fn controller(&self, side: HandSide) -> &HandController {
        match side {
            HandSide::Left => &self.left,
            HandSide::Right => &self.right,
        }
    }

    fn controller_mut(&mut self, side: HandSide) -> &mut HandController {
        match side {
            HandSide::Left => &mut self.left,
            HandSide::Right => &mut self.right,
        }
    }

    fn hand_ui_mut(&mut self, side: HandSide) -> &mut HandUi {
        match side {
            HandSide::Left => &mut self.left_ui,
            HandSide::Right => &mut self.right_ui,
        }
    }

    /// Handle for renderer threads.
    pub fn shared(&self) -> Arc<SharedTransform> {
        Arc::clone(&self.shared)
    }

    fn publish(&self) {
        self.shared.publish(&self.transform, self.scene.get());
    }

    /// Return to the start state: initial transform, first scene, every
    /// interaction inactive.
    pub fn reset(&mut self) {
        debug!("Engine reset");
        self.tracker.reset();
        self.scale.reset();
        self.left.deactivate();
        self.right.deactivate();
        self.swipe.reset();
        self.transform =
            ObjectTransform::with_scale(self.config.bounds.clamp_scale(self.config.initial_scale));
        self.scene = SceneIndex::new(self.config.scene_count);
        self.left_ui = HandUi::default();
        self.right_ui = HandUi::default();
        self.publish();
    }

    /// Jump to a scene directly.  Returns the scene actually selected.
    pub fn set_scene(&mut self, index: u32) -> u32 {
        let scene = self.scene.set(index);
        self.publish();
        scene
    }

    /// Process one detector frame.  `now_ms` is the frame's monotonic
    /// timestamp, used only by the swipe cooldown.
    pub fn process_frame(&mut self, frame: &HandFrame, now_ms: u64) -> FrameOutput {
        let before = (self.transform, self.scene.get());
        let mut events = Vec::new();

        // Classification, cursor data and gesture-edge cues.
        let mut labels = [GestureLabel::Idle; 2];
        for (slot, side) in HandSide::BOTH.into_iter().enumerate() {
            let hand = frame.hand(side);
            let label = hand
                .map(|h| classify(h, &self.config.classifier))
                .unwrap_or_default();
            labels[slot] = label;

            let ui = self.hand_ui_mut(side);
            ui.visible = hand.is_some();
            ui.gesture = label;
            if let Some(h) = hand {
                let palm = h.palm_center();
                ui.x = palm.x;
                ui.y = palm.y;
            }

            if let Some(edge) = self.tracker.update(side, label) {
                events.push(EngineEvent::GestureChanged {
                    side,
                    from: edge.from,
                    to: edge.to,
                });
                if self.config.cues_enabled && !edge.to.is_idle() {
                    events.push(if edge.to == GestureLabel::Grab {
                        EngineEvent::EngageCue { side }
                    } else {
                        EngineEvent::SelectCue { side }
                    });
                }
            }
        }
        let [left_label, right_label] = labels;

        // Tier 1: two-hand scale.
        let step = self.scale.update(
            ScaleInput {
                left: frame.left.as_ref(),
                right: frame.right.as_ref(),
                left_gesture: left_label,
                right_gesture: right_label,
                current_scale: self.transform.scale,
            },
            &self.config.bounds,
        );
        if step.started {
            events.push(EngineEvent::ScaleStarted);
            for side in HandSide::BOTH {
                if self.controller_mut(side).deactivate() {
                    events.push(EngineEvent::ControllerReleased { side });
                }
            }
        }
        if step.ended {
            events.push(EngineEvent::ScaleEnded);
        }
        if let Some(scale) = step.scale {
            self.transform.scale = scale;
        }

        let mut claimed = step.active;

        // Tier 2: per-side controllers, left then right.
        if !claimed {
            for (side, gesture) in [(HandSide::Left, left_label), (HandSide::Right, right_label)] {
                let input = ControllerInput {
                    hand: frame.hand(side),
                    gesture,
                    position: self.transform.position,
                };
                let config = &self.config.controller;
                let bounds = &self.config.bounds;
                let (mutation, transition) = match side {
                    HandSide::Left => self.left.update(&input, config, bounds),
                    HandSide::Right => self.right.update(&input, config, bounds),
                };
                self.apply(mutation);
                match transition {
                    Some(Transition::Engaged) => events.push(EngineEvent::ControllerEngaged { side }),
                    Some(Transition::Released) => {
                        events.push(EngineEvent::ControllerReleased { side })
                    }
                    None => {}
                }
            }
            claimed = self.left.is_active() || self.right.is_active();
        }

        // Tier 3: swipe navigation.
        if claimed {
            self.swipe.clear();
        } else {
            let selected = SwipeNavigator::select(
                frame.left.as_ref().map(|h| (h, left_label)),
                frame.right.as_ref().map(|h| (h, right_label)),
            );
            if let Some(direction) = self.swipe.update(selected, now_ms) {
                let event = match direction {
                    SwipeDirection::Advance => EngineEvent::SceneAdvance {
                        scene: self.scene.advance(),
                    },
                    SwipeDirection::Retreat => EngineEvent::SceneRetreat {
                        scene: self.scene.retreat(),
                    },
                };
                events.push(event);
                if self.config.cues_enabled {
                    events.push(EngineEvent::HoverCue);
                }
            }
        }

        self.frames += 1;
        self.publish();

        FrameOutput {
            events,
            left: self.left_ui,
            right: self.right_ui,
            transform: self.transform,
            scene: self.scene.get(),
            changed: before != (self.transform, self.scene.get()),
        }
    }

    fn apply(&mut self, mutation: TransformMutation) {
        if let Some(position) = mutation.position {
            self.transform.position = position;
        }
        if let Some(rx) = mutation.rotation_x {
            self.transform.rotation.x += rx;
        }
    }

    /// Engine state as an s-expression for IPC.
    pub fn status_sexp(&self) -> String {
        format!(
            "(:frames {} :left {} :right {} :scaling {} :left-controller {} :right-controller {} :transform {} :scene {} :scene-count {})",
            self.frames,
            self.left_ui.sexp(),
            self.right_ui.sexp(),
            if self.scale.is_active() { "t" } else { "nil" },
            if self.left.is_active() { "t" } else { "nil" },
            if self.right.is_active() { "t" } else { "nil" },
            self.transform.sexp(),
            self.scene.get(),
            self.scene.count(),
        )
    }
}
