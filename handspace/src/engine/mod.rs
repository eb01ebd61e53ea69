//! Gesture interaction engine: pure per-frame logic, no I/O.
//!
//! Provides:
//! - `landmarks`: 21-point hand model and detector frame
//! - `gesture`: pose classification and per-side label tracking
//! - `scale`, `controller`, `swipe`: the three interactions
//! - `arbiter`: priority arbitration and the `Engine` entry point
//! - `transform`: object transform, scene index, renderer cell
//! - `smoothing`: fixed-window moving averages
//! - `frame_timing`: per-frame processing statistics

pub mod arbiter;
pub mod controller;
pub mod frame_timing;
pub mod gesture;
pub mod landmarks;
pub mod scale;
pub mod smoothing;
pub mod swipe;
pub mod transform;

pub use arbiter::{Engine, EngineConfig, EngineEvent, FrameOutput, HandUi};
pub use landmarks::{Hand, HandFrame, HandSide, Landmark};
pub use transform::{ObjectTransform, SharedTransform, TransformSnapshot};
