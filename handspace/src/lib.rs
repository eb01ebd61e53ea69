//! handspace: hand-gesture interaction engine.
//!
//! Turns per-frame hand landmarks into gesture labels, object transforms,
//! scene navigation and UI events, and serves them to detector and UI
//! processes over a Unix socket.

pub mod backend;
pub mod engine;
pub mod ipc;
pub mod state;
