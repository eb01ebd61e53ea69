//! Runtime state: the single struct every backend and IPC handler is
//! handed as `&mut`.

use std::path::PathBuf;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use tracing::info;

use crate::engine::frame_timing::FrameTiming;
use crate::engine::{Engine, EngineConfig};
use crate::ipc::IpcServer;

/// Time source for frames that carry no detector timestamp.
#[derive(Debug)]
pub struct Clock {
    start: Instant,
}

impl Default for Clock {
    fn default() -> Self {
        Self {
            start: Instant::now(),
        }
    }
}

impl Clock {
    /// Milliseconds since the process started.  Never goes backwards.
    pub fn monotonic_millis(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }

    pub fn unix_millis(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
    }
}

/// Central runtime state.
pub struct HandspaceState {
    pub engine: Engine,
    pub frame_timing: FrameTiming,
    pub ipc_server: IpcServer,
    pub clock: Clock,
    pub running: bool,
}

impl HandspaceState {
    pub fn new(config: EngineConfig, socket_path: PathBuf) -> Self {
        info!(
            scene_count = config.scene_count,
            initial_scale = config.initial_scale,
            cues = config.cues_enabled,
            "Engine initialized"
        );
        Self {
            engine: Engine::new(config),
            frame_timing: FrameTiming::default(),
            ipc_server: IpcServer::new(socket_path),
            clock: Clock::default(),
            running: true,
        }
    }
}
