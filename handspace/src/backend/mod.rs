//! Backends: live Unix socket service and offline replay.

pub mod replay;
pub mod socket;

use std::path::PathBuf;

use crate::engine::EngineConfig;

/// Backend type selector.
#[derive(Debug, Clone, PartialEq)]
pub enum BackendType {
    /// Serve detector frames over the IPC socket.
    Socket,
    /// Feed a recorded message log through the dispatcher.
    Replay(PathBuf),
}

/// IPC configuration passed from the CLI.
#[derive(Debug, Clone, Default)]
pub struct IpcConfig {
    pub socket_path: Option<PathBuf>,
    pub trace: bool,
}

/// Run the engine with the selected backend.
pub fn run(
    backend: BackendType,
    config: EngineConfig,
    ipc_config: IpcConfig,
    exit_after: Option<u64>,
) -> anyhow::Result<()> {
    config.validate()?;
    match backend {
        BackendType::Socket => socket::run(config, ipc_config, exit_after),
        BackendType::Replay(path) => replay::run(config, &path),
    }
}
