//! handspace-engine: gesture interaction service.

use std::path::PathBuf;

use anyhow::bail;
use clap::Parser;
use tracing::info;

use handspace::backend::{self, BackendType, IpcConfig};
use handspace::engine::EngineConfig;

#[derive(Parser, Debug)]
#[command(name = "handspace-engine", about = "Hand-gesture interaction engine")]
struct Cli {
    /// Backend to use: socket or replay
    #[arg(long, default_value = "socket")]
    backend: String,

    /// Message log to replay (replay backend)
    #[arg(long)]
    replay_file: Option<PathBuf>,

    /// IPC socket path (default: $XDG_RUNTIME_DIR/handspace-ipc.sock)
    #[arg(long)]
    ipc_socket: Option<PathBuf>,

    /// Log all IPC messages to stderr
    #[arg(long)]
    ipc_trace: bool,

    /// Exit after N seconds (socket backend testing)
    #[arg(long)]
    exit_after: Option<u64>,

    /// Minimum time between swipe navigations, in milliseconds
    #[arg(long)]
    swipe_cooldown_ms: Option<u64>,

    /// Suppress audio cue events
    #[arg(long)]
    no_cues: bool,

    /// Object scale at startup and after reset
    #[arg(long)]
    initial_scale: Option<f32>,

    /// Number of scenes swipes cycle through
    #[arg(long)]
    scene_count: Option<u32>,

    /// Show version and exit
    #[arg(long)]
    version: bool,
}

impl Cli {
    fn engine_config(&self) -> EngineConfig {
        let mut config = EngineConfig::default();
        if let Some(ms) = self.swipe_cooldown_ms {
            config.swipe.cooldown_ms = ms;
        }
        if let Some(scale) = self.initial_scale {
            config.initial_scale = scale;
        }
        if let Some(count) = self.scene_count {
            config.scene_count = count;
        }
        config.cues_enabled = !self.no_cues;
        config
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if cli.version {
        println!("handspace-engine {}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    // Logs go to stderr so replay output on stdout stays clean.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "handspace=info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    info!("handspace-engine v{} starting", env!("CARGO_PKG_VERSION"));
    info!("backend: {}", cli.backend);

    let backend_type = match cli.backend.as_str() {
        "socket" => BackendType::Socket,
        "replay" => match cli.replay_file.clone() {
            Some(path) => BackendType::Replay(path),
            None => bail!("--backend replay requires --replay-file"),
        },
        other => bail!("unknown backend: {other}. Use: socket or replay"),
    };

    let config = cli.engine_config();
    let ipc_config = IpcConfig {
        socket_path: cli.ipc_socket,
        trace: cli.ipc_trace,
    };

    backend::run(backend_type, config, ipc_config, cli.exit_after)
}
