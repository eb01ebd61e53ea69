//! Socket backend: the long-running engine service.
//!
//! Listens on the IPC socket, feeds every frame message through the
//! dispatcher and broadcasts engine events to subscribed clients.
//! Shuts down on SIGTERM/SIGINT or after an optional timer.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use calloop::EventLoop;
use tracing::info;

use super::IpcConfig;
use crate::engine::EngineConfig;
use crate::ipc;
use crate::state::HandspaceState;

/// Global flag set by SIGTERM/SIGINT handlers.
static SHUTDOWN_REQUESTED: AtomicBool = AtomicBool::new(false);

/// Loop wakeup interval.  Shorter than a camera frame so queued frames
/// are picked up without adding latency.
const POLL_INTERVAL: Duration = Duration::from_millis(5);

const STATUS_INTERVAL: Duration = Duration::from_secs(60);

/// Install signal handlers for graceful shutdown (SIGTERM, SIGINT).
fn install_signal_handlers() {
    unsafe {
        libc::signal(libc::SIGTERM, signal_handler as libc::sighandler_t);
        libc::signal(libc::SIGINT, signal_handler as libc::sighandler_t);
    }
}

extern "C" fn signal_handler(_sig: libc::c_int) {
    SHUTDOWN_REQUESTED.store(true, Ordering::SeqCst);
}

/// Run the engine service.
///
/// `exit_after` stops the loop after N seconds (for CI).
pub fn run(config: EngineConfig, ipc_config: IpcConfig, exit_after: Option<u64>) -> anyhow::Result<()> {
    let mut event_loop = EventLoop::<HandspaceState>::try_new()?;

    let ipc_path = ipc_config
        .socket_path
        .unwrap_or_else(ipc::IpcServer::default_socket_path);
    let mut state = HandspaceState::new(config, ipc_path);
    state.ipc_server.ipc_trace = ipc_config.trace;
    ipc::IpcServer::bind(&mut state, &event_loop.handle())?;

    install_signal_handlers();

    let start_time = Instant::now();
    let exit_duration = exit_after.map(Duration::from_secs);
    let mut last_status_log = Instant::now();

    info!(
        "Socket backend initialized (poll interval: {}ms), entering event loop",
        POLL_INTERVAL.as_millis()
    );

    while state.running {
        if SHUTDOWN_REQUESTED.load(Ordering::SeqCst) {
            info!("Shutdown signal received, exiting");
            state.running = false;
            break;
        }

        if let Some(dur) = exit_duration {
            if start_time.elapsed() >= dur {
                info!("Exit timer fired after {}s", dur.as_secs());
                state.running = false;
                break;
            }
        }

        if last_status_log.elapsed() >= STATUS_INTERVAL {
            let stats = state.frame_timing.stats();
            info!(
                frames = state.engine.frames(),
                clients = state.ipc_server.clients.len(),
                fps = stats.fps,
                process_p95_ms = stats.process_p95,
                scene = state.engine.scene(),
                "Engine status"
            );
            last_status_log = Instant::now();
        }

        ipc::IpcServer::poll_clients(&mut state);

        event_loop.dispatch(Some(POLL_INTERVAL), &mut state)?;
    }

    info!(
        "Socket backend shutting down ({} frame(s), {} IPC client(s))",
        state.engine.frames(),
        state.ipc_server.clients.len()
    );
    state.ipc_server.shutdown();
    Ok(())
}
