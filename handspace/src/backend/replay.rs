//! Replay backend: feed a recorded message log through the dispatcher.
//!
//! One s-expression per line.  Blank lines and lines starting with `;`
//! are skipped.  Replies and broadcast events are written to stdout in
//! the order they were produced, so a recorded detector session can be
//! reproduced offline and diffed.

use std::fs::File;
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use anyhow::Context;
use tracing::{debug, info};

use crate::engine::EngineConfig;
use crate::ipc::dispatch;
use crate::ipc::server::LOCAL_CLIENT_ID;
use crate::state::HandspaceState;

/// Counts reported once the log is exhausted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplaySummary {
    pub messages: u64,
    pub errors: u64,
    pub events: u64,
}

/// Replay `path` and print the results to stdout.
pub fn run(config: EngineConfig, path: &Path) -> anyhow::Result<()> {
    let file = File::open(path).with_context(|| format!("opening replay file {}", path.display()))?;
    let mut state = HandspaceState::new(config, PathBuf::new());

    let stdout = io::stdout();
    let mut out = stdout.lock();
    let summary = replay(&mut state, BufReader::new(file), &mut out)?;
    out.flush()?;

    info!(
        messages = summary.messages,
        errors = summary.errors,
        events = summary.events,
        frames = state.engine.frames(),
        "Replay finished"
    );
    Ok(())
}

/// Dispatch every message in `reader`, writing replies and events to `out`.
pub fn replay<R: BufRead, W: Write>(
    state: &mut HandspaceState,
    reader: R,
    out: &mut W,
) -> anyhow::Result<ReplaySummary> {
    state.ipc_server.local_events = Some(Vec::new());
    let mut summary = ReplaySummary::default();

    for (index, line) in reader.lines().enumerate() {
        let line = line.with_context(|| format!("reading replay line {}", index + 1))?;
        let msg = line.trim();
        if msg.is_empty() || msg.starts_with(';') {
            continue;
        }
        summary.messages += 1;
        debug!(line = index + 1, "replay << {}", msg);

        if let Some(reply) = dispatch::handle_message(state, LOCAL_CLIENT_ID, msg) {
            if reply.contains(":status :error") {
                summary.errors += 1;
            }
            writeln!(out, "{}", reply)?;
        }
        let events = state
            .ipc_server
            .local_events
            .as_mut()
            .map(std::mem::take)
            .unwrap_or_default();
        summary.events += events.len() as u64;
        for event in events {
            writeln!(out, "{}", event)?;
        }
    }
    Ok(summary)
}
