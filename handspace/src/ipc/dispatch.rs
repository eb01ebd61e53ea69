//! IPC message dispatch: parse s-expressions and route to handlers.

use std::time::Instant;

use lexpr::Value;
use tracing::{debug, info, warn};

use super::server::IpcServer;
use crate::engine::landmarks::{HandFrame, HandSide, Landmark};
use crate::state::HandspaceState;

/// Parse an s-expression message and dispatch to the appropriate handler.
/// Returns an optional response string (s-expression).
pub fn handle_message(state: &mut HandspaceState, client_id: u64, raw: &str) -> Option<String> {
    let value = match lexpr::from_str(raw) {
        Ok(v) => v,
        Err(e) => {
            warn!(client_id, "malformed s-expression: {}", e);
            return Some(error_response(0, &format!("malformed s-expression: {e}")));
        }
    };

    let msg_type = get_keyword(&value, "type");
    let msg_id = get_int(&value, "id").unwrap_or(0);

    // Hello must be the first message.
    let is_authenticated = state.ipc_server.is_authenticated(client_id);

    match msg_type.as_deref() {
        Some("hello") => handle_hello(state, client_id, msg_id, &value),
        _ if !is_authenticated => Some(error_response(msg_id, "hello handshake required")),
        Some("ping") => handle_ping(state, msg_id, &value),
        // Detector frames
        Some("frame") => handle_frame(state, msg_id, &value),
        // Engine control
        Some("engine-status") => handle_engine_status(state, msg_id),
        Some("engine-config") => handle_engine_config(state, msg_id, &value),
        Some("engine-reset") => handle_engine_reset(state, msg_id),
        Some("engine-timing") => handle_engine_timing(state, msg_id),
        Some("scene-set") => handle_scene_set(state, msg_id, &value),
        // IPC security
        Some("ipc-client-info") => handle_ipc_client_info(state, client_id, msg_id),
        Some("ipc-rate-limit") => handle_ipc_rate_limit(state, client_id, msg_id, &value),
        Some(other) => Some(error_response(
            msg_id,
            &format!("unknown message type: {other}"),
        )),
        None => Some(error_response(msg_id, "missing :type field")),
    }
}

// ── Handlers ────────────────────────────────────────────────

fn handle_hello(
    state: &mut HandspaceState,
    client_id: u64,
    msg_id: i64,
    value: &Value,
) -> Option<String> {
    let version = get_int(value, "version").unwrap_or(0);
    if version != 1 {
        return Some(error_response(
            msg_id,
            &format!("unsupported protocol version: {version}"),
        ));
    }

    // SO_PEERCRED: only processes of our own user may feed frames.
    if let Some(client) = state.ipc_server.clients.get(&client_id) {
        if let Some(peer_uid) = client.peer_uid {
            let our_uid = unsafe { libc::getuid() };
            if peer_uid != our_uid {
                warn!(client_id, peer_uid, our_uid, "rejecting client: UID mismatch");
                return Some(error_response(msg_id, "authentication failed: UID mismatch"));
            }
        }
    }

    let client_name = get_string(value, "client").unwrap_or_default();
    info!(client_id, client = %client_name, "hello handshake (authenticated)");

    let mut peer_pid = None;
    if let Some(client) = state.ipc_server.clients.get_mut(&client_id) {
        client.authenticated = true;
        client.name = Some(client_name);
        peer_pid = client.peer_pid;
    }

    let config = state.engine.config();
    let pid_field = peer_pid
        .map(|p| format!(" :peer-pid {}", p))
        .unwrap_or_default();
    Some(format!(
        "(:type :hello :id {} :version 1 :server \"handspace-engine\" :features (:scene-count {} :cues {}){})",
        msg_id,
        config.scene_count,
        if config.cues_enabled { "t" } else { "nil" },
        pid_field
    ))
}

fn handle_ping(state: &mut HandspaceState, msg_id: i64, value: &Value) -> Option<String> {
    let client_ts = get_int(value, "timestamp").unwrap_or(0);
    let server_ts = state.clock.unix_millis();

    Some(format!(
        "(:type :response :id {} :status :ok :client-timestamp {} :server-timestamp {})",
        msg_id, client_ts, server_ts
    ))
}

// ── Frame handler ──────────────────────────────────────────

fn handle_frame(state: &mut HandspaceState, msg_id: i64, value: &Value) -> Option<String> {
    // Detectors stamp frames with fractional milliseconds; whole
    // milliseconds are enough for the cooldown and timing stats.
    let timestamp = match get_value(value, "timestamp").map(|_| get_float(value, "timestamp")) {
        Some(Some(ts)) if ts.is_finite() && ts >= 0.0 => ts.floor() as u64,
        Some(_) => {
            return Some(error_response(
                msg_id,
                "timestamp must be a non-negative number",
            ))
        }
        None => state.clock.monotonic_millis(),
    };

    let detections = match get_value(value, "hands").map(parse_hands) {
        Some(Ok(detections)) => detections,
        Some(Err(reason)) => return Some(error_response(msg_id, &reason)),
        None => Vec::new(),
    };
    let detected = detections.len();
    let frame = HandFrame::from_detections(detections);
    if frame.hand_count() < detected {
        debug!(
            detected,
            kept = frame.hand_count(),
            "frame carried unusable hands"
        );
    }

    let started = Instant::now();
    let output = state.engine.process_frame(&frame, timestamp);
    let process_ms = started.elapsed().as_secs_f64() * 1000.0;
    state.frame_timing.record_frame(timestamp, process_ms);

    for event in &output.events {
        let fields = event.fields();
        let borrowed: Vec<(&str, &str)> = fields.iter().map(|(k, v)| (*k, v.as_str())).collect();
        IpcServer::broadcast_event(state, &format_event(event.kind(), &borrowed));
    }
    if output.changed {
        broadcast_transform(state);
    }

    Some(format!(
        "(:type :response :id {} :status :ok :frame {})",
        msg_id,
        output.sexp()
    ))
}

/// Parse `((:side :left :points ((x y [z]) ...)) ...)`.
///
/// An unknown side is a protocol error.  A hand whose points are not all
/// finite numeric pairs or triples (after narrowing to `f32`) is passed on
/// with no points, so the engine treats that side as absent.
fn parse_hands(value: &Value) -> Result<Vec<(HandSide, Vec<Landmark>)>, String> {
    let mut detections = Vec::new();
    for hand in list_items(value) {
        let side_str = get_keyword(hand, "side").ok_or("hand missing :side")?;
        let side = HandSide::parse(&side_str)
            .ok_or_else(|| format!("unknown hand side: {side_str}"))?;
        let points: Vec<Landmark> = get_value(hand, "points")
            .and_then(|pts| list_items(pts).into_iter().map(parse_point).collect())
            .unwrap_or_else(|| {
                debug!("Malformed points for {:?} hand", side);
                Vec::new()
            });
        detections.push((side, points));
    }
    Ok(detections)
}

fn parse_point(value: &Value) -> Option<Landmark> {
    let coords: Vec<f32> = list_items(value)
        .into_iter()
        .map(|v| v.as_f64().map(|f| f as f32).filter(|f| f.is_finite()))
        .collect::<Option<_>>()?;
    match coords.as_slice() {
        [x, y] => Some(Landmark::new(*x, *y)),
        [x, y, z] => Some(Landmark {
            x: *x,
            y: *y,
            z: *z,
        }),
        _ => None,
    }
}

fn broadcast_transform(state: &mut HandspaceState) {
    let transform = state.engine.transform().sexp();
    let scene = state.engine.scene().to_string();
    let event = format_event("transform", &[("transform", &transform), ("scene", &scene)]);
    IpcServer::broadcast_event(state, &event);
}

// ── Engine handlers ────────────────────────────────────────

fn handle_engine_status(state: &mut HandspaceState, msg_id: i64) -> Option<String> {
    Some(format!(
        "(:type :response :id {} :status :ok :engine {} :config {})",
        msg_id,
        state.engine.status_sexp(),
        state.engine.config().sexp()
    ))
}

fn handle_engine_config(state: &mut HandspaceState, msg_id: i64, value: &Value) -> Option<String> {
    let mut config = state.engine.config().clone();

    let floats: [(&str, &mut f32); 17] = [
        ("extension-ratio", &mut config.classifier.extension_ratio),
        ("pinch-distance", &mut config.classifier.pinch_distance),
        ("pinch-spread", &mut config.classifier.pinch_spread),
        ("grab-thumb-distance", &mut config.classifier.grab_thumb_distance),
        ("scale-drift", &mut config.scale.drift_threshold),
        ("scale-gain", &mut config.scale.gain),
        ("scale-min-step", &mut config.scale.min_step),
        ("gain-x", &mut config.controller.gain_x),
        ("gain-y", &mut config.controller.gain_y),
        ("rotation-deadband", &mut config.controller.rotation_deadband),
        ("rotation-gain", &mut config.controller.rotation_gain),
        ("swipe-min-delta", &mut config.swipe.min_delta_x),
        ("max-x", &mut config.bounds.max_x),
        ("max-y", &mut config.bounds.max_y),
        ("min-scale", &mut config.bounds.min_scale),
        ("max-scale", &mut config.bounds.max_scale),
        ("initial-scale", &mut config.initial_scale),
    ];
    for (key, slot) in floats {
        if let Some(v) = get_float(value, key) {
            *slot = v as f32;
        }
    }

    if let Some(ms) = get_int(value, "swipe-cooldown-ms") {
        if ms < 0 {
            return Some(error_response(msg_id, "swipe-cooldown-ms must be non-negative"));
        }
        config.swipe.cooldown_ms = ms as u64;
    }
    if let Some(count) = get_int(value, "scene-count") {
        if !(1..=u32::MAX as i64).contains(&count) {
            return Some(error_response(msg_id, "scene-count must be at least 1"));
        }
        config.scene_count = count as u32;
    }
    if let Some(window) = get_int(value, "window") {
        if window < 1 {
            return Some(error_response(msg_id, "window must be at least 1"));
        }
        config.scale.window = window as usize;
        config.controller.window = window as usize;
    }
    if let Some(cues) = get_bool(value, "cues") {
        config.cues_enabled = cues;
    }

    if let Err(e) = config.validate() {
        return Some(error_response(msg_id, &e.to_string()));
    }
    debug!("engine config updated");
    state.engine.set_config(config);

    Some(format!(
        "(:type :response :id {} :status :ok :config {})",
        msg_id,
        state.engine.config().sexp()
    ))
}

fn handle_engine_reset(state: &mut HandspaceState, msg_id: i64) -> Option<String> {
    state.engine.reset();
    state.frame_timing.reset();
    broadcast_transform(state);
    Some(ok_response(msg_id))
}

fn handle_engine_timing(state: &mut HandspaceState, msg_id: i64) -> Option<String> {
    Some(format!(
        "(:type :response :id {} :status :ok :timing {})",
        msg_id,
        state.frame_timing.stats_sexp()
    ))
}

fn handle_scene_set(state: &mut HandspaceState, msg_id: i64, value: &Value) -> Option<String> {
    let scene = match get_int(value, "scene") {
        Some(n) if (0..=u32::MAX as i64).contains(&n) => n as u32,
        Some(_) => return Some(error_response(msg_id, "scene must be non-negative")),
        None => return Some(error_response(msg_id, "missing :scene")),
    };
    let selected = state.engine.set_scene(scene);
    broadcast_transform(state);
    Some(format!(
        "(:type :response :id {} :status :ok :scene {})",
        msg_id, selected
    ))
}

// ── IPC security handlers ──────────────────────────────────

fn handle_ipc_client_info(
    state: &mut HandspaceState,
    client_id: u64,
    msg_id: i64,
) -> Option<String> {
    if let Some(client) = state.ipc_server.clients.get(&client_id) {
        let uid = client.peer_uid.map(|u| u.to_string()).unwrap_or_else(|| "nil".to_string());
        let pid = client.peer_pid.map(|p| p.to_string()).unwrap_or_else(|| "nil".to_string());
        let name = client.name.as_deref().unwrap_or_default();
        let rate = client.rate_limiter.max_per_second;
        Some(format!(
            "(:type :response :id {} :status :ok :client-id {} :client \"{}\" :peer-uid {} :peer-pid {} :authenticated t :rate-limit {})",
            msg_id, client_id, escape_string(name), uid, pid, rate
        ))
    } else {
        Some(error_response(msg_id, "client not found"))
    }
}

fn handle_ipc_rate_limit(
    state: &mut HandspaceState,
    client_id: u64,
    msg_id: i64,
    value: &Value,
) -> Option<String> {
    let new_limit = match get_int(value, "limit") {
        Some(n) if n > 0 && n <= 10000 => n as u32,
        Some(_) => return Some(error_response(msg_id, "limit must be 1-10000")),
        None => return Some(error_response(msg_id, "missing :limit parameter")),
    };

    if let Some(client) = state.ipc_server.clients.get_mut(&client_id) {
        client.rate_limiter.max_per_second = new_limit;
        debug!(client_id, new_limit, "rate limit updated");
    }
    Some(ok_response(msg_id))
}

// ── Helpers ────────────────────────────────────────────────

fn ok_response(id: i64) -> String {
    format!("(:type :response :id {} :status :ok)", id)
}

fn error_response(id: i64, reason: &str) -> String {
    format!(
        "(:type :response :id {} :status :error :reason \"{}\")",
        id,
        escape_string(reason)
    )
}

/// Escape a string for s-expression output.
fn escape_string(s: &str) -> String {
    s.replace('\\', "\\\\").replace('"', "\\\"")
}

/// Find the value following `:key` in an s-expression plist.
/// Handles both `Value::Keyword("key")` (elisp parser) and
/// `Value::Symbol(":key")` (default parser) forms.
fn get_value<'a>(value: &'a Value, key: &str) -> Option<&'a Value> {
    let prefixed = format!(":{}", key);
    let mut current = value;
    while let Value::Cons(pair) = current {
        let is_key = match pair.car() {
            Value::Keyword(k) => k.as_ref() == key,
            Value::Symbol(s) => s.as_ref() == prefixed,
            _ => false,
        };
        if is_key {
            return match pair.cdr() {
                Value::Cons(next) => Some(next.car()),
                _ => None,
            };
        }
        current = pair.cdr();
    }
    None
}

/// Extract a keyword value from an s-expression plist as a string.
fn get_keyword(value: &Value, key: &str) -> Option<String> {
    let val = get_value(value, key)?;
    Some(match val {
        Value::Keyword(v) => v.to_string(),
        Value::Symbol(v) => {
            let s = v.to_string();
            s.strip_prefix(':').unwrap_or(&s).to_string()
        }
        Value::String(v) => v.to_string(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => (if *b { "t" } else { "nil" }).to_string(),
        Value::Null => "nil".to_string(),
        _ => val.to_string(),
    })
}

/// Extract an integer value from an s-expression plist.
fn get_int(value: &Value, key: &str) -> Option<i64> {
    get_keyword(value, key).and_then(|s| s.parse().ok())
}

/// Extract a string value from an s-expression plist.
fn get_string(value: &Value, key: &str) -> Option<String> {
    get_keyword(value, key)
}

/// Extract a boolean value from an s-expression plist.
/// Treats "nil" as false, anything else as true.
fn get_bool(value: &Value, key: &str) -> Option<bool> {
    get_keyword(value, key).map(|s| s != "nil")
}

/// Extract a floating-point value from an s-expression plist.
fn get_float(value: &Value, key: &str) -> Option<f64> {
    get_keyword(value, key).and_then(|s| s.parse().ok())
}

/// Elements of a proper list; empty for anything else.
fn list_items(value: &Value) -> Vec<&Value> {
    let mut items = Vec::new();
    let mut current = value;
    while let Value::Cons(pair) = current {
        items.push(pair.car());
        current = pair.cdr();
    }
    items
}

/// Format an IPC event s-expression.
pub fn format_event(event_type: &str, fields: &[(&str, &str)]) -> String {
    let mut s = format!("(:type :event :event :{}", event_type);
    for (key, val) in fields {
        s.push_str(&format!(" :{} {}", key, val));
    }
    s.push(')');
    s
}
