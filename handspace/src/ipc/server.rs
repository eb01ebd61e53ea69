//! IPC server: Unix socket listener + per-client state + message framing.

use std::collections::HashMap;
use std::io::{self, Read, Write};
use std::os::unix::io::AsRawFd;
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::PathBuf;
use std::time::Instant;

use anyhow::{anyhow, Context};
use calloop::generic::Generic;
use calloop::{Interest, LoopHandle, Mode, PostAction};
use tracing::{debug, error, info, warn};

use super::dispatch;
use crate::state::HandspaceState;

/// Maximum message payload size (1 MiB).
const MAX_MESSAGE_SIZE: u32 = 1_048_576;

/// Maximum write buffer before dropping old events (64 KiB).
const MAX_WRITE_BUFFER: usize = 65_536;

/// Default rate limit: messages per second per client.
const DEFAULT_RATE_LIMIT: u32 = 200;

/// Rate limit window duration in seconds.
const RATE_LIMIT_WINDOW_SECS: u64 = 1;

/// Client id used for messages that do not arrive over the socket
/// (replay files).  Always trusted; socket clients start at 1.
pub const LOCAL_CLIENT_ID: u64 = 0;

/// Per-client rate limiter.
pub struct RateLimiter {
    window_start: Instant,
    message_count: u32,
    pub max_per_second: u32,
}

impl RateLimiter {
    fn new(max_per_second: u32) -> Self {
        Self {
            window_start: Instant::now(),
            message_count: 0,
            max_per_second,
        }
    }

    /// Check if a message is allowed.  Returns true if within rate limit.
    fn check(&mut self) -> bool {
        let now = Instant::now();
        let elapsed = now.duration_since(self.window_start);
        if elapsed.as_secs() >= RATE_LIMIT_WINDOW_SECS {
            self.window_start = now;
            self.message_count = 1;
            true
        } else {
            self.message_count += 1;
            self.message_count <= self.max_per_second
        }
    }
}

/// Read peer credentials from a Unix socket using SO_PEERCRED (Linux)
/// or return None on unsupported platforms.
fn get_peer_cred(stream: &UnixStream) -> Option<(Option<u32>, Option<i32>)> {
    #[cfg(target_os = "linux")]
    {
        let fd = stream.as_raw_fd();
        let mut cred: libc::ucred = unsafe { std::mem::zeroed() };
        let mut len = std::mem::size_of::<libc::ucred>() as libc::socklen_t;
        let ret = unsafe {
            libc::getsockopt(
                fd,
                libc::SOL_SOCKET,
                libc::SO_PEERCRED,
                &mut cred as *mut _ as *mut libc::c_void,
                &mut len,
            )
        };
        if ret == 0 {
            Some((Some(cred.uid), Some(cred.pid)))
        } else {
            None
        }
    }
    #[cfg(not(target_os = "linux"))]
    {
        let _ = stream.as_raw_fd();
        Some((None, None))
    }
}

/// Per-client IPC connection state.
pub struct IpcClient {
    pub stream: UnixStream,
    pub read_buf: Vec<u8>,
    pub write_buf: Vec<u8>,
    pub authenticated: bool,
    pub id: u64,
    /// Name sent in the hello handshake.
    pub name: Option<String>,
    /// Peer UID from SO_PEERCRED (Unix only).
    pub peer_uid: Option<u32>,
    /// Peer PID from SO_PEERCRED (Unix only).
    pub peer_pid: Option<i32>,
    pub rate_limiter: RateLimiter,
    /// Set after a framing violation; the client is dropped on the next poll.
    pub poisoned: bool,
}

impl IpcClient {
    pub fn new(stream: UnixStream, id: u64) -> Self {
        if let Err(e) = stream.set_nonblocking(true) {
            warn!(id, "failed to set client socket non-blocking: {}", e);
        }

        let (peer_uid, peer_pid) = get_peer_cred(&stream).unwrap_or_else(|| {
            warn!(id, "failed to read peer credentials");
            (None, None)
        });

        if let Some(uid) = peer_uid {
            debug!(id, peer_uid = uid, peer_pid = ?peer_pid, "peer credentials");
        }

        Self {
            stream,
            read_buf: Vec::with_capacity(4096),
            write_buf: Vec::new(),
            authenticated: false,
            id,
            name: None,
            peer_uid,
            peer_pid,
            rate_limiter: RateLimiter::new(DEFAULT_RATE_LIMIT),
            poisoned: false,
        }
    }

    /// Attempt to flush pending writes.
    pub fn flush_writes(&mut self) -> io::Result<()> {
        while !self.write_buf.is_empty() {
            match self.stream.write(&self.write_buf) {
                Ok(0) => return Err(io::Error::new(io::ErrorKind::WriteZero, "write zero")),
                Ok(n) => {
                    self.write_buf.drain(..n);
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// Enqueue a framed message (length prefix + payload) for sending.
    pub fn enqueue_message(&mut self, payload: &str) {
        self.write_buf.extend_from_slice(&encode_frame(payload));
    }

    /// Enqueue an event, applying backpressure if buffer is too large.
    pub fn enqueue_event(&mut self, payload: &str) {
        if self.write_buf.len() > MAX_WRITE_BUFFER {
            warn!(client_id = self.id, "write buffer overflow, dropping event");
            return;
        }
        self.enqueue_message(payload);
    }

    /// Extract complete framed messages from the read buffer.
    pub fn extract_messages(&mut self) -> Vec<String> {
        let mut messages = Vec::new();
        while self.read_buf.len() >= 4 {
            let len = u32::from_be_bytes([
                self.read_buf[0],
                self.read_buf[1],
                self.read_buf[2],
                self.read_buf[3],
            ]);
            if len > MAX_MESSAGE_SIZE {
                error!(client_id = self.id, len, "message exceeds maximum size");
                self.read_buf.clear();
                self.poisoned = true;
                break;
            }
            let total = 4 + len as usize;
            if self.read_buf.len() < total {
                break;
            }
            let payload = String::from_utf8_lossy(&self.read_buf[4..total]).to_string();
            self.read_buf.drain(..total);
            messages.push(payload);
        }
        messages
    }
}

/// Length-prefix a payload for the wire.
pub fn encode_frame(payload: &str) -> Vec<u8> {
    let bytes = payload.as_bytes();
    let mut out = Vec::with_capacity(4 + bytes.len());
    out.extend_from_slice(&(bytes.len() as u32).to_be_bytes());
    out.extend_from_slice(bytes);
    out
}

/// IPC server managing the listener socket and all client connections.
pub struct IpcServer {
    pub socket_path: PathBuf,
    pub clients: HashMap<u64, IpcClient>,
    next_client_id: u64,
    listener: Option<UnixListener>,
    pub ipc_trace: bool,
    /// When set, broadcast events are also collected here (replay mode).
    pub local_events: Option<Vec<String>>,
}

impl IpcServer {
    /// Create IPC server (does not bind yet; call `bind` after).
    pub fn new(socket_path: PathBuf) -> Self {
        Self {
            socket_path,
            clients: HashMap::new(),
            next_client_id: 1,
            listener: None,
            ipc_trace: false,
            local_events: None,
        }
    }

    /// Compute the default socket path.
    pub fn default_socket_path() -> PathBuf {
        let runtime_dir = std::env::var("XDG_RUNTIME_DIR")
            .unwrap_or_else(|_| format!("/tmp/handspace-{}", unsafe { libc::getuid() }));
        PathBuf::from(runtime_dir).join("handspace-ipc.sock")
    }

    /// Whether `client_id` has completed the hello handshake.
    pub fn is_authenticated(&self, client_id: u64) -> bool {
        client_id == LOCAL_CLIENT_ID
            || self
                .clients
                .get(&client_id)
                .map(|c| c.authenticated)
                .unwrap_or(false)
    }

    /// Bind the listener socket and register it with calloop.
    pub fn bind(
        state: &mut HandspaceState,
        loop_handle: &LoopHandle<'static, HandspaceState>,
    ) -> anyhow::Result<()> {
        let socket_path = state.ipc_server.socket_path.clone();
        if let Some(parent) = socket_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating socket directory {}", parent.display()))?;
        }

        // Remove stale socket
        if socket_path.exists() {
            std::fs::remove_file(&socket_path)?;
        }

        let listener = UnixListener::bind(&socket_path)
            .with_context(|| format!("binding {}", socket_path.display()))?;
        listener.set_nonblocking(true)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&socket_path, std::fs::Permissions::from_mode(0o700))?;
        }

        info!(?socket_path, "IPC server listening");

        // The loop only watches for readiness; accepting goes through the
        // listener kept on the server.
        let source = Generic::new(listener.try_clone()?, Interest::READ, Mode::Level);
        loop_handle
            .insert_source(source, |_readiness, _fd, state| {
                Self::accept_pending(state);
                Ok(PostAction::Continue)
            })
            .map_err(|e| anyhow!("failed to register IPC listener: {}", e.error))?;

        state.ipc_server.listener = Some(listener);
        Ok(())
    }

    /// Accept every pending connection.
    fn accept_pending(state: &mut HandspaceState) {
        let server = &mut state.ipc_server;
        let Some(listener) = server.listener.as_ref() else {
            return;
        };
        loop {
            match listener.accept() {
                Ok((stream, _addr)) => {
                    let client_id = server.next_client_id;
                    server.next_client_id += 1;
                    info!(client_id, "IPC client connected");
                    server.clients.insert(client_id, IpcClient::new(stream, client_id));
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => {
                    error!("accept error: {}", e);
                    break;
                }
            }
        }
    }

    /// Poll all clients for readable data, dispatch messages, flush writes.
    /// Called once per event loop iteration.
    pub fn poll_clients(state: &mut HandspaceState) {
        let client_ids: Vec<u64> = state.ipc_server.clients.keys().copied().collect();
        let mut disconnected = Vec::new();

        for client_id in client_ids {
            let messages = {
                let Some(client) = state.ipc_server.clients.get_mut(&client_id) else {
                    continue;
                };
                let mut buf = [0u8; 4096];
                let read_result = match client.stream.read(&mut buf) {
                    Ok(0) => Err(io::Error::new(io::ErrorKind::ConnectionReset, "eof")),
                    Ok(n) => {
                        client.read_buf.extend_from_slice(&buf[..n]);
                        Ok(())
                    }
                    Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(()),
                    Err(e) => Err(e),
                };
                if let Err(e) = read_result {
                    debug!(client_id, "client disconnected: {}", e);
                    disconnected.push(client_id);
                    continue;
                }
                let messages = client.extract_messages();
                if client.poisoned {
                    disconnected.push(client_id);
                    continue;
                }
                messages
            };

            for msg_str in messages {
                let rate_ok = state
                    .ipc_server
                    .clients
                    .get_mut(&client_id)
                    .map(|c| c.rate_limiter.check())
                    .unwrap_or(false);

                if !rate_ok {
                    warn!(client_id, "rate limit exceeded, dropping message");
                    if let Some(client) = state.ipc_server.clients.get_mut(&client_id) {
                        client.enqueue_message(
                            "(:type :response :id 0 :status :error :reason \"rate limit exceeded\")",
                        );
                    }
                    continue;
                }

                if state.ipc_server.ipc_trace {
                    info!(client_id, "<< {}", msg_str);
                }
                if let Some(resp) = dispatch::handle_message(state, client_id, &msg_str) {
                    if state.ipc_server.ipc_trace {
                        info!(client_id, ">> {}", resp);
                    }
                    if let Some(client) = state.ipc_server.clients.get_mut(&client_id) {
                        client.enqueue_message(&resp);
                    }
                }
            }
        }

        // Flush every client, including ones that only received broadcasts.
        for (client_id, client) in state.ipc_server.clients.iter_mut() {
            if let Err(e) = client.flush_writes() {
                debug!(client_id, "write error: {}", e);
                disconnected.push(*client_id);
            }
        }

        for id in disconnected {
            if state.ipc_server.clients.remove(&id).is_some() {
                info!(client_id = id, "removing disconnected IPC client");
            }
        }
    }

    /// Broadcast an event to all authenticated clients.
    pub fn broadcast_event(state: &mut HandspaceState, event: &str) {
        let server = &mut state.ipc_server;
        if server.ipc_trace {
            info!("broadcast >> {}", event);
        }
        if let Some(sink) = server.local_events.as_mut() {
            sink.push(event.to_string());
        }
        for client in server.clients.values_mut() {
            if client.authenticated {
                client.enqueue_event(event);
            }
        }
    }

    /// Drop every client and remove the socket file.
    pub fn shutdown(&mut self) {
        let count = self.clients.len();
        for client in self.clients.values_mut() {
            let _ = client.flush_writes();
        }
        self.clients.clear();
        self.listener = None;
        if self.socket_path.exists() {
            if let Err(e) = std::fs::remove_file(&self.socket_path) {
                warn!(path = ?self.socket_path, "failed to remove IPC socket: {}", e);
            }
        }
        info!(clients = count, "IPC server shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client_pair() -> (IpcClient, UnixStream) {
        let (ours, theirs) = UnixStream::pair().unwrap();
        (IpcClient::new(ours, 1), theirs)
    }

    #[test]
    fn test_encode_frame_prefix() {
        let frame = encode_frame("(:type :ping)");
        assert_eq!(&frame[..4], &13u32.to_be_bytes());
        assert_eq!(&frame[4..], b"(:type :ping)");
    }

    #[test]
    fn test_extract_complete_and_partial() {
        let (mut client, _peer) = client_pair();
        let mut bytes = encode_frame("(:a 1)");
        let second = encode_frame("(:b 2)");
        bytes.extend_from_slice(&second[..5]);
        client.read_buf.extend_from_slice(&bytes);

        assert_eq!(client.extract_messages(), vec!["(:a 1)".to_string()]);
        assert_eq!(client.read_buf.len(), 5);

        client.read_buf.extend_from_slice(&second[5..]);
        assert_eq!(client.extract_messages(), vec!["(:b 2)".to_string()]);
        assert!(client.read_buf.is_empty());
    }

    #[test]
    fn test_oversized_frame_poisons_client() {
        let (mut client, _peer) = client_pair();
        client
            .read_buf
            .extend_from_slice(&(MAX_MESSAGE_SIZE + 1).to_be_bytes());
        assert!(client.extract_messages().is_empty());
        assert!(client.poisoned);
        assert!(client.read_buf.is_empty());
    }

    #[test]
    fn test_event_backpressure() {
        let (mut client, _peer) = client_pair();
        client.write_buf = vec![0; MAX_WRITE_BUFFER + 1];
        client.enqueue_event("(:type :event)");
        assert_eq!(client.write_buf.len(), MAX_WRITE_BUFFER + 1);
        // Direct responses are never dropped.
        client.enqueue_message("(:type :response)");
        assert!(client.write_buf.len() > MAX_WRITE_BUFFER + 1);
    }

    #[test]
    fn test_flush_reaches_peer() {
        let (mut client, mut peer) = client_pair();
        client.enqueue_message("(:x 1)");
        client.flush_writes().unwrap();
        assert!(client.write_buf.is_empty());
        let mut buf = [0u8; 10];
        peer.read_exact(&mut buf).unwrap();
        assert_eq!(&buf[4..], b"(:x 1)");
    }

    #[test]
    fn test_rate_limiter() {
        let mut limiter = RateLimiter::new(3);
        assert!(limiter.check());
        assert!(limiter.check());
        assert!(limiter.check());
        assert!(!limiter.check());
    }

    #[test]
    fn test_peer_credentials_are_ours() {
        let (client, _peer) = client_pair();
        if let Some(uid) = client.peer_uid {
            assert_eq!(uid, unsafe { libc::getuid() });
        }
    }

    #[test]
    fn test_local_client_always_authenticated() {
        let mut server = IpcServer::new(PathBuf::from("/tmp/unused.sock"));
        assert!(server.is_authenticated(LOCAL_CLIENT_ID));
        assert!(!server.is_authenticated(7));
        let (client, _peer) = client_pair();
        server.clients.insert(1, client);
        assert!(!server.is_authenticated(1));
        server.clients.get_mut(&1).unwrap().authenticated = true;
        assert!(server.is_authenticated(1));
    }

    #[test]
    fn test_default_socket_path_name() {
        let path = IpcServer::default_socket_path();
        assert!(path.ends_with("handspace-ipc.sock"));
    }
}
