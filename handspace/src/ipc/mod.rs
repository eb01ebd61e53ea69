//! IPC subsystem: Unix socket, length-prefixed s-expression messages.
//!
//! The detector process feeds frames over this socket and UI clients
//! subscribe to the resulting events.

pub mod dispatch;
pub mod server;

pub use server::IpcServer;
