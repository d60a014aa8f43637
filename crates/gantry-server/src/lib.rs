//! # gantry-server
//!
//! Transports that put the protocol core in front of clients.
//!
//! - **Network**: `GET /sse` opens a channel session and streams pushes back
//!   as server-sent events; `POST /messages?sessionId=` delivers into it.
//!   Both routes require a bearer token. Idle sessions are evicted by a
//!   background reaper.
//! - **Stdio**: one connection over newline-delimited JSON on stdin/stdout.

pub mod auth;
pub mod config;
pub mod error;
pub mod gateway;
pub mod reaper;
pub mod registry;
pub mod server;
pub mod session;
pub mod stdio;

pub use config::ServerConfig;
pub use gateway::{build_router, GatewayState};
pub use reaper::ReaperConfig;
pub use registry::{RegistryError, SessionRegistry};
pub use server::{start, ServerHandle};
pub use session::{ChannelSession, SessionState};
pub use stdio::{run_stdio, StdioError};
