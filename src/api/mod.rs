//! Control-plane HTTP API: wire types, server, and client.

/// The daemon-side control client (hyper over a Unix socket).
pub mod client;
/// The `{ "error": "<category>" }` response-body helper.
pub mod error_response;
/// The control socket HTTP server.
pub mod server;
/// Wire types shared by the server and client.
pub mod types;

pub use client::ControlClient;
pub use server::{ControlServer, RouteTable};
