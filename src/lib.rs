//! Moat daemon: local credential-injection broker for containerized coding agents.
//!
//! The daemon never holds a container's raw secrets in the container itself.
//! Instead it keeps a registry of active "runs", each carrying the per-host
//! injection rules a proxy needs to rewrite outbound HTTPS requests with the
//! right credential. This crate implements the daemon side of that contract:
//! the run registry, its control API, process lifecycle, and background
//! token refresh. The TLS-intercepting proxy itself is an external
//! collaborator that only consumes the capabilities exposed here.

#![warn(missing_debug_implementations)]
#![warn(rust_2018_idioms)]
#![warn(unreachable_pub)]
#![warn(elided_lifetimes_in_paths)]
#![deny(unused_must_use)]
#![deny(unsafe_op_in_unsafe_fn)]

/// Control-plane HTTP API: wire types, server, and client.
pub mod api;
/// Daemon configuration (timers, intervals, paths).
pub mod config;
/// Core daemon components: registry, run contexts, lifecycle, liveness, refresh.
pub mod core;
/// Error kinds surfaced by the daemon.
pub mod error;
/// Tracing bootstrap.
pub mod observability;
