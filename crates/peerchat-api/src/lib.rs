//! Local HTTP/WebSocket control interface.
//!
//! Listens on loopback only, with CORS restricted to localhost
//! origins. HTTP endpoints translate UI requests into service calls;
//! the single WebSocket pushes incoming messages to the UI and
//! accepts send frames from it.
//!
//! - [`server`] — listener, router, graceful shutdown
//! - [`handlers`] — one module per endpoint group
//! - [`ws`] — WebSocket upgrade, read loop, push consumer
//! - [`error`] — error kind → HTTP status mapping

pub mod error;
pub mod handlers;
pub mod server;
pub mod ws;

pub use server::{start_api_server, ApiContext};
