//! Server-side wiring: shared state, broadcasting, routing, transport.

pub mod handler;
pub mod hub;
pub mod router;
pub mod runner;
pub mod signal;
pub mod state;
