//! Shared utilities used by the server binary and library.

pub mod logger;
pub mod time;
