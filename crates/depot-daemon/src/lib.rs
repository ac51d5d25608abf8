//! HTTP gateway that stores uploads in a single bucket and streams them back.

pub mod server;
pub mod telemetry;
