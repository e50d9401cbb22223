//! Integration test support for quotewire-app.
//!
//! End-to-end tests run the real WebSocket connector against an in-process
//! mock feed server.

pub mod common;
