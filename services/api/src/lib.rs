//! Cascade API Library Crate
//!
//! This library contains the logic for the cascade voice-orchestration
//! service: configuration, shared state, the small REST surface, audio
//! helpers, the realtime WebSocket session machinery, and routing. The
//! binaries under `bin/` are thin wrappers around this library.

pub mod audio;
pub mod config;
pub mod handlers;
pub mod metrics;
pub mod models;
pub mod router;
pub mod state;
pub mod ws;
