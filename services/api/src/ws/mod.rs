//! The realtime WebSocket surface: wire protocol, backend connectors, the
//! turn-taking state machine, and the per-connection session coordinator.

pub(crate) mod connector;
pub mod protocol;
pub mod session;
pub(crate) mod turn;

pub use session::ws_handler;
