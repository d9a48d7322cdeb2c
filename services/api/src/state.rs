//! Shared Application State
//!
//! This module defines the `AppState` struct, which holds all shared,
//! clonable resources: configuration, the LLM client, the character
//! registry, and the snapshot loaded at startup.

use crate::{config::Config, metrics::MetricsHub};
use cascade_core::{llm_client::LlmClient, registry::Registry, registry::Snapshot};
use std::sync::Arc;

/// The shared application state, created once at startup and passed to all
/// handlers. Sessions start from `default_snapshot` and may swap in their
/// own snapshots via reload without affecting other sessions.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub llm_client: Arc<dyn LlmClient>,
    pub registry: Arc<Registry>,
    pub default_snapshot: Arc<Snapshot>,
    pub http: reqwest::Client,
    pub metrics: MetricsHub,
}
