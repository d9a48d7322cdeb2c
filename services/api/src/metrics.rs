//! Prometheus counters for sessions, turns, and character loading, exposed
//! as text at `GET /metrics`.

use prometheus::{Encoder, IntCounter, IntGauge, Registry, TextEncoder};

#[derive(Clone)]
pub struct SessionMetrics {
    pub sessions_started: IntCounter,
    pub turns_started: IntCounter,
    pub turns_cancelled: IntCounter,
    pub characters_loaded: IntGauge,
    pub character_load_errors: IntGauge,
}

#[derive(Clone)]
pub struct MetricsHub {
    registry: Registry,
    pub sessions: SessionMetrics,
}

impl MetricsHub {
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();
        let sessions = SessionMetrics {
            sessions_started: IntCounter::new(
                "cascade_sessions_started",
                "Total realtime sessions accepted",
            )?,
            turns_started: IntCounter::new(
                "cascade_turns_started",
                "Total generation turns started",
            )?,
            turns_cancelled: IntCounter::new(
                "cascade_turns_cancelled",
                "Total generation turns cancelled before completion",
            )?,
            characters_loaded: IntGauge::new(
                "cascade_characters_loaded",
                "Characters in the most recent registry load",
            )?,
            character_load_errors: IntGauge::new(
                "cascade_character_load_errors",
                "Files skipped in the most recent registry load",
            )?,
        };
        registry.register(Box::new(sessions.sessions_started.clone()))?;
        registry.register(Box::new(sessions.turns_started.clone()))?;
        registry.register(Box::new(sessions.turns_cancelled.clone()))?;
        registry.register(Box::new(sessions.characters_loaded.clone()))?;
        registry.register(Box::new(sessions.character_load_errors.clone()))?;
        Ok(Self { registry, sessions })
    }

    /// Records the counts of a registry load.
    pub fn record_load(&self, loaded_count: usize, error_count: usize) {
        self.sessions.characters_loaded.set(loaded_count as i64);
        self.sessions.character_load_errors.set(error_count as i64);
    }

    /// Renders all registered metrics in the Prometheus text format.
    pub fn encode_text(&self) -> String {
        let mut buf = Vec::new();
        let encoder = TextEncoder::new();
        if let Err(e) = encoder.encode(&self.registry.gather(), &mut buf) {
            return format!("error encoding metrics: {e}");
        }
        String::from_utf8(buf).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_appear_in_text_output() {
        let hub = MetricsHub::new().unwrap();
        hub.sessions.sessions_started.inc();
        hub.sessions.turns_started.inc();
        hub.sessions.turns_cancelled.inc();
        hub.record_load(3, 1);

        let text = hub.encode_text();
        assert!(text.contains("cascade_sessions_started 1"));
        assert!(text.contains("cascade_turns_started 1"));
        assert!(text.contains("cascade_turns_cancelled 1"));
        assert!(text.contains("cascade_characters_loaded 3"));
        assert!(text.contains("cascade_character_load_errors 1"));
    }

    #[test]
    fn test_record_load_overwrites_previous_counts() {
        let hub = MetricsHub::new().unwrap();
        hub.record_load(5, 2);
        hub.record_load(1, 0);
        let text = hub.encode_text();
        assert!(text.contains("cascade_characters_loaded 1"));
        assert!(text.contains("cascade_character_load_errors 0"));
    }
}
