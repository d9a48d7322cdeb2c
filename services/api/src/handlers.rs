//! Axum Handlers for the REST API
//!
//! Service banner, backend health probes, and the voice listing. Uses
//! `utoipa` doc comments to generate OpenAPI documentation.

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use std::{sync::Arc, time::Duration};
use tracing::error;

use crate::{
    models::{ErrorResponse, HealthResponse, ServiceInfo, VoiceInfo},
    state::AppState,
};

const PROBE_TIMEOUT: Duration = Duration::from_secs(2);

pub enum ApiError {
    BadRequest(String),
    InternalServerError(anyhow::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::BadRequest(message) => {
                (StatusCode::BAD_REQUEST, Json(ErrorResponse { message })).into_response()
            }
            ApiError::InternalServerError(err) => {
                error!("Internal Server Error: {:?}", err);
                let message = "An internal server error occurred.".to_string();
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(ErrorResponse { message }),
                )
                    .into_response()
            }
        }
    }
}

impl<E> From<E> for ApiError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self::InternalServerError(err.into())
    }
}

/// Service banner.
#[utoipa::path(
    get,
    path = "/",
    responses(
        (status = 200, description = "Service name and version", body = ServiceInfo)
    )
)]
pub async fn root() -> Json<ServiceInfo> {
    Json(ServiceInfo {
        name: env!("CARGO_PKG_NAME").to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Reports reachability of the STT, TTS, and LLM backends.
#[utoipa::path(
    get,
    path = "/v1/health",
    responses(
        (status = 200, description = "Backend reachability", body = HealthResponse)
    )
)]
pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let stt_probe_url = ws_to_http(&state.config.stt_url);
    let tts_probe_url = ws_to_http(&state.config.tts_url);
    let (stt_up, tts_up, llm_up) = tokio::join!(
        probe(&state.http, &stt_probe_url),
        probe(&state.http, &tts_probe_url),
        probe(&state.http, &state.config.llm_url),
    );
    Json(HealthResponse {
        ok: stt_up && tts_up && llm_up,
        stt_up,
        tts_up,
        llm_up,
    })
}

/// Lists characters marked as good in the startup snapshot.
#[utoipa::path(
    get,
    path = "/v1/voices",
    responses(
        (status = 200, description = "Characters available for selection", body = [VoiceInfo])
    )
)]
pub async fn voices(State(state): State<Arc<AppState>>) -> Json<Vec<VoiceInfo>> {
    let voices = state
        .default_snapshot
        .list()
        .filter(|character| character.good == Some(true))
        .map(|character| VoiceInfo {
            name: character.name.clone(),
            comment: character.comment.clone(),
            description: character.voice.description(),
        })
        .collect();
    Json(voices)
}

/// Prometheus text-format metrics.
pub async fn metrics(State(state): State<Arc<AppState>>) -> String {
    state.metrics.encode_text()
}

/// Any HTTP response counts as reachable; only transport failures do not.
async fn probe(client: &reqwest::Client, url: &str) -> bool {
    client
        .get(url)
        .timeout(PROBE_TIMEOUT)
        .send()
        .await
        .is_ok()
}

fn ws_to_http(url: &str) -> String {
    if let Some(rest) = url.strip_prefix("wss://") {
        format!("https://{rest}")
    } else if let Some(rest) = url.strip_prefix("ws://") {
        format!("http://{rest}")
    } else {
        url.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::Config, metrics::MetricsHub};
    use cascade_core::registry::{Registry, Snapshot};
    use std::path::PathBuf;

    #[test]
    fn test_ws_to_http_conversion() {
        assert_eq!(ws_to_http("ws://localhost:8090"), "http://localhost:8090");
        assert_eq!(ws_to_http("wss://stt.internal"), "https://stt.internal");
        assert_eq!(ws_to_http("http://already"), "http://already");
    }

    fn unreachable_state() -> Arc<AppState> {
        let config = Config {
            bind_address: "127.0.0.1:0".parse().unwrap(),
            // Port 9 (discard) is not listening; probes fail fast.
            stt_url: "ws://127.0.0.1:9".into(),
            tts_url: "ws://127.0.0.1:9".into(),
            llm_url: "http://127.0.0.1:9/v1".into(),
            llm_api_key: None,
            chat_model: "test-model".into(),
            log_level: tracing::Level::INFO,
            characters_path: PathBuf::from("./characters"),
        };
        Arc::new(AppState {
            config: Arc::new(config),
            llm_client: Arc::new(NoLlm),
            registry: Arc::new(Registry::new(PathBuf::from("./characters"))),
            default_snapshot: Arc::new(Snapshot::empty()),
            http: reqwest::Client::new(),
            metrics: MetricsHub::new().unwrap(),
        })
    }

    struct NoLlm;

    #[async_trait::async_trait]
    impl cascade_core::llm_client::LlmClient for NoLlm {
        async fn stream_chat(
            &self,
            _messages: Vec<async_openai::types::ChatCompletionRequestMessage>,
            _tools: Vec<async_openai::types::ChatCompletionTool>,
        ) -> anyhow::Result<cascade_core::llm_client::ChatStream> {
            Ok(Box::pin(futures_util::stream::empty()))
        }
    }

    #[tokio::test]
    async fn test_health_probes_all_backends_concurrently() {
        let state = unreachable_state();
        let Json(health) = health(State(state)).await;
        assert!(!health.stt_up);
        assert!(!health.tts_up);
        assert!(!health.llm_up);
        assert!(!health.ok);
    }

    #[tokio::test]
    async fn test_metrics_endpoint_renders_counters() {
        let state = unreachable_state();
        state.metrics.sessions.sessions_started.inc();
        let body = metrics(State(state)).await;
        assert!(body.contains("cascade_sessions_started 1"));
    }
}
