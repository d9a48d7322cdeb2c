//! REST API Models
//!
//! Response bodies for the small HTTP surface, annotated for OpenAPI
//! generation with `utoipa`.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(Serialize, Deserialize, ToSchema, Debug, Clone)]
pub struct ServiceInfo {
    #[schema(example = "cascade")]
    pub name: String,
    pub version: String,
}

/// Reachability of the three streaming backends.
#[derive(Serialize, Deserialize, ToSchema, Debug, Clone, PartialEq)]
pub struct HealthResponse {
    pub ok: bool,
    pub stt_up: bool,
    pub tts_up: bool,
    pub llm_up: bool,
}

/// A character suitable for client-side voice pickers.
#[derive(Serialize, Deserialize, ToSchema, Debug, Clone)]
pub struct VoiceInfo {
    #[schema(example = "narrator")]
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Serialize, ToSchema)]
pub struct ErrorResponse {
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_health_response_serialization() {
        let health = HealthResponse {
            ok: false,
            stt_up: true,
            tts_up: false,
            llm_up: true,
        };
        let json = serde_json::to_string(&health).unwrap();
        assert!(json.contains("\"ok\":false"));
        assert!(json.contains("\"tts_up\":false"));

        let round_trip: HealthResponse = serde_json::from_str(&json).unwrap();
        assert_eq!(round_trip, health);
    }

    #[test]
    fn test_voice_info_omits_empty_fields() {
        let voice = VoiceInfo {
            name: "narrator".to_string(),
            comment: None,
            description: Some("A calm storyteller".to_string()),
        };
        let json = serde_json::to_string(&voice).unwrap();
        assert!(!json.contains("comment"));
        assert!(json.contains("A calm storyteller"));
    }

    #[test]
    fn test_error_response_serialization() {
        let error = ErrorResponse {
            message: "Character directory not found".to_string(),
        };
        let json = serde_json::to_string(&error).unwrap();
        assert_eq!(json, r#"{"message":"Character directory not found"}"#);
    }
}
