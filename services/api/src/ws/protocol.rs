//! The realtime wire protocol between the browser client and this server.
//!
//! Event names extend the OpenAI realtime schema; the extension events live
//! under the `session.characters.*` prefix. Every outbound event is wrapped
//! in an envelope carrying a random event id and a strictly increasing
//! per-session sequence number so clients can deduplicate and detect
//! reordering.

use rand::{Rng, distr::Alphanumeric};
use serde::{Deserialize, Serialize};

/// Events accepted from the client. Anything else is a validation error.
#[derive(Deserialize, Debug)]
#[serde(tag = "type")]
pub enum ClientEvent {
    /// Updates session settings, currently the active character.
    #[serde(rename = "session.update")]
    SessionUpdate { session: SessionConfig },
    /// A chunk of microphone audio (base64 PCM16 at 24 kHz).
    #[serde(rename = "input_audio_buffer.append")]
    InputAudioBufferAppend { audio: String },
    /// Cancels the in-flight response, if any.
    #[serde(rename = "response.cancel")]
    ResponseCancel,
    /// Replaces the session's character snapshot from a directory.
    #[serde(rename = "session.characters.reload")]
    CharactersReload { directory: String },
    /// Lists the characters in the session's current snapshot.
    #[serde(rename = "session.characters.list")]
    CharactersList,
}

#[derive(Deserialize, Debug)]
pub struct SessionConfig {
    /// Name of the character to activate.
    pub character: Option<String>,
    /// Toggles verbose logging of this session's inbound events.
    #[serde(default)]
    pub debug: Option<bool>,
}

/// Events sent to the client.
#[derive(Serialize, Debug, Clone)]
#[serde(tag = "type")]
pub enum ServerEvent {
    #[serde(rename = "error")]
    Error { error: ErrorDetails },
    #[serde(rename = "session.updated")]
    SessionUpdated { character: String, voice: String },
    #[serde(rename = "input_audio_buffer.speech_started")]
    SpeechStarted,
    #[serde(rename = "input_audio_buffer.speech_stopped")]
    SpeechStopped,
    #[serde(rename = "conversation.item.input_audio_transcription.delta")]
    TranscriptionDelta { delta: String, start_time: f64 },
    #[serde(rename = "response.created")]
    ResponseCreated,
    #[serde(rename = "response.text.delta")]
    ResponseTextDelta { delta: String },
    #[serde(rename = "response.text.done")]
    ResponseTextDone { text: String },
    /// A chunk of synthesized audio (base64 PCM16 at 24 kHz).
    #[serde(rename = "response.audio.delta")]
    ResponseAudioDelta { delta: String },
    #[serde(rename = "response.audio.done")]
    ResponseAudioDone,
    #[serde(rename = "session.characters.reloaded")]
    CharactersReloaded {
        directory: String,
        loaded_count: usize,
        error_count: usize,
        total_files: usize,
        characters: Vec<CharacterSummary>,
    },
    #[serde(rename = "session.characters.listed")]
    CharactersListed {
        directory: String,
        character_count: usize,
        characters: Vec<CharacterListing>,
    },
}

#[derive(Serialize, Debug, Clone)]
pub struct CharacterSummary {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub good: Option<bool>,
}

#[derive(Serialize, Debug, Clone)]
pub struct CharacterListing {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub good: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

/// Error payload, matching the OpenAI realtime error shape.
#[derive(Serialize, Debug, Clone)]
pub struct ErrorDetails {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub param: Option<String>,
}

impl ErrorDetails {
    /// A rejected client event. The session continues.
    pub fn validation(message: impl Into<String>) -> Self {
        Self {
            kind: "invalid_request_error".into(),
            code: None,
            message: message.into(),
            param: None,
        }
    }

    /// Names the offending field of the client event.
    pub fn with_param(mut self, param: impl Into<String>) -> Self {
        self.param = Some(param.into());
        self
    }

    /// A failed registry operation; the prior snapshot is kept.
    pub fn registry(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            kind: "invalid_request_error".into(),
            code: Some(code.into()),
            message: message.into(),
            param: None,
        }
    }

    /// A backend or generation failure. The session continues.
    pub fn server(message: impl Into<String>) -> Self {
        Self {
            kind: "server_error".into(),
            code: None,
            message: message.into(),
            param: None,
        }
    }
}

/// The outbound wrapper around every `ServerEvent`.
#[derive(Serialize, Debug)]
pub struct Envelope {
    pub event_id: String,
    pub seq: u64,
    #[serde(flatten)]
    pub event: ServerEvent,
}

/// Generates an event id in the `event_<21 alphanumeric>` format.
pub fn random_event_id() -> String {
    let id: String = rand::rng()
        .sample_iter(&Alphanumeric)
        .take(21)
        .map(char::from)
        .collect();
    format!("event_{id}")
}

/// Strictly increasing per-direction sequence counter, starting at 1.
#[derive(Debug, Default)]
pub struct SequenceCounter(u64);

impl SequenceCounter {
    pub fn next(&mut self) -> u64 {
        self.0 += 1;
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_event_deserialization() {
        let append: ClientEvent =
            serde_json::from_str(r#"{"type": "input_audio_buffer.append", "audio": "AAAA"}"#)
                .unwrap();
        assert!(matches!(append, ClientEvent::InputAudioBufferAppend { .. }));

        let reload: ClientEvent = serde_json::from_str(
            r#"{"type": "session.characters.reload", "directory": "default"}"#,
        )
        .unwrap();
        match reload {
            ClientEvent::CharactersReload { directory } => assert_eq!(directory, "default"),
            other => panic!("unexpected event: {other:?}"),
        }

        let list: ClientEvent =
            serde_json::from_str(r#"{"type": "session.characters.list"}"#).unwrap();
        assert!(matches!(list, ClientEvent::CharactersList));

        let cancel: ClientEvent = serde_json::from_str(r#"{"type": "response.cancel"}"#).unwrap();
        assert!(matches!(cancel, ClientEvent::ResponseCancel));

        let update: ClientEvent = serde_json::from_str(
            r#"{"type": "session.update", "session": {"character": "narrator", "debug": true}}"#,
        )
        .unwrap();
        match update {
            ClientEvent::SessionUpdate { session } => {
                assert_eq!(session.character.as_deref(), Some("narrator"));
                assert_eq!(session.debug, Some(true));
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn test_unknown_client_event_rejected() {
        let result: Result<ClientEvent, _> =
            serde_json::from_str(r#"{"type": "session.destroy"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_server_event_type_names() {
        let delta = serde_json::to_string(&ServerEvent::ResponseTextDelta {
            delta: "hi".into(),
        })
        .unwrap();
        assert!(delta.contains(r#""type":"response.text.delta""#));

        let started = serde_json::to_string(&ServerEvent::SpeechStarted).unwrap();
        assert!(started.contains(r#""type":"input_audio_buffer.speech_started""#));

        let reloaded = serde_json::to_string(&ServerEvent::CharactersReloaded {
            directory: "/etc/personas".into(),
            loaded_count: 2,
            error_count: 1,
            total_files: 3,
            characters: vec![CharacterSummary {
                name: "alpha".into(),
                good: Some(true),
            }],
        })
        .unwrap();
        assert!(reloaded.contains(r#""type":"session.characters.reloaded""#));
        assert!(reloaded.contains(r#""loaded_count":2"#));
    }

    #[test]
    fn test_envelope_flattens_event() {
        let envelope = Envelope {
            event_id: "event_abc".into(),
            seq: 7,
            event: ServerEvent::ResponseAudioDone,
        };
        let json = serde_json::to_string(&envelope).unwrap();
        assert!(json.contains(r#""event_id":"event_abc""#));
        assert!(json.contains(r#""seq":7"#));
        assert!(json.contains(r#""type":"response.audio.done""#));
    }

    #[test]
    fn test_error_details_shapes() {
        let validation = ErrorDetails::validation("bad event");
        assert_eq!(validation.kind, "invalid_request_error");
        assert!(validation.code.is_none());

        let registry = ErrorDetails::registry("directory_not_found", "missing");
        assert_eq!(registry.code.as_deref(), Some("directory_not_found"));

        let json = serde_json::to_string(&ServerEvent::Error {
            error: ErrorDetails::server("backend down"),
        })
        .unwrap();
        assert!(json.contains(r#""type":"error""#));
        assert!(json.contains(r#""message":"backend down""#));
    }

    #[test]
    fn test_event_id_format() {
        let id = random_event_id();
        assert!(id.starts_with("event_"));
        assert_eq!(id.len(), "event_".len() + 21);
        assert!(id["event_".len()..].chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn test_sequence_counter_is_strictly_increasing() {
        let mut seq = SequenceCounter::default();
        let values: Vec<u64> = (0..5).map(|_| seq.next()).collect();
        assert_eq!(values, vec![1, 2, 3, 4, 5]);
    }
}
