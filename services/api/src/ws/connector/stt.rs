//! WebSocket client for the streaming speech-to-text backend.
//!
//! Outbound: raw little-endian PCM16 at the client rate (24 kHz), resampled
//! here to the backend's 16 kHz before being sent as binary frames.
//! Inbound: JSON transcript events; the backend runs its own VAD and
//! reports end of speech.

use super::{CONNECTOR_QUEUE, ConnectorError, ConnectorHandle, StreamFrame};
use crate::audio;
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_tungstenite::{
    connect_async,
    tungstenite::{client::IntoClientRequest, protocol::Message as WsMessage},
};
use tracing::{info, warn};

#[derive(Deserialize, Debug)]
#[serde(tag = "type", rename_all = "snake_case")]
enum SttMessage {
    Ready,
    Partial {
        text: String,
        #[serde(default)]
        start_time: f64,
    },
    Final {
        text: String,
    },
    EndOfSpeech,
    Error {
        message: String,
    },
}

/// Connects to the STT backend and spawns its bridge task.
pub async fn connect(stt_url: &str) -> Result<ConnectorHandle<Bytes>, ConnectorError> {
    let url = format!("{}/api/asr-streaming", stt_url.trim_end_matches('/'));
    let request = url
        .clone()
        .into_client_request()
        .map_err(|e| ConnectorError::Unavailable(e.to_string()))?;
    let (ws_stream, _) = connect_async(request)
        .await
        .map_err(|e| ConnectorError::Unavailable(e.to_string()))?;
    info!(%url, "connected to STT backend");

    let mut resampler =
        audio::StreamResampler::new(audio::CLIENT_SAMPLE_RATE, audio::STT_SAMPLE_RATE, 512)
            .map_err(|e| ConnectorError::Unavailable(e.to_string()))?;

    let (audio_tx, mut audio_rx) = mpsc::channel::<Bytes>(CONNECTOR_QUEUE);
    let (frame_tx, frame_rx) = mpsc::channel(CONNECTOR_QUEUE);

    let task = tokio::spawn(async move {
        let (mut ws_tx, mut ws_rx) = ws_stream.split();
        loop {
            tokio::select! {
                maybe = audio_rx.recv() => match maybe {
                    Some(data) => {
                        let pcm_i16 = audio::pcm16_from_le_bytes(&data);
                        let pcm_f32 = audio::convert_i16_to_f32(&pcm_i16);
                        let resampled = resampler.process(&pcm_f32);
                        if resampled.is_empty() {
                            continue;
                        }
                        let payload = audio::pcm16_to_le_bytes(&audio::convert_f32_to_i16(&resampled));
                        if ws_tx.send(WsMessage::Binary(payload.into())).await.is_err() {
                            let _ = frame_tx
                                .send(StreamFrame::Failed(ConnectorError::Unavailable(
                                    "STT socket write failed".into(),
                                )))
                                .await;
                            break;
                        }
                    }
                    // Handle dropped; close the backend socket and stop.
                    None => {
                        let _ = ws_tx.send(WsMessage::Close(None)).await;
                        break;
                    }
                },
                maybe = ws_rx.next() => match maybe {
                    Some(Ok(WsMessage::Text(text))) => {
                        let frame = match serde_json::from_str::<SttMessage>(&text) {
                            Ok(SttMessage::Ready) => StreamFrame::Ready,
                            Ok(SttMessage::Partial { text, start_time }) => {
                                StreamFrame::TranscriptDelta { text, start_time }
                            }
                            Ok(SttMessage::Final { text }) => StreamFrame::TranscriptFinal { text },
                            Ok(SttMessage::EndOfSpeech) => StreamFrame::EndOfSpeech,
                            Ok(SttMessage::Error { message }) => {
                                StreamFrame::Failed(ConnectorError::Unavailable(message))
                            }
                            Err(e) => StreamFrame::Failed(ConnectorError::ProtocolViolation(
                                format!("bad STT message: {e}"),
                            )),
                        };
                        let failed = matches!(frame, StreamFrame::Failed(_));
                        if frame_tx.send(frame).await.is_err() || failed {
                            break;
                        }
                    }
                    Some(Ok(WsMessage::Binary(_))) => {
                        let _ = frame_tx
                            .send(StreamFrame::Failed(ConnectorError::ProtocolViolation(
                                "unexpected binary frame from STT backend".into(),
                            )))
                            .await;
                        break;
                    }
                    Some(Ok(WsMessage::Close(_))) | None => {
                        warn!("STT backend closed the connection");
                        let _ = frame_tx
                            .send(StreamFrame::Failed(ConnectorError::Unavailable(
                                "transcription stream closed".into(),
                            )))
                            .await;
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        let _ = frame_tx
                            .send(StreamFrame::Failed(ConnectorError::Unavailable(e.to_string())))
                            .await;
                        break;
                    }
                },
            }
        }
    });

    Ok(ConnectorHandle::new(audio_tx, frame_rx, task))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stt_message_parsing() {
        let partial: SttMessage = serde_json::from_str(
            r#"{"type": "partial", "text": "hello wor", "start_time": 0.48}"#,
        )
        .unwrap();
        match partial {
            SttMessage::Partial { text, start_time } => {
                assert_eq!(text, "hello wor");
                assert!((start_time - 0.48).abs() < f64::EPSILON);
            }
            other => panic!("unexpected message: {other:?}"),
        }

        let eos: SttMessage = serde_json::from_str(r#"{"type": "end_of_speech"}"#).unwrap();
        assert!(matches!(eos, SttMessage::EndOfSpeech));

        // start_time is optional on partials.
        let bare: SttMessage =
            serde_json::from_str(r#"{"type": "partial", "text": "hi"}"#).unwrap();
        assert!(matches!(bare, SttMessage::Partial { .. }));
    }

    #[test]
    fn test_unknown_stt_message_rejected() {
        let result: Result<SttMessage, _> = serde_json::from_str(r#"{"type": "telemetry"}"#);
        assert!(result.is_err());
    }
}
