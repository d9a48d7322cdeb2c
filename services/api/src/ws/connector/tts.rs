//! WebSocket client for the streaming text-to-speech backend.
//!
//! Outbound: JSON text commands as the LLM produces deltas, terminated by
//! an end-of-stream marker. Inbound: binary PCM16 audio at 24 kHz, followed
//! by a JSON end marker once synthesis of the submitted text is complete.

use super::{CONNECTOR_QUEUE, ConnectorError, ConnectorHandle, StreamFrame};
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_tungstenite::{
    connect_async,
    tungstenite::{client::IntoClientRequest, protocol::Message as WsMessage},
};
use tracing::info;

/// Commands accepted by a TTS connector.
#[derive(Debug)]
pub enum TtsCommand {
    /// Text to synthesize, streamed as it arrives from the LLM.
    Text(String),
    /// No more text follows; the backend should flush and report the end.
    Eos,
}

#[derive(Serialize, Debug)]
#[serde(tag = "type", rename_all = "snake_case")]
enum OutboundMessage {
    Text { text: String },
    Eos,
}

#[derive(Deserialize, Debug)]
#[serde(tag = "type", rename_all = "snake_case")]
enum InboundMessage {
    Ready,
    End,
    Error { message: String },
}

/// Connects to the TTS backend for one utterance with the given voice.
pub async fn connect(
    tts_url: &str,
    voice: &str,
) -> Result<ConnectorHandle<TtsCommand>, ConnectorError> {
    let url = format!(
        "{}/api/tts_streaming?voice={voice}",
        tts_url.trim_end_matches('/')
    );
    let request = url
        .clone()
        .into_client_request()
        .map_err(|e| ConnectorError::Unavailable(e.to_string()))?;
    let (ws_stream, _) = connect_async(request)
        .await
        .map_err(|e| ConnectorError::Unavailable(e.to_string()))?;
    info!(%url, "connected to TTS backend");

    let (cmd_tx, mut cmd_rx) = mpsc::channel::<TtsCommand>(CONNECTOR_QUEUE);
    let (frame_tx, frame_rx) = mpsc::channel(CONNECTOR_QUEUE);

    let task = tokio::spawn(async move {
        let (mut ws_tx, mut ws_rx) = ws_stream.split();
        loop {
            tokio::select! {
                maybe = cmd_rx.recv() => {
                    let outbound = match maybe {
                        Some(TtsCommand::Text(text)) => OutboundMessage::Text { text },
                        Some(TtsCommand::Eos) => OutboundMessage::Eos,
                        None => {
                            let _ = ws_tx.send(WsMessage::Close(None)).await;
                            break;
                        }
                    };
                    let payload = match serde_json::to_string(&outbound) {
                        Ok(payload) => payload,
                        Err(e) => {
                            let _ = frame_tx
                                .send(StreamFrame::Failed(ConnectorError::ProtocolViolation(
                                    e.to_string(),
                                )))
                                .await;
                            break;
                        }
                    };
                    if ws_tx.send(WsMessage::Text(payload.into())).await.is_err() {
                        let _ = frame_tx
                            .send(StreamFrame::Failed(ConnectorError::Unavailable(
                                "TTS socket write failed".into(),
                            )))
                            .await;
                        break;
                    }
                },
                maybe = ws_rx.next() => match maybe {
                    Some(Ok(WsMessage::Binary(data))) => {
                        if frame_tx.send(StreamFrame::Audio(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(WsMessage::Text(text))) => {
                        match serde_json::from_str::<InboundMessage>(&text) {
                            Ok(InboundMessage::Ready) => {
                                if frame_tx.send(StreamFrame::Ready).await.is_err() {
                                    break;
                                }
                            }
                            Ok(InboundMessage::End) => {
                                let _ = frame_tx.send(StreamFrame::SynthesisDone).await;
                                break;
                            }
                            Ok(InboundMessage::Error { message }) => {
                                let _ = frame_tx
                                    .send(StreamFrame::Failed(ConnectorError::Unavailable(message)))
                                    .await;
                                break;
                            }
                            Err(e) => {
                                let _ = frame_tx
                                    .send(StreamFrame::Failed(ConnectorError::ProtocolViolation(
                                        format!("bad TTS message: {e}"),
                                    )))
                                    .await;
                                break;
                            }
                        }
                    }
                    Some(Ok(WsMessage::Close(_))) | None => {
                        let _ = frame_tx
                            .send(StreamFrame::Failed(ConnectorError::Unavailable(
                                "synthesis stream closed before completion".into(),
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

    Ok(ConnectorHandle::new(cmd_tx, frame_rx, task))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outbound_message_shapes() {
        let text = serde_json::to_string(&OutboundMessage::Text {
            text: "hello".into(),
        })
        .unwrap();
        assert_eq!(text, r#"{"type":"text","text":"hello"}"#);

        let eos = serde_json::to_string(&OutboundMessage::Eos).unwrap();
        assert_eq!(eos, r#"{"type":"eos"}"#);
    }

    #[test]
    fn test_inbound_message_parsing() {
        let end: InboundMessage = serde_json::from_str(r#"{"type": "end"}"#).unwrap();
        assert!(matches!(end, InboundMessage::End));

        let error: InboundMessage =
            serde_json::from_str(r#"{"type": "error", "message": "no such voice"}"#).unwrap();
        match error {
            InboundMessage::Error { message } => assert_eq!(message, "no such voice"),
            other => panic!("unexpected message: {other:?}"),
        }
    }
}
