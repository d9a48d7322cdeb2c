//! Manages the realtime WebSocket connection lifecycle for one session.
//!
//! Each connection owns its own coordinator loop, an emit task that drains
//! outbound events to the socket, one STT connector, and at most one
//! in-flight generation turn. All hops are bounded channels; a slow client
//! pauses synthesis instead of dropping frames.

use super::{
    connector::{ConnectorHandle, StreamFrame, stt},
    protocol::{
        CharacterListing, CharacterSummary, ClientEvent, Envelope, ErrorDetails, SequenceCounter,
        ServerEvent, SessionConfig, random_event_id,
    },
    turn::{PendingTurn, TurnEvent, TurnRequest, TurnSignal, TurnState},
};
use crate::{audio, state::AppState};
use anyhow::{Result, anyhow};
use axum::{
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::Response,
};
use bytes::Bytes;
use cascade_core::{
    character::Character,
    chat::{CharacterHistories, Role},
    registry::Snapshot,
};
use futures_util::{
    SinkExt, StreamExt,
    stream::{SplitSink, SplitStream},
};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

/// Bound on the outbound event queue. When full, producers (including the
/// generation turn) block, which pauses synthesis upstream.
const EMIT_QUEUE: usize = 256;
const TURN_QUEUE: usize = 64;

/// Axum handler to upgrade an HTTP connection to a WebSocket.
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

/// Entry point for one realtime connection: splits the socket, starts the
/// emit task, and runs the coordinator until the client goes away.
#[instrument(name = "realtime_session", skip_all, fields(session_id))]
async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let session_id = Uuid::new_v4();
    tracing::Span::current().record("session_id", tracing::field::display(session_id));
    info!("New realtime connection.");

    let (socket_tx, socket_rx) = socket.split();
    let (emit_tx, emit_rx) = mpsc::channel(EMIT_QUEUE);
    let emit_task = tokio::spawn(emit_loop(socket_tx, emit_rx));

    state.metrics.sessions.sessions_started.inc();
    let mut session = Session::new(state, emit_tx);
    if let Err(e) = session.run(socket_rx).await {
        error!(error = ?e, "Realtime session terminated with error.");
    }
    session.teardown().await;
    drop(session);
    let _ = emit_task.await;
    info!("Realtime session finished.");
}

/// Drains server events to the socket, wrapping each in an envelope with a
/// fresh event id and the next sequence number. Sequence numbers are
/// assigned here, at the single point of emission, so they are gapless.
async fn emit_loop(
    mut socket_tx: SplitSink<WebSocket, Message>,
    mut rx: mpsc::Receiver<ServerEvent>,
) {
    let mut seq = SequenceCounter::default();
    while let Some(event) = rx.recv().await {
        let envelope = Envelope {
            event_id: random_event_id(),
            seq: seq.next(),
            event,
        };
        match serde_json::to_string(&envelope) {
            Ok(json) => {
                if socket_tx.send(Message::Text(json.into())).await.is_err() {
                    break;
                }
            }
            Err(e) => error!(error = %e, "failed to serialize server event"),
        }
    }
    let _ = socket_tx.close().await;
}

struct Session {
    state: Arc<AppState>,
    emit: mpsc::Sender<ServerEvent>,
    snapshot: Arc<Snapshot>,
    active: Option<Arc<Character>>,
    histories: CharacterHistories,
    turn_state: TurnState,
    stt: Option<ConnectorHandle<Bytes>>,
    pending: Option<PendingTurn>,
    turn_rx: Option<mpsc::Receiver<TurnSignal>>,
    /// The character the in-flight turn was spawned for. Turn output is
    /// attributed to this character even if the client switches the active
    /// one mid-generation.
    turn_character: Option<Arc<Character>>,
    /// When set, inbound client events are logged verbatim.
    debug: bool,
    client_events: u64,
}

impl Session {
    fn new(state: Arc<AppState>, emit: mpsc::Sender<ServerEvent>) -> Self {
        let snapshot = state.default_snapshot.clone();
        let active = snapshot.first();
        Self {
            state,
            emit,
            snapshot,
            active,
            histories: CharacterHistories::new(),
            turn_state: TurnState::Idle,
            stt: None,
            pending: None,
            turn_rx: None,
            turn_character: None,
            debug: false,
            client_events: 0,
        }
    }

    /// The coordinator loop: multiplexes the client socket, the STT frame
    /// stream, and progress signals from the in-flight turn.
    async fn run(&mut self, mut socket_rx: SplitStream<WebSocket>) -> Result<()> {
        match stt::connect(&self.state.config.stt_url).await {
            Ok(handle) => self.stt = Some(handle),
            Err(e) => {
                warn!(error = %e, "STT backend unavailable at session start");
                self.emit_error(ErrorDetails::server(format!(
                    "speech recognition unavailable: {e}"
                )))
                .await?;
            }
        }

        loop {
            tokio::select! {
                maybe = socket_rx.next() => match maybe {
                    Some(Ok(Message::Text(text))) => {
                        self.client_events += 1;
                        self.handle_client_event(&text).await?;
                    }
                    Some(Ok(Message::Binary(_))) => {
                        warn!("ignoring binary frame from client");
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        info!("client closed the connection");
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!(error = %e, "client socket error");
                        break;
                    }
                },
                frame = recv_or_pending(self.stt.as_mut().map(|h| &mut h.frames)) => {
                    self.handle_stt_frame(frame).await?;
                },
                signal = recv_or_pending(self.turn_rx.as_mut()) => {
                    self.handle_turn_signal(signal).await?;
                },
            }
        }
        Ok(())
    }

    /// Cancels whatever is still running and waits for the tasks to stop
    /// before the session state is freed.
    async fn teardown(&mut self) {
        if let Some(pending) = self.pending.take() {
            self.state.metrics.sessions.turns_cancelled.inc();
            pending.shutdown().await;
        }
        self.turn_rx = None;
        self.turn_character = None;
        if let Some(stt) = self.stt.take() {
            stt.shutdown().await;
        }
        info!(client_events = self.client_events, "session torn down");
    }

    async fn handle_client_event(&mut self, text: &str) -> Result<()> {
        if self.debug {
            info!(event = %text, "client event");
        }
        let event = match serde_json::from_str::<ClientEvent>(text) {
            Ok(event) => event,
            Err(e) => {
                return self
                    .emit_error(ErrorDetails::validation(format!(
                        "unrecognized client event: {e}"
                    )))
                    .await;
            }
        };
        match event {
            ClientEvent::SessionUpdate { session } => self.apply_session_update(session).await,
            ClientEvent::InputAudioBufferAppend { audio } => self.forward_audio(&audio).await,
            ClientEvent::ResponseCancel => {
                self.cancel_turn();
                Ok(())
            }
            ClientEvent::CharactersReload { directory } => {
                self.reload_characters(&directory).await
            }
            ClientEvent::CharactersList => self.list_characters().await,
        }
    }

    async fn apply_session_update(&mut self, config: SessionConfig) -> Result<()> {
        if let Some(debug) = config.debug {
            self.debug = debug;
            info!(debug = self.debug, "session debug logging updated");
        }
        let Some(name) = config.character else {
            if config.debug.is_some() {
                return Ok(());
            }
            return self
                .emit_error(
                    ErrorDetails::validation("session.character is required")
                        .with_param("session.character"),
                )
                .await;
        };
        match self.snapshot.lookup(&name) {
            Some(character) => {
                info!(character = %name, "switching active character");
                let voice = character.voice.voice_id();
                self.active = Some(character);
                self.emit(ServerEvent::SessionUpdated {
                    character: name,
                    voice,
                })
                .await
            }
            None => {
                self.emit_error(
                    ErrorDetails::validation(format!("unknown character \"{name}\""))
                        .with_param("session.character"),
                )
                .await
            }
        }
    }

    async fn forward_audio(&mut self, audio_b64: &str) -> Result<()> {
        let bytes = match audio::decode_pcm16_base64(audio_b64) {
            Ok(bytes) => Bytes::from(bytes),
            Err(e) => {
                return self
                    .emit_error(ErrorDetails::validation(format!("audio is not valid base64: {e}")))
                    .await;
            }
        };
        // The STT connector is restartable within a session.
        if self.stt.is_none() {
            match stt::connect(&self.state.config.stt_url).await {
                Ok(handle) => self.stt = Some(handle),
                Err(e) => {
                    return self
                        .emit_error(ErrorDetails::server(format!(
                            "speech recognition unavailable: {e}"
                        )))
                        .await;
                }
            }
        }
        if let Some(stt) = &self.stt {
            if let Err(e) = stt.send(bytes).await {
                self.stt = None;
                return self.emit_error(ErrorDetails::server(e.to_string())).await;
            }
        }
        Ok(())
    }

    async fn reload_characters(&mut self, directory: &str) -> Result<()> {
        // A new snapshot may drop the active character and its tools, so an
        // in-flight turn cannot survive a reload.
        self.cancel_turn();
        match self.state.registry.reload(directory) {
            Ok(outcome) => {
                self.state
                    .metrics
                    .record_load(outcome.loaded_count, outcome.error_count);
                self.snapshot = outcome.snapshot;
                self.active = self
                    .active
                    .take()
                    .and_then(|c| self.snapshot.lookup(&c.name))
                    .or_else(|| self.snapshot.first());
                let characters = self
                    .snapshot
                    .list()
                    .map(|c| CharacterSummary {
                        name: c.name.clone(),
                        good: c.good,
                    })
                    .collect();
                self.emit(ServerEvent::CharactersReloaded {
                    directory: self.snapshot.directory().display().to_string(),
                    loaded_count: outcome.loaded_count,
                    error_count: outcome.error_count,
                    total_files: outcome.total_files,
                    characters,
                })
                .await
            }
            Err(e) => {
                warn!(error = %e, "character reload rejected, keeping current snapshot");
                self.emit_error(ErrorDetails::registry(e.code(), e.to_string()))
                    .await
            }
        }
    }

    async fn list_characters(&mut self) -> Result<()> {
        let characters = self
            .snapshot
            .list()
            .map(|c| CharacterListing {
                name: c.name.clone(),
                good: c.good,
                comment: c.comment.clone(),
            })
            .collect::<Vec<_>>();
        self.emit(ServerEvent::CharactersListed {
            directory: self.snapshot.directory().display().to_string(),
            character_count: characters.len(),
            characters,
        })
        .await
    }

    async fn handle_stt_frame(&mut self, frame: Option<StreamFrame>) -> Result<()> {
        let Some(frame) = frame else {
            self.stt = None;
            return Ok(());
        };
        match frame {
            StreamFrame::Ready => {
                info!("STT backend ready");
                Ok(())
            }
            StreamFrame::TranscriptDelta { text, start_time } => {
                self.note_user_speech().await?;
                if let Some(character) = self.active.clone() {
                    self.histories
                        .for_character(&character)
                        .add_delta(Role::User, &text);
                }
                self.emit(ServerEvent::TranscriptionDelta {
                    delta: text,
                    start_time,
                })
                .await
            }
            StreamFrame::TranscriptFinal { text } => {
                if let Some(character) = self.active.clone() {
                    self.histories
                        .for_character(&character)
                        .replace_last(Role::User, text);
                }
                Ok(())
            }
            StreamFrame::EndOfSpeech => {
                self.emit(ServerEvent::SpeechStopped).await?;
                if self.turn_state == TurnState::UserSpeaking {
                    self.turn_state = self.turn_state.apply(TurnEvent::EndOfSpeech);
                    self.start_turn().await?;
                }
                Ok(())
            }
            StreamFrame::Failed(e) => {
                warn!(error = %e, "STT connector failed");
                self.stt = None;
                // Connector failures take down the in-flight turn, not the
                // session.
                self.cancel_turn();
                self.emit_error(ErrorDetails::server(e.to_string())).await
            }
            other => {
                warn!(?other, "unexpected frame from STT connector");
                Ok(())
            }
        }
    }

    /// Registers user speech with the state machine, handling barge-in when
    /// a response is in flight. Partial output already delivered stays in
    /// the history.
    async fn note_user_speech(&mut self) -> Result<()> {
        match self.turn_state {
            TurnState::Idle => {
                self.turn_state = self.turn_state.apply(TurnEvent::SpeechStarted);
                self.emit(ServerEvent::SpeechStarted).await
            }
            TurnState::Generating | TurnState::Speaking => {
                info!("barge-in: cancelling in-flight response");
                self.turn_state = self
                    .turn_state
                    .apply(TurnEvent::BargeIn)
                    .apply(TurnEvent::SpeechStarted);
                self.drop_turn();
                self.emit(ServerEvent::SpeechStarted).await
            }
            TurnState::Interrupted => {
                self.turn_state = self.turn_state.apply(TurnEvent::SpeechStarted);
                Ok(())
            }
            TurnState::UserSpeaking => Ok(()),
        }
    }

    async fn start_turn(&mut self) -> Result<()> {
        let Some(character) = self.active.clone() else {
            self.turn_state = TurnState::Idle;
            return self
                .emit_error(ErrorDetails::server(
                    "no active character; load a character directory first",
                ))
                .await;
        };
        let messages = match self.histories.for_character(&character).to_request_messages() {
            Ok(messages) => messages,
            Err(e) => {
                self.turn_state = TurnState::Idle;
                return self.emit_error(ErrorDetails::server(e.to_string())).await;
            }
        };
        let (signal_tx, signal_rx) = mpsc::channel(TURN_QUEUE);
        self.turn_rx = Some(signal_rx);
        self.turn_character = Some(character.clone());
        self.state.metrics.sessions.turns_started.inc();
        self.pending = Some(PendingTurn::spawn(
            TurnRequest {
                llm: self.state.llm_client.clone(),
                character,
                messages,
                tts_url: self.state.config.tts_url.clone(),
            },
            signal_tx,
        ));
        Ok(())
    }

    async fn handle_turn_signal(&mut self, signal: Option<TurnSignal>) -> Result<()> {
        let Some(signal) = signal else {
            // Task ended; its terminal signal was already processed.
            self.turn_rx = None;
            self.pending = None;
            self.turn_character = None;
            return Ok(());
        };
        match signal {
            TurnSignal::Created => self.emit(ServerEvent::ResponseCreated).await,
            TurnSignal::TextDelta(delta) => {
                // Attributed to the turn's character, not the active one:
                // the client may have switched characters mid-generation.
                if let Some(character) = self.turn_character.clone() {
                    self.histories
                        .for_character(&character)
                        .add_delta(Role::Assistant, &delta);
                }
                self.emit(ServerEvent::ResponseTextDelta { delta }).await
            }
            TurnSignal::AudioChunk(bytes) => {
                if self.turn_state == TurnState::Generating {
                    self.turn_state = self.turn_state.apply(TurnEvent::FirstAudio);
                }
                self.emit(ServerEvent::ResponseAudioDelta {
                    delta: audio::encode_pcm16_base64(&bytes),
                })
                .await
            }
            TurnSignal::AudioDone => self.emit(ServerEvent::ResponseAudioDone).await,
            TurnSignal::Finished { text } => {
                self.turn_state = self.turn_state.apply(TurnEvent::SynthesisComplete);
                self.pending = None;
                self.turn_rx = None;
                self.turn_character = None;
                self.emit(ServerEvent::ResponseTextDone { text }).await
            }
            TurnSignal::Failed(message) => {
                self.cancel_turn();
                self.emit_error(ErrorDetails::server(message)).await
            }
        }
    }

    /// Tears down the in-flight turn, if any, and returns to `Idle`. Safe
    /// to call at any time; the turn is cancelled at most once because the
    /// handle is consumed.
    fn cancel_turn(&mut self) {
        self.drop_turn();
        self.turn_state = self.turn_state.apply(TurnEvent::Cancel);
    }

    fn drop_turn(&mut self) {
        if let Some(pending) = self.pending.take() {
            self.state.metrics.sessions.turns_cancelled.inc();
            pending.cancel();
        }
        self.turn_rx = None;
        self.turn_character = None;
    }

    async fn emit(&self, event: ServerEvent) -> Result<()> {
        self.emit
            .send(event)
            .await
            .map_err(|_| anyhow!("outbound event queue closed"))
    }

    async fn emit_error(&self, error: ErrorDetails) -> Result<()> {
        self.emit(ServerEvent::Error { error }).await
    }
}

/// Awaits the next item of an optional receiver; pends forever when the
/// receiver is absent so the surrounding `select!` simply ignores it.
async fn recv_or_pending<T>(rx: Option<&mut mpsc::Receiver<T>>) -> Option<T> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}
