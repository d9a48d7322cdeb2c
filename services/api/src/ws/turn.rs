//! Turn-taking state and the in-flight generation task.
//!
//! `TurnState` is the per-session state machine arbitrating who holds the
//! floor. `PendingTurn` is one spawned LLM-to-TTS generation; it reports
//! progress to the session over a bounded channel and is cancelled by
//! aborting its task, which drops the TTS connector and closes its socket.

use super::connector::{StreamFrame, tts};
use anyhow::{Result, anyhow};
use async_openai::types::{
    ChatCompletionMessageToolCall, ChatCompletionRequestAssistantMessageArgs,
    ChatCompletionRequestMessage, ChatCompletionRequestToolMessageArgs, ChatCompletionTool,
    ChatCompletionToolArgs, ChatCompletionToolType, FunctionCall, FunctionObjectArgs,
};
use bytes::Bytes;
use cascade_core::{
    character::Character,
    llm_client::{ChatEvent, LlmClient},
    tools,
};
use futures_util::StreamExt;
use std::sync::Arc;
use tokio::{sync::mpsc, task::JoinHandle};
use tracing::{debug, info};

/// Who holds the conversational floor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnState {
    /// Nobody is speaking and nothing is being generated.
    Idle,
    /// The user is speaking; transcripts are accumulating.
    UserSpeaking,
    /// A response is being generated but no audio has been played yet.
    Generating,
    /// Synthesized audio is streaming to the client.
    Speaking,
    /// The user barged in; the in-flight response is being torn down.
    Interrupted,
}

/// Inputs that drive `TurnState` transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnEvent {
    SpeechStarted,
    EndOfSpeech,
    FirstAudio,
    SynthesisComplete,
    BargeIn,
    Cancel,
}

impl TurnState {
    /// Applies one event. Events that do not apply in the current state
    /// leave it unchanged; they are safe to deliver at any time.
    pub fn apply(self, event: TurnEvent) -> TurnState {
        use TurnEvent::*;
        use TurnState::*;
        match (self, event) {
            (_, Cancel) => Idle,
            (Idle, SpeechStarted) => UserSpeaking,
            (Interrupted, SpeechStarted) => UserSpeaking,
            (UserSpeaking, EndOfSpeech) => Generating,
            (Generating, FirstAudio) => Speaking,
            // A turn may finish without ever producing audio.
            (Generating, SynthesisComplete) => Idle,
            (Speaking, SynthesisComplete) => Idle,
            (Generating, BargeIn) | (Speaking, BargeIn) => Interrupted,
            (state, _) => state,
        }
    }
}

/// Progress reports from a generation task to its session.
#[derive(Debug)]
pub enum TurnSignal {
    /// Generation started; the TTS connector is open.
    Created,
    /// A text fragment of the assistant's reply.
    TextDelta(String),
    /// A chunk of synthesized PCM16 audio.
    AudioChunk(Bytes),
    /// The TTS backend finished synthesizing the reply.
    AudioDone,
    /// The turn completed; carries the full reply text.
    Finished { text: String },
    /// The turn failed and should be discarded.
    Failed(String),
}

/// Everything a generation task needs, captured at spawn time so the turn
/// is unaffected by later session changes (character switches, reloads).
pub struct TurnRequest {
    pub llm: Arc<dyn LlmClient>,
    pub character: Arc<Character>,
    pub messages: Vec<ChatCompletionRequestMessage>,
    pub tts_url: String,
}

/// One in-flight response. Dropping it aborts the task; the task's owned
/// TTS connector handle is dropped with it, closing the backend socket.
#[derive(Debug)]
pub struct PendingTurn {
    task: JoinHandle<()>,
}

impl PendingTurn {
    pub fn spawn(request: TurnRequest, signals: mpsc::Sender<TurnSignal>) -> Self {
        let task = tokio::spawn(async move {
            if let Err(e) = run_turn(request, &signals).await {
                debug!(error = %e, "generation turn failed");
                let _ = signals.send(TurnSignal::Failed(e.to_string())).await;
            }
        });
        Self { task }
    }

    /// Cancels the turn. Consuming `self` guarantees a turn is cancelled
    /// at most once.
    pub fn cancel(self) {
        info!("cancelling in-flight turn");
        // Drop runs abort.
    }

    /// Cancels the turn and waits for its task to finish.
    pub async fn shutdown(mut self) {
        self.task.abort();
        let _ = (&mut self.task).await;
    }
}

impl Drop for PendingTurn {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Converts a character's tool definitions into the chat-completion tool
/// schema offered to the model.
pub fn request_tools(character: &Character) -> Result<Vec<ChatCompletionTool>> {
    character
        .tools
        .iter()
        .map(|def| {
            Ok(ChatCompletionToolArgs::default()
                .function(
                    FunctionObjectArgs::default()
                        .name(def.name.clone())
                        .description(def.description.clone().unwrap_or_default())
                        .parameters(def.parameters.clone())
                        .build()?,
                )
                .build()?)
        })
        .collect()
}

/// Executes one tool call against the character's tool table and appends
/// the call and its result to `messages` so the stream can be restarted.
/// A name outside the table is an error; the turn is cancelled, never the
/// session.
fn apply_tool_call(
    character: &Character,
    id: String,
    name: String,
    arguments: String,
    messages: &mut Vec<ChatCompletionRequestMessage>,
) -> Result<()> {
    let def = character
        .tools
        .iter()
        .find(|t| t.name == name)
        .ok_or_else(|| anyhow!("model requested unknown tool \"{name}\""))?;
    let result = tools::execute(def, &arguments)?;
    debug!(tool = %name, "tool call executed");

    let call = ChatCompletionMessageToolCall {
        id: id.clone(),
        r#type: ChatCompletionToolType::Function,
        function: FunctionCall { name, arguments },
    };
    messages.push(
        ChatCompletionRequestAssistantMessageArgs::default()
            .tool_calls(vec![call])
            .build()?
            .into(),
    );
    messages.push(
        ChatCompletionRequestToolMessageArgs::default()
            .tool_call_id(id)
            .content(result)
            .build()?
            .into(),
    );
    Ok(())
}

/// Drives one response: streams LLM deltas into the TTS connector while
/// relaying text and audio to the session. Tool calls are executed inline
/// and the stream restarted with the tool result appended.
async fn run_turn(request: TurnRequest, signals: &mpsc::Sender<TurnSignal>) -> Result<()> {
    let TurnRequest {
        llm,
        character,
        mut messages,
        tts_url,
    } = request;

    let tools = request_tools(&character)?;
    let mut tts = tts::connect(&tts_url, &character.voice.voice_id()).await?;
    if signals.send(TurnSignal::Created).await.is_err() {
        return Ok(());
    }

    let mut stream = llm.stream_chat(messages.clone(), tools.clone()).await?;
    let mut full_text = String::new();
    let mut llm_done = false;

    loop {
        tokio::select! {
            event = stream.next(), if !llm_done => match event {
                Some(Ok(ChatEvent::Delta(delta))) => {
                    if !full_text.is_empty()
                        && !full_text.ends_with(char::is_whitespace)
                        && !delta.starts_with(char::is_whitespace)
                    {
                        full_text.push(' ');
                    }
                    full_text.push_str(&delta);
                    if signals.send(TurnSignal::TextDelta(delta.clone())).await.is_err() {
                        return Ok(());
                    }
                    tts.send(tts::TtsCommand::Text(delta)).await?;
                }
                Some(Ok(ChatEvent::ToolCall { id, name, arguments })) => {
                    apply_tool_call(&character, id, name, arguments, &mut messages)?;
                    stream = llm.stream_chat(messages.clone(), tools.clone()).await?;
                }
                Some(Ok(ChatEvent::Done)) | None => {
                    llm_done = true;
                    tts.send(tts::TtsCommand::Eos).await?;
                }
                Some(Err(e)) => return Err(anyhow!("chat completion stream failed: {e}")),
            },
            frame = tts.frames.recv() => match frame {
                Some(StreamFrame::Audio(bytes)) => {
                    if signals.send(TurnSignal::AudioChunk(bytes)).await.is_err() {
                        return Ok(());
                    }
                }
                Some(StreamFrame::SynthesisDone) => {
                    let _ = signals.send(TurnSignal::AudioDone).await;
                    break;
                }
                Some(StreamFrame::Ready) => {}
                Some(StreamFrame::Failed(e)) => return Err(e.into()),
                Some(_) => {}
                None => return Err(anyhow!("synthesis ended unexpectedly")),
            },
        }
    }

    let _ = signals.send(TurnSignal::Finished { text: full_text }).await;
    Ok(())
}
