use anyhow::Result;
use async_openai::{
    Client,
    config::OpenAIConfig,
    error::OpenAIError,
    types::{
        ChatCompletionMessageToolCallChunk, ChatCompletionRequestMessage, ChatCompletionTool,
        CreateChatCompletionRequestArgs, FinishReason,
    },
};
use async_trait::async_trait;
use futures::{Stream, StreamExt, future};
use std::pin::Pin;

/// Events yielded by a streaming chat completion.
#[derive(Debug, Clone)]
pub enum ChatEvent {
    /// A text fragment of the assistant's reply.
    Delta(String),
    /// The model requested a tool invocation. Fields are fully accumulated
    /// across the stream before this is emitted.
    ToolCall {
        id: String,
        name: String,
        arguments: String,
    },
    /// The model finished its reply.
    Done,
}

/// A stream of chat events from the LLM.
pub type ChatStream = Pin<Box<dyn Stream<Item = Result<ChatEvent, OpenAIError>> + Send>>;

/// A generic client for streaming chat completions.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Starts a streaming completion over `messages`, offering `tools` to
    /// the model when non-empty.
    async fn stream_chat(
        &self,
        messages: Vec<ChatCompletionRequestMessage>,
        tools: Vec<ChatCompletionTool>,
    ) -> Result<ChatStream>;
}

/// Accumulates streamed tool-call fragments into one complete call.
/// Only the first tool call of a turn is tracked; the generation loop
/// executes tools one at a time.
#[derive(Debug, Default)]
struct ToolCallAccumulator {
    id: String,
    name: String,
    arguments: String,
    seen: bool,
}

impl ToolCallAccumulator {
    fn absorb(&mut self, chunks: &[ChatCompletionMessageToolCallChunk]) {
        for chunk in chunks {
            if chunk.index != 0 {
                continue;
            }
            self.seen = true;
            if let Some(id) = &chunk.id {
                self.id.push_str(id);
            }
            if let Some(function) = &chunk.function {
                if let Some(name) = &function.name {
                    self.name.push_str(name);
                }
                if let Some(arguments) = &function.arguments {
                    self.arguments.push_str(arguments);
                }
            }
        }
    }

    fn finish(self) -> Option<ChatEvent> {
        if !self.seen {
            return None;
        }
        Some(ChatEvent::ToolCall {
            id: self.id,
            name: self.name,
            arguments: self.arguments,
        })
    }
}

/// An implementation of `LlmClient` for any OpenAI-compatible API.
pub struct OpenAiCompatibleClient {
    client: Client<OpenAIConfig>,
    model: String,
}

impl OpenAiCompatibleClient {
    /// Creates a new client for an OpenAI-compatible service.
    ///
    /// # Arguments
    ///
    /// * `config` - The client configuration, including API key and base URL.
    /// * `model` - The model identifier to use for chat completions.
    pub fn new(config: OpenAIConfig, model: String) -> Self {
        Self {
            client: Client::with_config(config),
            model,
        }
    }
}

#[async_trait]
impl LlmClient for OpenAiCompatibleClient {
    async fn stream_chat(
        &self,
        messages: Vec<ChatCompletionRequestMessage>,
        tools: Vec<ChatCompletionTool>,
    ) -> Result<ChatStream> {
        let mut args = CreateChatCompletionRequestArgs::default();
        args.model(&self.model).messages(messages).stream(true);
        if !tools.is_empty() {
            args.tools(tools).tool_choice("auto");
        }
        let request = args.build()?;

        let stream = self.client.chat().create_stream(request).await?;

        let adapted = stream
            .scan(ToolCallAccumulator::default(), |acc, result| {
                let item = match result {
                    Ok(response) => match response.choices.first() {
                        Some(choice) => {
                            if let Some(tool_calls) = &choice.delta.tool_calls {
                                acc.absorb(tool_calls);
                            }
                            if let Some(content) = &choice.delta.content {
                                if !content.is_empty() {
                                    Some(Ok(ChatEvent::Delta(content.clone())))
                                } else {
                                    None
                                }
                            } else if matches!(&choice.finish_reason, Some(FinishReason::ToolCalls))
                            {
                                std::mem::take(acc).finish().map(Ok)
                            } else if choice.finish_reason.is_some() {
                                Some(Ok(ChatEvent::Done))
                            } else {
                                None
                            }
                        }
                        None => None,
                    },
                    Err(e) => Some(Err(e)),
                };
                future::ready(Some(item))
            })
            .filter_map(future::ready);

        Ok(Box::pin(adapted))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_openai::types::FunctionCallStream;

    fn chunk(
        index: u32,
        id: Option<&str>,
        name: Option<&str>,
        arguments: Option<&str>,
    ) -> ChatCompletionMessageToolCallChunk {
        ChatCompletionMessageToolCallChunk {
            index,
            id: id.map(str::to_string),
            r#type: None,
            function: Some(FunctionCallStream {
                name: name.map(str::to_string),
                arguments: arguments.map(str::to_string),
            }),
        }
    }

    #[test]
    fn test_accumulator_joins_argument_fragments() {
        let mut acc = ToolCallAccumulator::default();
        acc.absorb(&[chunk(0, Some("call_1"), Some("arithmetic"), None)]);
        acc.absorb(&[chunk(0, None, None, Some("{\"a\": 1,"))]);
        acc.absorb(&[chunk(0, None, None, Some(" \"b\": 2}"))]);

        match acc.finish() {
            Some(ChatEvent::ToolCall {
                id,
                name,
                arguments,
            }) => {
                assert_eq!(id, "call_1");
                assert_eq!(name, "arithmetic");
                assert_eq!(arguments, "{\"a\": 1, \"b\": 2}");
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn test_accumulator_ignores_secondary_calls() {
        let mut acc = ToolCallAccumulator::default();
        acc.absorb(&[chunk(0, Some("call_1"), Some("first"), Some("{}"))]);
        acc.absorb(&[chunk(1, Some("call_2"), Some("second"), Some("{}"))]);

        match acc.finish() {
            Some(ChatEvent::ToolCall { name, .. }) => assert_eq!(name, "first"),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn test_accumulator_empty_yields_nothing() {
        let acc = ToolCallAccumulator::default();
        assert!(acc.finish().is_none());
    }
}
