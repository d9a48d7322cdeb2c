//! Per-character conversation histories.
//!
//! One session keeps an isolated history per character so that switching
//! personas mid-conversation does not leak context between them. Histories
//! are capped; the system prompt survives truncation.

use crate::character::Character;
use anyhow::Result;
use async_openai::types::{
    ChatCompletionRequestAssistantMessageArgs, ChatCompletionRequestMessage,
    ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
};
use std::collections::HashMap;

/// Cap on non-system messages kept per character.
pub const MAX_HISTORY_MESSAGES: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

/// One character's conversation. The system prompt is rendered once at
/// creation and reused for every request.
#[derive(Debug)]
pub struct History {
    system_prompt: String,
    messages: Vec<ChatMessage>,
}

impl History {
    pub fn new(system_prompt: String) -> Self {
        Self {
            system_prompt,
            messages: Vec::new(),
        }
    }

    pub fn system_prompt(&self) -> &str {
        &self.system_prompt
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn push(&mut self, role: Role, content: impl Into<String>) {
        self.messages.push(ChatMessage {
            role,
            content: content.into(),
        });
        self.enforce_cap();
    }

    /// Appends a streaming delta. Consecutive deltas for the same role
    /// extend the last message, joined with a space where neither side
    /// already carries whitespace. Returns true when a new message was
    /// started.
    pub fn add_delta(&mut self, role: Role, delta: &str) -> bool {
        if let Some(last) = self.messages.last_mut() {
            if last.role == role {
                if !last.content.is_empty()
                    && !last.content.ends_with(char::is_whitespace)
                    && !delta.starts_with(char::is_whitespace)
                {
                    last.content.push(' ');
                }
                last.content.push_str(delta);
                return false;
            }
        }
        self.push(role, delta);
        true
    }

    /// Replaces the content of the trailing message when it matches `role`,
    /// otherwise starts a new message. Used when the STT backend delivers
    /// an authoritative final transcript.
    pub fn replace_last(&mut self, role: Role, content: impl Into<String>) {
        match self.messages.last_mut() {
            Some(last) if last.role == role => last.content = content.into(),
            _ => self.push(role, content),
        }
    }

    fn enforce_cap(&mut self) {
        if self.messages.len() > MAX_HISTORY_MESSAGES {
            let excess = self.messages.len() - MAX_HISTORY_MESSAGES;
            self.messages.drain(..excess);
        }
    }

    /// Builds the request messages for a chat completion: the system prompt
    /// followed by the conversation so far.
    pub fn to_request_messages(&self) -> Result<Vec<ChatCompletionRequestMessage>> {
        let mut messages: Vec<ChatCompletionRequestMessage> = vec![
            ChatCompletionRequestSystemMessageArgs::default()
                .content(self.system_prompt.clone())
                .build()?
                .into(),
        ];
        for msg in &self.messages {
            match msg.role {
                Role::User => messages.push(
                    ChatCompletionRequestUserMessageArgs::default()
                        .content(msg.content.clone())
                        .build()?
                        .into(),
                ),
                Role::Assistant => messages.push(
                    ChatCompletionRequestAssistantMessageArgs::default()
                        .content(msg.content.clone())
                        .build()?
                        .into(),
                ),
            }
        }
        Ok(messages)
    }
}

/// All histories for one session, keyed by character name.
#[derive(Debug, Default)]
pub struct CharacterHistories {
    histories: HashMap<String, History>,
}

impl CharacterHistories {
    pub fn new() -> Self {
        Self::default()
    }

    /// The history for a character, created on first use with the
    /// character's rendered system prompt.
    pub fn for_character(&mut self, character: &Character) -> &mut History {
        self.histories
            .entry(character.name.clone())
            .or_insert_with(|| History::new(character.system_prompt()))
    }
}
