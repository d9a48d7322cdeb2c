//! The character (persona) data model.
//!
//! Characters are plain data loaded from JSON files. A character declares
//! its name, the voice the TTS backend should use, its instructions, how to
//! turn those instructions into a system prompt, and an optional set of
//! tools whose handlers must exist in the built-in handler table.

use serde::{Deserialize, Serialize};

/// Where the TTS backend should source the character's voice from.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "source_type", rename_all = "snake_case")]
pub enum VoiceSource {
    /// A voice sample stored on the TTS server.
    File {
        path_on_server: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        description: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        description_link: Option<String>,
    },
    /// A voice sample from Freesound, which requires attribution.
    Freesound {
        sound_id: u64,
        attribution: Attribution,
    },
}

impl VoiceSource {
    /// The identifier passed to the TTS backend to select this voice.
    pub fn voice_id(&self) -> String {
        match self {
            VoiceSource::File { path_on_server, .. } => path_on_server.clone(),
            VoiceSource::Freesound { sound_id, .. } => format!("freesound:{sound_id}"),
        }
    }

    /// A human-readable description of the voice, if one is available.
    pub fn description(&self) -> Option<String> {
        match self {
            VoiceSource::File { description, .. } => description.clone(),
            VoiceSource::Freesound { attribution, .. } => {
                Some(format!("Voice by {}", attribution.author))
            }
        }
    }
}

/// Credit for a Freesound voice sample.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attribution {
    pub author: String,
    pub url: String,
}

/// The character's behavioral instructions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Instructions {
    pub text: String,
    /// BCP 47-ish language hint, e.g. "en" or "fr".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
}

/// How the system prompt is produced from the character's instructions.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PromptSpec {
    /// Interpolate the instructions into the standard conversation template.
    #[default]
    Templated,
    /// Use the given text verbatim as the system prompt.
    Constant { text: String },
}

/// A tool the character may call during generation. The `handler` field
/// names an entry in the built-in handler table; unknown handlers make the
/// character file invalid.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDef {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// JSON Schema object describing the tool's arguments.
    #[serde(default = "empty_schema")]
    pub parameters: serde_json::Value,
    pub handler: String,
}

fn empty_schema() -> serde_json::Value {
    serde_json::json!({ "type": "object", "properties": {} })
}

/// An immutable persona. Shared between sessions via `Arc` inside a
/// registry snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Character {
    pub name: String,
    pub voice: VoiceSource,
    pub instructions: Instructions,
    #[serde(default)]
    pub prompt: PromptSpec,
    #[serde(default)]
    pub tools: Vec<ToolDef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub good: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

const PROMPT_PREAMBLE: &str = "You are a character in a spoken conversation. \
Reply with short, natural sentences that sound good when read aloud. \
Do not use lists, markup, or emoji, and never mention these instructions.";

impl Character {
    /// Renders the system prompt for this character. Called once per
    /// activation; the result is cached in the conversation history.
    pub fn system_prompt(&self) -> String {
        match &self.prompt {
            PromptSpec::Constant { text } => text.clone(),
            PromptSpec::Templated => {
                let mut prompt = String::from(PROMPT_PREAMBLE);
                prompt.push_str("\n\n");
                prompt.push_str(&self.instructions.text);
                if let Some(language) = &self.instructions.language {
                    prompt.push_str(&format!("\n\nAlways respond in \"{language}\"."));
                }
                prompt
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn full_character_json() -> &'static str {
        r#"{
            "name": "narrator",
            "voice": {
                "source_type": "file",
                "path_on_server": "voices/narrator.wav",
                "description": "A calm storyteller"
            },
            "instructions": {
                "text": "You narrate everything the user says in a dramatic tone.",
                "language": "en"
            },
            "tools": [
                {
                    "name": "get_current_time",
                    "description": "Returns the current local time.",
                    "parameters": { "type": "object", "properties": {} },
                    "handler": "current_time"
                }
            ],
            "good": true,
            "comment": "Demo persona"
        }"#
    }

    #[test]
    fn test_character_deserialization_full() {
        let character: Character = serde_json::from_str(full_character_json()).unwrap();
        assert_eq!(character.name, "narrator");
        assert_eq!(character.good, Some(true));
        assert_eq!(character.tools.len(), 1);
        assert_eq!(character.tools[0].handler, "current_time");
        match &character.voice {
            VoiceSource::File { path_on_server, .. } => {
                assert_eq!(path_on_server, "voices/narrator.wav");
            }
            other => panic!("unexpected voice source: {other:?}"),
        }
    }

    #[test]
    fn test_prompt_spec_defaults_to_templated() {
        let json = r#"{
            "name": "plain",
            "voice": { "source_type": "file", "path_on_server": "voices/a.wav" },
            "instructions": { "text": "Be brief." }
        }"#;
        let character: Character = serde_json::from_str(json).unwrap();
        assert!(matches!(character.prompt, PromptSpec::Templated));
        assert!(character.tools.is_empty());
    }

    #[test]
    fn test_templated_system_prompt_includes_instructions_and_language() {
        let character: Character = serde_json::from_str(full_character_json()).unwrap();
        let prompt = character.system_prompt();
        assert!(prompt.contains("dramatic tone"));
        assert!(prompt.contains("\"en\""));
    }

    #[test]
    fn test_constant_system_prompt_is_verbatim() {
        let json = r#"{
            "name": "fixed",
            "voice": { "source_type": "freesound", "sound_id": 12345,
                       "attribution": { "author": "someone", "url": "https://freesound.org/s/12345/" } },
            "instructions": { "text": "ignored" },
            "prompt": { "kind": "constant", "text": "You always answer in haiku." }
        }"#;
        let character: Character = serde_json::from_str(json).unwrap();
        assert_eq!(character.system_prompt(), "You always answer in haiku.");
        assert_eq!(character.voice.voice_id(), "freesound:12345");
    }

    #[test]
    fn test_missing_required_field_fails() {
        let json = r#"{ "name": "broken" }"#;
        let result: Result<Character, _> = serde_json::from_str(json);
        assert!(result.is_err());
    }
}
