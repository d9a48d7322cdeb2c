//! Core library for the cascade voice orchestrator.
//!
//! Contains everything that is independent of the web service surface:
//! the character (persona) data model, the character registry, per-character
//! conversation histories, built-in tool handlers, and the LLM client
//! abstraction used for streaming chat completions.

pub mod character;
pub mod chat;
pub mod llm_client;
pub mod registry;
pub mod tools;
