//! Gemini content provider for MedSim
//!
//! Implements [`medsim_session::ContentProvider`] on top of the Gemini
//! `generateContent` REST endpoint. Every call asks for JSON output and
//! passes a response schema, so replies are parsed straight into the
//! session's types.

pub mod client;
pub mod prompts;
pub mod schema;

pub use client::GeminiProvider;
