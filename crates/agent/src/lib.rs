//! Answering pipeline - turns a visitor message into a grounded reply
//!
//! This crate is the "brain" of parley. For every chat turn it:
//! - Enforces per-IP request windows and per-bot daily caps (`quota`)
//! - Serves repeated questions from a short-lived reply cache (`cache`)
//! - Grounds the answer in curated Q&A and knowledge chunks (`retrieval`)
//! - Answers fixed questions deterministically (`forced_reply`)
//! - Builds the generation instructions (`prompt`)
//! - Extracts action markers from generated text (`intent`)
//! - Executes or holds back side-effects for approval (`dispatch`)
//! - Persists the session and infers the visitor profile (`profile`)
//!
//! # Architecture
//!
//! `AnswerEngine` (see `engine`) runs the turn as one async unit. Every external
//! collaborator sits behind a trait (`llm`, `connectors`, the `parley-db`
//! repositories), so the pipeline can run against HTTP services in production and
//! scripted fakes in tests.
//!
//! # Safety Principle
//!
//! The language model only writes text. Whether a side-effect runs, and against
//! which system, is decided by deterministic routing and the bot's approval policy.

pub mod cache;
pub mod connectors;
pub mod dispatch;
pub mod engine;
pub mod errors;
pub mod experiment;
pub mod forced_reply;
pub mod intent;
pub mod llm;
pub mod pii;
pub mod profile;
pub mod prompt;
pub mod quota;
pub mod retrieval;
pub mod text;

#[cfg(any(test, feature = "test-support"))]
pub mod fixtures;

pub use engine::{AnswerEngine, ChatReply, ChatRequest, EngineParts, EngineSettings};
pub use errors::TurnError;
