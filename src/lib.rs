//! backforge: a conversational backend generator.
//!
//! A session moves a project through Research → Planning → Implementation →
//! Validation → Complete. User messages that arrive mid-build are classified
//! and may bump the session back to Planning or Research.

pub mod agents;
pub mod classifier;
pub mod config;
pub mod dag;
pub mod errors;
pub mod llm;
pub mod orchestrator;
pub mod phase;
pub mod state;
pub mod telemetry;
pub mod ui;
