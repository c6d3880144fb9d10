//! Financial Coach Orchestrator
//!
//! The decision-and-execution core of a conversational financial coach:
//! - Plans exactly one action per user turn from conversation state
//! - Executes it deterministically (analysis, scenario comparison, explanation)
//! - Computes findings only from deterministic analysis tools
//! - Gates every generative call behind capabilities, retry and output validation
//! - Keeps the baseline immutable across what-if scenarios
//! - Records every run for replay
//!
//! TURN LOOP:
//! MESSAGE → PLAN → EXECUTE (CONTEXT → TOOLS → GENERATE) → UPDATE STATE → RESPOND

pub mod agent;
pub mod api;
pub mod audit;
pub mod capabilities;
pub mod config;
pub mod context;
pub mod delta;
pub mod education;
pub mod error;
pub mod execution;
pub mod gemini;
pub mod generation;
pub mod models;
pub mod pipeline;
pub mod planner;
pub mod state;
pub mod tools;

pub use error::Result;

// Re-export common types
pub use agent::{ChatResponse, ChatTurn, CoachServices, ConversationOrchestrator};
pub use capabilities::{Capabilities, CapabilityRequest};
pub use models::*;
