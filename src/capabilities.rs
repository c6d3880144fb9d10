//! Per-request capability flags
//!
//! Flags are requested by the caller and resolved once against the
//! configured credential. The resolved set is immutable for the request.

use serde::{Deserialize, Serialize};

/// Flags as they arrive on the wire. Every flag defaults to off.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CapabilityRequest {
    pub llm: bool,
    pub retry: bool,
    pub fallback: bool,
    pub agent: bool,
}

/// Resolved capability set.
///
/// `llm` and `agent` are forced off when no generative credential is configured.
#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
pub struct Capabilities {
    llm: bool,
    retry: bool,
    fallback: bool,
    agent: bool,
}

impl Capabilities {
    pub fn resolve(request: CapabilityRequest, credential_present: bool) -> Self {
        Self {
            llm: request.llm && credential_present,
            retry: request.retry,
            fallback: request.fallback,
            agent: request.agent && credential_present,
        }
    }

    /// Everything off: the fully deterministic path.
    pub fn deterministic() -> Self {
        Self::default()
    }

    pub fn llm(&self) -> bool {
        self.llm
    }

    pub fn retry(&self) -> bool {
        self.retry
    }

    pub fn fallback(&self) -> bool {
        self.fallback
    }

    pub fn agent(&self) -> bool {
        self.agent
    }
}
