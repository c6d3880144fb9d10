//! Scripted provider and recording sleeper for development & testing

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use super::{GenerativeProvider, Sleeper};
use crate::error::OrchestrationError;
use crate::Result;

#[derive(Debug, Clone)]
pub enum ScriptStep {
    Reply(String),
    Retriable(String),
    Fatal(String),
    /// Never resolves; exercises the call timeout.
    Hang,
}

/// Provider that plays back a fixed script, one step per call.
///
/// Once the script runs out every further call fails non-retriably.
pub struct ScriptedProvider {
    script: Mutex<VecDeque<ScriptStep>>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedProvider {
    pub fn new(steps: Vec<ScriptStep>) -> Self {
        Self {
            script: Mutex::new(steps.into()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn replying(texts: &[&str]) -> Self {
        Self::new(texts.iter().map(|t| ScriptStep::Reply(t.to_string())).collect())
    }

    /// Prompts received so far, in call order.
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().map(|p| p.clone()).unwrap_or_default()
    }

    pub fn calls(&self) -> usize {
        self.prompts.lock().map(|p| p.len()).unwrap_or_default()
    }
}

#[async_trait::async_trait]
impl GenerativeProvider for ScriptedProvider {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn generate(&self, prompt: &str) -> Result<String> {
        if let Ok(mut prompts) = self.prompts.lock() {
            prompts.push(prompt.to_string());
        }
        let step = self.script.lock().ok().and_then(|mut s| s.pop_front());

        match step {
            Some(ScriptStep::Reply(text)) => Ok(text),
            Some(ScriptStep::Retriable(msg)) => Err(OrchestrationError::retriable_provider(msg)),
            Some(ScriptStep::Fatal(msg)) => Err(OrchestrationError::fatal_provider(msg)),
            Some(ScriptStep::Hang) => {
                std::future::pending::<()>().await;
                Err(OrchestrationError::fatal_provider("unreachable"))
            }
            None => Err(OrchestrationError::fatal_provider("script exhausted")),
        }
    }
}

/// Records requested sleeps and returns immediately.
#[derive(Default)]
pub struct RecordingSleeper {
    slept: Mutex<Vec<Duration>>,
}

impl RecordingSleeper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn recorded(&self) -> Vec<Duration> {
        self.slept.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

#[async_trait::async_trait]
impl Sleeper for RecordingSleeper {
    async fn sleep(&self, duration: Duration) {
        if let Ok(mut slept) = self.slept.lock() {
            slept.push(duration);
        }
    }
}
