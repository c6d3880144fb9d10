//! Capability-gated generative layer
//!
//! The generative provider is strictly optional. Every call goes through
//! [`GenerationGate`], which applies the capability flags, a per-call
//! timeout, cancellation, retry with backoff and output validation.

mod compose;
mod mock;
mod retry;
mod validation;

pub use compose::{
    compose_response, explanation_prompt, paraphrase_findings, summary_prompt,
    FALLBACK_STUB_MESSAGE, NO_FINDINGS_MESSAGE,
};
pub use mock::{RecordingSleeper, ScriptStep, ScriptedProvider};
pub use retry::{retry_with_backoff, RetryPolicy, Sleeper, TokioSleeper};
pub use validation::{
    safe_text, validate_output, ValidationReport, MAX_OUTPUT_CHARS, SAFE_FALLBACK_MESSAGE,
};

use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::capabilities::Capabilities;
use crate::error::OrchestrationError;
use crate::Result;

/// A text-generation backend.
#[async_trait::async_trait]
pub trait GenerativeProvider: Send + Sync {
    fn name(&self) -> &'static str;
    async fn generate(&self, prompt: &str) -> Result<String>;
}

/// Result of one gated generation.
#[derive(Debug, Clone, Default, Serialize)]
pub struct GateOutcome {
    /// Validated generative text or the fallback stub; `None` means the
    /// caller composes deterministically.
    pub text: Option<String>,
    pub invoked: bool,
    pub attempts: u32,
    pub validation: ValidationReport,
    pub errors: Vec<String>,
}

impl GateOutcome {
    fn skipped() -> Self {
        Self::default()
    }
}

pub struct GenerationGate {
    provider: Option<Arc<dyn GenerativeProvider>>,
    policy: RetryPolicy,
    sleeper: Arc<dyn Sleeper>,
    call_timeout: Duration,
    /// Process-wide shutdown; every request token is a child of it.
    shutdown: CancellationToken,
}

impl GenerationGate {
    pub fn new(provider: Option<Arc<dyn GenerativeProvider>>) -> Self {
        Self {
            provider,
            policy: RetryPolicy::default(),
            sleeper: Arc::new(TokioSleeper),
            call_timeout: Duration::from_secs(30),
            shutdown: CancellationToken::new(),
        }
    }

    /// No provider: every request takes the deterministic path.
    pub fn disabled() -> Self {
        Self::new(None)
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    pub fn with_shutdown(mut self, token: CancellationToken) -> Self {
        self.shutdown = token;
        self
    }

    pub fn has_provider(&self) -> bool {
        self.provider.is_some()
    }

    /// Generative text may be produced for this request.
    pub fn permits(&self, caps: &Capabilities) -> bool {
        caps.llm() && self.has_provider()
    }

    /// Generative planning may be consulted for this request.
    pub fn permits_planning(&self, caps: &Capabilities) -> bool {
        caps.agent() && self.has_provider()
    }

    /// Cancelling this token stops generation for the whole process.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// A token scoped to one request. Cancelling it leaves the gate usable.
    pub fn request_token(&self) -> CancellationToken {
        self.shutdown.child_token()
    }

    pub async fn call_raw(&self, prompt: &str) -> Result<String> {
        self.call_raw_with(prompt, &self.request_token()).await
    }

    /// One provider call bounded by the timeout and `cancel`.
    pub async fn call_raw_with(&self, prompt: &str, cancel: &CancellationToken) -> Result<String> {
        let provider = self
            .provider
            .as_ref()
            .ok_or_else(|| OrchestrationError::fatal_provider("No generative provider configured"))?;

        debug!(provider = provider.name(), prompt_len = prompt.len(), "Calling generative provider");

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(OrchestrationError::Cancelled),
            result = tokio::time::timeout(self.call_timeout, provider.generate(prompt)) => match result {
                Ok(inner) => inner,
                Err(_) => Err(OrchestrationError::Timeout(self.call_timeout.as_secs())),
            },
        }
    }

    async fn validated_call(&self, prompt: &str, cancel: &CancellationToken) -> Result<String> {
        let raw = self.call_raw_with(prompt, cancel).await?;
        let report = validate_output(&raw);
        if report.valid {
            Ok(raw)
        } else {
            Err(OrchestrationError::OutputValidation(report.issues))
        }
    }

    /// Generate text for `prompt` under the request's capabilities.
    ///
    /// - retry on: validation failures and retriable errors are retried with
    ///   backoff; on exhaustion the text is withheld.
    /// - retry off, fallback on: one attempt; a bad outcome yields the stub.
    /// - both off: one attempt; a bad outcome is reported as an error.
    pub async fn generate(&self, caps: &Capabilities, prompt: &str) -> GateOutcome {
        self.generate_with(caps, prompt, &self.request_token()).await
    }

    /// [`generate`](Self::generate) under a caller-held request token.
    pub async fn generate_with(
        &self,
        caps: &Capabilities,
        prompt: &str,
        cancel: &CancellationToken,
    ) -> GateOutcome {
        if !self.permits(caps) {
            return GateOutcome::skipped();
        }

        let mut outcome = GateOutcome {
            invoked: true,
            ..Default::default()
        };

        if caps.retry() {
            let mut attempts = 0;
            let result = retry_with_backoff(&self.policy, self.sleeper.as_ref(), cancel, |n| {
                attempts = n + 1;
                self.validated_call(prompt, cancel)
            })
            .await;
            outcome.attempts = attempts;

            match result {
                Ok(text) => outcome.text = Some(text),
                Err(OrchestrationError::OutputValidation(issues)) => {
                    warn!(attempts, "Generated output failed validation on every attempt");
                    outcome.validation = ValidationReport {
                        valid: false,
                        issues,
                    };
                }
                Err(e) => {
                    warn!(attempts, error = %e, "Generation failed after retries");
                    outcome.errors.push(e.to_string());
                }
            }
            return outcome;
        }

        outcome.attempts = 1;
        match self.call_raw_with(prompt, cancel).await {
            Ok(raw) => {
                let report = validate_output(&raw);
                if report.valid {
                    outcome.text = Some(raw);
                } else if caps.fallback() {
                    info!(issues = ?report.issues, "Generated output rejected; using fallback stub");
                    outcome.text = Some(FALLBACK_STUB_MESSAGE.to_string());
                    outcome.validation = report;
                } else {
                    outcome
                        .errors
                        .push(OrchestrationError::OutputValidation(report.issues.clone()).to_string());
                    outcome.validation = report;
                }
            }
            Err(e) if caps.fallback() => {
                info!(error = %e, "Generation failed; using fallback stub");
                outcome.text = Some(FALLBACK_STUB_MESSAGE.to_string());
            }
            Err(e) => {
                warn!(error = %e, "Generation failed");
                outcome.errors.push(e.to_string());
            }
        }

        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::CapabilityRequest;

    fn caps(retry: bool, fallback: bool) -> Capabilities {
        Capabilities::resolve(
            CapabilityRequest {
                llm: true,
                retry,
                fallback,
                agent: false,
            },
            true,
        )
    }

    fn gate(steps: Vec<ScriptStep>) -> (GenerationGate, Arc<ScriptedProvider>, Arc<RecordingSleeper>) {
        let provider = Arc::new(ScriptedProvider::new(steps));
        let sleeper = Arc::new(RecordingSleeper::new());
        let gate = GenerationGate::new(Some(provider.clone()))
            .with_sleeper(sleeper.clone())
            .with_policy(RetryPolicy {
                max_retries: 2,
                backoff_base: Duration::from_millis(10),
            });
        (gate, provider, sleeper)
    }

    #[tokio::test]
    async fn test_skipped_without_llm_capability() {
        let (gate, provider, _) = gate(vec![ScriptStep::Reply("hi".into())]);
        let outcome = gate.generate(&Capabilities::deterministic(), "p").await;
        assert!(!outcome.invoked);
        assert!(outcome.text.is_none());
        assert_eq!(provider.calls(), 0);
    }

    #[tokio::test]
    async fn test_disabled_gate_never_permits() {
        let gate = GenerationGate::disabled();
        assert!(!gate.permits(&caps(false, false)));
        let outcome = gate.generate(&caps(true, true), "p").await;
        assert!(!outcome.invoked);
    }

    #[tokio::test]
    async fn test_retry_reprompts_on_invalid_output() {
        let (gate, provider, sleeper) = gate(vec![
            ScriptStep::Reply("You should buy bonds.".into()),
            ScriptStep::Reply("Your savings rate is low. What stands out to you?".into()),
        ]);
        let outcome = gate.generate(&caps(true, false), "p").await;

        assert_eq!(outcome.text.as_deref(), Some("Your savings rate is low. What stands out to you?"));
        assert_eq!(outcome.attempts, 2);
        assert_eq!(provider.calls(), 2);
        assert_eq!(sleeper.recorded(), vec![Duration::from_millis(10)]);
    }

    #[tokio::test]
    async fn test_retry_exhaustion_withholds_text() {
        let (gate, provider, sleeper) = gate(vec![
            ScriptStep::Reply("I recommend stocks".into()),
            ScriptStep::Reply("I recommend stocks".into()),
            ScriptStep::Reply("I recommend stocks".into()),
        ]);
        let outcome = gate.generate(&caps(true, true), "p").await;

        assert!(outcome.text.is_none());
        assert!(!outcome.validation.valid);
        assert_eq!(provider.calls(), 3);
        assert_eq!(
            sleeper.recorded(),
            vec![Duration::from_millis(10), Duration::from_millis(20)]
        );
    }

    #[tokio::test]
    async fn test_non_retriable_error_is_not_retried() {
        let (gate, provider, _) = gate(vec![ScriptStep::Fatal("401 unauthorized".into())]);
        let outcome = gate.generate(&caps(true, false), "p").await;
        assert_eq!(provider.calls(), 1);
        assert_eq!(outcome.errors.len(), 1);
        assert!(outcome.errors[0].contains("401"));
    }

    #[tokio::test]
    async fn test_fallback_returns_stub_on_invalid_output() {
        let (gate, _, _) = gate(vec![ScriptStep::Reply("Sell everything now".into())]);
        let outcome = gate.generate(&caps(false, true), "p").await;
        assert_eq!(outcome.text.as_deref(), Some(FALLBACK_STUB_MESSAGE));
        assert!(!outcome.validation.valid);
        assert!(outcome.errors.is_empty());
    }

    #[tokio::test]
    async fn test_fallback_returns_stub_on_provider_error() {
        let (gate, _, _) = gate(vec![ScriptStep::Retriable("503".into())]);
        let outcome = gate.generate(&caps(false, true), "p").await;
        assert_eq!(outcome.text.as_deref(), Some(FALLBACK_STUB_MESSAGE));
    }

    #[tokio::test]
    async fn test_no_retry_no_fallback_surfaces_error() {
        let (gate, _, _) = gate(vec![ScriptStep::Reply("You must act".into())]);
        let outcome = gate.generate(&caps(false, false), "p").await;
        assert!(outcome.text.is_none());
        assert_eq!(outcome.errors.len(), 1);
        assert!(outcome.errors[0].starts_with("Output failed validation"));
    }

    #[tokio::test]
    async fn test_call_timeout() {
        let (gate, _, _) = gate(vec![ScriptStep::Hang]);
        let gate = gate.with_timeout(Duration::from_millis(20));
        let result = gate.call_raw("p").await;
        assert!(matches!(result, Err(OrchestrationError::Timeout(_))));
    }

    #[tokio::test]
    async fn test_shutdown_interrupts_call() {
        let (gate, _, _) = gate(vec![ScriptStep::Hang]);
        gate.shutdown_token().cancel();
        let result = gate.call_raw("p").await;
        assert!(matches!(result, Err(OrchestrationError::Cancelled)));
    }

    #[tokio::test]
    async fn test_request_cancellation_is_scoped() {
        let (gate, provider, _) = gate(vec![ScriptStep::Reply(
            "Your savings rate is low. What stands out to you?".into(),
        )]);

        let request = gate.request_token();
        request.cancel();
        let outcome = gate.generate_with(&caps(true, false), "p", &request).await;
        assert!(outcome.text.is_none());
        assert_eq!(outcome.errors, vec!["Generation cancelled".to_string()]);
        assert_eq!(provider.calls(), 0);

        // the next request is unaffected
        let outcome = gate.generate(&caps(true, false), "p").await;
        assert_eq!(
            outcome.text.as_deref(),
            Some("Your savings rate is low. What stands out to you?")
        );
        assert_eq!(provider.calls(), 1);
    }
}
