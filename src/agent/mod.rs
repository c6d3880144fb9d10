//! Conversation orchestrator - the outer chat loop
//!
//! USER TURN → PLAN → EXECUTE → UPDATE STATE → PERSIST → RESPOND
//!
//! Turns for one conversation are serialised behind a per-conversation
//! lock. Nothing in here returns an error to the caller: every failure is
//! folded into a well-formed response with `message_type = error`.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::audit::{new_run_id, RunStore};
use crate::capabilities::{Capabilities, CapabilityRequest};
use crate::config::AppConfig;
use crate::context::{ContextSnapshot, FinancialContext};
use crate::execution::presentation::UiBlock;
use crate::execution::{ActionExecutor, ExecutionOutcome};
use crate::gemini::GeminiClient;
use crate::generation::{GenerationGate, GenerativeProvider, RetryPolicy};
use crate::models::{
    ActionType, AnalysisItem, ConversationState, ExpectedSchema, FinancialInput, MessageType,
    PendingClarification, PipelineTrace, RunType, Turn,
};
use crate::pipeline::AnalysisPipeline;
use crate::planner::{ActionPlanner, PlannerDecision, PlannerStatus, MAX_CLARIFICATION_ATTEMPTS};
use crate::state::{ConversationStore, InMemoryConversationStore};
use crate::tools::{create_default_registry, ToolId};
use crate::Result;

/// Findings kept in the planner-facing summary of the last run.
const SUMMARY_FINDINGS: usize = 5;

const STATE_ERROR_MESSAGE: &str =
    "Something went wrong while loading this conversation. Please try again.";

/// One incoming chat turn.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChatTurn {
    pub message: String,
    #[serde(default)]
    pub conversation_id: Option<String>,
    #[serde(default)]
    pub input: Option<FinancialInput>,
    #[serde(default)]
    pub capabilities: CapabilityRequest,
}

impl ChatTurn {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Default::default()
        }
    }

    pub fn in_conversation(mut self, conversation_id: impl Into<String>) -> Self {
        self.conversation_id = Some(conversation_id.into());
        self
    }

    pub fn with_input(mut self, input: FinancialInput) -> Self {
        self.input = Some(input);
        self
    }

    pub fn with_capabilities(mut self, capabilities: CapabilityRequest) -> Self {
        self.capabilities = capabilities;
        self
    }
}

/// Diagnostics for one turn. Planner details live here, never in the message.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ConversationTrace {
    pub turn_index: usize,
    pub planner_decision: Option<ActionType>,
    pub action_planner_status: Option<PlannerStatus>,
    pub generative_planner_used: bool,
    pub action_taken: Option<ActionType>,
    pub clarification_attempt: u32,
    pub tools_selected: Vec<ToolId>,
    pub tools_executed: Vec<ToolId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context_before: Option<ContextSnapshot>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context_after: Option<ContextSnapshot>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compare_baseline_run_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compare_scenario_run_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pipeline: Option<PipelineTrace>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatResponse {
    pub conversation_id: String,
    pub assistant_message: String,
    pub run_id: Option<String>,
    pub analysis: Vec<AnalysisItem>,
    pub education: BTreeMap<String, String>,
    pub trace: ConversationTrace,
    pub message_type: MessageType,
    pub ui_blocks: Vec<UiBlock>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expected_schema: Option<ExpectedSchema>,
}

impl ChatResponse {
    fn failure(conversation_id: String, message: &str, trace: ConversationTrace) -> Self {
        Self {
            conversation_id,
            assistant_message: message.to_string(),
            run_id: None,
            analysis: Vec::new(),
            education: BTreeMap::new(),
            trace,
            message_type: MessageType::Error,
            ui_blocks: Vec::new(),
            expected_schema: None,
        }
    }
}

fn summarize_analysis(analysis: &[AnalysisItem]) -> String {
    if analysis.is_empty() {
        return "No findings.".to_string();
    }
    analysis
        .iter()
        .take(SUMMARY_FINDINGS)
        .map(|a| format!("{}: {}", a.dimension, a.severity))
        .collect::<Vec<_>>()
        .join("; ")
}

fn snapshot_of(input: Option<&FinancialInput>) -> Option<ContextSnapshot> {
    input
        .and_then(|i| FinancialContext::from_input(i).ok())
        .map(|ctx| ctx.to_snapshot())
}

/// Fold an executed action back into the conversation state.
///
/// The baseline is only ever replaced by a completed baseline run; scenario
/// runs move `last_run_id` but leave the baseline alone.
fn apply_outcome(
    state: &mut ConversationState,
    decision: &PlannerDecision,
    outcome: &ExecutionOutcome,
    input: Option<&FinancialInput>,
) {
    if outcome.completed {
        state.pending_clarification = None;
        state.clarification_attempt = 0;

        match outcome.run_type {
            Some(RunType::Baseline) => {
                if let Some(input) = input {
                    state.establish_baseline(input.clone());
                }
                state.last_run_type = Some(RunType::Baseline);
                state.last_run_id = outcome.run_id.clone();
                state.last_analysis_summary = Some(summarize_analysis(&outcome.analysis));
            }
            Some(RunType::Scenario) => {
                state.last_run_type = Some(RunType::Scenario);
                state.last_run_id = outcome.run_id.clone();
                state.last_analysis_summary = Some(summarize_analysis(&outcome.analysis));
            }
            None => {}
        }
        return;
    }

    if outcome.message_type == MessageType::ClarifyingQuestion
        && state.clarification_attempt < MAX_CLARIFICATION_ATTEMPTS
    {
        let retry_count = state
            .pending_clarification
            .as_ref()
            .map_or(0, |p| (p.retry_count + 1).min(1));
        state.clarification_attempt += 1;
        state.pending_clarification = Some(PendingClarification {
            expected_schema: outcome.expected_schema.unwrap_or(ExpectedSchema::ExpenseDelta),
            question: outcome.assistant_message.clone(),
            retry_count,
        });
        return;
    }

    if outcome.clarification_limit
        || matches!(
            decision.status,
            PlannerStatus::ClarificationLimit | PlannerStatus::ConfirmationFailed
        )
    {
        // The cycle ends unresolved; the attempt count stays until something completes.
        state.pending_clarification = None;
    }
}

pub struct ConversationOrchestrator {
    store: Arc<dyn ConversationStore>,
    planner: ActionPlanner,
    executor: ActionExecutor,
    credential_present: bool,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl ConversationOrchestrator {
    pub fn new(
        store: Arc<dyn ConversationStore>,
        planner: ActionPlanner,
        executor: ActionExecutor,
        credential_present: bool,
    ) -> Self {
        Self {
            store,
            planner,
            executor,
            credential_present,
            locks: Mutex::new(HashMap::new()),
        }
    }

    async fn lock_for(&self, conversation_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks
            .entry(conversation_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Forget a conversation's lock once no other turn holds or awaits it.
    async fn release_lock(&self, conversation_id: &str) {
        let mut locks = self.locks.lock().await;
        if locks
            .get(conversation_id)
            .map_or(false, |lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(conversation_id);
        }
    }

    pub async fn conversation(&self, conversation_id: &str) -> Result<Option<ConversationState>> {
        self.store.load(conversation_id).await
    }

    /// Process one chat turn end to end.
    pub async fn chat(&self, turn: ChatTurn) -> ChatResponse {
        let conversation_id = turn
            .conversation_id
            .as_deref()
            .map(|id| id.trim().to_string())
            .filter(|id| !id.is_empty())
            .unwrap_or_else(new_run_id);

        let lock = self.lock_for(&conversation_id).await;
        let response = {
            let _guard = lock.lock().await;
            self.handle_turn(conversation_id.clone(), turn).await
        };
        drop(lock);
        self.release_lock(&conversation_id).await;
        response
    }

    async fn handle_turn(&self, conversation_id: String, turn: ChatTurn) -> ChatResponse {
        let mut trace = ConversationTrace::default();

        let mut state = match self.store.load(&conversation_id).await {
            Ok(Some(state)) => state,
            Ok(None) => ConversationState::new(conversation_id.clone()),
            Err(e) => {
                warn!(conversation_id = %conversation_id, error = %e, "Failed to load conversation");
                trace.errors.push(e.to_string());
                return ChatResponse::failure(conversation_id, STATE_ERROR_MESSAGE, trace);
            }
        };

        trace.turn_index = state.turns.len();
        state.push_turn(Turn::user(turn.message.as_str()));
        trace.context_before = snapshot_of(state.effective_input());

        let caps = Capabilities::resolve(turn.capabilities, self.credential_present);
        let input = turn.input.as_ref();

        // === PLAN ===
        let decision = self.planner.select_action(&state, input, &caps).await;
        info!(
            conversation_id = %conversation_id,
            turn_index = trace.turn_index,
            action = %decision.action.action_type,
            status = ?decision.status,
            "Action selected"
        );
        trace.planner_decision = Some(decision.action.action_type);
        trace.action_planner_status = Some(decision.status);
        trace.generative_planner_used = decision.generative_used;

        // === EXECUTE ===
        let outcome = self.executor.execute(&decision.action, &state, input, &caps).await;
        trace.action_taken = Some(outcome.action);

        // === UPDATE STATE ===
        apply_outcome(&mut state, &decision, &outcome, input);
        state.push_turn(Turn::assistant(
            outcome.assistant_message.as_str(),
            outcome.message_type,
        ));
        trace.clarification_attempt = state.clarification_attempt;

        debug!(
            conversation_id = %conversation_id,
            clarification_attempt = state.clarification_attempt,
            pending = state.pending_clarification.is_some(),
            last_run_id = ?state.last_run_id,
            "Conversation state updated"
        );

        // === PERSIST ===
        if let Err(e) = self.store.save(&state).await {
            warn!(conversation_id = %conversation_id, error = %e, "Failed to save conversation");
            trace.errors.push(e.to_string());
        }

        trace.context_after = outcome
            .context_after
            .clone()
            .or_else(|| snapshot_of(state.effective_input()));
        if let Some(before) = &outcome.context_before {
            trace.context_before = Some(before.clone());
        }
        trace.compare_baseline_run_id = outcome.compare_baseline_run_id.clone();
        trace.compare_scenario_run_id = outcome.compare_scenario_run_id.clone();
        if let Some(pipeline) = &outcome.pipeline_trace {
            trace.tools_selected = pipeline.tools_selected.clone();
            trace.tools_executed = pipeline.tools_executed.clone();
        }
        trace.pipeline = outcome.pipeline_trace;
        trace.errors.extend(outcome.errors);

        ChatResponse {
            conversation_id,
            assistant_message: outcome.assistant_message,
            run_id: outcome.run_id,
            analysis: outcome.analysis,
            education: outcome.education,
            trace,
            message_type: outcome.message_type,
            ui_blocks: outcome.ui_blocks,
            expected_schema: outcome.expected_schema,
        }
    }
}

/// Everything a binary needs, wired once.
pub struct CoachServices {
    pub credential_present: bool,
    /// Cancelled on server shutdown; stops in-flight generation.
    pub shutdown: CancellationToken,
    pub pipeline: Arc<AnalysisPipeline>,
    pub runs: Arc<RunStore>,
    pub orchestrator: Arc<ConversationOrchestrator>,
}

impl CoachServices {
    /// Wire services from configuration; a Gemini client is created only
    /// when a credential is configured.
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let provider: Option<Arc<dyn GenerativeProvider>> = match &config.gemini_api_key {
            Some(key) => Some(Arc::new(GeminiClient::new(key.as_str(), &config.gemini_model)?)),
            None => None,
        };
        Ok(Self::with_provider(provider, config))
    }

    pub fn with_provider(provider: Option<Arc<dyn GenerativeProvider>>, config: &AppConfig) -> Self {
        let credential_present = provider.is_some();
        let gate = Arc::new(
            GenerationGate::new(provider)
                .with_policy(RetryPolicy {
                    max_retries: config.max_retries,
                    backoff_base: config.backoff_base,
                })
                .with_timeout(config.llm_timeout),
        );
        Self::with_gate(gate, credential_present)
    }

    pub fn with_gate(gate: Arc<GenerationGate>, credential_present: bool) -> Self {
        let registry = Arc::new(create_default_registry());
        let runs = Arc::new(RunStore::new());
        let pipeline = Arc::new(AnalysisPipeline::new(registry.clone(), gate.clone(), runs.clone()));

        let shutdown = gate.shutdown_token();
        let planner = ActionPlanner::new(gate.clone(), &registry);
        let executor = ActionExecutor::new(pipeline.clone(), runs.clone(), gate);
        let orchestrator = Arc::new(ConversationOrchestrator::new(
            Arc::new(InMemoryConversationStore::new()),
            planner,
            executor,
            credential_present,
        ));

        Self {
            credential_present,
            shutdown,
            pipeline,
            runs,
            orchestrator,
        }
    }

    /// Fully deterministic services with no generative provider.
    pub fn deterministic() -> Self {
        Self::with_gate(Arc::new(GenerationGate::disabled()), false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generation::ScriptedProvider;
    use crate::models::ExpenseCategory;
    use crate::planner::CLARIFICATION_LIMIT_MESSAGE;

    fn categories(income: f64, rows: &[(&str, f64)]) -> FinancialInput {
        FinancialInput {
            monthly_income: income,
            expense_categories: rows
                .iter()
                .map(|(c, a)| ExpenseCategory {
                    category: c.to_string(),
                    amount: *a,
                })
                .collect(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_new_conversation_gets_id() {
        let services = CoachServices::deterministic();
        let response = services.orchestrator.chat(ChatTurn::new("hello there friend")).await;

        assert!(!response.conversation_id.is_empty());
        assert_eq!(response.trace.turn_index, 0);
        let state = services
            .orchestrator
            .conversation(&response.conversation_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(state.turns.len(), 2);
        assert!(services.orchestrator.locks.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_clarification_then_categories_runs_analysis() {
        let services = CoachServices::deterministic();
        let orchestrator = &services.orchestrator;

        let first = orchestrator.chat(ChatTurn::new("analyze my finances").in_conversation("c1")).await;
        assert_eq!(first.message_type, MessageType::ClarifyingQuestion);
        assert_eq!(first.expected_schema, Some(ExpectedSchema::ExpenseCategories));
        assert_eq!(first.trace.clarification_attempt, 1);

        let input = categories(8000.0, &[("Housing", 2000.0), ("Food", 1800.0), ("Transport", 1700.0)]);
        let second = orchestrator
            .chat(ChatTurn::new("here you go").in_conversation("c1").with_input(input.clone()))
            .await;

        assert_eq!(second.trace.action_taken, Some(ActionType::RunAnalysis));
        assert!(second.run_id.is_some());
        // 8000 income, 5500 expenses: nothing flagged
        assert!(second.analysis.is_empty());
        assert_eq!(second.trace.clarification_attempt, 0);

        let state = orchestrator.conversation("c1").await.unwrap().unwrap();
        assert_eq!(state.baseline_input(), Some(&input));
        assert_eq!(state.last_run_type, Some(RunType::Baseline));
        assert!(state.pending_clarification.is_none());
        assert_eq!(state.last_analysis_summary.as_deref(), Some("No findings."));
    }

    #[tokio::test]
    async fn test_clarification_cap() {
        let services = CoachServices::deterministic();
        let orchestrator = &services.orchestrator;

        let mut statuses = Vec::new();
        for _ in 0..3 {
            let response = orchestrator.chat(ChatTurn::new("analyze").in_conversation("c2")).await;
            statuses.push((response.trace.action_taken, response.run_id.clone()));
            if response.trace.action_planner_status == Some(PlannerStatus::ClarificationLimit) {
                assert_eq!(response.assistant_message, CLARIFICATION_LIMIT_MESSAGE);
            }
        }

        assert_eq!(statuses[0].0, Some(ActionType::ClarifyingQuestion));
        assert_eq!(statuses[1].0, Some(ActionType::ClarifyingQuestion));
        assert_eq!(statuses[2], (Some(ActionType::Noop), None));

        let state = orchestrator.conversation("c2").await.unwrap().unwrap();
        assert_eq!(state.clarification_attempt, 2);
        assert!(state.pending_clarification.is_none());
    }

    #[tokio::test]
    async fn test_concurrent_turns_are_serialised() {
        let services = CoachServices::deterministic();
        let orchestrator = services.orchestrator.clone();

        let handles: Vec<_> = (0..4)
            .map(|i| {
                let orchestrator = orchestrator.clone();
                tokio::spawn(async move {
                    orchestrator
                        .chat(ChatTurn::new(format!("message number {}", i)).in_conversation("shared"))
                        .await
                })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap();
        }

        let state = orchestrator.conversation("shared").await.unwrap().unwrap();
        assert_eq!(state.turns.len(), 8);
        for pair in state.turns.chunks(2) {
            assert_eq!(pair[0].role, crate::models::Role::User);
            assert_eq!(pair[1].role, crate::models::Role::Assistant);
        }
        assert!(orchestrator.locks.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_shutdown_reaches_the_gate() {
        let gate = Arc::new(GenerationGate::disabled());
        let services = CoachServices::with_gate(gate.clone(), false);
        let request = gate.request_token();
        assert!(!request.is_cancelled());

        services.shutdown.cancel();
        assert!(request.is_cancelled());
    }

    #[tokio::test]
    async fn test_rerun_without_input_stops_at_the_cap() {
        let services = CoachServices::deterministic();
        let orchestrator = &services.orchestrator;
        let input = categories(8000.0, &[("Housing", 2000.0), ("Food", 1800.0), ("Transport", 1700.0)]);
        orchestrator
            .chat(ChatTurn::new("analyze my finances").in_conversation("c3").with_input(input))
            .await;

        let mut questions = 0;
        for _ in 0..4 {
            let response = orchestrator.chat(ChatTurn::new("update please").in_conversation("c3")).await;
            if response.message_type == MessageType::ClarifyingQuestion {
                questions += 1;
            }
            assert!(response.trace.clarification_attempt <= MAX_CLARIFICATION_ATTEMPTS);
        }
        assert_eq!(questions, 2);

        let state = orchestrator.conversation("c3").await.unwrap().unwrap();
        assert_eq!(state.clarification_attempt, 2);
        assert!(state.pending_clarification.is_none());
    }

    #[tokio::test]
    async fn test_credential_gates_capabilities() {
        let provider: Arc<dyn GenerativeProvider> =
            Arc::new(ScriptedProvider::replying(&[r#"{"type": "noop", "reasoning": "off topic"}"#]));
        let services = CoachServices::with_provider(Some(provider), &AppConfig::default());
        assert!(services.credential_present);

        let response = services
            .orchestrator
            .chat(ChatTurn::new("tell me a joke").with_capabilities(CapabilityRequest {
                agent: true,
                ..Default::default()
            }))
            .await;
        assert!(response.trace.generative_planner_used);
        assert_eq!(response.assistant_message, "off topic");

        let deterministic = CoachServices::deterministic();
        let response = deterministic
            .orchestrator
            .chat(ChatTurn::new("tell me a joke").with_capabilities(CapabilityRequest {
                agent: true,
                ..Default::default()
            }))
            .await;
        assert!(!response.trace.generative_planner_used);
    }
}
