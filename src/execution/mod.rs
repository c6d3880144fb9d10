//! Action executor
//!
//! Runs exactly the action the planner chose. It never re-decides intent;
//! the only checks here are defensive re-checks of data completeness.
//! Every user-facing text leaves through the output validator.

pub mod presentation;

use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::audit::RunStore;
use crate::capabilities::Capabilities;
use crate::context::{ContextSnapshot, FinancialContext};
use crate::generation::{explanation_prompt, paraphrase_findings, safe_text, GenerationGate};
use crate::models::{
    ActionType, AgentAction, AnalysisItem, ConversationState, ExpectedSchema, ExpenseDelta,
    FinancialInput, MessageType, PipelineTrace, RunType, ScenarioDelta, Severity,
    SeverityTransition,
};
use crate::pipeline::AnalysisPipeline;
use crate::planner::{CLARIFICATION_LIMIT_MESSAGE, MAX_CLARIFICATION_ATTEMPTS};
use presentation::{analysis_blocks, clarification_blocks, input_editor, UiBlock};

pub const DEFAULT_NOOP_MESSAGE: &str = "I didn't have enough information to proceed.";

pub const NO_BASELINE_MESSAGE: &str =
    "I need your baseline financial data first. Please share income and expenses.";

pub const NO_ANALYSIS_MESSAGE: &str =
    "I don't have analysis results yet. Please run an analysis first.";

const DEFAULT_DELTA_QUESTION: &str =
    "Please specify the category and amount (e.g. Transport +1500).";

const INPUT_QUESTION: &str =
    "Please enter your monthly income and expense breakdown by category.";
const EXPENSES_QUESTION: &str =
    "Please enter your monthly expense breakdown by category (category and amount per row).";

const SCENARIO_PREFIX: &str = "This was a scenario comparison (what-if), not your baseline. ";
const BASELINE_PREFIX: &str = "This was your baseline analysis. ";

/// Planner bookkeeping reasons that never reach the user.
const INTERNAL_NOOP_REASONINGS: &[&str] = &[
    "No matching default",
    "No user message",
    "Last turn not user",
    "No turns",
    "LLM output invalid or missing",
    "Unrelated or unclear",
    "Could not parse delta after retry",
];

/// Everything the orchestrator needs from one executed action.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionOutcome {
    pub action: ActionType,
    pub assistant_message: String,
    pub message_type: MessageType,
    pub run_id: Option<String>,
    /// Set when this action produced a new recorded run.
    pub run_type: Option<RunType>,
    /// The action finished its job; resets the clarification cycle.
    pub completed: bool,
    /// The clarification budget was spent; the cycle ends unresolved.
    pub clarification_limit: bool,
    pub analysis: Vec<AnalysisItem>,
    pub education: BTreeMap<String, String>,
    pub ui_blocks: Vec<UiBlock>,
    pub expected_schema: Option<ExpectedSchema>,
    pub pipeline_trace: Option<PipelineTrace>,
    pub context_before: Option<ContextSnapshot>,
    pub context_after: Option<ContextSnapshot>,
    pub compare_baseline_run_id: Option<String>,
    pub compare_scenario_run_id: Option<String>,
    pub errors: Vec<String>,
}

impl ExecutionOutcome {
    fn reply(action: ActionType, message: &str, message_type: MessageType) -> Self {
        Self {
            action,
            assistant_message: safe_text(message),
            message_type,
            run_id: None,
            run_type: None,
            completed: false,
            clarification_limit: false,
            analysis: Vec::new(),
            education: BTreeMap::new(),
            ui_blocks: Vec::new(),
            expected_schema: None,
            pipeline_trace: None,
            context_before: None,
            context_after: None,
            compare_baseline_run_id: None,
            compare_scenario_run_id: None,
            errors: Vec::new(),
        }
    }

    fn with_blocks(mut self, ui_blocks: Vec<UiBlock>) -> Self {
        self.ui_blocks = ui_blocks;
        self
    }
}

/// Confirmed scenario change, resolved from action parameters.
enum ScenarioChange {
    Expenses(Vec<ExpenseDelta>),
    Expense(ExpenseDelta),
    Asset { asset_class: String, delta_pct: f64 },
}

impl ScenarioChange {
    /// `deltas` wins over `delta` when both are present.
    fn from_action(action: &AgentAction) -> Option<Self> {
        if let Some(list) = action.parameters.get("deltas").and_then(|v| v.as_array()) {
            let deltas: Vec<ExpenseDelta> = list
                .iter()
                .filter_map(|d| serde_json::from_value(d.clone()).ok())
                .collect();
            if !deltas.is_empty() {
                return Some(ScenarioChange::Expenses(deltas));
            }
        }

        let delta = action.parameters.get("delta")?;
        match serde_json::from_value::<ScenarioDelta>(delta.clone()).ok()? {
            ScenarioDelta::Expense(d) => Some(ScenarioChange::Expense(d)),
            ScenarioDelta::Asset(d) => Some(ScenarioChange::Asset {
                asset_class: d.asset_class,
                delta_pct: d.allocation_delta_pct,
            }),
        }
    }

    fn is_multi(&self) -> bool {
        matches!(self, ScenarioChange::Expenses(d) if d.len() > 1)
    }

    fn label(&self) -> String {
        match self {
            ScenarioChange::Expenses(deltas) => deltas
                .iter()
                .map(|d| format!("{} {:+.0}/mo", d.category, d.monthly_delta))
                .collect::<Vec<_>>()
                .join(", "),
            ScenarioChange::Expense(d) => format!("{} {:+.0}/mo", d.category, d.monthly_delta),
            ScenarioChange::Asset {
                asset_class,
                delta_pct,
            } => format!("{} {:+.0}%", asset_class, delta_pct),
        }
    }

    fn apply(&self, baseline: &FinancialContext) -> FinancialContext {
        match self {
            ScenarioChange::Expenses(deltas) => baseline.apply_expense_deltas(deltas),
            ScenarioChange::Expense(d) => baseline.apply_expense_delta(&d.category, d.monthly_delta),
            ScenarioChange::Asset {
                asset_class,
                delta_pct,
            } => baseline.apply_asset_delta(asset_class, *delta_pct),
        }
    }
}

fn severity_label(severity: Option<Severity>) -> String {
    severity.map_or_else(|| "none".to_string(), |s| s.to_string())
}

/// Attach a baseline/scenario transition to every scenario item and list
/// the dimensions whose severity moved, including ones that disappeared.
fn diff_against_baseline(
    baseline: &[AnalysisItem],
    scenario: &mut [AnalysisItem],
) -> Vec<String> {
    let base: HashMap<&str, Severity> = baseline
        .iter()
        .map(|a| (a.dimension.as_str(), a.severity))
        .collect();

    let mut changes = Vec::new();
    for item in scenario.iter_mut() {
        let transition =
            SeverityTransition::new(base.get(item.dimension.as_str()).copied(), Some(item.severity));
        if transition.changed {
            changes.push(format!(
                "{}: {} → {}",
                item.dimension,
                severity_label(transition.baseline_severity),
                severity_label(transition.scenario_severity)
            ));
        }
        item.scenario_impact = Some(transition);
    }

    for item in baseline {
        if !scenario.iter().any(|s| s.dimension == item.dimension) {
            changes.push(format!("{}: {} → none", item.dimension, item.severity));
        }
    }

    changes
}

fn scenario_summary(label: &str, changes: &[String], multi: bool) -> String {
    match (changes.is_empty(), multi) {
        (false, true) => format!(
            "Scenario analyzed with changes: {}. {}. See analysis below for details.",
            label,
            changes.join("; ")
        ),
        (false, false) => format!(
            "With {}: {}. See analysis below for details.",
            label,
            changes.join("; ")
        ),
        (true, true) => format!(
            "Scenario analyzed with changes: {}. No risk level changed compared to your baseline.",
            label
        ),
        (true, false) => format!(
            "With {}: no risk level changed compared to your baseline.",
            label
        ),
    }
}

/// Clarifying text for a run_analysis attempted on incomplete input.
fn missing_data_message(input: Option<&FinancialInput>) -> &'static str {
    match input {
        Some(input) if input.monthly_income > 0.0 => {
            let has_expenses = input.monthly_expenses.map_or(false, |e| e > 0.0)
                || !input.expense_categories.is_empty();
            if has_expenses {
                INPUT_QUESTION
            } else {
                EXPENSES_QUESTION
            }
        }
        _ => INPUT_QUESTION,
    }
}

pub struct ActionExecutor {
    pipeline: Arc<AnalysisPipeline>,
    runs: Arc<RunStore>,
    gate: Arc<GenerationGate>,
}

impl ActionExecutor {
    pub fn new(pipeline: Arc<AnalysisPipeline>, runs: Arc<RunStore>, gate: Arc<GenerationGate>) -> Self {
        Self {
            pipeline,
            runs,
            gate,
        }
    }

    /// Execute one planner action against the conversation.
    ///
    /// `input` is the financial input submitted with this turn, if any.
    pub async fn execute(
        &self,
        action: &AgentAction,
        state: &ConversationState,
        input: Option<&FinancialInput>,
        caps: &Capabilities,
    ) -> ExecutionOutcome {
        debug!(action = %action.action_type, conversation_id = %state.id, "Executing action");

        match action.action_type {
            ActionType::ClarifyingQuestion => self.clarify(action, state, input),
            ActionType::RunAnalysis => self.run_analysis(state, input, caps).await,
            ActionType::CompareScenarios => self.compare_scenarios(action, state, input).await,
            ActionType::ExplainPrevious => self.explain_previous(state, caps).await,
            ActionType::Noop => Self::noop(action),
        }
    }

    fn clarify(
        &self,
        action: &AgentAction,
        state: &ConversationState,
        input: Option<&FinancialInput>,
    ) -> ExecutionOutcome {
        let question = action.question().unwrap_or(DEFAULT_DELTA_QUESTION);
        let schema = action.expected_schema().unwrap_or(ExpectedSchema::ExpenseDelta);
        let known = input.or_else(|| state.effective_input());

        let mut outcome =
            ExecutionOutcome::reply(ActionType::ClarifyingQuestion, question, MessageType::ClarifyingQuestion)
                .with_blocks(clarification_blocks(schema, known));
        outcome.expected_schema = Some(schema);
        outcome
    }

    async fn run_analysis(
        &self,
        state: &ConversationState,
        input: Option<&FinancialInput>,
        caps: &Capabilities,
    ) -> ExecutionOutcome {
        let input = match input {
            Some(input) if input.has_valid_categories() => input,
            _ if state.clarification_attempt >= MAX_CLARIFICATION_ATTEMPTS => {
                info!(
                    attempt = state.clarification_attempt,
                    "run_analysis without categories after the clarification budget"
                );
                let mut outcome =
                    ExecutionOutcome::reply(ActionType::Noop, CLARIFICATION_LIMIT_MESSAGE, MessageType::Assistant);
                outcome.clarification_limit = true;
                return outcome;
            }
            other => {
                info!("run_analysis requested without a complete category table");
                let mut outcome = ExecutionOutcome::reply(
                    ActionType::RunAnalysis,
                    missing_data_message(other),
                    MessageType::ClarifyingQuestion,
                )
                .with_blocks(input_editor(other));
                outcome.expected_schema = Some(ExpectedSchema::ExpenseCategories);
                return outcome;
            }
        };

        let result = self.pipeline.run(input, caps).await;

        let Some(run_id) = result.run_id.clone() else {
            warn!(errors = ?result.errors, "Analysis produced no run");
            let message = format!("I couldn't analyze that input: {}.", result.errors.join("; "));
            let mut outcome =
                ExecutionOutcome::reply(ActionType::RunAnalysis, &message, MessageType::Error)
                    .with_blocks(input_editor(Some(input)));
            outcome.analysis = result.analysis;
            outcome.errors = result.errors;
            outcome.pipeline_trace = Some(result.trace);
            return outcome;
        };

        let mut outcome =
            ExecutionOutcome::reply(ActionType::RunAnalysis, &result.generation, MessageType::Assistant);
        if let Some(ctx) = &result.context {
            outcome.ui_blocks = analysis_blocks(ctx, &result.analysis);
            outcome.context_after = Some(ctx.to_snapshot());
        }
        outcome.run_id = Some(run_id);
        outcome.run_type = Some(RunType::Baseline);
        outcome.completed = true;
        outcome.analysis = result.analysis;
        outcome.education = result.education;
        outcome.errors = result.errors;
        outcome.pipeline_trace = Some(result.trace);
        outcome
    }

    /// Apply confirmed deltas to a clone of the baseline and diff the two runs.
    ///
    /// Both runs use deterministic capabilities so the comparison always
    /// covers the same tool set.
    async fn compare_scenarios(
        &self,
        action: &AgentAction,
        state: &ConversationState,
        input: Option<&FinancialInput>,
    ) -> ExecutionOutcome {
        let baseline_input = state
            .baseline_input()
            .or(state.last_input_snapshot.as_ref())
            .or(input);

        let baseline_input = match baseline_input {
            Some(b) if b.has_valid_categories() => b,
            other => {
                return ExecutionOutcome::reply(
                    ActionType::CompareScenarios,
                    NO_BASELINE_MESSAGE,
                    MessageType::Error,
                )
                .with_blocks(input_editor(other));
            }
        };

        let Some(change) = ScenarioChange::from_action(action) else {
            return ExecutionOutcome::reply(
                ActionType::CompareScenarios,
                "I couldn't determine the change to model. Please use format: Category +amount (e.g. Transport +1500).",
                MessageType::Error,
            );
        };

        let baseline_ctx = match FinancialContext::from_input(baseline_input) {
            Ok(ctx) => ctx,
            Err(e) => {
                warn!(error = %e, "Baseline context could not be rebuilt");
                let mut outcome = ExecutionOutcome::reply(
                    ActionType::CompareScenarios,
                    NO_BASELINE_MESSAGE,
                    MessageType::Error,
                );
                outcome.errors.push(e.to_string());
                return outcome;
            }
        };
        let scenario_ctx = change.apply(&baseline_ctx);
        let label = change.label();

        let caps = Capabilities::deterministic();
        let baseline = self.pipeline.run_context(baseline_ctx.clone(), &caps).await;
        let scenario = self.pipeline.run_context(scenario_ctx.clone(), &caps).await;

        let mut analysis = scenario.analysis;
        let changes = diff_against_baseline(&baseline.analysis, &mut analysis);
        let summary = scenario_summary(&label, &changes, change.is_multi());

        info!(
            scenario = %label,
            changed_dimensions = changes.len(),
            baseline_total = baseline_ctx.total_expenses(),
            scenario_total = scenario_ctx.total_expenses(),
            "Scenario compared"
        );

        let mut errors = baseline.errors;
        errors.extend(scenario.errors);

        let mut outcome =
            ExecutionOutcome::reply(ActionType::CompareScenarios, &summary, MessageType::ScenarioResult)
                .with_blocks(analysis_blocks(&scenario_ctx, &analysis));
        outcome.completed = scenario.run_id.is_some();
        outcome.run_type = scenario.run_id.as_ref().map(|_| RunType::Scenario);
        outcome.run_id = scenario.run_id.clone();
        outcome.analysis = analysis;
        outcome.education = scenario.education;
        outcome.pipeline_trace = Some(scenario.trace);
        outcome.context_before = Some(baseline_ctx.to_snapshot());
        outcome.context_after = Some(scenario_ctx.to_snapshot());
        outcome.compare_baseline_run_id = baseline.run_id;
        outcome.compare_scenario_run_id = scenario.run_id;
        outcome.errors = errors;
        outcome
    }

    /// Explain the last recorded run. No tool runs here.
    async fn explain_previous(&self, state: &ConversationState, caps: &Capabilities) -> ExecutionOutcome {
        let memory = match &state.last_run_id {
            Some(run_id) => self.runs.get(run_id).await,
            None => None,
        };
        let Some(memory) = memory else {
            return ExecutionOutcome::reply(
                ActionType::ExplainPrevious,
                NO_ANALYSIS_MESSAGE,
                MessageType::Assistant,
            );
        };

        let (prefix, run_label) = match state.last_run_type {
            Some(RunType::Scenario) => (SCENARIO_PREFIX, "scenario comparison"),
            Some(RunType::Baseline) => (BASELINE_PREFIX, "baseline analysis"),
            None => ("", "analysis"),
        };

        let question = state.last_user_message().unwrap_or_default();
        let outcome = self
            .gate
            .generate(caps, &explanation_prompt(&memory.tool_results, question, run_label))
            .await;
        let explanation = outcome
            .text
            .unwrap_or_else(|| paraphrase_findings(&memory.tool_results));

        let mut result = ExecutionOutcome::reply(
            ActionType::ExplainPrevious,
            &format!("{}{}", prefix, explanation),
            MessageType::Assistant,
        );
        result.run_id = Some(memory.run_id.clone());
        result.completed = true;
        result.analysis = memory.tool_results.iter().map(AnalysisItem::from).collect();
        result.errors = outcome.errors;
        result
    }

    fn noop(action: &AgentAction) -> ExecutionOutcome {
        let reasoning = action.reasoning.trim();
        let message = if reasoning.is_empty() || INTERNAL_NOOP_REASONINGS.contains(&reasoning) {
            DEFAULT_NOOP_MESSAGE
        } else {
            reasoning
        };
        ExecutionOutcome::reply(ActionType::Noop, message, MessageType::Assistant)
    }
}
