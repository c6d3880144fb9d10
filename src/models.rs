//! Core data models for the financial coach

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;

use crate::context::{ContextSnapshot, FinancialContext};
use crate::generation::ValidationReport;
use crate::tools::ToolId;

//
// ================= Enums =================
//

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Invalid,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    Assistant,
    ClarifyingQuestion,
    ScenarioResult,
    Error,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RunType {
    Baseline,
    Scenario,
}

/// What the next user reply must parse as.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ExpectedSchema {
    ExpenseCategories,
    ExpenseDelta,
    CategoryAdjustment,
    AssetChange,
}

impl ExpectedSchema {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExpectedSchema::ExpenseCategories => "expense_categories",
            ExpectedSchema::ExpenseDelta => "expense_delta",
            ExpectedSchema::CategoryAdjustment => "category_adjustment",
            ExpectedSchema::AssetChange => "asset_change",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim() {
            "expense_categories" => Some(ExpectedSchema::ExpenseCategories),
            "expense_delta" => Some(ExpectedSchema::ExpenseDelta),
            "category_adjustment" => Some(ExpectedSchema::CategoryAdjustment),
            "asset_change" => Some(ExpectedSchema::AssetChange),
            _ => None,
        }
    }

    /// Schemas answered with free-text deltas rather than the category editor.
    pub fn is_delta(&self) -> bool {
        !matches!(self, ExpectedSchema::ExpenseCategories)
    }
}

//
// ================= Pipeline Input =================
//

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExpenseCategory {
    pub category: String,
    pub amount: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AssetAllocationEntry {
    pub asset_class: String,
    pub allocation_pct: f64,
}

/// Raw financial input as supplied by the caller (editor form or API body).
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct FinancialInput {
    #[serde(default)]
    pub monthly_income: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub monthly_expenses: Option<f64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub expense_categories: Vec<ExpenseCategory>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub asset_allocation: Vec<AssetAllocationEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_savings: Option<f64>,
}

impl FinancialInput {
    pub fn category_total(&self) -> f64 {
        self.expense_categories.iter().map(|c| c.amount).sum()
    }

    pub fn allocation_total(&self) -> f64 {
        self.asset_allocation.iter().map(|a| a.allocation_pct).sum()
    }

    /// Income is positive and the category table is non-empty with a positive sum.
    ///
    /// The category table is the source of truth for conversational analysis:
    /// a bare `monthly_expenses` figure never satisfies this check.
    pub fn has_valid_categories(&self) -> bool {
        self.monthly_income > 0.0
            && !self.expense_categories.is_empty()
            && self.category_total() > 0.0
    }
}

//
// ================= Findings =================
//

/// One tool's risk assessment for a dimension.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Finding {
    pub tool_name: ToolId,
    pub dimension: String,
    pub severity: Severity,
    pub reason: String,
    #[serde(default)]
    pub metrics: BTreeMap<String, Value>,
}

impl Finding {
    pub fn is_invalid(&self) -> bool {
        self.severity == Severity::Invalid
    }
}

/// Baseline vs scenario severity for one dimension.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SeverityTransition {
    pub baseline_severity: Option<Severity>,
    pub scenario_severity: Option<Severity>,
    pub changed: bool,
}

impl SeverityTransition {
    pub fn new(baseline: Option<Severity>, scenario: Option<Severity>) -> Self {
        Self {
            baseline_severity: baseline,
            scenario_severity: scenario,
            changed: baseline != scenario,
        }
    }
}

/// A finding as presented in response envelopes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AnalysisItem {
    pub dimension: String,
    pub severity: Severity,
    pub reason: String,
    #[serde(default)]
    pub metrics: BTreeMap<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scenario_impact: Option<SeverityTransition>,
}

impl From<&Finding> for AnalysisItem {
    fn from(finding: &Finding) -> Self {
        Self {
            dimension: finding.dimension.clone(),
            severity: finding.severity,
            reason: finding.reason.clone(),
            metrics: finding.metrics.clone(),
            scenario_impact: None,
        }
    }
}

//
// ================= Scenario Deltas =================
//

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExpenseDelta {
    pub category: String,
    pub monthly_delta: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AssetDelta {
    pub asset_class: String,
    pub allocation_delta_pct: f64,
}

/// A single confirmed scenario change.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum ScenarioDelta {
    Expense(ExpenseDelta),
    Asset(AssetDelta),
}

/// What a confirmation reply parsed into.
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedConfirmation {
    Single(ScenarioDelta),
    Multi(Vec<ExpenseDelta>),
}

//
// ================= Conversation =================
//

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_type: Option<MessageType>,
    pub timestamp: DateTime<Utc>,
}

impl Turn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            message_type: None,
            timestamp: Utc::now(),
        }
    }

    pub fn assistant(content: impl Into<String>, message_type: MessageType) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            message_type: Some(message_type),
            timestamp: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PendingClarification {
    pub expected_schema: ExpectedSchema,
    pub question: String,
    /// Re-asks after a failed parse; never exceeds 1.
    pub retry_count: u8,
}

/// Conversation state owned by the orchestrator; mutated only between turns.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationState {
    pub id: String,
    pub turns: Vec<Turn>,
    pub last_run_id: Option<String>,
    pub last_analysis_summary: Option<String>,
    pub last_run_type: Option<RunType>,
    baseline_input: Option<FinancialInput>,
    pub last_input_snapshot: Option<FinancialInput>,
    pub pending_clarification: Option<PendingClarification>,
    pub clarification_attempt: u32,
}

impl ConversationState {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            turns: Vec::new(),
            last_run_id: None,
            last_analysis_summary: None,
            last_run_type: None,
            baseline_input: None,
            last_input_snapshot: None,
            pending_clarification: None,
            clarification_attempt: 0,
        }
    }

    /// The snapshot established by the last successful baseline run.
    pub fn baseline_input(&self) -> Option<&FinancialInput> {
        self.baseline_input.as_ref()
    }

    /// Only a successful baseline analysis may call this.
    pub(crate) fn establish_baseline(&mut self, input: FinancialInput) {
        self.last_input_snapshot = Some(input.clone());
        self.baseline_input = Some(input);
    }

    /// Baseline if present, else the last analysed input.
    pub fn effective_input(&self) -> Option<&FinancialInput> {
        self.baseline_input
            .as_ref()
            .or(self.last_input_snapshot.as_ref())
    }

    pub fn last_turn(&self) -> Option<&Turn> {
        self.turns.last()
    }

    pub fn last_user_message(&self) -> Option<&str> {
        self.turns
            .iter()
            .rev()
            .find(|t| t.role == Role::User)
            .map(|t| t.content.as_str())
    }

    pub fn push_turn(&mut self, turn: Turn) {
        self.turns.push(turn);
    }
}

//
// ================= Agent Action =================
//

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    RunAnalysis,
    ExplainPrevious,
    CompareScenarios,
    ClarifyingQuestion,
    Noop,
}

impl ActionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionType::RunAnalysis => "run_analysis",
            ActionType::ExplainPrevious => "explain_previous",
            ActionType::CompareScenarios => "compare_scenarios",
            ActionType::ClarifyingQuestion => "clarifying_question",
            ActionType::Noop => "noop",
        }
    }
}

/// The Planner ↔ Executor contract, also the generative planning output shape.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct AgentAction {
    #[serde(rename = "type")]
    pub action_type: ActionType,
    #[serde(default)]
    pub reasoning: String,
    #[serde(default)]
    pub parameters: Map<String, Value>,
}

impl AgentAction {
    pub fn new(action_type: ActionType, reasoning: impl Into<String>) -> Self {
        Self {
            action_type,
            reasoning: reasoning.into(),
            parameters: Map::new(),
        }
    }

    pub fn noop(reasoning: impl Into<String>) -> Self {
        Self::new(ActionType::Noop, reasoning)
    }

    pub fn clarifying(
        reasoning: impl Into<String>,
        question: impl Into<String>,
        expected_schema: ExpectedSchema,
    ) -> Self {
        let mut action = Self::new(ActionType::ClarifyingQuestion, reasoning);
        action
            .parameters
            .insert("question".into(), Value::String(question.into()));
        action.parameters.insert(
            "expected_schema".into(),
            Value::String(expected_schema.as_str().into()),
        );
        action
    }

    pub fn compare(reasoning: impl Into<String>, confirmation: ParsedConfirmation) -> Self {
        let mut action = Self::new(ActionType::CompareScenarios, reasoning);
        let (key, value) = match confirmation {
            ParsedConfirmation::Multi(deltas) => ("deltas", serde_json::to_value(deltas)),
            ParsedConfirmation::Single(delta) => ("delta", serde_json::to_value(delta)),
        };
        if let Ok(value) = value {
            action.parameters.insert(key.into(), value);
        }
        action
    }

    pub fn question(&self) -> Option<&str> {
        self.parameters
            .get("question")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|q| !q.is_empty())
    }

    pub fn expected_schema(&self) -> Option<ExpectedSchema> {
        self.parameters
            .get("expected_schema")
            .and_then(Value::as_str)
            .and_then(ExpectedSchema::parse)
    }
}

//
// ================= Run Memory =================
//

/// Write-once record of one completed pipeline execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunMemory {
    pub run_id: String,
    pub context_snapshot: ContextSnapshot,
    pub tools_selected: Vec<ToolId>,
    pub tool_results: Vec<Finding>,
    pub timestamp: DateTime<Utc>,
    pub context_hash: String,
}

//
// ================= Pipeline Envelope =================
//

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineTrace {
    pub phases: Vec<String>,
    pub tools_selected: Vec<ToolId>,
    pub tools_executed: Vec<ToolId>,
    pub metrics_computed: Vec<String>,
    pub context_snapshot: Option<ContextSnapshot>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub planner_status: Option<String>,
    #[serde(default)]
    pub generation_attempts: u32,
}

impl PipelineTrace {
    pub fn phase(&mut self, name: &str) {
        self.phases.push(name.to_string());
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PipelineResult {
    pub run_id: Option<String>,
    pub analysis: Vec<AnalysisItem>,
    pub education: BTreeMap<String, String>,
    pub generation: String,
    pub validation: ValidationReport,
    pub errors: Vec<String>,
    pub trace: PipelineTrace,
    #[serde(skip)]
    pub findings: Vec<Finding>,
    #[serde(skip)]
    pub context: Option<FinancialContext>,
}

impl PipelineResult {
    pub fn rejected(errors: Vec<String>, trace: PipelineTrace) -> Self {
        Self {
            run_id: None,
            analysis: Vec::new(),
            education: BTreeMap::new(),
            generation: String::new(),
            validation: ValidationReport {
                valid: false,
                issues: errors.clone(),
            },
            errors,
            trace,
            findings: Vec::new(),
            context: None,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Invalid => "invalid",
        };
        write!(f, "{}", s)
    }
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
