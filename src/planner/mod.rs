//! Action planner
//!
//! Chooses exactly one [`AgentAction`] per user turn. Deterministic rules
//! run first (pending clarifications, missing data, ambiguous intent); the
//! generative planner is consulted only after them, and the keyword
//! fallback covers the case where it is not available.

pub mod generative;
pub mod intent;
pub mod tool_selection;

pub use tool_selection::{select_tools, SelectionStatus};

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::capabilities::Capabilities;
use crate::delta::parse_confirmation;
use crate::generation::GenerationGate;
use crate::models::{
    ActionType, AgentAction, ConversationState, ExpectedSchema, FinancialInput, Role,
};
use crate::tools::ToolRegistry;
use intent::{has_ambiguous_intent, has_valid_categories, retry_question, wants_analysis};

/// Clarifying questions allowed per unresolved cycle.
pub const MAX_CLARIFICATION_ATTEMPTS: u32 = 2;

pub const CLARIFICATION_LIMIT_MESSAGE: &str =
    "I couldn't get enough information to proceed with an analysis or scenario comparison.";

/// Which rule produced the decision.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PlannerStatus {
    Skipped,
    CategoriesSubmitted,
    ConfirmationParsed,
    ConfirmationRetry,
    ConfirmationFailed,
    ClarificationLimit,
    NeedCategories,
    AmbiguousIntent,
    Valid,
    InvalidOrError,
    FallbackNoLlm,
}

#[derive(Debug, Clone)]
pub struct PlannerDecision {
    pub action: AgentAction,
    pub status: PlannerStatus,
    pub generative_used: bool,
}

impl PlannerDecision {
    fn rule(action: AgentAction, status: PlannerStatus) -> Self {
        Self {
            action,
            status,
            generative_used: false,
        }
    }
}

pub struct ActionPlanner {
    gate: Arc<GenerationGate>,
    tools_description: String,
}

impl ActionPlanner {
    pub fn new(gate: Arc<GenerationGate>, registry: &ToolRegistry) -> Self {
        Self {
            gate,
            tools_description: registry.describe_selectable(),
        }
    }

    fn clarification_limit() -> PlannerDecision {
        PlannerDecision::rule(
            AgentAction::noop(CLARIFICATION_LIMIT_MESSAGE),
            PlannerStatus::ClarificationLimit,
        )
    }

    /// Whether executing `action` would end in another clarifying question.
    ///
    /// The executor answers an analysis request without a complete category
    /// table with a question, so that counts too.
    fn would_clarify(action: &AgentAction, input: Option<&FinancialInput>) -> bool {
        match action.action_type {
            ActionType::ClarifyingQuestion => true,
            ActionType::RunAnalysis => !has_valid_categories(input),
            _ => false,
        }
    }

    /// Select the next action for the conversation's latest user turn.
    ///
    /// `input` is the financial input submitted with this turn, if any.
    /// Once the clarification budget is spent, no rule, fallback or
    /// generative plan may ask again.
    pub async fn select_action(
        &self,
        state: &ConversationState,
        input: Option<&FinancialInput>,
        caps: &Capabilities,
    ) -> PlannerDecision {
        let decision = self.decide(state, input, caps).await;
        if state.clarification_attempt >= MAX_CLARIFICATION_ATTEMPTS
            && Self::would_clarify(&decision.action, input)
        {
            info!(
                status = ?decision.status,
                attempt = state.clarification_attempt,
                "Clarification budget spent; ending cycle"
            );
            return Self::clarification_limit();
        }
        decision
    }

    async fn decide(
        &self,
        state: &ConversationState,
        input: Option<&FinancialInput>,
        caps: &Capabilities,
    ) -> PlannerDecision {
        let Some(last) = state.last_turn() else {
            return PlannerDecision::rule(AgentAction::noop("No user message"), PlannerStatus::Skipped);
        };
        if last.role != Role::User {
            return PlannerDecision::rule(AgentAction::noop("Last turn not user"), PlannerStatus::Skipped);
        }

        let msg = last.content.trim();
        let attempt = state.clarification_attempt;
        let capped = attempt >= MAX_CLARIFICATION_ATTEMPTS;

        // ── Awaiting an answer to a clarifying question
        if let Some(pending) = &state.pending_clarification {
            let schema = pending.expected_schema;

            if schema == ExpectedSchema::ExpenseCategories && has_valid_categories(input) {
                return PlannerDecision::rule(
                    AgentAction::new(ActionType::RunAnalysis, "User submitted category table"),
                    PlannerStatus::CategoriesSubmitted,
                );
            }
            if schema.is_delta() {
                if let Some(parsed) = parse_confirmation(msg, schema) {
                    debug!(schema = schema.as_str(), "Confirmation parsed");
                    return PlannerDecision::rule(
                        AgentAction::compare("User confirmed delta", parsed),
                        PlannerStatus::ConfirmationParsed,
                    );
                }
            }

            if capped {
                return Self::clarification_limit();
            }
            if pending.retry_count < 1 {
                return PlannerDecision::rule(
                    AgentAction::clarifying("Retry parsing reply", retry_question(schema), schema),
                    PlannerStatus::ConfirmationRetry,
                );
            }
            return PlannerDecision::rule(
                AgentAction::noop("Could not parse delta after retry"),
                PlannerStatus::ConfirmationFailed,
            );
        }

        // ── No category table yet: ask for one, never guess
        let effective = input.or_else(|| state.effective_input());
        if !has_valid_categories(effective) && wants_analysis(msg) {
            if capped {
                return Self::clarification_limit();
            }
            return PlannerDecision::rule(
                AgentAction::clarifying(
                    "Category table required before analysis",
                    intent::CATEGORIES_QUESTION,
                    ExpectedSchema::ExpenseCategories,
                ),
                PlannerStatus::NeedCategories,
            );
        }

        // ── Financial change mentioned without numbers
        if has_ambiguous_intent(msg) && !crate::delta::has_structured_delta(msg) {
            if capped {
                return Self::clarification_limit();
            }
            return PlannerDecision::rule(
                AgentAction::clarifying(
                    "Intent implies a financial change but no structured delta",
                    intent::DELTA_QUESTION,
                    ExpectedSchema::ExpenseDelta,
                ),
                PlannerStatus::AmbiguousIntent,
            );
        }

        // ── Generative planner
        if self.gate.permits_planning(caps) {
            let prompt = generative::build_prompt(state, &self.tools_description);
            let parsed = match self.gate.call_raw(&prompt).await {
                Ok(raw) => generative::parse_action_response(&raw),
                Err(e) => Err(e),
            };

            return match parsed {
                Ok(action) => {
                    info!(action = %action.action_type, "Generative planner selected action");
                    PlannerDecision {
                        action,
                        status: PlannerStatus::Valid,
                        generative_used: true,
                    }
                }
                Err(e) => {
                    warn!(error = %e, "Generative planner output rejected");
                    PlannerDecision {
                        action: AgentAction::noop("LLM output invalid or missing"),
                        status: PlannerStatus::InvalidOrError,
                        generative_used: true,
                    }
                }
            };
        }

        // ── Deterministic fallback
        PlannerDecision::rule(intent::default_action(state, input), PlannerStatus::FallbackNoLlm)
    }
}
