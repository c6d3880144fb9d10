//! Keyword intent routing
//!
//! Cheap, deterministic reads of the latest user message. Used both before
//! the generative planner is consulted and as the fallback when it is not.

use crate::delta::{has_structured_delta, parse_expense_deltas};
use crate::models::{
    AgentAction, ActionType, ConversationState, ExpectedSchema, ExpenseDelta, FinancialInput,
    ParsedConfirmation, ScenarioDelta,
};

pub const CATEGORIES_QUESTION: &str = "Please enter your monthly expense breakdown by category.";

pub const DELTA_QUESTION: &str = "Should I model this as a change to your monthly expenses? \
For example: \"+$1500/month in Transport\" or \"-$200 in Dining\". Please specify the category and amount.";

/// Financial change mentioned without a concrete amount.
const AMBIGUOUS_INTENT: &[&str] = &[
    "buy a car",
    "reduce spending",
    "add expense",
    "cut costs",
    "what if i spend",
    "upgrade lifestyle",
    "buy car",
    "new car",
    "reduce expense",
    "add transport",
    "spend more",
    "spend less",
    "cut expense",
    "increase spending",
    "what if",
];

const ANALYSIS_INTENT: &[&str] = &[
    "analyze", "analysis", "finances", "finance", "help", "?", "income", "expense", "spend",
    "make", "start", "submit", "here", "done",
];

fn has_any(text: &str, keywords: &[&str]) -> bool {
    let lowered = text.to_lowercase();
    keywords.iter().any(|k| lowered.contains(k))
}

pub fn has_ambiguous_intent(msg: &str) -> bool {
    has_any(msg, AMBIGUOUS_INTENT)
}

pub fn wants_analysis(msg: &str) -> bool {
    let trimmed = msg.trim();
    trimmed.chars().count() < 3 || has_any(trimmed, ANALYSIS_INTENT)
}

pub fn has_valid_categories(input: Option<&FinancialInput>) -> bool {
    input.map_or(false, FinancialInput::has_valid_categories)
}

/// Re-ask text after a confirmation reply failed to parse.
pub fn retry_question(schema: ExpectedSchema) -> &'static str {
    match schema {
        ExpectedSchema::ExpenseCategories => {
            "I still need your monthly income and expense breakdown by category. Please fill in the category table."
        }
        ExpectedSchema::ExpenseDelta | ExpectedSchema::CategoryAdjustment => {
            "I couldn't parse that. Please use format: Category +amount or Category -amount (e.g. Transport +1500)."
        }
        ExpectedSchema::AssetChange => {
            "I couldn't parse that. Please use format: AssetClass +/-percentage (e.g. Stocks -10)."
        }
    }
}

/// Scenario deltas written inline in a message, e.g. "what if Transport +1500".
fn inline_scenario(msg: &str) -> Option<ParsedConfirmation> {
    if !has_structured_delta(msg) {
        return None;
    }
    let mut deltas: Vec<ExpenseDelta> = parse_expense_deltas(msg);
    match deltas.len() {
        0 => None,
        1 => deltas
            .pop()
            .map(|d| ParsedConfirmation::Single(ScenarioDelta::Expense(d))),
        _ => Some(ParsedConfirmation::Multi(deltas)),
    }
}

/// Deterministic action selection when no generative planner is available.
pub fn default_action(state: &ConversationState, input: Option<&FinancialInput>) -> AgentAction {
    let Some(msg) = state.last_user_message() else {
        return AgentAction::noop("No user message");
    };
    let effective = input.or_else(|| state.effective_input());
    let wants_scenario = has_any(msg, &["what if", "compare", "scenario"]);

    if state.last_run_id.is_none() {
        if has_any(msg, &["income", "expense", "savings", "analyze", "help", "?", "make", "spend"]) {
            if !has_valid_categories(effective) {
                return AgentAction::clarifying(
                    "Category table required before analysis",
                    CATEGORIES_QUESTION,
                    ExpectedSchema::ExpenseCategories,
                );
            }
            return AgentAction::new(ActionType::RunAnalysis, "Default: run analysis");
        }
        if wants_scenario {
            if let Some(parsed) = inline_scenario(msg) {
                return AgentAction::compare("Default: scenario with delta", parsed);
            }
        }
        return AgentAction::noop("Unrelated or unclear");
    }

    if has_any(msg, &["why", "explain", "mean", "what does"]) {
        return AgentAction::new(ActionType::ExplainPrevious, "Default: explain previous");
    }
    if wants_scenario {
        if let Some(parsed) = inline_scenario(msg) {
            return AgentAction::compare("Default: scenario", parsed);
        }
    }
    if has_any(msg, &["update", "change", "new", "different"]) {
        return AgentAction::new(ActionType::RunAnalysis, "Default: re-run analysis");
    }

    AgentAction::noop("No matching default")
}
