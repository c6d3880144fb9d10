//! Generative action selection
//!
//! Builds the planning prompt and enforces the action contract on the reply.
//! Anything that does not parse into exactly one valid action is rejected.

use crate::error::OrchestrationError;
use crate::models::{ActionType, AgentAction, ConversationState};
use crate::Result;

const SUMMARY_LIMIT: usize = 200;

pub fn build_prompt(state: &ConversationState, tools_description: &str) -> String {
    let has_previous = state.last_run_id.is_some() && state.last_analysis_summary.is_some();

    let context_summary = match state.effective_input() {
        Some(input) => format!(
            "income={}, categories={} (baseline)",
            input.monthly_income,
            input.expense_categories.len()
        ),
        None if !state.turns.is_empty() => {
            "User has not yet provided expense breakdown by category".to_string()
        }
        None => "None".to_string(),
    };

    let mut parts = vec![
        "You are a financial analysis agent. Your job is to decide the next action.".to_string(),
        String::new(),
        "Available actions (return exactly one):".to_string(),
        "- run_analysis: ONLY when the user has already provided income AND an expense category table. Never guess categories.".to_string(),
        "- explain_previous: when the user asks about earlier results (explain, why, what does that mean)".to_string(),
        "- compare_scenarios: when the user proposes a concrete change with numbers (e.g. Transport +1500)".to_string(),
        "- clarifying_question: when required data is missing or intent is ambiguous".to_string(),
        "- noop: only if the message is unrelated to personal finance".to_string(),
        String::new(),
        "Analysis tools:".to_string(),
        tools_description.to_string(),
        String::new(),
        format!("Current financial context summary: {}", context_summary),
        format!("Previous analysis exists: {}", if has_previous { "Yes" } else { "No" }),
    ];

    if let Some(summary) = &state.last_analysis_summary {
        let clipped: String = summary.chars().take(SUMMARY_LIMIT).collect();
        parts.push(format!("Last analysis: {}", clipped));
    }

    parts.push(String::new());
    parts.push("Return valid JSON matching this schema only (no other text):".to_string());
    parts.push(
        r#"{"type": "<run_analysis | explain_previous | compare_scenarios | clarifying_question | noop>", "reasoning": "<brief reason>", "parameters": {}}"#
            .to_string(),
    );
    parts.push(
        r#"For clarifying_question, set parameters.question and parameters.expected_schema ("expense_categories" when the category table is missing, "expense_delta" for scenario changes)."#
            .to_string(),
    );
    parts.push(
        r#"For compare_scenarios, set parameters.delta = {"category": "...", "monthly_delta": <number>} or parameters.deltas = [...]."#
            .to_string(),
    );
    parts.push("NEVER guess categories or deltas. If unclear, use clarifying_question.".to_string());
    parts.push(String::new());
    parts.push("Latest user message:".to_string());
    if let Some(msg) = state.last_user_message() {
        parts.push(msg.to_string());
    }

    parts.join("\n")
}

/// Slice from the first `{` to the last `}`; the whole text if there is none.
pub fn extract_json(raw: &str) -> &str {
    let text = raw.trim();
    match (text.find('{'), text.rfind('}')) {
        (Some(start), Some(end)) if end > start => &text[start..=end],
        _ => text,
    }
}

/// Parse a planner reply into an action, enforcing the contract.
pub fn parse_action_response(raw: &str) -> Result<AgentAction> {
    if raw.trim().is_empty() {
        return Err(OrchestrationError::PlannerContract("Empty planner output".to_string()));
    }

    let action: AgentAction = serde_json::from_str(extract_json(raw)).map_err(|e| {
        OrchestrationError::PlannerContract(format!("Failed to parse planner output: {}", e))
    })?;

    if action.action_type == ActionType::ClarifyingQuestion && action.question().is_none() {
        return Err(OrchestrationError::PlannerContract(
            "clarifying_question requires a question".to_string(),
        ));
    }
    if action.action_type == ActionType::CompareScenarios
        && !action.parameters.contains_key("delta")
        && !action.parameters.contains_key("deltas")
    {
        return Err(OrchestrationError::PlannerContract(
            "compare_scenarios requires delta or deltas".to_string(),
        ));
    }

    Ok(action)
}
