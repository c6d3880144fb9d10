//! Generative tool selection for the analysis pipeline
//!
//! Input validation is never selectable. Any failure falls back to the
//! full default selection.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::generative::extract_json;
use crate::context::FinancialContext;
use crate::generation::GenerationGate;
use crate::tools::{ToolId, ToolRegistry};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SelectionStatus {
    Skipped,
    Valid,
    Fallback,
}

impl SelectionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SelectionStatus::Skipped => "skipped",
            SelectionStatus::Valid => "valid",
            SelectionStatus::Fallback => "fallback",
        }
    }
}

#[derive(Debug, Deserialize)]
struct SelectionReply {
    tools: Vec<String>,
}

fn build_prompt(ctx: &FinancialContext, registry: &ToolRegistry) -> String {
    let snapshot = ctx.to_snapshot();
    format!(
        "Select which analysis tools to run for this financial profile.\n\n\
         Profile: income={:.2}, total_expenses={:.2}, expense categories={}, asset classes={}, savings provided={}\n\n\
         Available tools:\n{}\n\n\
         Return ONLY JSON: {{\"tools\": [\"<tool name>\", ...]}}",
        snapshot.income,
        snapshot.total_expenses,
        snapshot.expense_category_count,
        snapshot.asset_class_count,
        ctx.current_savings().is_some(),
        registry.describe_selectable(),
    )
}

/// Ask the generative planner which tools to run.
///
/// Returns the default selection with `Fallback` when the call fails or the
/// reply names no usable tool.
pub async fn select_tools(
    gate: &GenerationGate,
    ctx: &FinancialContext,
    registry: &ToolRegistry,
) -> (Vec<ToolId>, SelectionStatus) {
    let raw = match gate.call_raw(&build_prompt(ctx, registry)).await {
        Ok(raw) => raw,
        Err(e) => {
            warn!(error = %e, "Tool selection call failed; running all tools");
            return (registry.default_selection(), SelectionStatus::Fallback);
        }
    };

    let reply: SelectionReply = match serde_json::from_str(extract_json(&raw)) {
        Ok(reply) => reply,
        Err(e) => {
            warn!(error = %e, "Tool selection reply unparseable; running all tools");
            return (registry.default_selection(), SelectionStatus::Fallback);
        }
    };

    let known = reply
        .tools
        .iter()
        .filter_map(|name| ToolId::parse(name))
        .any(|id| id != ToolId::InputValidation);

    if !known {
        return (registry.default_selection(), SelectionStatus::Fallback);
    }

    let selection = registry.resolve_selection(reply.tools.as_slice());
    debug!(tools = ?selection, "Tools selected");
    (selection, SelectionStatus::Valid)
}
