//! Analysis tool trait and registry
//!
//! Tools are deterministic and side-effect free: the same context always
//! yields the same findings. The registry is a fixed, ordered collection
//! keyed by [`ToolId`].

mod analysis;

pub use analysis::{
    AssetConcentrationTool, ExpenseConcentrationTool, ExpenseRatioTool, InputValidationTool,
    LiquidityTool,
};

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::context::FinancialContext;
use crate::models::Finding;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ToolId {
    InputValidation,
    ExpenseRatio,
    ExpenseConcentration,
    AssetConcentration,
    Liquidity,
}

impl ToolId {
    /// Tools eligible for selection, in default execution order.
    pub const SELECTABLE: [ToolId; 4] = [
        ToolId::ExpenseRatio,
        ToolId::ExpenseConcentration,
        ToolId::AssetConcentration,
        ToolId::Liquidity,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ToolId::InputValidation => "input_validation",
            ToolId::ExpenseRatio => "expense_ratio",
            ToolId::ExpenseConcentration => "expense_concentration",
            ToolId::AssetConcentration => "asset_concentration",
            ToolId::Liquidity => "liquidity",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        match name.trim() {
            "input_validation" => Some(ToolId::InputValidation),
            "expense_ratio" => Some(ToolId::ExpenseRatio),
            "expense_concentration" => Some(ToolId::ExpenseConcentration),
            "asset_concentration" => Some(ToolId::AssetConcentration),
            "liquidity" => Some(ToolId::Liquidity),
            _ => None,
        }
    }
}

impl fmt::Display for ToolId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A single deterministic analysis tool.
pub trait AnalysisTool: Send + Sync {
    fn id(&self) -> ToolId;
    fn description(&self) -> &'static str;
    fn applicable(&self, ctx: &FinancialContext) -> bool;
    /// Emits zero or more findings; stops at its first qualifying threshold.
    fn run(&self, ctx: &FinancialContext) -> Vec<Finding>;
    /// Names of the metrics this tool reports, recorded in the trace.
    fn metrics(&self) -> &'static [&'static str];
}

/// Outcome of one tool pass.
#[derive(Debug, Clone, Default)]
pub struct ToolRun {
    pub findings: Vec<Finding>,
    pub tools_selected: Vec<ToolId>,
    pub tools_executed: Vec<ToolId>,
    pub metrics_computed: Vec<String>,
}

impl ToolRun {
    pub fn has_invalid(&self) -> bool {
        self.findings.iter().any(Finding::is_invalid)
    }
}

pub struct ToolRegistry {
    tools: Vec<Arc<dyn AnalysisTool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self { tools: Vec::new() }
    }

    /// Later registrations with the same id replace the earlier one in place.
    pub fn register(&mut self, tool: Arc<dyn AnalysisTool>) {
        match self.tools.iter().position(|t| t.id() == tool.id()) {
            Some(idx) => self.tools[idx] = tool,
            None => self.tools.push(tool),
        }
    }

    pub fn get(&self, id: ToolId) -> Option<Arc<dyn AnalysisTool>> {
        self.tools.iter().find(|t| t.id() == id).cloned()
    }

    pub fn list(&self) -> Vec<ToolId> {
        self.tools.iter().map(|t| t.id()).collect()
    }

    /// One line per selectable tool, for planning prompts.
    pub fn describe_selectable(&self) -> String {
        self.tools
            .iter()
            .filter(|t| t.id() != ToolId::InputValidation)
            .map(|t| format!("- {}: {}", t.id(), t.description()))
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Normalise a requested selection.
    ///
    /// Unknown names and input validation are dropped, duplicates collapse,
    /// registry order is kept. An empty result means "run every tool".
    pub fn resolve_selection<S: AsRef<str>>(&self, requested: &[S]) -> Vec<ToolId> {
        let wanted: Vec<ToolId> = requested
            .iter()
            .filter_map(|name| {
                let parsed = ToolId::parse(name.as_ref());
                if parsed.is_none() {
                    warn!(tool = name.as_ref(), "Ignoring unknown tool in selection");
                }
                parsed
            })
            .filter(|id| *id != ToolId::InputValidation)
            .collect();

        let resolved: Vec<ToolId> = self
            .list()
            .into_iter()
            .filter(|id| wanted.contains(id))
            .collect();

        if resolved.is_empty() {
            self.default_selection()
        } else {
            resolved
        }
    }

    pub fn default_selection(&self) -> Vec<ToolId> {
        self.list()
            .into_iter()
            .filter(|id| *id != ToolId::InputValidation)
            .collect()
    }

    /// Run input validation, then the selected tools in registry order.
    ///
    /// An invalid finding short-circuits: no further tool executes.
    pub fn run(&self, ctx: &FinancialContext, selection: &[ToolId]) -> ToolRun {
        let mut outcome = ToolRun {
            tools_selected: selection.to_vec(),
            ..Default::default()
        };

        for tool in &self.tools {
            let id = tool.id();
            if id != ToolId::InputValidation && !selection.contains(&id) {
                continue;
            }
            if !tool.applicable(ctx) {
                debug!(tool = %id, "Tool not applicable");
                continue;
            }

            let findings = tool.run(ctx);
            outcome.tools_executed.push(id);
            outcome
                .metrics_computed
                .extend(tool.metrics().iter().map(|m| m.to_string()));

            debug!(tool = %id, findings = findings.len(), "Tool executed");
            outcome.findings.extend(findings);

            if outcome.has_invalid() {
                debug!(tool = %id, "Invalid input detected; skipping remaining tools");
                break;
            }
        }

        outcome
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Registry with every built-in tool in canonical order.
pub fn create_default_registry() -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry.register(Arc::new(InputValidationTool));
    registry.register(Arc::new(ExpenseRatioTool));
    registry.register(Arc::new(ExpenseConcentrationTool));
    registry.register(Arc::new(AssetConcentrationTool));
    registry.register(Arc::new(LiquidityTool));
    registry
}
