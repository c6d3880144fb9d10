//! Deterministic analysis pipeline
//!
//! INPUT → VALIDATE → CONTEXT → SELECT → TOOLS → PERSIST → EDUCATE → GENERATE
//!
//! Tools are the sole source of findings. The generative layer only
//! rephrases them and is skipped entirely unless the capabilities allow it.

use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::audit::RunStore;
use crate::capabilities::Capabilities;
use crate::context::FinancialContext;
use crate::education;
use crate::generation::{
    compose_response, safe_text, summary_prompt, validate_output, GenerationGate, ValidationReport,
};
use crate::models::{AnalysisItem, FinancialInput, PipelineResult, PipelineTrace};
use crate::planner::{select_tools, SelectionStatus};
use crate::tools::ToolRegistry;

/// Tolerance on the 100% allocation sum.
const ALLOCATION_SUM_TOLERANCE: f64 = 0.1;

/// Request-level checks that reject input before any tool runs.
///
/// Income and expense sign checks are left to the input-validation tool.
pub fn validate_request(input: &FinancialInput) -> Vec<String> {
    let mut errors = Vec::new();

    if input.monthly_expenses.is_none() && input.expense_categories.is_empty() {
        errors.push("Provide monthly_expenses or a non-empty expense_categories list".to_string());
    }
    if input.expense_categories.iter().any(|c| c.amount < 0.0) {
        errors.push("Expense category amounts must be non-negative".to_string());
    }
    if input
        .asset_allocation
        .iter()
        .any(|a| a.allocation_pct < 0.0 || a.allocation_pct > 100.0)
    {
        errors.push("Asset allocation percentages must be between 0 and 100".to_string());
    }
    if !input.asset_allocation.is_empty() {
        let total = input.allocation_total();
        if (total - 100.0).abs() > ALLOCATION_SUM_TOLERANCE {
            errors.push(format!("Asset allocation must sum to 100% (got {:.1}%)", total));
        }
    }
    if input.current_savings.map_or(false, |s| s < 0.0) {
        errors.push("current_savings must be non-negative".to_string());
    }

    errors
}

pub struct AnalysisPipeline {
    registry: Arc<ToolRegistry>,
    gate: Arc<GenerationGate>,
    runs: Arc<RunStore>,
}

impl AnalysisPipeline {
    pub fn new(registry: Arc<ToolRegistry>, gate: Arc<GenerationGate>, runs: Arc<RunStore>) -> Self {
        Self {
            registry,
            gate,
            runs,
        }
    }

    pub fn runs(&self) -> &Arc<RunStore> {
        &self.runs
    }

    /// Validate raw input, then analyse it.
    pub async fn run(&self, input: &FinancialInput, caps: &Capabilities) -> PipelineResult {
        let mut trace = PipelineTrace::default();

        let errors = validate_request(input);
        if !errors.is_empty() {
            info!(errors = ?errors, "Input rejected before analysis");
            return PipelineResult::rejected(errors, trace);
        }
        trace.phase("input_validated");

        let ctx = match FinancialContext::from_input(input) {
            Ok(ctx) => ctx,
            Err(e) => {
                warn!(error = %e, "Context construction failed");
                return PipelineResult::rejected(vec![e.to_string()], trace);
            }
        };

        self.analyze(ctx, caps, trace).await
    }

    /// Analyse an already-built context, e.g. a scenario derived from a baseline.
    pub async fn run_context(&self, ctx: FinancialContext, caps: &Capabilities) -> PipelineResult {
        self.analyze(ctx, caps, PipelineTrace::default()).await
    }

    async fn analyze(
        &self,
        ctx: FinancialContext,
        caps: &Capabilities,
        mut trace: PipelineTrace,
    ) -> PipelineResult {
        trace.phase("context_built");
        trace.context_snapshot = Some(ctx.to_snapshot());

        // ── Tool selection
        let (selection, status) = if self.gate.permits_planning(caps) {
            select_tools(&self.gate, &ctx, &self.registry).await
        } else {
            (self.registry.default_selection(), SelectionStatus::Skipped)
        };
        trace.planner_status = Some(status.as_str().to_string());
        trace.phase("tools_selected");

        // ── Tools
        let tool_run = self.registry.run(&ctx, &selection);
        trace.tools_selected = tool_run.tools_selected.clone();
        trace.tools_executed = tool_run.tools_executed.clone();
        trace.metrics_computed = tool_run.metrics_computed.clone();
        trace.phase("tools_executed");

        let analysis: Vec<AnalysisItem> = tool_run.findings.iter().map(AnalysisItem::from).collect();
        let education = education::for_findings(&tool_run.findings);

        if tool_run.has_invalid() {
            let errors: Vec<String> = tool_run
                .findings
                .iter()
                .filter(|f| f.is_invalid())
                .map(|f| f.reason.clone())
                .collect();
            info!(errors = ?errors, "Input failed validation tool; no run recorded");
            trace.phase("response_produced");

            return PipelineResult {
                run_id: None,
                generation: safe_text(&compose_response(&tool_run.findings, &education)),
                analysis,
                education,
                validation: ValidationReport {
                    valid: false,
                    issues: errors.clone(),
                },
                errors,
                trace,
                findings: tool_run.findings,
                context: Some(ctx),
            };
        }

        // ── Persist
        let mut errors = Vec::new();
        let run_id = match self
            .runs
            .record_run(ctx.to_snapshot(), selection.clone(), tool_run.findings.clone())
            .await
        {
            Ok(run_id) => Some(run_id),
            Err(e) => {
                warn!(error = %e, "Failed to record run");
                errors.push(e.to_string());
                None
            }
        };

        trace.phase("education_fetched");

        // ── Generation
        let outcome = self
            .gate
            .generate(caps, &summary_prompt(&tool_run.findings, &education))
            .await;
        trace.phase(if outcome.invoked { "llm_executed" } else { "llm_skipped" });
        trace.generation_attempts = outcome.attempts;
        errors.extend(outcome.errors);

        let generation = match outcome.text {
            Some(text) => text,
            None => safe_text(&compose_response(&tool_run.findings, &education)),
        };
        let validation = if outcome.invoked {
            outcome.validation
        } else {
            validate_output(&generation)
        };

        trace.phase("response_produced");
        debug!(run_id = ?run_id, findings = tool_run.findings.len(), "Pipeline complete");

        PipelineResult {
            run_id,
            analysis,
            education,
            generation,
            validation,
            errors,
            trace,
            findings: tool_run.findings,
            context: Some(ctx),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::CapabilityRequest;
    use crate::generation::{ScriptStep, ScriptedProvider, FALLBACK_STUB_MESSAGE};
    use crate::models::{AssetAllocationEntry, ExpenseCategory, Severity};
    use crate::tools::{create_default_registry, ToolId};

    fn pipeline(gate: GenerationGate) -> AnalysisPipeline {
        AnalysisPipeline::new(
            Arc::new(create_default_registry()),
            Arc::new(gate),
            Arc::new(RunStore::new()),
        )
    }

    fn input(income: f64, expenses: f64) -> FinancialInput {
        FinancialInput {
            monthly_income: income,
            monthly_expenses: Some(expenses),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_deterministic_run_is_recorded() {
        let pipeline = pipeline(GenerationGate::disabled());
        let result = pipeline.run(&input(5000.0, 4600.0), &Capabilities::deterministic()).await;

        let run_id = result.run_id.clone().unwrap();
        assert!(result.errors.is_empty());
        assert!(result.validation.valid);
        assert!(result.generation.starts_with("Analysis:"));
        assert_eq!(
            result.trace.phases,
            vec![
                "input_validated",
                "context_built",
                "tools_selected",
                "tools_executed",
                "education_fetched",
                "llm_skipped",
                "response_produced",
            ]
        );
        assert_eq!(result.trace.planner_status.as_deref(), Some("skipped"));

        let memory = pipeline.runs().replay(&run_id).await.unwrap();
        assert_eq!(memory.tool_results.len(), result.analysis.len());
    }

    #[tokio::test]
    async fn test_same_input_same_findings() {
        let pipeline = pipeline(GenerationGate::disabled());
        let caps = Capabilities::deterministic();
        let a = pipeline.run(&input(8000.0, 7500.0), &caps).await;
        let b = pipeline.run(&input(8000.0, 7500.0), &caps).await;
        assert_eq!(a.analysis, b.analysis);
        assert_eq!(a.generation, b.generation);
        assert_ne!(a.run_id, b.run_id);
    }

    #[tokio::test]
    async fn test_invalid_income_records_nothing() {
        let pipeline = pipeline(GenerationGate::disabled());
        let result = pipeline.run(&input(0.0, 3000.0), &Capabilities::deterministic()).await;

        assert!(result.run_id.is_none());
        assert_eq!(result.analysis.len(), 1);
        assert_eq!(result.analysis[0].severity, Severity::Invalid);
        assert_eq!(result.trace.tools_executed, vec![ToolId::InputValidation]);
        assert_eq!(result.errors, vec!["Zero or negative income".to_string()]);
        assert!(pipeline.runs().list().await.is_empty());
    }

    #[tokio::test]
    async fn test_request_validation() {
        let pipeline = pipeline(GenerationGate::disabled());
        let bad = FinancialInput {
            monthly_income: 5000.0,
            asset_allocation: vec![AssetAllocationEntry {
                asset_class: "Stocks".into(),
                allocation_pct: 90.0,
            }],
            ..Default::default()
        };
        let result = pipeline.run(&bad, &Capabilities::deterministic()).await;
        assert!(result.run_id.is_none());
        assert_eq!(result.errors.len(), 2);
        assert!(result.trace.tools_executed.is_empty());
    }

    #[tokio::test]
    async fn test_no_findings_message() {
        let pipeline = pipeline(GenerationGate::disabled());
        let healthy = FinancialInput {
            monthly_income: 8000.0,
            expense_categories: vec![
                ExpenseCategory { category: "Housing".into(), amount: 1400.0 },
                ExpenseCategory { category: "Food".into(), amount: 1300.0 },
                ExpenseCategory { category: "Transport".into(), amount: 1000.0 },
            ],
            ..Default::default()
        };
        let result = pipeline.run(&healthy, &Capabilities::deterministic()).await;
        assert!(result.analysis.is_empty());
        assert_eq!(result.generation, crate::generation::NO_FINDINGS_MESSAGE);
    }

    #[tokio::test]
    async fn test_generative_paths_never_change_findings() {
        let caps = Capabilities::resolve(
            CapabilityRequest {
                llm: true,
                fallback: true,
                ..Default::default()
            },
            true,
        );
        let generative = pipeline(GenerationGate::new(Some(Arc::new(ScriptedProvider::new(vec![
            ScriptStep::Reply("You should sell your car.".into()),
        ])))));
        let deterministic = pipeline(GenerationGate::disabled());

        let a = generative.run(&input(5000.0, 4600.0), &caps).await;
        let b = deterministic.run(&input(5000.0, 4600.0), &Capabilities::deterministic()).await;

        assert_eq!(a.analysis, b.analysis);
        assert_eq!(a.generation, FALLBACK_STUB_MESSAGE);
        assert!(a.trace.phases.contains(&"llm_executed".to_string()));
    }

    #[tokio::test]
    async fn test_agent_selects_tools() {
        let caps = Capabilities::resolve(
            CapabilityRequest {
                agent: true,
                ..Default::default()
            },
            true,
        );
        let pipeline = pipeline(GenerationGate::new(Some(Arc::new(ScriptedProvider::replying(&[
            r#"{"tools": ["liquidity"]}"#,
        ])))));
        let result = pipeline.run(&input(5000.0, 4600.0), &caps).await;

        assert_eq!(result.trace.planner_status.as_deref(), Some("valid"));
        assert_eq!(result.trace.tools_selected, vec![ToolId::Liquidity]);
        assert_eq!(result.trace.tools_executed, vec![ToolId::InputValidation]);
        assert!(result.analysis.is_empty());
    }
}
