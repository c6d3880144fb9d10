//! Built-in analysis tools

use serde_json::json;
use std::collections::BTreeMap;

use super::{AnalysisTool, ToolId};
use crate::context::FinancialContext;
use crate::models::{Finding, Severity};

fn finding(
    tool: ToolId,
    dimension: &str,
    severity: Severity,
    reason: impl Into<String>,
    metrics: BTreeMap<String, serde_json::Value>,
) -> Finding {
    Finding {
        tool_name: tool,
        dimension: dimension.to_string(),
        severity,
        reason: reason.into(),
        metrics,
    }
}

/// Largest entry by value; ties keep the earliest.
fn dominant(entries: &[(String, f64)]) -> Option<&(String, f64)> {
    entries.iter().fold(None, |best: Option<&(String, f64)>, entry| match best {
        Some(b) if b.1 >= entry.1 => Some(b),
        _ => Some(entry),
    })
}

//
// ================= Input Validation =================
//

pub struct InputValidationTool;

impl AnalysisTool for InputValidationTool {
    fn id(&self) -> ToolId {
        ToolId::InputValidation
    }

    fn description(&self) -> &'static str {
        "Rejects non-positive income and negative expenses"
    }

    fn applicable(&self, _ctx: &FinancialContext) -> bool {
        true
    }

    fn run(&self, ctx: &FinancialContext) -> Vec<Finding> {
        let mut metrics = BTreeMap::new();
        metrics.insert("income".to_string(), json!(ctx.income()));
        metrics.insert("total_expenses".to_string(), json!(ctx.total_expenses()));

        if ctx.income() <= 0.0 {
            return vec![finding(
                self.id(),
                "Input",
                Severity::Invalid,
                "Zero or negative income",
                metrics,
            )];
        }
        if ctx.total_expenses() < 0.0 {
            return vec![finding(
                self.id(),
                "Input",
                Severity::Invalid,
                "Negative values not allowed",
                metrics,
            )];
        }
        Vec::new()
    }

    fn metrics(&self) -> &'static [&'static str] {
        &[]
    }
}

//
// ================= Savings & Expense Ratio =================
//

pub struct ExpenseRatioTool;

impl AnalysisTool for ExpenseRatioTool {
    fn id(&self) -> ToolId {
        ToolId::ExpenseRatio
    }

    fn description(&self) -> &'static str {
        "Savings rate and expense-to-income ratio"
    }

    fn applicable(&self, ctx: &FinancialContext) -> bool {
        ctx.income() > 0.0
    }

    fn run(&self, ctx: &FinancialContext) -> Vec<Finding> {
        let derived = ctx.derived();
        let mut findings = Vec::new();

        let savings = if derived.savings_rate < 0.10 {
            Some((Severity::High, "Savings rate below 10%"))
        } else if derived.savings_rate < 0.20 {
            Some((Severity::Medium, "Savings rate below 20%"))
        } else {
            None
        };
        if let Some((severity, reason)) = savings {
            let mut metrics = BTreeMap::new();
            metrics.insert("savings_rate".to_string(), json!(derived.savings_rate));
            findings.push(finding(self.id(), "Savings", severity, reason, metrics));
        }

        let ratio = if derived.expense_ratio > 0.90 {
            Some((Severity::High, "Expense ratio above 90%"))
        } else if derived.expense_ratio > 0.80 {
            Some((Severity::Medium, "Expense ratio above 80%"))
        } else {
            None
        };
        if let Some((severity, reason)) = ratio {
            let mut metrics = BTreeMap::new();
            metrics.insert("expense_ratio".to_string(), json!(derived.expense_ratio));
            findings.push(finding(self.id(), "ExpenseRatio", severity, reason, metrics));
        }

        findings
    }

    fn metrics(&self) -> &'static [&'static str] {
        &["savings_rate", "expense_ratio"]
    }
}

//
// ================= Expense Concentration =================
//

pub struct ExpenseConcentrationTool;

impl AnalysisTool for ExpenseConcentrationTool {
    fn id(&self) -> ToolId {
        ToolId::ExpenseConcentration
    }

    fn description(&self) -> &'static str {
        "Share of total expenses taken by the largest category"
    }

    fn applicable(&self, ctx: &FinancialContext) -> bool {
        !ctx.expense_categories().is_empty() && ctx.total_expenses() > 0.0
    }

    fn run(&self, ctx: &FinancialContext) -> Vec<Finding> {
        let Some((category, amount)) = dominant(ctx.expense_categories()) else {
            return Vec::new();
        };
        let share = amount / ctx.total_expenses();

        let (severity, threshold) = if share > 0.50 {
            (Severity::High, 50)
        } else if share > 0.40 {
            (Severity::Medium, 40)
        } else {
            return Vec::new();
        };

        let mut metrics = BTreeMap::new();
        metrics.insert("largest_category_pct".to_string(), json!(share * 100.0));
        metrics.insert("dominant_category".to_string(), json!(category));
        metrics.insert("amount".to_string(), json!(amount));

        vec![finding(
            self.id(),
            "ExpenseConcentration",
            severity,
            format!("Single category ({}) exceeds {}% of expenses", category, threshold),
            metrics,
        )]
    }

    fn metrics(&self) -> &'static [&'static str] {
        &["largest_category_pct"]
    }
}

//
// ================= Asset Concentration =================
//

pub struct AssetConcentrationTool;

impl AnalysisTool for AssetConcentrationTool {
    fn id(&self) -> ToolId {
        ToolId::AssetConcentration
    }

    fn description(&self) -> &'static str {
        "Share of the portfolio held in the largest asset class"
    }

    fn applicable(&self, ctx: &FinancialContext) -> bool {
        !ctx.asset_allocation().is_empty()
    }

    fn run(&self, ctx: &FinancialContext) -> Vec<Finding> {
        let Some((asset_class, pct)) = dominant(ctx.asset_allocation()) else {
            return Vec::new();
        };

        let (severity, threshold) = if *pct > 80.0 {
            (Severity::High, 80)
        } else if *pct > 60.0 {
            (Severity::Medium, 60)
        } else {
            return Vec::new();
        };

        let mut metrics = BTreeMap::new();
        metrics.insert("largest_asset_pct".to_string(), json!(pct));
        metrics.insert("dominant_asset_class".to_string(), json!(asset_class));

        vec![finding(
            self.id(),
            "AssetConcentration",
            severity,
            format!("Single asset class ({}) exceeds {}%", asset_class, threshold),
            metrics,
        )]
    }

    fn metrics(&self) -> &'static [&'static str] {
        &["largest_asset_pct"]
    }
}

//
// ================= Liquidity =================
//

pub struct LiquidityTool;

/// Share of income kept under the stress test (a 20% drop).
const SHOCKED_INCOME_SHARE: f64 = 0.8;

impl AnalysisTool for LiquidityTool {
    fn id(&self) -> ToolId {
        ToolId::Liquidity
    }

    fn description(&self) -> &'static str {
        "Months of expenses covered by savings, with a 20% income shock"
    }

    fn applicable(&self, ctx: &FinancialContext) -> bool {
        ctx.current_savings().map_or(false, |s| s > 0.0) && ctx.total_expenses() > 0.0
    }

    fn run(&self, ctx: &FinancialContext) -> Vec<Finding> {
        let coverage = ctx.derived().months_coverage;

        let (severity, reason) = if coverage < 1.0 {
            (Severity::High, "Less than 1 month of expense coverage in savings")
        } else if coverage < 3.0 {
            (Severity::Medium, "Less than 3 months of expense coverage")
        } else {
            return Vec::new();
        };

        let savings = ctx.current_savings().unwrap_or(0.0);
        let shocked_income = ctx.income() * SHOCKED_INCOME_SHARE;
        let deficit = (ctx.total_expenses() - shocked_income).max(0.0);
        let shock_coverage = if deficit > 0.0 { savings / deficit } else { coverage };

        let mut metrics = BTreeMap::new();
        metrics.insert("months_coverage".to_string(), json!(coverage));
        metrics.insert("current_savings".to_string(), json!(savings));
        metrics.insert("monthly_expenses".to_string(), json!(ctx.total_expenses()));
        metrics.insert("shock_income_20pct_drop".to_string(), json!(shocked_income));
        metrics.insert("shock_monthly_deficit".to_string(), json!(deficit));
        metrics.insert("shock_months_coverage".to_string(), json!(shock_coverage));

        vec![finding(self.id(), "Liquidity", severity, reason, metrics)]
    }

    fn metrics(&self) -> &'static [&'static str] {
        &["months_coverage", "shock_months_coverage"]
    }
}
