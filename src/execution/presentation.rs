//! UI presentation blocks attached to chat responses

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::context::FinancialContext;
use crate::models::{AnalysisItem, ExpectedSchema, FinancialInput};

/// Allocation percentages must sum to 100 within this tolerance to chart.
pub const ALLOCATION_TOLERANCE: f64 = 0.1;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ChartKind {
    SavingsGauge,
    ExpenseChart,
    AssetAllocation,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EditorKind {
    FinancialInput,
    ExpenseCategories,
    AssetAllocation,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum UiBlock {
    #[serde(rename_all = "camelCase")]
    Chart { chart_type: ChartKind, data: Value },
    Table { schema: String, rows: Vec<AnalysisItem> },
    #[serde(rename_all = "camelCase")]
    Editor { editor_type: EditorKind, value: Value },
}

/// Charts and the findings table for a completed analysis.
pub fn analysis_blocks(ctx: &FinancialContext, analysis: &[AnalysisItem]) -> Vec<UiBlock> {
    let mut blocks = Vec::new();

    if ctx.income() > 0.0 {
        blocks.push(UiBlock::Chart {
            chart_type: ChartKind::SavingsGauge,
            data: json!({ "savingsRate": ctx.derived().savings_rate }),
        });
    }

    let categories: Vec<Value> = ctx
        .expense_categories()
        .iter()
        .map(|(category, amount)| json!({ "category": category, "amount": amount }))
        .collect();
    blocks.push(UiBlock::Chart {
        chart_type: ChartKind::ExpenseChart,
        data: json!({
            "monthlyIncome": ctx.income(),
            "monthlyExpenses": ctx.total_expenses(),
            "categories": categories,
        }),
    });

    if !ctx.asset_allocation().is_empty()
        && (ctx.allocation_total() - 100.0).abs() <= ALLOCATION_TOLERANCE
    {
        let slices: Vec<Value> = ctx
            .asset_allocation()
            .iter()
            .map(|(asset_class, pct)| json!({ "assetClass": asset_class, "pct": pct }))
            .collect();
        blocks.push(UiBlock::Chart {
            chart_type: ChartKind::AssetAllocation,
            data: json!({ "allocation": slices }),
        });
    }

    if !analysis.is_empty() {
        blocks.push(UiBlock::Table {
            schema: "analysis".to_string(),
            rows: analysis.to_vec(),
        });
    }

    blocks
}

fn financial_input_value(input: Option<&FinancialInput>) -> Value {
    match input {
        Some(input) => json!({
            "monthly_income": input.monthly_income,
            "monthly_expenses": input.monthly_expenses,
            "expense_categories": input.expense_categories,
            "current_savings": input.current_savings,
        }),
        None => json!({}),
    }
}

/// Editor block for a clarifying question.
///
/// The initial financial-input form is shown whenever the category table
/// itself is still missing, always empty so partial input is never summed
/// into the new table.
pub fn clarification_blocks(schema: ExpectedSchema, input: Option<&FinancialInput>) -> Vec<UiBlock> {
    let complete = input.map_or(false, FinancialInput::has_valid_categories);

    let block = if schema == ExpectedSchema::ExpenseCategories || !complete {
        UiBlock::Editor {
            editor_type: EditorKind::FinancialInput,
            value: json!({}),
        }
    } else if schema == ExpectedSchema::AssetChange {
        UiBlock::Editor {
            editor_type: EditorKind::AssetAllocation,
            value: json!(input.map(|i| i.asset_allocation.clone()).unwrap_or_default()),
        }
    } else {
        UiBlock::Editor {
            editor_type: EditorKind::ExpenseCategories,
            value: json!(input.map(|i| i.expense_categories.clone()).unwrap_or_default()),
        }
    };

    vec![block]
}

/// Editor shown when run_analysis is attempted without complete input.
pub fn input_editor(input: Option<&FinancialInput>) -> Vec<UiBlock> {
    vec![UiBlock::Editor {
        editor_type: EditorKind::FinancialInput,
        value: financial_input_value(input),
    }]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AssetAllocationEntry, ExpenseCategory};

    fn input(allocation: &[(&str, f64)]) -> FinancialInput {
        FinancialInput {
            monthly_income: 5000.0,
            expense_categories: vec![ExpenseCategory {
                category: "Housing".into(),
                amount: 2000.0,
            }],
            asset_allocation: allocation
                .iter()
                .map(|(c, p)| AssetAllocationEntry {
                    asset_class: c.to_string(),
                    allocation_pct: *p,
                })
                .collect(),
            ..Default::default()
        }
    }

    fn has_chart(blocks: &[UiBlock], kind: ChartKind) -> bool {
        blocks
            .iter()
            .any(|b| matches!(b, UiBlock::Chart { chart_type, .. } if *chart_type == kind))
    }

    #[test]
    fn test_allocation_chart_requires_full_allocation() {
        let ctx = FinancialContext::from_input(&input(&[("Stocks", 60.0), ("Bonds", 40.0)])).unwrap();
        assert!(has_chart(&analysis_blocks(&ctx, &[]), ChartKind::AssetAllocation));

        let ctx = FinancialContext::from_input(&input(&[("Stocks", 60.0), ("Bonds", 30.0)])).unwrap();
        let blocks = analysis_blocks(&ctx, &[]);
        assert!(!has_chart(&blocks, ChartKind::AssetAllocation));
        assert!(has_chart(&blocks, ChartKind::SavingsGauge));
        assert!(has_chart(&blocks, ChartKind::ExpenseChart));
    }

    #[test]
    fn test_block_serialization() {
        let block = UiBlock::Chart {
            chart_type: ChartKind::SavingsGauge,
            data: json!({ "savingsRate": 0.2 }),
        };
        let value = serde_json::to_value(&block).unwrap();
        assert_eq!(value["type"], "chart");
        assert_eq!(value["chartType"], "savings_gauge");

        let editor = &clarification_blocks(ExpectedSchema::ExpenseCategories, None)[0];
        let value = serde_json::to_value(editor).unwrap();
        assert_eq!(value["type"], "editor");
        assert_eq!(value["editorType"], "financial_input");
    }

    #[test]
    fn test_category_editor_starts_empty() {
        let partial = FinancialInput {
            monthly_income: 5000.0,
            ..Default::default()
        };
        let blocks = clarification_blocks(ExpectedSchema::ExpenseCategories, Some(&partial));
        assert_eq!(
            blocks[0],
            UiBlock::Editor {
                editor_type: EditorKind::FinancialInput,
                value: json!({}),
            }
        );

        let blocks = input_editor(Some(&partial));
        assert!(matches!(
            &blocks[0],
            UiBlock::Editor { value, .. } if value["monthly_income"] == 5000.0
        ));
    }

    #[test]
    fn test_delta_editor_uses_categories() {
        let complete = input(&[]);
        let blocks = clarification_blocks(ExpectedSchema::ExpenseDelta, Some(&complete));
        assert!(matches!(
            &blocks[0],
            UiBlock::Editor { editor_type: EditorKind::ExpenseCategories, .. }
        ));

        let blocks = clarification_blocks(ExpectedSchema::ExpenseDelta, None);
        assert!(matches!(
            &blocks[0],
            UiBlock::Editor { editor_type: EditorKind::FinancialInput, .. }
        ));
    }
}
