//! Immutable financial context
//!
//! Built once from validated input; derived metrics are computed at
//! construction and never mutated. Scenario deltas return a new context.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::OrchestrationError;
use crate::models::{AssetAllocationEntry, ExpenseCategory, ExpenseDelta, FinancialInput};
use crate::Result;

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct DerivedMetrics {
    pub savings_rate: f64,
    pub expense_ratio: f64,
    pub months_coverage: f64,
}

/// Summary of a context suitable for traces and run memory.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ContextSnapshot {
    pub income: f64,
    pub total_expenses: f64,
    pub expense_category_count: usize,
    pub asset_class_count: usize,
    pub derived_metrics: DerivedMetrics,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FinancialContext {
    income: f64,
    total_expenses: f64,
    expense_categories: Vec<(String, f64)>,
    asset_allocation: Vec<(String, f64)>,
    current_savings: Option<f64>,
    derived: DerivedMetrics,
}

impl FinancialContext {
    /// Build a context from raw input.
    ///
    /// Zero or negative income and negative expenses are preserved so the
    /// input-validation tool can flag them. Non-finite numbers are rejected.
    pub fn from_input(input: &FinancialInput) -> Result<Self> {
        ensure_finite("monthly_income", input.monthly_income)?;
        if let Some(expenses) = input.monthly_expenses {
            ensure_finite("monthly_expenses", expenses)?;
        }
        if let Some(savings) = input.current_savings {
            ensure_finite("current_savings", savings)?;
        }

        let mut categories: Vec<(String, f64)> = Vec::new();
        for entry in &input.expense_categories {
            ensure_finite(&entry.category, entry.amount)?;
            let name = entry.category.trim();
            if name.is_empty() || entry.amount <= 0.0 {
                continue;
            }
            // duplicates accumulate into the first occurrence
            match categories.iter_mut().find(|(existing, _)| existing == name) {
                Some((_, amount)) => *amount += entry.amount,
                None => categories.push((name.to_string(), entry.amount)),
            }
        }

        let mut allocation: Vec<(String, f64)> = Vec::new();
        for entry in &input.asset_allocation {
            ensure_finite(&entry.asset_class, entry.allocation_pct)?;
            let name = entry.asset_class.trim();
            if name.is_empty() || entry.allocation_pct <= 0.0 {
                continue;
            }
            match allocation.iter_mut().find(|(existing, _)| existing == name) {
                Some((_, pct)) => *pct += entry.allocation_pct,
                None => allocation.push((name.to_string(), entry.allocation_pct)),
            }
        }

        let category_sum: f64 = categories.iter().map(|(_, a)| a).sum();
        let total_expenses = match input.monthly_expenses {
            Some(expenses) if expenses != 0.0 => expenses,
            _ => category_sum,
        };

        let current_savings = input.current_savings.filter(|s| *s != 0.0);

        Ok(Self::assemble(
            input.monthly_income,
            total_expenses,
            categories,
            allocation,
            current_savings,
        ))
    }

    fn assemble(
        income: f64,
        total_expenses: f64,
        expense_categories: Vec<(String, f64)>,
        asset_allocation: Vec<(String, f64)>,
        current_savings: Option<f64>,
    ) -> Self {
        let derived = derive_metrics(income, total_expenses, current_savings);
        Self {
            income,
            total_expenses,
            expense_categories,
            asset_allocation,
            current_savings,
            derived,
        }
    }

    pub fn income(&self) -> f64 {
        self.income
    }

    pub fn total_expenses(&self) -> f64 {
        self.total_expenses
    }

    pub fn expense_categories(&self) -> &[(String, f64)] {
        &self.expense_categories
    }

    pub fn asset_allocation(&self) -> &[(String, f64)] {
        &self.asset_allocation
    }

    pub fn current_savings(&self) -> Option<f64> {
        self.current_savings
    }

    pub fn derived(&self) -> &DerivedMetrics {
        &self.derived
    }

    pub fn allocation_total(&self) -> f64 {
        self.asset_allocation.iter().map(|(_, p)| p).sum()
    }

    pub fn to_snapshot(&self) -> ContextSnapshot {
        ContextSnapshot {
            income: self.income,
            total_expenses: self.total_expenses,
            expense_category_count: self.expense_categories.len(),
            asset_class_count: self.asset_allocation.len(),
            derived_metrics: self.derived,
        }
    }

    /// Reconstruct pipeline input; the scenario path reruns the pipeline on this.
    pub fn to_input(&self) -> FinancialInput {
        FinancialInput {
            monthly_income: self.income,
            monthly_expenses: Some(self.total_expenses),
            expense_categories: self
                .expense_categories
                .iter()
                .map(|(category, amount)| ExpenseCategory {
                    category: category.clone(),
                    amount: *amount,
                })
                .collect(),
            asset_allocation: self
                .asset_allocation
                .iter()
                .map(|(asset_class, pct)| AssetAllocationEntry {
                    asset_class: asset_class.clone(),
                    allocation_pct: *pct,
                })
                .collect(),
            current_savings: self.current_savings,
        }
    }

    /// Apply a monthly change to one expense category.
    ///
    /// Matching is case-insensitive; an unknown category is appended. The
    /// category amount floors at zero (and the category is dropped there),
    /// and total expenses move by exactly the amount the category moved.
    pub fn apply_expense_delta(&self, category: &str, monthly_delta: f64) -> Self {
        let mut categories = self.expense_categories.clone();
        let wanted = category.trim();

        let position = categories
            .iter()
            .position(|(name, _)| name.eq_ignore_ascii_case(wanted));

        let applied = match position {
            Some(idx) => {
                let before = categories[idx].1;
                let after = (before + monthly_delta).max(0.0);
                if after == 0.0 {
                    categories.remove(idx);
                } else {
                    categories[idx].1 = after;
                }
                after - before
            }
            None => {
                let after = monthly_delta.max(0.0);
                if after > 0.0 {
                    categories.push((wanted.to_string(), after));
                }
                after
            }
        };

        debug!(category = wanted, requested = monthly_delta, applied, "Applied expense delta");

        Self::assemble(
            self.income,
            (self.total_expenses + applied).max(0.0),
            categories,
            self.asset_allocation.clone(),
            self.current_savings,
        )
    }

    /// Apply several expense deltas in order.
    pub fn apply_expense_deltas(&self, deltas: &[ExpenseDelta]) -> Self {
        deltas.iter().fold(self.clone(), |ctx, delta| {
            ctx.apply_expense_delta(&delta.category, delta.monthly_delta)
        })
    }

    /// Shift one asset class's allocation percentage.
    ///
    /// Floors at zero and drops the class there; other classes are left
    /// as-is, so the total need not stay at 100.
    pub fn apply_asset_delta(&self, asset_class: &str, delta_pct: f64) -> Self {
        let mut allocation = self.asset_allocation.clone();
        let wanted = asset_class.trim();

        match allocation
            .iter()
            .position(|(name, _)| name.eq_ignore_ascii_case(wanted))
        {
            Some(idx) => {
                let after = (allocation[idx].1 + delta_pct).max(0.0);
                if after == 0.0 {
                    allocation.remove(idx);
                } else {
                    allocation[idx].1 = after;
                }
            }
            None => {
                if delta_pct > 0.0 {
                    allocation.push((wanted.to_string(), delta_pct));
                }
            }
        }

        Self::assemble(
            self.income,
            self.total_expenses,
            self.expense_categories.clone(),
            allocation,
            self.current_savings,
        )
    }
}

fn derive_metrics(income: f64, expenses: f64, savings: Option<f64>) -> DerivedMetrics {
    let (savings_rate, expense_ratio) = if income > 0.0 {
        ((income - expenses) / income, expenses / income)
    } else {
        (0.0, 0.0)
    };

    let months_coverage = match savings {
        Some(s) if s > 0.0 && expenses > 0.0 => s / expenses,
        _ => 0.0,
    };

    DerivedMetrics {
        savings_rate,
        expense_ratio,
        months_coverage,
    }
}

fn ensure_finite(field: &str, value: f64) -> Result<()> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(OrchestrationError::ContextError(format!(
            "{} must be a finite number",
            field
        )))
    }
}
