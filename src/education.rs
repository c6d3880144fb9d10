//! Static educational content keyed by finding dimension

use std::collections::BTreeMap;

use crate::models::Finding;

pub fn lookup(dimension: &str) -> Option<&'static str> {
    let text = match dimension {
        "Savings" => {
            "Building savings is important for financial security. Experts generally \
             recommend saving at least 20% of income when possible. A lower savings rate \
             leaves less room to absorb unexpected costs."
        }
        "ExpenseRatio" => {
            "Your expense ratio shows what portion of income goes to expenses. A high ratio \
             may limit flexibility. Tracking expenses over a few months can reveal which \
             costs are fixed and which vary."
        }
        "ExpenseConcentration" => {
            "When one category takes up a large share of spending, changes in that single \
             cost have an outsized effect on your budget. Housing is often the largest \
             category, and a common guideline keeps it near a third of income."
        }
        "AssetConcentration" => {
            "Diversification spreads holdings across asset classes that tend to behave \
             differently. A portfolio weighted heavily toward one class moves closely with \
             that class alone."
        }
        "Liquidity" => {
            "An emergency fund is savings set aside for unexpected events such as job loss \
             or repairs. Many guidelines describe three to six months of expenses as a \
             typical cushion."
        }
        "Input" => {
            "Valid financial input requires positive income and non-negative expenses. \
             Please check that the figures were entered correctly."
        }
        _ => return None,
    };
    Some(text)
}

/// Education text for every dimension present in `findings`.
pub fn for_findings(findings: &[Finding]) -> BTreeMap<String, String> {
    findings
        .iter()
        .filter_map(|f| lookup(&f.dimension).map(|text| (f.dimension.clone(), text.to_string())))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generation::validate_output;

    #[test]
    fn test_every_dimension_has_content() {
        for dimension in [
            "Savings",
            "ExpenseRatio",
            "ExpenseConcentration",
            "AssetConcentration",
            "Liquidity",
            "Input",
        ] {
            assert!(lookup(dimension).is_some(), "missing {}", dimension);
        }
        assert!(lookup("Unknown").is_none());
    }

    #[test]
    fn test_content_passes_output_safety() {
        for dimension in [
            "Savings",
            "ExpenseRatio",
            "ExpenseConcentration",
            "AssetConcentration",
            "Liquidity",
            "Input",
        ] {
            let report = validate_output(lookup(dimension).unwrap_or_default());
            assert!(report.valid, "{}: {:?}", dimension, report.issues);
        }
    }
}
