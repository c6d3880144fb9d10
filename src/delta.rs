//! Free-text scenario delta grammar
//!
//! Parses confirmation replies such as `Transport +1500`, `-$200 in Dining`
//! or `Stocks -10%`. One delta per non-empty line.

use lazy_static::lazy_static;
use regex::Regex;

use crate::models::{AssetDelta, ExpectedSchema, ExpenseDelta, ParsedConfirmation, ScenarioDelta};

lazy_static! {
    static ref NUMBER: Regex =
        Regex::new(r"([+-])?\s*\$?\s*(\d{1,3}(?:,\d{3})+(?:\.\d+)?|\d+(?:\.\d+)?)\s*%?")
            .expect("valid delta number regex");
    static ref NON_WORD: Regex = Regex::new(r"[\d$%+\-./]+").expect("valid separator regex");
}

const KNOWN_EXPENSE_CATEGORIES: &[&str] = &[
    "housing",
    "rent",
    "mortgage",
    "food",
    "groceries",
    "transportation",
    "transport",
    "car",
    "utilities",
    "health",
    "insurance",
    "entertainment",
    "shopping",
    "other",
    "misc",
    "education",
    "travel",
    "dining",
    "subscription",
];

const EXPENSE_FILLER: &[&str] = &["add", "to", "in", "for", "per", "month", "mo", "a", "the", "on"];

const KNOWN_ASSET_CLASSES: &[&str] = &["real estate", "stocks", "bonds", "cash", "equities", "other"];

const ASSET_FILLER: &[&str] = &["reduce", "increase", "by", "to", "in", "my"];

/// Parse a confirmation reply according to the pending schema.
pub fn parse_confirmation(text: &str, schema: ExpectedSchema) -> Option<ParsedConfirmation> {
    match schema {
        ExpectedSchema::ExpenseCategories => None,
        ExpectedSchema::AssetChange => {
            parse_asset_delta(text).map(|d| ParsedConfirmation::Single(ScenarioDelta::Asset(d)))
        }
        ExpectedSchema::ExpenseDelta | ExpectedSchema::CategoryAdjustment => {
            let mut deltas = parse_expense_deltas(text);
            match deltas.len() {
                0 => None,
                1 => deltas
                    .pop()
                    .map(|d| ParsedConfirmation::Single(ScenarioDelta::Expense(d))),
                _ => Some(ParsedConfirmation::Multi(deltas)),
            }
        }
    }
}

/// One expense delta per line; lines that do not parse are skipped.
pub fn parse_expense_deltas(text: &str) -> Vec<ExpenseDelta> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .filter_map(parse_expense_delta)
        .collect()
}

pub fn parse_expense_delta(line: &str) -> Option<ExpenseDelta> {
    let amount = extract_number(line)?;
    let lowered = line.to_lowercase();

    let category = KNOWN_EXPENSE_CATEGORIES
        .iter()
        .find(|known| contains_word(&lowered, known))
        .map(|known| title_case(known))
        .or_else(|| first_word(&lowered, 3, EXPENSE_FILLER))?;

    Some(ExpenseDelta {
        category,
        monthly_delta: amount,
    })
}

pub fn parse_asset_delta(text: &str) -> Option<AssetDelta> {
    let line = text.lines().map(str::trim).find(|l| !l.is_empty())?;
    let pct = extract_number(line)?;
    let lowered = line.to_lowercase();

    let asset_class = KNOWN_ASSET_CLASSES
        .iter()
        .find(|known| contains_word(&lowered, known))
        .map(|known| title_case(known))
        .or_else(|| first_word(&lowered, 2, ASSET_FILLER))?;

    Some(AssetDelta {
        asset_class,
        allocation_delta_pct: pct,
    })
}

/// True when the text carries a digit plus a sign, currency or percent marker.
pub fn has_structured_delta(text: &str) -> bool {
    text.chars().any(|c| c.is_ascii_digit()) && text.contains(['+', '-', '$', '%'])
}

fn extract_number(line: &str) -> Option<f64> {
    let caps = NUMBER.captures(line)?;
    let magnitude = caps.get(2)?.as_str().replace(',', "").parse::<f64>().ok()?;
    let signed = match caps.get(1).map(|m| m.as_str()) {
        Some("-") => -magnitude,
        _ => magnitude,
    };
    Some(signed).filter(|n| n.is_finite())
}

fn contains_word(haystack: &str, word: &str) -> bool {
    haystack
        .match_indices(word)
        .any(|(idx, _)| {
            let before = haystack[..idx].chars().next_back();
            let after = haystack[idx + word.len()..].chars().next();
            !before.map_or(false, char::is_alphanumeric) && !after.map_or(false, char::is_alphanumeric)
        })
}

fn first_word(lowered: &str, min_len: usize, filler: &[&str]) -> Option<String> {
    NON_WORD
        .replace_all(lowered, " ")
        .split_whitespace()
        .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric()))
        .find(|w| w.chars().count() >= min_len && !filler.contains(w))
        .map(title_case)
}

fn title_case(word: &str) -> String {
    word.split(' ')
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}
