//! Prompt building and deterministic response composition

use std::collections::BTreeMap;

use crate::models::Finding;

pub const NO_FINDINGS_MESSAGE: &str = "Your financial metrics are within typical guidelines. No specific risk areas were identified at this time.";

/// Returned instead of raw output when fallback mode rejects a generation.
pub const FALLBACK_STUB_MESSAGE: &str = "Based on the analysis provided, consider reflecting on your financial patterns. What patterns do you notice? What would you like to explore further?";

const SAFETY_PREAMBLE: &str = "You are a financial education assistant. Do NOT give advice, recommendations, or prescriptions. \
Only summarize, paraphrase, or ask reflective questions about the analysis below. \
Never tell the user what they should, must or need to do, and never suggest buying, selling or investing in anything.";

fn findings_block(findings: &[Finding]) -> String {
    if findings.is_empty() {
        return "No risk findings.".to_string();
    }
    findings
        .iter()
        .map(|f| format!("- {}: {} risk - {}", f.dimension, f.severity, f.reason))
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn summary_prompt(findings: &[Finding], education: &BTreeMap<String, String>) -> String {
    let mut prompt = format!("{}\n\nAnalysis findings:\n{}", SAFETY_PREAMBLE, findings_block(findings));
    if !education.is_empty() {
        prompt.push_str("\n\nEducational context:\n");
        for (dimension, text) in education {
            prompt.push_str(&format!("- {}: {}\n", dimension, text));
        }
    }
    prompt.push_str("\nWrite a short, neutral summary of these findings and end with one reflective question.");
    prompt
}

pub fn explanation_prompt(findings: &[Finding], question: &str, run_label: &str) -> String {
    format!(
        "{}\n\nThe user is asking about a previous {}.\nFindings:\n{}\n\nUser question: {}\n\n\
         Paraphrase what the findings mean in plain language. Do not introduce new numbers.",
        SAFETY_PREAMBLE,
        run_label,
        findings_block(findings),
        question
    )
}

/// Text used whenever no valid generative output exists.
pub fn compose_response(findings: &[Finding], education: &BTreeMap<String, String>) -> String {
    let mut sections = Vec::new();

    let lines: Vec<String> = findings
        .iter()
        .filter(|f| !f.is_invalid())
        .map(|f| format!("  - {}: {} risk - {}", f.dimension, f.severity, f.reason))
        .collect();
    if !lines.is_empty() {
        sections.push(format!("Analysis:\n{}", lines.join("\n")));
    }

    // education follows finding order, one entry per dimension
    let mut seen = Vec::new();
    let mut notes = Vec::new();
    for finding in findings {
        if seen.contains(&finding.dimension.as_str()) {
            continue;
        }
        seen.push(finding.dimension.as_str());
        if let Some(text) = education.get(&finding.dimension) {
            notes.push(format!("  {}: {}", finding.dimension, text));
        }
    }
    if !notes.is_empty() {
        sections.push(format!("Education:\n{}", notes.join("\n")));
    }

    if sections.is_empty() {
        NO_FINDINGS_MESSAGE.to_string()
    } else {
        sections.join("\n\n")
    }
}

/// Deterministic stand-in for a generative explanation of a past run.
pub fn paraphrase_findings(findings: &[Finding]) -> String {
    let relevant: Vec<&Finding> = findings.iter().filter(|f| !f.is_invalid()).collect();
    if relevant.is_empty() {
        return "That analysis did not flag any risk areas; the metrics were within typical guidelines.".to_string();
    }

    let mut text = String::from("Here is what that analysis found:\n");
    for f in relevant {
        text.push_str(&format!(
            "- {} was rated {} because: {}.\n",
            f.dimension,
            f.severity,
            f.reason.to_lowercase()
        ));
    }
    text.push_str("Which of these would you like to look at more closely?");
    text
}
