use std::sync::Arc;

use financial_coach_orchestrator::agent::{ChatResponse, ChatTurn, CoachServices};
use financial_coach_orchestrator::capabilities::CapabilityRequest;
use financial_coach_orchestrator::config::AppConfig;
use financial_coach_orchestrator::execution::DEFAULT_NOOP_MESSAGE;
use financial_coach_orchestrator::generation::{GenerativeProvider, ScriptedProvider};
use financial_coach_orchestrator::models::{
    ActionType, ExpectedSchema, ExpenseCategory, FinancialInput, MessageType, RunType, Severity,
};
use financial_coach_orchestrator::planner::{PlannerStatus, CLARIFICATION_LIMIT_MESSAGE};

fn budget(income: f64, rows: &[(&str, f64)]) -> FinancialInput {
    FinancialInput {
        monthly_income: income,
        expense_categories: rows
            .iter()
            .map(|(category, amount)| ExpenseCategory {
                category: category.to_string(),
                amount: *amount,
            })
            .collect(),
        ..Default::default()
    }
}

fn five_thousand_budget() -> FinancialInput {
    budget(
        8000.0,
        &[("Housing", 2000.0), ("Food", 1500.0), ("Transport", 1000.0), ("Other", 500.0)],
    )
}

async fn say(services: &CoachServices, id: &str, message: &str) -> ChatResponse {
    services
        .orchestrator
        .chat(ChatTurn::new(message).in_conversation(id))
        .await
}

#[tokio::test]
async fn scenarios_never_touch_the_baseline() {
    let services = CoachServices::deterministic();
    let baseline = five_thousand_budget();

    let analysis = services
        .orchestrator
        .chat(
            ChatTurn::new("analyze my finances")
                .in_conversation("iso")
                .with_input(baseline.clone()),
        )
        .await;
    assert_eq!(analysis.trace.action_taken, Some(ActionType::RunAnalysis));
    assert!(analysis.run_id.is_some());
    assert!(analysis.analysis.is_empty());

    let question = say(&services, "iso", "what if I spend more").await;
    assert_eq!(question.message_type, MessageType::ClarifyingQuestion);
    assert_eq!(question.expected_schema, Some(ExpectedSchema::ExpenseDelta));

    let first = say(&services, "iso", "Transport +1500\nDining +500").await;
    assert_eq!(first.message_type, MessageType::ScenarioResult);
    assert_eq!(first.trace.context_before.as_ref().unwrap().total_expenses, 5000.0);
    assert_eq!(first.trace.context_after.as_ref().unwrap().total_expenses, 7000.0);
    assert!(first.trace.compare_baseline_run_id.is_some());
    assert_eq!(first.trace.clarification_attempt, 0);

    let dims: Vec<(&str, Severity)> = first
        .analysis
        .iter()
        .map(|a| (a.dimension.as_str(), a.severity))
        .collect();
    assert_eq!(dims, vec![("Savings", Severity::Medium), ("ExpenseRatio", Severity::Medium)]);

    say(&services, "iso", "what if I cut costs").await;
    let second = say(&services, "iso", "Transport +800").await;
    assert_eq!(second.message_type, MessageType::ScenarioResult);
    assert_eq!(second.trace.context_before.as_ref().unwrap().total_expenses, 5000.0);
    assert_eq!(second.trace.context_after.as_ref().unwrap().total_expenses, 5800.0);

    let state = services.orchestrator.conversation("iso").await.unwrap().unwrap();
    assert_eq!(state.baseline_input(), Some(&baseline));
    assert_eq!(state.last_run_type, Some(RunType::Scenario));
    assert_eq!(state.last_run_id, second.run_id);
    assert_eq!(state.turns.len(), 10);
}

#[tokio::test]
async fn explanation_names_the_run_type() {
    let services = CoachServices::deterministic();
    services
        .orchestrator
        .chat(
            ChatTurn::new("analyze my finances")
                .in_conversation("explain")
                .with_input(five_thousand_budget()),
        )
        .await;

    let baseline = say(&services, "explain", "why is that").await;
    assert_eq!(baseline.trace.action_taken, Some(ActionType::ExplainPrevious));
    assert!(baseline.assistant_message.starts_with("This was your baseline analysis."));

    say(&services, "explain", "what if I spend more").await;
    say(&services, "explain", "Transport +1500\nDining +500").await;

    let scenario = say(&services, "explain", "why is that").await;
    assert!(scenario
        .assistant_message
        .starts_with("This was a scenario comparison (what-if), not your baseline."));
    assert!(scenario.assistant_message.contains("Savings was rated medium"));
    assert!(scenario.run_id.is_some());
}

#[tokio::test]
async fn clarification_budget_is_shared_across_reasons() {
    let services = CoachServices::deterministic();

    let first = say(&services, "cap", "analyze").await;
    assert_eq!(first.trace.action_planner_status, Some(PlannerStatus::NeedCategories));

    let second = say(&services, "cap", "what if I buy a car").await;
    assert_eq!(second.trace.action_planner_status, Some(PlannerStatus::ConfirmationRetry));
    assert_eq!(second.trace.clarification_attempt, 2);

    let third = say(&services, "cap", "no idea").await;
    assert_eq!(third.trace.action_planner_status, Some(PlannerStatus::ClarificationLimit));
    assert_eq!(third.trace.action_taken, Some(ActionType::Noop));
    assert_eq!(third.assistant_message, CLARIFICATION_LIMIT_MESSAGE);
    assert!(third.run_id.is_none());

    // Completing an analysis closes the cycle.
    let done = services
        .orchestrator
        .chat(
            ChatTurn::new("analyze this")
                .in_conversation("cap")
                .with_input(five_thousand_budget()),
        )
        .await;
    assert!(done.run_id.is_some());
    assert_eq!(done.trace.clarification_attempt, 0);
}

#[tokio::test]
async fn no_question_after_the_budget_is_spent() {
    let services = CoachServices::deterministic();
    let script = ["analyze", "hmm", "hmm", "my savings", "my savings", "my savings"];

    let mut questions = 0;
    for message in script {
        let response = say(&services, "spent", message).await;
        if response.message_type == MessageType::ClarifyingQuestion {
            questions += 1;
        }
        assert!(response.trace.clarification_attempt <= 2);
    }
    assert_eq!(questions, 2);

    let last = say(&services, "spent", "my savings").await;
    assert_eq!(last.trace.action_planner_status, Some(PlannerStatus::ClarificationLimit));
    assert_eq!(last.assistant_message, CLARIFICATION_LIMIT_MESSAGE);
}

#[tokio::test]
async fn malformed_generative_plan_becomes_noop() {
    let provider: Arc<dyn GenerativeProvider> =
        Arc::new(ScriptedProvider::replying(&["Sure! I'd run the analysis now."]));
    let services = CoachServices::with_provider(Some(provider), &AppConfig::default());

    let response = services
        .orchestrator
        .chat(ChatTurn::new("tell me about stocks").with_capabilities(CapabilityRequest {
            agent: true,
            ..Default::default()
        }))
        .await;

    assert_eq!(response.trace.action_planner_status, Some(PlannerStatus::InvalidOrError));
    assert_eq!(response.trace.action_taken, Some(ActionType::Noop));
    assert_eq!(response.assistant_message, DEFAULT_NOOP_MESSAGE);
    assert!(response.run_id.is_none());
}

#[tokio::test]
async fn incomplete_categories_never_reach_the_tools() {
    let services = CoachServices::deterministic();
    let partial = FinancialInput {
        monthly_income: 6000.0,
        monthly_expenses: Some(4000.0),
        ..Default::default()
    };

    let response = services
        .orchestrator
        .chat(
            ChatTurn::new("analyze my finances")
                .in_conversation("partial")
                .with_input(partial),
        )
        .await;

    assert_eq!(response.message_type, MessageType::ClarifyingQuestion);
    assert!(response.trace.tools_executed.is_empty());
    assert!(services.runs.list().await.is_empty());
}
