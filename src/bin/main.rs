use financial_coach_orchestrator::{
    models::{AssetAllocationEntry, ExpenseCategory, FinancialInput},
    ChatResponse, ChatTurn, CoachServices,
};
use tracing::info;

fn demo_input() -> FinancialInput {
    let categories = [
        ("Housing", 2200.0),
        ("Food", 900.0),
        ("Transport", 600.0),
        ("Utilities", 400.0),
        ("Entertainment", 500.0),
    ];
    FinancialInput {
        monthly_income: 6000.0,
        monthly_expenses: None,
        expense_categories: categories
            .iter()
            .map(|(category, amount)| ExpenseCategory {
                category: category.to_string(),
                amount: *amount,
            })
            .collect(),
        asset_allocation: vec![
            AssetAllocationEntry {
                asset_class: "Stocks".to_string(),
                allocation_pct: 70.0,
            },
            AssetAllocationEntry {
                asset_class: "Bonds".to_string(),
                allocation_pct: 30.0,
            },
        ],
        current_savings: Some(8000.0),
    }
}

fn print_response(user: &str, response: &ChatResponse) {
    println!("\nUSER: {}", user);
    println!(
        "COACH [{:?} / {:?}]: {}",
        response.trace.action_taken, response.message_type, response.assistant_message
    );
    for item in &response.analysis {
        match &item.scenario_impact {
            Some(impact) if impact.changed => println!(
                "  - {}: {} (baseline: {:?})",
                item.dimension, item.severity, impact.baseline_severity
            ),
            _ => println!("  - {}: {}", item.dimension, item.severity),
        }
    }
    if let Some(run_id) = &response.run_id {
        println!("  run: {}", run_id);
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .init();

    info!("Financial Coach Orchestrator demo starting");

    let services = CoachServices::deterministic();
    let orchestrator = services.orchestrator.clone();

    let script: Vec<(&str, Option<FinancialInput>)> = vec![
        ("Can you analyze my finances?", None),
        ("Here is my budget", Some(demo_input())),
        ("Why is that?", None),
        ("What if I buy a car?", None),
        ("Transport +900", None),
        ("What if Dining +300 and compare", None),
        ("Explain that", None),
    ];

    let mut conversation_id: Option<String> = None;
    for (message, input) in script {
        let mut turn = ChatTurn::new(message);
        turn.conversation_id = conversation_id.clone();
        turn.input = input;

        let response = orchestrator.chat(turn).await;
        print_response(message, &response);
        conversation_id = Some(response.conversation_id);
    }

    if let Some(id) = conversation_id {
        if let Some(state) = orchestrator.conversation(&id).await? {
            println!("\n=== CONVERSATION {} ===", id);
            println!("Turns: {}", state.turns.len());
            println!("Last run type: {:?}", state.last_run_type);
            if let Some(baseline) = state.baseline_input() {
                println!("Baseline expenses: {:.0}", baseline.category_total());
            }
        }
    }

    println!("Recorded runs: {}", services.runs.list().await.len());
    Ok(())
}
