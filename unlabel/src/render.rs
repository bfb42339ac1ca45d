//! Plain-text rendering of transcript turns for the terminal

use unlabel_core::{
    CanonicalResult, ConversationTurn, DecisionResult, TurnPayload, WorkflowResult,
};

/// Render one turn as the lines printed after an answer
pub fn render_turn(turn: &ConversationTurn) -> String {
    match &turn.payload {
        TurnPayload::Text { text } => text.clone(),
        TurnPayload::Image {
            file_name,
            media_type,
            byte_len,
        } => format!("[image] {} ({}, {} bytes)", file_name, media_type, byte_len),
        TurnPayload::Result { result } => render_result(result),
        TurnPayload::Error { message, .. } => format!("! {}", message),
    }
}

fn render_result(result: &CanonicalResult) -> String {
    let mut out = Vec::new();
    match result {
        CanonicalResult::Decision(decision) => render_decision(decision, &mut out),
        CanonicalResult::Workflow(workflow) => render_workflow(workflow, &mut out),
    }
    out.join("\n")
}

fn render_decision(decision: &DecisionResult, out: &mut Vec<String>) {
    out.push(decision.quick_insight.summary.clone());
    if let Some(reason) = &decision.quick_insight.uncertainty_reason {
        out.push(format!("  (uncertain: {})", reason));
    }

    section(out, "Why this matters", &decision.explanation.why_this_matters);
    out.push(String::new());
    out.push(format!(
        "When it makes sense: {}",
        decision.explanation.when_it_makes_sense
    ));
    out.push(format!("What to know: {}", decision.explanation.what_to_know));

    section(out, "Key signals", &decision.key_signals);

    if !decision.ingredient_translations.is_empty() {
        out.push(String::new());
        out.push("Ingredients:".to_string());
        for t in &decision.ingredient_translations {
            out.push(format!(
                "  - {} [{}]: {}",
                t.term, t.category, t.simple_explanation
            ));
        }
    }

    section(out, "Uncertain", &decision.uncertainty_flags);
}

fn render_workflow(workflow: &WorkflowResult, out: &mut Vec<String>) {
    let synthesis = &workflow.synthesis;
    let initial = &workflow.initial_analysis;

    out.push(synthesis.executive_summary.clone());
    out.push(format!(
        "  confidence: {}, {} step(s)",
        synthesis.confidence_level.as_str(),
        workflow.total_steps
    ));

    out.push(String::new());
    out.push(initial.insight.clone());
    out.push(initial.detailed_reasoning.clone());
    if let Some(note) = &initial.uncertainty_note {
        out.push(format!("  (uncertain: {})", note));
    }

    section(out, "Pros", &initial.trade_offs.pros);
    section(out, "Cons", &initial.trade_offs.cons);
    section(out, "Key takeaways", &synthesis.key_takeaways);

    if !workflow.workflow_steps.is_empty() {
        out.push(String::new());
        out.push("Steps:".to_string());
        for (i, step) in workflow.workflow_steps.iter().enumerate() {
            out.push(format!("  {}. {}: {}", i + 1, step.action, step.description));
        }
    }

    section(out, "Next steps", &synthesis.next_steps);

    if let Some(text) = &initial.extracted_text {
        out.push(String::new());
        out.push(format!("Label text: {}", text));
    }
}

fn section(out: &mut Vec<String>, title: &str, items: &[String]) {
    if items.is_empty() {
        return;
    }
    out.push(String::new());
    out.push(format!("{}:", title));
    out.extend(items.iter().map(|item| format!("  - {}", item)));
}
