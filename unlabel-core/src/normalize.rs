//! Result normalization
//!
//! Every payload the service returns passes through [`normalize`] before it
//! reaches the transcript. The output satisfies the full canonical schema:
//! every list is present (possibly empty) and every scalar has a value, so
//! consumers never branch on absence.
//!
//! Missing, empty, or wrongly typed fields are repaired with the defaults
//! below. The only rejection is a payload that belongs to the other result
//! family altogether, reported as [`Error::ShapeMismatch`].

use serde_json::{Map, Value};

use crate::error::{Error, Result};
use crate::types::{
    CanonicalResult, Confidence, ConsumerExplanation, DecisionResult, IngredientTranslation,
    InitialAnalysis, Intent, QuickInsight, ResultShape, Synthesis, TradeOffs, WorkflowResult,
    WorkflowStep,
};

pub const DEFAULT_SUMMARY: &str = "Analysis complete.";
pub const DEFAULT_WHEN_IT_MAKES_SENSE: &str = "Consider your individual dietary needs.";
pub const DEFAULT_WHAT_TO_KNOW: &str = "This analysis is informational.";
pub const DEFAULT_REASONING: &str = "Product analyzed.";
pub const DEFAULT_EXECUTIVE_SUMMARY: &str = "Analysis completed.";
pub const DEFAULT_CATEGORY: &str = "other";
pub const DEFAULT_STEP_ACTION: &str = "step";

/// Top-level fields that only appear in decision results
const DECISION_SIGNATURE: &[&str] = &["quick_insight", "intent_classified", "explanation"];

/// Top-level fields that only appear in workflow results
const WORKFLOW_SIGNATURE: &[&str] = &["initial_analysis", "workflow_steps", "synthesis"];

/// Top-level fields of the retired single-shot analysis format
const LEGACY_SIGNATURE: &[&str] = &["insight", "trade_offs"];

/// Normalize a raw payload into the canonical result of the expected shape
pub fn normalize(shape: ResultShape, raw: &Value) -> Result<CanonicalResult> {
    match shape {
        ResultShape::Decision => normalize_decision(raw).map(CanonicalResult::Decision),
        ResultShape::Workflow => normalize_workflow(raw).map(CanonicalResult::Workflow),
    }
}

pub fn normalize_decision(raw: &Value) -> Result<DecisionResult> {
    let root = root_object(ResultShape::Decision, raw)?;

    let insight = child(root, "quick_insight");
    let explanation = child(root, "explanation");

    let intent_classified = match text(root, "intent_classified") {
        Some(value) => value.parse::<Intent>().unwrap_or_else(|_| {
            tracing::debug!(intent = %value, "Unrecognized intent, using default");
            Intent::default()
        }),
        None => Intent::default(),
    };

    Ok(DecisionResult {
        quick_insight: QuickInsight {
            summary: text_or(insight, "summary", DEFAULT_SUMMARY),
            uncertainty_reason: text(insight, "uncertainty_reason"),
        },
        explanation: ConsumerExplanation {
            why_this_matters: strings(explanation, "why_this_matters"),
            when_it_makes_sense: text_or(
                explanation,
                "when_it_makes_sense",
                DEFAULT_WHEN_IT_MAKES_SENSE,
            ),
            what_to_know: text_or(explanation, "what_to_know", DEFAULT_WHAT_TO_KNOW),
        },
        intent_classified,
        key_signals: strings(root, "key_signals"),
        ingredient_translations: objects(root, "ingredient_translations")
            .map(|item| IngredientTranslation {
                term: text_or(Some(item), "term", ""),
                simple_explanation: text_or(Some(item), "simple_explanation", ""),
                category: text_or(Some(item), "category", DEFAULT_CATEGORY),
            })
            .collect(),
        uncertainty_flags: strings(root, "uncertainty_flags"),
        structured_analysis: root
            .and_then(|obj| obj.get("structured_analysis"))
            .filter(|value| value.is_object())
            .cloned(),
    })
}

pub fn normalize_workflow(raw: &Value) -> Result<WorkflowResult> {
    let root = root_object(ResultShape::Workflow, raw)?;

    let initial = child(root, "initial_analysis");
    let trade_offs = child(initial, "trade_offs");
    let synthesis = child(root, "synthesis");

    let workflow_steps: Vec<WorkflowStep> = root
        .and_then(|obj| obj.get("workflow_steps"))
        .and_then(Value::as_array)
        .map(|items| items.iter().map(normalize_step).collect())
        .unwrap_or_default();

    let total_steps = root
        .and_then(|obj| obj.get("total_steps"))
        .and_then(Value::as_u64)
        .map(|n| n as usize)
        .unwrap_or(workflow_steps.len());

    let confidence_level = match text(synthesis, "confidence_level") {
        Some(value) => value.parse::<Confidence>().unwrap_or_else(|_| {
            tracing::debug!(confidence = %value, "Unrecognized confidence level, using default");
            Confidence::default()
        }),
        None => Confidence::default(),
    };

    Ok(WorkflowResult {
        initial_analysis: InitialAnalysis {
            insight: text_or(initial, "insight", DEFAULT_SUMMARY),
            detailed_reasoning: text_or(initial, "detailed_reasoning", DEFAULT_REASONING),
            trade_offs: TradeOffs {
                pros: strings(trade_offs, "pros"),
                cons: strings(trade_offs, "cons"),
            },
            key_takeaways: strings(initial, "key_takeaways"),
            uncertainty_note: text(initial, "uncertainty_note"),
            extracted_text: text(initial, "extracted_text"),
        },
        workflow_steps,
        synthesis: Synthesis {
            executive_summary: text_or(synthesis, "executive_summary", DEFAULT_EXECUTIVE_SUMMARY),
            key_takeaways: strings(synthesis, "key_takeaways"),
            confidence_level,
            next_steps: strings(synthesis, "next_steps"),
        },
        total_steps,
    })
}

/// Steps that are not objects are kept as opaque results so nothing is lost.
fn normalize_step(item: &Value) -> WorkflowStep {
    match item.as_object() {
        Some(obj) => WorkflowStep {
            action: text_or(Some(obj), "action", DEFAULT_STEP_ACTION),
            description: text_or(Some(obj), "description", ""),
            reasoning: text_or(Some(obj), "reasoning", ""),
            result: obj.get("result").cloned().unwrap_or(Value::Null),
        },
        None => WorkflowStep {
            action: DEFAULT_STEP_ACTION.to_string(),
            description: String::new(),
            reasoning: String::new(),
            result: item.clone(),
        },
    }
}

/// Resolve the top-level object, rejecting foreign result families.
///
/// `null` is treated as an absent result and yields `Ok(None)`.
fn root_object(shape: ResultShape, raw: &Value) -> Result<Option<&Map<String, Value>>> {
    let obj = match raw {
        Value::Null => return Ok(None),
        Value::Object(obj) => obj,
        other => {
            return Err(Error::ShapeMismatch {
                expected: shape,
                found: format!("a JSON {}", json_kind(other)),
            })
        }
    };

    let foreign: &[(&str, &[&str])] = match shape {
        ResultShape::Decision => &[("workflow", WORKFLOW_SIGNATURE), ("legacy", LEGACY_SIGNATURE)],
        ResultShape::Workflow => &[("decision", DECISION_SIGNATURE), ("legacy", LEGACY_SIGNATURE)],
    };

    for (family, signature) in foreign {
        let present: Vec<&str> = signature
            .iter()
            .copied()
            .filter(|key| obj.contains_key(*key))
            .collect();
        if !present.is_empty() {
            return Err(Error::ShapeMismatch {
                expected: shape,
                found: format!("{} fields ({})", family, present.join(", ")),
            });
        }
    }

    Ok(Some(obj))
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn child<'a>(obj: Option<&'a Map<String, Value>>, key: &str) -> Option<&'a Map<String, Value>> {
    obj?.get(key)?.as_object()
}

/// Non-empty string field
fn text(obj: Option<&Map<String, Value>>, key: &str) -> Option<String> {
    obj?.get(key)?
        .as_str()
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn text_or(obj: Option<&Map<String, Value>>, key: &str, default: &str) -> String {
    text(obj, key).unwrap_or_else(|| default.to_string())
}

/// String items of a list field; other items are skipped
fn strings(obj: Option<&Map<String, Value>>, key: &str) -> Vec<String> {
    obj.and_then(|o| o.get(key))
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

fn objects<'a>(
    obj: Option<&'a Map<String, Value>>,
    key: &str,
) -> impl Iterator<Item = &'a Map<String, Value>> {
    obj.and_then(|o| o.get(key))
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(Value::as_object)
}
