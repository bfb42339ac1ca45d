//! Accumulator for step outputs received during one streaming session

use serde_json::{json, Map, Value};

/// Step that produces the first-pass analysis
pub const STEP_INITIAL_ANALYSIS: &str = "initial_analysis";
/// Rule-based scoring step, recorded as a workflow step
pub const STEP_DECISION_ENGINE: &str = "decision_engine";
/// Step that produces the closing summary
pub const STEP_SYNTHESIS: &str = "synthesis";

pub const DECISION_ENGINE_DESCRIPTION: &str = "Applied the rule-based decision engine";
pub const DECISION_ENGINE_REASONING: &str =
    "Scored the structured ingredient signals against the decision rules";

/// Output gathered so far. Owned by exactly one session.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PartialResult {
    initial_analysis: Option<Value>,
    workflow_steps: Vec<Value>,
    synthesis: Option<Value>,
    steps_completed: usize,
}

impl PartialResult {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge the output of a completed step.
    ///
    /// Unrecognized step names are kept as generic workflow steps.
    pub fn merge(&mut self, name: &str, result: Value) {
        match name {
            STEP_INITIAL_ANALYSIS => self.initial_analysis = Some(result),
            STEP_SYNTHESIS => self.synthesis = Some(result),
            STEP_DECISION_ENGINE => self.workflow_steps.push(json!({
                "action": STEP_DECISION_ENGINE,
                "description": DECISION_ENGINE_DESCRIPTION,
                "reasoning": DECISION_ENGINE_REASONING,
                "result": result,
            })),
            other => {
                tracing::debug!(step = %other, "Keeping unrecognized step as generic workflow step");
                self.workflow_steps.push(json!({
                    "action": other,
                    "description": format!("Completed {}", other),
                    "reasoning": "",
                    "result": result,
                }));
            }
        }
        self.steps_completed += 1;
    }

    pub fn initial_analysis(&self) -> Option<&Value> {
        self.initial_analysis.as_ref()
    }

    pub fn workflow_steps(&self) -> &[Value] {
        &self.workflow_steps
    }

    pub fn synthesis(&self) -> Option<&Value> {
        self.synthesis.as_ref()
    }

    /// Number of step outputs merged so far
    pub fn steps_completed(&self) -> usize {
        self.steps_completed
    }

    /// Workflow-shaped payload built from what has been received
    pub fn to_raw(&self) -> Value {
        let mut obj = Map::new();
        if let Some(initial) = &self.initial_analysis {
            obj.insert(STEP_INITIAL_ANALYSIS.to_string(), initial.clone());
        }
        obj.insert(
            "workflow_steps".to_string(),
            Value::Array(self.workflow_steps.clone()),
        );
        if let Some(synthesis) = &self.synthesis {
            obj.insert(STEP_SYNTHESIS.to_string(), synthesis.clone());
        }
        obj.insert("total_steps".to_string(), json!(self.steps_completed));
        Value::Object(obj)
    }
}
