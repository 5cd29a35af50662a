use serde::{Deserialize, Serialize};
use serde_json::Number;

/// How the evaluator read the parent's utterance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParentInputAnalysis {
    pub recognized_trait: String,
    pub recognized_need: String,
    pub communication_style: String,
    pub positive_aspects: Vec<String>,
    pub areas_for_improvement: Vec<String>,
}

/// Structured verdict on one parent utterance.
///
/// Every field is always populated, whether the values came from the
/// evaluation service or from the deterministic fallback.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationResult {
    /// 0-100 rubric score, passed through as the service wrote it.
    pub evaluation_score: Number,
    pub reason_analysis: String,
    pub parent_input_analysis: ParentInputAnalysis,
    pub child_desired_response: String,
    pub child_desired_response_inner_monologue: String,
}

impl EvaluationResult {
    /// Signed -10..=10 impact derived from the absolute score.
    /// 70 is neutral; every 3 points away moves the impact by one.
    pub fn impact(&self) -> f64 {
        let score = self.evaluation_score.as_f64().unwrap_or(70.0);
        ((score - 70.0) / 3.0).clamp(-10.0, 10.0)
    }
}

/// What `simulate_dialogue` hands back to the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationResult {
    pub child_response: String,

    #[serde(flatten)]
    pub evaluation: EvaluationResult,
}
