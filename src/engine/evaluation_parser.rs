use serde_json::{Map, Number, Value};

use crate::model::evaluation::{EvaluationResult, ParentInputAnalysis};
use crate::model::profile::{ChallengeContext, PersonalityProfile};

/// Score used when a decoded evaluation omits `evaluation_score`.
pub const DEFAULT_SCORE: i64 = 75;
/// Score of the synthesized evaluation when the output cannot be decoded.
pub const FALLBACK_SCORE: i64 = 65;
/// Stands in for a missing trait, need or tag.
pub const NONE_LITERAL: &str = "无";

const DEFAULT_REASON: &str = "评估分析";
const DEFAULT_STYLE: &str = "未知";
const DEFAULT_DESIRED_RESPONSE: &str = "理想回应";
const DEFAULT_INNER_MONOLOGUE: &str = "内心独白";

/// Why the service output could not be read as an evaluation object.
#[derive(Debug)]
struct MalformedOutput(String);

/// Turn normalized evaluation output into a complete `EvaluationResult`.
///
/// Never fails: undecodable output is replaced by a fallback derived from
/// the personality, and missing fields are back-filled with defaults.
pub fn parse_evaluation(
    normalized: &str,
    personality: &PersonalityProfile,
    challenge: &ChallengeContext,
) -> EvaluationResult {
    match decode_object(normalized) {
        Ok(object) => from_object(&object),
        Err(MalformedOutput(reason)) => {
            tracing::warn!(
                personality = %personality.name,
                challenge = %challenge.name,
                "Evaluation output is not a JSON object ({}); using fallback evaluation",
                reason
            );
            fallback_evaluation(personality)
        }
    }
}

/// Deterministic, schema-complete evaluation built only from the personality.
pub fn fallback_evaluation(personality: &PersonalityProfile) -> EvaluationResult {
    let core_need = personality.core_need();

    EvaluationResult {
        evaluation_score: Number::from(FALLBACK_SCORE),
        reason_analysis: "父母回应需要改进，缺乏对孩子人格特质和核心需求的深入理解".into(),
        parent_input_analysis: ParentInputAnalysis {
            recognized_trait: personality.primary_tag().unwrap_or(NONE_LITERAL).to_string(),
            recognized_need: core_need.unwrap_or(NONE_LITERAL).to_string(),
            communication_style: "一般询问式".into(),
            positive_aspects: vec!["尝试沟通".into()],
            areas_for_improvement: vec![
                "需要更好地理解孩子的人格特质".into(),
                "缺乏针对性的回应".into(),
                "沟通方式需要改进".into(),
            ],
        },
        child_desired_response: DEFAULT_DESIRED_RESPONSE.into(),
        child_desired_response_inner_monologue: format!(
            "（内心独白）作为{}，我希望父母能更好地理解我的{}。",
            personality.name,
            core_need.unwrap_or("需求")
        ),
    }
}

fn decode_object(text: &str) -> Result<Map<String, Value>, MalformedOutput> {
    match serde_json::from_str::<Value>(text) {
        Ok(Value::Object(object)) => return Ok(object),
        Ok(other) => {
            return Err(MalformedOutput(format!(
                "expected an object, got {}",
                kind_of(&other)
            )))
        }
        Err(_) => {}
    }

    // Chatty models sometimes put prose around the object; retry on the outermost braces.
    let (Some(start), Some(end)) = (text.find('{'), text.rfind('}')) else {
        return Err(MalformedOutput("no JSON object found".into()));
    };
    if end <= start {
        return Err(MalformedOutput("no JSON object found".into()));
    }

    match serde_json::from_str::<Value>(&text[start..=end]) {
        Ok(Value::Object(object)) => {
            tracing::debug!("Recovered evaluation object from surrounding text");
            Ok(object)
        }
        Ok(other) => Err(MalformedOutput(format!(
            "expected an object, got {}",
            kind_of(&other)
        ))),
        Err(e) => Err(MalformedOutput(e.to_string())),
    }
}

fn from_object(object: &Map<String, Value>) -> EvaluationResult {
    let empty = Map::new();
    let analysis = match object.get("parent_input_analysis") {
        Some(Value::Object(analysis)) => analysis,
        _ => &empty,
    };

    EvaluationResult {
        evaluation_score: score_field(object.get("evaluation_score")),
        reason_analysis: text_field(object.get("reason_analysis"), DEFAULT_REASON),
        parent_input_analysis: ParentInputAnalysis {
            recognized_trait: text_field(analysis.get("recognized_trait"), NONE_LITERAL),
            recognized_need: text_field(analysis.get("recognized_need"), NONE_LITERAL),
            communication_style: text_field(analysis.get("communication_style"), DEFAULT_STYLE),
            positive_aspects: list_field(analysis.get("positive_aspects")),
            areas_for_improvement: list_field(analysis.get("areas_for_improvement")),
        },
        child_desired_response: text_field(
            object.get("child_desired_response"),
            DEFAULT_DESIRED_RESPONSE,
        ),
        child_desired_response_inner_monologue: text_field(
            object.get("child_desired_response_inner_monologue"),
            DEFAULT_INNER_MONOLOGUE,
        ),
    }
}

/// Numbers pass through untouched; numeric strings are accepted.
fn score_field(value: Option<&Value>) -> Number {
    match value {
        Some(Value::Number(n)) => n.clone(),
        Some(Value::String(s)) => {
            let s = s.trim().trim_end_matches('分').trim();
            s.parse::<i64>()
                .map(Number::from)
                .ok()
                .or_else(|| s.parse::<f64>().ok().and_then(Number::from_f64))
                .unwrap_or_else(|| Number::from(DEFAULT_SCORE))
        }
        _ => Number::from(DEFAULT_SCORE),
    }
}

fn text_field(value: Option<&Value>, default: &str) -> String {
    value
        .and_then(scalar_text)
        .unwrap_or_else(|| default.to_string())
}

fn list_field(value: Option<&Value>) -> Vec<String> {
    match value {
        Some(Value::Array(items)) => items.iter().filter_map(scalar_text).collect(),
        Some(other) => scalar_text(other).into_iter().collect(),
        None => Vec::new(),
    }
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
