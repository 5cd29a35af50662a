use std::sync::Mutex;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde_json::json;

use crate::engine::llm_client::{GenerativeService, Purpose, SamplingParams};
use crate::error::ServiceError;

const CANNED_REPLIES: &[&str] = &[
    "嗯……我听到了，我需要一点时间想一想。",
    "我不知道怎么说，你能先听我讲完吗？",
    "还行吧。你为什么突然问这个？",
    "（低着头）我已经很努力了。",
    "我现在不想说，可以晚点再聊吗？",
];

/// Local stand-in for the generative service, for demos without network or credentials.
///
/// Replies have the same shape as the real service's: free text for generation,
/// a complete evaluation object for evaluation.
pub struct OfflineService {
    rng: Mutex<StdRng>,
}

impl OfflineService {
    pub fn new() -> Self {
        Self {
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }
}

impl Default for OfflineService {
    fn default() -> Self {
        Self::new()
    }
}

impl GenerativeService for OfflineService {
    fn invoke(&self, _prompt: &str, params: &SamplingParams) -> Result<String, ServiceError> {
        let mut rng = self.rng.lock().unwrap_or_else(|poisoned| poisoned.into_inner());

        let reply = match params.purpose {
            Purpose::Generation => CANNED_REPLIES
                .choose(&mut *rng)
                .copied()
                .unwrap_or(CANNED_REPLIES[0])
                .to_string(),
            Purpose::Evaluation => {
                let score: u8 = rng.gen_range(50..=75);
                let evaluation = json!({
                    "evaluation_score": score,
                    "reason_analysis": "（离线模式）父母回应需要改进，缺乏对孩子人格特质和核心需求的深入理解。沟通方式有待提升。",
                    "parent_input_analysis": {
                        "recognized_trait": "无",
                        "recognized_need": "无",
                        "communication_style": "一般询问式，缺乏针对性",
                        "positive_aspects": ["尝试沟通"],
                        "areas_for_improvement": [
                            "需要更好地理解孩子的人格特质",
                            "缺乏针对性的回应",
                            "需要更有同理心"
                        ]
                    },
                    "child_desired_response": "（理想回应）谢谢你，给我点时间，我很快就会告诉你我的想法。",
                    "child_desired_response_inner_monologue": "（内心独白）我希望爸爸妈妈能先听听我的感受。"
                });
                format!("```json\n{evaluation:#}\n```")
            }
        };

        tracing::debug!(purpose = params.purpose.as_str(), "Offline reply");
        Ok(reply)
    }
}
