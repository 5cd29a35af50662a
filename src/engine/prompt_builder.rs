use crate::model::message::DialogueTurn;
use crate::model::profile::{ChallengeContext, PersonalityProfile};

pub const NO_DESCRIPTION: &str = "无描述";
pub const NO_TRAITS: &str = "无特殊特征";
pub const NO_CORE_NEED: &str = "无";

/// Joins characteristic tags in the prompt text.
const TAG_DELIMITER: &str = "、";

/// Score bands of the evaluation rubric, highest first.
pub const SCORE_BANDS: &[(u8, u8, &str)] = &[
    (90, 100, "完美沟通，完全理解孩子需求，表达恰当，给予充分支持"),
    (80, 89, "良好沟通，基本理解孩子需求，表达较恰当"),
    (70, 79, "一般沟通，部分理解孩子需求，表达有待改进"),
    (60, 69, "较差沟通，缺乏对孩子需求的理解，表达不当"),
    (50, 59, "差沟通，忽视孩子需求，表达伤害性"),
    (40, 49, "很差沟通，完全忽视孩子需求，表达极具伤害性"),
    (30, 39, "极差沟通，对孩子造成心理伤害"),
];

/// Named negative behaviours and the points each one costs.
pub const DEDUCTIONS: &[(&str, u8)] = &[
    ("指责、批评", 15),
    ("忽视孩子人格特质", 10),
    ("忽视核心需求", 10),
    ("命令式语气", 8),
    ("缺乏同理心", 8),
    ("过度控制", 5),
    ("情绪化表达", 5),
];

/// Renders the two prompts sent to the generative service.
/// Only formats text: no networking, no parsing, no clock, no randomness.
pub struct PromptBuilder;

impl PromptBuilder {
    /// Prompt asking the service to answer in character as the child.
    pub fn build_generation(
        personality: &PersonalityProfile,
        challenge: &ChallengeContext,
        parent_utterance: &str,
    ) -> String {
        let mut prompt = String::new();

        prompt.push_str(&format!(
            "你是一个{}的孩子，正在经历{}这个挑战。\n\n",
            personality.name, challenge.name
        ));
        push_personality_section(&mut prompt, "人格特征：", personality);
        push_challenge_section(&mut prompt, challenge);
        prompt.push_str(&format!("现在，你的父母对你说：\"{parent_utterance}\"\n\n"));

        prompt.push_str(&format!(
            "请以{}的人格特征，在{}的挑战下，给出一个自然、真实的回应。回应应该：\n",
            personality.name, challenge.name
        ));
        prompt.push_str(
            "1. 符合你的人格特征\n\
2. 反映你的核心需求\n\
3. 在给定挑战下是合理的\n\
4. 语言自然，符合孩子的年龄，像真实的孩子说话\n\
5. 只输出孩子说的话或做的动作\n\n",
        );
        prompt.push_str("请直接给出回应，不要添加任何解释或前缀：");

        prompt
    }

    /// Prompt asking the service to grade the parent's utterance as a single JSON object.
    pub fn build_evaluation(
        personality: &PersonalityProfile,
        challenge: &ChallengeContext,
        turn: &DialogueTurn,
    ) -> String {
        let mut prompt = String::new();

        prompt.push_str("请严格评估以下亲子沟通的质量。评分标准如下：\n\n");
        push_rubric(&mut prompt);
        push_deductions(&mut prompt);
        push_personality_section(&mut prompt, "孩子人格信息：", personality);
        push_challenge_section(&mut prompt, challenge);

        prompt.push_str("对话内容：\n");
        prompt.push_str(&format!("- 父母说：\"{}\"\n", turn.parent_utterance));
        prompt.push_str(&format!("- 孩子回应：\"{}\"\n\n", turn.child_response));

        push_output_schema(&mut prompt);

        prompt.push_str(
            "【评估要求】\n\
1. 严格按评分标准打分，不要过于温和\n\
2. 明确指出父母的错误和不足\n\
3. 分析是否理解孩子的人格特质和核心需求\n\
4. 评估沟通方式是否恰当\n\
5. 提供具体的改进建议\n\n",
        );
        prompt.push_str("只返回一个有效的JSON对象，JSON之外不要输出任何文字、解释或Markdown标记：");

        prompt
    }
}

/// Characteristic tags as one line, or the explicit placeholder when there are none.
pub fn joined_tags(personality: &PersonalityProfile) -> String {
    let tags: Vec<&str> = personality
        .tags
        .iter()
        .map(|t| t.trim())
        .filter(|t| !t.is_empty())
        .collect();

    if tags.is_empty() {
        NO_TRAITS.to_string()
    } else {
        tags.join(TAG_DELIMITER)
    }
}

fn push_personality_section(prompt: &mut String, heading: &str, personality: &PersonalityProfile) {
    prompt.push_str(heading);
    prompt.push('\n');
    prompt.push_str(&format!("- 人格名称：{}\n", personality.name));
    prompt.push_str(&format!(
        "- 人格描述：{}\n",
        personality.description().unwrap_or(NO_DESCRIPTION)
    ));
    prompt.push_str(&format!("- 关键特征：{}\n", joined_tags(personality)));
    prompt.push_str(&format!(
        "- 核心需求：{}\n\n",
        personality.core_need().unwrap_or(NO_CORE_NEED)
    ));
}

fn push_challenge_section(prompt: &mut String, challenge: &ChallengeContext) {
    prompt.push_str("当前挑战：\n");
    prompt.push_str(&format!("- 挑战名称：{}\n", challenge.name));
    prompt.push_str(&format!(
        "- 挑战描述：{}\n\n",
        challenge.description().unwrap_or(NO_DESCRIPTION)
    ));
}

fn push_rubric(prompt: &mut String) {
    prompt.push_str("【评分标准】\n");
    for (low, high, label) in SCORE_BANDS {
        prompt.push_str(&format!("- {low}-{high}分：{label}\n"));
    }
    prompt.push('\n');
}

fn push_deductions(prompt: &mut String) {
    prompt.push_str("【扣分项】\n");
    for (behaviour, points) in DEDUCTIONS {
        prompt.push_str(&format!("- {behaviour}：-{points}分\n"));
    }
    prompt.push('\n');
}

fn push_output_schema(prompt: &mut String) {
    prompt.push_str(
        "请严格按照评分标准进行评估，并以JSON格式返回结果，必须且只能包含以下字段：\n\n\
{\n\
    \"evaluation_score\": 75,\n\
    \"reason_analysis\": \"详细分析父母回应的质量，包括扣分原因和改进建议\",\n\
    \"parent_input_analysis\": {\n\
        \"recognized_trait\": \"识别到的人格特质\",\n\
        \"recognized_need\": \"识别到的核心需求\",\n\
        \"communication_style\": \"沟通风格\",\n\
        \"positive_aspects\": [\"积极方面1\", \"积极方面2\"],\n\
        \"areas_for_improvement\": [\"需要改进的方面1\", \"需要改进的方面2\"]\n\
    },\n\
    \"child_desired_response\": \"孩子理想回应的示例\",\n\
    \"child_desired_response_inner_monologue\": \"孩子内心独白\"\n\
}\n\n",
    );
}
