use crate::config::SimulationSettings;
use crate::engine::catalog::Catalog;
use crate::engine::evaluation_parser::{fallback_evaluation, parse_evaluation};
use crate::engine::llm_client::{GenerativeService, Purpose};
use crate::engine::normalizer::strip_code_fences;
use crate::engine::prompt_builder::PromptBuilder;
use crate::engine::resolver::resolve;
use crate::error::SimulationError;
use crate::model::evaluation::SimulationResult;
use crate::model::message::DialogueTurn;
use crate::model::profile::Selector;

/// Stage of one `simulate_dialogue` call. Any stage can abort.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Resolve,
    Generate,
    Evaluate,
    Done,
}

/// Runs resolve -> generate -> evaluate for one parent utterance.
///
/// Holds only read-only data, so a single instance can serve many threads.
pub struct DialogueSimulator<S> {
    catalog: Catalog,
    service: S,
    settings: SimulationSettings,
}

impl<S: GenerativeService> DialogueSimulator<S> {
    pub fn new(catalog: Catalog, service: S, settings: SimulationSettings) -> Self {
        Self {
            catalog,
            service,
            settings,
        }
    }

    pub fn service(&self) -> &S {
        &self.service
    }

    pub fn simulate_dialogue(
        &self,
        parent_utterance: &str,
        personality: &Selector,
        challenge: &Selector,
    ) -> Result<SimulationResult, SimulationError> {
        let span = tracing::info_span!(
            "simulate",
            personality = %personality,
            challenge = %challenge
        );
        let _enter = span.enter();

        if parent_utterance.trim().is_empty() {
            return Err(SimulationError::EmptyUtterance);
        }

        tracing::debug!(phase = ?Phase::Resolve, "Resolving entities");
        let personality = resolve(self.catalog.personalities(), personality)?;
        let challenge = resolve(self.catalog.challenges(), challenge)?;

        tracing::debug!(phase = ?Phase::Generate, "Generating child response");
        let prompt = PromptBuilder::build_generation(personality, challenge, parent_utterance);
        tracing::trace!("Generation prompt:\n{}", prompt);

        let raw = self
            .service
            .invoke(&prompt, &self.settings.params(Purpose::Generation))
            .map_err(|e| {
                tracing::error!("Generation call failed: {}", e);
                SimulationError::GenerationFailed(e)
            })?;
        let turn = DialogueTurn {
            parent_utterance: parent_utterance.to_string(),
            child_response: strip_code_fences(&raw),
        };
        tracing::debug!(child_response = %turn.child_response, "Generated child response");

        tracing::debug!(phase = ?Phase::Evaluate, "Evaluating parent utterance");
        let prompt = PromptBuilder::build_evaluation(personality, challenge, &turn);
        tracing::trace!("Evaluation prompt:\n{}", prompt);

        let evaluation = match self
            .service
            .invoke(&prompt, &self.settings.params(Purpose::Evaluation))
        {
            Ok(raw) => parse_evaluation(&strip_code_fences(&raw), personality, challenge),
            Err(e) => {
                // A child response already exists; keep it and grade with the fallback.
                tracing::warn!("Evaluation call failed ({}); using fallback evaluation", e);
                fallback_evaluation(personality)
            }
        };

        tracing::info!(
            phase = ?Phase::Done,
            score = %evaluation.evaluation_score,
            "Simulation finished"
        );

        Ok(SimulationResult {
            child_response: turn.child_response,
            evaluation,
        })
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::ScriptedService;
    use super::*;
    use crate::engine::catalog::builtin_catalog;
    use crate::engine::evaluation_parser::FALLBACK_SCORE;
    use crate::engine::llm_client::Purpose;
    use crate::error::ServiceError;
    use serde_json::Number;

    fn simulator(replies: Vec<Result<String, ServiceError>>) -> DialogueSimulator<ScriptedService> {
        DialogueSimulator::new(
            builtin_catalog(),
            ScriptedService::new(replies),
            SimulationSettings::default(),
        )
    }

    fn transport_error() -> ServiceError {
        ServiceError::Transport {
            provider: "dashscope",
            reason: "connection refused".into(),
        }
    }

    #[test]
    fn happy_path_makes_two_calls_in_order() {
        let sim = simulator(vec![
            Ok("……还行吧。".into()),
            Ok("```json\n{\"evaluation_score\": 82, \"reason_analysis\": \"温和\"}\n```".into()),
        ]);

        let result = sim
            .simulate_dialogue(
                "你今天怎么样？",
                &Selector::Name("内向敏感型".into()),
                &Selector::Name("学习困难".into()),
            )
            .unwrap();

        assert_eq!(result.child_response, "……还行吧。");
        assert_eq!(result.evaluation.evaluation_score, Number::from(82));
        assert_eq!(result.evaluation.reason_analysis, "温和");

        let calls = sim.service.calls.lock().unwrap();
        assert_eq!(calls.len(), 2);
        let (gen_prompt, gen_params) = &calls[0];
        let (eval_prompt, eval_params) = &calls[1];
        assert_eq!(gen_params.purpose, Purpose::Generation);
        assert_eq!(eval_params.purpose, Purpose::Evaluation);
        assert!(eval_params.temperature < gen_params.temperature);
        for needle in ["内向敏感型", "安全感", "学习困难", "你今天怎么样？"] {
            assert!(gen_prompt.contains(needle), "missing {needle}");
        }
        assert!(eval_prompt.contains("- 孩子回应：\"……还行吧。\""));
    }

    #[test]
    fn unknown_personality_aborts_without_calls() {
        let sim = simulator(vec![]);
        let err = sim
            .simulate_dialogue(
                "你好",
                &Selector::Name("不存在的人格".into()),
                &Selector::Name("学习困难".into()),
            )
            .unwrap_err();

        assert!(matches!(err, SimulationError::NotFound { .. }));
        assert_eq!(sim.service.call_count(), 0);
    }

    #[test]
    fn unknown_challenge_aborts_without_calls() {
        let sim = simulator(vec![]);
        let err = sim
            .simulate_dialogue("你好", &Selector::Id("3".into()), &Selector::Id("404".into()))
            .unwrap_err();

        assert_eq!(err.http_status(), 404);
        assert_eq!(sim.service.call_count(), 0);
    }

    #[test]
    fn blank_utterance_is_rejected() {
        let sim = simulator(vec![]);
        let err = sim
            .simulate_dialogue("  \n", &Selector::Id("1".into()), &Selector::Id("1".into()))
            .unwrap_err();
        assert!(matches!(err, SimulationError::EmptyUtterance));
        assert_eq!(sim.service.call_count(), 0);
    }

    #[test]
    fn generation_failure_skips_evaluation() {
        let sim = simulator(vec![Err(transport_error())]);
        let err = sim
            .simulate_dialogue("你好", &Selector::Id("1".into()), &Selector::Id("1".into()))
            .unwrap_err();

        assert!(matches!(err, SimulationError::GenerationFailed(_)));
        assert_eq!(sim.service.call_count(), 1);
    }

    #[test]
    fn malformed_evaluation_is_absorbed() {
        let sim = simulator(vec![Ok("我不想说。".into()), Ok("评分：很好".into())]);
        let result = sim
            .simulate_dialogue("快去写作业！", &Selector::Id("3".into()), &Selector::Id("3".into()))
            .unwrap();

        assert_eq!(result.child_response, "我不想说。");
        assert_eq!(result.evaluation.evaluation_score, Number::from(FALLBACK_SCORE));
        assert_eq!(result.evaluation.parent_input_analysis.recognized_trait, "内向");
    }

    #[test]
    fn evaluation_call_failure_still_finishes() {
        let sim = simulator(vec![Ok("嗯。".into()), Err(transport_error())]);
        let result = sim
            .simulate_dialogue("你好", &Selector::Id("1".into()), &Selector::Id("1".into()))
            .unwrap();

        assert_eq!(result.child_response, "嗯。");
        assert_eq!(result.evaluation.evaluation_score, Number::from(FALLBACK_SCORE));
        assert_eq!(result.evaluation.parent_input_analysis.recognized_trait, "热情");
    }

    #[test]
    fn shared_across_threads() {
        let replies = (0..8)
            .flat_map(|_| [Ok("嗯".to_string()), Ok("{}".to_string())])
            .collect();
        let sim = simulator(replies);

        std::thread::scope(|scope| {
            for _ in 0..4 {
                scope.spawn(|| {
                    let result = sim
                        .simulate_dialogue("你好", &Selector::Id("2".into()), &Selector::Id("1".into()))
                        .unwrap();
                    assert!(!result.evaluation.reason_analysis.is_empty());
                });
            }
        });

        assert_eq!(sim.service.call_count(), 8);
    }
}
