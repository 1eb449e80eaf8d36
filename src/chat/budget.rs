use tracing::{debug, warn};

use crate::backend::{GenerationRequest, TextGenerationBackend};
use crate::error::Result;
use crate::settings::GenerationSettings;

/// Running state of one multi-step generation: the accumulated text, the
/// remaining token budget, and how many end-marker hits are still allowed
/// before the turn is considered finished.
#[derive(Debug, Clone)]
pub struct GenerationBudget {
    pub message: String,
    pub tokens_left: usize,
    pub tries_left: u32,
    pub ended: bool,
}

impl GenerationBudget {
    pub fn new(settings: &GenerationSettings) -> Self {
        Self {
            message: String::new(),
            tokens_left: settings.max_output_tokens,
            tries_left: settings.max_tries.max(1),
            ended: false,
        }
    }
}

/// Stepwise generation for backends with a small per-call token ceiling.
///
/// Each iteration requests at most `tokens_per_step` tokens, appends the
/// fragment, and scans the accumulator for an end-of-turn marker. A backend
/// failure mid-way returns the partial accumulator instead of discarding
/// it; only a failure before any text arrived is an error.
pub async fn generate_stepwise(
    backend: &dyn TextGenerationBackend,
    base: &GenerationRequest,
    settings: &GenerationSettings,
) -> Result<String> {
    let mut budget = GenerationBudget::new(settings);

    while !budget.ended && budget.tokens_left > 0 {
        let step = settings.tokens_per_step.min(budget.tokens_left);
        let request = GenerationRequest {
            text: format!("{}{}", base.text, budget.message),
            max_length: step,
            stop_sequences: base.stop_sequences.clone(),
            temperature: base.temperature,
            top_p: base.top_p,
        };

        let fragment = match backend.generate(&request).await {
            Ok(fragment) => fragment,
            Err(err) if budget.message.is_empty() => return Err(err),
            Err(err) => {
                warn!(error = %err, "step failed, keeping partial result");
                break;
            }
        };

        let before_len = budget.message.len();
        budget.message.push_str(&fragment);
        budget.tokens_left = budget.tokens_left.saturating_sub(step);

        if let Some(pos) = earliest_marker(&budget.message, &base.stop_sequences) {
            budget.message.truncate(pos);
            budget.tries_left = budget.tries_left.saturating_sub(1);
            // Terminated content: the step added nothing before the marker.
            let terminated = budget.message.len() <= before_len;
            if budget.tries_left == 0 || terminated {
                budget.ended = true;
            }
        } else if fragment.trim().is_empty() {
            // Empty-continuation heuristic: the backend has nothing to add.
            budget.ended = true;
        }

        debug!(
            accumulated = budget.message.len(),
            tokens_left = budget.tokens_left,
            tries_left = budget.tries_left,
            "generation step complete"
        );
    }

    Ok(budget.message)
}

fn earliest_marker(text: &str, stops: &[String]) -> Option<usize> {
    stops
        .iter()
        .filter(|stop| !stop.is_empty())
        .filter_map(|stop| text.find(stop.as_str()))
        .min()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::ConnectivityHub;
    use crate::error::Error;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    struct ScriptedBackend {
        fragments: Mutex<VecDeque<Result<String>>>,
        hub: ConnectivityHub,
    }

    impl ScriptedBackend {
        fn new(fragments: Vec<Result<String>>) -> Self {
            Self {
                fragments: Mutex::new(fragments.into_iter().collect()),
                hub: ConnectivityHub::new(),
            }
        }
    }

    #[async_trait]
    impl TextGenerationBackend for ScriptedBackend {
        async fn count_tokens(&self, text: &str) -> Result<usize> {
            Ok(text.split_whitespace().count())
        }

        async fn generate(&self, _request: &GenerationRequest) -> Result<String> {
            self.fragments
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(Error::Generation("script exhausted".into())))
        }

        async fn abort(&self) -> Result<()> {
            Ok(())
        }

        fn connectivity(&self) -> &ConnectivityHub {
            &self.hub
        }
    }

    fn make_settings() -> GenerationSettings {
        GenerationSettings {
            max_output_tokens: 128,
            tokens_per_step: 32,
            max_tries: 2,
            ..GenerationSettings::default()
        }
    }

    fn make_request(stops: Vec<&str>) -> GenerationRequest {
        GenerationRequest {
            text: "prompt: ".into(),
            max_length: 128,
            stop_sequences: stops.into_iter().map(String::from).collect(),
            temperature: 0.7,
            top_p: 0.9,
        }
    }

    #[tokio::test]
    async fn trims_at_stop_marker() {
        let backend = ScriptedBackend::new(vec![
            Ok("The forest was quiet. ".into()),
            Ok("She waited.\nYou: and then".into()),
            Ok("".into()),
        ]);
        let result = generate_stepwise(&backend, &make_request(vec!["\nYou:"]), &make_settings())
            .await
            .unwrap();
        assert_eq!(result, "The forest was quiet. She waited.");
    }

    #[tokio::test]
    async fn failure_after_first_fragment_keeps_partial() {
        let backend = ScriptedBackend::new(vec![
            Ok("Something arrived".into()),
            Err(Error::Connectivity("gone".into())),
        ]);
        let result = generate_stepwise(&backend, &make_request(vec![]), &make_settings())
            .await
            .unwrap();
        assert_eq!(result, "Something arrived");
    }

    #[tokio::test]
    async fn immediate_failure_is_an_error() {
        let backend = ScriptedBackend::new(vec![Err(Error::Connectivity("gone".into()))]);
        let err = generate_stepwise(&backend, &make_request(vec![]), &make_settings())
            .await
            .unwrap_err();
        assert!(err.is_connectivity());
    }

    #[tokio::test]
    async fn empty_fragment_ends_the_loop() {
        let backend = ScriptedBackend::new(vec![Ok("Done.".into()), Ok("".into())]);
        let result = generate_stepwise(&backend, &make_request(vec![]), &make_settings())
            .await
            .unwrap();
        assert_eq!(result, "Done.");
    }

    #[tokio::test]
    async fn token_budget_exhaustion_terminates() {
        let settings = GenerationSettings {
            max_output_tokens: 64,
            tokens_per_step: 32,
            ..make_settings()
        };
        let backend = ScriptedBackend::new(vec![
            Ok("a ".into()),
            Ok("b ".into()),
            Ok("never reached".into()),
        ]);
        let result = generate_stepwise(&backend, &make_request(vec![]), &settings)
            .await
            .unwrap();
        assert_eq!(result, "a b ");
    }
}
