//! Reasoning stage: prompt the model (with fallback) and parse its draft

use crate::health::ModelHealthTracker;
use crate::llm::LanguageModel;
use crate::prompt::build_reasoning_prompt;
use crate::summarizer::SummaryGroup;
use crate::types::*;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

const NO_STEPS_NOTE: &str = "Model response did not include explicit reasoning steps";

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReasoningOutput {
    pub steps: Vec<ReasoningStep>,
    /// Draft answer referencing groups as `[G1]`; empty when no model answered
    pub draft: String,
    pub counterpoints: Vec<String>,
    pub model_used: Option<String>,
    pub used_fallback: bool,
    pub model_unavailable: bool,
    pub degraded: Vec<DegradedNote>,
}

/// Sections recognised in model output
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedOutput {
    pub steps: Vec<String>,
    pub counterpoints: Vec<String>,
    pub answer: String,
}

#[derive(Clone, Copy, PartialEq)]
enum Section {
    None,
    Step,
    Counterpoint,
    Answer,
}

/// Split `STEP:` / `COUNTERPOINT:` / `ANSWER:` sections. Continuation lines
/// join the open section; text without any section becomes the answer.
pub fn parse_model_output(text: &str) -> ParsedOutput {
    let mut parsed = ParsedOutput::default();
    let mut section = Section::None;
    let mut preamble = Vec::new();
    let mut answer_lines: Vec<&str> = Vec::new();

    for line in text.lines() {
        let trimmed = line.trim();
        if let Some(rest) = strip_tag(trimmed, "STEP:") {
            section = Section::Step;
            if !rest.is_empty() {
                parsed.steps.push(rest.to_string());
            }
        } else if let Some(rest) = strip_tag(trimmed, "COUNTERPOINT:") {
            section = Section::Counterpoint;
            if !rest.is_empty() {
                parsed.counterpoints.push(rest.to_string());
            }
        } else if let Some(rest) = strip_tag(trimmed, "ANSWER:") {
            section = Section::Answer;
            answer_lines.push(rest);
        } else if !trimmed.is_empty() {
            match section {
                Section::None => preamble.push(trimmed),
                Section::Step => append_to_last(&mut parsed.steps, trimmed),
                Section::Counterpoint => append_to_last(&mut parsed.counterpoints, trimmed),
                Section::Answer => answer_lines.push(trimmed),
            }
        }
    }

    parsed.answer = if answer_lines.is_empty() && parsed.steps.is_empty() && parsed.counterpoints.is_empty() {
        preamble.join(" ")
    } else {
        answer_lines
            .into_iter()
            .filter(|l| !l.is_empty())
            .collect::<Vec<_>>()
            .join(" ")
    };
    parsed
}

fn strip_tag<'a>(line: &'a str, tag: &str) -> Option<&'a str> {
    let head = line.get(..tag.len())?;
    if head.eq_ignore_ascii_case(tag) {
        Some(line[tag.len()..].trim())
    } else {
        None
    }
}

fn append_to_last(items: &mut Vec<String>, line: &str) {
    match items.last_mut() {
        Some(last) => {
            last.push(' ');
            last.push_str(line);
        }
        None => items.push(line.to_string()),
    }
}

pub struct ReasoningStage {
    model: Arc<dyn LanguageModel>,
    model_ids: Vec<String>,
    max_attempts: usize,
    timeout: Duration,
    health: Arc<ModelHealthTracker>,
}

impl ReasoningStage {
    pub fn new(
        model: Arc<dyn LanguageModel>,
        model_ids: Vec<String>,
        max_attempts: usize,
        timeout: Duration,
        health: Arc<ModelHealthTracker>,
    ) -> Self {
        Self { model, model_ids, max_attempts, timeout, health }
    }

    /// Invoke models in priority order until one answers. Never fails:
    /// when every attempt fails the output is a single degraded step and
    /// an empty draft.
    pub async fn reason(
        &self,
        query: &Query,
        blueprint: &ContextBlueprint,
        groups: &[SummaryGroup],
        conversation: &[String],
    ) -> ReasoningOutput {
        let prompt = build_reasoning_prompt(query, blueprint, groups, conversation);
        let mut failures: Vec<String> = Vec::new();

        for (attempt, model_id) in self.model_ids.iter().take(self.max_attempts).enumerate() {
            let result = match tokio::time::timeout(self.timeout, self.model.invoke(&prompt, model_id, self.timeout)).await {
                Ok(res) => res,
                Err(_) => Err(crate::error::ModelError::Timeout {
                    model_id: model_id.clone(),
                    timeout_ms: self.timeout.as_millis() as u64,
                }),
            };

            match result {
                Ok(text) => {
                    self.health.record_success(model_id);
                    info!("Reasoning answered by {} (attempt {})", model_id, attempt + 1);
                    let mut output = self.build_output(&text, model_id, attempt > 0);
                    if !failures.is_empty() {
                        output.degraded.push(DegradedNote::new(
                            PipelineStage::Reasoning,
                            format!("answered by fallback model {} after: {}", model_id, failures.join("; ")),
                        ));
                    }
                    return output;
                }
                Err(err) => {
                    if err.is_transient() {
                        warn!("Model {} failed: {}", model_id, err);
                    } else {
                        warn!("Model {} failed with a non-transient error: {}", model_id, err);
                    }
                    self.health.record_failure(model_id, err.to_string());
                    failures.push(format!("{}: {}", model_id, err));
                }
            }
        }

        let reason = if failures.is_empty() {
            "language model unavailable: no models configured".to_string()
        } else {
            format!("language model unavailable ({})", failures.join("; "))
        };
        ReasoningOutput {
            steps: vec![ReasoningStep::degraded(1, &reason)],
            draft: String::new(),
            counterpoints: Vec::new(),
            model_used: None,
            used_fallback: false,
            model_unavailable: true,
            degraded: vec![DegradedNote::new(PipelineStage::Reasoning, reason)],
        }
    }

    fn build_output(&self, text: &str, model_id: &str, used_fallback: bool) -> ReasoningOutput {
        let parsed = parse_model_output(text);

        let mut steps: Vec<ReasoningStep> = parsed
            .steps
            .iter()
            .map(|s| (StepKind::Inference, s.clone()))
            .chain(parsed.counterpoints.iter().map(|c| (StepKind::Counterpoint, c.clone())))
            .enumerate()
            .map(|(i, (kind, text))| ReasoningStep { index: i + 1, kind, text })
            .collect();
        if steps.is_empty() {
            steps.push(ReasoningStep {
                index: 1,
                kind: StepKind::Inference,
                text: NO_STEPS_NOTE.to_string(),
            });
        }

        ReasoningOutput {
            steps,
            draft: parsed.answer,
            counterpoints: parsed.counterpoints,
            model_used: Some(model_id.to_string()),
            used_fallback,
            model_unavailable: false,
            degraded: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context_analyzer::ContextAnalyzer;
    use crate::error::ModelError;
    use crate::llm::{ScriptedModel, ScriptedReply};

    fn stage(model: Arc<ScriptedModel>) -> ReasoningStage {
        let ids = vec!["primary".to_string(), "secondary".to_string(), "tertiary".to_string()];
        ReasoningStage::new(
            model,
            ids.clone(),
            2,
            Duration::from_millis(100),
            Arc::new(ModelHealthTracker::new(&ids)),
        )
    }

    fn run_inputs() -> (Query, ContextBlueprint) {
        let q = Query::new("Can my employer cut my wages?");
        let bp = ContextAnalyzer::new().analyze(&q.text, &ContextHints::default());
        (q, bp)
    }

    #[test]
    fn test_parse_sections() {
        let parsed = parse_model_output(
            "STEP: Leave accrues with service.\ncontinues here\nCOUNTERPOINT: Casual staff are excluded.\nANSWER: Four weeks [G1].\nMore detail [G2].",
        );
        assert_eq!(parsed.steps, vec!["Leave accrues with service. continues here"]);
        assert_eq!(parsed.counterpoints, vec!["Casual staff are excluded."]);
        assert_eq!(parsed.answer, "Four weeks [G1]. More detail [G2].");
    }

    #[test]
    fn test_parse_unstructured_text_becomes_answer() {
        let parsed = parse_model_output("Employees get four weeks [G1].");
        assert!(parsed.steps.is_empty());
        assert_eq!(parsed.answer, "Employees get four weeks [G1].");
    }

    #[tokio::test]
    async fn test_primary_success() {
        let model = Arc::new(ScriptedModel::new(ScriptedReply::Text("STEP: a\nANSWER: b [G1].".into())));
        let (q, bp) = run_inputs();
        let out = stage(model.clone()).reason(&q, &bp, &[], &[]).await;
        assert_eq!(out.model_used.as_deref(), Some("primary"));
        assert!(!out.used_fallback);
        assert_eq!(out.draft, "b [G1].");
        assert_eq!(model.calls(), vec!["primary"]);
    }

    #[tokio::test]
    async fn test_primary_timeout_falls_back_to_secondary() {
        let model = Arc::new(
            ScriptedModel::new(ScriptedReply::Text("STEP: ok\nANSWER: fine.".into()))
                .with_reply("primary", ScriptedReply::Hang),
        );
        let (q, bp) = run_inputs();
        let st = stage(model.clone());
        let out = st.reason(&q, &bp, &[], &[]).await;
        assert_eq!(out.model_used.as_deref(), Some("secondary"));
        assert!(out.used_fallback);
        assert!(!out.model_unavailable);
        assert_eq!(out.degraded.len(), 1);
        assert_eq!(st.health.snapshot()["primary"].healthy, Some(false));
    }

    #[tokio::test]
    async fn test_all_models_fail_degrades_to_single_step() {
        let model = Arc::new(ScriptedModel::new(ScriptedReply::Fail(ModelError::Http {
            status: 503,
            body: "overloaded".into(),
        })));
        let (q, bp) = run_inputs();
        let out = stage(model.clone()).reason(&q, &bp, &[], &[]).await;
        assert!(out.model_unavailable);
        assert!(out.draft.is_empty());
        assert_eq!(out.steps.len(), 1);
        assert!(out.steps[0].is_degraded());
        // bounded by max_attempts, the third model is never tried
        assert_eq!(model.calls(), vec!["primary", "secondary"]);
    }
}
