//! Ingestion entry point: extraction passes and the fallback decision.
//!
//! One pass is generate → extract raw text → parse → normalize. When the
//! primary pass returns suspiciously few tasks for a long input, a second
//! pass runs with the mode's strict prompt and the richer result is kept per
//! record type. Nothing here returns an error; failures become notices.

use crate::config::IngestConfig;
use crate::error::LlmError;
use crate::gemini::{GenerateRequest, GenerationConfig, GenerativeModel};
use crate::normalizer::normalize;
use crate::notify::{Notice, Notifier};
use crate::parser::{parse_payload, ParseOutcome};
use crate::payload::UnvalidatedPayload;
use crate::response::extract_raw_text;
use crate::schema::NormalizedBatch;
use chrono::NaiveDate;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// When a primary pass counts as under-extracted: at most
/// `max_primary_tasks` tasks from an input with at least `min_lines` lines or
/// more than `min_chars` characters.
#[derive(Debug, Clone, Copy)]
pub struct FallbackThresholds {
    pub min_lines: usize,
    pub min_chars: usize,
    pub max_primary_tasks: usize,
}

impl Default for FallbackThresholds {
    fn default() -> Self {
        Self {
            min_lines: 8,
            min_chars: 400,
            max_primary_tasks: 1,
        }
    }
}

impl FallbackThresholds {
    pub fn should_fallback(&self, task_count: usize, input: &str) -> bool {
        let long = input.lines().count() >= self.min_lines || input.chars().count() > self.min_chars;
        task_count <= self.max_primary_tasks && long
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestionOutcome {
    pub batch: NormalizedBatch,
    /// Parse result of the primary pass. `None` when the model call failed.
    pub primary_parse: Option<ParseOutcome>,
    pub used_fallback: bool,
}

struct Pass {
    batch: NormalizedBatch,
    outcome: ParseOutcome,
}

pub struct IngestionPipeline {
    model: Arc<dyn GenerativeModel>,
    notifier: Arc<dyn Notifier>,
    thresholds: FallbackThresholds,
}

impl IngestionPipeline {
    pub fn new(model: Arc<dyn GenerativeModel>, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            model,
            notifier,
            thresholds: FallbackThresholds::default(),
        }
    }

    pub async fn ingest(&self, text: &str, config: &IngestConfig, today: NaiveDate) -> IngestionOutcome {
        if text.trim().is_empty() {
            return IngestionOutcome {
                batch: normalize(None, text, today),
                primary_parse: Some(ParseOutcome::Empty),
                used_fallback: false,
            };
        }

        let primary = match self.run_pass(&config.prompts.primary, config, text, today).await {
            Ok(pass) => pass,
            Err(e) => {
                error!("Primary extraction failed: {}", e);
                self.notifier
                    .notify(Notice::error("AI Service Unavailable", e.to_string()));
                return IngestionOutcome {
                    batch: normalize(None, text, today),
                    primary_parse: None,
                    used_fallback: false,
                };
            }
        };

        if !self.thresholds.should_fallback(primary.batch.tasks.len(), text) {
            return IngestionOutcome {
                batch: primary.batch,
                primary_parse: Some(primary.outcome),
                used_fallback: false,
            };
        }

        info!(
            "Primary pass found {} task(s) in {} lines / {} chars; running strict pass",
            primary.batch.tasks.len(),
            text.lines().count(),
            text.chars().count()
        );

        match self.run_pass(&config.prompts.strict, config, text, today).await {
            Ok(fallback) => IngestionOutcome {
                batch: merge(primary.batch, fallback.batch),
                primary_parse: Some(primary.outcome),
                used_fallback: true,
            },
            Err(e) => {
                warn!("Fallback extraction failed, keeping primary result: {}", e);
                self.notifier.notify(Notice::warning(
                    "Some items may be missing",
                    format!("The second extraction pass failed: {}", e),
                ));
                IngestionOutcome {
                    batch: primary.batch,
                    primary_parse: Some(primary.outcome),
                    used_fallback: false,
                }
            }
        }
    }

    async fn run_pass(
        &self,
        prompt: &str,
        config: &IngestConfig,
        text: &str,
        today: NaiveDate,
    ) -> Result<Pass, LlmError> {
        let request = GenerateRequest::prompt(build_prompt(prompt, today, text))
            .with_config(GenerationConfig::json(config.temperature));
        let response = self.model.generate(&request).await?;

        let raw_text = extract_raw_text(&response);
        debug!("Model returned {} chars", raw_text.len());

        let extracted = parse_payload(&raw_text);
        let payload = extracted.parsed.as_ref().map(UnvalidatedPayload::from_map);
        let mut batch = normalize(payload.as_ref(), text, today);
        batch.raw_text = extracted.raw_text;

        info!(
            "Pass ({:?}): {} tasks, {} events, {} insights, {} notes, wellbeing: {}",
            extracted.outcome,
            batch.tasks.len(),
            batch.calendar_events.len(),
            batch.staff_insights.len(),
            batch.strategy_notes.len(),
            batch.wellbeing.is_some()
        );
        Ok(Pass {
            batch,
            outcome: extracted.outcome,
        })
    }
}

fn build_prompt(template: &str, today: NaiveDate, text: &str) -> String {
    format!(
        "{}\n\nToday is {} ({}).\n\nInput:\n\"\"\"\n{}\n\"\"\"",
        template,
        today.format("%A"),
        today.format("%Y-%m-%d"),
        text
    )
}

/// Per record type, the fallback wins only with strictly more items.
fn merge(primary: NormalizedBatch, fallback: NormalizedBatch) -> NormalizedBatch {
    fn pick<T>(kind: &str, primary: Vec<T>, fallback: Vec<T>) -> Vec<T> {
        if fallback.len() > primary.len() {
            debug!("{}: fallback {} > primary {}", kind, fallback.len(), primary.len());
            fallback
        } else {
            primary
        }
    }

    NormalizedBatch {
        raw_text: if primary.raw_text.is_empty() {
            fallback.raw_text
        } else {
            primary.raw_text
        },
        wellbeing: primary.wellbeing.or(fallback.wellbeing),
        tasks: pick("tasks", primary.tasks, fallback.tasks),
        staff_insights: pick("staffInsights", primary.staff_insights, fallback.staff_insights),
        calendar_events: pick("calendarEvents", primary.calendar_events, fallback.calendar_events),
        strategy_notes: pick("strategyNotes", primary.strategy_notes, fallback.strategy_notes),
    }
}

/// Hex SHA-256 of the ingested text.
pub fn source_hash(text: &str) -> String {
    format!("{:x}", Sha256::digest(text.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigStore;
    use crate::gemini::GenerateResponse;
    use crate::notify::{NoticeBuffer, Severity};
    use crate::schema::{EnergyLevel, ProposedStrategyNote, ProposedTask};
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Answers with queued replies and records the prompts it was sent.
    #[derive(Default)]
    struct ScriptedModel {
        replies: Mutex<VecDeque<Result<GenerateResponse, LlmError>>>,
        prompts: Mutex<Vec<String>>,
    }

    impl ScriptedModel {
        fn replying(replies: Vec<Result<&str, LlmError>>) -> Arc<Self> {
            let replies = replies
                .into_iter()
                .map(|r| r.map(|text| GenerateResponse::from_texts([text])))
                .collect();
            Arc::new(Self {
                replies: Mutex::new(replies),
                prompts: Mutex::default(),
            })
        }

        fn calls(&self) -> usize {
            self.prompts.lock().unwrap().len()
        }
    }

    #[async_trait::async_trait]
    impl GenerativeModel for ScriptedModel {
        async fn generate(&self, request: &GenerateRequest) -> Result<GenerateResponse, LlmError> {
            let prompt = request.contents[0].parts[0].text.clone().unwrap_or_default();
            self.prompts.lock().unwrap().push(prompt);
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(GenerateResponse::default()))
        }
    }

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 10, 18).unwrap()
    }

    fn mode() -> IngestConfig {
        ConfigStore::builtin().unwrap().get("brain_dump").unwrap()
    }

    fn pipeline(model: Arc<ScriptedModel>) -> (IngestionPipeline, NoticeBuffer) {
        let notices = NoticeBuffer::new();
        (IngestionPipeline::new(model, Arc::new(notices.clone())), notices)
    }

    fn long_input() -> String {
        (1..=10)
            .map(|i| format!("Line {} of a long brain dump about the week ahead and what needs doing", i))
            .collect::<Vec<_>>()
            .join("\n")
    }

    const ONE_TASK: &str = r#"{"tasks":[{"title":"Everything"}]}"#;

    #[test]
    fn test_fallback_trigger_boundary() {
        let t = FallbackThresholds::default();
        let long = long_input();
        assert!(long.lines().count() == 10 && long.chars().count() > 400);
        assert!(t.should_fallback(1, &long));
        assert!(!t.should_fallback(2, &long));

        let short = "Email Year 8 parents.\nChase Dave.\nBook coach.";
        assert_eq!(short.lines().count(), 3);
        assert!(!t.should_fallback(1, short));

        assert!(t.should_fallback(0, &"x".repeat(401)));
        assert!(!t.should_fallback(0, &"x".repeat(400)));
        assert!(t.should_fallback(1, &"a\n".repeat(8)));
    }

    #[tokio::test]
    async fn test_short_input_single_pass() {
        let model = ScriptedModel::replying(vec![Ok(ONE_TASK)]);
        let (pipeline, notices) = pipeline(model.clone());

        let outcome = pipeline.ingest("Book the coach", &mode(), today()).await;
        assert_eq!(model.calls(), 1);
        assert!(!outcome.used_fallback);
        assert_eq!(outcome.primary_parse, Some(ParseOutcome::Strict));
        assert_eq!(outcome.batch.tasks[0].title, "Everything");
        assert_eq!(outcome.batch.raw_text, ONE_TASK);
        assert!(notices.take().is_empty());
    }

    #[tokio::test]
    async fn test_fallback_merges_per_type() {
        let primary = r#"{"tasks":[{"title":"Everything"}],
            "strategyNotes":[{"theme":"Trips","note":"More"},{"theme":"KS3","note":"Rewrite"}],
            "wellbeing":{"mood":"Tired"}}"#;
        let strict = r#"{"tasks":[{"title":"A"},{"title":"B"},{"title":"C"}],
            "strategyNotes":[{"theme":"Trips","note":"More"}],
            "calendarEvents":[{"title":"Trip","startDateTime":"2026-10-22T09:00"}],
            "wellbeing":{"mood":"Fine"}}"#;
        let model = ScriptedModel::replying(vec![Ok(primary), Ok(strict)]);
        let (pipeline, _) = pipeline(model.clone());

        let outcome = pipeline.ingest(&long_input(), &mode(), today()).await;
        assert_eq!(model.calls(), 2);
        assert!(outcome.used_fallback);

        let batch = outcome.batch;
        assert_eq!(batch.tasks.len(), 3);
        assert_eq!(batch.strategy_notes.len(), 2);
        assert_eq!(batch.calendar_events.len(), 1);
        assert_eq!(batch.wellbeing.unwrap().mood, "Tired");
        assert_eq!(batch.raw_text, primary);

        let prompts = model.prompts.lock().unwrap();
        assert!(prompts[1].starts_with(&mode().prompts.strict));
        assert!(prompts[0].contains("2026-10-18"));
    }

    #[tokio::test]
    async fn test_equal_counts_keep_primary() {
        let primary = r#"{"tasks":[{"title":"Primary"}]}"#;
        let strict = r#"{"tasks":[{"title":"Strict"}]}"#;
        let model = ScriptedModel::replying(vec![Ok(primary), Ok(strict)]);
        let (pipeline, _) = pipeline(model);

        let outcome = pipeline.ingest(&long_input(), &mode(), today()).await;
        assert!(outcome.used_fallback);
        assert_eq!(outcome.batch.tasks[0].title, "Primary");
    }

    #[tokio::test]
    async fn test_fallback_failure_keeps_primary() {
        let model = ScriptedModel::replying(vec![
            Ok(ONE_TASK),
            Err(LlmError::Transport("connection reset".into())),
        ]);
        let (pipeline, notices) = pipeline(model);

        let outcome = pipeline.ingest(&long_input(), &mode(), today()).await;
        assert!(!outcome.used_fallback);
        assert_eq!(outcome.batch.tasks.len(), 1);
        assert_eq!(outcome.batch.tasks[0].title, "Everything");

        let notices = notices.take();
        assert_eq!(notices.len(), 1);
        assert_eq!(notices[0].severity, Severity::Warning);
    }

    #[tokio::test]
    async fn test_primary_failure_notifies_and_keeps_input() {
        let model = ScriptedModel::replying(vec![Err(LlmError::RateLimited { attempts: 4 })]);
        let (pipeline, notices) = pipeline(model.clone());

        let text = "Chase Dave for the risk assessment";
        let outcome = pipeline.ingest(text, &mode(), today()).await;
        assert_eq!(model.calls(), 1);
        assert_eq!(outcome.primary_parse, None);
        assert_eq!(outcome.batch.tasks.len(), 1);
        assert_eq!(outcome.batch.tasks[0].summary, text);

        let notices = notices.take();
        assert_eq!(notices[0].title, "AI Service Unavailable");
        assert_eq!(notices[0].severity, Severity::Error);
    }

    #[tokio::test]
    async fn test_unparseable_reply_keeps_input() {
        let model = ScriptedModel::replying(vec![Ok("Sorry, I can't help with that.")]);
        let (pipeline, _) = pipeline(model);

        let text = "Sort the stock cupboard";
        let outcome = pipeline.ingest(text, &mode(), today()).await;
        assert_eq!(outcome.primary_parse, Some(ParseOutcome::Unstructured));
        assert_eq!(outcome.batch.raw_text, "Sorry, I can't help with that.");
        assert_eq!(outcome.batch.tasks[0].summary, text);
    }

    #[tokio::test]
    async fn test_blank_input_skips_model() {
        let model = ScriptedModel::replying(vec![]);
        let (pipeline, _) = pipeline(model.clone());

        let outcome = pipeline.ingest("   ", &mode(), today()).await;
        assert_eq!(model.calls(), 0);
        assert!(outcome.batch.tasks.is_empty());
        assert_eq!(outcome.batch.raw_text, "");
    }

    #[tokio::test]
    async fn test_split_example() {
        let reply = r#"```json
{"tasks":[
  {"title":"Email Year 8 parents about the trip tomorrow"},
  {"title":"Chase Dave for the risk assessment","assignee":"Dave"}
]}
```"#;
        let model = ScriptedModel::replying(vec![Ok(reply)]);
        let (pipeline, _) = pipeline(model);

        let outcome = pipeline
            .ingest(
                "Email Year 8 parents about the trip tomorrow. Also chase Dave for the risk assessment.",
                &mode(),
                today(),
            )
            .await;
        let tasks: &[ProposedTask] = &outcome.batch.tasks;
        assert_eq!(tasks.len(), 2);
        assert_eq!(tasks[0].due_date, NaiveDate::from_ymd_opt(2026, 10, 19));
        assert_eq!(tasks[0].energy_level, Some(EnergyLevel::LowEnergyAdmin));
        // "chase" is a 15 minute cue, so the second task is due today.
        assert_eq!(tasks[1].due_date, Some(today()));
    }

    #[test]
    fn test_merge_fills_missing_raw_text_and_wellbeing() {
        let primary = NormalizedBatch::default();
        let fallback = NormalizedBatch {
            raw_text: "{}".into(),
            strategy_notes: vec![ProposedStrategyNote::default()],
            ..Default::default()
        };
        let merged = merge(primary, fallback);
        assert_eq!(merged.raw_text, "{}");
        assert_eq!(merged.strategy_notes.len(), 1);
    }

    #[test]
    fn test_source_hash() {
        assert_eq!(
            source_hash("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}
