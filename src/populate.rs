//! Content generation orchestration.
//!
//! Coordinates the full generation flow: prompt → rate-limited retry executor
//! → fence-strip + typed parse → uniqueness check → batch persistence. Bulk
//! runs are bounded by a total-attempt cap and a cancellation token, and they
//! return whatever was accepted rather than failing the whole batch on one
//! bad item.

use anyhow::Result;
use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::error::GenerationError;
use crate::extract;
use crate::generator::{generate_with_retry, GenerationPrompt, GenerationProvider, RetryPolicy};
use crate::models::{
    CulturalResource, DictionaryEntry, Exercise, ExerciseKind, GeneratedEntry, GeneratedExercise,
    GeneratedLesson, GeneratedResource, Lesson,
};
use crate::quota::{QuotaSnapshot, QuotaTracker};
use crate::store;
use crate::uniqueness::{natural_key, UniquenessRegistry};

/// How many session headwords to list in the prompt's avoid hint.
const MAX_AVOID_HINT: usize = 40;

/// Result of one bulk dictionary run.
#[derive(Debug)]
pub struct BatchOutcome {
    pub accepted: Vec<DictionaryEntry>,
    pub requested: usize,
    pub attempts: u32,
    pub duplicates: u32,
    pub parse_failures: u32,
    pub quota: QuotaSnapshot,
}

/// Owns the provider, quota window, and retry/pacing settings for one
/// service instance. Shared across requests via `Arc`; tests build their own
/// with a stub provider so nothing leaks through globals.
pub struct GenerationEngine {
    provider: Arc<dyn GenerationProvider>,
    quota: QuotaTracker,
    policy: RetryPolicy,
    inter_call_delay: Duration,
    max_attempt_factor: u32,
}

impl GenerationEngine {
    pub fn new(config: &Config, provider: Arc<dyn GenerationProvider>) -> Self {
        Self {
            provider,
            quota: QuotaTracker::new(config.generation.free_tier_limit),
            policy: RetryPolicy::from_config(&config.generation),
            inter_call_delay: Duration::from_millis(config.generation.inter_call_delay_ms),
            max_attempt_factor: config.content.max_attempt_factor,
        }
    }

    pub fn quota_snapshot(&self) -> QuotaSnapshot {
        self.quota.snapshot()
    }

    async fn generate(&self, prompt: &GenerationPrompt) -> Result<String, GenerationError> {
        generate_with_retry(self.provider.as_ref(), &self.quota, &self.policy, prompt).await
    }

    /// Bulk-generate dictionary entries until `count` unique ones are
    /// accepted, the attempt cap is hit, or the run is cancelled. The
    /// accepted batch is persisted in one transaction and returned.
    pub async fn populate_dictionary(
        &self,
        pool: &SqlitePool,
        count: usize,
        cancel: &CancellationToken,
    ) -> Result<BatchOutcome> {
        let mut registry = UniquenessRegistry::load(pool).await?;

        let max_total_attempts = (self.max_attempt_factor as usize).saturating_mul(count);
        let mut accepted: Vec<DictionaryEntry> = Vec::with_capacity(count);
        let mut attempts = 0u32;
        let mut duplicates = 0u32;
        let mut parse_failures = 0u32;

        while accepted.len() < count && (attempts as usize) < max_total_attempts {
            if cancel.is_cancelled() {
                info!(accepted = accepted.len(), "bulk run cancelled, keeping partial batch");
                break;
            }
            attempts += 1;

            let prompt = dictionary_prompt(&registry);
            let raw = match self.generate(&prompt).await {
                Ok(raw) => raw,
                Err(e) if accepted.is_empty() => return Err(e.into()),
                Err(e) => {
                    warn!(error = %e, accepted = accepted.len(), "stopping bulk run early");
                    break;
                }
            };

            let payload: GeneratedEntry = match extract::parse_generated(&raw) {
                Ok(p) => p,
                Err(e) => {
                    warn!(error = %e, "skipping unparseable generation");
                    parse_failures += 1;
                    continue;
                }
            };

            let key = natural_key(&payload.twi);
            if key.is_empty() {
                warn!("skipping generation with empty headword");
                parse_failures += 1;
                continue;
            }
            if registry.is_duplicate(&key) {
                debug!(headword = %payload.twi, "skipping duplicate headword");
                duplicates += 1;
                continue;
            }

            registry.record(&key);
            accepted.push(payload.into_entry());

            // Fixed pacing between accepted calls, distinct from retry backoff.
            if accepted.len() < count {
                tokio::time::sleep(self.inter_call_delay).await;
            }
        }

        if !accepted.is_empty() {
            store::insert_entries(pool, &accepted).await?;
        }

        info!(
            requested = count,
            inserted = accepted.len(),
            attempts,
            duplicates,
            parse_failures,
            "bulk dictionary run finished"
        );

        Ok(BatchOutcome {
            accepted,
            requested: count,
            attempts,
            duplicates,
            parse_failures,
            quota: self.quota.snapshot(),
        })
    }

    /// Generate and persist `count` exercise sets of one kind. Exercises have
    /// no natural-key requirement, so the loop skips only unparseable
    /// payloads. Returns the accepted sets (possibly fewer than `count`).
    pub async fn generate_exercises(
        &self,
        pool: &SqlitePool,
        kind: ExerciseKind,
        level: &str,
        count: usize,
        cancel: &CancellationToken,
    ) -> Result<Vec<Exercise>> {
        let max_total_attempts = (self.max_attempt_factor as usize).saturating_mul(count);
        let mut accepted: Vec<Exercise> = Vec::with_capacity(count);
        let mut attempts = 0usize;

        while accepted.len() < count && attempts < max_total_attempts {
            if cancel.is_cancelled() {
                info!(accepted = accepted.len(), "exercise run cancelled");
                break;
            }
            attempts += 1;

            let prompt = exercise_prompt(kind, level);
            let raw = match self.generate(&prompt).await {
                Ok(raw) => raw,
                Err(e) if accepted.is_empty() => return Err(e.into()),
                Err(e) => {
                    warn!(error = %e, accepted = accepted.len(), "stopping exercise run early");
                    break;
                }
            };

            let payload: GeneratedExercise = match extract::parse_generated::<GeneratedExercise>(&raw) {
                Ok(p) if !p.questions.is_empty() => p,
                Ok(_) => {
                    warn!("skipping exercise payload with no questions");
                    continue;
                }
                Err(e) => {
                    warn!(error = %e, "skipping unparseable exercise payload");
                    continue;
                }
            };

            accepted.push(Exercise {
                id: Uuid::new_v4().to_string(),
                kind,
                level: level.to_string(),
                content_json: serde_json::to_string(&payload)?,
                created_at: chrono::Utc::now(),
            });

            if accepted.len() < count {
                tokio::time::sleep(self.inter_call_delay).await;
            }
        }

        if !accepted.is_empty() {
            store::insert_exercises(pool, &accepted).await?;
        }

        info!(
            kind = %kind,
            level,
            inserted = accepted.len(),
            "exercise generation finished"
        );

        Ok(accepted)
    }

    /// Single generation-and-persist of a lesson. Parse failures surface to
    /// the caller; there is no skip loop here.
    pub async fn generate_lesson(
        &self,
        pool: &SqlitePool,
        topic: &str,
        level: &str,
    ) -> Result<Lesson> {
        let raw = self.generate(&lesson_prompt(topic, level)).await?;
        let payload: GeneratedLesson = extract::parse_generated(&raw)?;

        let lesson = Lesson {
            id: Uuid::new_v4().to_string(),
            title: payload.title.clone(),
            topic: topic.to_string(),
            level: level.to_string(),
            content_json: serde_json::to_string(&payload)?,
            created_at: chrono::Utc::now(),
        };
        store::insert_lesson(pool, &lesson).await?;

        info!(title = %lesson.title, level, "lesson generated");
        Ok(lesson)
    }

    /// Single generation-and-persist of a cultural resource.
    pub async fn generate_resource(&self, pool: &SqlitePool, topic: &str) -> Result<CulturalResource> {
        let raw = self.generate(&resource_prompt(topic)).await?;
        let payload: GeneratedResource = extract::parse_generated(&raw)?;

        let resource = CulturalResource {
            id: Uuid::new_v4().to_string(),
            topic: topic.to_string(),
            title: payload.title,
            body: payload.body,
            category: payload.category,
            created_at: chrono::Utc::now(),
        };
        store::insert_resource(pool, &resource).await?;

        info!(title = %resource.title, "cultural resource generated");
        Ok(resource)
    }
}

// ============ Prompt builders ============

fn dictionary_prompt(registry: &UniquenessRegistry) -> GenerationPrompt {
    let mut user = String::from(
        "Generate one dictionary entry for a common Twi word used in everyday \
         conversation in Ghana.\n\nReturn exactly this JSON shape and nothing else:\n\
         {\"twi\": \"...\", \"english\": \"...\", \"pronunciation\": \"...\", \
         \"part_of_speech\": \"...\", \"example_twi\": \"...\", \"example_english\": \"...\"}",
    );

    let avoid: Vec<&String> = registry.session_keys().take(MAX_AVOID_HINT).collect();
    if !avoid.is_empty() {
        user.push_str("\n\nDo not use any of these words: ");
        user.push_str(
            &avoid
                .iter()
                .map(|s| s.as_str())
                .collect::<Vec<_>>()
                .join(", "),
        );
    }

    GenerationPrompt {
        system: "You are a careful Akan (Twi) lexicographer producing bilingual dictionary \
                 data. Respond with a single JSON object and nothing else."
            .to_string(),
        user,
    }
}

fn exercise_prompt(kind: ExerciseKind, level: &str) -> GenerationPrompt {
    let description = match kind {
        ExerciseKind::Vocabulary => {
            "multiple-choice vocabulary questions: each prompt asks for the English meaning \
             of a Twi word and offers four options"
        }
        ExerciseKind::Sentence => {
            "sentence-construction questions: each prompt gives an English sentence for the \
             learner to translate into Twi, with an empty options array"
        }
        ExerciseKind::FillInBlank => {
            "fill-in-the-blank questions: each prompt is a Twi sentence with one word \
             replaced by ____, and the options list four candidate words"
        }
    };

    GenerationPrompt {
        system: "You are a Twi language teacher creating exercises for learners. Respond \
                 with a single JSON object and nothing else."
            .to_string(),
        user: format!(
            "Create a {} level Twi exercise with 5 {}.\n\nReturn exactly this JSON shape:\n\
             {{\"title\": \"...\", \"questions\": [{{\"prompt\": \"...\", \"options\": \
             [\"...\"], \"answer\": \"...\", \"explanation\": \"...\"}}]}}",
            level, description
        ),
    }
}

fn lesson_prompt(topic: &str, level: &str) -> GenerationPrompt {
    GenerationPrompt {
        system: "You are a Twi language teacher writing structured lessons for learners. \
                 Respond with a single JSON object and nothing else."
            .to_string(),
        user: format!(
            "Write a {} level lesson about \"{}\" for someone learning Twi.\n\nReturn \
             exactly this JSON shape:\n{{\"title\": \"...\", \"summary\": \"...\", \
             \"sections\": [{{\"heading\": \"...\", \"body\": \"...\"}}]}}\nInclude \
             Twi phrases with English glosses in the section bodies.",
            level, topic
        ),
    }
}

fn resource_prompt(topic: &str) -> GenerationPrompt {
    GenerationPrompt {
        system: "You are a historian of Akan culture writing short reference articles. \
                 Respond with a single JSON object and nothing else."
            .to_string(),
        user: format!(
            "Write a short cultural reference article about \"{}\" in Akan culture.\n\n\
             Return exactly this JSON shape:\n{{\"title\": \"...\", \"body\": \"...\", \
             \"category\": \"...\"}}",
            topic
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dictionary_prompt_lists_session_words() {
        let mut registry = UniquenessRegistry::with_persisted(&[]);
        registry.record("nsuo");
        registry.record("aduane");

        let prompt = dictionary_prompt(&registry);
        assert!(prompt.user.contains("Do not use any of these words"));
        assert!(prompt.user.contains("nsuo"));
        assert!(prompt.user.contains("aduane"));
    }

    #[test]
    fn dictionary_prompt_omits_empty_avoid_hint() {
        let registry = UniquenessRegistry::with_persisted(&[]);
        let prompt = dictionary_prompt(&registry);
        assert!(!prompt.user.contains("Do not use"));
    }

    #[test]
    fn exercise_prompts_mention_kind_and_level() {
        let prompt = exercise_prompt(ExerciseKind::FillInBlank, "Intermediate");
        assert!(prompt.user.contains("Intermediate"));
        assert!(prompt.user.contains("fill-in-the-blank"));
    }
}
