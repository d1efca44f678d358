//! Core data models for Adesua content.
//!
//! Two families of types live here: the persisted records (dictionary entries,
//! lessons, exercises, cultural resources) and the `Generated*` payload types
//! that the provider's JSON output is parsed into before acceptance.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Difficulty levels accepted by lesson and exercise generation.
pub const LEVELS: [&str; 3] = ["Beginner", "Intermediate", "Advanced"];

pub fn is_valid_level(level: &str) -> bool {
    LEVELS.contains(&level)
}

/// A stored dictionary entry. The normalized Twi headword is the natural key.
#[derive(Debug, Clone, Serialize)]
pub struct DictionaryEntry {
    pub id: String,
    pub twi: String,
    pub english: String,
    pub pronunciation: Option<String>,
    pub part_of_speech: Option<String>,
    pub example_twi: Option<String>,
    pub example_english: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A stored lesson. `content_json` holds the full generated payload.
#[derive(Debug, Clone, Serialize)]
pub struct Lesson {
    pub id: String,
    pub title: String,
    pub topic: String,
    pub level: String,
    pub content_json: String,
    pub created_at: DateTime<Utc>,
}

/// A stored exercise set.
#[derive(Debug, Clone, Serialize)]
pub struct Exercise {
    pub id: String,
    pub kind: ExerciseKind,
    pub level: String,
    pub content_json: String,
    pub created_at: DateTime<Utc>,
}

/// A stored cultural resource (proverbs, customs, history notes).
#[derive(Debug, Clone, Serialize)]
pub struct CulturalResource {
    pub id: String,
    pub topic: String,
    pub title: String,
    pub body: String,
    pub category: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Exercise families the generator knows how to produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExerciseKind {
    Vocabulary,
    Sentence,
    FillInBlank,
}

impl ExerciseKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExerciseKind::Vocabulary => "vocabulary",
            ExerciseKind::Sentence => "sentence",
            ExerciseKind::FillInBlank => "fill_in_blank",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "vocabulary" => Some(ExerciseKind::Vocabulary),
            "sentence" => Some(ExerciseKind::Sentence),
            "fill_in_blank" => Some(ExerciseKind::FillInBlank),
            _ => None,
        }
    }
}

impl std::fmt::Display for ExerciseKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============ Generated payloads ============

/// Dictionary entry as returned by the provider, before acceptance.
#[derive(Debug, Clone, Deserialize)]
pub struct GeneratedEntry {
    pub twi: String,
    pub english: String,
    #[serde(default)]
    pub pronunciation: Option<String>,
    #[serde(default)]
    pub part_of_speech: Option<String>,
    #[serde(default)]
    pub example_twi: Option<String>,
    #[serde(default)]
    pub example_english: Option<String>,
}

impl GeneratedEntry {
    /// Promote an accepted payload to a persisted record.
    pub fn into_entry(self) -> DictionaryEntry {
        DictionaryEntry {
            id: Uuid::new_v4().to_string(),
            twi: self.twi,
            english: self.english,
            pronunciation: self.pronunciation,
            part_of_speech: self.part_of_speech,
            example_twi: self.example_twi,
            example_english: self.example_english,
            created_at: Utc::now(),
        }
    }
}

/// Lesson payload as returned by the provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratedLesson {
    pub title: String,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub sections: Vec<LessonSection>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LessonSection {
    pub heading: String,
    pub body: String,
}

/// Exercise payload as returned by the provider. One shape covers all three
/// kinds; `options` is empty for free-form answers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratedExercise {
    #[serde(default)]
    pub title: Option<String>,
    pub questions: Vec<ExerciseQuestion>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExerciseQuestion {
    pub prompt: String,
    #[serde(default)]
    pub options: Vec<String>,
    pub answer: String,
    #[serde(default)]
    pub explanation: Option<String>,
}

/// Cultural resource payload as returned by the provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratedResource {
    pub title: String,
    pub body: String,
    #[serde(default)]
    pub category: Option<String>,
}
