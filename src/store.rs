//! SQLite persistence for generated content.
//!
//! Inline queries with explicit binds; batch inserts run in a single
//! transaction so a bulk run is all-or-nothing at the write step.

use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use crate::models::{CulturalResource, DictionaryEntry, Exercise, ExerciseKind, Lesson};
use crate::uniqueness::natural_key;

fn ts_to_datetime(ts: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(ts, 0).unwrap_or(DateTime::UNIX_EPOCH)
}

// ============ Dictionary ============

pub async fn load_headword_keys(pool: &SqlitePool) -> Result<Vec<String>> {
    let keys: Vec<String> = sqlx::query_scalar("SELECT twi_key FROM dictionary_entries")
        .fetch_all(pool)
        .await?;
    Ok(keys)
}

/// Insert an accepted batch as one transaction.
pub async fn insert_entries(pool: &SqlitePool, entries: &[DictionaryEntry]) -> Result<()> {
    let mut tx = pool.begin().await?;

    for entry in entries {
        sqlx::query(
            r#"
            INSERT INTO dictionary_entries
                (id, twi, twi_key, english, pronunciation, part_of_speech, example_twi, example_english, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&entry.id)
        .bind(&entry.twi)
        .bind(natural_key(&entry.twi))
        .bind(&entry.english)
        .bind(&entry.pronunciation)
        .bind(&entry.part_of_speech)
        .bind(&entry.example_twi)
        .bind(&entry.example_english)
        .bind(entry.created_at.timestamp())
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;
    Ok(())
}

fn entry_from_row(row: &SqliteRow) -> DictionaryEntry {
    DictionaryEntry {
        id: row.get("id"),
        twi: row.get("twi"),
        english: row.get("english"),
        pronunciation: row.get("pronunciation"),
        part_of_speech: row.get("part_of_speech"),
        example_twi: row.get("example_twi"),
        example_english: row.get("example_english"),
        created_at: ts_to_datetime(row.get("created_at")),
    }
}

pub async fn list_entries(
    pool: &SqlitePool,
    search: Option<&str>,
    limit: i64,
) -> Result<Vec<DictionaryEntry>> {
    let pattern = search.map(|s| format!("%{}%", s.trim()));

    let rows = sqlx::query(
        r#"
        SELECT id, twi, english, pronunciation, part_of_speech, example_twi, example_english, created_at
        FROM dictionary_entries
        WHERE (?1 IS NULL OR twi LIKE ?1 OR english LIKE ?1)
        ORDER BY created_at DESC, twi ASC
        LIMIT ?2
        "#,
    )
    .bind(pattern)
    .bind(limit)
    .fetch_all(pool)
    .await?;

    Ok(rows.iter().map(entry_from_row).collect())
}

pub async fn get_entry(pool: &SqlitePool, id: &str) -> Result<Option<DictionaryEntry>> {
    let row = sqlx::query(
        r#"
        SELECT id, twi, english, pronunciation, part_of_speech, example_twi, example_english, created_at
        FROM dictionary_entries
        WHERE id = ?
        "#,
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;

    Ok(row.as_ref().map(entry_from_row))
}

pub async fn entry_count(pool: &SqlitePool) -> Result<i64> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM dictionary_entries")
        .fetch_one(pool)
        .await?;
    Ok(count)
}

// ============ Lessons ============

pub async fn insert_lesson(pool: &SqlitePool, lesson: &Lesson) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO lessons (id, title, topic, level, content_json, created_at)
        VALUES (?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&lesson.id)
    .bind(&lesson.title)
    .bind(&lesson.topic)
    .bind(&lesson.level)
    .bind(&lesson.content_json)
    .bind(lesson.created_at.timestamp())
    .execute(pool)
    .await?;
    Ok(())
}

fn lesson_from_row(row: &SqliteRow) -> Lesson {
    Lesson {
        id: row.get("id"),
        title: row.get("title"),
        topic: row.get("topic"),
        level: row.get("level"),
        content_json: row.get("content_json"),
        created_at: ts_to_datetime(row.get("created_at")),
    }
}

pub async fn list_lessons(
    pool: &SqlitePool,
    level: Option<&str>,
    limit: i64,
) -> Result<Vec<Lesson>> {
    let rows = sqlx::query(
        r#"
        SELECT id, title, topic, level, content_json, created_at
        FROM lessons
        WHERE (?1 IS NULL OR level = ?1)
        ORDER BY created_at DESC
        LIMIT ?2
        "#,
    )
    .bind(level)
    .bind(limit)
    .fetch_all(pool)
    .await?;

    Ok(rows.iter().map(lesson_from_row).collect())
}

pub async fn get_lesson(pool: &SqlitePool, id: &str) -> Result<Option<Lesson>> {
    let row = sqlx::query(
        "SELECT id, title, topic, level, content_json, created_at FROM lessons WHERE id = ?",
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;

    Ok(row.as_ref().map(lesson_from_row))
}

// ============ Exercises ============

pub async fn insert_exercises(pool: &SqlitePool, exercises: &[Exercise]) -> Result<()> {
    let mut tx = pool.begin().await?;

    for exercise in exercises {
        sqlx::query(
            r#"
            INSERT INTO exercises (id, kind, level, content_json, created_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(&exercise.id)
        .bind(exercise.kind.as_str())
        .bind(&exercise.level)
        .bind(&exercise.content_json)
        .bind(exercise.created_at.timestamp())
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;
    Ok(())
}

fn exercise_from_row(row: &SqliteRow) -> Exercise {
    let kind: String = row.get("kind");
    Exercise {
        id: row.get("id"),
        kind: ExerciseKind::parse(&kind).unwrap_or(ExerciseKind::Vocabulary),
        level: row.get("level"),
        content_json: row.get("content_json"),
        created_at: ts_to_datetime(row.get("created_at")),
    }
}

pub async fn list_exercises(
    pool: &SqlitePool,
    kind: Option<ExerciseKind>,
    level: Option<&str>,
    limit: i64,
) -> Result<Vec<Exercise>> {
    let rows = sqlx::query(
        r#"
        SELECT id, kind, level, content_json, created_at
        FROM exercises
        WHERE (?1 IS NULL OR kind = ?1) AND (?2 IS NULL OR level = ?2)
        ORDER BY created_at DESC
        LIMIT ?3
        "#,
    )
    .bind(kind.map(|k| k.as_str()))
    .bind(level)
    .bind(limit)
    .fetch_all(pool)
    .await?;

    Ok(rows.iter().map(exercise_from_row).collect())
}

// ============ Cultural resources ============

pub async fn insert_resource(pool: &SqlitePool, resource: &CulturalResource) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO cultural_resources (id, topic, title, body, category, created_at)
        VALUES (?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&resource.id)
    .bind(&resource.topic)
    .bind(&resource.title)
    .bind(&resource.body)
    .bind(&resource.category)
    .bind(resource.created_at.timestamp())
    .execute(pool)
    .await?;
    Ok(())
}

fn resource_from_row(row: &SqliteRow) -> CulturalResource {
    CulturalResource {
        id: row.get("id"),
        topic: row.get("topic"),
        title: row.get("title"),
        body: row.get("body"),
        category: row.get("category"),
        created_at: ts_to_datetime(row.get("created_at")),
    }
}

pub async fn list_resources(pool: &SqlitePool, limit: i64) -> Result<Vec<CulturalResource>> {
    let rows = sqlx::query(
        r#"
        SELECT id, topic, title, body, category, created_at
        FROM cultural_resources
        ORDER BY created_at DESC
        LIMIT ?
        "#,
    )
    .bind(limit)
    .fetch_all(pool)
    .await?;

    Ok(rows.iter().map(resource_from_row).collect())
}
