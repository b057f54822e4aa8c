use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use uuid::Uuid;

use crate::log_db_operation;
use crate::models::*;

#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    pub async fn new(database_url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)?
            .foreign_keys(true)
            .create_if_missing(true);

        // Each in-memory connection is its own database, so keep exactly one
        // and never let it be recycled.
        let pool = if database_url.contains(":memory:") {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(5)
        }
        .connect_with(options)
        .await?;

        let db = Database { pool };
        db.migrate().await?;
        log_db_operation!(info, "migrate", "database schema ready");
        Ok(db)
    }

    async fn migrate(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS lessons (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                owner_id TEXT NOT NULL,
                created_at TEXT NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS flashcards (
                id TEXT PRIMARY KEY,
                lesson_id TEXT NOT NULL,
                owner_id TEXT NOT NULL,
                question TEXT NOT NULL,
                answer TEXT NOT NULL,
                difficulty TEXT NOT NULL DEFAULT 'medium',
                repetition INTEGER NOT NULL DEFAULT 0,
                last_reviewed_at TEXT,
                next_review_at TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                FOREIGN KEY (lesson_id) REFERENCES lessons(id) ON DELETE CASCADE
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_lessons_owner ON lessons(owner_id)")
            .execute(&self.pool)
            .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_flashcards_lesson ON flashcards(lesson_id)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    // Lesson operations
    pub async fn create_lesson(&self, name: String, owner_id: &str) -> Result<Lesson> {
        let lesson = Lesson {
            id: Uuid::new_v4(),
            name,
            owner_id: owner_id.to_string(),
            created_at: Utc::now(),
        };

        sqlx::query("INSERT INTO lessons (id, name, owner_id, created_at) VALUES (?1, ?2, ?3, ?4)")
            .bind(lesson.id.to_string())
            .bind(&lesson.name)
            .bind(&lesson.owner_id)
            .bind(lesson.created_at.to_rfc3339())
            .execute(&self.pool)
            .await?;

        log_db_operation!(debug, "create_lesson", id = lesson.id);
        Ok(lesson)
    }

    pub async fn get_lesson(&self, id: Uuid) -> Result<Option<Lesson>> {
        let row = sqlx::query("SELECT * FROM lessons WHERE id = ?1")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        row.map(|row| row_to_lesson(&row)).transpose()
    }

    pub async fn list_lessons(&self, owner_id: &str) -> Result<Vec<Lesson>> {
        let rows = sqlx::query("SELECT * FROM lessons WHERE owner_id = ?1 ORDER BY created_at DESC")
            .bind(owner_id)
            .fetch_all(&self.pool)
            .await?;

        log_db_operation!(debug, "list_lessons", count = rows.len());
        rows.iter().map(row_to_lesson).collect()
    }

    pub async fn delete_lesson(&self, id: Uuid) -> Result<bool> {
        let result = sqlx::query("DELETE FROM lessons WHERE id = ?1")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    // Flashcard operations
    pub async fn insert_flashcard(
        &self,
        lesson_id: Uuid,
        owner_id: &str,
        draft: &FlashcardDraft,
        next_review_at: Option<DateTime<Utc>>,
    ) -> Result<Flashcard> {
        let now = Utc::now();
        let flashcard = Flashcard {
            id: Uuid::new_v4(),
            lesson_id,
            owner_id: owner_id.to_string(),
            question: draft.question.clone(),
            answer: draft.answer.clone(),
            difficulty: Difficulty::default(),
            repetition: 0,
            last_reviewed_at: None,
            next_review_at,
            created_at: now,
            updated_at: now,
        };

        sqlx::query(
            r#"
            INSERT INTO flashcards (id, lesson_id, owner_id, question, answer, difficulty,
                                    repetition, last_reviewed_at, next_review_at, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
            "#,
        )
        .bind(flashcard.id.to_string())
        .bind(flashcard.lesson_id.to_string())
        .bind(&flashcard.owner_id)
        .bind(&flashcard.question)
        .bind(&flashcard.answer)
        .bind(flashcard.difficulty.as_str())
        .bind(flashcard.repetition)
        .bind(flashcard.last_reviewed_at.map(|d| d.to_rfc3339()))
        .bind(flashcard.next_review_at.map(|d| d.to_rfc3339()))
        .bind(flashcard.created_at.to_rfc3339())
        .bind(flashcard.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        log_db_operation!(debug, "insert_flashcard", id = flashcard.id);
        Ok(flashcard)
    }

    pub async fn get_flashcard(&self, id: Uuid) -> Result<Option<Flashcard>> {
        let row = sqlx::query("SELECT * FROM flashcards WHERE id = ?1")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        row.map(|row| row_to_flashcard(&row)).transpose()
    }

    pub async fn list_flashcards(&self, lesson_id: Uuid) -> Result<Vec<Flashcard>> {
        let rows = sqlx::query("SELECT * FROM flashcards WHERE lesson_id = ?1 ORDER BY created_at ASC, rowid ASC")
            .bind(lesson_id.to_string())
            .fetch_all(&self.pool)
            .await?;

        log_db_operation!(debug, "list_flashcards", count = rows.len());
        rows.iter().map(row_to_flashcard).collect()
    }

    pub async fn update_flashcard_content(&self, flashcard: &Flashcard) -> Result<()> {
        sqlx::query("UPDATE flashcards SET question = ?1, answer = ?2, updated_at = ?3 WHERE id = ?4")
            .bind(&flashcard.question)
            .bind(&flashcard.answer)
            .bind(flashcard.updated_at.to_rfc3339())
            .bind(flashcard.id.to_string())
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    pub async fn update_flashcard_after_review(&self, flashcard: &Flashcard) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE flashcards
            SET difficulty = ?1, repetition = ?2, last_reviewed_at = ?3,
                next_review_at = ?4, updated_at = ?5
            WHERE id = ?6
            "#,
        )
        .bind(flashcard.difficulty.as_str())
        .bind(flashcard.repetition)
        .bind(flashcard.last_reviewed_at.map(|d| d.to_rfc3339()))
        .bind(flashcard.next_review_at.map(|d| d.to_rfc3339()))
        .bind(flashcard.updated_at.to_rfc3339())
        .bind(flashcard.id.to_string())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn delete_flashcard(&self, id: Uuid) -> Result<bool> {
        let result = sqlx::query("DELETE FROM flashcards WHERE id = ?1")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(raw)?.with_timezone(&Utc))
}

fn parse_optional_timestamp(raw: Option<String>) -> Result<Option<DateTime<Utc>>> {
    raw.as_deref().map(parse_timestamp).transpose()
}

fn row_to_lesson(row: &SqliteRow) -> Result<Lesson> {
    Ok(Lesson {
        id: Uuid::parse_str(&row.get::<String, _>("id"))?,
        name: row.get("name"),
        owner_id: row.get("owner_id"),
        created_at: parse_timestamp(&row.get::<String, _>("created_at"))?,
    })
}

fn row_to_flashcard(row: &SqliteRow) -> Result<Flashcard> {
    Ok(Flashcard {
        id: Uuid::parse_str(&row.get::<String, _>("id"))?,
        lesson_id: Uuid::parse_str(&row.get::<String, _>("lesson_id"))?,
        owner_id: row.get("owner_id"),
        question: row.get("question"),
        answer: row.get("answer"),
        difficulty: row.get::<String, _>("difficulty").parse()?,
        repetition: row.get("repetition"),
        last_reviewed_at: parse_optional_timestamp(row.get("last_reviewed_at"))?,
        next_review_at: parse_optional_timestamp(row.get("next_review_at"))?,
        created_at: parse_timestamp(&row.get::<String, _>("created_at"))?,
        updated_at: parse_timestamp(&row.get::<String, _>("updated_at"))?,
    })
}
