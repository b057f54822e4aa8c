use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use crate::database::Database;
use crate::models::*;
use crate::review_scheduler::ReviewScheduler;
use crate::text_normalizer::normalize;

/// Result of looking up a resource on behalf of an owner.
#[derive(Debug)]
pub enum Access<T> {
    Granted(T),
    NotFound,
    /// The resource exists but belongs to someone else.
    Denied,
}

impl<T> Access<T> {
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Access<U> {
        match self {
            Access::Granted(value) => Access::Granted(f(value)),
            Access::NotFound => Access::NotFound,
            Access::Denied => Access::Denied,
        }
    }

    pub fn granted(self) -> Option<T> {
        match self {
            Access::Granted(value) => Some(value),
            _ => None,
        }
    }
}

/// Persistence seam used by the generation pipeline.
#[async_trait]
pub trait FlashcardStore: Send + Sync {
    async fn find_lesson(&self, lesson_id: Uuid) -> Result<Option<Lesson>>;

    async fn insert_flashcard(
        &self,
        lesson_id: Uuid,
        owner_id: &str,
        draft: &FlashcardDraft,
    ) -> Result<Flashcard>;
}

#[derive(Clone)]
pub struct FlashcardService {
    db: Database,
    scheduler: ReviewScheduler,
}

impl FlashcardService {
    pub fn new(db: Database) -> Self {
        Self {
            db,
            scheduler: ReviewScheduler::new(),
        }
    }

    // Lesson operations
    pub async fn create_lesson(&self, owner_id: &str, request: CreateLessonRequest) -> Result<Lesson> {
        let name = normalize(&request.name);
        if name.is_empty() {
            return Err(anyhow!("Lesson name must not be empty"));
        }
        if name.chars().count() > MAX_LESSON_NAME_LENGTH {
            return Err(anyhow!(
                "Lesson name exceeds {} characters",
                MAX_LESSON_NAME_LENGTH
            ));
        }

        self.db.create_lesson(name, owner_id).await
    }

    pub async fn list_lessons(&self, owner_id: &str) -> Result<Vec<Lesson>> {
        self.db.list_lessons(owner_id).await
    }

    pub async fn lesson_for_owner(&self, owner_id: &str, lesson_id: Uuid) -> Result<Access<Lesson>> {
        Ok(match self.db.get_lesson(lesson_id).await? {
            Some(lesson) if lesson.owner_id == owner_id => Access::Granted(lesson),
            Some(_) => Access::Denied,
            None => Access::NotFound,
        })
    }

    pub async fn get_lesson_with_flashcards(
        &self,
        owner_id: &str,
        lesson_id: Uuid,
    ) -> Result<Access<LessonWithFlashcards>> {
        let lesson = match self.lesson_for_owner(owner_id, lesson_id).await? {
            Access::Granted(lesson) => lesson,
            Access::NotFound => return Ok(Access::NotFound),
            Access::Denied => return Ok(Access::Denied),
        };

        let flashcards = self.db.list_flashcards(lesson.id).await?;
        Ok(Access::Granted(LessonWithFlashcards { lesson, flashcards }))
    }

    pub async fn delete_lesson(&self, owner_id: &str, lesson_id: Uuid) -> Result<Access<()>> {
        match self.lesson_for_owner(owner_id, lesson_id).await? {
            Access::Granted(lesson) => {
                self.db.delete_lesson(lesson.id).await?;
                Ok(Access::Granted(()))
            }
            other => Ok(other.map(|_| ())),
        }
    }

    // Flashcard operations
    pub async fn create_flashcard(
        &self,
        owner_id: &str,
        request: CreateFlashcardRequest,
    ) -> Result<Access<Flashcard>> {
        let draft = validated_draft(&request.question, &request.answer)?;

        let lesson = match self.lesson_for_owner(owner_id, request.lesson_id).await? {
            Access::Granted(lesson) => lesson,
            Access::NotFound => return Ok(Access::NotFound),
            Access::Denied => return Ok(Access::Denied),
        };

        let flashcard = self
            .db
            .insert_flashcard(lesson.id, owner_id, &draft, Some(Utc::now()))
            .await?;
        Ok(Access::Granted(flashcard))
    }

    pub async fn flashcard_for_owner(&self, owner_id: &str, id: Uuid) -> Result<Access<Flashcard>> {
        Ok(match self.db.get_flashcard(id).await? {
            Some(flashcard) if flashcard.owner_id == owner_id => Access::Granted(flashcard),
            Some(_) => Access::Denied,
            None => Access::NotFound,
        })
    }

    pub async fn update_flashcard(
        &self,
        owner_id: &str,
        id: Uuid,
        request: UpdateFlashcardRequest,
    ) -> Result<Access<Flashcard>> {
        let mut flashcard = match self.flashcard_for_owner(owner_id, id).await? {
            Access::Granted(flashcard) => flashcard,
            Access::NotFound => return Ok(Access::NotFound),
            Access::Denied => return Ok(Access::Denied),
        };

        let question = request.question.unwrap_or_else(|| flashcard.question.clone());
        let answer = request.answer.unwrap_or_else(|| flashcard.answer.clone());
        let draft = validated_draft(&question, &answer)?;

        flashcard.question = draft.question;
        flashcard.answer = draft.answer;
        flashcard.updated_at = Utc::now();

        self.db.update_flashcard_content(&flashcard).await?;
        Ok(Access::Granted(flashcard))
    }

    pub async fn delete_flashcard(&self, owner_id: &str, id: Uuid) -> Result<Access<()>> {
        match self.flashcard_for_owner(owner_id, id).await? {
            Access::Granted(flashcard) => {
                self.db.delete_flashcard(flashcard.id).await?;
                Ok(Access::Granted(()))
            }
            other => Ok(other.map(|_| ())),
        }
    }

    // Review operations
    pub async fn rate_flashcard(
        &self,
        owner_id: &str,
        id: Uuid,
        difficulty: Difficulty,
    ) -> Result<Access<Flashcard>> {
        let flashcard = match self.flashcard_for_owner(owner_id, id).await? {
            Access::Granted(flashcard) => flashcard,
            Access::NotFound => return Ok(Access::NotFound),
            Access::Denied => return Ok(Access::Denied),
        };

        let (updated, review_log) =
            self.scheduler.schedule_flashcard(&flashcard, difficulty, Utc::now());
        self.db.update_flashcard_after_review(&updated).await?;

        tracing::debug!(
            flashcard_id = %updated.id,
            difficulty = %difficulty,
            scheduled_days = review_log.scheduled_days,
            repetition = updated.repetition,
            "Flashcard rescheduled"
        );

        Ok(Access::Granted(updated))
    }
}

#[async_trait]
impl FlashcardStore for FlashcardService {
    async fn find_lesson(&self, lesson_id: Uuid) -> Result<Option<Lesson>> {
        self.db.get_lesson(lesson_id).await
    }

    async fn insert_flashcard(
        &self,
        lesson_id: Uuid,
        owner_id: &str,
        draft: &FlashcardDraft,
    ) -> Result<Flashcard> {
        // Generated cards are not scheduled until their first rating. Unlike
        // manual cards they carry no length cap; the columns are unbounded.
        self.db.insert_flashcard(lesson_id, owner_id, draft, None).await
    }
}

fn validated_draft(question: &str, answer: &str) -> Result<FlashcardDraft> {
    let question = normalize(question);
    let answer = normalize(answer);

    if question.is_empty() {
        return Err(anyhow!("Question must not be empty"));
    }
    if answer.is_empty() {
        return Err(anyhow!("Answer must not be empty"));
    }
    if question.chars().count() > MAX_QUESTION_LENGTH {
        return Err(anyhow!("Question exceeds {} characters", MAX_QUESTION_LENGTH));
    }
    if answer.chars().count() > MAX_ANSWER_LENGTH {
        return Err(anyhow!("Answer exceeds {} characters", MAX_ANSWER_LENGTH));
    }

    Ok(FlashcardDraft { question, answer })
}
