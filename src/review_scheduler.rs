use chrono::{DateTime, Duration, Utc};

use crate::models::{Difficulty, Flashcard};

#[derive(Debug, Clone)]
pub struct ReviewLog {
    pub scheduled_days: i64,
}

/// Fixed-interval scheduler: the rated difficulty alone decides the next review.
#[derive(Debug, Clone, Default)]
pub struct ReviewScheduler;

impl ReviewScheduler {
    pub fn new() -> Self {
        Self
    }

    pub fn interval_days(difficulty: Difficulty) -> i64 {
        match difficulty {
            Difficulty::Easy => 3,
            Difficulty::Medium => 1,
            Difficulty::Hard => 0,
        }
    }

    pub fn schedule_flashcard(
        &self,
        flashcard: &Flashcard,
        difficulty: Difficulty,
        now: DateTime<Utc>,
    ) -> (Flashcard, ReviewLog) {
        let scheduled_days = Self::interval_days(difficulty);

        let updated = Flashcard {
            difficulty,
            repetition: flashcard.repetition + 1,
            last_reviewed_at: Some(now),
            next_review_at: Some(now + Duration::days(scheduled_days)),
            updated_at: now,
            ..flashcard.clone()
        };

        (updated, ReviewLog { scheduled_days })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn create_test_flashcard() -> Flashcard {
        let created = Utc::now() - Duration::days(5);
        Flashcard {
            id: Uuid::new_v4(),
            lesson_id: Uuid::new_v4(),
            owner_id: "alice".to_string(),
            question: "What is osmosis?".to_string(),
            answer: "Diffusion of water across a membrane.".to_string(),
            difficulty: Difficulty::Medium,
            repetition: 0,
            last_reviewed_at: None,
            next_review_at: Some(created),
            created_at: created,
            updated_at: created,
        }
    }

    #[test]
    fn test_interval_per_difficulty() {
        assert_eq!(ReviewScheduler::interval_days(Difficulty::Easy), 3);
        assert_eq!(ReviewScheduler::interval_days(Difficulty::Medium), 1);
        assert_eq!(ReviewScheduler::interval_days(Difficulty::Hard), 0);
    }

    #[test]
    fn test_easy_rating_schedules_three_days_out() {
        let scheduler = ReviewScheduler::new();
        let card = create_test_flashcard();
        let now = Utc::now();

        let (updated, log) = scheduler.schedule_flashcard(&card, Difficulty::Easy, now);

        assert_eq!(log.scheduled_days, 3);
        assert_eq!(updated.difficulty, Difficulty::Easy);
        assert_eq!(updated.repetition, 1);
        assert_eq!(updated.last_reviewed_at, Some(now));
        assert_eq!(updated.next_review_at, Some(now + Duration::days(3)));
        assert_eq!(updated.question, card.question);
        assert_eq!(updated.created_at, card.created_at);
    }

    #[test]
    fn test_hard_rating_is_due_immediately() {
        let scheduler = ReviewScheduler::new();
        let now = Utc::now();

        let (updated, _) =
            scheduler.schedule_flashcard(&create_test_flashcard(), Difficulty::Hard, now);

        assert_eq!(updated.next_review_at, Some(now));
    }

    #[test]
    fn test_repetition_counts_every_review() {
        let scheduler = ReviewScheduler::new();
        let mut card = create_test_flashcard();
        let now = Utc::now();

        for expected in 1..=3 {
            let (updated, _) = scheduler.schedule_flashcard(&card, Difficulty::Medium, now);
            assert_eq!(updated.repetition, expected);
            card = updated;
        }
    }
}
