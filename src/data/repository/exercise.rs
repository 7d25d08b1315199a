use std::sync::Arc;

use sqlx::postgres::PgPool;

use crate::data::model::{Exercise, ExerciseProgress, Submission};

#[derive(Clone)]
pub struct ExerciseRepository {
    pub pool: Arc<PgPool>,
}

pub struct SubmissionRecord<'a> {
    pub user_id: i32,
    pub exercise_id: i32,
    pub user_sql: &'a str,
    pub is_correct: bool,
    pub ai_feedback: Option<&'a str>,
}

impl ExerciseRepository {
    pub async fn list(&self, category: Option<&str>) -> sqlx::Result<Vec<Exercise>> {
        sqlx::query_as::<_, Exercise>(
            r#"
            SELECT * FROM exercises
            WHERE $1::text IS NULL OR category = $1
            ORDER BY order_index ASC
            "#,
        )
        .bind(category)
        .fetch_all(&*self.pool)
        .await
    }

    pub async fn find(&self, id: i32) -> sqlx::Result<Option<Exercise>> {
        sqlx::query_as::<_, Exercise>("SELECT * FROM exercises WHERE id = $1")
            .bind(id)
            .fetch_optional(&*self.pool)
            .await
    }

    pub async fn categories(&self) -> sqlx::Result<Vec<String>> {
        sqlx::query_scalar(
            "SELECT DISTINCT category FROM exercises WHERE category IS NOT NULL ORDER BY category",
        )
        .fetch_all(&*self.pool)
        .await
    }

    pub async fn submission(&self, user_id: i32, exercise_id: i32) -> sqlx::Result<Option<Submission>> {
        sqlx::query_as::<_, Submission>(
            "SELECT * FROM exercise_submissions WHERE user_id = $1 AND exercise_id = $2",
        )
        .bind(user_id)
        .bind(exercise_id)
        .fetch_optional(&*self.pool)
        .await
    }

    /// Upserts the caller's single submission row for the exercise. Every call after
    /// the first overwrites the previous attempt and bumps `attempt_count`.
    pub async fn save_submission(&self, record: SubmissionRecord<'_>) -> sqlx::Result<Submission> {
        sqlx::query_as::<_, Submission>(
            r#"
            INSERT INTO exercise_submissions (user_id, exercise_id, user_sql, is_correct, ai_feedback)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (user_id, exercise_id) DO UPDATE SET
                user_sql = EXCLUDED.user_sql,
                is_correct = EXCLUDED.is_correct,
                ai_feedback = EXCLUDED.ai_feedback,
                attempt_count = exercise_submissions.attempt_count + 1,
                updated_at = CURRENT_TIMESTAMP
            RETURNING *
            "#,
        )
        .bind(record.user_id)
        .bind(record.exercise_id)
        .bind(record.user_sql)
        .bind(record.is_correct)
        .bind(record.ai_feedback)
        .fetch_one(&*self.pool)
        .await
    }

    pub async fn user_progress(&self, user_id: i32) -> sqlx::Result<Vec<ExerciseProgress>> {
        sqlx::query_as::<_, ExerciseProgress>(
            r#"
            SELECT e.id, e.title, e.difficulty, e.category,
                   es.is_correct, es.attempt_count, es.updated_at
            FROM exercises e
            LEFT JOIN exercise_submissions es ON e.id = es.exercise_id AND es.user_id = $1
            ORDER BY e.order_index ASC
            "#,
        )
        .bind(user_id)
        .fetch_all(&*self.pool)
        .await
    }
}
