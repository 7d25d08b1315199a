use std::sync::Arc;

use sqlx::postgres::PgPool;
use sqlx::{Postgres, QueryBuilder};

use crate::data::model::{
    CategoryCount, KnowledgePoint, KnowledgeProgress, KnowledgeWithProgress, MistakeSummary,
};

/// Score at or above which a knowledge point counts as completed.
pub const COMPLETION_SCORE: i32 = 80;

#[derive(Clone)]
pub struct KnowledgeRepository {
    pub pool: Arc<PgPool>,
}

#[derive(Debug, Default, Clone)]
pub struct KnowledgeFields {
    pub category: Option<String>,
    pub title: Option<String>,
    pub content: Option<String>,
    pub difficulty: Option<String>,
    pub common_mistakes: Option<String>,
    pub examples: Option<String>,
}

impl KnowledgeRepository {
    pub async fn list(
        &self,
        category: Option<&str>,
        difficulty: Option<&str>,
    ) -> sqlx::Result<Vec<KnowledgePoint>> {
        let mut query: QueryBuilder<Postgres> =
            QueryBuilder::new("SELECT * FROM sql_knowledge_points WHERE 1=1");
        if let Some(category) = category {
            query.push(" AND category = ").push_bind(category);
        }
        if let Some(difficulty) = difficulty {
            query.push(" AND difficulty = ").push_bind(difficulty);
        }
        query.push(" ORDER BY id");

        query
            .build_query_as::<KnowledgePoint>()
            .fetch_all(&*self.pool)
            .await
    }

    /// Fetches a knowledge point and counts the view in the same statement.
    pub async fn view(&self, id: i32) -> sqlx::Result<Option<KnowledgePoint>> {
        sqlx::query_as::<_, KnowledgePoint>(
            "UPDATE sql_knowledge_points SET view_count = view_count + 1 WHERE id = $1 RETURNING *",
        )
        .bind(id)
        .fetch_optional(&*self.pool)
        .await
    }

    pub async fn categories(&self) -> sqlx::Result<Vec<CategoryCount>> {
        sqlx::query_as::<_, CategoryCount>(
            r#"
            SELECT category, COUNT(*) AS count
            FROM sql_knowledge_points
            GROUP BY category
            ORDER BY category
            "#,
        )
        .fetch_all(&*self.pool)
        .await
    }

    pub async fn search(&self, keyword: &str) -> sqlx::Result<Vec<KnowledgePoint>> {
        sqlx::query_as::<_, KnowledgePoint>(
            r#"
            SELECT * FROM sql_knowledge_points
            WHERE title ILIKE $1 OR content ILIKE $1 OR common_mistakes ILIKE $1
            ORDER BY view_count DESC
            "#,
        )
        .bind(format!("%{}%", escape_like(keyword)))
        .fetch_all(&*self.pool)
        .await
    }

    pub async fn popular(&self, limit: i64) -> sqlx::Result<Vec<KnowledgePoint>> {
        sqlx::query_as::<_, KnowledgePoint>(
            "SELECT * FROM sql_knowledge_points ORDER BY view_count DESC, id LIMIT $1",
        )
        .bind(limit)
        .fetch_all(&*self.pool)
        .await
    }

    pub async fn mistakes(&self) -> sqlx::Result<Vec<MistakeSummary>> {
        sqlx::query_as::<_, MistakeSummary>(
            r#"
            SELECT category, title, common_mistakes
            FROM sql_knowledge_points
            WHERE common_mistakes IS NOT NULL AND common_mistakes <> ''
            ORDER BY view_count DESC
            "#,
        )
        .fetch_all(&*self.pool)
        .await
    }

    pub async fn create(&self, fields: KnowledgeFields) -> sqlx::Result<KnowledgePoint> {
        sqlx::query_as::<_, KnowledgePoint>(
            r#"
            INSERT INTO sql_knowledge_points (category, title, content, difficulty, common_mistakes, examples)
            VALUES ($1, $2, $3, COALESCE($4, 'beginner'), $5, $6)
            RETURNING *
            "#,
        )
        .bind(fields.category)
        .bind(fields.title)
        .bind(fields.content)
        .bind(fields.difficulty)
        .bind(fields.common_mistakes)
        .bind(fields.examples)
        .fetch_one(&*self.pool)
        .await
    }

    /// Partial update: `None` fields are left unchanged.
    pub async fn update(&self, id: i32, fields: KnowledgeFields) -> sqlx::Result<Option<KnowledgePoint>> {
        sqlx::query_as::<_, KnowledgePoint>(
            r#"
            UPDATE sql_knowledge_points
            SET category = COALESCE($1, category),
                title = COALESCE($2, title),
                content = COALESCE($3, content),
                difficulty = COALESCE($4, difficulty),
                common_mistakes = COALESCE($5, common_mistakes),
                examples = COALESCE($6, examples),
                updated_at = CURRENT_TIMESTAMP
            WHERE id = $7
            RETURNING *
            "#,
        )
        .bind(fields.category)
        .bind(fields.title)
        .bind(fields.content)
        .bind(fields.difficulty)
        .bind(fields.common_mistakes)
        .bind(fields.examples)
        .bind(id)
        .fetch_optional(&*self.pool)
        .await
    }

    pub async fn delete(&self, id: i32) -> sqlx::Result<bool> {
        let deleted = sqlx::query("DELETE FROM sql_knowledge_points WHERE id = $1")
            .bind(id)
            .execute(&*self.pool)
            .await?
            .rows_affected();
        Ok(deleted > 0)
    }

    /// Keeps the best score seen; a completed point never becomes incomplete again.
    pub async fn record_progress(
        &self,
        user_id: i32,
        knowledge_point_id: i32,
        score: i32,
    ) -> sqlx::Result<KnowledgeProgress> {
        sqlx::query_as::<_, KnowledgeProgress>(
            r#"
            INSERT INTO user_knowledge_progress (user_id, knowledge_point_id, score, is_completed, completed_at)
            VALUES ($1, $2, $3, $4, CASE WHEN $4 THEN CURRENT_TIMESTAMP ELSE NULL END)
            ON CONFLICT (user_id, knowledge_point_id) DO UPDATE SET
                score = GREATEST(user_knowledge_progress.score, EXCLUDED.score),
                is_completed = user_knowledge_progress.is_completed OR EXCLUDED.is_completed,
                completed_at = CASE
                    WHEN EXCLUDED.is_completed AND user_knowledge_progress.completed_at IS NULL
                        THEN CURRENT_TIMESTAMP
                    ELSE user_knowledge_progress.completed_at
                END
            RETURNING *
            "#,
        )
        .bind(user_id)
        .bind(knowledge_point_id)
        .bind(score)
        .bind(score >= COMPLETION_SCORE)
        .fetch_one(&*self.pool)
        .await
    }

    pub async fn user_progress(&self, user_id: i32) -> sqlx::Result<Vec<KnowledgeWithProgress>> {
        sqlx::query_as::<_, KnowledgeWithProgress>(
            r#"
            SELECT kp.*, ukp.score, ukp.is_completed, ukp.completed_at
            FROM sql_knowledge_points kp
            LEFT JOIN user_knowledge_progress ukp
                ON kp.id = ukp.knowledge_point_id AND ukp.user_id = $1
            ORDER BY kp.id
            "#,
        )
        .bind(user_id)
        .fetch_all(&*self.pool)
        .await
    }
}

fn escape_like(keyword: &str) -> String {
    keyword
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}
