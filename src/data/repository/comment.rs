use std::sync::Arc;

use sqlx::postgres::PgPool;
use uuid::Uuid;

use crate::data::model::{Comment, CommentView, LikeToggle, Paginated};

#[derive(Clone)]
pub struct CommentRepository {
    pub pool: Arc<PgPool>,
}

pub struct NewComment<'a> {
    pub user_id: Option<i32>,
    pub parent_id: Option<i32>,
    pub content: &'a str,
    pub code_snippet: Option<&'a str>,
    pub is_ai_reply: bool,
}

// $1 is the viewer id; has_liked stays NULL for anonymous viewers.
const VIEW_COLUMNS: &str = r#"
    c.*,
    u.username,
    u.avatar_url,
    u.role AS user_role,
    (SELECT COUNT(*) FROM comments r WHERE r.parent_id = c.id AND r.is_deleted = false) AS reply_count,
    CASE WHEN $1::int IS NULL THEN NULL
         ELSE EXISTS (SELECT 1 FROM comment_likes l WHERE l.comment_id = c.id AND l.user_id = $1)
    END AS has_liked
"#;

impl CommentRepository {
    /// Inserts a comment. Returns `None` when `parent_id` names a missing or deleted comment.
    pub async fn create(&self, new_comment: NewComment<'_>) -> sqlx::Result<Option<Comment>> {
        sqlx::query_as::<_, Comment>(
            r#"
            INSERT INTO comments (uuid, user_id, parent_id, content, code_snippet, is_ai_reply)
            SELECT $1, $2, $3, $4, $5, $6
            WHERE $3::int IS NULL
               OR EXISTS (SELECT 1 FROM comments WHERE id = $3 AND is_deleted = false)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(new_comment.user_id)
        .bind(new_comment.parent_id)
        .bind(new_comment.content)
        .bind(new_comment.code_snippet)
        .bind(new_comment.is_ai_reply)
        .fetch_optional(&*self.pool)
        .await
    }

    /// Top-level comments (newest first) or the replies of `parent_id` (oldest first).
    pub async fn list(
        &self,
        parent_id: Option<i32>,
        viewer: Option<i32>,
        page: i64,
        limit: i64,
    ) -> sqlx::Result<Paginated<CommentView>> {
        let sql = format!(
            r#"
            SELECT {VIEW_COLUMNS}
            FROM comments c
            LEFT JOIN users u ON c.user_id = u.id
            WHERE c.is_deleted = false
              AND (($2::int IS NULL AND c.parent_id IS NULL) OR c.parent_id = $2)
            ORDER BY
              CASE WHEN $2::int IS NULL THEN c.created_at END DESC,
              CASE WHEN $2::int IS NOT NULL THEN c.created_at END ASC
            LIMIT $3 OFFSET $4
            "#
        );
        let comments = sqlx::query_as::<_, CommentView>(&sql)
            .bind(viewer)
            .bind(parent_id)
            .bind(limit)
            .bind((page - 1).saturating_mul(limit))
            .fetch_all(&*self.pool)
            .await?;

        let total: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM comments
            WHERE is_deleted = false
              AND (($1::int IS NULL AND parent_id IS NULL) OR parent_id = $1)
            "#,
        )
        .bind(parent_id)
        .fetch_one(&*self.pool)
        .await?;

        Ok(Paginated::new(comments, total, page, limit))
    }

    pub async fn find(&self, id: i32, viewer: Option<i32>) -> sqlx::Result<Option<CommentView>> {
        let sql = format!(
            r#"
            SELECT {VIEW_COLUMNS}
            FROM comments c
            LEFT JOIN users u ON c.user_id = u.id
            WHERE c.id = $2 AND c.is_deleted = false
            "#
        );
        sqlx::query_as::<_, CommentView>(&sql)
            .bind(viewer)
            .bind(id)
            .fetch_optional(&*self.pool)
            .await
    }

    /// Edits a comment owned by `user_id`.
    pub async fn update(
        &self,
        id: i32,
        user_id: i32,
        content: &str,
        code_snippet: Option<&str>,
    ) -> sqlx::Result<Option<Comment>> {
        sqlx::query_as::<_, Comment>(
            r#"
            UPDATE comments
            SET content = $1, code_snippet = $2, is_edited = true, updated_at = CURRENT_TIMESTAMP
            WHERE id = $3 AND user_id = $4 AND is_deleted = false
            RETURNING *
            "#,
        )
        .bind(content)
        .bind(code_snippet)
        .bind(id)
        .bind(user_id)
        .fetch_optional(&*self.pool)
        .await
    }

    /// Soft-deletes a comment owned by `user_id`, or any comment when `any_author` is set.
    pub async fn soft_delete(&self, id: i32, user_id: i32, any_author: bool) -> sqlx::Result<bool> {
        let deleted = sqlx::query(
            r#"
            UPDATE comments
            SET is_deleted = true, updated_at = CURRENT_TIMESTAMP
            WHERE id = $1 AND is_deleted = false AND ($3 OR user_id = $2)
            "#,
        )
        .bind(id)
        .bind(user_id)
        .bind(any_author)
        .execute(&*self.pool)
        .await?
        .rows_affected();
        Ok(deleted > 0)
    }

    /// Flips the caller's like and adjusts the counter in a single statement.
    pub async fn toggle_like(&self, comment_id: i32, user_id: i32) -> sqlx::Result<Option<LikeToggle>> {
        sqlx::query_as::<_, LikeToggle>(
            r#"
            WITH target AS (
                SELECT id FROM comments WHERE id = $1 AND is_deleted = false
            ), removed AS (
                DELETE FROM comment_likes
                WHERE comment_id IN (SELECT id FROM target) AND user_id = $2
                RETURNING comment_id
            ), added AS (
                INSERT INTO comment_likes (comment_id, user_id)
                SELECT id, $2 FROM target
                WHERE NOT EXISTS (SELECT 1 FROM removed)
                ON CONFLICT (user_id, comment_id) DO NOTHING
                RETURNING comment_id
            )
            UPDATE comments
            SET likes_count = likes_count
                + (SELECT COUNT(*) FROM added)::int
                - (SELECT COUNT(*) FROM removed)::int
            WHERE id = $1 AND is_deleted = false
            RETURNING EXISTS (SELECT 1 FROM added) AS liked, likes_count
            "#,
        )
        .bind(comment_id)
        .bind(user_id)
        .fetch_optional(&*self.pool)
        .await
    }

    pub async fn by_user(&self, user_id: i32, page: i64, limit: i64) -> sqlx::Result<Paginated<Comment>> {
        let comments = sqlx::query_as::<_, Comment>(
            r#"
            SELECT * FROM comments
            WHERE user_id = $1 AND is_deleted = false
            ORDER BY created_at DESC
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(user_id)
        .bind(limit)
        .bind((page - 1).saturating_mul(limit))
        .fetch_all(&*self.pool)
        .await?;

        let total: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM comments WHERE user_id = $1 AND is_deleted = false",
        )
        .bind(user_id)
        .fetch_one(&*self.pool)
        .await?;

        Ok(Paginated::new(comments, total, page, limit))
    }

    pub async fn recent(&self, limit: i64) -> sqlx::Result<Vec<CommentView>> {
        let sql = format!(
            r#"
            SELECT {VIEW_COLUMNS}
            FROM comments c
            LEFT JOIN users u ON c.user_id = u.id
            WHERE c.is_deleted = false
            ORDER BY c.created_at DESC
            LIMIT $2
            "#
        );
        sqlx::query_as::<_, CommentView>(&sql)
            .bind(None::<i32>)
            .bind(limit)
            .fetch_all(&*self.pool)
            .await
    }

    /// Recent comments carrying a code snippet, used for the mistakes summary.
    pub async fn with_code(&self, limit: i64) -> sqlx::Result<Vec<Comment>> {
        sqlx::query_as::<_, Comment>(
            r#"
            SELECT * FROM comments
            WHERE code_snippet IS NOT NULL AND code_snippet <> '' AND is_deleted = false
            ORDER BY created_at DESC
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(&*self.pool)
        .await
    }

    pub async fn record_ai_response(
        &self,
        comment_id: i32,
        original_content: &str,
        analysis: &str,
    ) -> sqlx::Result<()> {
        sqlx::query(
            r#"
            INSERT INTO ai_responses (comment_id, original_content, ai_analysis, code_evaluation)
            VALUES ($1, $2, $3, $3)
            "#,
        )
        .bind(comment_id)
        .bind(original_content)
        .bind(analysis)
        .execute(&*self.pool)
        .await?;
        Ok(())
    }
}
