mod comment;
mod exercise;
mod knowledge;
mod user;

pub use comment::{CommentRepository, NewComment};
pub use exercise::{ExerciseRepository, SubmissionRecord};
pub use knowledge::{KnowledgeFields, KnowledgeRepository, COMPLETION_SCORE};
pub use user::{NewUser, ProfileUpdate, UserRepository};

// These run against a scratch PostgreSQL database:
//   DATABASE_URL=postgres://... cargo test -- --ignored
#[cfg(test)]
mod tests {
    use std::{path::Path, sync::Arc};

    use sqlx::{migrate::Migrator, postgres::PgPool};
    use uuid::Uuid;

    use super::*;

    async fn setup() -> (Arc<PgPool>, i32) {
        let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");
        let pool = Arc::new(PgPool::connect(&url).await.unwrap());

        let migrator = Migrator::new(Path::new("migrations")).await.unwrap();
        migrator.run(&*pool).await.unwrap();

        let users = UserRepository { pool: pool.clone() };
        let tag = Uuid::new_v4().simple().to_string();
        let user = users
            .create(NewUser {
                username: &format!("u{}", &tag[..12]),
                email: &format!("{}@example.com", tag),
                password_hash: "not-a-real-hash",
            })
            .await
            .unwrap();

        (pool, user.id)
    }

    #[tokio::test]
    #[ignore = "needs a PostgreSQL DATABASE_URL"]
    async fn test_resubmission_updates_single_row() {
        let (pool, user_id) = setup().await;
        let repo = ExerciseRepository { pool: pool.clone() };
        let exercise = repo.list(None).await.unwrap().remove(0);

        let first = repo
            .save_submission(SubmissionRecord {
                user_id,
                exercise_id: exercise.id,
                user_sql: "SELECT 1",
                is_correct: false,
                ai_feedback: Some("try again"),
            })
            .await
            .unwrap();
        assert_eq!(first.attempt_count, 1);

        let second = repo
            .save_submission(SubmissionRecord {
                user_id,
                exercise_id: exercise.id,
                user_sql: "SELECT 1",
                is_correct: false,
                ai_feedback: None,
            })
            .await
            .unwrap();
        assert_eq!(second.id, first.id);
        assert_eq!(second.attempt_count, 2);
        assert_eq!(second.ai_feedback, None);

        let rows: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM exercise_submissions WHERE user_id = $1 AND exercise_id = $2",
        )
        .bind(user_id)
        .bind(exercise.id)
        .fetch_one(&*pool)
        .await
        .unwrap();
        assert_eq!(rows, 1);
    }

    #[tokio::test]
    #[ignore = "needs a PostgreSQL DATABASE_URL"]
    async fn test_like_toggle_twice_restores_state() {
        let (pool, user_id) = setup().await;
        let repo = CommentRepository { pool };
        let comment = repo
            .create(NewComment {
                user_id: Some(user_id),
                parent_id: None,
                content: "How do I use GROUP BY?",
                code_snippet: None,
                is_ai_reply: false,
            })
            .await
            .unwrap()
            .unwrap();

        let liked = repo.toggle_like(comment.id, user_id).await.unwrap().unwrap();
        assert!(liked.liked);
        assert_eq!(liked.likes_count, 1);

        let unliked = repo.toggle_like(comment.id, user_id).await.unwrap().unwrap();
        assert!(!unliked.liked);
        assert_eq!(unliked.likes_count, 0);
    }

    #[tokio::test]
    #[ignore = "needs a PostgreSQL DATABASE_URL"]
    async fn test_reply_to_deleted_comment_is_rejected() {
        let (pool, user_id) = setup().await;
        let repo = CommentRepository { pool };
        let parent = repo
            .create(NewComment {
                user_id: Some(user_id),
                parent_id: None,
                content: "parent",
                code_snippet: None,
                is_ai_reply: false,
            })
            .await
            .unwrap()
            .unwrap();
        assert!(repo.soft_delete(parent.id, user_id, false).await.unwrap());

        let reply = repo
            .create(NewComment {
                user_id: Some(user_id),
                parent_id: Some(parent.id),
                content: "reply",
                code_snippet: None,
                is_ai_reply: false,
            })
            .await
            .unwrap();
        assert!(reply.is_none());
    }

    #[tokio::test]
    #[ignore = "needs a PostgreSQL DATABASE_URL"]
    async fn test_view_increments_counter() {
        let (pool, _) = setup().await;
        let repo = KnowledgeRepository { pool };
        let point = repo.list(None, None).await.unwrap().remove(0);

        let first = repo.view(point.id).await.unwrap().unwrap();
        let second = repo.view(point.id).await.unwrap().unwrap();
        assert_eq!(second.view_count, first.view_count + 1);
    }
}
