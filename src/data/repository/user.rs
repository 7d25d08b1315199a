use std::sync::Arc;

use sqlx::postgres::PgPool;
use sqlx::{Postgres, Transaction};
use uuid::Uuid;

use crate::data::model::{LearningStats, Paginated, SqlHistoryEntry, User};

#[derive(Clone)]
pub struct UserRepository {
    pub pool: Arc<PgPool>,
}

pub struct NewUser<'a> {
    pub username: &'a str,
    pub email: &'a str,
    pub password_hash: &'a str,
}

#[derive(Default)]
pub struct ProfileUpdate {
    pub username: Option<String>,
    pub email: Option<String>,
    pub avatar_url: Option<String>,
}

impl UserRepository {
    /// Inserts the user and its welcome learning record in one transaction.
    pub async fn create(&self, new_user: NewUser<'_>) -> sqlx::Result<User> {
        let mut tx: Transaction<Postgres> = self.pool.begin().await?;

        let user = sqlx::query_as::<_, User>(
            r#"
            INSERT INTO users (uuid, username, email, password_hash)
            VALUES ($1, $2, $3, $4)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(new_user.username)
        .bind(new_user.email)
        .bind(new_user.password_hash)
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO user_learning_records (user_id, sql_topic, content)
            VALUES ($1, 'Welcome', 'Your SQL learning journey starts here!')
            "#,
        )
        .bind(user.id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(user)
    }

    pub async fn find_by_id(&self, id: i32) -> sqlx::Result<Option<User>> {
        sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = $1")
            .bind(id)
            .fetch_optional(&*self.pool)
            .await
    }

    /// Looks up a user by email, falling back to username.
    pub async fn find_by_login(&self, login: &str) -> sqlx::Result<Option<User>> {
        sqlx::query_as::<_, User>(
            "SELECT * FROM users WHERE email = $1 OR username = $1 ORDER BY (email = $1) DESC LIMIT 1",
        )
        .bind(login)
        .fetch_optional(&*self.pool)
        .await
    }

    pub async fn email_taken(&self, email: &str, except_id: Option<i32>) -> sqlx::Result<bool> {
        sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM users WHERE email = $1 AND ($2::int IS NULL OR id <> $2))",
        )
        .bind(email)
        .bind(except_id)
        .fetch_one(&*self.pool)
        .await
    }

    pub async fn username_taken(
        &self,
        username: &str,
        except_id: Option<i32>,
    ) -> sqlx::Result<bool> {
        sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM users WHERE username = $1 AND ($2::int IS NULL OR id <> $2))",
        )
        .bind(username)
        .bind(except_id)
        .fetch_one(&*self.pool)
        .await
    }

    pub async fn update_last_login(&self, id: i32) -> sqlx::Result<()> {
        sqlx::query("UPDATE users SET last_login = CURRENT_TIMESTAMP WHERE id = $1")
            .bind(id)
            .execute(&*self.pool)
            .await?;
        Ok(())
    }

    /// Applies the non-empty fields of `update`; untouched fields keep their values.
    pub async fn update_profile(&self, id: i32, update: ProfileUpdate) -> sqlx::Result<Option<User>> {
        sqlx::query_as::<_, User>(
            r#"
            UPDATE users
            SET username = COALESCE($1, username),
                email = COALESCE($2, email),
                avatar_url = COALESCE($3, avatar_url),
                updated_at = CURRENT_TIMESTAMP
            WHERE id = $4
            RETURNING *
            "#,
        )
        .bind(update.username)
        .bind(update.email)
        .bind(update.avatar_url)
        .bind(id)
        .fetch_optional(&*self.pool)
        .await
    }

    pub async fn change_password(&self, id: i32, password_hash: &str) -> sqlx::Result<()> {
        sqlx::query(
            "UPDATE users SET password_hash = $1, updated_at = CURRENT_TIMESTAMP WHERE id = $2",
        )
        .bind(password_hash)
        .bind(id)
        .execute(&*self.pool)
        .await?;
        Ok(())
    }

    pub async fn set_active(&self, id: i32, active: bool) -> sqlx::Result<Option<User>> {
        sqlx::query_as::<_, User>(
            "UPDATE users SET is_active = $1, updated_at = CURRENT_TIMESTAMP WHERE id = $2 RETURNING *",
        )
        .bind(active)
        .bind(id)
        .fetch_optional(&*self.pool)
        .await
    }

    pub async fn learning_stats(&self, user_id: i32) -> sqlx::Result<LearningStats> {
        sqlx::query_as::<_, LearningStats>(
            r#"
            SELECT
                COUNT(*) AS total_records,
                COUNT(*) FILTER (WHERE is_correct) AS correct_count,
                COUNT(DISTINCT sql_topic) AS topics_learned
            FROM user_learning_records
            WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .fetch_one(&*self.pool)
        .await
    }

    pub async fn sql_history(&self, user_id: i32, limit: i64) -> sqlx::Result<Vec<SqlHistoryEntry>> {
        sqlx::query_as::<_, SqlHistoryEntry>(
            "SELECT * FROM user_sql_history WHERE user_id = $1 ORDER BY created_at DESC LIMIT $2",
        )
        .bind(user_id)
        .bind(limit)
        .fetch_all(&*self.pool)
        .await
    }

    pub async fn record_sql(
        &self,
        user_id: i32,
        sql_query: &str,
        result: &serde_json::Value,
        is_success: bool,
        execution_time_ms: i32,
    ) -> sqlx::Result<i32> {
        sqlx::query_scalar(
            r#"
            INSERT INTO user_sql_history (user_id, sql_query, execution_result, is_success, execution_time_ms)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id
            "#,
        )
        .bind(user_id)
        .bind(sql_query)
        .bind(result.to_string())
        .bind(is_success)
        .bind(execution_time_ms)
        .fetch_one(&*self.pool)
        .await
    }

    pub async fn list(&self, page: i64, limit: i64) -> sqlx::Result<Paginated<User>> {
        let users = sqlx::query_as::<_, User>(
            "SELECT * FROM users ORDER BY created_at DESC LIMIT $1 OFFSET $2",
        )
        .bind(limit)
        .bind((page - 1).saturating_mul(limit))
        .fetch_all(&*self.pool)
        .await?;

        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users")
            .fetch_one(&*self.pool)
            .await?;

        Ok(Paginated::new(users, total, page, limit))
    }
}
