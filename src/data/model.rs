use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

pub const ROLE_ADMIN: &str = "admin";
pub const ROLE_MODERATOR: &str = "moderator";

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: i32,
    pub uuid: String,
    pub username: String,
    pub email: String,
    #[serde(skip)]
    pub password_hash: String,
    pub avatar_url: Option<String>,
    pub role: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_login: Option<DateTime<Utc>>,
}

impl User {
    pub fn is_admin(&self) -> bool {
        self.role == ROLE_ADMIN
    }

    pub fn is_moderator(&self) -> bool {
        self.role == ROLE_MODERATOR || self.is_admin()
    }
}

#[derive(Debug, Clone, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct LearningStats {
    pub total_records: i64,
    pub correct_count: i64,
    pub topics_learned: i64,
}

#[derive(Debug, Clone, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct SqlHistoryEntry {
    pub id: i32,
    pub user_id: i32,
    pub sql_query: String,
    pub execution_result: Option<String>,
    pub is_success: bool,
    pub execution_time_ms: Option<i32>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Comment {
    pub id: i32,
    pub uuid: String,
    pub user_id: Option<i32>,
    pub parent_id: Option<i32>,
    pub content: String,
    pub code_snippet: Option<String>,
    pub likes_count: i32,
    pub is_ai_reply: bool,
    pub is_edited: bool,
    pub is_deleted: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A comment joined with its author, as shown in listings.
#[derive(Debug, Clone, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct CommentView {
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub comment: Comment,
    pub username: Option<String>,
    pub avatar_url: Option<String>,
    pub user_role: Option<String>,
    #[sqlx(default)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply_count: Option<i64>,
    #[sqlx(default)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub has_liked: Option<bool>,
}

#[derive(Debug, Clone, Copy, Serialize, FromRow, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct LikeToggle {
    pub liked: bool,
    pub likes_count: i32,
}

#[derive(Debug, Clone, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct KnowledgePoint {
    pub id: i32,
    pub category: String,
    pub title: String,
    pub content: String,
    pub difficulty: Option<String>,
    pub common_mistakes: Option<String>,
    pub examples: Option<String>,
    pub view_count: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct CategoryCount {
    pub category: String,
    pub count: i64,
}

#[derive(Debug, Clone, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct MistakeSummary {
    pub category: String,
    pub title: String,
    pub common_mistakes: Option<String>,
}

#[derive(Debug, Clone, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct KnowledgeProgress {
    pub id: i32,
    pub user_id: i32,
    pub knowledge_point_id: i32,
    pub is_completed: bool,
    pub score: i32,
    pub completed_at: Option<DateTime<Utc>>,
}

/// A knowledge point together with the caller's progress on it, if any.
#[derive(Debug, Clone, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct KnowledgeWithProgress {
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub point: KnowledgePoint,
    pub score: Option<i32>,
    pub is_completed: Option<bool>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Exercise {
    pub id: i32,
    pub title: String,
    pub description: String,
    pub difficulty: String,
    pub category: Option<String>,
    pub hint: Option<String>,
    /// Reference query; never sent to clients.
    #[serde(skip)]
    pub correct_sql: String,
    pub expected_result_description: Option<String>,
    pub order_index: i32,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Submission {
    pub id: i32,
    pub user_id: i32,
    pub exercise_id: i32,
    pub user_sql: String,
    pub is_correct: bool,
    pub ai_feedback: Option<String>,
    pub attempt_count: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct ExerciseProgress {
    pub id: i32,
    pub title: String,
    pub difficulty: String,
    pub category: Option<String>,
    pub is_correct: Option<bool>,
    pub attempt_count: Option<i32>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Paginated<T> {
    pub items: Vec<T>,
    pub total: i64,
    pub page: i64,
    pub limit: i64,
    pub total_pages: i64,
}

impl<T> Paginated<T> {
    pub fn new(items: Vec<T>, total: i64, page: i64, limit: i64) -> Self {
        let total_pages = if limit > 0 { (total + limit - 1) / limit } else { 0 };
        Paginated {
            items,
            total,
            page,
            limit,
            total_pages,
        }
    }
}

/// Page/limit query parameters, clamped to sane bounds.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct PageParams {
    pub page: Option<i64>,
    pub limit: Option<i64>,
}

impl PageParams {
    pub const MAX_LIMIT: i64 = 100;
    /// Keeps `(page - 1) * limit` inside `i64` for any allowed limit.
    pub const MAX_PAGE: i64 = i64::MAX / Self::MAX_LIMIT;

    pub fn page(&self) -> i64 {
        self.page.filter(|p| *p > 0).unwrap_or(1).min(Self::MAX_PAGE)
    }

    pub fn limit(&self, default: i64) -> i64 {
        self.limit
            .filter(|l| *l > 0)
            .unwrap_or(default)
            .min(Self::MAX_LIMIT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_total_pages_rounds_up() {
        let page: Paginated<i32> = Paginated::new(vec![], 41, 1, 20);
        assert_eq!(page.total_pages, 3);
        let empty: Paginated<i32> = Paginated::new(vec![], 0, 1, 20);
        assert_eq!(empty.total_pages, 0);
    }

    #[test]
    fn test_page_params_clamp() {
        let params = PageParams {
            page: Some(0),
            limit: Some(500),
        };
        assert_eq!(params.page(), 1);
        assert_eq!(params.limit(20), PageParams::MAX_LIMIT);

        let params = PageParams {
            page: Some(3),
            limit: None,
        };
        assert_eq!(params.page(), 3);
        assert_eq!(params.limit(20), 20);

        let params = PageParams {
            page: Some(i64::MAX),
            limit: Some(i64::MAX),
        };
        assert_eq!(params.page(), PageParams::MAX_PAGE);
        assert!((params.page() - 1).checked_mul(params.limit(20)).is_some());
    }

    #[test]
    fn test_password_hash_not_serialized() {
        let now = Utc::now();
        let user = User {
            id: 1,
            uuid: "u".to_string(),
            username: "alice".to_string(),
            email: "alice@example.com".to_string(),
            password_hash: "secret-hash".to_string(),
            avatar_url: None,
            role: "user".to_string(),
            is_active: true,
            created_at: now,
            updated_at: now,
            last_login: None,
        };
        let json = serde_json::to_string(&user).unwrap();
        assert!(!json.contains("secret-hash"));
        assert!(json.contains("\"isActive\":true"));
        assert!(!user.is_moderator());
    }
}
