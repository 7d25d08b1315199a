use axum::{
    middleware::from_fn_with_state,
    routing::{get, post, put},
    Json, Router,
};
use chrono::Utc;
use regex::Regex;
use serde::{Deserialize, Deserializer};
use serde_json::{json, Value};
use validator::ValidationError;

use std::sync::{Arc, OnceLock};

use crate::{
    middleware::{ai_rate_limit, api_rate_limit, extract_user},
    AppState,
};

mod auth;
use auth::{
    change_password, history, list_users, login, profile, register, set_user_status,
    update_profile,
};
mod comments;
use comments::{
    ai_reply, comment_by_id, create_comment, delete_comment, list_comments, my_comments,
    recent_comments, toggle_like, update_comment,
};
mod knowledge;
use knowledge::{
    create_knowledge, delete_knowledge, knowledge_by_id, list_knowledge, mistakes, popular,
    record_progress, search, update_knowledge,
};
mod exercises;
use exercises::{exercise_by_id, execute, hint, list_exercises, schema, submit};
mod ai;
use ai::{analyze, ask, chat, correct, evaluate, generate_exercise, weekly_summary};

const VERSION: &str = env!("CARGO_PKG_VERSION");

pub fn api_router(state: Arc<AppState>) -> Router<Arc<AppState>> {
    let auth_router = Router::new()
        .route("/register", post(register))
        .route("/login", post(login))
        .route("/profile", get(profile).put(update_profile))
        .route("/password", put(change_password))
        .route("/history", get(history))
        .route("/users", get(list_users))
        .route("/users/:id/status", put(set_user_status));

    let comments_router = Router::new()
        .route("/", get(list_comments).post(create_comment))
        .route("/recent", get(recent_comments))
        .route("/user/me", get(my_comments))
        .route(
            "/:id",
            get(comment_by_id).put(update_comment).delete(delete_comment),
        )
        .route("/:id/like", post(toggle_like))
        .route("/:id/ai-reply", post(ai_reply));

    let knowledge_router = Router::new()
        .route("/", get(list_knowledge).post(create_knowledge))
        .route("/categories", get(knowledge::categories))
        .route("/popular", get(popular))
        .route("/search", get(search))
        .route("/mistakes", get(mistakes))
        .route("/user/progress", get(knowledge::user_progress))
        .route(
            "/:id",
            get(knowledge_by_id)
                .put(update_knowledge)
                .delete(delete_knowledge),
        )
        .route("/:id/progress", post(record_progress));

    let exercises_router = Router::new()
        .route("/", get(list_exercises))
        .route("/categories", get(exercises::categories))
        .route("/schema", get(schema))
        .route("/user/progress", get(exercises::user_progress))
        .route("/execute", post(execute))
        .route("/:id", get(exercise_by_id))
        .route("/:id/submit", post(submit))
        .route("/:id/hint", post(hint));

    let ai_router = Router::new()
        .route("/analyze", post(analyze))
        .route("/ask", post(ask))
        .route("/correct", post(correct))
        .route("/chat", post(chat))
        .route("/evaluate", post(evaluate))
        .route("/exercise", post(generate_exercise))
        .route("/weekly-summary", get(weekly_summary))
        .layer(from_fn_with_state(state.clone(), ai_rate_limit));

    Router::new()
        .route("/", get(index))
        .route("/health", get(health))
        .nest("/auth", auth_router)
        .nest("/comments", comments_router)
        .nest("/knowledge", knowledge_router)
        .nest("/exercises", exercises_router)
        .nest("/ai", ai_router)
        .layer(from_fn_with_state(state.clone(), extract_user))
        .layer(from_fn_with_state(state, api_rate_limit))
}

async fn health() -> Json<Value> {
    Json(json!({
        "success": true,
        "message": "SQL learning platform API is running",
        "timestamp": Utc::now().to_rfc3339(),
        "version": VERSION,
    }))
}

async fn index() -> Json<Value> {
    Json(json!({
        "success": true,
        "message": "Welcome to the SQL learning platform API",
        "version": VERSION,
        "endpoints": {
            "auth": {
                "POST /api/auth/register": "Register",
                "POST /api/auth/login": "Log in",
                "GET /api/auth/profile": "Current user and learning stats",
                "PUT /api/auth/profile": "Update profile",
                "PUT /api/auth/password": "Change password",
                "GET /api/auth/history": "SQL history",
            },
            "comments": {
                "GET /api/comments": "List comments",
                "GET /api/comments/recent": "Recent comments",
                "GET /api/comments/user/me": "My comments",
                "POST /api/comments": "Post a comment",
                "GET /api/comments/:id": "Comment with replies",
                "PUT /api/comments/:id": "Edit a comment",
                "DELETE /api/comments/:id": "Delete a comment",
                "POST /api/comments/:id/like": "Like or unlike",
                "POST /api/comments/:id/ai-reply": "Ask the AI to reply",
            },
            "knowledge": {
                "GET /api/knowledge": "List knowledge points",
                "GET /api/knowledge/categories": "Categories",
                "GET /api/knowledge/popular": "Most viewed",
                "GET /api/knowledge/search": "Search",
                "GET /api/knowledge/mistakes": "Common mistakes",
                "GET /api/knowledge/user/progress": "My progress",
                "GET /api/knowledge/:id": "Knowledge point detail",
                "POST /api/knowledge/:id/progress": "Record progress",
            },
            "exercises": {
                "GET /api/exercises": "List exercises",
                "GET /api/exercises/categories": "Categories",
                "GET /api/exercises/schema": "Practice tables",
                "GET /api/exercises/user/progress": "My progress",
                "GET /api/exercises/:id": "Exercise detail",
                "POST /api/exercises/execute": "Run a query",
                "POST /api/exercises/:id/submit": "Submit an answer",
                "POST /api/exercises/:id/hint": "Ask for a hint",
            },
            "ai": {
                "POST /api/ai/analyze": "Analyse SQL",
                "POST /api/ai/ask": "Ask a question",
                "POST /api/ai/correct": "Correct SQL",
                "POST /api/ai/chat": "Chat",
                "POST /api/ai/evaluate": "Review code",
                "POST /api/ai/exercise": "Generate an exercise",
                "GET /api/ai/weekly-summary": "Weekly mistakes summary",
            },
        },
    }))
}

fn trimmed<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(String::deserialize(deserializer)?.trim().to_string())
}

fn trimmed_opt<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty()))
}

fn not_blank(value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(ValidationError::new("blank"));
    }
    Ok(())
}

fn valid_username(value: &str) -> Result<(), ValidationError> {
    static USERNAME: OnceLock<Option<Regex>> = OnceLock::new();
    let pattern = USERNAME.get_or_init(|| Regex::new("^[A-Za-z0-9_\u{4e00}-\u{9fa5}]+$").ok());
    match pattern {
        Some(re) if re.is_match(value) => Ok(()),
        _ => Err(ValidationError::new("username")),
    }
}

fn valid_difficulty(value: &str) -> Result<(), ValidationError> {
    match value {
        "beginner" | "intermediate" | "advanced" => Ok(()),
        _ => Err(ValidationError::new("difficulty")),
    }
}

fn percentage(part: usize, total: usize) -> i64 {
    if total == 0 {
        return 0;
    }
    ((part as f64 / total as f64) * 100.0).round() as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_username() {
        assert!(valid_username("alice_01").is_ok());
        assert!(valid_username("李雷").is_ok());
        assert!(valid_username("bob smith").is_err());
        assert!(valid_username("eve!").is_err());
    }

    #[test]
    fn test_percentage_rounds() {
        assert_eq!(percentage(0, 0), 0);
        assert_eq!(percentage(1, 3), 33);
        assert_eq!(percentage(2, 3), 67);
        assert_eq!(percentage(9, 9), 100);
    }
}
