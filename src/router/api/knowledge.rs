use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use validator::Validate;

use std::sync::Arc;

use super::{not_blank, percentage, trimmed, trimmed_opt, valid_difficulty};
use crate::{
    data::{
        model::PageParams,
        repository::{KnowledgeFields, COMPLETION_SCORE},
    },
    error::{done, success, success_with, ApiError, ApiResult, Envelope},
    middleware::{RequireAdmin, RequireUser, ValidatedJson},
    AppState,
};

#[derive(Deserialize, Debug)]
pub struct KnowledgeFilter {
    category: Option<String>,
    difficulty: Option<String>,
}

pub async fn list_knowledge(
    State(state): State<Arc<AppState>>,
    Query(filter): Query<KnowledgeFilter>,
) -> ApiResult<Value> {
    let points = state
        .knowledge
        .list(
            filter.category.as_deref().filter(|c| !c.is_empty()),
            filter.difficulty.as_deref().filter(|d| !d.is_empty()),
        )
        .await?;
    Ok(success(json!({ "knowledgePoints": points })))
}

pub async fn categories(State(state): State<Arc<AppState>>) -> ApiResult<Value> {
    let categories = state.knowledge.categories().await?;
    Ok(success(json!({ "categories": categories })))
}

pub async fn popular(
    State(state): State<Arc<AppState>>,
    Query(params): Query<PageParams>,
) -> ApiResult<Value> {
    let points = state.knowledge.popular(params.limit(5)).await?;
    Ok(success(json!({ "knowledgePoints": points })))
}

#[derive(Deserialize, Debug)]
pub struct Search {
    keyword: Option<String>,
}

pub async fn search(
    State(state): State<Arc<AppState>>,
    Query(search): Query<Search>,
) -> ApiResult<Value> {
    let keyword = search
        .keyword
        .as_deref()
        .map(str::trim)
        .filter(|k| !k.is_empty())
        .ok_or_else(|| ApiError::BadRequest("Please provide a search keyword".to_string()))?;

    let results = state.knowledge.search(keyword).await?;
    Ok(success(json!({ "results": results })))
}

pub async fn mistakes(State(state): State<Arc<AppState>>) -> ApiResult<Value> {
    let mistakes = state.knowledge.mistakes().await?;
    Ok(success(json!({ "mistakes": mistakes })))
}

pub async fn user_progress(
    State(state): State<Arc<AppState>>,
    RequireUser(user): RequireUser,
) -> ApiResult<Value> {
    let progress = state.knowledge.user_progress(user.id).await?;
    let completed = progress
        .iter()
        .filter(|p| p.is_completed.unwrap_or(false))
        .count();

    Ok(success(json!({
        "progress": progress,
        "summary": {
            "total": progress.len(),
            "completed": completed,
            "percentage": percentage(completed, progress.len()),
        },
    })))
}

pub async fn knowledge_by_id(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i32>,
) -> ApiResult<Value> {
    let point = state
        .knowledge
        .view(id)
        .await?
        .ok_or(ApiError::NotFound("Knowledge point not found"))?;
    Ok(success(json!({ "knowledgePoint": point })))
}

#[derive(Deserialize, Debug, Validate)]
pub struct ProgressForm {
    #[validate(range(min = 0, max = 100, message = "Score must be between 0 and 100"))]
    score: i32,
}

fn missing_point(err: sqlx::Error) -> ApiError {
    if let sqlx::Error::Database(db) = &err {
        if db.is_foreign_key_violation() {
            return ApiError::NotFound("Knowledge point not found");
        }
    }
    err.into()
}

pub async fn record_progress(
    State(state): State<Arc<AppState>>,
    RequireUser(user): RequireUser,
    Path(id): Path<i32>,
    ValidatedJson(form): ValidatedJson<ProgressForm>,
) -> ApiResult<Value> {
    let progress = state
        .knowledge
        .record_progress(user.id, id, form.score)
        .await
        .map_err(missing_point)?;

    let message = if progress.is_completed && form.score >= COMPLETION_SCORE {
        "Knowledge point completed"
    } else {
        "Progress recorded"
    };
    Ok(success_with(message, json!({ "progress": progress })))
}

#[derive(Deserialize, Debug, Validate)]
#[serde(rename_all = "camelCase")]
pub struct NewKnowledge {
    #[serde(deserialize_with = "trimmed")]
    #[validate(custom(function = "not_blank", message = "Category is required"))]
    category: String,
    #[serde(deserialize_with = "trimmed")]
    #[validate(custom(function = "not_blank", message = "Title is required"))]
    title: String,
    #[validate(custom(function = "not_blank", message = "Content is required"))]
    content: String,
    #[serde(default, deserialize_with = "trimmed_opt")]
    #[validate(custom(
        function = "valid_difficulty",
        message = "Difficulty must be beginner, intermediate or advanced"
    ))]
    difficulty: Option<String>,
    common_mistakes: Option<String>,
    examples: Option<String>,
}

pub async fn create_knowledge(
    State(state): State<Arc<AppState>>,
    RequireAdmin(admin): RequireAdmin,
    ValidatedJson(form): ValidatedJson<NewKnowledge>,
) -> Result<(StatusCode, Json<Envelope<Value>>), ApiError> {
    let point = state
        .knowledge
        .create(KnowledgeFields {
            category: Some(form.category),
            title: Some(form.title),
            content: Some(form.content),
            difficulty: form.difficulty,
            common_mistakes: form.common_mistakes,
            examples: form.examples,
        })
        .await?;

    tracing::info!("admin {} created knowledge point {}", admin.id, point.id);
    Ok((
        StatusCode::CREATED,
        success_with("Knowledge point created", json!({ "knowledgePoint": point })),
    ))
}

#[derive(Deserialize, Debug, Validate)]
#[serde(rename_all = "camelCase")]
pub struct EditKnowledge {
    #[serde(default, deserialize_with = "trimmed_opt")]
    category: Option<String>,
    #[serde(default, deserialize_with = "trimmed_opt")]
    title: Option<String>,
    #[validate(custom(function = "not_blank", message = "Content cannot be empty"))]
    content: Option<String>,
    #[serde(default, deserialize_with = "trimmed_opt")]
    #[validate(custom(
        function = "valid_difficulty",
        message = "Difficulty must be beginner, intermediate or advanced"
    ))]
    difficulty: Option<String>,
    common_mistakes: Option<String>,
    examples: Option<String>,
}

pub async fn update_knowledge(
    State(state): State<Arc<AppState>>,
    RequireAdmin(_): RequireAdmin,
    Path(id): Path<i32>,
    ValidatedJson(form): ValidatedJson<EditKnowledge>,
) -> ApiResult<Value> {
    let point = state
        .knowledge
        .update(
            id,
            KnowledgeFields {
                category: form.category,
                title: form.title,
                content: form.content,
                difficulty: form.difficulty,
                common_mistakes: form.common_mistakes,
                examples: form.examples,
            },
        )
        .await?
        .ok_or(ApiError::NotFound("Knowledge point not found"))?;
    Ok(success_with("Knowledge point updated", json!({ "knowledgePoint": point })))
}

pub async fn delete_knowledge(
    State(state): State<Arc<AppState>>,
    RequireAdmin(admin): RequireAdmin,
    Path(id): Path<i32>,
) -> ApiResult<()> {
    if !state.knowledge.delete(id).await? {
        return Err(ApiError::NotFound("Knowledge point not found"));
    }
    tracing::info!("admin {} deleted knowledge point {}", admin.id, id);
    Ok(done("Knowledge point deleted"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_score_range() {
        let form: ProgressForm = serde_json::from_value(json!({ "score": 101 })).unwrap();
        assert!(form.validate().is_err());
        let form: ProgressForm = serde_json::from_value(json!({ "score": 0 })).unwrap();
        assert!(form.validate().is_ok());
        assert!(serde_json::from_value::<ProgressForm>(json!({})).is_err());
    }

    #[test]
    fn test_new_knowledge_requires_fields() {
        let form: NewKnowledge = serde_json::from_value(json!({
            "category": "Joins",
            "title": " ",
            "content": "INNER JOIN keeps matching rows",
            "difficulty": "expert",
        }))
        .unwrap();
        let errors = form.validate().unwrap_err();
        let fields = errors.field_errors();
        assert!(fields.contains_key("title"));
        assert!(fields.contains_key("difficulty"));
        assert!(!fields.contains_key("category"));
    }
}
