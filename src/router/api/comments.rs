use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use validator::Validate;

use std::sync::Arc;

use super::{not_blank, trimmed, trimmed_opt};
use crate::{
    data::{
        model::{Comment, CommentView, PageParams, Paginated},
        repository::NewComment,
    },
    error::{done, success, success_with, ApiError, ApiResult, Envelope},
    middleware::{MaybeUser, RequireUser, ValidatedJson},
    AppState,
};

const REPLIES_SHOWN: i64 = 100;

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct CommentFilter {
    page: Option<i64>,
    limit: Option<i64>,
    parent_id: Option<i32>,
}

pub async fn list_comments(
    State(state): State<Arc<AppState>>,
    MaybeUser(viewer): MaybeUser,
    Query(filter): Query<CommentFilter>,
) -> ApiResult<Paginated<CommentView>> {
    let params = PageParams {
        page: filter.page,
        limit: filter.limit,
    };
    let comments = state
        .comments
        .list(
            filter.parent_id,
            viewer.map(|u| u.id),
            params.page(),
            params.limit(20),
        )
        .await?;
    Ok(success(comments))
}

pub async fn recent_comments(
    State(state): State<Arc<AppState>>,
    Query(params): Query<PageParams>,
) -> ApiResult<Value> {
    let comments = state.comments.recent(params.limit(5)).await?;
    Ok(success(json!({ "comments": comments })))
}

pub async fn my_comments(
    State(state): State<Arc<AppState>>,
    RequireUser(user): RequireUser,
    Query(params): Query<PageParams>,
) -> ApiResult<Paginated<Comment>> {
    let comments = state
        .comments
        .by_user(user.id, params.page(), params.limit(20))
        .await?;
    Ok(success(comments))
}

pub async fn comment_by_id(
    State(state): State<Arc<AppState>>,
    MaybeUser(viewer): MaybeUser,
    Path(id): Path<i32>,
) -> ApiResult<Value> {
    let viewer = viewer.map(|u| u.id);
    let comment = state
        .comments
        .find(id, viewer)
        .await?
        .ok_or(ApiError::NotFound("Comment not found"))?;
    let replies = state
        .comments
        .list(Some(id), viewer, 1, REPLIES_SHOWN)
        .await?;

    Ok(success(json!({ "comment": comment, "replies": replies.items })))
}

#[derive(Deserialize, Debug, Validate)]
#[serde(rename_all = "camelCase")]
pub struct NewCommentForm {
    #[serde(deserialize_with = "trimmed")]
    #[validate(
        custom(function = "not_blank", message = "Comment content cannot be empty"),
        length(max = 5000, message = "Comment must be at most 5000 characters")
    )]
    content: String,
    #[serde(default, deserialize_with = "trimmed_opt")]
    code_snippet: Option<String>,
    parent_id: Option<i32>,
}

#[axum::debug_handler]
pub async fn create_comment(
    State(state): State<Arc<AppState>>,
    RequireUser(user): RequireUser,
    ValidatedJson(form): ValidatedJson<NewCommentForm>,
) -> Result<(StatusCode, Json<Envelope<Value>>), ApiError> {
    let created = state
        .comments
        .create(NewComment {
            user_id: Some(user.id),
            parent_id: form.parent_id,
            content: &form.content,
            code_snippet: form.code_snippet.as_deref(),
            is_ai_reply: false,
        })
        .await?
        .ok_or(ApiError::NotFound(
            "The comment you are replying to does not exist",
        ))?;

    let comment = state.comments.find(created.id, Some(user.id)).await?;

    if let Some(code) = form.code_snippet {
        spawn_code_review(state.clone(), created.id, form.content, code);
    }

    Ok((
        StatusCode::CREATED,
        success_with("Comment posted", json!({ "comment": comment })),
    ))
}

/// Reviews a posted snippet in the background and answers with an AI reply.
fn spawn_code_review(state: Arc<AppState>, comment_id: i32, content: String, code: String) {
    tokio::spawn(async move {
        if let Err(e) = review_code(&state, comment_id, &content, &code).await {
            tracing::error!("code review for comment {} failed: {}", comment_id, e);
        }
    });
}

async fn review_code(
    state: &AppState,
    comment_id: i32,
    content: &str,
    code: &str,
) -> Result<(), ApiError> {
    let analysis = state.assistant.evaluate_comment_code(content, code).await?;
    state
        .comments
        .record_ai_response(comment_id, content, &analysis)
        .await?;
    state
        .comments
        .create(NewComment {
            user_id: None,
            parent_id: Some(comment_id),
            content: &analysis,
            code_snippet: None,
            is_ai_reply: true,
        })
        .await?;
    tracing::debug!("posted code review for comment {}", comment_id);
    Ok(())
}

#[derive(Deserialize, Debug, Validate)]
#[serde(rename_all = "camelCase")]
pub struct EditCommentForm {
    #[serde(deserialize_with = "trimmed")]
    #[validate(
        custom(function = "not_blank", message = "Comment content cannot be empty"),
        length(max = 5000, message = "Comment must be at most 5000 characters")
    )]
    content: String,
    #[serde(default, deserialize_with = "trimmed_opt")]
    code_snippet: Option<String>,
}

pub async fn update_comment(
    State(state): State<Arc<AppState>>,
    RequireUser(user): RequireUser,
    Path(id): Path<i32>,
    ValidatedJson(form): ValidatedJson<EditCommentForm>,
) -> ApiResult<Value> {
    let comment = state
        .comments
        .update(id, user.id, &form.content, form.code_snippet.as_deref())
        .await?
        .ok_or(ApiError::NotFound(
            "Comment not found or you cannot edit it",
        ))?;
    Ok(success_with("Comment updated", json!({ "comment": comment })))
}

pub async fn delete_comment(
    State(state): State<Arc<AppState>>,
    RequireUser(user): RequireUser,
    Path(id): Path<i32>,
) -> ApiResult<()> {
    if !state
        .comments
        .soft_delete(id, user.id, user.is_moderator())
        .await?
    {
        return Err(ApiError::NotFound(
            "Comment not found or you cannot delete it",
        ));
    }
    Ok(done("Comment deleted"))
}

pub async fn toggle_like(
    State(state): State<Arc<AppState>>,
    RequireUser(user): RequireUser,
    Path(id): Path<i32>,
) -> ApiResult<Value> {
    let toggle = state
        .comments
        .toggle_like(id, user.id)
        .await?
        .ok_or(ApiError::NotFound("Comment not found"))?;

    let message = if toggle.liked { "Liked" } else { "Like removed" };
    Ok(success_with(
        message,
        json!({ "liked": toggle.liked, "likesCount": toggle.likes_count }),
    ))
}

pub async fn ai_reply(
    State(state): State<Arc<AppState>>,
    RequireUser(user): RequireUser,
    Path(id): Path<i32>,
) -> ApiResult<Value> {
    let target = state
        .comments
        .find(id, None)
        .await?
        .ok_or(ApiError::NotFound("Comment not found"))?;

    let parent = match target.comment.parent_id {
        Some(parent_id) => state
            .comments
            .find(parent_id, None)
            .await?
            .map(|p| p.comment.content),
        None => None,
    };

    let text = state
        .assistant
        .generate_reply(&target.comment.content, parent.as_deref())
        .await?;

    let created = state
        .comments
        .create(NewComment {
            user_id: None,
            parent_id: Some(id),
            content: &text,
            code_snippet: None,
            is_ai_reply: true,
        })
        .await?
        .ok_or(ApiError::NotFound("Comment not found"))?;
    let reply = state.comments.find(created.id, Some(user.id)).await?;

    Ok(success_with("AI reply posted", json!({ "reply": reply })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blank_comment_rejected() {
        let form: NewCommentForm =
            serde_json::from_value(json!({ "content": "   ", "codeSnippet": "" })).unwrap();
        assert!(form.code_snippet.is_none());
        let errors = form.validate().unwrap_err();
        assert!(errors.field_errors().contains_key("content"));
    }

    #[test]
    fn test_reply_form() {
        let form: NewCommentForm = serde_json::from_value(json!({
            "content": " Try LEFT JOIN ",
            "codeSnippet": "SELECT * FROM a LEFT JOIN b ON a.id = b.a_id",
            "parentId": 7,
        }))
        .unwrap();
        assert!(form.validate().is_ok());
        assert_eq!(form.content, "Try LEFT JOIN");
        assert_eq!(form.parent_id, Some(7));
    }
}
