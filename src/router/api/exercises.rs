use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use validator::Validate;

use std::sync::Arc;

use super::{not_blank, percentage};
use crate::{
    ai::Assistant,
    data::{
        model::{Exercise, Submission},
        practice::SCHEMA,
        repository::SubmissionRecord,
    },
    error::{success, ApiError, ApiResult, Envelope},
    middleware::{MaybeUser, RequireUser, ValidatedJson},
    sandbox::{self, Execution, Verdict, Verification},
    AppState,
};

const FEEDBACK_FALLBACK: &str =
    "AI feedback is temporarily unavailable. Compare your result with the task description and try again.";

#[derive(Deserialize, Debug)]
pub struct ExerciseFilter {
    category: Option<String>,
}

pub async fn list_exercises(
    State(state): State<Arc<AppState>>,
    Query(filter): Query<ExerciseFilter>,
) -> ApiResult<Value> {
    let exercises = state
        .exercises
        .list(filter.category.as_deref().filter(|c| !c.is_empty()))
        .await?;
    Ok(success(json!({ "exercises": exercises })))
}

pub async fn categories(State(state): State<Arc<AppState>>) -> ApiResult<Value> {
    let categories = state.exercises.categories().await?;
    Ok(success(json!({ "categories": categories })))
}

pub async fn schema() -> ApiResult<Value> {
    Ok(success(json!({ "schema": &SCHEMA })))
}

pub async fn user_progress(
    State(state): State<Arc<AppState>>,
    RequireUser(user): RequireUser,
) -> ApiResult<Value> {
    let progress = state.exercises.user_progress(user.id).await?;
    let completed = progress
        .iter()
        .filter(|p| p.is_correct.unwrap_or(false))
        .count();
    let attempted = progress.iter().filter(|p| p.attempt_count.is_some()).count();

    Ok(success(json!({
        "progress": progress,
        "stats": {
            "total": progress.len(),
            "completed": completed,
            "attempted": attempted,
            "completionRate": percentage(completed, progress.len()),
        },
    })))
}

pub async fn exercise_by_id(
    State(state): State<Arc<AppState>>,
    MaybeUser(viewer): MaybeUser,
    Path(id): Path<i32>,
) -> ApiResult<Value> {
    let exercise = state
        .exercises
        .find(id)
        .await?
        .ok_or(ApiError::NotFound("Exercise not found"))?;

    let submission = match viewer {
        Some(user) => state.exercises.submission(user.id, id).await?,
        None => None,
    };

    Ok(success(json!({ "exercise": exercise, "submission": submission })))
}

#[derive(Deserialize, Debug, Validate)]
pub struct SqlForm {
    #[validate(custom(function = "not_blank", message = "Please enter a SQL statement"))]
    sql: String,
}

/// Runs a free-form query against the practice tables. Query failures are
/// reported in the body with a 200 status.
pub async fn execute(
    State(state): State<Arc<AppState>>,
    ValidatedJson(form): ValidatedJson<SqlForm>,
) -> Json<Envelope<Execution>> {
    let outcome = sandbox::run_user_query(&*state.sandbox, &form.sql).await;
    let message = match &outcome.error {
        Some(error) => error.clone(),
        None => "Query executed".to_string(),
    };

    Json(Envelope {
        success: outcome.success,
        message: Some(message),
        data: Some(outcome),
        errors: None,
    })
}

#[axum::debug_handler]
pub async fn submit(
    State(state): State<Arc<AppState>>,
    RequireUser(user): RequireUser,
    Path(id): Path<i32>,
    ValidatedJson(form): ValidatedJson<SqlForm>,
) -> ApiResult<Value> {
    let exercise = state
        .exercises
        .find(id)
        .await?
        .ok_or(ApiError::NotFound("Exercise not found"))?;

    let verification = sandbox::verify(&*state.sandbox, &form.sql, &exercise.correct_sql).await;
    let feedback = answer_feedback(&state.assistant, &exercise, &form.sql, &verification).await;

    let submission = state
        .exercises
        .save_submission(SubmissionRecord {
            user_id: user.id,
            exercise_id: id,
            user_sql: &form.sql,
            is_correct: verification.is_correct(),
            ai_feedback: feedback.as_deref(),
        })
        .await?;

    tracing::debug!(
        "user {} submitted exercise {}: {:?} (attempt {})",
        user.id,
        id,
        verification.verdict,
        submission.attempt_count
    );

    Ok(success(submission_result(&verification, feedback, &submission)))
}

/// AI guidance is only requested for wrong answers; a failed call falls back to a
/// fixed text so the attempt is still recorded.
async fn answer_feedback(
    assistant: &Assistant,
    exercise: &Exercise,
    sql: &str,
    verification: &Verification,
) -> Option<String> {
    match verification.verdict {
        Verdict::Incorrect => {
            let analysis = assistant
                .analyze_exercise_answer(
                    &exercise.description,
                    exercise.hint.as_deref(),
                    sql,
                    &verification.user_result,
                )
                .await;
            Some(analysis.unwrap_or_else(|e| {
                tracing::warn!("exercise feedback unavailable: {}", e);
                FEEDBACK_FALLBACK.to_string()
            }))
        }
        Verdict::Correct | Verdict::Unverifiable => None,
    }
}

fn submission_result(
    verification: &Verification,
    feedback: Option<String>,
    submission: &Submission,
) -> Value {
    json!({
        "isCorrect": verification.is_correct(),
        "verdict": verification.verdict,
        "message": verification.message,
        "userResult": verification.user_result,
        "expectedRowCount": verification.expected.as_ref().map(|e| e.row_count()),
        "aiFeedback": feedback,
        "attemptCount": submission.attempt_count,
    })
}

#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct HintForm {
    #[serde(alias = "userSQL")]
    user_sql: Option<String>,
}

pub async fn hint(
    State(state): State<Arc<AppState>>,
    RequireUser(_): RequireUser,
    Path(id): Path<i32>,
    form: Option<Json<HintForm>>,
) -> ApiResult<Value> {
    let form = form.map(|Json(form)| form).unwrap_or_default();
    let exercise = state
        .exercises
        .find(id)
        .await?
        .ok_or(ApiError::NotFound("Exercise not found"))?;

    let hint = state
        .assistant
        .generate_exercise_hint(
            &exercise.description,
            exercise.hint.as_deref(),
            form.user_sql.as_deref(),
        )
        .await?;
    Ok(success(json!({ "hint": hint })))
}
