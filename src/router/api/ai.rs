use axum::extract::State;
use serde::Deserialize;
use serde_json::{json, Value};
use validator::Validate;

use std::{sync::Arc, time::Instant};

use super::{not_blank, trimmed, trimmed_opt, valid_difficulty};
use crate::{
    error::{success, ApiResult},
    middleware::{MaybeUser, RequireUser, ValidatedJson},
    AppState,
};

const SUMMARY_SAMPLE: i64 = 20;
const EMPTY_SUMMARY: &str =
    "No code has been shared in the comments recently, so there are no common mistakes to summarise yet.";

fn elapsed_ms(started: Instant) -> i32 {
    started.elapsed().as_millis().min(i32::MAX as u128) as i32
}

#[derive(Deserialize, Debug, Validate)]
pub struct AnalyzeForm {
    #[validate(custom(function = "not_blank", message = "Please enter a SQL statement"))]
    sql: String,
}

pub async fn analyze(
    State(state): State<Arc<AppState>>,
    MaybeUser(user): MaybeUser,
    ValidatedJson(form): ValidatedJson<AnalyzeForm>,
) -> ApiResult<Value> {
    let started = Instant::now();
    let analysis = state.assistant.analyze_sql(&form.sql).await?;

    if let Some(user) = user {
        state
            .users
            .record_sql(
                user.id,
                &form.sql,
                &json!({ "analysis": analysis }),
                true,
                elapsed_ms(started),
            )
            .await?;
    }

    Ok(success(json!({ "analysis": analysis })))
}

#[derive(Deserialize, Debug, Validate)]
pub struct QuestionForm {
    #[serde(deserialize_with = "trimmed")]
    #[validate(custom(function = "not_blank", message = "Please enter a question"))]
    question: String,
}

pub async fn ask(
    State(state): State<Arc<AppState>>,
    ValidatedJson(form): ValidatedJson<QuestionForm>,
) -> ApiResult<Value> {
    let answer = state.assistant.answer_question(&form.question).await?;
    Ok(success(json!({ "answer": answer })))
}

#[derive(Deserialize, Debug, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CorrectForm {
    #[validate(custom(function = "not_blank", message = "Please enter a SQL statement"))]
    sql: String,
    #[serde(default, deserialize_with = "trimmed_opt")]
    error_message: Option<String>,
}

pub async fn correct(
    State(state): State<Arc<AppState>>,
    MaybeUser(user): MaybeUser,
    ValidatedJson(form): ValidatedJson<CorrectForm>,
) -> ApiResult<Value> {
    let started = Instant::now();
    let correction = state
        .assistant
        .correct_sql(&form.sql, form.error_message.as_deref())
        .await?;

    if let Some(user) = user {
        state
            .users
            .record_sql(
                user.id,
                &form.sql,
                &json!({ "correction": correction, "errorMessage": form.error_message }),
                false,
                elapsed_ms(started),
            )
            .await?;
    }

    Ok(success(json!({ "correction": correction })))
}

#[derive(Deserialize, Debug, Validate)]
pub struct ChatForm {
    #[serde(deserialize_with = "trimmed")]
    #[validate(custom(function = "not_blank", message = "Please enter a message"))]
    message: String,
}

pub async fn chat(
    State(state): State<Arc<AppState>>,
    ValidatedJson(form): ValidatedJson<ChatForm>,
) -> ApiResult<Value> {
    let reply = state.assistant.generate_reply(&form.message, None).await?;
    Ok(success(json!({ "reply": reply })))
}

#[derive(Deserialize, Debug, Validate)]
#[serde(rename_all = "camelCase")]
pub struct EvaluateForm {
    #[serde(default, deserialize_with = "trimmed_opt")]
    content: Option<String>,
    #[validate(custom(function = "not_blank", message = "Please provide the code to review"))]
    code_snippet: String,
}

pub async fn evaluate(
    State(state): State<Arc<AppState>>,
    ValidatedJson(form): ValidatedJson<EvaluateForm>,
) -> ApiResult<Value> {
    let content = form.content.as_deref().unwrap_or("Please review this SQL");
    let evaluation = state
        .assistant
        .evaluate_comment_code(content, &form.code_snippet)
        .await?;
    Ok(success(json!({ "evaluation": evaluation })))
}

#[derive(Deserialize, Debug, Validate)]
pub struct ExerciseForm {
    #[serde(deserialize_with = "trimmed")]
    #[validate(custom(function = "not_blank", message = "Please choose a topic"))]
    topic: String,
    #[serde(default, deserialize_with = "trimmed_opt")]
    #[validate(custom(
        function = "valid_difficulty",
        message = "Difficulty must be beginner, intermediate or advanced"
    ))]
    difficulty: Option<String>,
}

pub async fn generate_exercise(
    State(state): State<Arc<AppState>>,
    RequireUser(_): RequireUser,
    ValidatedJson(form): ValidatedJson<ExerciseForm>,
) -> ApiResult<Value> {
    let difficulty = form.difficulty.as_deref().unwrap_or("beginner");
    let exercise = state
        .assistant
        .generate_exercise(&form.topic, difficulty)
        .await?;
    Ok(success(json!({ "exercise": exercise })))
}

pub async fn weekly_summary(State(state): State<Arc<AppState>>) -> ApiResult<Value> {
    let comments = state.comments.with_code(SUMMARY_SAMPLE).await?;
    if comments.is_empty() {
        return Ok(success(json!({ "summary": EMPTY_SUMMARY })));
    }

    let summary = state.assistant.summarize_mistakes(&comments).await?;
    Ok(success(json!({ "summary": summary })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_evaluate_requires_code() {
        let form: EvaluateForm =
            serde_json::from_value(json!({ "content": "", "codeSnippet": " " })).unwrap();
        assert!(form.content.is_none());
        assert!(form.validate().is_err());
    }

    #[test]
    fn test_exercise_difficulty() {
        let form: ExerciseForm =
            serde_json::from_value(json!({ "topic": "GROUP BY", "difficulty": "advanced" }))
                .unwrap();
        assert!(form.validate().is_ok());

        let form: ExerciseForm =
            serde_json::from_value(json!({ "topic": "GROUP BY", "difficulty": "hard" })).unwrap();
        assert!(form.validate().is_err());
    }
}
