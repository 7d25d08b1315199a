use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use crate::ai::AiError;

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

/// JSON body shared by every API response.
#[derive(Debug, Serialize)]
pub struct Envelope<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub errors: Option<Vec<FieldError>>,
}

pub type ApiResult<T> = Result<Json<Envelope<T>>, ApiError>;

pub fn success<T: Serialize>(data: T) -> Json<Envelope<T>> {
    Json(Envelope {
        success: true,
        message: None,
        data: Some(data),
        errors: None,
    })
}

pub fn success_with<T: Serialize>(message: impl Into<String>, data: T) -> Json<Envelope<T>> {
    Json(Envelope {
        success: true,
        message: Some(message.into()),
        data: Some(data),
        errors: None,
    })
}

pub fn done(message: impl Into<String>) -> Json<Envelope<()>> {
    Json(Envelope {
        success: true,
        message: Some(message.into()),
        data: None,
        errors: None,
    })
}

pub fn failure(message: impl Into<String>) -> Envelope<()> {
    Envelope {
        success: false,
        message: Some(message.into()),
        data: None,
        errors: None,
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),
    #[error("Validation failed")]
    Validation(Vec<FieldError>),
    #[error("{0}")]
    Unauthorized(&'static str),
    #[error("{0}")]
    Forbidden(&'static str),
    #[error("{0}")]
    NotFound(&'static str),
    #[error("{0}")]
    TooManyRequests(&'static str),
    #[error("AI feature is temporarily unavailable, please try again later")]
    AiUnavailable(#[from] AiError),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) | ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::TooManyRequests(_) => StatusCode::TOO_MANY_REQUESTS,
            ApiError::AiUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Database(_) | ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<validator::ValidationErrors> for ApiError {
    fn from(errors: validator::ValidationErrors) -> Self {
        let mut fields: Vec<FieldError> = errors
            .field_errors()
            .into_iter()
            .flat_map(|(field, errors)| {
                errors.iter().map(move |e| FieldError {
                    field: field.to_string(),
                    message: e
                        .message
                        .as_ref()
                        .map(|m| m.to_string())
                        .unwrap_or_else(|| format!("{} is invalid", field)),
                })
            })
            .collect();
        fields.sort_by(|a, b| a.field.cmp(&b.field));
        ApiError::Validation(fields)
    }
}

impl From<crate::auth::AuthError> for ApiError {
    fn from(err: crate::auth::AuthError) -> Self {
        ApiError::Internal(err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        match &self {
            ApiError::Database(e) => tracing::error!("database error: {}", e),
            ApiError::Internal(e) => tracing::error!("internal error: {}", e),
            ApiError::AiUnavailable(e) => tracing::warn!("AI call failed: {}", e),
            _ => {}
        }

        let body = match self {
            ApiError::Validation(errors) => Envelope {
                success: false,
                message: Some("Validation failed".to_string()),
                data: None::<()>,
                errors: Some(errors),
            },
            other => failure(other.to_string()),
        };

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::Value;
    use validator::Validate;

    use super::*;

    async fn body_json(response: Response) -> Value {
        let bytes = hyper::body::to_bytes(response.into_body()).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[derive(Validate)]
    struct Form {
        #[validate(length(min = 6, message = "Password must be at least 6 characters"))]
        password: String,
        #[validate(email)]
        email: String,
    }

    #[tokio::test]
    async fn test_validation_errors_listed() {
        let form = Form {
            password: "123".to_string(),
            email: "nope".to_string(),
        };
        let err = ApiError::from(form.validate().unwrap_err());
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let json = body_json(response).await;
        assert_eq!(json["success"], false);
        assert_eq!(json["message"], "Validation failed");
        assert_eq!(json["errors"][0]["field"], "email");
        assert_eq!(json["errors"][0]["message"], "email is invalid");
        assert_eq!(json["errors"][1]["field"], "password");
        assert_eq!(
            json["errors"][1]["message"],
            "Password must be at least 6 characters"
        );
    }

    #[tokio::test]
    async fn test_status_mapping() {
        let response = ApiError::NotFound("Comment not found").into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let json = body_json(response).await;
        assert_eq!(json["message"], "Comment not found");
        assert!(json.get("data").is_none());

        let response = ApiError::AiUnavailable(AiError::EmptyResponse).into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

        let response = ApiError::Database(sqlx::Error::RowNotFound).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_success_envelope() {
        let Json(envelope) = success_with("Saved", serde_json::json!({ "id": 1 }));
        let json = serde_json::to_value(envelope).unwrap();
        assert_eq!(json["success"], true);
        assert_eq!(json["message"], "Saved");
        assert_eq!(json["data"]["id"], 1);
        assert!(json.get("errors").is_none());
    }
}
