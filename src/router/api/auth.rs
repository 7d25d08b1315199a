use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use validator::Validate;

use std::sync::Arc;

use super::{trimmed, trimmed_opt, valid_username};
use crate::{
    auth,
    data::{
        model::{PageParams, Paginated, User},
        repository::{NewUser, ProfileUpdate},
    },
    error::{done, success, success_with, ApiError, ApiResult, Envelope},
    middleware::{RequireAdmin, RequireUser, ValidatedJson},
    AppState,
};

#[derive(Deserialize, Debug, Validate)]
pub struct Register {
    #[serde(deserialize_with = "trimmed")]
    #[validate(
        length(min = 2, max = 50, message = "Username must be 2-50 characters"),
        custom(
            function = "valid_username",
            message = "Username may only contain letters, digits, underscores and Chinese characters"
        )
    )]
    username: String,
    #[serde(deserialize_with = "trimmed")]
    #[validate(email(message = "Please enter a valid email address"))]
    email: String,
    #[validate(length(min = 6, message = "Password must be at least 6 characters"))]
    password: String,
}

#[derive(Deserialize, Debug, Validate)]
pub struct LogIn {
    /// Email address or username.
    #[serde(deserialize_with = "trimmed")]
    #[validate(length(min = 1, message = "Please enter your email or username"))]
    email: String,
    #[validate(length(min = 1, message = "Please enter your password"))]
    password: String,
}

#[derive(Serialize)]
pub struct SignedIn {
    user: User,
    token: String,
}

fn unique_violation(err: sqlx::Error) -> ApiError {
    if let sqlx::Error::Database(db) = &err {
        if db.is_unique_violation() {
            return ApiError::BadRequest("Username or email is already in use".to_string());
        }
    }
    err.into()
}

async fn open_session(state: &AppState, user: User) -> Result<SignedIn, ApiError> {
    let token = auth::issue_token(user.id, &state.config.jwt_secret, state.config.jwt_expires_in)?;
    state.users.update_last_login(user.id).await?;
    Ok(SignedIn { user, token })
}

#[axum::debug_handler]
pub async fn register(
    State(state): State<Arc<AppState>>,
    ValidatedJson(form): ValidatedJson<Register>,
) -> Result<(StatusCode, Json<Envelope<SignedIn>>), ApiError> {
    let email = form.email.to_lowercase();

    if state.users.email_taken(&email, None).await? {
        return Err(ApiError::BadRequest("Email already registered".to_string()));
    }
    if state.users.username_taken(&form.username, None).await? {
        return Err(ApiError::BadRequest("Username already taken".to_string()));
    }

    let password_hash = auth::hash_password(&form.password).await?;
    let user = state
        .users
        .create(NewUser {
            username: &form.username,
            email: &email,
            password_hash: &password_hash,
        })
        .await
        .map_err(unique_violation)?;

    tracing::info!("registered user {} ({})", user.username, user.id);
    let session = open_session(&state, user).await?;
    Ok((
        StatusCode::CREATED,
        success_with("Registration successful", session),
    ))
}

#[axum::debug_handler]
pub async fn login(
    State(state): State<Arc<AppState>>,
    ValidatedJson(form): ValidatedJson<LogIn>,
) -> ApiResult<SignedIn> {
    let login = if form.email.contains('@') {
        form.email.to_lowercase()
    } else {
        form.email
    };

    let user = state
        .users
        .find_by_login(&login)
        .await?
        .ok_or(ApiError::Unauthorized("Incorrect email or password"))?;
    if !auth::verify_password(&form.password, &user.password_hash).await {
        return Err(ApiError::Unauthorized("Incorrect email or password"));
    }
    if !user.is_active {
        return Err(ApiError::Forbidden("Account has been disabled"));
    }

    let session = open_session(&state, user).await?;
    Ok(success_with("Login successful", session))
}

pub async fn profile(
    State(state): State<Arc<AppState>>,
    RequireUser(user): RequireUser,
) -> ApiResult<Value> {
    let stats = state.users.learning_stats(user.id).await?;
    Ok(success(json!({ "user": user, "stats": stats })))
}

#[derive(Deserialize, Debug, Validate)]
#[serde(rename_all = "camelCase")]
pub struct EditProfile {
    #[serde(default, deserialize_with = "trimmed_opt")]
    #[validate(
        length(min = 2, max = 50, message = "Username must be 2-50 characters"),
        custom(
            function = "valid_username",
            message = "Username may only contain letters, digits, underscores and Chinese characters"
        )
    )]
    username: Option<String>,
    #[serde(default, deserialize_with = "trimmed_opt")]
    #[validate(email(message = "Please enter a valid email address"))]
    email: Option<String>,
    #[serde(default, deserialize_with = "trimmed_opt")]
    #[validate(url(message = "Avatar must be a valid URL"))]
    avatar_url: Option<String>,
}

pub async fn update_profile(
    State(state): State<Arc<AppState>>,
    RequireUser(user): RequireUser,
    ValidatedJson(form): ValidatedJson<EditProfile>,
) -> ApiResult<Value> {
    let email = form.email.map(|e| e.to_lowercase());

    if let Some(username) = form.username.as_deref().filter(|u| *u != user.username) {
        if state.users.username_taken(username, Some(user.id)).await? {
            return Err(ApiError::BadRequest("Username already taken".to_string()));
        }
    }
    if let Some(email) = email.as_deref().filter(|e| *e != user.email) {
        if state.users.email_taken(email, Some(user.id)).await? {
            return Err(ApiError::BadRequest("Email already registered".to_string()));
        }
    }

    let updated = state
        .users
        .update_profile(
            user.id,
            ProfileUpdate {
                username: form.username,
                email,
                avatar_url: form.avatar_url,
            },
        )
        .await
        .map_err(unique_violation)?
        .ok_or(ApiError::NotFound("User not found"))?;

    Ok(success_with("Profile updated", json!({ "user": updated })))
}

#[derive(Deserialize, Debug, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ChangePassword {
    #[validate(length(min = 1, message = "Please enter your current password"))]
    current_password: String,
    #[validate(length(min = 6, message = "New password must be at least 6 characters"))]
    new_password: String,
}

pub async fn change_password(
    State(state): State<Arc<AppState>>,
    RequireUser(user): RequireUser,
    ValidatedJson(form): ValidatedJson<ChangePassword>,
) -> ApiResult<()> {
    if !auth::verify_password(&form.current_password, &user.password_hash).await {
        return Err(ApiError::BadRequest(
            "Current password is incorrect".to_string(),
        ));
    }

    let password_hash = auth::hash_password(&form.new_password).await?;
    state.users.change_password(user.id, &password_hash).await?;
    tracing::info!("user {} changed their password", user.id);
    Ok(done("Password changed"))
}

pub async fn history(
    State(state): State<Arc<AppState>>,
    RequireUser(user): RequireUser,
    Query(params): Query<PageParams>,
) -> ApiResult<Value> {
    let history = state.users.sql_history(user.id, params.limit(20)).await?;
    Ok(success(json!({ "history": history })))
}

pub async fn list_users(
    State(state): State<Arc<AppState>>,
    RequireAdmin(_): RequireAdmin,
    Query(params): Query<PageParams>,
) -> ApiResult<Paginated<User>> {
    let users = state.users.list(params.page(), params.limit(20)).await?;
    Ok(success(users))
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct UserStatus {
    is_active: bool,
}

pub async fn set_user_status(
    State(state): State<Arc<AppState>>,
    RequireAdmin(admin): RequireAdmin,
    Path(id): Path<i32>,
    Json(form): Json<UserStatus>,
) -> ApiResult<Value> {
    if id == admin.id && !form.is_active {
        return Err(ApiError::BadRequest(
            "You cannot disable your own account".to_string(),
        ));
    }

    let user = state
        .users
        .set_active(id, form.is_active)
        .await?
        .ok_or(ApiError::NotFound("User not found"))?;

    tracing::info!(
        "admin {} set user {} active={}",
        admin.id,
        user.id,
        user.is_active
    );
    Ok(success_with("User status updated", json!({ "user": user })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_rules() {
        let form: Register = serde_json::from_value(json!({
            "username": "  ada_l ",
            "email": "Ada@Example.com",
            "password": "secret1",
        }))
        .unwrap();
        assert_eq!(form.username, "ada_l");
        assert!(form.validate().is_ok());

        let form: Register = serde_json::from_value(json!({
            "username": "a",
            "email": "not-an-email",
            "password": "123",
        }))
        .unwrap();
        let errors = form.validate().unwrap_err();
        let fields = errors.field_errors();
        assert!(fields.contains_key("username"));
        assert!(fields.contains_key("email"));
        assert!(fields.contains_key("password"));
    }

    #[test]
    fn test_profile_fields_optional() {
        let form: EditProfile = serde_json::from_value(json!({ "avatarUrl": "  " })).unwrap();
        assert!(form.avatar_url.is_none());
        assert!(form.validate().is_ok());

        let form: EditProfile = serde_json::from_value(json!({ "username": "bad name" })).unwrap();
        assert!(form.validate().is_err());
    }
}
