use axum::{
    body::{boxed, Body},
    extract::{DefaultBodyLimit, OriginalUri, State},
    http::{
        header::{AUTHORIZATION, CONTENT_TYPE},
        HeaderValue, Method, Request,
    },
    middleware::from_fn_with_state,
    response::{IntoResponse, Response},
    Router,
};
use tower::ServiceExt;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    services::{ServeDir, ServeFile},
    trace::TraceLayer,
};

use std::{path::Path, sync::Arc};

use crate::{error::ApiError, middleware::handle_error, AppState};

mod api;

const BODY_LIMIT: usize = 10 * 1024 * 1024;

pub fn app_router(state: Arc<AppState>) -> Router {
    Router::new()
        .nest("/api", api::api_router(state.clone()))
        .fallback(frontend)
        .with_state(state.clone())
        .layer(from_fn_with_state(state.clone(), handle_error))
        .layer(DefaultBodyLimit::max(BODY_LIMIT))
        .layer(cors(&state))
        .layer(TraceLayer::new_for_http())
}

fn cors(state: &AppState) -> CorsLayer {
    let origins: Vec<HeaderValue> = [
        state.config.frontend_url.as_str(),
        "http://localhost:5173",
        "http://localhost:3000",
    ]
    .iter()
    .filter_map(|origin| origin.parse().ok())
    .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([CONTENT_TYPE, AUTHORIZATION])
        .allow_credentials(true)
}

/// Unknown `/api` paths get a JSON 404; everything else is served from the
/// built frontend, falling back to `index.html` for client-side routes.
async fn frontend(
    State(state): State<Arc<AppState>>,
    OriginalUri(uri): OriginalUri,
    req: Request<Body>,
) -> Response {
    let path = uri.path();
    if path == "/api" || path.starts_with("/api/") {
        return ApiError::NotFound("The requested resource does not exist").into_response();
    }

    let dir = Path::new(&state.config.static_dir);
    let service = ServeDir::new(dir).fallback(ServeFile::new(dir.join("index.html")));
    match service.oneshot(req).await {
        Ok(res) => res.map(boxed),
        Err(err) => match err {},
    }
}
