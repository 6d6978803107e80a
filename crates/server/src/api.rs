//! REST glue around the room directory.
//!
//! Thin, bearer-authenticated CRUD kept deliberately small; the socket
//! protocol is the real surface.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use tracing::warn;

use roomrelay_protocol::Identity;

use crate::error::RelayError;
use crate::state::AppState;

/// Extract a bearer credential from request headers.
pub fn bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get("authorization")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::to_string)
}

async fn authenticate(state: &AppState, headers: &HeaderMap) -> Result<Identity, Response> {
    let credential = bearer_token(headers);
    state
        .verifier
        .verify(credential.as_deref())
        .await
        .map_err(|reason| {
            (
                StatusCode::UNAUTHORIZED,
                Json(json!({ "message": "unauthorized", "reason": reason.to_string() })),
            )
                .into_response()
        })
}

pub async fn health_handler() -> impl IntoResponse {
    "OK"
}

/// GET /rooms — the owner's room list, newest-first
pub async fn list_rooms_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Response {
    let identity = match authenticate(&state, &headers).await {
        Ok(identity) => identity,
        Err(rejection) => return rejection,
    };

    match state.directory.list_rooms(&identity.id).await {
        Ok(rooms) if rooms.is_empty() => (
            StatusCode::NOT_FOUND,
            Json(json!({ "message": "chat rooms not found" })),
        )
            .into_response(),
        Ok(rooms) => (
            StatusCode::OK,
            Json(json!({ "message": "success get all rooms", "data": rooms })),
        )
            .into_response(),
        Err(e) => {
            warn!(
                component = "api",
                event = "api.rooms.list_failed",
                error = %e,
                "Room listing failed"
            );
            internal_error()
        }
    }
}

/// DELETE /rooms/{room_key} — soft-delete one room
pub async fn delete_room_handler(
    State(state): State<Arc<AppState>>,
    Path(room_key): Path<String>,
    headers: HeaderMap,
) -> Response {
    let identity = match authenticate(&state, &headers).await {
        Ok(identity) => identity,
        Err(rejection) => return rejection,
    };

    if room_key.trim().is_empty() {
        return validation_error(RelayError::ValidationFailed {
            field: "room",
            code: "IS_REQUIRED",
        });
    }

    match state.directory.delete_room(&identity.id, &room_key).await {
        Ok(true) => (
            StatusCode::OK,
            Json(json!({ "message": "successfully delete chat room" })),
        )
            .into_response(),
        Ok(false) => (
            StatusCode::NOT_FOUND,
            Json(json!({ "message": "chat room not found" })),
        )
            .into_response(),
        Err(e) => {
            warn!(
                component = "api",
                event = "api.rooms.delete_failed",
                room_key = %room_key,
                error = %e,
                "Room delete failed"
            );
            internal_error()
        }
    }
}

/// DELETE /rooms — soft-delete all the owner's rooms
pub async fn clear_rooms_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Response {
    let identity = match authenticate(&state, &headers).await {
        Ok(identity) => identity,
        Err(rejection) => return rejection,
    };

    match state.directory.clear_rooms(&identity.id).await {
        Ok(0) => (
            StatusCode::NOT_FOUND,
            Json(json!({ "message": "chat rooms not found" })),
        )
            .into_response(),
        Ok(count) => (
            StatusCode::OK,
            Json(json!({ "message": "successfully clear all chat rooms", "cleared": count })),
        )
            .into_response(),
        Err(e) => {
            warn!(
                component = "api",
                event = "api.rooms.clear_failed",
                error = %e,
                "Room clear failed"
            );
            internal_error()
        }
    }
}

fn validation_error(err: RelayError) -> Response {
    let mut errors = serde_json::Map::new();
    if let RelayError::ValidationFailed { field, code } = &err {
        errors.insert((*field).to_string(), json!(code));
    }
    (
        StatusCode::BAD_REQUEST,
        Json(json!({ "errors": errors, "message": "validation errors" })),
    )
        .into_response()
}

fn internal_error() -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "message": "internal error" })),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::bearer_token;
    use axum::http::{HeaderMap, HeaderValue};

    #[test]
    fn extracts_bearer_token() {
        let mut headers = HeaderMap::new();
        headers.insert("authorization", HeaderValue::from_static("Bearer abc123"));
        assert_eq!(bearer_token(&headers).as_deref(), Some("abc123"));
    }

    #[test]
    fn ignores_non_bearer_schemes() {
        let mut headers = HeaderMap::new();
        headers.insert("authorization", HeaderValue::from_static("Basic abc123"));
        assert!(bearer_token(&headers).is_none());
        assert!(bearer_token(&HeaderMap::new()).is_none());
    }
}
