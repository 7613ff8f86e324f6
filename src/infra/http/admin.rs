//! Administrative actions behind the shared-secret check.

use axum::{
    Json,
    extract::{Path, State},
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use serde_json::json;
use subtle::ConstantTimeEq;
use tracing::info;

use crate::application::error::AppError;

use super::public::HttpState;

#[derive(Debug, Deserialize)]
pub struct AdminRequest {
    password: String,
}

/// `POST /admin/{action}` with the admin password in the JSON body.
///
/// With no admin password configured the whole surface behaves as absent.
/// A wrong password is rejected before any action runs and changes no
/// state.
pub async fn admin_action(
    State(state): State<HttpState>,
    Path(action): Path<String>,
    Json(body): Json<AdminRequest>,
) -> Response {
    let Some(expected) = state.admin_password.as_deref() else {
        return AppError::NotFound.into_response();
    };

    if !password_matches(expected, &body.password) {
        return AppError::Unauthorized.into_response();
    }

    match action.as_str() {
        "reload-templates" => reload_templates(&state).await,
        _ => AppError::NotFound.into_response(),
    }
}

fn password_matches(expected: &str, provided: &str) -> bool {
    expected.as_bytes().ct_eq(provided.as_bytes()).into()
}

async fn reload_templates(state: &HttpState) -> Response {
    match state.loader.load_all().await {
        Ok(loaded) => {
            state.cache.reload(loaded.frame, loaded.pages);
            info!("Templates reloaded by administrative request");
            Json(json!({ "status": "ok" })).into_response()
        }
        // The previous compiled templates stay in service.
        Err(err) => AppError::unexpected(format!("template reload failed: {err}")).into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn password_comparison_accepts_exact_match_only() {
        assert!(password_matches("hunter2", "hunter2"));
        assert!(!password_matches("hunter2", "hunter3"));
        assert!(!password_matches("hunter2", "hunter2 "));
        assert!(!password_matches("hunter2", ""));
    }
}
