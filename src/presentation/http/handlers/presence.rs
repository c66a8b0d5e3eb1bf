//! Presence Handlers
//!
//! Read-only view of the cluster-wide presence directory.

use axum::{
    extract::{Path, State},
    Json,
};

use crate::application::dto::{PresenceUsersResponse, UserPresenceResponse};
use crate::shared::error::AppError;
use crate::startup::AppState;

/// List every user with at least one live connection in the cluster
pub async fn list_users(State(state): State<AppState>) -> Result<Json<PresenceUsersResponse>, AppError> {
    let mut users = state.presence.get_users().await?;
    users.sort_unstable();

    Ok(Json(PresenceUsersResponse {
        count: users.len(),
        users,
    }))
}

/// Pods currently holding a connection for the user
pub async fn get_user(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<Json<UserPresenceResponse>, AppError> {
    let mut pods = state.presence.get_user_pods(&user_id).await?;
    pods.sort_unstable();

    Ok(Json(UserPresenceResponse {
        online: !pods.is_empty(),
        user_id,
        pods,
    }))
}
