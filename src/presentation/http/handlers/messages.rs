//! Message Handlers
//!
//! Server-initiated pushes to a connected user.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};

use crate::application::dto::{PushResponse, SendMessageRequest};
use crate::presentation::middleware::AuthUser;
use crate::shared::error::AppError;
use crate::shared::validation::validate;
use crate::startup::AppState;

/// Push a message to every connection of `user_id`
///
/// Accepted means handed to the fan-out, not delivered: an offline user
/// only gets the message later through restore when it requested an ack.
pub async fn push_message(
    State(state): State<AppState>,
    caller: AuthUser,
    Path(user_id): Path<String>,
    Json(body): Json<SendMessageRequest>,
) -> Result<(StatusCode, Json<PushResponse>), AppError> {
    validate(&body)?;

    let envelope = body.into_envelope();
    let id = envelope.message_id().map(str::to_string);

    tracing::debug!(caller = %caller.user_id, user_id = %user_id, kind = %envelope.kind, "Server push");
    state.gateway.send_to_user(&user_id, envelope).await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(PushResponse {
            user_id,
            id,
            status: "accepted",
        }),
    ))
}
