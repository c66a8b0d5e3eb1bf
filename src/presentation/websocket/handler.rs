//! WebSocket Upgrade Handler
//!
//! Admission checks for `GET /ws`. Everything after the upgrade belongs to
//! [`Gateway::serve`](super::Gateway::serve).

use std::convert::Infallible;
use std::net::SocketAddr;

use axum::{
    extract::{
        ws::{rejection::WebSocketUpgradeRejection, WebSocketUpgrade},
        ConnectInfo, FromRequestParts, State,
    },
    http::{header, request::Parts, HeaderMap},
    response::{IntoResponse, Response},
};

use crate::presentation::middleware::{origin_allowed, AuthUser};
use crate::shared::error::AppError;
use crate::startup::AppState;

/// Peer address, when the server was started with connect info.
#[derive(Debug, Clone, Copy)]
pub struct ClientAddr(pub Option<SocketAddr>);

impl<S: Send + Sync> FromRequestParts<S> for ClientAddr {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(Self(
            parts
                .extensions
                .get::<ConnectInfo<SocketAddr>>()
                .map(|ConnectInfo(addr)| *addr),
        ))
    }
}

/// WebSocket upgrade handler
///
/// Rejects before upgrading when the peer address is filtered, the origin
/// is not allowed, or the caller is not authenticated.
pub async fn ws_handler(
    State(state): State<AppState>,
    ClientAddr(addr): ClientAddr,
    headers: HeaderMap,
    user: Result<AuthUser, AppError>,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    if let (Some(filter), Some(addr)) = (state.ip_filter.as_ref(), addr) {
        if !filter(addr.ip()) {
            tracing::warn!(ip = %addr.ip(), "WebSocket upgrade rejected by IP filter");
            return AppError::Forbidden("Address not allowed".into()).into_response();
        }
    }

    let origin = headers.get(header::ORIGIN).and_then(|v| v.to_str().ok());
    if !origin_allowed(&state.settings.websocket.allowed_origins, origin) {
        tracing::warn!(origin = ?origin, "WebSocket upgrade rejected by origin check");
        return AppError::Forbidden("Origin not allowed".into()).into_response();
    }

    let user = match user {
        Ok(user) => user,
        Err(e) => return e.into_response(),
    };

    let ws = match ws {
        Ok(ws) => ws,
        Err(rejection) => return rejection.into_response(),
    };

    let max_size = state.settings.websocket.max_message_size;
    let gateway = state.gateway.clone();
    tracing::debug!(user_id = %user.user_id, peer = ?addr, "Upgrading WebSocket connection");

    ws.max_message_size(max_size)
        .max_frame_size(max_size)
        .on_failed_upgrade(|e| tracing::warn!(error = %e, "WebSocket upgrade failed"))
        .on_upgrade(move |socket| async move { gateway.serve(socket, user.user_id).await })
}
