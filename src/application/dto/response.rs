//! Response DTOs

use serde::Serialize;

/// Accepted server push
#[derive(Debug, Serialize)]
pub struct PushResponse {
    pub user_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub status: &'static str,
}

/// Users with presence anywhere in the cluster
#[derive(Debug, Serialize)]
pub struct PresenceUsersResponse {
    pub users: Vec<String>,
    pub count: usize,
}

/// Where one user is connected
#[derive(Debug, Serialize)]
pub struct UserPresenceResponse {
    pub user_id: String,
    pub online: bool,
    pub pods: Vec<String>,
}
