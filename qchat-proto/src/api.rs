//! Request bodies of the QChat HTTP API.

use serde::{Deserialize, Serialize};

/// Header carrying the authenticated user id, set by the auth layer in front
/// of the service.
pub const USER_ID_HEADER: &str = "x-user-id";

/// Body of `POST /api/message`.
///
/// Both fields are optional at the serde level so that a missing field
/// produces the API's own 400 response instead of a generic rejection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendMessageRequest {
    /// Target conversation.
    #[serde(default)]
    pub chat_id: Option<String>,
    /// Message text.
    #[serde(default)]
    pub message: Option<String>,
}
